//! tagscope core types: the inventory model shared by the API client and the controller.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod filter;
pub mod selection;
pub mod sort;

pub use filter::{build_filter, FilterExpression, OrClause};
pub use sort::{SortDirection, SortSpec};

/// One selected filter criterion: a `(field name, value)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// A distinct value observed for a field with the number of resources carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: String,
    #[serde(default)]
    pub count: u64,
}

/// A filterable dimension (e.g. `region`) and its value histogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub values: Vec<FieldValue>,
}

impl Field {
    pub fn value(&self, value: &str) -> Option<&FieldValue> {
        self.values.iter().find(|v| v.value == value)
    }
}

/// Named collection of related fields. Only used to organise the filter view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGroup {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// Find a field by name across all groups (first match wins).
pub fn find_field<'a>(groups: &'a [FieldGroup], name: &str) -> Option<&'a Field> {
    groups.iter().flat_map(|g| g.fields.iter()).find(|f| f.name == name)
}

/// Flattened resource attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: String,
}

/// One inventory item as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub region: String,
    #[serde(rename = "displayId", default, skip_serializing_if = "Option::is_none")]
    pub display_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(rename = "rawData", default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<serde_json::Value>,
}

/// Practical identity of a resource; `id` alone is not guaranteed unique across regions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: String,
    pub id: String,
    pub region: String,
}

impl Resource {
    pub fn new(kind: impl Into<String>, id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            region: region.into(),
            display_id: None,
            tags: Vec::new(),
            properties: Vec::new(),
            raw_data: None,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey { kind: self.kind.clone(), id: self.id.clone(), region: self.region.clone() }
    }

    /// Label shown in listings: the display id when the backend provides one.
    pub fn label(&self) -> &str {
        self.display_id.as_deref().filter(|s| !s.is_empty()).unwrap_or(&self.id)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.iter().find(|t| t.key == key).map(|t| t.value.as_str())
    }

    /// Value of a filterable field: core columns first, then tags.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "type" => Some(self.kind.as_str()),
            "id" => Some(self.id.as_str()),
            "region" => Some(self.region.as_str()),
            _ => self.tag(name),
        }
    }
}

/// One fetch response. `count` is the total number of matches, not the page length.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultPage {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub count: u64,
}

/// Backend ingestion state as reported by `/enginestatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Success,
    Fetching,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    #[serde(alias = "fetchStatus")]
    pub status: EngineState,
    #[serde(rename = "errorMessage", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(rename = "fetchedAt", default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<String>,
}

impl EngineStatus {
    pub fn is_fetching(&self) -> bool { self.status == EngineState::Fetching }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stats {
    #[serde(rename = "resourcesCount", default)]
    pub resources_count: u64,
}

/// Build information reported by `/info`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub version: String,
    #[serde(rename = "gitCommit", default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(rename = "buildTime", default, skip_serializing_if = "Option::is_none")]
    pub build_time: Option<String>,
}

pub mod prelude {
    pub use super::{
        build_filter, EngineState, EngineStatus, Field, FieldGroup, FieldValue, FilterExpression, Info,
        Property, Resource, ResourceKey, ResultPage, SortDirection, SortSpec, Stats, Tag,
    };
}
