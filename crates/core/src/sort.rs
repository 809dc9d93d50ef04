//! Sort order and its wire encoding (`region`, `-region`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self { Self { field: field.into(), direction: SortDirection::Asc } }
    pub fn desc(field: impl Into<String>) -> Self { Self { field: field.into(), direction: SortDirection::Desc } }

    /// Lower-cased field name, `-` prefixed when descending.
    pub fn encode(&self) -> String {
        let field = self.field.to_lowercase();
        match self.direction {
            SortDirection::Asc => field,
            SortDirection::Desc => format!("-{}", field),
        }
    }

    /// Column-header click: the active ascending column flips to descending,
    /// anything else starts ascending.
    pub fn clicked(current: Option<&SortSpec>, field: &str) -> SortSpec {
        match current {
            Some(s) if s.field.eq_ignore_ascii_case(field) && s.direction == SortDirection::Asc => {
                SortSpec::desc(field)
            }
            _ => SortSpec::asc(field),
        }
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.encode()) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid sort key: {0:?}")]
pub struct SortParseError(pub String);

impl FromStr for SortSpec {
    type Err = SortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (field, direction) = match s.strip_prefix('-') {
            Some(rest) => (rest, SortDirection::Desc),
            None => (s.strip_prefix('+').unwrap_or(s), SortDirection::Asc),
        };
        if field.is_empty() {
            return Err(SortParseError(s.to_string()));
        }
        Ok(SortSpec { field: field.to_lowercase(), direction })
    }
}
