//! tagscope API façade.
//!
//! This crate defines the collaborator trait the controller and CLI depend on,
//! plus two implementations: [`HttpApi`] talking to the inventory backend over REST
//! and [`MockApi`], an in-memory fixture used by tests and demos.

#![forbid(unsafe_code)]

use serde::{Serialize, Serializer};
use tagscope_core::{EngineStatus, FieldGroup, FilterExpression, Info, Resource, ResultPage, SortSpec, Stats};

mod config;
mod http;
mod mock;
mod status;

pub use config::ClientConfig;
pub use http::HttpApi;
pub use mock::{demo_inventory, MockApi, MOCK_DEFAULT_LIMIT};
pub use status::{refresh_and_wait, wait_for_engine};

/// API errors carried back to callers as structured rejections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("decode: {0}")]
    Decode(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("engine failed: {0}")]
    EngineFailed(String),
    #[error("config: {0}")]
    Config(String),
}

impl ApiError {
    /// HTTP status when the failure came from a backend response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Body of `POST /resources`. Used for fresh fetches and next-page fetches alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceQuery {
    #[serde(skip_serializing_if = "FilterExpression::is_match_all")]
    pub filter: FilterExpression,
    pub limit: usize,
    pub offset: usize,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "encode_sort")]
    pub sort: Option<SortSpec>,
}

impl ResourceQuery {
    pub fn new(filter: FilterExpression, limit: usize) -> Self {
        Self { filter, limit, offset: 0, sort: None }
    }
}

fn encode_sort<S: Serializer>(sort: &Option<SortSpec>, s: S) -> Result<S::Ok, S::Error> {
    match sort {
        Some(order) => s.serialize_str(&order.encode()),
        None => s.serialize_none(),
    }
}

/// Inventory backend surface.
#[async_trait::async_trait]
pub trait InventoryApi: Send + Sync {
    /// Unfiltered first page (`GET /resources`).
    async fn resources(&self) -> ApiResult<ResultPage>;

    /// Filtered, paged and sorted query (`POST /resources`).
    async fn query(&self, query: &ResourceQuery) -> ApiResult<ResultPage>;

    /// Single resource by id (`GET /resource?id=`).
    async fn resource(&self, id: &str) -> ApiResult<Resource>;

    /// Field metadata for building the filter view. Malformed metadata is an empty list.
    async fn fields(&self) -> ApiResult<Vec<FieldGroup>>;

    /// Ask the backend to re-ingest inventory (`POST /refresh`).
    async fn refresh(&self) -> ApiResult<()>;

    async fn engine_status(&self) -> ApiResult<EngineStatus>;

    async fn stats(&self) -> ApiResult<Stats>;

    async fn info(&self) -> ApiResult<Info>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tagscope_core::{build_filter, Tag};

    #[test]
    fn query_body_omits_match_all_and_encodes_sort() {
        let q = ResourceQuery { filter: FilterExpression::MatchAll, limit: 25, offset: 50, sort: Some(SortSpec::desc("Region")) };
        assert_eq!(serde_json::to_value(&q).unwrap(), json!({"limit": 25, "offset": 50, "sort": "-region"}));

        let q = ResourceQuery::new(build_filter(&[Tag::new("type", "s3.Bucket")]), 10);
        assert_eq!(
            serde_json::to_value(&q).unwrap(),
            json!({"filter": {"$and": [{"$or": [{"type": "s3.Bucket"}]}]}, "limit": 10, "offset": 0})
        );
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(ApiError::Status { status: 500, message: "boom".into() }.status(), Some(500));
        assert_eq!(ApiError::NotFound("x".into()).status(), Some(404));
        assert_eq!(ApiError::Transport("refused".into()).status(), None);
    }
}
