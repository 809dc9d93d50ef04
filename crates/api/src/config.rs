use std::time::Duration;

use url::Url;

use crate::{ApiError, ApiResult};

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/";

/// Client settings. Environment: `TAGSCOPE_API_URL`, `TAGSCOPE_HTTP_TIMEOUT_SECS`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        Ok(Self { base_url: parse_base(base_url)?, timeout: Duration::from_secs(30) })
    }

    pub fn from_env() -> ApiResult<Self> {
        let url = std::env::var("TAGSCOPE_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let timeout_secs = std::env::var("TAGSCOPE_HTTP_TIMEOUT_SECS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(30);
        Ok(Self { base_url: parse_base(&url)?, timeout: Duration::from_secs(timeout_secs) })
    }
}

/// Parse a base URL, forcing a trailing slash so relative joins keep the path prefix.
fn parse_base(raw: &str) -> ApiResult<Url> {
    let mut s = raw.trim().to_string();
    if !s.ends_with('/') {
        s.push('/');
    }
    Url::parse(&s).map_err(|e| ApiError::Config(format!("invalid api url {:?}: {}", raw, e)))
}
