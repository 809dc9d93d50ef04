//! REST client for the inventory backend.

use std::time::Instant;

use metrics::{counter, histogram};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tagscope_core::{EngineStatus, FieldGroup, Info, Resource, ResultPage, Stats};
use tracing::{debug, info, warn};
use url::Url;

use crate::{ApiError, ApiResult, ClientConfig, InventoryApi, ResourceQuery};

/// Error body the backend attaches to non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<serde_json::Value>,
}

pub struct HttpApi {
    client: Client,
    base: Url,
}

impl HttpApi {
    pub fn new(cfg: &ClientConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;
        Ok(Self { client, base: cfg.base_url.clone() })
    }

    pub fn base_url(&self) -> &Url { &self.base }

    fn url(&self, path: &str) -> ApiResult<Url> {
        self.base.join(path).map_err(|e| ApiError::Config(format!("joining {}: {}", path, e)))
    }

    async fn get<T: DeserializeOwned>(&self, path: &'static str, params: &[(&str, &str)]) -> ApiResult<T> {
        let t0 = Instant::now();
        let url = self.url(path)?;
        debug!(url = %url, "api: GET");
        let resp = self.client.get(url).query(params).send().await.map_err(transport)?;
        let out = decode(resp).await;
        observe(path, t0, out.is_ok());
        out
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &'static str, body: Option<&B>) -> ApiResult<T> {
        let t0 = Instant::now();
        let url = self.url(path)?;
        debug!(url = %url, "api: POST");
        let mut req = self.client.post(url);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await.map_err(transport)?;
        let out = decode(resp).await;
        observe(path, t0, out.is_ok());
        out
    }
}

fn transport(e: reqwest::Error) -> ApiError {
    match e.status() {
        Some(s) => ApiError::Status { status: s.as_u16(), message: e.to_string() },
        None => ApiError::Transport(e.to_string()),
    }
}

fn observe(path: &'static str, t0: Instant, ok: bool) {
    histogram!("api_request_ms", t0.elapsed().as_secs_f64() * 1000.0, "path" => path);
    if !ok {
        counter!("api_request_errors_total", 1u64, "path" => path);
    }
}

/// Map non-2xx responses to `ApiError`, otherwise deserialize the body.
async fn decode<T: DeserializeOwned>(resp: Response) -> ApiResult<T> {
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(transport)?;
    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorBody>(&bytes)
            .ok()
            .and_then(|b| b.error)
            .map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .unwrap_or_else(|| String::from_utf8_lossy(&bytes).trim().to_string());
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(message));
        }
        return Err(ApiError::Status { status: status.as_u16(), message });
    }
    // Endpoints answering with an empty body (refresh) decode as `null`.
    let body: &[u8] = if bytes.iter().all(|b| b.is_ascii_whitespace()) { b"null" } else { &bytes };
    serde_json::from_slice::<T>(body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Field metadata that fails to parse is treated as "no fields yet".
pub(crate) fn fields_from_value(v: serde_json::Value) -> Vec<FieldGroup> {
    if v.is_null() {
        return Vec::new();
    }
    match serde_json::from_value::<Vec<FieldGroup>>(v) {
        Ok(groups) => groups,
        Err(e) => {
            warn!(error = %e, "api: malformed field metadata; treating as empty");
            Vec::new()
        }
    }
}

#[async_trait::async_trait]
impl InventoryApi for HttpApi {
    async fn resources(&self) -> ApiResult<ResultPage> {
        let page: ResultPage = self.get("resources", &[]).await?;
        info!(count = page.count, returned = page.resources.len(), "api: resources ok");
        Ok(page)
    }

    async fn query(&self, query: &ResourceQuery) -> ApiResult<ResultPage> {
        let page: ResultPage = self.post("resources", Some(query)).await?;
        info!(offset = query.offset, limit = query.limit, count = page.count, returned = page.resources.len(), "api: query ok");
        Ok(page)
    }

    async fn resource(&self, id: &str) -> ApiResult<Resource> {
        self.get("resource", &[("id", id)]).await
    }

    async fn fields(&self) -> ApiResult<Vec<FieldGroup>> {
        let v: serde_json::Value = self.get("fields", &[]).await?;
        let groups = fields_from_value(v);
        info!(groups = groups.len(), "api: fields ok");
        Ok(groups)
    }

    async fn refresh(&self) -> ApiResult<()> {
        let _: serde_json::Value = self.post::<(), _>("refresh", None).await?;
        info!("api: refresh requested");
        Ok(())
    }

    async fn engine_status(&self) -> ApiResult<EngineStatus> {
        self.get("enginestatus", &[]).await
    }

    async fn stats(&self) -> ApiResult<Stats> {
        self.get("stats", &[]).await
    }

    async fn info(&self) -> ApiResult<Info> {
        self.get("info", &[]).await
    }
}
