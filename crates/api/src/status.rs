use std::time::{Duration, Instant};

use tagscope_core::{EngineState, EngineStatus};
use tracing::{debug, info, warn};

use crate::{ApiError, ApiResult, InventoryApi};

/// Poll `/enginestatus` every `interval` while the backend reports `fetching`.
///
/// Returns the settled status, or [`ApiError::EngineFailed`] with the backend's message.
pub async fn wait_for_engine(api: &dyn InventoryApi, interval: Duration) -> ApiResult<EngineStatus> {
    let t0 = Instant::now();
    let mut polls = 0usize;
    loop {
        let status = api.engine_status().await?;
        polls += 1;
        match status.status {
            EngineState::Fetching => {
                debug!(polls, "engine: still fetching");
                tokio::time::sleep(interval).await;
            }
            EngineState::Failed => {
                let msg = status.error_message.clone().unwrap_or_else(|| "engine failed".to_string());
                warn!(polls, error = %msg, took_ms = %t0.elapsed().as_millis(), "engine: failed");
                return Err(ApiError::EngineFailed(msg));
            }
            EngineState::Success | EngineState::Unknown => {
                info!(polls, took_ms = %t0.elapsed().as_millis(), "engine: settled");
                return Ok(status);
            }
        }
    }
}

/// Trigger re-ingestion and wait for the engine to settle.
pub async fn refresh_and_wait(api: &dyn InventoryApi, interval: Duration) -> ApiResult<EngineStatus> {
    api.refresh().await?;
    wait_for_engine(api, interval).await
}
