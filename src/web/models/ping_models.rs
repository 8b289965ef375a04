use serde::{Deserialize, Serialize};

use crate::ingest::PingState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingQuery {
    /// Defaults to `success` when absent, matching bare `curl $URL` usage.
    pub state: Option<PingState>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub status: &'static str,
    pub message: String,
    pub next_due_at: Option<String>,
}
