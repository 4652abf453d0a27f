use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

use crate::auth::CronAuth;
use crate::email::{process_queue, QueueReport};
use crate::error::Result;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct QueueRunResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: QueueReport,
}

/// Deliver queued emails whose send time has come
///
/// POST /api/cron/process-email-queue
///
/// Called by an external scheduler. Rows that fail are retried on later runs
/// until they reach the attempt limit.
pub async fn process_email_queue(
    State(state): State<AppState>,
    _cron: CronAuth,
) -> Result<Json<QueueRunResponse>> {
    let report = process_queue(
        &state.db,
        state.integrations.mailer.as_ref(),
        Utc::now(),
        state.config.email_batch_size,
        state.config.email_max_attempts,
    )
    .await?;

    Ok(Json(QueueRunResponse {
        success: true,
        report,
    }))
}
