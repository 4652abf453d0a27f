use axum::extract::State;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::usage::usage_day;
use crate::models::user::effective_plan;
use crate::models::{ApiUsage, UsageAction, UsageQuota};
use crate::routes::validation::Json;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TrackUsageRequest {
    pub action: UsageAction,
}

#[derive(Debug, Serialize)]
pub struct TrackUsageResponse {
    pub success: bool,
    pub action: UsageAction,
    #[serde(flatten)]
    pub quota: UsageQuota,
}

#[derive(Debug, Serialize)]
pub struct UsageEntry {
    pub action: UsageAction,
    #[serde(flatten)]
    pub quota: UsageQuota,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub success: bool,
    pub date: String,
    pub plan: String,
    pub usage: Vec<UsageEntry>,
}

/// Today's counters against the caller's plan limits
///
/// GET /api/usage
pub async fn get_usage(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UsageResponse>> {
    let day = usage_day(Utc::now());
    let plan = effective_plan(&state.db, &auth.user).await?;
    let usage = ApiUsage::for_day(&state.db, &auth.user.id, &day).await?;

    let usage = UsageAction::ALL
        .iter()
        .map(|&action| UsageEntry {
            action,
            quota: UsageQuota::new(usage.count(action), plan.limit_for(action)),
        })
        .collect();

    Ok(Json(UsageResponse {
        success: true,
        date: day,
        plan: plan.slug,
        usage,
    }))
}

/// Count one extension action against today's limit
///
/// POST /api/usage/track
///
/// Returns 429 with `limitReached: true` once the plan's daily limit is hit.
pub async fn track_usage(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<TrackUsageRequest>,
) -> Result<Json<TrackUsageResponse>> {
    let plan = effective_plan(&state.db, &auth.user).await?;
    let quota = ApiUsage::try_consume(
        &state.db,
        &auth.user.id,
        &plan,
        payload.action,
        &usage_day(Utc::now()),
    )
    .await?;

    Ok(Json(TrackUsageResponse {
        success: true,
        action: payload.action,
        quota,
    }))
}
