use axum::{
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::models::Activity;
use crate::routes::validation::{non_blank, Json, Pagination};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecordActivityRequest {
    #[validate(length(min = 1, max = 50))]
    pub kind: String,
    #[validate(url)]
    pub target_url: Option<String>,
    pub detail: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub success: bool,
    pub activity: Activity,
}

#[derive(Debug, Serialize)]
pub struct ActivityListResponse {
    pub success: bool,
    pub activities: Vec<Activity>,
}

/// Log an action the extension performed
///
/// POST /api/activity
pub async fn record_activity(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<RecordActivityRequest>,
) -> Result<(StatusCode, Json<ActivityResponse>)> {
    payload.validate()?;

    let activity = Activity::record(
        &state.db,
        &auth.user.id,
        payload.kind.trim(),
        payload.target_url.as_deref(),
        payload.detail.as_ref(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ActivityResponse {
            success: true,
            activity,
        }),
    ))
}

/// Caller's activity log, newest first
///
/// GET /api/activity?kind=&limit=&offset=
pub async fn list_activity(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<ActivityListResponse>> {
    let page = Pagination {
        limit: query.limit,
        offset: query.offset,
    };
    let kind = non_blank(query.kind);
    let activities = Activity::list_for_user(
        &state.db,
        &auth.user.id,
        kind.as_deref(),
        page.limit(),
        page.offset(),
    )
    .await?;

    Ok(Json(ActivityListResponse {
        success: true,
        activities,
    }))
}
