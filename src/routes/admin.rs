use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use crate::auth::AdminAuth;
use crate::email;
use crate::error::{AppError, Result};
use crate::models::extension::is_valid_version;
use crate::models::referral::{PAYOUT_PAID, PAYOUT_PENDING, PAYOUT_REJECTED};
use crate::models::usage::usage_day;
use crate::models::{
    ApiUsage, EmailQueueEntry, ExtensionVersion, NewExtensionVersion, PayoutRequest, Plan,
    ReferralSettings, User,
};
use crate::routes::validation::{non_blank, Json, Pagination};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UserSearchQuery {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PayoutQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPlanRequest {
    pub plan_slug: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SetBanRequest {
    pub banned: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReferralSettingsRequest {
    pub enabled: bool,
    #[validate(range(min = 0, max = 100))]
    pub commission_percent: i64,
    pub recurring: bool,
    #[validate(range(min = 0))]
    pub min_payout_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct SettlePayoutRequest {
    pub status: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PublishExtensionRequest {
    pub version: String,
    #[validate(url)]
    pub download_url: String,
    pub release_notes: Option<String>,
    pub min_supported_version: Option<String>,
    #[serde(default = "default_true")]
    pub is_latest: bool,
}

fn default_true() -> bool {
    true
}

/// Database statistics response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStatsResponse {
    pub success: bool,
    pub users_by_plan: BTreeMap<String, i64>,
    pub total_users: i64,
    pub usage_today: ApiUsage,
    pub email_queue: BTreeMap<String, i64>,
    pub database_size_bytes: i64,
    pub database_size_human: String,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub success: bool,
    pub users: Vec<User>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub success: bool,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct ReferralSettingsResponse {
    pub success: bool,
    pub settings: ReferralSettings,
}

#[derive(Debug, Serialize)]
pub struct PayoutListResponse {
    pub success: bool,
    pub payouts: Vec<PayoutRequest>,
}

#[derive(Debug, Serialize)]
pub struct PayoutResponse {
    pub success: bool,
    pub payout: PayoutRequest,
}

#[derive(Debug, Serialize)]
pub struct ExtensionVersionResponse {
    pub success: bool,
    pub version: ExtensionVersion,
}

#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub success: bool,
    pub queued: usize,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub success: bool,
}

/// Format bytes into human-readable string
fn format_bytes(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Admin stats endpoint
///
/// Account counts per plan, today's usage across all users, email queue
/// depth by status and database size.
///
/// GET /api/admin/stats
pub async fn admin_stats(
    State(state): State<AppState>,
    admin: AdminAuth,
) -> Result<Json<AdminStatsResponse>> {
    let users_by_plan: BTreeMap<String, i64> =
        User::count_by_plan(&state.db).await?.into_iter().collect();
    let total_users = users_by_plan.values().sum();

    let usage_today = ApiUsage::totals_for_day(&state.db, &usage_day(Utc::now())).await?;
    let email_queue = EmailQueueEntry::count_by_status(&state.db)
        .await?
        .into_iter()
        .collect();

    let database_size_bytes: i64 = sqlx::query_scalar(
        "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
    )
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        "Admin stats requested by {}: {} users, {} database",
        admin.actor(),
        total_users,
        format_bytes(database_size_bytes)
    );

    Ok(Json(AdminStatsResponse {
        success: true,
        users_by_plan,
        total_users,
        usage_today,
        email_queue,
        database_size_bytes,
        database_size_human: format_bytes(database_size_bytes),
    }))
}

/// GET /api/admin/users?search=&limit=&offset=
pub async fn admin_list_users(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Query(query): Query<UserSearchQuery>,
) -> Result<Json<UserListResponse>> {
    let page = Pagination {
        limit: query.limit,
        offset: query.offset,
    };
    let search = non_blank(query.search);

    let users = User::search(&state.db, search.as_deref(), page.limit(), page.offset()).await?;

    Ok(Json(UserListResponse {
        success: true,
        users,
    }))
}

/// Assign a plan by slug, optionally until `expiresAt`
///
/// PUT /api/admin/users/{id}/plan
pub async fn admin_set_plan(
    State(state): State<AppState>,
    admin: AdminAuth,
    Path(id): Path<String>,
    Json(payload): Json<SetPlanRequest>,
) -> Result<Json<UserResponse>> {
    let plan = Plan::find_by_slug(&state.db, payload.plan_slug.trim())
        .await?
        .ok_or(AppError::NotFound("Plan"))?;

    let user = User::set_plan(&state.db, &id, &plan.id, payload.expires_at)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    tracing::info!("{} moved user {} to plan {}", admin.actor(), user.id, plan.slug);

    Ok(Json(UserResponse {
        success: true,
        user,
    }))
}

/// PUT /api/admin/users/{id}/ban
pub async fn admin_set_ban(
    State(state): State<AppState>,
    admin: AdminAuth,
    Path(id): Path<String>,
    Json(payload): Json<SetBanRequest>,
) -> Result<Json<UserResponse>> {
    let user = User::set_banned(&state.db, &id, payload.banned)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    tracing::info!(
        "{} {} user {}",
        admin.actor(),
        if payload.banned { "banned" } else { "unbanned" },
        user.id
    );

    Ok(Json(UserResponse {
        success: true,
        user,
    }))
}

/// Delete a user and everything they own
///
/// DELETE /api/admin/users/{id}
pub async fn admin_delete_user(
    State(state): State<AppState>,
    admin: AdminAuth,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>> {
    if !User::delete(&state.db, &id).await? {
        return Err(AppError::NotFound("User"));
    }

    tracing::info!("{} deleted user {}", admin.actor(), id);
    Ok(Json(DeletedResponse { success: true }))
}

/// GET /api/admin/referral-settings
pub async fn admin_get_referral_settings(
    State(state): State<AppState>,
    _admin: AdminAuth,
) -> Result<Json<ReferralSettingsResponse>> {
    let settings = ReferralSettings::get(&state.db).await?;
    Ok(Json(ReferralSettingsResponse {
        success: true,
        settings,
    }))
}

/// PUT /api/admin/referral-settings
pub async fn admin_update_referral_settings(
    State(state): State<AppState>,
    admin: AdminAuth,
    Json(payload): Json<ReferralSettingsRequest>,
) -> Result<Json<ReferralSettingsResponse>> {
    payload.validate()?;

    let settings = ReferralSettings::update(
        &state.db,
        payload.enabled,
        payload.commission_percent,
        payload.recurring,
        payload.min_payout_cents,
    )
    .await?;

    tracing::info!(
        "{} updated referral settings: {}% recurring={} enabled={}",
        admin.actor(),
        settings.commission_percent,
        settings.recurring,
        settings.enabled
    );

    Ok(Json(ReferralSettingsResponse {
        success: true,
        settings,
    }))
}

/// GET /api/admin/payouts?status=pending
pub async fn admin_list_payouts(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Query(query): Query<PayoutQuery>,
) -> Result<Json<PayoutListResponse>> {
    let status = non_blank(query.status);
    let payouts = PayoutRequest::list(&state.db, status.as_deref()).await?;

    Ok(Json(PayoutListResponse {
        success: true,
        payouts,
    }))
}

/// Mark a pending payout paid or rejected
///
/// PUT /api/admin/payouts/{id}
///
/// Rejecting returns the amount to the referrer's balance.
pub async fn admin_settle_payout(
    State(state): State<AppState>,
    admin: AdminAuth,
    Path(id): Path<String>,
    Json(payload): Json<SettlePayoutRequest>,
) -> Result<Json<PayoutResponse>> {
    let status = payload.status.trim();
    if status != PAYOUT_PAID && status != PAYOUT_REJECTED {
        return Err(AppError::InvalidInput(format!(
            "status must be {} or {}",
            PAYOUT_PAID, PAYOUT_REJECTED
        )));
    }

    let payout = PayoutRequest::settle(&state.db, &id, status)
        .await?
        .ok_or_else(|| {
            AppError::InvalidInput(format!("No {} payout with id {}", PAYOUT_PENDING, id))
        })?;

    tracing::info!("{} marked payout {} {}", admin.actor(), payout.id, payout.status);

    Ok(Json(PayoutResponse {
        success: true,
        payout,
    }))
}

/// Publish an extension release
///
/// POST /api/admin/extension-versions
///
/// Returns 409 if the version already exists.
pub async fn admin_publish_extension(
    State(state): State<AppState>,
    admin: AdminAuth,
    Json(payload): Json<PublishExtensionRequest>,
) -> Result<(StatusCode, Json<ExtensionVersionResponse>)> {
    payload.validate()?;

    let version = payload.version.trim().to_string();
    if !is_valid_version(&version) {
        return Err(AppError::InvalidInput(format!("Invalid version: {}", version)));
    }

    let min_supported_version = non_blank(payload.min_supported_version);
    if let Some(min) = &min_supported_version {
        if !is_valid_version(min) {
            return Err(AppError::InvalidInput(format!("Invalid version: {}", min)));
        }
    }

    if ExtensionVersion::exists(&state.db, &version).await? {
        return Err(AppError::AlreadyExists("Extension version"));
    }

    let version = ExtensionVersion::publish(
        &state.db,
        NewExtensionVersion {
            version,
            download_url: payload.download_url,
            release_notes: non_blank(payload.release_notes),
            min_supported_version,
            is_latest: payload.is_latest,
        },
    )
    .await?;

    tracing::info!("{} published extension {}", admin.actor(), version.version);

    Ok((
        StatusCode::CREATED,
        Json(ExtensionVersionResponse {
            success: true,
            version,
        }),
    ))
}

/// Queue every step of an email sequence for one user, starting now
///
/// POST /api/admin/email-sequences/{slug}/enroll/{user_id}
pub async fn admin_enroll_user(
    State(state): State<AppState>,
    admin: AdminAuth,
    Path((slug, user_id)): Path<(String, String)>,
) -> Result<Json<EnrollResponse>> {
    let user = User::find_by_id(&state.db, &user_id)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    let queued = email::enroll(&state.db, &user, &slug, Utc::now()).await?;
    if queued == 0 {
        return Err(AppError::NotFound("Email sequence"));
    }

    tracing::info!("{} enrolled user {} in {}", admin.actor(), user.id, slug);

    Ok(Json(EnrollResponse {
        success: true,
        queued,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
