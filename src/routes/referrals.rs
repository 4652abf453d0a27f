use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::models::{PayoutRequest, ReferralCommission, ReferralSettings, User};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralOverviewResponse {
    pub success: bool,
    pub referral_code: String,
    pub referred_users: i64,
    pub balance_cents: i64,
    pub min_payout_cents: i64,
    pub commission_percent: i64,
    pub program_enabled: bool,
    pub commissions: Vec<ReferralCommission>,
}

#[derive(Debug, Serialize)]
pub struct PayoutResponse {
    pub success: bool,
    pub payout: PayoutRequest,
}

/// Caller's referral code, referred accounts and earnings
///
/// GET /api/referrals
pub async fn referral_overview(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<ReferralOverviewResponse>> {
    let settings = ReferralSettings::get(&state.db).await?;
    let referred_users = User::count_referred(&state.db, &auth.user.id).await?;
    let commissions = ReferralCommission::list_for_referrer(&state.db, &auth.user.id).await?;

    Ok(Json(ReferralOverviewResponse {
        success: true,
        referral_code: auth.user.referral_code,
        referred_users,
        balance_cents: auth.user.referral_balance_cents,
        min_payout_cents: settings.min_payout_cents,
        commission_percent: settings.commission_percent,
        program_enabled: settings.enabled,
        commissions,
    }))
}

/// Request a payout of the whole referral balance
///
/// POST /api/referrals/payout
///
/// Returns 400 while the balance is below the minimum payout.
pub async fn request_payout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<(StatusCode, Json<PayoutResponse>)> {
    let settings = ReferralSettings::get(&state.db).await?;

    let payout =
        PayoutRequest::request_full_balance(&state.db, &auth.user.id, settings.min_payout_cents)
            .await?
            .ok_or_else(|| {
                AppError::InvalidInput(format!(
                    "Balance must be at least {} cents to request a payout",
                    settings.min_payout_cents
                ))
            })?;

    tracing::info!(
        "Payout {} requested by user {} ({} cents)",
        payout.id,
        auth.user.id,
        payout.amount_cents
    );

    Ok((
        StatusCode::CREATED,
        Json(PayoutResponse {
            success: true,
            payout,
        }),
    ))
}
