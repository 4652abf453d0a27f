use axum::{extract::State, http::StatusCode};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::{Validate, ValidateEmail};

use crate::auth::AuthUser;
use crate::constants::{ERR_INVALID_EMAIL, MIN_PASSWORD_LEN, SIGNUP_SEQUENCE_SLUG};
use crate::email;
use crate::error::{AppError, Result};
use crate::models::user::{effective_plan, normalize_email};
use crate::models::usage::usage_day;
use crate::models::{
    ApiUsage, EmailQueueEntry, NewUser, OtpCode, Plan, UsageAction, UsageQuota, User,
};
use crate::routes::validation::{non_blank, Json};
use crate::security::{
    generate_otp, generate_referral_code, hash_otp, hash_password, issue_token,
    verify_otp as verify_otp_code, verify_password,
};
use crate::AppState;

const OTP_SUBJECT: &str = "Your Kommentify sign-in code";
const OTP_BODY: &str =
    "Your Kommentify sign-in code is {{code}}. It expires in {{minutes}} minutes.";

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    #[validate(length(min = MIN_PASSWORD_LEN, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(max = 100))]
    pub name: Option<String>,
    pub referral_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct OtpRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct OtpVerifyRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteAccountRequest {
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub success: bool,
    pub token: String,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub success: bool,
    pub user: User,
    pub plan: Plan,
    pub usage: BTreeMap<&'static str, UsageQuota>,
}

/// Normalize an address, rejecting anything that is not an email
pub(crate) fn require_email(email: &str) -> Result<String> {
    let email = normalize_email(email);
    if !email.validate_email() {
        return Err(AppError::InvalidInput(ERR_INVALID_EMAIL.to_string()));
    }
    Ok(email)
}

fn session(state: &AppState, user: User) -> Result<SessionResponse> {
    let token = issue_token(
        &user.id,
        &user.email,
        &user.role,
        &state.config.jwt_secret,
        state.config.jwt_ttl_secs,
    )?;
    Ok(SessionResponse {
        success: true,
        token,
        user,
    })
}

async fn unused_referral_code(state: &AppState) -> Result<String> {
    loop {
        let code = generate_referral_code();
        if User::find_by_referral_code(&state.db, &code).await?.is_none() {
            return Ok(code);
        }
    }
}

/// Fields the different sign-up paths supply for a new account
#[derive(Debug, Default)]
pub(crate) struct Signup {
    pub email: String,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub external_id: Option<String>,
    pub referred_by: Option<String>,
    pub email_verified: bool,
}

/// Create an account on the default plan and enroll it in the welcome sequence
pub(crate) async fn create_account(state: &AppState, signup: Signup) -> Result<User> {
    let plan = Plan::default_plan(&state.db).await?;
    let referral_code = unused_referral_code(state).await?;

    let user = User::create(
        &state.db,
        NewUser {
            email: signup.email,
            name: signup.name,
            password_hash: signup.password_hash,
            external_id: signup.external_id,
            plan_id: plan.id,
            referral_code,
            referred_by: signup.referred_by,
            email_verified: signup.email_verified,
        },
    )
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::AlreadyExists("Account"),
        other => AppError::Database(other),
    })?;

    email::enroll(&state.db, &user, SIGNUP_SEQUENCE_SLUG, Utc::now()).await?;

    tracing::info!("Account created: {}", user.id);
    Ok(user)
}

/// Register with email and password
///
/// POST /api/auth/register
///
/// Returns 409 Conflict if the email is taken and 400 for an unknown
/// referral code.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<SessionResponse>)> {
    payload.validate()?;
    let email = require_email(&payload.email)?;

    if User::find_by_email(&state.db, &email).await?.is_some() {
        tracing::info!("Registration for existing email rejected");
        return Err(AppError::AlreadyExists("Account"));
    }

    let referred_by = match non_blank(payload.referral_code) {
        Some(code) => {
            let referrer = User::find_by_referral_code(&state.db, &code.to_uppercase())
                .await?
                .ok_or_else(|| AppError::InvalidInput("Unknown referral code".to_string()))?;
            Some(referrer.id)
        }
        None => None,
    };

    let password_hash =
        hash_password(&payload.password).map_err(|e| AppError::PasswordHash(e.to_string()))?;

    let user = create_account(
        &state,
        Signup {
            email,
            name: non_blank(payload.name),
            password_hash: Some(password_hash),
            referred_by,
            ..Default::default()
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(session(&state, user)?)))
}

/// Sign in with email and password
///
/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<SessionResponse>> {
    let user = User::find_by_email(&state.db, &normalize_email(&payload.email))
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    // Accounts created through OTP or the auth provider have no password
    let valid = user
        .password_hash
        .as_deref()
        .map(|hash| verify_password(&payload.password, hash))
        .unwrap_or(false);

    if !valid {
        tracing::warn!("Failed login for user {}", user.id);
        return Err(AppError::InvalidCredentials);
    }

    if user.is_banned {
        return Err(AppError::Forbidden);
    }

    Ok(Json(session(&state, user)?))
}

/// Email a one-time sign-in code
///
/// POST /api/auth/otp/request
///
/// The response is the same whether or not an account exists for the
/// address.
pub async fn request_otp(
    State(state): State<AppState>,
    Json(payload): Json<OtpRequest>,
) -> Result<Json<MessageResponse>> {
    let email = require_email(&payload.email)?;
    let now = Utc::now();

    let recent = OtpCode::count_since(&state.db, &email, now - Duration::hours(1)).await?;
    if recent >= state.config.otp_requests_per_hour {
        tracing::warn!("OTP rate limit hit ({} codes in the last hour)", recent);
        return Err(AppError::RateLimitExceeded);
    }

    let code = generate_otp();
    let code_hash = hash_otp(&email, &code, &state.config.jwt_secret);
    OtpCode::create(&state.db, &email, &code_hash, state.config.otp_ttl_secs).await?;

    let minutes = (state.config.otp_ttl_secs / 60).max(1).to_string();
    let body = email::render_template(OTP_BODY, &[("code", code.as_str()), ("minutes", minutes.as_str())]);
    let user_id = User::find_by_email(&state.db, &email).await?.map(|u| u.id);

    let entry =
        EmailQueueEntry::enqueue(&state.db, user_id.as_deref(), &email, OTP_SUBJECT, &body, now)
            .await?;

    // Left pending for the cron run if the provider is down
    email::deliver(
        &state.db,
        state.integrations.mailer.as_ref(),
        &entry,
        state.config.email_max_attempts,
    )
    .await?;

    Ok(Json(MessageResponse {
        success: true,
        message: "If the address is valid, a code has been sent".to_string(),
    }))
}

/// Exchange a one-time code for a session, creating the account on first use
///
/// POST /api/auth/otp/verify
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(payload): Json<OtpVerifyRequest>,
) -> Result<Json<SessionResponse>> {
    let email = require_email(&payload.email)?;

    let otp = OtpCode::latest_active(&state.db, &email)
        .await?
        .ok_or(AppError::InvalidCode)?;

    if otp.is_expired(Utc::now()) || otp.attempts >= state.config.otp_max_attempts {
        return Err(AppError::InvalidCode);
    }

    if !verify_otp_code(&email, &payload.code, &otp.code_hash, &state.config.jwt_secret) {
        OtpCode::record_attempt(&state.db, &otp.id).await?;
        tracing::warn!("Wrong OTP submitted (attempt {})", otp.attempts + 1);
        return Err(AppError::InvalidCode);
    }

    if !OtpCode::consume(&state.db, &otp.id).await? {
        return Err(AppError::InvalidCode);
    }

    let user = match User::find_by_email(&state.db, &email).await? {
        Some(mut user) => {
            if !user.email_verified {
                User::mark_email_verified(&state.db, &user.id).await?;
                user.email_verified = true;
            }
            user
        }
        None => {
            create_account(
                &state,
                Signup {
                    email,
                    email_verified: true,
                    ..Default::default()
                },
            )
            .await?
        }
    };

    if user.is_banned {
        return Err(AppError::Forbidden);
    }

    Ok(Json(session(&state, user)?))
}

/// Current account, its effective plan and today's remaining quota
///
/// GET /api/auth/me
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<Json<MeResponse>> {
    let plan = effective_plan(&state.db, &auth.user).await?;
    let usage = ApiUsage::for_day(&state.db, &auth.user.id, &usage_day(Utc::now())).await?;

    let quotas = UsageAction::ALL
        .iter()
        .map(|&action| {
            (
                action.as_str(),
                UsageQuota::new(usage.count(action), plan.limit_for(action)),
            )
        })
        .collect();

    Ok(Json(MeResponse {
        success: true,
        user: auth.user,
        plan,
        usage: quotas,
    }))
}

/// Delete the caller's account and everything it owns
///
/// DELETE /api/auth/me
///
/// Accounts with a password must confirm it.
pub async fn delete_account(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: Option<axum::Json<DeleteAccountRequest>>,
) -> Result<Json<MessageResponse>> {
    let payload = payload.map(|axum::Json(p)| p).unwrap_or_default();

    if let Some(hash) = auth.user.password_hash.as_deref() {
        let confirmed = payload
            .password
            .as_deref()
            .map(|p| verify_password(p, hash))
            .unwrap_or(false);
        if !confirmed {
            return Err(AppError::InvalidCredentials);
        }
    }

    if !User::delete(&state.db, &auth.user.id).await? {
        return Err(AppError::NotFound("User"));
    }

    tracing::info!("User {} deleted their account", auth.user.id);

    Ok(Json(MessageResponse {
        success: true,
        message: "Account deleted".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_email() {
        assert_eq!(require_email("  Ada@Example.COM ").ok(), Some("ada@example.com".into()));
        assert!(require_email("not-an-email").is_err());
        assert!(require_email("").is_err());
    }

    #[test]
    fn test_register_password_length() {
        let request = RegisterRequest {
            email: "ada@example.com".into(),
            password: "short".into(),
            name: None,
            referral_code: None,
        };
        assert!(request.validate().is_err());

        let request = RegisterRequest {
            password: "long enough".into(),
            ..request
        };
        assert!(request.validate().is_ok());
    }
}
