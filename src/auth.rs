//! Request extractors for the three ways a caller proves who it is:
//! a user session token, the admin key (or an admin session), and the
//! cron secret.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};

use crate::error::AppError;
use crate::models::User;
use crate::security::{validate_token, Claims};
use crate::AppState;

/// Header carrying the admin secret key
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Extract the token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// An authenticated, non-banned account
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub claims: Claims,
}

async fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<AuthUser, AppError> {
    let token = bearer_token(headers).ok_or(AppError::Unauthorized)?;

    let claims = validate_token(token, &state.config.jwt_secret).map_err(|e| {
        tracing::debug!("Rejected session token: {}", e);
        AppError::InvalidToken
    })?;

    let user = User::find_by_id(&state.db, &claims.sub)
        .await?
        .ok_or(AppError::InvalidToken)?;

    if user.is_banned {
        tracing::warn!("Banned user {} attempted access", user.id);
        return Err(AppError::Forbidden);
    }

    Ok(AuthUser { user, claims })
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(&parts.headers, state).await
    }
}

/// Caller holding the admin key or an admin session
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// The admin account, when authenticated by session rather than key
    pub user: Option<User>,
}

impl AdminAuth {
    /// Who performed an admin action, for the log
    pub fn actor(&self) -> &str {
        self.user
            .as_ref()
            .map(|u| u.email.as_str())
            .unwrap_or("admin-key")
    }
}

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(provided) = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            return match &state.config.admin_secret_key {
                Some(key) if key == provided => Ok(AdminAuth { user: None }),
                _ => {
                    tracing::warn!("Invalid admin key attempt");
                    Err(AppError::Unauthorized)
                }
            };
        }

        let auth = authenticate(&parts.headers, state).await?;
        if !auth.user.is_admin() {
            tracing::warn!("Non-admin user {} hit an admin route", auth.user.id);
            return Err(AppError::Forbidden);
        }

        Ok(AdminAuth {
            user: Some(auth.user),
        })
    }
}

/// Scheduler calling a cron route with `Authorization: Bearer <CRON_SECRET>`
#[derive(Debug, Clone, Copy)]
pub struct CronAuth;

impl FromRequestParts<AppState> for CronAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let secret = state
            .config
            .cron_secret
            .as_deref()
            .ok_or(AppError::NotConfigured("Cron secret"))?;

        match bearer_token(&parts.headers) {
            Some(token) if token == secret => Ok(CronAuth),
            _ => {
                tracing::warn!("Rejected cron call");
                Err(AppError::Unauthorized)
            }
        }
    }
}
