use axum::{extract::State, http::HeaderMap, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::billing::{apply_stripe_event, StripeEvent};
use crate::constants::WEBHOOK_TOLERANCE_SECS;
use crate::error::{AppError, Result};
use crate::models::user::normalize_email;
use crate::models::webhook_event::{claim_event, release_event, PROVIDER_CLERK, PROVIDER_STRIPE};
use crate::models::User;
use crate::routes::auth::{create_account, Signup};
use crate::security::{verify_stripe_signature, verify_svix_signature};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub received: bool,
    /// False for event types the server does not act on
    pub handled: bool,
    pub duplicate: bool,
}

#[derive(Debug, Deserialize)]
pub struct ClerkEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: ClerkUser,
}

#[derive(Debug, Deserialize)]
pub struct ClerkUser {
    pub id: String,
    #[serde(default)]
    pub email_addresses: Vec<ClerkEmail>,
    pub primary_email_address_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClerkEmail {
    pub id: String,
    pub email_address: String,
}

impl ClerkUser {
    /// The primary address, or the first one listed
    fn primary_email(&self) -> Option<&str> {
        self.email_addresses
            .iter()
            .find(|e| Some(&e.id) == self.primary_email_address_id.as_ref())
            .or_else(|| self.email_addresses.first())
            .map(|e| e.email_address.as_str())
    }

    fn full_name(&self) -> Option<String> {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!name.is_empty()).then_some(name)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidSignature)
}

/// Run `work` once per provider event id
///
/// A failed run releases the claim so the provider's retry is processed.
async fn process_once<F>(
    state: &AppState,
    provider: &str,
    event_id: &str,
    work: F,
) -> Result<Json<WebhookResponse>>
where
    F: Future<Output = Result<bool>>,
{
    if !claim_event(&state.db, provider, event_id).await? {
        tracing::info!("Skipping duplicate {} event {}", provider, event_id);
        return Ok(Json(WebhookResponse {
            success: true,
            received: true,
            handled: false,
            duplicate: true,
        }));
    }

    match work.await {
        Ok(handled) => Ok(Json(WebhookResponse {
            success: true,
            received: true,
            handled,
            duplicate: false,
        })),
        Err(e) => {
            release_event(&state.db, provider, event_id).await?;
            tracing::error!("Failed to process {} event {}: {}", provider, event_id, e);
            Err(e)
        }
    }
}

/// Payment processor webhook
///
/// POST /api/webhooks/stripe
///
/// The raw body is verified against the `Stripe-Signature` header before it
/// is parsed. Unknown event types are acknowledged and ignored.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>> {
    let secret = state
        .config
        .stripe_webhook_secret
        .as_deref()
        .ok_or(AppError::NotConfigured("Stripe webhook secret"))?;

    let signature = header(&headers, "stripe-signature")?;
    verify_stripe_signature(
        &body,
        signature,
        secret,
        WEBHOOK_TOLERANCE_SECS,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::warn!("Rejected billing webhook: {:?}", e);
        AppError::from(e)
    })?;

    let event: StripeEvent = serde_json::from_str(&body)
        .map_err(|e| AppError::InvalidInput(format!("Invalid event payload: {}", e)))?;

    tracing::info!("Billing event {} ({})", event.id, event.kind);

    process_once(
        &state,
        PROVIDER_STRIPE,
        &event.id,
        apply_stripe_event(&state.db, &event),
    )
    .await
}

/// Auth provider webhook (svix signed)
///
/// POST /api/webhooks/clerk
pub async fn clerk_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>> {
    let secret = state
        .config
        .clerk_webhook_secret
        .as_deref()
        .ok_or(AppError::NotConfigured("Clerk webhook secret"))?;

    let msg_id = header(&headers, "svix-id")?;
    let timestamp = header(&headers, "svix-timestamp")?;
    let signature = header(&headers, "svix-signature")?;

    verify_svix_signature(
        msg_id,
        timestamp,
        &body,
        signature,
        secret,
        WEBHOOK_TOLERANCE_SECS,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::warn!("Rejected auth provider webhook: {:?}", e);
        AppError::from(e)
    })?;

    let event: ClerkEvent = serde_json::from_str(&body)
        .map_err(|e| AppError::InvalidInput(format!("Invalid event payload: {}", e)))?;

    tracing::info!("Auth provider event {} ({})", msg_id, event.kind);

    process_once(&state, PROVIDER_CLERK, msg_id, apply_clerk_event(&state, event)).await
}

async fn apply_clerk_event(state: &AppState, event: ClerkEvent) -> Result<bool> {
    match event.kind.as_str() {
        "user.created" | "user.updated" => {
            sync_clerk_user(state, &event.data).await?;
            Ok(true)
        }
        "user.deleted" => {
            match User::find_by_external_id(&state.db, &event.data.id).await? {
                Some(user) => {
                    User::delete(&state.db, &user.id).await?;
                    tracing::info!("Deleted user {} removed at the auth provider", user.id);
                }
                None => tracing::debug!("Deleted auth provider user was never synced"),
            }
            Ok(true)
        }
        other => {
            tracing::debug!("Ignoring auth provider event type {}", other);
            Ok(false)
        }
    }
}

/// Create or update the local account for an auth provider user
///
/// Matches on the provider id first, then links an existing account with
/// the same email.
async fn sync_clerk_user(state: &AppState, data: &ClerkUser) -> Result<()> {
    let email = data
        .primary_email()
        .map(normalize_email)
        .ok_or_else(|| AppError::InvalidInput("User has no email address".to_string()))?;
    let name = data.full_name();

    let existing = match User::find_by_external_id(&state.db, &data.id).await? {
        Some(user) => Some(user),
        None => User::find_by_email(&state.db, &email).await?,
    };

    match existing {
        Some(user) => {
            User::update_profile(&state.db, &user.id, &email, name.as_deref(), &data.id).await?;
            tracing::info!("Synced user {} from the auth provider", user.id);
        }
        None => {
            create_account(
                state,
                Signup {
                    email,
                    name,
                    external_id: Some(data.id.clone()),
                    email_verified: true,
                    ..Default::default()
                },
            )
            .await?;
        }
    }

    Ok(())
}
