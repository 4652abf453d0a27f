//! Kommentify Server Library
//!
//! This module exports the core types and functions for testing and reuse.

pub mod auth;
pub mod billing;
pub mod config;
pub mod constants;
pub mod db;
pub mod email;
pub mod error;
pub mod integrations;
pub mod models;
pub mod routes;
pub mod security;

pub use config::Config;
pub use db::{create_pool, migrate, Db};
pub use error::{AppError, Result};
pub use integrations::Integrations;

use axum::{
    http::{HeaderValue, Method},
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Config,
    pub integrations: Integrations,
}

impl AppState {
    /// Create a new AppState with the given database, configuration and clients
    pub fn new(db: Db, config: Config, integrations: Integrations) -> Self {
        Self {
            db,
            config,
            integrations,
        }
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    // The browser extension calls from chrome-extension:// origins
    let allow_origin = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origins.contains(origin) || origin.as_bytes().starts_with(b"chrome-extension://")
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

/// Build the complete API router
pub fn build_router(state: AppState) -> Router {
    use routes::*;

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/plans", get(list_plans))
        .route("/api/extension/version", get(extension_version))
        // Auth
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/otp/request", post(request_otp))
        .route("/api/auth/otp/verify", post(verify_otp))
        .route("/api/auth/me", get(me).delete(delete_account))
        // Usage & activity
        .route("/api/usage", get(get_usage))
        .route("/api/usage/track", post(track_usage))
        .route("/api/activity", get(list_activity).post(record_activity))
        // AI
        .route("/api/ai/generate-comment", post(generate_comment))
        .route("/api/ai/generate-post", post(generate_post))
        // Comment styles & scraped content
        .route(
            "/api/comment-styles",
            get(list_comment_styles).post(create_comment_style),
        )
        .route(
            "/api/comment-styles/{id}",
            put(update_comment_style).delete(delete_comment_style),
        )
        .route(
            "/api/scraped-posts",
            get(list_scraped_posts).post(store_scraped_posts),
        )
        // Referrals
        .route("/api/referrals", get(referral_overview))
        .route("/api/referrals/payout", post(request_payout))
        // Webhooks
        .route("/api/webhooks/stripe", post(stripe_webhook))
        .route("/api/webhooks/clerk", post(clerk_webhook))
        // Admin
        .route("/api/admin/stats", get(admin_stats))
        .route("/api/admin/users", get(admin_list_users))
        .route("/api/admin/users/{id}/plan", put(admin_set_plan))
        .route("/api/admin/users/{id}/ban", put(admin_set_ban))
        .route(
            "/api/admin/referral-settings",
            get(admin_get_referral_settings).put(admin_update_referral_settings),
        )
        .route("/api/admin/payouts", get(admin_list_payouts))
        .route("/api/admin/payouts/{id}", put(admin_settle_payout))
        .route("/api/admin/extension-versions", post(admin_publish_extension))
        .route(
            "/api/admin/email-sequences/{slug}/enroll/{user_id}",
            post(admin_enroll_user),
        )
        .route("/api/admin/users/{id}", delete(admin_delete_user))
        // Cron
        .route("/api/cron/process-email-queue", post(process_email_queue))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
