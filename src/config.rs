use std::env;

use crate::constants::{JWT_TTL_RANGE_SECS, OTP_TTL_RANGE_SECS};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_url: String,
    pub allowed_origins: Vec<String>,
    pub environment: String,
    pub jwt_secret: String,
    pub jwt_ttl_secs: i64,
    /// Admin routes are disabled unless this is set (admins with a JWT role still pass)
    pub admin_secret_key: Option<String>,
    /// Cron routes are disabled unless this is set
    pub cron_secret: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub clerk_webhook_secret: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_embedding_model: String,
    pub pinecone_api_key: Option<String>,
    pub pinecone_index_host: Option<String>,
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub otp_ttl_secs: i64,
    pub otp_max_attempts: i64,
    pub otp_requests_per_hour: i64,
    pub email_batch_size: i64,
    pub email_max_attempts: i64,
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| format!("Invalid {}", key))
}

/// Reject durations outside `(min, max)` so expiry arithmetic cannot overflow
fn within(key: &str, value: i64, (min, max): (i64, i64)) -> Result<i64, String> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{} must be between {} and {}", key, min, max))
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists (development)
        dotenvy::dotenv().ok();

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = parsed("SERVER_PORT", "8080")?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/kommentify.db".to_string());

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| "JWT_SECRET must be set for token signing")?;

        Ok(Config {
            server_host,
            server_port,
            database_url,
            allowed_origins,
            environment,
            jwt_secret,
            jwt_ttl_secs: within(
                "JWT_TTL_SECS",
                parsed("JWT_TTL_SECS", "2592000")?,
                JWT_TTL_RANGE_SECS,
            )?,
            admin_secret_key: optional("ADMIN_SECRET_KEY"),
            cron_secret: optional("CRON_SECRET"),
            stripe_webhook_secret: optional("STRIPE_WEBHOOK_SECRET"),
            clerk_webhook_secret: optional("CLERK_WEBHOOK_SECRET"),
            openai_api_key: optional("OPENAI_API_KEY"),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            openai_embedding_model: env::var("OPENAI_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            pinecone_api_key: optional("PINECONE_API_KEY"),
            pinecone_index_host: optional("PINECONE_INDEX_HOST"),
            resend_api_key: optional("RESEND_API_KEY"),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Kommentify <hello@kommentify.com>".to_string()),
            otp_ttl_secs: within("OTP_TTL_SECS", parsed("OTP_TTL_SECS", "600")?, OTP_TTL_RANGE_SECS)?,
            otp_max_attempts: parsed("OTP_MAX_ATTEMPTS", "5")?,
            otp_requests_per_hour: parsed("OTP_REQUESTS_PER_HOUR", "5")?,
            email_batch_size: parsed("EMAIL_BATCH_SIZE", "25")?,
            email_max_attempts: parsed("EMAIL_MAX_ATTEMPTS", "3")?,
        })
    }

    /// Get server address as string
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
