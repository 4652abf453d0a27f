use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::constants::OTP_TTL_RANGE_SECS;

/// Issued one-time passcode (only the keyed hash is stored)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OtpCode {
    pub id: String,
    pub email: String,
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: i64,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OtpCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub async fn create(
        pool: &SqlitePool,
        email: &str,
        code_hash: &str,
        ttl_secs: i64,
    ) -> Result<OtpCode, sqlx::Error> {
        let now = Utc::now();
        let (min, max) = OTP_TTL_RANGE_SECS;
        let ttl = Duration::seconds(ttl_secs.clamp(min, max));
        sqlx::query_as::<_, OtpCode>(
            r#"
            INSERT INTO otp_codes (id, email, code_hash, expires_at, attempts, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(email)
        .bind(code_hash)
        .bind(now + ttl)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    /// Codes issued to `email` since `since`
    pub async fn count_since(
        pool: &SqlitePool,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM otp_codes WHERE email = ? AND created_at >= ?")
            .bind(email)
            .bind(since)
            .fetch_one(pool)
            .await
    }

    /// Most recent unconsumed code for `email`
    pub async fn latest_active(
        pool: &SqlitePool,
        email: &str,
    ) -> Result<Option<OtpCode>, sqlx::Error> {
        sqlx::query_as::<_, OtpCode>(
            r#"
            SELECT * FROM otp_codes
            WHERE email = ? AND consumed_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    pub async fn record_attempt(pool: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE otp_codes SET attempts = attempts + 1 WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Mark consumed; false if another request consumed it first
    pub async fn consume(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE otp_codes SET consumed_at = ? WHERE id = ? AND consumed_at IS NULL")
                .bind(Utc::now())
                .bind(id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }
}
