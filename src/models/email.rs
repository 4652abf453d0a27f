use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_SENT: &str = "sent";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EmailSequence {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub trigger: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EmailSequenceStep {
    pub id: String,
    pub sequence_id: String,
    pub step_order: i64,
    pub delay_hours: i64,
    pub subject: String,
    pub body: String,
}

/// Outbound email waiting for (or done with) delivery
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EmailQueueEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub to_email: String,
    pub subject: String,
    pub body: String,
    pub send_at: DateTime<Utc>,
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EmailSequence {
    pub async fn find_by_slug(
        pool: &SqlitePool,
        slug: &str,
    ) -> Result<Option<EmailSequence>, sqlx::Error> {
        sqlx::query_as::<_, EmailSequence>("SELECT * FROM email_sequences WHERE slug = ?")
            .bind(slug)
            .fetch_optional(pool)
            .await
    }

    pub async fn steps(&self, pool: &SqlitePool) -> Result<Vec<EmailSequenceStep>, sqlx::Error> {
        sqlx::query_as::<_, EmailSequenceStep>(
            "SELECT * FROM email_sequence_steps WHERE sequence_id = ? ORDER BY step_order",
        )
        .bind(&self.id)
        .fetch_all(pool)
        .await
    }
}

impl EmailQueueEntry {
    pub async fn enqueue(
        pool: &SqlitePool,
        user_id: Option<&str>,
        to_email: &str,
        subject: &str,
        body: &str,
        send_at: DateTime<Utc>,
    ) -> Result<EmailQueueEntry, sqlx::Error> {
        sqlx::query_as::<_, EmailQueueEntry>(
            r#"
            INSERT INTO email_queue (id, user_id, to_email, subject, body, send_at, status, attempts, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(to_email)
        .bind(subject)
        .bind(body)
        .bind(send_at)
        .bind(STATUS_PENDING)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    /// Pending rows whose send time has come, oldest first
    pub async fn due(
        pool: &SqlitePool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EmailQueueEntry>, sqlx::Error> {
        sqlx::query_as::<_, EmailQueueEntry>(
            "SELECT * FROM email_queue WHERE status = ? AND send_at <= ? ORDER BY send_at LIMIT ?",
        )
        .bind(STATUS_PENDING)
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn mark_sent(
        pool: &SqlitePool,
        id: &str,
        provider_message_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE email_queue SET status = ?, provider_message_id = ?, sent_at = ?,
                                   attempts = attempts + 1, last_error = NULL
            WHERE id = ?
            "#,
        )
        .bind(STATUS_SENT)
        .bind(provider_message_id)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Count a failed attempt; the row becomes `failed` once `max_attempts` is reached
    ///
    /// Returns the resulting status.
    pub async fn record_failure(
        pool: &SqlitePool,
        id: &str,
        error: &str,
        max_attempts: i64,
    ) -> Result<String, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            UPDATE email_queue SET
                attempts = attempts + 1,
                last_error = ?,
                status = CASE WHEN attempts + 1 >= ? THEN ? ELSE status END
            WHERE id = ?
            RETURNING status
            "#,
        )
        .bind(error)
        .bind(max_attempts)
        .bind(STATUS_FAILED)
        .bind(id)
        .fetch_one(pool)
        .await
    }

    pub async fn count_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM email_queue GROUP BY status ORDER BY status",
        )
        .fetch_all(pool)
        .await
    }
}

/// Send time for a sequence step scheduled from `start`
pub fn step_send_at(start: DateTime<Utc>, step: &EmailSequenceStep) -> DateTime<Utc> {
    start + Duration::hours(step.delay_hours.max(0))
}
