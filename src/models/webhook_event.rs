use chrono::Utc;
use sqlx::SqlitePool;

pub const PROVIDER_STRIPE: &str = "stripe";
pub const PROVIDER_CLERK: &str = "clerk";

/// Claim a webhook event id; false when it was already processed
pub async fn claim_event(
    pool: &SqlitePool,
    provider: &str,
    event_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO processed_webhook_events (provider, event_id, processed_at) VALUES (?, ?, ?) \
         ON CONFLICT DO NOTHING",
    )
    .bind(provider)
    .bind(event_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Forget a claim so the provider's retry is processed again
pub async fn release_event(
    pool: &SqlitePool,
    provider: &str,
    event_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM processed_webhook_events WHERE provider = ? AND event_id = ?")
        .bind(provider)
        .bind(event_id)
        .execute(pool)
        .await?;
    Ok(())
}
