use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Automation or AI event reported by the extension
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub target_url: Option<String>,
    /// JSON document stored as text
    #[serde(serialize_with = "serialize_detail")]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn serialize_detail<S: serde::Serializer>(
    detail: &Option<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let value = detail
        .as_deref()
        .and_then(|d| serde_json::from_str::<Value>(d).ok())
        .unwrap_or(Value::Null);
    value.serialize(serializer)
}

impl Activity {
    pub async fn record(
        pool: &SqlitePool,
        user_id: &str,
        kind: &str,
        target_url: Option<&str>,
        detail: Option<&Value>,
    ) -> Result<Activity, sqlx::Error> {
        sqlx::query_as::<_, Activity>(
            r#"
            INSERT INTO activities (id, user_id, kind, target_url, detail, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(kind)
        .bind(target_url)
        .bind(detail.map(|d| d.to_string()))
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    /// Newest first, optionally filtered by kind
    pub async fn list_for_user(
        pool: &SqlitePool,
        user_id: &str,
        kind: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Activity>, sqlx::Error> {
        sqlx::query_as::<_, Activity>(
            r#"
            SELECT * FROM activities
            WHERE user_id = ? AND (? IS NULL OR kind = ?)
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(kind)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }
}
