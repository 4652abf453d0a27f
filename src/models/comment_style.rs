use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

/// A named voice the comment generator imitates
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommentStyleProfile {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub name: String,
    pub tone: Option<String>,
    pub instructions: Option<String>,
    #[sqlx(json)]
    pub example_comments: Vec<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Editable profile fields
#[derive(Debug, Clone, Default)]
pub struct StyleFields {
    pub name: String,
    pub tone: Option<String>,
    pub instructions: Option<String>,
    pub example_comments: Vec<String>,
    pub is_default: bool,
}

impl CommentStyleProfile {
    pub async fn list_for_user(
        pool: &SqlitePool,
        user_id: &str,
    ) -> Result<Vec<CommentStyleProfile>, sqlx::Error> {
        sqlx::query_as::<_, CommentStyleProfile>(
            "SELECT * FROM comment_style_profiles WHERE user_id = ? ORDER BY is_default DESC, created_at",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn count_for_user(pool: &SqlitePool, user_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM comment_style_profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await
    }

    /// Fetch a profile only if it belongs to `user_id`
    pub async fn find_owned(
        pool: &SqlitePool,
        user_id: &str,
        id: &str,
    ) -> Result<Option<CommentStyleProfile>, sqlx::Error> {
        sqlx::query_as::<_, CommentStyleProfile>(
            "SELECT * FROM comment_style_profiles WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_default(
        pool: &SqlitePool,
        user_id: &str,
    ) -> Result<Option<CommentStyleProfile>, sqlx::Error> {
        sqlx::query_as::<_, CommentStyleProfile>(
            "SELECT * FROM comment_style_profiles WHERE user_id = ? AND is_default = 1 LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        user_id: &str,
        fields: StyleFields,
    ) -> Result<CommentStyleProfile, sqlx::Error> {
        let mut tx = pool.begin().await?;
        if fields.is_default {
            clear_default(&mut tx, user_id).await?;
        }

        let now = Utc::now();
        let profile = sqlx::query_as::<_, CommentStyleProfile>(
            r#"
            INSERT INTO comment_style_profiles
                (id, user_id, name, tone, instructions, example_comments, is_default, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(fields.name)
        .bind(fields.tone)
        .bind(fields.instructions)
        .bind(sqlx::types::Json(fields.example_comments))
        .bind(fields.is_default)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(profile)
    }

    pub async fn update(
        pool: &SqlitePool,
        user_id: &str,
        id: &str,
        fields: StyleFields,
    ) -> Result<Option<CommentStyleProfile>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        if fields.is_default {
            clear_default(&mut tx, user_id).await?;
        }

        let profile = sqlx::query_as::<_, CommentStyleProfile>(
            r#"
            UPDATE comment_style_profiles SET
                name = ?, tone = ?, instructions = ?, example_comments = ?, is_default = ?, updated_at = ?
            WHERE id = ? AND user_id = ?
            RETURNING *
            "#,
        )
        .bind(fields.name)
        .bind(fields.tone)
        .bind(fields.instructions)
        .bind(sqlx::types::Json(fields.example_comments))
        .bind(fields.is_default)
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(profile)
    }

    pub async fn delete(pool: &SqlitePool, user_id: &str, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM comment_style_profiles WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn clear_default(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE comment_style_profiles SET is_default = 0 WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
