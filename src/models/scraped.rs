use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

/// LinkedIn post captured by the extension
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedPost {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub post_url: String,
    pub author_name: Option<String>,
    pub author_headline: Option<String>,
    pub content: String,
    pub likes: i64,
    pub comments_count: i64,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedComment {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub post_id: String,
    pub author_name: Option<String>,
    pub content: String,
    pub likes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewScrapedPost {
    pub post_url: String,
    pub author_name: Option<String>,
    pub author_headline: Option<String>,
    pub content: String,
    pub likes: i64,
    pub comments_count: i64,
    pub comments: Vec<NewScrapedComment>,
}

#[derive(Debug, Clone)]
pub struct NewScrapedComment {
    pub author_name: Option<String>,
    pub content: String,
    pub likes: i64,
}

/// Post with how many of its comments were stored
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedPostSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub post: ScrapedPost,
    pub stored_comments: i64,
}

/// Id of a stored comment, stable across re-scrapes of the same post
///
/// The vector index is keyed by this id, so re-scraping overwrites the
/// existing vectors instead of adding new ones.
pub fn comment_id(post_id: &str, author_name: Option<&str>, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(post_id.as_bytes());
    hasher.update([0]);
    hasher.update(author_name.unwrap_or("").as_bytes());
    hasher.update([0]);
    hasher.update(content.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

impl ScrapedPost {
    /// Upsert posts by URL and replace each post's stored comments
    ///
    /// Returns the inserted comments so callers can index them.
    pub async fn upsert_batch(
        pool: &SqlitePool,
        user_id: &str,
        posts: Vec<NewScrapedPost>,
    ) -> Result<(usize, Vec<ScrapedComment>), sqlx::Error> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;
        let mut stored_posts = 0;
        let mut stored_comments = Vec::new();

        for post in posts {
            let post_id: String = sqlx::query_scalar(
                r#"
                INSERT INTO scraped_posts
                    (id, user_id, post_url, author_name, author_headline, content, likes, comments_count, scraped_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (user_id, post_url) DO UPDATE SET
                    author_name = excluded.author_name,
                    author_headline = excluded.author_headline,
                    content = excluded.content,
                    likes = excluded.likes,
                    comments_count = excluded.comments_count,
                    scraped_at = excluded.scraped_at
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(&post.post_url)
            .bind(&post.author_name)
            .bind(&post.author_headline)
            .bind(&post.content)
            .bind(post.likes)
            .bind(post.comments_count)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            stored_posts += 1;

            if post.comments.is_empty() {
                continue;
            }

            sqlx::query("DELETE FROM scraped_comments WHERE post_id = ?")
                .bind(&post_id)
                .execute(&mut *tx)
                .await?;

            for comment in post.comments {
                let stored = sqlx::query_as::<_, ScrapedComment>(
                    r#"
                    INSERT INTO scraped_comments (id, user_id, post_id, author_name, content, likes, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT (id) DO UPDATE SET likes = excluded.likes
                    RETURNING *
                    "#,
                )
                .bind(comment_id(&post_id, comment.author_name.as_deref(), &comment.content))
                .bind(user_id)
                .bind(&post_id)
                .bind(comment.author_name)
                .bind(comment.content)
                .bind(comment.likes)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;
                if !stored_comments.iter().any(|c: &ScrapedComment| c.id == stored.id) {
                    stored_comments.push(stored);
                }
            }
        }

        tx.commit().await?;
        Ok((stored_posts, stored_comments))
    }

    pub async fn list_for_user(
        pool: &SqlitePool,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ScrapedPostSummary>, sqlx::Error> {
        sqlx::query_as::<_, ScrapedPostSummary>(
            r#"
            SELECT p.*, (SELECT COUNT(*) FROM scraped_comments c WHERE c.post_id = p.id) AS stored_comments
            FROM scraped_posts p
            WHERE p.user_id = ?
            ORDER BY p.scraped_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }
}
