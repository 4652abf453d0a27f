use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{AppError, Result};
use crate::models::Plan;

/// Metered extension and AI actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageAction {
    Comment,
    Like,
    Share,
    Follow,
    Connection,
    AiComment,
    AiPost,
}

impl UsageAction {
    pub const ALL: [UsageAction; 7] = [
        UsageAction::Comment,
        UsageAction::Like,
        UsageAction::Share,
        UsageAction::Follow,
        UsageAction::Connection,
        UsageAction::AiComment,
        UsageAction::AiPost,
    ];

    /// Counter column in `api_usage`
    fn column(self) -> &'static str {
        match self {
            UsageAction::Comment => "comments",
            UsageAction::Like => "likes",
            UsageAction::Share => "shares",
            UsageAction::Follow => "follows",
            UsageAction::Connection => "connections",
            UsageAction::AiComment => "ai_comments",
            UsageAction::AiPost => "ai_posts",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UsageAction::Comment => "comment",
            UsageAction::Like => "like",
            UsageAction::Share => "share",
            UsageAction::Follow => "follow",
            UsageAction::Connection => "connection",
            UsageAction::AiComment => "ai_comment",
            UsageAction::AiPost => "ai_post",
        }
    }
}

/// Per-user, per-UTC-day action counters
#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ApiUsage {
    pub user_id: String,
    pub usage_date: String,
    pub comments: i64,
    pub likes: i64,
    pub shares: i64,
    pub follows: i64,
    pub connections: i64,
    pub ai_comments: i64,
    pub ai_posts: i64,
}

/// Counter state for one action after a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageQuota {
    pub used: i64,
    /// Negative when unlimited
    pub limit: i64,
    /// `None` when unlimited
    pub remaining: Option<i64>,
}

impl UsageQuota {
    pub fn new(used: i64, limit: i64) -> Self {
        let remaining = if limit < 0 {
            None
        } else {
            Some((limit - used).max(0))
        };
        Self {
            used,
            limit,
            remaining,
        }
    }
}

/// UTC calendar day used as the counter key
pub fn usage_day(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

impl ApiUsage {
    pub fn count(&self, action: UsageAction) -> i64 {
        match action {
            UsageAction::Comment => self.comments,
            UsageAction::Like => self.likes,
            UsageAction::Share => self.shares,
            UsageAction::Follow => self.follows,
            UsageAction::Connection => self.connections,
            UsageAction::AiComment => self.ai_comments,
            UsageAction::AiPost => self.ai_posts,
        }
    }

    /// Counters for `day`, zeroed when nothing has been recorded yet
    pub async fn for_day(pool: &SqlitePool, user_id: &str, day: &str) -> Result<ApiUsage> {
        let usage = sqlx::query_as::<_, ApiUsage>(
            "SELECT * FROM api_usage WHERE user_id = ? AND usage_date = ?",
        )
        .bind(user_id)
        .bind(day)
        .fetch_optional(pool)
        .await?;

        Ok(usage.unwrap_or_else(|| ApiUsage {
            user_id: user_id.to_string(),
            usage_date: day.to_string(),
            ..Default::default()
        }))
    }

    /// Consume one unit of `action` if the plan allows it
    ///
    /// The limit check and the increment happen in one conditional UPDATE, so
    /// concurrent requests can never push a counter past its limit.
    pub async fn try_consume(
        pool: &SqlitePool,
        user_id: &str,
        plan: &Plan,
        action: UsageAction,
        day: &str,
    ) -> Result<UsageQuota> {
        let limit = plan.limit_for(action);

        sqlx::query("INSERT INTO api_usage (user_id, usage_date) VALUES (?, ?) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .bind(day)
            .execute(pool)
            .await?;

        let column = action.column();
        let sql = format!(
            "UPDATE api_usage SET {col} = {col} + 1 \
             WHERE user_id = ? AND usage_date = ? AND (? < 0 OR {col} < ?) \
             RETURNING {col}",
            col = column
        );

        let used: Option<i64> = sqlx::query_scalar(&sql)
            .bind(user_id)
            .bind(day)
            .bind(limit)
            .bind(limit)
            .fetch_optional(pool)
            .await?;

        match used {
            Some(used) => Ok(UsageQuota::new(used, limit)),
            None => {
                tracing::warn!(
                    "Daily {} limit reached for user {}: {}",
                    action.as_str(),
                    user_id,
                    limit
                );
                Err(AppError::UsageLimitReached {
                    action: action.as_str(),
                    limit,
                })
            }
        }
    }

    /// Give back one unit of `action` consumed by a request that then failed
    pub async fn refund(
        pool: &SqlitePool,
        user_id: &str,
        action: UsageAction,
        day: &str,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE api_usage SET {col} = MAX({col} - 1, 0) WHERE user_id = ? AND usage_date = ?",
            col = action.column()
        );

        sqlx::query(&sql)
            .bind(user_id)
            .bind(day)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Sum of every counter across all users for `day`
    pub async fn totals_for_day(pool: &SqlitePool, day: &str) -> Result<ApiUsage> {
        let totals = sqlx::query_as::<_, ApiUsage>(
            "SELECT '' AS user_id, ? AS usage_date, \
                    COALESCE(SUM(comments), 0) AS comments, COALESCE(SUM(likes), 0) AS likes, \
                    COALESCE(SUM(shares), 0) AS shares, COALESCE(SUM(follows), 0) AS follows, \
                    COALESCE(SUM(connections), 0) AS connections, \
                    COALESCE(SUM(ai_comments), 0) AS ai_comments, \
                    COALESCE(SUM(ai_posts), 0) AS ai_posts \
             FROM api_usage WHERE usage_date = ?",
        )
        .bind(day)
        .bind(day)
        .fetch_one(pool)
        .await?;

        Ok(totals)
    }
}
