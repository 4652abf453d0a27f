use serde::Serialize;
use sqlx::SqlitePool;

use crate::models::usage::UsageAction;

/// Subscription plan with its daily allowances (negative = unlimited)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub price_cents: i64,
    pub billing_interval: String,
    pub comments_limit: i64,
    pub likes_limit: i64,
    pub shares_limit: i64,
    pub follows_limit: i64,
    pub connections_limit: i64,
    pub ai_comments_limit: i64,
    pub ai_posts_limit: i64,
    pub is_default: bool,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub stripe_price_id: Option<String>,
}

impl Plan {
    /// Daily allowance for an action; negative means unlimited
    pub fn limit_for(&self, action: UsageAction) -> i64 {
        match action {
            UsageAction::Comment => self.comments_limit,
            UsageAction::Like => self.likes_limit,
            UsageAction::Share => self.shares_limit,
            UsageAction::Follow => self.follows_limit,
            UsageAction::Connection => self.connections_limit,
            UsageAction::AiComment => self.ai_comments_limit,
            UsageAction::AiPost => self.ai_posts_limit,
        }
    }

    pub async fn list_active(pool: &SqlitePool) -> Result<Vec<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE is_active = 1 ORDER BY price_cents")
            .fetch_all(pool)
            .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE slug = ?")
            .bind(slug)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_stripe_price(
        pool: &SqlitePool,
        price_id: &str,
    ) -> Result<Option<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE stripe_price_id = ?")
            .bind(price_id)
            .fetch_optional(pool)
            .await
    }

    /// The plan new and lapsed accounts fall back to
    pub async fn default_plan(pool: &SqlitePool) -> Result<Plan, sqlx::Error> {
        sqlx::query_as::<_, Plan>(
            "SELECT * FROM plans WHERE is_default = 1 ORDER BY price_cents LIMIT 1",
        )
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Plan {
        Plan {
            id: "p".into(),
            slug: "pro".into(),
            name: "Pro".into(),
            price_cents: 4999,
            billing_interval: "month".into(),
            comments_limit: 1,
            likes_limit: 2,
            shares_limit: 3,
            follows_limit: 4,
            connections_limit: 5,
            ai_comments_limit: 6,
            ai_posts_limit: -1,
            is_default: false,
            is_active: true,
            stripe_price_id: Some("price_123".into()),
        }
    }

    #[test]
    fn test_limit_for_each_action() {
        let plan = plan();
        assert_eq!(plan.limit_for(UsageAction::Comment), 1);
        assert_eq!(plan.limit_for(UsageAction::Like), 2);
        assert_eq!(plan.limit_for(UsageAction::Share), 3);
        assert_eq!(plan.limit_for(UsageAction::Follow), 4);
        assert_eq!(plan.limit_for(UsageAction::Connection), 5);
        assert_eq!(plan.limit_for(UsageAction::AiComment), 6);
        assert_eq!(plan.limit_for(UsageAction::AiPost), -1);
    }

    #[test]
    fn test_stripe_price_not_serialized() {
        let json = serde_json::to_value(plan()).unwrap();
        assert!(json.get("stripePriceId").is_none());
        assert_eq!(json["commentsLimit"], 1);
    }
}
