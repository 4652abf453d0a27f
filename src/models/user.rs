use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::Plan;

pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";

/// Account row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    #[serde(skip_serializing)]
    pub external_id: Option<String>,
    pub role: String,
    pub plan_id: String,
    pub plan_expires_at: Option<DateTime<Utc>>,
    pub subscription_status: Option<String>,
    #[serde(skip_serializing)]
    pub stripe_customer_id: Option<String>,
    #[serde(skip_serializing)]
    pub stripe_subscription_id: Option<String>,
    pub referral_code: String,
    #[serde(skip_serializing)]
    pub referred_by: Option<String>,
    pub referral_balance_cents: i64,
    pub email_verified: bool,
    pub is_banned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create an account
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub password_hash: Option<String>,
    pub external_id: Option<String>,
    pub plan_id: String,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub email_verified: bool,
}

/// Normalize an email for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// Whether the assigned paid plan has lapsed at `now`
    ///
    /// Plans without an expiry never lapse.
    pub fn plan_lapsed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.plan_expires_at, Some(expires) if expires <= now)
    }

    pub async fn create(pool: &SqlitePool, new: NewUser) -> Result<User, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, name, password_hash, external_id, role, plan_id,
                               referral_code, referred_by, email_verified, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(normalize_email(&new.email))
        .bind(new.name)
        .bind(new.password_hash)
        .bind(new.external_id)
        .bind(ROLE_USER)
        .bind(new.plan_id)
        .bind(new.referral_code)
        .bind(new.referred_by)
        .bind(new.email_verified)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(normalize_email(email))
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_referral_code(
        pool: &SqlitePool,
        code: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE referral_code = ?")
            .bind(code.trim().to_uppercase())
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_external_id(
        pool: &SqlitePool,
        external_id: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_stripe_customer(
        pool: &SqlitePool,
        customer_id: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE stripe_customer_id = ?")
            .bind(customer_id)
            .fetch_optional(pool)
            .await
    }

    /// Page through accounts, optionally filtered by an email/name substring
    pub async fn search(
        pool: &SqlitePool,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>, sqlx::Error> {
        let pattern = format!("%{}%", search.unwrap_or("").trim().to_lowercase());
        sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE email LIKE ? OR LOWER(COALESCE(name, '')) LIKE ?
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn count_referred(pool: &SqlitePool, referrer_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE referred_by = ?")
            .bind(referrer_id)
            .fetch_one(pool)
            .await
    }

    /// Assign a plan; `expires_at = None` keeps it until changed again
    pub async fn set_plan(
        pool: &SqlitePool,
        id: &str,
        plan_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET plan_id = ?, plan_expires_at = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(plan_id)
        .bind(expires_at)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Record the billing identifiers and status after checkout
    pub async fn attach_subscription(
        pool: &SqlitePool,
        id: &str,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
        status: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users SET
                stripe_customer_id = COALESCE(?, stripe_customer_id),
                stripe_subscription_id = COALESCE(?, stripe_subscription_id),
                subscription_status = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(customer_id)
        .bind(subscription_id)
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_subscription_status(
        pool: &SqlitePool,
        id: &str,
        status: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET subscription_status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn set_banned(
        pool: &SqlitePool,
        id: &str,
        banned: bool,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET is_banned = ?, updated_at = ? WHERE id = ? RETURNING *",
        )
        .bind(banned)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn mark_email_verified(pool: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET email_verified = 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Sync profile fields pushed by the auth provider
    pub async fn update_profile(
        pool: &SqlitePool,
        id: &str,
        email: &str,
        name: Option<&str>,
        external_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users SET email = ?, name = COALESCE(?, name), external_id = ?,
                             email_verified = 1, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(normalize_email(email))
        .bind(name)
        .bind(external_id)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Account counts keyed by plan slug
    pub async fn count_by_plan(pool: &SqlitePool) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT p.slug, COUNT(u.id)
            FROM plans p LEFT JOIN users u ON u.plan_id = p.id
            GROUP BY p.slug
            ORDER BY p.price_cents
            "#,
        )
        .fetch_all(pool)
        .await
    }
}

/// Resolve the plan that currently applies to `user`
///
/// A paid plan whose expiry has passed is treated as the default plan.
pub async fn effective_plan(pool: &SqlitePool, user: &User) -> Result<Plan, sqlx::Error> {
    if !user.plan_lapsed(Utc::now()) {
        if let Some(plan) = Plan::find_by_id(pool, &user.plan_id).await? {
            return Ok(plan);
        }
    }
    Plan::default_plan(pool).await
}
