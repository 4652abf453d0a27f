use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

pub const PAYOUT_PENDING: &str = "pending";
pub const PAYOUT_PAID: &str = "paid";
pub const PAYOUT_REJECTED: &str = "rejected";

/// Program-wide referral configuration (single row)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReferralSettings {
    #[serde(skip_serializing)]
    pub id: i64,
    pub enabled: bool,
    pub commission_percent: i64,
    /// Pay on every invoice rather than only the first
    pub recurring: bool,
    pub min_payout_cents: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReferralCommission {
    pub id: String,
    pub referrer_id: String,
    pub referred_user_id: String,
    pub invoice_id: String,
    pub amount_cents: i64,
    pub commission_cents: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRequest {
    pub id: String,
    pub user_id: String,
    pub amount_cents: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Commission owed on a paid invoice, in whole cents (rounded down)
pub fn commission_cents(amount_cents: i64, percent: i64) -> i64 {
    if amount_cents <= 0 || percent <= 0 {
        return 0;
    }
    // Widened so large invoices cannot overflow; the result never exceeds the amount
    let owed = i128::from(amount_cents) * i128::from(percent.min(100)) / 100;
    i64::try_from(owed).unwrap_or(amount_cents)
}

impl ReferralSettings {
    pub async fn get(pool: &SqlitePool) -> Result<ReferralSettings, sqlx::Error> {
        sqlx::query_as::<_, ReferralSettings>("SELECT * FROM referral_settings WHERE id = 1")
            .fetch_one(pool)
            .await
    }

    pub async fn update(
        pool: &SqlitePool,
        enabled: bool,
        commission_percent: i64,
        recurring: bool,
        min_payout_cents: i64,
    ) -> Result<ReferralSettings, sqlx::Error> {
        sqlx::query_as::<_, ReferralSettings>(
            r#"
            UPDATE referral_settings SET
                enabled = ?, commission_percent = ?, recurring = ?, min_payout_cents = ?, updated_at = ?
            WHERE id = 1
            RETURNING *
            "#,
        )
        .bind(enabled)
        .bind(commission_percent)
        .bind(recurring)
        .bind(min_payout_cents)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }
}

impl ReferralCommission {
    pub async fn exists_for_referred(
        pool: &SqlitePool,
        referred_user_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM referral_commissions WHERE referred_user_id = ?",
        )
        .bind(referred_user_id)
        .fetch_one(pool)
        .await?;
        Ok(count > 0)
    }

    /// Record a commission and credit the referrer in one transaction
    ///
    /// Returns `None` when the invoice was already credited.
    pub async fn credit(
        pool: &SqlitePool,
        referrer_id: &str,
        referred_user_id: &str,
        invoice_id: &str,
        amount_cents: i64,
        commission_cents: i64,
    ) -> Result<Option<ReferralCommission>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let commission = sqlx::query_as::<_, ReferralCommission>(
            r#"
            INSERT INTO referral_commissions
                (id, referrer_id, referred_user_id, invoice_id, amount_cents, commission_cents, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (invoice_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(referrer_id)
        .bind(referred_user_id)
        .bind(invoice_id)
        .bind(amount_cents)
        .bind(commission_cents)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await?;

        if commission.is_some() {
            sqlx::query(
                "UPDATE users SET referral_balance_cents = referral_balance_cents + ?, updated_at = ? WHERE id = ?",
            )
            .bind(commission_cents)
            .bind(Utc::now())
            .bind(referrer_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(commission)
    }

    pub async fn list_for_referrer(
        pool: &SqlitePool,
        referrer_id: &str,
    ) -> Result<Vec<ReferralCommission>, sqlx::Error> {
        sqlx::query_as::<_, ReferralCommission>(
            "SELECT * FROM referral_commissions WHERE referrer_id = ? ORDER BY created_at DESC",
        )
        .bind(referrer_id)
        .fetch_all(pool)
        .await
    }
}

impl PayoutRequest {
    /// Move the whole balance into a pending payout if it meets `min_cents`
    ///
    /// Returns `None` when the balance is below the minimum.
    pub async fn request_full_balance(
        pool: &SqlitePool,
        user_id: &str,
        min_cents: i64,
    ) -> Result<Option<PayoutRequest>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let balance: i64 =
            sqlx::query_scalar("SELECT referral_balance_cents FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        if balance <= 0 || balance < min_cents {
            return Ok(None);
        }

        let updated = sqlx::query(
            r#"
            UPDATE users SET referral_balance_cents = referral_balance_cents - ?, updated_at = ?
            WHERE id = ? AND referral_balance_cents >= ?
            "#,
        )
        .bind(balance)
        .bind(Utc::now())
        .bind(user_id)
        .bind(balance)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        let payout = sqlx::query_as::<_, PayoutRequest>(
            r#"
            INSERT INTO payout_requests (id, user_id, amount_cents, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(balance)
        .bind(PAYOUT_PENDING)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(payout))
    }

    pub async fn list(
        pool: &SqlitePool,
        status: Option<&str>,
    ) -> Result<Vec<PayoutRequest>, sqlx::Error> {
        sqlx::query_as::<_, PayoutRequest>(
            "SELECT * FROM payout_requests WHERE (? IS NULL OR status = ?) ORDER BY created_at DESC",
        )
        .bind(status)
        .bind(status)
        .fetch_all(pool)
        .await
    }

    /// Settle a pending payout; a rejected payout returns the amount to the balance
    pub async fn settle(
        pool: &SqlitePool,
        id: &str,
        status: &str,
    ) -> Result<Option<PayoutRequest>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let payout = sqlx::query_as::<_, PayoutRequest>(
            "UPDATE payout_requests SET status = ? WHERE id = ? AND status = ? RETURNING *",
        )
        .bind(status)
        .bind(id)
        .bind(PAYOUT_PENDING)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(payout) = &payout {
            if status == PAYOUT_REJECTED {
                sqlx::query(
                    "UPDATE users SET referral_balance_cents = referral_balance_cents + ? WHERE id = ?",
                )
                .bind(payout.amount_cents)
                .bind(&payout.user_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(payout)
    }
}
