//! Subscription and referral state changes driven by payment processor events.
//!
//! Only the fields the server acts on are deserialized; everything else in
//! the event payload is ignored.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::models::referral::commission_cents;
use crate::models::{Plan, ReferralCommission, ReferralSettings, User};

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_PAST_DUE: &str = "past_due";
pub const STATUS_CANCELED: &str = "canceled";

/// Subscription statuses that drop the account back to the default plan
const ENDED_STATUSES: [&str; 3] = [STATUS_CANCELED, "unpaid", "incomplete_expired"];

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    customer: Option<String>,
    subscription: Option<String>,
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Subscription {
    customer: Option<String>,
    status: String,
    current_period_end: Option<i64>,
    #[serde(default)]
    items: List<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    price: Option<Price>,
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Price {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Invoice {
    id: String,
    customer: Option<String>,
    #[serde(default)]
    amount_paid: i64,
    #[serde(default)]
    lines: List<InvoiceLine>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLine {
    period: Option<Period>,
}

#[derive(Debug, Deserialize)]
struct Period {
    end: i64,
}

#[derive(Debug, Deserialize)]
struct List<T> {
    data: Vec<T>,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

fn parse<T: serde::de::DeserializeOwned>(object: &Value) -> Result<T> {
    serde_json::from_value(object.clone())
        .map_err(|e| AppError::InvalidInput(format!("Invalid event object: {}", e)))
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

impl Subscription {
    fn period_end(&self) -> Option<DateTime<Utc>> {
        self.current_period_end
            .or_else(|| self.items.data.iter().filter_map(|i| i.current_period_end).max())
            .and_then(timestamp)
    }

    fn price_id(&self) -> Option<&str> {
        self.items
            .data
            .iter()
            .find_map(|i| i.price.as_ref())
            .map(|p| p.id.as_str())
    }
}

impl Invoice {
    fn period_end(&self) -> Option<DateTime<Utc>> {
        self.lines
            .data
            .iter()
            .filter_map(|l| l.period.as_ref().map(|p| p.end))
            .max()
            .and_then(timestamp)
    }
}

async fn user_for_customer(pool: &SqlitePool, customer: Option<&str>) -> Result<Option<User>> {
    match customer {
        Some(customer) => Ok(User::find_by_stripe_customer(pool, customer).await?),
        None => Ok(None),
    }
}

/// The account linked to `customer` by a completed checkout
///
/// Events can arrive before `checkout.session.completed`. Failing here
/// releases the webhook claim, so the provider's retry is applied once the
/// customer is linked.
async fn linked_user(pool: &SqlitePool, customer: Option<&str>) -> Result<User> {
    user_for_customer(pool, customer).await?.ok_or_else(|| {
        tracing::warn!("Billing event for unlinked customer {:?}", customer);
        AppError::NotFound("Billing customer")
    })
}

/// Apply one verified event; returns false for event types the server ignores
pub async fn apply_stripe_event(pool: &SqlitePool, event: &StripeEvent) -> Result<bool> {
    let object = &event.data.object;

    match event.kind.as_str() {
        "checkout.session.completed" => checkout_completed(pool, parse(object)?).await?,
        "customer.subscription.created" | "customer.subscription.updated" => {
            subscription_updated(pool, parse(object)?).await?
        }
        "customer.subscription.deleted" => subscription_deleted(pool, parse(object)?).await?,
        "invoice.payment_succeeded" | "invoice.paid" => invoice_paid(pool, parse(object)?).await?,
        "invoice.payment_failed" => invoice_failed(pool, parse(object)?).await?,
        other => {
            tracing::debug!("Ignoring billing event type {}", other);
            return Ok(false);
        }
    }

    Ok(true)
}

async fn checkout_completed(pool: &SqlitePool, session: CheckoutSession) -> Result<()> {
    let user_id = session
        .metadata
        .get("userId")
        .cloned()
        .or(session.client_reference_id)
        .ok_or_else(|| AppError::InvalidInput("Checkout session has no userId".to_string()))?;

    let plan_ref = session
        .metadata
        .get("planId")
        .ok_or_else(|| AppError::InvalidInput("Checkout session has no planId".to_string()))?;

    let plan = match Plan::find_by_slug(pool, plan_ref).await? {
        Some(plan) => plan,
        None => Plan::find_by_id(pool, plan_ref)
            .await?
            .ok_or(AppError::NotFound("Plan"))?,
    };

    User::set_plan(pool, &user_id, &plan.id, None)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    User::attach_subscription(
        pool,
        &user_id,
        session.customer.as_deref(),
        session.subscription.as_deref(),
        STATUS_ACTIVE,
    )
    .await?;

    tracing::info!("User {} subscribed to plan {}", user_id, plan.slug);
    Ok(())
}

async fn subscription_updated(pool: &SqlitePool, subscription: Subscription) -> Result<()> {
    let user = linked_user(pool, subscription.customer.as_deref()).await?;

    User::set_subscription_status(pool, &user.id, &subscription.status).await?;

    if ENDED_STATUSES.contains(&subscription.status.as_str()) {
        let default = Plan::default_plan(pool).await?;
        User::set_plan(pool, &user.id, &default.id, None).await?;
        tracing::info!(
            "Subscription for user {} ended ({}), moved to {}",
            user.id,
            subscription.status,
            default.slug
        );
        return Ok(());
    }

    let plan_id = match subscription.price_id() {
        Some(price) => Plan::find_by_stripe_price(pool, price)
            .await?
            .map(|p| p.id)
            .unwrap_or(user.plan_id),
        None => user.plan_id,
    };

    let expires_at = subscription.period_end().or(user.plan_expires_at);
    User::set_plan(pool, &user.id, &plan_id, expires_at).await?;

    tracing::info!(
        "Subscription for user {} is {} on plan {}",
        user.id,
        subscription.status,
        plan_id
    );
    Ok(())
}

async fn subscription_deleted(pool: &SqlitePool, subscription: Subscription) -> Result<()> {
    let Some(user) = user_for_customer(pool, subscription.customer.as_deref()).await? else {
        tracing::warn!("Subscription deletion for unknown customer");
        return Ok(());
    };

    let default = Plan::default_plan(pool).await?;
    User::set_plan(pool, &user.id, &default.id, None).await?;
    User::set_subscription_status(pool, &user.id, STATUS_CANCELED).await?;

    tracing::info!("Subscription for user {} canceled", user.id);
    Ok(())
}

async fn invoice_paid(pool: &SqlitePool, invoice: Invoice) -> Result<()> {
    let user = linked_user(pool, invoice.customer.as_deref()).await?;

    if let Some(period_end) = invoice.period_end() {
        User::set_plan(pool, &user.id, &user.plan_id, Some(period_end)).await?;
    }
    User::set_subscription_status(pool, &user.id, STATUS_ACTIVE).await?;

    credit_referrer(pool, &user, &invoice).await
}

/// Pay the referrer their share of an invoice
///
/// Without recurring commissions only the payer's first invoice earns one.
async fn credit_referrer(pool: &SqlitePool, payer: &User, invoice: &Invoice) -> Result<()> {
    let Some(referrer_id) = payer.referred_by.as_deref() else {
        return Ok(());
    };

    let settings = ReferralSettings::get(pool).await?;
    if !settings.enabled || invoice.amount_paid <= 0 {
        return Ok(());
    }

    if !settings.recurring && ReferralCommission::exists_for_referred(pool, &payer.id).await? {
        return Ok(());
    }

    let commission = commission_cents(invoice.amount_paid, settings.commission_percent);
    if commission <= 0 {
        return Ok(());
    }

    match ReferralCommission::credit(
        pool,
        referrer_id,
        &payer.id,
        &invoice.id,
        invoice.amount_paid,
        commission,
    )
    .await?
    {
        Some(credited) => tracing::info!(
            "Referrer {} credited {} cents for invoice {}",
            referrer_id,
            credited.commission_cents,
            invoice.id
        ),
        None => tracing::debug!("Invoice {} already credited", invoice.id),
    }

    Ok(())
}

async fn invoice_failed(pool: &SqlitePool, invoice: Invoice) -> Result<()> {
    let user = linked_user(pool, invoice.customer.as_deref()).await?;

    User::set_subscription_status(pool, &user.id, STATUS_PAST_DUE).await?;
    tracing::warn!("Payment failed for user {} (invoice {})", user.id, invoice.id);
    Ok(())
}
