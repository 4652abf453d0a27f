//! Email templating, sequence enrollment and queue delivery.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::integrations::{Mailer, OutgoingEmail};
use crate::models::email::step_send_at;
use crate::models::{EmailQueueEntry, EmailSequence, User};

/// Replace `{{key}}` placeholders; unknown placeholders are left as written
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match vars.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Template variables describing a user
pub fn user_vars(user: &User) -> Vec<(&'static str, String)> {
    let name = user
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "there".to_string());

    vec![
        ("name", name),
        ("email", user.email.clone()),
        ("referral_code", user.referral_code.clone()),
    ]
}

fn as_refs<'a>(vars: &'a [(&'static str, String)]) -> Vec<(&'a str, &'a str)> {
    vars.iter().map(|(k, v)| (*k, v.as_str())).collect()
}

/// Queue every step of sequence `slug` for `user`, starting at `start`
///
/// Returns the number of queued emails; an unknown or inactive sequence
/// queues nothing.
pub async fn enroll(
    pool: &SqlitePool,
    user: &User,
    slug: &str,
    start: DateTime<Utc>,
) -> Result<usize, sqlx::Error> {
    let sequence = match EmailSequence::find_by_slug(pool, slug).await? {
        Some(sequence) if sequence.is_active => sequence,
        _ => {
            tracing::debug!("Email sequence {} missing or inactive", slug);
            return Ok(0);
        }
    };

    let vars = user_vars(user);
    let vars = as_refs(&vars);
    let steps = sequence.steps(pool).await?;

    for step in &steps {
        EmailQueueEntry::enqueue(
            pool,
            Some(&user.id),
            &user.email,
            &render_template(&step.subject, &vars),
            &render_template(&step.body, &vars),
            step_send_at(start, step),
        )
        .await?;
    }

    tracing::info!(
        "Enrolled user {} in sequence {} ({} emails)",
        user.id,
        slug,
        steps.len()
    );

    Ok(steps.len())
}

/// Attempt delivery of one queued email and record the outcome
///
/// Returns true when the provider accepted it.
pub async fn deliver(
    pool: &SqlitePool,
    mailer: &dyn Mailer,
    entry: &EmailQueueEntry,
    max_attempts: i64,
) -> Result<bool, sqlx::Error> {
    let email = OutgoingEmail {
        to: entry.to_email.clone(),
        subject: entry.subject.clone(),
        text: entry.body.clone(),
    };

    match mailer.send(&email).await {
        Ok(message_id) => {
            EmailQueueEntry::mark_sent(pool, &entry.id, &message_id).await?;
            tracing::info!("Email {} sent ({})", entry.id, message_id);
            Ok(true)
        }
        Err(e) => {
            let status =
                EmailQueueEntry::record_failure(pool, &entry.id, &e.to_string(), max_attempts)
                    .await?;
            tracing::warn!("Email {} not sent ({}): {}", entry.id, status, e);
            Ok(false)
        }
    }
}

/// Outcome of one queue run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueReport {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Deliver up to `batch_size` due emails
pub async fn process_queue(
    pool: &SqlitePool,
    mailer: &dyn Mailer,
    now: DateTime<Utc>,
    batch_size: i64,
    max_attempts: i64,
) -> Result<QueueReport, sqlx::Error> {
    let due = EmailQueueEntry::due(pool, now, batch_size).await?;
    let mut report = QueueReport::default();

    for entry in &due {
        report.processed += 1;
        if deliver(pool, mailer, entry, max_attempts).await? {
            report.sent += 1;
        } else {
            report.failed += 1;
        }
    }

    if report.processed > 0 {
        tracing::info!(
            "Email queue run: {} processed, {} sent, {} failed",
            report.processed,
            report.sent,
            report.failed
        );
    }

    Ok(report)
}
