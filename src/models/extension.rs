use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::cmp::Ordering;
use uuid::Uuid;

/// Published browser extension build
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionVersion {
    #[serde(skip_serializing)]
    pub id: String,
    pub version: String,
    pub download_url: String,
    pub release_notes: Option<String>,
    pub min_supported_version: Option<String>,
    pub is_latest: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewExtensionVersion {
    pub version: String,
    pub download_url: String,
    pub release_notes: Option<String>,
    pub min_supported_version: Option<String>,
    pub is_latest: bool,
}

/// Compare dotted numeric versions; missing or non-numeric parts count as 0
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.trim()
            .trim_start_matches('v')
            .split('.')
            .map(|part| {
                part.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };

    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let (x, y) = (a.get(i).copied().unwrap_or(0), b.get(i).copied().unwrap_or(0));
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Whether a version string looks like `1`, `1.2` or `1.2.3` (optional `v`)
pub fn is_valid_version(version: &str) -> bool {
    let version = version.trim().trim_start_matches('v');
    !version.is_empty()
        && version.split('.').count() <= 4
        && version
            .split('.')
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

impl ExtensionVersion {
    pub async fn latest(pool: &SqlitePool) -> Result<Option<ExtensionVersion>, sqlx::Error> {
        sqlx::query_as::<_, ExtensionVersion>(
            "SELECT * FROM extension_versions WHERE is_latest = 1 ORDER BY created_at DESC LIMIT 1",
        )
        .fetch_optional(pool)
        .await
    }

    /// Publish a version; marking it latest clears the flag everywhere else
    pub async fn publish(
        pool: &SqlitePool,
        new: NewExtensionVersion,
    ) -> Result<ExtensionVersion, sqlx::Error> {
        let mut tx = pool.begin().await?;

        if new.is_latest {
            sqlx::query("UPDATE extension_versions SET is_latest = 0")
                .execute(&mut *tx)
                .await?;
        }

        let version = sqlx::query_as::<_, ExtensionVersion>(
            r#"
            INSERT INTO extension_versions
                (id, version, download_url, release_notes, min_supported_version, is_latest, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(new.version)
        .bind(new.download_url)
        .bind(new.release_notes)
        .bind(new.min_supported_version)
        .bind(new.is_latest)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(version)
    }

    pub async fn exists(pool: &SqlitePool, version: &str) -> Result<bool, sqlx::Error> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM extension_versions WHERE version = ?")
                .bind(version)
                .fetch_one(pool)
                .await?;
        Ok(count > 0)
    }
}
