use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{AppError, Result};
use crate::models::extension::{compare_versions, is_valid_version};
use crate::models::ExtensionVersion;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    /// Version installed in the caller's browser
    pub current: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub success: bool,
    pub latest: Option<ExtensionVersion>,
    pub update_available: bool,
    pub update_required: bool,
}

/// Whether `current` is older than the latest release, and whether it is
/// older than the oldest release the API still supports
pub fn update_flags(current: &str, latest: &ExtensionVersion) -> (bool, bool) {
    let available = compare_versions(current, &latest.version) == Ordering::Less;
    let required = latest
        .min_supported_version
        .as_deref()
        .map(|min| compare_versions(current, min) == Ordering::Less)
        .unwrap_or(false);
    (available, required)
}

/// Extension update check
///
/// GET /api/extension/version?current=1.2.3
pub async fn extension_version(
    State(state): State<AppState>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<VersionResponse>> {
    let latest = ExtensionVersion::latest(&state.db).await?;

    let (update_available, update_required) = match (&query.current, &latest) {
        (Some(current), Some(latest)) => {
            if !is_valid_version(current) {
                return Err(AppError::InvalidInput(format!(
                    "Invalid version: {}",
                    current
                )));
            }
            update_flags(current, latest)
        }
        _ => (false, false),
    };

    Ok(Json(VersionResponse {
        success: true,
        latest,
        update_available,
        update_required,
    }))
}
