use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::AuthUser;
use crate::constants::MAX_STYLE_PROFILES_PER_USER;
use crate::error::{AppError, Result};
use crate::models::{CommentStyleProfile, StyleFields};
use crate::routes::validation::{non_blank, Json};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StyleProfileRequest {
    #[validate(length(min = 1, max = 80))]
    pub name: String,
    #[validate(length(max = 80))]
    pub tone: Option<String>,
    #[validate(length(max = 2000))]
    pub instructions: Option<String>,
    #[serde(default)]
    #[validate(length(max = 20))]
    pub example_comments: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl StyleProfileRequest {
    fn into_fields(self) -> Result<StyleFields> {
        self.validate()?;

        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::InvalidInput("name is required".to_string()));
        }

        Ok(StyleFields {
            name,
            tone: non_blank(self.tone),
            instructions: non_blank(self.instructions),
            example_comments: self
                .example_comments
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            is_default: self.is_default,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StyleProfileResponse {
    pub success: bool,
    pub profile: CommentStyleProfile,
}

#[derive(Debug, Serialize)]
pub struct StyleProfileListResponse {
    pub success: bool,
    pub profiles: Vec<CommentStyleProfile>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub success: bool,
}

/// GET /api/comment-styles
pub async fn list_comment_styles(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<StyleProfileListResponse>> {
    let profiles = CommentStyleProfile::list_for_user(&state.db, &auth.user.id).await?;
    Ok(Json(StyleProfileListResponse {
        success: true,
        profiles,
    }))
}

/// Create a style profile
///
/// POST /api/comment-styles
///
/// Marking it default clears the flag on the caller's other profiles.
pub async fn create_comment_style(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<StyleProfileRequest>,
) -> Result<(StatusCode, Json<StyleProfileResponse>)> {
    let fields = payload.into_fields()?;

    let existing = CommentStyleProfile::count_for_user(&state.db, &auth.user.id).await?;
    if existing >= MAX_STYLE_PROFILES_PER_USER {
        return Err(AppError::InvalidInput(format!(
            "At most {} style profiles are allowed",
            MAX_STYLE_PROFILES_PER_USER
        )));
    }

    let profile = CommentStyleProfile::create(&state.db, &auth.user.id, fields).await?;
    tracing::info!("Style profile {} created for user {}", profile.id, auth.user.id);

    Ok((
        StatusCode::CREATED,
        Json(StyleProfileResponse {
            success: true,
            profile,
        }),
    ))
}

/// PUT /api/comment-styles/{id}
pub async fn update_comment_style(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<StyleProfileRequest>,
) -> Result<Json<StyleProfileResponse>> {
    let fields = payload.into_fields()?;

    // Checked first so a bad id never clears the caller's default
    if CommentStyleProfile::find_owned(&state.db, &auth.user.id, &id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound("Style profile"));
    }

    let profile = CommentStyleProfile::update(&state.db, &auth.user.id, &id, fields)
        .await?
        .ok_or(AppError::NotFound("Style profile"))?;

    Ok(Json(StyleProfileResponse {
        success: true,
        profile,
    }))
}

/// DELETE /api/comment-styles/{id}
pub async fn delete_comment_style(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>> {
    if !CommentStyleProfile::delete(&state.db, &auth.user.id, &id).await? {
        return Err(AppError::NotFound("Style profile"));
    }

    Ok(Json(DeletedResponse { success: true }))
}
