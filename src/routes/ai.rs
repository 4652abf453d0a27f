use axum::extract::State;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::auth::AuthUser;
use crate::constants::{
    DEFAULT_COMMENT_WORDS, DEFAULT_POST_WORDS, MAX_PROMPT_POST_CHARS, SIMILAR_COMMENTS_TOP_K,
};
use crate::error::{AppError, Result};
use crate::integrations::{ChatMessage, ChatRequest, IntegrationError};
use crate::models::usage::usage_day;
use crate::models::user::effective_plan;
use crate::models::{Activity, ApiUsage, CommentStyleProfile, UsageAction, UsageQuota};
use crate::routes::validation::{non_blank, Json};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCommentRequest {
    pub post_text: String,
    pub author_name: Option<String>,
    pub post_url: Option<String>,
    pub style_profile_id: Option<String>,
    pub tone: Option<String>,
    #[validate(range(min = 5, max = 300))]
    pub max_words: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePostRequest {
    #[validate(length(min = 1, max = 2000))]
    pub topic: String,
    pub tone: Option<String>,
    #[validate(range(min = 20, max = 1000))]
    pub max_words: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct GeneratedResponse {
    pub success: bool,
    pub content: String,
    pub usage: UsageQuota,
}

/// Cut text to at most `max` characters on a char boundary
fn clip(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Strip whitespace and the quotes models like to wrap replies in
fn clean_reply(reply: &str) -> String {
    reply.trim().trim_matches('"').trim().to_string()
}

/// Token budget for a reply of `words` words
fn max_tokens_for(words: u32) -> u32 {
    words * 2 + 64
}

/// Chat messages for a reply to a feed post
pub fn comment_prompt(
    post_text: &str,
    author_name: Option<&str>,
    profile: Option<&CommentStyleProfile>,
    tone: Option<&str>,
    max_words: u32,
    similar: &[String],
) -> Vec<ChatMessage> {
    let mut system = format!(
        "You write LinkedIn comments. Reply in at most {} words. \
         Be specific to the post, add a concrete thought, avoid hashtags and emojis \
         unless the post uses them, and never start with \"Great post\".",
        max_words
    );

    let tone = tone.or_else(|| profile.and_then(|p| p.tone.as_deref()));
    if let Some(tone) = tone {
        system.push_str(&format!("\nTone: {}.", tone));
    }

    if let Some(profile) = profile {
        if let Some(instructions) = &profile.instructions {
            system.push_str(&format!("\nStyle instructions: {}", instructions));
        }
        if !profile.example_comments.is_empty() {
            system.push_str("\nComments written in this voice:");
            for example in &profile.example_comments {
                system.push_str(&format!("\n- {}", example));
            }
        }
    }

    if !similar.is_empty() {
        system.push_str("\nComments that did well on similar posts:");
        for comment in similar {
            system.push_str(&format!("\n- {}", comment));
        }
    }

    let user = match author_name {
        Some(author) => format!("Post by {}:\n{}", author, post_text),
        None => format!("Post:\n{}", post_text),
    };

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Chat messages for an original post on `topic`
pub fn post_prompt(topic: &str, tone: Option<&str>, max_words: u32) -> Vec<ChatMessage> {
    let mut system = format!(
        "You write LinkedIn posts. Write at most {} words with a strong first line, \
         short paragraphs and a question at the end to invite comments.",
        max_words
    );
    if let Some(tone) = tone {
        system.push_str(&format!("\nTone: {}.", tone));
    }

    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("Topic: {}", topic)),
    ]
}

/// Stored comments semantically close to `text`, or nothing if the lookup fails
async fn similar_comments(state: &AppState, user_id: &str, text: &str) -> Vec<String> {
    let lookup = async {
        let vector = state.integrations.chat.embed(text).await?;
        state
            .integrations
            .vectors
            .query(user_id, vector, SIMILAR_COMMENTS_TOP_K)
            .await
    };

    match lookup.await {
        Ok(matches) => matches
            .iter()
            .filter_map(|m| m.text())
            .map(str::to_string)
            .collect(),
        Err(IntegrationError::NotConfigured(service)) => {
            tracing::debug!("Similar comment lookup skipped: {} not configured", service);
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Similar comment lookup failed: {}", e);
            Vec::new()
        }
    }
}

/// Run the chat model for a request whose quota unit is already consumed
///
/// A failed completion gives the unit back.
async fn complete_or_refund(
    state: &AppState,
    user_id: &str,
    action: UsageAction,
    day: &str,
    request: ChatRequest,
) -> Result<String> {
    match state.integrations.chat.complete(request).await {
        Ok(reply) => Ok(reply),
        Err(e) => {
            ApiUsage::refund(&state.db, user_id, action, day).await?;
            tracing::warn!("{} generation failed for user {}: {}", action.as_str(), user_id, e);
            Err(e.into())
        }
    }
}

/// Draft a comment for a feed post
///
/// POST /api/ai/generate-comment
///
/// Counts against the daily `ai_comment` limit. A style profile id that is
/// not the caller's returns 404; without one the caller's default profile
/// is used.
pub async fn generate_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<GenerateCommentRequest>,
) -> Result<Json<GeneratedResponse>> {
    payload.validate()?;

    let post_text = payload.post_text.trim();
    if post_text.is_empty() {
        return Err(AppError::InvalidInput("postText is required".to_string()));
    }
    let post_text = clip(post_text, MAX_PROMPT_POST_CHARS);

    let user_id = &auth.user.id;
    let profile = match non_blank(payload.style_profile_id) {
        Some(id) => Some(
            CommentStyleProfile::find_owned(&state.db, user_id, &id)
                .await?
                .ok_or(AppError::NotFound("Style profile"))?,
        ),
        None => CommentStyleProfile::find_default(&state.db, user_id).await?,
    };

    let day = usage_day(Utc::now());
    let plan = effective_plan(&state.db, &auth.user).await?;
    let usage =
        ApiUsage::try_consume(&state.db, user_id, &plan, UsageAction::AiComment, &day).await?;

    let similar = similar_comments(&state, user_id, post_text).await;
    let max_words = payload.max_words.unwrap_or(DEFAULT_COMMENT_WORDS);
    let tone = non_blank(payload.tone);

    let messages = comment_prompt(
        post_text,
        payload.author_name.as_deref(),
        profile.as_ref(),
        tone.as_deref(),
        max_words,
        &similar,
    );

    let reply = complete_or_refund(
        &state,
        user_id,
        UsageAction::AiComment,
        &day,
        ChatRequest {
            messages,
            max_tokens: max_tokens_for(max_words),
            temperature: 0.8,
        },
    )
    .await?;
    let content = clean_reply(&reply);

    Activity::record(
        &state.db,
        user_id,
        UsageAction::AiComment.as_str(),
        payload.post_url.as_deref(),
        Some(&json!({
            "styleProfileId": profile.as_ref().map(|p| p.id.as_str()),
            "similarComments": similar.len(),
        })),
    )
    .await?;

    tracing::info!("Generated comment for user {}", user_id);

    Ok(Json(GeneratedResponse {
        success: true,
        content,
        usage,
    }))
}

/// Draft an original post
///
/// POST /api/ai/generate-post
pub async fn generate_post(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<GeneratePostRequest>,
) -> Result<Json<GeneratedResponse>> {
    payload.validate()?;

    let topic = payload.topic.trim();
    if topic.is_empty() {
        return Err(AppError::InvalidInput("topic is required".to_string()));
    }

    let day = usage_day(Utc::now());
    let plan = effective_plan(&state.db, &auth.user).await?;
    let usage =
        ApiUsage::try_consume(&state.db, &auth.user.id, &plan, UsageAction::AiPost, &day).await?;

    let max_words = payload.max_words.unwrap_or(DEFAULT_POST_WORDS);
    let tone = non_blank(payload.tone);

    let reply = complete_or_refund(
        &state,
        &auth.user.id,
        UsageAction::AiPost,
        &day,
        ChatRequest {
            messages: post_prompt(topic, tone.as_deref(), max_words),
            max_tokens: max_tokens_for(max_words),
            temperature: 0.9,
        },
    )
    .await?;
    let content = clean_reply(&reply);

    Activity::record(
        &state.db,
        &auth.user.id,
        UsageAction::AiPost.as_str(),
        None,
        Some(&json!({ "topic": clip(topic, 200) })),
    )
    .await?;

    Ok(Json(GeneratedResponse {
        success: true,
        content,
        usage,
    }))
}
