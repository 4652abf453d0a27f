use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::auth::AuthUser;
use crate::constants::MAX_SCRAPED_POSTS_PER_REQUEST;
use crate::error::{AppError, Result};
use crate::integrations::{IntegrationError, VectorRecord};
use crate::models::scraped::ScrapedPostSummary;
use crate::models::{NewScrapedComment, NewScrapedPost, ScrapedComment, ScrapedPost};
use crate::routes::validation::{non_blank, Json, Pagination};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedCommentInput {
    pub author_name: Option<String>,
    #[validate(length(min = 1, max = 5000))]
    pub content: String,
    #[serde(default)]
    pub likes: i64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedPostInput {
    #[validate(url)]
    pub post_url: String,
    pub author_name: Option<String>,
    pub author_headline: Option<String>,
    #[validate(length(min = 1, max = 20000))]
    pub content: String,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(default)]
    #[validate(nested)]
    pub comments: Vec<ScrapedCommentInput>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StoreScrapedPostsRequest {
    #[validate(nested)]
    pub posts: Vec<ScrapedPostInput>,
}

impl From<ScrapedPostInput> for NewScrapedPost {
    fn from(input: ScrapedPostInput) -> Self {
        NewScrapedPost {
            post_url: input.post_url.trim().to_string(),
            author_name: non_blank(input.author_name),
            author_headline: non_blank(input.author_headline),
            content: input.content,
            likes: input.likes.max(0),
            comments_count: input.comments_count.max(0),
            comments: input
                .comments
                .into_iter()
                .map(|c| NewScrapedComment {
                    author_name: non_blank(c.author_name),
                    content: c.content,
                    likes: c.likes.max(0),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreScrapedPostsResponse {
    pub success: bool,
    pub stored_posts: usize,
    pub stored_comments: usize,
    pub indexed_comments: usize,
}

#[derive(Debug, Serialize)]
pub struct ScrapedPostListResponse {
    pub success: bool,
    pub posts: Vec<ScrapedPostSummary>,
}

/// Embed comments and add them to the caller's namespace in the vector index
async fn index_comments(
    state: &AppState,
    user_id: &str,
    comments: &[ScrapedComment],
) -> std::result::Result<usize, IntegrationError> {
    let mut records = Vec::with_capacity(comments.len());
    for comment in comments {
        let values = state.integrations.chat.embed(&comment.content).await?;
        records.push(VectorRecord {
            id: comment.id.clone(),
            values,
            metadata: json!({
                "text": comment.content,
                "postId": comment.post_id,
                "author": comment.author_name,
            }),
        });
    }

    let indexed = records.len();
    state.integrations.vectors.upsert(user_id, records).await?;
    Ok(indexed)
}

/// Store posts and their comments collected from the feed
///
/// POST /api/scraped-posts
///
/// Posts are upserted by URL. Indexing the comments for similar-comment
/// lookup is best effort and never fails the request.
pub async fn store_scraped_posts(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<StoreScrapedPostsRequest>,
) -> Result<Json<StoreScrapedPostsResponse>> {
    if payload.posts.is_empty() {
        return Err(AppError::InvalidInput("posts must not be empty".to_string()));
    }
    if payload.posts.len() > MAX_SCRAPED_POSTS_PER_REQUEST {
        return Err(AppError::InvalidInput(format!(
            "At most {} posts per request",
            MAX_SCRAPED_POSTS_PER_REQUEST
        )));
    }
    payload.validate()?;

    let posts = payload.posts.into_iter().map(NewScrapedPost::from).collect();
    let (stored_posts, comments) =
        ScrapedPost::upsert_batch(&state.db, &auth.user.id, posts).await?;

    let indexed_comments = if comments.is_empty() {
        0
    } else {
        match index_comments(&state, &auth.user.id, &comments).await {
            Ok(indexed) => indexed,
            Err(IntegrationError::NotConfigured(service)) => {
                tracing::debug!("Comment indexing skipped: {} not configured", service);
                0
            }
            Err(e) => {
                tracing::warn!("Comment indexing failed for user {}: {}", auth.user.id, e);
                0
            }
        }
    };

    tracing::info!(
        "Stored {} posts and {} comments for user {}",
        stored_posts,
        comments.len(),
        auth.user.id
    );

    Ok(Json(StoreScrapedPostsResponse {
        success: true,
        stored_posts,
        stored_comments: comments.len(),
        indexed_comments,
    }))
}

/// GET /api/scraped-posts?limit=&offset=
pub async fn list_scraped_posts(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(page): Query<Pagination>,
) -> Result<Json<ScrapedPostListResponse>> {
    let posts =
        ScrapedPost::list_for_user(&state.db, &auth.user.id, page.limit(), page.offset()).await?;

    Ok(Json(ScrapedPostListResponse {
        success: true,
        posts,
    }))
}
