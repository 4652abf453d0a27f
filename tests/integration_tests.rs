//! Integration tests for the Kommentify Server API
//!
//! These tests drive the complete router against an in-memory database with
//! fake chat, vector and email clients.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sha2::Sha256;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use kommentify_server::db::create_memory_pool;
use kommentify_server::integrations::{
    ChatModel, ChatRequest, IntegrationError, Mailer, OutgoingEmail, VectorIndex, VectorMatch,
    VectorRecord,
};
use kommentify_server::{build_router, migrate, AppState, Config, Integrations};

// Test configuration constants
const JWT_SECRET: &str = "test-jwt-secret";
const ADMIN_KEY: &str = "test-admin-key";
const CRON_SECRET: &str = "test-cron-secret";
const STRIPE_SECRET: &str = "whsec_stripe_test";
const SVIX_KEY: &[u8] = b"svix-signing-key-for-tests";
const PASSWORD: &str = "correct horse battery";

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct FakeChat {
    requests: Mutex<Vec<ChatRequest>>,
    failing: Mutex<bool>,
}

#[async_trait]
impl ChatModel for FakeChat {
    async fn complete(&self, request: ChatRequest) -> Result<String, IntegrationError> {
        if *self.failing.lock().unwrap() {
            return Err(IntegrationError::Api {
                service: "Chat model",
                status: 503,
                message: "overloaded".to_string(),
            });
        }
        self.requests.lock().unwrap().push(request);
        Ok("  \"Shipping weekly changed how our team learns.\"  ".to_string())
    }

    async fn embed(&self, input: &str) -> Result<Vec<f32>, IntegrationError> {
        Ok(vec![input.len() as f32, 1.0, 0.5])
    }
}

#[derive(Default)]
struct FakeVectors {
    upserts: Mutex<Vec<(String, Vec<VectorRecord>)>>,
}

#[async_trait]
impl VectorIndex for FakeVectors {
    async fn upsert(
        &self,
        namespace: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), IntegrationError> {
        self.upserts
            .lock()
            .unwrap()
            .push((namespace.to_string(), records));
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        _vector: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, IntegrationError> {
        let upserts = self.upserts.lock().unwrap();
        Ok(upserts
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .flat_map(|(_, records)| records.iter())
            .take(top_k)
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: 0.9,
                metadata: Some(r.metadata.clone()),
            })
            .collect())
    }
}

#[derive(Default)]
struct FakeMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl FakeMailer {
    fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, IntegrationError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        Ok(format!("msg_{}", sent.len()))
    }
}

// =============================================================================
// Test Helpers
// =============================================================================

/// Create a test configuration
fn test_config() -> Config {
    Config {
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        database_url: "sqlite::memory:".to_string(),
        allowed_origins: vec!["http://localhost:3000".to_string()],
        environment: "test".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        jwt_ttl_secs: 3600,
        admin_secret_key: Some(ADMIN_KEY.to_string()),
        cron_secret: Some(CRON_SECRET.to_string()),
        stripe_webhook_secret: Some(STRIPE_SECRET.to_string()),
        clerk_webhook_secret: Some(format!("whsec_{}", BASE64.encode(SVIX_KEY))),
        openai_api_key: None,
        openai_base_url: "http://localhost".to_string(),
        openai_model: "test-model".to_string(),
        openai_embedding_model: "test-embedding".to_string(),
        pinecone_api_key: None,
        pinecone_index_host: None,
        resend_api_key: None,
        email_from: "Kommentify <test@example.com>".to_string(),
        otp_ttl_secs: 600,
        otp_max_attempts: 3,
        otp_requests_per_hour: 2,
        email_batch_size: 10,
        email_max_attempts: 3,
    }
}

struct TestApp {
    router: Router,
    db: SqlitePool,
    chat: Arc<FakeChat>,
    vectors: Arc<FakeVectors>,
    mailer: Arc<FakeMailer>,
}

impl TestApp {
    async fn new() -> Self {
        let db = create_memory_pool().await.unwrap();
        migrate(&db).await.unwrap();

        let chat = Arc::new(FakeChat::default());
        let vectors = Arc::new(FakeVectors::default());
        let mailer = Arc::new(FakeMailer::default());

        let integrations = Integrations {
            chat: chat.clone(),
            vectors: vectors.clone(),
            mailer: mailer.clone(),
        };

        let router = build_router(AppState::new(db.clone(), test_config(), integrations));

        Self {
            router,
            db,
            chat,
            vectors,
            mailer,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, body_to_json(response.into_body()).await)
    }

    /// Register an account and return (token, user id)
    async fn register(&self, email: &str) -> (String, String) {
        self.register_with(json!({ "email": email, "password": PASSWORD }))
            .await
    }

    async fn register_with(&self, body: Value) -> (String, String) {
        let (status, body) = self
            .send(make_post_request("/api/auth/register", body.to_string(), None))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    async fn referral_code(&self, token: &str) -> String {
        let (_, body) = self.send(make_get_request("/api/referrals", Some(token))).await;
        body["referralCode"].as_str().unwrap().to_string()
    }

    async fn plan_slug(&self, token: &str) -> String {
        let (status, body) = self.send(make_get_request("/api/auth/me", Some(token))).await;
        assert_eq!(status, StatusCode::OK);
        body["plan"]["slug"].as_str().unwrap().to_string()
    }
}

/// Parse response body as JSON
async fn body_to_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}

fn with_auth(
    builder: axum::http::request::Builder,
    token: Option<&str>,
) -> axum::http::request::Builder {
    match token {
        Some(token) => builder.header("authorization", format!("Bearer {}", token)),
        None => builder,
    }
}

/// Create a POST request with JSON body
fn make_post_request(uri: &str, body: String, token: Option<&str>) -> Request<Body> {
    with_auth(Request::builder().method("POST").uri(uri), token)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// Create a PUT request with JSON body
fn make_put_request(uri: &str, body: String, token: Option<&str>) -> Request<Body> {
    with_auth(Request::builder().method("PUT").uri(uri), token)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// Create a GET request
fn make_get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    with_auth(Request::builder().uri(uri), token)
        .body(Body::empty())
        .unwrap()
}

/// Create a DELETE request with JSON body
fn make_delete_request(uri: &str, body: String, token: Option<&str>) -> Request<Body> {
    with_auth(Request::builder().method("DELETE").uri(uri), token)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn make_admin_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-admin-key", ADMIN_KEY)
        .header("content-type", "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Sign a billing webhook the way the payment processor does
fn stripe_request(event: &Value) -> Request<Body> {
    let payload = event.to_string();
    let timestamp = chrono::Utc::now().timestamp();

    let mut mac = HmacSha256::new_from_slice(STRIPE_SECRET.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header("content-type", "application/json")
        .header("stripe-signature", format!("t={},v1={}", timestamp, signature))
        .body(Body::from(payload))
        .unwrap()
}

/// Sign an auth provider webhook the way svix does
fn clerk_request(msg_id: &str, event: &Value) -> Request<Body> {
    let payload = event.to_string();
    let timestamp = chrono::Utc::now().timestamp().to_string();

    let mut mac = HmacSha256::new_from_slice(SVIX_KEY).unwrap();
    mac.update(format!("{}.{}.{}", msg_id, timestamp, payload).as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/webhooks/clerk")
        .header("content-type", "application/json")
        .header("svix-id", msg_id)
        .header("svix-timestamp", timestamp)
        .header("svix-signature", format!("v1,{}", signature))
        .body(Body::from(payload))
        .unwrap()
}

fn checkout_event(event_id: &str, user_id: &str, plan: &str) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_test_1",
            "customer": "cus_test_1",
            "subscription": "sub_test_1",
            "metadata": { "userId": user_id, "planId": plan }
        }}
    })
}

fn invoice_event(event_id: &str, invoice_id: &str, amount: i64) -> Value {
    json!({
        "id": event_id,
        "type": "invoice.paid",
        "data": { "object": {
            "id": invoice_id,
            "customer": "cus_test_1",
            "amount_paid": amount,
            "lines": { "data": [
                { "period": { "start": 1_700_000_000i64, "end": 4_102_444_800i64 } }
            ]}
        }}
    })
}

fn subscription_event(event_id: &str, status: &str, period_end: Option<i64>) -> Value {
    json!({
        "id": event_id,
        "type": "customer.subscription.updated",
        "data": { "object": {
            "id": "sub_test_1",
            "customer": "cus_test_1",
            "status": status,
            "current_period_end": period_end
        }}
    })
}

fn scraped_post(url: &str, comments: Value) -> Value {
    json!({
        "postUrl": url,
        "authorName": "Grace",
        "content": "We moved to weekly releases.",
        "comments": comments
    })
}

/// Pull the six-digit code out of the sign-in email
fn otp_from_email(email: &OutgoingEmail) -> String {
    email
        .text
        .split("code is ")
        .nth(1)
        .map(|rest| rest.chars().take(6).collect())
        .unwrap()
}

// =============================================================================
// Health Check & Public Tests
// =============================================================================

#[tokio::test]
async fn test_health_check_returns_healthy() {
    let app = TestApp::new().await;

    let (status, body) = app.send(make_get_request("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");
    assert!(body["version"].as_str().is_some());
}

#[tokio::test]
async fn test_list_plans() {
    let app = TestApp::new().await;

    let (status, body) = app.send(make_get_request("/api/plans", None)).await;

    assert_eq!(status, StatusCode::OK);
    let slugs: Vec<&str> = body["plans"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["slug"].as_str().unwrap())
        .collect();
    assert_eq!(slugs, vec!["free", "starter", "pro", "unlimited"]);
    assert!(body["plans"][0].get("stripePriceId").is_none());
}

// =============================================================================
// Registration & Login Tests
// =============================================================================

#[tokio::test]
async fn test_register_user_success() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send(make_post_request(
            "/api/auth/register",
            json!({ "email": "Ada@Example.com", "password": PASSWORD, "name": "Ada" }).to_string(),
            None,
        ))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["email"], "ada@example.com");
    assert_eq!(body["user"]["planId"], "plan_free");
    assert_eq!(body["user"]["referralCode"].as_str().unwrap().len(), 8);
    assert!(body["user"].get("passwordHash").is_none());
    assert!(body["token"].as_str().is_some());

    // Welcome sequence queued, not yet sent
    let queued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM email_queue WHERE to_email = ?")
        .bind("ada@example.com")
        .fetch_one(&app.db)
        .await
        .unwrap();
    assert_eq!(queued, 3);
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_register_duplicate_user_returns_conflict() {
    let app = TestApp::new().await;
    app.register("dup@example.com").await;

    let (status, body) = app
        .send(make_post_request(
            "/api/auth/register",
            json!({ "email": "DUP@example.com", "password": PASSWORD }).to_string(),
            None,
        ))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_register_rejects_short_password_and_bad_email() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send(make_post_request(
            "/api/auth/register",
            json!({ "email": "a@example.com", "password": "short" }).to_string(),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = app
        .send(make_post_request(
            "/api/auth/register",
            json!({ "email": "not-an-email", "password": PASSWORD }).to_string(),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "A valid email address is required");
}

#[tokio::test]
async fn test_register_unknown_referral_code() {
    let app = TestApp::new().await;

    let (status, _) = app
        .send(make_post_request(
            "/api/auth/register",
            json!({ "email": "r@example.com", "password": PASSWORD, "referralCode": "NOPE0000" })
                .to_string(),
            None,
        ))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_and_me() {
    let app = TestApp::new().await;
    app.register("login@example.com").await;

    let (status, body) = app
        .send(make_post_request(
            "/api/auth/login",
            json!({ "email": "login@example.com", "password": PASSWORD }).to_string(),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = app.send(make_get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "login@example.com");
    assert_eq!(body["plan"]["slug"], "free");
    assert_eq!(body["usage"]["comment"]["limit"], 5);
    assert_eq!(body["usage"]["comment"]["remaining"], 5);
}

#[tokio::test]
async fn test_login_wrong_password_returns_unauthorized() {
    let app = TestApp::new().await;
    app.register("wrong@example.com").await;

    let (status, body) = app
        .send(make_post_request(
            "/api/auth/login",
            json!({ "email": "wrong@example.com", "password": "not the password" }).to_string(),
            None,
        ))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid email or password");
}

#[tokio::test]
async fn test_me_requires_valid_token() {
    let app = TestApp::new().await;

    let (status, _) = app.send(make_get_request("/api/auth/me", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(make_get_request("/api/auth/me", Some("not.a.jwt")))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_delete_account_requires_password() {
    let app = TestApp::new().await;
    let (token, _) = app.register("leaving@example.com").await;

    let (status, _) = app
        .send(make_delete_request(
            "/api/auth/me",
            json!({ "password": "wrong password" }).to_string(),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(make_delete_request(
            "/api/auth/me",
            json!({ "password": PASSWORD }).to_string(),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    // Token no longer maps to a user
    let (status, _) = app.send(make_get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// OTP Tests
// =============================================================================

#[tokio::test]
async fn test_otp_sign_in_creates_verified_account() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send(make_post_request(
            "/api/auth/otp/request",
            json!({ "email": "otp@example.com" }).to_string(),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "otp@example.com");
    let code = otp_from_email(&sent[0]);
    assert_eq!(code.len(), 6);

    let wrong = if code == "000000" { "111111" } else { "000000" };
    let (status, body) = app
        .send(make_post_request(
            "/api/auth/otp/verify",
            json!({ "email": "otp@example.com", "code": wrong }).to_string(),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid or expired code");

    let (status, body) = app
        .send(make_post_request(
            "/api/auth/otp/verify",
            json!({ "email": "OTP@example.com", "code": code }).to_string(),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "otp@example.com");
    assert_eq!(body["user"]["emailVerified"], true);

    // A consumed code cannot be replayed
    let (status, _) = app
        .send(make_post_request(
            "/api/auth/otp/verify",
            json!({ "email": "otp@example.com", "code": code }).to_string(),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_otp_locked_after_max_attempts() {
    let app = TestApp::new().await;

    app.send(make_post_request(
        "/api/auth/otp/request",
        json!({ "email": "locked@example.com" }).to_string(),
        None,
    ))
    .await;
    let code = otp_from_email(&app.mailer.sent()[0]);
    let wrong = if code == "000000" { "111111" } else { "000000" };

    for _ in 0..3 {
        let (status, _) = app
            .send(make_post_request(
                "/api/auth/otp/verify",
                json!({ "email": "locked@example.com", "code": wrong }).to_string(),
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _) = app
        .send(make_post_request(
            "/api/auth/otp/verify",
            json!({ "email": "locked@example.com", "code": code }).to_string(),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_otp_request_rate_limited() {
    let app = TestApp::new().await;
    let body = json!({ "email": "busy@example.com" }).to_string();

    for _ in 0..2 {
        let (status, _) = app
            .send(make_post_request("/api/auth/otp/request", body.clone(), None))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app
        .send(make_post_request("/api/auth/otp/request", body, None))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["success"], false);
}

// =============================================================================
// Usage & Activity Tests
// =============================================================================

#[tokio::test]
async fn test_usage_limit_enforced() {
    let app = TestApp::new().await;
    let (token, _) = app.register("busy@example.com").await;
    let track = json!({ "action": "comment" }).to_string();

    for expected in 1..=5 {
        let (status, body) = app
            .send(make_post_request("/api/usage/track", track.clone(), Some(&token)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["used"], expected);
        assert_eq!(body["remaining"], 5 - expected);
    }

    let (status, body) = app
        .send(make_post_request("/api/usage/track", track, Some(&token)))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["limitReached"], true);
    assert_eq!(body["action"], "comment");
    assert_eq!(body["limit"], 5);

    // Other actions have their own counters
    let (status, _) = app
        .send(make_post_request(
            "/api/usage/track",
            json!({ "action": "like" }).to_string(),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.send(make_get_request("/api/usage", Some(&token))).await;
    let comment = body["usage"]
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["action"] == "comment")
        .unwrap()
        .clone();
    assert_eq!(comment["used"], 5);
    assert_eq!(comment["remaining"], 0);
}

#[tokio::test]
async fn test_track_unknown_action_rejected() {
    let app = TestApp::new().await;
    let (token, _) = app.register("typo@example.com").await;

    let (status, body) = app
        .send(make_post_request(
            "/api/usage/track",
            json!({ "action": "poke" }).to_string(),
            Some(&token),
        ))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("action"));

    // Malformed JSON uses the same envelope
    let (status, body) = app
        .send(make_post_request(
            "/api/usage/track",
            "{\"action\":".to_string(),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_activity_record_and_filter() {
    let app = TestApp::new().await;
    let (token, _) = app.register("active@example.com").await;

    for kind in ["like", "comment", "like"] {
        let (status, _) = app
            .send(make_post_request(
                "/api/activity",
                json!({
                    "kind": kind,
                    "targetUrl": "https://www.linkedin.com/feed/update/urn:li:activity:1",
                    "detail": { "source": "feed" }
                })
                .to_string(),
                Some(&token),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = app
        .send(make_get_request("/api/activity?kind=like", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    let activities = body["activities"].as_array().unwrap();
    assert_eq!(activities.len(), 2);
    assert_eq!(activities[0]["detail"]["source"], "feed");

    let (_, body) = app
        .send(make_get_request("/api/activity?limit=1", Some(&token)))
        .await;
    assert_eq!(body["activities"].as_array().unwrap().len(), 1);
}

// =============================================================================
// Comment Style & AI Tests
// =============================================================================

#[tokio::test]
async fn test_comment_style_default_is_exclusive() {
    let app = TestApp::new().await;
    let (token, _) = app.register("style@example.com").await;

    for name in ["Founder", "Analyst"] {
        let (status, _) = app
            .send(make_post_request(
                "/api/comment-styles",
                json!({ "name": name, "tone": "warm", "isDefault": true }).to_string(),
                Some(&token),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, body) = app
        .send(make_get_request("/api/comment-styles", Some(&token)))
        .await;
    let profiles = body["profiles"].as_array().unwrap();
    assert_eq!(profiles.len(), 2);
    let defaults: Vec<&str> = profiles
        .iter()
        .filter(|p| p["isDefault"] == true)
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(defaults, vec!["Analyst"]);
}

#[tokio::test]
async fn test_comment_style_limit_and_ownership() {
    let app = TestApp::new().await;
    let (token, _) = app.register("many@example.com").await;
    let (other_token, _) = app.register("other@example.com").await;

    let mut last_id = String::new();
    for i in 0..10 {
        let (status, body) = app
            .send(make_post_request(
                "/api/comment-styles",
                json!({ "name": format!("Style {}", i) }).to_string(),
                Some(&token),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        last_id = body["profile"]["id"].as_str().unwrap().to_string();
    }

    let (status, _) = app
        .send(make_post_request(
            "/api/comment-styles",
            json!({ "name": "One too many" }).to_string(),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/api/comment-styles/{}", last_id);
    let (status, _) = app
        .send(make_put_request(
            &uri,
            json!({ "name": "Hijacked" }).to_string(),
            Some(&other_token),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(make_delete_request(&uri, String::new(), Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_generate_comment_uses_profile_and_similar_comments() {
    let app = TestApp::new().await;
    let (token, user_id) = app.register("writer@example.com").await;

    let (status, body) = app
        .send(make_post_request(
            "/api/scraped-posts",
            json!({ "posts": [{
                "postUrl": "https://www.linkedin.com/posts/grace-1",
                "authorName": "Grace",
                "content": "We moved to weekly releases.",
                "likes": 120,
                "commentsCount": 2,
                "comments": [
                    { "authorName": "Alan", "content": "Weekly cadence keeps feedback loops short.", "likes": 9 },
                    { "content": "How did QA adapt?" }
                ]
            }]})
            .to_string(),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storedPosts"], 1);
    assert_eq!(body["storedComments"], 2);
    assert_eq!(body["indexedComments"], 2);
    assert_eq!(app.vectors.upserts.lock().unwrap()[0].0, user_id);

    let (_, body) = app
        .send(make_post_request(
            "/api/comment-styles",
            json!({
                "name": "Founder",
                "instructions": "Share a lesson learned",
                "exampleComments": ["We learned this the hard way."],
                "isDefault": true
            })
            .to_string(),
            Some(&token),
        ))
        .await;
    assert_eq!(body["profile"]["exampleComments"][0], "We learned this the hard way.");

    let (status, body) = app
        .send(make_post_request(
            "/api/ai/generate-comment",
            json!({ "postText": "Shipping weekly beat our quarterly plan.", "authorName": "Grace" })
                .to_string(),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["content"], "Shipping weekly changed how our team learns.");
    assert_eq!(body["usage"]["used"], 1);

    let requests = app.chat.requests.lock().unwrap();
    let system = &requests[0].messages[0].content;
    assert!(system.contains("Share a lesson learned"));
    assert!(system.contains("We learned this the hard way."));
    assert!(system.contains("Weekly cadence keeps feedback loops short."));
    drop(requests);

    let (_, body) = app
        .send(make_get_request("/api/activity?kind=ai_comment", Some(&token)))
        .await;
    assert_eq!(body["activities"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_scraped_posts_batch_limit() {
    let app = TestApp::new().await;
    let (token, _) = app.register("hoarder@example.com").await;

    let posts: Vec<Value> = (0..101)
        .map(|i| scraped_post(&format!("https://www.linkedin.com/posts/p-{}", i), json!([])))
        .collect();
    let (status, body) = app
        .send(make_post_request(
            "/api/scraped-posts",
            json!({ "posts": posts }).to_string(),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = app
        .send(make_post_request(
            "/api/scraped-posts",
            json!({ "posts": &posts[..100] }).to_string(),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["storedPosts"], 100);
}

#[tokio::test]
async fn test_rescraped_comments_keep_their_ids() {
    let app = TestApp::new().await;
    let (token, _) = app.register("rescrape@example.com").await;
    let upload = json!({ "posts": [scraped_post(
        "https://www.linkedin.com/posts/grace-2",
        json!([
            { "authorName": "Alan", "content": "Weekly cadence keeps feedback loops short." },
            { "authorName": "Alan", "content": "Weekly cadence keeps feedback loops short." },
            { "content": "How did QA adapt?" }
        ])
    )]})
    .to_string();

    for _ in 0..2 {
        let (status, body) = app
            .send(make_post_request("/api/scraped-posts", upload.clone(), Some(&token)))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["storedPosts"], 1);
        assert_eq!(body["storedComments"], 2);
    }

    let upserts = app.vectors.upserts.lock().unwrap();
    assert_eq!(upserts.len(), 2);
    let ids = |i: usize| {
        let mut ids: Vec<String> = upserts[i].1.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        ids
    };
    assert_eq!(ids(0), ids(1));
    drop(upserts);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scraped_comments")
        .fetch_one(&app.db)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_generate_comment_rejects_foreign_profile_and_empty_post() {
    let app = TestApp::new().await;
    let (owner, _) = app.register("owner@example.com").await;
    let (token, _) = app.register("intruder@example.com").await;

    let (_, body) = app
        .send(make_post_request(
            "/api/comment-styles",
            json!({ "name": "Private" }).to_string(),
            Some(&owner),
        ))
        .await;
    let profile_id = body["profile"]["id"].as_str().unwrap();

    let (status, _) = app
        .send(make_post_request(
            "/api/ai/generate-comment",
            json!({ "postText": "Hello", "styleProfileId": profile_id }).to_string(),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(make_post_request(
            "/api/ai/generate-comment",
            json!({ "postText": "   " }).to_string(),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Neither rejected request used quota
    let (_, body) = app.send(make_get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(body["usage"]["ai_comment"]["used"], 0);
}

#[tokio::test]
async fn test_generate_post_daily_limit() {
    let app = TestApp::new().await;
    let (token, _) = app.register("poster@example.com").await;
    let body = json!({ "topic": "Remote hiring" }).to_string();

    let (status, _) = app
        .send(make_post_request("/api/ai/generate-post", body.clone(), Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(make_post_request("/api/ai/generate-post", body, Some(&token)))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["action"], "ai_post");
}

#[tokio::test]
async fn test_failed_generation_refunds_quota() {
    let app = TestApp::new().await;
    let (token, _) = app.register("unlucky@example.com").await;
    let request = json!({ "postText": "Hiring is hard." }).to_string();

    *app.chat.failing.lock().unwrap() = true;
    // More attempts than the free plan allows
    for _ in 0..7 {
        let (status, body) = app
            .send(make_post_request(
                "/api/ai/generate-comment",
                request.clone(),
                Some(&token),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY, "{}", body);
    }

    let (status, _) = app
        .send(make_post_request(
            "/api/ai/generate-post",
            json!({ "topic": "Hiring" }).to_string(),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (_, body) = app.send(make_get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(body["usage"]["ai_comment"]["used"], 0);
    assert_eq!(body["usage"]["ai_post"]["used"], 0);

    *app.chat.failing.lock().unwrap() = false;
    let (status, body) = app
        .send(make_post_request("/api/ai/generate-comment", request, Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["usage"]["used"], 1);
}

// =============================================================================
// Billing Webhook Tests
// =============================================================================

#[tokio::test]
async fn test_stripe_webhook_invalid_signature() {
    let app = TestApp::new().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header("stripe-signature", "t=1,v1=deadbeef")
        .body(Body::from(checkout_event("evt_x", "u", "pro").to_string()))
        .unwrap();

    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stripe_checkout_upgrades_plan_once() {
    let app = TestApp::new().await;
    let (token, user_id) = app.register("buyer@example.com").await;

    let event = checkout_event("evt_checkout_1", &user_id, "pro");
    let (status, body) = app.send(stripe_request(&event)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["handled"], true);
    assert_eq!(app.plan_slug(&token).await, "pro");

    // Redelivery is acknowledged without reprocessing
    let (status, body) = app.send(stripe_request(&event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duplicate"], true);

    let deleted = json!({
        "id": "evt_sub_deleted",
        "type": "customer.subscription.deleted",
        "data": { "object": { "id": "sub_test_1", "customer": "cus_test_1", "status": "canceled" } }
    });
    let (status, _) = app.send(stripe_request(&deleted)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.plan_slug(&token).await, "free");

    let (_, body) = app.send(make_get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(body["user"]["subscriptionStatus"], "canceled");
}

#[tokio::test]
async fn test_stripe_unknown_event_acknowledged() {
    let app = TestApp::new().await;

    let event = json!({
        "id": "evt_other",
        "type": "customer.created",
        "data": { "object": { "id": "cus_1" } }
    });
    let (status, body) = app.send(stripe_request(&event)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["handled"], false);
}

#[tokio::test]
async fn test_stripe_failed_event_can_be_retried() {
    let app = TestApp::new().await;
    let (token, user_id) = app.register("retry@example.com").await;

    let event = checkout_event("evt_retry", &user_id, "no-such-plan");
    let (status, _) = app.send(stripe_request(&event)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    sqlx::query("UPDATE plans SET slug = 'no-such-plan' WHERE id = 'plan_starter'")
        .execute(&app.db)
        .await
        .unwrap();

    let (status, body) = app.send(stripe_request(&event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duplicate"], false);
    assert_eq!(app.plan_slug(&token).await, "no-such-plan");
}

#[tokio::test]
async fn test_invoice_paid_credits_referrer_once_per_invoice() {
    let app = TestApp::new().await;
    let (referrer_token, _) = app.register("referrer@example.com").await;
    let code = app.referral_code(&referrer_token).await;

    let (_, payer_id) = app
        .register_with(json!({
            "email": "payer@example.com",
            "password": PASSWORD,
            "referralCode": code.to_lowercase()
        }))
        .await;

    app.send(stripe_request(&checkout_event("evt_c", &payer_id, "pro")))
        .await;

    let (status, _) = app
        .send(stripe_request(&invoice_event("evt_inv_1", "in_1", 4999)))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Same invoice delivered under a different event id
    app.send(stripe_request(&invoice_event("evt_inv_1b", "in_1", 4999)))
        .await;

    let (_, body) = app
        .send(make_get_request("/api/referrals", Some(&referrer_token)))
        .await;
    assert_eq!(body["referredUsers"], 1);
    assert_eq!(body["balanceCents"], 1499);
    assert_eq!(body["commissions"].as_array().unwrap().len(), 1);

    // Below the 5000 cent minimum
    let (status, _) = app
        .send(make_post_request(
            "/api/referrals/payout",
            String::new(),
            Some(&referrer_token),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_first_invoice_only_commission() {
    let app = TestApp::new().await;
    let (referrer_token, _) = app.register("ref2@example.com").await;
    let code = app.referral_code(&referrer_token).await;
    let (_, payer_id) = app
        .register_with(json!({ "email": "p2@example.com", "password": PASSWORD, "referralCode": code }))
        .await;

    let (status, _) = app
        .send(make_admin_request(
            "PUT",
            "/api/admin/referral-settings",
            Some(json!({
                "enabled": true,
                "commissionPercent": 50,
                "recurring": false,
                "minPayoutCents": 1000
            })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    app.send(stripe_request(&checkout_event("evt_c2", &payer_id, "starter")))
        .await;
    app.send(stripe_request(&invoice_event("evt_i1", "in_a", 1999)))
        .await;
    app.send(stripe_request(&invoice_event("evt_i2", "in_b", 1999)))
        .await;

    let (_, body) = app
        .send(make_get_request("/api/referrals", Some(&referrer_token)))
        .await;
    assert_eq!(body["balanceCents"], 999);

    let (status, body) = app
        .send(make_post_request(
            "/api/referrals/payout",
            String::new(),
            Some(&referrer_token),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
}

#[tokio::test]
async fn test_subscription_updated_tracks_status_and_period() {
    let app = TestApp::new().await;
    let (token, user_id) = app.register("renewer@example.com").await;
    app.send(stripe_request(&checkout_event("evt_c_sub", &user_id, "pro")))
        .await;

    let event = subscription_event("evt_sub_1", "past_due", Some(4_102_444_800i64));
    let (status, body) = app.send(stripe_request(&event)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (_, body) = app.send(make_get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(body["plan"]["slug"], "pro");
    assert_eq!(body["user"]["subscriptionStatus"], "past_due");
    assert!(body["user"]["planExpiresAt"]
        .as_str()
        .unwrap()
        .starts_with("2100-01-01"));

    let event = subscription_event("evt_sub_2", "unpaid", None);
    let (status, _) = app.send(stripe_request(&event)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.send(make_get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(body["plan"]["slug"], "free");
    assert_eq!(body["user"]["subscriptionStatus"], "unpaid");
    assert!(body["user"]["planExpiresAt"].is_null());
}

#[tokio::test]
async fn test_subscription_canceled_status_moves_to_default_plan() {
    let app = TestApp::new().await;
    let (token, user_id) = app.register("leaver@example.com").await;
    app.send(stripe_request(&checkout_event("evt_c_cancel", &user_id, "starter")))
        .await;
    assert_eq!(app.plan_slug(&token).await, "starter");

    app.send(stripe_request(&subscription_event("evt_sub_c", "canceled", None)))
        .await;
    assert_eq!(app.plan_slug(&token).await, "free");
}

#[tokio::test]
async fn test_invoice_payment_failed_marks_past_due() {
    let app = TestApp::new().await;
    let (token, user_id) = app.register("declined@example.com").await;
    app.send(stripe_request(&checkout_event("evt_c_fail", &user_id, "pro")))
        .await;

    let event = json!({
        "id": "evt_fail_1",
        "type": "invoice.payment_failed",
        "data": { "object": { "id": "in_fail", "customer": "cus_test_1", "amount_paid": 0 } }
    });
    let (status, body) = app.send(stripe_request(&event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["handled"], true);

    let (_, body) = app.send(make_get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(body["user"]["subscriptionStatus"], "past_due");
    // Access stays until the subscription itself ends
    assert_eq!(body["plan"]["slug"], "pro");
}

#[tokio::test]
async fn test_invoice_paid_extends_plan_expiry() {
    let app = TestApp::new().await;
    let (token, user_id) = app.register("payer3@example.com").await;
    app.send(stripe_request(&checkout_event("evt_c_ext", &user_id, "pro")))
        .await;

    let (status, _) = app
        .send(stripe_request(&invoice_event("evt_inv_ext", "in_ext", 4999)))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.send(make_get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(body["plan"]["slug"], "pro");
    assert_eq!(body["user"]["subscriptionStatus"], "active");
    assert!(body["user"]["planExpiresAt"]
        .as_str()
        .unwrap()
        .starts_with("2100-01-01"));
}

#[tokio::test]
async fn test_invoice_before_checkout_is_applied_on_retry() {
    let app = TestApp::new().await;
    let (referrer_token, _) = app.register("early-ref@example.com").await;
    let code = app.referral_code(&referrer_token).await;
    let (token, payer_id) = app
        .register_with(json!({ "email": "early@example.com", "password": PASSWORD, "referralCode": code }))
        .await;

    // The customer is not linked to an account yet
    let invoice = invoice_event("evt_inv_early", "in_early", 4999);
    let (status, body) = app.send(stripe_request(&invoice)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    app.send(stripe_request(&checkout_event("evt_c_late", &payer_id, "pro")))
        .await;

    let (status, body) = app.send(stripe_request(&invoice)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["duplicate"], false);
    assert_eq!(body["handled"], true);

    let (_, body) = app.send(make_get_request("/api/auth/me", Some(&token))).await;
    assert!(body["user"]["planExpiresAt"]
        .as_str()
        .unwrap()
        .starts_with("2100-01-01"));

    let (_, body) = app
        .send(make_get_request("/api/referrals", Some(&referrer_token)))
        .await;
    assert_eq!(body["balanceCents"], 1499);
}

#[tokio::test]
async fn test_payout_request_and_rejection_refund() {
    let app = TestApp::new().await;
    let (referrer_token, _) = app.register("earner@example.com").await;
    let code = app.referral_code(&referrer_token).await;
    let (_, payer_id) = app
        .register_with(json!({ "email": "big@example.com", "password": PASSWORD, "referralCode": code }))
        .await;

    app.send(stripe_request(&checkout_event("evt_c3", &payer_id, "unlimited")))
        .await;
    app.send(stripe_request(&invoice_event("evt_i3", "in_big", 20000)))
        .await;

    let (status, body) = app
        .send(make_post_request(
            "/api/referrals/payout",
            String::new(),
            Some(&referrer_token),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["payout"]["amountCents"], 6000);
    let payout_id = body["payout"]["id"].as_str().unwrap().to_string();

    let (_, body) = app
        .send(make_get_request("/api/referrals", Some(&referrer_token)))
        .await;
    assert_eq!(body["balanceCents"], 0);

    let (status, body) = app
        .send(make_admin_request(
            "PUT",
            &format!("/api/admin/payouts/{}", payout_id),
            Some(json!({ "status": "rejected" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payout"]["status"], "rejected");

    let (_, body) = app
        .send(make_get_request("/api/referrals", Some(&referrer_token)))
        .await;
    assert_eq!(body["balanceCents"], 6000);
}

// =============================================================================
// Auth Provider Webhook Tests
// =============================================================================

#[tokio::test]
async fn test_clerk_user_lifecycle() {
    let app = TestApp::new().await;

    let created = json!({
        "type": "user.created",
        "data": {
            "id": "user_clerk_1",
            "email_addresses": [{ "id": "idn_1", "email_address": "Clerk@Example.com" }],
            "primary_email_address_id": "idn_1",
            "first_name": "Katherine",
            "last_name": "Johnson"
        }
    });
    let (status, body) = app.send(clerk_request("msg_1", &created)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (name, verified): (Option<String>, bool) =
        sqlx::query_as("SELECT name, email_verified FROM users WHERE external_id = ?")
            .bind("user_clerk_1")
            .fetch_one(&app.db)
            .await
            .unwrap();
    assert_eq!(name.as_deref(), Some("Katherine Johnson"));
    assert!(verified);

    let deleted = json!({ "type": "user.deleted", "data": { "id": "user_clerk_1", "deleted": true } });
    let (status, _) = app.send(clerk_request("msg_2", &deleted)).await;
    assert_eq!(status, StatusCode::OK);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind("clerk@example.com")
        .fetch_one(&app.db)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_clerk_links_existing_account_by_email() {
    let app = TestApp::new().await;
    let (_, user_id) = app.register("linked@example.com").await;

    let updated = json!({
        "type": "user.updated",
        "data": {
            "id": "user_clerk_2",
            "email_addresses": [{ "id": "idn_9", "email_address": "linked@example.com" }],
            "primary_email_address_id": "idn_9",
            "first_name": "Linked"
        }
    });
    let (status, _) = app.send(clerk_request("msg_3", &updated)).await;
    assert_eq!(status, StatusCode::OK);

    let external_id: Option<String> = sqlx::query_scalar("SELECT external_id FROM users WHERE id = ?")
        .bind(&user_id)
        .fetch_one(&app.db)
        .await
        .unwrap();
    assert_eq!(external_id.as_deref(), Some("user_clerk_2"));
}

#[tokio::test]
async fn test_clerk_bad_signature() {
    let app = TestApp::new().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/clerk")
        .header("svix-id", "msg_bad")
        .header("svix-timestamp", chrono::Utc::now().timestamp().to_string())
        .header("svix-signature", "v1,AAAA")
        .body(Body::from("{}"))
        .unwrap();

    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Admin Tests
// =============================================================================

#[tokio::test]
async fn test_admin_requires_key_or_admin_role() {
    let app = TestApp::new().await;
    let (token, _) = app.register("plain@example.com").await;

    let (status, _) = app.send(make_get_request("/api/admin/stats", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(make_get_request("/api/admin/stats", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = Request::builder()
        .uri("/api/admin/stats")
        .header("x-admin-key", "wrong-key")
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_stats_success() {
    let app = TestApp::new().await;
    let (token, _) = app.register("counted@example.com").await;
    app.send(make_post_request(
        "/api/usage/track",
        json!({ "action": "follow" }).to_string(),
        Some(&token),
    ))
    .await;

    let (status, body) = app
        .send(make_admin_request("GET", "/api/admin/stats", None))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalUsers"], 1);
    assert_eq!(body["usersByPlan"]["free"], 1);
    assert_eq!(body["usersByPlan"]["pro"], 0);
    assert_eq!(body["usageToday"]["follows"], 1);
    assert_eq!(body["emailQueue"]["pending"], 3);
    assert!(body["databaseSizeBytes"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_admin_session_with_admin_role() {
    let app = TestApp::new().await;
    let (token, admin_id) = app.register("boss@example.com").await;
    app.register("staff@example.com").await;
    sqlx::query("UPDATE users SET role = 'admin' WHERE id = ?")
        .bind(&admin_id)
        .execute(&app.db)
        .await
        .unwrap();

    // Role is read from the account, so a token issued before the change works
    let (status, body) = app
        .send(make_get_request("/api/admin/users?search=boss", Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["users"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_admin_set_plan_and_ban() {
    let app = TestApp::new().await;
    let (token, user_id) = app.register("managed@example.com").await;

    let (status, body) = app
        .send(make_admin_request(
            "PUT",
            &format!("/api/admin/users/{}/plan", user_id),
            Some(json!({ "planSlug": "unlimited" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["planId"], "plan_unlimited");
    assert_eq!(app.plan_slug(&token).await, "unlimited");

    let (status, _) = app
        .send(make_admin_request(
            "PUT",
            &format!("/api/admin/users/{}/plan", user_id),
            Some(json!({ "planSlug": "platinum" })),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(make_admin_request(
            "PUT",
            &format!("/api/admin/users/{}/ban", user_id),
            Some(json!({ "banned": true })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send(make_get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_expired_plan_reported_as_default() {
    let app = TestApp::new().await;
    let (token, user_id) = app.register("lapsed@example.com").await;

    let (status, _) = app
        .send(make_admin_request(
            "PUT",
            &format!("/api/admin/users/{}/plan", user_id),
            Some(json!({ "planSlug": "pro", "expiresAt": "2020-01-01T00:00:00Z" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(app.plan_slug(&token).await, "free");
}

#[tokio::test]
async fn test_admin_delete_user() {
    let app = TestApp::new().await;
    let (token, user_id) = app.register("gone@example.com").await;

    let (status, _) = app
        .send(make_admin_request(
            "DELETE",
            &format!("/api/admin/users/{}", user_id),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send(make_get_request("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(make_admin_request(
            "DELETE",
            &format!("/api/admin/users/{}", user_id),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_enroll_user_in_sequence() {
    let app = TestApp::new().await;
    let (_, user_id) = app.register("enrolled@example.com").await;

    let (status, body) = app
        .send(make_admin_request(
            "POST",
            &format!("/api/admin/email-sequences/welcome/enroll/{}", user_id),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queued"], 3);

    let (status, _) = app
        .send(make_admin_request(
            "POST",
            &format!("/api/admin/email-sequences/missing/enroll/{}", user_id),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Extension Version Tests
// =============================================================================

#[tokio::test]
async fn test_extension_version_check() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send(make_get_request("/api/extension/version?current=1.0.0", None))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["latest"].is_null());
    assert_eq!(body["updateAvailable"], false);

    for (version, latest) in [("1.1.0", true), ("1.2.0", true)] {
        let (status, _) = app
            .send(make_admin_request(
                "POST",
                "/api/admin/extension-versions",
                Some(json!({
                    "version": version,
                    "downloadUrl": format!("https://cdn.example.com/kommentify-{}.zip", version),
                    "minSupportedVersion": "1.1",
                    "isLatest": latest
                })),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, _) = app
        .send(make_admin_request(
            "POST",
            "/api/admin/extension-versions",
            Some(json!({ "version": "1.2.0", "downloadUrl": "https://cdn.example.com/x.zip" })),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = app
        .send(make_get_request("/api/extension/version?current=1.0.9", None))
        .await;
    assert_eq!(body["latest"]["version"], "1.2.0");
    assert_eq!(body["updateAvailable"], true);
    assert_eq!(body["updateRequired"], true);

    let (_, body) = app
        .send(make_get_request("/api/extension/version?current=1.2", None))
        .await;
    assert_eq!(body["updateAvailable"], false);
    assert_eq!(body["updateRequired"], false);

    let (status, _) = app
        .send(make_get_request("/api/extension/version?current=banana", None))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Cron Tests
// =============================================================================

#[tokio::test]
async fn test_cron_requires_secret() {
    let app = TestApp::new().await;

    let (status, _) = app
        .send(make_post_request(
            "/api/cron/process-email-queue",
            String::new(),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(make_post_request(
            "/api/cron/process-email-queue",
            String::new(),
            Some("wrong"),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cron_sends_due_emails_only() {
    let app = TestApp::new().await;
    app.register_with(json!({ "email": "new@example.com", "password": PASSWORD, "name": "Nia" }))
        .await;

    let (status, body) = app
        .send(make_post_request(
            "/api/cron/process-email-queue",
            String::new(),
            Some(CRON_SECRET),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 1);
    assert_eq!(body["sent"], 1);
    assert_eq!(body["failed"], 0);

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Welcome to Kommentify, Nia!");
    assert!(!sent[0].text.contains("{{"));

    // Nothing else is due yet
    let (_, body) = app
        .send(make_post_request(
            "/api/cron/process-email-queue",
            String::new(),
            Some(CRON_SECRET),
        ))
        .await;
    assert_eq!(body["processed"], 0);
}
