//! Outbound integrations: chat model, vector index and transactional email.
//!
//! Handlers only see the traits below; the concrete HTTP clients are chosen
//! once at start-up from [`Config`]. A missing API key selects [`Disabled`],
//! which answers every call with [`IntegrationError::NotConfigured`].

pub mod llm;
pub mod mailer;
pub mod vector;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

pub use llm::{ChatMessage, ChatRequest, OpenAiClient};
pub use mailer::{OutgoingEmail, ResendMailer};
pub use vector::{PineconeClient, VectorMatch, VectorRecord};

/// Failure talking to a third-party API
#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {message}")]
    Api {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("Unexpected response from {0}")]
    InvalidResponse(&'static str),
}

/// Chat-completion and embedding model
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, IntegrationError>;

    async fn embed(&self, input: &str) -> Result<Vec<f32>, IntegrationError>;
}

/// Namespaced nearest-neighbour index
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        namespace: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), IntegrationError>;

    async fn query(
        &self,
        namespace: &str,
        vector: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, IntegrationError>;
}

/// Transactional email provider
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one message, returning the provider's message id
    async fn send(&self, email: &OutgoingEmail) -> Result<String, IntegrationError>;
}

/// Stand-in for an integration whose credentials are absent
pub struct Disabled(pub &'static str);

#[async_trait]
impl ChatModel for Disabled {
    async fn complete(&self, _request: ChatRequest) -> Result<String, IntegrationError> {
        Err(IntegrationError::NotConfigured(self.0))
    }

    async fn embed(&self, _input: &str) -> Result<Vec<f32>, IntegrationError> {
        Err(IntegrationError::NotConfigured(self.0))
    }
}

#[async_trait]
impl VectorIndex for Disabled {
    async fn upsert(&self, _: &str, _: Vec<VectorRecord>) -> Result<(), IntegrationError> {
        Err(IntegrationError::NotConfigured(self.0))
    }

    async fn query(
        &self,
        _: &str,
        _: Vec<f32>,
        _: usize,
    ) -> Result<Vec<VectorMatch>, IntegrationError> {
        Err(IntegrationError::NotConfigured(self.0))
    }
}

#[async_trait]
impl Mailer for Disabled {
    async fn send(&self, _email: &OutgoingEmail) -> Result<String, IntegrationError> {
        Err(IntegrationError::NotConfigured(self.0))
    }
}

/// The set of clients shared by all handlers
#[derive(Clone)]
pub struct Integrations {
    pub chat: Arc<dyn ChatModel>,
    pub vectors: Arc<dyn VectorIndex>,
    pub mailer: Arc<dyn Mailer>,
}

impl Integrations {
    /// Build real clients for every integration that has credentials
    pub fn from_config(config: &Config) -> Result<Self, IntegrationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        let chat: Arc<dyn ChatModel> = match &config.openai_api_key {
            Some(key) => Arc::new(OpenAiClient::new(
                http.clone(),
                &config.openai_base_url,
                key,
                &config.openai_model,
                &config.openai_embedding_model,
            )),
            None => {
                tracing::warn!("OPENAI_API_KEY not set - AI endpoints disabled");
                Arc::new(Disabled("Chat model"))
            }
        };

        let vectors: Arc<dyn VectorIndex> =
            match (&config.pinecone_api_key, &config.pinecone_index_host) {
                (Some(key), Some(host)) => Arc::new(PineconeClient::new(http.clone(), host, key)),
                _ => {
                    tracing::info!("Vector index not configured - similar comment lookup off");
                    Arc::new(Disabled("Vector index"))
                }
            };

        let mailer: Arc<dyn Mailer> = match &config.resend_api_key {
            Some(key) => Arc::new(ResendMailer::new(http, key, &config.email_from)),
            None => {
                tracing::warn!("RESEND_API_KEY not set - emails stay queued");
                Arc::new(Disabled("Email provider"))
            }
        };

        Ok(Self {
            chat,
            vectors,
            mailer,
        })
    }
}

/// Turn a non-2xx response into [`IntegrationError::Api`]
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, IntegrationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(IntegrationError::Api {
        service,
        status: status.as_u16(),
        message: message.chars().take(500).collect(),
    })
}
