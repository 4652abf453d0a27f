use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{check_status, IntegrationError, VectorIndex};

const SERVICE: &str = "Vector index";

#[derive(Debug, Clone, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl VectorMatch {
    /// The `text` metadata field stored at upsert time
    pub fn text(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("text")?.as_str()
    }
}

/// Client for a Pinecone index data plane
pub struct PineconeClient {
    http: reqwest::Client,
    host: String,
    api_key: String,
}

#[derive(Serialize)]
struct UpsertBody<'a> {
    vectors: &'a [VectorRecord],
    namespace: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    namespace: &'a str,
    vector: Vec<f32>,
    top_k: usize,
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

impl PineconeClient {
    pub fn new(http: reqwest::Client, host: &str, api_key: &str) -> Self {
        let host = host.trim_end_matches('/');
        let host = if host.starts_with("http") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };

        Self {
            http,
            host,
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl VectorIndex for PineconeClient {
    async fn upsert(
        &self,
        namespace: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), IntegrationError> {
        if records.is_empty() {
            return Ok(());
        }

        let response = self
            .http
            .post(format!("{}/vectors/upsert", self.host))
            .header("Api-Key", &self.api_key)
            .json(&UpsertBody {
                vectors: &records,
                namespace,
            })
            .send()
            .await?;

        check_status(SERVICE, response).await?;
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, IntegrationError> {
        let response = self
            .http
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.api_key)
            .json(&QueryBody {
                namespace,
                vector,
                top_k,
                include_metadata: true,
            })
            .send()
            .await?;

        let parsed: QueryResponse = check_status(SERVICE, response).await?.json().await?;
        Ok(parsed.matches)
    }
}
