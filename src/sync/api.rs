//! Remote catalog HTTP client and response types.
//!
//! The remote service returns nested shapes (questions carry a chapter
//! reference and a license list, quizzes carry a license reference and a
//! question list). These DTOs exist only at the sync boundary; the engine
//! normalizes them into relational rows before anything touches the store.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::SyncError;

#[derive(Debug, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

/// Bare id reference inside a nested payload.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IdRef {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteChapter {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLicense {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub total_questions: u32,
    pub required_correct: u32,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteQuestion {
    pub id: i64,
    pub content: String,
    pub options: Vec<String>,
    pub correct_answer_index: usize,
    pub is_critical: bool,
    pub number: i64,
    #[serde(default)]
    pub image_name: Option<String>,
    #[serde(default)]
    pub explain: Option<String>,
    #[serde(default)]
    pub chapter: Option<IdRef>,
    #[serde(default)]
    pub licenses: Vec<IdRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteQuiz {
    pub id: i64,
    pub name: String,
    pub license: IdRef,
    #[serde(default)]
    pub questions: Vec<IdRef>,
}

/// Read-only view of the remote catalog service.
#[allow(async_fn_in_trait)]
pub trait CatalogApi {
    async fn latest_version(&self) -> Result<String, SyncError>;
    async fn chapters(&self) -> Result<Vec<RemoteChapter>, SyncError>;
    async fn licenses(&self) -> Result<Vec<RemoteLicense>, SyncError>;
    async fn questions(&self) -> Result<Vec<RemoteQuestion>, SyncError>;
    async fn quizzes(&self) -> Result<Vec<RemoteQuiz>, SyncError>;
}

/// reqwest-backed catalog client with static bearer authentication.
#[derive(Clone)]
pub struct HttpCatalog {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(SyncError::Backend { status, message });
        }

        resp.json().await.map_err(|e| SyncError::Parse(e.to_string()))
    }
}

impl CatalogApi for HttpCatalog {
    async fn latest_version(&self) -> Result<String, SyncError> {
        let resp: VersionResponse = self.get_json("/versions/latest").await?;
        Ok(resp.version)
    }

    async fn chapters(&self) -> Result<Vec<RemoteChapter>, SyncError> {
        self.get_json("/chapters").await
    }

    async fn licenses(&self) -> Result<Vec<RemoteLicense>, SyncError> {
        self.get_json("/licenses").await
    }

    async fn questions(&self) -> Result<Vec<RemoteQuestion>, SyncError> {
        self.get_json("/questions").await
    }

    async fn quizzes(&self) -> Result<Vec<RemoteQuiz>, SyncError> {
        self.get_json("/quizzes").await
    }
}
