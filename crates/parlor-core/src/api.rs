//! Pull/refresh endpoints.
//!
//! The trait seam exists so the cache and session layers can be tested
//! against fakes; `HttpApi` is the production implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::{Conversation, Message};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_conversations(&self, token: &str) -> Result<Vec<Conversation>, ApiError>;

    async fn fetch_conversation(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<Conversation, ApiError>;

    async fn fetch_messages(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, ApiError>;

    async fn refresh_credential(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError>;

    async fn logout(&self, token: &str) -> Result<(), ApiError>;
}

pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
    ) -> Result<T, ApiError> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16()));
        }
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl ChatApi for HttpApi {
    async fn fetch_conversations(&self, token: &str) -> Result<Vec<Conversation>, ApiError> {
        self.get_json("conversations", token).await
    }

    async fn fetch_conversation(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<Conversation, ApiError> {
        self.get_json(&format!("conversations/{conversation_id}"), token)
            .await
    }

    async fn fetch_messages(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, ApiError> {
        self.get_json(&format!("conversations/{conversation_id}/messages"), token)
            .await
    }

    async fn refresh_credential(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let resp = self
            .client
            .post(self.url("auth/refresh"))
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16()));
        }
        Ok(resp.json::<RefreshResponse>().await?)
    }

    async fn logout(&self, token: &str) -> Result<(), ApiError> {
        let resp = self
            .client
            .post(self.url("auth/logout"))
            .bearer_auth(token)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16()));
        }
        Ok(())
    }
}
