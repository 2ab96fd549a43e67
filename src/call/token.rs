use crate::error::{ServiceResult, check_status};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaGrant {
    pub token: String,
    pub url: String,
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> ServiceResult<MediaGrant>;
}

pub struct HttpTokenSource {
    client: reqwest::Client,
    base_url: String,
    room: String,
    identity: String,
}

impl HttpTokenSource {
    pub fn new(base_url: &str, room: &str, identity: &str, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            room: room.to_string(),
            identity: identity.to_string(),
        }
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch(&self) -> ServiceResult<MediaGrant> {
        let url = format!("{}/getToken", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("room", &self.room), ("identity", &self.identity)])
            .send()
            .await?;
        let body = check_status(resp).await?.bytes().await?;
        let grant: MediaGrant = serde_json::from_slice(&body)?;
        debug!("Got media token for room {} at {}", self.room, grant.url);
        Ok(grant)
    }
}
