use super::{ChatBackend, ChatReply, HistoryTurn, KnowledgeIngest};
use crate::error::{ServiceError, ServiceResult, check_status};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    history: &'a [HistoryTurn],
}

pub struct HttpChatBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChatBackend {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        info!("Chat backend at {}", base_url);
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn reply(&self, message: &str, history: &[HistoryTurn]) -> ServiceResult<ChatReply> {
        let url = format!("{}/chat", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&ChatRequest { message, history })
            .send()
            .await?;
        let body = check_status(resp).await?.bytes().await?;
        let reply: ChatReply = serde_json::from_slice(&body)?;
        debug!(
            "Chat reply ({} chars, emotion {})",
            reply.text().len(),
            reply.emotion()
        );
        Ok(reply)
    }
}

pub struct HttpKnowledgeIngest {
    client: reqwest::Client,
    base_url: String,
}

impl HttpKnowledgeIngest {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl KnowledgeIngest for HttpKnowledgeIngest {
    async fn ingest(&self, filename: &str, bytes: Vec<u8>, mime: &str) -> ServiceResult<()> {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)
            .map_err(|e| ServiceError::Invalid(format!("mime type '{}': {}", mime, e)))?;
        let form = Form::new().part("file", part);

        let url = format!("{}/rag/upload", self.base_url);
        let resp = self.client.post(&url).multipart(form).send().await?;
        check_status(resp).await?;
        info!("Forwarded {} to the knowledge index", filename);
        Ok(())
    }
}
