mod http;

use crate::entity::{Message, ToolUsage};
use crate::error::ServiceResult;
use async_trait::async_trait;
pub use http::{HttpChatBackend, HttpKnowledgeIngest};
use serde::{Deserialize, Serialize};

const EMPTY_REPLY: &str = "Hmm, the words escaped me~";
const DEFAULT_EMOTION: &str = "neutral";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryTurn {
    pub role: &'static str,
    pub content: String,
}

impl From<&Message> for HistoryTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.history_name(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub tools_used: Option<Vec<ToolUsage>>,
}

impl ChatReply {
    pub fn text(&self) -> &str {
        match self.text.as_deref() {
            Some(text) if !text.is_empty() => text,
            _ => EMPTY_REPLY,
        }
    }

    pub fn emotion(&self) -> &str {
        match self.emotion.as_deref() {
            Some(emotion) if !emotion.is_empty() => emotion,
            _ => DEFAULT_EMOTION,
        }
    }

    pub fn tools(&self) -> Option<Vec<ToolUsage>> {
        self.tools_used.clone().filter(|tools| !tools.is_empty())
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn reply(&self, message: &str, history: &[HistoryTurn]) -> ServiceResult<ChatReply>;
}

#[async_trait]
pub trait KnowledgeIngest: Send + Sync {
    async fn ingest(&self, filename: &str, bytes: Vec<u8>, mime: &str) -> ServiceResult<()>;
}
