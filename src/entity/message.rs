use super::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    // Stored under the assistant's name; older rows use "assistant".
    #[serde(rename = "aura", alias = "assistant")]
    Assistant,
}

impl Role {
    pub fn history_name(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub name: String,
    #[serde(default, alias = "args")]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: RecordId,
    pub conversation_id: RecordId,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_used: Option<Vec<ToolUsage>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn local(new: NewMessage) -> Self {
        Self {
            id: RecordId::local(),
            conversation_id: new.conversation_id,
            role: new.role,
            content: new.content,
            emotion: new.emotion,
            tools_used: None,
            created_at: Utc::now(),
        }
    }

    pub fn tools(&self) -> &[ToolUsage] {
        self.tools_used.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub conversation_id: RecordId,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
}

impl NewMessage {
    pub fn user(conversation_id: RecordId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            role: Role::User,
            content: content.into(),
            emotion: None,
        }
    }

    pub fn assistant(
        conversation_id: RecordId,
        content: impl Into<String>,
        emotion: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            role: Role::Assistant,
            content: content.into(),
            emotion: Some(emotion.into()),
        }
    }
}
