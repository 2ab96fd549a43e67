use super::{LogSubscription, ObjectStorage, Store};
use crate::entity::{
    Conversation, ConversationUpdate, KnowledgeFile, LogEntry, LogLevel, Message,
    NewConversation, NewKnowledgeFile, NewMessage, Percent, PersonalitySettings, RecordId,
    SETTINGS_ROW_ID, SettingsPatch,
};
use crate::error::{ServiceError, ServiceResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

const LOG_BROADCAST_CAPACITY: usize = 256;

#[derive(Default)]
struct Tables {
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    personality: Option<PersonalitySettings>,
    knowledge: Vec<KnowledgeFile>,
    logs: Vec<LogEntry>,
    next_log_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub mime: String,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    objects: RwLock<HashMap<String, StoredObject>>,
    log_tx: broadcast::Sender<LogEntry>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (log_tx, _) = broadcast::channel(LOG_BROADCAST_CAPACITY);
        let personality = PersonalitySettings {
            id: RecordId::from(SETTINGS_ROW_ID),
            empathy: Percent::MIDPOINT,
            humor: Percent::MIDPOINT,
            formality: Percent::MIDPOINT,
            system_prompt: None,
            updated_at: None,
        };
        Self {
            tables: RwLock::new(Tables {
                personality: Some(personality),
                next_log_id: 1,
                ..Default::default()
            }),
            objects: RwLock::new(HashMap::new()),
            log_tx,
        }
    }

    pub async fn record_log(&self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        let entry = {
            let mut tables = self.tables.write().await;
            let entry = LogEntry {
                id: RecordId::from(tables.next_log_id),
                level,
                message: message.into(),
                created_at: Utc::now(),
            };
            tables.next_log_id += 1;
            tables.logs.push(entry.clone());
            entry
        };
        // No receivers is fine: nobody is tailing.
        let _ = self.log_tx.send(entry.clone());
        entry
    }

    #[cfg(test)]
    pub async fn object(&self, path: &str) -> Option<StoredObject> {
        self.objects.read().await.get(path).cloned()
    }

    fn new_id() -> RecordId {
        RecordId::new(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_conversations(&self) -> ServiceResult<Vec<Conversation>> {
        let mut conversations = self.tables.read().await.conversations.clone();
        conversations.sort_by_key(|c| std::cmp::Reverse(c.last_activity()));
        Ok(conversations)
    }

    async fn create_conversation(&self, new: &NewConversation) -> ServiceResult<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Self::new_id(),
            title: new.title.clone(),
            created_at: now,
            updated_at: Some(now),
        };
        self.tables
            .write()
            .await
            .conversations
            .push(conversation.clone());
        self.record_log(
            LogLevel::Sync,
            format!("conversation {} created", conversation.id),
        )
        .await;
        Ok(conversation)
    }

    async fn update_conversation(
        &self,
        id: &RecordId,
        update: &ConversationUpdate,
    ) -> ServiceResult<()> {
        let mut tables = self.tables.write().await;
        let conversation = tables
            .conversations
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| ServiceError::NotFound(format!("conversation {}", id)))?;
        conversation.title = update.title.clone();
        conversation.updated_at = Some(update.updated_at);
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &RecordId) -> ServiceResult<Vec<Message>> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn insert_message(&self, new: &NewMessage) -> ServiceResult<Message> {
        let message = {
            let mut tables = self.tables.write().await;
            if !tables
                .conversations
                .iter()
                .any(|c| c.id == new.conversation_id)
            {
                return Err(ServiceError::NotFound(format!(
                    "conversation {}",
                    new.conversation_id
                )));
            }
            let message = Message {
                id: Self::new_id(),
                conversation_id: new.conversation_id.clone(),
                role: new.role,
                content: new.content.clone(),
                emotion: new.emotion.clone(),
                tools_used: None,
                created_at: Utc::now(),
            };
            tables.messages.push(message.clone());
            message
        };
        debug!("Stored message {} ({:?})", message.id, message.role);
        Ok(message)
    }

    async fn personality(&self) -> ServiceResult<PersonalitySettings> {
        self.tables
            .read()
            .await
            .personality
            .clone()
            .ok_or_else(|| ServiceError::NotFound("personality settings".to_string()))
    }

    async fn patch_personality(&self, patch: &SettingsPatch) -> ServiceResult<()> {
        {
            let mut tables = self.tables.write().await;
            let settings = tables
                .personality
                .as_mut()
                .ok_or_else(|| ServiceError::NotFound("personality settings".to_string()))?;
            settings.apply(patch, Utc::now());
        }
        self.record_log(LogLevel::Sync, "personality settings updated")
            .await;
        Ok(())
    }

    async fn list_knowledge(&self) -> ServiceResult<Vec<KnowledgeFile>> {
        let mut files = self.tables.read().await.knowledge.clone();
        files.sort_by_key(|f| std::cmp::Reverse(f.created_at));
        Ok(files)
    }

    async fn insert_knowledge(&self, new: &NewKnowledgeFile) -> ServiceResult<KnowledgeFile> {
        let file = KnowledgeFile {
            id: Self::new_id(),
            filename: new.filename.clone(),
            size_bytes: Some(new.size_bytes),
            mime_type: Some(new.mime_type.clone()),
            storage_path: Some(new.storage_path.clone()),
            created_at: Utc::now(),
        };
        self.tables.write().await.knowledge.push(file.clone());
        self.record_log(LogLevel::Info, format!("knowledge file {} added", file.filename))
            .await;
        Ok(file)
    }

    async fn delete_knowledge(&self, id: &RecordId) -> ServiceResult<()> {
        let removed = {
            let mut tables = self.tables.write().await;
            let before = tables.knowledge.len();
            tables.knowledge.retain(|f| &f.id != id);
            before != tables.knowledge.len()
        };
        // Deleting an absent row is not an error on the hosted store either.
        if removed {
            self.record_log(LogLevel::Warn, format!("knowledge file {} deleted", id))
                .await;
        }
        Ok(())
    }

    async fn recent_logs(&self, limit: usize) -> ServiceResult<Vec<LogEntry>> {
        let tables = self.tables.read().await;
        let skip = tables.logs.len().saturating_sub(limit);
        Ok(tables.logs[skip..].to_vec())
    }

    async fn subscribe_logs(&self) -> ServiceResult<LogSubscription> {
        let (subscription, tx, mut shutdown) = LogSubscription::channel();
        let mut source = self.log_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    received = source.recv() => match received {
                        Ok(entry) => {
                            if tx.send(entry).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("Log subscriber lagged, {} entries skipped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(subscription)
    }
}

#[async_trait]
impl ObjectStorage for MemoryStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, mime: &str) -> ServiceResult<()> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(path) {
            return Err(ServiceError::Storage(format!("object {} already exists", path)));
        }
        objects.insert(
            path.to_string(),
            StoredObject {
                bytes,
                mime: mime.to_string(),
            },
        );
        Ok(())
    }
}
