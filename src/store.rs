mod memory;
mod realtime;
mod rest;

use crate::config::{Config, StoreBackend};
use crate::entity::{
    Conversation, ConversationUpdate, KnowledgeFile, LogEntry, Message, NewConversation,
    NewKnowledgeFile, NewMessage, PersonalitySettings, RecordId, SettingsPatch,
};
use crate::error::ServiceResult;
use anyhow::Result;
use async_trait::async_trait;
pub use memory::MemoryStore;
pub use rest::SupabaseStore;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_conversations(&self) -> ServiceResult<Vec<Conversation>>;
    async fn create_conversation(&self, new: &NewConversation) -> ServiceResult<Conversation>;
    async fn update_conversation(
        &self,
        id: &RecordId,
        update: &ConversationUpdate,
    ) -> ServiceResult<()>;

    async fn list_messages(&self, conversation_id: &RecordId) -> ServiceResult<Vec<Message>>;
    async fn insert_message(&self, new: &NewMessage) -> ServiceResult<Message>;

    async fn personality(&self) -> ServiceResult<PersonalitySettings>;
    async fn patch_personality(&self, patch: &SettingsPatch) -> ServiceResult<()>;

    async fn list_knowledge(&self) -> ServiceResult<Vec<KnowledgeFile>>;
    async fn insert_knowledge(&self, new: &NewKnowledgeFile) -> ServiceResult<KnowledgeFile>;
    async fn delete_knowledge(&self, id: &RecordId) -> ServiceResult<()>;

    async fn recent_logs(&self, limit: usize) -> ServiceResult<Vec<LogEntry>>;
    async fn subscribe_logs(&self) -> ServiceResult<LogSubscription>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>, mime: &str) -> ServiceResult<()>;
}

const SUBSCRIPTION_BUFFER: usize = 256;

/// Live feed of inserted log rows.
///
/// The producer task stops as soon as the handle is closed or dropped.
pub struct LogSubscription {
    rx: mpsc::Receiver<LogEntry>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl LogSubscription {
    pub(crate) fn channel() -> (Self, mpsc::Sender<LogEntry>, oneshot::Receiver<()>) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let subscription = Self {
            rx,
            shutdown: Some(shutdown_tx),
        };
        (subscription, tx, shutdown_rx)
    }

    pub async fn next(&mut self) -> Option<LogEntry> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.rx.close();
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct Backends {
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn ObjectStorage>,
}

pub fn create_backends(config: &Config, client: reqwest::Client) -> Result<Backends> {
    match config.store_backend {
        StoreBackend::Supabase => {
            let store = Arc::new(SupabaseStore::new(
                &config.store_url,
                &config.store_key,
                &config.knowledge_bucket,
                client,
            )?);
            Ok(Backends {
                store: store.clone(),
                storage: store,
            })
        }
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            Ok(Backends {
                store: store.clone(),
                storage: store,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::LogLevel;
    use chrono::Utc;

    fn entry(id: i64) -> LogEntry {
        LogEntry {
            id: RecordId::from(id),
            level: LogLevel::Info,
            message: format!("entry {}", id),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dropping_subscription_signals_producer() {
        let (subscription, tx, shutdown) = LogSubscription::channel();
        tx.send(entry(1)).await.unwrap();
        drop(subscription);

        assert!(shutdown.await.is_ok());
        assert!(tx.send(entry(2)).await.is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut subscription, tx, _shutdown) = LogSubscription::channel();
        tx.send(entry(1)).await.unwrap();

        subscription.close();
        subscription.close();
        // Buffered entries are still drained after close.
        assert_eq!(subscription.next().await.map(|e| e.id), Some(RecordId::from(1)));
        assert!(subscription.next().await.is_none());
    }
}
