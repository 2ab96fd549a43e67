
use crate::chat::{ChatBackend, ChatReply, HistoryTurn, KnowledgeIngest};
use crate::entity::{
    Conversation, ConversationUpdate, KnowledgeFile, LogEntry, Message, NewConversation,
    NewKnowledgeFile, NewMessage, PersonalitySettings, RecordId, Role, SettingsPatch,
};
use crate::error::{ServiceError, ServiceResult};
use crate::store::{LogSubscription, MemoryStore, ObjectStorage, Store};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

fn offline() -> ServiceError {
    ServiceError::Backend {
        status: 503,
        body: "offline".to_string(),
    }
}

#[derive(Default)]
pub struct Faults {
    pub create_conversation: bool,
    pub assistant_messages: bool,
    pub user_messages: bool,
    pub insert_knowledge: bool,
    pub patch_personality: bool,
    pub patch_gate: Option<Arc<Notify>>,
}

#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub faults: Mutex<Faults>,
}

impl FaultyStore {
    pub fn with(faults: Faults) -> Self {
        Self {
            inner: MemoryStore::new(),
            faults: Mutex::new(faults),
        }
    }

    fn check(&self, pick: impl FnOnce(&Faults) -> bool) -> ServiceResult<()> {
        let faults = self.faults.lock().unwrap();
        if pick(&faults) { Err(offline()) } else { Ok(()) }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn list_conversations(&self) -> ServiceResult<Vec<Conversation>> {
        self.inner.list_conversations().await
    }

    async fn create_conversation(&self, new: &NewConversation) -> ServiceResult<Conversation> {
        self.check(|f| f.create_conversation)?;
        self.inner.create_conversation(new).await
    }

    async fn update_conversation(
        &self,
        id: &RecordId,
        update: &ConversationUpdate,
    ) -> ServiceResult<()> {
        self.inner.update_conversation(id, update).await
    }

    async fn list_messages(&self, conversation_id: &RecordId) -> ServiceResult<Vec<Message>> {
        self.inner.list_messages(conversation_id).await
    }

    async fn insert_message(&self, new: &NewMessage) -> ServiceResult<Message> {
        self.check(|f| match new.role {
            Role::User => f.user_messages,
            Role::Assistant => f.assistant_messages,
        })?;
        self.inner.insert_message(new).await
    }

    async fn personality(&self) -> ServiceResult<PersonalitySettings> {
        self.inner.personality().await
    }

    async fn patch_personality(&self, patch: &SettingsPatch) -> ServiceResult<()> {
        let gate = self.faults.lock().unwrap().patch_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check(|f| f.patch_personality)?;
        self.inner.patch_personality(patch).await
    }

    async fn list_knowledge(&self) -> ServiceResult<Vec<KnowledgeFile>> {
        self.inner.list_knowledge().await
    }

    async fn insert_knowledge(&self, new: &NewKnowledgeFile) -> ServiceResult<KnowledgeFile> {
        self.check(|f| f.insert_knowledge)?;
        self.inner.insert_knowledge(new).await
    }

    async fn delete_knowledge(&self, id: &RecordId) -> ServiceResult<()> {
        self.inner.delete_knowledge(id).await
    }

    async fn recent_logs(&self, limit: usize) -> ServiceResult<Vec<LogEntry>> {
        self.inner.recent_logs(limit).await
    }

    async fn subscribe_logs(&self) -> ServiceResult<LogSubscription> {
        self.inner.subscribe_logs().await
    }
}

pub struct BrokenStorage;

#[async_trait]
impl ObjectStorage for BrokenStorage {
    async fn upload(&self, _path: &str, _bytes: Vec<u8>, _mime: &str) -> ServiceResult<()> {
        Err(ServiceError::Storage("bucket not found".to_string()))
    }
}

#[derive(Default)]
pub struct RecordingIngest {
    pub fail: bool,
    pub received: Mutex<Vec<String>>,
}

#[async_trait]
impl KnowledgeIngest for RecordingIngest {
    async fn ingest(&self, filename: &str, _bytes: Vec<u8>, _mime: &str) -> ServiceResult<()> {
        if self.fail {
            return Err(offline());
        }
        self.received.lock().unwrap().push(filename.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<ChatReply>>,
    pub calls: Mutex<Vec<(String, Vec<HistoryTurn>)>>,
    // `(entered, release)`: signals `entered`, then waits on `release`.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl ScriptedChat {
    pub fn replying(texts: &[&str]) -> Self {
        let replies = texts
            .iter()
            .map(|text| ChatReply {
                text: Some(text.to_string()),
                emotion: Some("happy".to_string()),
                tools_used: None,
            })
            .collect();
        Self {
            replies: Mutex::new(replies),
            ..Default::default()
        }
    }

    pub fn gated(mut self, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.gate = Some((entered, release));
        self
    }

    pub fn push(&self, reply: ChatReply) {
        self.replies.lock().unwrap().push_back(reply);
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn reply(&self, message: &str, history: &[HistoryTurn]) -> ServiceResult<ChatReply> {
        self.calls
            .lock()
            .unwrap()
            .push((message.to_string(), history.to_vec()));
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        self.replies.lock().unwrap().pop_front().ok_or_else(offline)
    }
}
