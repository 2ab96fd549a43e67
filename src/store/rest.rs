use super::realtime::RealtimeChannel;
use super::{LogSubscription, ObjectStorage, Store};
use crate::entity::{
    Conversation, ConversationUpdate, KnowledgeFile, LogEntry, Message, NewConversation,
    NewKnowledgeFile, NewMessage, PersonalitySettings, RecordId, SETTINGS_ROW_ID, SettingsPatch,
};
use crate::error::{ServiceError, ServiceResult, check_status};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

const CONVERSATIONS: &str = "conversations";
const MESSAGES: &str = "messages";
const PERSONALITY: &str = "personality_settings";
const KNOWLEDGE: &str = "knowledge_base";
const SYSTEM_LOGS: &str = "system_logs";
const LOG_CHANNEL: &str = "system-logs";

pub struct SupabaseStore {
    client: Client,
    rest_url: Url,
    storage_url: Url,
    api_key: String,
    bucket: String,
    realtime: RealtimeChannel,
}

impl SupabaseStore {
    pub fn new(url: &str, api_key: &str, bucket: &str, client: Client) -> ServiceResult<Self> {
        let base = Url::parse(url)
            .map_err(|e| ServiceError::Invalid(format!("store url '{}': {}", url, e)))?;
        if base.cannot_be_a_base() {
            return Err(ServiceError::Invalid(format!("store url '{}' cannot be a base", url)));
        }

        let join = |path: &str| {
            base.join(path)
                .map_err(|e| ServiceError::Invalid(format!("store url '{}': {}", url, e)))
        };

        Ok(Self {
            client,
            rest_url: join("rest/v1/")?,
            storage_url: join("storage/v1/object/")?,
            api_key: api_key.to_string(),
            bucket: bucket.to_string(),
            realtime: RealtimeChannel::new(url, api_key)?,
        })
    }

    fn table_url(&self, table: &str) -> ServiceResult<Url> {
        self.rest_url
            .join(table)
            .map_err(|e| ServiceError::Invalid(format!("table '{}': {}", table, e)))
    }

    fn object_url(&self, path: &str) -> ServiceResult<Url> {
        let mut url = self.storage_url.clone();
        url.path_segments_mut()
            .map_err(|_| ServiceError::Invalid("storage url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(&self.bucket)
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn request(&self, method: Method, table: &str) -> ServiceResult<RequestBuilder> {
        Ok(self.authorized(self.client.request(method, self.table_url(table)?)))
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ServiceResult<T> {
        let resp = check_status(builder.send().await?).await?;
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn execute(&self, builder: RequestBuilder) -> ServiceResult<()> {
        check_status(builder.send().await?).await?;
        Ok(())
    }

    async fn insert_returning<B, T>(&self, table: &str, body: &B) -> ServiceResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let builder = self
            .request(Method::POST, table)?
            .header("Prefer", "return=representation")
            .json(body);
        let mut rows: Vec<T> = self.fetch(builder).await?;
        if rows.is_empty() {
            return Err(ServiceError::Payload(format!(
                "insert into {} returned no rows",
                table
            )));
        }
        Ok(rows.swap_remove(0))
    }
}

fn eq(id: &RecordId) -> String {
    format!("eq.{}", id)
}

#[async_trait]
impl Store for SupabaseStore {
    async fn list_conversations(&self) -> ServiceResult<Vec<Conversation>> {
        let builder = self
            .request(Method::GET, CONVERSATIONS)?
            .query(&[("select", "*"), ("order", "updated_at.desc.nullslast")]);
        self.fetch(builder).await
    }

    async fn create_conversation(&self, new: &NewConversation) -> ServiceResult<Conversation> {
        let conversation: Conversation = self.insert_returning(CONVERSATIONS, new).await?;
        debug!("Created conversation {}", conversation.id);
        Ok(conversation)
    }

    async fn update_conversation(
        &self,
        id: &RecordId,
        update: &ConversationUpdate,
    ) -> ServiceResult<()> {
        let builder = self
            .request(Method::PATCH, CONVERSATIONS)?
            .query(&[("id", eq(id))])
            .json(update);
        self.execute(builder).await
    }

    async fn list_messages(&self, conversation_id: &RecordId) -> ServiceResult<Vec<Message>> {
        let builder = self.request(Method::GET, MESSAGES)?.query(&[
            ("select", "*".to_string()),
            ("conversation_id", eq(conversation_id)),
            ("order", "created_at.asc".to_string()),
        ]);
        self.fetch(builder).await
    }

    async fn insert_message(&self, new: &NewMessage) -> ServiceResult<Message> {
        self.insert_returning(MESSAGES, new).await
    }

    async fn personality(&self) -> ServiceResult<PersonalitySettings> {
        let builder = self
            .request(Method::GET, PERSONALITY)?
            .query(&[("select", "*".to_string()), ("id", format!("eq.{}", SETTINGS_ROW_ID))]);
        let mut rows: Vec<PersonalitySettings> = self.fetch(builder).await?;
        if rows.is_empty() {
            return Err(ServiceError::NotFound("personality settings".to_string()));
        }
        Ok(rows.swap_remove(0))
    }

    async fn patch_personality(&self, patch: &SettingsPatch) -> ServiceResult<()> {
        let builder = self
            .request(Method::PATCH, PERSONALITY)?
            .query(&[("id", format!("eq.{}", SETTINGS_ROW_ID))])
            .json(patch);
        self.execute(builder).await
    }

    async fn list_knowledge(&self) -> ServiceResult<Vec<KnowledgeFile>> {
        let builder = self
            .request(Method::GET, KNOWLEDGE)?
            .query(&[("select", "*"), ("order", "created_at.desc")]);
        self.fetch(builder).await
    }

    async fn insert_knowledge(&self, new: &NewKnowledgeFile) -> ServiceResult<KnowledgeFile> {
        self.insert_returning(KNOWLEDGE, new).await
    }

    async fn delete_knowledge(&self, id: &RecordId) -> ServiceResult<()> {
        let builder = self
            .request(Method::DELETE, KNOWLEDGE)?
            .query(&[("id", eq(id))]);
        self.execute(builder).await
    }

    async fn recent_logs(&self, limit: usize) -> ServiceResult<Vec<LogEntry>> {
        let builder = self.request(Method::GET, SYSTEM_LOGS)?.query(&[
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        let mut entries: Vec<LogEntry> = self.fetch(builder).await?;
        entries.reverse();
        Ok(entries)
    }

    async fn subscribe_logs(&self) -> ServiceResult<LogSubscription> {
        self.realtime.subscribe_inserts(LOG_CHANNEL, SYSTEM_LOGS).await
    }
}

#[async_trait]
impl ObjectStorage for SupabaseStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>, mime: &str) -> ServiceResult<()> {
        let url = self.object_url(path)?;
        let builder = self
            .authorized(self.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, mime)
            .body(bytes);
        check_status(builder.send().await?)
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        Ok(())
    }
}
