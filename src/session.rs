use crate::chat::{ChatBackend, HistoryTurn};
use crate::entity::{
    Conversation, ConversationUpdate, Message, NewConversation, NewMessage, PLACEHOLDER_TITLE,
    RecordId, title_from_text,
};
use crate::store::Store;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const FALLBACK_REPLY: &str = "Hmm, my connection to the other side seems shaky right now~ Try again?";
const FALLBACK_EMOTION: &str = "dizzy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Ignored,
    Busy,
    Abandoned,
    Replied,
    Fallback,
}

#[derive(Default)]
struct SessionState {
    active: Option<RecordId>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
}

pub struct ChatSession {
    store: Arc<dyn Store>,
    chat: Arc<dyn ChatBackend>,
    state: Mutex<SessionState>,
    sending: AtomicBool,
}

struct SendGuard<'a>(&'a AtomicBool);

impl<'a> SendGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ChatSession {
    pub fn new(store: Arc<dyn Store>, chat: Arc<dyn ChatBackend>) -> Self {
        Self {
            store,
            chat,
            state: Mutex::new(SessionState::default()),
            sending: AtomicBool::new(false),
        }
    }

    pub async fn active_id(&self) -> Option<RecordId> {
        self.state.lock().await.active.clone()
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.lock().await.conversations.clone()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.clone()
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    pub async fn load_conversations(&self) {
        match self.store.list_conversations().await {
            Ok(conversations) => {
                info!("Loaded {} conversations", conversations.len());
                self.state.lock().await.conversations = conversations;
            }
            Err(e) => error!("Failed to load conversations: {}", e),
        }
    }

    pub async fn select_conversation(&self, id: Option<RecordId>) {
        {
            let mut state = self.state.lock().await;
            state.active = id.clone();
            state.messages.clear();
        }
        let Some(id) = id else {
            return;
        };

        match self.store.list_messages(&id).await {
            Ok(messages) => {
                let mut state = self.state.lock().await;
                if state.active.as_ref() == Some(&id) {
                    state.messages = messages;
                } else {
                    info!("Discarding messages of {}, no longer active", id);
                }
            }
            Err(e) => error!("Failed to load messages for {}: {}", id, e),
        }
    }

    pub async fn start_new_conversation(&self) -> Option<RecordId> {
        let new = NewConversation {
            title: PLACEHOLDER_TITLE.to_string(),
        };
        match self.store.create_conversation(&new).await {
            Ok(conversation) => {
                let id = conversation.id.clone();
                let mut state = self.state.lock().await;
                state.conversations.insert(0, conversation);
                state.active = Some(id.clone());
                state.messages.clear();
                Some(id)
            }
            Err(e) => {
                error!("Failed to create conversation: {}", e);
                None
            }
        }
    }

    pub async fn send_message(&self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Ignored;
        }
        let Some(_guard) = SendGuard::acquire(&self.sending) else {
            return SendOutcome::Busy;
        };

        let (active, prior) = {
            let state = self.state.lock().await;
            (state.active.clone(), state.messages.clone())
        };

        let conversation_id = match active {
            Some(id) => id,
            None => {
                let new = NewConversation {
                    title: title_from_text(text),
                };
                match self.store.create_conversation(&new).await {
                    Ok(conversation) => {
                        let id = conversation.id.clone();
                        let mut state = self.state.lock().await;
                        state.conversations.insert(0, conversation);
                        state.active = Some(id.clone());
                        state.messages.clear();
                        id
                    }
                    Err(e) => {
                        error!("Abandoning send, conversation could not be created: {}", e);
                        return SendOutcome::Abandoned;
                    }
                }
            }
        };

        match self
            .store
            .insert_message(&NewMessage::user(conversation_id.clone(), text))
            .await
        {
            Ok(message) => self.append(message).await,
            Err(e) => warn!("Failed to persist user message: {}", e),
        }

        let history: Vec<HistoryTurn> = prior.iter().map(HistoryTurn::from).collect();
        let outcome = match self.chat.reply(text, &history).await {
            Ok(reply) => {
                let new = NewMessage::assistant(conversation_id.clone(), reply.text(), reply.emotion());
                match self.store.insert_message(&new).await {
                    Ok(mut message) => {
                        message.tools_used = reply.tools();
                        self.append(message).await;
                    }
                    Err(e) => warn!("Failed to persist reply: {}", e),
                }
                SendOutcome::Replied
            }
            Err(e) => {
                error!("Chat request failed: {}", e);
                let new = NewMessage::assistant(conversation_id.clone(), FALLBACK_REPLY, FALLBACK_EMOTION);
                let message = match self.store.insert_message(&new).await {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Failed to persist fallback reply: {}", e);
                        Message::local(new)
                    }
                };
                self.append(message).await;
                SendOutcome::Fallback
            }
        };

        if prior.is_empty() {
            let update = ConversationUpdate {
                title: title_from_text(text),
                updated_at: Utc::now(),
            };
            if let Err(e) = self.store.update_conversation(&conversation_id, &update).await {
                warn!("Failed to refresh conversation title: {}", e);
            }
            self.load_conversations().await;
        }

        outcome
    }

    async fn append(&self, message: Message) {
        let mut state = self.state.lock().await;
        if state.active.as_ref() == Some(&message.conversation_id) {
            state.messages.push(message);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBucket {
    Today,
    Yesterday,
    Older,
}

impl DateBucket {
    pub fn label(self) -> &'static str {
        match self {
            DateBucket::Today => "Today",
            DateBucket::Yesterday => "Yesterday",
            DateBucket::Older => "Older",
        }
    }

    fn of<Tz: TimeZone>(ts: DateTime<Utc>, today: NaiveDate, tz: &Tz) -> Self {
        let day = ts.with_timezone(tz).date_naive();
        let yesterday = today.pred_opt().unwrap_or(NaiveDate::MIN);
        if day >= today {
            DateBucket::Today
        } else if day >= yesterday {
            DateBucket::Yesterday
        } else {
            DateBucket::Older
        }
    }
}

#[derive(Debug)]
pub struct DateGroup<'a> {
    pub bucket: DateBucket,
    pub conversations: Vec<&'a Conversation>,
}

// Buckets come out in order of first appearance; members keep list order.
pub fn group_by_date<'a, Tz: TimeZone>(
    conversations: &'a [Conversation],
    now: DateTime<Utc>,
    tz: &Tz,
) -> Vec<DateGroup<'a>> {
    let today = now.with_timezone(tz).date_naive();
    let mut groups: Vec<DateGroup<'a>> = Vec::new();

    for conversation in conversations {
        let bucket = DateBucket::of(conversation.last_activity(), today, tz);
        match groups.iter_mut().find(|g| g.bucket == bucket) {
            Some(group) => group.conversations.push(conversation),
            None => groups.push(DateGroup {
                bucket,
                conversations: vec![conversation],
            }),
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatReply;
    use crate::entity::{Role, ToolUsage};
    use crate::store::MemoryStore;
    use crate::testing::{FaultyStore, Faults, ScriptedChat};
    use chrono::Duration;
    use serde_json::json;
    use tokio::sync::Notify;

    fn session(store: Arc<dyn Store>, chat: Arc<ScriptedChat>) -> ChatSession {
        ChatSession::new(store, chat)
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let chat = Arc::new(ScriptedChat::default());
        let session = session(Arc::new(MemoryStore::new()), chat.clone());
        assert_eq!(session.send_message("   ").await, SendOutcome::Ignored);
        assert!(chat.calls.lock().unwrap().is_empty());
        assert!(session.active_id().await.is_none());
    }

    #[tokio::test]
    async fn first_send_creates_conversation_and_appends_in_order() {
        let chat = Arc::new(ScriptedChat::replying(&["Hi!", "Fine, thanks."]));
        let session = session(Arc::new(MemoryStore::new()), chat.clone());

        assert_eq!(session.send_message("Hello").await, SendOutcome::Replied);
        assert_eq!(session.send_message("How are you?").await, SendOutcome::Replied);

        let messages = session.messages().await;
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["Hello", "Hi!", "How are you?", "Fine, thanks."]);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].emotion.as_deref(), Some("happy"));

        let conversations = session.conversations().await;
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].title, "Hello");
        assert_eq!(session.active_id().await, Some(conversations[0].id.clone()));
    }

    #[tokio::test]
    async fn history_is_the_feed_before_the_send() {
        let chat = Arc::new(ScriptedChat::replying(&["one", "two"]));
        let session = session(Arc::new(MemoryStore::new()), chat.clone());

        session.send_message("first").await;
        session.send_message("second").await;

        let calls = chat.calls.lock().unwrap();
        assert!(calls[0].1.is_empty());
        assert_eq!(calls[1].0, "second");
        assert_eq!(
            calls[1].1,
            vec![
                HistoryTurn { role: "user", content: "first".to_string() },
                HistoryTurn { role: "assistant", content: "one".to_string() },
            ]
        );
    }

    #[tokio::test]
    async fn failed_chat_appends_dizzy_fallback() {
        let chat = Arc::new(ScriptedChat::default());
        let session = session(Arc::new(MemoryStore::new()), chat);

        assert_eq!(session.send_message("ping").await, SendOutcome::Fallback);

        let messages = session.messages().await;
        let last = messages.last().unwrap();
        assert_eq!(last.content, FALLBACK_REPLY);
        assert_eq!(last.emotion.as_deref(), Some("dizzy"));
        assert!(!last.id.is_local());
        assert!(!session.is_sending());
    }

    #[tokio::test]
    async fn fallback_survives_a_failing_store() {
        let store = Arc::new(FaultyStore::with(Faults {
            assistant_messages: true,
            ..Default::default()
        }));
        let session = session(store, Arc::new(ScriptedChat::default()));

        assert_eq!(session.send_message("ping").await, SendOutcome::Fallback);

        let messages = session.messages().await;
        assert_eq!(messages.len(), 2);
        assert!(messages[1].id.is_local());
        assert_eq!(messages[1].content, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn second_send_while_pending_is_busy() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let chat = Arc::new(
            ScriptedChat::replying(&["done"]).gated(entered.clone(), release.clone()),
        );
        let session = Arc::new(session(Arc::new(MemoryStore::new()), chat.clone()));

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.send_message("slow").await })
        };
        entered.notified().await;

        assert!(session.is_sending());
        assert_eq!(session.send_message("eager").await, SendOutcome::Busy);

        release.notify_one();
        assert_eq!(pending.await.unwrap(), SendOutcome::Replied);
        assert!(!session.is_sending());
        assert_eq!(chat.calls.lock().unwrap().len(), 1);
        assert_eq!(session.messages().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_conversation_create_abandons_send() {
        let store = Arc::new(FaultyStore::with(Faults {
            create_conversation: true,
            ..Default::default()
        }));
        let chat = Arc::new(ScriptedChat::replying(&["unused"]));
        let session = session(store, chat.clone());

        assert_eq!(session.send_message("hello").await, SendOutcome::Abandoned);
        assert!(session.messages().await.is_empty());
        assert!(chat.calls.lock().unwrap().is_empty());
        assert!(!session.is_sending());
    }

    #[tokio::test]
    async fn lost_user_message_does_not_stop_the_turn() {
        let store = Arc::new(FaultyStore::with(Faults {
            user_messages: true,
            ..Default::default()
        }));
        let session = session(store, Arc::new(ScriptedChat::replying(&["still here"])));

        assert_eq!(session.send_message("hello").await, SendOutcome::Replied);
        let messages = session.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "still here");
    }

    #[tokio::test]
    async fn reported_tools_are_attached_locally() {
        let chat = Arc::new(ScriptedChat::default());
        chat.push(ChatReply {
            text: Some("Looked it up.".to_string()),
            emotion: None,
            tools_used: Some(vec![ToolUsage {
                name: "web_search".to_string(),
                arguments: json!({ "q": "rust" }),
            }]),
        });
        let session = session(Arc::new(MemoryStore::new()), chat);

        session.send_message("search rust").await;
        let reply = session.messages().await.pop().unwrap();
        assert_eq!(reply.emotion.as_deref(), Some("neutral"));
        assert_eq!(reply.tools()[0].name, "web_search");
    }

    #[tokio::test]
    async fn new_chat_gets_titled_by_first_message() {
        let store = Arc::new(MemoryStore::new());
        let session = session(store.clone(), Arc::new(ScriptedChat::replying(&["ok"])));

        let id = session.start_new_conversation().await.unwrap();
        assert_eq!(session.conversations().await[0].title, PLACEHOLDER_TITLE);

        session.send_message("Plan my trip to Busan").await;
        let conversations = session.conversations().await;
        assert_eq!(conversations[0].id, id);
        assert_eq!(conversations[0].title, "Plan my trip to Busan");
    }

    #[tokio::test]
    async fn selecting_loads_messages_and_none_clears() {
        let store = Arc::new(MemoryStore::new());
        let session = session(store.clone(), Arc::new(ScriptedChat::replying(&["a", "b"])));

        session.send_message("first chat").await;
        let first = session.active_id().await.unwrap();
        session.start_new_conversation().await;
        assert!(session.messages().await.is_empty());

        session.select_conversation(Some(first.clone())).await;
        assert_eq!(session.messages().await.len(), 2);

        session.select_conversation(None).await;
        assert!(session.active_id().await.is_none());
        assert!(session.messages().await.is_empty());
    }

    fn conversation(id: &str, updated_at: DateTime<Utc>) -> Conversation {
        Conversation {
            id: RecordId::from(id),
            title: id.to_string(),
            created_at: updated_at - Duration::days(30),
            updated_at: Some(updated_at),
        }
    }

    #[test]
    fn groups_by_local_day_in_first_appearance_order() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).unwrap();
        let list = vec![
            conversation("today", Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap()),
            conversation("yesterday", Utc.with_ymd_and_hms(2025, 3, 9, 9, 0, 0).unwrap()),
            conversation("old", now - Duration::days(3)),
            conversation("also-today", Utc.with_ymd_and_hms(2025, 3, 10, 0, 30, 0).unwrap()),
        ];

        let groups = group_by_date(&list, now, &Utc);
        let shape: Vec<(DateBucket, Vec<&str>)> = groups
            .iter()
            .map(|g| (g.bucket, g.conversations.iter().map(|c| c.id.as_str()).collect()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (DateBucket::Today, vec!["today", "also-today"]),
                (DateBucket::Yesterday, vec!["yesterday"]),
                (DateBucket::Older, vec!["old"]),
            ]
        );
    }

    #[test]
    fn day_boundary_follows_display_zone() {
        // 16:30 UTC on the 9th is already the 10th in Seoul.
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 1, 0, 0).unwrap();
        let list = vec![conversation("late", Utc.with_ymd_and_hms(2025, 3, 9, 16, 30, 0).unwrap())];

        assert_eq!(group_by_date(&list, now, &Utc)[0].bucket, DateBucket::Yesterday);
        assert_eq!(
            group_by_date(&list, now, &chrono_tz::Asia::Seoul)[0].bucket,
            DateBucket::Today
        );
    }

    #[test]
    fn missing_updated_at_falls_back_to_created_at() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).unwrap();
        let list = vec![Conversation {
            id: RecordId::from("fresh"),
            title: PLACEHOLDER_TITLE.to_string(),
            created_at: now - Duration::hours(1),
            updated_at: None,
        }];
        assert_eq!(group_by_date(&list, now, &Utc)[0].bucket, DateBucket::Today);
    }
}
