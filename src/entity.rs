mod conversation;
mod knowledge;
mod message;
mod personality;
mod record_id;
mod system_log;

pub use conversation::{
    Conversation, ConversationUpdate, NewConversation, PLACEHOLDER_TITLE, title_from_text,
};
pub use knowledge::{DEFAULT_MIME, FileKind, KnowledgeFile, NewKnowledgeFile};
pub use message::{Message, NewMessage, Role, ToolUsage};
pub use personality::{Percent, PersonalitySettings, SETTINGS_ROW_ID, SettingsPatch, Slider};
pub use record_id::RecordId;
pub use system_log::{LogEntry, LogLevel};
