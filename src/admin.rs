mod knowledge;
mod logs;
mod personality;

pub use knowledge::KnowledgeManager;
pub use logs::LogTail;
pub use personality::PersonalityEditor;
