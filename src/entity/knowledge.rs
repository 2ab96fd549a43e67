use super::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeFile {
    pub id: RecordId,
    pub filename: String,
    #[serde(default)]
    pub size_bytes: Option<i64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub storage_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeFile {
    pub fn kind(&self) -> FileKind {
        FileKind::from_mime(self.mime_type.as_deref().unwrap_or(DEFAULT_MIME))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewKnowledgeFile {
    pub filename: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub storage_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Archive,
    Table,
    Other,
}

impl FileKind {
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.to_ascii_lowercase();
        if mime.contains("pdf") {
            FileKind::Pdf
        } else if mime.contains("zip") || mime.contains("compressed") {
            FileKind::Archive
        } else if mime.contains("csv") || mime.contains("spreadsheet") {
            FileKind::Table
        } else {
            FileKind::Other
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Archive => "archive",
            FileKind::Table => "table",
            FileKind::Other => "file",
        }
    }
}
