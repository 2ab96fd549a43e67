use crate::chat::KnowledgeIngest;
use crate::entity::{DEFAULT_MIME, KnowledgeFile, NewKnowledgeFile, RecordId};
use crate::error::{ServiceError, ServiceResult};
use crate::store::{ObjectStorage, Store};
use crate::utils::sanitize_filename;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

const STORAGE_PREFIX: &str = "knowledge";

pub struct KnowledgeManager {
    store: Arc<dyn Store>,
    storage: Arc<dyn ObjectStorage>,
    ingest: Arc<dyn KnowledgeIngest>,
    files: RwLock<Vec<KnowledgeFile>>,
}

impl KnowledgeManager {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStorage>,
        ingest: Arc<dyn KnowledgeIngest>,
    ) -> Self {
        Self {
            store,
            storage,
            ingest,
            files: RwLock::new(Vec::new()),
        }
    }

    pub async fn files(&self) -> Vec<KnowledgeFile> {
        self.files.read().await.clone()
    }

    pub async fn load(&self) {
        match self.store.list_knowledge().await {
            Ok(files) => *self.files.write().await = files,
            Err(e) => error!("Failed to load knowledge files: {}", e),
        }
    }

    pub async fn upload(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        mime: &str,
    ) -> ServiceResult<KnowledgeFile> {
        let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };
        let storage_path = format!(
            "{}/{}_{}",
            STORAGE_PREFIX,
            Utc::now().timestamp_millis(),
            sanitize_filename(filename)
        );

        if let Err(e) = self
            .storage
            .upload(&storage_path, bytes.clone(), mime)
            .await
        {
            warn!("Storage upload skipped for {}: {}", filename, e);
        }

        let new = NewKnowledgeFile {
            filename: filename.to_string(),
            size_bytes: bytes.len() as i64,
            mime_type: mime.to_string(),
            storage_path,
        };
        let file = match self.store.insert_knowledge(&new).await {
            Ok(file) => file,
            Err(e) => {
                error!("Upload of {} failed: {}", filename, e);
                return Err(e);
            }
        };
        self.files.write().await.insert(0, file.clone());
        info!("Uploaded {} ({} bytes)", filename, new.size_bytes);

        if let Err(e) = self.ingest.ingest(filename, bytes, mime).await {
            warn!("Failed to forward {} to the knowledge index: {}", filename, e);
        }

        Ok(file)
    }

    pub async fn upload_path(&self, path: &Path) -> ServiceResult<KnowledgeFile> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ServiceError::Invalid(format!("no file name in {}", path.display())))?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        let mime = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(DEFAULT_MIME);
        self.upload(&filename, bytes, mime).await
    }

    pub async fn delete(&self, id: &RecordId) -> ServiceResult<()> {
        if let Err(e) = self.store.delete_knowledge(id).await {
            warn!("Failed to delete knowledge file {}: {}", id, e);
            return Err(e);
        }
        self.files.write().await.retain(|f| &f.id != id);
        info!("Deleted knowledge file {}", id);
        Ok(())
    }
}
