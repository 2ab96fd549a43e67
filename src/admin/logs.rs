use crate::entity::LogEntry;
use crate::error::ServiceResult;
use crate::store::{LogSubscription, Store};
use std::sync::Arc;
use tracing::{error, info};

pub struct LogTail {
    store: Arc<dyn Store>,
    window: usize,
    entries: Vec<LogEntry>,
    subscription: Option<LogSubscription>,
}

impl LogTail {
    pub fn new(store: Arc<dyn Store>, window: usize) -> Self {
        Self {
            store,
            window,
            entries: Vec::new(),
            subscription: None,
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn is_following(&self) -> bool {
        self.subscription.is_some()
    }

    pub async fn load(&mut self) {
        match self.store.recent_logs(self.window).await {
            Ok(entries) => self.entries = entries,
            Err(e) => error!("Failed to load system logs: {}", e),
        }
    }

    pub async fn follow(&mut self) -> ServiceResult<()> {
        if self.subscription.is_none() {
            self.subscription = Some(self.store.subscribe_logs().await?);
            info!("Following system logs");
        }
        Ok(())
    }

    pub fn unfollow(&mut self) {
        if self.subscription.take().is_some() {
            info!("Stopped following system logs");
        }
    }

    pub async fn next(&mut self) -> Option<&LogEntry> {
        let subscription = self.subscription.as_mut()?;
        match subscription.next().await {
            Some(entry) => {
                self.entries.push(entry);
                self.entries.last()
            }
            None => {
                info!("System log feed ended");
                self.subscription = None;
                None
            }
        }
    }
}
