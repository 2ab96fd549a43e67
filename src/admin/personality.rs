use crate::entity::{PersonalitySettings, SettingsPatch};
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

pub struct PersonalityEditor {
    store: Arc<dyn Store>,
    settings: RwLock<Option<PersonalitySettings>>,
}

impl PersonalityEditor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            settings: RwLock::new(None),
        }
    }

    pub async fn settings(&self) -> Option<PersonalitySettings> {
        self.settings.read().await.clone()
    }

    pub async fn load(&self) {
        match self.store.personality().await {
            Ok(settings) => *self.settings.write().await = Some(settings),
            Err(e) => error!("Failed to load personality settings: {}", e),
        }
    }

    pub async fn update(&self, patch: SettingsPatch) {
        if patch.is_empty() {
            return;
        }

        match self.settings.write().await.as_mut() {
            Some(settings) => settings.apply(&patch, Utc::now()),
            None => warn!("Personality settings not loaded, sending patch without local copy"),
        }

        match self.store.patch_personality(&patch).await {
            Ok(()) => info!("Personality settings saved"),
            Err(e) => warn!("Failed to save personality settings: {}", e),
        }
    }
}
