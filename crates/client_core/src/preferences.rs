use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use anyhow::Result;
use shared::domain::{AutoDownloadPolicy, MediaCategory, NetworkKind};
use storage::MediaStore;
use tracing::info;

use crate::{config::Settings, PreferenceStore};

/// Per-category auto-download policies evaluated against the current network.
pub struct AutoDownloadPreferences {
    policies: RwLock<HashMap<MediaCategory, AutoDownloadPolicy>>,
    network: RwLock<NetworkKind>,
}

impl Default for AutoDownloadPreferences {
    fn default() -> Self {
        Self::new(
            [
                (MediaCategory::Image, AutoDownloadPolicy::WifiMobileData),
                (MediaCategory::Video, AutoDownloadPolicy::Wifi),
                (MediaCategory::Audio, AutoDownloadPolicy::Wifi),
            ],
            NetworkKind::Wifi,
        )
    }
}

impl AutoDownloadPreferences {
    pub fn new(
        policies: impl IntoIterator<Item = (MediaCategory, AutoDownloadPolicy)>,
        network: NetworkKind,
    ) -> Self {
        Self {
            policies: RwLock::new(policies.into_iter().collect()),
            network: RwLock::new(network),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            [
                (MediaCategory::Image, settings.images_policy),
                (MediaCategory::Video, settings.video_policy),
                (MediaCategory::Audio, settings.audio_policy),
            ],
            settings.network,
        )
    }

    pub fn policy(&self, category: MediaCategory) -> AutoDownloadPolicy {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .copied()
            .unwrap_or(AutoDownloadPolicy::Never)
    }

    pub fn set_policy(&self, category: MediaCategory, policy: AutoDownloadPolicy) {
        self.policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(category, policy);
    }

    pub fn network(&self) -> NetworkKind {
        *self.network.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_network(&self, network: NetworkKind) {
        *self.network.write().unwrap_or_else(PoisonError::into_inner) = network;
    }

    /// Overlays policies persisted in `store` on top of the current ones.
    pub async fn hydrate(&self, store: &MediaStore) -> Result<()> {
        let persisted = store.load_download_policies().await?;
        for (category, policy) in persisted {
            self.set_policy(category, policy);
        }
        Ok(())
    }

    pub async fn persist(
        &self,
        store: &MediaStore,
        category: MediaCategory,
        policy: AutoDownloadPolicy,
    ) -> Result<()> {
        store.save_download_policy(category, policy).await?;
        self.set_policy(category, policy);
        info!(
            "preferences: {}={policy}",
            category.preference_key()
        );
        Ok(())
    }
}

impl PreferenceStore for AutoDownloadPreferences {
    fn is_auto_download_enabled(&self, category: MediaCategory) -> bool {
        self.policy(category).allows(self.network())
    }
}

#[cfg(test)]
#[path = "tests/preferences_tests.rs"]
mod tests;
