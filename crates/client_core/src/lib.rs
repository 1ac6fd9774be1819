use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::{MediaCategory, ViewerContext},
    error::{DownloadError, MediaError},
};
use storage::MediaStore;
use tokio::sync::broadcast;

pub mod config;
pub mod download_manager;
pub mod preferences;
pub mod presentation;
pub mod presenter;
pub mod url_resolver;

pub use download_manager::HttpDownloadManager;
pub use preferences::AutoDownloadPreferences;
pub use presentation::PresentationState;
pub use presenter::{AttachmentPresenter, MountProps, ShowAttachment};
pub use url_resolver::AttachmentUrlResolver;

/// Turns an attachment link into an absolute, authenticated URL.
pub trait UrlResolver: Send + Sync {
    /// `None` means there is nothing renderable behind `raw_link`.
    fn resolve(&self, raw_link: Option<&str>, viewer: &ViewerContext) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup {
    pub materialized: bool,
    pub local_reference: Option<String>,
}

impl CacheLookup {
    pub fn hit(local_reference: impl Into<String>) -> Self {
        Self {
            materialized: true,
            local_reference: Some(local_reference.into()),
        }
    }

    pub fn miss() -> Self {
        Self {
            materialized: false,
            local_reference: None,
        }
    }
}

/// Answers whether a URL is already materialized locally. Implementations must not write.
#[async_trait]
pub trait MediaCache: Send + Sync {
    async fn check(
        &self,
        category: MediaCategory,
        mime_type: Option<&str>,
        url: &str,
    ) -> Result<CacheLookup, MediaError>;
}

#[async_trait]
impl MediaCache for MediaStore {
    async fn check(
        &self,
        _category: MediaCategory,
        _mime_type: Option<&str>,
        url: &str,
    ) -> Result<CacheLookup, MediaError> {
        if url.trim().is_empty() {
            return Err(MediaError::InvalidUrl(url.to_string()));
        }
        let entry = self
            .lookup(url)
            .await
            .map_err(|err| MediaError::Storage(format!("{err:#}")))?;
        Ok(entry
            .map(|entry| CacheLookup::hit(entry.path.to_string_lossy()))
            .unwrap_or_else(CacheLookup::miss))
    }
}

/// Outcome of a shared download, broadcast to everyone following the URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Completed {
        url: String,
        local_reference: String,
    },
    Failed {
        url: String,
        error: DownloadError,
    },
    Cancelled {
        url: String,
    },
}

impl DownloadEvent {
    pub fn url(&self) -> &str {
        match self {
            Self::Completed { url, .. } | Self::Failed { url, .. } | Self::Cancelled { url } => {
                url
            }
        }
    }
}

/// Fetches remote media into the local cache, at most one transfer per URL.
#[async_trait]
pub trait DownloadManager: Send + Sync {
    fn is_download_in_progress(&self, url: &str) -> bool;

    /// Joins the in-flight transfer for `url` when there is one; every caller gets the same result.
    async fn start_download(
        &self,
        url: &str,
        category: MediaCategory,
        mime_type: Option<&str>,
    ) -> Result<String, DownloadError>;

    /// Best-effort. `is_download_in_progress(url)` is false once this returns.
    fn cancel_download(&self, url: &str);

    fn subscribe(&self) -> broadcast::Receiver<DownloadEvent>;
}

pub trait PreferenceStore: Send + Sync {
    fn is_auto_download_enabled(&self, category: MediaCategory) -> bool;
}

/// Collaborators handed to every presenter of a session.
#[derive(Clone)]
pub struct PresenterDeps {
    pub resolver: Arc<dyn UrlResolver>,
    pub cache: Arc<dyn MediaCache>,
    pub downloads: Arc<dyn DownloadManager>,
    pub preferences: Arc<dyn PreferenceStore>,
}

impl PresenterDeps {
    /// Wires the production collaborators around one media store.
    pub fn from_store(
        store: Arc<MediaStore>,
        downloads: Arc<HttpDownloadManager>,
        preferences: Arc<AutoDownloadPreferences>,
    ) -> Self {
        Self {
            resolver: Arc::new(AttachmentUrlResolver),
            cache: store,
            downloads,
            preferences,
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
