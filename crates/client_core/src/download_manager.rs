use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use reqwest::Client;
use shared::{domain::MediaCategory, error::DownloadError};
use storage::MediaStore;
use tokio::{
    io::AsyncWriteExt,
    sync::{broadcast, Notify},
};
use tracing::{debug, info, warn};

use crate::{DownloadEvent, DownloadManager};

type SharedDownload = Shared<BoxFuture<'static, Result<String, DownloadError>>>;

struct InFlight {
    id: u64,
    result: SharedDownload,
    cancel: Arc<Notify>,
}

/// Downloads media over HTTP into a [`MediaStore`], sharing one transfer per URL.
///
/// Transfers run on their own tasks, so dropping a caller's future does not stop the
/// download; only [`DownloadManager::cancel_download`] does.
pub struct HttpDownloadManager {
    http: Client,
    store: Arc<MediaStore>,
    max_bytes: Option<u64>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
    next_id: AtomicU64,
    events: broadcast::Sender<DownloadEvent>,
}

impl HttpDownloadManager {
    pub fn new(store: Arc<MediaStore>) -> Arc<Self> {
        Self::new_with_options(store, Client::new(), None)
    }

    pub fn new_with_options(
        store: Arc<MediaStore>,
        http: Client,
        max_bytes: Option<u64>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            http,
            store,
            max_bytes,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            events,
        })
    }

    pub fn active_downloads(&self) -> usize {
        lock(&self.in_flight).len()
    }

    fn spawn_transfer(
        &self,
        url: &str,
        category: MediaCategory,
        mime_type: Option<&str>,
    ) -> InFlight {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(Notify::new());
        let transfer = Transfer {
            http: self.http.clone(),
            store: Arc::clone(&self.store),
            url: url.to_string(),
            category,
            mime_type: mime_type.map(str::to_string),
            max_bytes: self.max_bytes,
        };
        let release = InFlightRelease {
            in_flight: Arc::clone(&self.in_flight),
            url: url.to_string(),
            id,
        };
        let events = self.events.clone();
        let task_cancel = Arc::clone(&cancel);

        let handle = tokio::spawn(async move {
            let url = transfer.url.clone();
            let result = transfer.run(&task_cancel).await;
            drop(release);

            match &result {
                Ok(local_reference) => {
                    let _ = events.send(DownloadEvent::Completed {
                        url,
                        local_reference: local_reference.clone(),
                    });
                }
                Err(error) if error.is_cancelled() => {
                    debug!("download: transfer stopped after cancel url={url}");
                }
                Err(error) => {
                    warn!("download: failed url={url} class={} error={error}", error.class());
                    let _ = events.send(DownloadEvent::Failed {
                        url,
                        error: error.clone(),
                    });
                }
            }
            result
        });

        let result = async move {
            handle.await.unwrap_or_else(|err| {
                Err(DownloadError::network(format!("download task failed: {err}")))
            })
        }
        .boxed()
        .shared();

        InFlight { id, result, cancel }
    }
}

#[async_trait]
impl DownloadManager for HttpDownloadManager {
    fn is_download_in_progress(&self, url: &str) -> bool {
        lock(&self.in_flight).contains_key(url)
    }

    async fn start_download(
        &self,
        url: &str,
        category: MediaCategory,
        mime_type: Option<&str>,
    ) -> Result<String, DownloadError> {
        let result = {
            let mut guard = lock(&self.in_flight);
            match guard.get(url) {
                Some(existing) => {
                    debug!("download: joining in-flight transfer url={url}");
                    existing.result.clone()
                }
                None => {
                    info!("download: starting url={url} category={category}");
                    let entry = self.spawn_transfer(url, category, mime_type);
                    let result = entry.result.clone();
                    guard.insert(url.to_string(), entry);
                    result
                }
            }
        };
        result.await
    }

    fn cancel_download(&self, url: &str) {
        let Some(entry) = lock(&self.in_flight).remove(url) else {
            return;
        };
        entry.cancel.notify_one();
        info!("download: cancelled url={url}");
        let _ = self.events.send(DownloadEvent::Cancelled {
            url: url.to_string(),
        });
    }

    fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }
}

/// Drops the map entry of one transfer when its task ends, even by panic or abort.
/// A newer transfer registered under the same URL is left alone.
struct InFlightRelease {
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
    url: String,
    id: u64,
}

impl Drop for InFlightRelease {
    fn drop(&mut self) {
        let mut guard = lock(&self.in_flight);
        if guard.get(&self.url).is_some_and(|entry| entry.id == self.id) {
            guard.remove(&self.url);
        }
    }
}

struct Transfer {
    http: Client,
    store: Arc<MediaStore>,
    url: String,
    category: MediaCategory,
    mime_type: Option<String>,
    max_bytes: Option<u64>,
}

impl Transfer {
    async fn run(&self, cancel: &Notify) -> Result<String, DownloadError> {
        let reservation = self
            .store
            .reserve(&self.url, self.category, self.mime_type.as_deref())
            .await
            .map_err(|err| DownloadError::storage(format!("{err:#}")))?;

        // A cancel issued before this point leaves a stored permit, so it still wins here.
        let body = tokio::select! {
            written = self.write_body(&reservation.temp_path) => written,
            _ = cancel.notified() => Err(DownloadError::Cancelled),
        };
        let written = match body {
            Ok(written) => written,
            Err(err) => {
                self.discard(&reservation).await;
                return Err(err);
            }
        };

        match self.store.commit(&reservation).await {
            Ok(entry) => {
                debug!("download: finished url={} bytes={written}", self.url);
                Ok(entry.path.to_string_lossy().to_string())
            }
            Err(err) => {
                self.discard(&reservation).await;
                Err(DownloadError::storage(format!("{err:#}")))
            }
        }
    }

    async fn write_body(&self, temp_path: &Path) -> Result<u64, DownloadError> {
        let mut response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|err| DownloadError::network(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(temp_path)
            .await
            .map_err(|err| DownloadError::storage(err.to_string()))?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| DownloadError::network(err.to_string()))?
        {
            written += chunk.len() as u64;
            if let Some(limit) = self.max_bytes {
                if written > limit {
                    return Err(DownloadError::TooLarge { limit });
                }
            }
            file.write_all(&chunk)
                .await
                .map_err(|err| DownloadError::storage(err.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|err| DownloadError::storage(err.to_string()))?;

        if written == 0 {
            return Err(DownloadError::Empty);
        }
        Ok(written)
    }

    async fn discard(&self, reservation: &storage::Reservation) {
        if let Err(err) = self.store.discard(reservation).await {
            warn!("download: could not remove partial file url={}: {err:#}", self.url);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/download_manager_tests.rs"]
mod tests;
