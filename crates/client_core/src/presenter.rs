use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shared::{
    domain::{Attachment, MediaCategory, UserId, ViewerContext},
    media::is_inline_image,
};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        watch,
    },
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    presentation::{transition, Effect, MissContext, PresentationState, PresenterEvent, Transition},
    DownloadEvent, PresenterDeps,
};

const PRESENTER_CATEGORY: MediaCategory = MediaCategory::Image;

/// Receives the attachment to open full-size, with `title_link` pointing at local content.
pub type ShowAttachment = Arc<dyn Fn(Attachment) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct MountProps {
    pub attachment: Attachment,
    pub author: Option<UserId>,
    /// Reply or quote preview: never fetches on its own and ignores activation.
    pub passive: bool,
    /// Pre-resolved URL used for both display and caching.
    pub image_url_override: Option<String>,
}

impl MountProps {
    pub fn new(attachment: Attachment) -> Self {
        Self {
            attachment,
            ..Self::default()
        }
    }

    pub fn authored_by(mut self, author: impl Into<String>) -> Self {
        self.author = Some(UserId::new(author));
        self
    }

    pub fn as_passive(mut self) -> Self {
        self.passive = true;
        self
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url_override = Some(url.into());
        self
    }
}

/// Headless presenter for one image attachment inside one rendered message.
///
/// Mounting starts an asynchronous cache check; the outcome and every later change is
/// published through [`AttachmentPresenter::subscribe`]. Dropping the presenter unmounts it.
/// Must be mounted and activated from within a Tokio runtime.
pub struct AttachmentPresenter {
    inner: Arc<Inner>,
}

struct Inner {
    deps: PresenterDeps,
    props: MountProps,
    display_url: String,
    fetch_url: String,
    viewer_is_author: bool,
    on_activate: Option<ShowAttachment>,
    state: watch::Sender<PresentationState>,
    control: Mutex<Control>,
}

#[derive(Default)]
struct Control {
    torn_down: bool,
    /// Bumped whenever a new download outcome becomes the one that counts.
    attempt: u64,
    tasks: Vec<JoinHandle<()>>,
}

impl AttachmentPresenter {
    /// Returns `None` when the attachment has nothing renderable.
    pub fn mount(
        deps: PresenterDeps,
        viewer: &ViewerContext,
        props: MountProps,
        on_activate: Option<ShowAttachment>,
    ) -> Option<Self> {
        let override_url = props
            .image_url_override
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        let display_url = match &override_url {
            Some(url) => url.clone(),
            None => deps
                .resolver
                .resolve(props.attachment.image_url.as_deref(), viewer)?,
        };
        let fetch_url = override_url
            .or_else(|| {
                deps.resolver
                    .resolve(props.attachment.preferred_link(), viewer)
            })
            .unwrap_or_else(|| display_url.clone());
        let viewer_is_author = props.author.as_ref() == Some(&viewer.user_id);

        let inline = is_inline_image(&fetch_url);
        let initial = if inline {
            PresentationState::Cached {
                local_reference: fetch_url.clone(),
            }
        } else {
            PresentationState::Loading
        };
        let (state, _) = watch::channel(initial);

        let inner = Arc::new(Inner {
            deps,
            props,
            display_url,
            fetch_url,
            viewer_is_author,
            on_activate,
            state,
            control: Mutex::new(Control::default()),
        });

        if !inline {
            let task = tokio::spawn(Arc::clone(&inner).check_on_mount());
            inner.track(task);
        }
        Some(Self { inner })
    }

    pub fn state(&self) -> PresentationState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PresentationState> {
        self.inner.state.subscribe()
    }

    /// Waits until the state satisfies `condition` and returns that state.
    pub async fn wait_for(
        &self,
        condition: impl FnMut(&PresentationState) -> bool,
    ) -> PresentationState {
        let mut rx = self.subscribe();
        let reached = rx.wait_for(condition).await.map(|state| state.clone());
        reached.unwrap_or_else(|_| self.state())
    }

    /// URL the host renders behind the placeholder.
    pub fn display_url(&self) -> &str {
        &self.inner.display_url
    }

    /// URL checked against the cache and downloaded.
    pub fn fetch_url(&self) -> &str {
        &self.inner.fetch_url
    }

    /// The single user action: download when idle, cancel while downloading,
    /// open the attachment once cached.
    pub fn activate(&self) {
        let inner = &self.inner;
        if inner.props.passive {
            debug!("presenter: ignoring activation of passive preview url={}", inner.fetch_url);
            return;
        }

        let download_in_progress = inner.deps.downloads.is_download_in_progress(&inner.fetch_url);
        match inner.apply(PresenterEvent::Activated { download_in_progress }, None) {
            Some((Effect::StartDownload, attempt)) => inner.spawn_download(attempt),
            Some((Effect::CancelDownload, _)) => {
                inner.deps.downloads.cancel_download(&inner.fetch_url)
            }
            Some((Effect::ShowAttachment { local_reference }, _)) => inner.show(local_reference),
            _ => {}
        }
    }

    /// Stops all background work; no state change is published afterwards.
    pub fn unmount(&self) {
        let mut control = self.inner.control();
        if control.torn_down {
            return;
        }
        control.torn_down = true;
        for task in control.tasks.drain(..) {
            task.abort();
        }
        debug!("presenter: unmounted url={}", self.inner.fetch_url);
    }
}

impl Drop for AttachmentPresenter {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl Inner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mime_type(&self) -> Option<&str> {
        self.props.attachment.image_type.as_deref()
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut control = self.control();
        if control.torn_down {
            task.abort();
            return;
        }
        control.tasks.retain(|task| !task.is_finished());
        control.tasks.push(task);
    }

    /// Runs `event` through the transition function unless the presenter is torn down or
    /// the event belongs to a superseded attempt.
    fn apply(&self, event: PresenterEvent, attempt: Option<u64>) -> Option<(Effect, u64)> {
        let mut control = self.control();
        if control.torn_down {
            return None;
        }
        if attempt.is_some_and(|attempt| attempt != control.attempt) {
            debug!("presenter: dropping stale outcome url={}", self.fetch_url);
            return None;
        }

        let current = self.state.borrow().clone();
        let Transition { state, effect } = transition(&current, event);
        if matches!(
            effect,
            Some(Effect::StartDownload | Effect::FollowInFlight | Effect::CancelDownload)
        ) {
            control.attempt += 1;
        }
        if state != current {
            debug!("presenter: {current:?} -> {state:?} url={}", self.fetch_url);
            self.state.send_replace(state);
        }
        effect.map(|effect| (effect, control.attempt))
    }

    async fn check_on_mount(self: Arc<Self>) {
        match self
            .deps
            .cache
            .check(PRESENTER_CATEGORY, self.mime_type(), &self.fetch_url)
            .await
        {
            Ok(lookup) if lookup.materialized => {
                let local_reference = lookup
                    .local_reference
                    .unwrap_or_else(|| self.fetch_url.clone());
                self.apply(PresenterEvent::CacheHit { local_reference }, None);
                return;
            }
            Ok(_) => {}
            Err(err) => warn!("presenter: cache check failed url={}: {err}", self.fetch_url),
        }

        // Subscribe before asking about in-flight transfers so a completion in between is kept.
        let events = self.deps.downloads.subscribe();
        let miss = MissContext {
            passive: self.props.passive,
            download_in_progress: self.deps.downloads.is_download_in_progress(&self.fetch_url),
            auto_download_enabled: self
                .deps
                .preferences
                .is_auto_download_enabled(PRESENTER_CATEGORY),
            viewer_is_author: self.viewer_is_author,
        };

        // A transfer may have committed between the first lookup and the in-flight check.
        if !miss.passive && !miss.download_in_progress {
            if let Some(local_reference) = self.cached_reference().await {
                self.apply(PresenterEvent::CacheHit { local_reference }, None);
                return;
            }
        }

        match self.apply(PresenterEvent::CacheMiss(miss), None) {
            Some((Effect::StartDownload, attempt)) => self.spawn_download(attempt),
            Some((Effect::FollowInFlight, attempt)) => self.follow_in_flight(events, attempt).await,
            _ => {}
        }
    }

    fn spawn_download(self: &Arc<Self>, attempt: u64) {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = inner
                .deps
                .downloads
                .start_download(&inner.fetch_url, PRESENTER_CATEGORY, inner.mime_type())
                .await;
            let event = match result {
                Ok(local_reference) => PresenterEvent::DownloadSucceeded { local_reference },
                Err(err) => {
                    debug!(
                        "presenter: download did not complete url={} class={}",
                        inner.fetch_url,
                        err.class()
                    );
                    PresenterEvent::DownloadFailed
                }
            };
            inner.apply(event, Some(attempt));
        });
        self.track(task);
    }

    async fn follow_in_flight(&self, mut events: broadcast::Receiver<DownloadEvent>, attempt: u64) {
        debug!("presenter: following in-flight download url={}", self.fetch_url);
        let outcome = loop {
            match events.recv().await {
                Ok(event) if event.url() == self.fetch_url => {
                    break match event {
                        DownloadEvent::Completed {
                            local_reference, ..
                        } => PresenterEvent::DownloadSucceeded { local_reference },
                        DownloadEvent::Failed { .. } | DownloadEvent::Cancelled { .. } => {
                            PresenterEvent::DownloadFailed
                        }
                    };
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("presenter: missed {skipped} download events url={}", self.fetch_url);
                    if self.deps.downloads.is_download_in_progress(&self.fetch_url) {
                        continue;
                    }
                    break self.outcome_from_cache().await;
                }
                Err(RecvError::Closed) => break PresenterEvent::DownloadFailed,
            }
        };
        self.apply(outcome, Some(attempt));
    }

    async fn outcome_from_cache(&self) -> PresenterEvent {
        match self.cached_reference().await {
            Some(local_reference) => PresenterEvent::DownloadSucceeded { local_reference },
            None => PresenterEvent::DownloadFailed,
        }
    }

    async fn cached_reference(&self) -> Option<String> {
        match self
            .deps
            .cache
            .check(PRESENTER_CATEGORY, self.mime_type(), &self.fetch_url)
            .await
        {
            Ok(lookup) if lookup.materialized => Some(
                lookup
                    .local_reference
                    .unwrap_or_else(|| self.fetch_url.clone()),
            ),
            _ => None,
        }
    }

    fn show(&self, local_reference: String) {
        let Some(on_activate) = &self.on_activate else {
            return;
        };
        let attachment = if local_reference == self.fetch_url {
            self.props.attachment.clone()
        } else {
            self.props.attachment.with_local_reference(local_reference)
        };
        on_activate(attachment);
    }
}

#[cfg(test)]
#[path = "tests/presenter_tests.rs"]
mod tests;
