//! Presentation state of one mounted attachment and its transition function.
//!
//! The transition function is pure: it decides the next state and which side effect the
//! presenter must run, but runs nothing itself.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PresentationState {
    /// Fetch in flight, or the mount-time cache check has not answered yet.
    Loading,
    /// Neither cached nor loading; waits for the user.
    Idle,
    Cached { local_reference: String },
}

impl PresentationState {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn local_reference(&self) -> Option<&str> {
        match self {
            Self::Cached { local_reference } => Some(local_reference),
            _ => None,
        }
    }
}

/// What the presenter knew when the mount-time cache check missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MissContext {
    pub passive: bool,
    pub download_in_progress: bool,
    pub auto_download_enabled: bool,
    pub viewer_is_author: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenterEvent {
    CacheHit { local_reference: String },
    CacheMiss(MissContext),
    DownloadSucceeded { local_reference: String },
    DownloadFailed,
    Activated { download_in_progress: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartDownload,
    /// Another presenter owns the transfer; wait for its outcome.
    FollowInFlight,
    CancelDownload,
    ShowAttachment { local_reference: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: PresentationState,
    pub effect: Option<Effect>,
}

impl Transition {
    fn to(state: PresentationState) -> Self {
        Self {
            state,
            effect: None,
        }
    }

    fn with(state: PresentationState, effect: Effect) -> Self {
        Self {
            state,
            effect: Some(effect),
        }
    }
}

pub fn transition(current: &PresentationState, event: PresenterEvent) -> Transition {
    use PresentationState::{Cached, Idle, Loading};

    match (current, event) {
        (Loading, PresenterEvent::CacheHit { local_reference }) => {
            Transition::to(Cached { local_reference })
        }
        (Loading, PresenterEvent::CacheMiss(miss)) => {
            if miss.passive {
                Transition::to(Idle)
            } else if miss.download_in_progress {
                Transition::with(Loading, Effect::FollowInFlight)
            } else if miss.auto_download_enabled || miss.viewer_is_author {
                Transition::with(Loading, Effect::StartDownload)
            } else {
                Transition::to(Idle)
            }
        }
        (Loading, PresenterEvent::DownloadSucceeded { local_reference }) => {
            Transition::to(Cached { local_reference })
        }
        (Loading, PresenterEvent::DownloadFailed) => Transition::to(Idle),
        (Idle, PresenterEvent::Activated { .. }) => {
            Transition::with(Loading, Effect::StartDownload)
        }
        (
            Loading,
            PresenterEvent::Activated {
                download_in_progress: true,
            },
        ) => Transition::with(Idle, Effect::CancelDownload),
        (Cached { local_reference }, PresenterEvent::Activated { .. }) => Transition::with(
            current.clone(),
            Effect::ShowAttachment {
                local_reference: local_reference.clone(),
            },
        ),
        (state, _) => Transition::to(state.clone()),
    }
}

#[cfg(test)]
#[path = "tests/presentation_tests.rs"]
mod tests;
