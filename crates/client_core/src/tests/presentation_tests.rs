use super::*;

fn miss(
    passive: bool,
    download_in_progress: bool,
    auto_download_enabled: bool,
    viewer_is_author: bool,
) -> PresenterEvent {
    PresenterEvent::CacheMiss(MissContext {
        passive,
        download_in_progress,
        auto_download_enabled,
        viewer_is_author,
    })
}

fn cached(local: &str) -> PresentationState {
    PresentationState::Cached {
        local_reference: local.to_string(),
    }
}

#[test]
fn cache_hit_at_mount_is_cached_without_effect() {
    let next = transition(
        &PresentationState::Loading,
        PresenterEvent::CacheHit {
            local_reference: "/cache/a.jpg".into(),
        },
    );
    assert_eq!(next.state, cached("/cache/a.jpg"));
    assert_eq!(next.effect, None);
}

#[test]
fn passive_miss_is_idle_whatever_the_preference() {
    for auto in [true, false] {
        for author in [true, false] {
            let next = transition(&PresentationState::Loading, miss(true, false, auto, author));
            assert_eq!(next.state, PresentationState::Idle);
            assert_eq!(next.effect, None);
        }
    }
}

#[test]
fn in_flight_download_is_followed_not_duplicated() {
    let next = transition(&PresentationState::Loading, miss(false, true, true, true));
    assert_eq!(next.state, PresentationState::Loading);
    assert_eq!(next.effect, Some(Effect::FollowInFlight));
}

#[test]
fn auto_download_or_authorship_starts_download() {
    for (auto, author) in [(true, false), (false, true), (true, true)] {
        let next = transition(&PresentationState::Loading, miss(false, false, auto, author));
        assert_eq!(next.state, PresentationState::Loading);
        assert_eq!(next.effect, Some(Effect::StartDownload));
    }
}

#[test]
fn disabled_auto_download_for_non_author_is_idle() {
    let next = transition(&PresentationState::Loading, miss(false, false, false, false));
    assert_eq!(next.state, PresentationState::Idle);
    assert_eq!(next.effect, None);
}

#[test]
fn download_outcomes_only_apply_while_loading() {
    let done = PresenterEvent::DownloadSucceeded {
        local_reference: "/cache/b.jpg".into(),
    };
    assert_eq!(
        transition(&PresentationState::Loading, done.clone()).state,
        cached("/cache/b.jpg")
    );
    assert_eq!(
        transition(&PresentationState::Idle, done).state,
        PresentationState::Idle
    );
    assert_eq!(
        transition(&PresentationState::Loading, PresenterEvent::DownloadFailed).state,
        PresentationState::Idle
    );
    assert_eq!(
        transition(&cached("/c"), PresenterEvent::DownloadFailed).state,
        cached("/c")
    );
}

#[test]
fn activation_toggles_between_idle_and_loading() {
    let start = transition(
        &PresentationState::Idle,
        PresenterEvent::Activated {
            download_in_progress: false,
        },
    );
    assert_eq!(start.state, PresentationState::Loading);
    assert_eq!(start.effect, Some(Effect::StartDownload));

    let cancel = transition(
        &PresentationState::Loading,
        PresenterEvent::Activated {
            download_in_progress: true,
        },
    );
    assert_eq!(cancel.state, PresentationState::Idle);
    assert_eq!(cancel.effect, Some(Effect::CancelDownload));
}

#[test]
fn activation_while_checking_cache_does_nothing() {
    let next = transition(
        &PresentationState::Loading,
        PresenterEvent::Activated {
            download_in_progress: false,
        },
    );
    assert_eq!(next.state, PresentationState::Loading);
    assert_eq!(next.effect, None);
}

#[test]
fn activating_cached_state_only_shows_attachment() {
    let next = transition(
        &cached("/cache/c.jpg"),
        PresenterEvent::Activated {
            download_in_progress: false,
        },
    );
    assert_eq!(next.state, cached("/cache/c.jpg"));
    assert_eq!(
        next.effect,
        Some(Effect::ShowAttachment {
            local_reference: "/cache/c.jpg".into()
        })
    );
}

#[test]
fn late_cache_answers_do_not_override_settled_state() {
    let next = transition(&PresentationState::Idle, miss(false, false, true, false));
    assert_eq!(next.state, PresentationState::Idle);
    assert_eq!(next.effect, None);
}

#[test]
fn state_serializes_with_tag() {
    let json = serde_json::to_string(&cached("/x.jpg")).expect("json");
    assert_eq!(json, r#"{"state":"cached","local_reference":"/x.jpg"}"#);
}
