use super::*;

use std::{
    convert::Infallible,
    path::PathBuf,
    sync::atomic::AtomicUsize,
    time::Duration,
};

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::StreamExt;
use tokio::net::TcpListener;

use crate::MediaCache;

#[derive(Clone, Default)]
struct ServerState {
    hits: Arc<AtomicUsize>,
}

async fn slow_image(State(state): State<ServerState>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;
    (StatusCode::OK, b"fake-png-bytes".to_vec())
}

async fn missing() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}

async fn empty() -> impl IntoResponse {
    StatusCode::OK
}

async fn large() -> impl IntoResponse {
    vec![7u8; 4096]
}

async fn stalled() -> impl IntoResponse {
    let first = futures::stream::once(async { Ok::<_, Infallible>(Bytes::from_static(b"head")) });
    Body::from_stream(first.chain(futures::stream::pending()))
}

async fn spawn_media_server() -> (String, ServerState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = ServerState::default();
    let app = Router::new()
        .route("/file-upload/slow.png", get(slow_image))
        .route("/file-upload/missing.png", get(missing))
        .route("/file-upload/empty.png", get(empty))
        .route("/file-upload/large.bin", get(large))
        .route("/file-upload/stalled.jpg", get(stalled))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

async fn temp_store() -> (Arc<MediaStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MediaStore::new("sqlite::memory:", dir.path().join("media"))
        .await
        .expect("store");
    (Arc::new(store), dir)
}

fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                found.push(path);
            }
        }
    }
    found
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn concurrent_callers_share_a_single_request() {
    let (server_url, state) = spawn_media_server().await;
    let (store, _dir) = temp_store().await;
    let manager = HttpDownloadManager::new(Arc::clone(&store));
    let url = format!("{server_url}/file-upload/slow.png?rc_uid=u&rc_token=t");

    let results = futures::future::join_all((0..3).map(|_| {
        manager.start_download(&url, MediaCategory::Image, Some("image/png"))
    }))
    .await;

    assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    let paths: Vec<String> = results
        .into_iter()
        .map(|result| result.expect("download"))
        .collect();
    assert!(paths.iter().all(|path| path == &paths[0]));
    assert_eq!(
        tokio::fs::read(&paths[0]).await.expect("read"),
        b"fake-png-bytes".to_vec()
    );
    assert!(!manager.is_download_in_progress(&url));
    assert_eq!(manager.active_downloads(), 0);

    let lookup = store
        .check(MediaCategory::Image, Some("image/png"), &url)
        .await
        .expect("check");
    assert!(lookup.materialized);
    assert_eq!(lookup.local_reference.as_deref(), Some(paths[0].as_str()));
}

#[tokio::test]
async fn reports_in_progress_while_transfer_runs() {
    let (server_url, _state) = spawn_media_server().await;
    let (store, _dir) = temp_store().await;
    let manager = HttpDownloadManager::new(store);
    let url = format!("{server_url}/file-upload/slow.png");
    let mut events = manager.subscribe();

    let task = {
        let manager = Arc::clone(&manager);
        let url = url.clone();
        tokio::spawn(async move {
            manager
                .start_download(&url, MediaCategory::Image, None)
                .await
        })
    };
    wait_until(|| manager.is_download_in_progress(&url)).await;

    let local = task.await.expect("join").expect("download");
    assert!(!manager.is_download_in_progress(&url));
    assert_eq!(
        events.recv().await.expect("event"),
        DownloadEvent::Completed {
            url,
            local_reference: local,
        }
    );
}

#[tokio::test]
async fn http_error_is_classified_and_leaves_no_partial_file() {
    let (server_url, _state) = spawn_media_server().await;
    let (store, dir) = temp_store().await;
    let manager = HttpDownloadManager::new(store);
    let url = format!("{server_url}/file-upload/missing.png");
    let mut events = manager.subscribe();

    let err = manager
        .start_download(&url, MediaCategory::Image, None)
        .await
        .expect_err("must fail");
    assert_eq!(err, DownloadError::Http { status: 404 });
    assert!(files_under(dir.path()).iter().all(|p| !p.to_string_lossy().ends_with(".part")));
    assert!(matches!(
        events.recv().await.expect("event"),
        DownloadEvent::Failed { error: DownloadError::Http { status: 404 }, .. }
    ));
}

#[tokio::test]
async fn empty_body_is_a_failure() {
    let (server_url, _state) = spawn_media_server().await;
    let (store, _dir) = temp_store().await;
    let manager = HttpDownloadManager::new(store);

    let err = manager
        .start_download(
            &format!("{server_url}/file-upload/empty.png"),
            MediaCategory::Image,
            None,
        )
        .await
        .expect_err("must fail");
    assert_eq!(err, DownloadError::Empty);
}

#[tokio::test]
async fn size_limit_aborts_large_bodies() {
    let (server_url, _state) = spawn_media_server().await;
    let (store, dir) = temp_store().await;
    let manager = HttpDownloadManager::new_with_options(store, Client::new(), Some(1024));

    let err = manager
        .start_download(
            &format!("{server_url}/file-upload/large.bin"),
            MediaCategory::Video,
            None,
        )
        .await
        .expect_err("must fail");
    assert_eq!(err, DownloadError::TooLarge { limit: 1024 });
    assert!(files_under(dir.path()).is_empty());
}

#[tokio::test]
async fn cancel_stops_transfer_and_removes_partial_file() {
    let (server_url, _state) = spawn_media_server().await;
    let (store, dir) = temp_store().await;
    let manager = HttpDownloadManager::new(store);
    let url = format!("{server_url}/file-upload/stalled.jpg");
    let mut events = manager.subscribe();

    let task = {
        let manager = Arc::clone(&manager);
        let url = url.clone();
        tokio::spawn(async move {
            manager
                .start_download(&url, MediaCategory::Image, Some("image/jpeg"))
                .await
        })
    };
    wait_until(|| {
        files_under(dir.path())
            .iter()
            .any(|p| p.to_string_lossy().ends_with(".part"))
    })
    .await;

    manager.cancel_download(&url);
    assert!(!manager.is_download_in_progress(&url));

    let result = task.await.expect("join");
    assert_eq!(result, Err(DownloadError::Cancelled));
    assert!(files_under(dir.path()).is_empty());
    assert_eq!(
        events.recv().await.expect("event"),
        DownloadEvent::Cancelled { url: url.clone() }
    );

    manager.cancel_download(&url);
}

fn registered(id: u64) -> InFlight {
    InFlight {
        id,
        result: async { Err::<String, DownloadError>(DownloadError::Cancelled) }
            .boxed()
            .shared(),
        cancel: Arc::new(Notify::new()),
    }
}

#[tokio::test]
async fn panicking_transfer_task_releases_its_entry() {
    let in_flight = Arc::new(Mutex::new(HashMap::<String, InFlight>::new()));
    let url = "https://media.example.com/boom.png".to_string();
    lock(&in_flight).insert(url.clone(), registered(7));

    let release = InFlightRelease {
        in_flight: Arc::clone(&in_flight),
        url: url.clone(),
        id: 7,
    };
    let task = tokio::spawn(async move {
        let _release = release;
        panic!("transfer task crashed");
    });

    assert!(task.await.is_err());
    assert!(!lock(&in_flight).contains_key(&url));
}

#[tokio::test]
async fn aborted_transfer_task_keeps_newer_entry() {
    let in_flight = Arc::new(Mutex::new(HashMap::<String, InFlight>::new()));
    let url = "https://media.example.com/again.png".to_string();
    lock(&in_flight).insert(url.clone(), registered(2));

    let release = InFlightRelease {
        in_flight: Arc::clone(&in_flight),
        url: url.clone(),
        id: 1,
    };
    let task = tokio::spawn(async move {
        let _release = release;
        futures::future::pending::<()>().await;
    });
    task.abort();

    assert!(task.await.expect_err("aborted").is_cancelled());
    assert_eq!(lock(&in_flight).get(&url).map(|entry| entry.id), Some(2));
}
