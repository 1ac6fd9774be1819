use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    config::{load_settings, load_settings_from, prepare_database_url, Settings},
    AttachmentPresenter, AutoDownloadPreferences, HttpDownloadManager, MountProps,
    PresentationState, PresenterDeps, ShowAttachment,
};
use shared::domain::{Attachment, NetworkKind};
use storage::MediaStore;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Mounts one image attachment headlessly and prints each presentation state as a JSON line.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    network: Option<NetworkKind>,
    /// Inline rendition (`image_url`).
    #[arg(long)]
    link: String,
    /// Full-size rendition (`title_link`).
    #[arg(long)]
    title_link: Option<String>,
    #[arg(long)]
    mime: Option<String>,
    #[arg(long)]
    author: Option<String>,
    /// Render as a reply/quote preview.
    #[arg(long)]
    passive: bool,
    /// Activate once the first check settles.
    #[arg(long)]
    activate: bool,
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = settings_for(&args);
    let database_url = prepare_database_url(&settings.database_url)?;
    let store = MediaStore::new(&database_url, settings.cache_dir.clone())
        .await
        .map_err(|error| {
            error!(%database_url, %error, "failed to open media cache index");
            error
        })?;
    let store = Arc::new(store);

    let preferences = AutoDownloadPreferences::from_settings(&settings);
    if let Err(err) = preferences.hydrate(&store).await {
        warn!("preview: using configured policies, stored ones unavailable: {err:#}");
    }
    let downloads = HttpDownloadManager::new_with_options(
        Arc::clone(&store),
        reqwest::Client::new(),
        settings.max_download_bytes,
    );
    let deps = PresenterDeps::from_store(store, downloads, Arc::new(preferences));

    let mut attachment = Attachment::image(args.link.clone());
    if let Some(title_link) = &args.title_link {
        attachment = attachment.with_title_link(title_link);
    }
    if let Some(mime) = &args.mime {
        attachment = attachment.with_image_type(mime);
    }
    let mut props = MountProps::new(attachment);
    if let Some(author) = &args.author {
        props = props.authored_by(author);
    }
    if args.passive {
        props = props.as_passive();
    }

    let on_activate: ShowAttachment = Arc::new(|attachment: Attachment| {
        match serde_json::to_string(&attachment) {
            Ok(json) => println!("{{\"show\":{json}}}"),
            Err(err) => warn!("preview: could not encode attachment: {err}"),
        }
    });

    let Some(presenter) =
        AttachmentPresenter::mount(deps, &settings.viewer(), props, Some(on_activate))
    else {
        println!("{{\"state\":\"none\"}}");
        return Ok(());
    };
    info!(
        "preview: mounted display_url={} fetch_url={}",
        presenter.display_url(),
        presenter.fetch_url()
    );

    let timeout = Duration::from_secs(args.timeout_secs);
    let mut states = presenter.subscribe();
    print_until_settled(&mut states, timeout).await?;

    if args.activate {
        presenter.activate();
        if states.has_changed().unwrap_or(false) {
            print_until_settled(&mut states, timeout).await?;
        }
    }

    presenter.unmount();
    Ok(())
}

fn settings_for(args: &Args) -> Settings {
    let mut settings = match &args.config {
        Some(path) => load_settings_from(Some(path), |key| std::env::var(key).ok()),
        None => load_settings(),
    };
    if let Some(server_url) = &args.server_url {
        settings.server_url = server_url.clone();
    }
    if let Some(user_id) = &args.user_id {
        settings.user_id = user_id.clone();
    }
    if let Some(token) = &args.token {
        settings.auth_token = token.clone();
    }
    if let Some(network) = args.network {
        settings.network = network;
    }
    settings
}

async fn print_until_settled(
    states: &mut watch::Receiver<PresentationState>,
    timeout: Duration,
) -> Result<PresentationState> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let state = states.borrow_and_update().clone();
        println!("{}", serde_json::to_string(&state)?);
        if !state.is_loading() {
            return Ok(state);
        }
        tokio::time::timeout_at(deadline, states.changed())
            .await
            .context("timed out waiting for the attachment")?
            .context("presenter stopped publishing")?;
    }
}
