use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::Context;
use serde::Deserialize;
use shared::domain::{AutoDownloadPolicy, NetworkKind, ViewerContext};
use tracing::warn;

const DEFAULT_CONFIG_FILE: &str = "media.toml";

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: String,
    pub user_id: String,
    pub auth_token: String,
    pub cache_dir: PathBuf,
    pub database_url: String,
    pub images_policy: AutoDownloadPolicy,
    pub video_policy: AutoDownloadPolicy,
    pub audio_policy: AutoDownloadPolicy,
    pub network: NetworkKind,
    pub max_download_bytes: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            user_id: String::new(),
            auth_token: String::new(),
            cache_dir: PathBuf::from("./data/media"),
            database_url: "sqlite://./data/media.db".into(),
            images_policy: AutoDownloadPolicy::WifiMobileData,
            video_policy: AutoDownloadPolicy::Wifi,
            audio_policy: AutoDownloadPolicy::Wifi,
            network: NetworkKind::Wifi,
            max_download_bytes: None,
        }
    }
}

impl Settings {
    pub fn viewer(&self) -> ViewerContext {
        ViewerContext::new(&self.server_url, &self.user_id, &self.auth_token)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    user_id: Option<String>,
    auth_token: Option<String>,
    cache_dir: Option<PathBuf>,
    database_url: Option<String>,
    images_policy: Option<AutoDownloadPolicy>,
    video_policy: Option<AutoDownloadPolicy>,
    audio_policy: Option<AutoDownloadPolicy>,
    network: Option<NetworkKind>,
    max_download_bytes: Option<u64>,
}

/// Defaults, then `media.toml` (or `$MEDIA_CONFIG`), then environment overrides.
pub fn load_settings() -> Settings {
    let path = std::env::var("MEDIA_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    load_settings_from(Some(&path), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    config_path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(path) = config_path {
        if let Ok(raw) = fs::read_to_string(path) {
            match toml::from_str::<FileSettings>(&raw) {
                Ok(file_cfg) => apply_file(&mut settings, file_cfg),
                Err(err) => warn!("config: ignoring '{}': {err}", path.display()),
            }
        }
    }

    let lookup = |keys: &[&str]| keys.iter().find_map(|key| env(key));

    if let Some(v) = lookup(&["MEDIA__SERVER_URL", "SERVER_URL"]) {
        settings.server_url = v;
    }
    if let Some(v) = lookup(&["MEDIA__USER_ID"]) {
        settings.user_id = v;
    }
    if let Some(v) = lookup(&["MEDIA__AUTH_TOKEN"]) {
        settings.auth_token = v;
    }
    if let Some(v) = lookup(&["MEDIA__CACHE_DIR"]) {
        settings.cache_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup(&["MEDIA__DATABASE_URL", "DATABASE_URL"]) {
        settings.database_url = v;
    }
    override_parsed(&mut settings.images_policy, "MEDIA__IMAGES_POLICY", &env);
    override_parsed(&mut settings.video_policy, "MEDIA__VIDEO_POLICY", &env);
    override_parsed(&mut settings.audio_policy, "MEDIA__AUDIO_POLICY", &env);
    override_parsed(&mut settings.network, "MEDIA__NETWORK", &env);

    if let Some(v) = lookup(&["MEDIA__MAX_DOWNLOAD_BYTES"]) {
        match v.parse::<u64>() {
            Ok(0) => settings.max_download_bytes = None,
            Ok(limit) => settings.max_download_bytes = Some(limit),
            Err(err) => warn!("config: invalid MEDIA__MAX_DOWNLOAD_BYTES '{v}': {err}"),
        }
    }

    settings
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.user_id {
        settings.user_id = v;
    }
    if let Some(v) = file_cfg.auth_token {
        settings.auth_token = v;
    }
    if let Some(v) = file_cfg.cache_dir {
        settings.cache_dir = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.images_policy {
        settings.images_policy = v;
    }
    if let Some(v) = file_cfg.video_policy {
        settings.video_policy = v;
    }
    if let Some(v) = file_cfg.audio_policy {
        settings.audio_policy = v;
    }
    if let Some(v) = file_cfg.network {
        settings.network = v;
    }
    if let Some(v) = file_cfg.max_download_bytes {
        settings.max_download_bytes = (v > 0).then_some(v);
    }
}

fn override_parsed<T>(slot: &mut T, key: &str, env: &impl Fn(&str) -> Option<String>)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = env(key) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) => *slot = value,
        Err(err) => warn!("config: invalid {key}: {err}"),
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite://") {
        return sqlite_url_for_path(path);
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return sqlite_url_for_path(path);
    }

    if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    sqlite_url_for_path(raw_database_url)
}

fn sqlite_url_for_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    if has_windows_drive(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

fn has_windows_drive(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
