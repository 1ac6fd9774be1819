use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use shared::{
    domain::{AutoDownloadPolicy, MediaCategory},
    media::{cache_extension, file_name_parts, sanitize_component, strip_query},
};

const KEY_HASH_LEN: usize = 12;
const LOCAL_SERVER_DIR: &str = "local";

/// On-disk media cache with a SQLite index.
///
/// Files live under `{root}/{server}/{category}/`; the index maps a query-less URL to the
/// file so auth tokens in the query never split cache identity.
#[derive(Clone)]
pub struct MediaStore {
    pool: Pool<Sqlite>,
    root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub url_key: String,
    pub server: String,
    pub category: MediaCategory,
    pub mime_type: Option<String>,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Destination chosen for a download before any byte is written.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub url_key: String,
    pub server: String,
    pub category: MediaCategory,
    pub mime_type: Option<String>,
    pub final_path: PathBuf,
    pub temp_path: PathBuf,
}

impl MediaStore {
    pub async fn new(database_url: &str, root: impl Into<PathBuf>) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;
        let root = root.into();
        fs::create_dir_all(&root).with_context(|| {
            format!("failed to create media cache root '{}'", root.display())
        })?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Where the content of `url` lives once materialized.
    pub fn path_for(&self, category: MediaCategory, mime_type: Option<&str>, url: &str) -> PathBuf {
        let url_key = strip_query(url);
        let (stem, _) = file_name_parts(url_key);
        let file_name = format!(
            "{}-{}.{}",
            sanitize_component(stem),
            key_hash(url_key),
            cache_extension(category, mime_type, url_key)
        );
        self.root
            .join(server_dir(url))
            .join(category.as_str())
            .join(file_name)
    }

    /// Index entry for `url` whose file is still on disk. Never writes.
    pub async fn lookup(&self, url: &str) -> Result<Option<CacheEntry>> {
        let url_key = strip_query(url);
        let row = sqlx::query(
            "SELECT url_key, server, category, mime_type, path, size_bytes, created_at
             FROM media_cache_entries
             WHERE url_key = ?",
        )
        .bind(url_key)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to look up cache entry for '{url_key}'"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let entry = entry_from_row(&row)?;
        if !tokio::fs::try_exists(&entry.path).await.unwrap_or(false) {
            debug!(
                "cache: index entry without file url_key={url_key} path={}",
                entry.path.display()
            );
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Picks the final path for `url` and a unique partial-file path next to it.
    pub async fn reserve(
        &self,
        url: &str,
        category: MediaCategory,
        mime_type: Option<&str>,
    ) -> Result<Reservation> {
        let final_path = self.path_for(category, mime_type, url);
        let parent = final_path
            .parent()
            .ok_or_else(|| anyhow!("cache path '{}' has no parent", final_path.display()))?;
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create cache directory '{}'", parent.display()))?;

        let file_name = final_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("download");
        let temp_path = parent.join(format!(".{file_name}.{}.part", Uuid::new_v4().simple()));

        Ok(Reservation {
            url_key: strip_query(url).to_string(),
            server: server_dir(url),
            category,
            mime_type: mime_type.map(str::to_string),
            final_path,
            temp_path,
        })
    }

    /// Moves the partial file into place and records it in the index.
    pub async fn commit(&self, reservation: &Reservation) -> Result<CacheEntry> {
        let size_bytes = tokio::fs::metadata(&reservation.temp_path)
            .await
            .with_context(|| {
                format!(
                    "missing partial download '{}'",
                    reservation.temp_path.display()
                )
            })?
            .len();
        tokio::fs::rename(&reservation.temp_path, &reservation.final_path)
            .await
            .with_context(|| {
                format!(
                    "failed to move '{}' into the cache",
                    reservation.temp_path.display()
                )
            })?;

        let created_at = Utc::now();
        let path = reservation.final_path.to_string_lossy().to_string();
        sqlx::query(
            "INSERT INTO media_cache_entries (url_key, server, category, mime_type, path, size_bytes, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(url_key) DO UPDATE SET
                server=excluded.server,
                category=excluded.category,
                mime_type=excluded.mime_type,
                path=excluded.path,
                size_bytes=excluded.size_bytes,
                created_at=excluded.created_at",
        )
        .bind(&reservation.url_key)
        .bind(&reservation.server)
        .bind(reservation.category.as_str())
        .bind(reservation.mime_type.as_deref())
        .bind(&path)
        .bind(size_bytes as i64)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to index cache entry '{}'", reservation.url_key))?;

        info!(
            "cache: stored url_key={} bytes={size_bytes} path={path}",
            reservation.url_key
        );
        Ok(CacheEntry {
            url_key: reservation.url_key.clone(),
            server: reservation.server.clone(),
            category: reservation.category,
            mime_type: reservation.mime_type.clone(),
            path: reservation.final_path.clone(),
            size_bytes,
            created_at,
        })
    }

    /// Removes the partial file of an abandoned download, if any.
    pub async fn discard(&self, reservation: &Reservation) -> Result<()> {
        remove_file_if_exists(&reservation.temp_path)
            .await
            .with_context(|| {
                format!(
                    "failed to remove partial download '{}'",
                    reservation.temp_path.display()
                )
            })
    }

    pub async fn list(&self) -> Result<Vec<CacheEntry>> {
        let rows = sqlx::query(
            "SELECT url_key, server, category, mime_type, path, size_bytes, created_at
             FROM media_cache_entries
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list cache entries")?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Deletes cached files and their index rows, for one server or for all.
    /// Returns how many entries were removed.
    pub async fn purge(&self, server_url: Option<&str>) -> Result<u64> {
        let entries = self.list().await?;
        let server = server_url.map(server_dir);
        let mut removed = 0;
        for entry in entries
            .into_iter()
            .filter(|entry| server.as_ref().map_or(true, |s| &entry.server == s))
        {
            remove_file_if_exists(&entry.path)
                .await
                .with_context(|| format!("failed to remove '{}'", entry.path.display()))?;
            sqlx::query("DELETE FROM media_cache_entries WHERE url_key = ?")
                .bind(&entry.url_key)
                .execute(&self.pool)
                .await?;
            removed += 1;
        }
        info!(
            "cache: purged entries={removed} server={}",
            server.as_deref().unwrap_or("*")
        );
        Ok(removed)
    }

    pub async fn load_download_policies(&self) -> Result<Vec<(MediaCategory, AutoDownloadPolicy)>> {
        let rows = sqlx::query("SELECT category, policy FROM media_download_preferences")
            .fetch_all(&self.pool)
            .await
            .context("failed to load auto-download policies")?;
        rows.iter()
            .map(|row| -> Result<(MediaCategory, AutoDownloadPolicy)> {
                let category: String = row.try_get("category")?;
                let policy: String = row.try_get("policy")?;
                Ok((category.parse()?, policy.parse()?))
            })
            .collect()
    }

    pub async fn save_download_policy(
        &self,
        category: MediaCategory,
        policy: AutoDownloadPolicy,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO media_download_preferences (category, policy) VALUES (?, ?)
             ON CONFLICT(category) DO UPDATE SET policy=excluded.policy",
        )
        .bind(category.as_str())
        .bind(policy.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save policy for {category}"))?;
        Ok(())
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<CacheEntry> {
    let category: String = row.try_get("category")?;
    let path: String = row.try_get("path")?;
    Ok(CacheEntry {
        url_key: row.try_get("url_key")?,
        server: row.try_get("server")?,
        category: category.parse()?,
        mime_type: row.try_get("mime_type")?,
        path: PathBuf::from(path),
        size_bytes: row.try_get::<i64, _>("size_bytes")?.max(0) as u64,
        created_at: row.try_get("created_at")?,
    })
}

fn key_hash(url_key: &str) -> String {
    let digest = Sha256::digest(url_key.as_bytes());
    let mut encoded = URL_SAFE_NO_PAD.encode(digest);
    encoded.truncate(KEY_HASH_LEN);
    encoded
}

/// Directory name for the server that hosts `url`; relative URLs land under `local`.
fn server_dir(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return LOCAL_SERVER_DIR.to_string();
    };
    match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => sanitize_component(&format!("{host}_{port}")),
        (Some(host), None) => sanitize_component(host),
        _ => LOCAL_SERVER_DIR.to_string(),
    }
}

async fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
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
#[path = "tests/lib_tests.rs"]
mod tests;
