//! Tandem persistence: minimal SQLite tier for signed-URL cache entries.
//! Keep code tiny and predictable.
//!
//! This tier is a write-behind snapshot of the in-memory cache: loaded
//! once at startup, written after every successful signing round-trip,
//! never re-read while the process lives.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};

/// Versioned table name. Incompatible future formats get a new suffix;
/// rows written under another version are simply ignored.
const TABLE: &str = "signed_urls_v1";

const DEFAULT_CAP: usize = 256;

/// One persisted signed-URL entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedUrl {
    pub key: String,
    pub url: String,
    pub expires_at_ms: i64,
    pub updated_at_ms: i64,
}

pub trait UrlStore: Send + Sync {
    /// Upsert one entry, then evict least-recently-updated rows beyond
    /// the capacity bound.
    fn put(&self, entry: &CachedUrl) -> Result<()>;
    /// Load all still-live entries. Rows already expired are dropped.
    fn load_all(&self) -> Result<Vec<CachedUrl>>;
}

/// SQLite-backed store. Simple, synchronous; writes are off the hot
/// path and best-effort from the resolver's perspective.
pub struct SqliteStore {
    db: std::sync::Mutex<rusqlite::Connection>,
    cap: usize,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("TANDEM_CACHE_PATH").unwrap_or_else(|_| default_db_path());
        let cap = std::env::var("TANDEM_CACHE_CAP")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CAP);
        Self::open_with_cap(&path, cap)
    }

    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_cap(path, DEFAULT_CAP)
    }

    pub fn open_with_cap(path: &str, cap: usize) -> Result<Self> {
        let started = std::time::Instant::now();
        tracing::debug!("opening signed-url cache at {}", path);
        let db = rusqlite::Connection::open(path)
            .with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", &"WAL").ok();
        db.pragma_update(None, "synchronous", &"NORMAL").ok();
        db.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {TABLE} (
                    key        TEXT PRIMARY KEY,
                    url        TEXT NOT NULL,
                    expires_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )"
            ),
            [],
        )
        .context("creating signed_urls table")?;
        db.execute(
            &format!("CREATE INDEX IF NOT EXISTS idx_{TABLE}_updated ON {TABLE}(updated_at)"),
            [],
        )
        .ok();
        let me = Self { db: std::sync::Mutex::new(db), cap: cap.max(1) };
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(me)
    }
}

impl UrlStore for SqliteStore {
    fn put(&self, entry: &CachedUrl) -> Result<()> {
        let started = std::time::Instant::now();
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO {TABLE}(key, url, expires_at, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     url = excluded.url,
                     expires_at = excluded.expires_at,
                     updated_at = excluded.updated_at"
            ),
            (&entry.key, &entry.url, entry.expires_at_ms, entry.updated_at_ms),
        )?;
        // Evict oldest-updated first, so a hot key fetched long ago but
        // re-validated recently is retained.
        tx.execute(
            &format!(
                "DELETE FROM {TABLE}
                 WHERE key NOT IN (
                     SELECT key FROM {TABLE} ORDER BY updated_at DESC, key DESC LIMIT ?1
                 )"
            ),
            [self.cap as i64],
        )?;
        tx.commit()?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<CachedUrl>> {
        let started = std::time::Instant::now();
        let now = now_ms();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT key, url, expires_at, updated_at FROM {TABLE} WHERE expires_at > ?1"
        ))?;
        let mut rows = stmt.query([now])?;
        let mut out: Vec<CachedUrl> = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(CachedUrl {
                key: row.get(0)?,
                url: row.get(1)?,
                expires_at_ms: row.get(2)?,
                updated_at_ms: row.get(3)?,
            });
        }
        histogram!("persist_load_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_load_rows", out.len() as u64);
        Ok(out)
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".tandem");
        let _ = std::fs::create_dir_all(&p);
        p.push("media.db");
        return p.to_string_lossy().to_string();
    }
    // Fallback to current directory
    "tandem-media.db".to_string()
}

pub fn now_ms() -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis() as i64
}
