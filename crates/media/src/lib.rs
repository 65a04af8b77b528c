//! Tandem media: signed-URL resolution with a two-tier cache.
//!
//! The in-memory map is the single source of truth for the life of the
//! process. The persisted tier is a write-behind snapshot: loaded once
//! on first use, written after every successful signing round-trip,
//! never re-read. Entries are created only after a successful signing
//! round-trip and die by lazy TTL expiry or capacity eviction.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};

use metrics::counter;
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use tandem_api::{ClientApi, SessionProvider};
use tandem_persist::{now_ms, CachedUrl, UrlStore};

/// Safety margin subtracted from the server TTL so a URL never expires
/// mid-request; the floor guards against a TTL smaller than the margin.
const TTL_MARGIN_SECS: u64 = 60;
const TTL_FLOOR_SECS: u64 = 30;

const DEFAULT_STORAGE_MARKER: &str = "/api/v1/storage/";

#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Public media host joined onto relative references.
    pub media_base: String,
    /// Substring marking a protected-storage reference; everything
    /// after it is the storage key.
    pub storage_marker: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self { media_base: String::new(), storage_marker: DEFAULT_STORAGE_MARKER.to_string() }
    }
}

impl MediaConfig {
    pub fn from_env() -> Self {
        let media_base = std::env::var("TANDEM_MEDIA_BASE").unwrap_or_default();
        Self { media_base, ..Self::default() }
    }

    /// Storage key embedded in a reference, if any.
    pub fn storage_key<'a>(&self, reference: &'a str) -> Option<&'a str> {
        let idx = reference.find(&self.storage_marker)?;
        let key = &reference[idx + self.storage_marker.len()..];
        if key.is_empty() {
            return None;
        }
        Some(key)
    }

    /// Deterministic resolution for references that need no signing:
    /// absolute URLs pass through, relative ones get the host prefix.
    pub fn resolve_public(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return reference.to_string();
        }
        let base = self.media_base.trim_end_matches('/');
        if base.is_empty() {
            return reference.to_string();
        }
        if reference.starts_with('/') {
            format!("{base}{reference}")
        } else {
            format!("{base}/{reference}")
        }
    }
}

/// Client-side expiry for a server-granted TTL, in epoch millis.
pub fn entry_expiry_ms(now_ms: i64, expires_in_secs: u64) -> i64 {
    let secs = expires_in_secs.saturating_sub(TTL_MARGIN_SECS).max(TTL_FLOOR_SECS);
    now_ms + (secs as i64) * 1000
}

#[derive(Debug, Clone)]
struct CacheEntry {
    url: String,
    expires_at_ms: i64,
}

struct ResolverInner {
    cache: FxHashMap<String, CacheEntry>,
    loaded: bool,
}

/// Process-wide resolver service shared by every rendered image.
/// Writes are last-write-wins per key.
pub struct MediaResolver {
    cfg: MediaConfig,
    inner: Mutex<ResolverInner>,
    store: Option<Arc<dyn UrlStore>>,
    session: Arc<dyn SessionProvider>,
    api: Arc<dyn ClientApi>,
}

impl MediaResolver {
    pub fn new(
        cfg: MediaConfig,
        api: Arc<dyn ClientApi>,
        session: Arc<dyn SessionProvider>,
        store: Option<Arc<dyn UrlStore>>,
    ) -> Self {
        Self {
            cfg,
            inner: Mutex::new(ResolverInner { cache: FxHashMap::default(), loaded: false }),
            store,
            session,
            api,
        }
    }

    /// Resolve a raw media reference into a fetchable URL.
    ///
    /// Returns `None` for empty references and for protected references
    /// while unauthenticated ("ask again later"); callers re-resolve on
    /// their next render. A failed signing round-trip degrades to the
    /// raw reference joined to the public host rather than nothing.
    pub async fn resolve(&self, reference: Option<&str>) -> Option<String> {
        let reference = reference.unwrap_or("").trim();
        if reference.is_empty() {
            return None;
        }
        let Some(key) = self.cfg.storage_key(reference) else {
            return Some(self.cfg.resolve_public(reference));
        };
        self.ensure_loaded();
        if let Some(url) = self.lookup(key) {
            return Some(url);
        }
        if self.session.bearer().is_none() {
            counter!("media_resolve_unauthenticated", 1u64);
            return None;
        }
        match self.api.sign_url(key).await {
            Ok(signed) if !signed.signed_url.is_empty() => {
                let now = now_ms();
                let expires_at_ms = entry_expiry_ms(now, signed.expires_in);
                self.insert(key, &signed.signed_url, expires_at_ms);
                if let Some(store) = &self.store {
                    let row = CachedUrl {
                        key: key.to_string(),
                        url: signed.signed_url.clone(),
                        expires_at_ms,
                        updated_at_ms: now,
                    };
                    if let Err(e) = store.put(&row) {
                        debug!(key, "persisted cache write failed: {e:#}");
                    }
                }
                counter!("media_sign_ok", 1u64);
                Some(signed.signed_url)
            }
            Ok(_) => {
                warn!(key, "signing endpoint returned no url; serving raw reference");
                counter!("media_sign_failed", 1u64);
                Some(self.cfg.resolve_public(reference))
            }
            Err(e) => {
                // Degraded fallback: the unsigned reference may or may
                // not be reachable, but the UI shows something instead
                // of a blank card. No retry is scheduled; the next
                // render asks again.
                warn!(key, "signing failed: {e}; serving raw reference");
                counter!("media_sign_failed", 1u64);
                Some(self.cfg.resolve_public(reference))
            }
        }
    }

    /// Live cached URL for a storage key, purging an expired entry.
    fn lookup(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        match inner.cache.get(key) {
            Some(entry) if entry.expires_at_ms > now_ms() => {
                counter!("media_cache_hit", 1u64);
                Some(entry.url.clone())
            }
            Some(_) => {
                inner.cache.remove(key);
                counter!("media_cache_expired", 1u64);
                None
            }
            None => {
                counter!("media_cache_miss", 1u64);
                None
            }
        }
    }

    fn insert(&self, key: &str, url: &str, expires_at_ms: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .cache
            .insert(key.to_string(), CacheEntry { url: url.to_string(), expires_at_ms });
    }

    /// One-time promotion of still-live persisted entries. The disk
    /// tier is never consulted again afterwards, so stale disk state
    /// cannot clobber fresher in-memory entries.
    fn ensure_loaded(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.loaded {
            return;
        }
        inner.loaded = true;
        let Some(store) = &self.store else { return };
        match store.load_all() {
            Ok(rows) => {
                let n = rows.len();
                for row in rows {
                    inner
                        .cache
                        .entry(row.key)
                        .or_insert(CacheEntry { url: row.url, expires_at_ms: row.expires_at_ms });
                }
                info!("promoted {n} persisted signed urls");
            }
            Err(e) => debug!("persisted cache load failed: {e:#}"),
        }
    }
}

// ----------------- per-consumer slot -----------------

/// Ticket tying an in-flight resolution to the request that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveTicket {
    seq: u64,
}

/// Per-consumer resolution state. Each rendered image owns one slot;
/// a late response to a superseded request is discarded on arrival
/// rather than cancelled in flight.
#[derive(Debug, Default)]
pub struct MediaSlot {
    seq: u64,
    url: Option<String>,
}

impl MediaSlot {
    /// Start a new resolution, superseding any in flight.
    pub fn begin(&mut self) -> ResolveTicket {
        self.seq += 1;
        ResolveTicket { seq: self.seq }
    }

    /// Apply a finished resolution if the ticket is still current.
    /// Returns false when the result was stale and dropped.
    pub fn accept(&mut self, ticket: ResolveTicket, url: Option<String>) -> bool {
        if ticket.seq != self.seq {
            debug!("discarding stale media resolution");
            counter!("media_resolve_stale", 1u64);
            return false;
        }
        self.url = url;
        true
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn clear(&mut self) {
        self.seq += 1;
        self.url = None;
    }
}

// ----------------- process-wide singleton -----------------

static GLOBAL: OnceCell<Arc<MediaResolver>> = OnceCell::new();

/// Install the process-wide resolver. First caller wins; later calls
/// return false (the live cache must not be swapped mid-session).
pub fn init_global(resolver: Arc<MediaResolver>) -> bool {
    GLOBAL.set(resolver).is_ok()
}

pub fn global() -> Option<Arc<MediaResolver>> {
    GLOBAL.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_api::{MockApi, StaticSession};
    use tandem_persist::SqliteStore;

    fn resolver_with(api: Arc<MockApi>, session: Arc<StaticSession>) -> MediaResolver {
        MediaResolver::new(MediaConfig::default(), api, session, None)
    }

    fn storage_ref(key: &str) -> String {
        format!("https://api.example.com/api/v1/storage/{key}")
    }

    #[tokio::test]
    async fn empty_reference_resolves_to_none() {
        let api = MockApi::new();
        let r = resolver_with(api.clone(), StaticSession::signed_in());
        assert_eq!(r.resolve(None).await, None);
        assert_eq!(r.resolve(Some("   ")).await, None);
        assert_eq!(api.sign_calls(), 0);
    }

    #[tokio::test]
    async fn unmarked_reference_is_deterministic_and_uncached() {
        let api = MockApi::new();
        let cfg = MediaConfig {
            media_base: "https://media.example.com/".to_string(),
            ..MediaConfig::default()
        };
        let r = MediaResolver::new(cfg, api.clone(), StaticSession::signed_in(), None);
        assert_eq!(
            r.resolve(Some("uploads/pic.jpg")).await,
            Some("https://media.example.com/uploads/pic.jpg".to_string())
        );
        assert_eq!(
            r.resolve(Some("https://cdn.other/abc.png")).await,
            Some("https://cdn.other/abc.png".to_string())
        );
        assert_eq!(api.sign_calls(), 0);
        assert!(r.inner.lock().unwrap().cache.is_empty());
    }

    #[tokio::test]
    async fn live_cache_entry_needs_no_network() {
        let api = MockApi::new();
        let r = resolver_with(api.clone(), StaticSession::signed_in());
        r.insert("photo123", "https://cdn.example/signed123", now_ms() + 60_000);
        assert_eq!(
            r.resolve(Some(&storage_ref("photo123"))).await,
            Some("https://cdn.example/signed123".to_string())
        );
        assert_eq!(api.sign_calls(), 0);
    }

    #[tokio::test]
    async fn expired_entry_is_purged_and_resigned_once() {
        let api = MockApi::new();
        api.script_signed("photo123", "https://cdn.example/fresh", 300);
        let r = resolver_with(api.clone(), StaticSession::signed_in());
        r.insert("photo123", "https://cdn.example/stale", now_ms() - 1);
        assert_eq!(
            r.resolve(Some(&storage_ref("photo123"))).await,
            Some("https://cdn.example/fresh".to_string())
        );
        assert_eq!(api.sign_calls(), 1);
        // Second resolve hits the fresh cache entry.
        assert_eq!(
            r.resolve(Some(&storage_ref("photo123"))).await,
            Some("https://cdn.example/fresh".to_string())
        );
        assert_eq!(api.sign_calls(), 1);
    }

    #[test]
    fn ttl_margin_and_floor() {
        let t = 1_000_000_i64;
        // 300s server TTL caches for 240s.
        assert_eq!(entry_expiry_ms(t, 300), t + 240_000);
        // TTL below the margin still caches for the floor.
        assert_eq!(entry_expiry_ms(t, 45), t + 30_000);
        assert_eq!(entry_expiry_ms(t, 0), t + 30_000);
    }

    #[tokio::test]
    async fn unauthenticated_resolution_is_pending() {
        let api = MockApi::new();
        api.script_signed("photo123", "https://cdn.example/signed", 300);
        let r = resolver_with(api.clone(), StaticSession::signed_out());
        assert_eq!(r.resolve(Some(&storage_ref("photo123"))).await, None);
        assert_eq!(api.sign_calls(), 0);
    }

    #[tokio::test]
    async fn signing_failure_degrades_to_raw_reference() {
        let api = MockApi::new();
        api.script_sign_failure("photo123");
        let r = resolver_with(api.clone(), StaticSession::signed_in());
        let raw = storage_ref("photo123");
        assert_eq!(r.resolve(Some(&raw)).await, Some(raw.clone()));
        assert_eq!(api.sign_calls(), 1);
        // Failure caches nothing; the next resolve asks again.
        assert_eq!(r.resolve(Some(&raw)).await, Some(raw));
        assert_eq!(api.sign_calls(), 2);
    }

    #[tokio::test]
    async fn success_writes_through_to_persisted_tier() {
        let path = std::env::temp_dir()
            .join(format!("tandem-media-test-{}.db", now_ms()))
            .to_string_lossy()
            .to_string();
        let store: Arc<dyn UrlStore> = Arc::new(SqliteStore::open(&path).unwrap());
        let api = MockApi::new();
        api.script_signed("photo123", "https://cdn.example/signed", 300);
        let r = MediaResolver::new(
            MediaConfig::default(),
            api.clone(),
            StaticSession::signed_in(),
            Some(store.clone()),
        );
        r.resolve(Some(&storage_ref("photo123"))).await.unwrap();
        let rows = store.load_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "photo123");
        assert_eq!(rows[0].url, "https://cdn.example/signed");
    }

    #[tokio::test]
    async fn persisted_entries_promote_without_network() {
        let path = std::env::temp_dir()
            .join(format!("tandem-media-promote-{}.db", now_ms()))
            .to_string_lossy()
            .to_string();
        let store: Arc<dyn UrlStore> = Arc::new(SqliteStore::open(&path).unwrap());
        store
            .put(&CachedUrl {
                key: "photo123".to_string(),
                url: "https://cdn.example/persisted".to_string(),
                expires_at_ms: now_ms() + 60_000,
                updated_at_ms: now_ms(),
            })
            .unwrap();
        let api = MockApi::new();
        let r = MediaResolver::new(
            MediaConfig::default(),
            api.clone(),
            StaticSession::signed_in(),
            Some(store),
        );
        assert_eq!(
            r.resolve(Some(&storage_ref("photo123"))).await,
            Some("https://cdn.example/persisted".to_string())
        );
        assert_eq!(api.sign_calls(), 0);
    }

    #[test]
    fn slot_discards_stale_results() {
        let mut slot = MediaSlot::default();
        let first = slot.begin();
        let second = slot.begin();
        // The superseded request's result arrives late and is dropped.
        assert!(!slot.accept(first, Some("https://cdn.example/stale".to_string())));
        assert_eq!(slot.url(), None);
        assert!(slot.accept(second, Some("https://cdn.example/fresh".to_string())));
        assert_eq!(slot.url(), Some("https://cdn.example/fresh"));
    }
}
