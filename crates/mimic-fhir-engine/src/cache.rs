//! Result caching for searches and derived operations.
//!
//! Entries live until an explicit [`QueryCache::clear`]; there is no TTL and
//! no eviction, since the underlying dataset never changes after startup.
//!
//! Each key owns a slot. The slot map sits behind a `RwLock` that is held
//! only to find or insert a slot, never while computing. A computation runs
//! under the slot's own mutex, so a second requester for the same key waits
//! for the first and then reads its value, while hits on other keys proceed.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use mimic_fhir::{ResourceType, SearchQuery};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::config::CacheConfig;

// =============================================================================
// Keys
// =============================================================================

/// What a cache entry was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheScope {
    /// A search over one resource type.
    Resource(ResourceType),
    /// A named derived operation (e.g. `$risk-summary`).
    Operation(String),
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheScope::Resource(rt) => write!(f, "{rt}"),
            CacheScope::Operation(name) => f.write_str(name),
        }
    }
}

/// A canonical cache key.
///
/// Equivalent requests map to the same key: parameters are sorted by name
/// then value and the effective paging is always included.
///
/// # Example
///
/// ```rust
/// use mimic_fhir::{ResourceType, SearchQuery};
/// use mimic_fhir_engine::CacheKey;
///
/// let a = SearchQuery::parse(ResourceType::Observation, [("subject", "p1"), ("status", "final")]);
/// let b = SearchQuery::parse(ResourceType::Observation, [("status", "final"), ("subject", "p1")]);
///
/// assert_eq!(CacheKey::for_search(&a), CacheKey::for_search(&b));
/// assert_eq!(
///     CacheKey::for_search(&a).as_str(),
///     "Observation?_count=100&_offset=0&status=final&subject=p1"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    scope: CacheScope,
    canonical: String,
}

impl CacheKey {
    /// Key for a search.
    pub fn for_search(query: &SearchQuery) -> Self {
        Self {
            scope: CacheScope::Resource(query.resource_type),
            canonical: canonical_string(query.resource_type.as_str(), query.canonical_params()),
        }
    }

    /// Key for a derived operation.
    pub fn for_operation<K, V>(name: &str, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut params: Vec<(String, String)> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        params.sort();
        Self {
            scope: CacheScope::Operation(name.to_string()),
            canonical: canonical_string(name, params),
        }
    }

    /// The key's scope.
    pub fn scope(&self) -> &CacheScope {
        &self.scope
    }

    /// The canonical string.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

fn canonical_string(head: &str, params: Vec<(String, String)>) -> String {
    let joined = params
        .iter()
        .map(|(k, v)| format!("{}={}", escape_component(k), escape_component(v)))
        .collect::<Vec<_>>()
        .join("&");
    if joined.is_empty() {
        head.to_string()
    } else {
        format!("{head}?{joined}")
    }
}

/// Percent-escapes the key separators so decoded values cannot forge
/// extra parameters.
fn escape_component(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['%', '&', '=', '?']) {
        return Cow::Borrowed(raw);
    }
    let mut escaped = String::with_capacity(raw.len() + 6);
    for c in raw.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '&' => escaped.push_str("%26"),
            '=' => escaped.push_str("%3D"),
            '?' => escaped.push_str("%3F"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Which entries [`QueryCache::clear`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearScope {
    /// Every entry.
    All,
    /// Searches over one type.
    Resource(ResourceType),
    /// One derived operation.
    Operation(String),
}

impl ClearScope {
    fn includes(&self, scope: &CacheScope) -> bool {
        match (self, scope) {
            (ClearScope::All, _) => true,
            (ClearScope::Resource(a), CacheScope::Resource(b)) => a == b,
            (ClearScope::Operation(a), CacheScope::Operation(b)) => a == b,
            _ => false,
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

/// How a request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Read from an existing entry.
    Hit,
    /// Computed and stored.
    Miss,
    /// Computed without caching (cache disabled).
    Bypass,
}

impl CacheStatus {
    /// Returns true for [`CacheStatus::Hit`].
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheStatus::Hit)
    }
}

struct Entry<V> {
    value: V,
    created_at: Instant,
}

struct Slot<V> {
    entry: Mutex<Option<Entry<V>>>,
    ready: AtomicBool,
    hits: AtomicU64,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            entry: Mutex::new(None),
            ready: AtomicBool::new(false),
            hits: AtomicU64::new(0),
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
}

/// Creation time and hit count of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    /// When the value was stored.
    pub created_at: Instant,
    /// Hits served from this entry.
    pub hits: u64,
}

/// Thread-safe result cache shared by every query path.
///
/// # Example
///
/// ```rust
/// use mimic_fhir_engine::{CacheConfig, CacheKey, CacheStatus, QueryCache};
///
/// let cache: QueryCache<u32> = QueryCache::new(CacheConfig::default());
/// let key = CacheKey::for_operation("$answer", [("q", "life")]);
///
/// assert_eq!(cache.get_or_compute(&key, || 42), (42, CacheStatus::Miss));
/// assert_eq!(cache.get_or_compute(&key, || 0), (42, CacheStatus::Hit));
/// ```
pub struct QueryCache<V> {
    slots: RwLock<HashMap<CacheKey, Arc<Slot<V>>>>,
    counters: Mutex<BTreeMap<CacheScope, Counters>>,
    hits: AtomicU64,
    misses: AtomicU64,
    enabled: bool,
}

impl<V: Clone> QueryCache<V> {
    /// Creates a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            slots: RwLock::new(HashMap::with_capacity(config.initial_capacity)),
            counters: Mutex::new(BTreeMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            enabled: config.enabled,
        }
    }

    /// Returns whether values are stored.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the cached value for `key`, computing and storing it first
    /// if absent.
    ///
    /// `compute` runs at most once per key between clears; concurrent
    /// callers for the same key wait for it.
    pub fn get_or_compute<F>(&self, key: &CacheKey, compute: F) -> (V, CacheStatus)
    where
        F: FnOnce() -> V,
    {
        match self.try_get_or_compute(key, || Ok::<V, std::convert::Infallible>(compute())) {
            Ok(served) => served,
            Err(never) => match never {},
        }
    }

    /// Like [`get_or_compute`](Self::get_or_compute) for fallible work.
    ///
    /// Errors are returned to the caller and not stored; the next request
    /// for the key computes again.
    pub fn try_get_or_compute<F, E>(&self, key: &CacheKey, compute: F) -> Result<(V, CacheStatus), E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if !self.enabled {
            return compute().map(|value| (value, CacheStatus::Bypass));
        }

        let slot = self.slot(key);
        let mut entry = slot.entry.lock();

        if let Some(ref stored) = *entry {
            slot.hits.fetch_add(1, Ordering::Relaxed);
            self.record(key, CacheStatus::Hit);
            return Ok((stored.value.clone(), CacheStatus::Hit));
        }

        tracing::debug!(key = %key, "cache miss");
        let value = compute()?;
        *entry = Some(Entry {
            value: value.clone(),
            created_at: Instant::now(),
        });
        slot.ready.store(true, Ordering::Release);
        self.record(key, CacheStatus::Miss);
        Ok((value, CacheStatus::Miss))
    }

    /// Returns a stored value without computing.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let slot = self.slots.read().get(key).cloned()?;
        if !slot.is_ready() {
            return None;
        }
        let entry = slot.entry.lock();
        entry.as_ref().map(|e| {
            slot.hits.fetch_add(1, Ordering::Relaxed);
            self.record(key, CacheStatus::Hit);
            e.value.clone()
        })
    }

    fn slot(&self, key: &CacheKey) -> Arc<Slot<V>> {
        if let Some(slot) = self.slots.read().get(key) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    fn record(&self, key: &CacheKey, status: CacheStatus) {
        let mut counters = self.counters.lock();
        let scope = counters.entry(key.scope().clone()).or_default();
        match status {
            CacheStatus::Hit => {
                scope.hits += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            CacheStatus::Miss => {
                scope.misses += 1;
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
            CacheStatus::Bypass => {}
        }
    }

    /// Returns true if a value is stored under `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.slots
            .read()
            .get(key)
            .is_some_and(|slot| slot.is_ready())
    }

    /// Creation time and hit count of an entry.
    pub fn entry_info(&self, key: &CacheKey) -> Option<EntryInfo> {
        let slot = self.slots.read().get(key).cloned()?;
        if !slot.is_ready() {
            return None;
        }
        let entry = slot.entry.lock();
        entry.as_ref().map(|e| EntryInfo {
            created_at: e.created_at,
            hits: slot.hits.load(Ordering::Relaxed),
        })
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.slots.read().values().filter(|s| s.is_ready()).count()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes entries in `scope` and returns how many stored values were
    /// removed.
    ///
    /// A computation in flight for a removed key still completes for its
    /// callers, but its value is no longer reachable.
    pub fn clear(&self, scope: &ClearScope) -> usize {
        let mut slots = self.slots.write();
        let mut removed = 0;
        slots.retain(|key, slot| {
            if scope.includes(key.scope()) {
                removed += usize::from(slot.is_ready());
                false
            } else {
                true
            }
        });
        tracing::debug!(?scope, removed, "cache cleared");
        removed
    }

    /// Hit and miss counters plus stored entries, overall and per scope.
    pub fn stats(&self) -> CacheStats {
        let mut scopes: BTreeMap<String, ScopeStats> = self
            .counters
            .lock()
            .iter()
            .map(|(scope, c)| {
                (
                    scope.to_string(),
                    ScopeStats {
                        hits: c.hits,
                        misses: c.misses,
                        entries: 0,
                    },
                )
            })
            .collect();

        let mut entries = 0;
        for (key, slot) in self.slots.read().iter() {
            if slot.is_ready() {
                entries += 1;
                scopes.entry(key.scope().to_string()).or_default().entries += 1;
            }
        }

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
            scopes,
        }
    }
}

impl<V> fmt::Debug for QueryCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("slots", &self.slots.read().len())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Counters for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeStats {
    /// Requests served from an entry.
    pub hits: u64,
    /// Requests that computed a value.
    pub misses: u64,
    /// Values currently stored.
    pub entries: usize,
}

/// Statistics about the cache state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Requests served from an entry.
    pub hits: u64,
    /// Requests that computed a value.
    pub misses: u64,
    /// Values currently stored.
    pub entries: usize,
    /// Breakdown by type or operation name.
    pub scopes: BTreeMap<String, ScopeStats>,
}

impl CacheStats {
    /// Fraction of requests served from cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
