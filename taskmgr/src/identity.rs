//! Identity cache: raw process name -> display label, icon and system flag.
//!
//! A miss claims the key by inserting a placeholder under the write lock; only the claiming
//! caller starts a resolution. Later callers see the placeholder until the record lands.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::config::LabelEntry;
use crate::error::ResolveError;

/// Opaque icon handle handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IconRef {
    #[default]
    Default,
    Package(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityRecord {
    /// Lookup key: the raw name with any `:suffix` removed.
    pub raw_key: String,
    pub label: String,
    pub icon: IconRef,
    pub is_system: bool,
}

impl IdentityRecord {
    fn placeholder(key: &str) -> Self {
        Self {
            raw_key: key.to_string(),
            label: key.to_string(),
            icon: IconRef::Default,
            is_system: false,
        }
    }

    fn system(key: &str) -> Self {
        Self {
            is_system: true,
            ..Self::placeholder(key)
        }
    }
}

/// What a resolver knows about one application package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub label: String,
    pub icon: IconRef,
    pub system: bool,
}

/// Blocking application lookup; run on the blocking pool.
pub trait IdentityResolver: Send + Sync + 'static {
    fn resolve(&self, key: &str) -> Result<AppInfo, ResolveError>;
}

/// Resolves nothing; every dotted key ends up as a system entry labelled by its name.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl IdentityResolver for NullResolver {
    fn resolve(&self, key: &str) -> Result<AppInfo, ResolveError> {
        Err(ResolveError::NotFound(key.to_string()))
    }
}

/// Resolver backed by the `labels` table of the settings file.
#[derive(Debug, Default, Clone)]
pub struct TableResolver {
    table: BTreeMap<String, LabelEntry>,
}

impl TableResolver {
    pub fn new(table: BTreeMap<String, LabelEntry>) -> Self {
        Self { table }
    }
}

impl IdentityResolver for TableResolver {
    fn resolve(&self, key: &str) -> Result<AppInfo, ResolveError> {
        self.table
            .get(key)
            .map(|e| AppInfo {
                label: e.label.clone(),
                icon: IconRef::Package(key.to_string()),
                system: e.system,
            })
            .ok_or_else(|| ResolveError::NotFound(key.to_string()))
    }
}

/// `pkg:remote` -> `pkg`.
pub fn strip_suffix(name: &str) -> &str {
    match name.split_once(':') {
        Some((base, _)) => base,
        None => name,
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Pending(IdentityRecord),
    Ready(IdentityRecord),
}

impl Entry {
    fn record(&self) -> &IdentityRecord {
        match self {
            Entry::Pending(r) | Entry::Ready(r) => r,
        }
    }
}

struct Inner {
    resolver: Arc<dyn IdentityResolver>,
    entries: RwLock<HashMap<String, Entry>>,
    generation: watch::Sender<u64>,
}

/// Cheap to clone; clones share one cache.
#[derive(Clone)]
pub struct IdentityCache {
    inner: Arc<Inner>,
}

impl IdentityCache {
    pub fn new<R: IdentityResolver>(resolver: R) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                resolver: Arc::new(resolver),
                entries: RwLock::new(HashMap::new()),
                generation,
            }),
        }
    }

    /// Bumped after every published record.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.generation.subscribe()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_resolved(&self, name: &str) -> bool {
        matches!(
            self.read().get(strip_suffix(name)),
            Some(Entry::Ready(_))
        )
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.inner.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current record for `name`, never blocking. A miss claims the key and starts resolution;
    /// the returned value is then the placeholder.
    pub fn lookup(&self, name: &str) -> IdentityRecord {
        let key = strip_suffix(name);
        if let Some(e) = self.read().get(key) {
            return e.record().clone();
        }

        let mut entries = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(e) = entries.get(key) {
            return e.record().clone();
        }

        if !key.contains('.') {
            // bare binary names have no package to look up
            let record = IdentityRecord::system(key);
            entries.insert(key.to_string(), Entry::Ready(record.clone()));
            drop(entries);
            self.inner.generation.send_modify(|g| *g += 1);
            return record;
        }

        let placeholder = IdentityRecord::placeholder(key);
        entries.insert(key.to_string(), Entry::Pending(placeholder.clone()));
        drop(entries);
        self.start_resolution(key.to_string()).unwrap_or(placeholder)
    }

    /// Resolve on the blocking pool when inside a runtime; otherwise inline, returning the record.
    fn start_resolution(&self, key: String) -> Option<IdentityRecord> {
        let inner = self.inner.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let resolver = inner.resolver.clone();
                    let k = key.clone();
                    let outcome = tokio::task::spawn_blocking(move || resolver.resolve(&k))
                        .await
                        .unwrap_or_else(|e| Err(ResolveError::Failed(e.to_string())));
                    publish(&inner, &key, outcome);
                });
                None
            }
            Err(_) => {
                let outcome = inner.resolver.resolve(&key);
                Some(publish(&inner, &key, outcome))
            }
        }
    }

    fn ready(&self, key: &str) -> Option<IdentityRecord> {
        match self.read().get(key) {
            Some(Entry::Ready(r)) => Some(r.clone()),
            _ => None,
        }
    }

    /// Final record for `name`, waiting for an in-flight resolution if there is one.
    pub async fn resolve(&self, name: &str) -> IdentityRecord {
        let key = strip_suffix(name).to_string();
        let mut rx = self.subscribe();
        let placeholder = self.lookup(&key);
        loop {
            if let Some(r) = self.ready(&key) {
                return r;
            }
            if rx.changed().await.is_err() {
                return placeholder;
            }
        }
    }
}

fn publish(inner: &Inner, key: &str, outcome: Result<AppInfo, ResolveError>) -> IdentityRecord {
    let record = match outcome {
        Ok(info) => IdentityRecord {
            raw_key: key.to_string(),
            label: if info.label.is_empty() {
                key.to_string()
            } else {
                info.label
            },
            icon: info.icon,
            is_system: info.system,
        },
        Err(e) => {
            debug!(key, "identity lookup failed: {e}");
            IdentityRecord::system(key)
        }
    };
    inner
        .entries
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key.to_string(), Entry::Ready(record.clone()));
    inner.generation.send_modify(|g| *g += 1);
    record
}
