//! Identity cache tests: suffix stripping, claim-on-miss, resolver outcomes.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskmgr::config::LabelEntry;
use taskmgr::error::ResolveError;
use taskmgr::identity::{
    strip_suffix, AppInfo, IconRef, IdentityCache, IdentityResolver, NullResolver, TableResolver,
};

struct SlowResolver {
    calls: Arc<AtomicUsize>,
}

impl IdentityResolver for SlowResolver {
    fn resolve(&self, key: &str) -> Result<AppInfo, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        match key {
            "com.example.mail" => Ok(AppInfo {
                label: "Mail".into(),
                icon: IconRef::Package(key.into()),
                system: false,
            }),
            "com.broken" => Err(ResolveError::Failed("package manager died".into())),
            other => Err(ResolveError::NotFound(other.into())),
        }
    }
}

#[test]
fn suffix_is_stripped() {
    assert_eq!(strip_suffix("app:remote"), "app");
    assert_eq!(strip_suffix("com.example.mail:sync:x"), "com.example.mail");
    assert_eq!(strip_suffix("plain"), "plain");
}

#[test]
fn bare_names_are_system_without_lookup() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = IdentityCache::new(SlowResolver {
        calls: calls.clone(),
    });
    let r = cache.lookup("surfaceflinger");
    assert_eq!(r.label, "surfaceflinger");
    assert!(r.is_system);
    assert!(cache.is_resolved("surfaceflinger"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_misses_resolve_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = IdentityCache::new(SlowResolver {
        calls: calls.clone(),
    });

    let first = cache.lookup("com.example.mail");
    assert_eq!(first.label, "com.example.mail", "placeholder shows the raw key");
    assert!(!first.is_system);
    assert_eq!(first.icon, IconRef::Default);

    let mut waiters = Vec::new();
    for name in ["com.example.mail", "com.example.mail:push", "com.example.mail:sync"] {
        let c = cache.clone();
        waiters.push(tokio::spawn(async move { c.resolve(name).await }));
    }
    for w in waiters {
        let r = w.await.unwrap();
        assert_eq!(r.label, "Mail");
        assert_eq!(r.raw_key, "com.example.mail");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn failed_lookups_degrade_to_system() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = IdentityCache::new(SlowResolver { calls });
    for key in ["com.broken", "com.unknown"] {
        let r = cache.resolve(key).await;
        assert_eq!(r.label, key);
        assert!(r.is_system);
    }
}

#[tokio::test]
async fn updates_bump_generation() {
    let cache = IdentityCache::new(NullResolver);
    let mut rx = cache.subscribe();
    let before = *rx.borrow_and_update();
    cache.lookup("com.some.app");
    tokio::time::timeout(Duration::from_secs(2), rx.changed())
        .await
        .expect("update published")
        .unwrap();
    assert!(*rx.borrow() > before);
    assert!(cache.is_resolved("com.some.app"));
}

#[tokio::test]
async fn table_resolver_uses_labels() {
    let mut table = BTreeMap::new();
    table.insert(
        "com.vendor.launcher".to_string(),
        LabelEntry {
            label: "Launcher".into(),
            system: true,
        },
    );
    let cache = IdentityCache::new(TableResolver::new(table));
    let r = cache.resolve("com.vendor.launcher:ui").await;
    assert_eq!(r.label, "Launcher");
    assert!(r.is_system);
    assert_eq!(r.icon, IconRef::Package("com.vendor.launcher".into()));
}
