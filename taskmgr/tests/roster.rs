//! Roster projection and poller tests over the loopback connector.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskmgr::bridge::{Bridge, BridgeTimeouts, LoopbackConnector, Request};
use taskmgr::identity::{IdentityCache, NullResolver, TableResolver};
use taskmgr::roster::{derived_totals, project, Roster, SortKey};
use taskmgr::types::ProcessSample;

fn sample(pid: i32, name: &str, cpu: f64, ram: u64, nice: i32) -> ProcessSample {
    ProcessSample {
        pid,
        name: name.into(),
        cpu_percent: cpu,
        ram_bytes: ram,
        nice,
    }
}

fn pids(views: &[taskmgr::roster::ProcessView]) -> Vec<i32> {
    views.iter().map(|v| v.pid).collect()
}

#[test]
fn sort_keys_and_tie_breaks() {
    let cache = IdentityCache::new(NullResolver);
    let samples = vec![
        sample(1, "zeta", 5.0, 100, 0),
        sample(2, "Alpha", 5.0, 300, 10),
        sample(3, "mid", 50.0, 200, -5),
        sample(4, "beta", 1.0, 300, 0),
    ];
    assert_eq!(pids(&project(&samples, &cache, SortKey::Cpu, "")), vec![3, 2, 1, 4]);
    assert_eq!(pids(&project(&samples, &cache, SortKey::Ram, "")), vec![2, 4, 3, 1]);
    assert_eq!(pids(&project(&samples, &cache, SortKey::Name, "")), vec![2, 4, 3, 1]);
    assert_eq!(pids(&project(&samples, &cache, SortKey::Nice, "")), vec![3, 1, 4, 2]);
}

#[test]
fn filter_matches_label_or_raw_name() {
    let mut table = std::collections::BTreeMap::new();
    table.insert(
        "com.example.mail".to_string(),
        taskmgr::config::LabelEntry {
            label: "Mail".into(),
            system: false,
        },
    );
    let cache = IdentityCache::new(TableResolver::new(table));
    let samples = vec![
        sample(1, "com.example.mail:push", 1.0, 1, 0),
        sample(2, "init", 1.0, 2, 0),
    ];
    // no runtime: lookup resolves inline
    assert_eq!(pids(&project(&samples, &cache, SortKey::Ram, "MAIL")), vec![1]);
    assert_eq!(pids(&project(&samples, &cache, SortKey::Ram, "push")), vec![1]);
    assert_eq!(pids(&project(&samples, &cache, SortKey::Ram, "  ")), vec![2, 1]);
    let views = project(&samples, &cache, SortKey::Ram, "mail");
    assert_eq!(views[0].label, "Mail");
}

#[test]
fn totals_derived_when_header_missing() {
    let t = derived_totals(&[
        sample(1, "a", 70.0, 10, 0),
        sample(2, "b", 60.0, 20, 0),
    ]);
    assert!(t.derived);
    assert_eq!(t.cpu_percent, 100.0);
    assert_eq!(t.ram_used_bytes, 30);
    assert_eq!(t.ram_size_bytes, None);
}

fn roster_with(reply: Arc<Mutex<Option<String>>>) -> (Arc<Bridge>, Arc<Roster>) {
    let connector = LoopbackConnector::new(move |req| match req {
        Request::ProcessList => reply.lock().unwrap().clone(),
        Request::SendSignal { pid, signal } => Some(if *pid == 1 && *signal == 9 { "1" } else { "0" }.into()),
        Request::DeepSnapshot { .. } => Some(
            "OVERVIEW:Name=com.example.mail|PID=1\nTHREADS:1:main|2:io".into(),
        ),
        Request::ExtendedInfo { pid } => Some(format!("Name=x|PID={pid}|Threads=3")),
        _ => Some(String::new()),
    });
    let bridge = Arc::new(Bridge::new(connector, BridgeTimeouts::default()));
    let roster = Roster::new(bridge.clone(), IdentityCache::new(NullResolver));
    (bridge, roster)
}

#[tokio::test]
async fn absent_poll_keeps_previous_roster() {
    let reply = Arc::new(Mutex::new(Some(
        "HEAD|12.5|2147483648|4294967296\n100|app:remote|104857600|3.2|0\nbad line\n".to_string(),
    )));
    let (bridge, roster) = roster_with(reply.clone());

    // not bound yet: nothing published
    assert!(!roster.poll_once().await);
    assert!(roster.current().totals.is_none());

    bridge.connect().await;
    assert!(roster.poll_once().await);
    let snap = roster.current();
    assert_eq!(pids(&snap.views), vec![100]);
    assert_eq!(snap.views[0].label, "app");
    assert_eq!(snap.skipped, 1);
    let totals = snap.totals.unwrap();
    assert!(!totals.derived);
    assert_eq!(totals.ram_size_bytes, Some(4294967296));

    // a transport failure keeps stale data rather than an empty list
    *reply.lock().unwrap() = None;
    assert!(!roster.poll_once().await);
    assert_eq!(pids(&roster.current().views), vec![100]);
}

#[tokio::test]
async fn sort_and_query_changes_republish() {
    let reply = Arc::new(Mutex::new(Some("1|a|10|9.0|0\n2|b|20|1.0|0\n".to_string())));
    let (bridge, roster) = roster_with(reply);
    bridge.connect().await;
    roster.poll_once().await;

    let mut rx = roster.subscribe();
    assert_eq!(pids(&rx.borrow_and_update().views), vec![2, 1]);
    assert_eq!(rx.borrow().sort, SortKey::Ram);

    roster.set_sort(SortKey::Cpu).await;
    assert!(rx.has_changed().unwrap());
    assert_eq!(pids(&rx.borrow_and_update().views), vec![1, 2]);

    roster.set_query("b").await;
    assert_eq!(pids(&rx.borrow_and_update().views), vec![2]);
    let totals = roster.current().totals.unwrap();
    assert!(totals.derived, "no header in this payload");
    assert_eq!(totals.ram_used_bytes, 30);
}

#[tokio::test]
async fn per_process_actions() {
    let reply = Arc::new(Mutex::new(Some("1|com.example.mail|10|1.0\n".to_string())));
    let (bridge, roster) = roster_with(reply);
    bridge.connect().await;

    assert!(roster.kill_process(1).await);
    assert!(!roster.send_signal(2, 15).await);

    let info = roster.extended_info(77).await.unwrap();
    assert_eq!(info.pid, 77);
    assert_eq!(info.threads, "3");

    let detail = roster.process_detail(1).await.unwrap();
    assert_eq!(detail.thread_count, 2);
    // NullResolver: dotted name falls back to itself
    assert_eq!(detail.label, "com.example.mail");
}

#[tokio::test]
async fn poller_stops_promptly() {
    let reply = Arc::new(Mutex::new(Some("1|a|10|1.0\n".to_string())));
    let (bridge, roster) = roster_with(reply);
    bridge.connect().await;

    let handle = roster.spawn(Duration::from_millis(20));
    let mut rx = roster.subscribe();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.process_count == 1))
        .await
        .expect("first poll published")
        .unwrap();
    tokio::time::timeout(Duration::from_millis(500), handle.stop())
        .await
        .expect("poller stopped within one interval");
}

#[tokio::test]
async fn poller_stops_during_a_slow_poll() {
    let connector = LoopbackConnector::new(|_| Some("1|a|10|1.0\n".to_string()))
        .with_delay(Duration::from_millis(1500));
    let bridge = Arc::new(Bridge::new(connector, BridgeTimeouts::default()));
    bridge.connect().await;
    let roster = Roster::new(bridge.clone(), IdentityCache::new(NullResolver));

    let handle = roster.spawn(Duration::from_millis(500));
    tokio::time::sleep(Duration::from_millis(50)).await;
    tokio::time::timeout(Duration::from_millis(300), handle.stop())
        .await
        .expect("poller stopped without waiting for the reply");
    assert!(roster.current().totals.is_none());
    assert_eq!(bridge.state(), taskmgr::ConnectionState::Disconnected);
}
