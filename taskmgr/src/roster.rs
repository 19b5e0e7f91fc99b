//! Process roster: poll, decode, enrich with identities, sort and filter, publish.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::decode::{decode_deep_snapshot, decode_extended_info, decode_roster};
use crate::identity::{IconRef, IdentityCache};
use crate::poll::PollHandle;
use crate::types::{AggregateHeader, ProcessDetail, ProcessOverview, ProcessSample};

pub const SIGKILL: i32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// CPU desc, then RAM desc.
    Cpu,
    /// RAM desc, then CPU desc.
    #[default]
    Ram,
    /// Label, case-insensitive.
    Name,
    /// Nice value ascending.
    Nice,
}

impl SortKey {
    pub fn parse(s: &str) -> Option<SortKey> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Some(SortKey::Cpu),
            "ram" | "mem" | "memory" => Some(SortKey::Ram),
            "name" | "label" => Some(SortKey::Name),
            "nice" | "priority" => Some(SortKey::Nice),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessView {
    pub pid: i32,
    pub name: String,
    pub label: String,
    pub icon: IconRef,
    pub is_system: bool,
    pub cpu_percent: f64,
    pub ram_bytes: u64,
    pub nice: i32,
}

/// Machine totals, either from the source's header or summed from the samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Totals {
    pub cpu_percent: f64,
    pub ram_used_bytes: u64,
    /// Unknown unless the source reported it.
    pub ram_size_bytes: Option<u64>,
    pub derived: bool,
}

impl From<AggregateHeader> for Totals {
    fn from(h: AggregateHeader) -> Self {
        Self {
            cpu_percent: h.total_cpu_percent,
            ram_used_bytes: h.total_ram_used_bytes,
            ram_size_bytes: Some(h.total_ram_size_bytes),
            derived: false,
        }
    }
}

/// Summed cpu (capped at 100) and ram over every sample.
pub fn derived_totals(samples: &[ProcessSample]) -> Totals {
    Totals {
        cpu_percent: samples.iter().map(|s| s.cpu_percent).sum::<f64>().min(100.0),
        ram_used_bytes: samples.iter().map(|s| s.ram_bytes).sum(),
        ram_size_bytes: None,
        derived: true,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterSnapshot {
    pub header: Option<AggregateHeader>,
    pub totals: Option<Totals>,
    pub views: Vec<ProcessView>,
    /// Processes in the last payload before filtering.
    pub process_count: usize,
    pub skipped: usize,
    pub sort: SortKey,
    pub query: String,
}

impl RosterSnapshot {
    fn empty(sort: SortKey, query: String) -> Self {
        Self {
            header: None,
            totals: None,
            views: Vec::new(),
            process_count: 0,
            skipped: 0,
            sort,
            query,
        }
    }
}

fn compare(a: &ProcessView, b: &ProcessView, key: SortKey) -> Ordering {
    let primary = match key {
        SortKey::Cpu => b
            .cpu_percent
            .total_cmp(&a.cpu_percent)
            .then(b.ram_bytes.cmp(&a.ram_bytes)),
        SortKey::Ram => b
            .ram_bytes
            .cmp(&a.ram_bytes)
            .then(b.cpu_percent.total_cmp(&a.cpu_percent)),
        SortKey::Name => a.label.to_lowercase().cmp(&b.label.to_lowercase()),
        SortKey::Nice => a.nice.cmp(&b.nice),
    };
    primary.then(a.pid.cmp(&b.pid))
}

/// Samples x identities x sort x query -> the displayed view.
pub fn project(
    samples: &[ProcessSample],
    identity: &IdentityCache,
    sort: SortKey,
    query: &str,
) -> Vec<ProcessView> {
    let needle = query.trim().to_lowercase();
    let mut views: Vec<ProcessView> = samples
        .iter()
        .map(|s| {
            let id = identity.lookup(&s.name);
            ProcessView {
                pid: s.pid,
                name: s.name.clone(),
                label: id.label,
                icon: id.icon,
                is_system: id.is_system,
                cpu_percent: s.cpu_percent,
                ram_bytes: s.ram_bytes,
                nice: s.nice,
            }
        })
        .filter(|v| {
            needle.is_empty()
                || v.label.to_lowercase().contains(&needle)
                || v.name.to_lowercase().contains(&needle)
        })
        .collect();
    views.sort_by(|a, b| compare(a, b, sort));
    views
}

#[derive(Default)]
struct RosterState {
    header: Option<AggregateHeader>,
    samples: Vec<ProcessSample>,
    skipped: usize,
    polled: bool,
    sort: SortKey,
    query: String,
}

pub struct Roster {
    bridge: Arc<Bridge>,
    identity: IdentityCache,
    state: Mutex<RosterState>,
    tx: watch::Sender<RosterSnapshot>,
}

impl Roster {
    pub fn new(bridge: Arc<Bridge>, identity: IdentityCache) -> Arc<Self> {
        Self::with_view(bridge, identity, SortKey::default(), String::new())
    }

    pub fn with_view(
        bridge: Arc<Bridge>,
        identity: IdentityCache,
        sort: SortKey,
        query: String,
    ) -> Arc<Self> {
        let (tx, _) = watch::channel(RosterSnapshot::empty(sort, query.clone()));
        Arc::new(Self {
            bridge,
            identity,
            state: Mutex::new(RosterState {
                sort,
                query,
                ..RosterState::default()
            }),
            tx,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<RosterSnapshot> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> RosterSnapshot {
        self.tx.borrow().clone()
    }

    pub fn identity(&self) -> &IdentityCache {
        &self.identity
    }

    fn publish(&self, st: &RosterState) {
        let totals = if st.polled {
            Some(
                st.header
                    .map(Totals::from)
                    .unwrap_or_else(|| derived_totals(&st.samples)),
            )
        } else {
            None
        };
        self.tx.send_replace(RosterSnapshot {
            header: st.header,
            totals,
            views: project(&st.samples, &self.identity, st.sort, &st.query),
            process_count: st.samples.len(),
            skipped: st.skipped,
            sort: st.sort,
            query: st.query.clone(),
        });
    }

    /// One poll cycle. An absent reply keeps the previous roster.
    pub async fn poll_once(&self) -> bool {
        let Some(raw) = self.bridge.process_list().await else {
            debug!("process list unavailable, keeping previous roster");
            return false;
        };
        let decoded = decode_roster(&raw);
        if decoded.skipped > 0 {
            debug!(skipped = decoded.skipped, "dropped malformed roster lines");
        }
        let mut st = self.state.lock().await;
        st.header = decoded.value.header;
        st.samples = decoded.value.samples;
        st.skipped = decoded.skipped;
        st.polled = true;
        self.publish(&st);
        true
    }

    /// Re-project without polling, e.g. after identities landed.
    pub async fn refresh(&self) {
        let st = self.state.lock().await;
        self.publish(&st);
    }

    pub async fn set_sort(&self, sort: SortKey) {
        let mut st = self.state.lock().await;
        if st.sort != sort {
            st.sort = sort;
            self.publish(&st);
        }
    }

    pub async fn set_query(&self, query: &str) {
        let mut st = self.state.lock().await;
        if st.query != query {
            st.query = query.to_string();
            self.publish(&st);
        }
    }

    /// Poll every `every` and re-project whenever the identity cache publishes.
    pub fn spawn(self: &Arc<Self>, every: Duration) -> PollHandle {
        let this = self.clone();
        info!(interval_ms = every.as_millis() as u64, "roster poller started");
        PollHandle::spawn_with(move |mut stop| async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut identities = this.identity.subscribe();
            loop {
                tokio::select! {
                    _ = stop.stopped() => break,
                    _ = interval.tick() => {
                        tokio::select! {
                            _ = stop.stopped() => break,
                            _ = this.poll_once() => {}
                        }
                    }
                    changed = identities.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        this.refresh().await;
                    }
                }
            }
        })
    }

    pub async fn send_signal(&self, pid: i32, signal: i32) -> bool {
        let ok = self.bridge.send_signal(pid, signal).await;
        if ok {
            info!(pid, signal, "signal delivered");
        } else {
            warn!(pid, signal, "signal not delivered");
        }
        ok
    }

    /// SIGKILL, then refresh so the process drops out right away.
    pub async fn kill_process(&self, pid: i32) -> bool {
        let ok = self.send_signal(pid, SIGKILL).await;
        if ok {
            self.poll_once().await;
        }
        ok
    }

    pub async fn extended_info(&self, pid: i32) -> Option<ProcessOverview> {
        let raw = self.bridge.extended_info(pid).await?;
        Some(decode_extended_info(&raw))
    }

    /// Deep snapshot, labelled through the identity cache.
    pub async fn process_detail(&self, pid: i32) -> Option<ProcessDetail> {
        let raw = self.bridge.deep_snapshot(pid).await?;
        let decoded = decode_deep_snapshot(&raw);
        if decoded.skipped > 0 {
            debug!(pid, skipped = decoded.skipped, "dropped malformed detail records");
        }
        let mut detail = decoded.value;
        let name = if detail.overview.name.is_empty() {
            self.state
                .lock()
                .await
                .samples
                .iter()
                .find(|s| s.pid == pid)
                .map(|s| s.name.clone())
                .unwrap_or_default()
        } else {
            detail.overview.name.clone()
        };
        if !name.is_empty() {
            detail.label = self.identity.resolve(&name).await.label;
        }
        Some(detail)
    }
}
