//! Metrics derivation engine: rolling series per category fed from mini and full snapshots.
//!
//! Two cadences write the same series. The cheap mini snapshot covers every category; the
//! expensive full snapshot is polled only for the focused category. Both go through
//! [`PerfEngine`], which decides per sample whether the mini value may be charted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::decode::{decode_mini, decode_snapshot};
use crate::history::{SeriesRange, TimeSeries};
use crate::poll::PollHandle;
use crate::rate::RateState;
use crate::types::{used_percent, Category, CategorySnapshot, DiskSnapshot, MiniSnapshot, NetSnapshot};

const MIB: f64 = 1024.0 * 1024.0;
/// Chart ceiling for disk throughput, MiB/s.
pub const DISK_CEILING_MIBPS: f64 = 100.0;
/// Chart ceiling for network throughput, Mbit/s.
pub const NET_CEILING_MBPS: f64 = 100.0;
/// Default window during which a full sample shadows the mini feed.
pub const DEFAULT_FULL_FRESHNESS: Duration = Duration::from_millis(1_200);

/// Which cadence produced the latest charted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Mini,
    Full,
}

pub fn series_range(category: Category) -> SeriesRange {
    match category {
        Category::Cpu | Category::Gpu | Category::Memory => SeriesRange::Percent,
        Category::Disk => SeriesRange::Ceiling(DISK_CEILING_MIBPS),
        Category::Net => SeriesRange::Ceiling(NET_CEILING_MBPS),
    }
}

pub fn series_unit(category: Category) -> &'static str {
    match category {
        Category::Cpu | Category::Gpu | Category::Memory => "%",
        Category::Disk => "MiB/s",
        Category::Net => "Mbit/s",
    }
}

/// Network adapter label shown next to the interface name.
pub fn adapter_label(iface: &str) -> &'static str {
    if iface.starts_with("wlan") {
        "Wi-Fi"
    } else {
        "Ethernet"
    }
}

/// Snapshot timestamps of 0 or below mean "not reported"; use the local clock instead.
fn effective_ts(ts_ms: i64) -> i64 {
    if ts_ms > 0 {
        ts_ms
    } else {
        chrono::Utc::now().timestamp_millis()
    }
}

fn disk_mibps(read_bps: f64, write_bps: f64) -> f64 {
    read_bps.max(write_bps) / MIB
}

fn net_mbps(send_bps: f64, recv_bps: f64) -> f64 {
    send_bps.max(recv_bps) * 8.0 / 1_000_000.0
}

/// Rx/tx pair of rate states for one counter family.
#[derive(Debug, Default)]
struct DuplexRate {
    rx: RateState,
    tx: RateState,
}

impl DuplexRate {
    fn derive(&mut self, id: &str, rx: u64, tx: u64, ts_ms: i64) -> (f64, f64) {
        (
            self.rx.derive_rate(id, rx, ts_ms),
            self.tx.derive_rate(id, tx, ts_ms),
        )
    }
}

#[derive(Debug)]
struct CategoryState {
    series: TimeSeries,
    full: Option<CategorySnapshot>,
    degraded: bool,
    source: Option<Source>,
}

impl CategoryState {
    fn new(category: Category) -> Self {
        Self {
            series: TimeSeries::new(series_range(category)),
            full: None,
            degraded: false,
            source: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryView {
    pub category: Category,
    pub unit: &'static str,
    /// Exactly 60 points once anything was charted, empty before.
    pub series: Vec<f64>,
    pub latest: Option<f64>,
    pub full: Option<CategorySnapshot>,
    pub degraded: bool,
    pub source: Option<Source>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerfSnapshot {
    pub focus: Category,
    pub categories: Vec<CategoryView>,
}

impl PerfSnapshot {
    pub fn view(&self, category: Category) -> Option<&CategoryView> {
        self.categories.iter().find(|v| v.category == category)
    }
}

/// Single writer for every category series.
#[derive(Debug)]
pub struct PerfEngine {
    focus: Category,
    freshness: Duration,
    last_full: BTreeMap<Category, Instant>,
    state: BTreeMap<Category, CategoryState>,
    mini_net: DuplexRate,
    full_net: DuplexRate,
    full_disk: DuplexRate,
    last_avg_response_ms: Option<f64>,
    cpu_snapshots: u64,
}

impl PerfEngine {
    pub fn new(focus: Category, freshness: Duration) -> Self {
        Self {
            focus,
            freshness,
            last_full: BTreeMap::new(),
            state: Category::ALL
                .into_iter()
                .map(|c| (c, CategoryState::new(c)))
                .collect(),
            mini_net: DuplexRate::default(),
            full_net: DuplexRate::default(),
            full_disk: DuplexRate::default(),
            last_avg_response_ms: None,
            cpu_snapshots: 0,
        }
    }

    pub fn focus(&self) -> Category {
        self.focus
    }

    pub fn set_focus(&mut self, focus: Category) {
        if self.focus != focus {
            debug!(from = %self.focus, to = %focus, "perf focus changed");
            self.focus = focus;
        }
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    fn entry(&mut self, category: Category) -> &mut CategoryState {
        self.state
            .entry(category)
            .or_insert_with(|| CategoryState::new(category))
    }

    /// Clamp into the category's range and append. Returns the stored value.
    pub fn push_sample(&mut self, category: Category, value: f64) -> f64 {
        self.entry(category).series.push(value)
    }

    /// True while a full sample for the focused category is fresh enough to shadow mini.
    pub fn should_use_full(&self, category: Category, now: Instant) -> bool {
        if category != self.focus {
            return false;
        }
        match self.last_full.get(&category) {
            Some(at) => now.saturating_duration_since(*at) < self.freshness,
            None => false,
        }
    }

    /// Feed one full snapshot. A snapshot carrying an error is stored and marks the category
    /// degraded; nothing is charted from it. Only the focused category's series is written.
    pub fn ingest_full(&mut self, snapshot: CategorySnapshot, now: Instant) {
        let category = snapshot.category();

        // a degraded snapshot never shadows the mini feed
        if !snapshot.error().is_empty() {
            warn!(%category, error = snapshot.error(), "source reported a degraded snapshot");
            let st = self.entry(category);
            st.degraded = true;
            st.full = Some(snapshot);
            return;
        }

        let (snapshot, value) = match snapshot {
            CategorySnapshot::Cpu(cpu) => {
                self.cpu_snapshots += 1;
                if self.cpu_snapshots % 10 == 1 {
                    debug!(
                        temp_c = cpu.cpu_temp_c,
                        source = %cpu.cpu_temp_source,
                        raw = cpu.cpu_temp_raw,
                        candidates = %cpu.cpu_temp_candidates,
                        "cpu temperature source"
                    );
                }
                let v = (cpu.usage_percent >= 0.0).then_some(cpu.usage_percent);
                (CategorySnapshot::Cpu(cpu), v)
            }
            CategorySnapshot::Gpu(gpu) => {
                let v = (gpu.util_percent >= 0.0).then_some(gpu.util_percent);
                (CategorySnapshot::Gpu(gpu), v)
            }
            CategorySnapshot::Memory(mem) => {
                let v = mem.used_percent();
                (CategorySnapshot::Memory(mem), v)
            }
            CategorySnapshot::Disk(disk) => {
                let (disk, v) = self.enrich_disk(disk);
                (CategorySnapshot::Disk(disk), v)
            }
            CategorySnapshot::Net(net) => {
                let (net, v) = self.enrich_net(net);
                (CategorySnapshot::Net(net), v)
            }
        };

        if value.is_some() {
            self.last_full.insert(category, now);
        }
        let focused = category == self.focus;
        let st = self.entry(category);
        st.degraded = false;
        st.full = Some(snapshot);
        if !focused {
            // focus moved while the call was in flight; mini owns this series now
            return;
        }
        if let Some(v) = value {
            st.series.push(v);
            st.source = Some(Source::Full);
        }
    }

    fn enrich_disk(&mut self, mut disk: DiskSnapshot) -> (DiskSnapshot, Option<f64>) {
        if disk.avg_response_ms > 0.0 {
            self.last_avg_response_ms = Some(disk.avg_response_ms);
        }
        disk.avg_response_ms_display = self.last_avg_response_ms;

        let rates = if disk.read_bytes >= 0 && disk.write_bytes >= 0 {
            let ts = effective_ts(disk.timestamp_ms);
            Some(self.full_disk.derive(
                &disk.block_device,
                disk.read_bytes as u64,
                disk.write_bytes as u64,
                ts,
            ))
        } else if disk.read_bps >= 0 || disk.write_bps >= 0 {
            Some((disk.read_bps.max(0) as f64, disk.write_bps.max(0) as f64))
        } else {
            None
        };
        (disk, rates.map(|(r, w)| disk_mibps(r, w)))
    }

    fn enrich_net(&mut self, mut net: NetSnapshot) -> (NetSnapshot, Option<f64>) {
        net.adapter_label = adapter_label(&net.iface).to_string();
        net.packets_total = net.rx_packets.max(0) + net.tx_packets.max(0);
        if net.rx_bytes < 0 || net.tx_bytes < 0 {
            return (net, None);
        }
        let ts = effective_ts(net.timestamp_ms);
        let (recv, send) =
            self.full_net
                .derive(&net.iface, net.rx_bytes as u64, net.tx_bytes as u64, ts);
        net.recv_bps = recv;
        net.send_bps = send;
        (net, Some(net_mbps(send, recv)))
    }

    /// Feed one mini snapshot. Categories shadowed by a fresh full sample are skipped.
    pub fn ingest_mini(&mut self, mini: &MiniSnapshot, now: Instant) {
        let ts = effective_ts(mini.timestamp_ms);

        // keep the mini baseline current even while full shadows the net chart
        let net = if mini.net_rx_bytes >= 0 && mini.net_tx_bytes >= 0 {
            let (recv, send) = self.mini_net.derive(
                &mini.net_iface,
                mini.net_rx_bytes as u64,
                mini.net_tx_bytes as u64,
                ts,
            );
            Some(net_mbps(send, recv))
        } else {
            None
        };

        let disk = if mini.disk_read_bps >= 0 || mini.disk_write_bps >= 0 {
            Some(disk_mibps(
                mini.disk_read_bps.max(0) as f64,
                mini.disk_write_bps.max(0) as f64,
            ))
        } else {
            None
        };

        let values = [
            (Category::Cpu, (mini.cpu_util >= 0.0).then_some(mini.cpu_util)),
            (Category::Gpu, (mini.gpu_util >= 0.0).then_some(mini.gpu_util)),
            (
                Category::Memory,
                used_percent(mini.mem_used_bytes, mini.mem_total_bytes),
            ),
            (Category::Disk, disk),
            (Category::Net, net),
        ];

        for (category, value) in values {
            if self.should_use_full(category, now) {
                continue;
            }
            if let Some(v) = value {
                let st = self.entry(category);
                st.series.push(v);
                st.source = Some(Source::Mini);
            }
        }
    }

    pub fn snapshot(&self) -> PerfSnapshot {
        PerfSnapshot {
            focus: self.focus,
            categories: self
                .state
                .iter()
                .map(|(category, st)| CategoryView {
                    category: *category,
                    unit: series_unit(*category),
                    series: st.series.to_vec(),
                    latest: st.series.latest(),
                    full: st.full.clone(),
                    degraded: st.degraded,
                    source: st.source,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PerfIntervals {
    pub mini: Duration,
    pub full: Duration,
}

impl Default for PerfIntervals {
    fn default() -> Self {
        Self {
            mini: Duration::from_millis(1_000),
            full: Duration::from_millis(1_000),
        }
    }
}

/// Engine plus its pollers and the published view.
pub struct PerfMonitor {
    bridge: Arc<Bridge>,
    engine: Mutex<PerfEngine>,
    tx: watch::Sender<PerfSnapshot>,
}

impl PerfMonitor {
    pub fn new(bridge: Arc<Bridge>, engine: PerfEngine) -> Arc<Self> {
        let (tx, _) = watch::channel(engine.snapshot());
        Arc::new(Self {
            bridge,
            engine: Mutex::new(engine),
            tx,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<PerfSnapshot> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> PerfSnapshot {
        self.tx.borrow().clone()
    }

    pub async fn set_focus(&self, focus: Category) {
        let mut engine = self.engine.lock().await;
        engine.set_focus(focus);
        self.tx.send_replace(engine.snapshot());
    }

    pub async fn focus(&self) -> Category {
        self.engine.lock().await.focus()
    }

    /// One mini cycle. Returns whether anything was ingested.
    pub async fn poll_mini(&self) -> bool {
        let Some(raw) = self.bridge.mini_snapshot().await else {
            return false;
        };
        let mini = match decode_mini(&raw) {
            Ok(m) => m,
            Err(e) => {
                warn!("mini snapshot decode failed: {e}");
                return false;
            }
        };
        let mut engine = self.engine.lock().await;
        engine.ingest_mini(&mini, Instant::now());
        self.tx.send_replace(engine.snapshot());
        true
    }

    /// One full cycle for the focused category.
    pub async fn poll_full(&self) -> bool {
        let category = self.focus().await;
        let Some(raw) = self.bridge.snapshot(category).await else {
            return false;
        };
        let snapshot = match decode_snapshot(category, &raw) {
            Ok(s) => s,
            Err(e) => {
                warn!(%category, "full snapshot decode failed: {e}");
                return false;
            }
        };
        let mut engine = self.engine.lock().await;
        engine.ingest_full(snapshot, Instant::now());
        self.tx.send_replace(engine.snapshot());
        true
    }

    pub fn spawn_mini(self: &Arc<Self>, every: Duration) -> PollHandle {
        let this = self.clone();
        info!(interval_ms = every.as_millis() as u64, "mini snapshot poller started");
        PollHandle::every(every, move || {
            let this = this.clone();
            async move {
                this.poll_mini().await;
            }
        })
    }

    pub fn spawn_full(self: &Arc<Self>, every: Duration) -> PollHandle {
        let this = self.clone();
        info!(interval_ms = every.as_millis() as u64, "full snapshot poller started");
        PollHandle::every(every, move || {
            let this = this.clone();
            async move {
                this.poll_full().await;
            }
        })
    }

    pub fn spawn(self: &Arc<Self>, intervals: PerfIntervals) -> (PollHandle, PollHandle) {
        (self.spawn_mini(intervals.mini), self.spawn_full(intervals.full))
    }
}
