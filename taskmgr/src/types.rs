//! Typed records produced by the decoders and consumed by the roster and derivation engine.
//!
//! Snapshot fields carry explicit "unknown" sentinels (negative numbers, empty strings) so an
//! omitted field is never mistaken for a real zero reading.

use serde::Serialize;
use std::fmt;

/// One row of the process roster. Superseded, never mutated, by the next poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSample {
    pub pid: i32,
    pub name: String,
    /// Clamped to 0..=100 at decode time.
    pub cpu_percent: f64,
    pub ram_bytes: u64,
    pub nice: i32,
}

impl ProcessSample {
    /// Wire form: `pid|name|ramBytes|cpuPercent|nice`.
    pub fn to_wire(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.pid, self.name, self.ram_bytes, self.cpu_percent, self.nice
        )
    }
}

/// Optional leading `HEAD|...` record of a roster payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateHeader {
    pub total_cpu_percent: f64,
    pub total_ram_used_bytes: u64,
    pub total_ram_size_bytes: u64,
}

impl AggregateHeader {
    pub fn to_wire(&self) -> String {
        format!(
            "HEAD|{}|{}|{}",
            self.total_cpu_percent, self.total_ram_used_bytes, self.total_ram_size_bytes
        )
    }
}

/// Flat `key=value` process overview shared by the extended-info line and the
/// OVERVIEW section of a deep snapshot. Missing keys decode to "".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessOverview {
    pub name: String,
    /// 0 when missing or non-numeric.
    pub pid: i32,
    pub ppid: String,
    pub user: String,
    pub state: String,
    pub threads: String,
    pub nice: String,
    pub priority: String,
    pub oom_score: String,
    pub elapsed_time: String,
    pub exe_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleEntry {
    pub file_name: String,
    pub full_path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadEntry {
    pub tid: u32,
    pub name: String,
}

/// Decoded deep snapshot. Counter fields default to "0" when the STATS section omits them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessDetail {
    pub overview: ProcessOverview,
    /// Display label from the identity cache; empty until enriched.
    pub label: String,
    pub thread_count: usize,
    pub voluntary_ctx_switches: String,
    pub nonvoluntary_ctx_switches: String,
    pub minor_page_faults: String,
    pub major_page_faults: String,
    pub modules: Vec<ModuleEntry>,
    pub threads: Vec<ThreadEntry>,
}

/// Metric domains that have a full snapshot and a rolling series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Cpu,
    Gpu,
    Memory,
    Disk,
    Net,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Cpu,
        Category::Gpu,
        Category::Memory,
        Category::Disk,
        Category::Net,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Cpu => "cpu",
            Category::Gpu => "gpu",
            Category::Memory => "memory",
            Category::Disk => "disk",
            Category::Net => "net",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Some(Category::Cpu),
            "gpu" => Some(Category::Gpu),
            "memory" | "mem" | "ram" => Some(Category::Memory),
            "disk" => Some(Category::Disk),
            "net" | "network" | "ethernet" => Some(Category::Net),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuSnapshot {
    pub cpu_name: String,
    pub cores_physical: i64,
    pub cores_logical: i64,
    pub core_layout: String,
    pub core_layout_labeled: String,
    /// -1 when unknown.
    pub cpu_temp_c: f64,
    pub cpu_temp_source: String,
    pub cpu_temp_raw: i64,
    pub cpu_temp_candidates: String,
    pub cpu_temp_unit_assumption: String,
    /// -1 when unknown.
    pub usage_percent: f64,
    pub max_freq_khz: i64,
    pub processes: i64,
    pub threads: i64,
    pub handles: i64,
    pub uptime_seconds: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpuSnapshot {
    pub gpu_name: String,
    /// -1 when unknown.
    pub util_percent: f64,
    /// -1 when unknown.
    pub temp_c: f64,
    pub vulkan_api_version: String,
    pub vulkan_driver_version: String,
    pub driver_date_iso: String,
    pub dedicated_budget_bytes: i64,
    pub dedicated_used_bytes: i64,
    pub shared_budget_bytes: i64,
    pub shared_used_bytes: i64,
    pub dedicated_total_bytes: i64,
    pub shared_total_bytes: i64,
    pub has_memory_budget: bool,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemorySnapshot {
    pub total_bytes: i64,
    pub used_bytes: i64,
    pub available_bytes: i64,
    pub cached_bytes: i64,
    pub compressed_bytes: i64,
    pub committed_used_bytes: i64,
    pub committed_limit_bytes: i64,
    pub timestamp_ms: i64,
    pub error: String,
}

impl MemorySnapshot {
    /// Used / total as a percentage; None when total is unknown.
    pub fn used_percent(&self) -> Option<f64> {
        used_percent(self.used_bytes, self.total_bytes)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskSnapshot {
    pub total_bytes: i64,
    pub used_bytes: i64,
    pub available_bytes: i64,
    /// -1 when unknown.
    pub read_bps: i64,
    /// -1 when unknown.
    pub write_bps: i64,
    /// Cumulative counters; -1 when the source does not report them.
    pub read_bytes: i64,
    pub write_bytes: i64,
    pub active_time_pct: f64,
    pub avg_response_ms: f64,
    /// Last positive average response time seen, kept across samples that report none.
    pub avg_response_ms_display: Option<f64>,
    pub mount_point: String,
    pub fs_type: String,
    pub block_device: String,
    pub timestamp_ms: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetSnapshot {
    pub iface: String,
    /// Cumulative counters; -1 when unknown.
    pub rx_bytes: i64,
    pub tx_bytes: i64,
    pub rx_packets: i64,
    pub tx_packets: i64,
    pub timestamp_ms: i64,
    pub error: String,
    // Filled in by the derivation engine.
    pub adapter_label: String,
    pub send_bps: f64,
    pub recv_bps: f64,
    pub packets_total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MiniSnapshot {
    pub timestamp_ms: i64,
    /// -1 when unknown.
    pub cpu_util: f64,
    pub cpu_max_freq_khz: i64,
    pub mem_used_bytes: i64,
    pub mem_total_bytes: i64,
    /// -1 when unknown.
    pub disk_read_bps: i64,
    pub disk_write_bps: i64,
    pub net_iface: String,
    /// Cumulative counters; -1 when unknown.
    pub net_rx_bytes: i64,
    pub net_tx_bytes: i64,
    /// -1 when unknown.
    pub gpu_util: f64,
}

/// Latest full snapshot for one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum CategorySnapshot {
    Cpu(CpuSnapshot),
    Gpu(GpuSnapshot),
    Memory(MemorySnapshot),
    Disk(DiskSnapshot),
    Net(NetSnapshot),
}

impl CategorySnapshot {
    pub fn category(&self) -> Category {
        match self {
            CategorySnapshot::Cpu(_) => Category::Cpu,
            CategorySnapshot::Gpu(_) => Category::Gpu,
            CategorySnapshot::Memory(_) => Category::Memory,
            CategorySnapshot::Disk(_) => Category::Disk,
            CategorySnapshot::Net(_) => Category::Net,
        }
    }

    /// The source-reported error string, empty when the snapshot is clean.
    pub fn error(&self) -> &str {
        match self {
            CategorySnapshot::Cpu(s) => &s.error,
            CategorySnapshot::Gpu(s) => &s.error,
            CategorySnapshot::Memory(s) => &s.error,
            CategorySnapshot::Disk(s) => &s.error,
            CategorySnapshot::Net(s) => &s.error,
        }
    }
}

pub(crate) fn used_percent(used: i64, total: i64) -> Option<f64> {
    if total <= 0 || used < 0 {
        return None;
    }
    Some(used as f64 / total as f64 * 100.0)
}
