//! JSON category snapshots, read field by field with per-field defaults.

use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::error::DecodeError;
use crate::types::{
    Category, CategorySnapshot, CpuSnapshot, DiskSnapshot, GpuSnapshot, MemorySnapshot,
    MiniSnapshot, NetSnapshot,
};

fn empty_object() -> &'static Map<String, Value> {
    static EMPTY: OnceLock<Map<String, Value>> = OnceLock::new();
    EMPTY.get_or_init(Map::new)
}

/// Lenient view over a JSON object: missing keys and wrong types read as the given default.
#[derive(Clone, Copy)]
struct Fields<'a>(&'a Map<String, Value>);

impl<'a> Fields<'a> {
    fn f64(self, key: &str, default: f64) -> f64 {
        self.0
            .get(key)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }

    fn i64(self, key: &str, default: i64) -> i64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_u64().map(|u| u.min(i64::MAX as u64) as i64))
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
                .unwrap_or(default),
            _ => default,
        }
    }

    fn str(self, key: &str, default: &str) -> String {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    fn bool(self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    /// A nested object; absent or non-object nesting reads as an empty object.
    fn obj(self, key: &str) -> Fields<'a> {
        match self.0.get(key) {
            Some(Value::Object(m)) => Fields(m),
            _ => Fields(empty_object()),
        }
    }
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, DecodeError> {
    if raw.trim().is_empty() {
        return Err(DecodeError::Empty);
    }
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(m) => Ok(m),
        _ => Err(DecodeError::NotAnObject),
    }
}

pub fn decode_cpu(raw: &str) -> Result<CpuSnapshot, DecodeError> {
    let m = parse_object(raw)?;
    let f = Fields(&m);
    Ok(CpuSnapshot {
        cpu_name: f.str("cpuName", ""),
        cores_physical: f.i64("coresPhysical", 0),
        cores_logical: f.i64("coresLogical", 0),
        core_layout: f.str("coreLayout", ""),
        core_layout_labeled: f.str("coreLayoutLabeled", ""),
        cpu_temp_c: f.f64("cpuTempC", -1.0),
        cpu_temp_source: f.str("cpuTempSource", ""),
        cpu_temp_raw: f.i64("cpuTempRaw", 0),
        cpu_temp_candidates: f.str("cpuTempCandidates", ""),
        cpu_temp_unit_assumption: f.str("cpuTempUnitAssumption", ""),
        usage_percent: f.f64("usagePercent", -1.0),
        max_freq_khz: f.i64("maxFreqKHz", 0),
        processes: f.i64("processes", 0),
        threads: f.i64("threads", 0),
        handles: f.i64("handles", 0),
        uptime_seconds: f.i64("uptimeSeconds", 0),
        error: f.str("error", ""),
    })
}

pub fn decode_gpu(raw: &str) -> Result<GpuSnapshot, DecodeError> {
    let m = parse_object(raw)?;
    let f = Fields(&m);
    Ok(GpuSnapshot {
        gpu_name: f.str("gpuName", ""),
        util_percent: f.f64("utilPercent", -1.0),
        temp_c: f.f64("tempC", -1.0),
        vulkan_api_version: f.str("vulkanApiVersion", ""),
        vulkan_driver_version: f.str("vulkanDriverVersion", ""),
        driver_date_iso: f.str("driverDateIso", ""),
        dedicated_budget_bytes: f.i64("dedicatedBudgetBytes", 0),
        dedicated_used_bytes: f.i64("dedicatedUsedBytes", 0),
        shared_budget_bytes: f.i64("sharedBudgetBytes", 0),
        shared_used_bytes: f.i64("sharedUsedBytes", 0),
        dedicated_total_bytes: f.i64("dedicatedTotalBytes", 0),
        shared_total_bytes: f.i64("sharedTotalBytes", 0),
        has_memory_budget: f.bool("hasMemoryBudget", false),
        error: f.str("error", ""),
    })
}

pub fn decode_memory(raw: &str) -> Result<MemorySnapshot, DecodeError> {
    let m = parse_object(raw)?;
    let f = Fields(&m);
    Ok(MemorySnapshot {
        total_bytes: f.i64("totalBytes", 0),
        used_bytes: f.i64("usedBytes", 0),
        available_bytes: f.i64("availableBytes", 0),
        cached_bytes: f.i64("cachedBytes", 0),
        compressed_bytes: f.i64("compressedBytes", 0),
        committed_used_bytes: f.i64("committedUsedBytes", 0),
        committed_limit_bytes: f.i64("committedLimitBytes", 0),
        timestamp_ms: f.i64("timestampMs", 0),
        error: f.str("error", ""),
    })
}

pub fn decode_disk(raw: &str) -> Result<DiskSnapshot, DecodeError> {
    let m = parse_object(raw)?;
    let f = Fields(&m);
    Ok(DiskSnapshot {
        total_bytes: f.i64("totalBytes", 0),
        used_bytes: f.i64("usedBytes", 0),
        available_bytes: f.i64("availableBytes", 0),
        read_bps: f.i64("readBps", -1),
        write_bps: f.i64("writeBps", -1),
        read_bytes: f.i64("readBytes", -1),
        write_bytes: f.i64("writeBytes", -1),
        active_time_pct: f.f64("activeTimePct", -1.0),
        avg_response_ms: f.f64("avgResponseMs", -1.0),
        avg_response_ms_display: None,
        mount_point: f.str("mountPoint", ""),
        fs_type: f.str("fsType", ""),
        block_device: f.str("blockDevice", ""),
        timestamp_ms: f.i64("timestampMs", 0),
        error: f.str("error", ""),
    })
}

pub fn decode_net(raw: &str) -> Result<NetSnapshot, DecodeError> {
    let m = parse_object(raw)?;
    let f = Fields(&m);
    Ok(NetSnapshot {
        iface: f.str("iface", ""),
        rx_bytes: f.i64("rxBytes", -1),
        tx_bytes: f.i64("txBytes", -1),
        rx_packets: f.i64("rxPackets", 0),
        tx_packets: f.i64("txPackets", 0),
        timestamp_ms: f.i64("timestampMs", 0),
        error: f.str("error", ""),
        ..NetSnapshot::default()
    })
}

/// Combined snapshot; a missing nested category degrades all of its fields to defaults.
pub fn decode_mini(raw: &str) -> Result<MiniSnapshot, DecodeError> {
    let m = parse_object(raw)?;
    let f = Fields(&m);
    let cpu = f.obj("cpu");
    let mem = f.obj("mem");
    let disk = f.obj("disk");
    let net = f.obj("net");
    let gpu = f.obj("gpu");
    Ok(MiniSnapshot {
        timestamp_ms: f.i64("timestampMs", 0),
        cpu_util: cpu.f64("util", -1.0),
        cpu_max_freq_khz: cpu.i64("maxFreqKHz", 0),
        mem_used_bytes: mem.i64("usedBytes", 0),
        mem_total_bytes: mem.i64("totalBytes", 0),
        disk_read_bps: disk.i64("readBps", -1),
        disk_write_bps: disk.i64("writeBps", -1),
        net_iface: net.str("iface", ""),
        net_rx_bytes: net.i64("rxBytes", -1),
        net_tx_bytes: net.i64("txBytes", -1),
        gpu_util: gpu.f64("util", -1.0),
    })
}

pub fn decode_snapshot(category: Category, raw: &str) -> Result<CategorySnapshot, DecodeError> {
    Ok(match category {
        Category::Cpu => CategorySnapshot::Cpu(decode_cpu(raw)?),
        Category::Gpu => CategorySnapshot::Gpu(decode_gpu(raw)?),
        Category::Memory => CategorySnapshot::Memory(decode_memory(raw)?),
        Category::Disk => CategorySnapshot::Disk(decode_disk(raw)?),
        Category::Net => CategorySnapshot::Net(decode_net(raw)?),
    })
}
