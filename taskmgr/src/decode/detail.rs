//! Process detail formats: the flat extended-info line and the sectioned deep snapshot.

use std::collections::HashMap;

use super::Decoded;
use crate::types::{ModuleEntry, ProcessDetail, ProcessOverview, ThreadEntry};

/// `key=value|key=value...`, key split on the first `=` only.
fn parse_pairs(body: &str) -> HashMap<&str, &str> {
    body.split('|')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim(), v))
        .collect()
}

fn overview_from(map: &HashMap<&str, &str>) -> ProcessOverview {
    let get = |k: &str| map.get(k).map(|v| v.to_string()).unwrap_or_default();
    ProcessOverview {
        name: get("Name"),
        pid: map
            .get("PID")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0),
        ppid: get("PPID"),
        user: get("User"),
        state: get("State"),
        threads: get("Threads"),
        nice: get("Nice"),
        priority: get("Priority"),
        oom_score: get("OomScore"),
        elapsed_time: get("ElapsedTime"),
        exe_path: get("ExePath"),
    }
}

pub fn decode_extended_info(raw: &str) -> ProcessOverview {
    let line = raw.lines().next().unwrap_or("");
    overview_from(&parse_pairs(line))
}

pub fn decode_deep_snapshot(raw: &str) -> Decoded<ProcessDetail> {
    let mut detail = ProcessDetail::default();
    let mut stats: HashMap<&str, &str> = HashMap::new();
    let mut skipped = 0;

    for section in raw.split('\n') {
        let section = section.trim_end_matches('\r');
        if let Some(body) = section.strip_prefix("OVERVIEW:") {
            detail.overview = overview_from(&parse_pairs(body));
        } else if let Some(body) = section.strip_prefix("STATS:") {
            stats = parse_pairs(body);
        } else if let Some(body) = section.strip_prefix("MODULES:") {
            for record in body.split(';').filter(|r| !r.is_empty()) {
                match parse_module(record) {
                    Some(m) => detail.modules.push(m),
                    None => skipped += 1,
                }
            }
        } else if let Some(body) = section.strip_prefix("THREADS:") {
            for record in body.split('|').filter(|r| !r.is_empty()) {
                match parse_thread(record) {
                    Some(t) => detail.threads.push(t),
                    None => skipped += 1,
                }
            }
        }
    }

    let counter = |k: &str| {
        stats
            .get(k)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or("0")
            .to_string()
    };
    detail.voluntary_ctx_switches = counter("VoluntaryCtxSwitches");
    detail.nonvoluntary_ctx_switches = counter("NonVoluntaryCtxSwitches");
    detail.minor_page_faults = counter("MinorPageFaults");
    detail.major_page_faults = counter("MajorPageFaults");
    detail.thread_count = detail.threads.len();

    Decoded {
        value: detail,
        skipped,
    }
}

// filename|fullPath|sizeBytes
fn parse_module(record: &str) -> Option<ModuleEntry> {
    let mut it = record.splitn(3, '|');
    let file_name = it.next()?.to_string();
    let full_path = it.next()?.to_string();
    let size = it.next()?;
    Some(ModuleEntry {
        file_name,
        full_path,
        size_bytes: size.trim().parse().unwrap_or(0),
    })
}

// tid:name, split on the first ':' only
fn parse_thread(record: &str) -> Option<ThreadEntry> {
    let (tid, name) = record.split_once(':')?;
    Some(ThreadEntry {
        tid: tid.trim().parse().ok()?,
        name: name.to_string(),
    })
}
