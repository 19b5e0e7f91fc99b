//! Pipe-delimited roster: optional `HEAD|cpu|ramUsed|ramSize`, then `pid|name|ram|cpu[|nice]`.

use std::collections::HashSet;

use super::Decoded;
use crate::types::{AggregateHeader, ProcessSample};

const HEAD_TAG: &str = "HEAD|";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterPayload {
    /// None when the source sent no header, or an unreadable one.
    pub header: Option<AggregateHeader>,
    pub samples: Vec<ProcessSample>,
}

pub fn decode_roster(raw: &str) -> Decoded<RosterPayload> {
    let mut payload = RosterPayload::default();
    let mut skipped = 0;

    for (idx, line) in raw.split('\n').enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if idx == 0 && line.starts_with(HEAD_TAG) {
            payload.header = parse_header(line);
            if payload.header.is_none() {
                skipped += 1;
            }
            continue;
        }
        match parse_sample(line) {
            Some(s) => payload.samples.push(s),
            None => skipped += 1,
        }
    }

    Decoded {
        value: payload,
        skipped,
    }
}

fn parse_header(line: &str) -> Option<AggregateHeader> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 4 {
        return None;
    }
    Some(AggregateHeader {
        total_cpu_percent: parse_f64(parts[1])?,
        total_ram_used_bytes: parts[2].trim().parse().ok()?,
        total_ram_size_bytes: parts[3].trim().parse().ok()?,
    })
}

fn parse_sample(line: &str) -> Option<ProcessSample> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 4 {
        return None;
    }
    let pid = parts[0].trim().parse::<i32>().ok()?;
    let ram_bytes = parts[2].trim().parse::<u64>().ok()?;
    let cpu = parse_f64(parts[3])?;
    // nice is optional and never disqualifies a line
    let nice = parts
        .get(4)
        .and_then(|n| n.trim().parse::<i32>().ok())
        .unwrap_or(0);
    Some(ProcessSample {
        pid,
        name: parts[1].to_string(),
        cpu_percent: cpu.clamp(0.0, 100.0),
        ram_bytes,
        nice,
    })
}

fn parse_f64(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `|`-separated candidate keys; blanks and repeats are dropped, first occurrence wins.
pub fn decode_kill_candidates(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split('|')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_only_on_first_line() {
        let d = decode_roster("1|init|10|0.5\nHEAD|1|2|3\n");
        assert!(d.value.header.is_none());
        assert_eq!(d.value.samples.len(), 1);
        assert_eq!(d.skipped, 1);
    }

    #[test]
    fn nan_cpu_is_not_numeric() {
        let d = decode_roster("5|x|10|NaN|0\n6|y|10|inf\n7|z|10|1.5");
        assert_eq!(d.value.samples.len(), 1);
        assert_eq!(d.value.samples[0].pid, 7);
        assert_eq!(d.skipped, 2);
    }
}
