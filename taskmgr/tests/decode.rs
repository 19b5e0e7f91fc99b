//! Wire decoder tests: roster lines, detail sections and JSON snapshots.
use std::collections::HashSet;

use taskmgr::decode::{
    decode_cpu, decode_deep_snapshot, decode_disk, decode_extended_info, decode_gpu,
    decode_kill_candidates, decode_memory, decode_mini, decode_net, decode_roster,
    decode_snapshot,
};
use taskmgr::error::DecodeError;
use taskmgr::identity::strip_suffix;
use taskmgr::types::{AggregateHeader, Category, CategorySnapshot, ProcessSample};

#[test]
fn roster_header_and_suffixed_name() {
    let d = decode_roster("HEAD|12.5|2147483648|4294967296\n100|app:remote|104857600|3.2|0\n");
    assert_eq!(d.skipped, 0);
    assert_eq!(
        d.value.header,
        Some(AggregateHeader {
            total_cpu_percent: 12.5,
            total_ram_used_bytes: 2147483648,
            total_ram_size_bytes: 4294967296,
        })
    );
    assert_eq!(
        d.value.samples,
        vec![ProcessSample {
            pid: 100,
            name: "app:remote".into(),
            cpu_percent: 3.2,
            ram_bytes: 104857600,
            nice: 0,
        }]
    );
    assert_eq!(strip_suffix(&d.value.samples[0].name), "app");
}

#[test]
fn roster_skips_bad_lines_and_keeps_going() {
    let raw = "\
HEAD|oops|1|2
1|init|4096|0.1|0
2|short|4096
x|badpid|4096|1.0
3|badram|-5|1.0
4|badcpu|4096|fast

5|hot|8192|250.0|-5
6|cold|8192|-3.0
7|nonice|8192|1.0|abc
";
    let d = decode_roster(raw);
    assert!(d.value.header.is_none(), "malformed header is unknown, not zero");
    let pids: Vec<i32> = d.value.samples.iter().map(|s| s.pid).collect();
    assert_eq!(pids, vec![1, 5, 6, 7]);
    // bad HEAD + short + badpid + badram + badcpu; blank line not counted
    assert_eq!(d.skipped, 5);

    for s in &d.value.samples {
        assert!((0.0..=100.0).contains(&s.cpu_percent), "{s:?}");
    }
    assert_eq!(d.value.samples[1].cpu_percent, 100.0);
    assert_eq!(d.value.samples[1].nice, -5);
    assert_eq!(d.value.samples[2].cpu_percent, 0.0);
    assert_eq!(d.value.samples[3].nice, 0);
}

#[test]
fn roster_without_header() {
    let d = decode_roster("10|sh|100|0.0\r\n11|bash|200|1.0\r\n");
    assert!(d.value.header.is_none());
    assert_eq!(d.value.samples.len(), 2);
    assert_eq!(d.value.samples[1].name, "bash");
}

#[test]
fn roster_wire_round_trip_as_set() {
    let samples = vec![
        ProcessSample {
            pid: 1,
            name: "init".into(),
            cpu_percent: 0.5,
            ram_bytes: 1 << 20,
            nice: 0,
        },
        ProcessSample {
            pid: 4242,
            name: "com.example.app:sync".into(),
            cpu_percent: 37.25,
            ram_bytes: 734_003_200,
            nice: -10,
        },
        ProcessSample {
            pid: 77,
            name: "kworker/0:1".into(),
            cpu_percent: 100.0,
            ram_bytes: 0,
            nice: 19,
        },
    ];
    let header = AggregateHeader {
        total_cpu_percent: 40.0,
        total_ram_used_bytes: 1000,
        total_ram_size_bytes: 2000,
    };
    let mut lines = vec![header.to_wire()];
    lines.extend(samples.iter().rev().map(ProcessSample::to_wire));
    let d = decode_roster(&lines.join("\n"));

    assert_eq!(d.value.header, Some(header));
    let key = |s: &ProcessSample| (s.pid, s.name.clone(), s.ram_bytes, s.nice, s.cpu_percent.to_bits());
    let want: HashSet<_> = samples.iter().map(key).collect();
    let got: HashSet<_> = d.value.samples.iter().map(key).collect();
    assert_eq!(got, want);
}

#[test]
fn kill_candidates_trimmed_and_deduped() {
    assert_eq!(
        decode_kill_candidates("com.a| com.b ||com.a|com.c|"),
        vec!["com.a", "com.b", "com.c"]
    );
    assert!(decode_kill_candidates("").is_empty());
}

#[test]
fn extended_info_line() {
    let o = decode_extended_info(
        "Name=mail|PID=321|PPID=1|User=u0_a12|State=S|Threads=14|Nice=0|Priority=20|OomScore=700|ElapsedTime=01:02:03|ExePath=/system/bin/app_process64\n",
    );
    assert_eq!(o.name, "mail");
    assert_eq!(o.pid, 321);
    assert_eq!(o.threads, "14");
    assert_eq!(o.exe_path, "/system/bin/app_process64");

    let empty = decode_extended_info("garbage");
    assert_eq!(empty.pid, 0);
    assert_eq!(empty.user, "");
}

#[test]
fn deep_snapshot_sections() {
    let raw = "OVERVIEW:Name=svc|PID=55|PPID=1|User=root|State=R|Nice=-2|Priority=18|OomScore=0|ElapsedTime=5s|ExePath=/bin/svc=x\n\
STATS:VoluntaryCtxSwitches=120|MinorPageFaults=9\n\
MODULES:libc.so|/lib/libc.so|2048;libm.so|/lib/libm.so|big;broken;\n\
THREADS:55:svc|56:worker:io|nope:x|";
    let d = decode_deep_snapshot(raw);
    let p = &d.value;
    assert_eq!(p.overview.name, "svc");
    assert_eq!(p.overview.pid, 55);
    assert_eq!(p.overview.nice, "-2");
    assert_eq!(p.overview.exe_path, "/bin/svc=x", "value keeps later '='");
    assert_eq!(p.voluntary_ctx_switches, "120");
    assert_eq!(p.nonvoluntary_ctx_switches, "0");
    assert_eq!(p.minor_page_faults, "9");
    assert_eq!(p.major_page_faults, "0");

    assert_eq!(p.modules.len(), 2);
    assert_eq!(p.modules[0].size_bytes, 2048);
    assert_eq!(p.modules[1].size_bytes, 0);

    assert_eq!(p.threads.len(), 2);
    assert_eq!(p.threads[1].tid, 56);
    assert_eq!(p.threads[1].name, "worker:io");
    assert_eq!(p.thread_count, 2);
    // "broken" module + "nope:x" thread
    assert_eq!(d.skipped, 2);
}

#[test]
fn deep_snapshot_missing_sections_default() {
    let d = decode_deep_snapshot("");
    assert_eq!(d.value.overview.name, "");
    assert_eq!(d.value.major_page_faults, "0");
    assert!(d.value.modules.is_empty());
    assert_eq!(d.value.thread_count, 0);
    assert_eq!(d.skipped, 0);
}

#[test]
fn json_missing_fields_use_sentinels() {
    let cpu = decode_cpu("{}").unwrap();
    assert_eq!(cpu.usage_percent, -1.0);
    assert_eq!(cpu.cpu_temp_c, -1.0);
    assert_eq!(cpu.cores_logical, 0);

    let gpu = decode_gpu(r#"{"gpuName":"Adreno"}"#).unwrap();
    assert_eq!(gpu.gpu_name, "Adreno");
    assert_eq!(gpu.util_percent, -1.0);
    assert!(!gpu.has_memory_budget);

    let disk = decode_disk("{}").unwrap();
    assert_eq!((disk.read_bps, disk.write_bps), (-1, -1));
    assert_eq!((disk.read_bytes, disk.write_bytes), (-1, -1));
    assert_eq!(disk.avg_response_ms, -1.0);

    let net = decode_net(r#"{"iface":"wlan0"}"#).unwrap();
    assert_eq!(net.iface, "wlan0");
    assert_eq!((net.rx_bytes, net.tx_bytes), (-1, -1));

    let mem = decode_memory(r#"{"totalBytes":100,"usedBytes":25}"#).unwrap();
    assert_eq!(mem.used_percent(), Some(25.0));
    assert_eq!(decode_memory("{}").unwrap().used_percent(), None);
}

#[test]
fn json_wrong_types_degrade_per_field() {
    let cpu = decode_cpu(r#"{"usagePercent":"high","cpuName":7,"coresLogical":8.0,"maxFreqKHz":3000000}"#)
        .unwrap();
    assert_eq!(cpu.usage_percent, -1.0);
    assert_eq!(cpu.cpu_name, "");
    assert_eq!(cpu.cores_logical, 8);
    assert_eq!(cpu.max_freq_khz, 3_000_000);
}

#[test]
fn mini_missing_nested_object_degrades_only_that_object() {
    let m = decode_mini(
        r#"{"timestampMs":1000,"cpu":{"util":42.0},"mem":{"usedBytes":5,"totalBytes":10},"disk":[1,2],"net":{"iface":"eth0","rxBytes":10,"txBytes":20}}"#,
    )
    .unwrap();
    assert_eq!(m.timestamp_ms, 1000);
    assert_eq!(m.cpu_util, 42.0);
    assert_eq!(m.mem_used_bytes, 5);
    assert_eq!((m.disk_read_bps, m.disk_write_bps), (-1, -1));
    assert_eq!(m.net_iface, "eth0");
    assert_eq!(m.net_tx_bytes, 20);
    assert_eq!(m.gpu_util, -1.0);
}

#[test]
fn json_non_object_payloads_fail() {
    assert!(matches!(decode_cpu(""), Err(DecodeError::Empty)));
    assert!(matches!(decode_mini("[1,2]"), Err(DecodeError::NotAnObject)));
    assert!(matches!(decode_net("{oops"), Err(DecodeError::Json(_))));
}

#[test]
fn snapshot_dispatch_by_category() {
    let s = decode_snapshot(Category::Net, r#"{"iface":"eth1","error":"no perms"}"#).unwrap();
    assert_eq!(s.category(), Category::Net);
    assert_eq!(s.error(), "no perms");
    assert!(matches!(s, CategorySnapshot::Net(ref n) if n.iface == "eth1"));
}
