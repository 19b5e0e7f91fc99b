//! Entry point for the headless taskmgr client. Parses args, wires the pollers and prints.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskmgr::bridge::{spawn_reconnect, Bridge, BridgeStatus, ConnectionState, WsConnector};
use taskmgr::config::Settings;
use taskmgr::identity::{IdentityCache, TableResolver};
use taskmgr::perf::{PerfEngine, PerfMonitor, PerfSnapshot};
use taskmgr::roster::{Roster, RosterSnapshot, SortKey};
use taskmgr::types::Category;

const USAGE_FLAGS: &str = "[--url URL|-u URL] [--config PATH|-c PATH] [--focus CATEGORY|-f CATEGORY] [--sort KEY|-s KEY] [--filter TEXT] [--json] [--once] [--dry-run] [ws://HOST:PORT/ws]";

#[derive(Debug, Default)]
struct ParsedArgs {
    url: Option<String>,
    config: Option<PathBuf>,
    focus: Option<Category>,
    sort: Option<SortKey>,
    filter: Option<String>,
    json: bool,
    once: bool,
    dry_run: bool,
}

#[derive(Debug)]
enum ArgsError {
    Help(String),
    Usage(String),
}

fn flag_value(
    flag: &str,
    inline: Option<String>,
    it: &mut impl Iterator<Item = String>,
    prog: &str,
) -> Result<String, ArgsError> {
    inline
        .or_else(|| it.next())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ArgsError::Usage(format!("{flag} needs a value. Usage: {prog} {USAGE_FLAGS}")))
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, ArgsError> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "taskmgr".into());
    let mut parsed = ParsedArgs::default();

    while let Some(arg) = it.next() {
        // --flag=value form
        let (name, inline) = match arg.split_once('=') {
            Some((k, v)) if k.starts_with("--") => (k.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        match name.as_str() {
            "-h" | "--help" => {
                return Err(ArgsError::Help(format!("Usage: {prog} {USAGE_FLAGS}")));
            }
            "--url" | "-u" => parsed.url = Some(flag_value(&name, inline, &mut it, &prog)?),
            "--config" | "-c" => {
                parsed.config = Some(PathBuf::from(flag_value(&name, inline, &mut it, &prog)?))
            }
            "--focus" | "-f" => {
                let v = flag_value(&name, inline, &mut it, &prog)?;
                parsed.focus = Some(Category::parse(&v).ok_or_else(|| {
                    ArgsError::Usage(format!(
                        "unknown category {v:?} (expected cpu|gpu|memory|disk|net)"
                    ))
                })?);
            }
            "--sort" | "-s" => {
                let v = flag_value(&name, inline, &mut it, &prog)?;
                parsed.sort = Some(SortKey::parse(&v).ok_or_else(|| {
                    ArgsError::Usage(format!("unknown sort key {v:?} (expected cpu|ram|name|nice)"))
                })?);
            }
            "--filter" => parsed.filter = Some(flag_value(&name, inline, &mut it, &prog)?),
            "--json" => parsed.json = true,
            "--once" => parsed.once = true,
            "--dry-run" => parsed.dry_run = true,
            _ if arg.starts_with('-') => {
                return Err(ArgsError::Usage(format!(
                    "Unknown flag {arg}. Usage: {prog} {USAGE_FLAGS}"
                )));
            }
            _ => {
                if parsed.url.is_none() {
                    parsed.url = Some(arg);
                } else {
                    return Err(ArgsError::Usage(format!(
                        "Unexpected argument. Usage: {prog} {USAGE_FLAGS}"
                    )));
                }
            }
        }
    }
    Ok(parsed)
}

fn init_logging() {
    // RUST_LOG first, then TASKMGR_LOG, then info
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("TASKMGR_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Serialize)]
struct Report<'a> {
    status: &'a BridgeStatus,
    roster: &'a RosterSnapshot,
    perf: &'a PerfSnapshot,
}

fn print_report(
    json: bool,
    status: &BridgeStatus,
    roster: &RosterSnapshot,
    perf: &PerfSnapshot,
) -> anyhow::Result<()> {
    if json {
        let line = serde_json::to_string(&Report {
            status,
            roster,
            perf,
        })?;
        println!("{line}");
        return Ok(());
    }

    let mut line = format!("[{:?}] procs={}", status.state, roster.process_count);
    if let Some(t) = roster.totals {
        line.push_str(&format!(
            " cpu={:.1}%{} ram={}MB",
            t.cpu_percent,
            if t.derived { "*" } else { "" },
            t.ram_used_bytes / (1024 * 1024)
        ));
    }
    for view in &perf.categories {
        match view.latest {
            Some(v) => line.push_str(&format!(" {}={v:.1}{}", view.category, view.unit)),
            None => line.push_str(&format!(" {}=--", view.category)),
        }
        if view.degraded {
            line.push('!');
        }
    }
    println!("{line}");
    for p in roster.views.iter().take(5) {
        println!(
            "  {:>7} {:<32} {:>5.1}% {:>8}MB",
            p.pid,
            p.label,
            p.cpu_percent,
            p.ram_bytes / (1024 * 1024)
        );
    }
    Ok(())
}

async fn run(parsed: ParsedArgs) -> anyhow::Result<()> {
    let mut settings = Settings::load(parsed.config.as_deref()).context("loading settings")?;
    if let Some(url) = parsed.url {
        settings.url = url;
    }
    settings.validate()?;

    if parsed.dry_run {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    let bridge = Arc::new(Bridge::new(
        WsConnector::new(settings.url.clone()),
        settings.bridge_timeouts(),
    ));
    let identity = IdentityCache::new(TableResolver::new(settings.labels.clone()));
    let roster = Roster::with_view(
        bridge.clone(),
        identity,
        parsed.sort.unwrap_or_default(),
        parsed.filter.unwrap_or_default(),
    );
    let perf = PerfMonitor::new(
        bridge.clone(),
        PerfEngine::new(
            parsed.focus.unwrap_or(Category::Cpu),
            settings.full_freshness(),
        ),
    );

    info!(url = %settings.url, "connecting");
    let state = bridge.connect().await;

    if parsed.once {
        if state != ConnectionState::Bound {
            let err = bridge.status().last_error.unwrap_or_default();
            bail!("could not bind {}: {err}", settings.url);
        }
        roster.poll_once().await;
        perf.poll_mini().await;
        perf.poll_full().await;
        print_report(
            parsed.json,
            &bridge.status(),
            &roster.current(),
            &perf.current(),
        )?;
        bridge.disconnect().await;
        return Ok(());
    }

    if state != ConnectionState::Bound {
        warn!("privileged source unavailable, retrying in the background");
    }
    let reconnect = spawn_reconnect(bridge.clone(), settings.reconnect_interval());
    let roster_task = roster.spawn(settings.roster_interval());
    let (mini_task, full_task) = perf.spawn(settings.perf_intervals());

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                print_report(parsed.json, &bridge.status(), &roster.current(), &perf.current())?;
            }
        }
    }

    info!("shutting down");
    reconnect.stop().await;
    roster_task.stop().await;
    mini_task.stop().await;
    full_task.stop().await;
    bridge.disconnect().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(ArgsError::Help(msg)) => {
            eprintln!("{msg}");
            return ExitCode::SUCCESS;
        }
        Err(ArgsError::Usage(msg)) => {
            eprintln!("{msg}");
            return ExitCode::from(2);
        }
    };

    init_logging();

    match run(parsed).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        std::iter::once("taskmgr")
            .chain(v.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn long_short_and_inline_flags() {
        let p = parse_args(args(&["-f", "disk", "--sort=cpu", "--filter", "chrome", "--json"]))
            .unwrap();
        assert_eq!(p.focus, Some(Category::Disk));
        assert_eq!(p.sort, Some(SortKey::Cpu));
        assert_eq!(p.filter.as_deref(), Some("chrome"));
        assert!(p.json);
    }

    #[test]
    fn positional_url_once() {
        let p = parse_args(args(&["ws://h:1/ws"])).unwrap();
        assert_eq!(p.url.as_deref(), Some("ws://h:1/ws"));
        assert!(matches!(
            parse_args(args(&["ws://a/ws", "ws://b/ws"])),
            Err(ArgsError::Usage(_))
        ));
    }

    #[test]
    fn missing_value_is_usage_error() {
        assert!(matches!(parse_args(args(&["--url"])), Err(ArgsError::Usage(_))));
        assert!(matches!(
            parse_args(args(&["--focus", "swap"])),
            Err(ArgsError::Usage(_))
        ));
    }
}
