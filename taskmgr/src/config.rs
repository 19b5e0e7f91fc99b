//! Settings: JSON file under the XDG config dir, then `TASKMGR_*` env vars, then CLI flags.
//! Stored at $XDG_CONFIG_HOME/taskmgr/config.json (fallback ~/.config/taskmgr/config.json)

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, path::PathBuf, time::Duration};
use tracing::debug;

use crate::bridge::BridgeTimeouts;
use crate::error::ConfigError;
use crate::perf::PerfIntervals;

pub const DEFAULT_URL: &str = "ws://127.0.0.1:3290/ws";

/// Display label override for one package key.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LabelEntry {
    pub label: String,
    #[serde(default)]
    pub system: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub url: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub roster_interval_ms: u64,
    pub mini_interval_ms: u64,
    pub full_interval_ms: u64,
    /// How long a full sample shadows the mini feed for the focused category.
    pub full_freshness_ms: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, LabelEntry>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            connect_timeout_ms: 3_000,
            request_timeout_ms: 2_000,
            reconnect_interval_ms: 2_000,
            roster_interval_ms: 500,
            mini_interval_ms: 1_000,
            full_interval_ms: 1_000,
            full_freshness_ms: 1_200,
            labels: BTreeMap::new(),
        }
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("taskmgr")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("taskmgr")
    }
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

impl Settings {
    /// Read a settings file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load from `path` (or the default location) and apply env overrides. A missing default
    /// file is not an error; a missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let p = config_path();
                if p.exists() {
                    Self::from_file(&p)?
                } else {
                    debug!(path = %p.display(), "no config file, using defaults");
                    Self::default()
                }
            }
        };
        settings.apply_env(|k| std::env::var(k).ok());
        Ok(settings)
    }

    /// Apply `TASKMGR_*` overrides from `lookup`. Unparseable numbers are ignored.
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(url) = lookup("TASKMGR_URL").filter(|u| !u.trim().is_empty()) {
            self.url = url.trim().to_string();
        }
        let ms = |key: &str, slot: &mut u64| {
            if let Some(v) = lookup(key).and_then(|v| v.trim().parse::<u64>().ok()) {
                *slot = v;
            }
        };
        ms("TASKMGR_REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms);
        ms("TASKMGR_ROSTER_INTERVAL_MS", &mut self.roster_interval_ms);
        ms("TASKMGR_MINI_INTERVAL_MS", &mut self.mini_interval_ms);
        ms("TASKMGR_FULL_INTERVAL_MS", &mut self.full_interval_ms);
        ms("TASKMGR_FULL_FRESHNESS_MS", &mut self.full_freshness_ms);
    }

    /// The bridge url must parse and use ws or wss.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason,
        };
        let parsed = url::Url::parse(&self.url).map_err(|e| invalid(e.to_string()))?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(invalid(format!("unsupported scheme {other:?}"))),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let data = serde_json::to_vec_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, data).map_err(io_err)
    }

    pub fn bridge_timeouts(&self) -> BridgeTimeouts {
        BridgeTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms.max(1)),
            request: Duration::from_millis(self.request_timeout_ms.max(1)),
        }
    }

    pub fn perf_intervals(&self) -> PerfIntervals {
        PerfIntervals {
            mini: Duration::from_millis(self.mini_interval_ms.max(1)),
            full: Duration::from_millis(self.full_interval_ms.max(1)),
        }
    }

    pub fn roster_interval(&self) -> Duration {
        Duration::from_millis(self.roster_interval_ms.max(1))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms.max(1))
    }

    pub fn full_freshness(&self) -> Duration {
        Duration::from_millis(self.full_freshness_ms)
    }
}
