//! Two-phase batch kill: scan for candidates, let the user review, then execute or cancel.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::bridge::{Bridge, KillReport};
use crate::error::KillError;
use crate::identity::{IconRef, IdentityCache};

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KillCandidate {
    pub package_key: String,
    pub label: String,
    pub icon: IconRef,
    pub selected: bool,
}

/// Terminal notification for one execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KillOutcome {
    Freed(u64),
    NothingReclaimed,
    NothingSelected,
    Failed,
}

impl fmt::Display for KillOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillOutcome::Freed(bytes) if *bytes >= MB => write!(f, "Freed {} MB.", bytes / MB),
            KillOutcome::Freed(_) | KillOutcome::NothingReclaimed => {
                f.write_str("Done, no measurable memory reclaimed.")
            }
            KillOutcome::NothingSelected => f.write_str("Nothing selected."),
            KillOutcome::Failed => f.write_str("Kill transaction failed."),
        }
    }
}

impl From<KillReport> for KillOutcome {
    fn from(r: KillReport) -> Self {
        match r {
            // under one MB reads as nothing to the user
            KillReport::Freed(n) if n < MB => KillOutcome::NothingReclaimed,
            KillReport::Freed(n) => KillOutcome::Freed(n),
            KillReport::Failed => KillOutcome::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    /// Tagged so a stale scan never touches a newer one.
    Scanning(u64),
    Reviewing(Vec<KillCandidate>),
}

/// Puts an abandoned scan back to idle, e.g. when the scan future is dropped mid-call.
struct ScanGuard<'a> {
    phase: &'a Mutex<Phase>,
    id: u64,
    armed: bool,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == Phase::Scanning(self.id) {
            *phase = Phase::Idle;
        }
    }
}

pub struct KillOrchestrator {
    bridge: Arc<Bridge>,
    identity: IdentityCache,
    phase: Mutex<Phase>,
    scans: AtomicU64,
    review: watch::Sender<Option<Vec<KillCandidate>>>,
}

impl KillOrchestrator {
    pub fn new(bridge: Arc<Bridge>, identity: IdentityCache) -> Self {
        let (review, _) = watch::channel(None);
        Self {
            bridge,
            identity,
            phase: Mutex::new(Phase::Idle),
            scans: AtomicU64::new(0),
            review,
        }
    }

    /// Pending review set, `None` when no review is open.
    pub fn subscribe(&self) -> watch::Receiver<Option<Vec<KillCandidate>>> {
        self.review.subscribe()
    }

    pub fn review(&self) -> Option<Vec<KillCandidate>> {
        self.review.borrow().clone()
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch candidates and open a review with everything selected. Refused while another
    /// scan or review is open. A scan cancelled or dropped before it finishes leaves the
    /// workflow idle.
    pub async fn scan(&self) -> Result<Vec<KillCandidate>, KillError> {
        let id = self.scans.fetch_add(1, Ordering::Relaxed);
        {
            let mut phase = self.phase();
            match *phase {
                Phase::Idle => *phase = Phase::Scanning(id),
                Phase::Scanning(_) => return Err(KillError::ScanInProgress),
                Phase::Reviewing(_) => return Err(KillError::ReviewPending),
            }
        }
        let mut guard = ScanGuard {
            phase: &self.phase,
            id,
            armed: true,
        };

        let Some(keys) = self.bridge.kill_candidates().await else {
            warn!("kill candidate scan failed");
            return Err(KillError::Unavailable);
        };

        let mut candidates = Vec::with_capacity(keys.len());
        for key in keys {
            let record = self.identity.resolve(&key).await;
            candidates.push(KillCandidate {
                package_key: key,
                label: record.label,
                icon: record.icon,
                selected: true,
            });
        }

        {
            let mut phase = self.phase();
            guard.armed = false;
            if *phase != Phase::Scanning(id) {
                info!("kill scan cancelled before the review opened");
                return Err(KillError::Cancelled);
            }
            *phase = Phase::Reviewing(candidates.clone());
        }
        info!(count = candidates.len(), "kill review opened");
        self.review.send_replace(Some(candidates.clone()));
        Ok(candidates)
    }

    /// Flip one candidate. Returns its new selection, `None` if the key is not under review.
    pub async fn toggle(&self, key: &str) -> Option<bool> {
        let mut phase = self.phase();
        let Phase::Reviewing(candidates) = &mut *phase else {
            return None;
        };
        let c = candidates.iter_mut().find(|c| c.package_key == key)?;
        c.selected = !c.selected;
        let selected = c.selected;
        self.review.send_replace(Some(candidates.clone()));
        Some(selected)
    }

    /// Close the review and kill the selected keys in one batch.
    pub async fn execute(&self) -> Result<KillOutcome, KillError> {
        let candidates = {
            let mut phase = self.phase();
            match std::mem::take(&mut *phase) {
                Phase::Reviewing(c) => c,
                other => {
                    *phase = other;
                    return Err(KillError::NoReview);
                }
            }
        };
        self.review.send_replace(None);

        let keys: Vec<String> = candidates
            .into_iter()
            .filter(|c| c.selected)
            .map(|c| c.package_key)
            .collect();
        if keys.is_empty() {
            info!("kill review closed with nothing selected");
            return Ok(KillOutcome::NothingSelected);
        }

        let outcome = KillOutcome::from(self.bridge.execute_kill_transaction(&keys).await);
        info!(count = keys.len(), %outcome, "kill transaction finished");
        Ok(outcome)
    }

    /// Discard the review, or abandon a scan still waiting on candidates. A no-op when idle.
    pub async fn cancel(&self) {
        let previous = std::mem::take(&mut *self.phase());
        match previous {
            Phase::Reviewing(_) => {
                self.review.send_replace(None);
                info!("kill review cancelled");
            }
            Phase::Scanning(_) => info!("kill scan cancelled"),
            Phase::Idle => {}
        }
    }
}
