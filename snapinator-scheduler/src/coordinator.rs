//! Per-task admission control and run bookkeeping.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snapinator_config::{
    document::{read_json, write_json_atomic},
    ConfigError,
};
use snapinator_models::runs::{RunOutcome, RunRecord, RunState, RunStatus, RunTrigger};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// How often an owning process rewrites the snapshot to renew its lease.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// How long a lease stays valid after the last write.
pub const LEASE_TTL: Duration = Duration::from_secs(15);

const ABANDONED: &str = "run ended without reporting an outcome";
const INTERRUPTED: &str = "interrupted before completion";

/// Result of asking to start a run.
#[must_use]
pub enum Admission {
    Admitted(RunGuard),
    Busy,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Kind of process that writes the run-state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerRole {
    Daemon,
    Capture,
}

impl fmt::Display for OwnerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OwnerRole::Daemon => "daemon",
            OwnerRole::Capture => "capture",
        };
        write!(f, "{s}")
    }
}

/// Lease held by the process writing the snapshot, renewed on every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOwner {
    pub pid: u32,
    pub role: OwnerRole,
    pub heartbeat_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
}

/// On-disk form of the run states, read by `snapinator status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<RunOwner>,
    #[serde(default)]
    pub tasks: BTreeMap<String, RunState>,
}

impl RunSnapshot {
    /// Reads the snapshot at `path` as written, without taking it over.
    pub fn load(path: &Path) -> Result<Option<RunSnapshot>, ConfigError> {
        read_json(path)
    }

    /// The owner, if its lease is still valid at `now`.
    pub fn live_owner(&self, now: DateTime<Utc>) -> Option<&RunOwner> {
        self.owner
            .as_ref()
            .filter(|owner| owner.lease_expires_at > now)
    }

    /// Shows `running` states as interrupted once no live owner is driving them.
    pub fn settle(&mut self, now: DateTime<Utc>) {
        if self.live_owner(now).is_none() {
            interrupt_running(&mut self.tasks);
        }
    }
}

fn interrupt_running(tasks: &mut BTreeMap<String, RunState>) {
    for state in tasks.values_mut() {
        if state.status == RunStatus::Running {
            state.status = RunStatus::Failed;
            state.last_error = Some(INTERRUPTED.to_string());
        }
    }
}

fn plus(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at + chrono::Duration::milliseconds(duration.as_millis() as i64)
}

struct ActiveRun {
    run_id: u64,
    trigger: RunTrigger,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct Slot {
    state: RunState,
    active: Option<ActiveRun>,
}

#[derive(Default)]
struct Ledger {
    slots: HashMap<String, Slot>,
    next_run_id: u64,
}

pub struct RunCoordinator {
    ledger: Mutex<Ledger>,
    history_limit: usize,
    snapshot_path: Option<PathBuf>,
    owner: Mutex<Option<OwnerRole>>,
    /// Serializes snapshot writes; holds the time of the last one.
    last_written: Mutex<Option<DateTime<Utc>>>,
}

impl RunCoordinator {
    pub fn new(history_limit: usize) -> Self {
        RunCoordinator {
            ledger: Mutex::new(Ledger::default()),
            history_limit: history_limit.max(1),
            snapshot_path: None,
            owner: Mutex::new(None),
            last_written: Mutex::new(None),
        }
    }

    /// A coordinator that mirrors its states to `path` and starts from what is there.
    ///
    /// The caller takes the snapshot over, so check [`RunSnapshot::live_owner`]
    /// first. Persisted `running` states are loaded as `failed`. An unreadable
    /// snapshot is logged and ignored.
    pub fn with_snapshot(path: impl Into<PathBuf>, history_limit: usize) -> Self {
        let path = path.into();
        let mut coordinator = RunCoordinator::new(history_limit);

        match RunSnapshot::load(&path) {
            Ok(Some(mut snapshot)) => {
                if let Some(owner) = snapshot.live_owner(Utc::now()) {
                    warn!("Taking over run state still leased by {} pid {}", owner.role, owner.pid);
                }
                interrupt_running(&mut snapshot.tasks);
                let mut ledger = coordinator.ledger.lock();
                for (task_id, state) in snapshot.tasks {
                    ledger.slots.insert(task_id, Slot { state, active: None });
                }
                debug!("Restored {} run state(s) from {}", ledger.slots.len(), path.display());
            }
            Ok(None) => {}
            Err(err) => warn!("Ignoring run state snapshot: {}", err),
        }

        coordinator.snapshot_path = Some(path);
        coordinator
    }

    /// Marks every snapshot this coordinator writes as leased by this process.
    pub fn owned_by(self, role: OwnerRole) -> Self {
        *self.owner.lock() = Some(role);
        self
    }

    /// Gives up the lease and writes a final snapshot without an owner.
    pub fn release(&self) {
        if self.owner.lock().take().is_some() {
            self.persist();
        }
    }

    /// Renews the lease when the last write is older than [`HEARTBEAT_INTERVAL`].
    /// Returns whether a snapshot was written.
    pub fn heartbeat(&self) -> bool {
        if self.owner.lock().is_none() || self.snapshot_path.is_none() {
            return false;
        }
        let due = match *self.last_written.lock() {
            Some(at) => Utc::now() >= plus(at, HEARTBEAT_INTERVAL),
            None => true,
        };
        if due {
            self.persist();
        }
        due
    }

    /// Atomically admits a run unless one is already in flight for `task_id`.
    pub fn try_start(self: &Arc<Self>, task_id: &str, trigger: RunTrigger) -> Admission {
        let mut ledger = self.ledger.lock();
        let run_id = ledger.next_run_id;
        let slot = ledger.slots.entry(task_id.to_string()).or_default();
        if slot.active.is_some() {
            return Admission::Busy;
        }

        let started_at = Utc::now();
        slot.state.status = RunStatus::Running;
        slot.active = Some(ActiveRun {
            run_id,
            trigger,
            started_at,
        });
        ledger.next_run_id += 1;

        Admission::Admitted(RunGuard {
            coordinator: Arc::clone(self),
            task_id: task_id.to_string(),
            run_id,
            started_at,
            finished: false,
        })
    }

    /// Records the outcome of whatever run is in flight for `task_id`.
    ///
    /// Returns `false` (and changes nothing) when the task is not running.
    pub fn finish(&self, task_id: &str, outcome: RunOutcome) -> bool {
        self.complete(task_id, None, outcome)
    }

    pub fn set_next_run(&self, task_id: &str, at: Option<DateTime<Utc>>) {
        let mut ledger = self.ledger.lock();
        match at {
            Some(at) => ledger.slots.entry(task_id.to_string()).or_default().state.next_run_at = Some(at),
            None => {
                if let Some(slot) = ledger.slots.get_mut(task_id) {
                    slot.state.next_run_at = None;
                }
            }
        }
    }

    /// State of `task_id`; tasks never seen are idle.
    pub fn state(&self, task_id: &str) -> RunState {
        self.ledger
            .lock()
            .slots
            .get(task_id)
            .map(|slot| slot.state.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, RunState> {
        self.ledger
            .lock()
            .slots
            .iter()
            .map(|(id, slot)| (id.clone(), slot.state.clone()))
            .collect()
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.ledger
            .lock()
            .slots
            .get(task_id)
            .is_some_and(|slot| slot.active.is_some())
    }

    /// Drops all state for a deleted task. An in-flight run finishes unrecorded.
    pub fn forget(&self, task_id: &str) {
        if self.ledger.lock().slots.remove(task_id).is_some() {
            debug!("Forgot run state of task {}", task_id);
        }
    }

    /// Writes the current states to the snapshot file, if one is configured.
    pub fn persist(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let mut last_written = self.last_written.lock();
        let now = Utc::now();
        let owner = (*self.owner.lock()).map(|role| RunOwner {
            pid: std::process::id(),
            role,
            heartbeat_at: now,
            lease_expires_at: plus(now, LEASE_TTL),
        });
        let snapshot = RunSnapshot {
            updated_at: Some(now),
            owner,
            tasks: self.snapshot(),
        };
        match write_json_atomic(path, &snapshot) {
            Ok(()) => *last_written = Some(now),
            Err(err) => error!("Failed to write run state to {}: {}", path.display(), err),
        }
    }

    fn complete(&self, task_id: &str, run_id: Option<u64>, outcome: RunOutcome) -> bool {
        {
            let mut ledger = self.ledger.lock();
            let Some(slot) = ledger.slots.get_mut(task_id) else {
                return false;
            };
            let matches = match (&slot.active, run_id) {
                (Some(active), Some(run_id)) => active.run_id == run_id,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !matches {
                return false;
            }
            let Some(active) = slot.active.take() else {
                return false;
            };

            let finished_at = Utc::now();
            let status = outcome.status();
            let (artifact, error) = match outcome {
                RunOutcome::Succeeded { artifact } => (Some(artifact), None),
                RunOutcome::Failed { error } => (None, Some(error)),
            };

            let state = &mut slot.state;
            state.status = status;
            state.last_run_at = Some(active.started_at);
            state.last_error = error.clone();
            state.push_record(
                RunRecord {
                    started_at: active.started_at,
                    finished_at,
                    status,
                    trigger: active.trigger,
                    artifact,
                    error,
                },
                self.history_limit,
            );
        }

        self.persist();
        true
    }
}

/// Proof of admission for one run. Exactly one outcome is recorded per guard:
/// the one passed to [`RunGuard::finish`], or `failed` when the guard is dropped
/// unfinished (panic, abort, shutdown).
pub struct RunGuard {
    coordinator: Arc<RunCoordinator>,
    task_id: String,
    run_id: u64,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl RunGuard {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finish(mut self, outcome: RunOutcome) {
        self.finished = true;
        self.coordinator
            .complete(&self.task_id, Some(self.run_id), outcome);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("Run of task {} ended without an outcome", self.task_id);
        self.coordinator
            .complete(&self.task_id, Some(self.run_id), RunOutcome::failed(ABANDONED));
    }
}
