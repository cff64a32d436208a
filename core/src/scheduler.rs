//! Timer-driven MAC changes
//!
//! Tasks live in a JSON store. [`Scheduler`] runs due tasks through a shared
//! [`MacAddressSpoofer`], so they take the same per-interface locks as direct
//! calls.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{SpoofError, SpoofResult};
use crate::history::write_json_atomic;
use crate::mac::MacAddress;
use crate::spoofer::{check_interface_id, MacAddressSpoofer, MacStrategy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleAction {
    SpoofRandom,
    SpoofSpecific { mac: MacAddress },
    Restore,
    RestoreOriginal,
}

impl ScheduleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleAction::SpoofRandom => "spoof_random",
            ScheduleAction::SpoofSpecific { .. } => "spoof_specific",
            ScheduleAction::Restore => "restore",
            ScheduleAction::RestoreOriginal => "restore_original",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "every", rename_all = "snake_case")]
pub enum Frequency {
    Once,
    Hourly,
    Daily,
    Weekly,
    /// Every 30 days
    Monthly,
    Custom { seconds: u64 },
}

impl Frequency {
    /// Gap between runs; `None` for one-shot tasks
    pub fn interval(&self) -> Option<chrono::Duration> {
        match self {
            Frequency::Once => None,
            Frequency::Hourly => Some(chrono::Duration::hours(1)),
            Frequency::Daily => Some(chrono::Duration::days(1)),
            Frequency::Weekly => Some(chrono::Duration::weeks(1)),
            Frequency::Monthly => Some(chrono::Duration::days(30)),
            Frequency::Custom { seconds } => i64::try_from(*seconds).ok().map(chrono::Duration::seconds),
        }
    }
}

impl FromStr for Frequency {
    type Err = String;

    /// `once`, `hourly`, `daily`, `weekly`, `monthly`, or a custom period
    /// given as `custom:<seconds>` or bare seconds
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let custom = lowered.strip_prefix("custom:").unwrap_or(&lowered);
        match lowered.as_str() {
            "once" => Ok(Frequency::Once),
            "hourly" => Ok(Frequency::Hourly),
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => match custom.parse::<u64>() {
                Ok(0) => Err("custom frequency must be at least 1 second".to_string()),
                Ok(seconds) => Ok(Frequency::Custom { seconds }),
                Err(_) => Err(format!("Invalid frequency: {}", s)),
            },
        }
    }
}

/// What happened on the last run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub at: DateTime<Utc>,
    /// Transaction status, or `error` when the call was refused
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub name: String,
    pub interface: String,
    pub action: ScheduleAction,
    pub frequency: Frequency,
    pub enabled: bool,
    #[serde(default)]
    pub max_runs: Option<u32>,
    #[serde(default)]
    pub run_count: u32,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_outcome: Option<TaskOutcome>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledTask {
    /// A task first due at `start`
    pub fn new(
        name: impl Into<String>,
        interface: impl Into<String>,
        action: ScheduleAction,
        frequency: Frequency,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            interface: interface.into(),
            action,
            frequency,
            enabled: true,
            max_runs: None,
            run_count: 0,
            last_run: None,
            next_run: Some(start),
            last_outcome: None,
            description: String::new(),
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        if self.frequency == Frequency::Once && self.run_count >= 1 {
            return true;
        }
        self.max_runs.is_some_and(|max| self.run_count >= max)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && !self.is_exhausted() && self.next_run.is_some_and(|at| at <= now)
    }

    pub fn record_run(&mut self, outcome: TaskOutcome) {
        let at = outcome.at;
        self.run_count += 1;
        self.last_run = Some(at);
        self.last_outcome = Some(outcome);
        self.next_run = if self.is_exhausted() {
            None
        } else {
            self.frequency.interval().map(|gap| at + gap)
        };
    }
}

/// Tasks persisted as a JSON array
#[derive(Debug)]
pub struct ScheduleStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> SpoofResult<Vec<ScheduledTask>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load, mutate and write back under the store lock
    fn modify<T>(&self, f: impl FnOnce(&mut Vec<ScheduledTask>) -> SpoofResult<T>) -> SpoofResult<T> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut tasks = self.load()?;
        let result = f(&mut tasks)?;
        write_json_atomic(&self.path, &tasks)?;
        Ok(result)
    }

    pub fn add(&self, task: ScheduledTask) -> SpoofResult<ScheduledTask> {
        if task.name.trim().is_empty() {
            return Err(SpoofError::InvalidInput("task name is empty".to_string()));
        }
        check_interface_id(&task.interface)?;
        self.modify(|tasks| {
            if tasks.iter().any(|t| t.name == task.name) {
                return Err(SpoofError::InvalidInput(format!(
                    "a task named {} already exists",
                    task.name
                )));
            }
            tasks.push(task.clone());
            Ok(task)
        })
    }

    pub fn remove(&self, name: &str) -> SpoofResult<bool> {
        self.modify(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.name != name);
            Ok(tasks.len() != before)
        })
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> SpoofResult<ScheduledTask> {
        self.modify(|tasks| {
            let task = tasks
                .iter_mut()
                .find(|t| t.name == name)
                .ok_or_else(|| SpoofError::InvalidInput(format!("unknown task {}", name)))?;
            task.enabled = enabled;
            Ok(task.clone())
        })
    }

    pub fn get(&self, name: &str) -> SpoofResult<Option<ScheduledTask>> {
        Ok(self.load()?.into_iter().find(|t| t.name == name))
    }

    pub fn list(&self) -> SpoofResult<Vec<ScheduledTask>> {
        self.load()
    }

    /// Case-insensitive match on name, interface, description or tags
    pub fn search(&self, keyword: &str) -> SpoofResult<Vec<ScheduledTask>> {
        let keyword = keyword.to_lowercase();
        Ok(self
            .load()?
            .into_iter()
            .filter(|t| {
                [&t.name, &t.interface, &t.description]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&keyword))
                    || t.tags.iter().any(|tag| tag.to_lowercase().contains(&keyword))
            })
            .collect())
    }

    pub fn due(&self, now: DateTime<Utc>) -> SpoofResult<Vec<ScheduledTask>> {
        Ok(self.load()?.into_iter().filter(|t| t.is_due(now)).collect())
    }

    /// Drop tasks that will never run again
    pub fn clear_completed(&self) -> SpoofResult<usize> {
        self.modify(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| !t.is_exhausted());
            Ok(before - tasks.len())
        })
    }

    fn record_run(&self, name: &str, outcome: TaskOutcome) -> SpoofResult<()> {
        self.modify(|tasks| {
            if let Some(task) = tasks.iter_mut().find(|t| t.name == name) {
                task.record_run(outcome);
            }
            Ok(())
        })
    }
}

/// Result of one task execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub task: String,
    pub interface: String,
    pub outcome: TaskOutcome,
}

pub struct Scheduler {
    spoofer: Arc<MacAddressSpoofer>,
    store: Arc<ScheduleStore>,
    strategy: MacStrategy,
}

impl Scheduler {
    pub fn new(spoofer: Arc<MacAddressSpoofer>, store: Arc<ScheduleStore>, strategy: MacStrategy) -> Self {
        Self {
            spoofer,
            store,
            strategy,
        }
    }

    pub fn store(&self) -> &Arc<ScheduleStore> {
        &self.store
    }

    /// Run every task due at `now`, one after another
    pub async fn run_due(&self, now: DateTime<Utc>) -> SpoofResult<Vec<TaskRun>> {
        let due = self.store.due(now)?;
        let mut runs = Vec::with_capacity(due.len());

        for task in due {
            info!(task = %task.name, interface = %task.interface, action = task.action.as_str(), "running scheduled task");
            let outcome = self.execute(&task, now).await;
            if outcome.status == "error" {
                warn!(task = %task.name, message = ?outcome.message, "scheduled task refused");
            }
            self.store.record_run(&task.name, outcome.clone())?;
            runs.push(TaskRun {
                task: task.name,
                interface: task.interface,
                outcome,
            });
        }

        Ok(runs)
    }

    /// The outcome is stamped with `now` so the next run is computed from the
    /// pass that ran it
    async fn execute(&self, task: &ScheduledTask, now: DateTime<Utc>) -> TaskOutcome {
        let defaults = self.spoofer.defaults();
        let result = match &task.action {
            ScheduleAction::SpoofRandom => {
                self.spoofer
                    .generate_and_spoof_with(&task.interface, &self.strategy, defaults)
                    .await
            }
            ScheduleAction::SpoofSpecific { mac } => self.spoofer.spoof(&task.interface, *mac).await,
            ScheduleAction::Restore => self.spoofer.restore(&task.interface).await,
            ScheduleAction::RestoreOriginal => self.spoofer.restore_original(&task.interface).await,
        };

        match result {
            Ok(tx) => TaskOutcome {
                at: now,
                status: tx.status.to_string(),
                transaction_id: Some(tx.id.clone()),
                message: tx.error.as_ref().map(|e| e.message.clone()),
            },
            Err(e) => TaskOutcome {
                at: now,
                status: "error".to_string(),
                transaction_id: None,
                message: Some(e.to_string()),
            },
        }
    }

    /// Poll every `interval` until `shutdown` resolves
    pub async fn run<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(interval_secs = interval.as_secs(), "scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_due(Utc::now()).await {
                        Ok(runs) if !runs.is_empty() => info!(count = runs.len(), "scheduled tasks ran"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "scheduler pass failed"),
                    }
                }
                _ = &mut shutdown => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }
    }
}
