//! Timed and repeating runs.
//!
//! Each scheduled task lives in its own tokio task. Firings go through the
//! same [`Pilot`] run API as interactive queries, so they queue on the
//! session lease like any other run. Scheduled runs cannot ask anyone, so an
//! escalation is reported as a failure carrying the question.

use crate::control_loop::RunOptions;
use crate::errors::{RunError, SchedulerError};
use crate::pilot::Pilot;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// How often a task repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Hourly,
    Daily,
    Weekly,
    /// Fixed period, e.g. `90s`.
    Every(Duration),
}

/// Longest accepted repeat period.
const MAX_PERIOD: Duration = Duration::from_secs(366 * 24 * 60 * 60);

impl Cadence {
    pub fn period(&self) -> Duration {
        match self {
            Cadence::Hourly => Duration::from_secs(60 * 60),
            Cadence::Daily => Duration::from_secs(24 * 60 * 60),
            Cadence::Weekly => Duration::from_secs(7 * 24 * 60 * 60),
            Cadence::Every(period) => *period,
        }
    }

    fn validate(&self) -> Result<(), SchedulerError> {
        let period = self.period();
        if period.is_zero() {
            return Err(SchedulerError::InvalidSchedule(
                "cadence period must be positive".to_string(),
            ));
        }
        if period > MAX_PERIOD {
            return Err(SchedulerError::InvalidSchedule(format!(
                "cadence period of {}s is longer than a year",
                period.as_secs()
            )));
        }
        Ok(())
    }
}

impl FromStr for Cadence {
    type Err = SchedulerError;

    /// `hourly`, `daily`, `weekly`, or a period such as `30s`, `15m`, `2h`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "hourly" => return Ok(Cadence::Hourly),
            "daily" => return Ok(Cadence::Daily),
            "weekly" => return Ok(Cadence::Weekly),
            _ => {}
        }
        let invalid = || SchedulerError::InvalidSchedule(format!("unknown cadence '{s}'"));
        let split = lower
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (digits, unit) = lower.split_at(split);
        let n: u64 = digits.parse().map_err(|_| invalid())?;
        let unit_secs: u64 = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            _ => return Err(invalid()),
        };
        let secs = n.checked_mul(unit_secs).ok_or_else(|| {
            SchedulerError::InvalidSchedule(format!("cadence '{s}' is too long"))
        })?;
        let cadence = Cadence::Every(Duration::from_secs(secs));
        cadence.validate()?;
        Ok(cadence)
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Hourly => f.write_str("hourly"),
            Cadence::Daily => f.write_str("daily"),
            Cadence::Weekly => f.write_str("weekly"),
            Cadence::Every(p) => write!(f, "{}s", p.as_secs()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub query: String,
    /// First firing; `None` or a past time fires immediately.
    pub fixed_run_time: Option<DateTime<Local>>,
    pub repeat: Option<Cadence>,
    pub options: RunOptions,
}

impl ScheduledTask {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            fixed_run_time: None,
            repeat: None,
            options: RunOptions::default(),
        }
    }

    pub fn at(mut self, time: DateTime<Local>) -> Self {
        self.fixed_run_time = Some(time);
        self
    }

    pub fn every(mut self, cadence: Cadence) -> Self {
        self.repeat = Some(cadence);
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub status: TaskStatus,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Local>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Local>>,
    /// Outcome of the most recent firing, kept after the task is rescheduled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<TaskStatus>,
    pub runs: u32,
}

pub type StatusTable = HashMap<Uuid, TaskState>;

/// First firing time for a task planned at `now`.
pub fn first_firing(task: &ScheduledTask, now: DateTime<Local>) -> DateTime<Local> {
    match task.fixed_run_time {
        Some(t) if t > now => t,
        _ => now,
    }
}

/// Next slot after `planned` that is still in the future; missed slots are skipped.
pub fn next_firing(
    planned: DateTime<Local>,
    cadence: Cadence,
    now: DateTime<Local>,
) -> DateTime<Local> {
    let period = chrono::Duration::from_std(cadence.period())
        .unwrap_or_else(|_| chrono::Duration::hours(1));
    let mut next = planned + period;
    if next <= now {
        let behind = (now - next).num_milliseconds();
        let step = period.num_milliseconds().max(1);
        let skipped = behind / step + 1;
        next += chrono::Duration::milliseconds(skipped * step);
    }
    next
}

struct TaskHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

type TaskTable = HashMap<Uuid, TaskHandle>;

fn lock(tasks: &Mutex<TaskTable>) -> std::sync::MutexGuard<'_, TaskTable> {
    tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Scheduler {
    pilot: Pilot,
    tasks: Arc<Mutex<TaskTable>>,
    statuses: Arc<watch::Sender<StatusTable>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(pilot: Pilot) -> Self {
        let (statuses, _) = watch::channel(StatusTable::new());
        Self {
            pilot,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            statuses: Arc::new(statuses),
            shutdown: CancellationToken::new(),
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, TaskTable> {
        lock(&self.tasks)
    }

    /// Start tracking `task`. Must be called inside a tokio runtime.
    pub fn schedule(&self, task: ScheduledTask) -> Result<Uuid, SchedulerError> {
        if let Some(cadence) = task.repeat {
            cadence.validate()?;
        }
        if task.query.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule("query is empty".to_string()));
        }
        let id = task.id;
        if self.tasks().contains_key(&id) {
            return Err(SchedulerError::InvalidSchedule(format!(
                "task {id} is already scheduled"
            )));
        }

        let first = first_firing(&task, Local::now());
        self.statuses.send_modify(|table| {
            table.insert(
                id,
                TaskState {
                    status: TaskStatus::Scheduled,
                    query: task.query.clone(),
                    last_error: None,
                    last_run_at: None,
                    next_run_at: Some(first),
                    last_outcome: None,
                    runs: 0,
                },
            );
        });
        info!(
            "[scheduler] task {} scheduled for {}{}: {}",
            id,
            first.format("%Y-%m-%d %H:%M:%S"),
            task.repeat.map(|c| format!(", repeating {c}")).unwrap_or_default(),
            task.query
        );

        let cancel = self.shutdown.child_token();
        let work = drive_task(
            self.pilot.clone(),
            task,
            first,
            cancel.clone(),
            self.statuses.clone(),
        );
        // Held across the spawn so the task cannot deregister before it is registered.
        let mut tasks = self.tasks();
        let table = self.tasks.clone();
        let join = tokio::spawn(async move {
            work.await;
            lock(&table).remove(&id);
        });
        tasks.insert(id, TaskHandle { cancel, join });
        Ok(id)
    }

    /// Stop a task. A firing in progress is cancelled between steps.
    pub fn cancel(&self, id: Uuid) -> Result<(), SchedulerError> {
        let tasks = self.tasks();
        let handle = tasks.get(&id).ok_or(SchedulerError::UnknownTask(id))?;
        handle.cancel.cancel();
        info!("[scheduler] task {} cancel requested", id);
        Ok(())
    }

    pub fn status(&self, id: Uuid) -> Option<TaskState> {
        self.statuses.borrow().get(&id).cloned()
    }

    pub fn statuses(&self) -> StatusTable {
        self.statuses.borrow().clone()
    }

    /// Watch the status table; every transition replaces the watched value.
    pub fn subscribe(&self) -> watch::Receiver<StatusTable> {
        self.statuses.subscribe()
    }

    /// Cancel every task and wait for them to stop.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.tasks().drain().map(|(_, h)| h.join).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("[scheduler] task ended abnormally: {}", e);
            }
        }
    }
}

fn update(statuses: &watch::Sender<StatusTable>, id: Uuid, f: impl FnOnce(&mut TaskState)) {
    statuses.send_modify(|table| {
        if let Some(state) = table.get_mut(&id) {
            f(state);
        }
    });
}

async fn drive_task(
    pilot: Pilot,
    task: ScheduledTask,
    first: DateTime<Local>,
    cancel: CancellationToken,
    statuses: Arc<watch::Sender<StatusTable>>,
) {
    let id = task.id;
    let mut planned = first;
    loop {
        update(&statuses, id, |s| {
            s.status = TaskStatus::Scheduled;
            s.next_run_at = Some(planned);
        });

        let wait = (planned - Local::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => {
                info!("[scheduler] task {} cancelled", id);
                update(&statuses, id, |s| {
                    s.status = TaskStatus::Cancelled;
                    s.next_run_at = None;
                });
                return;
            }
        }

        let started = Local::now();
        update(&statuses, id, |s| {
            s.status = TaskStatus::Running;
            s.last_run_at = Some(started);
            s.next_run_at = None;
        });
        info!("[scheduler] task {} firing: {}", id, task.query);

        let result = pilot
            .run(task.query.clone(), task.options.clone(), cancel.child_token())
            .await
            .into_result();

        let outcome = match &result {
            Ok(_) => TaskStatus::Completed,
            Err(RunError::Cancelled { .. }) => TaskStatus::Cancelled,
            Err(_) => TaskStatus::Failed,
        };
        let error = result.as_ref().err().map(ToString::to_string);
        if let Some(e) = &error {
            warn!("[scheduler] task {} {}: {}", id, outcome, e);
        }
        update(&statuses, id, |s| {
            s.status = outcome;
            s.last_outcome = Some(outcome);
            s.last_error = error;
            s.runs += 1;
        });

        let Some(cadence) = task.repeat else {
            return;
        };
        if outcome == TaskStatus::Cancelled || cancel.is_cancelled() {
            update(&statuses, id, |s| s.status = TaskStatus::Cancelled);
            return;
        }
        planned = next_firing(planned, cadence, Local::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 3, 2, h, m, 0)
            .single()
            .unwrap()
    }

    #[test]
    fn test_cadence_parsing() {
        assert_eq!("hourly".parse::<Cadence>().unwrap(), Cadence::Hourly);
        assert_eq!(" Daily ".parse::<Cadence>().unwrap(), Cadence::Daily);
        assert_eq!(
            "90s".parse::<Cadence>().unwrap(),
            Cadence::Every(Duration::from_secs(90))
        );
        assert_eq!(
            "15m".parse::<Cadence>().unwrap().period(),
            Duration::from_secs(900)
        );
        assert!("0s".parse::<Cadence>().is_err());
        assert!("fortnightly".parse::<Cadence>().is_err());
        assert!("10x".parse::<Cadence>().is_err());
        assert!("9999999999999999h".parse::<Cadence>().is_err());
        assert!("9000h".parse::<Cadence>().is_err());
    }

    #[test]
    fn test_past_fixed_time_fires_now() {
        let now = at(10, 0);
        let task = ScheduledTask::new("q").at(at(9, 0));
        assert_eq!(first_firing(&task, now), now);
        let task = ScheduledTask::new("q").at(at(11, 0));
        assert_eq!(first_firing(&task, now), at(11, 0));
        assert_eq!(first_firing(&ScheduledTask::new("q"), now), now);
    }

    #[test]
    fn test_missed_slots_are_skipped() {
        assert_eq!(next_firing(at(9, 0), Cadence::Hourly, at(9, 30)), at(10, 0));
        // Three slots missed while a run was long; resume on the grid.
        assert_eq!(next_firing(at(9, 0), Cadence::Hourly, at(12, 10)), at(13, 0));
        assert_eq!(next_firing(at(9, 0), Cadence::Hourly, at(10, 0)), at(11, 0));
        let every = Cadence::Every(Duration::from_secs(600));
        assert_eq!(next_firing(at(9, 0), every, at(9, 5)), at(9, 10));
    }
}
