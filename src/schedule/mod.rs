//! Per-collector timing engine.
//!
//! A `Schedule` owns an ordered set of named tasks, each with a
//! configured interval and a next-due timestamp. Standby mode replaces a
//! task's effective interval with a retry delay until `recover()` is
//! called; recovery is global across tasks on purpose (the collector run
//! loop recovers the whole schedule on the first successful poll).

use std::time::Duration;

use tokio::time::Instant;

use crate::errors::PollerError;

#[derive(Debug)]
pub struct Task {
    name: String,
    interval: Duration,
    next_due: Instant,
    last_start: Option<Instant>,
    runtime: Duration,
    standby: Option<Duration>,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Configured interval normally, the standby delay while in standby.
    pub fn effective_interval(&self) -> Duration {
        self.standby.unwrap_or(self.interval)
    }

    pub fn is_due(&self) -> bool {
        Instant::now() >= self.next_due
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    /// Wall-clock duration of the most recent run.
    pub fn runtime(&self) -> Duration {
        self.runtime
    }

    pub fn is_standby(&self) -> bool {
        self.standby.is_some()
    }

    pub fn standby_delay(&self) -> Option<Duration> {
        self.standby
    }
}

#[derive(Debug, Default)]
pub struct Schedule {
    tasks: Vec<Task>,
}

/// Parse a human interval string: `"10s"`, `"5m"`, `"1h"` or bare
/// seconds. Zero and negative values are rejected.
pub fn parse_interval(text: &str) -> Result<Duration, PollerError> {
    let text = text.trim();
    let (digits, multiplier) = match text.as_bytes().last() {
        Some(b's') => (&text[..text.len() - 1], 1),
        Some(b'm') => (&text[..text.len() - 1], 60),
        Some(b'h') => (&text[..text.len() - 1], 3600),
        _ => (text, 1),
    };
    let seconds: u64 = digits
        .parse()
        .map_err(|_| PollerError::InvalidParam(format!("interval ({text})")))?;
    if seconds == 0 {
        return Err(PollerError::InvalidParam(format!("interval ({text}): zero")));
    }
    Ok(Duration::from_secs(seconds * multiplier))
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task; it is immediately due. Tasks keep registration
    /// order, which is also their firing order when several are due.
    pub fn add_task(&mut self, name: &str, interval: &str) -> Result<(), PollerError> {
        if self.tasks.iter().any(|t| t.name == name) {
            return Err(PollerError::InvalidParam(format!(
                "task ({name}) already scheduled"
            )));
        }
        let interval = parse_interval(interval)?;
        self.tasks.push(Task {
            name: name.to_string(),
            interval,
            next_due: Instant::now(),
            last_start: None,
            runtime: Duration::ZERO,
            standby: None,
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get_task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    fn get_task_mut(&mut self, name: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.name == name)
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Record a completed run: stores the runtime and advances next-due
    /// to `started + effective-interval`. An overrun makes the task due
    /// again immediately but fires it only once.
    pub fn record_run(&mut self, name: &str, started: Instant, runtime: Duration) {
        if let Some(task) = self.get_task_mut(name) {
            task.last_start = Some(started);
            task.runtime = runtime;
            task.next_due = started + task.effective_interval();
        }
    }

    /// Put one task into standby: its effective interval becomes `delay`
    /// and it is rescheduled `delay` from now.
    pub fn set_standby(&mut self, name: &str, delay: Duration) {
        if let Some(task) = self.get_task_mut(name) {
            task.standby = Some(delay);
            task.next_due = Instant::now() + delay;
        }
    }

    /// Clear standby on every task and re-anchor each recovered task to
    /// its normal interval.
    pub fn recover(&mut self) {
        for task in &mut self.tasks {
            if task.standby.take().is_some() {
                task.next_due = match task.last_start {
                    Some(started) => started + task.interval,
                    None => Instant::now(),
                };
            }
        }
    }

    /// True iff any task is in standby mode.
    pub fn is_standby(&self) -> bool {
        self.tasks.iter().any(Task::is_standby)
    }

    /// Earliest next-due across all tasks.
    pub fn next_due(&self) -> Instant {
        self.tasks
            .iter()
            .map(Task::next_due)
            .min()
            .unwrap_or_else(Instant::now)
    }

    /// Sleep until the earliest next-due task.
    pub async fn sleep(&self) {
        tokio::time::sleep_until(self.next_due()).await;
    }
}
