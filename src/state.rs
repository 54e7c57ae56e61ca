//! The live state every machine reports, and the rules for moving it.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// How long a machine may go without telemetry and still count as healthy.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// What a machine is doing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema, Display, FromStr)]
pub enum MachineState {
    /// Nothing is known yet, or the device reported something we do not
    /// recognize.
    #[default]
    Unknown,
    /// Ready for a job.
    Idle,
    /// A job is running.
    Printing,
    /// A job is running but still calibrating or heating. Only reached from
    /// [MachineState::Printing].
    Preparing,
    /// A job finished and the bed has not been cleared yet.
    Printed,
    /// A job is paused.
    Paused,
    /// A job failed.
    Error,
}

impl MachineState {
    /// Whether a job is underway, which is when progress and remaining time
    /// mean anything.
    pub fn is_active_job(&self) -> bool {
        matches!(self, Self::Printing | Self::Preparing | Self::Paused)
    }
}

/// The manufacturing process of a machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema, Display, FromStr)]
pub enum MachineTechnology {
    /// Fused deposition modeling.
    #[serde(rename = "FDM")]
    #[display("FDM")]
    Fdm,
    /// Resin stereolithography.
    #[serde(rename = "SLA")]
    #[display("SLA")]
    Sla,
}

/// The mutable part of a machine, replaced as telemetry arrives.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LiveState {
    /// What the machine is doing.
    pub status: MachineState,
    /// Job progress in percent.
    pub progress: Option<i64>,
    /// Remaining job time in minutes.
    pub time_remaining: Option<i64>,
    /// The current or last job name.
    pub filename: Option<String>,
    /// Why the last job failed.
    pub fail_reason: Option<String>,
    /// When telemetry was last received.
    pub last_updated: Option<DateTime<Utc>>,
}

impl LiveState {
    /// Whether telemetry arrived less than `timeout` before `now`.
    pub fn is_healthy_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        match self.last_updated {
            Some(last_updated) => now - last_updated < timeout,
            None => false,
        }
    }

    /// Apply the fields that only make sense within their state, after
    /// `status` moved away from `previous`.
    ///
    /// Leaving [MachineState::Printing], or leaving a job altogether, clears
    /// progress and remaining time. Leaving [MachineState::Error] clears the
    /// fail reason.
    pub fn settle(&mut self, previous: MachineState) {
        let left_printing = previous == MachineState::Printing && self.status != previous;
        if left_printing || (previous.is_active_job() && !self.status.is_active_job()) {
            self.progress = None;
            self.time_remaining = None;
        }
        if previous == MachineState::Error && self.status != MachineState::Error {
            self.fail_reason = None;
        }
    }

    /// Move a finished or failed machine back to [MachineState::Idle].
    ///
    /// Returns the current state, untouched, when it is neither.
    pub fn clear_bed(&mut self) -> Result<(), MachineState> {
        match self.status {
            MachineState::Printed | MachineState::Error => {
                self.status = MachineState::Idle;
                self.progress = None;
                self.time_remaining = None;
                self.fail_reason = None;
                Ok(())
            }
            other => Err(other),
        }
    }
}

/// State owned by one machine's adapter task and read by everyone else.
///
/// Writers apply a whole telemetry tick in one [StateCell::modify] call, so
/// readers see either the state before the tick or after it.
#[derive(Debug)]
pub struct StateCell<S> {
    tx: Arc<watch::Sender<S>>,
}

impl<S> Clone for StateCell<S> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<S: Clone> StateCell<S> {
    /// Create a cell holding `initial`.
    pub fn new(initial: S) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> S {
        self.tx.borrow().clone()
    }

    /// Read the current state without copying it.
    pub fn with<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Mutate the state. `f` returns whether it changed anything, which
    /// decides if subscribers are woken; that is also returned.
    pub fn modify(&self, f: impl FnOnce(&mut S) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    /// Watch for changes.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn updated_minutes_ago(minutes: i64, now: DateTime<Utc>) -> LiveState {
        LiveState {
            last_updated: Some(now - chrono::Duration::minutes(minutes)),
            ..Default::default()
        }
    }

    #[test]
    fn test_health() {
        let now = Utc::now();
        assert!(updated_minutes_ago(4, now).is_healthy_at(now, DEFAULT_HEALTH_TIMEOUT));
        assert!(!updated_minutes_ago(6, now).is_healthy_at(now, DEFAULT_HEALTH_TIMEOUT));
        assert!(!LiveState::default().is_healthy_at(now, DEFAULT_HEALTH_TIMEOUT));
    }

    #[test]
    fn test_leaving_job_clears_progress() {
        let mut state = LiveState {
            status: MachineState::Idle,
            progress: Some(50),
            time_remaining: Some(12),
            ..Default::default()
        };
        state.settle(MachineState::Printing);
        assert_eq!(state.progress, None);
        assert_eq!(state.time_remaining, None);

        let mut paused = LiveState {
            status: MachineState::Paused,
            progress: Some(50),
            time_remaining: Some(12),
            ..Default::default()
        };
        paused.settle(MachineState::Printing);
        assert_eq!(paused.progress, None);
        assert_eq!(paused.time_remaining, None);

        let mut stopped = LiveState {
            status: MachineState::Idle,
            progress: Some(50),
            ..Default::default()
        };
        stopped.settle(MachineState::Paused);
        assert_eq!(stopped.progress, None);

        // Entering a job or staying in it keeps the values.
        let mut printing = LiveState {
            status: MachineState::Printing,
            progress: Some(50),
            ..Default::default()
        };
        printing.settle(MachineState::Preparing);
        assert_eq!(printing.progress, Some(50));
        printing.settle(MachineState::Printing);
        assert_eq!(printing.progress, Some(50));
    }

    #[test]
    fn test_leaving_error_clears_fail_reason() {
        let mut state = LiveState {
            status: MachineState::Idle,
            fail_reason: Some("0300_4000".to_string()),
            ..Default::default()
        };
        state.settle(MachineState::Error);
        assert_eq!(state.fail_reason, None);
    }

    #[test]
    fn test_clear_bed() {
        for from in [MachineState::Printed, MachineState::Error] {
            let mut state = LiveState {
                status: from,
                progress: Some(100),
                fail_reason: Some("jam".to_string()),
                filename: Some("benchy".to_string()),
                ..Default::default()
            };
            assert_eq!(state.clear_bed(), Ok(()));
            assert_eq!(state.status, MachineState::Idle);
            assert_eq!(state.progress, None);
            assert_eq!(state.fail_reason, None);
            assert_eq!(state.filename.as_deref(), Some("benchy"));
        }

        for from in [MachineState::Idle, MachineState::Printing, MachineState::Paused] {
            let mut state = LiveState {
                status: from,
                progress: Some(10),
                ..Default::default()
            };
            let before = state.clone();
            assert_eq!(state.clear_bed(), Err(from));
            assert_eq!(state, before);
        }
    }

    #[test]
    fn test_state_names() {
        assert_eq!(MachineState::Preparing.to_string(), "Preparing");
        assert_eq!("Printed".parse::<MachineState>().unwrap(), MachineState::Printed);
        assert_eq!(MachineTechnology::Fdm.to_string(), "FDM");
        assert_eq!("SLA".parse::<MachineTechnology>().unwrap(), MachineTechnology::Sla);
        assert_eq!(serde_json::to_value(MachineTechnology::Sla).unwrap(), serde_json::json!("SLA"));
    }

    #[tokio::test]
    async fn test_state_cell_only_wakes_on_change() {
        let cell = StateCell::new(LiveState::default());
        let mut rx = cell.subscribe();

        assert!(!cell.modify(|_| false));
        assert!(!rx.has_changed().unwrap());

        cell.modify(|state| {
            state.status = MachineState::Idle;
            true
        });
        assert!(rx.has_changed().unwrap());
        assert_eq!(cell.snapshot().status, MachineState::Idle);
    }
}
