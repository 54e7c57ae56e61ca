//! This module contains support for ELEGOO resin printers, polled over the
//! LAN.

use std::{
    collections::BTreeMap,
    net::IpAddr,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use ::elegoo::{Activity, Client, Status};
use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    state::StateCell, Capabilities, Error, Filament, FilamentLocation, FilamentMutable, LiveState, Machine,
    MachineState, MachineTechnology, OperationError, Result, ValidationError, Volume, DEFAULT_HEALTH_TIMEOUT,
};

/// The brand name reported for every ELEGOO machine.
pub const BRAND: &str = "ELEGOO";
/// How often the printer is polled.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Ticks are milliseconds on the firmware we have seen; remaining time is
/// reported in minutes.
const TICKS_PER_MINUTE: i64 = 60_000;

/// The configuration for a single ELEGOO machine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// The printer's address on the LAN.
    pub ip: String,

    /// The printer model, e.g. `Mars 4 Ultra`.
    pub model: String,

    /// A unique name for the printer; defaults to the model.
    #[serde(default)]
    pub nickname: Option<String>,

    /// Seconds without a successful poll before the printer is considered
    /// stale.
    #[serde(default)]
    pub health_timeout_secs: Option<u64>,
}

/// Supported ELEGOO models.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, Display, FromStr, PartialEq, Eq)]
pub enum ElegooModel {
    /// ELEGOO Mars 4 Ultra.
    #[serde(rename = "Mars 4 Ultra")]
    #[display("Mars 4 Ultra")]
    Mars4Ultra,
}

impl ElegooModel {
    /// Look up a configured model name.
    pub fn from_name(name: &str) -> Result<Self, ValidationError> {
        name.trim().parse().map_err(|_| ValidationError::UnsupportedModel {
            brand: BRAND.to_string(),
            model: name.to_string(),
        })
    }

    /// The model name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mars4Ultra => "Mars 4 Ultra",
        }
    }

    /// The build volume.
    pub fn volume(&self) -> Volume {
        match self {
            Self::Mars4Ultra => Volume {
                width: 153.0,
                depth: 77.0,
                height: 165.0,
            },
        }
    }
}

/// Everything known about one ELEGOO printer.
#[derive(Clone, Debug, Default, PartialEq)]
struct ElegooState {
    live: LiveState,
    tank: Option<Filament>,
}

type PollRequest = oneshot::Sender<Result<()>>;

/// An ELEGOO printer polled by its own background task.
///
/// The task stops, and releases its socket, when the last handle is
/// dropped or [Elegoo::shutdown] is called.
#[derive(Clone)]
pub struct Elegoo {
    model: ElegooModel,
    identifier: String,
    health_timeout: Duration,
    state: StateCell<ElegooState>,
    poll_now: mpsc::Sender<PollRequest>,
    shutdown: Arc<ShutdownOnDrop>,
}

struct ShutdownOnDrop(StdMutex<Option<watch::Sender<bool>>>);

impl ShutdownOnDrop {
    fn trigger(&self) {
        if let Ok(mut tx) = self.0.lock() {
            if let Some(tx) = tx.take() {
                let _ = tx.send(true);
            }
        }
    }
}

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        self.trigger();
    }
}

impl Elegoo {
    /// Validate the configuration, bind the socket and start polling.
    pub async fn new(config: &Config) -> Result<Self> {
        let ip: IpAddr = config
            .ip
            .parse()
            .map_err(|_| ValidationError::InvalidAddress(config.ip.clone()))?;
        let client = Client::bind(ip).await?;
        Self::with_client(config, client, POLL_INTERVAL)
    }

    fn with_client(config: &Config, client: Client, interval: Duration) -> Result<Self> {
        let model = ElegooModel::from_name(&config.model)?;
        let identifier = config.nickname.clone().unwrap_or_else(|| model.to_string());
        let state = StateCell::new(ElegooState::default());
        let (poll_tx, poll_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(identifier = %identifier, printer = %client.target(), "registered elegoo machine");
        tokio::spawn(poll_loop(
            identifier.clone(),
            client,
            state.clone(),
            interval,
            poll_rx,
            shutdown_rx,
        ));

        Ok(Self {
            model,
            identifier,
            health_timeout: config
                .health_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_HEALTH_TIMEOUT),
            state,
            poll_now: poll_tx,
            shutdown: Arc::new(ShutdownOnDrop(StdMutex::new(Some(shutdown_tx)))),
        })
    }

    /// Stop polling. The socket is closed once the loop notices.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }
}

async fn poll_loop(
    identifier: String,
    client: Client,
    state: StateCell<ElegooState>,
    interval: Duration,
    mut poll_now: mpsc::Receiver<PollRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if let Err(err) = poll_once(&client, &state, &identifier).await {
                    tracing::warn!(identifier = %identifier, error = %err, "failed to poll elegoo machine");
                }
            }
            request = poll_now.recv() => match request {
                Some(reply) => {
                    let _ = reply.send(poll_once(&client, &state, &identifier).await);
                }
                None => break,
            },
        }
    }

    tracing::debug!(identifier = %identifier, "stopped polling, closing socket");
    drop(client);
}

async fn poll_once(client: &Client, state: &StateCell<ElegooState>, identifier: &str) -> Result<()> {
    let status = client.status().await?;
    let now = Utc::now();

    let mut outcome = Ok(());
    state.modify(|state| {
        let previous = state.live.status;
        match apply_status(&mut state.live, &status, now) {
            Ok(()) => {
                if state.live.status != previous {
                    tracing::info!(identifier, from = %previous, to = %state.live.status, "state changed");
                }
                true
            }
            Err(err) => {
                outcome = Err(err);
                false
            }
        }
    });
    outcome
}

/// Fold one status document into the live state.
///
/// A printer that stops printing has finished its job: that poll reports
/// [MachineState::Printed] at 100%, and the next idle poll returns to
/// [MachineState::Idle].
fn apply_status(live: &mut LiveState, status: &Status, now: DateTime<Utc>) -> Result<()> {
    let previous = live.status;

    match status.activity() {
        Activity::Printing => {
            let info = status
                .print_info
                .as_ref()
                .ok_or_else(|| Error::Protocol("printing status without PrintInfo".to_string()))?;

            live.status = MachineState::Printing;
            live.progress = progress(info.current_ticks, info.total_ticks);
            live.time_remaining = Some(info.total_ticks.saturating_sub(info.current_ticks).max(0) / TICKS_PER_MINUTE);
            if !info.filename.trim().is_empty() {
                live.filename = Some(info.filename.clone());
            }
            if info.error_number != 0 {
                live.fail_reason = Some(format!("Error Code: {}", info.error_number));
            }
        }
        Activity::Idle if previous == MachineState::Printing => {
            live.status = MachineState::Printed;
            live.settle(previous);
            live.progress = Some(100);
            live.time_remaining = Some(0);
        }
        Activity::Idle => {
            live.status = MachineState::Idle;
            live.settle(previous);
            live.progress = None;
            live.time_remaining = None;
        }
        Activity::Other(code) => {
            tracing::debug!(code, "unrecognized elegoo status code");
            live.status = MachineState::Unknown;
            live.settle(previous);
        }
    }

    live.last_updated = Some(now);
    Ok(())
}

/// Percent done, capped at 100. `None` when the total is unknown or the tick
/// counts are out of range.
fn progress(current_ticks: i64, total_ticks: i64) -> Option<i64> {
    if total_ticks <= 0 {
        return None;
    }
    let percent = current_ticks.max(0).checked_mul(100)? / total_ticks;
    Some(percent.min(100))
}

impl Machine for Elegoo {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn brand(&self) -> &str {
        BRAND
    }

    fn model(&self) -> &str {
        self.model.as_str()
    }

    fn technology(&self) -> MachineTechnology {
        MachineTechnology::Sla
    }

    fn volume(&self) -> Volume {
        self.model.volume()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            filament_mutable: true,
            ..Default::default()
        }
    }

    fn state(&self) -> LiveState {
        self.state.with(|state| state.live.clone())
    }

    fn filaments(&self) -> BTreeMap<FilamentLocation, Filament> {
        self.state.with(|state| {
            state
                .tank
                .iter()
                .map(|filament| (FilamentLocation::external(), filament.clone()))
                .collect()
        })
    }

    fn health_timeout(&self) -> Duration {
        self.health_timeout
    }

    async fn update(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let stopped = || Error::Connectivity(format!("{} is no longer polling", self.identifier));
        self.poll_now.send(tx).await.map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    async fn mark_as_bed_cleared(&self) -> Result<()> {
        let mut refused = None;
        self.state.modify(|state| match state.live.clear_bed() {
            Ok(()) => true,
            Err(current) => {
                refused = Some(current);
                false
            }
        });

        match refused {
            Some(state) => Err(OperationError::InvalidState {
                identifier: self.identifier.clone(),
                state,
                operation: "clearing the bed",
            }
            .into()),
            None => {
                tracing::info!(identifier = %self.identifier, "bed cleared");
                Ok(())
            }
        }
    }
}

impl FilamentMutable for Elegoo {
    fn set_filament(&self, filament: Option<Filament>) -> Result<()> {
        tracing::info!(
            identifier = %self.identifier,
            filament = ?filament.as_ref().map(ToString::to_string),
            "set resin"
        );
        self.state.modify(|state| {
            let changed = state.tank != filament;
            state.tank = filament;
            changed
        });
        Ok(())
    }
}
