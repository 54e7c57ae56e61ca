//! This module contains support for printing to Bambu Lab 3D printers
//! through the Bambu cloud.

mod telemetry;
mod variant;

pub use telemetry::BambuState;
pub use variant::BambuModel;

use std::{collections::BTreeMap, path::Path, time::Duration};

use bambulabs::{
    command::{Calibration, Command},
    message::Report,
    pool::ConnectionPool,
    upload,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    slicer::{AnySlicer, SlicedMetadata, Slicer as _, SlicingOptions},
    state::StateCell,
    Capabilities, Controllable, Filament, FilamentLocation, LiveState, Machine, MachineTechnology, OperationError,
    Printable, Result, Sliceable, TemporaryFile, Volume, DEFAULT_HEALTH_TIMEOUT,
};

/// The brand name reported for every Bambu machine.
pub const BRAND: &str = "BBL";

/// The configuration for a single bambu labs machine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// The printer's serial number. Its first three characters decide the
    /// model.
    pub serial: String,

    /// The LAN access code, used as the upload password.
    pub access_code: String,

    /// The printer's address on the LAN, for uploads.
    pub ip: String,

    /// A unique name for the printer; defaults to the model.
    #[serde(default)]
    pub nickname: Option<String>,

    /// Seconds without telemetry before the printer is considered stale.
    #[serde(default)]
    pub health_timeout_secs: Option<u64>,
}

/// A Bambu printer reached through the shared cloud broker session.
#[derive(Clone)]
pub struct Bambu {
    serial: String,
    model: BambuModel,
    identifier: String,
    access_code: String,
    ip: String,
    health_timeout: Duration,
    upload_timeout: Duration,
    pool: ConnectionPool,
    slicer: AnySlicer,
    state: StateCell<BambuState>,
}

impl Bambu {
    /// Create the printer and register it with the broker pool. Reports are
    /// applied by a background task for as long as the pool routes them.
    pub async fn new(config: &Config, pool: ConnectionPool, slicer: AnySlicer) -> Result<Self> {
        let model = BambuModel::from_serial(&config.serial)?;
        let identifier = config.nickname.clone().unwrap_or_else(|| model.to_string());
        let state = StateCell::new(BambuState::default());

        let reports = pool.register(&config.serial).await;
        tokio::spawn(apply_reports(config.serial.clone(), state.clone(), reports));

        tracing::info!(serial = %config.serial, model = %model, identifier = %identifier, "registered bambu machine");

        Ok(Self {
            serial: config.serial.clone(),
            model,
            identifier,
            access_code: config.access_code.clone(),
            ip: config.ip.clone(),
            health_timeout: config
                .health_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_HEALTH_TIMEOUT),
            upload_timeout: upload::UPLOAD_TIMEOUT,
            pool,
            slicer,
            state,
        })
    }

    /// Override how long an upload may take.
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    /// The printer's serial number.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// The full adapter state, including what the device reported about
    /// storage and AMS trays.
    pub fn bambu_state(&self) -> BambuState {
        self.state.snapshot()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.pool.request(&self.serial, &command).await?;
        Ok(())
    }
}

/// Drain the reports the pool routes to one printer, one tick at a time.
async fn apply_reports(serial: String, state: StateCell<BambuState>, mut reports: mpsc::UnboundedReceiver<Value>) {
    while let Some(value) = reports.recv().await {
        tracing::trace!(serial = %serial, report = %value, "received report");
        let report = Report::from(value);
        state.modify(|state| state.apply_report(&serial, &report, Utc::now()));
    }
    tracing::debug!(serial = %serial, "report channel closed");
}

impl Machine for Bambu {
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
        MachineTechnology::Fdm
    }

    fn volume(&self) -> Volume {
        self.model.volume()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            printable: true,
            sliceable: true,
            controllable: true,
            filament_mutable: false,
        }
    }

    fn state(&self) -> LiveState {
        self.state.with(|state| state.live.clone())
    }

    fn filaments(&self) -> BTreeMap<FilamentLocation, Filament> {
        self.state.with(BambuState::loaded_filaments)
    }

    fn health_timeout(&self) -> Duration {
        self.health_timeout
    }

    async fn update(&self) -> Result<()> {
        self.pool.rebase(&self.serial).await?;
        Ok(())
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

        if let Some(state) = refused {
            return Err(OperationError::InvalidState {
                identifier: self.identifier.clone(),
                state,
                operation: "clearing the bed",
            }
            .into());
        }

        tracing::info!(identifier = %self.identifier, "bed cleared");
        Ok(())
    }
}

impl Printable for Bambu {
    async fn print(&self, sliced: &Path, file_name: &str, location: FilamentLocation) -> Result<()> {
        if !self.state.with(|state| state.sdcard) {
            return Err(OperationError::NoRemovableStorage(self.identifier.clone()).into());
        }

        let remote = upload::archive_name(file_name);
        upload::upload_file(&self.ip, &self.access_code, sliced, &remote, self.upload_timeout)
            .await
            .map_err(|err| OperationError::Upload {
                identifier: self.identifier.clone(),
                reason: err.to_string(),
            })?;

        tracing::info!(
            identifier = %self.identifier,
            file = %remote,
            location = %location,
            "starting print"
        );
        self.send(Command::project_file(
            &remote,
            !location.is_external(),
            location.ams_mapping_index(),
            Calibration::default(),
        ))
        .await
    }
}

impl Sliceable for Bambu {
    async fn slice(&self, model: &Path, file_name: &str, options: &SlicingOptions) -> Result<TemporaryFile> {
        tracing::debug!(identifier = %self.identifier, file_name, "slicing");
        self.slicer
            .slice(self.model.as_str(), model, options)
            .await
            .map_err(|err| OperationError::Slicing(format!("{:#}", err)).into())
    }

    async fn read_metadata(&self, sliced: &Path) -> Result<SlicedMetadata> {
        self.slicer
            .read_metadata(sliced)
            .await
            .map_err(|err| OperationError::Slicing(format!("{:#}", err)).into())
    }
}

impl Controllable for Bambu {
    async fn pause(&self) -> Result<()> {
        self.send(Command::pause()).await
    }

    async fn resume(&self) -> Result<()> {
        self.send(Command::resume()).await
    }

    async fn stop(&self) -> Result<()> {
        self.send(Command::stop()).await
    }
}
