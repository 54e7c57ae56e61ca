//! The machine contract and the optional capabilities a machine kind may
//! add on top of it.

use std::{collections::BTreeMap, future::Future, path::Path, time::Duration};

use chrono::{DateTime, Utc};
use parse_display::Display;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    slicer::{SlicedMetadata, SlicingOptions},
    Filament, FilamentLocation, LiveState, LoadedFilament, MachineState, MachineTechnology, Result,
    TemporaryFile, Volume, DEFAULT_HEALTH_TIMEOUT,
};

/// A `Machine` is one physical printer in the farm.
///
/// Identity is fixed at construction. Live state is owned by the machine's
/// adapter and changes as telemetry arrives; every getter returns a copy of
/// what is known right now.
pub trait Machine: Send + Sync {
    /// The unique name of this machine in the fleet: its nickname if it has
    /// one, otherwise its model.
    fn identifier(&self) -> &str;

    /// The manufacturer.
    fn brand(&self) -> &str;

    /// The model, as understood by the slicer profiles.
    fn model(&self) -> &str;

    /// The manufacturing process.
    fn technology(&self) -> MachineTechnology;

    /// The build volume.
    fn volume(&self) -> Volume;

    /// Which optional capabilities this kind of machine has.
    fn capabilities(&self) -> Capabilities;

    /// A copy of the live state.
    fn state(&self) -> LiveState;

    /// What is loaded where, in slot order.
    fn filaments(&self) -> BTreeMap<FilamentLocation, Filament>;

    /// How long without telemetry before the machine is considered stale.
    fn health_timeout(&self) -> Duration {
        DEFAULT_HEALTH_TIMEOUT
    }

    /// Whether telemetry arrived recently enough.
    fn is_healthy(&self) -> bool {
        self.state().is_healthy_at(Utc::now(), self.health_timeout())
    }

    /// Every location holding `filament`, in slot order.
    fn locate_matching_filament(&self, filament: &Filament) -> Vec<FilamentLocation> {
        self.filaments()
            .into_iter()
            .filter(|(_, loaded)| loaded == filament)
            .map(|(location, _)| location)
            .collect()
    }

    /// Ask for fresh state. Machines that are pushed their telemetry may
    /// return before it arrives.
    fn update(&self) -> impl Future<Output = Result<()>> + Send;

    /// Return a [MachineState::Printed] or [MachineState::Error] machine to
    /// [MachineState::Idle] once a human has emptied the bed.
    fn mark_as_bed_cleared(&self) -> impl Future<Output = Result<()>> + Send;

    /// Everything a caller may want to know about this machine.
    fn snapshot(&self) -> MachineSnapshot {
        let state = self.state();
        let healthy = state.is_healthy_at(Utc::now(), self.health_timeout());
        MachineSnapshot {
            identifier: self.identifier().to_string(),
            brand: self.brand().to_string(),
            model: self.model().to_string(),
            technology: self.technology(),
            volume: self.volume(),
            capabilities: self.capabilities(),
            status: state.status,
            progress: state.progress,
            time_remaining: state.time_remaining,
            filename: state.filename,
            fail_reason: state.fail_reason,
            last_updated: state.last_updated,
            healthy,
            filaments: self
                .filaments()
                .iter()
                .map(|(location, filament)| LoadedFilament::new(location, filament))
                .collect(),
        }
    }
}

/// Jobs can be uploaded to and started on the machine.
pub trait Printable: Machine {
    /// Upload an already sliced job and start it using the filament at
    /// `location`.
    fn print(&self, sliced: &Path, file_name: &str, location: FilamentLocation) -> impl Future<Output = Result<()>> + Send;
}

/// Models can be sliced into jobs for this machine.
pub trait Sliceable: Machine {
    /// Slice `model` with `options` into a job file for this machine.
    fn slice(
        &self,
        model: &Path,
        file_name: &str,
        options: &SlicingOptions,
    ) -> impl Future<Output = Result<TemporaryFile>> + Send;

    /// Read duration and weight out of a job file produced by
    /// [Sliceable::slice].
    fn read_metadata(&self, sliced: &Path) -> impl Future<Output = Result<SlicedMetadata>> + Send;
}

/// The running job can be paused, resumed and stopped remotely.
pub trait Controllable: Machine {
    /// Pause the running job.
    fn pause(&self) -> impl Future<Output = Result<()>> + Send;

    /// Resume a paused job.
    fn resume(&self) -> impl Future<Output = Result<()>> + Send;

    /// Abort the running job.
    fn stop(&self) -> impl Future<Output = Result<()>> + Send;
}

/// The loaded filament is set by hand, because the machine cannot report
/// it.
pub trait FilamentMutable: Machine {
    /// Record what is loaded, or `None` for nothing.
    fn set_filament(&self, filament: Option<Filament>) -> Result<()>;
}

/// One optional capability.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, Serialize, Deserialize, JsonSchema)]
#[display(style = "kebab-case")]
pub enum Capability {
    /// See [Printable].
    Printable,
    /// See [Sliceable].
    Sliceable,
    /// See [Controllable].
    Controllable,
    /// See [FilamentMutable].
    FilamentMutable,
}

/// The capabilities of a machine kind. Fixed per kind, never changed at
/// runtime.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Capabilities {
    /// See [Printable].
    pub printable: bool,
    /// See [Sliceable].
    pub sliceable: bool,
    /// See [Controllable].
    pub controllable: bool,
    /// See [FilamentMutable].
    pub filament_mutable: bool,
}

impl Capabilities {
    /// Whether `capability` is present.
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Printable => self.printable,
            Capability::Sliceable => self.sliceable,
            Capability::Controllable => self.controllable,
            Capability::FilamentMutable => self.filament_mutable,
        }
    }
}

/// A point-in-time view of one machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MachineSnapshot {
    /// See [Machine::identifier].
    pub identifier: String,
    /// See [Machine::brand].
    pub brand: String,
    /// See [Machine::model].
    pub model: String,
    /// See [Machine::technology].
    pub technology: MachineTechnology,
    /// See [Machine::volume].
    pub volume: Volume,
    /// See [Machine::capabilities].
    pub capabilities: Capabilities,
    /// What the machine is doing.
    pub status: MachineState,
    /// Job progress in percent.
    pub progress: Option<i64>,
    /// Remaining job time in minutes.
    pub time_remaining: Option<i64>,
    /// The current or last job.
    pub filename: Option<String>,
    /// Why the last job failed.
    pub fail_reason: Option<String>,
    /// When telemetry was last received.
    pub last_updated: Option<DateTime<Utc>>,
    /// See [Machine::is_healthy].
    pub healthy: bool,
    /// What is loaded where.
    pub filaments: Vec<LoadedFilament>,
}
