//! `noop` implements a no-op Machine, one that will accept every command and
//! do nothing more than update its own state.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    slicer::{AnySlicer, SlicedMetadata, Slicer as _, SlicingOptions},
    state::StateCell,
    Capabilities, Controllable, Filament, FilamentLocation, FilamentMutable, LiveState, Machine, MachineState,
    MachineTechnology, OperationError, Printable, Result, Sliceable, TemporaryFile, Volume,
};

/// The brand and model reported by every no-op machine.
pub const BRAND: &str = "noop";

/// The configuration for a no-op machine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// A unique name for the machine.
    pub nickname: String,

    /// The technology the machine pretends to use.
    pub technology: MachineTechnology,

    /// The filament loaded on the external spool holder.
    #[serde(default)]
    pub filament: Option<Filament>,

    /// The build volume; 256mm on every side if unset.
    #[serde(default)]
    pub volume: Option<Volume>,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct NoopState {
    live: LiveState,
    filaments: BTreeMap<FilamentLocation, Filament>,
}

/// Noop-machine will no-op, well, everything.
#[derive(Clone)]
pub struct Noop {
    identifier: String,
    technology: MachineTechnology,
    volume: Volume,
    slicer: AnySlicer,
    state: StateCell<NoopState>,
    printed: Arc<Mutex<Vec<String>>>,
}

impl Noop {
    /// Return a new no-op Machine, idle and freshly updated.
    pub fn new(config: &Config, slicer: AnySlicer) -> Self {
        let mut filaments = BTreeMap::new();
        if let Some(filament) = &config.filament {
            filaments.insert(FilamentLocation::external(), filament.clone());
        }

        Self {
            identifier: config.nickname.clone(),
            technology: config.technology,
            volume: config.volume.unwrap_or(Volume {
                width: 256.0,
                depth: 256.0,
                height: 256.0,
            }),
            slicer,
            state: StateCell::new(NoopState {
                live: LiveState {
                    status: MachineState::Idle,
                    last_updated: Some(Utc::now()),
                    ..Default::default()
                },
                filaments,
            }),
            printed: Default::default(),
        }
    }

    /// Job names accepted by [Printable::print], oldest first.
    pub async fn printed(&self) -> Vec<String> {
        self.printed.lock().await.clone()
    }

    /// Load `filament` at `location`.
    pub fn load(&self, location: FilamentLocation, filament: Filament) {
        self.state.modify(|state| state.filaments.insert(location, filament.clone()).as_ref() != Some(&filament));
    }

    /// Overwrite the live state.
    pub fn set_state(&self, live: LiveState) {
        self.state.modify(|state| {
            let changed = state.live != live;
            state.live = live;
            changed
        });
    }

    fn transition(&self, operation: &'static str, allowed: &[MachineState], to: MachineState) -> Result<()> {
        let mut refused = None;
        self.state.modify(|state| {
            let previous = state.live.status;
            if !allowed.contains(&previous) {
                refused = Some(previous);
                return false;
            }
            state.live.status = to;
            state.live.settle(previous);
            previous != to
        });

        match refused {
            Some(state) => Err(OperationError::InvalidState {
                identifier: self.identifier.clone(),
                state,
                operation,
            }
            .into()),
            None => Ok(()),
        }
    }
}

impl Machine for Noop {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn brand(&self) -> &str {
        BRAND
    }

    fn model(&self) -> &str {
        BRAND
    }

    fn technology(&self) -> MachineTechnology {
        self.technology
    }

    fn volume(&self) -> Volume {
        self.volume
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            printable: true,
            sliceable: true,
            controllable: true,
            filament_mutable: true,
        }
    }

    fn state(&self) -> LiveState {
        self.state.with(|state| state.live.clone())
    }

    fn filaments(&self) -> BTreeMap<FilamentLocation, Filament> {
        self.state.with(|state| state.filaments.clone())
    }

    async fn update(&self) -> Result<()> {
        self.state.modify(|state| {
            state.live.last_updated = Some(Utc::now());
            false
        });
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

        match refused {
            Some(state) => Err(OperationError::InvalidState {
                identifier: self.identifier.clone(),
                state,
                operation: "clearing the bed",
            }
            .into()),
            None => Ok(()),
        }
    }
}

impl Printable for Noop {
    async fn print(&self, _sliced: &Path, file_name: &str, location: FilamentLocation) -> Result<()> {
        self.transition("printing", &[MachineState::Idle], MachineState::Printing)?;
        self.state.modify(|state| {
            state.live.filename = Some(file_name.to_string());
            state.live.progress = Some(0);
            true
        });
        tracing::info!(identifier = %self.identifier, file_name, %location, "pretending to print");
        self.printed.lock().await.push(file_name.to_string());
        Ok(())
    }
}

impl Sliceable for Noop {
    async fn slice(&self, model: &Path, _file_name: &str, options: &SlicingOptions) -> Result<TemporaryFile> {
        self.slicer
            .slice(BRAND, model, options)
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

impl Controllable for Noop {
    async fn pause(&self) -> Result<()> {
        self.transition("pausing", &[MachineState::Printing], MachineState::Paused)
    }

    async fn resume(&self) -> Result<()> {
        self.transition("resuming", &[MachineState::Paused], MachineState::Printing)
    }

    async fn stop(&self) -> Result<()> {
        self.transition(
            "stopping",
            &[MachineState::Printing, MachineState::Paused, MachineState::Preparing],
            MachineState::Idle,
        )
    }
}

impl FilamentMutable for Noop {
    fn set_filament(&self, filament: Option<Filament>) -> Result<()> {
        self.state.modify(|state| match filament {
            Some(filament) => state.filaments.insert(FilamentLocation::external(), filament.clone()) != Some(filament),
            None => state.filaments.remove(&FilamentLocation::external()).is_some(),
        });
        Ok(())
    }
}
