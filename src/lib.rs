#![allow(refining_impl_trait)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

//! This crate keeps a farm of 3D printers from several vendors in one
//! registry: it tracks their live state from cloud and LAN telemetry,
//! knows what filament each one holds, and dispatches print jobs to an idle
//! machine that can take them.

mod any_machine;
#[cfg(feature = "bambu")]
pub mod bambu;
pub mod config;
#[cfg(feature = "elegoo")]
pub mod elegoo;
mod error;
mod file;
mod filament;
pub mod fleet;
pub mod noop;
pub mod slicer;
mod state;
mod traits;

pub use any_machine::AnyMachine;
pub use config::Config;
pub use error::{Error, ErrorKind, ErrorPayload, OperationError, Result, ValidationError};
pub use file::TemporaryFile;
pub use filament::{Filament, FilamentLocation, LoadedFilament};
pub use fleet::{Dispatched, Fleet};
pub use state::{LiveState, MachineState, MachineTechnology, DEFAULT_HEALTH_TIMEOUT};
pub use traits::{
    Capabilities, Capability, Controllable, FilamentMutable, Machine, MachineSnapshot, Printable, Sliceable,
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Set of three values to represent the extent of a 3-D Volume. This contains
/// the width, depth, and height values, generally used to represent some
/// maximum or minimum.
///
/// All measurements are in millimeters.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Volume {
    /// Width of the volume ("left and right"), in millimeters.
    pub width: f64,

    /// Depth of the volume ("front to back"), in millimeters.
    pub depth: f64,

    /// Height of the volume ("up and down"), in millimeters.
    pub height: f64,
}
