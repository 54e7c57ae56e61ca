//! What a caller asks of a slicer.

// The JsonSchema derive on the internally tagged enum expands to qualified
// paths that this lint rejects.
#![allow(unused_qualifications)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How to slice a model, per technology.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "technology")]
pub enum SlicingOptions {
    /// Filament printers.
    #[serde(rename = "FDM")]
    Fdm(FdmOptions),
    /// Resin printers. Recognized, but nothing slices for them yet.
    #[serde(rename = "SLA")]
    Sla,
}

/// Options for an FDM job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FdmOptions {
    /// The material to load the filament profile for, e.g. `PLA`.
    pub material: String,
    /// How many copies of the model to place on the plate.
    #[serde(default = "one")]
    pub quantity: u32,
    /// Layer height in millimeters.
    pub layer_height: f64,
    /// Override the number of walls.
    #[serde(default)]
    pub wall_loops: Option<u32>,
    /// Override whether supports are generated.
    #[serde(default)]
    pub use_supports: Option<bool>,
    /// Override the support style, e.g. `tree(auto)`.
    #[serde(default)]
    pub support_style: Option<String>,
}

fn one() -> u32 {
    1
}
