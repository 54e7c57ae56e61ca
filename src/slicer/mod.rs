//! This module contains backend implementations that take a model file and
//! produce a job for a specific make/model printer, given some options.

pub mod bambu_studio;
mod metadata;
pub mod noop;
mod options;

use std::{future::Future, path::Path};

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::TemporaryFile;

pub use metadata::{parse_duration, read_metadata};
pub use options::{FdmOptions, SlicingOptions};

/// What a slicer predicts for a job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SlicedMetadata {
    /// Estimated print duration in seconds.
    pub duration_seconds: u64,
    /// Estimated filament use in grams.
    pub weight_grams: f64,
}

/// A slicer turns a model into a job file for one printer model.
pub trait Slicer {
    /// Slice `model` for `printer_model` with `options`.
    fn slice(
        &self,
        printer_model: &str,
        model: &Path,
        options: &SlicingOptions,
    ) -> impl Future<Output = Result<TemporaryFile>> + Send;

    /// Read the prediction out of a job file this slicer produced.
    fn read_metadata(&self, sliced: &Path) -> impl Future<Output = Result<SlicedMetadata>> + Send;
}

/// AnySlicer is any supported slicer.
#[derive(Clone, Debug)]
pub enum AnySlicer {
    /// The Bambu Studio command line.
    BambuStudio(bambu_studio::Slicer),

    /// Slices nothing.
    Noop(noop::Slicer),
}

impl From<bambu_studio::Slicer> for AnySlicer {
    fn from(slicer: bambu_studio::Slicer) -> Self {
        Self::BambuStudio(slicer)
    }
}

impl From<noop::Slicer> for AnySlicer {
    fn from(slicer: noop::Slicer) -> Self {
        Self::Noop(slicer)
    }
}

impl Slicer for AnySlicer {
    async fn slice(&self, printer_model: &str, model: &Path, options: &SlicingOptions) -> Result<TemporaryFile> {
        match self {
            Self::BambuStudio(slicer) => slicer.slice(printer_model, model, options).await,
            Self::Noop(slicer) => slicer.slice(printer_model, model, options).await,
        }
    }

    async fn read_metadata(&self, sliced: &Path) -> Result<SlicedMetadata> {
        match self {
            Self::BambuStudio(slicer) => slicer.read_metadata(sliced).await,
            Self::Noop(slicer) => slicer.read_metadata(sliced).await,
        }
    }
}
