//! `noop` implements a no-op Slicer, one that produces an empty job and
//! predicts nothing.

use std::path::Path;

use anyhow::Result;

use super::{SlicedMetadata, SlicingOptions};
use crate::TemporaryFile;

/// Noop-slicer won't slice anything at all!
#[derive(Copy, Clone, Debug, Default)]
pub struct Slicer {}

impl Slicer {
    /// Create a new No-op Slicer. It won't do anything.
    pub fn new() -> Self {
        Self {}
    }
}

impl super::Slicer for Slicer {
    async fn slice(&self, printer_model: &str, _model: &Path, _options: &SlicingOptions) -> Result<TemporaryFile> {
        tracing::debug!(printer_model, "noop slicer producing an empty job");
        TemporaryFile::create("3mf", b"").await
    }

    async fn read_metadata(&self, _sliced: &Path) -> Result<SlicedMetadata> {
        Ok(SlicedMetadata::default())
    }
}
