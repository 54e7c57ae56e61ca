//! Support for the Bambu Studio command line slicer.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::process::Command;

use super::{FdmOptions, SlicedMetadata, SlicingOptions};
use crate::TemporaryFile;

/// How long a slice may run before it is killed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const BED_TYPE: &str = "Textured PEI Plate";

/// Handle to invoke Bambu Studio with the profiles for each printer model.
///
/// Profiles are looked up as `{profiles}/{model}/machine.json`,
/// `{profiles}/{model}/process.json` and
/// `{profiles}/{model}/filament_{MATERIAL}.json`, already fully resolved.
#[derive(Clone, Debug)]
pub struct Slicer {
    executable: PathBuf,
    profiles: PathBuf,
    timeout: Duration,
}

impl Slicer {
    /// Create a new [Slicer], which will invoke `executable` with the
    /// profiles found under `profiles`.
    pub fn new(executable: PathBuf, profiles: PathBuf) -> Self {
        Self {
            executable,
            profiles,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override how long a slice may run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn profile_dir(&self, printer_model: &str) -> Result<PathBuf> {
        let dir = self.profiles.join(printer_model);
        if !dir.is_dir() {
            anyhow::bail!(
                "Invalid slicer profile path: {}, must be a directory",
                dir.display()
            );
        }
        Ok(dir)
    }

    async fn slice_fdm(&self, printer_model: &str, model: &Path, options: &FdmOptions) -> Result<TemporaryFile> {
        let dir = self.profile_dir(printer_model)?;
        let machine = dir.join("machine.json");
        let filament = dir.join(format!("filament_{}.json", options.material.to_uppercase()));
        if !filament.exists() {
            anyhow::bail!("no {} filament profile for {}", options.material, printer_model);
        }

        let process = tokio::fs::read(dir.join("process.json"))
            .await
            .with_context(|| format!("failed to read process profile for {}", printer_model))?;
        let mut process: Map<String, Value> = serde_json::from_slice(&process)?;
        apply_overrides(&mut process, options);
        let process = TemporaryFile::create("json", serde_json::to_vec(&process)?).await?;

        let output = TemporaryFile::reserve("3mf");
        let args = arguments(output.path(), process.path(), &machine, &filament, model, options.quantity)?;

        tracing::debug!(executable = %self.executable.display(), ?args, "running slicer");
        let mut command = Command::new(&self.executable);
        command.args(&args).kill_on_drop(true);
        // On timeout the output future is dropped, which kills the process.
        let output_status = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| anyhow::anyhow!("slicing did not finish within {:?}", self.timeout))?
            .context("Failed to execute bambu-studio command")?;

        if !output_status.status.success() {
            tracing::warn!(status = %output_status.status, "bambu-studio exited unsuccessfully");
        }

        // Make sure the archive was created.
        if !output.path().exists() {
            let stdout = String::from_utf8_lossy(&output_status.stdout);
            let stderr = String::from_utf8_lossy(&output_status.stderr);
            anyhow::bail!("Slicing produced no output\nstdout:\n{}stderr:{}", stdout, stderr);
        }

        Ok(output)
    }
}

impl super::Slicer for Slicer {
    async fn slice(&self, printer_model: &str, model: &Path, options: &SlicingOptions) -> Result<TemporaryFile> {
        match options {
            SlicingOptions::Fdm(options) => self.slice_fdm(printer_model, model, options).await,
            SlicingOptions::Sla => anyhow::bail!("Bambu Studio cannot slice for SLA printers"),
        }
    }

    async fn read_metadata(&self, sliced: &Path) -> Result<SlicedMetadata> {
        super::read_metadata(sliced).await
    }
}

fn path_arg(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid path: {}", path.display()))
}

fn arguments(
    output: &Path,
    process: &Path,
    machine: &Path,
    filament: &Path,
    model: &Path,
    quantity: u32,
) -> Result<Vec<String>> {
    let mut args: Vec<String> = vec![
        "--slice".to_string(),
        "0".to_string(),
        "--export-3mf".to_string(),
        path_arg(output)?,
        "--curr-bed-type".to_string(),
        BED_TYPE.to_string(),
        "--load-settings".to_string(),
        [path_arg(process)?, path_arg(machine)?].join(";"),
        "--load-filaments".to_string(),
        path_arg(filament)?,
    ];

    let model = path_arg(model)?;
    args.extend(std::iter::repeat(model).take(quantity.max(1) as usize));
    Ok(args)
}

/// Write the per-job overrides into a process profile. Bambu Studio keeps
/// booleans as `"0"`/`"1"` and numbers as strings.
fn apply_overrides(process: &mut Map<String, Value>, options: &FdmOptions) {
    process.insert("layer_height".to_string(), Value::String(options.layer_height.to_string()));
    if let Some(wall_loops) = options.wall_loops {
        process.insert("wall_loops".to_string(), Value::String(wall_loops.to_string()));
    }
    if let Some(use_supports) = options.use_supports {
        let flag = if use_supports { "1" } else { "0" };
        process.insert("enable_support".to_string(), Value::String(flag.to_string()));
    }
    if let Some(style) = &options.support_style {
        process.insert("support_type".to_string(), Value::String(style.clone()));
    }
}
