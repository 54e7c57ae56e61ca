//! The commands that can be published to `device/{serial}/request`.

use serde::{Deserialize, Serialize};

use crate::sequence_id::SequenceId;

/// The entry inside a sliced 3MF archive that the device prints from.
pub const PLATE_GCODE: &str = "Metadata/plate_1.gcode";

/// The commands that can be sent to the printer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// A print command.
    Print(Print),
    /// A pushing command.
    Pushing(Pushing),
}

impl Command {
    /// Get the sequence ID.
    pub fn sequence_id(&self) -> &SequenceId {
        match self {
            Command::Print(print) => print.sequence_id(),
            Command::Pushing(pushing) => pushing.sequence_id(),
        }
    }

    /// Return a command asking the device to push its complete state.
    pub fn push_all() -> Self {
        Command::Pushing(Pushing::Pushall(Pushall {
            sequence_id: SequenceId::new(),
        }))
    }

    /// Return a command to pause the current print.
    pub fn pause() -> Self {
        Command::Print(Print::Pause(Pause {
            sequence_id: SequenceId::new(),
        }))
    }

    /// Return a command to resume the current print.
    pub fn resume() -> Self {
        Command::Print(Print::Resume(Resume {
            sequence_id: SequenceId::new(),
        }))
    }

    /// Return a command to stop the current print.
    pub fn stop() -> Self {
        Command::Print(Print::Stop(Stop {
            sequence_id: SequenceId::new(),
        }))
    }

    /// Return a command to start printing an archive previously uploaded
    /// to the device's removable storage.
    ///
    /// `ams_mapping` is the device's own tray index, not the global slot
    /// used for filament lookups; callers compute it with the tray stride
    /// the firmware expects.
    pub fn project_file(file_name: &str, use_ams: bool, ams_mapping: i32, calibration: Calibration) -> Self {
        Command::Print(Print::ProjectFile(ProjectFile {
            sequence_id: SequenceId::new(),
            param: PLATE_GCODE.to_string(),
            subtask_name: file_name.to_string(),
            url: format!("ftp://{}", file_name),
            timelapse: false,
            bed_leveling: calibration.bed_leveling,
            flow_cali: calibration.flow,
            vibration_cali: calibration.vibration,
            layer_inspect: calibration.layer_inspection,
            use_ams,
            ams_mapping: vec![ams_mapping],
        }))
    }
}

/// Which calibration passes the device runs before a print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    /// Probe the bed before printing.
    pub bed_leveling: bool,
    /// Run flow dynamics calibration.
    pub flow: bool,
    /// Run vibration compensation.
    pub vibration: bool,
    /// Inspect the first layer.
    pub layer_inspection: bool,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            bed_leveling: true,
            flow: true,
            vibration: true,
            layer_inspection: true,
        }
    }
}

/// A print command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "command")]
pub enum Print {
    /// Pause the current print.
    Pause(Pause),
    /// Resume the current print.
    Resume(Resume),
    /// Stop the current print.
    Stop(Stop),
    /// Print an uploaded project archive.
    ProjectFile(ProjectFile),
}

impl Print {
    /// Get the sequence ID.
    pub fn sequence_id(&self) -> &SequenceId {
        match self {
            Print::Pause(Pause { sequence_id }) => sequence_id,
            Print::Resume(Resume { sequence_id }) => sequence_id,
            Print::Stop(Stop { sequence_id }) => sequence_id,
            Print::ProjectFile(ProjectFile { sequence_id, .. }) => sequence_id,
        }
    }
}

/// A pushing command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "command")]
pub enum Pushing {
    /// Get all device information.
    Pushall(Pushall),
}

impl Pushing {
    /// Get the sequence ID.
    pub fn sequence_id(&self) -> &SequenceId {
        match self {
            Pushing::Pushall(Pushall { sequence_id }) => sequence_id,
        }
    }
}

/// The payload for pausing the current print.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pause {
    /// The sequence ID.
    pub sequence_id: SequenceId,
}

/// The payload for resuming the current print.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resume {
    /// The sequence ID.
    pub sequence_id: SequenceId,
}

/// The payload for stopping the current print.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stop {
    /// The sequence ID.
    pub sequence_id: SequenceId,
}

/// The payload for requesting a full state push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pushall {
    /// The sequence ID.
    pub sequence_id: SequenceId,
}

/// The payload for starting a print from an uploaded archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectFile {
    /// The sequence ID.
    pub sequence_id: SequenceId,
    /// The gcode entry inside the archive.
    pub param: String,
    /// The job name shown on the device.
    pub subtask_name: String,
    /// Where the device finds the archive.
    pub url: String,
    /// Record a timelapse.
    pub timelapse: bool,
    /// Level the bed first.
    pub bed_leveling: bool,
    /// Calibrate flow first.
    pub flow_cali: bool,
    /// Calibrate vibration first.
    pub vibration_cali: bool,
    /// Inspect the first layer.
    pub layer_inspect: bool,
    /// Feed from the AMS instead of the external spool.
    pub use_ams: bool,
    /// Device tray index per filament used by the job.
    pub ams_mapping: Vec<i32>,
}
