//! Report documents pushed by the device on `device/{serial}/report`.
//!
//! Reports are partial: a device pushes only what changed since the last
//! tick, and a full document only in answer to a `pushall`. Every field is
//! therefore optional, and each section of the `print` object is decoded on
//! its own so a malformed AMS block does not hide a valid state change.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One inbound telemetry document.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    print: Option<Value>,
}

impl From<Value> for Report {
    fn from(mut value: Value) -> Self {
        let print = value.get_mut("print").map(Value::take).filter(Value::is_object);
        Self { print }
    }
}

impl Report {
    /// The raw `print` section, if this report carries one.
    pub fn print(&self) -> Option<&Value> {
        self.print.as_ref()
    }

    /// Decode the job/state fields of the `print` section.
    pub fn state(&self) -> Option<serde_json::Result<PrintState>> {
        self.print.as_ref().map(PrintState::deserialize)
    }

    /// Decode the `print.ams` block, if present.
    pub fn ams(&self) -> Option<serde_json::Result<PrintAms>> {
        self.section("ams").map(PrintAms::deserialize)
    }

    /// Decode the `print.vt_tray` block (the external spool holder), if
    /// present.
    pub fn external_spool(&self) -> Option<serde_json::Result<PrintTray>> {
        self.section("vt_tray").map(PrintTray::deserialize)
    }

    fn section(&self, key: &str) -> Option<&Value> {
        self.print.as_ref().and_then(|print| print.get(key))
    }
}

/// Job and machine state fields of the `print` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PrintState {
    /// The coarse state: `IDLE`, `RUNNING`, `PAUSE`, `FINISH`, `FAILED`, ...
    pub gcode_state: Option<String>,
    /// The current stage of a running job.
    pub stg_cur: Option<i64>,
    /// Job progress in percent.
    pub mc_percent: Option<i64>,
    /// Remaining job time in minutes.
    pub mc_remaining_time: Option<i64>,
    /// The job name.
    pub subtask_name: Option<String>,
    /// Whether removable storage is inserted.
    pub sdcard: Option<bool>,
    /// The failure code of the last job; `"0"` when nothing failed.
    #[serde(default, deserialize_with = "string_or_number")]
    pub fail_reason: Option<String>,
}

/// The outer `print.ams` object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PrintAms {
    /// The AMS units; nested one level below the object of the same name.
    pub ams: Option<Vec<PrintAmsData>>,
}

/// One AMS unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PrintAmsData {
    /// The unit index, as a string.
    pub id: String,
    /// The trays of the unit in slot order.
    #[serde(default)]
    pub tray: Vec<PrintTray>,
}

/// A filament tray, in an AMS unit or on the external holder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PrintTray {
    /// The tray index, as a string.
    pub id: Option<String>,
    /// The material loaded, empty when nothing is loaded.
    pub tray_type: Option<String>,
    /// The color loaded, as `RRGGBBAA` hex.
    pub tray_color: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected a string or number, found {}",
                other
            )))
        }
        None => None,
    })
}
