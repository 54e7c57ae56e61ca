//! Folding report ticks into the state of one cloud printer.

use std::collections::BTreeMap;

use bambulabs::message::{PrintAms, PrintState, PrintTray, Report};
use chrono::{DateTime, Utc};

use crate::{Filament, FilamentLocation, LiveState, MachineState};

/// Everything known about one cloud printer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BambuState {
    /// The state every machine reports.
    pub live: LiveState,
    /// Whether removable storage is inserted.
    pub sdcard: bool,
    /// AMS unit index to its trays, in slot order. Empty or unreadable
    /// trays are `None`.
    pub ams: BTreeMap<u8, Vec<Option<Filament>>>,
    /// The spool on the external holder.
    pub external: Option<Filament>,
}

impl BambuState {
    /// Apply one report. Each section is decoded on its own; one that fails
    /// to parse is logged and skipped while the others still apply.
    ///
    /// Returns whether anything besides the timestamp changed.
    pub fn apply_report(&mut self, serial: &str, report: &Report, now: DateTime<Utc>) -> bool {
        if report.print().is_none() {
            return false;
        }

        let before = self.clone();
        self.live.last_updated = Some(now);

        match report.state() {
            Some(Ok(state)) => self.apply_state(serial, &state),
            Some(Err(err)) => tracing::warn!(serial, error = %err, "failed to parse print state"),
            None => {}
        }

        match report.ams() {
            Some(Ok(ams)) => self.apply_ams(serial, ams),
            Some(Err(err)) => tracing::warn!(serial, error = %err, "failed to parse ams"),
            None => {}
        }

        match report.external_spool() {
            Some(Ok(tray)) => self.external = tray_filament(&tray),
            Some(Err(err)) => tracing::warn!(serial, error = %err, "failed to parse external spool"),
            None => {}
        }

        let mut compare = before;
        compare.live.last_updated = self.live.last_updated;
        *self != compare
    }

    fn apply_state(&mut self, serial: &str, state: &PrintState) {
        let previous = self.live.status;
        let mut status = match state.gcode_state.as_deref() {
            Some(gcode_state) => coarse_status(gcode_state),
            None => previous,
        };
        // A partial tick repeating RUNNING does not end the preparing phase.
        if status == MachineState::Printing && previous == MachineState::Preparing {
            status = MachineState::Preparing;
        }

        if matches!(status, MachineState::Printing | MachineState::Preparing) {
            match state.stg_cur {
                None | Some(-1) | Some(255) => {}
                Some(0) => status = MachineState::Printing,
                Some(_) => status = MachineState::Preparing,
            }
        }

        self.live.status = status;
        self.live.settle(previous);

        if status.is_active_job() {
            if let Some(progress) = state.mc_percent {
                self.live.progress = Some(progress);
            }
            if let Some(remaining) = state.mc_remaining_time {
                self.live.time_remaining = Some(remaining);
            }
        }
        if let Some(name) = state.subtask_name.as_deref().map(str::trim) {
            if !name.is_empty() && self.live.filename.as_deref() != Some(name) {
                self.live.filename = Some(name.to_string());
            }
        }

        if status == MachineState::Error {
            if let Some(reason) = state.fail_reason.as_deref() {
                if reason != "0" {
                    self.live.fail_reason = Some(reason.to_string());
                }
            }
        }

        if let Some(sdcard) = state.sdcard {
            self.sdcard = sdcard;
        }

        if status != previous {
            tracing::info!(serial, from = %previous, to = %status, "state changed");
        }
    }

    fn apply_ams(&mut self, serial: &str, ams: PrintAms) {
        let Some(units) = ams.ams else {
            return;
        };

        // Units missing from a tick keep what they last reported.
        for unit in units {
            let Ok(index) = unit.id.trim().parse::<u8>() else {
                tracing::warn!(serial, id = %unit.id, "skipping ams unit with invalid id");
                continue;
            };
            self.ams.insert(index, unit.tray.iter().map(tray_filament).collect());
        }
    }

    /// The loaded filaments: the AMS slots if any hold something, otherwise
    /// the external spool.
    pub fn loaded_filaments(&self) -> BTreeMap<FilamentLocation, Filament> {
        let mut loaded = BTreeMap::new();
        for (ams, trays) in &self.ams {
            for (slot, filament) in trays.iter().enumerate() {
                let (Ok(slot), Some(filament)) = (u8::try_from(slot), filament) else {
                    continue;
                };
                loaded.insert(FilamentLocation::in_ams(*ams, slot), filament.clone());
            }
        }

        if loaded.is_empty() {
            if let Some(external) = &self.external {
                loaded.insert(FilamentLocation::external(), external.clone());
            }
        }
        loaded
    }
}

fn coarse_status(gcode_state: &str) -> MachineState {
    match gcode_state.to_ascii_lowercase().as_str() {
        "idle" => MachineState::Idle,
        "running" => MachineState::Printing,
        "pause" => MachineState::Paused,
        "finish" => MachineState::Printed,
        "failed" => MachineState::Error,
        _ => MachineState::Unknown,
    }
}

fn tray_filament(tray: &PrintTray) -> Option<Filament> {
    let material = tray.tray_type.as_deref()?;
    let color = tray.tray_color.as_deref()?;
    Filament::new(material, color).ok()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn report(value: serde_json::Value) -> Report {
        Report::from(value)
    }

    fn red() -> Filament {
        Filament::new("PLA", "FF0000").unwrap()
    }

    #[test]
    fn test_coarse_status() {
        assert_eq!(coarse_status("IDLE"), MachineState::Idle);
        assert_eq!(coarse_status("RUNNING"), MachineState::Printing);
        assert_eq!(coarse_status("PAUSE"), MachineState::Paused);
        assert_eq!(coarse_status("FINISH"), MachineState::Printed);
        assert_eq!(coarse_status("FAILED"), MachineState::Error);
        assert_eq!(coarse_status("PREPARE"), MachineState::Unknown);
    }

    #[test]
    fn test_report_without_print_section_is_ignored() {
        let mut state = BambuState::default();
        assert!(!state.apply_report("s", &report(json!({"info": {}})), Utc::now()));
        assert_eq!(state, BambuState::default());
    }

    #[test]
    fn test_stage_refines_printing() {
        let now = Utc::now();
        let mut state = BambuState::default();

        state.apply_report(
            "s",
            &report(json!({"print": {"gcode_state": "RUNNING", "stg_cur": 2, "mc_percent": 0}})),
            now,
        );
        assert_eq!(state.live.status, MachineState::Preparing);

        state.apply_report("s", &report(json!({"print": {"gcode_state": "RUNNING"}})), now);
        assert_eq!(state.live.status, MachineState::Preparing);

        state.apply_report("s", &report(json!({"print": {"stg_cur": 255}})), now);
        assert_eq!(state.live.status, MachineState::Preparing);

        state.apply_report(
            "s",
            &report(json!({"print": {"stg_cur": 0, "mc_percent": 12, "mc_remaining_time": 40, "subtask_name": "benchy"}})),
            now,
        );
        assert_eq!(state.live.status, MachineState::Printing);
        assert_eq!(state.live.progress, Some(12));
        assert_eq!(state.live.time_remaining, Some(40));
        assert_eq!(state.live.filename.as_deref(), Some("benchy"));
        assert_eq!(state.live.last_updated, Some(now));
    }

    #[test]
    fn test_stage_does_not_apply_outside_printing() {
        let mut state = BambuState::default();
        state.apply_report("s", &report(json!({"print": {"gcode_state": "IDLE", "stg_cur": 2}})), Utc::now());
        assert_eq!(state.live.status, MachineState::Idle);
    }

    #[test]
    fn test_finishing_clears_progress() {
        let now = Utc::now();
        let mut state = BambuState::default();
        state.apply_report(
            "s",
            &report(json!({"print": {"gcode_state": "RUNNING", "stg_cur": 0, "mc_percent": 99, "mc_remaining_time": 1}})),
            now,
        );
        state.apply_report(
            "s",
            &report(json!({"print": {"gcode_state": "FINISH", "mc_percent": 100, "mc_remaining_time": 0}})),
            now,
        );

        assert_eq!(state.live.status, MachineState::Printed);
        assert_eq!(state.live.progress, None);
        assert_eq!(state.live.time_remaining, None);
    }

    #[test]
    fn test_fail_reason() {
        let now = Utc::now();
        let mut state = BambuState::default();

        state.apply_report("s", &report(json!({"print": {"gcode_state": "IDLE", "fail_reason": "50348044"}})), now);
        assert_eq!(state.live.fail_reason, None);

        state.apply_report("s", &report(json!({"print": {"gcode_state": "FAILED", "fail_reason": "0"}})), now);
        assert_eq!(state.live.status, MachineState::Error);
        assert_eq!(state.live.fail_reason, None);

        state.apply_report("s", &report(json!({"print": {"fail_reason": 50348044}})), now);
        assert_eq!(state.live.fail_reason.as_deref(), Some("50348044"));

        state.apply_report("s", &report(json!({"print": {"gcode_state": "IDLE"}})), now);
        assert_eq!(state.live.fail_reason, None);
    }

    #[test]
    fn test_identical_tick_is_idempotent() {
        let now = Utc::now();
        let tick = report(json!({"print": {
            "gcode_state": "RUNNING",
            "stg_cur": 0,
            "mc_percent": 40,
            "sdcard": true,
            "ams": {"ams": [{"id": "0", "tray": [{"id": "0", "tray_type": "PLA", "tray_color": "FF0000FF"}]}]},
        }}));

        let mut state = BambuState::default();
        assert!(state.apply_report("s", &tick, now));
        let once = state.clone();
        assert!(!state.apply_report("s", &tick, now));
        assert_eq!(state, once);
    }

    #[test]
    fn test_sections_fail_independently() {
        let mut state = BambuState::default();
        state.apply_report(
            "s",
            &report(json!({"print": {
                "gcode_state": "IDLE",
                "ams": {"ams": "not a list"},
                "vt_tray": {"id": "254", "tray_type": "PETG", "tray_color": "00FF00FF"},
            }})),
            Utc::now(),
        );

        assert_eq!(state.live.status, MachineState::Idle);
        assert_eq!(state.external, Some(Filament::new("PETG", "00FF00").unwrap()));

        let mut broken_state = BambuState::default();
        broken_state.apply_report(
            "s",
            &report(json!({"print": {
                "gcode_state": 7,
                "ams": {"ams": [{"id": "0", "tray": [{"id": "0", "tray_type": "PLA", "tray_color": "FF0000FF"}]}]},
            }})),
            Utc::now(),
        );
        assert_eq!(broken_state.live.status, MachineState::Unknown);
        assert_eq!(broken_state.ams.get(&0), Some(&vec![Some(red())]));
    }

    #[test]
    fn test_ams_trays() {
        let mut state = BambuState::default();
        state.apply_report(
            "s",
            &report(json!({"print": {"ams": {"ams": [
                {"id": "0", "tray": [
                    {"id": "0", "tray_type": "PLA", "tray_color": "FF0000FF"},
                    {"id": "1"},
                    {"id": "2", "tray_type": "", "tray_color": "00000000"},
                    {"id": "3", "tray_type": "PETG", "tray_color": "0000FF"},
                ]},
                {"id": "1", "tray": []},
            ]}}})),
            Utc::now(),
        );

        assert_eq!(state.ams.get(&1), Some(&vec![]));
        let loaded = state.loaded_filaments();
        assert_eq!(
            loaded.into_iter().collect::<Vec<_>>(),
            vec![
                (FilamentLocation::in_ams(0, 0), red()),
                (FilamentLocation::in_ams(0, 3), Filament::new("PETG", "0000FF").unwrap()),
            ]
        );
    }

    #[test]
    fn test_partial_ams_tick_keeps_other_units() {
        let now = Utc::now();
        let mut state = BambuState::default();
        state.apply_report(
            "s",
            &report(json!({"print": {"ams": {"ams": [
                {"id": "0", "tray": [{"id": "0", "tray_type": "PLA", "tray_color": "FF0000FF"}]},
                {"id": "1", "tray": [{"id": "0", "tray_type": "ABS", "tray_color": "FFFFFFFF"}]},
            ]}}})),
            now,
        );
        state.apply_report(
            "s",
            &report(json!({"print": {"ams": {"ams": [
                {"id": "1", "tray": [{"id": "0", "tray_type": "PETG", "tray_color": "0000FFFF"}]},
            ]}}})),
            now,
        );

        assert_eq!(
            state.loaded_filaments().into_iter().collect::<Vec<_>>(),
            vec![
                (FilamentLocation::in_ams(0, 0), red()),
                (FilamentLocation::in_ams(1, 0), Filament::new("PETG", "0000FF").unwrap()),
            ]
        );
    }

    #[test]
    fn test_pausing_clears_progress_until_refilled() {
        let now = Utc::now();
        let mut state = BambuState::default();
        state.apply_report(
            "s",
            &report(json!({"print": {
                "gcode_state": "RUNNING",
                "stg_cur": 0,
                "mc_percent": 40,
                "mc_remaining_time": 20,
            }})),
            now,
        );
        state.apply_report("s", &report(json!({"print": {"gcode_state": "PAUSE"}})), now);
        assert_eq!(state.live.status, MachineState::Paused);
        assert_eq!(state.live.progress, None);
        assert_eq!(state.live.time_remaining, None);

        state.apply_report("s", &report(json!({"print": {"mc_percent": 41, "mc_remaining_time": 19}})), now);
        assert_eq!(state.live.progress, Some(41));
        assert_eq!(state.live.time_remaining, Some(19));
    }

    #[test]
    fn test_external_spool_only_when_ams_is_empty() {
        let mut state = BambuState {
            external: Some(red()),
            ..Default::default()
        };
        assert_eq!(
            state.loaded_filaments().into_keys().collect::<Vec<_>>(),
            vec![FilamentLocation::external()]
        );

        state.ams.insert(0, vec![Some(Filament::new("ABS", "FFFFFF").unwrap())]);
        assert_eq!(
            state.loaded_filaments().into_keys().collect::<Vec<_>>(),
            vec![FilamentLocation::in_ams(0, 0)]
        );
    }
}
