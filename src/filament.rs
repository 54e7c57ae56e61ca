//! Loaded material and the slot it sits in.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// A material and color, as loaded into a machine or requested for a job.
///
/// The color is always stored as 8 hex digits with the alpha byte forced to
/// `FF`. Comparison ignores ASCII case on both fields.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "RawFilament")]
pub struct Filament {
    material: String,
    color: String,
}

#[derive(Deserialize, JsonSchema)]
struct RawFilament {
    material: String,
    color: String,
}

impl TryFrom<RawFilament> for Filament {
    type Error = ValidationError;

    fn try_from(raw: RawFilament) -> Result<Self, Self::Error> {
        Filament::new(&raw.material, &raw.color)
    }
}

impl Filament {
    /// Build a filament, normalizing the color to `RRGGBBFF`.
    ///
    /// A 6 digit color is padded with `FF`. An 8 digit color keeps its
    /// first three bytes and has the alpha byte overwritten with `FF`.
    pub fn new(material: &str, color: &str) -> Result<Self, ValidationError> {
        let material = material.trim();
        if material.is_empty() {
            return Err(ValidationError::EmptyMaterial);
        }

        let color = color.trim();
        if color.is_empty() {
            return Err(ValidationError::EmptyColor);
        }
        if !color.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidColor(color.to_string()));
        }
        let color = match color.len() {
            6 => format!("{}FF", color),
            8 => format!("{}FF", &color[..6]),
            _ => return Err(ValidationError::InvalidColor(color.to_string())),
        };

        Ok(Self {
            material: material.to_string(),
            color,
        })
    }

    /// The material name, e.g. `PLA`.
    pub fn material(&self) -> &str {
        &self.material
    }

    /// The color as `RRGGBBFF`.
    pub fn color(&self) -> &str {
        &self.color
    }
}

impl PartialEq for Filament {
    fn eq(&self, other: &Self) -> bool {
        self.material.eq_ignore_ascii_case(&other.material) && self.color.eq_ignore_ascii_case(&other.color)
    }
}

impl Eq for Filament {}

impl Hash for Filament {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.material.to_ascii_lowercase().hash(state);
        self.color.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for Filament {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.material, self.color)
    }
}

/// Where a filament is loaded.
///
/// Two locations are equal when they address the same global slot, and
/// order by it, which puts [FilamentLocation::External] first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FilamentLocation {
    /// A slot in an AMS unit.
    Ams {
        /// The AMS unit index.
        ams: u8,
        /// The slot within the unit.
        slot: u8,
    },
    /// The external spool holder, or the only tank of a single-material
    /// machine.
    External,
}

impl FilamentLocation {
    /// Slots per AMS unit in global slot addressing.
    pub const SLOTS_PER_AMS: i32 = 4;

    /// A slot inside an AMS unit.
    pub fn in_ams(ams: u8, slot: u8) -> Self {
        Self::Ams { ams, slot }
    }

    /// The external location.
    pub fn external() -> Self {
        Self::External
    }

    /// Whether this is the external location.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External)
    }

    /// `ams * 4 + slot`, or `-1` for the external location.
    pub fn global_slot(&self) -> i32 {
        match *self {
            Self::Ams { ams, slot } => i32::from(ams) * Self::SLOTS_PER_AMS + i32::from(slot),
            Self::External => -1,
        }
    }

    /// The index a Bambu print command expects in `ams_mapping`:
    /// `ams * 3 + slot`, or `-1` for the external spool.
    ///
    /// This uses a stride of 3, unlike [FilamentLocation::global_slot],
    /// because that is what the device firmware accepts.
    pub fn ams_mapping_index(&self) -> i32 {
        match *self {
            Self::Ams { ams, slot } => i32::from(ams) * 3 + i32::from(slot),
            Self::External => -1,
        }
    }
}

impl PartialEq for FilamentLocation {
    fn eq(&self, other: &Self) -> bool {
        self.global_slot() == other.global_slot()
    }
}

impl Eq for FilamentLocation {}

impl PartialOrd for FilamentLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FilamentLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.global_slot().cmp(&other.global_slot())
    }
}

impl Hash for FilamentLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.global_slot().hash(state);
    }
}

impl fmt::Display for FilamentLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ams { ams, slot } => write!(f, "AMS {} slot {}", ams, slot),
            Self::External => write!(f, "external"),
        }
    }
}

/// A loaded filament as listed in a machine snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "location")]
pub enum LoadedFilament {
    /// Loaded in an AMS unit.
    #[serde(rename = "AMS")]
    Ams {
        /// The global slot.
        slot: i32,
        /// `RRGGBBFF`.
        color: String,
        /// The material name.
        material: String,
    },
    /// Loaded on the external holder.
    External {
        /// `RRGGBBFF`.
        color: String,
        /// The material name.
        material: String,
    },
}

impl LoadedFilament {
    /// Describe `filament` loaded at `location`.
    pub fn new(location: &FilamentLocation, filament: &Filament) -> Self {
        let color = filament.color().to_string();
        let material = filament.material().to_string();
        if location.is_external() {
            Self::External { color, material }
        } else {
            Self::Ams {
                slot: location.global_slot(),
                color,
                material,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;
    use testresult::TestResult;

    use super::*;

    #[test]
    fn test_six_digit_color_is_padded() -> TestResult {
        assert_eq!(Filament::new("PLA", "FF0000")?.color(), "FF0000FF");
        assert_eq!(Filament::new(" PETG ", " 00ff00 ")?.material(), "PETG");
        Ok(())
    }

    #[test]
    fn test_alpha_byte_is_overwritten() -> TestResult {
        assert_eq!(Filament::new("PLA", "112233AA")?.color(), "112233FF");
        Ok(())
    }

    #[test]
    fn test_invalid_filaments() {
        assert_eq!(Filament::new("  ", "FF0000"), Err(ValidationError::EmptyMaterial));
        assert_eq!(Filament::new("PLA", ""), Err(ValidationError::EmptyColor));
        assert_eq!(
            Filament::new("PLA", "FF00"),
            Err(ValidationError::InvalidColor("FF00".to_string()))
        );
        assert_eq!(
            Filament::new("PLA", "GG0000"),
            Err(ValidationError::InvalidColor("GG0000".to_string()))
        );
        assert_eq!(
            Filament::new("PLA", "#FF0000"),
            Err(ValidationError::InvalidColor("#FF0000".to_string()))
        );
    }

    #[test]
    fn test_equality_ignores_case() -> TestResult {
        assert_eq!(Filament::new("pla", "ff0000")?, Filament::new("PLA", "FF0000FF")?);
        assert_ne!(Filament::new("PLA", "FF0000")?, Filament::new("PETG", "FF0000")?);
        Ok(())
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Filament = serde_json::from_str(r#"{"material": "PLA", "color": "00AAFF"}"#).unwrap();
        assert_eq!(ok.color(), "00AAFFFF");

        assert!(serde_json::from_str::<Filament>(r#"{"material": "", "color": "00AAFF"}"#).is_err());
    }

    #[test]
    fn test_global_slot() {
        assert_eq!(FilamentLocation::in_ams(1, 2).global_slot(), 6);
        assert_eq!(FilamentLocation::in_ams(0, 0).global_slot(), 0);
        assert_eq!(FilamentLocation::external().global_slot(), -1);
        assert!(FilamentLocation::external().is_external());
        assert!(!FilamentLocation::in_ams(0, 0).is_external());
    }

    // The command index and the global slot disagree on purpose, the
    // firmware takes a stride of 3.
    #[test]
    fn test_ams_mapping_index_uses_stride_three() {
        let location = FilamentLocation::in_ams(1, 2);
        assert_eq!(location.ams_mapping_index(), 5);
        assert_ne!(location.ams_mapping_index(), location.global_slot());
        assert_eq!(FilamentLocation::external().ams_mapping_index(), -1);
    }

    #[test]
    fn test_locations_order_by_global_slot() {
        let mut map = BTreeMap::new();
        map.insert(FilamentLocation::in_ams(1, 0), "b");
        map.insert(FilamentLocation::in_ams(0, 3), "a");
        map.insert(FilamentLocation::external(), "e");

        assert_eq!(map.values().copied().collect::<Vec<_>>(), vec!["e", "a", "b"]);
    }

    #[test]
    fn test_loaded_filament_json() -> TestResult {
        let red = Filament::new("PLA", "FF0000")?;
        assert_eq!(
            serde_json::to_value(LoadedFilament::new(&FilamentLocation::in_ams(1, 1), &red))?,
            serde_json::json!({"location": "AMS", "slot": 5, "color": "FF0000FF", "material": "PLA"})
        );
        assert_eq!(
            serde_json::to_value(LoadedFilament::new(&FilamentLocation::external(), &red))?,
            serde_json::json!({"location": "External", "color": "FF0000FF", "material": "PLA"})
        );
        Ok(())
    }
}
