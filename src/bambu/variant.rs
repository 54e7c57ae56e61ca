use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};

use crate::{ValidationError, Volume};

/// Specific make/model of Bambu device.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, Display, FromStr, PartialEq, Eq)]
pub enum BambuModel {
    /// Bambu Labs A1 printer.
    A1,
    /// Bambu Labs A1 mini printer.
    #[serde(rename = "A1M")]
    #[display("A1M")]
    A1Mini,
    /// Bambu Labs P1P printer.
    P1P,
    /// Bambu Labs P1S printer.
    P1S,
    /// Bambu Labs X1 printer.
    X1,
    /// Bambu Labs X1E printer.
    X1E,
    /// Bambu Labs X1 Carbon printer.
    #[serde(rename = "X1C")]
    #[display("X1C")]
    X1Carbon,
}

impl BambuModel {
    /// Get the model from the serial number.
    /// This comes from: https://wiki.bambulab.com/en/general/find-sn
    pub fn from_serial(serial: &str) -> Result<Self, ValidationError> {
        let prefix = serial.get(..3).unwrap_or(serial);
        match prefix {
            "039" => Ok(Self::A1),
            "030" => Ok(Self::A1Mini),
            "01S" => Ok(Self::P1P),
            "01P" => Ok(Self::P1S),
            "03W" => Ok(Self::X1E),
            "00W" => Ok(Self::X1),
            "00M" => Ok(Self::X1Carbon),
            _ => Err(ValidationError::UnknownSerialPrefix {
                serial: serial.to_string(),
                prefix: prefix.to_string(),
            }),
        }
    }

    /// The model name the slicer profiles are keyed by.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A1Mini => "A1M",
            Self::P1P => "P1P",
            Self::P1S => "P1S",
            Self::X1 => "X1",
            Self::X1E => "X1E",
            Self::X1Carbon => "X1C",
        }
    }

    /// The build volume.
    pub fn volume(&self) -> Volume {
        let side = match self {
            Self::A1Mini => 180.0,
            _ => 256.0,
        };
        Volume {
            width: side,
            depth: side,
            height: side,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_from_serial() {
        let cases = [
            ("00M09A350100123", BambuModel::X1Carbon),
            ("00W00A000000000", BambuModel::X1),
            ("03W00A000000000", BambuModel::X1E),
            ("01S00C000000000", BambuModel::P1P),
            ("01P00A000000000", BambuModel::P1S),
            ("0309DA000000000", BambuModel::A1Mini),
            ("039000000000000", BambuModel::A1),
        ];
        for (serial, model) in cases {
            assert_eq!(BambuModel::from_serial(serial).unwrap(), model);
            assert_eq!(model.to_string(), model.as_str());
        }
    }

    #[test]
    fn test_unknown_prefix() {
        assert_eq!(
            BambuModel::from_serial("ZZZ123"),
            Err(ValidationError::UnknownSerialPrefix {
                serial: "ZZZ123".to_string(),
                prefix: "ZZZ".to_string(),
            })
        );
        assert!(BambuModel::from_serial("00").is_err());
    }

    #[test]
    fn test_volume() {
        assert_eq!(BambuModel::A1Mini.volume().width, 180.0);
        assert_eq!(BambuModel::X1Carbon.volume().height, 256.0);
    }
}
