//! The error taxonomy shared by every device kind and the fleet.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{traits::Capability, MachineState};

/// A Result alias where the error defaults to [Error].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Anything a fleet operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input, rejected before anything was changed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Bad credentials, an expired verification code, or an unusable token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The broker, a socket, or an HTTP endpoint could not be reached.
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    /// A device answered with something we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The requested operation could not be carried out on this device.
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// A collaborator (filesystem, slicer process) failed.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Input rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Filament material was empty or whitespace.
    #[error("filament material must not be empty")]
    EmptyMaterial,

    /// Filament color was empty or whitespace.
    #[error("filament color must not be empty")]
    EmptyColor,

    /// Filament color was not 6 or 8 hex digits.
    #[error("filament color {0:?} is not 6 or 8 hex digits")]
    InvalidColor(String),

    /// The serial does not start with a known model prefix.
    #[error("unknown model for serial {serial} (prefix {prefix:?}), is the serial correct?")]
    UnknownSerialPrefix {
        /// The full serial.
        serial: String,
        /// The prefix that was looked up.
        prefix: String,
    },

    /// The configured model is not supported by its brand adapter.
    #[error("{brand} model {model:?} is not supported")]
    UnsupportedModel {
        /// The brand.
        brand: String,
        /// The configured model.
        model: String,
    },

    /// Two devices resolved to the same identifier.
    #[error("identifier {0:?} is used by more than one machine, set a nickname")]
    DuplicateIdentifier(String),

    /// An address could not be parsed.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
}

/// A specific operation failed on a specific device.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// No machine has this identifier.
    #[error("no machine named {0:?}")]
    UnknownMachine(String),

    /// The device kind does not have this capability.
    #[error("{identifier} does not support {capability}")]
    Unsupported {
        /// The device.
        identifier: String,
        /// The missing capability.
        capability: Capability,
    },

    /// The device is in a state that does not allow the operation.
    #[error("{identifier} is {state}, which does not allow {operation}")]
    InvalidState {
        /// The device.
        identifier: String,
        /// Its current state.
        state: MachineState,
        /// What was attempted.
        operation: &'static str,
    },

    /// The device has no removable storage to upload to.
    #[error("{0} has no removable storage inserted")]
    NoRemovableStorage(String),

    /// Transferring the job to the device failed.
    #[error("upload to {identifier} failed: {reason}")]
    Upload {
        /// The device.
        identifier: String,
        /// Why.
        reason: String,
    },

    /// The requested filament is not loaded on the device.
    #[error("{identifier} has no {filament} loaded")]
    FilamentNotLoaded {
        /// The device.
        identifier: String,
        /// The filament asked for.
        filament: String,
    },

    /// Slicing the model failed.
    #[error("slicing failed: {0}")]
    Slicing(String),
}

#[cfg(feature = "bambu")]
impl From<bambulabs::Error> for Error {
    fn from(err: bambulabs::Error) -> Self {
        use bambulabs::Error as E;

        match err {
            E::Authentication(_) | E::SchemaDrift(_) => Error::Authentication(err.to_string()),
            E::Json(_) => Error::Protocol(err.to_string()),
            E::NotConnected
            | E::UnknownDevice(_)
            | E::Mqtt(_)
            | E::Connection(_)
            | E::Tls(_)
            | E::Timeout(..)
            | E::Http(_)
            | E::Url(_)
            | E::Upload(_)
            | E::Io(_) => Error::Connectivity(err.to_string()),
        }
    }
}

#[cfg(feature = "elegoo")]
impl From<::elegoo::Error> for Error {
    fn from(err: ::elegoo::Error) -> Self {
        match err {
            ::elegoo::Error::Parse(_) => Error::Protocol(err.to_string()),
            ::elegoo::Error::Io(_) | ::elegoo::Error::Timeout(_) => Error::Connectivity(err.to_string()),
        }
    }
}

/// The class of an [Error], as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [Error::Validation].
    Validation,
    /// See [Error::Authentication].
    Authentication,
    /// See [Error::Connectivity].
    Connectivity,
    /// See [Error::Protocol].
    Protocol,
    /// See [Error::Operation].
    Operation,
    /// See [Error::Other].
    Internal,
}

/// The structured failure body handed back to whoever invoked an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorPayload {
    /// The error class.
    pub kind: ErrorKind,
    /// A human readable message.
    pub message: String,
}

impl Error {
    /// The class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::Connectivity(_) => ErrorKind::Connectivity,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Operation(_) => ErrorKind::Operation,
            Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// Render this error for a caller.
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: format!("{:#}", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_payload() {
        let err: Error = OperationError::NoRemovableStorage("x1c".to_string()).into();
        assert_eq!(
            err.payload(),
            ErrorPayload {
                kind: ErrorKind::Operation,
                message: "x1c has no removable storage inserted".to_string(),
            }
        );

        let value = serde_json::to_value(Error::from(ValidationError::EmptyColor).payload()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"kind": "validation", "message": "filament color must not be empty"})
        );
    }

    #[cfg(feature = "bambu")]
    #[test]
    fn test_bambulabs_errors_map_into_taxonomy() {
        assert_eq!(Error::from(bambulabs::Error::NotConnected).kind(), ErrorKind::Connectivity);
        assert_eq!(
            Error::from(bambulabs::Error::SchemaDrift("no username".to_string())).kind(),
            ErrorKind::Authentication
        );
    }
}
