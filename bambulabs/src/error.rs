//! Errors returned by the Bambu cloud client.

use std::time::Duration;

/// A Result alias where the error defaults to [Error].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure talking to the Bambu cloud, the broker, or a device.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The shared broker session has not been established, or has dropped.
    #[error("broker session is not connected")]
    NotConnected,

    /// A request was made for a serial that never registered with the pool.
    #[error("device {0} is not registered with the connection pool")]
    UnknownDevice(String),

    /// The MQTT client rejected a request.
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// The MQTT event loop failed.
    #[error("mqtt connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    /// The TLS configuration for the broker could not be built.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// A bounded operation ran out of time.
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),

    /// Bad credentials, an expired verification code, or an unusable token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A cloud response or token no longer has the shape we rely on.
    #[error("unexpected response shape: {0}")]
    SchemaDrift(String),

    /// A cloud HTTP call failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// A cloud URL could not be built.
    #[error(transparent)]
    Url(#[from] url::ParseError),

    /// Transferring a file to the device failed.
    #[error("upload failed: {0}")]
    Upload(String),

    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Local i/o failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
