use thiserror::Error;
use uuid::Uuid;

use crate::payload::FailureReason;

/// Errors returned by BLE transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("no known peripheral matches `{address}`")]
    PeerNotFound { address: String },
    #[error("characteristic `{characteristic}` was not found on the connected device")]
    UnknownCharacteristic { characteristic: Uuid },
    #[error("descriptor `{descriptor}` was not found on characteristic `{characteristic}`")]
    UnknownDescriptor {
        characteristic: Uuid,
        descriptor: Uuid,
    },
    #[error("the connection was already closed")]
    ConnectionClosed,
}

/// Errors returned when parsing fake transport fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("invalid hex chunk `{value}`")]
    InvalidHex {
        value: String,
        source: hex::FromHexError,
    },
    #[error("fixture chunks cannot be empty")]
    EmptyChunk,
    #[error("fake chunk size must be greater than zero")]
    ZeroChunkSize,
}

/// Errors returned by the persisted identity store.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed while reading or writing the identity file")]
    Io { source: std::io::Error },
    #[error("invalid user identifier `{value}`")]
    InvalidUserId { value: String },
    #[error("no configuration directory is available for the identity file")]
    NoConfigDirectory,
}

/// Errors returned when a complete reply document cannot be decoded.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("reply is not a device-info document")]
    Shape {
        #[source]
        source: serde_json::Error,
    },
}

/// The caller cancelled a device-info exchange before it produced an outcome.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[error("device-info exchange was cancelled")]
pub struct ExchangeCancelled;

/// Errors returned by command runners after output was written.
#[derive(Debug, Error)]
pub(crate) enum CommandError {
    #[error("device-info exchange failed: {reason}")]
    ExchangeFailed { reason: FailureReason },
    #[error("device could not be classified: {message}")]
    ClassificationFailed { message: String },
    #[error(transparent)]
    Cancelled(#[from] ExchangeCancelled),
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("`--fake-reply` and `--fake-chunks` cannot be combined")]
    ConflictingFakeReply,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
