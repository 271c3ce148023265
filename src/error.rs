//! Error type shared by every lifecycle phase.
//!
//! The phase-level kinds (`AllocationFailed`, `IsolationFailed`,
//! `ReleaseFailed`) wrap whatever the helper client reported, so the
//! orchestrator always sees which phase failed for which container.

use std::path::PathBuf;
use std::time::Duration;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The executor asked for something this coordinator cannot provide.
    #[error("unsupported network request: {0}")]
    Unsupported(String),

    /// Conflicting or missing fields in the network request.
    #[error("invalid network request: {0}")]
    InvalidRequest(String),

    #[error("address allocation failed for container '{container_id}': {reason}")]
    AllocationFailed { container_id: String, reason: String },

    #[error("network isolation failed for container '{container_id}': {reason}")]
    IsolationFailed { container_id: String, reason: String },

    #[error("network release failed for container '{container_id}': {reason}")]
    ReleaseFailed { container_id: String, reason: String },

    /// Helper output was not a well-formed response document.
    #[error("malformed output from {}: {reason}", .program.display())]
    ProtocolDecode { program: PathBuf, reason: String },

    /// Helper returned a document with a non-null `error` field.
    #[error("{} returned error: {message}", .program.display())]
    HelperReported { program: PathBuf, message: String },

    #[error("failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error talking to {}: {source}", .program.display())]
    Io {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("{} did not exit within {duration:?}", .program.display())]
    Timeout { program: PathBuf, duration: Duration },

    #[error("configuration error: {0}")]
    Config(String),

    /// A result could not be turned into JSON for the hook wire.
    #[error("failed to encode result: {0}")]
    Encode(#[source] serde_json::Error),
}

impl Error {
    /// Stable snake_case name of the error kind, used on the hook wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unsupported(_) => "unsupported",
            Error::InvalidRequest(_) => "invalid_request",
            Error::AllocationFailed { .. } => "allocation_failed",
            Error::IsolationFailed { .. } => "isolation_failed",
            Error::ReleaseFailed { .. } => "release_failed",
            Error::ProtocolDecode { .. } => "protocol_decode",
            Error::HelperReported { .. } => "helper_reported",
            Error::Spawn { .. } => "spawn",
            Error::Io { .. } => "io",
            Error::Timeout { .. } => "timeout",
            Error::Config(_) => "config",
            Error::Encode(_) => "encode",
        }
    }
}
