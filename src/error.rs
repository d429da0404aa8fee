//! Error types for the plugin callbacks.

use std::io;
use thiserror::Error;

use crate::handle::HandleId;
use crate::proto;
use crate::request::Command;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Every failure a callback can report to the host.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A configuration key was unknown, repeated, or had an unparsable value.
    #[error("invalid config {key}: {reason}")]
    InvalidConfig {
        /// The offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration finished without a required option.
    #[error("incomplete config: {0}")]
    IncompleteConfig(String),

    /// One-time setup in get_ready failed.
    #[error("plugin not ready: {0}")]
    NotReady(String),

    /// The backing store could not be attached to a new connection.
    #[error("open failed: {0}")]
    OpenFailed(String),

    /// The size of the backing store could not be determined.
    #[error("size unavailable: {0}")]
    SizeUnavailable(#[source] io::Error),

    /// The request reaches past the end of the volume.
    #[error("{command} out of range: offset {offset}, count {count}, size {size}")]
    OutOfRange {
        /// The rejected operation.
        command: Command,
        /// Requested offset.
        offset: u64,
        /// Requested byte count.
        count: u32,
        /// Volume size of the handle.
        size: u64,
    },

    /// A mutating request on a read-only handle.
    #[error("{command} rejected: handle is read-only")]
    ReadOnlyViolation {
        /// The rejected operation.
        command: Command,
    },

    /// The backing store does not implement the operation.
    #[error("{command} is not supported by this store")]
    Unsupported {
        /// The rejected operation.
        command: Command,
    },

    /// The backing store failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The handle was never issued or has already been closed.
    #[error("stale handle {0}")]
    StaleHandle(HandleId),

    /// A lifecycle callback arrived in the wrong state.
    #[error("{call} called while plugin is {state}")]
    InvalidState {
        /// The callback that was invoked.
        call: &'static str,
        /// The lifecycle state at the time.
        state: &'static str,
    },
}

impl PluginError {
    pub fn invalid_config(key: &str, reason: impl Into<String>) -> PluginError {
        PluginError::InvalidConfig {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// NBD error number reported to the client for this failure.
    pub fn errno(&self) -> u32 {
        match self {
            PluginError::ReadOnlyViolation { .. } => proto::NBD_EPERM,
            PluginError::OutOfRange { command, .. } => match command {
                Command::Write | Command::Zero => proto::NBD_ENOSPC,
                _ => proto::NBD_EINVAL,
            },
            PluginError::Unsupported { .. } => proto::NBD_ENOTSUP,
            PluginError::InvalidConfig { .. }
            | PluginError::IncompleteConfig(_)
            | PluginError::StaleHandle(_)
            | PluginError::InvalidState { .. } => proto::NBD_EINVAL,
            PluginError::Io(e) if e.kind() == io::ErrorKind::OutOfMemory => proto::NBD_ENOMEM,
            PluginError::NotReady(_)
            | PluginError::OpenFailed(_)
            | PluginError::SizeUnavailable(_)
            | PluginError::Io(_) => proto::NBD_EIO,
        }
    }
}
