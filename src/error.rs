//! Error types for instrument operations.
//!
//! This module provides one error type covering every failure mode of the
//! abstraction layer: connection setup, resource lookup, argument validation
//! and transport exchanges.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for instrument operations.
pub type Result<T> = std::result::Result<T, InstrumentError>;

/// Errors that can occur when working with an instrument.
///
/// Resource-existence and argument-domain failures are always raised before
/// any transport I/O is attempted; [`InstrumentError::Io`] only ever wraps a
/// transport exchange that failed after the resource was validated to exist.
#[derive(Error, Debug)]
pub enum InstrumentError {
    /// No device answered the URI, or auto-detect found nothing.
    #[error("No device found for uri '{uri}'")]
    Connection { uri: String },

    /// A named sub-device does not exist on the opened context.
    #[error("Device '{name}' not found on this context")]
    DeviceNotFound { name: String },

    /// A named channel does not exist in the owning capability group.
    #[error("Channel '{name}' not found")]
    ChannelNotFound { name: String },

    /// An indexed resource (channel, attribute) does not exist.
    #[error("{what} not found")]
    ResourceNotFound { what: String },

    /// Caller-supplied index or parameter outside the valid domain.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Caller-supplied value outside the calibrated range.
    #[error("Value {value} outside range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    /// A transport exchange failed after validation.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// A device-profile file could not be read or parsed.
    #[error("Profile error{}: {message}", path_suffix(.path))]
    Profile {
        path: Option<PathBuf>,
        message: String,
    },

    /// The process-wide log sink was already configured.
    #[error("Logger sink already initialized")]
    LoggerInitialized,
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" in '{}'", p.display()),
        None => String::new(),
    }
}

impl InstrumentError {
    /// Shorthand for an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Shorthand for a transport I/O error.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Check if this is a "resource does not exist" class of error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. }
                | Self::ChannelNotFound { .. }
                | Self::ResourceNotFound { .. }
        )
    }

    /// Check if this is a connection-establishment failure.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Check if the caller supplied an out-of-domain index or value.
    pub fn is_domain(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. } | Self::OutOfRange { .. })
    }
}
