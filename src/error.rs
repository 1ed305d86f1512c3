//! Error taxonomy shared by the configuration loader, device clients and executor

use thiserror::Error;

/// Configuration errors are fatal: the listener refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Preset '{preset}': {message}")]
    Preset { preset: String, message: String },
}

impl ConfigError {
    pub(crate) fn preset(preset: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Preset {
            preset: preset.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while a device command is executing.
///
/// `Connection` and `Protocol` leave the client disconnected; `Range` and
/// `Address` reject only the offending command.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{device} connection error: {message}")]
    Connection { device: String, message: String },

    #[error("{device} protocol error: {message}")]
    Protocol { device: String, message: String },

    #[error("Value out of range: {0}")]
    Range(String),

    #[error("Address error: {0}")]
    Address(String),
}

impl DeviceError {
    pub(crate) fn connection(device: &str, message: impl std::fmt::Display) -> Self {
        DeviceError::Connection {
            device: device.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn protocol(device: &str, message: impl std::fmt::Display) -> Self {
        DeviceError::Protocol {
            device: device.to_string(),
            message: message.to_string(),
        }
    }

    /// Short tag used in log fields and execution reports
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceError::Connection { .. } => "connection",
            DeviceError::Protocol { .. } => "protocol",
            DeviceError::Range(_) => "range",
            DeviceError::Address(_) => "address",
        }
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;
