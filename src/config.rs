//! # Connection and Bus Configuration
//!
//! [`ConnectionTarget`] says where the bus is (serial device or TCP gateway);
//! [`BusConfig`] holds the protocol tunables of the transaction engine. Both are
//! plain `serde` types, so they can be embedded in an application's own JSON
//! configuration. Durations are (de)serialised as milliseconds.
//!
//! ```rust
//! use mbus_master::config::{BusConfig, ConnectionTarget};
//!
//! let target: ConnectionTarget =
//!     serde_json::from_str(r#"{"type": "tcp", "host": "10.0.0.5"}"#).unwrap();
//! assert_eq!(target, ConnectionTarget::tcp("10.0.0.5", 8888));
//!
//! let config = BusConfig::from_json(r#"{"max_retries": 1}"#).unwrap();
//! assert_eq!(config.max_retries, 1);
//! assert_eq!(config.max_telegrams, 16);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::MBusError;
use crate::mbus::serial::response_timeout_for_baudrate;

/// Response timeout used for TCP gateways.
pub const DEFAULT_TCP_TIMEOUT: Duration = Duration::from_secs(4);
/// Quiet time that ends a purge of late bytes.
pub const DEFAULT_PURGE_TIMEOUT: Duration = Duration::from_millis(50);
/// Retries after the first attempt of a request.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Safety bound on telegrams of one multi-telegram response.
pub const DEFAULT_MAX_TELEGRAMS: usize = 16;

fn default_baudrate() -> u32 {
    MBUS_DEFAULT_BAUDRATE
}

fn default_port() -> u16 {
    MBUS_DEFAULT_TCP_PORT
}

/// Where the M-Bus segment is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionTarget {
    /// Local serial device, e.g. `/dev/ttyUSB0` or `COM3`
    Serial {
        path: String,
        #[serde(default = "default_baudrate")]
        baudrate: u32,
    },
    /// Serial-to-TCP gateway
    Tcp {
        host: String,
        #[serde(default = "default_port")]
        port: u16,
    },
}

impl ConnectionTarget {
    pub fn serial(path: impl Into<String>, baudrate: u32) -> Self {
        ConnectionTarget::Serial {
            path: path.into(),
            baudrate,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        ConnectionTarget::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Checks the target before any resource is acquired.
    pub fn validate(&self) -> Result<(), MBusError> {
        match self {
            ConnectionTarget::Serial { path, baudrate } => {
                if path.trim().is_empty() {
                    return Err(MBusError::Config("serial device path is empty".into()));
                }
                if !MBUS_SUPPORTED_BAUDRATES.contains(baudrate) {
                    return Err(MBusError::Config(format!(
                        "unsupported baud rate {baudrate}, expected one of {MBUS_SUPPORTED_BAUDRATES:?}"
                    )));
                }
            }
            ConnectionTarget::Tcp { host, port } => {
                if host.trim().is_empty() {
                    return Err(MBusError::Config("gateway host is empty".into()));
                }
                if *port == 0 {
                    return Err(MBusError::Config("TCP port must be in 1..=65535".into()));
                }
            }
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Protocol tunables of the transaction engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// How long to wait for each byte of a response
    #[serde(with = "millis", rename = "response_timeout_ms")]
    pub response_timeout: Duration,
    /// Quiet time that ends the purge before each request
    #[serde(with = "millis", rename = "purge_timeout_ms")]
    pub purge_timeout: Duration,
    /// Re-sends after a timeout or checksum error
    pub max_retries: u32,
    /// Upper bound of telegrams collected for one data request
    pub max_telegrams: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::for_baudrate(MBUS_DEFAULT_BAUDRATE)
    }
}

impl BusConfig {
    /// Defaults for a serial line at `baudrate`.
    pub fn for_baudrate(baudrate: u32) -> Self {
        BusConfig {
            response_timeout: response_timeout_for_baudrate(baudrate),
            purge_timeout: DEFAULT_PURGE_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            max_telegrams: DEFAULT_MAX_TELEGRAMS,
        }
    }

    /// Defaults matching a connection target.
    pub fn for_target(target: &ConnectionTarget) -> Self {
        match target {
            ConnectionTarget::Serial { baudrate, .. } => Self::for_baudrate(*baudrate),
            ConnectionTarget::Tcp { .. } => BusConfig {
                response_timeout: DEFAULT_TCP_TIMEOUT,
                ..Self::default()
            },
        }
    }

    pub fn validate(&self) -> Result<(), MBusError> {
        if self.response_timeout.is_zero() {
            return Err(MBusError::Config("response timeout must be non-zero".into()));
        }
        if self.max_telegrams == 0 {
            return Err(MBusError::Config("max_telegrams must be at least 1".into()));
        }
        Ok(())
    }

    /// Parses and validates a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, MBusError> {
        let config: BusConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads [`from_json`](Self::from_json) input from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MBusError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MBusError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String, MBusError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
