// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon configuration.
//!
//! Every field has a default, so an empty file is a valid endpoint-mode
//! configuration.

use crate::mctp::{Bdf, Eid, EID_BROADCAST, EID_NULL};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Role of the local binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindingMode {
    /// Addressed by a bus owner through endpoint discovery.
    #[default]
    Endpoint,
    /// Addressing authority; never discovered itself.
    BusOwner,
}

/// `[binding]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConfig {
    #[serde(default)]
    pub mode: BindingMode,

    /// Routing address of the local node.
    #[serde(default)]
    pub bdf: Bdf,

    /// EID restored by a Set Endpoint ID reset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_eid: Option<Eid>,
}

/// `[transport]` section: UDP emulator addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_local")]
    pub local: SocketAddr,

    #[serde(default = "default_peer")]
    pub peer: SocketAddr,
}

fn default_local() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9601))
}

fn default_peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9600))
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            local: default_local(),
            peer: default_peer(),
        }
    }
}

/// `[pldm]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PldmConfig {
    /// Wait per request attempt (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts per inventory step.
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,

    /// EIDs registered as termini and inventoried at start-up.
    #[serde(default)]
    pub termini: Vec<Eid>,
}

fn default_timeout_ms() -> u64 {
    100
}

fn default_retry_count() -> usize {
    3
}

impl Default for PldmConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
            termini: Vec::new(),
        }
    }
}

impl PldmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub binding: BindingConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub pldm: PldmConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_eid = |eid: Eid| eid != EID_NULL && eid != EID_BROADCAST;

        if let Some(eid) = self.binding.static_eid {
            if !valid_eid(eid) {
                return Err(ConfigError::Invalid(format!(
                    "static_eid 0x{:02x} is reserved",
                    eid
                )));
            }
        }

        if self.binding.mode == BindingMode::BusOwner && self.binding.static_eid.is_none() {
            return Err(ConfigError::Invalid(
                "bus-owner mode requires a static_eid".into(),
            ));
        }

        if self.transport.local == self.transport.peer {
            return Err(ConfigError::Invalid(format!(
                "transport local and peer are both {}",
                self.transport.local
            )));
        }

        if self.pldm.timeout_ms == 0 {
            return Err(ConfigError::Invalid("pldm.timeout_ms must be > 0".into()));
        }

        if self.pldm.retry_count == 0 {
            return Err(ConfigError::Invalid("pldm.retry_count must be > 0".into()));
        }

        for (i, eid) in self.pldm.termini.iter().enumerate() {
            if !valid_eid(*eid) {
                return Err(ConfigError::Invalid(format!(
                    "pldm.termini[{}] 0x{:02x} is reserved",
                    i, eid
                )));
            }
            if self.pldm.termini[..i].contains(eid) {
                return Err(ConfigError::Invalid(format!(
                    "pldm.termini lists EID {} twice",
                    eid
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.binding.mode, BindingMode::Endpoint);
        assert_eq!(config.pldm.timeout(), Duration::from_millis(100));
        assert_eq!(config.pldm.retry_count, 3);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[binding]
mode = "bus-owner"
bdf = 256
static_eid = 8

[transport]
local = "127.0.0.1:7000"
peer = "127.0.0.1:7001"

[pldm]
timeout_ms = 250
termini = [9, 10]
"#
        )
        .unwrap();

        let config = DaemonConfig::from_file(file.path()).unwrap();
        assert_eq!(config.binding.mode, BindingMode::BusOwner);
        assert_eq!(config.binding.bdf, Bdf(0x0100));
        assert_eq!(config.binding.static_eid, Some(8));
        assert_eq!(config.transport.peer.port(), 7001);
        assert_eq!(config.pldm.timeout_ms, 250);
        assert_eq!(config.pldm.retry_count, 3);
        assert_eq!(config.pldm.termini, vec![9, 10]);
    }

    #[test]
    fn test_generated_config_parses_back() {
        let mut config = DaemonConfig::default();
        config.pldm.termini = vec![0x1d];
        let text = config.to_toml().unwrap();
        let parsed: DaemonConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = DaemonConfig::default();
        config.binding.mode = BindingMode::BusOwner;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = DaemonConfig::default();
        config.binding.static_eid = Some(EID_BROADCAST);
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.pldm.termini = vec![9, 9];
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.pldm.retry_count = 0;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.transport.peer = config.transport.local;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[binding]\nmode = \"router\"").unwrap();
        assert!(matches!(
            DaemonConfig::from_file(file.path()),
            Err(ConfigError::Toml(_))
        ));
    }
}
