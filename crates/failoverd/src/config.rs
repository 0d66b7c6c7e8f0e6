//! Static configuration for failoverd
//!
//! Loaded once at startup from a TOML file. Every field has a default that
//! matches the five-switch demo topology:
//!
//! ```text
//!          s2
//!        /    \
//! h1 - s3      s4 - h2
//!        \    /
//!          s5
//! ```

use crate::error::{FailoverError, Result};
use crate::flow_installer::DEFAULT_IDLE_TIMEOUT_SECS;
use crate::openflow::OFP_DEFAULT_PRIORITY;
use crate::types::{Dpid, HostPair, Path};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path as FsPath;
use std::time::Duration;
use tracing::info;

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/failoverd/failoverd.toml";

/// The two tracked hosts and the switches they hang off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostsConfig {
    #[serde(default = "default_host_a")]
    pub a: Ipv4Addr,

    /// Attachment switch of host A
    #[serde(default = "default_host_a_switch")]
    pub a_switch: Dpid,

    #[serde(default = "default_host_b")]
    pub b: Ipv4Addr,

    /// Attachment switch of host B
    #[serde(default = "default_host_b_switch")]
    pub b_switch: Dpid,
}

/// The two pre-provisioned candidate paths, host A side first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_primary_path")]
    pub primary: Vec<Dpid>,

    #[serde(default = "default_backup_path")]
    pub backup: Vec<Dpid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowsConfig {
    /// Idle timeout carried by every installed rule (seconds)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u16,

    #[serde(default = "default_priority")]
    pub priority: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultApiConfig {
    #[serde(default = "default_fault_api_enabled")]
    pub enabled: bool,

    #[serde(default = "default_fault_api_listen")]
    pub listen: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Upper bound on the wait for the discovery readiness signal
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

/// Complete failoverd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailoverConfig {
    #[serde(default)]
    pub hosts: HostsConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub flows: FlowsConfig,

    #[serde(default)]
    pub fault_api: FaultApiConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

fn default_host_a() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 1)
}

fn default_host_a_switch() -> Dpid {
    3
}

fn default_host_b() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 2)
}

fn default_host_b_switch() -> Dpid {
    4
}

fn default_primary_path() -> Vec<Dpid> {
    vec![3, 2, 4]
}

fn default_backup_path() -> Vec<Dpid> {
    vec![3, 5, 4]
}

fn default_idle_timeout() -> u16 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

fn default_priority() -> u16 {
    OFP_DEFAULT_PRIORITY
}

fn default_fault_api_enabled() -> bool {
    true
}

fn default_fault_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_ready_timeout() -> u64 {
    10
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            a: default_host_a(),
            a_switch: default_host_a_switch(),
            b: default_host_b(),
            b_switch: default_host_b_switch(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_path(),
            backup: default_backup_path(),
        }
    }
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            priority: default_priority(),
        }
    }
}

impl Default for FaultApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_fault_api_enabled(),
            listen: default_fault_api_listen(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: default_ready_timeout(),
        }
    }
}

impl FailoverConfig {
    /// Parses a TOML document. Missing sections and fields take defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| FailoverError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Loads and validates the configuration at `path`.
    pub fn load(path: impl AsRef<FsPath>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = toml::from_str::<Self>(&content).map_err(|e| {
            FailoverError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Loads `path`, falling back to defaults if the file does not exist.
    pub fn load_or_default(path: impl AsRef<FsPath>) -> Result<Self> {
        let path = path.as_ref();
        match Self::load(path) {
            Err(FailoverError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FailoverError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn host_pair(&self) -> HostPair {
        HostPair::new(self.hosts.a, self.hosts.b)
    }

    pub fn primary_path(&self) -> Path {
        Path::new(self.paths.primary.clone())
    }

    pub fn backup_path(&self) -> Path {
        Path::new(self.paths.backup.clone())
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery.ready_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.hosts.a == self.hosts.b {
            return Err(FailoverError::Config(format!(
                "host a and host b share address {}",
                self.hosts.a
            )));
        }

        self.validate_path("primary", &self.paths.primary)?;
        self.validate_path("backup", &self.paths.backup)?;

        if self.paths.primary == self.paths.backup {
            return Err(FailoverError::Config(
                "primary and backup paths are identical".to_string(),
            ));
        }

        if self.flows.idle_timeout_secs == 0 {
            return Err(FailoverError::Config(
                "idle_timeout_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_path(&self, name: &str, switches: &[Dpid]) -> Result<()> {
        let path = Path::new(switches.to_vec());
        if path.len() < 2 {
            return Err(FailoverError::Config(format!(
                "{} path {} needs at least two switches",
                name, path
            )));
        }
        if path.first() != Some(self.hosts.a_switch) || path.last() != Some(self.hosts.b_switch) {
            return Err(FailoverError::Config(format!(
                "{} path {} must run from switch {} to switch {}",
                name, path, self.hosts.a_switch, self.hosts.b_switch
            )));
        }
        if path.hops().any(|(a, b)| a == b) {
            return Err(FailoverError::Config(format!(
                "{} path {} contains a self-loop hop",
                name, path
            )));
        }
        Ok(())
    }
}
