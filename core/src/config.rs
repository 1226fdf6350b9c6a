//! TOML-backed pipeline configuration.

use crate::error::ConfigError;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// One `(protocol_number, module_name)` forwarding rule for an IP-family module.
#[derive(Debug, Clone, Deserialize)]
pub struct Connection {
    pub protocol: u8,
    pub module: String,
}

/// Per-module configuration block under `[modules.<name>]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(rename = "ipv6Module", default)]
    pub ipv6_module: Option<String>,
    #[serde(rename = "idFlows", default)]
    pub id_flows: bool,
    #[serde(default = "default_true")]
    pub defrag: bool,
    #[serde(rename = "filterFragments", default)]
    pub filter_fragments: bool,
    #[serde(rename = "outDefault", default)]
    pub out_default: Option<String>,
    /// Upper bound on concurrently tracked fragment groups.
    #[serde(rename = "maxFragmented", default = "default_max_fragmented")]
    pub max_fragmented: usize,
    /// Packets between fragment-store cleanup ticks.
    #[serde(rename = "cleanupInterval", default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Fragment-group eviction age, in seconds of capture wall-clock.
    #[serde(rename = "fragmentTimeout", default = "default_fragment_timeout")]
    pub fragment_timeout: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_fragmented() -> usize {
    10_000
}

fn default_cleanup_interval() -> u64 {
    10_000
}

fn default_fragment_timeout() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityManagerConfig {
    #[serde(default)]
    pub anonymize: bool,
    #[serde(rename = "encryptedClassification", default)]
    pub encrypted_classification: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassificationConfig {
    #[serde(rename = "fileName", default)]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub modules: HashMap<String, ModuleConfig>,
    #[serde(rename = "securityManager", default)]
    pub security_manager: SecurityManagerConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    /// Name of the module the pipeline driver hands the first packet to.
    #[serde(rename = "entryModule", default)]
    pub entry_module: Option<String>,
}

impl Config {
    pub fn module(&self, name: &str) -> Option<&ModuleConfig> {
        self.modules.get(name)
    }
}

/// Loads and parses a TOML configuration file.
///
/// Parse failures are reported as `ConfigError`; callers are expected to
/// treat them as fatal and terminate the process at the call site.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ip_module_connections() {
        let toml = r#"
            entryModule = "eth"

            [securityManager]
            anonymize = true
            encryptedClassification = false

            [classification]
            fileName = "catalog.xml"

            [modules.ip]
            idFlows = true
            defrag = true

            [[modules.ip.connections]]
            protocol = 6
            module = "tcp"

            [[modules.ip.connections]]
            protocol = 17
            module = "udp"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.entry_module.as_deref(), Some("eth"));
        assert!(config.security_manager.anonymize);
        let ip = config.module("ip").unwrap();
        assert!(ip.id_flows);
        assert!(ip.defrag);
        assert_eq!(ip.connections.len(), 2);
        assert_eq!(ip.connections[0].protocol, 6);
        assert_eq!(ip.connections[0].module, "tcp");
        assert_eq!(ip.max_fragmented, 10_000);
        assert_eq!(ip.fragment_timeout, 1);
    }
}
