//! Bridge configuration: the downstream server descriptors, loaded once at
//! startup and immutable for the process lifetime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bridge::error::BridgeError;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "MCPBRIDGE_CONFIG";

/// Default configuration file name, looked up in the working directory and
/// next to the executable.
pub const CONFIG_FILE_NAME: &str = "mcpbridge.config.json";

/// The only transport the bridge speaks to children.
pub const STDIO_TRANSPORT: &str = "stdio";

/// One downstream server entry from the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Transport type; only "stdio" is accepted at connect time
    #[serde(rename = "type", default = "default_transport")]
    pub transport: String,

    /// Executable to spawn
    pub command: String,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment merged over the inherited process environment
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the child process
    #[serde(default)]
    pub cwd: Option<String>,

    /// Human-readable description shown by list_servers
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_transport() -> String {
    STDIO_TRANSPORT.to_string()
}

fn default_enabled() -> bool {
    true
}

/// Root of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub servers: HashMap<String, ServerDescriptor>,
}

/// Immutable name-keyed view over the loaded descriptors.
pub struct ConfigRegistry {
    servers: HashMap<String, ServerDescriptor>,
}

impl ConfigRegistry {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            servers: config.servers,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ServerDescriptor> {
        self.servers.get(name)
    }

    /// Number of configured servers, enabled or not.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Sorted names of the enabled servers, used in listings and hints.
    pub fn enabled_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .servers
            .iter()
            .filter(|(_, d)| d.enabled)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn iter_enabled(&self) -> impl Iterator<Item = (&String, &ServerDescriptor)> {
        self.servers.iter().filter(|(_, d)| d.enabled)
    }
}

/// Resolve the configuration path: explicit override (CLI flag or
/// `MCPBRIDGE_CONFIG`), then the working directory, then next to the
/// executable.
pub fn discover(override_path: Option<&Path>) -> Result<PathBuf, BridgeError> {
    if let Some(path) = override_path {
        return Ok(path.to_path_buf());
    }

    let cwd_candidate = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_candidate.exists() {
        return Ok(cwd_candidate);
    }

    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(BridgeError::Config(format!(
        "no configuration found: set {CONFIG_ENV_VAR} or create {CONFIG_FILE_NAME}"
    )))
}

/// Load and parse the configuration. Failures here are fatal at startup.
pub fn load(path: &Path) -> Result<BridgeConfig, BridgeError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("failed to read config file {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        BridgeError::Config(format!(
            "failed to parse config file {} as JSON: {e}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_descriptor_gets_defaults() {
        let config: BridgeConfig = serde_json::from_str(
            r#"{ "servers": { "srv": { "command": "cat" } } }"#,
        )
        .unwrap();
        let desc = &config.servers["srv"];
        assert_eq!(desc.transport, STDIO_TRANSPORT);
        assert_eq!(desc.command, "cat");
        assert!(desc.args.is_empty());
        assert!(desc.env.is_empty());
        assert!(desc.cwd.is_none());
        assert!(desc.enabled);
    }

    #[test]
    fn full_descriptor_parses() {
        let config: BridgeConfig = serde_json::from_str(
            r#"{
                "servers": {
                    "fs": {
                        "type": "stdio",
                        "command": "npx",
                        "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
                        "env": { "DEBUG": "1" },
                        "cwd": "/tmp",
                        "description": "Filesystem access",
                        "enabled": false
                    }
                }
            }"#,
        )
        .unwrap();
        let desc = &config.servers["fs"];
        assert_eq!(desc.args.len(), 3);
        assert_eq!(desc.env["DEBUG"], "1");
        assert_eq!(desc.cwd.as_deref(), Some("/tmp"));
        assert!(!desc.enabled);
    }

    #[test]
    fn missing_command_is_a_parse_error() {
        let result: std::result::Result<BridgeConfig, _> =
            serde_json::from_str(r#"{ "servers": { "srv": {} } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn registry_filters_and_sorts_enabled_names() {
        let config: BridgeConfig = serde_json::from_str(
            r#"{
                "servers": {
                    "zeta": { "command": "a" },
                    "alpha": { "command": "b" },
                    "off": { "command": "c", "enabled": false }
                }
            }"#,
        )
        .unwrap();
        let registry = ConfigRegistry::new(config);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.enabled_names(), vec!["alpha", "zeta"]);
        assert_eq!(registry.iter_enabled().count(), 2);
    }

    #[test]
    fn load_round_trips_through_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "servers": {{ "srv": {{ "command": "cat", "description": "echo server" }} }} }}"#
        )
        .unwrap();
        let config = load(file.path()).unwrap();
        assert_eq!(
            config.servers["srv"].description.as_deref(),
            Some("echo server")
        );
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        assert!(load(Path::new("/nonexistent/mcpbridge.config.json")).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = load(file.path()).unwrap_err();
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn discover_prefers_the_override() {
        let path = discover(Some(Path::new("/some/override.json"))).unwrap();
        assert_eq!(path, PathBuf::from("/some/override.json"));
    }
}
