use std::path::PathBuf;

use clap::Parser;

/// mcpbridge - MCP meta-protocol proxy
///
/// Presents a single MCP server over stdio whose eight meta-tools discover,
/// describe, and invoke the tools of the downstream MCP servers named in the
/// bridge configuration. Downstream servers are spawned lazily as child
/// processes on first use.
#[derive(Parser, Debug)]
#[command(name = "mcpbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the bridge configuration file
    ///
    /// Falls back to ./mcpbridge.config.json, then to a config file next to
    /// the executable.
    #[arg(long, value_name = "PATH", env = "MCPBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// List the configured servers and exit without serving
    #[arg(long)]
    pub list_servers: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_override() {
        let cli = Cli::parse_from(["mcpbridge", "--config", "/tmp/bridge.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/bridge.json")));
        assert!(!cli.list_servers);
    }

    #[test]
    fn defaults_to_no_flags() {
        let cli = Cli::parse_from(["mcpbridge"]);
        assert!(cli.config.is_none() || std::env::var("MCPBRIDGE_CONFIG").is_ok());
    }
}
