//! Node bootstrap configuration from command-line flags and environment.

use std::collections::BTreeMap;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use gridmesh_core::{Environment, IdError, NodeDescriptor, NodeId, StudioId};

use crate::network::NetworkConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Configuration for a grid node process.
///
/// Every flag falls back to a `GRID_*` environment variable.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "grid-node",
    version,
    about = "Grid node with context propagation and health aggregation"
)]
pub struct NodeConfig {
    /// Node identifier; defaults to the host name.
    #[arg(long, env = "GRID_NODE_ID")]
    pub node_id: Option<String>,

    /// Studio (logical tenant group) this node serves.
    #[arg(long, env = "GRID_STUDIO_ID")]
    pub studio_id: String,

    /// Deployment environment name.
    #[arg(long, env = "GRID_ENVIRONMENT", default_value = "development")]
    pub environment: String,

    /// Host name reported in node identity; defaults to `$HOSTNAME`.
    #[arg(long, env = "GRID_HOST_NAME")]
    pub host_name: Option<String>,

    /// Deployment tags as `key=value`, repeatable or comma separated.
    #[arg(long = "tag", env = "GRID_TAGS", value_delimiter = ',', value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,

    /// Bind address.
    #[arg(long, env = "GRID_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port; 0 picks a free port.
    #[arg(long, env = "GRID_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Allowed CORS origins, comma separated.
    #[arg(long, env = "GRID_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_origins: Vec<String>,

    #[arg(long, env = "GRID_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "GRID_DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    pub drain_timeout_secs: u64,

    /// Seconds between background health evaluations; 0 disables them.
    #[arg(long, env = "GRID_HEALTH_INTERVAL_SECS", default_value_t = 15)]
    pub health_interval_secs: u64,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, env = "GRID_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "GRID_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Do not install the Prometheus recorder or expose `/metrics`.
    #[arg(long, env = "GRID_DISABLE_METRICS")]
    pub disable_metrics: bool,
}

/// Invalid node configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid node identity: {0}")]
    Identity(#[from] IdError),
}

impl NodeConfig {
    /// Resolves the static node identity.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Identity`] if an identity value is blank.
    pub fn descriptor(&self) -> Result<NodeDescriptor, ConfigError> {
        let host_name = self
            .host_name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        let node_id = self.node_id.as_deref().unwrap_or(&host_name);

        Ok(NodeDescriptor {
            node_id: NodeId::new(node_id)?,
            studio_id: StudioId::new(&self.studio_id)?,
            environment: Environment::new(&self.environment)?,
            version: env!("CARGO_PKG_VERSION").to_string(),
            host_name: host_name.clone(),
            tags: self.tags.iter().cloned().collect::<BTreeMap<_, _>>(),
        })
    }

    #[must_use]
    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            health_interval: (self.health_interval_secs > 0)
                .then(|| Duration::from_secs(self.health_interval_secs)),
        }
    }
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("tag {raw:?} is not key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("tag {raw:?} has an empty key"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> NodeConfig {
        let mut argv = vec!["grid-node"];
        argv.extend_from_slice(args);
        NodeConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn descriptor_uses_flags() {
        let config = parse(&[
            "--node-id",
            "node-7",
            "--studio-id",
            "studio-1",
            "--environment",
            "prod",
            "--host-name",
            "box-1",
            "--tag",
            "region=eu",
            "--tag",
            "zone = a",
        ]);
        let descriptor = config.descriptor().unwrap();
        assert_eq!(descriptor.node_id.as_str(), "node-7");
        assert_eq!(descriptor.studio_id.as_str(), "studio-1");
        assert_eq!(descriptor.environment.as_str(), "prod");
        assert_eq!(descriptor.host_name, "box-1");
        assert_eq!(descriptor.tags.get("region").map(String::as_str), Some("eu"));
        assert_eq!(descriptor.tags.get("zone").map(String::as_str), Some("a"));
    }

    #[test]
    fn node_id_defaults_to_host_name() {
        let config = parse(&["--studio-id", "studio-1", "--host-name", "box-9"]);
        assert_eq!(config.descriptor().unwrap().node_id.as_str(), "box-9");
    }

    #[test]
    fn blank_studio_is_rejected() {
        let config = parse(&["--studio-id", "  ", "--host-name", "box-9"]);
        assert!(matches!(config.descriptor(), Err(ConfigError::Identity(_))));
    }

    #[test]
    fn malformed_tag_is_a_parse_error() {
        for tag in ["novalue", "=v"] {
            let argv = ["grid-node", "--studio-id", "s", "--tag", tag];
            assert!(NodeConfig::try_parse_from(argv).is_err(), "{tag} should be rejected");
        }
    }

    #[test]
    fn network_config_from_flags() {
        let config = parse(&[
            "--studio-id",
            "s",
            "--port",
            "9000",
            "--cors-origins",
            "http://a.test,http://b.test",
            "--health-interval-secs",
            "0",
        ]);
        let network = config.network();
        assert_eq!(network.port, 9000);
        assert_eq!(network.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(network.request_timeout, Duration::from_secs(30));
        assert!(network.health_interval.is_none());
        assert_eq!(config.log_format, LogFormat::Text);
    }
}
