//! Harness configuration.
//!
//! Values come from (in increasing precedence) built-in defaults, an optional
//! YAML file named by `WAKU_INTEROP_CONFIG`, and environment variables.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::{env, fs::File, path::Path, path::PathBuf, str::FromStr, time::Duration};
use tracing::{info, warn};

/// Environment variable naming an optional YAML configuration file.
pub const CONFIG_ENV: &str = "WAKU_INTEROP_CONFIG";

/// Default nwaku image.
pub const DEFAULT_NWAKU: &str = "harbor.status.im/wakuorg/nwaku:latest";

/// Default go-waku image.
pub const DEFAULT_GOWAKU: &str = "harbor.status.im/wakuorg/go-waku:latest";

/// Node key used by tests that need a stable peer identity.
pub const DEFAULT_NODEKEY: &str =
    "30348dd51465150e04a5d9d932c72864c8967f806cce60b5d26afeca1e77eb68";

/// Interface used for calls a node serves over both REST and JSON-RPC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Rest,
    Rpc,
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" => Ok(Protocol::Rest),
            "rpc" => Ok(Protocol::Rpc),
            other => Err(Error::InvalidConfig(format!("unknown protocol: {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Image for the first (usually publishing) node.
    pub node_1: String,
    /// Image for the second (usually receiving) node.
    pub node_2: String,
    /// Images for optional extra nodes.
    pub additional_nodes: Vec<String>,
    /// Directory receiving one log file per container.
    pub log_dir: PathBuf,
    pub network_name: String,
    pub subnet: String,
    pub ip_range: String,
    pub gateway: String,
    pub default_pubsub_topic: String,
    pub nodekey: String,
    /// Per-request HTTP timeout, in seconds.
    pub api_request_timeout: u64,
    /// Interface for node info and relay subscribe, publish and fetch.
    pub protocol: Protocol,
    /// JSON object with RLN credentials, if RLN tests are enabled.
    pub rln_credentials: Option<String>,
    /// Directory holding `keystore_<id>` and `rln_tree_<id>` directories.
    pub rln_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_1: DEFAULT_GOWAKU.to_string(),
            node_2: DEFAULT_NWAKU.to_string(),
            additional_nodes: vec![
                DEFAULT_NWAKU.to_string(),
                DEFAULT_GOWAKU.to_string(),
                DEFAULT_NWAKU.to_string(),
            ],
            log_dir: PathBuf::from("./log/docker"),
            network_name: "waku".to_string(),
            subnet: "172.18.0.0/16".to_string(),
            ip_range: "172.18.0.0/24".to_string(),
            gateway: "172.18.0.1".to_string(),
            default_pubsub_topic: "/waku/2/default-waku/proto".to_string(),
            nodekey: DEFAULT_NODEKEY.to_string(),
            api_request_timeout: 10,
            protocol: Protocol::Rest,
            rln_credentials: None,
            rln_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load defaults, then the optional YAML file, then environment overrides.
    pub fn load() -> Result<Self, Error> {
        let mut config = match env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        info!(?config, "loaded configuration");
        Ok(config)
    }

    /// Read a YAML configuration file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }

    /// Apply overrides from `lookup` (usually the process environment).
    ///
    /// Unset and empty values leave the current value in place.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("NODE_1") {
            self.node_1 = value;
        }
        if let Some(value) = get("NODE_2") {
            self.node_2 = value;
        }
        if let Some(value) = get("ADDITIONAL_NODES") {
            self.additional_nodes = value
                .split(',')
                .map(str::trim)
                .filter(|image| !image.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(value) = get("DOCKER_LOG_DIR") {
            self.log_dir = PathBuf::from(value);
        }
        if let Some(value) = get("NETWORK_NAME") {
            self.network_name = value;
        }
        if let Some(value) = get("SUBNET") {
            self.subnet = value;
        }
        if let Some(value) = get("IP_RANGE") {
            self.ip_range = value;
        }
        if let Some(value) = get("GATEWAY") {
            self.gateway = value;
        }
        if let Some(value) = get("DEFAULT_PUBSUB_TOPIC") {
            self.default_pubsub_topic = value;
        }
        if let Some(value) = get("NODEKEY") {
            self.nodekey = value;
        }
        if let Some(value) = get("API_REQUEST_TIMEOUT") {
            match value.trim().parse() {
                Ok(secs) => self.api_request_timeout = secs,
                Err(_) => warn!(value, "ignoring invalid API_REQUEST_TIMEOUT"),
            }
        }
        if let Some(value) = get("PROTOCOL") {
            match value.parse() {
                Ok(protocol) => self.protocol = protocol,
                Err(_) => warn!(value, "ignoring invalid PROTOCOL"),
            }
        }
        if let Some(value) = get("RLN_CREDENTIALS") {
            self.rln_credentials = Some(value);
        }
        if let Some(value) = get("RLN_DIR") {
            self.rln_dir = PathBuf::from(value);
        }
    }

    /// Per-request HTTP timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api_request_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, io::Write};

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.node_1, DEFAULT_GOWAKU);
        assert_eq!(config.node_2, DEFAULT_NWAKU);
        assert_eq!(config.additional_nodes.len(), 3);
        assert_eq!(config.network_name, "waku");
        assert_eq!(config.subnet, "172.18.0.0/16");
        assert_eq!(config.ip_range, "172.18.0.0/24");
        assert_eq!(config.gateway, "172.18.0.1");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.protocol, Protocol::Rest);
        assert!(config.rln_credentials.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("NODE_1", "wakuorg/nwaku:v0.31.0"),
            ("ADDITIONAL_NODES", " wakuorg/nwaku:latest , ,wakuorg/go-waku:latest"),
            ("API_REQUEST_TIMEOUT", "30"),
            ("NETWORK_NAME", ""),
            ("RLN_DIR", "/tmp/rln"),
            ("PROTOCOL", "RPC"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.node_1, "wakuorg/nwaku:v0.31.0");
        assert_eq!(
            config.additional_nodes,
            vec!["wakuorg/nwaku:latest", "wakuorg/go-waku:latest"]
        );
        assert_eq!(config.api_request_timeout, 30);
        assert_eq!(config.rln_dir, PathBuf::from("/tmp/rln"));
        assert_eq!(config.protocol, Protocol::Rpc);

        // Empty values fall back to the current value
        assert_eq!(config.network_name, "waku");
        assert_eq!(config.node_2, DEFAULT_NWAKU);
    }

    #[test]
    fn test_invalid_timeout_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == "API_REQUEST_TIMEOUT").then(|| "soon".to_string()));
        assert_eq!(config.api_request_timeout, 10);
    }

    #[test]
    fn test_protocol() {
        assert_eq!(" rest ".parse::<Protocol>().unwrap(), Protocol::Rest);
        assert_eq!("Rpc".parse::<Protocol>().unwrap(), Protocol::Rpc);
        assert!(matches!(
            "grpc".parse::<Protocol>(),
            Err(Error::InvalidConfig(_))
        ));

        let mut config = Config::default();
        config.apply_overrides(|key| (key == "PROTOCOL").then(|| "websocket".to_string()));
        assert_eq!(config.protocol, Protocol::Rest);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "node_1: wakuorg/go-waku:v0.8.0").unwrap();
        writeln!(file, "additional_nodes: []").unwrap();
        writeln!(file, "log_dir: /var/log/waku").unwrap();
        writeln!(file, "protocol: rpc").unwrap();
        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.node_1, "wakuorg/go-waku:v0.8.0");
        assert!(config.additional_nodes.is_empty());
        assert_eq!(config.log_dir, PathBuf::from("/var/log/waku"));
        assert_eq!(config.protocol, Protocol::Rpc);

        // Unspecified keys keep their defaults
        assert_eq!(config.node_2, DEFAULT_NWAKU);
        assert_eq!(config.nodekey, DEFAULT_NODEKEY);
    }

    #[test]
    fn test_from_missing_file() {
        let err = Config::from_file("/nonexistent/waku-interop.yaml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
