//! Node HTTP interfaces.

use crate::Error;
use serde::Deserialize;
use serde_json::Value;

mod rest;
pub use rest::{curl_command, RestClient, TRANSPORT_RETRY};
mod rpc;
pub use rpc::RpcClient;

/// Plain-text health response of a node that is fully up.
pub const HEALTHY: &str = "Node is healthy";

/// Response of `debug/v1/info`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    #[serde(default, alias = "listen_addresses")]
    pub listen_addresses: Vec<String>,
    #[serde(default, alias = "enr_uri")]
    pub enr_uri: Option<String>,
}

/// Response of the filter subscription endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterResponse {
    #[serde(default, alias = "request_id")]
    pub request_id: String,
    #[serde(default, alias = "status_code")]
    pub status_code: Option<u32>,
    #[serde(default, alias = "status_desc")]
    pub status_desc: Option<String>,
}

impl FilterResponse {
    /// Whether the node reported success.
    pub fn is_ok(&self) -> bool {
        self.status_desc.as_deref() == Some("OK")
    }
}

/// Check a `/health` body.
///
/// Either the plain healthy marker, or a JSON report where the node is `Ready`
/// and every protocol entry that reports on RLN relay is `Ready` too.
pub fn check_health(body: &str) -> Result<(), Error> {
    if body.trim() == HEALTHY {
        return Ok(());
    }
    let report: Value = serde_json::from_str(body)
        .map_err(|err| Error::UnexpectedResponse(format!("unknown health response format {err}")))?;
    if report.get("nodeHealth").and_then(Value::as_str) != Some("Ready") {
        return Err(Error::Assertion(
            "waiting for the node health status: Ready".into(),
        ));
    }
    let protocols = report
        .get("protocolsHealth")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for protocol in protocols {
        if let Some(status) = protocol.get("Rln Relay") {
            if status.as_str() != Some("Ready") {
                return Err(Error::Assertion(
                    "waiting for the rln relay status: Ready".into(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_health() {
        // Test case 0: plain marker
        assert!(check_health("Node is healthy").is_ok());

        // Test case 1: ready report
        let ready = json!({
            "nodeHealth": "Ready",
            "protocolsHealth": [{"Relay": "Ready"}, {"Rln Relay": "Ready"}]
        });
        assert!(check_health(&ready.to_string()).is_ok());

        // Test case 2: node still initializing
        let initializing = json!({"nodeHealth": "Initializing", "protocolsHealth": []});
        assert!(check_health(&initializing.to_string())
            .unwrap_err()
            .mentions("node health status"));

        // Test case 3: rln relay not ready yet
        let rln_pending = json!({
            "nodeHealth": "Ready",
            "protocolsHealth": [{"Rln Relay": "Initializing"}]
        });
        assert!(check_health(&rln_pending.to_string())
            .unwrap_err()
            .mentions("rln relay status"));

        // Test case 4: unknown format
        assert!(matches!(
            check_health("starting"),
            Err(Error::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_info_casings() {
        let camel: Info = serde_json::from_value(json!({
            "listenAddresses": ["/ip4/172.18.0.2/tcp/60001/p2p/16Uiu2HAkx"],
            "enrUri": "enr:-abc"
        }))
        .unwrap();
        let snake: Info = serde_json::from_value(json!({
            "listen_addresses": ["/ip4/172.18.0.2/tcp/60001/p2p/16Uiu2HAkx"],
            "enr_uri": "enr:-abc"
        }))
        .unwrap();
        assert_eq!(camel, snake);
    }

    #[test]
    fn test_filter_response() {
        let response: FilterResponse =
            serde_json::from_value(json!({"requestId": "1", "statusDesc": "OK"})).unwrap();
        assert!(response.is_ok());
        let response: FilterResponse =
            serde_json::from_value(json!({"request_id": "", "status_desc": "peer has no subscriptions"}))
                .unwrap();
        assert_eq!(response.request_id, "");
        assert!(!response.is_ok());
    }
}
