use super::{Info, RestClient};
use crate::{message::Message, Error};
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Client for the legacy JSON-RPC interface, served on the same port as REST.
#[derive(Clone, Debug)]
pub struct RpcClient {
    rest: RestClient,
}

impl RpcClient {
    pub fn new(port: u16, timeout: Duration) -> Result<Self, Error> {
        Ok(Self {
            rest: RestClient::new(port, timeout)?,
        })
    }

    /// Invoke `method` and return its `result`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        let envelope = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let text = self
            .rest
            .call(Method::POST, self.rest.url("", &[]), Some(envelope.to_string()))
            .await?;
        let mut response: Value = serde_json::from_str(&text)?;
        if let Some(error) = response.get("error").filter(|error| !error.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(Error::Rpc {
                method: method.to_string(),
                message,
            });
        }
        Ok(response
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    pub async fn info(&self) -> Result<Info, Error> {
        let result = self.call("get_waku_v2_debug_v1_info", json!([])).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Subscribe to `topics` using the variant-specific `method`.
    pub async fn set_subscriptions<S: Serialize>(
        &self,
        method: &str,
        topics: &[S],
    ) -> Result<Value, Error> {
        self.call(method, json!([topics])).await
    }

    pub async fn send_message<T: Serialize + ?Sized>(
        &self,
        message: &T,
        pubsub_topic: &str,
    ) -> Result<Value, Error> {
        self.call(
            "post_waku_v2_relay_v1_message",
            json!([pubsub_topic, message]),
        )
        .await
    }

    pub async fn get_messages(&self, pubsub_topic: &str) -> Result<Vec<Message>, Error> {
        let result = self
            .call("get_waku_v2_relay_v1_messages", json!([pubsub_topic]))
            .await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};

    async fn serve() -> RpcClient {
        let router = Router::new().route(
            "/",
            post(|Json(request): Json<Value>| async move {
                assert_eq!(request["jsonrpc"], "2.0");
                let result = match request["method"].as_str().unwrap_or_default() {
                    "get_waku_v2_debug_v1_info" => json!({
                        "listenAddresses": ["/ip4/172.18.0.2/tcp/60001/p2p/16Uiu2HAmX"]
                    }),
                    "post_waku_v2_relay_v1_message" => json!(true),
                    "get_waku_v2_relay_v1_messages" => json!([
                        {"payload": "YQ==", "contentTopic": request["params"][0]}
                    ]),
                    _ => {
                        return Json(json!({
                            "jsonrpc": "2.0",
                            "id": 1,
                            "error": {"code": -32601, "message": "method not found"}
                        }))
                    }
                };
                Json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        RpcClient::new(port, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_rpc_round_trip() {
        let client = serve().await;
        let info = client.info().await.unwrap();
        assert_eq!(info.listen_addresses.len(), 1);

        let message = Message::new("a", "/a/1/b/proto");
        let sent = client.send_message(&message, "/waku/2/rs/3/0").await.unwrap();
        assert_eq!(sent, json!(true));

        let received = client.get_messages("/waku/2/rs/3/0").await.unwrap();
        assert_eq!(received[0].content_topic, "/waku/2/rs/3/0");
    }

    #[tokio::test]
    async fn test_rpc_error() {
        let client = serve().await;
        let err = client
            .set_subscriptions("post_waku_v2_relay_v1_subscription", &["/waku/2/rs/3/0"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rpc { ref message, .. } if message == "method not found"));
    }
}
