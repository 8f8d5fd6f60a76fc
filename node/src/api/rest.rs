use super::{FilterResponse, Info};
use crate::{
    message::Message,
    store::{StoreQuery, StoreResponse},
    Error,
};
use reqwest::{header::CONTENT_TYPE, Client, Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};
use waku_interop_utils::{loggable, Retry};

/// Retry policy for requests that never got a complete answer from the node.
pub const TRANSPORT_RETRY: Retry = Retry::new(Duration::from_secs(2), Duration::from_millis(100));

/// Shell placeholder that regenerates a timestamp when a logged command is replayed.
const TIMESTAMP_PLACEHOLDER: &str = "$(date +%s%N)";

/// Render a request as a `curl` command that can be pasted into a shell.
///
/// Message timestamps are swapped for a shell expansion so the replayed
/// message is not rejected as stale.
pub fn curl_command(method: &Method, url: &Url, body: Option<&str>) -> String {
    let data = body.map(replayable).unwrap_or_default();
    format!(
        r#"curl -v -X {method} "{url}" -H "Content-Type: application/json" -d '{data}'"#
    )
}

fn replayable(body: &str) -> String {
    let Ok(mut value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    let mut replaced = false;
    if let Some(object) = value.as_object_mut() {
        if let Some(timestamp) = object.get_mut("timestamp") {
            *timestamp = Value::from(TIMESTAMP_PLACEHOLDER);
            replaced = true;
        }
        if let Some(timestamp) = object
            .get_mut("message")
            .and_then(Value::as_object_mut)
            .and_then(|message| message.get_mut("timestamp"))
        {
            *timestamp = Value::from(TIMESTAMP_PLACEHOLDER);
            replaced = true;
        }
    }
    if !replaced {
        return body.to_string();
    }
    value
        .to_string()
        .replace(&format!("\"{TIMESTAMP_PLACEHOLDER}\""), TIMESTAMP_PLACEHOLDER)
}

/// Client for a node's REST interface.
#[derive(Clone, Debug)]
pub struct RestClient {
    client: Client,
    base: Url,
    transport: Retry,
}

impl RestClient {
    /// Client for the node listening on `127.0.0.1:port`.
    pub fn new(port: u16, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;
        let base = Url::parse(&format!("http://127.0.0.1:{port}/"))
            .map_err(|err| Error::InvalidConfig(err.to_string()))?;
        Ok(Self {
            client,
            base,
            transport: TRANSPORT_RETRY,
        })
    }

    pub fn with_transport_retry(mut self, transport: Retry) -> Self {
        self.transport = transport;
        self
    }

    pub fn port(&self) -> u16 {
        self.base.port().unwrap_or_default()
    }

    /// Build a URL from a fixed `route` and percent-encoded `params`.
    pub fn url(&self, route: &str, params: &[&str]) -> Url {
        let mut url = self.base.clone();
        if route.is_empty() && params.is_empty() {
            return url;
        }
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(route.split('/').filter(|s| !s.is_empty()))
                .extend(params);
        }
        url
    }

    /// Send a request and return whatever the node answered.
    ///
    /// Connection failures (including a peer that drops the connection before
    /// answering) are retried briefly. Non-success statuses are not errors at
    /// this level.
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
    ) -> Result<(StatusCode, String), Error> {
        info!(
            command = %loggable(&curl_command(&method, &url, body.as_deref())),
            "rest request"
        );
        self.transport
            .run_if(
                || {
                    let mut request = self.client.request(method.clone(), url.clone());
                    if let Some(body) = &body {
                        request = request
                            .header(CONTENT_TYPE, "application/json")
                            .body(body.clone());
                    }
                    async move {
                        let response = request.send().await?;
                        let status = response.status();
                        let text = response.text().await?;
                        Ok::<_, Error>((status, text))
                    }
                },
                Error::is_connection_failure,
            )
            .await
    }

    /// Send a request and fail on any non-success status.
    pub async fn call(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
    ) -> Result<String, Error> {
        let (status, text) = self.send(method.clone(), url.clone(), body).await?;
        if !status.is_success() {
            error!(%status, body = %loggable(&text), "rest request failed");
            return Err(Error::Request {
                method: method.to_string(),
                url: url.to_string(),
                status,
                body: text,
            });
        }
        info!(%status, body = %loggable(&text), "rest response");
        Ok(text)
    }

    async fn call_json<B, T>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = body.map(serde_json::to_string).transpose()?;
        let text = self.call(method, url, body).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn call_with<B>(&self, method: Method, url: Url, body: &B) -> Result<String, Error>
    where
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_string(body)?;
        self.call(method, url, Some(body)).await
    }

    pub async fn info(&self) -> Result<Info, Error> {
        self.call_json::<(), _>(Method::GET, self.url("debug/v1/info", &[]), None)
            .await
    }

    /// Raw `/health` body.
    pub async fn health(&self) -> Result<String, Error> {
        self.call(Method::GET, self.url("health", &[]), None).await
    }

    pub async fn get_peers(&self) -> Result<Vec<Value>, Error> {
        self.call_json::<(), _>(Method::GET, self.url("admin/v1/peers", &[]), None)
            .await
    }

    pub async fn add_peers(&self, body: &Value) -> Result<String, Error> {
        self.call_with(Method::POST, self.url("admin/v1/peers", &[]), body)
            .await
    }

    pub async fn set_relay_subscriptions<S: Serialize>(&self, topics: &[S]) -> Result<String, Error> {
        self.call_with(Method::POST, self.url("relay/v1/subscriptions", &[]), topics)
            .await
    }

    pub async fn delete_relay_subscriptions<S: Serialize>(
        &self,
        topics: &[S],
    ) -> Result<String, Error> {
        self.call_with(Method::DELETE, self.url("relay/v1/subscriptions", &[]), topics)
            .await
    }

    pub async fn set_relay_auto_subscriptions<S: Serialize>(
        &self,
        topics: &[S],
    ) -> Result<String, Error> {
        self.call_with(
            Method::POST,
            self.url("relay/v1/auto/subscriptions", &[]),
            topics,
        )
        .await
    }

    pub async fn delete_relay_auto_subscriptions<S: Serialize>(
        &self,
        topics: &[S],
    ) -> Result<String, Error> {
        self.call_with(
            Method::DELETE,
            self.url("relay/v1/auto/subscriptions", &[]),
            topics,
        )
        .await
    }

    pub async fn send_relay_message<T: Serialize + ?Sized>(
        &self,
        message: &T,
        pubsub_topic: &str,
    ) -> Result<String, Error> {
        self.call_with(
            Method::POST,
            self.url("relay/v1/messages", &[pubsub_topic]),
            message,
        )
        .await
    }

    pub async fn send_relay_auto_message<T: Serialize + ?Sized>(
        &self,
        message: &T,
    ) -> Result<String, Error> {
        self.call_with(Method::POST, self.url("relay/v1/auto/messages", &[]), message)
            .await
    }

    pub async fn get_relay_messages(&self, pubsub_topic: &str) -> Result<Vec<Message>, Error> {
        self.call_json::<(), _>(
            Method::GET,
            self.url("relay/v1/messages", &[pubsub_topic]),
            None,
        )
        .await
    }

    pub async fn get_relay_auto_messages(&self, content_topic: &str) -> Result<Vec<Message>, Error> {
        self.call_json::<(), _>(
            Method::GET,
            self.url("relay/v1/auto/messages", &[content_topic]),
            None,
        )
        .await
    }

    pub async fn send_light_push_message<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<String, Error> {
        self.call_with(Method::POST, self.url("lightpush/v1/message", &[]), body)
            .await
    }

    pub async fn set_filter_subscriptions<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<FilterResponse, Error> {
        self.call_json(
            Method::POST,
            self.url("filter/v2/subscriptions", &[]),
            Some(body),
        )
        .await
    }

    pub async fn update_filter_subscriptions<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<FilterResponse, Error> {
        self.call_json(
            Method::PUT,
            self.url("filter/v2/subscriptions", &[]),
            Some(body),
        )
        .await
    }

    pub async fn delete_filter_subscriptions<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<FilterResponse, Error> {
        self.call_json(
            Method::DELETE,
            self.url("filter/v2/subscriptions", &[]),
            Some(body),
        )
        .await
    }

    pub async fn delete_all_filter_subscriptions<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<FilterResponse, Error> {
        self.call_json(
            Method::DELETE,
            self.url("filter/v2/subscriptions/all", &[]),
            Some(body),
        )
        .await
    }

    pub async fn ping_filter_subscriptions(&self, request_id: &str) -> Result<FilterResponse, Error> {
        self.call_json::<(), _>(
            Method::GET,
            self.url("filter/v2/subscriptions", &[request_id]),
            None,
        )
        .await
    }

    /// Messages collected for a filter subscription, addressed by `path`
    /// (which layout the node expects depends on its variant).
    pub async fn get_filter_messages(&self, path: &[String]) -> Result<Vec<Message>, Error> {
        let params: Vec<&str> = path.iter().map(String::as_str).collect();
        self.call_json::<(), _>(
            Method::GET,
            self.url("filter/v2/messages", &params),
            None,
        )
        .await
    }

    fn store_url(&self, query: &StoreQuery) -> Url {
        let mut url = self.url(&format!("store/{}/messages", query.version.as_str()), &[]);
        let pairs = query.to_pairs();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        url
    }

    /// Status and body of a store query, without interpreting either.
    pub async fn get_store_messages_raw(
        &self,
        query: &StoreQuery,
    ) -> Result<(StatusCode, String), Error> {
        self.send(Method::GET, self.store_url(query), None).await
    }

    pub async fn get_store_messages(&self, query: &StoreQuery) -> Result<StoreResponse, Error> {
        self.call_json::<(), _>(Method::GET, self.store_url(query), None)
            .await
    }

    /// Plain-text body of `route` (used for `/metrics`).
    pub async fn get_text(&self, route: &str) -> Result<String, Error> {
        self.call(Method::GET, self.url(route, &[]), None).await
    }
}
