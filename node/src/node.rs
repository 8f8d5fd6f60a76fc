//! Handle to one containerized node.
//!
//! A [Node] owns everything about a single container: its variant, the addresses
//! it leased, the container itself and the clients talking to it. Lifecycle
//! actions are no-ops on a node without a container, so teardown can always call
//! [Node::stop].

use crate::{
    api::{check_health, FilterResponse, Info, RestClient, RpcClient},
    config::{Config, Protocol},
    docker::{Container, Docker, RunSpec},
    flags::{FlagValue, Flags},
    message::{HashEncoding, Message},
    metrics::Metrics,
    network::{AddressPool, Lease, NetworkTopology, Ports},
    registry::Registry,
    rln::{self, RlnRequest},
    store::{StoreQuery, StoreResponse},
    variant::{self, flavor_for, Capability, Flavor, Variant},
    Error,
};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::{
    io,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tracing::{debug, error, info, warn};
use waku_interop_utils::{delay, Retry};

/// Deadline for the whole start sequence.
pub const START_RETRY: Retry = Retry::new(Duration::from_secs(60), Duration::from_millis(100));

/// Deadline for an RLN registration run.
pub const REGISTER_RETRY: Retry = Retry::new(Duration::from_secs(250), Duration::from_millis(100));

/// Deadline for stopping or killing a container.
pub const STOP_RETRY: Retry = Retry::new(Duration::from_secs(5), Duration::from_millis(100));

/// How long a started node gets to answer its readiness checks.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(20);

const READY_INTERVAL: Duration = Duration::from_millis(100);

/// Requests fired right after launch sometimes break node startup.
const STARTUP_GRACE: Duration = Duration::from_secs(1);

/// Peer database mount used when peer persistence is enabled.
const PEERDB_DIR: &str = "peerdb";
const PEERDB_MOUNT: &str = "/shared";

/// How a node should be started.
#[derive(Clone, Debug)]
pub struct StartOptions {
    /// Flags overriding the variant defaults.
    pub flags: Flags,
    pub ready_timeout: Duration,
    /// Remove the container once it exits.
    pub remove_container: bool,
    /// First of the five host ports; drawn at random when unset.
    pub base_port: Option<u16>,
    /// Start with RLN relay enabled using these credentials.
    pub rln: Option<RlnRequest>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            flags: Flags::new(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            remove_container: true,
            base_port: None,
            rln: None,
        }
    }
}

impl From<Flags> for StartOptions {
    fn from(flags: Flags) -> Self {
        Self {
            flags,
            ..Self::default()
        }
    }
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(mut self, key: &str, value: impl Into<FlagValue>) -> Self {
        self.flags.set(key, value);
        self
    }

    pub fn ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    pub fn keep_container(mut self) -> Self {
        self.remove_container = false;
        self
    }

    pub fn base_port(mut self, base_port: u16) -> Self {
        self.base_port = Some(base_port);
        self
    }

    pub fn rln(mut self, rln: RlnRequest) -> Self {
        self.rln = Some(rln);
        self
    }
}

/// Clients bound to one lease.
struct Endpoint {
    lease: Lease,
    api: RestClient,
    rpc: RpcClient,
    metrics: RestClient,
}

impl Endpoint {
    fn new(lease: Lease, timeout: Duration) -> Result<Self, Error> {
        Ok(Self {
            lease,
            api: RestClient::new(lease.ports.rest, timeout)?,
            rpc: RpcClient::new(lease.ports.rest, timeout)?,
            metrics: RestClient::new(lease.ports.metrics, timeout)?,
        })
    }
}

#[derive(Default)]
struct State {
    container: Option<Container>,
    endpoint: Option<Endpoint>,
    info: Option<Info>,
}

#[derive(Clone, Copy, Debug)]
enum Halt {
    Stop,
    Kill,
}

/// A containerized node and the clients to reach it.
pub struct Node {
    image: String,
    flavor: Arc<dyn Flavor>,
    log_path: PathBuf,
    config: Arc<Config>,
    docker: Docker,
    topology: NetworkTopology,
    pool: &'static AddressPool,
    state: Mutex<State>,
}

impl Node {
    /// Prepare a node for `image`. Nothing is started yet.
    ///
    /// The container log lands in `<log_dir>/<log_prefix>__<image>.log`.
    pub fn new(image: &str, log_prefix: &str, config: Arc<Config>) -> Result<Self, Error> {
        let flavor = flavor_for(image)?;
        let topology = NetworkTopology::from_config(&config)?;
        let log_path = config
            .log_dir
            .join(format!("{log_prefix}__{}.log", image.replace('/', "_")));
        debug!(image, log_path = ?log_path, "node initialized");
        Ok(Self {
            image: image.to_string(),
            flavor,
            log_path,
            config,
            docker: Docker::default(),
            topology,
            pool: AddressPool::global(),
            state: Mutex::new(State::default()),
        })
    }

    pub fn with_docker(mut self, docker: Docker) -> Self {
        self.docker = docker;
        self
    }

    /// Lease addresses from `pool` instead of the process-wide one.
    pub fn with_pool(mut self, pool: &'static AddressPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn variant(&self) -> Variant {
        self.flavor.variant()
    }

    pub fn flavor(&self) -> &dyn Flavor {
        self.flavor.as_ref()
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.flavor.supports(capability)
    }

    pub fn hash_encoding(&self) -> HashEncoding {
        self.flavor.hash_encoding()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn container(&self) -> Option<Container> {
        self.state().container.clone()
    }

    /// Whether a container is attached to this handle.
    pub fn is_started(&self) -> bool {
        self.state().container.is_some()
    }

    fn lease(&self) -> Result<Lease, Error> {
        self.state()
            .endpoint
            .as_ref()
            .map(|endpoint| endpoint.lease)
            .ok_or_else(|| Error::NotRunning(self.image.clone()))
    }

    pub fn external_ip(&self) -> Option<Ipv4Addr> {
        self.lease().ok().map(|lease| lease.ip)
    }

    pub fn ports(&self) -> Option<Ports> {
        self.lease().ok().map(|lease| lease.ports)
    }

    fn api(&self) -> Result<RestClient, Error> {
        self.state()
            .endpoint
            .as_ref()
            .map(|endpoint| endpoint.api.clone())
            .ok_or_else(|| Error::NotRunning(self.image.clone()))
    }

    fn rpc(&self) -> Result<RpcClient, Error> {
        self.state()
            .endpoint
            .as_ref()
            .map(|endpoint| endpoint.rpc.clone())
            .ok_or_else(|| Error::NotRunning(self.image.clone()))
    }

    /// Attach clients for `lease`, releasing it if they cannot be built.
    fn bind(&self, lease: Lease) -> Result<(), Error> {
        match Endpoint::new(lease, self.config.request_timeout()) {
            Ok(endpoint) => {
                self.state().endpoint = Some(endpoint);
                Ok(())
            }
            Err(err) => {
                self.pool.release(&lease);
                Err(err)
            }
        }
    }

    fn require(&self, capability: Capability, operation: &'static str) -> Result<(), Error> {
        if self.flavor.supports(capability) {
            Ok(())
        } else {
            Err(Error::Unsupported {
                variant: self.flavor.variant(),
                operation,
            })
        }
    }

    /// Start the container and wait until it answers.
    ///
    /// The node joins `registry` as soon as its container exists, so teardown
    /// reaches it even if readiness never comes. Failed attempts remove their
    /// container and release their addresses before the next one. Setup errors
    /// are returned immediately.
    pub async fn start(
        self: &Arc<Self>,
        registry: &Registry,
        options: StartOptions,
    ) -> Result<(), Error> {
        if self.is_started() {
            return Err(Error::Fixture(format!("{} is already started", self.image)));
        }
        debug!(image = self.image, "starting node");
        let options = &options;
        START_RETRY
            .run_if(
                || self.start_once(registry, options),
                |err: &Error| !err.is_setup(),
            )
            .await
    }

    async fn start_once(
        self: &Arc<Self>,
        registry: &Registry,
        options: &StartOptions,
    ) -> Result<(), Error> {
        // Resolve everything that does not depend on the lease
        let mut overrides = options.flags.clone();
        let mut volumes = Vec::new();
        self.apply_peer_persistence(&mut overrides, &mut volumes)
            .await?;
        overrides.resolve_cluster_id()?;
        let rln = match &options.rln {
            Some(request) => {
                rln::prepare(self.flavor.as_ref(), request, &self.config.rln_dir, false)?
            }
            None => None,
        };

        // Claim addresses on the shared network
        self.topology.ensure(&self.docker).await?;
        let lease = self.pool.lease(&self.topology, options.base_port)?;
        self.bind(lease)?;

        // Assemble the invocation
        let mut flags = self.flavor.default_flags(lease.ip, &lease.ports);
        flags.merge(overrides);
        match rln {
            Some(setup) => {
                if let Err(err) = rln::wait_for_keystore(&setup.keystore).await {
                    self.discard().await;
                    return Err(err);
                }
                flags.merge(setup.flags);
                volumes.extend(setup.volumes);
            }
            None => info!("rln credentials not set, starting without rln"),
        }
        debug!(?volumes, "using volumes");
        let spec = RunSpec {
            image: self.image.clone(),
            network: self.topology.name.clone(),
            ip: lease.ip,
            ports: lease.ports.all().to_vec(),
            volumes,
            args: flags.to_args(),
            remove: options.remove_container,
        };

        // Launch
        let result = self.launch(registry, &spec, options.ready_timeout).await;
        if let Err(err) = &result {
            warn!(image = self.image, ?err, "start attempt failed");
            self.discard().await;
        }
        result
    }

    async fn launch(
        self: &Arc<Self>,
        registry: &Registry,
        spec: &RunSpec,
        ready_timeout: Duration,
    ) -> Result<(), Error> {
        let container = self.docker.run(spec).await?;
        self.docker.drain_logs(&container, self.log_path.clone());
        info!(
            image = self.image,
            container = container.short_id(),
            ip = %spec.ip,
            rest_port = spec.ports.first().copied().unwrap_or_default(),
            "started container"
        );
        self.state().container = Some(container);
        registry.register(Arc::clone(self));

        delay(STARTUP_GRACE).await;
        self.ensure_ready(ready_timeout).await.inspect_err(|err| {
            error!(image = self.image, ?err, "rest service did not become ready in time");
        })
    }

    /// Map `peer-persistence=true` to the variant's flag and mount a fresh peer
    /// database directory.
    async fn apply_peer_persistence(
        &self,
        flags: &mut Flags,
        volumes: &mut Vec<String>,
    ) -> Result<(), Error> {
        if !variant::enabled(flags.get("peer-persistence")) {
            return Ok(());
        }
        flags.rename("peer-persistence", self.flavor.peer_persistence_flag());
        let dir = std::env::current_dir()?.join(PEERDB_DIR);
        volumes.push(format!("{}:{PEERDB_MOUNT}", dir.display()));
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove whatever a failed attempt left behind.
    async fn discard(&self) {
        let (container, endpoint) = {
            let mut state = self.state();
            state.info = None;
            (state.container.take(), state.endpoint.take())
        };
        if let Some(container) = container {
            if let Err(err) = self.docker.force_remove(&container).await {
                warn!(container = container.short_id(), ?err, "failed to remove container");
            }
        }
        if let Some(endpoint) = endpoint {
            self.pool.release(&endpoint.lease);
        }
    }

    /// Wait for the node to answer, gating on `/health` where the variant
    /// reports protocol readiness there.
    pub async fn ensure_ready(&self, timeout: Duration) -> Result<(), Error> {
        let policy = Retry::new(timeout, READY_INTERVAL);
        let api = self.api()?;
        if self.flavor.requires_health_gate() {
            policy
                .run(|| async { check_health(&api.health().await?) })
                .await?;
            info!(image = self.image, "node is healthy");
        }
        let info = policy.run(|| api.info()).await?;
        info!(image = self.image, "rest service is ready");
        self.state().info = Some(info);
        Ok(())
    }

    /// Run the one-shot keystore generation for `request`.
    ///
    /// The registration container is removed once the keystore exists. The node
    /// is not registered for teardown and can be started afterwards.
    pub async fn register_rln(&self, request: &RlnRequest) -> Result<(), Error> {
        debug!(image = self.image, id = request.id, "registering rln credentials");
        REGISTER_RETRY
            .run_if(|| self.register_once(request), |err: &Error| !err.is_setup())
            .await
    }

    async fn register_once(&self, request: &RlnRequest) -> Result<(), Error> {
        let Some(setup) = rln::prepare(self.flavor.as_ref(), request, &self.config.rln_dir, true)?
        else {
            warn!("rln credentials not set, no action performed");
            return Ok(());
        };
        self.topology.ensure(&self.docker).await?;
        let lease = self.pool.lease(&self.topology, None)?;
        self.bind(lease)?;

        let rln::Setup {
            flags,
            volumes,
            keystore,
        } = setup;
        let spec = RunSpec {
            image: self.image.clone(),
            network: self.topology.name.clone(),
            ip: lease.ip,
            ports: lease.ports.all().to_vec(),
            volumes,
            args: flags.to_args(),
            remove: true,
        };
        let result = async {
            let container = self.docker.run(&spec).await?;
            self.docker.drain_logs(&container, self.log_path.clone());
            debug!(container = container.short_id(), "started registration container");
            self.state().container = Some(container);
            debug!(keystore = ?keystore, "waiting for keystore");
            rln::wait_for_keystore(&keystore).await
        }
        .await;
        if let Err(err) = &result {
            error!(keystore = ?keystore, ?err, "keystore did not become available in time");
        }
        self.discard().await;
        result
    }

    /// Stop the container. A no-op without one.
    pub async fn stop(&self) -> Result<(), Error> {
        self.halt(Halt::Stop).await
    }

    /// Kill the container. A no-op without one.
    pub async fn kill(&self) -> Result<(), Error> {
        self.halt(Halt::Kill).await
    }

    async fn halt(&self, halt: Halt) -> Result<(), Error> {
        let Some(container) = self.container() else {
            return Ok(());
        };
        debug!(container = container.short_id(), ?halt, "halting container");
        STOP_RETRY
            .run(|| async {
                match halt {
                    Halt::Stop => self.docker.stop(&container).await,
                    Halt::Kill => self.docker.kill(&container).await,
                }
            })
            .await?;
        if let Err(err) = self.docker.remove(&container).await {
            debug!(container = container.short_id(), ?err, "container not removed");
        }
        let endpoint = {
            let mut state = self.state();
            state.container = None;
            state.info = None;
            state.endpoint.take()
        };
        if let Some(endpoint) = endpoint {
            self.pool.release(&endpoint.lease);
        }
        debug!(container = container.short_id(), ?halt, "container halted");
        Ok(())
    }

    pub async fn restart(&self) -> Result<(), Error> {
        let Some(container) = self.container() else {
            return Ok(());
        };
        debug!(container = container.short_id(), "restarting container");
        self.docker.restart(&container).await
    }

    pub async fn pause(&self) -> Result<(), Error> {
        let Some(container) = self.container() else {
            return Ok(());
        };
        debug!(container = container.short_id(), "pausing container");
        self.docker.pause(&container).await
    }

    pub async fn unpause(&self) -> Result<(), Error> {
        let Some(container) = self.container() else {
            return Ok(());
        };
        debug!(container = container.short_id(), "unpausing container");
        self.docker.unpause(&container).await
    }

    /// Whether the container exists and is running.
    pub async fn is_running(&self) -> Result<bool, Error> {
        let Some(container) = self.container() else {
            return Ok(false);
        };
        Ok(self.docker.status(&container).await?.as_deref() == Some("running"))
    }

    /// Remove the container without an async runtime and release its addresses.
    pub fn force_remove_blocking(&self) {
        let (container, endpoint) = {
            let mut state = self.state();
            (state.container.take(), state.endpoint.take())
        };
        if let Some(container) = container {
            self.docker.remove_blocking(&container);
        }
        if let Some(endpoint) = endpoint {
            self.pool.release(&endpoint.lease);
        }
    }

    fn ready_info(&self) -> Result<Info, Error> {
        self.state()
            .info
            .clone()
            .ok_or_else(|| Error::NotRunning(self.image.clone()))
    }

    /// Peer id, taken from the first listen address.
    pub fn id(&self) -> Result<String, Error> {
        let info = self.ready_info()?;
        info.listen_addresses
            .first()
            .and_then(|address| address.rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::UnexpectedResponse("could not find id in the info response".into()))
    }

    pub fn enr_uri(&self) -> Result<String, Error> {
        self.ready_info()?
            .enr_uri
            .ok_or_else(|| Error::UnexpectedResponse("could not find enrUri in the info response".into()))
    }

    /// Dialable multiaddr through the external IP and published TCP port.
    pub fn multiaddr_with_id(&self) -> Result<String, Error> {
        let info = self.ready_info()?;
        let lease = self.lease()?;
        let address = info
            .listen_addresses
            .iter()
            .find(|address| !address.contains("/ws"))
            .ok_or_else(|| Error::UnexpectedResponse("no non-websocket listen address found".into()))?;
        let id = address.split("/p2p/").last().unwrap_or(address.as_str());
        Ok(format!(
            "/ip4/{}/tcp/{}/p2p/{id}",
            lease.ip, lease.ports.tcp
        ))
    }

    pub async fn info(&self) -> Result<Info, Error> {
        match self.config.protocol {
            Protocol::Rest => self.api()?.info().await,
            Protocol::Rpc => self.rpc()?.info().await,
        }
    }

    pub async fn health(&self) -> Result<String, Error> {
        self.api()?.health().await
    }

    pub async fn get_peers(&self) -> Result<Vec<Value>, Error> {
        self.api()?.get_peers().await
    }

    /// Multiaddrs of connected peers, whatever shape the variant lists them in.
    pub async fn get_peer_multiaddrs(&self) -> Result<Vec<String>, Error> {
        let peers = self.get_peers().await?;
        Ok(peers
            .iter()
            .filter_map(|peer| self.flavor.peer_multiaddr(peer))
            .collect())
    }

    pub async fn add_peers(&self, body: &Value) -> Result<String, Error> {
        self.api()?.add_peers(body).await
    }

    /// Add a relay peer on `shards`.
    pub async fn add_peer(&self, multiaddr: &str, shards: &[u16]) -> Result<String, Error> {
        let body = self.flavor.add_peer_body(multiaddr, shards);
        self.add_peers(&body).await
    }

    /// Subscribe to `topics` over the configured protocol.
    pub async fn set_relay_subscriptions<S: Serialize>(&self, topics: &[S]) -> Result<String, Error> {
        match self.config.protocol {
            Protocol::Rest => self.api()?.set_relay_subscriptions(topics).await,
            Protocol::Rpc => Ok(self
                .rpc()?
                .set_subscriptions(self.flavor.relay_subscribe_method(), topics)
                .await?
                .to_string()),
        }
    }

    pub async fn delete_relay_subscriptions<S: Serialize>(
        &self,
        topics: &[S],
    ) -> Result<String, Error> {
        self.api()?.delete_relay_subscriptions(topics).await
    }

    pub async fn set_relay_auto_subscriptions<S: Serialize>(
        &self,
        topics: &[S],
    ) -> Result<String, Error> {
        self.api()?.set_relay_auto_subscriptions(topics).await
    }

    pub async fn delete_relay_auto_subscriptions<S: Serialize>(
        &self,
        topics: &[S],
    ) -> Result<String, Error> {
        self.api()?.delete_relay_auto_subscriptions(topics).await
    }

    pub async fn send_relay_message<T: Serialize + ?Sized>(
        &self,
        message: &T,
        pubsub_topic: &str,
    ) -> Result<String, Error> {
        match self.config.protocol {
            Protocol::Rest => self.api()?.send_relay_message(message, pubsub_topic).await,
            Protocol::Rpc => Ok(self
                .rpc()?
                .send_message(message, pubsub_topic)
                .await?
                .to_string()),
        }
    }

    pub async fn send_relay_auto_message<T: Serialize + ?Sized>(
        &self,
        message: &T,
    ) -> Result<String, Error> {
        self.api()?.send_relay_auto_message(message).await
    }

    pub async fn get_relay_messages(
        &self,
        pubsub_topic: &str,
    ) -> Result<Vec<Message>, Error> {
        match self.config.protocol {
            Protocol::Rest => self.api()?.get_relay_messages(pubsub_topic).await,
            Protocol::Rpc => self.rpc()?.get_messages(pubsub_topic).await,
        }
    }

    pub async fn get_relay_auto_messages(
        &self,
        content_topic: &str,
    ) -> Result<Vec<Message>, Error> {
        self.api()?.get_relay_auto_messages(content_topic).await
    }

    pub async fn send_light_push_message<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<String, Error> {
        self.api()?.send_light_push_message(body).await
    }

    pub async fn set_filter_subscriptions<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<FilterResponse, Error> {
        self.api()?.set_filter_subscriptions(body).await
    }

    pub async fn update_filter_subscriptions<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<FilterResponse, Error> {
        self.require(Capability::FilterUpdate, "filter subscription update")?;
        self.api()?.update_filter_subscriptions(body).await
    }

    pub async fn delete_filter_subscriptions<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<FilterResponse, Error> {
        self.api()?.delete_filter_subscriptions(body).await
    }

    pub async fn delete_all_filter_subscriptions<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> Result<FilterResponse, Error> {
        self.api()?.delete_all_filter_subscriptions(body).await
    }

    pub async fn ping_filter_subscriptions(&self, request_id: &str) -> Result<FilterResponse, Error> {
        self.api()?.ping_filter_subscriptions(request_id).await
    }

    pub async fn get_filter_messages(
        &self,
        content_topic: &str,
        pubsub_topic: Option<&str>,
    ) -> Result<Vec<Message>, Error> {
        let path = self
            .flavor
            .filter_messages_path(content_topic, pubsub_topic)?;
        self.api()?.get_filter_messages(&path).await
    }

    pub async fn get_store_messages(&self, query: &StoreQuery) -> Result<StoreResponse, Error> {
        self.api()?.get_store_messages(query).await
    }

    /// Status and body of a store query, for checks that expect a rejection.
    pub async fn get_store_messages_raw(
        &self,
        query: &StoreQuery,
    ) -> Result<(StatusCode, String), Error> {
        self.api()?.get_store_messages_raw(query).await
    }

    /// Raw `/metrics` text from the metrics port.
    pub async fn get_metrics(&self) -> Result<String, Error> {
        self.require(Capability::Metrics, "metrics")?;
        let metrics = self
            .state()
            .endpoint
            .as_ref()
            .map(|endpoint| endpoint.metrics.clone())
            .ok_or_else(|| Error::NotRunning(self.image.clone()))?;
        metrics.get_text("metrics").await
    }

    pub async fn metrics(&self) -> Result<Metrics, Error> {
        Ok(Metrics::parse(&self.get_metrics().await?))
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("image", &self.image)
            .field("variant", &self.flavor.variant())
            .field("log_path", &self.log_path)
            .finish()
    }
}
