//! Shared container network and the addresses handed out on it.
//!
//! Every node joins one bridge network at a fixed IP and publishes five
//! consecutive host ports. Tests run in parallel, so both are claimed from a
//! process-wide [AddressPool] and released when the node stops.

use crate::{docker::Docker, Config, Error};
use rand::Rng;
use std::{
    collections::HashSet,
    fmt,
    net::{Ipv4Addr, TcpListener},
    str::FromStr,
    sync::{LazyLock, Mutex, MutexGuard},
};
use tracing::debug;

/// Number of ports claimed per node.
pub const PORTS_PER_NODE: u16 = 5;

/// First port of the dynamic/private range.
pub const DYNAMIC_PORT_START: u16 = 49152;

/// Attempts made before giving up on finding a free port block or IP.
const MAX_DRAWS: usize = 1024;

/// An IPv4 network in CIDR notation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cidr {
    network: u32,
    prefix: u8,
}

impl Cidr {
    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix)
        }
    }

    /// Network address.
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    /// Broadcast address.
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network | !self.mask())
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask() == self.network
    }

    /// Whether every address of `other` is inside `self`.
    pub fn covers(&self, other: &Cidr) -> bool {
        self.prefix <= other.prefix && self.contains(other.network())
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidConfig(format!("invalid cidr: {s}"));
        let (ip, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let ip: Ipv4Addr = ip.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        if prefix > 32 {
            return Err(invalid());
        }
        let mut cidr = Cidr { network: 0, prefix };
        cidr.network = u32::from(ip) & cidr.mask();
        Ok(cidr)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix)
    }
}

/// The shared bridge network all nodes join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkTopology {
    pub name: String,
    pub subnet: Cidr,
    /// Sub-range the engine allocates from dynamically.
    pub ip_range: Cidr,
    pub gateway: Ipv4Addr,
}

impl NetworkTopology {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let subnet: Cidr = config.subnet.parse()?;
        let ip_range: Cidr = config.ip_range.parse()?;
        let gateway: Ipv4Addr = config
            .gateway
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid gateway: {}", config.gateway)))?;
        if !subnet.covers(&ip_range) {
            return Err(Error::InvalidConfig(format!(
                "ip range {ip_range} is outside subnet {subnet}"
            )));
        }
        if !subnet.contains(gateway) {
            return Err(Error::InvalidConfig(format!(
                "gateway {gateway} is outside subnet {subnet}"
            )));
        }
        Ok(Self {
            name: config.network_name.clone(),
            subnet,
            ip_range,
            gateway,
        })
    }

    /// Create the network unless it already exists.
    ///
    /// Safe to call concurrently: losing a creation race counts as success.
    pub async fn ensure(&self, docker: &Docker) -> Result<(), Error> {
        debug!(network = self.name, "attempting to create or retrieve network");
        if docker.network_exists(&self.name).await? {
            debug!(network = self.name, "network already exists");
            return Ok(());
        }
        match docker.create_network(self).await {
            Ok(()) => {
                debug!(network = self.name, subnet = %self.subnet, "network created");
                Ok(())
            }
            Err(err) if err.mentions("already exists") => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Whether `ip` may be handed to a node as a static address.
    ///
    /// Excludes the network and broadcast addresses, the gateway, and (when it is
    /// a strict sub-range) the engine's dynamic range, so static assignments never
    /// collide with containers the engine places itself.
    fn assignable(&self, ip: Ipv4Addr) -> bool {
        let avoid_range = self.ip_range.prefix() > self.subnet.prefix();
        self.subnet.contains(ip)
            && ip != self.subnet.network()
            && ip != self.subnet.broadcast()
            && ip != self.gateway
            && !(avoid_range && self.ip_range.contains(ip))
    }
}

/// Host ports published by one node (bound 1:1 inside the container).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ports {
    pub rest: u16,
    pub tcp: u16,
    pub websocket: u16,
    pub discv5: u16,
    pub metrics: u16,
}

impl Ports {
    /// Five consecutive ports starting at `base`.
    pub fn from_base(base: u16) -> Self {
        Self {
            rest: base,
            tcp: base + 1,
            websocket: base + 2,
            discv5: base + 3,
            metrics: base + 4,
        }
    }

    pub fn all(&self) -> [u16; PORTS_PER_NODE as usize] {
        [self.rest, self.tcp, self.websocket, self.discv5, self.metrics]
    }
}

/// Addresses claimed for one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lease {
    pub ip: Ipv4Addr,
    pub ports: Ports,
}

#[derive(Default)]
struct Claims {
    ports: HashSet<u16>,
    ips: HashSet<Ipv4Addr>,
}

/// Hands out port blocks and static IPs without collisions inside this process.
#[derive(Default)]
pub struct AddressPool {
    claims: Mutex<Claims>,
}

static GLOBAL: LazyLock<AddressPool> = LazyLock::new(AddressPool::default);

impl AddressPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pool shared by every node in this process.
    pub fn global() -> &'static AddressPool {
        &GLOBAL
    }

    fn claims(&self) -> MutexGuard<'_, Claims> {
        self.claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim an IP and a port block.
    ///
    /// With `base` the block starts there; otherwise a random free block in the
    /// dynamic/private range is drawn.
    pub fn lease(&self, topology: &NetworkTopology, base: Option<u16>) -> Result<Lease, Error> {
        let mut claims = self.claims();
        let ports = match base {
            Some(base) => Self::claim_ports_at(&mut claims, base)?,
            None => Self::claim_random_ports(&mut claims)?,
        };
        let ip = match Self::claim_ip(&mut claims, topology) {
            Ok(ip) => ip,
            Err(err) => {
                for port in ports.all() {
                    claims.ports.remove(&port);
                }
                return Err(err);
            }
        };
        debug!(%ip, ?ports, "leased addresses");
        Ok(Lease { ip, ports })
    }

    /// Return a lease to the pool.
    pub fn release(&self, lease: &Lease) {
        let mut claims = self.claims();
        for port in lease.ports.all() {
            claims.ports.remove(&port);
        }
        claims.ips.remove(&lease.ip);
        debug!(ip = %lease.ip, rest_port = lease.ports.rest, "released addresses");
    }

    /// Number of IPs currently claimed.
    pub fn claimed(&self) -> usize {
        self.claims().ips.len()
    }

    fn claim_ports_at(claims: &mut Claims, base: u16) -> Result<Ports, Error> {
        if base.checked_add(PORTS_PER_NODE - 1).is_none() {
            return Err(Error::AddressInUse(format!("port block at {base} overflows")));
        }
        let ports = Ports::from_base(base);
        if ports.all().iter().any(|port| claims.ports.contains(port)) {
            return Err(Error::AddressInUse(format!(
                "port block at {base} is claimed by another node"
            )));
        }
        claims.ports.extend(ports.all());
        Ok(ports)
    }

    fn claim_random_ports(claims: &mut Claims) -> Result<Ports, Error> {
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_DRAWS {
            let base = rng.gen_range(DYNAMIC_PORT_START..=u16::MAX - (PORTS_PER_NODE - 1));
            let ports = Ports::from_base(base);
            if ports.all().iter().any(|port| claims.ports.contains(port)) {
                continue;
            }
            // Skip blocks some other process already listens on
            if !ports.all().iter().all(|port| bindable(*port)) {
                continue;
            }
            claims.ports.extend(ports.all());
            return Ok(ports);
        }
        Err(Error::PoolExhausted("no free port block".into()))
    }

    fn claim_ip(claims: &mut Claims, topology: &NetworkTopology) -> Result<Ipv4Addr, Error> {
        let mut rng = rand::thread_rng();
        let first = u32::from(topology.subnet.network());
        let last = u32::from(topology.subnet.broadcast());
        for _ in 0..MAX_DRAWS {
            let ip = Ipv4Addr::from(rng.gen_range(first..=last));
            if !topology.assignable(ip) || claims.ips.contains(&ip) {
                continue;
            }
            claims.ips.insert(ip);
            return Ok(ip);
        }
        Err(Error::PoolExhausted(format!(
            "no free address in {}",
            topology.subnet
        )))
    }
}

fn bindable(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> NetworkTopology {
        NetworkTopology::from_config(&Config::default()).unwrap()
    }

    #[test]
    fn test_cidr() {
        let subnet: Cidr = "172.18.0.0/16".parse().unwrap();
        assert_eq!(subnet.network(), Ipv4Addr::new(172, 18, 0, 0));
        assert_eq!(subnet.broadcast(), Ipv4Addr::new(172, 18, 255, 255));
        assert!(subnet.contains(Ipv4Addr::new(172, 18, 4, 9)));
        assert!(!subnet.contains(Ipv4Addr::new(172, 19, 0, 1)));
        assert_eq!(subnet.to_string(), "172.18.0.0/16");

        // Host bits are masked off
        let range: Cidr = "172.18.0.7/24".parse().unwrap();
        assert_eq!(range.network(), Ipv4Addr::new(172, 18, 0, 0));
        assert!(subnet.covers(&range));
        assert!(!range.covers(&subnet));

        assert!("172.18.0.0".parse::<Cidr>().is_err());
        assert!("172.18.0.0/33".parse::<Cidr>().is_err());
        assert!("waku/16".parse::<Cidr>().is_err());
    }

    #[test]
    fn test_topology_validation() {
        let mut config = Config::default();
        config.ip_range = "10.0.0.0/24".into();
        assert!(matches!(
            NetworkTopology::from_config(&config),
            Err(Error::InvalidConfig(_))
        ));

        let mut config = Config::default();
        config.gateway = "10.0.0.1".into();
        assert!(NetworkTopology::from_config(&config).is_err());
    }

    #[test]
    fn test_ports_from_base() {
        let ports = Ports::from_base(50000);
        assert_eq!(ports.all(), [50000, 50001, 50002, 50003, 50004]);
        assert_eq!(ports.rest, 50000);
        assert_eq!(ports.metrics, 50004);
    }

    #[test]
    fn test_leases_are_unique_and_valid() {
        let pool = AddressPool::new();
        let topology = topology();
        let mut ips = HashSet::new();
        let mut ports = HashSet::new();
        for _ in 0..50 {
            let lease = pool.lease(&topology, None).unwrap();
            assert!(topology.subnet.contains(lease.ip));
            assert!(!topology.ip_range.contains(lease.ip));
            assert_ne!(lease.ip, topology.gateway);
            assert!(lease.ports.rest >= DYNAMIC_PORT_START);
            assert!(ips.insert(lease.ip));
            for port in lease.ports.all() {
                assert!(ports.insert(port));
            }
        }
        assert_eq!(pool.claimed(), 50);
    }

    #[test]
    fn test_release_returns_addresses() {
        let pool = AddressPool::new();
        let topology = topology();
        let lease = pool.lease(&topology, Some(60000)).unwrap();
        assert_eq!(lease.ports.rest, 60000);

        // Overlapping block is refused while claimed
        let err = pool.lease(&topology, Some(60002)).unwrap_err();
        assert!(matches!(err, Error::AddressInUse(_)));

        pool.release(&lease);
        assert_eq!(pool.claimed(), 0);
        let again = pool.lease(&topology, Some(60002)).unwrap();
        assert_eq!(again.ports.rest, 60002);
    }

    #[test]
    fn test_overflowing_base_is_refused() {
        let pool = AddressPool::new();
        let err = pool.lease(&topology(), Some(u16::MAX - 2)).unwrap_err();
        assert!(matches!(err, Error::AddressInUse(_)));
        assert_eq!(pool.claimed(), 0);
    }

    #[test]
    fn test_exhausted_subnet() {
        let mut config = Config::default();
        config.subnet = "10.1.0.0/30".into();
        config.ip_range = "10.1.0.0/30".into();
        config.gateway = "10.1.0.1".into();
        let topology = NetworkTopology::from_config(&config).unwrap();
        let pool = AddressPool::new();

        // A /30 holds exactly one usable address besides the gateway
        let lease = pool.lease(&topology, Some(61000)).unwrap();
        assert_eq!(lease.ip, Ipv4Addr::new(10, 1, 0, 2));
        let err = pool.lease(&topology, Some(61010)).unwrap_err();
        assert!(matches!(err, Error::PoolExhausted(_)));

        // The failed lease did not keep its ports
        pool.release(&lease);
        assert!(pool.lease(&topology, Some(61010)).is_ok());
    }
}
