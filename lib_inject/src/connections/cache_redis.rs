//! # Redis Cache Clients
//!
//! Cache handles over the `redis` crate. Building a handle never touches the
//! network: up to `pool_size` multiplexed connections are opened on first use
//! and handed out round-robin.
//!
//! Two topologies are supported:
//! - [`StandaloneRedis`]: every command goes to the configured node.
//! - [`ReplicaRedis`]: the configured node is a seed. On first use its
//!   `INFO replication` section is read; writes go to the upstream and reads
//!   are spread over the online replicas.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info};
use redis::aio::ConnectionManager;
use redis::{Client, FromRedisValue, ToRedisArgs};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_DB: i64 = 0;
pub const DEFAULT_POOL_SIZE: usize = 8;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid Redis configuration: {0}")]
    InvalidConfig(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache client '{0}' is closed")]
    Closed(String),

    #[error("Unexpected replication info: {0}")]
    Topology(String),
}

/// Connection parameters of one cache client.
#[derive(Clone, PartialEq, Eq)]
pub struct RedisParams {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    /// Prepended to every key passed to the typed helpers.
    pub key_prefix: String,
    pub pool_size: usize,
}

impl RedisParams {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            db: DEFAULT_DB,
            password: None,
            key_prefix: String::new(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }

    /// The connection URL, password percent-encoded.
    pub fn url(&self) -> Result<Url, CacheError> {
        if self.host.trim().is_empty() {
            return Err(CacheError::InvalidConfig("host is empty".to_string()));
        }
        // IPv6 literals need brackets in a URL
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let mut url = Url::parse(&format!("redis://{}:{}/{}", host, self.port, self.db))
            .map_err(|e| CacheError::InvalidConfig(format!("{}:{}: {}", self.host, self.port, e)))?;
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| CacheError::InvalidConfig(format!("cannot set password for {}", self.host)))?;
        }
        Ok(url)
    }

    fn node(&self) -> NodeAddress {
        NodeAddress { host: self.host.clone(), port: self.port }
    }

    /// Same credentials and database on another node.
    fn for_node(&self, node: &NodeAddress) -> Self {
        Self {
            host: node.host.clone(),
            port: node.port,
            ..self.clone()
        }
    }

    fn client(&self) -> Result<Client, CacheError> {
        Ok(Client::open(self.url()?.as_str())?)
    }
}

impl fmt::Debug for RedisParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "*****"))
            .field("key_prefix", &self.key_prefix)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// A fixed number of lazily opened connections to one node.
struct ConnectionSlots {
    node: NodeAddress,
    client: Client,
    slots: Vec<Mutex<Option<ConnectionManager>>>,
    next: AtomicUsize,
}

impl ConnectionSlots {
    fn new(client: Client, node: NodeAddress, size: usize) -> Self {
        Self {
            node,
            client,
            slots: (0..size.max(1)).map(|_| Mutex::new(None)).collect(),
            next: AtomicUsize::new(0),
        }
    }

    async fn get(&self) -> Result<ConnectionManager, CacheError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut slot = self.slots[index].lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }
        debug!("Opening Redis connection {} to {}:{}", index, self.node.host, self.node.port);
        let connection = ConnectionManager::new(self.client.clone()).await?;
        *slot = Some(connection.clone());
        Ok(connection)
    }

    async fn close(&self) {
        for slot in &self.slots {
            slot.lock().await.take();
        }
    }
}

/// Host and port of a node in a replication group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

/// What `INFO replication` says about the node it was sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationRole {
    /// An upstream node and its online replicas.
    Master { replicas: Vec<NodeAddress> },
    /// A replica of `master`.
    Replica { master: NodeAddress },
}

/// Parses the `replication` section of `INFO`.
pub fn parse_replication_info(info: &str) -> Result<ReplicationRole, CacheError> {
    let mut role = None;
    let mut master_host = None;
    let mut master_port = None;
    let mut replicas = Vec::new();

    for line in info.lines().map(str::trim) {
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        match field {
            "role" => role = Some(value.to_string()),
            "master_host" => master_host = Some(value.to_string()),
            "master_port" => master_port = value.parse::<u16>().ok(),
            _ if field.starts_with("slave") && field[5..].chars().all(|c| c.is_ascii_digit()) => {
                if let Some(node) = parse_replica_entry(value) {
                    replicas.push(node);
                }
            }
            _ => {}
        }
    }

    match role.as_deref() {
        Some("master") => Ok(ReplicationRole::Master { replicas }),
        Some("slave") | Some("replica") => match (master_host, master_port) {
            (Some(host), Some(port)) => Ok(ReplicationRole::Replica { master: NodeAddress { host, port } }),
            _ => Err(CacheError::Topology("replica without master_host/master_port".to_string())),
        },
        Some(other) => Err(CacheError::Topology(format!("unknown role '{}'", other))),
        None => Err(CacheError::Topology("missing role".to_string())),
    }
}

// ip=10.0.0.2,port=6379,state=online,offset=42,lag=0
fn parse_replica_entry(value: &str) -> Option<NodeAddress> {
    let mut host = None;
    let mut port = None;
    let mut online = false;
    for pair in value.split(',') {
        match pair.split_once('=') {
            Some(("ip", v)) => host = Some(v.to_string()),
            Some(("port", v)) => port = v.parse::<u16>().ok(),
            Some(("state", v)) => online = v == "online",
            _ => {}
        }
    }
    match (host, port, online) {
        (Some(host), Some(port), true) => Some(NodeAddress { host, port }),
        _ => None,
    }
}

/// A cache client talking to a single node.
pub struct StandaloneRedis {
    name: String,
    params: RedisParams,
    connections: ConnectionSlots,
    closed: AtomicBool,
}

impl StandaloneRedis {
    /// Builds the client without connecting.
    pub fn new(name: impl Into<String>, params: RedisParams) -> Result<Self, CacheError> {
        let client = params.client()?;
        Ok(Self {
            name: name.into(),
            connections: ConnectionSlots::new(client, params.node(), params.pool_size),
            params,
            closed: AtomicBool::new(false),
        })
    }

    pub async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed(self.name.clone()));
        }
        self.connections.get().await
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.connections.close().await;
    }
}

struct Topology {
    /// Set when the seed turned out to be a replica.
    upstream: Option<ConnectionSlots>,
    readers: Vec<ConnectionSlots>,
    next_reader: AtomicUsize,
}

impl Topology {
    /// The upstream node, which is the seed itself unless the seed is a replica.
    fn writer<'a>(&'a self, seed: &'a ConnectionSlots) -> &'a ConnectionSlots {
        self.upstream.as_ref().unwrap_or(seed)
    }

    /// The next replica in turn, or the seed when there is none.
    fn reader<'a>(&'a self, seed: &'a ConnectionSlots) -> &'a ConnectionSlots {
        if self.readers.is_empty() {
            return seed;
        }
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        &self.readers[index]
    }
}

/// A cache client that writes to the upstream node and reads from replicas.
pub struct ReplicaRedis {
    name: String,
    params: RedisParams,
    seed: ConnectionSlots,
    topology: Mutex<Option<Arc<Topology>>>,
    closed: AtomicBool,
}

impl ReplicaRedis {
    /// Builds the client without connecting; the topology is discovered on first use.
    pub fn new(name: impl Into<String>, params: RedisParams) -> Result<Self, CacheError> {
        let client = params.client()?;
        Ok(Self {
            name: name.into(),
            seed: ConnectionSlots::new(client, params.node(), params.pool_size),
            params,
            topology: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// A connection to the upstream node.
    pub async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let topology = self.topology().await?;
        topology.writer(&self.seed).get().await
    }

    /// A connection to a replica, or to the seed when there is none.
    pub async fn read_connection(&self) -> Result<ConnectionManager, CacheError> {
        let topology = self.topology().await?;
        topology.reader(&self.seed).get().await
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.seed.close().await;
        if let Some(topology) = self.topology.lock().await.take() {
            if let Some(upstream) = &topology.upstream {
                upstream.close().await;
            }
            for reader in &topology.readers {
                reader.close().await;
            }
        }
    }

    async fn topology(&self) -> Result<Arc<Topology>, CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed(self.name.clone()));
        }

        let mut guard = self.topology.lock().await;
        // close() may have run while we waited for the lock
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed(self.name.clone()));
        }
        if let Some(topology) = guard.as_ref() {
            return Ok(Arc::clone(topology));
        }

        let mut connection = self.seed.get().await?;
        let info: String = redis::cmd("INFO").arg("replication").query_async(&mut connection).await?;
        let topology = Arc::new(self.build_topology(parse_replication_info(&info)?)?);
        info!(
            "Redis '{}' topology: {} replica(s), seed is {}",
            self.name,
            topology.readers.len(),
            if topology.upstream.is_some() { "a replica" } else { "the upstream" }
        );
        *guard = Some(Arc::clone(&topology));
        Ok(topology)
    }

    fn build_topology(&self, role: ReplicationRole) -> Result<Topology, CacheError> {
        let slots = |node: &NodeAddress| -> Result<ConnectionSlots, CacheError> {
            debug!("Redis '{}' node {}:{}", self.name, node.host, node.port);
            Ok(ConnectionSlots::new(self.params.for_node(node).client()?, node.clone(), self.params.pool_size))
        };
        Ok(match role {
            ReplicationRole::Master { replicas } => Topology {
                upstream: None,
                readers: replicas.iter().map(slots).collect::<Result<_, _>>()?,
                next_reader: AtomicUsize::new(0),
            },
            ReplicationRole::Replica { master } => Topology {
                upstream: Some(slots(&master)?),
                readers: Vec::new(),
                next_reader: AtomicUsize::new(0),
            },
        })
    }
}

/// A registered cache client of either topology.
pub enum RedisClient {
    Standalone(StandaloneRedis),
    Replica(ReplicaRedis),
}

impl RedisClient {
    pub fn name(&self) -> &str {
        match self {
            Self::Standalone(redis) => &redis.name,
            Self::Replica(redis) => &redis.name,
        }
    }

    pub fn params(&self) -> &RedisParams {
        match self {
            Self::Standalone(redis) => &redis.params,
            Self::Replica(redis) => &redis.params,
        }
    }

    /// `key` with the configured prefix in front.
    pub fn key(&self, key: &str) -> String {
        format!("{}{}", self.params().key_prefix, key)
    }

    /// A connection for writes (or anything that must hit the upstream).
    pub async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        match self {
            Self::Standalone(redis) => redis.connection().await,
            Self::Replica(redis) => redis.connection().await,
        }
    }

    /// A connection for reads.
    pub async fn read_connection(&self) -> Result<ConnectionManager, CacheError> {
        match self {
            Self::Standalone(redis) => redis.connection().await,
            Self::Replica(redis) => redis.read_connection().await,
        }
    }

    pub async fn get<V: FromRedisValue>(&self, key: &str) -> Result<Option<V>, CacheError> {
        let mut connection = self.read_connection().await?;
        Ok(redis::cmd("GET").arg(self.key(key)).query_async(&mut connection).await?)
    }

    pub async fn set<V: ToRedisArgs>(&self, key: &str, value: V) -> Result<(), CacheError> {
        let mut connection = self.connection().await?;
        let _: () = redis::cmd("SET").arg(self.key(key)).arg(value).query_async(&mut connection).await?;
        Ok(())
    }

    pub async fn set_ex<V: ToRedisArgs>(&self, key: &str, value: V, seconds: u64) -> Result<(), CacheError> {
        let mut connection = self.connection().await?;
        let _: () = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("EX")
            .arg(seconds)
            .query_async(&mut connection)
            .await?;
        Ok(())
    }

    /// Returns `true` when the key existed.
    pub async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let mut connection = self.connection().await?;
        let removed: i64 = redis::cmd("DEL").arg(self.key(key)).query_async(&mut connection).await?;
        Ok(removed > 0)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut connection = self.read_connection().await?;
        let found: i64 = redis::cmd("EXISTS").arg(self.key(key)).query_async(&mut connection).await?;
        Ok(found > 0)
    }

    /// Returns `true` when a timeout was set.
    pub async fn expire(&self, key: &str, seconds: i64) -> Result<bool, CacheError> {
        let mut connection = self.connection().await?;
        let applied: i64 = redis::cmd("EXPIRE").arg(self.key(key)).arg(seconds).query_async(&mut connection).await?;
        Ok(applied > 0)
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut connection = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(())
    }

    /// Drops every open connection; later commands fail with [`CacheError::Closed`].
    pub async fn close(&self) {
        match self {
            Self::Standalone(redis) => redis.close().await,
            Self::Replica(redis) => redis.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Self::Standalone(redis) => redis.closed.load(Ordering::Acquire),
            Self::Replica(redis) => redis.closed.load(Ordering::Acquire),
        }
    }
}

impl fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Standalone(_) => "Standalone",
            Self::Replica(_) => "Replica",
        };
        f.debug_struct("RedisClient")
            .field("kind", &kind)
            .field("name", &self.name())
            .field("params", self.params())
            .finish()
    }
}
