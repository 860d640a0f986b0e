//! Typed client for the Redis Cluster admin surface
//!
//! Provides `TopologyClient`, which speaks the data-plane admin commands
//! directly (CLUSTER NODES/INFO/FORGET/MEET/REPLICATE/RESET, CONFIG SET,
//! FLUSHALL) and parses node listings into typed results in-process.
//!
//! The two long-running operations, slot resharding and cluster fix, are not
//! executed here: the reconciler resolves node ids and slot counts through
//! this client and hands the fully-resolved parameters to a one-shot Job
//! (see `resources::job`).

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Fixed size of the hash-slot space.
pub const SLOT_SPACE: u32 = 16384;

/// Data-plane port served by every pod.
pub const REDIS_PORT: u16 = 6379;

/// Deadline applied to every individual admin command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the topology client
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Redis command error: {0}")]
    Command(#[from] redis::RedisError),

    #[error("admin command timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed CLUSTER NODES line: {0}")]
    Parse(String),

    #[error("no cluster node found at {0}")]
    NodeNotFound(String),
}

pub type Result<T, E = TopologyError> = std::result::Result<T, E>;

/// Role of a cluster member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Primary,
    Replica,
}

/// One entry of the cluster membership table
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// 40-character node id
    pub id: String,
    /// `ip:port` as advertised by the node
    pub addr: String,
    pub role: NodeRole,
    /// Primary this node replicates, if it is a replica
    pub primary_id: Option<String>,
    /// Link state as reported by the queried node
    pub connected: bool,
    /// Marked fail/fail?/noaddr by the cluster
    pub failed: bool,
    /// Assigned slot ranges, inclusive on both ends
    pub slot_ranges: Vec<(u32, u32)>,
}

impl NodeInfo {
    pub fn ip(&self) -> &str {
        self.addr.split(':').next().unwrap_or(&self.addr)
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_ranges.iter().map(|(lo, hi)| hi - lo + 1).sum()
    }

    pub fn is_healthy(&self) -> bool {
        self.connected && !self.failed
    }

    pub fn is_healthy_primary(&self) -> bool {
        self.role == NodeRole::Primary && self.is_healthy()
    }
}

/// Parse the output of `CLUSTER NODES` into typed entries.
///
/// Line shape: `<id> <ip:port@cport> <flags> <primary> <ping> <pong> <epoch>
/// <link-state> [<slot> | <lo>-<hi> | [<slot>-<-id>] ...]`. Bracketed entries
/// describe an in-flight migration and do not count as assigned slots.
pub fn parse_cluster_nodes(raw: &str) -> Result<Vec<NodeInfo>> {
    let mut nodes = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            return Err(TopologyError::Parse(line.to_string()));
        }

        let id = fields[0].to_string();
        let addr = fields[1]
            .split('@')
            .next()
            .unwrap_or(fields[1])
            .to_string();
        let flags: Vec<&str> = fields[2].split(',').collect();

        let role = if flags.contains(&"master") {
            NodeRole::Primary
        } else {
            NodeRole::Replica
        };
        let failed = flags
            .iter()
            .any(|f| matches!(*f, "fail" | "fail?" | "noaddr" | "handshake"));
        let primary_id = match fields[3] {
            "-" => None,
            other => Some(other.to_string()),
        };
        let connected = fields[7] == "connected";

        let mut slot_ranges = Vec::new();
        for slot in &fields[8..] {
            if slot.starts_with('[') {
                // migrating/importing marker, not an assignment
                continue;
            }
            let range = match slot.split_once('-') {
                Some((lo, hi)) => {
                    let lo = lo
                        .parse()
                        .map_err(|_| TopologyError::Parse(line.to_string()))?;
                    let hi = hi
                        .parse()
                        .map_err(|_| TopologyError::Parse(line.to_string()))?;
                    (lo, hi)
                }
                None => {
                    let s = slot
                        .parse()
                        .map_err(|_| TopologyError::Parse(line.to_string()))?;
                    (s, s)
                }
            };
            slot_ranges.push(range);
        }

        nodes.push(NodeInfo {
            id,
            addr,
            role,
            primary_id,
            connected,
            failed,
            slot_ranges,
        });
    }

    Ok(nodes)
}

/// Healthy primaries currently holding zero slots.
pub fn zero_slot_primaries(nodes: &[NodeInfo]) -> Vec<&NodeInfo> {
    nodes
        .iter()
        .filter(|n| n.is_healthy_primary() && n.slot_count() == 0)
        .collect()
}

/// Sum of assigned slots across all primaries.
pub fn assigned_slot_total(nodes: &[NodeInfo]) -> u32 {
    nodes
        .iter()
        .filter(|n| n.role == NodeRole::Primary)
        .map(NodeInfo::slot_count)
        .sum()
}

/// Find the healthy primary advertising the given IP.
pub fn primary_by_ip<'a>(nodes: &'a [NodeInfo], ip: &str) -> Option<&'a NodeInfo> {
    nodes
        .iter()
        .find(|n| n.is_healthy_primary() && n.ip() == ip)
}

/// Thin client over the admin commands of one cluster.
///
/// Every command carries a short deadline and is retried at most once on
/// error; persistent failure escalates to the protocol layer.
#[derive(Clone)]
pub struct TopologyClient {
    /// `host:port` of any reachable cluster member, used for reads and as
    /// the meet target for joining nodes
    entrypoint: String,
}

impl TopologyClient {
    pub fn new(entrypoint: impl Into<String>) -> Self {
        Self {
            entrypoint: entrypoint.into(),
        }
    }

    pub fn entrypoint(&self) -> &str {
        &self.entrypoint
    }

    async fn try_execute<T: redis::FromRedisValue>(
        &self,
        addr: &str,
        cmd: &redis::Cmd,
    ) -> Result<T> {
        let client = redis::Client::open(format!("redis://{}", addr))?;
        let mut conn = tokio::time::timeout(COMMAND_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| TopologyError::Timeout(COMMAND_TIMEOUT))??;
        tokio::time::timeout(COMMAND_TIMEOUT, cmd.query_async(&mut conn))
            .await
            .map_err(|_| TopologyError::Timeout(COMMAND_TIMEOUT))?
            .map_err(TopologyError::from)
    }

    async fn execute<T: redis::FromRedisValue>(&self, addr: &str, cmd: &redis::Cmd) -> Result<T> {
        match self.try_execute(addr, cmd).await {
            Ok(v) => Ok(v),
            Err(first) => {
                debug!(addr, error = %first, "admin command failed, retrying once");
                self.try_execute(addr, cmd).await
            }
        }
    }

    /// Current membership table as seen from the entrypoint.
    pub async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let raw: String = self
            .execute(&self.entrypoint, redis::cmd("CLUSTER").arg("NODES"))
            .await?;
        parse_cluster_nodes(&raw)
    }

    /// Whether the cluster reports `cluster_state:ok`.
    pub async fn health(&self) -> Result<bool> {
        let raw: String = self
            .execute(&self.entrypoint, redis::cmd("CLUSTER").arg("INFO"))
            .await?;
        Ok(raw
            .lines()
            .any(|l| l.trim().trim_end_matches('\r') == "cluster_state:ok"))
    }

    /// Broadcast `CLUSTER FORGET <id>` from every healthy member.
    ///
    /// Per-node refusals are tolerated: a node that never met the target
    /// answers with an error, which is equivalent to success here.
    pub async fn forget_everywhere(&self, node_id: &str, nodes: &[NodeInfo]) -> Result<()> {
        for node in nodes.iter().filter(|n| n.is_healthy() && n.id != node_id) {
            let cmd = redis::cmd("CLUSTER").arg("FORGET").arg(node_id).to_owned();
            if let Err(e) = self.execute::<String>(&node.addr, &cmd).await {
                debug!(node = %node.addr, target = node_id, error = %e, "FORGET refused");
            }
        }
        Ok(())
    }

    /// Remove a member from the cluster.
    ///
    /// The data-plane has no single removal command; removal is a forget
    /// broadcast. The pod itself is left running since the ordered replica
    /// controller reuses its ordinal.
    pub async fn del_node(&self, node_id: &str, nodes: &[NodeInfo]) -> Result<()> {
        self.forget_everywhere(node_id, nodes).await
    }

    /// Drop ghost entries (failed/disconnected/unaddressable members) from
    /// the membership table. Returns how many were forgotten.
    pub async fn forget_ghosts(&self) -> Result<usize> {
        let nodes = self.list_nodes().await?;
        let ghosts: Vec<String> = nodes
            .iter()
            .filter(|n| !n.is_healthy())
            .map(|n| n.id.clone())
            .collect();

        for ghost in &ghosts {
            warn!(node_id = %ghost, "forgetting ghost node");
            self.forget_everywhere(ghost, &nodes).await?;
        }
        Ok(ghosts.len())
    }

    /// Broadcast the full-coverage requirement toggle to every member.
    ///
    /// Best-effort: a member that cannot be reached mid-migration must not
    /// abort the protocol.
    pub async fn set_full_coverage(&self, nodes: &[NodeInfo], enabled: bool) -> Result<()> {
        let value = if enabled { "yes" } else { "no" };
        for node in nodes.iter().filter(|n| n.is_healthy()) {
            let cmd = redis::cmd("CONFIG")
                .arg("SET")
                .arg("cluster-require-full-coverage")
                .arg(value)
                .to_owned();
            if let Err(e) = self.execute::<String>(&node.addr, &cmd).await {
                warn!(node = %node.addr, enabled, error = %e, "full-coverage toggle failed");
            }
        }
        Ok(())
    }

    /// Discard all keys held by a node.
    pub async fn flush_all(&self, addr: &str) -> Result<()> {
        self.execute::<String>(addr, &redis::cmd("FLUSHALL"))
            .await
            .map(|_| ())
    }

    /// Return a node to a blank cluster state, dropping its id and epoch.
    pub async fn reset_hard(&self, addr: &str) -> Result<()> {
        self.execute::<String>(addr, redis::cmd("CLUSTER").arg("RESET").arg("HARD"))
            .await
            .map(|_| ())
    }

    /// Join a fresh node to the cluster as an empty primary by pointing it at
    /// the entrypoint.
    pub async fn meet(&self, addr: &str, entrypoint_ip: &str) -> Result<()> {
        let cmd = redis::cmd("CLUSTER")
            .arg("MEET")
            .arg(entrypoint_ip)
            .arg(REDIS_PORT)
            .to_owned();
        self.execute::<String>(addr, &cmd).await.map(|_| ())
    }

    /// Attach a joined node as a replica of the given primary.
    pub async fn replicate(&self, addr: &str, primary_id: &str) -> Result<()> {
        let cmd = redis::cmd("CLUSTER")
            .arg("REPLICATE")
            .arg(primary_id)
            .to_owned();
        self.execute::<String>(addr, &cmd).await.map(|_| ())
    }
}
