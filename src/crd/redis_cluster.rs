use std::collections::BTreeMap;

use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// RedisCluster is the Schema for the redisclusters API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "cache.example.com",
    version = "v1alpha1",
    kind = "RedisCluster",
    plural = "redisclusters",
    shortname = "rdc",
    namespaced,
    status = "RedisClusterStatus",
    printcolumn = r#"{"name":"Shards", "type":"integer", "jsonPath":".spec.activeShards"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Standby", "type":"string", "jsonPath":".status.standbyId"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterSpec {
    /// Number of active shard primaries, excluding the standby.
    /// The operator always provisions one extra primary (the standby) plus
    /// replicas, so total pods = (activeShards + 1) * (replicasPerShard + 1).
    pub active_shards: i32,

    /// Lower bound for scale-down. The cluster never shrinks below this.
    #[serde(default = "default_min_shards")]
    pub min_shards: i32,

    /// Number of replica (secondary) pods per shard primary.
    #[serde(default = "default_replicas_per_shard")]
    pub replicas_per_shard: i32,

    /// Redis image tag used for data-plane pods and admin job containers.
    #[serde(default = "default_redis_version")]
    pub redis_version: String,

    /// Enables the autoscaling loop. When false the operator only maintains
    /// the deployed topology.
    pub auto_scale: bool,

    /// CPU percentage above which a shard triggers scale-up (1-100).
    pub cpu_high: i32,

    /// CPU percentage below which a shard counts as underutilized (1-100).
    #[serde(default = "default_cpu_low")]
    pub cpu_low: i32,

    /// Memory percentage above which a shard triggers scale-up (1-100).
    #[serde(default = "default_mem_high")]
    pub mem_high: i32,

    /// Memory percentage below which a shard counts as underutilized (1-100).
    #[serde(default = "default_mem_low")]
    pub mem_low: i32,

    /// Minimum seconds between completed scaling protocols.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: i32,

    /// Active deadline for reshard/drain/fix jobs.
    #[serde(default = "default_task_timeout_seconds")]
    pub task_timeout_seconds: i32,

    /// Requeue interval for the stable monitoring path.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: i32,

    /// Prometheus query endpoint for per-shard CPU and memory samples.
    #[serde(default = "default_metrics_endpoint")]
    pub metrics_endpoint: String,

    /// When true the operator discovers an externally-managed deployment
    /// instead of creating one. `selector` is required in this mode.
    #[serde(default)]
    pub existing_mode: bool,

    /// Label selector identifying data-plane pods of an existing deployment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    /// Headless service name for an existing deployment.
    /// Defaults to "<name>-headless".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Whether the operator owns the StatefulSet. When false, only the
    /// autoscaling protocols run against the externally-managed replica set.
    #[serde(default = "default_manage_replica_set")]
    pub manage_replica_set: bool,
}

fn default_min_shards() -> i32 {
    3
}

fn default_replicas_per_shard() -> i32 {
    1
}

fn default_redis_version() -> String {
    "7.2".to_string()
}

fn default_cpu_low() -> i32 {
    20
}

fn default_mem_high() -> i32 {
    70
}

fn default_mem_low() -> i32 {
    30
}

fn default_cooldown_seconds() -> i32 {
    60
}

fn default_task_timeout_seconds() -> i32 {
    600
}

fn default_poll_interval_seconds() -> i32 {
    15
}

fn default_metrics_endpoint() -> String {
    "http://prometheus-operated.monitoring.svc:9090".to_string()
}

fn default_manage_replica_set() -> bool {
    true
}

/// Status of the RedisCluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterStatus {
    /// Current phase of the reconciliation state machine
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Number of active shard primaries last observed in the data plane
    #[serde(default)]
    pub observed_shards: i32,

    /// Number of replica pods last observed
    #[serde(default)]
    pub observed_replicas: i32,

    /// Pod name of the shard primary currently holding zero hash slots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standby_id: Option<String>,

    /// Pod that triggered the in-flight scale-up; set only while ScalingUp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overloaded_id: Option<String>,

    /// Pod being drained; set only while ScalingDown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_victim_id: Option<String>,

    /// First slot destination for the drain; set only while ScalingDown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_dest_a: Option<String>,

    /// Second slot destination for the drain; absent when the victim was
    /// itself one of the low-memory candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_dest_b: Option<String>,

    /// RFC 3339 timestamp of the last completed (or recoverably failed)
    /// scaling protocol; drives the cooldown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_at: Option<String>,

    /// Consecutive standby-join attempts during provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_retries: Option<i32>,

    /// Observed generation of the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Kubernetes-style conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Reconciliation state machine phase
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum ClusterPhase {
    /// Topology not yet bootstrapped (or discovered, for existing mode)
    #[default]
    Uninitialized,
    /// Monitoring; the only phase from which scaling decisions are taken
    Stable,
    /// Half-slot migration into the standby is in flight
    ScalingUp,
    /// Fresh standby pods are being joined to the cluster
    ProvisioningStandby,
    /// A victim shard is being drained and the standby rotated
    ScalingDown,
    /// A protocol invariant was violated; operator intervention required
    Failed,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPhase::Uninitialized => write!(f, "Uninitialized"),
            ClusterPhase::Stable => write!(f, "Stable"),
            ClusterPhase::ScalingUp => write!(f, "ScalingUp"),
            ClusterPhase::ProvisioningStandby => write!(f, "ProvisioningStandby"),
            ClusterPhase::ScalingDown => write!(f, "ScalingDown"),
            ClusterPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl RedisCluster {
    /// Pods per shard group: one primary plus its replicas.
    pub fn group_size(&self) -> i32 {
        1 + self.spec.replicas_per_shard
    }

    /// Total pods the StatefulSet must run, standby group included.
    pub fn total_pods(&self) -> i32 {
        (self.spec.active_shards + 1) * self.group_size()
    }

    /// Ordinal of the standby primary under the shard-ordering convention:
    /// primaries sit at multiples of the group size, the standby group last.
    pub fn standby_ordinal(&self) -> i32 {
        self.spec.active_shards * self.group_size()
    }

    /// Ordinal of the highest-index active primary (the scale-down victim).
    pub fn highest_active_ordinal(&self) -> i32 {
        (self.spec.active_shards - 1) * self.group_size()
    }

    /// Pod name for a given ordinal.
    pub fn pod_name(&self, ordinal: i32) -> String {
        format!("{}-{}", self.name_any(), ordinal)
    }

    /// Headless service governing the pods.
    pub fn headless_service_name(&self) -> String {
        self.spec
            .service_name
            .clone()
            .unwrap_or_else(|| format!("{}-headless", self.name_any()))
    }

    /// DNS name of a pod through the headless service.
    pub fn pod_fqdn(&self, pod: &str, namespace: &str) -> String {
        format!(
            "{}.{}.{}.svc.cluster.local",
            pod,
            self.headless_service_name(),
            namespace
        )
    }

    /// Parse the StatefulSet ordinal out of a pod name.
    pub fn pod_ordinal(&self, pod: &str) -> Option<i32> {
        pod.strip_prefix(&format!("{}-", self.name_any()))
            .and_then(|n| n.parse().ok())
    }

    /// Whether a pod ordinal addresses a shard primary (as opposed to a replica).
    pub fn is_primary_ordinal(&self, ordinal: i32) -> bool {
        ordinal % self.group_size() == 0
    }
}
