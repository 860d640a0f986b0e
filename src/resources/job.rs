//! One-shot Job builders for the long-running topology operations
//!
//! Slot migration and cluster fix run for minutes and must not hold a
//! reconciliation worker, so they execute as Jobs that the reconciler
//! observes across ticks. Every parameter a Job receives (node ids, slot
//! counts, entrypoints) is resolved in-process by the topology client
//! beforehand; the Job commands contain no text parsing of their own.
//!
//! Jobs persist until the owning protocol observes their terminal state and
//! deletes them. That persistence is what makes protocol re-entry after a
//! controller restart land in the right step.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::RedisCluster;
use crate::resources::common::{owner_reference, standard_labels};

/// Per-slot migration timeout passed to the admin tool, in milliseconds.
const RESHARD_TIMEOUT_MS: u32 = 10_000;

/// Bounded pipeline depth for slot migration. Large enough to amortize
/// round-trips, small enough not to starve regular clients.
const RESHARD_PIPELINE: u32 = 100;

/// Pause between the two drain reshards so the migrated topology settles.
const DRAIN_STABILIZATION_SECS: u32 = 5;

pub fn bootstrap_job_name(cluster_name: &str) -> String {
    format!("{}-bootstrap", cluster_name)
}

pub fn fix_job_name(cluster_name: &str) -> String {
    format!("{}-fix", cluster_name)
}

pub fn reshard_job_name(cluster_name: &str) -> String {
    format!("{}-reshard", cluster_name)
}

pub fn drain_job_name(cluster_name: &str) -> String {
    format!("{}-drain", cluster_name)
}

/// `host:port` entrypoint used by the admin tool inside job containers.
pub fn entrypoint_addr(cluster: &RedisCluster, namespace: &str) -> String {
    let pod = cluster.pod_name(0);
    format!("{}:6379", cluster.pod_fqdn(&pod, namespace))
}

/// Shared scaffolding: a single-container never-restarting Job.
fn admin_job(
    cluster: &RedisCluster,
    name: String,
    container_name: &str,
    command: String,
    active_deadline_seconds: i64,
) -> Job {
    let cluster_name = cluster.name_any();

    Job {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            active_deadline_seconds: Some(active_deadline_seconds),
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: container_name.to_string(),
                        image: Some(format!("redis:{}", cluster.spec.redis_version)),
                        command: Some(vec!["sh".to_string(), "-c".to_string()]),
                        args: Some(vec![command]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Job that forms the initial cluster over the active hosts.
///
/// Only the active groups participate; the full slot space lands on the
/// active primaries and the standby group is joined afterwards with zero
/// slots by the provisioning protocol.
pub fn generate_bootstrap_job(cluster: &RedisCluster, namespace: &str) -> Job {
    let active_pods = cluster.spec.active_shards * cluster.group_size();
    let hosts: Vec<String> = (0..active_pods)
        .map(|i| {
            format!(
                "{}:6379",
                cluster.pod_fqdn(&cluster.pod_name(i), namespace)
            )
        })
        .collect();

    let command = format!(
        "redis-cli --cluster create {} --cluster-replicas {} --cluster-yes",
        hosts.join(" "),
        cluster.spec.replicas_per_shard,
    );

    admin_job(
        cluster,
        bootstrap_job_name(&cluster.name_any()),
        "bootstrap",
        command,
        i64::from(cluster.spec.task_timeout_seconds),
    )
}

/// Job that reconciles slot-table inconsistencies, tolerating primaries
/// that are currently unreachable.
pub fn generate_fix_job(cluster: &RedisCluster, namespace: &str) -> Job {
    let command = format!(
        "redis-cli --cluster fix {} --cluster-fix-with-unreachable-masters",
        entrypoint_addr(cluster, namespace),
    );

    admin_job(
        cluster,
        fix_job_name(&cluster.name_any()),
        "cluster-fix",
        command,
        i64::from(cluster.spec.task_timeout_seconds),
    )
}

/// Job that migrates `slots` hash slots between two resolved node ids.
pub fn generate_reshard_job(
    cluster: &RedisCluster,
    namespace: &str,
    from_id: &str,
    to_id: &str,
    slots: u32,
) -> Job {
    let command = reshard_command(&entrypoint_addr(cluster, namespace), from_id, to_id, slots);

    admin_job(
        cluster,
        reshard_job_name(&cluster.name_any()),
        "reshard",
        command,
        i64::from(cluster.spec.task_timeout_seconds),
    )
}

/// Drain plan resolved by the scale-down protocol: everything the Job needs,
/// already looked up against the live topology.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainPlan {
    pub victim_id: String,
    pub dest_a_id: String,
    pub slots_a: u32,
    /// Second half of the drain, absent for single-destination migrations
    pub dest_b: Option<(String, u32)>,
}

impl DrainPlan {
    /// Split `total` victim slots across the destinations: half to the first,
    /// the remainder to the second when present.
    pub fn split(victim_id: String, dest_a_id: String, dest_b_id: Option<String>, total: u32) -> Self {
        match dest_b_id {
            Some(dest_b_id) if total > 1 => {
                let half = total / 2;
                Self {
                    victim_id,
                    dest_a_id,
                    slots_a: half,
                    dest_b: Some((dest_b_id, total - half)),
                }
            }
            _ => Self {
                victim_id,
                dest_a_id,
                slots_a: total,
                dest_b: None,
            },
        }
    }
}

/// Job that drains the victim into its destination(s). The two halves run
/// sequentially with a stabilization pause in between.
pub fn generate_drain_job(cluster: &RedisCluster, namespace: &str, plan: &DrainPlan) -> Job {
    let entrypoint = entrypoint_addr(cluster, namespace);

    let mut command = reshard_command(&entrypoint, &plan.victim_id, &plan.dest_a_id, plan.slots_a);
    if let Some((dest_b_id, slots_b)) = &plan.dest_b {
        command = format!(
            "{} && sleep {} && {}",
            command,
            DRAIN_STABILIZATION_SECS,
            reshard_command(&entrypoint, &plan.victim_id, dest_b_id, *slots_b),
        );
    }

    admin_job(
        cluster,
        drain_job_name(&cluster.name_any()),
        "drain",
        command,
        i64::from(cluster.spec.task_timeout_seconds),
    )
}

fn reshard_command(entrypoint: &str, from_id: &str, to_id: &str, slots: u32) -> String {
    format!(
        "redis-cli --cluster reshard {} --cluster-from {} --cluster-to {} --cluster-slots {} \
         --cluster-yes --cluster-timeout {} --cluster-pipeline {}",
        entrypoint, from_id, to_id, slots, RESHARD_TIMEOUT_MS, RESHARD_PIPELINE,
    )
}

/// Terminal state of an observed Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Running,
    Succeeded,
    Failed,
}

/// Classify a Job by its status counters. A Job with neither success nor
/// failure recorded is still running.
pub fn job_outcome(job: &Job) -> JobOutcome {
    let status = job.status.as_ref();
    let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
    let failed = status.and_then(|s| s.failed).unwrap_or(0);

    if succeeded > 0 {
        JobOutcome::Succeeded
    } else if failed > 0 {
        JobOutcome::Failed
    } else {
        JobOutcome::Running
    }
}
