//! Reconciliation logic for RedisCluster resources
//!
//! The top-level state machine. Each tick reads the desired and observed
//! state, dispatches on the status phase, and returns a requeue delay:
//! the stable path runs gate, probe and decision engine; the scaling paths
//! drive their protocol forward exactly one step. No error escapes: every
//! failure is translated into a requeue plus a status condition.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::health_gate::{self, GateOutcome};
use crate::controller::metrics_probe::MetricsProbe;
use crate::controller::protocol::{any_ready_pod_ip, topology_for};
use crate::controller::status::{StatusManager, spec_changed};
use crate::controller::workload::{
    apply_resource, create_job, delete_job, get_job, list_cluster_pods, pod_ip,
    statefulset_replicas,
};
use crate::controller::{decision, provision, scale_down, scale_up, validation};
use crate::crd::{ClusterPhase, RedisCluster};
use crate::redis::{NodeRole, zero_slot_primaries};
use crate::resources::job::{bootstrap_job_name, generate_bootstrap_job};
use crate::resources::{JobOutcome, configmap, job_outcome, service, statefulset};

/// Finalizer name for cleanup
pub const FINALIZER: &str = "cache.example.com/finalizer";

/// Default backoff configuration for error handling
fn default_backoff() -> BackoffConfig {
    BackoffConfig::default()
}

/// Main reconciliation function
#[instrument(skip(cluster, ctx), fields(name = %cluster.name_any(), namespace = cluster.namespace().unwrap_or_default()))]
pub async fn reconcile(cluster: Arc<RedisCluster>, ctx: Arc<Context>) -> Result<Action> {
    let start = std::time::Instant::now();
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    debug!("Reconciling RedisCluster");

    // Handle deletion
    if cluster.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&cluster, &ctx, &ns).await;
    }

    // Ensure finalizer is present
    if !has_finalizer(&cluster) {
        add_finalizer(&cluster, &ctx, &ns).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    // A contradictory spec never reaches the protocols.
    if let Err(e) = validation::validate_spec(&cluster) {
        warn!("Invalid RedisCluster spec: {}", e);
        ctx.publish_warning_event(&cluster, "SpecInvalid", "Validate", Some(e.to_string()))
            .await;
        return Err(e);
    }

    reconcile_infrastructure(&cluster, &ctx, &ns).await?;

    let phase = cluster
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or_default();

    let result = match phase {
        ClusterPhase::Uninitialized => {
            if cluster.spec.existing_mode {
                discover_existing(&cluster, &ctx, &ns).await
            } else {
                reconcile_bootstrap(&cluster, &ctx, &ns).await
            }
        }
        ClusterPhase::Stable => stable_tick(&cluster, &ctx, &ns).await,
        ClusterPhase::ScalingUp => scale_up::reconcile_scaling_up(&cluster, &ctx, &ns).await,
        ClusterPhase::ProvisioningStandby => {
            provision::reconcile_provisioning(&cluster, &ctx, &ns).await
        }
        ClusterPhase::ScalingDown => scale_down::reconcile_scaling_down(&cluster, &ctx, &ns).await,
        ClusterPhase::Failed => reconcile_failed(&cluster, &ctx, &ns).await,
    };

    match result {
        Ok(action) => {
            ctx.record_reconcile(&ns, &name, start.elapsed().as_secs_f64());
            Ok(action)
        }
        Err(e) => {
            error!("Reconciliation failed: {}", e);
            ctx.record_error(&ns, &name);
            Err(e)
        }
    }
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(cluster: Arc<RedisCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = cluster.name_any();
    let backoff = default_backoff();

    // Retry counts are not tracked across policy invocations; the first-step
    // delay plus the cooldown window is enough to stop busy-looping.
    let delay = backoff.delay_for_error(error, 0);

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {:?}, requeuing in {:?}",
            name, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {:?}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }

    Action::requeue(delay)
}

/// Apply the owned infrastructure: ConfigMap, headless Service, StatefulSet.
///
/// Externally-managed deployments (`manageReplicaSet: false`) bring their
/// own; the operator then only drives the scaling protocols against them.
async fn reconcile_infrastructure(
    cluster: &RedisCluster,
    ctx: &Context,
    ns: &str,
) -> Result<()> {
    if !cluster.spec.manage_replica_set {
        debug!("replica set externally managed, skipping infrastructure");
        return Ok(());
    }

    apply_resource(ctx, ns, &configmap::generate_config_map(cluster)).await?;
    apply_resource(ctx, ns, &service::generate_headless_service(cluster)).await?;
    apply_resource(ctx, ns, &statefulset::generate_statefulset(cluster)).await?;
    Ok(())
}

/// Bootstrap a controller-managed deployment: wait for the full pod
/// complement, form the cluster over the active groups, then hand the
/// unjoined standby group to the provisioning protocol.
async fn reconcile_bootstrap(cluster: &RedisCluster, ctx: &Context, ns: &str) -> Result<Action> {
    let name = cluster.name_any();
    let status = StatusManager::new(cluster, ctx, ns);

    let Some((_, ready)) = statefulset_replicas(ctx, ns, &name).await? else {
        info!("StatefulSet not yet visible, waiting");
        return Ok(Action::requeue(Duration::from_secs(5)));
    };
    if ready != cluster.total_pods() {
        info!(ready, desired = cluster.total_pods(), "waiting for pods before bootstrap");
        return Ok(Action::requeue(Duration::from_secs(5)));
    }

    let job_name = bootstrap_job_name(&name);
    match get_job(ctx, ns, &job_name).await? {
        None => {
            info!("creating cluster bootstrap job");
            create_job(ctx, ns, &generate_bootstrap_job(cluster, ns)).await?;
            Ok(Action::requeue(Duration::from_secs(10)))
        }
        Some(job) => match job_outcome(&job) {
            JobOutcome::Running => {
                info!("bootstrap job still running");
                Ok(Action::requeue(Duration::from_secs(10)))
            }
            JobOutcome::Failed => {
                error!("bootstrap job failed, retrying");
                ctx.publish_warning_event(
                    cluster,
                    "BootstrapFailed",
                    "Bootstrap",
                    Some("cluster bootstrap job failed".to_string()),
                )
                .await;
                delete_job(ctx, ns, &job_name).await?;
                Ok(Action::requeue(Duration::from_secs(30)))
            }
            JobOutcome::Succeeded => {
                info!("bootstrap complete, joining standby group");
                ctx.publish_normal_event(
                    cluster,
                    "BootstrapComplete",
                    "Bootstrap",
                    Some(format!(
                        "initial topology formed over {} active shards",
                        cluster.spec.active_shards
                    )),
                )
                .await;
                // The bootstrap assigns the full slot space to the active
                // primaries; the standby group joins through the same path
                // as a post-scale-up standby.
                status.set_provisioning_standby().await?;
                Ok(Action::requeue(Duration::from_secs(1)))
            }
        },
    }
}

/// Discover an externally-managed deployment: the standby cannot be inferred
/// from pod ordinals, so it is read off the data plane as the unique
/// zero-slot primary and mapped back to a pod by IP.
async fn discover_existing(cluster: &RedisCluster, ctx: &Context, ns: &str) -> Result<Action> {
    let status = StatusManager::new(cluster, ctx, ns);

    if any_ready_pod_ip(ctx, cluster, ns).await.is_err() {
        info!("no ready pods matching selector yet");
        return Ok(Action::requeue(Duration::from_secs(10)));
    }

    let topology = topology_for(ctx, cluster, ns).await?;
    let nodes = topology.list_nodes().await?;

    let zero_slot = zero_slot_primaries(&nodes);
    let [standby_node] = zero_slot.as_slice() else {
        status
            .record_gate_block(
                "DiscoveryPending",
                &format!(
                    "expected exactly one zero-slot primary, found {}",
                    zero_slot.len()
                ),
            )
            .await?;
        return Ok(Action::requeue(Duration::from_secs(10)));
    };

    let pods = list_cluster_pods(ctx, cluster, ns).await?;
    let Some(standby_pod) = pods
        .iter()
        .find(|p| pod_ip(p).as_deref() == Some(standby_node.ip()))
    else {
        status
            .record_gate_block(
                "DiscoveryPending",
                &format!("no pod found with standby IP {}", standby_node.ip()),
            )
            .await?;
        return Ok(Action::requeue(Duration::from_secs(10)));
    };

    let active = nodes
        .iter()
        .filter(|n| n.role == NodeRole::Primary && n.is_healthy() && n.slot_count() > 0)
        .count() as i32;
    let replicas = nodes
        .iter()
        .filter(|n| n.role == NodeRole::Replica && n.is_healthy())
        .count() as i32;

    let standby = standby_pod.name_any();
    info!(standby = %standby, active, "discovered existing cluster topology");
    ctx.publish_normal_event(
        cluster,
        "ClusterDiscovered",
        "Discover",
        Some(format!(
            "discovered {} active shards, standby {}",
            active, standby
        )),
    )
    .await;

    status.set_stable(active, replicas, Some(standby)).await?;
    Ok(Action::requeue(Duration::from_secs(1)))
}

/// Stable monitoring path: gate, probe, decide, act.
async fn stable_tick(cluster: &RedisCluster, ctx: &Context, ns: &str) -> Result<Action> {
    let status = StatusManager::new(cluster, ctx, ns);
    let poll = Duration::from_secs(u64::try_from(cluster.spec.poll_interval_seconds).unwrap_or(15));

    if !cluster.spec.auto_scale {
        debug!("autoscaling disabled");
        return Ok(Action::requeue(poll));
    }

    match health_gate::evaluate(ctx, cluster, ns).await? {
        GateOutcome::Blocked { reason, message } => {
            info!(reason, %message, "scaling gated");
            status.record_gate_block(reason, &message).await?;
            return Ok(Action::requeue(poll));
        }
        GateOutcome::Ready { standby } => {
            status.clear_gate_block().await?;

            let probe = MetricsProbe::new()?;
            let loads = probe.sample_shards(cluster, ns, Some(&standby)).await?;
            if loads.is_empty() {
                // Metric starvation is a soft failure; skip the tick.
                info!("no shard metrics available, skipping scaling check");
                return Ok(Action::requeue(poll));
            }

            match decision::decide(cluster, &loads) {
                decision::Verdict::None => {
                    debug!("all shards within thresholds");
                    let replicas = (cluster.spec.active_shards + 1) * cluster.spec.replicas_per_shard;
                    status
                        .set_stable(cluster.spec.active_shards, replicas, Some(standby))
                        .await?;
                    Ok(Action::requeue(poll))
                }
                decision::Verdict::Grow { trigger, reason } => {
                    info!(trigger = %trigger, %reason, "grow verdict");
                    ctx.publish_normal_event(
                        cluster,
                        "ScaleUpTriggered",
                        "Decide",
                        Some(format!("{}: {}", trigger, reason)),
                    )
                    .await;
                    status.set_scaling_up(&trigger, &reason).await?;
                    Ok(Action::requeue(Duration::from_secs(1)))
                }
                decision::Verdict::Shrink {
                    victim,
                    dest_a,
                    dest_b,
                    reason,
                } => {
                    info!(victim = %victim, %reason, "shrink verdict");
                    ctx.publish_normal_event(
                        cluster,
                        "ScaleDownTriggered",
                        "Decide",
                        Some(format!("{}: {}", victim, reason)),
                    )
                    .await;
                    status
                        .set_scaling_down(&victim, &dest_a, dest_b.as_deref(), &reason)
                        .await?;
                    Ok(Action::requeue(Duration::from_secs(1)))
                }
            }
        }
    }
}

/// Failed is terminal until the operator edits the object; a generation
/// bump re-validates and resumes from Stable under cooldown.
async fn reconcile_failed(cluster: &RedisCluster, ctx: &Context, ns: &str) -> Result<Action> {
    if spec_changed(cluster) {
        info!("spec edited while Failed, resuming reconciliation");
        let status = StatusManager::new(cluster, ctx, ns);
        status
            .abort_protocol("OperatorReset", "spec edited, resuming from Stable")
            .await?;
        ctx.publish_normal_event(
            cluster,
            "FailureCleared",
            "Recover",
            Some("spec edited, resuming reconciliation".to_string()),
        )
        .await;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    debug!("cluster Failed, waiting for operator intervention");
    Ok(Action::requeue(Duration::from_secs(300)))
}

/// Check if the finalizer is present
fn has_finalizer(cluster: &RedisCluster) -> bool {
    cluster
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.contains(&FINALIZER.to_string()))
}

/// Add the finalizer to the resource
async fn add_finalizer(cluster: &RedisCluster, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<RedisCluster> = Api::namespaced(ctx.client.clone(), ns);
    let name = cluster.name_any();

    let patch = serde_json::json!({
        "metadata": {
            "finalizers": [FINALIZER]
        }
    });

    api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;

    info!("Added finalizer to {}", name);
    Ok(())
}

/// Handle deletion of the RedisCluster
async fn handle_deletion(cluster: &RedisCluster, ctx: &Context, ns: &str) -> Result<Action> {
    let name = cluster.name_any();
    info!("Handling deletion of {}", name);

    // Kubernetes garbage-collects owned resources (StatefulSet, Services,
    // in-flight Jobs) via owner references; just release the finalizer.

    if has_finalizer(cluster) {
        let api: Api<RedisCluster> = Api::namespaced(ctx.client.clone(), ns);

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": null
            }
        });

        api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;

        info!("Removed finalizer from {}", name);
    }

    Ok(Action::await_change())
}
