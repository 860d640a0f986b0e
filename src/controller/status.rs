//! Status and conditions management for RedisCluster resources
//!
//! This module provides utilities for managing Kubernetes-style conditions
//! and updating the status subresource. Every phase transition of the
//! scaling state machine goes through `StatusManager` so witness fields and
//! the cooldown timestamp stay consistent.

use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};

use crate::controller::Context;
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::Result;
use crate::controller::state_machine::is_valid_transition;
use crate::crd::{ClusterPhase, Condition, RedisCluster, RedisClusterStatus};

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// Cluster topology is healthy and serving
    pub const READY: &str = "Ready";
    /// A scaling protocol is driving towards a new topology
    pub const PROGRESSING: &str = "Progressing";
    /// Cluster needs operator attention
    pub const DEGRADED: &str = "Degraded";
    /// Why the last scaling decision was not taken
    pub const SCALING_BLOCKED: &str = "ScalingBlocked";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    /// Create from existing conditions
    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        let now = Utc::now().to_rfc3339();

        // Find existing condition of this type
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            // Only update the transition time if the status changed
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = now;
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
                observed_generation: self.generation,
            });
        }
        self
    }

    /// Set the Ready condition
    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        let status = if is_ready {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::READY, status, reason, message)
    }

    /// Set the Progressing condition
    pub fn progressing(self, is_progressing: bool, reason: &str, message: &str) -> Self {
        let status = if is_progressing {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::PROGRESSING, status, reason, message)
    }

    /// Set the Degraded condition
    pub fn degraded(self, is_degraded: bool, reason: &str, message: &str) -> Self {
        let status = if is_degraded {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::DEGRADED, status, reason, message)
    }

    /// Set the ScalingBlocked condition
    pub fn scaling_blocked(self, is_blocked: bool, reason: &str, message: &str) -> Self {
        let status = if is_blocked {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::SCALING_BLOCKED, status, reason, message)
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Status manager for RedisCluster resources
pub struct StatusManager<'a> {
    cluster: &'a RedisCluster,
    ctx: &'a Context,
    ns: &'a str,
}

impl<'a> StatusManager<'a> {
    /// Create a new status manager
    pub fn new(cluster: &'a RedisCluster, ctx: &'a Context, ns: &'a str) -> Self {
        Self { cluster, ctx, ns }
    }

    /// Update the cluster status with full status object
    pub async fn update(&self, status: RedisClusterStatus) -> Result<()> {
        let from = self
            .cluster
            .status
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or_default();
        if !is_valid_transition(from, status.phase) {
            tracing::warn!(
                from = %from,
                to = %status.phase,
                "phase transition not in the legal table"
            );
        }

        let api: Api<RedisCluster> = Api::namespaced(self.ctx.client.clone(), self.ns);
        let name = self.cluster.name_any();

        let patch = serde_json::json!({
            "status": status
        });

        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }

    /// Snapshot of the current status, with generation stamped.
    fn current(&self) -> RedisClusterStatus {
        let mut status = self.cluster.status.clone().unwrap_or_default();
        status.observed_generation = self.cluster.metadata.generation;
        status
    }

    fn builder(&self, status: &RedisClusterStatus) -> ConditionBuilder {
        ConditionBuilder::from_existing(status.conditions.clone(), self.cluster.metadata.generation)
    }

    /// Stable monitoring: topology confirmed, no protocol in flight.
    pub async fn set_stable(
        &self,
        observed_shards: i32,
        observed_replicas: i32,
        standby_id: Option<String>,
    ) -> Result<()> {
        let mut status = self.current();
        status.conditions = self
            .builder(&status)
            .ready(true, "TopologyHealthy", "All shard pods ready, standby identified")
            .progressing(false, "Stable", "No scaling protocol in flight")
            .degraded(false, "Healthy", "Cluster is healthy")
            .build();
        status.phase = ClusterPhase::Stable;
        status.observed_shards = observed_shards;
        status.observed_replicas = observed_replicas;
        if standby_id.is_some() {
            status.standby_id = standby_id;
        }
        status.overloaded_id = None;
        status.drain_victim_id = None;
        status.drain_dest_a = None;
        status.drain_dest_b = None;
        status.join_retries = None;

        self.update(status).await
    }

    /// Persist a changed standby identity without touching anything else.
    /// The caller abandons the tick afterwards (stabilization window).
    pub async fn set_standby(&self, standby_id: &str) -> Result<()> {
        let mut status = self.current();
        status.standby_id = Some(standby_id.to_string());
        self.update(status).await
    }

    /// Enter the scale-up protocol with its witness field.
    pub async fn set_scaling_up(&self, overloaded_id: &str, reason: &str) -> Result<()> {
        let mut status = self.current();
        status.conditions = self
            .builder(&status)
            .ready(true, "ScalingUp", reason)
            .progressing(true, "ReshardStarted", reason)
            .build();
        status.phase = ClusterPhase::ScalingUp;
        status.overloaded_id = Some(overloaded_id.to_string());
        self.update(status).await
    }

    /// Reshard done: shard count already bumped in spec, now wait for the
    /// fresh standby pods. Starts the cooldown window.
    pub async fn set_provisioning_standby(&self) -> Result<()> {
        let mut status = self.current();
        status.conditions = self
            .builder(&status)
            .ready(true, "StandbyActivated", "Slot migration complete")
            .progressing(true, "ProvisioningStandby", "Waiting for fresh standby pods")
            .build();
        status.phase = ClusterPhase::ProvisioningStandby;
        status.overloaded_id = None;
        status.join_retries = Some(0);
        status.last_scale_at = Some(Utc::now().to_rfc3339());
        self.update(status).await
    }

    /// Enter the scale-down protocol with its witness fields.
    pub async fn set_scaling_down(
        &self,
        victim: &str,
        dest_a: &str,
        dest_b: Option<&str>,
        reason: &str,
    ) -> Result<()> {
        let mut status = self.current();
        status.conditions = self
            .builder(&status)
            .ready(true, "ScalingDown", reason)
            .progressing(true, "DrainStarted", reason)
            .build();
        status.phase = ClusterPhase::ScalingDown;
        status.drain_victim_id = Some(victim.to_string());
        status.drain_dest_a = Some(dest_a.to_string());
        status.drain_dest_b = dest_b.map(str::to_string);
        self.update(status).await
    }

    /// Scale-down rotation complete: the drained victim is the new standby.
    pub async fn complete_scale_down(&self, new_standby: &str, observed_shards: i32) -> Result<()> {
        let mut status = self.current();
        status.conditions = self
            .builder(&status)
            .ready(true, "TopologyHealthy", "Scale-down complete")
            .progressing(false, "Stable", "Standby rotated")
            .degraded(false, "Healthy", "Cluster is healthy")
            .build();
        status.phase = ClusterPhase::Stable;
        status.observed_shards = observed_shards;
        status.standby_id = Some(new_standby.to_string());
        status.drain_victim_id = None;
        status.drain_dest_a = None;
        status.drain_dest_b = None;
        status.last_scale_at = Some(Utc::now().to_rfc3339());
        self.update(status).await
    }

    /// Provisioning complete: the fresh tail pod is the new standby.
    pub async fn complete_provisioning(&self, new_standby: &str, observed_shards: i32) -> Result<()> {
        let mut status = self.current();
        status.conditions = self
            .builder(&status)
            .ready(true, "TopologyHealthy", "Standby provisioned")
            .progressing(false, "Stable", "No scaling protocol in flight")
            .degraded(false, "Healthy", "Cluster is healthy")
            .build();
        status.phase = ClusterPhase::Stable;
        status.observed_shards = observed_shards;
        status.standby_id = Some(new_standby.to_string());
        status.join_retries = None;
        self.update(status).await
    }

    /// Bump the join retry counter during provisioning.
    pub async fn record_join_retry(&self) -> Result<i32> {
        let mut status = self.current();
        let retries = status.join_retries.unwrap_or(0) + 1;
        status.join_retries = Some(retries);
        self.update(status).await?;
        Ok(retries)
    }

    /// Recoverable protocol failure: clear witnesses, fall back to Stable,
    /// and advance `lastScaleAt` so the cooldown gates the retry.
    pub async fn abort_protocol(&self, step: &str, message: &str) -> Result<()> {
        let mut status = self.current();
        status.conditions = self
            .builder(&status)
            .ready(true, "ProtocolAborted", message)
            .progressing(false, step, message)
            .degraded(true, step, message)
            .build();
        status.phase = ClusterPhase::Stable;
        status.overloaded_id = None;
        status.drain_victim_id = None;
        status.drain_dest_a = None;
        status.drain_dest_b = None;
        status.join_retries = None;
        status.last_scale_at = Some(Utc::now().to_rfc3339());
        self.update(status).await
    }

    /// Fatal invariant violation: park the cluster until an operator edits it.
    pub async fn set_failed(&self, step: &str, message: &str) -> Result<()> {
        let mut status = self.current();
        status.conditions = self
            .builder(&status)
            .ready(false, step, message)
            .progressing(false, "Failed", message)
            .degraded(true, step, message)
            .build();
        status.phase = ClusterPhase::Failed;
        self.update(status).await
    }

    /// Record why the health gate blocked scaling this tick.
    pub async fn record_gate_block(&self, reason: &str, message: &str) -> Result<()> {
        let mut status = self.current();
        status.conditions = self
            .builder(&status)
            .scaling_blocked(true, reason, message)
            .build();
        self.update(status).await
    }

    /// Clear the ScalingBlocked condition once the gate passes.
    pub async fn clear_gate_block(&self) -> Result<()> {
        let has_block = self
            .cluster
            .status
            .as_ref()
            .map(|s| {
                s.conditions.iter().any(|c| {
                    c.type_ == condition_types::SCALING_BLOCKED
                        && c.status == condition_status::TRUE
                })
            })
            .unwrap_or(false);
        if !has_block {
            return Ok(());
        }
        let mut status = self.current();
        status.conditions = self
            .builder(&status)
            .scaling_blocked(false, "GateOpen", "All scaling preconditions hold")
            .build();
        self.update(status).await
    }
}

/// Check if the cluster spec has changed by comparing observed generation
pub fn spec_changed(cluster: &RedisCluster) -> bool {
    let current_generation = cluster.metadata.generation;
    let observed_generation = cluster.status.as_ref().and_then(|s| s.observed_generation);

    match (current_generation, observed_generation) {
        (Some(current), Some(observed)) => current != observed,
        (Some(_), None) => true, // Never observed, needs reconciliation
        _ => true,               // No generation, always reconcile
    }
}

/// Seconds remaining in the cooldown window, if any.
pub fn cooldown_remaining(cluster: &RedisCluster) -> Option<i64> {
    let last = cluster.status.as_ref()?.last_scale_at.as_deref()?;
    let last = chrono::DateTime::parse_from_rfc3339(last).ok()?;
    let elapsed = Utc::now().signed_duration_since(last).num_seconds();
    let cooldown = i64::from(cluster.spec.cooldown_seconds);
    if elapsed < cooldown {
        Some(cooldown - elapsed)
    } else {
        None
    }
}
