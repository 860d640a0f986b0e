//! Shared context for the RedisCluster controller
//!
//! This module provides the shared state and utilities used across
//! the reconciliation loop.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::crd::RedisCluster;
use crate::health::HealthState;

/// Field manager name for the operator
pub(crate) const FIELD_MANAGER: &str = "redis-operator";

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Health state for metrics (optional for tests)
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a new context with the given Kubernetes client
    pub fn new(client: Client, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
        }
    }

    /// Record a successful reconciliation in metrics
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        if let Some(ref state) = self.health_state {
            state
                .metrics
                .record_reconcile(namespace, name, duration_secs);
        }
    }

    /// Record a failed reconciliation in metrics
    pub fn record_error(&self, namespace: &str, name: &str) {
        if let Some(ref state) = self.health_state {
            state.metrics.record_error(namespace, name);
        }
    }

    /// Record a completed slot migration into the standby
    pub fn record_reshard_completed(&self, namespace: &str, name: &str) {
        if let Some(ref state) = self.health_state {
            state.metrics.record_reshard_completed(namespace, name);
        }
    }

    /// Record a completed drain-and-rotate
    pub fn record_drain_completed(&self, namespace: &str, name: &str) {
        if let Some(ref state) = self.health_state {
            state.metrics.record_drain_completed(namespace, name);
        }
    }

    /// Record a scaling protocol failure, keyed by the failing step
    pub fn record_scale_failure(&self, step: &str) {
        if let Some(ref state) = self.health_state {
            state.metrics.record_scale_failure(step);
        }
    }

    /// Create an event recorder
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a normal event for a cluster
    pub async fn publish_normal_event(
        &self,
        cluster: &RedisCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = cluster.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!("Failed to publish event: {}", e);
        }
    }

    /// Publish a warning event for a cluster
    pub async fn publish_warning_event(
        &self,
        cluster: &RedisCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = cluster.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!("Failed to publish warning event: {}", e);
        }
    }
}
