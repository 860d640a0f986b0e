pub mod controller;
pub mod crd;
pub mod health;
pub mod redis;
pub mod resources;

pub use controller::{BackoffConfig, Context, Error, FINALIZER, Result, error_policy, reconcile};
pub use crd::RedisCluster;

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};

use crate::health::HealthState;

/// Run the operator controller
///
/// This is the main controller loop that watches RedisCluster resources
/// and reconciles them. It can be called from main.rs or spawned as a
/// background task during integration tests.
pub async fn run_controller(client: Client, health_state: Option<Arc<HealthState>>) {
    tracing::info!("Starting controller for RedisCluster resources");

    let ctx = Arc::new(Context::new(client.clone(), health_state));

    // Set up APIs for the controller
    let clusters: Api<RedisCluster> = Api::all(client.clone());
    let statefulsets: Api<StatefulSet> = Api::all(client.clone());
    let services: Api<Service> = Api::all(client.clone());
    let configmaps: Api<ConfigMap> = Api::all(client.clone());
    let jobs: Api<Job> = Api::all(client.clone());

    // Configure watcher to handle dynamic resource creation
    let watcher_config = WatcherConfig::default().any_semantic();

    // Create and run the controller
    // Watch RedisCluster and all owned resources to trigger reconciliation.
    // Jobs matter most: their completion is what advances an in-flight
    // scaling protocol without waiting for the next poll.
    Controller::new(clusters, watcher_config.clone())
        .owns(statefulsets, watcher_config.clone())
        .owns(services, watcher_config.clone())
        .owns(configmaps, watcher_config.clone())
        .owns(jobs, watcher_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    tracing::error!("Reconciliation error: {:?}", e);
                }
            }
        })
        .await;

    // This should never complete in normal operation
    tracing::error!("Controller stream ended unexpectedly");
}
