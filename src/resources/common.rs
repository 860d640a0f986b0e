//! Common utilities for Kubernetes resource generation
//!
//! This module provides shared functions and constants used across
//! all resource generators to ensure consistency and reduce duplication.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::RedisCluster;

/// API version for RedisCluster CRD
pub const API_VERSION: &str = "cache.example.com/v1alpha1";

/// Kind for RedisCluster CRD
pub const KIND: &str = "RedisCluster";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "redis-operator";

/// Generate an owner reference for a RedisCluster
///
/// This ensures that all child resources are properly owned by the cluster
/// and will be garbage collected when the cluster is deleted.
pub fn owner_reference(cluster: &RedisCluster) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Generate standard labels for all resources belonging to a RedisCluster
pub fn standard_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/name".to_string(),
            cluster_name.to_string(),
        ),
        (
            "app.kubernetes.io/component".to_string(),
            "redis".to_string(),
        ),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
        (
            "cache.example.com/cluster".to_string(),
            cluster_name.to_string(),
        ),
    ])
}

/// Label selector for finding the cluster's data-plane pods.
///
/// Externally-managed deployments carry their own labels, supplied through
/// `spec.selector`; operator-managed pods use the standard labels.
pub fn pod_selector(cluster: &RedisCluster) -> BTreeMap<String, String> {
    if cluster.spec.existing_mode && !cluster.spec.selector.is_empty() {
        return cluster.spec.selector.clone();
    }
    standard_labels(&cluster.name_any())
}
