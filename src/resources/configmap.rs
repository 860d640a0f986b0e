//! ConfigMap generation for the data-plane pods

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::RedisCluster;
use crate::resources::common::{owner_reference, standard_labels};

/// Cluster-mode server configuration mounted into every pod.
///
/// `cluster-config-file` lives on the data volume so membership survives
/// pod restarts; the operator resets it explicitly when rotating a standby.
const REDIS_CONF: &str = "\
port 6379
cluster-enabled yes
cluster-config-file /data/nodes.conf
cluster-node-timeout 5000
appendonly yes
bind 0.0.0.0
";

pub fn config_map_name(cluster_name: &str) -> String {
    format!("{}-config", cluster_name)
}

/// Generate the ConfigMap containing redis.conf
pub fn generate_config_map(cluster: &RedisCluster) -> ConfigMap {
    let cluster_name = cluster.name_any();

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "redis.conf".to_string(),
            REDIS_CONF.to_string(),
        )])),
        ..Default::default()
    }
}
