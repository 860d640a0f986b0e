//! StatefulSet generation for the data-plane pods
//!
//! The replica count always includes the standby group: pods
//! `0..activeShards*(replicasPerShard+1)` carry the active shards, the last
//! group is the pre-warmed standby primary and its replicas.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, ResourceRequirements, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::RedisCluster;
use crate::resources::common::{owner_reference, standard_labels};
use crate::resources::configmap::config_map_name;

/// Exporter sidecar serving per-pod metrics on 9121, scraped into the
/// time-series endpoint the decision engine reads from.
const EXPORTER_IMAGE: &str = "bitnamilegacy/redis-exporter:1.59.0";

/// Generate the StatefulSet running all shard pods
pub fn generate_statefulset(cluster: &RedisCluster) -> StatefulSet {
    let cluster_name = cluster.name_any();
    let labels = standard_labels(&cluster_name);
    let replicas = cluster.total_pods();

    let redis_container = Container {
        name: "redis".to_string(),
        image: Some(format!("redis:{}", cluster.spec.redis_version)),
        command: Some(vec![
            "redis-server".to_string(),
            "/conf/redis.conf".to_string(),
        ]),
        ports: Some(vec![ContainerPort {
            container_port: 6379,
            name: Some("redis".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "config".to_string(),
                mount_path: "/conf".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "data".to_string(),
                mount_path: "/data".to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let exporter_container = Container {
        name: "redis-exporter".to_string(),
        image: Some(EXPORTER_IMAGE.to_string()),
        args: Some(vec!["--redis.addr=redis://localhost:6379".to_string()]),
        ports: Some(vec![ContainerPort {
            container_port: 9121,
            name: Some("metrics".to_string()),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("100m".to_string())),
                ("memory".to_string(), Quantity("128Mi".to_string())),
            ])),
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("200m".to_string())),
                ("memory".to_string(), Quantity("256Mi".to_string())),
            ])),
            ..Default::default()
        }),
        ..Default::default()
    };

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(cluster_name.clone()),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: cluster.headless_service_name(),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(BTreeMap::from([
                        ("prometheus.io/scrape".to_string(), "true".to_string()),
                        ("prometheus.io/port".to_string(), "9121".to_string()),
                        ("prometheus.io/path".to_string(), "/metrics".to_string()),
                    ])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    volumes: Some(vec![Volume {
                        name: "config".to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: config_map_name(&cluster_name),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    containers: vec![redis_container, exporter_container],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some("data".to_string()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    resources: Some(VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_string(),
                            Quantity("1Gi".to_string()),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
