//! Headless Service generation
//!
//! Each pod is addressable as `<pod>.<service>.<namespace>.svc.cluster.local`,
//! which is how the topology protocols reach individual shard primaries.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::RedisCluster;
use crate::resources::common::{owner_reference, standard_labels};

/// Generate the headless service governing the StatefulSet
pub fn generate_headless_service(cluster: &RedisCluster) -> Service {
    let cluster_name = cluster.name_any();
    let labels = standard_labels(&cluster_name);

    Service {
        metadata: ObjectMeta {
            name: Some(cluster.headless_service_name()),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(labels),
            ports: Some(vec![
                ServicePort {
                    name: Some("redis".to_string()),
                    port: 6379,
                    target_port: Some(IntOrString::Int(6379)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("metrics".to_string()),
                    port: 9121,
                    target_port: Some(IntOrString::Int(9121)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
