pub mod topology;

pub use topology::{
    NodeInfo, NodeRole, REDIS_PORT, SLOT_SPACE, TopologyClient, TopologyError,
    assigned_slot_total, parse_cluster_nodes, primary_by_ip, zero_slot_primaries,
};
