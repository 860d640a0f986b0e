//! Phase transition table for the RedisCluster lifecycle
//!
//! The reconciliation state machine has a small, fixed set of legal moves.
//! `StatusManager` consults this table on every status write so a coding
//! error in a protocol (or a stale cached object) cannot silently teleport
//! a cluster between phases.

use crate::crd::ClusterPhase;

/// A legal phase transition with its triggering description
#[derive(Debug)]
pub struct Transition {
    pub from: ClusterPhase,
    pub to: ClusterPhase,
    pub description: &'static str,
}

impl Transition {
    const fn new(from: ClusterPhase, to: ClusterPhase, description: &'static str) -> Self {
        Self {
            from,
            to,
            description,
        }
    }
}

/// All legal phase transitions.
///
/// Staying in the same phase is always legal (status refreshes) and is not
/// listed.
pub const TRANSITIONS: &[Transition] = &[
    // Bootstrap hands the unjoined standby group to provisioning; discovery
    // of an externally-managed cluster lands directly in Stable.
    Transition::new(
        ClusterPhase::Uninitialized,
        ClusterPhase::ProvisioningStandby,
        "initial topology formed, joining standby group",
    ),
    Transition::new(
        ClusterPhase::Uninitialized,
        ClusterPhase::Stable,
        "existing cluster discovered",
    ),
    // Stable is the only phase that starts a protocol.
    Transition::new(
        ClusterPhase::Stable,
        ClusterPhase::ScalingUp,
        "grow verdict",
    ),
    Transition::new(
        ClusterPhase::Stable,
        ClusterPhase::ScalingDown,
        "shrink verdict",
    ),
    // Scale-up completes through provisioning; any protocol may abort back
    // to Stable or park as Failed.
    Transition::new(
        ClusterPhase::ScalingUp,
        ClusterPhase::ProvisioningStandby,
        "reshard complete",
    ),
    Transition::new(
        ClusterPhase::ScalingUp,
        ClusterPhase::Stable,
        "scale-up aborted",
    ),
    Transition::new(
        ClusterPhase::ScalingUp,
        ClusterPhase::Failed,
        "scale-up invariant violated",
    ),
    Transition::new(
        ClusterPhase::ProvisioningStandby,
        ClusterPhase::Stable,
        "standby joined",
    ),
    Transition::new(
        ClusterPhase::ProvisioningStandby,
        ClusterPhase::Failed,
        "standby join retries exhausted",
    ),
    Transition::new(
        ClusterPhase::ScalingDown,
        ClusterPhase::Stable,
        "drain and rotation complete (or aborted)",
    ),
    Transition::new(
        ClusterPhase::ScalingDown,
        ClusterPhase::Failed,
        "scale-down invariant violated",
    ),
    // Failed clears only through operator intervention.
    Transition::new(
        ClusterPhase::Failed,
        ClusterPhase::Stable,
        "spec edited by operator",
    ),
];

/// Whether moving between two phases is legal.
pub fn is_valid_transition(from: ClusterPhase, to: ClusterPhase) -> bool {
    from == to || TRANSITIONS.iter().any(|t| t.from == from && t.to == to)
}

/// Phases a cluster may move to from the given phase.
pub fn valid_targets(from: ClusterPhase) -> Vec<ClusterPhase> {
    TRANSITIONS
        .iter()
        .filter(|t| t.from == from)
        .map(|t| t.to)
        .collect()
}
