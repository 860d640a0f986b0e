pub mod context;
pub mod decision;
pub mod error;
pub mod health_gate;
pub mod metrics_probe;
pub mod protocol;
pub mod provision;
pub mod reconciler;
pub mod scale_down;
pub mod scale_up;
pub mod state_machine;
pub mod status;
pub mod validation;
pub mod workload;

pub use context::Context;
pub use decision::{MIN_UNDERUTILIZED_FOR_SHRINK, Verdict, decide};
pub use error::{BackoffConfig, Error, Result};
pub use health_gate::GateOutcome;
pub use metrics_probe::{MetricsProbe, ShardLoad};
pub use reconciler::{FINALIZER, error_policy, reconcile};
pub use state_machine::{Transition, is_valid_transition, valid_targets};
pub use status::{ConditionBuilder, StatusManager, cooldown_remaining, spec_changed};
pub use validation::{ABSOLUTE_MIN_SHARDS, MAX_SHARDS, validate_spec};
