pub mod common;
pub mod configmap;
pub mod job;
pub mod service;
pub mod statefulset;

pub use common::{owner_reference, pod_selector, standard_labels};
pub use job::{DrainPlan, JobOutcome, job_outcome};
