//! Provider health tracking and SLA-based load balancing

pub mod balancer;
pub mod tracker;

pub use balancer::{ProviderScore, ScoreBreakdown, SlaBalancer, SlaTarget};
pub use tracker::{HealthSnapshot, HealthTracker, ProviderHealth, DEFAULT_EWMA_ALPHA};
