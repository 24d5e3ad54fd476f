//! Maestro Core Library
//!
//! This crate provides the model-routing core for Maestro, including:
//! - Task analysis (prompt classification, complexity, context estimation)
//! - Model registry (immutable-after-load catalog with atomic reload)
//! - Capability-constrained scoring and candidate selection
//! - Fallback execution with classified retries and attempt ceilings
//! - Multi-model consensus voting with quorum cancellation
//! - Provider availability tracking (TTL cache, fast auth failover)
//! - Resident model management for locally-hosted models
//! - Usage aggregation for cost reporting

pub mod analyzer;
pub mod availability;
pub mod config;
pub mod consensus;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod resident;
pub mod routing;
pub mod usage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::analyzer::{TaskHints, TaskRequirement, TaskType};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::executor::{ExecutionResult, RetryPolicy};
    pub use crate::orchestrator::{ModelFilter, Orchestrator};
    pub use crate::registry::{MaturityTier, ModelKey, ModelProfile};
    pub use crate::routing::PriorityMode;
}
