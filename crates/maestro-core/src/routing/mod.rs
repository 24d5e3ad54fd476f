//! Capability-constrained model routing
//!
//! Routing happens in two strictly ordered stages:
//!
//! - **Scoring**: hard disqualification rules (context window, capability
//!   flags, maturity gate, provider availability) run first in a fixed
//!   order; survivors get a soft score whose term weights depend on the
//!   operator's priority mode.
//!
//! - **Selection**: operator blocklist and local-memory feasibility are
//!   applied, eligible models are ranked with deterministic tie-breaks,
//!   and preference lists or explicit overrides pre-seed the head of the
//!   resulting fallback chain.
//!
//! Both stages are synchronous pure computation over an immutable registry
//! snapshot; nothing here performs I/O.

mod score;
mod select;
mod types;

pub use score::{DEFAULT_COMPLEXITY_BONUS_THRESHOLD, ScoreContext, affinity, score};
pub use select::Selector;
pub use types::{
    CandidateScore, Disqualification, FallbackChain, PriorityMode, RankedCandidate, ScoreOutcome,
    ScoreWeights, SelectionPolicy, SelectionReason,
};
