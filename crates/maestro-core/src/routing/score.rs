//! Model scoring against a task requirement
//!
//! Hard disqualification rules run first in a fixed order; only models that
//! pass all of them receive a soft score. Scoring is a pure function of its
//! inputs: identical (profile, requirement, mode, context) always produces
//! the identical outcome.

use crate::analyzer::{TaskRequirement, TaskType};
use crate::availability::Availability;
use crate::registry::{MaturityTier, ModelProfile};

use super::types::{Disqualification, PriorityMode, ScoreOutcome, ScoreWeights};

/// Complexity above which high-reasoning models earn the bonus term
pub const DEFAULT_COMPLEXITY_BONUS_THRESHOLD: f64 = 0.6;

/// Everything scoring needs beyond the profile and requirement. Passing
/// availability in (rather than reading a cache here) keeps the function
/// pure and testable.
#[derive(Debug, Clone)]
pub struct ScoreContext {
    pub availability: Availability,
    /// Observed blended-cost range across the registry snapshot
    pub cost_range: (f64, f64),
    pub allow_experimental: bool,
    pub complexity_bonus_threshold: f64,
}

impl ScoreContext {
    pub fn new(availability: Availability, cost_range: (f64, f64), allow_experimental: bool) -> Self {
        Self {
            availability,
            cost_range,
            allow_experimental,
            complexity_bonus_threshold: DEFAULT_COMPLEXITY_BONUS_THRESHOLD,
        }
    }
}

/// Score one profile for one requirement under one priority mode
pub fn score(
    profile: &ModelProfile,
    requirement: &TaskRequirement,
    mode: PriorityMode,
    ctx: &ScoreContext,
) -> ScoreOutcome {
    // Disqualification rules, fixed order. The first violated rule is the
    // reported reason.
    if profile.context_window < requirement.min_context_tokens {
        return ScoreOutcome::Disqualified(Disqualification::ContextWindow {
            required: requirement.min_context_tokens,
            available: profile.context_window,
        });
    }
    if requirement.required.vision && !profile.capabilities.vision {
        return ScoreOutcome::Disqualified(Disqualification::VisionUnsupported);
    }
    if requirement.required.function_calling && !profile.capabilities.function_calling {
        return ScoreOutcome::Disqualified(Disqualification::FunctionCallingUnsupported);
    }
    if requirement.required.structured_output && !profile.capabilities.structured_output {
        return ScoreOutcome::Disqualified(Disqualification::StructuredOutputUnsupported);
    }
    match profile.maturity {
        MaturityTier::Planned => {
            return ScoreOutcome::Disqualified(Disqualification::MaturityGated {
                tier: profile.maturity,
            });
        }
        MaturityTier::Experimental if !ctx.allow_experimental => {
            return ScoreOutcome::Disqualified(Disqualification::MaturityGated {
                tier: profile.maturity,
            });
        }
        _ => {}
    }
    if let Availability::Unavailable { reason, .. } = &ctx.availability {
        return ScoreOutcome::Disqualified(Disqualification::ProviderUnavailable {
            reason: *reason,
        });
    }

    let weights = ScoreWeights::for_mode(mode);

    let primary = affinity(requirement.primary, profile);
    let secondary = if requirement.secondary.is_empty() {
        primary
    } else {
        requirement
            .secondary
            .iter()
            .map(|t| affinity(*t, profile))
            .sum::<f64>()
            / requirement.secondary.len() as f64
    };
    let complexity_bonus = if requirement.complexity >= ctx.complexity_bonus_threshold {
        profile.reasoning as f64 / 100.0
    } else {
        0.0
    };
    let speed = profile.speed as f64 / 5.0;
    let cost = cost_score(profile.blended_cost(), ctx.cost_range);

    let total = weights.base
        + weights.primary * primary
        + weights.secondary * secondary
        + weights.complexity * complexity_bonus
        + weights.speed * speed
        + weights.cost * cost;

    ScoreOutcome::Eligible(total.clamp(0.0, 1.0))
}

/// Per-task-type affinity in [0, 1], blending the profile's coding and
/// reasoning subscores
pub fn affinity(task: TaskType, profile: &ModelProfile) -> f64 {
    let c = profile.coding as f64 / 100.0;
    let r = profile.reasoning as f64 / 100.0;
    match task {
        TaskType::CodeGeneration => c,
        TaskType::Debugging => 0.9 * c + 0.1 * r,
        TaskType::Testing => 0.8 * c + 0.2 * r,
        TaskType::SecurityAudit => 0.6 * c + 0.4 * r,
        TaskType::Documentation => 0.5 * c + 0.5 * r,
        TaskType::DataAnalysis => 0.4 * c + 0.6 * r,
        TaskType::ArchitecturalDesign => 0.3 * c + 0.7 * r,
        TaskType::Reasoning => r,
        TaskType::CreativeWriting => 0.1 * c + 0.9 * r,
        TaskType::Translation => 0.2 * c + 0.8 * r,
        TaskType::General => (c + r) / 2.0,
        TaskType::Vision => {
            if profile.capabilities.vision {
                1.0
            } else {
                0.0
            }
        }
    }
}

/// Inverse blended cost normalized against the observed range; the cheapest
/// model in the catalog scores 1.0, the most expensive 0.0.
fn cost_score(blended: f64, (min, max): (f64, f64)) -> f64 {
    if max <= min {
        return 0.5;
    }
    ((max - blended) / (max - min)).clamp(0.0, 1.0)
}
