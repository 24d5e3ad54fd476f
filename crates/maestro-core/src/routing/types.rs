//! Types for capability-constrained model routing

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::analyzer::TaskType;
use crate::availability::UnavailabilityReason;
use crate::error::Error;
use crate::registry::{MaturityTier, ModelKey};

/// What the operator wants optimized when several models qualify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityMode {
    #[default]
    Balanced,
    Quality,
    Speed,
    Cost,
}

impl std::str::FromStr for PriorityMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "balanced" => Ok(Self::Balanced),
            "quality" => Ok(Self::Quality),
            "speed" => Ok(Self::Speed),
            "cost" => Ok(Self::Cost),
            other => Err(Error::InvalidInput(format!(
                "Unknown priority mode: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PriorityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Balanced => write!(f, "balanced"),
            Self::Quality => write!(f, "quality"),
            Self::Speed => write!(f, "speed"),
            Self::Cost => write!(f, "cost"),
        }
    }
}

/// Hard-rule exclusion, distinct from a low score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum Disqualification {
    ContextWindow { required: u32, available: u32 },
    VisionUnsupported,
    FunctionCallingUnsupported,
    StructuredOutputUnsupported,
    MaturityGated { tier: MaturityTier },
    ProviderUnavailable { reason: UnavailabilityReason },
    Blocklisted,
    ResourceInfeasible { size_mb: u64, budget_mb: u64 },
}

impl Disqualification {
    /// Stable reason code for logs and attempt histories
    pub fn code(&self) -> &'static str {
        match self {
            Self::ContextWindow { .. } => "context_window",
            Self::VisionUnsupported => "vision_unsupported",
            Self::FunctionCallingUnsupported => "function_calling_unsupported",
            Self::StructuredOutputUnsupported => "structured_output_unsupported",
            Self::MaturityGated { .. } => "maturity_gated",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::Blocklisted => "blocklisted",
            Self::ResourceInfeasible { .. } => "resource_infeasible",
        }
    }
}

impl std::fmt::Display for Disqualification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Scoring verdict for one model under one requirement
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreOutcome {
    Eligible(f64),
    Disqualified(Disqualification),
}

/// Ephemeral per-requirement score; never cached across requirements
#[derive(Debug, Clone)]
pub struct CandidateScore {
    pub key: ModelKey,
    pub outcome: ScoreOutcome,
}

/// Why a candidate occupies its position in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    /// Caller explicitly requested this model
    OverrideRequested,
    /// Operator preference list entry, tried in listed order
    Preferred { position: usize },
    /// Earned its slot by score
    Ranked,
}

/// One entry of a fallback chain
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub key: ModelKey,
    pub score: f64,
    pub reason: SelectionReason,
}

/// Ordered, deduplicated candidate list for one task type, plus the models
/// that were excluded and why. Substituting any entry after the first is a
/// fallback and is disclosed through the attempt history.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    pub task_type: TaskType,
    pub candidates: Vec<RankedCandidate>,
    pub skipped: Vec<(ModelKey, Disqualification)>,
}

impl FallbackChain {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ModelKey> {
        self.candidates.iter().map(|c| &c.key)
    }
}

/// Term weights combined into a final score; per-mode presets re-weight the
/// same components rather than changing the formula.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub base: f64,
    pub primary: f64,
    pub secondary: f64,
    pub complexity: f64,
    pub speed: f64,
    pub cost: f64,
}

impl ScoreWeights {
    pub fn for_mode(mode: PriorityMode) -> Self {
        match mode {
            PriorityMode::Balanced => Self {
                base: 0.50,
                primary: 0.30,
                secondary: 0.10,
                complexity: 0.10,
                speed: 0.0,
                cost: 0.0,
            },
            PriorityMode::Quality => Self {
                base: 0.35,
                primary: 0.40,
                secondary: 0.10,
                complexity: 0.15,
                speed: 0.0,
                cost: 0.0,
            },
            PriorityMode::Speed => Self {
                base: 0.30,
                primary: 0.25,
                secondary: 0.05,
                complexity: 0.05,
                speed: 0.35,
                cost: 0.0,
            },
            PriorityMode::Cost => Self {
                base: 0.30,
                primary: 0.25,
                secondary: 0.05,
                complexity: 0.05,
                speed: 0.0,
                cost: 0.35,
            },
        }
    }
}

/// Operator policy applied during selection
#[derive(Debug, Clone, Default)]
pub struct SelectionPolicy {
    /// Per-task-type preference lists, tried in listed order before ranking
    pub preferences: HashMap<TaskType, Vec<ModelKey>>,
    /// Models removed from consideration unconditionally
    pub blocklist: HashSet<ModelKey>,
    /// Allow experimental-maturity models into ordinary selection
    pub allow_experimental: bool,
    /// Bound on the synthesized chain length
    pub max_candidates: usize,
}

impl SelectionPolicy {
    pub fn new() -> Self {
        Self {
            max_candidates: 5,
            ..Default::default()
        }
    }
}
