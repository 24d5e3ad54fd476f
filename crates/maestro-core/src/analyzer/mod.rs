//! Task analysis - prompt text to task requirements
//!
//! The analyzer is a pure function over the prompt text and optional caller
//! hints: no network calls, no clocks, O(prompt length). It classifies the
//! task into a closed set of task types, estimates complexity and minimum
//! context, and carries capability requirements through to selection.
//! Every threshold lives in `AnalyzerConfig`; the defaults are starting
//! points, not contracts.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::{Capabilities, ModelKey};

/// Closed classification of what a prompt is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeGeneration,
    Debugging,
    ArchitecturalDesign,
    Documentation,
    Testing,
    DataAnalysis,
    Reasoning,
    Vision,
    SecurityAudit,
    CreativeWriting,
    Translation,
    General,
}

impl TaskType {
    /// All variants, used for config validation and iteration
    pub const ALL: [TaskType; 12] = [
        TaskType::CodeGeneration,
        TaskType::Debugging,
        TaskType::ArchitecturalDesign,
        TaskType::Documentation,
        TaskType::Testing,
        TaskType::DataAnalysis,
        TaskType::Reasoning,
        TaskType::Vision,
        TaskType::SecurityAudit,
        TaskType::CreativeWriting,
        TaskType::Translation,
        TaskType::General,
    ];
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CodeGeneration => "code_generation",
            Self::Debugging => "debugging",
            Self::ArchitecturalDesign => "architectural_design",
            Self::Documentation => "documentation",
            Self::Testing => "testing",
            Self::DataAnalysis => "data_analysis",
            Self::Reasoning => "reasoning",
            Self::Vision => "vision",
            Self::SecurityAudit => "security_audit",
            Self::CreativeWriting => "creative_writing",
            Self::Translation => "translation",
            Self::General => "general",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "code_generation" => Ok(Self::CodeGeneration),
            "debugging" => Ok(Self::Debugging),
            "architectural_design" => Ok(Self::ArchitecturalDesign),
            "documentation" => Ok(Self::Documentation),
            "testing" => Ok(Self::Testing),
            "data_analysis" => Ok(Self::DataAnalysis),
            "reasoning" => Ok(Self::Reasoning),
            "vision" => Ok(Self::Vision),
            "security_audit" => Ok(Self::SecurityAudit),
            "creative_writing" => Ok(Self::CreativeWriting),
            "translation" => Ok(Self::Translation),
            "general" => Ok(Self::General),
            other => Err(Error::UnknownTaskType(other.to_string())),
        }
    }
}

/// Ephemeral per-request requirement derived from the prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequirement {
    pub primary: TaskType,
    pub secondary: Vec<TaskType>,
    /// Minimum context window the task needs, in tokens
    pub min_context_tokens: u32,
    /// Capability flags the task hard-requires
    pub required: Capabilities,
    /// Complexity estimate in [0, 1]
    pub complexity: f64,
    /// Explicit model override requested by the caller
    pub model_override: Option<ModelKey>,
}

/// Caller-supplied hints that constrain or override classification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskHints {
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub required: Capabilities,
    pub min_context_tokens: Option<u32>,
    pub model: Option<ModelKey>,
}

/// Tunable thresholds for classification heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Prompt length (chars) at which the length component saturates at 1.0
    pub length_saturation_chars: usize,
    /// Weight of the length component in the complexity blend
    pub length_weight: f64,
    /// Weight of the structure component in the complexity blend
    pub structure_weight: f64,
    /// Expected output size as a multiple of the input estimate
    pub response_multiplier: f64,
    /// Fixed token headroom added to the context estimate
    pub context_headroom_tokens: u32,
    /// Keyword hits needed before a type qualifies as a secondary
    pub secondary_min_hits: usize,
    /// Maximum number of secondary types reported
    pub max_secondary: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            length_saturation_chars: 4000,
            length_weight: 0.6,
            structure_weight: 0.4,
            response_multiplier: 2.0,
            context_headroom_tokens: 512,
            secondary_min_hits: 2,
            max_secondary: 2,
        }
    }
}

/// Keyword table in specificity order: when hit counts tie, the earlier
/// (more specific) type wins the primary slot.
const KEYWORDS: &[(TaskType, &[&str])] = &[
    (
        TaskType::SecurityAudit,
        &["vulnerab", "security audit", "exploit", "cve", "injection", "pentest", "insecure"],
    ),
    (
        TaskType::Debugging,
        &["debug", "stack trace", "traceback", "segfault", "panic", "fix this bug", "error message", "reproduce"],
    ),
    (
        TaskType::Testing,
        &["unit test", "test case", "integration test", "coverage", "assert", "regression test"],
    ),
    (
        TaskType::Translation,
        &["translate", "translation", "into french", "into spanish", "into german", "into japanese"],
    ),
    (
        TaskType::Vision,
        &["image", "screenshot", "photo", "diagram", "picture", "what is shown"],
    ),
    (
        TaskType::DataAnalysis,
        &["dataset", "csv", "analyze the data", "statistics", "correlation", "aggregate", "time series"],
    ),
    (
        TaskType::ArchitecturalDesign,
        &["architecture", "system design", "design a system", "scalab", "microservice", "tradeoff", "high-level design"],
    ),
    (
        TaskType::CodeGeneration,
        &["implement", "write a function", "write code", "refactor", "class", "module", "api endpoint", "script"],
    ),
    (
        TaskType::Documentation,
        &["document", "readme", "docstring", "changelog", "api reference", "write docs"],
    ),
    (
        TaskType::CreativeWriting,
        &["story", "poem", "fiction", "creative", "screenplay", "lyrics"],
    ),
    (
        TaskType::Reasoning,
        &["prove", "step by step", "logic puzzle", "deduce", "why does", "explain why", "reason about"],
    ),
];

/// Structure signals that raise the complexity estimate
const COMPLEXITY_MARKERS: &[&str] = &[
    "concurrent",
    "distributed",
    "optimize",
    "performance",
    "migration",
    "end-to-end",
    "architecture",
];

/// Pure prompt classifier
#[derive(Debug, Clone, Default)]
pub struct TaskAnalyzer {
    config: AnalyzerConfig,
}

impl TaskAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Derive a `TaskRequirement` from prompt text and optional hints
    pub fn analyze(&self, prompt: &str, hints: &TaskHints) -> TaskRequirement {
        let lower = prompt.to_lowercase();
        let hits = self.keyword_hits(&lower);

        let primary = hints
            .task_type
            .unwrap_or_else(|| self.primary_type(&hits));
        let secondary = self.secondary_types(&hits, primary);

        let mut required = hints.required;
        if primary == TaskType::Vision || secondary.contains(&TaskType::Vision) {
            required.vision = true;
        }

        let min_context_tokens = hints
            .min_context_tokens
            .unwrap_or_else(|| self.estimate_min_context(prompt));

        TaskRequirement {
            primary,
            secondary,
            min_context_tokens,
            required,
            complexity: self.complexity(prompt, &lower),
            model_override: hints.model.clone(),
        }
    }

    /// Rough token count: ~4 characters per token on average
    pub fn estimate_tokens(text: &str) -> u32 {
        (text.chars().count() / 4).max(1) as u32
    }

    fn keyword_hits(&self, lower: &str) -> Vec<(TaskType, usize)> {
        KEYWORDS
            .iter()
            .map(|(task, words)| {
                let count = words.iter().filter(|w| lower.contains(*w)).count();
                (*task, count)
            })
            .collect()
    }

    fn primary_type(&self, hits: &[(TaskType, usize)]) -> TaskType {
        // Max hit count; on ties the first (most specific) table entry wins
        // because only a strictly greater count displaces the current best.
        let mut best = (TaskType::General, 0usize);
        for &(task, count) in hits {
            if count > best.1 {
                best = (task, count);
            }
        }
        best.0
    }

    fn secondary_types(&self, hits: &[(TaskType, usize)], primary: TaskType) -> Vec<TaskType> {
        let mut qualified: Vec<(TaskType, usize)> = hits
            .iter()
            .filter(|(task, count)| *task != primary && *count >= self.config.secondary_min_hits)
            .copied()
            .collect();
        // Highest hit count first; table order already breaks ties since the
        // sort is stable.
        qualified.sort_by(|a, b| b.1.cmp(&a.1));
        qualified
            .into_iter()
            .take(self.config.max_secondary)
            .map(|(task, _)| task)
            .collect()
    }

    fn estimate_min_context(&self, prompt: &str) -> u32 {
        let input = Self::estimate_tokens(prompt) as f64;
        let expected = input * (1.0 + self.config.response_multiplier);
        expected.ceil() as u32 + self.config.context_headroom_tokens
    }

    fn complexity(&self, prompt: &str, lower: &str) -> f64 {
        let length = (prompt.chars().count() as f64
            / self.config.length_saturation_chars as f64)
            .min(1.0);

        let mut structure = 0.0;
        if prompt.contains("```") {
            structure += 0.3;
        }
        let list_lines = prompt
            .lines()
            .filter(|l| {
                let t = l.trim_start();
                t.starts_with('-') || t.starts_with('*') || t.chars().next().is_some_and(|c| c.is_ascii_digit())
            })
            .count();
        if list_lines >= 3 {
            structure += 0.2;
        }
        if prompt.matches('?').count() > 1 {
            structure += 0.1;
        }
        if prompt.split("\n\n").count() > 2 {
            structure += 0.2;
        }
        let marker_hits = COMPLEXITY_MARKERS
            .iter()
            .filter(|m| lower.contains(*m))
            .count();
        structure += (marker_hits as f64 * 0.1).min(0.2);

        (self.config.length_weight * length
            + self.config.structure_weight * structure.min(1.0))
        .clamp(0.0, 1.0)
    }
}
