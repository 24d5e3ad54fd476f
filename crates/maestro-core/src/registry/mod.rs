//! Model registry - immutable-after-load catalog of model profiles
//!
//! The registry holds one `ModelProfile` per `(provider, model_id)` pair and
//! is the single source of truth for capability, cost, and maturity data.
//! Profiles are validated on load (all-or-nothing) and the loaded set is
//! read-only at runtime; a reload swaps the whole snapshot atomically so
//! concurrent readers always observe a consistent catalog.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::usage::TokenUsage;

/// Unique key for a model: which provider serves it, and its id there
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub provider: String,
    pub model_id: String,
}

impl ModelKey {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
        }
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model_id)
    }
}

impl std::str::FromStr for ModelKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((provider, model_id)) if !provider.is_empty() && !model_id.is_empty() => {
                Ok(Self::new(provider, model_id))
            }
            _ => Err(Error::InvalidInput(format!(
                "Model reference '{}' is not in provider/model form",
                s
            ))),
        }
    }
}

/// How production-ready a model integration is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaturityTier {
    Production,
    Beta,
    Experimental,
    Planned,
}

impl MaturityTier {
    /// Numeric rank for tie-breaking, higher is more mature
    pub fn rank(&self) -> u8 {
        match self {
            Self::Production => 3,
            Self::Beta => 2,
            Self::Experimental => 1,
            Self::Planned => 0,
        }
    }
}

impl std::fmt::Display for MaturityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Beta => write!(f, "beta"),
            Self::Experimental => write!(f, "experimental"),
            Self::Planned => write!(f, "planned"),
        }
    }
}

/// Capability flags a model may support
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub function_calling: bool,
    #[serde(default)]
    pub structured_output: bool,
}

impl Capabilities {
    /// True when every flag required by `other` is supported by `self`
    pub fn covers(&self, other: &Capabilities) -> bool {
        (!other.vision || self.vision)
            && (!other.function_calling || self.function_calling)
            && (!other.structured_output || self.structured_output)
    }
}

/// Capability, cost, and quality record for one model at one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub provider: String,
    pub model_id: String,
    /// Maximum context window size in tokens
    pub context_window: u32,
    /// Cost per million input tokens in USD
    pub input_cost_per_million: f64,
    /// Cost per million output tokens in USD
    pub output_cost_per_million: f64,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Coding affinity subscore (0-100)
    pub coding: u8,
    /// Reasoning affinity subscore (0-100)
    pub reasoning: u8,
    /// Relative speed rating (1-5, higher is faster)
    pub speed: u8,
    pub maturity: MaturityTier,
    /// Whether this model runs on locally-managed inference hardware
    #[serde(default)]
    pub local: bool,
    /// Estimated resident memory footprint for local models, in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resident_size_mb: Option<u64>,
}

impl ModelProfile {
    pub fn key(&self) -> ModelKey {
        ModelKey::new(self.provider.clone(), self.model_id.clone())
    }

    /// Blended per-million cost with 3:1 input:output weighting
    pub fn blended_cost(&self) -> f64 {
        (3.0 * self.input_cost_per_million + self.output_cost_per_million) / 4.0
    }

    /// Cost of a concrete usage at this profile's pricing, split input/output
    pub fn cost_for(&self, tokens: &TokenUsage) -> (f64, f64) {
        let input = (tokens.input_tokens as f64 / 1_000_000.0) * self.input_cost_per_million;
        let output = (tokens.output_tokens as f64 / 1_000_000.0) * self.output_cost_per_million;
        (input, output)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.provider.is_empty() || self.model_id.is_empty() {
            return Err("empty provider or model_id".to_string());
        }
        if self.context_window == 0 {
            return Err(format!("{}: non-positive context window", self.key()));
        }
        if !self.input_cost_per_million.is_finite()
            || !self.output_cost_per_million.is_finite()
            || self.input_cost_per_million < 0.0
            || self.output_cost_per_million < 0.0
        {
            return Err(format!("{}: missing or negative cost", self.key()));
        }
        if self.coding > 100 || self.reasoning > 100 {
            return Err(format!("{}: affinity subscore out of 0-100", self.key()));
        }
        if !(1..=5).contains(&self.speed) {
            return Err(format!("{}: speed rating out of 1-5", self.key()));
        }
        if self.local && self.resident_size_mb.is_none() {
            return Err(format!("{}: local model without resident_size_mb", self.key()));
        }
        Ok(())
    }
}

/// One consistent, immutable view of the catalog
#[derive(Debug)]
pub struct RegistrySnapshot {
    models: Vec<ModelProfile>,
    index: HashMap<ModelKey, usize>,
    cost_min: f64,
    cost_max: f64,
}

impl RegistrySnapshot {
    fn build(models: Vec<ModelProfile>) -> Result<Self> {
        let mut index = HashMap::with_capacity(models.len());
        for (i, profile) in models.iter().enumerate() {
            profile.validate().map_err(Error::RegistryLoad)?;
            if index.insert(profile.key(), i).is_some() {
                return Err(Error::RegistryLoad(format!(
                    "duplicate model key '{}'",
                    profile.key()
                )));
            }
        }

        let mut cost_min = f64::INFINITY;
        let mut cost_max = f64::NEG_INFINITY;
        for profile in &models {
            let blended = profile.blended_cost();
            cost_min = cost_min.min(blended);
            cost_max = cost_max.max(blended);
        }
        if models.is_empty() {
            cost_min = 0.0;
            cost_max = 0.0;
        }

        Ok(Self {
            models,
            index,
            cost_min,
            cost_max,
        })
    }

    /// Look up a profile by key
    pub fn get(&self, key: &ModelKey) -> Option<&ModelProfile> {
        self.index.get(key).map(|&i| &self.models[i])
    }

    /// All profiles in stable load order
    pub fn all(&self) -> &[ModelProfile] {
        &self.models
    }

    /// Position of a key in the stable load order
    pub fn position(&self, key: &ModelKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Profiles matching a predicate, in load order
    pub fn filter(&self, predicate: impl Fn(&ModelProfile) -> bool) -> Vec<&ModelProfile> {
        self.models.iter().filter(|p| predicate(p)).collect()
    }

    /// Observed blended-cost range across the catalog, used to normalize
    /// the scorer's cost term
    pub fn cost_range(&self) -> (f64, f64) {
        (self.cost_min, self.cost_max)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Registry handle shared across components
///
/// Readers clone the current snapshot `Arc` and work against it for the rest
/// of their request; `reload` replaces the snapshot in one swap, never
/// mutating a published one.
#[derive(Debug)]
pub struct ModelRegistry {
    snapshot: RwLock<Arc<RegistrySnapshot>>,
}

impl ModelRegistry {
    /// Load a catalog, validating every entry. A single bad entry fails the
    /// whole load.
    pub fn load(models: Vec<ModelProfile>) -> Result<Self> {
        let snapshot = RegistrySnapshot::build(models)?;
        Ok(Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Replace the whole catalog atomically. On validation failure the
    /// previous snapshot stays in place untouched.
    pub fn reload(&self, models: Vec<ModelProfile>) -> Result<()> {
        let next = Arc::new(RegistrySnapshot::build(models)?);
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;
        Ok(())
    }

    /// Current snapshot; cheap to clone, safe to hold across awaits
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
