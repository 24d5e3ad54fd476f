//! Configuration management with file persistence
//!
//! One TOML file supplies everything the orchestrator needs: the model
//! catalog, routing policy (preferences, blocklist, priority mode), retry
//! and consensus settings, the availability TTL, the local memory budget,
//! analyzer thresholds, and per-provider gates. Credentials never live in
//! the file; only `configured` booleans do, and the actual keys come from
//! `MAESTRO_<PROVIDER>_API_KEY` environment variables.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

use crate::analyzer::AnalyzerConfig;
use crate::availability::ProviderGate;
use crate::consensus::{ConsensusConfig, Quorum};
use crate::executor::RetryPolicy;
use crate::registry::{ModelKey, ModelProfile};
use crate::routing::{PriorityMode, SelectionPolicy};

/// Maestro configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub routing: RoutingConfig,
    pub retry: RetryPolicy,
    pub consensus: ConsensusSettings,
    pub availability: AvailabilityConfig,
    pub resident: ResidentConfig,
    pub analyzer: AnalyzerConfig,
    /// Keyed by provider name
    pub providers: HashMap<String, ProviderSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub models: Vec<ModelProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub default_priority: PriorityMode,
    pub max_candidates: usize,
    pub allow_experimental: bool,
    /// Per-task-type preference lists, `task type -> ["provider/model", ..]`
    pub preferences: HashMap<String, Vec<String>>,
    pub blocklist: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_priority: PriorityMode::Balanced,
            max_candidates: 5,
            allow_experimental: false,
            preferences: HashMap::new(),
            blocklist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    pub default_n: usize,
    /// Fixed quorum size; absent means strict majority
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quorum_votes: Option<u32>,
    pub deadline_secs: u64,
    pub attempt_timeout_secs: u64,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            default_n: 3,
            quorum_votes: None,
            deadline_secs: 120,
            attempt_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    pub ttl_secs: u64,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidentConfig {
    pub memory_budget_mb: u64,
}

impl Default for ResidentConfig {
    fn default() -> Self {
        Self {
            memory_budget_mb: 16_384,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Credential present (the secret itself is env-only)
    pub configured: bool,
    /// Integration enabled for ordinary selection
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("MAESTRO_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("maestro")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default path, or defaults if absent
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate cross-field invariants. Unknown task types or malformed
    /// model references are rejected at load time, never silently ignored.
    pub fn validate(&self) -> anyhow::Result<()> {
        for key in self.routing.preferences.keys() {
            key.parse::<crate::analyzer::TaskType>()
                .map_err(|_| anyhow!("Unknown task type in routing.preferences: {}", key))?;
        }
        for (task, models) in &self.routing.preferences {
            for model in models {
                model
                    .parse::<ModelKey>()
                    .map_err(|_| anyhow!("Malformed model reference '{}' for task '{}'", model, task))?;
            }
        }
        for model in &self.routing.blocklist {
            model
                .parse::<ModelKey>()
                .map_err(|_| anyhow!("Malformed model reference in blocklist: {}", model))?;
        }
        if self.routing.max_candidates == 0 {
            return Err(anyhow!("routing.max_candidates must be at least 1"));
        }
        if self.consensus.default_n == 0 {
            return Err(anyhow!("consensus.default_n must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.analyzer.length_weight)
            || !(0.0..=1.0).contains(&self.analyzer.structure_weight)
        {
            return Err(anyhow!("analyzer weights must be between 0.0 and 1.0"));
        }
        Ok(())
    }

    /// API key for a provider, from `MAESTRO_<PROVIDER>_API_KEY`
    pub fn provider_api_key(provider: &str) -> Option<String> {
        let var = format!("MAESTRO_{}_API_KEY", provider.to_uppercase().replace('-', "_"));
        env::var(var).ok()
    }

    /// Redacted key for display, e.g. `***a1b2`
    pub fn redacted_api_key(provider: &str) -> Option<String> {
        Self::provider_api_key(provider).map(|key| {
            if key.len() <= 4 {
                "***".to_string()
            } else {
                format!("***{}", &key[key.len() - 4..])
            }
        })
    }

    /// Availability gates per provider. A provider counts as configured
    /// when the config says so or its env credential is present.
    pub fn provider_gates(&self) -> HashMap<String, ProviderGate> {
        self.providers
            .iter()
            .map(|(name, settings)| {
                (
                    name.clone(),
                    ProviderGate {
                        configured: settings.configured
                            || Self::provider_api_key(name).is_some(),
                        enabled: settings.enabled,
                    },
                )
            })
            .collect()
    }

    /// Selection policy derived from the routing section
    pub fn selection_policy(&self) -> anyhow::Result<SelectionPolicy> {
        let mut policy = SelectionPolicy::new();
        policy.max_candidates = self.routing.max_candidates;
        policy.allow_experimental = self.routing.allow_experimental;
        for (task, models) in &self.routing.preferences {
            let task = task
                .parse::<crate::analyzer::TaskType>()
                .map_err(|_| anyhow!("Unknown task type in routing.preferences: {}", task))?;
            let keys = models
                .iter()
                .map(|m| m.parse::<ModelKey>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| anyhow!("{}", e))?;
            policy.preferences.insert(task, keys);
        }
        for model in &self.routing.blocklist {
            policy
                .blocklist
                .insert(model.parse::<ModelKey>().map_err(|e| anyhow!("{}", e))?);
        }
        Ok(policy)
    }

    /// Consensus engine settings derived from the consensus section
    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            quorum: match self.consensus.quorum_votes {
                Some(votes) => Quorum::Count(votes),
                None => Quorum::Majority,
            },
            deadline_secs: self.consensus.deadline_secs,
            attempt_timeout_secs: self.consensus.attempt_timeout_secs,
        }
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "routing.default_priority" => Ok(self.routing.default_priority.to_string()),
            "routing.max_candidates" => Ok(self.routing.max_candidates.to_string()),
            "routing.allow_experimental" => Ok(self.routing.allow_experimental.to_string()),
            "retry.max_total_attempts" => Ok(self.retry.max_total_attempts.to_string()),
            "retry.max_retries_per_candidate" => {
                Ok(self.retry.max_retries_per_candidate.to_string())
            }
            "retry.attempt_timeout_secs" => Ok(self.retry.attempt_timeout_secs.to_string()),
            "consensus.default_n" => Ok(self.consensus.default_n.to_string()),
            "consensus.deadline_secs" => Ok(self.consensus.deadline_secs.to_string()),
            "availability.ttl_secs" => Ok(self.availability.ttl_secs.to_string()),
            "resident.memory_budget_mb" => Ok(self.resident.memory_budget_mb.to_string()),
            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "routing.default_priority" => {
                self.routing.default_priority = value
                    .parse()
                    .map_err(|_| anyhow!("Invalid priority mode: {}", value))?;
            }
            "routing.max_candidates" => {
                let parsed: usize = value
                    .parse()
                    .with_context(|| format!("Invalid max_candidates value: {}", value))?;
                if parsed == 0 {
                    return Err(anyhow!("max_candidates must be at least 1"));
                }
                self.routing.max_candidates = parsed;
            }
            "routing.allow_experimental" => {
                self.routing.allow_experimental = value
                    .parse()
                    .with_context(|| format!("Invalid allow_experimental value: {}", value))?;
            }
            "retry.max_total_attempts" => {
                self.retry.max_total_attempts = value
                    .parse()
                    .with_context(|| format!("Invalid max_total_attempts value: {}", value))?;
            }
            "retry.max_retries_per_candidate" => {
                self.retry.max_retries_per_candidate = value
                    .parse()
                    .with_context(|| format!("Invalid max_retries_per_candidate value: {}", value))?;
            }
            "retry.attempt_timeout_secs" => {
                self.retry.attempt_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid attempt_timeout_secs value: {}", value))?;
            }
            "consensus.default_n" => {
                let parsed: usize = value
                    .parse()
                    .with_context(|| format!("Invalid default_n value: {}", value))?;
                if parsed == 0 {
                    return Err(anyhow!("default_n must be at least 1"));
                }
                self.consensus.default_n = parsed;
            }
            "consensus.deadline_secs" => {
                self.consensus.deadline_secs = value
                    .parse()
                    .with_context(|| format!("Invalid deadline_secs value: {}", value))?;
            }
            "availability.ttl_secs" => {
                self.availability.ttl_secs = value
                    .parse()
                    .with_context(|| format!("Invalid ttl_secs value: {}", value))?;
            }
            "resident.memory_budget_mb" => {
                self.resident.memory_budget_mb = value
                    .parse()
                    .with_context(|| format!("Invalid memory_budget_mb value: {}", value))?;
            }
            "api_key" | "provider.api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration. \
                     Set the MAESTRO_<PROVIDER>_API_KEY environment variable instead."
                ));
            }
            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all scalar configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "routing.default_priority",
            "routing.max_candidates",
            "routing.allow_experimental",
            "retry.max_total_attempts",
            "retry.max_retries_per_candidate",
            "retry.attempt_timeout_secs",
            "consensus.default_n",
            "consensus.deadline_secs",
            "availability.ttl_secs",
            "resident.memory_budget_mb",
        ];
        keys.into_iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }
}
