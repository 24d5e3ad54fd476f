//! Orchestrator facade - the exposed surface of the routing core
//!
//! Wires the analyzer, registry, selector, fallback executor, consensus
//! engine, availability tracker, resident manager, and usage ledger into
//! one handle. Callers route prompts, run consensus rounds, inspect the
//! catalog, and read provider status through this type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::analyzer::{TaskAnalyzer, TaskHints, TaskRequirement};
use crate::availability::{Availability, AvailabilityTracker};
use crate::config::Config;
use crate::consensus::{ConsensusEngine, ConsensusResult, StanceConfig};
use crate::error::{Error, Result};
use crate::executor::{Dispatcher, ExecutionResult, FallbackExecutor};
use crate::provider::{DispatchRequest, ProviderClient, ProviderClients};
use crate::registry::{MaturityTier, ModelProfile, ModelRegistry};
use crate::resident::ResidentModelManager;
use crate::routing::{PriorityMode, Selector};
use crate::usage::UsageLedger;

/// Filter for `list_models`
#[derive(Debug, Clone, Default)]
pub struct ModelFilter {
    pub provider: Option<String>,
    pub maturity: Option<MaturityTier>,
    pub local: Option<bool>,
}

impl ModelFilter {
    fn matches(&self, profile: &ModelProfile) -> bool {
        if let Some(provider) = &self.provider
            && &profile.provider != provider
        {
            return false;
        }
        if let Some(maturity) = self.maturity
            && profile.maturity != maturity
        {
            return false;
        }
        if let Some(local) = self.local
            && profile.local != local
        {
            return false;
        }
        true
    }
}

/// Model-routing orchestrator
pub struct Orchestrator {
    registry: Arc<ModelRegistry>,
    analyzer: TaskAnalyzer,
    selector: Selector,
    executor: FallbackExecutor,
    consensus: ConsensusEngine,
    availability: Arc<AvailabilityTracker>,
    ledger: Arc<UsageLedger>,
    default_priority: PriorityMode,
    default_consensus_n: usize,
    session: Option<String>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Classify a prompt without dispatching anything
    pub fn analyze(&self, prompt: &str) -> TaskRequirement {
        self.analyzer.analyze(prompt, &TaskHints::default())
    }

    /// Route a prompt: analyze, select, and execute the fallback chain.
    /// Returns the execution result or one terminal structured failure
    /// (`Error::ChainExhausted`) carrying the full attempt history.
    pub async fn route(
        &self,
        prompt: &str,
        hints: Option<TaskHints>,
    ) -> Result<ExecutionResult> {
        let hints = hints.unwrap_or_default();
        let requirement = self.analyzer.analyze(prompt, &hints);
        debug!(
            task = %requirement.primary,
            complexity = requirement.complexity,
            min_context = requirement.min_context_tokens,
            "Routing request"
        );

        let snapshot = self.registry.snapshot();
        if let Some(wanted) = &requirement.model_override
            && snapshot.get(wanted).is_none()
        {
            return Err(Error::ModelNotFound(wanted.to_string()));
        }
        let chain = self
            .selector
            .select(&requirement, self.default_priority, None);

        let request = DispatchRequest::new(prompt);
        self.executor
            .execute(&snapshot, &chain, &request, self.session.as_deref())
            .await
    }

    /// Run a consensus round across `n` distinct candidates
    pub async fn consensus(
        &self,
        prompt: &str,
        n: Option<usize>,
        stances: Option<StanceConfig>,
    ) -> Result<ConsensusResult> {
        let n = n.unwrap_or(self.default_consensus_n);
        if n == 0 {
            return Err(Error::InvalidInput(
                "consensus requires at least one candidate".to_string(),
            ));
        }

        let requirement = self.analyzer.analyze(prompt, &TaskHints::default());
        let snapshot = self.registry.snapshot();
        // Over-select so provider diversification has room to work with
        let chain = self
            .selector
            .select(&requirement, self.default_priority, Some(n * 2));
        let picks = ConsensusEngine::diversify(&chain.candidates, n);
        if picks.is_empty() {
            return Err(Error::NoSuitableModel(requirement.primary.to_string()));
        }

        let request = DispatchRequest::new(prompt);
        Ok(self
            .consensus
            .run(
                &snapshot,
                &picks,
                &request,
                stances.as_ref(),
                self.session.as_deref(),
            )
            .await)
    }

    /// Profiles currently in the catalog, optionally filtered
    pub fn list_models(&self, filter: Option<&ModelFilter>) -> Vec<ModelProfile> {
        let snapshot = self.registry.snapshot();
        snapshot
            .all()
            .iter()
            .filter(|p| filter.is_none_or(|f| f.matches(p)))
            .cloned()
            .collect()
    }

    /// Availability per known provider
    pub fn provider_status(&self) -> HashMap<String, Availability> {
        self.availability.statuses()
    }

    /// Replace the model catalog atomically
    pub fn reload_registry(&self, models: Vec<ModelProfile>) -> Result<()> {
        self.registry.reload(models)
    }

    /// Usage ledger handle for external reporting
    pub fn usage_ledger(&self) -> Arc<UsageLedger> {
        self.ledger.clone()
    }
}

/// Builder for `Orchestrator`
pub struct OrchestratorBuilder {
    config: Config,
    clients: ProviderClients,
    session: Option<String>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            clients: ProviderClients::new(),
            session: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn register_client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.register(client);
        self
    }

    /// Label attached to usage records written by this orchestrator
    pub fn session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let registry = Arc::new(ModelRegistry::load(config.registry.models.clone())?);
        let availability = Arc::new(
            AvailabilityTracker::new(config.provider_gates())
                .with_ttl(Duration::from_secs(config.availability.ttl_secs)),
        );
        let resident = Arc::new(ResidentModelManager::new(config.resident.memory_budget_mb));
        let ledger = Arc::new(UsageLedger::new());

        let policy = config
            .selection_policy()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        let selector = Selector::new(
            registry.clone(),
            availability.clone(),
            resident.clone(),
            policy,
        );

        let dispatcher = Dispatcher::new(self.clients, resident, ledger.clone());
        let executor = FallbackExecutor::new(
            dispatcher.clone(),
            availability.clone(),
            config.retry.clone(),
        );
        let consensus = ConsensusEngine::new(dispatcher, config.consensus_config());

        Ok(Orchestrator {
            registry,
            analyzer: TaskAnalyzer::new(config.analyzer.clone()),
            selector,
            executor,
            consensus,
            availability,
            ledger,
            default_priority: config.routing.default_priority,
            default_consensus_n: config.consensus.default_n,
            session: self.session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Capabilities, ModelKey};

    fn profile(provider: &str, model_id: &str, maturity: MaturityTier) -> ModelProfile {
        ModelProfile {
            provider: provider.to_string(),
            model_id: model_id.to_string(),
            context_window: 128_000,
            input_cost_per_million: 3.0,
            output_cost_per_million: 15.0,
            capabilities: Capabilities::default(),
            coding: 80,
            reasoning: 80,
            speed: 3,
            maturity,
            local: false,
            resident_size_mb: None,
        }
    }

    fn config_with_models() -> Config {
        let mut config = Config::default();
        config.registry.models = vec![
            profile("anthropic", "sonnet", MaturityTier::Production),
            profile("anthropic", "haiku", MaturityTier::Production),
            profile("openai", "gpt", MaturityTier::Beta),
            profile("newcloud", "proto", MaturityTier::Experimental),
        ];
        for provider in ["anthropic", "openai", "newcloud"] {
            config.providers.insert(
                provider.to_string(),
                crate::config::ProviderSettings {
                    configured: true,
                    enabled: true,
                    base_url: None,
                },
            );
        }
        config
    }

    #[test]
    fn test_builder_rejects_bad_registry() {
        let mut config = Config::default();
        let mut bad = profile("p", "m", MaturityTier::Production);
        bad.context_window = 0;
        config.registry.models = vec![bad];

        assert!(Orchestrator::builder().config(config).build().is_err());
    }

    #[test]
    fn test_analyze_through_facade() {
        let orchestrator = Orchestrator::builder()
            .config(config_with_models())
            .build()
            .unwrap();
        let requirement = orchestrator.analyze("implement a parsing module");
        assert_eq!(requirement.primary.to_string(), "code_generation");
    }

    #[test]
    fn test_list_models_with_filter() {
        let orchestrator = Orchestrator::builder()
            .config(config_with_models())
            .build()
            .unwrap();

        assert_eq!(orchestrator.list_models(None).len(), 4);

        let filter = ModelFilter {
            provider: Some("anthropic".to_string()),
            ..Default::default()
        };
        assert_eq!(orchestrator.list_models(Some(&filter)).len(), 2);

        let filter = ModelFilter {
            maturity: Some(MaturityTier::Experimental),
            ..Default::default()
        };
        let experimental = orchestrator.list_models(Some(&filter));
        assert_eq!(experimental.len(), 1);
        assert_eq!(experimental[0].model_id, "proto");
    }

    #[test]
    fn test_provider_status_reports_all() {
        let orchestrator = Orchestrator::builder()
            .config(config_with_models())
            .build()
            .unwrap();
        let statuses = orchestrator.provider_status();
        assert_eq!(statuses.len(), 3);
        assert!(statuses["anthropic"].is_available());
    }

    #[test]
    fn test_registry_reload_swaps_catalog() {
        let orchestrator = Orchestrator::builder()
            .config(config_with_models())
            .build()
            .unwrap();

        orchestrator
            .reload_registry(vec![profile("anthropic", "next-gen", MaturityTier::Production)])
            .unwrap();

        let models = orchestrator.list_models(None);
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].key(), ModelKey::new("anthropic", "next-gen"));
    }

    #[tokio::test]
    async fn test_route_rejects_unknown_override() {
        let orchestrator = Orchestrator::builder()
            .config(config_with_models())
            .build()
            .unwrap();
        let hints = TaskHints {
            model: Some(ModelKey::new("nobody", "ghost")),
            ..Default::default()
        };
        assert!(matches!(
            orchestrator.route("implement a module", Some(hints)).await,
            Err(Error::ModelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_consensus_rejects_zero_n() {
        let orchestrator = Orchestrator::builder()
            .config(config_with_models())
            .build()
            .unwrap();
        assert!(matches!(
            orchestrator.consensus("pick one", Some(0), None).await,
            Err(Error::InvalidInput(_))
        ));
    }
}
