//! Maestro Core Integration Tests
//!
//! End-to-end scenarios through the orchestrator facade with scripted
//! provider clients: routing with fallback, cost accounting, blocklists,
//! auth failover and TTL recovery, consensus voting, and local-model
//! feasibility.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use maestro_core::analyzer::TaskType;
use maestro_core::config::{Config, ProviderSettings};
use maestro_core::consensus::Quorum;
use maestro_core::error::Error;
use maestro_core::executor::AttemptErrorKind;
use maestro_core::orchestrator::Orchestrator;
use maestro_core::provider::{
    DispatchRequest, DispatchResponse, ProviderClient, ProviderError,
};
use maestro_core::registry::{Capabilities, MaturityTier, ModelKey, ModelProfile};
use maestro_core::usage::TokenUsage;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Provider client replaying a scripted sequence of outcomes; once the
/// script is drained every dispatch succeeds with a fixed answer.
struct ScriptedClient {
    provider: String,
    script: Mutex<VecDeque<Result<DispatchResponse, ProviderError>>>,
    default_answer: String,
}

impl ScriptedClient {
    fn new(provider: &str, script: Vec<Result<DispatchResponse, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            provider: provider.to_string(),
            script: Mutex::new(script.into()),
            default_answer: "ok".to_string(),
        })
    }

    fn answering(provider: &str, answer: &str) -> Arc<Self> {
        Arc::new(Self {
            provider: provider.to_string(),
            script: Mutex::new(VecDeque::new()),
            default_answer: answer.to_string(),
        })
    }
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn dispatch(
        &self,
        _model_id: &str,
        _request: &DispatchRequest,
    ) -> Result<DispatchResponse, ProviderError> {
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(DispatchResponse {
                content: self.default_answer.clone(),
                usage: TokenUsage::new(1000, 500),
            })
        })
    }
}

fn ok_response(content: &str) -> Result<DispatchResponse, ProviderError> {
    Ok(DispatchResponse {
        content: content.to_string(),
        usage: TokenUsage::new(1000, 500),
    })
}

fn profile(provider: &str, model_id: &str, coding: u8) -> ModelProfile {
    ModelProfile {
        provider: provider.to_string(),
        model_id: model_id.to_string(),
        context_window: 128_000,
        input_cost_per_million: 3.0,
        output_cost_per_million: 15.0,
        capabilities: Capabilities::default(),
        coding,
        reasoning: 70,
        speed: 3,
        maturity: MaturityTier::Production,
        local: false,
        resident_size_mb: None,
    }
}

fn base_config(models: Vec<ModelProfile>) -> Config {
    let mut config = Config::default();
    let providers: Vec<String> = models.iter().map(|m| m.provider.clone()).collect();
    config.registry.models = models;
    for provider in providers {
        config.providers.insert(
            provider,
            ProviderSettings {
                configured: true,
                enabled: true,
                base_url: None,
            },
        );
    }
    // Keep tests fast: no real backoff sleeping
    config.retry.backoff_base_ms = 0;
    config.retry.backoff_cap_ms = 0;
    config
}

#[tokio::test]
async fn test_route_happy_path_records_usage_and_cost() {
    init_tracing();
    let config = base_config(vec![profile("anthropic", "sonnet", 90)]);
    let orchestrator = Orchestrator::builder()
        .config(config)
        .register_client(ScriptedClient::answering("anthropic", "fn main() {}"))
        .session("it-session")
        .build()
        .unwrap();

    let result = orchestrator
        .route("implement a parsing module", None)
        .await
        .unwrap();

    assert_eq!(result.content, "fn main() {}");
    assert_eq!(result.model, ModelKey::new("anthropic", "sonnet"));
    assert_eq!(result.attempt_count(), 1);

    // Cost re-derivable from usage x profile pricing:
    // 1000/1M x $3 + 500/1M x $15 = 0.0105
    assert!((result.total_cost_usd - 0.0105).abs() < 1e-9);

    let ledger = orchestrator.usage_ledger();
    assert_eq!(ledger.records().len(), 1);
    assert_eq!(ledger.for_session("it-session").attempt_count, 1);
}

#[tokio::test]
async fn test_fallback_substitution_is_disclosed() {
    let config = base_config(vec![
        profile("anthropic", "best", 95),
        profile("anthropic", "backup", 60),
    ]);
    // Preferred model fails permanently, backup answers
    let client = ScriptedClient::new(
        "anthropic",
        vec![
            Err(ProviderError::UnknownModel("best".into())),
            ok_response("from backup"),
        ],
    );
    let orchestrator = Orchestrator::builder()
        .config(config)
        .register_client(client)
        .build()
        .unwrap();

    let result = orchestrator.route("implement a module", None).await.unwrap();

    assert_eq!(result.model, ModelKey::new("anthropic", "backup"));
    // The substitution is visible: the failed attempt on the preferred
    // model is first in the history
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.attempts[0].model, ModelKey::new("anthropic", "best"));
    assert!(!result.attempts[0].succeeded());

    let total: f64 = result.attempts.iter().map(|a| a.cost_usd).sum();
    assert!((result.total_cost_usd - total).abs() < 1e-9);
}

#[tokio::test]
async fn test_blocklisted_model_never_dispatched() {
    let mut config = base_config(vec![
        profile("anthropic", "banned", 99),
        profile("anthropic", "allowed", 50),
    ]);
    config
        .routing
        .blocklist
        .push("anthropic/banned".to_string());

    let orchestrator = Orchestrator::builder()
        .config(config)
        .register_client(ScriptedClient::answering("anthropic", "hello"))
        .build()
        .unwrap();

    let result = orchestrator.route("implement a module", None).await.unwrap();
    assert_eq!(result.model, ModelKey::new("anthropic", "allowed"));
    assert!(result.attempts.iter().all(|a| a.model.model_id != "banned"));
}

#[tokio::test]
async fn test_auth_failure_ttl_window_and_recovery() {
    let mut config = base_config(vec![
        profile("flaky", "primary", 95),
        profile("steady", "fallback", 60),
    ]);
    config.availability.ttl_secs = 1;

    let flaky = ScriptedClient::new(
        "flaky",
        vec![Err(ProviderError::Auth("credential rejected".into()))],
    );
    let orchestrator = Orchestrator::builder()
        .config(config)
        .register_client(flaky)
        .register_client(ScriptedClient::answering("steady", "steady answer"))
        .build()
        .unwrap();

    // First route: flaky fails auth, chain falls through to steady
    let first = orchestrator.route("implement a module", None).await.unwrap();
    assert_eq!(first.model, ModelKey::new("steady", "fallback"));
    assert!(matches!(
        &first.attempts[0].outcome,
        maestro_core::executor::AttemptOutcome::Failed { error }
            if error.kind == AttemptErrorKind::Configuration
    ));

    // Within the TTL the flaky provider is disqualified at selection time:
    // no dispatch ever reaches it
    let second = orchestrator.route("implement a module", None).await.unwrap();
    assert_eq!(second.model, ModelKey::new("steady", "fallback"));
    assert_eq!(second.attempt_count(), 1);
    assert!(!orchestrator.provider_status()["flaky"].is_available());

    // After expiry the provider is reconsidered and now succeeds
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let third = orchestrator.route("implement a module", None).await.unwrap();
    assert_eq!(third.model, ModelKey::new("flaky", "primary"));
}

#[tokio::test]
async fn test_chain_exhausted_reports_every_attempt() {
    let config = base_config(vec![
        profile("anthropic", "m1", 90),
        profile("anthropic", "m2", 80),
    ]);
    let script: Vec<Result<DispatchResponse, ProviderError>> = (0..10)
        .map(|_| Err(ProviderError::BadRequest("rejected".into())))
        .collect();
    let client = ScriptedClient::new("anthropic", script);
    let orchestrator = Orchestrator::builder()
        .config(config)
        .register_client(client)
        .build()
        .unwrap();

    let err = orchestrator
        .route("implement a module", None)
        .await
        .unwrap_err();
    match err {
        Error::ChainExhausted(report) => {
            assert_eq!(report.attempts.len(), 2);
            let tried: Vec<&str> = report
                .attempts
                .iter()
                .map(|a| a.model.model_id.as_str())
                .collect();
            assert_eq!(tried, vec!["m1", "m2"]);
        }
        other => panic!("expected ChainExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_consensus_three_against_two_through_facade() {
    // Five providers so diversification can pick five distinct models
    let models: Vec<ModelProfile> = (1..=5)
        .map(|i| profile(&format!("prov{i}"), "m", 80))
        .collect();
    let mut config = base_config(models);
    config.consensus.quorum_votes = Some(5);
    assert!(matches!(config.consensus_config().quorum, Quorum::Count(5)));

    let answers = ["Paris", "paris.", " PARIS ", "Lyon", "lyon"];
    let mut builder = Orchestrator::builder().config(config);
    for (i, answer) in answers.into_iter().enumerate() {
        builder = builder.register_client(ScriptedClient::answering(&format!("prov{}", i + 1), answer));
    }
    let orchestrator = builder.build().unwrap();

    let result = orchestrator
        .consensus("capital of France?", Some(5), None)
        .await
        .unwrap();

    assert_eq!(result.winner.as_deref(), Some("paris"));
    assert!((result.confidence - 0.6).abs() < 1e-9);
    assert!(!result.low_confidence);
    assert_eq!(result.ballots.len(), 5);
}

#[tokio::test]
async fn test_consensus_single_survivor_flagged_low_confidence() {
    let models: Vec<ModelProfile> = (1..=5)
        .map(|i| profile(&format!("prov{i}"), "m", 80))
        .collect();
    let mut config = base_config(models);
    config.consensus.quorum_votes = Some(5);

    let mut builder = Orchestrator::builder().config(config);
    for i in 1..=4 {
        builder = builder.register_client(ScriptedClient::new(
            &format!("prov{i}"),
            vec![Err(ProviderError::Server {
                status: 503,
                message: "down".into(),
            })],
        ));
    }
    builder = builder.register_client(ScriptedClient::answering("prov5", "lonely answer"));
    let orchestrator = builder.build().unwrap();

    let result = orchestrator
        .consensus("anyone there?", Some(5), None)
        .await
        .unwrap();

    assert!(result.low_confidence);
    assert_eq!(result.ballots.len(), 1);
    assert_eq!(result.failures.len(), 4);
    assert_eq!(result.winner.as_deref(), Some("lonely answer"));
}

#[tokio::test]
async fn test_oversized_local_model_never_crashes_routing() {
    let mut giant = profile("local", "giant-120b", 99);
    giant.local = true;
    giant.resident_size_mb = Some(120_000);
    let mut config = base_config(vec![giant, profile("anthropic", "cloud", 70)]);
    config.resident.memory_budget_mb = 16_000;

    let orchestrator = Orchestrator::builder()
        .config(config)
        .register_client(ScriptedClient::answering("anthropic", "cloud answer"))
        .register_client(ScriptedClient::answering("local", "local answer"))
        .build()
        .unwrap();

    // The infeasible local model is disqualified at selection time; routing
    // succeeds on the cloud model with no eviction loop and no attempt
    // against the local backend
    let result = orchestrator.route("implement a module", None).await.unwrap();
    assert_eq!(result.model, ModelKey::new("anthropic", "cloud"));
    assert_eq!(result.attempt_count(), 1);
}

#[tokio::test]
async fn test_analyze_exposed_without_dispatch() {
    let config = base_config(vec![profile("anthropic", "sonnet", 80)]);
    let orchestrator = Orchestrator::builder()
        .config(config)
        .build()
        .unwrap();

    let requirement = orchestrator.analyze("debug this stack trace from a panic");
    assert_eq!(requirement.primary, TaskType::Debugging);
    assert!(requirement.min_context_tokens > 0);
    // No clients registered and nothing dispatched
    assert!(orchestrator.usage_ledger().records().is_empty());
}

#[tokio::test]
async fn test_min_context_requirement_filters_small_models() {
    let mut small = profile("anthropic", "small", 95);
    small.context_window = 4_000;
    let mut big = profile("anthropic", "big", 60);
    big.context_window = 16_000;
    let config = base_config(vec![small, big]);

    let orchestrator = Orchestrator::builder()
        .config(config)
        .register_client(ScriptedClient::answering("anthropic", "fits"))
        .build()
        .unwrap();

    // A prompt large enough to require ~8k tokens of context
    let prompt = "implement ".repeat(1000);
    let result = orchestrator.route(&prompt, None).await.unwrap();
    assert_eq!(result.model, ModelKey::new("anthropic", "big"));
}
