//! Fallback execution - sequential dispatch with retry across a ranked chain
//!
//! The executor walks a fallback chain one candidate at a time:
//!
//! ```text
//! SELECTING -> DISPATCHING -> SUCCESS
//!                  |   ^
//!                  v   | (transient, budget left)
//!               RETRYING
//!                  |
//!                  v (candidates left? next : EXHAUSTED)
//! ```
//!
//! Failures are classified before anything else happens: configuration/auth
//! failures negative-cache the provider and skip its remaining candidates
//! without consuming retry budget, transient failures retry the same
//! candidate with exponential backoff, permanent failures advance
//! immediately. A hard ceiling on total attempts bounds worst-case latency
//! no matter how long the chain is. Retries within one logical request are
//! strictly sequential; two providers are never raced for the same call.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::availability::AvailabilityTracker;
use crate::error::{Error, Result};
use crate::provider::{DispatchRequest, DispatchResponse, ErrorClass, ProviderClients};
use crate::registry::{ModelKey, ModelProfile, RegistrySnapshot};
use crate::resident::ResidentModelManager;
use crate::routing::{Disqualification, FallbackChain};
use crate::usage::{TokenUsage, UsageLedger, UsageOutcome, UsageRecord};

/// Explicit retry behavior passed into every execution, never ambient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Same-candidate retries allowed after a transient failure
    pub max_retries_per_candidate: u32,
    /// Base delay for exponential backoff
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay
    pub backoff_cap_ms: u64,
    /// Hard ceiling on attempts across the whole chain
    pub max_total_attempts: u32,
    /// Per-attempt timeout; exceeding it is a transient failure
    pub attempt_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries_per_candidate: 2,
            backoff_base_ms: 500,
            backoff_cap_ms: 8_000,
            max_total_attempts: 10,
            attempt_timeout_secs: 60,
        }
    }
}

impl RetryPolicy {
    /// Delay before the n-th retry (1-based), doubling from the base up to
    /// the cap. Deterministic: auditability wins over jitter here.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Executor states, traced on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    Selecting,
    Dispatching,
    Retrying,
    Success,
    Exhausted,
}

/// Error taxonomy attached to failed attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptErrorKind {
    /// Provider credential/configuration failure
    Configuration,
    /// Timeout, rate limit, or 5xx - retryable
    Transient,
    /// Bad request or unknown model - not retryable
    Permanent,
    /// Local memory could not satisfy the request at dispatch time
    ResourceExhausted,
}

/// Structured failure data for one attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptError {
    pub kind: AttemptErrorKind,
    pub message: String,
}

/// Terminal state of one attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AttemptOutcome {
    Success,
    Failed { error: AttemptError },
}

/// One dispatch to one model, success or failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub id: String,
    pub model: ModelKey,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub usage: TokenUsage,
    /// Cost derived from usage at the profile's pricing
    pub cost_usd: f64,
}

impl ExecutionAttempt {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success)
    }
}

/// Aggregate of all attempts for one logical request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub content: String,
    /// Model that produced the final content
    pub model: ModelKey,
    /// Full ordered attempt history, fallbacks included; any entry before
    /// the last one is a disclosed substitution
    pub attempts: Vec<ExecutionAttempt>,
    /// Invariant: equals the sum of per-attempt costs
    pub total_cost_usd: f64,
}

impl ExecutionResult {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

/// Everything that was tried (and skipped) before the chain ran dry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainExhaustedReport {
    /// Ordered attempt history with per-attempt error kinds
    pub attempts: Vec<ExecutionAttempt>,
    /// Models excluded at selection time; lets callers tell "nothing
    /// configured" apart from "everything failed"
    pub skipped: Vec<(ModelKey, Disqualification)>,
}

/// Shared single-attempt dispatch used by the executor and the consensus
/// engine: resolves the client, pins local models, enforces the per-attempt
/// timeout, and appends the accounting record.
#[derive(Clone)]
pub struct Dispatcher {
    clients: ProviderClients,
    resident: Arc<ResidentModelManager>,
    ledger: Arc<UsageLedger>,
}

impl Dispatcher {
    pub fn new(
        clients: ProviderClients,
        resident: Arc<ResidentModelManager>,
        ledger: Arc<UsageLedger>,
    ) -> Self {
        Self {
            clients,
            resident,
            ledger,
        }
    }

    pub fn clients(&self) -> &ProviderClients {
        &self.clients
    }

    /// One dispatch to one model. Never panics and never returns a raw
    /// provider error: every outcome is an `ExecutionAttempt`.
    pub async fn dispatch_once(
        &self,
        profile: &ModelProfile,
        request: &DispatchRequest,
        timeout: Duration,
        session: Option<&str>,
    ) -> (ExecutionAttempt, Option<DispatchResponse>) {
        let key = profile.key();
        let started_at = Utc::now();

        let outcome = self.try_dispatch(profile, request, timeout).await;
        let finished_at = Utc::now();

        let (attempt_outcome, response) = match outcome {
            Ok(response) => (AttemptOutcome::Success, Some(response)),
            Err(error) => (AttemptOutcome::Failed { error }, None),
        };

        let usage = response.as_ref().map(|r| r.usage).unwrap_or_default();
        let (input_cost, output_cost) = profile.cost_for(&usage);

        let attempt = ExecutionAttempt {
            id: uuid::Uuid::new_v4().to_string(),
            model: key.clone(),
            started_at,
            finished_at,
            outcome: attempt_outcome,
            usage,
            cost_usd: input_cost + output_cost,
        };

        self.ledger.append(UsageRecord {
            id: attempt.id.clone(),
            session: session.map(str::to_string),
            model: key,
            tokens: usage,
            input_cost_usd: input_cost,
            output_cost_usd: output_cost,
            outcome: if attempt.succeeded() {
                UsageOutcome::Success
            } else {
                UsageOutcome::Failure
            },
            timestamp: finished_at,
        });

        (attempt, response)
    }

    async fn try_dispatch(
        &self,
        profile: &ModelProfile,
        request: &DispatchRequest,
        timeout: Duration,
    ) -> std::result::Result<DispatchResponse, AttemptError> {
        let client = self.clients.get(&profile.provider).ok_or_else(|| AttemptError {
            kind: AttemptErrorKind::Configuration,
            message: format!("no client registered for provider '{}'", profile.provider),
        })?;

        // Pin local models for the duration of the call so they cannot be
        // evicted mid-request.
        let _residency = if profile.local {
            let size_mb = profile.resident_size_mb.unwrap_or(0);
            match self.resident.acquire(&profile.key(), size_mb) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    return Err(AttemptError {
                        kind: AttemptErrorKind::ResourceExhausted,
                        message: e.to_string(),
                    });
                }
            }
        } else {
            None
        };

        match tokio::time::timeout(timeout, client.dispatch(&profile.model_id, request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(provider_error)) => {
                let kind = match provider_error.class() {
                    ErrorClass::Configuration => AttemptErrorKind::Configuration,
                    ErrorClass::Transient => AttemptErrorKind::Transient,
                    ErrorClass::Permanent => AttemptErrorKind::Permanent,
                };
                Err(AttemptError {
                    kind,
                    message: provider_error.to_string(),
                })
            }
            Err(_) => Err(AttemptError {
                kind: AttemptErrorKind::Transient,
                message: format!("attempt timed out after {:?}", timeout),
            }),
        }
    }
}

/// Drives a fallback chain to one terminal outcome
pub struct FallbackExecutor {
    dispatcher: Dispatcher,
    availability: Arc<AvailabilityTracker>,
    policy: RetryPolicy,
}

impl FallbackExecutor {
    pub fn new(
        dispatcher: Dispatcher,
        availability: Arc<AvailabilityTracker>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            dispatcher,
            availability,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a chain sequentially until one candidate succeeds or the
    /// chain is exhausted. Returns `Error::ChainExhausted` with the full
    /// attempt history in the terminal failure case.
    pub async fn execute(
        &self,
        snapshot: &RegistrySnapshot,
        chain: &FallbackChain,
        request: &DispatchRequest,
        session: Option<&str>,
    ) -> Result<ExecutionResult> {
        debug!(
            state = ?ExecutorState::Selecting,
            task = %chain.task_type,
            candidates = chain.candidates.len(),
            "Executing fallback chain"
        );

        let mut attempts: Vec<ExecutionAttempt> = Vec::new();
        let mut total_attempts: u32 = 0;
        let mut skipped_providers: HashSet<String> = HashSet::new();

        'candidates: for candidate in &chain.candidates {
            if skipped_providers.contains(&candidate.key.provider) {
                debug!(
                    model = %candidate.key,
                    "Skipping candidate on a provider already marked unavailable"
                );
                continue;
            }

            let Some(profile) = snapshot.get(&candidate.key) else {
                // Registry was reloaded between selection and execution;
                // skip the vanished entry and move on.
                warn!(model = %candidate.key, "Candidate missing from registry snapshot");
                continue;
            };

            let mut retries: u32 = 0;
            loop {
                if total_attempts >= self.policy.max_total_attempts {
                    warn!(
                        state = ?ExecutorState::Exhausted,
                        total_attempts = total_attempts,
                        "Attempt ceiling reached, aborting chain"
                    );
                    break 'candidates;
                }
                total_attempts += 1;

                debug!(
                    state = ?ExecutorState::Dispatching,
                    model = %candidate.key,
                    attempt = total_attempts,
                    "Dispatching"
                );

                let (attempt, response) = self
                    .dispatcher
                    .dispatch_once(profile, request, self.policy.attempt_timeout(), session)
                    .await;
                let outcome = attempt.outcome.clone();
                attempts.push(attempt);

                match outcome {
                    AttemptOutcome::Success => {
                        let response = response.expect("successful attempt carries a response");
                        let total_cost_usd = attempts.iter().map(|a| a.cost_usd).sum();
                        info!(
                            state = ?ExecutorState::Success,
                            model = %candidate.key,
                            attempts = attempts.len(),
                            "Chain completed"
                        );
                        return Ok(ExecutionResult {
                            content: response.content,
                            model: candidate.key.clone(),
                            attempts,
                            total_cost_usd,
                        });
                    }
                    AttemptOutcome::Failed { error } => match error.kind {
                        AttemptErrorKind::Configuration => {
                            // Fast failover: down the provider for its TTL and
                            // skip its remaining candidates. No retry budget
                            // is consumed.
                            self.availability
                                .mark_auth_failure(&candidate.key.provider, &error.message);
                            skipped_providers.insert(candidate.key.provider.clone());
                            continue 'candidates;
                        }
                        AttemptErrorKind::Transient => {
                            if retries < self.policy.max_retries_per_candidate {
                                retries += 1;
                                let delay = self.policy.backoff_delay(retries);
                                debug!(
                                    state = ?ExecutorState::Retrying,
                                    model = %candidate.key,
                                    retry = retries,
                                    delay_ms = delay.as_millis() as u64,
                                    "Transient failure, backing off"
                                );
                                tokio::time::sleep(delay).await;
                                continue;
                            }
                            debug!(
                                model = %candidate.key,
                                "Retry budget exhausted, advancing to next candidate"
                            );
                            continue 'candidates;
                        }
                        AttemptErrorKind::Permanent | AttemptErrorKind::ResourceExhausted => {
                            debug!(
                                model = %candidate.key,
                                kind = ?error.kind,
                                "Non-retryable failure, advancing to next candidate"
                            );
                            continue 'candidates;
                        }
                    },
                }
            }
        }

        warn!(
            state = ?ExecutorState::Exhausted,
            attempts = attempts.len(),
            "Fallback chain exhausted"
        );
        Err(Error::ChainExhausted(Box::new(ChainExhaustedReport {
            attempts,
            skipped: chain.skipped.clone(),
        })))
    }
}
