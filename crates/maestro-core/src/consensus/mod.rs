//! Multi-model consensus voting
//!
//! The consensus engine fans one prompt out to `n` distinct candidates
//! (diversified across providers where possible), collects their answers as
//! ballots, and tallies a plurality winner. This is the only component that
//! intentionally issues concurrent calls for a single logical request.
//! Pending dispatches are dropped - best-effort, non-blocking cancellation -
//! as soon as the quorum has answered or the deadline passes; late results
//! are discarded. Partial failure is tolerated: only succeeded ballots are
//! tallied, and a round with fewer than two of them is flagged low
//! confidence rather than turned into an error.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::executor::{AttemptError, Dispatcher};
use crate::provider::DispatchRequest;
use crate::registry::{ModelKey, RegistrySnapshot};
use crate::routing::RankedCandidate;

/// How many succeeded ballots end the round early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quorum {
    /// Strict majority of the dispatched candidates
    Majority,
    /// Fixed ballot count (clamped to the number of candidates)
    Count(u32),
}

impl Quorum {
    fn target(&self, dispatched: usize) -> usize {
        match self {
            Self::Majority => dispatched / 2 + 1,
            Self::Count(c) => (*c as usize).clamp(1, dispatched.max(1)),
        }
    }
}

/// Consensus round settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub quorum: Quorum,
    /// Hard deadline for the whole round
    pub deadline_secs: u64,
    /// Per-attempt timeout, independent of the round deadline
    pub attempt_timeout_secs: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            quorum: Quorum::Majority,
            deadline_secs: 120,
            attempt_timeout_secs: 60,
        }
    }
}

/// Optional stance labels assigned round-robin to the candidates, e.g.
/// advocate/skeptic framings for a deliberation round
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StanceConfig {
    pub stances: Vec<String>,
}

/// Normalized, comparable vote key
///
/// Literal canonicalization: casefold, trim, collapse whitespace runs,
/// strip trailing punctuation. Two answers tally together iff their
/// canonical forms match exactly, which keeps tie behavior deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteKey(String);

impl VoteKey {
    pub fn normalize(answer: &str) -> Self {
        let lowered = answer.to_lowercase();
        let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
        let stripped = collapsed.trim_end_matches(['.', ',', ';', ':', '!', '?']);
        Self(stripped.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One model's answer in a consensus round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusBallot {
    pub model: ModelKey,
    pub stance: Option<String>,
    /// Raw answer as returned by the model
    pub answer: String,
    /// Canonical form used for tallying
    pub vote: VoteKey,
    pub cost_usd: f64,
}

/// A candidate whose dispatch failed; kept for the breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallotFailure {
    pub model: ModelKey,
    pub error: AttemptError,
}

/// Tally of one consensus round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// Canonical winning vote, if any ballot succeeded
    pub winner: Option<String>,
    /// Raw answer of the first ballot in the winning group
    pub winning_answer: Option<String>,
    pub ballots: Vec<ConsensusBallot>,
    pub failures: Vec<BallotFailure>,
    /// Votes per canonical key
    pub vote_counts: HashMap<String, u32>,
    /// winning_votes / total_succeeded_votes
    pub confidence: f64,
    /// Set when fewer than two ballots succeeded
    pub low_confidence: bool,
    pub total_cost_usd: f64,
}

/// Parallel fan-out engine over the shared dispatcher
pub struct ConsensusEngine {
    dispatcher: Dispatcher,
    config: ConsensusConfig,
}

impl ConsensusEngine {
    pub fn new(dispatcher: Dispatcher, config: ConsensusConfig) -> Self {
        Self { dispatcher, config }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Pick `n` distinct candidates from a ranked list, spreading across
    /// providers where possible: first pass takes the best candidate of
    /// each provider, further passes fill from the remainder in rank order.
    pub fn diversify(candidates: &[RankedCandidate], n: usize) -> Vec<RankedCandidate> {
        let mut picked: Vec<RankedCandidate> = Vec::with_capacity(n);
        let mut seen_keys: HashSet<ModelKey> = HashSet::new();
        let mut seen_providers: HashSet<String> = HashSet::new();

        for candidate in candidates {
            if picked.len() >= n {
                break;
            }
            if seen_providers.insert(candidate.key.provider.clone()) {
                seen_keys.insert(candidate.key.clone());
                picked.push(candidate.clone());
            }
        }
        for candidate in candidates {
            if picked.len() >= n {
                break;
            }
            if seen_keys.insert(candidate.key.clone()) {
                picked.push(candidate.clone());
            }
        }
        picked
    }

    /// Run one consensus round over pre-selected candidates
    pub async fn run(
        &self,
        snapshot: &RegistrySnapshot,
        candidates: &[RankedCandidate],
        request: &DispatchRequest,
        stances: Option<&StanceConfig>,
        session: Option<&str>,
    ) -> ConsensusResult {
        let attempt_timeout = Duration::from_secs(self.config.attempt_timeout_secs);

        let mut futures = FuturesUnordered::new();
        let mut dispatched = 0usize;
        for (i, candidate) in candidates.iter().enumerate() {
            let Some(profile) = snapshot.get(&candidate.key) else {
                warn!(model = %candidate.key, "Consensus candidate missing from registry snapshot");
                continue;
            };
            let stance = stances
                .filter(|s| !s.stances.is_empty())
                .map(|s| s.stances[i % s.stances.len()].clone());

            let mut ballot_request = request.clone();
            if let Some(stance_text) = &stance {
                ballot_request.system = Some(match &ballot_request.system {
                    Some(system) => format!("{}\n{}", system, stance_text),
                    None => stance_text.clone(),
                });
            }

            let dispatcher = self.dispatcher.clone();
            let key = candidate.key.clone();
            dispatched += 1;
            futures.push(async move {
                let (attempt, response) = dispatcher
                    .dispatch_once(profile, &ballot_request, attempt_timeout, session)
                    .await;
                (key, stance, attempt, response)
            });
        }

        let quorum_target = self.config.quorum.target(dispatched);
        debug!(
            dispatched = dispatched,
            quorum = quorum_target,
            "Consensus fan-out started"
        );

        let mut ballots: Vec<ConsensusBallot> = Vec::new();
        let mut failures: Vec<BallotFailure> = Vec::new();
        let mut total_cost_usd = 0.0;

        let deadline = tokio::time::sleep(Duration::from_secs(self.config.deadline_secs));
        tokio::pin!(deadline);

        while !futures.is_empty() {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        pending = futures.len(),
                        "Consensus deadline elapsed, discarding pending calls"
                    );
                    break;
                }
                Some((key, stance, attempt, response)) = futures.next() => {
                    total_cost_usd += attempt.cost_usd;
                    match response {
                        Some(response) => {
                            let vote = VoteKey::normalize(&response.content);
                            ballots.push(ConsensusBallot {
                                model: key,
                                stance,
                                answer: response.content,
                                vote,
                                cost_usd: attempt.cost_usd,
                            });
                        }
                        None => {
                            if let crate::executor::AttemptOutcome::Failed { error } = attempt.outcome {
                                failures.push(BallotFailure { model: key, error });
                            }
                        }
                    }
                    if ballots.len() >= quorum_target {
                        debug!(
                            ballots = ballots.len(),
                            cancelled = futures.len(),
                            "Quorum reached, cancelling pending calls"
                        );
                        break;
                    }
                }
            }
        }
        // Dropping the remaining futures aborts their dispatches without
        // waiting for provider acknowledgment.
        drop(futures);

        let result = tally(ballots, failures, total_cost_usd);
        info!(
            winner = result.winner.as_deref().unwrap_or("<none>"),
            confidence = result.confidence,
            low_confidence = result.low_confidence,
            "Consensus round complete"
        );
        result
    }
}

/// Tally succeeded ballots into a plurality result. Ties break toward the
/// lexicographically smaller canonical key so equal counts resolve the same
/// way every run.
fn tally(
    ballots: Vec<ConsensusBallot>,
    failures: Vec<BallotFailure>,
    total_cost_usd: f64,
) -> ConsensusResult {
    let mut vote_counts: HashMap<String, u32> = HashMap::new();
    for ballot in &ballots {
        *vote_counts.entry(ballot.vote.as_str().to_string()).or_insert(0) += 1;
    }

    let winner = vote_counts
        .iter()
        .max_by(|(key_a, count_a), (key_b, count_b)| {
            count_a.cmp(count_b).then_with(|| key_b.cmp(key_a))
        })
        .map(|(key, _)| key.clone());

    let winning_votes = winner
        .as_ref()
        .and_then(|w| vote_counts.get(w))
        .copied()
        .unwrap_or(0);
    let confidence = if ballots.is_empty() {
        0.0
    } else {
        winning_votes as f64 / ballots.len() as f64
    };
    let winning_answer = winner.as_ref().and_then(|w| {
        ballots
            .iter()
            .find(|b| b.vote.as_str() == w.as_str())
            .map(|b| b.answer.clone())
    });
    let low_confidence = ballots.len() < 2;

    ConsensusResult {
        winner,
        winning_answer,
        ballots,
        failures,
        vote_counts,
        confidence,
        low_confidence,
        total_cost_usd,
    }
}
