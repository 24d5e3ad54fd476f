//! Candidate selection and fallback-chain synthesis
//!
//! The selector turns a task requirement into an ordered, deduplicated
//! fallback chain: blocklist first (never bypassed), then the fixed
//! disqualification rules via the scorer, then ranking with deterministic
//! tie-breaks. Operator preference lists and explicit overrides pre-seed
//! the head of the chain; score order fills the remainder.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::analyzer::TaskRequirement;
use crate::availability::{Availability, AvailabilityTracker};
use crate::registry::{ModelKey, ModelProfile, ModelRegistry};
use crate::resident::ResidentModelManager;

use super::score::{ScoreContext, score};
use super::types::{
    Disqualification, FallbackChain, PriorityMode, RankedCandidate, ScoreOutcome, SelectionPolicy,
    SelectionReason,
};

struct Eligible {
    key: ModelKey,
    score: f64,
    blended_cost: f64,
    maturity_rank: u8,
    registry_index: usize,
}

/// Ranks registry entries for a requirement
pub struct Selector {
    registry: Arc<ModelRegistry>,
    availability: Arc<AvailabilityTracker>,
    resident: Arc<ResidentModelManager>,
    policy: SelectionPolicy,
}

impl Selector {
    pub fn new(
        registry: Arc<ModelRegistry>,
        availability: Arc<AvailabilityTracker>,
        resident: Arc<ResidentModelManager>,
        policy: SelectionPolicy,
    ) -> Self {
        Self {
            registry,
            availability,
            resident,
            policy,
        }
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Build the fallback chain for a requirement. `k` bounds the chain
    /// length; `None` uses the policy default.
    pub fn select(
        &self,
        requirement: &TaskRequirement,
        mode: PriorityMode,
        k: Option<usize>,
    ) -> FallbackChain {
        let snapshot = self.registry.snapshot();
        let limit = k.unwrap_or(self.policy.max_candidates).max(1);

        let mut availability_cache: HashMap<String, Availability> = HashMap::new();
        let mut eligible: Vec<Eligible> = Vec::new();
        let mut skipped: Vec<(ModelKey, Disqualification)> = Vec::new();

        for (index, profile) in snapshot.all().iter().enumerate() {
            let key = profile.key();

            if self.policy.blocklist.contains(&key) {
                skipped.push((key, Disqualification::Blocklisted));
                continue;
            }

            if let Some(dq) = self.residency_check(profile) {
                skipped.push((key, dq));
                continue;
            }

            let availability = availability_cache
                .entry(profile.provider.clone())
                .or_insert_with(|| self.availability.check(&profile.provider))
                .clone();

            let ctx = ScoreContext::new(
                availability,
                snapshot.cost_range(),
                self.policy.allow_experimental,
            );
            match score(profile, requirement, mode, &ctx) {
                ScoreOutcome::Eligible(value) => eligible.push(Eligible {
                    key,
                    score: value,
                    blended_cost: profile.blended_cost(),
                    maturity_rank: profile.maturity.rank(),
                    registry_index: index,
                }),
                ScoreOutcome::Disqualified(dq) => skipped.push((key, dq)),
            }
        }

        // Score descending; ties by cheaper blended cost, then higher
        // maturity, then stable registry order.
        eligible.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.blended_cost.total_cmp(&b.blended_cost))
                .then_with(|| b.maturity_rank.cmp(&a.maturity_rank))
                .then_with(|| a.registry_index.cmp(&b.registry_index))
        });

        let candidates = self.seed_and_fill(requirement, eligible, limit);

        debug!(
            task = %requirement.primary,
            mode = %mode,
            candidates = candidates.len(),
            skipped = skipped.len(),
            "Synthesized fallback chain"
        );

        FallbackChain {
            task_type: requirement.primary,
            candidates,
            skipped,
        }
    }

    fn residency_check(&self, profile: &ModelProfile) -> Option<Disqualification> {
        if !profile.local {
            return None;
        }
        let size_mb = profile.resident_size_mb.unwrap_or(0);
        if self.resident.feasible(size_mb) {
            None
        } else {
            Some(Disqualification::ResourceInfeasible {
                size_mb,
                budget_mb: self.resident.budget_mb(),
            })
        }
    }

    /// Pre-seed with the caller override and the operator preference list,
    /// then fill with score order, deduplicating throughout.
    fn seed_and_fill(
        &self,
        requirement: &TaskRequirement,
        eligible: Vec<Eligible>,
        limit: usize,
    ) -> Vec<RankedCandidate> {
        let eligible_scores: HashMap<&ModelKey, f64> =
            eligible.iter().map(|e| (&e.key, e.score)).collect();

        let mut chain: Vec<RankedCandidate> = Vec::with_capacity(limit);
        let mut taken: HashSet<ModelKey> = HashSet::new();

        if let Some(wanted) = &requirement.model_override
            && let Some(&score) = eligible_scores.get(wanted)
            && taken.insert(wanted.clone())
        {
            chain.push(RankedCandidate {
                key: wanted.clone(),
                score,
                reason: SelectionReason::OverrideRequested,
            });
        }

        if let Some(preferred) = self.policy.preferences.get(&requirement.primary) {
            for (position, key) in preferred.iter().enumerate() {
                if chain.len() >= limit {
                    break;
                }
                // Preference never bypasses the hard rules: entries that were
                // disqualified stay out of the chain.
                if let Some(&score) = eligible_scores.get(key)
                    && taken.insert(key.clone())
                {
                    chain.push(RankedCandidate {
                        key: key.clone(),
                        score,
                        reason: SelectionReason::Preferred { position },
                    });
                }
            }
        }

        for entry in eligible {
            if chain.len() >= limit {
                break;
            }
            if taken.insert(entry.key.clone()) {
                chain.push(RankedCandidate {
                    key: entry.key,
                    score: entry.score,
                    reason: SelectionReason::Ranked,
                });
            }
        }

        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::TaskType;
    use crate::availability::ProviderGate;
    use crate::registry::{Capabilities, MaturityTier};

    fn profile(provider: &str, model_id: &str, coding: u8) -> ModelProfile {
        ModelProfile {
            provider: provider.to_string(),
            model_id: model_id.to_string(),
            context_window: 128_000,
            input_cost_per_million: 3.0,
            output_cost_per_million: 15.0,
            capabilities: Capabilities {
                vision: false,
                function_calling: true,
                structured_output: true,
            },
            coding,
            reasoning: 70,
            speed: 3,
            maturity: MaturityTier::Production,
            local: false,
            resident_size_mb: None,
        }
    }

    fn requirement() -> TaskRequirement {
        TaskRequirement {
            primary: TaskType::CodeGeneration,
            secondary: Vec::new(),
            min_context_tokens: 8000,
            required: Capabilities::default(),
            complexity: 0.3,
            model_override: None,
        }
    }

    fn tracker(providers: &[&str]) -> Arc<AvailabilityTracker> {
        let gates = providers
            .iter()
            .map(|p| {
                (
                    p.to_string(),
                    ProviderGate {
                        configured: true,
                        enabled: true,
                    },
                )
            })
            .collect();
        Arc::new(AvailabilityTracker::new(gates))
    }

    fn selector(profiles: Vec<ModelProfile>, policy: SelectionPolicy) -> Selector {
        let providers: Vec<String> = profiles.iter().map(|p| p.provider.clone()).collect();
        let provider_refs: Vec<&str> = providers.iter().map(String::as_str).collect();
        Selector::new(
            Arc::new(ModelRegistry::load(profiles).unwrap()),
            tracker(&provider_refs),
            Arc::new(ResidentModelManager::new(8000)),
            policy,
        )
    }

    #[test]
    fn test_context_window_scenario() {
        // Candidate A: 4k window, candidate B: 16k window, requirement 8k
        let mut a = profile("p", "a", 90);
        a.context_window = 4000;
        let mut b = profile("p", "b", 80);
        b.context_window = 16_000;

        let s = selector(vec![a, b], SelectionPolicy::new());
        let chain = s.select(&requirement(), PriorityMode::Balanced, None);

        let keys: Vec<String> = chain.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["p/b"]);
        assert!(chain.skipped.iter().any(|(key, dq)| {
            key.model_id == "a" && dq.code() == "context_window"
        }));
    }

    #[test]
    fn test_blocklist_never_bypassed() {
        // Model X would score highest, but is blocklisted
        let x = profile("p", "x", 100);
        let y = profile("p", "y", 50);

        let mut policy = SelectionPolicy::new();
        policy.blocklist.insert(ModelKey::new("p", "x"));
        // Even a preference for X must not resurrect it
        policy
            .preferences
            .insert(TaskType::CodeGeneration, vec![ModelKey::new("p", "x")]);

        let s = selector(vec![x, y], policy);
        let chain = s.select(&requirement(), PriorityMode::Balanced, None);

        assert!(chain.keys().all(|k| k.model_id != "x"));
        assert!(chain
            .skipped
            .iter()
            .any(|(key, dq)| key.model_id == "x" && *dq == Disqualification::Blocklisted));
    }

    #[test]
    fn test_ranked_by_score_descending() {
        let strong = profile("p", "strong", 95);
        let weak = profile("p", "weak", 40);
        let s = selector(vec![weak, strong], SelectionPolicy::new());

        let chain = s.select(&requirement(), PriorityMode::Balanced, None);
        let keys: Vec<&str> = chain.candidates.iter().map(|c| c.key.model_id.as_str()).collect();
        assert_eq!(keys, vec!["strong", "weak"]);
    }

    #[test]
    fn test_tie_breaks_prefer_cheaper_then_maturity_then_order() {
        // Identical subscores so scores tie
        let mut cheap = profile("p", "cheap", 80);
        cheap.input_cost_per_million = 1.0;
        cheap.output_cost_per_million = 5.0;
        let costly = profile("p", "costly", 80);

        // Same price as costly but beta maturity
        let mut beta = profile("p", "beta", 80);
        beta.maturity = MaturityTier::Beta;

        let s = selector(vec![costly.clone(), beta, cheap], SelectionPolicy::new());
        let mut req = requirement();
        // Kill the cost term's influence on score by using balanced mode;
        // the blended cost only matters for the tie-break.
        req.complexity = 0.0;
        let chain = s.select(&req, PriorityMode::Balanced, None);

        let keys: Vec<&str> = chain.candidates.iter().map(|c| c.key.model_id.as_str()).collect();
        assert_eq!(keys, vec!["cheap", "costly", "beta"]);
    }

    #[test]
    fn test_preferences_seed_chain_head() {
        let best = profile("p", "best", 95);
        let second = profile("p", "second", 70);
        let favorite = profile("p", "favorite", 40);

        let mut policy = SelectionPolicy::new();
        policy.preferences.insert(
            TaskType::CodeGeneration,
            vec![ModelKey::new("p", "favorite")],
        );

        let s = selector(vec![best, second, favorite], policy);
        let chain = s.select(&requirement(), PriorityMode::Balanced, None);

        let keys: Vec<&str> = chain.candidates.iter().map(|c| c.key.model_id.as_str()).collect();
        assert_eq!(keys, vec!["favorite", "best", "second"]);
        assert_eq!(
            chain.candidates[0].reason,
            SelectionReason::Preferred { position: 0 }
        );
    }

    #[test]
    fn test_override_goes_first() {
        let best = profile("p", "best", 95);
        let wanted = profile("p", "wanted", 40);

        let s = selector(vec![best, wanted], SelectionPolicy::new());
        let mut req = requirement();
        req.model_override = Some(ModelKey::new("p", "wanted"));
        let chain = s.select(&req, PriorityMode::Balanced, None);

        assert_eq!(chain.candidates[0].key.model_id, "wanted");
        assert_eq!(chain.candidates[0].reason, SelectionReason::OverrideRequested);
        assert_eq!(chain.candidates[1].key.model_id, "best");
    }

    #[test]
    fn test_disqualified_override_falls_back_with_disclosure() {
        let best = profile("p", "best", 95);
        let mut tiny = profile("p", "tiny", 90);
        tiny.context_window = 1000;

        let s = selector(vec![best, tiny], SelectionPolicy::new());
        let mut req = requirement();
        req.model_override = Some(ModelKey::new("p", "tiny"));
        let chain = s.select(&req, PriorityMode::Balanced, None);

        assert_eq!(chain.candidates[0].key.model_id, "best");
        assert!(chain.skipped.iter().any(|(key, _)| key.model_id == "tiny"));
    }

    #[test]
    fn test_chain_bounded_by_k() {
        let profiles: Vec<ModelProfile> = (0..10)
            .map(|i| profile("p", &format!("m{i}"), 50 + i as u8))
            .collect();
        let s = selector(profiles, SelectionPolicy::new());

        let chain = s.select(&requirement(), PriorityMode::Balanced, Some(3));
        assert_eq!(chain.candidates.len(), 3);
    }

    #[test]
    fn test_oversized_local_model_disqualified_without_eviction() {
        let mut giant = profile("local", "giant-70b", 90);
        giant.local = true;
        giant.resident_size_mb = Some(64_000);
        let cloud = profile("p", "cloud", 70);

        let s = selector(vec![giant, cloud], SelectionPolicy::new());
        let chain = s.select(&requirement(), PriorityMode::Balanced, None);

        assert_eq!(chain.candidates.len(), 1);
        assert_eq!(chain.candidates[0].key.model_id, "cloud");
        assert!(chain.skipped.iter().any(|(key, dq)| {
            key.model_id == "giant-70b" && dq.code() == "resource_infeasible"
        }));
    }

    #[test]
    fn test_every_candidate_passes_all_rules() {
        // A grab-bag registry: too-small window, planned, experimental,
        // blocklisted, unconfigured provider, and two healthy models.
        let mut small = profile("p", "small", 90);
        small.context_window = 1000;
        let mut planned = profile("p", "planned", 90);
        planned.maturity = MaturityTier::Planned;
        let mut experimental = profile("p", "experimental", 90);
        experimental.maturity = MaturityTier::Experimental;
        let banned = profile("p", "banned", 90);
        let dark = profile("dark", "hidden", 90);
        let good_a = profile("p", "good-a", 80);
        let good_b = profile("p", "good-b", 75);

        let mut policy = SelectionPolicy::new();
        policy.blocklist.insert(ModelKey::new("p", "banned"));

        let registry = Arc::new(
            ModelRegistry::load(vec![
                small,
                planned,
                experimental,
                banned,
                dark,
                good_a,
                good_b,
            ])
            .unwrap(),
        );
        // "dark" provider has no gate entry, so it is not configured
        let s = Selector::new(
            registry,
            tracker(&["p"]),
            Arc::new(ResidentModelManager::new(8000)),
            policy,
        );

        let chain = s.select(&requirement(), PriorityMode::Balanced, None);
        let keys: Vec<&str> = chain.candidates.iter().map(|c| c.key.model_id.as_str()).collect();
        assert_eq!(keys, vec!["good-a", "good-b"]);
        assert_eq!(chain.skipped.len(), 5);
    }
}
