//! Provider availability tracking with a TTL cache
//!
//! Availability is evaluated lazily: the first `check` after an entry
//! expires revalidates it from the configured gates, and dispatch-time auth
//! failures negative-cache the provider immediately so the rest of a
//! fallback chain can skip it. There is no background polling.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Why a provider is not currently usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailabilityReason {
    /// No credential configured (or the credential was rejected)
    NotConfigured,
    /// Integration gated off (experimental/planned and not enabled)
    NotEnabled,
    /// Network-level failure observed
    Unreachable,
}

impl std::fmt::Display for UnavailabilityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "not_configured"),
            Self::NotEnabled => write!(f, "not_enabled"),
            Self::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Cached up/down status for one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Availability {
    Available,
    Unavailable {
        reason: UnavailabilityReason,
        detail: String,
    },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }

    fn unavailable(reason: UnavailabilityReason, detail: impl Into<String>) -> Self {
        Self::Unavailable {
            reason,
            detail: detail.into(),
        }
    }
}

/// Static per-provider gates supplied by configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderGate {
    /// Credential present (the config layer only ever passes a boolean,
    /// never the secret itself)
    pub configured: bool,
    /// Integration enabled for ordinary selection
    pub enabled: bool,
}

#[derive(Debug, Clone)]
struct CachedStatus {
    availability: Availability,
    expires_at: Instant,
}

/// Default cache TTL
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// TTL-cached availability per provider
#[derive(Debug)]
pub struct AvailabilityTracker {
    ttl: Duration,
    gates: HashMap<String, ProviderGate>,
    cache: Mutex<HashMap<String, CachedStatus>>,
}

impl AvailabilityTracker {
    pub fn new(gates: HashMap<String, ProviderGate>) -> Self {
        Self {
            ttl: DEFAULT_TTL,
            gates,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Providers this tracker knows about
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.gates.keys().map(String::as_str)
    }

    /// Current availability for a provider, revalidating lazily on expiry
    pub fn check(&self, provider: &str) -> Availability {
        let now = Instant::now();
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(entry) = cache.get(provider)
            && entry.expires_at > now
        {
            return entry.availability.clone();
        }

        let availability = self.revalidate(provider);
        cache.insert(
            provider.to_string(),
            CachedStatus {
                availability: availability.clone(),
                expires_at: now + self.ttl,
            },
        );
        availability
    }

    /// Record an auth failure observed during dispatch. Takes effect
    /// immediately so the remainder of a fallback chain skips the provider.
    pub fn mark_auth_failure(&self, provider: &str, detail: &str) {
        warn!(provider = %provider, detail = %detail, "Provider credential rejected, negative-caching");
        self.store(
            provider,
            Availability::unavailable(UnavailabilityReason::NotConfigured, detail),
        );
    }

    /// Record a network-level failure observed during dispatch
    pub fn mark_unreachable(&self, provider: &str, detail: &str) {
        warn!(provider = %provider, detail = %detail, "Provider unreachable, negative-caching");
        self.store(
            provider,
            Availability::unavailable(UnavailabilityReason::Unreachable, detail),
        );
    }

    /// Drop the cached entry so the next check revalidates
    pub fn invalidate(&self, provider: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.remove(provider);
    }

    /// Availability for every known provider
    pub fn statuses(&self) -> HashMap<String, Availability> {
        self.gates
            .keys()
            .map(|provider| (provider.clone(), self.check(provider)))
            .collect()
    }

    fn store(&self, provider: &str, availability: Availability) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            provider.to_string(),
            CachedStatus {
                availability,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    fn revalidate(&self, provider: &str) -> Availability {
        let gate = match self.gates.get(provider) {
            Some(gate) => gate,
            None => {
                return Availability::unavailable(
                    UnavailabilityReason::NotConfigured,
                    format!("unknown provider '{}'", provider),
                );
            }
        };
        if !gate.configured {
            return Availability::unavailable(
                UnavailabilityReason::NotConfigured,
                "no credential configured",
            );
        }
        if !gate.enabled {
            return Availability::unavailable(
                UnavailabilityReason::NotEnabled,
                "provider integration not enabled",
            );
        }
        debug!(provider = %provider, "Provider revalidated as available");
        Availability::Available
    }
}
