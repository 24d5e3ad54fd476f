//! Resident model management for locally-hosted models
//!
//! Self-hosted models occupy a fixed memory budget. Dispatching to a
//! non-resident model loads it, evicting least-recently-used residents that
//! are not mid-request until it fits. A model that cannot fit even into an
//! empty budget is infeasible and must be filtered out at selection time;
//! the manager reports that without touching current residents.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info};

use crate::registry::ModelKey;

/// Why residency could not be granted
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResidencyError {
    #[error("model size {size_mb} MiB exceeds total memory budget {budget_mb} MiB")]
    ExceedsBudget { size_mb: u64, budget_mb: u64 },

    #[error("memory pressure: {pinned_mb} MiB pinned by in-flight requests, cannot free {needed_mb} MiB")]
    Pressure { needed_mb: u64, pinned_mb: u64 },
}

/// Occupancy entry for one loaded model
#[derive(Debug, Clone)]
pub struct ResidentModelSlot {
    pub size_mb: u64,
    /// Logical LRU tick of the last acquire/release
    pub last_used: u64,
    /// Number of dispatches currently using this model
    pub in_flight: u32,
}

#[derive(Debug, Default)]
struct ResidentState {
    slots: HashMap<ModelKey, ResidentModelSlot>,
    used_mb: u64,
    clock: u64,
}

/// LRU manager for the local-model memory budget
#[derive(Debug)]
pub struct ResidentModelManager {
    budget_mb: u64,
    state: Mutex<ResidentState>,
}

impl ResidentModelManager {
    pub fn new(budget_mb: u64) -> Self {
        Self {
            budget_mb,
            state: Mutex::new(ResidentState::default()),
        }
    }

    pub fn budget_mb(&self) -> u64 {
        self.budget_mb
    }

    /// Memory currently occupied by resident models
    pub fn used_mb(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).used_mb
    }

    /// True when the model could ever fit, i.e. its size does not exceed
    /// the whole budget. Selection uses this to disqualify impossible
    /// candidates without running an eviction loop.
    pub fn feasible(&self, size_mb: u64) -> bool {
        size_mb <= self.budget_mb
    }

    /// Current occupancy table, for observability
    pub fn resident_models(&self) -> HashMap<ModelKey, ResidentModelSlot> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .slots
            .clone()
    }

    /// Make `key` resident (loading and evicting as needed) and pin it for
    /// one dispatch. The returned guard releases the pin on drop.
    pub fn acquire(
        self: &Arc<Self>,
        key: &ModelKey,
        size_mb: u64,
    ) -> std::result::Result<ResidencyGuard, ResidencyError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.clock += 1;
        let now = state.clock;

        if let Some(slot) = state.slots.get_mut(key) {
            slot.last_used = now;
            slot.in_flight += 1;
            return Ok(ResidencyGuard {
                manager: Arc::clone(self),
                key: key.clone(),
            });
        }

        if size_mb > self.budget_mb {
            return Err(ResidencyError::ExceedsBudget {
                size_mb,
                budget_mb: self.budget_mb,
            });
        }

        while state.used_mb + size_mb > self.budget_mb {
            let victim = state
                .slots
                .iter()
                .filter(|(_, slot)| slot.in_flight == 0)
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone());

            match victim {
                Some(victim_key) => {
                    if let Some(evicted) = state.slots.remove(&victim_key) {
                        state.used_mb -= evicted.size_mb;
                        info!(
                            model = %victim_key,
                            freed_mb = evicted.size_mb,
                            "Evicted resident model under memory pressure"
                        );
                    }
                }
                None => {
                    let pinned_mb = state.used_mb;
                    return Err(ResidencyError::Pressure {
                        needed_mb: size_mb,
                        pinned_mb,
                    });
                }
            }
        }

        debug!(model = %key, size_mb = size_mb, "Loading model into resident memory");
        state.slots.insert(
            key.clone(),
            ResidentModelSlot {
                size_mb,
                last_used: now,
                in_flight: 1,
            },
        );
        state.used_mb += size_mb;

        Ok(ResidencyGuard {
            manager: Arc::clone(self),
            key: key.clone(),
        })
    }

    fn release(&self, key: &ModelKey) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.clock += 1;
        let now = state.clock;
        if let Some(slot) = state.slots.get_mut(key) {
            slot.in_flight = slot.in_flight.saturating_sub(1);
            slot.last_used = now;
        }
    }
}

/// Pins a resident model for the duration of one dispatch
#[derive(Debug)]
pub struct ResidencyGuard {
    manager: Arc<ResidentModelManager>,
    key: ModelKey,
}

impl Drop for ResidencyGuard {
    fn drop(&mut self) {
        self.manager.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ModelKey {
        ModelKey::new("local", name)
    }

    #[test]
    fn test_acquire_within_budget() {
        let manager = Arc::new(ResidentModelManager::new(8000));
        let guard = manager.acquire(&key("llama-8b"), 5000).unwrap();
        assert_eq!(manager.used_mb(), 5000);
        drop(guard);
        // Releasing the pin keeps the model resident
        assert_eq!(manager.used_mb(), 5000);
    }

    #[test]
    fn test_oversized_model_rejected_without_eviction() {
        let manager = Arc::new(ResidentModelManager::new(8000));
        let _resident = manager.acquire(&key("small"), 2000).unwrap();

        let err = manager.acquire(&key("huge"), 16_000).unwrap_err();
        assert_eq!(
            err,
            ResidencyError::ExceedsBudget {
                size_mb: 16_000,
                budget_mb: 8000
            }
        );
        // The existing resident was not disturbed
        assert_eq!(manager.used_mb(), 2000);
        assert!(!manager.feasible(16_000));
    }

    #[test]
    fn test_lru_eviction_order() {
        let manager = Arc::new(ResidentModelManager::new(10_000));
        drop(manager.acquire(&key("first"), 4000).unwrap());
        drop(manager.acquire(&key("second"), 4000).unwrap());
        // Touch "first" so "second" becomes least recently used
        drop(manager.acquire(&key("first"), 4000).unwrap());

        drop(manager.acquire(&key("third"), 4000).unwrap());

        let residents = manager.resident_models();
        assert!(residents.contains_key(&key("first")));
        assert!(residents.contains_key(&key("third")));
        assert!(!residents.contains_key(&key("second")));
    }

    #[test]
    fn test_in_flight_models_never_evicted() {
        let manager = Arc::new(ResidentModelManager::new(8000));
        let _pinned = manager.acquire(&key("busy"), 6000).unwrap();

        let err = manager.acquire(&key("next"), 4000).unwrap_err();
        assert_eq!(
            err,
            ResidencyError::Pressure {
                needed_mb: 4000,
                pinned_mb: 6000
            }
        );
        assert!(manager.resident_models().contains_key(&key("busy")));
    }

    #[test]
    fn test_eviction_after_release() {
        let manager = Arc::new(ResidentModelManager::new(8000));
        let guard = manager.acquire(&key("busy"), 6000).unwrap();
        drop(guard);

        // Now the previous resident is evictable
        let _next = manager.acquire(&key("next"), 4000).unwrap();
        let residents = manager.resident_models();
        assert!(residents.contains_key(&key("next")));
        assert!(!residents.contains_key(&key("busy")));
        assert_eq!(manager.used_mb(), 4000);
    }

    #[test]
    fn test_reacquire_resident_is_cheap() {
        let manager = Arc::new(ResidentModelManager::new(8000));
        let a = manager.acquire(&key("m"), 5000).unwrap();
        let b = manager.acquire(&key("m"), 5000).unwrap();
        assert_eq!(manager.used_mb(), 5000);
        drop(a);
        drop(b);
    }
}
