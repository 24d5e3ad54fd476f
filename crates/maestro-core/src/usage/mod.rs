//! Usage aggregation for downstream cost reporting
//!
//! Every dispatch attempt - successful or not - is appended here as a
//! `UsageRecord`. The ledger is append-only and accepts concurrent writers;
//! a write is never dropped. Read-side aggregation (by session, model,
//! provider, time window, day) exists for external reporting; the routing
//! core itself only writes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::ModelKey;

/// Token usage for a single dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input/prompt tokens
    pub input_tokens: u32,
    /// Number of output/completion tokens
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens (input + output)
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// How an attempt ended, as far as accounting is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOutcome {
    Success,
    Failure,
}

/// One appended accounting record for one dispatch attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Unique identifier for this record
    pub id: String,
    /// Logical session this attempt belonged to, if any
    pub session: Option<String>,
    pub model: ModelKey,
    pub tokens: TokenUsage,
    /// Cost for input tokens in USD, derived from the profile's pricing
    pub input_cost_usd: f64,
    /// Cost for output tokens in USD
    pub output_cost_usd: f64,
    pub outcome: UsageOutcome,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    /// Total cost in USD
    pub fn total_cost_usd(&self) -> f64 {
        self.input_cost_usd + self.output_cost_usd
    }
}

/// Aggregated totals for one grouping key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_cost_usd: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub attempt_count: u32,
    pub failure_count: u32,
}

impl UsageSummary {
    fn add(&mut self, record: &UsageRecord) {
        self.total_cost_usd += record.total_cost_usd();
        self.total_input_tokens += record.tokens.input_tokens as u64;
        self.total_output_tokens += record.tokens.output_tokens as u64;
        self.attempt_count += 1;
        if record.outcome == UsageOutcome::Failure {
            self.failure_count += 1;
        }
    }
}

/// Append-only ledger of dispatch attempts
#[derive(Debug, Default)]
pub struct UsageLedger {
    records: Arc<RwLock<Vec<UsageRecord>>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record. Poisoned locks are recovered rather than allowed
    /// to drop the write.
    pub fn append(&self, record: UsageRecord) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.push(record);
    }

    /// All records in append order
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Total cost across every record
    pub fn total_cost_usd(&self) -> f64 {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| r.total_cost_usd())
            .sum()
    }

    /// Aggregate per model key
    pub fn by_model(&self) -> HashMap<ModelKey, UsageSummary> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut out: HashMap<ModelKey, UsageSummary> = HashMap::new();
        for record in records.iter() {
            out.entry(record.model.clone()).or_default().add(record);
        }
        out
    }

    /// Aggregate per provider
    pub fn by_provider(&self) -> HashMap<String, UsageSummary> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut out: HashMap<String, UsageSummary> = HashMap::new();
        for record in records.iter() {
            out.entry(record.model.provider.clone())
                .or_default()
                .add(record);
        }
        out
    }

    /// Aggregate for one session
    pub fn for_session(&self, session: &str) -> UsageSummary {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut summary = UsageSummary::default();
        for record in records.iter() {
            if record.session.as_deref() == Some(session) {
                summary.add(record);
            }
        }
        summary
    }

    /// Aggregate over a half-open time window `[since, until)`
    pub fn for_window(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> UsageSummary {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut summary = UsageSummary::default();
        for record in records.iter() {
            if record.timestamp >= since && record.timestamp < until {
                summary.add(record);
            }
        }
        summary
    }

    /// Aggregate for one calendar day (UTC)
    pub fn for_date(&self, date: NaiveDate) -> UsageSummary {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut summary = UsageSummary::default();
        for record in records.iter() {
            if record.timestamp.date_naive() == date {
                summary.add(record);
            }
        }
        summary
    }
}

impl Clone for UsageLedger {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
        }
    }
}
