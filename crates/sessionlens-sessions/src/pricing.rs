use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::TokenCounts;

/// Per-1000-token rates for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    pub input: f64,
    pub output: f64,
    pub cache_creation: f64,
    pub cache_read: f64,
}

impl PricingEntry {
    /// Rates applied when a model has no entry in the table.
    pub const DEFAULT: PricingEntry = PricingEntry {
        input: 0.01,
        output: 0.03,
        cache_creation: 0.0125,
        cache_read: 0.001,
    };

    pub const fn new(input: f64, output: f64, cache_creation: f64, cache_read: f64) -> Self {
        Self {
            input,
            output,
            cache_creation,
            cache_read,
        }
    }
}

impl Default for PricingEntry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const OPUS: PricingEntry = PricingEntry::new(0.015, 0.075, 0.01875, 0.0015);
const OPUS_4_5: PricingEntry = PricingEntry::new(0.005, 0.025, 0.00625, 0.0005);
const SONNET: PricingEntry = PricingEntry::new(0.003, 0.015, 0.00375, 0.0003);
const HAIKU_3_5: PricingEntry = PricingEntry::new(0.0008, 0.004, 0.001, 0.00008);
const HAIKU_4_5: PricingEntry = PricingEntry::new(0.001, 0.005, 0.00125, 0.0001);
const HAIKU_3: PricingEntry = PricingEntry::new(0.00025, 0.00125, 0.0003, 0.00003);

const BUILTIN: &[(&str, PricingEntry)] = &[
    ("claude-opus-4-5-20251101", OPUS_4_5),
    ("claude-opus-4-1-20250805", OPUS),
    ("claude-opus-4-20250514", OPUS),
    ("claude-3-opus-20240229", OPUS),
    ("claude-sonnet-4-5-20250929", SONNET),
    ("claude-sonnet-4-20250514", SONNET),
    ("claude-3-7-sonnet-20250219", SONNET),
    ("claude-3-5-sonnet-20241022", SONNET),
    ("claude-3-5-sonnet-20240620", SONNET),
    ("claude-haiku-4-5-20251001", HAIKU_4_5),
    ("claude-3-5-haiku-20241022", HAIKU_3_5),
    ("claude-3-haiku-20240307", HAIKU_3),
];

/// Model-name keyed pricing with exact-match lookup.
#[derive(Debug, Clone)]
pub struct PricingTable {
    entries: HashMap<String, PricingEntry>,
    default: PricingEntry,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PricingTable {
    /// Table holding no models; every lookup yields the default entry.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            default: PricingEntry::DEFAULT,
        }
    }

    /// Table preloaded with the known model ids.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        for (model, entry) in BUILTIN {
            table.insert(*model, *entry);
        }
        table
    }

    /// Add or replace the entry for a model.
    pub fn insert(&mut self, model: impl Into<String>, entry: PricingEntry) {
        self.entries.insert(model.into(), entry);
    }

    pub fn with_default(mut self, entry: PricingEntry) -> Self {
        self.default = entry;
        self
    }

    pub fn default_entry(&self) -> PricingEntry {
        self.default
    }

    pub fn contains(&self, model: &str) -> bool {
        self.entries.contains_key(model)
    }

    /// Exact-string lookup, falling back to the default entry.
    pub fn lookup(&self, model: &str) -> PricingEntry {
        match self.entries.get(model) {
            Some(entry) => *entry,
            None => {
                tracing::debug!(model, "No pricing entry for model, using default rates");
                self.default
            }
        }
    }
}

/// Estimated cost of the counters at the given per-1000 rates.
pub fn cost(counts: &TokenCounts, entry: &PricingEntry) -> f64 {
    counts.input as f64 / 1000.0 * entry.input
        + counts.output as f64 / 1000.0 * entry.output
        + counts.cache_creation as f64 / 1000.0 * entry.cache_creation
        + counts.cache_read as f64 / 1000.0 * entry.cache_read
}
