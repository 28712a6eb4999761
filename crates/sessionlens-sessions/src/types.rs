use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::pricing::{cost, PricingEntry};

/// Open value tree holding every transcript field the parser does not model.
///
/// Heuristic scans (model inference, edited-file extraction) walk this tree
/// explicitly instead of relying on typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    /// Look up a key when this value is a map.
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        match self {
            MetaValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, MetaValue>> {
        match self {
            MetaValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetaValue]> {
        match self {
            MetaValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Non-negative integral view of a number, used for token counters.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            MetaValue::Number(n) if *n >= 0.0 => Some(*n as u64),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for MetaValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => MetaValue::Null,
            serde_json::Value::Bool(b) => MetaValue::Bool(b),
            serde_json::Value::Number(n) => MetaValue::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => MetaValue::String(s),
            serde_json::Value::Array(items) => {
                MetaValue::List(items.into_iter().map(MetaValue::from).collect())
            }
            serde_json::Value::Object(map) => MetaValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, MetaValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// The four raw token counters reported on a single record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub cache_creation: u64,
    pub cache_read: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.input
            .saturating_add(self.output)
            .saturating_add(self.cache_creation)
            .saturating_add(self.cache_read)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl Add for TokenCounts {
    type Output = TokenCounts;

    fn add(self, rhs: TokenCounts) -> TokenCounts {
        TokenCounts {
            input: self.input.saturating_add(rhs.input),
            output: self.output.saturating_add(rhs.output),
            cache_creation: self.cache_creation.saturating_add(rhs.cache_creation),
            cache_read: self.cache_read.saturating_add(rhs.cache_read),
        }
    }
}

impl AddAssign for TokenCounts {
    fn add_assign(&mut self, rhs: TokenCounts) {
        *self = *self + rhs;
    }
}

/// Token counters together with their derived total and cost.
///
/// The cost is never tracked on its own: it is produced from the counters
/// and a pricing entry by [`TokenUsage::priced`] or [`TokenUsage::reprice`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub total: u64,
    pub estimated_cost: f64,
}

impl TokenUsage {
    pub fn priced(counts: TokenCounts, entry: &PricingEntry) -> Self {
        Self {
            input_tokens: counts.input,
            output_tokens: counts.output,
            cache_creation_tokens: counts.cache_creation,
            cache_read_tokens: counts.cache_read,
            total: counts.total(),
            estimated_cost: cost(&counts, entry),
        }
    }

    pub fn counts(&self) -> TokenCounts {
        TokenCounts {
            input: self.input_tokens,
            output: self.output_tokens,
            cache_creation: self.cache_creation_tokens,
            cache_read: self.cache_read_tokens,
        }
    }

    /// Recompute total and cost from the counters with a new pricing entry.
    pub fn reprice(&mut self, entry: &PricingEntry) {
        *self = Self::priced(self.counts(), entry);
    }

    /// Add another usage into this one, keeping each side's own pricing.
    pub fn merge(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_creation_tokens = self
            .cache_creation_tokens
            .saturating_add(other.cache_creation_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(other.cache_read_tokens);
        self.total = self.total.saturating_add(other.total);
        self.estimated_cost += other.estimated_cost;
    }
}

/// One parsed transcript line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    /// True when no accepted timestamp format matched and `timestamp` is the
    /// moment of parsing. Such records can be out of order during backfills.
    #[serde(default)]
    pub timestamp_estimated: bool,
    pub record_type: String,
    pub role: String,
    pub content: String,
    pub usage: TokenCounts,
    pub raw_metadata: BTreeMap<String, MetaValue>,
}

impl LogRecord {
    pub fn is_user(&self) -> bool {
        self.role == "user" || (self.role.is_empty() && self.record_type == "user")
    }
}

/// Live status of a session, recomputed from wall-clock time on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Working,
    Idle,
    Complete,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Working => "working",
            SessionStatus::Idle => "idle",
            SessionStatus::Complete => "complete",
            SessionStatus::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "working" => Ok(SessionStatus::Working),
            "idle" => Ok(SessionStatus::Idle),
            "complete" => Ok(SessionStatus::Complete),
            "error" => Ok(SessionStatus::Error),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// A fully assembled session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_path: String,
    pub project_name: String,
    pub git_branch: String,
    pub git_worktree: String,
    /// Model inferred for the whole session and used to price `tokens_used`.
    pub model: String,
    pub status: SessionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub current_task: String,
    pub tokens_used: TokenUsage,
    pub files_modified: Vec<String>,
    pub records: Vec<LogRecord>,
    pub source_path: PathBuf,
}

impl Session {
    pub fn message_count(&self) -> usize {
        self.records.len()
    }
}

/// Filter parameters for listing sessions.
#[derive(Debug, Default)]
pub struct SessionFilter {
    pub project: Option<String>,
    pub status: Option<SessionStatus>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

/// Per-project rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectAggregate {
    pub project_name: String,
    pub project_path: String,
    pub session_count: usize,
    pub active_sessions: usize,
    pub model_usage: BTreeMap<String, usize>,
    pub tokens: TokenUsage,
    pub first_activity: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// One calendar day of activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyMetric {
    pub date: NaiveDate,
    /// Distinct session ids active that day, counted once across projects.
    pub session_count: usize,
    pub message_count: usize,
    pub tokens: TokenUsage,
    pub model_usage: BTreeMap<String, usize>,
}

/// An hour of the day whose average session count exceeds one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakHour {
    pub hour: u32,
    pub avg_sessions: f64,
}

/// Histogram entry for the model usage view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub sessions: usize,
    pub tokens: TokenUsage,
}

/// Sessions count for a single day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayCount {
    pub date: String,
    pub count: usize,
}

/// Aggregate statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub by_status: BTreeMap<String, usize>,
    pub tokens: TokenUsage,
    pub sessions_over_time: Vec<DayCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventType {
    Created,
    Modified,
    Deleted,
}

/// Notification emitted by the watcher for a single transcript change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub session_id: String,
    /// Freshly parsed session for created/modified events.
    pub session: Option<Session>,
    pub timestamp: DateTime<Utc>,
}
