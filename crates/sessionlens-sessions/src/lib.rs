//! # sessionlens-sessions
//!
//! Turns coding-assistant transcript logs into live session models.
//!
//! ## Layout
//!
//! - [`parser`] - one JSONL line to one [`LogRecord`], tolerant of bad input
//! - [`pricing`] - per-model token rates and cost estimation
//! - [`assembler`] - records of one transcript to a [`Session`]
//! - [`store`] - discovery over the projects directory plus aggregate queries
//! - [`analytics`] - per-project, per-day, per-hour and per-model rollups
//! - [`watcher`] - debounced filesystem watching with change callbacks
//!
//! Everything except the watcher is stateless and recomputes from disk on
//! every call.

pub mod analytics;
pub mod assembler;
pub mod error;
pub mod parser;
pub mod pricing;
pub mod store;
pub mod types;
pub mod vcs;
pub mod watcher;

pub use assembler::SessionAssembler;
pub use error::{Result, SessionError};
pub use parser::{parse_record, parse_record_bytes, read_records};
pub use pricing::{PricingEntry, PricingTable};
pub use store::{Discovery, SessionStore};
pub use types::{
    DailyMetric, DayCount, LogRecord, MetaValue, ModelUsage, PeakHour, ProjectAggregate, Session,
    SessionFilter, SessionStats, SessionStatus, TokenCounts, TokenUsage, WatchEvent,
    WatchEventType,
};
pub use vcs::{NoVcs, VcsMetadata, VcsProvider};
pub use watcher::SessionWatcher;

use std::path::Path;

/// Parse one transcript file with the built-in pricing and no VCS lookup.
pub fn parse_session_file(path: &Path) -> Result<Session> {
    SessionAssembler::new().parse_session_file(path)
}
