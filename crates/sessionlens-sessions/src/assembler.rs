use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::parser::read_records;
use crate::pricing::PricingTable;
use crate::types::{LogRecord, MetaValue, Session, SessionStatus, TokenCounts, TokenUsage};
use crate::vcs::{NoVcs, VcsMetadata, VcsProvider};

/// Model assumed when no record names one.
pub const BASELINE_MODEL: &str = "claude-sonnet-4-20250514";

/// Activity newer than this means the session is working.
pub const WORKING_THRESHOLD_SECS: i64 = 2 * 60;
/// Activity newer than this (but not working) means the session is idle.
pub const IDLE_THRESHOLD_SECS: i64 = 15 * 60;

const UNKNOWN_PROJECT: &str = "unknown";
const TASK_MAX_CHARS: usize = 80;
const RECENT_TASK_WINDOW: usize = 20;
const RECENT_TASK_MIN_CHARS: usize = 10;
const OPENING_TASK_WINDOW: usize = 10;
const OPENING_TASK_MIN_CHARS: usize = 20;

const TOOL_RESULT_MARKERS: &[&str] = &["[tool_result]", "tool_use_id", "\"tool_result\""];
const COMMAND_MARKERS: &[&str] = &[
    "<command-name>",
    "<command-message>",
    "<command-args>",
    "<local-command-stdout>",
    "<local-command-stderr>",
];
const FILE_EDIT_TOOLS: &[&str] = &["edit", "write", "multiedit"];

/// Return the most recently mentioned model.
///
/// Records are scanned newest first; each one is checked for a `model` key at
/// the top of its metadata, then inside `message`, then inside any other map
/// directly under the metadata.
pub fn infer_model(records: &[LogRecord]) -> String {
    records
        .iter()
        .rev()
        .find_map(|r| model_in_metadata(&r.raw_metadata))
        .unwrap_or_else(|| BASELINE_MODEL.to_string())
}

fn model_in_metadata(meta: &BTreeMap<String, MetaValue>) -> Option<String> {
    if let Some(model) = non_empty_str(meta.get("model")) {
        return Some(model);
    }
    if let Some(model) = meta.get("message").and_then(|m| non_empty_str(m.get("model"))) {
        return Some(model);
    }
    meta.values()
        .filter_map(MetaValue::as_map)
        .find_map(|map| non_empty_str(map.get("model")))
}

fn non_empty_str(value: Option<&MetaValue>) -> Option<String> {
    value
        .and_then(MetaValue::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Classify a session from its records and the current time.
///
/// This is recomputed on every read; a complete session becomes working
/// again as soon as new activity lands.
pub fn infer_status(records: &[LogRecord], now: DateTime<Utc>) -> SessionStatus {
    let Some(last) = records.last() else {
        return SessionStatus::Idle;
    };
    if last.record_type == "error" {
        return SessionStatus::Error;
    }

    let last_activity = records
        .iter()
        .map(|r| r.timestamp)
        .max()
        .unwrap_or(last.timestamp);
    let elapsed = now.signed_duration_since(last_activity);

    if elapsed < Duration::seconds(WORKING_THRESHOLD_SECS) {
        SessionStatus::Working
    } else if elapsed < Duration::seconds(IDLE_THRESHOLD_SECS) {
        SessionStatus::Idle
    } else {
        SessionStatus::Complete
    }
}

/// Pick a short description of what the session is doing.
pub fn extract_current_task(records: &[LogRecord]) -> String {
    let recent_start = records.len() - records.len().min(RECENT_TASK_WINDOW);
    if let Some(task) = records[recent_start..]
        .iter()
        .rev()
        .find_map(|r| task_candidate(r, RECENT_TASK_MIN_CHARS))
    {
        return task;
    }

    if let Some(task) = records
        .iter()
        .take(OPENING_TASK_WINDOW)
        .find_map(|r| task_candidate(r, OPENING_TASK_MIN_CHARS))
    {
        return task;
    }

    if records.is_empty() {
        "No activity".to_string()
    } else {
        "Session active".to_string()
    }
}

fn task_candidate(record: &LogRecord, min_chars: usize) -> Option<String> {
    if !record.is_user() {
        return None;
    }
    let text = record.content.trim();
    if text.chars().count() <= min_chars || looks_like_tool_output(text) {
        return None;
    }
    Some(summarize_task(text))
}

fn looks_like_tool_output(text: &str) -> bool {
    text.starts_with("Caveat:")
        || TOOL_RESULT_MARKERS.iter().any(|m| text.contains(m))
        || COMMAND_MARKERS.iter().any(|m| text.contains(m))
}

/// Collapse whitespace and cap the text at 80 characters.
fn summarize_task(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > TASK_MAX_CHARS {
        let head: String = collapsed.chars().take(TASK_MAX_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        collapsed
    }
}

/// Decode a storage directory name back into the absolute project path.
///
/// `-home-user-project1` becomes `/home/user/project1`. Names without the
/// leading marker are percent-decoded, and when that fails `%2F` sequences are
/// replaced literally.
pub fn decode_project_path(encoded: &str) -> String {
    if let Some(rest) = encoded.strip_prefix('-') {
        return format!("/{}", rest.replace('-', "/"));
    }

    match urlencoding::decode(encoded) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => encoded.replace("%2F", "/").replace("%2f", "/"),
    }
}

/// Last segment of a decoded project path.
pub fn project_name(project_path: &str) -> String {
    project_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_PROJECT)
        .to_string()
}

/// Collect `file_path` arguments of edit/write tool calls, first-seen order.
pub fn extract_modified_files(records: &[LogRecord]) -> Vec<String> {
    let mut found = Vec::new();
    for record in records {
        for value in record.raw_metadata.values() {
            collect_edited_paths(value, &mut found);
        }
    }

    let mut seen = HashSet::new();
    found.retain(|path| seen.insert(path.clone()));
    found
}

fn collect_edited_paths(value: &MetaValue, out: &mut Vec<String>) {
    match value {
        MetaValue::Map(map) => {
            if let Some(path) = edited_path(map) {
                out.push(path);
            }
            for child in map.values() {
                collect_edited_paths(child, out);
            }
        }
        MetaValue::List(items) => {
            for item in items {
                collect_edited_paths(item, out);
            }
        }
        _ => {}
    }
}

fn edited_path(map: &BTreeMap<String, MetaValue>) -> Option<String> {
    let name = map.get("name")?.as_str()?;
    if !FILE_EDIT_TOOLS.iter().any(|t| name.eq_ignore_ascii_case(t)) {
        return None;
    }
    map.get("input")?
        .get("file_path")?
        .as_str()
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

/// Turns the records of one transcript into a [`Session`].
#[derive(Clone)]
pub struct SessionAssembler {
    pricing: PricingTable,
    vcs: Arc<dyn VcsProvider>,
}

impl Default for SessionAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionAssembler {
    pub fn new() -> Self {
        Self {
            pricing: PricingTable::builtin(),
            vcs: Arc::new(NoVcs),
        }
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_vcs(mut self, vcs: Arc<dyn VcsProvider>) -> Self {
        self.vcs = vcs;
        self
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Look up branch and worktree for an encoded project directory name.
    pub fn vcs_metadata(&self, project_dir_name: &str) -> VcsMetadata {
        let project_path = decode_project_path(project_dir_name);
        self.vcs.metadata(Path::new(&project_path))
    }

    /// Assemble a session, querying the VCS provider for its project.
    pub fn assemble(
        &self,
        id: &str,
        project_dir_name: &str,
        records: Vec<LogRecord>,
        now: DateTime<Utc>,
    ) -> Session {
        let vcs = self.vcs_metadata(project_dir_name);
        self.assemble_with_vcs(id, project_dir_name, records, &vcs, now)
    }

    /// Assemble a session with already-resolved VCS metadata.
    pub fn assemble_with_vcs(
        &self,
        id: &str,
        project_dir_name: &str,
        records: Vec<LogRecord>,
        vcs: &VcsMetadata,
        now: DateTime<Utc>,
    ) -> Session {
        let project_path = decode_project_path(project_dir_name);
        let project_name = project_name(&project_path);

        let model = infer_model(&records);
        let counts = records
            .iter()
            .fold(TokenCounts::default(), |acc, r| acc + r.usage);
        let tokens_used = TokenUsage::priced(counts, &self.pricing.lookup(&model));

        Session {
            id: id.to_string(),
            project_path,
            project_name,
            git_branch: vcs.branch.clone(),
            git_worktree: vcs.worktree.clone(),
            model,
            status: infer_status(&records, now),
            start_time: records.iter().map(|r| r.timestamp).min(),
            last_activity: records.iter().map(|r| r.timestamp).max(),
            current_task: extract_current_task(&records),
            tokens_used,
            files_modified: extract_modified_files(&records),
            records,
            source_path: Default::default(),
        }
    }

    /// Parse a single transcript file into a session, as of now.
    pub fn parse_session_file(&self, path: &Path) -> Result<Session> {
        self.parse_session_file_at(path, Utc::now())
    }

    pub fn parse_session_file_at(&self, path: &Path, now: DateTime<Utc>) -> Result<Session> {
        let records = read_records(path)?;
        let mut session = self.assemble(&session_id(path), &project_dir_name(path), records, now);
        session.source_path = path.to_path_buf();
        Ok(session)
    }
}

/// Session id of a transcript: its file name without the suffix.
pub fn session_id(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn project_dir_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}
