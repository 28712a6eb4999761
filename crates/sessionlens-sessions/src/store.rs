use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::analytics::{self, DEFAULT_ACTIVE_WINDOW_SECS, DEFAULT_PEAK_HOURS};
use crate::assembler::{session_id, SessionAssembler};
use crate::error::{Result, SessionError};
use crate::parser::read_records;
use crate::pricing::PricingTable;
use crate::types::{
    DailyMetric, ModelUsage, PeakHour, ProjectAggregate, Session, SessionFilter, SessionStats,
};
use crate::vcs::{VcsMetadata, VcsProvider};

/// Suffix of transcript files.
pub const TRANSCRIPT_EXTENSION: &str = "jsonl";

/// True for `*.jsonl` names that are not summary files. Does not touch disk.
pub fn is_transcript_path(path: &Path) -> bool {
    if path.extension().and_then(|s| s.to_str()) != Some(TRANSCRIPT_EXTENSION) {
        return false;
    }
    path.file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|name| !name.to_lowercase().contains("summary"))
}

/// Result of one scan over the projects directory.
#[derive(Debug, Default)]
pub struct Discovery {
    pub sessions: Vec<Session>,
    /// Transcripts that could not be read and were left out.
    pub skipped_files: usize,
}

/// Provides access to transcript files on disk.
///
/// Every query rescans the directory; nothing is cached between calls, so a
/// store can be shared freely between concurrent callers.
#[derive(Clone)]
pub struct SessionStore {
    projects_dir: PathBuf,
    assembler: SessionAssembler,
    active_window: Duration,
    peak_hours: usize,
}

impl SessionStore {
    /// Create a SessionStore on the default projects directory (`~/.claude/projects`).
    pub fn new() -> Result<Self> {
        let projects_dir = Self::default_projects_dir().ok_or(SessionError::NoHomeDir)?;
        Ok(Self::with_dir(projects_dir))
    }

    pub fn default_projects_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".claude").join("projects"))
    }

    /// Create a SessionStore with a custom directory (useful for testing).
    pub fn with_dir(projects_dir: PathBuf) -> Self {
        Self {
            projects_dir,
            assembler: SessionAssembler::new(),
            active_window: Duration::seconds(DEFAULT_ACTIVE_WINDOW_SECS),
            peak_hours: DEFAULT_PEAK_HOURS,
        }
    }

    pub fn with_assembler(mut self, assembler: SessionAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.assembler = self.assembler.with_pricing(pricing);
        self
    }

    pub fn with_vcs(mut self, vcs: Arc<dyn VcsProvider>) -> Self {
        self.assembler = self.assembler.with_vcs(vcs);
        self
    }

    pub fn with_active_window(mut self, window: std::time::Duration) -> Self {
        self.active_window = Duration::from_std(window)
            .unwrap_or_else(|_| Duration::seconds(DEFAULT_ACTIVE_WINDOW_SECS));
        self
    }

    pub fn with_peak_hours(mut self, top_n: usize) -> Self {
        self.peak_hours = top_n;
        self
    }

    /// Return the projects directory path.
    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    pub fn assembler(&self) -> &SessionAssembler {
        &self.assembler
    }

    pub fn active_window(&self) -> Duration {
        self.active_window
    }

    /// Scan the configured root.
    pub fn scan(&self) -> Result<Discovery> {
        self.scan_dir(&self.projects_dir, Utc::now())
    }

    /// Scan `root` as of `now`.
    ///
    /// A missing root yields an empty result. Project directories or
    /// transcripts that cannot be read are skipped and logged; only failing to
    /// list the root itself is an error.
    pub fn scan_dir(&self, root: &Path, now: DateTime<Utc>) -> Result<Discovery> {
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(root = %root.display(), "Projects directory missing, no sessions");
                return Ok(Discovery::default());
            }
            Err(source) => {
                return Err(SessionError::RootUnreadable {
                    path: root.to_path_buf(),
                    source,
                })
            }
        };

        let mut discovery = Discovery::default();

        for entry in entries {
            let project_dir = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    tracing::warn!("Failed to read entry in {:?}: {}", root, e);
                    continue;
                }
            };
            if !project_dir.is_dir() {
                continue;
            }
            self.scan_project(&project_dir, now, &mut discovery);
        }

        discovery
            .sessions
            .sort_by(|a, b| b.last_activity.cmp(&a.last_activity));

        tracing::debug!(
            root = %root.display(),
            sessions = discovery.sessions.len(),
            skipped = discovery.skipped_files,
            "Discovered sessions"
        );

        Ok(discovery)
    }

    fn scan_project(&self, project_dir: &Path, now: DateTime<Utc>, discovery: &mut Discovery) {
        let dir_name = project_dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let files = match std::fs::read_dir(project_dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Failed to read project dir {:?}: {}", project_dir, e);
                return;
            }
        };

        // Resolved at most once per project and only if it has transcripts.
        let mut vcs: Option<VcsMetadata> = None;

        for file in files.flatten() {
            let path = file.path();
            if !path.is_file() || !is_transcript_path(&path) {
                continue;
            }

            let records = match read_records(&path) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!("Skipping transcript {:?}: {}", path, e);
                    discovery.skipped_files += 1;
                    continue;
                }
            };

            let vcs = vcs.get_or_insert_with(|| self.assembler.vcs_metadata(&dir_name));
            let mut session =
                self.assembler
                    .assemble_with_vcs(&session_id(&path), &dir_name, records, vcs, now);
            session.source_path = path;
            discovery.sessions.push(session);
        }
    }

    /// All sessions under the configured root, most recently active first.
    pub fn discover(&self) -> Result<Vec<Session>> {
        Ok(self.scan()?.sessions)
    }

    /// All sessions under an explicit root.
    pub fn discover_in(&self, root: &Path) -> Result<Vec<Session>> {
        Ok(self.scan_dir(root, Utc::now())?.sessions)
    }

    /// Re-parse one transcript file.
    pub fn parse_session_file(&self, path: &Path) -> Result<Session> {
        self.assembler.parse_session_file(path)
    }

    /// List sessions matching the given filter.
    pub fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        Ok(self
            .discover()?
            .into_iter()
            .filter(|s| matches_filter(s, filter))
            .collect())
    }

    /// Get a session by id. The first (most recently active) match wins.
    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.discover()?.into_iter().find(|s| s.id == id))
    }

    pub fn project_rollups(&self) -> Result<Vec<ProjectAggregate>> {
        let sessions = self.discover()?;
        Ok(analytics::project_rollups(&sessions, Utc::now(), self.active_window))
    }

    pub fn daily_metrics(&self, days: u32) -> Result<Vec<DailyMetric>> {
        let sessions = self.discover()?;
        Ok(analytics::daily_metrics(
            &sessions,
            days,
            Utc::now(),
            self.assembler.pricing(),
        ))
    }

    pub fn active_session_count(&self) -> Result<usize> {
        let sessions = self.discover()?;
        Ok(analytics::active_session_count(
            &sessions,
            Utc::now(),
            self.active_window,
        ))
    }

    pub fn model_usage(&self) -> Result<Vec<ModelUsage>> {
        Ok(analytics::model_usage(&self.discover()?))
    }

    pub fn peak_hours(&self) -> Result<Vec<PeakHour>> {
        Ok(analytics::peak_hours(&self.discover()?, self.peak_hours))
    }

    pub fn search(&self, query: &str) -> Result<Vec<Session>> {
        Ok(self
            .discover()?
            .into_iter()
            .filter(|s| analytics::matches_query(s, query))
            .collect())
    }

    /// Compute aggregate statistics over all sessions.
    pub fn stats(&self) -> Result<SessionStats> {
        let sessions = self.discover()?;
        Ok(analytics::session_stats(
            &sessions,
            Utc::now(),
            self.active_window,
        ))
    }
}

fn matches_filter(session: &Session, filter: &SessionFilter) -> bool {
    if let Some(ref project) = filter.project {
        if session.project_name != *project {
            return false;
        }
    }

    if let Some(status) = filter.status {
        if session.status != status {
            return false;
        }
    }

    if let Some(after) = filter.after {
        if session.last_activity.map_or(true, |t| t < after) {
            return false;
        }
    }

    if let Some(before) = filter.before {
        if session.start_time.map_or(true, |t| t > before) {
            return false;
        }
    }

    if let Some(ref search) = filter.search {
        if !analytics::matches_query(session, search) {
            return false;
        }
    }

    true
}
