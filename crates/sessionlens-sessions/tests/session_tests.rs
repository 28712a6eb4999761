use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use sessionlens_sessions::{
    parse_session_file, SessionError, SessionFilter, SessionStatus, SessionStore, VcsMetadata,
    VcsProvider,
};
use tempfile::TempDir;

const ALPHA: &str = "-home-user-alpha";
const BETA: &str = "-home-user-beta";

const ALPHA_SESSION: &str = r##"{"type":"user","timestamp":"2026-01-20T10:00:00Z","sessionId":"sess-a1","cwd":"/home/user/alpha","message":{"role":"user","content":"fix the auth bug in the login flow"}}
{"type":"assistant","timestamp":"2026-01-20T10:00:30Z","sessionId":"sess-a1","message":{"role":"assistant","model":"claude-sonnet-4-20250514","content":[{"type":"text","text":"Looking at it."},{"type":"tool_use","id":"t1","name":"Edit","input":{"file_path":"/home/user/alpha/src/auth.rs","old_string":"a","new_string":"b"}}],"usage":{"input_tokens":1000,"output_tokens":500,"cache_creation_input_tokens":0,"cache_read_input_tokens":2000}}}
{this is not json
{"type":"user","timestamp":"2026-01-20T10:01:00Z","sessionId":"sess-a1","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}}
{"type":"assistant","timestamp":"2026-01-20T10:01:30Z","sessionId":"sess-a1","message":{"role":"assistant","model":"claude-sonnet-4-20250514","content":[{"type":"tool_use","id":"t2","name":"Write","input":{"file_path":"/home/user/alpha/tests/auth_test.rs","content":"#[test]"}}],"usage":{"input_tokens":500,"output_tokens":250}}}
{"type":"summary","summary":"Auth fix","leafUuid":"x"}
"##;

const BETA_SESSION: &str = r#"{"type":"user","timestamp":"2026-01-21T14:00:00Z","message":{"role":"user","content":"refactor database connection pooling"}}
{"type":"assistant","timestamp":"2026-01-21T14:05:00Z","message":{"role":"assistant","model":"claude-opus-4-20250514","content":"Done refactoring.","usage":{"input_tokens":2000,"output_tokens":1000}}}
"#;

const BETA_ERROR_SESSION: &str = r#"{"type":"user","timestamp":"2026-01-19T09:00:00Z","message":{"role":"user","content":"deploy the staging environment"}}
{"type":"error","timestamp":"2026-01-19T09:00:10Z","error":{"message":"API overloaded"}}
"#;

fn write(root: &Path, project: &str, file: &str, content: &str) -> PathBuf {
    let dir = root.join(project);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(file);
    fs::write(&path, content).unwrap();
    path
}

/// Helper: create a temp projects directory with transcripts and noise.
fn create_projects_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write(root, ALPHA, "sess-a1.jsonl", ALPHA_SESSION);
    write(root, ALPHA, "sessions-summary.jsonl", r#"{"type":"user","content":"x"}"#);
    write(root, ALPHA, "notes.txt", "not a transcript");
    write(
        &root.join(ALPHA),
        "sess-a1/subagents",
        "agent-1.jsonl",
        r#"{"type":"user","content":"sub agent"}"#,
    );
    write(root, BETA, "sess-b1.jsonl", BETA_SESSION);
    write(root, BETA, "sess-b2.jsonl", BETA_ERROR_SESSION);
    fs::write(root.join("stray.jsonl"), "{}").unwrap();

    dir
}

fn scan_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 22, 12, 0, 0).unwrap()
}

// ============================================================
// Discovery tests
// ============================================================

#[test]
fn test_discover_missing_root_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::with_dir(dir.path().join("does-not-exist"));

    let sessions = store.discover().unwrap();

    assert!(sessions.is_empty());
}

#[test]
fn test_discover_root_that_is_a_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("projects");
    fs::write(&file, "").unwrap();

    let err = SessionStore::with_dir(file).discover().unwrap_err();

    assert!(matches!(err, SessionError::RootUnreadable { .. }));
}

#[test]
fn test_discover_finds_only_project_transcripts() {
    let dir = create_projects_dir();
    let store = SessionStore::with_dir(dir.path().to_path_buf());

    let discovery = store.scan_dir(dir.path(), scan_time()).unwrap();
    let mut ids: Vec<&str> = discovery.sessions.iter().map(|s| s.id.as_str()).collect();
    ids.sort();

    assert_eq!(ids, vec!["sess-a1", "sess-b1", "sess-b2"]);
    assert_eq!(discovery.skipped_files, 0);
}

#[test]
fn test_discover_sorted_by_last_activity_descending() {
    let dir = create_projects_dir();
    let store = SessionStore::with_dir(dir.path().to_path_buf());

    let sessions = store.discover().unwrap();

    assert_eq!(sessions[0].id, "sess-b1");
    assert_eq!(sessions[1].id, "sess-a1");
    assert_eq!(sessions[2].id, "sess-b2");
}

#[test]
fn test_discover_in_overrides_root() {
    let dir = create_projects_dir();
    let store = SessionStore::with_dir(PathBuf::from("/nonexistent/root"));

    assert!(store.discover().unwrap().is_empty());
    assert_eq!(store.discover_in(dir.path()).unwrap().len(), 3);
}

// ============================================================
// Session assembly tests
// ============================================================

#[test]
fn test_session_fields_from_transcript() {
    let dir = create_projects_dir();
    let store = SessionStore::with_dir(dir.path().to_path_buf());

    let discovery = store.scan_dir(dir.path(), scan_time()).unwrap();
    let session = discovery
        .sessions
        .iter()
        .find(|s| s.id == "sess-a1")
        .unwrap();

    assert_eq!(session.project_path, "/home/user/alpha");
    assert_eq!(session.project_name, "alpha");
    assert_eq!(session.model, "claude-sonnet-4-20250514");
    assert_eq!(session.records.len(), 4);
    assert_eq!(session.current_task, "fix the auth bug in the login flow");
    assert_eq!(
        session.files_modified,
        vec![
            "/home/user/alpha/src/auth.rs",
            "/home/user/alpha/tests/auth_test.rs"
        ]
    );
    assert_eq!(
        session.start_time,
        Some(Utc.with_ymd_and_hms(2026, 1, 20, 10, 0, 0).unwrap())
    );
    assert_eq!(
        session.last_activity,
        Some(Utc.with_ymd_and_hms(2026, 1, 20, 10, 1, 30).unwrap())
    );
    assert_eq!(session.status, SessionStatus::Complete);
    assert_eq!(session.source_path, dir.path().join(ALPHA).join("sess-a1.jsonl"));
}

#[test]
fn test_session_tokens_are_summed_and_priced_once() {
    let dir = create_projects_dir();
    let path = dir.path().join(ALPHA).join("sess-a1.jsonl");

    let session = parse_session_file(&path).unwrap();
    let tokens = &session.tokens_used;

    assert_eq!(tokens.input_tokens, 1500);
    assert_eq!(tokens.output_tokens, 750);
    assert_eq!(tokens.cache_creation_tokens, 0);
    assert_eq!(tokens.cache_read_tokens, 2000);
    assert_eq!(tokens.total, 4250);
    let expected = 1.5 * 0.003 + 0.75 * 0.015 + 2.0 * 0.0003;
    assert!((tokens.estimated_cost - expected).abs() < 1e-9);
}

#[test]
fn test_malformed_line_between_good_lines() {
    let dir = TempDir::new().unwrap();
    let path = write(
        dir.path(),
        ALPHA,
        "resilient.jsonl",
        "{\"type\":\"user\",\"timestamp\":\"2026-01-20T10:00:00Z\",\"content\":\"first\"}\n\
         {\"type\":\"assistant\",\"timestamp\":\n\
         {\"type\":\"assistant\",\"timestamp\":\"2026-01-20T10:00:05Z\",\"content\":\"second\"}\n",
    );

    let session = parse_session_file(&path).unwrap();

    assert_eq!(session.records.len(), 2);
    assert_eq!(session.records[0].content, "first");
    assert_eq!(session.records[1].content, "second");
}

#[test]
fn test_partial_trailing_line_is_ignored() {
    let dir = TempDir::new().unwrap();
    let path = write(
        dir.path(),
        ALPHA,
        "growing.jsonl",
        "{\"type\":\"user\",\"timestamp\":\"2026-01-20T10:00:00Z\",\"content\":\"done\"}\n{\"type\":\"assi",
    );

    let session = parse_session_file(&path).unwrap();

    assert_eq!(session.records.len(), 1);
}

#[test]
fn test_empty_transcript() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), ALPHA, "empty.jsonl", "");

    let session = parse_session_file(&path).unwrap();

    assert!(session.records.is_empty());
    assert_eq!(session.status, SessionStatus::Idle);
    assert_eq!(session.current_task, "No activity");
    assert_eq!(session.start_time, None);
    assert_eq!(session.tokens_used.total, 0);
}

#[test]
fn test_parse_missing_file_is_error() {
    let dir = TempDir::new().unwrap();
    let result = parse_session_file(&dir.path().join(ALPHA).join("gone.jsonl"));

    assert!(matches!(result, Err(SessionError::Io { .. })));
}

#[test]
fn test_status_relative_to_scan_time() {
    let dir = create_projects_dir();
    let store = SessionStore::with_dir(dir.path().to_path_buf());
    let last = Utc.with_ymd_and_hms(2026, 1, 21, 14, 5, 0).unwrap();

    let status_at = |now| {
        store
            .scan_dir(dir.path(), now)
            .unwrap()
            .sessions
            .into_iter()
            .find(|s| s.id == "sess-b1")
            .unwrap()
            .status
    };

    assert_eq!(status_at(last + Duration::seconds(30)), SessionStatus::Working);
    assert_eq!(status_at(last + Duration::minutes(5)), SessionStatus::Idle);
    assert_eq!(status_at(last + Duration::minutes(30)), SessionStatus::Complete);
}

#[test]
fn test_error_record_sets_error_status() {
    let dir = create_projects_dir();
    let path = dir.path().join(BETA).join("sess-b2.jsonl");

    let session = parse_session_file(&path).unwrap();

    assert_eq!(session.status, SessionStatus::Error);
    assert_eq!(session.current_task, "deploy the staging environment");
    assert_eq!(session.model, "claude-sonnet-4-20250514");
}

struct FixedVcs;

impl VcsProvider for FixedVcs {
    fn metadata(&self, project_path: &Path) -> VcsMetadata {
        if project_path == Path::new("/home/user/alpha") {
            VcsMetadata {
                branch: "feature/auth".to_string(),
                worktree: "auth-wt".to_string(),
            }
        } else {
            VcsMetadata::default()
        }
    }
}

#[test]
fn test_vcs_provider_fills_branch_and_worktree() {
    let dir = create_projects_dir();
    let store = SessionStore::with_dir(dir.path().to_path_buf()).with_vcs(Arc::new(FixedVcs));

    let sessions = store.discover().unwrap();
    let alpha = sessions.iter().find(|s| s.id == "sess-a1").unwrap();
    let beta = sessions.iter().find(|s| s.id == "sess-b1").unwrap();

    assert_eq!(alpha.git_branch, "feature/auth");
    assert_eq!(alpha.git_worktree, "auth-wt");
    assert_eq!(beta.git_branch, "");
    assert_eq!(beta.git_worktree, "");
}

// ============================================================
// Store query tests
// ============================================================

#[test]
fn test_store_get_session() {
    let dir = create_projects_dir();
    let store = SessionStore::with_dir(dir.path().to_path_buf());

    let session = store.get("sess-b1").unwrap().unwrap();

    assert_eq!(session.project_name, "beta");
    assert_eq!(session.model, "claude-opus-4-20250514");
    assert!(store.get("missing").unwrap().is_none());
}

#[test]
fn test_store_filter_by_project() {
    let dir = create_projects_dir();
    let store = SessionStore::with_dir(dir.path().to_path_buf());

    let filter = SessionFilter {
        project: Some("beta".to_string()),
        ..Default::default()
    };
    let sessions = store.list(&filter).unwrap();

    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| s.project_name == "beta"));
}

#[test]
fn test_store_filter_by_status() {
    let dir = create_projects_dir();
    let store = SessionStore::with_dir(dir.path().to_path_buf());

    let filter = SessionFilter {
        status: Some(SessionStatus::Error),
        ..Default::default()
    };
    let sessions = store.list(&filter).unwrap();

    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, "sess-b2");
}

#[test]
fn test_store_filter_by_date_range() {
    let dir = create_projects_dir();
    let store = SessionStore::with_dir(dir.path().to_path_buf());

    let filter = SessionFilter {
        after: Some(Utc.with_ymd_and_hms(2026, 1, 20, 0, 0, 0).unwrap()),
        before: Some(Utc.with_ymd_and_hms(2026, 1, 20, 23, 59, 59).unwrap()),
        ..Default::default()
    };
    let sessions = store.list(&filter).unwrap();

    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, "sess-a1");
}

#[test]
fn test_store_filter_by_search_case_insensitive() {
    let dir = create_projects_dir();
    let store = SessionStore::with_dir(dir.path().to_path_buf());

    let filter = SessionFilter {
        search: Some("DATABASE".to_string()),
        ..Default::default()
    };
    let sessions = store.list(&filter).unwrap();

    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, "sess-b1");
}
