//! # sessionlens-git
//!
//! Git lookups for session project directories.
//!
//! Each assembled session carries the branch checked out in its project
//! directory and, when that directory is a linked worktree, the worktree's
//! name. This crate answers both questions with `git2` and plugs into
//! session discovery as a [`VcsProvider`](sessionlens_sessions::VcsProvider).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sessionlens_git::GitMetadata;
//! use sessionlens_sessions::SessionStore;
//!
//! let store = SessionStore::new()?.with_vcs(Arc::new(GitMetadata::new()));
//! for session in store.discover()? {
//!     println!("{} on {}", session.project_name, session.git_branch);
//! }
//! ```
//!
//! Paths outside any repository, unreadable repositories and detached or
//! unborn heads never fail discovery; they produce empty strings.

mod metadata;

pub use metadata::{current_branch, read_metadata, worktree_name, GitError, GitMetadata};
