use std::path::Path;

use serde::{Deserialize, Serialize};

/// Version-control facts for a project directory.
///
/// Both fields are empty when the path is not under version control.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsMetadata {
    pub branch: String,
    /// Name of the linked worktree, empty for the main checkout.
    pub worktree: String,
}

/// Supplies branch and worktree names for decoded project paths.
///
/// Implementations must not fail: absence of version control, or any lookup
/// error, yields empty strings.
pub trait VcsProvider: Send + Sync {
    fn metadata(&self, project_path: &Path) -> VcsMetadata;
}

/// Provider used when no version-control integration is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVcs;

impl VcsProvider for NoVcs {
    fn metadata(&self, _project_path: &Path) -> VcsMetadata {
        VcsMetadata::default()
    }
}
