use std::path::Path;

use git2::{ErrorCode, Repository};
use sessionlens_sessions::{VcsMetadata, VcsProvider};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotARepo(String),

    #[error("Git operation failed: {0}")]
    GitOperationFailed(#[from] git2::Error),
}

fn open(project_path: &Path) -> Result<Repository, GitError> {
    Repository::discover(project_path).map_err(|e| match e.code() {
        ErrorCode::NotFound => GitError::NotARepo(project_path.display().to_string()),
        _ => GitError::GitOperationFailed(e),
    })
}

fn branch_of(repo: &Repository) -> Result<String, GitError> {
    match repo.head() {
        Ok(head) => Ok(head.shorthand().unwrap_or_default().to_string()),
        // No commits yet: HEAD still names the branch it will create.
        Err(e) if e.code() == ErrorCode::UnbornBranch => {
            let head = repo.find_reference("HEAD")?;
            Ok(head
                .symbolic_target()
                .map(|target| target.trim_start_matches("refs/heads/").to_string())
                .unwrap_or_default())
        }
        Err(e) => Err(GitError::GitOperationFailed(e)),
    }
}

fn worktree_of(repo: &Repository) -> Option<String> {
    if !repo.is_worktree() {
        return None;
    }
    // A linked worktree's git dir is `<main>/.git/worktrees/<name>/`.
    repo.path()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// Short name of the branch checked out at `project_path`.
///
/// A detached head reports `HEAD`.
pub fn current_branch(project_path: &Path) -> Result<String, GitError> {
    branch_of(&open(project_path)?)
}

/// Name of the linked worktree containing `project_path`, if any.
pub fn worktree_name(project_path: &Path) -> Result<Option<String>, GitError> {
    Ok(worktree_of(&open(project_path)?))
}

/// Branch and worktree for `project_path`, opening the repository once.
pub fn read_metadata(project_path: &Path) -> Result<VcsMetadata, GitError> {
    let repo = open(project_path)?;
    Ok(VcsMetadata {
        branch: branch_of(&repo)?,
        worktree: worktree_of(&repo).unwrap_or_default(),
    })
}

/// [`VcsProvider`] backed by the git repository enclosing each project path.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitMetadata;

impl GitMetadata {
    pub fn new() -> Self {
        Self
    }
}

impl VcsProvider for GitMetadata {
    fn metadata(&self, project_path: &Path) -> VcsMetadata {
        match read_metadata(project_path) {
            Ok(metadata) => {
                debug!(
                    path = %project_path.display(),
                    branch = %metadata.branch,
                    worktree = %metadata.worktree,
                    "Resolved git metadata"
                );
                metadata
            }
            Err(e) => {
                debug!(path = %project_path.display(), "No git metadata: {}", e);
                VcsMetadata::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{RepositoryInitOptions, Signature};
    use std::fs;
    use tempfile::TempDir;

    /// Helper: init a repo whose first branch is `main`, optionally with one commit.
    fn init_repo(dir: &Path, with_commit: bool) -> Repository {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(dir, &opts).unwrap();

        if with_commit {
            fs::write(dir.join("README.md"), "# project\n").unwrap();
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("README.md")).unwrap();
            index.write().unwrap();
            let tree_id = index.write_tree().unwrap();
            {
                let tree = repo.find_tree(tree_id).unwrap();
                let sig = Signature::now("Test", "test@example.com").unwrap();
                repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
                    .unwrap();
            }
        }

        repo
    }

    #[test]
    fn test_branch_of_committed_repo() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path(), true);

        assert_eq!(current_branch(dir.path()).unwrap(), "main");
        assert_eq!(worktree_name(dir.path()).unwrap(), None);
    }

    #[test]
    fn test_branch_of_unborn_repo() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path(), false);

        assert_eq!(current_branch(dir.path()).unwrap(), "main");
    }

    #[test]
    fn test_branch_found_from_subdirectory() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path(), true);
        let nested = dir.path().join("crates").join("core");
        fs::create_dir_all(&nested).unwrap();

        let metadata = GitMetadata::new().metadata(&nested);

        assert_eq!(metadata.branch, "main");
        assert_eq!(metadata.worktree, "");
    }

    #[test]
    fn test_linked_worktree_name() {
        let dir = TempDir::new().unwrap();
        let main = dir.path().join("main");
        fs::create_dir_all(&main).unwrap();
        let repo = init_repo(&main, true);
        let linked = dir.path().join("feature-checkout");
        repo.worktree("feature-x", &linked, None).unwrap();

        let metadata = read_metadata(&linked).unwrap();

        assert_eq!(metadata.worktree, "feature-x");
        assert_eq!(metadata.branch, "feature-x");
        assert_eq!(read_metadata(&main).unwrap().worktree, "");
    }

    #[test]
    fn test_missing_path_yields_empty_metadata() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("not-here");

        assert!(read_metadata(&missing).is_err());
        assert_eq!(GitMetadata::new().metadata(&missing), VcsMetadata::default());
    }
}
