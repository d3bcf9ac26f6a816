//! The data repository mirror.
//!
//! The catalog and its source images live in a git repository. The watcher
//! keeps a read-only checkout of one remote branch under `<root>/repo` and
//! asks it, once per tick, whether anything new arrived.
//!
//! [`GitRepo`] drives the `git` command line. The checkout is always a
//! detached `origin/<branch>`, forced over any local modifications, so the
//! mirror never diverges from the remote.

use crate::types::Outcome;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

const REMOTE_NAME: &str = "origin";

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("failed to run git: {0}")]
    Io(#[from] io::Error),
    #[error("git {args} failed: {stderr}")]
    Git { args: String, stderr: String },
    #[error("repository at {0} is not cloned yet")]
    NotCloned(PathBuf),
}

/// HEAD moved from `old_head` to `new_head`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUpdate {
    pub old_head: String,
    pub new_head: String,
}

pub trait SourceRepo {
    /// Make sure a checkout of the configured remote and branch exists.
    fn ensure_cloned(&mut self) -> Result<(), RepoError>;

    /// Pull the latest remote state into the checkout.
    fn fetch_updates(&mut self) -> Result<Outcome<RepoUpdate>, RepoError>;
}

/// [`SourceRepo`] backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
    remote_url: String,
    branch: String,
    cloned: bool,
}

impl GitRepo {
    pub fn new(path: impl Into<PathBuf>, remote_url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            remote_url: remote_url.into(),
            branch: branch.into(),
            cloned: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn git(&self, args: &[&str]) -> Result<String, RepoError> {
        run_git(Some(&self.path), args)
    }

    /// Whether the existing checkout points at the configured remote.
    fn has_expected_remote(&self) -> bool {
        if !self.path.join(".git").exists() {
            return false;
        }
        match self.git(&["remote", "get-url", REMOTE_NAME]) {
            Ok(url) if url == self.remote_url => true,
            Ok(url) => {
                log::warn!(
                    "Repository at {} tracks {url}, not {}; cloning again",
                    self.path.display(),
                    self.remote_url
                );
                false
            }
            Err(e) => {
                log::warn!("Cannot inspect repository at {}: {e}; cloning again", self.path.display());
                false
            }
        }
    }

    fn clone_fresh(&self) -> Result<(), RepoError> {
        if self.path.exists() {
            std::fs::remove_dir_all(&self.path)?;
        }
        log::info!("Cloning {} into {}", self.remote_url, self.path.display());
        let path = self.path.to_string_lossy();
        run_git(
            None,
            &["clone", "--quiet", "--origin", REMOTE_NAME, self.remote_url.as_str(), &*path],
        )?;
        Ok(())
    }

    fn check_out(&self) -> Result<(), RepoError> {
        let target = format!("{REMOTE_NAME}/{}", self.branch);
        self.git(&["checkout", "--quiet", "--force", "--detach", &target])?;
        Ok(())
    }

    fn fetch(&self) -> Result<(), RepoError> {
        self.git(&["fetch", "--quiet", REMOTE_NAME])?;
        Ok(())
    }

    fn head(&self) -> Result<String, RepoError> {
        self.git(&["rev-parse", "HEAD"])
    }
}

impl SourceRepo for GitRepo {
    fn ensure_cloned(&mut self) -> Result<(), RepoError> {
        if !self.has_expected_remote() {
            self.clone_fresh()?;
        }
        if self.check_out().is_err() {
            // The branch may be newer than our last fetch.
            self.fetch()?;
            self.check_out()?;
        }
        self.cloned = true;
        Ok(())
    }

    fn fetch_updates(&mut self) -> Result<Outcome<RepoUpdate>, RepoError> {
        if !self.cloned {
            return Err(RepoError::NotCloned(self.path.clone()));
        }
        let old_head = self.head()?;
        self.fetch()?;
        self.check_out()?;
        let new_head = self.head()?;
        if old_head == new_head {
            return Ok(Outcome::Unchanged);
        }
        log::info!("Data source moved from {old_head} to {new_head}");
        Ok(Outcome::Changed(RepoUpdate { old_head, new_head }))
    }
}

/// Run git, returning trimmed stdout.
fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<String, RepoError> {
    let mut command = Command::new("git");
    if let Some(dir) = dir {
        command.arg("-C").arg(dir);
    }
    let output = command.args(args).output()?;
    if !output.status.success() {
        return Err(RepoError::Git {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Scripted repository for orchestrator tests.
    ///
    /// Each `fetch_updates` call pops the next scripted answer; an empty
    /// script means "unchanged".
    #[derive(Default)]
    pub struct MockRepo {
        pub fetches: RefCell<VecDeque<Result<bool, String>>>,
        pub ensure_calls: usize,
    }

    impl MockRepo {
        pub fn script(answers: impl IntoIterator<Item = Result<bool, String>>) -> Self {
            Self {
                fetches: RefCell::new(answers.into_iter().collect()),
                ensure_calls: 0,
            }
        }
    }

    impl SourceRepo for MockRepo {
        fn ensure_cloned(&mut self) -> Result<(), RepoError> {
            self.ensure_calls += 1;
            Ok(())
        }

        fn fetch_updates(&mut self) -> Result<Outcome<RepoUpdate>, RepoError> {
            match self.fetches.borrow_mut().pop_front() {
                Some(Ok(true)) => Ok(Outcome::Changed(RepoUpdate {
                    old_head: "a".into(),
                    new_head: "b".into(),
                })),
                Some(Ok(false)) | None => Ok(Outcome::Unchanged),
                Some(Err(stderr)) => Err(RepoError::Git {
                    args: "fetch".into(),
                    stderr,
                }),
            }
        }
    }

    // =========================================================================
    // GitRepo against a local remote
    // =========================================================================

    fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    fn git_in(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
            .args(args)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {args:?}: {status:?}");
    }

    fn commit_file(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
        git_in(dir, &["add", name]);
        git_in(dir, &["commit", "--quiet", "-m", name]);
    }

    /// A remote with one commit on `main`.
    fn remote() -> TempDir {
        let tmp = TempDir::new().unwrap();
        git_in(tmp.path(), &["init", "--quiet"]);
        git_in(tmp.path(), &["checkout", "--quiet", "-b", "main"]);
        commit_file(tmp.path(), "stamps.json", "[]");
        tmp
    }

    fn url(dir: &Path) -> String {
        dir.to_string_lossy().into_owned()
    }

    #[test]
    fn fetch_before_clone_errors() {
        let tmp = TempDir::new().unwrap();
        let mut repo = GitRepo::new(tmp.path().join("repo"), "unused", "main");
        assert!(matches!(repo.fetch_updates(), Err(RepoError::NotCloned(_))));
    }

    #[test]
    fn clone_then_detect_new_commits() {
        if !git_available() {
            return;
        }
        let remote = remote();
        let work = TempDir::new().unwrap();
        let mut repo = GitRepo::new(work.path().join("repo"), url(remote.path()), "main");

        repo.ensure_cloned().unwrap();
        assert!(repo.path().join("stamps.json").is_file());
        assert_eq!(repo.fetch_updates().unwrap(), Outcome::Unchanged);

        commit_file(remote.path(), "images.txt", "new");
        let update = repo.fetch_updates().unwrap();
        assert!(update.is_changed());
        assert!(repo.path().join("images.txt").is_file());
        assert_eq!(repo.fetch_updates().unwrap(), Outcome::Unchanged);
    }

    #[test]
    fn wrong_remote_is_recloned() {
        if !git_available() {
            return;
        }
        let first = remote();
        let second = remote();
        commit_file(second.path(), "second.txt", "2");
        let work = TempDir::new().unwrap();
        let path = work.path().join("repo");

        GitRepo::new(&path, url(first.path()), "main").ensure_cloned().unwrap();
        assert!(!path.join("second.txt").exists());

        GitRepo::new(&path, url(second.path()), "main").ensure_cloned().unwrap();
        assert!(path.join("second.txt").is_file());
    }

    #[test]
    fn missing_branch_errors() {
        if !git_available() {
            return;
        }
        let remote = remote();
        let work = TempDir::new().unwrap();
        let mut repo = GitRepo::new(work.path().join("repo"), url(remote.path()), "nope");
        assert!(matches!(repo.ensure_cloned(), Err(RepoError::Git { .. })));
    }
}
