//! Working copy operations via `git2`, plus the `git` binary for the replay
//! commands whose textual conflict report the engine needs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use git2::{
    build::CheckoutBuilder, ConfigLevel, Cred, FetchOptions, IndexAddOption, Oid, PushOptions,
    RemoteCallbacks, Repository, Signature,
};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{Replay, VersionControl};
use crate::errors::GitError;

/// Exit status `git cherry-pick` uses when it stops on a conflict.
const CHERRY_PICK_CONFLICT_EXIT: i32 = 1;

/// High-level Git client for the downstream working copy.
///
/// The repository is reopened per operation so the client stays `Send + Sync`
/// and always sees changes made by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitClient {
    repo_path: PathBuf,
    token: Option<String>,
}

impl GitClient {
    /// Open an existing Git working copy at `repo_path`.
    pub fn new<P: AsRef<Path>>(repo_path: P, token: Option<String>) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| GitError::RepositoryNotFound(format!("{} (bare)", path.display())))?
            .to_path_buf();
        Ok(Self {
            repo_path: workdir,
            token,
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn repo(&self) -> Result<Repository, GitError> {
        Repository::open(&self.repo_path)
            .map_err(|_| GitError::RepositoryNotFound(self.repo_path.display().to_string()))
    }

    fn callbacks(&self) -> RemoteCallbacks<'static> {
        let mut callbacks = RemoteCallbacks::new();
        if let Some(tok) = self.token.clone() {
            callbacks.credentials(move |_url, _username, _allowed| {
                Cred::userpass_plaintext("x-access-token", &tok)
            });
        }
        callbacks
    }

    /// SHA of HEAD.
    pub fn head_sha(&self) -> Result<String, GitError> {
        let repo = self.repo()?;
        let commit = repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    /// Name of the checked-out branch, if HEAD is not detached.
    pub fn current_branch(&self) -> Result<Option<String>, GitError> {
        let repo = self.repo()?;
        let head = repo.head()?;
        if !head.is_branch() {
            return Ok(None);
        }
        Ok(head.shorthand().map(str::to_string))
    }

    /// Run the `git` binary in the working copy. Returns the exit code and
    /// the combined stdout/stderr.
    async fn run_git(&self, args: &[&str]) -> Result<(i32, String), GitError> {
        debug!(cmd = ?format!("git {}", args.join(" ")), "running git command");
        let output = Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    GitError::BinaryNotFound
                } else {
                    GitError::IoError(e)
                }
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        Ok((output.status.code().unwrap_or(-1), combined))
    }

    async fn run_git_checked(&self, args: &[&str]) -> Result<String, GitError> {
        let (exit_code, output) = self.run_git(args).await?;
        if exit_code != 0 {
            warn!(exit_code, %output, "git command failed");
            return Err(GitError::CommandFailed {
                command: args.first().copied().unwrap_or_default().to_string(),
                exit_code,
                stderr: output,
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl VersionControl for GitClient {
    fn workdir(&self) -> &Path {
        &self.repo_path
    }

    #[instrument(skip(self))]
    async fn set_identity(&self, name: &str, email: &str) -> Result<(), GitError> {
        let repo = self.repo()?;
        let mut config = repo.config()?.open_level(ConfigLevel::Local)?;
        config.set_str("user.name", name)?;
        config.set_str("user.email", email)?;
        debug!("set local committer identity");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn replace_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        let repo = self.repo()?;
        match repo.remote_delete(name) {
            Ok(()) => debug!(name, "removed existing remote"),
            Err(e) if e.code() == git2::ErrorCode::NotFound => {
                debug!(name, "remote not configured yet")
            }
            Err(e) => return Err(e.into()),
        }
        repo.remote(name, url)?;
        info!(name, "configured remote");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        info!(remote, branch, "fetching");
        let repo = self.repo()?;
        let mut handle = repo.find_remote(remote)?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(self.callbacks());
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}");
        handle.fetch(&[refspec.as_str()], Some(&mut fetch_opts), None)?;
        debug!("fetch completed");
        Ok(())
    }

    async fn clean(&self) -> Result<(), GitError> {
        self.run_git_checked(&["clean", "-f"]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_branch(&self, name: &str, remote: &str, base: &str) -> Result<(), GitError> {
        let repo = self.repo()?;
        let start = format!("refs/remotes/{remote}/{base}");
        let commit = repo
            .find_reference(&start)
            .and_then(|r| r.peel_to_commit())
            .map_err(|_| GitError::RefNotFound(start.clone()))?;

        repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
        // Detach first: libgit2 refuses to force-move the branch HEAD points at.
        repo.set_head_detached(commit.id())?;
        repo.branch(name, &commit, true)?;
        repo.set_head(&format!("refs/heads/{name}"))?;
        info!(name, start = %start, sha = %commit.id(), "created branch");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cherry_pick(&self, sha: &str) -> Result<Replay, GitError> {
        let (exit_code, output) = self.run_git(&["cherry-pick", sha]).await?;
        match exit_code {
            0 => {
                info!(sha, "cherry-pick applied");
                Ok(Replay::Applied)
            }
            CHERRY_PICK_CONFLICT_EXIT => {
                warn!(sha, "cherry-pick stopped");
                Ok(Replay::Rejected { output })
            }
            _ => Err(GitError::CommandFailed {
                command: "cherry-pick".into(),
                exit_code,
                stderr: output,
            }),
        }
    }

    async fn abort_cherry_pick(&self) -> Result<(), GitError> {
        self.run_git_checked(&["cherry-pick", "--abort"]).await?;
        debug!("cherry-pick aborted");
        Ok(())
    }

    async fn stage_all(&self) -> Result<(), GitError> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn commit(
        &self,
        message: &str,
        author_name: &str,
        author_email: &str,
    ) -> Result<String, GitError> {
        let repo = self.repo()?;
        let mut index = repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let author = Signature::now(author_name, author_email)?;
        let committer = match repo.signature() {
            Ok(sig) => sig,
            Err(_) => author.clone(),
        };
        let parent = repo.head()?.peel_to_commit()?;
        let oid: Oid = repo.commit(Some("HEAD"), &author, &committer, message, &tree, &[&parent])?;
        info!(sha = %oid, "created commit");
        Ok(oid.to_string())
    }

    #[instrument(skip(self))]
    async fn push(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        info!(remote, branch, "pushing");
        let repo = self.repo()?;
        let mut handle = repo.find_remote(remote)?;
        let mut callbacks = self.callbacks();
        let push_error = Arc::new(Mutex::new(None::<String>));
        let push_error_clone = push_error.clone();
        callbacks.push_update_reference(move |refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                *push_error_clone.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(msg.to_string());
            }
            Ok(())
        });
        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        handle.push(&[refspec.as_str()], Some(&mut push_opts))?;
        if let Some(detail) = push_error.lock().unwrap_or_else(|e| e.into_inner()).take() {
            return Err(GitError::PushRejected {
                branch: branch.to_string(),
                detail,
            });
        }
        info!("push completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Test").unwrap();
            config.set_str("user.email", "test@test.com").unwrap();
        }
        repo
    }

    fn initial_commit(repo: &Repository, file: &str, content: &str) -> Oid {
        let workdir = repo.workdir().unwrap().to_path_buf();
        std::fs::write(workdir.join(file), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(file)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@test.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap()
    }

    #[test]
    fn test_repo_not_found() {
        assert!(matches!(
            GitClient::new("/nonexistent/patchport", None),
            Err(GitError::RepositoryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_identity_writes_local_config() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        initial_commit(&repo, "a.txt", "a");
        let client = GitClient::new(dir.path(), None).unwrap();

        client.set_identity("Alice", "alice@example.com").await.unwrap();

        let config = repo.config().unwrap().open_level(ConfigLevel::Local).unwrap();
        assert_eq!(config.get_string("user.name").unwrap(), "Alice");
        assert_eq!(config.get_string("user.email").unwrap(), "alice@example.com");
    }

    #[tokio::test]
    async fn test_replace_remote_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        initial_commit(&repo, "a.txt", "a");
        let client = GitClient::new(dir.path(), None).unwrap();

        client
            .replace_remote("community", "https://github.com/acme/one.git")
            .await
            .unwrap();
        client
            .replace_remote("community", "https://github.com/acme/two.git")
            .await
            .unwrap();

        let remote = repo.find_remote("community").unwrap();
        assert_eq!(remote.url(), Some("https://github.com/acme/two.git"));
    }

    #[tokio::test]
    async fn test_stage_all_and_commit_records_deletions() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_repo(dir.path());
        initial_commit(&repo, "gone.txt", "bye");
        let client = GitClient::new(dir.path(), None).unwrap();

        std::fs::remove_file(dir.path().join("gone.txt")).unwrap();
        std::fs::write(dir.path().join("new.txt"), "hello").unwrap();
        client.stage_all().await.unwrap();
        let sha = client
            .commit("Replace file", "Alice", "alice@example.com")
            .await
            .unwrap();

        assert_eq!(client.head_sha().unwrap(), sha);
        let commit = repo.find_commit(Oid::from_str(&sha).unwrap()).unwrap();
        assert_eq!(commit.author().name(), Some("Alice"));
        let tree = commit.tree().unwrap();
        assert!(tree.get_name("new.txt").is_some());
        assert!(tree.get_name("gone.txt").is_none());
    }
}
