//! Bare repositories and per-job worktrees

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shipwright_core::domain::credentials::GitCredentials;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::{authenticated_url, clean_url};
use super::{GitError, WorkspaceLayout, run_git};

/// Result of tearing down every worktree under a job directory
#[derive(Debug, Default)]
pub struct WorktreeSweep {
    pub removed: Vec<PathBuf>,
    /// Worktrees whose owning bare repository could not be determined
    pub unresolved: Vec<PathBuf>,
    pub errors: Vec<String>,
}

/// Manages the shared bare repositories and the worktrees linked to them
pub struct WorktreeManager {
    layout: WorkspaceLayout,
    git_timeout: Duration,
    /// One async lock per bare repository path
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorktreeManager {
    pub fn new(layout: WorkspaceLayout, git_timeout: Duration) -> Self {
        Self {
            layout,
            git_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    pub fn git_timeout(&self) -> Duration {
        self.git_timeout
    }

    fn lock_for(&self, bare: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(bare.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // =============================================================================
    // Bare Repositories
    // =============================================================================

    /// Returns the bare repository for `repo_key`, cloning it if absent.
    ///
    /// Idempotent and safe under concurrency: callers for the same key are
    /// serialized, the clone lands in a temporary directory and is renamed into
    /// place only when complete, and a second call finds the finished
    /// repository and does nothing. The persisted remote never carries
    /// credentials.
    pub async fn ensure_bare_repo(
        &self,
        repo_key: &str,
        url: &str,
        credentials: Option<&GitCredentials>,
    ) -> Result<PathBuf, GitError> {
        let bare = self.layout.bare_repo_path(repo_key);
        let lock = self.lock_for(&bare);
        let _guard = lock.lock().await;

        if is_bare_repo(&bare) {
            debug!("Bare repository already present: {}", bare.display());
            return Ok(bare);
        }

        if bare.exists() {
            warn!(
                "Removing incomplete bare repository at {} before cloning",
                bare.display()
            );
            tokio::fs::remove_dir_all(&bare)
                .await
                .map_err(|e| GitError::io(format!("failed to remove {}", bare.display()), e))?;
        }

        let parent = self.layout.bare_repos_dir();
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| GitError::io(format!("failed to create {}", parent.display()), e))?;

        let file_name = bare
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repo.git".to_string());
        let staging = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
        let staging_str = staging.to_string_lossy().into_owned();

        let auth_url = authenticated_url(url, credentials);
        let secrets = secrets(credentials);

        info!("Cloning {} into {}", clean_url(url), bare.display());

        let cloned = async {
            run_git(
                None,
                &["clone", "--bare", &auth_url, &staging_str],
                self.git_timeout,
                &secrets,
            )
            .await?;
            run_git(
                Some(&staging),
                &["remote", "set-url", "origin", &clean_url(url)],
                self.git_timeout,
                &secrets,
            )
            .await?;
            tokio::fs::rename(&staging, &bare)
                .await
                .map_err(|e| GitError::io(format!("failed to move clone to {}", bare.display()), e))
        }
        .await;

        if let Err(e) = cloned {
            if staging.exists() {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&staging).await {
                    warn!("Failed to remove staging clone {}: {}", staging.display(), cleanup);
                }
            }
            return Err(e);
        }

        Ok(bare)
    }

    /// Fetch the latest branches into the bare repository's remote-tracking refs.
    ///
    /// Serialized with every other writer of the same bare repository; git
    /// rejects concurrent ref updates instead of waiting for them.
    pub async fn refresh_bare_repo(
        &self,
        bare: &Path,
        url: &str,
        credentials: Option<&GitCredentials>,
    ) -> Result<(), GitError> {
        let lock = self.lock_for(bare);
        let _guard = lock.lock().await;

        let auth_url = authenticated_url(url, credentials);
        run_git(
            Some(bare),
            &[
                "fetch",
                "--prune",
                &auth_url,
                "+refs/heads/*:refs/remotes/origin/*",
            ],
            self.git_timeout,
            &secrets(credentials),
        )
        .await?;
        Ok(())
    }

    // =============================================================================
    // Worktrees
    // =============================================================================

    /// Materialize a fresh worktree checked out at `base_branch`.
    ///
    /// The checkout is detached so any number of jobs can start from the same
    /// branch; `create_branch` later moves it onto the job's own branch. A
    /// leftover worktree at the same path (a retried checkout) is removed first.
    pub async fn create_worktree(
        &self,
        bare: &Path,
        worktree: &Path,
        base_branch: &str,
    ) -> Result<(), GitError> {
        let lock = self.lock_for(bare);
        let _guard = lock.lock().await;

        if worktree.exists() {
            warn!(
                "Worktree {} already exists, recreating it",
                worktree.display()
            );
            self.unregister_worktree(bare, worktree).await?;
        }

        if let Some(parent) = worktree.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GitError::io(format!("failed to create {}", parent.display()), e))?;
        }

        let start_point = self.resolve_start_point(bare, base_branch).await?;
        let worktree_str = worktree.to_string_lossy().into_owned();

        run_git(Some(bare), &["worktree", "prune"], self.git_timeout, &[]).await?;
        run_git(
            Some(bare),
            &["worktree", "add", "--detach", &worktree_str, &start_point],
            self.git_timeout,
            &[],
        )
        .await?;

        info!(
            "Created worktree {} at {}",
            worktree.display(),
            base_branch
        );
        Ok(())
    }

    async fn resolve_start_point(&self, bare: &Path, branch: &str) -> Result<String, GitError> {
        for candidate in [
            format!("refs/remotes/origin/{}", branch),
            format!("refs/heads/{}", branch),
        ] {
            let verified = run_git(
                Some(bare),
                &["rev-parse", "--verify", "--quiet", &format!("{}^{{commit}}", candidate)],
                self.git_timeout,
                &[],
            )
            .await;
            if verified.is_ok() {
                return Ok(candidate);
            }
        }
        Err(GitError::BranchNotFound(branch.to_string()))
    }

    /// Create and switch to `branch` inside an existing worktree
    pub async fn create_branch(&self, worktree: &Path, branch: &str) -> Result<(), GitError> {
        run_git(
            Some(worktree),
            &["checkout", "-B", branch],
            self.git_timeout,
            &[],
        )
        .await?;
        Ok(())
    }

    /// Unregister a worktree from its bare repository, then make sure the
    /// directory is gone.
    pub async fn remove_worktree(&self, bare: &Path, worktree: &Path) -> Result<(), GitError> {
        let lock = self.lock_for(bare);
        let _guard = lock.lock().await;
        self.unregister_worktree(bare, worktree).await
    }

    /// Caller holds the bare repository's lock
    async fn unregister_worktree(&self, bare: &Path, worktree: &Path) -> Result<(), GitError> {
        let worktree_str = worktree.to_string_lossy().into_owned();

        if let Err(e) = run_git(
            Some(bare),
            &["worktree", "remove", "--force", &worktree_str],
            self.git_timeout,
            &[],
        )
        .await
        {
            warn!(
                "git worktree remove failed for {}, falling back to prune: {}",
                worktree.display(),
                e
            );
        }

        if worktree.exists() {
            tokio::fs::remove_dir_all(worktree).await.map_err(|e| {
                GitError::io(format!("failed to delete {}", worktree.display()), e)
            })?;
        }

        run_git(Some(bare), &["worktree", "prune"], self.git_timeout, &[]).await?;

        let target = canonical(worktree).await;
        for registered in self.worktree_registrations(bare).await? {
            if canonical(&registered).await == target {
                return Err(GitError::Failed {
                    command: "worktree remove".to_string(),
                    stderr: format!("{} is still registered", worktree.display()),
                });
            }
        }

        Ok(())
    }

    /// Paths of the worktrees a bare repository currently has registered
    pub async fn worktree_registrations(&self, bare: &Path) -> Result<Vec<PathBuf>, GitError> {
        let output = run_git(
            Some(bare),
            &["worktree", "list", "--porcelain"],
            self.git_timeout,
            &[],
        )
        .await?;

        Ok(parse_worktree_list(&output))
    }

    /// Unregister every worktree under `job_dir`.
    ///
    /// Never fails: problems are collected in the returned sweep. A worktree is
    /// recognised by its `.git` pointer file. The owning bare repository comes
    /// from the pointer's `gitdir:` target, or failing that from asking every
    /// known bare repository whether it lists the path.
    pub async fn remove_all_worktrees_under(&self, job_dir: &Path) -> WorktreeSweep {
        let mut sweep = WorktreeSweep::default();

        let mut entries = match tokio::fs::read_dir(job_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return sweep,
            Err(e) => {
                sweep
                    .errors
                    .push(format!("failed to list {}: {}", job_dir.display(), e));
                return sweep;
            }
        };

        let mut candidates = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    let pointer = path.join(".git");
                    let is_pointer = tokio::fs::symlink_metadata(&pointer)
                        .await
                        .map(|m| m.is_file())
                        .unwrap_or(false);
                    if is_pointer {
                        candidates.push(path);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    sweep
                        .errors
                        .push(format!("failed to read {}: {}", job_dir.display(), e));
                    break;
                }
            }
        }

        for worktree in candidates {
            let bare = match self.bare_from_pointer(&worktree).await {
                Some(bare) => Some(bare),
                None => self.bare_from_scan(&worktree).await,
            };

            let Some(bare) = bare else {
                warn!(
                    "Could not resolve the bare repository owning {}",
                    worktree.display()
                );
                sweep.unresolved.push(worktree);
                continue;
            };

            match self.remove_worktree(&bare, &worktree).await {
                Ok(()) => {
                    debug!("Removed worktree {}", worktree.display());
                    sweep.removed.push(worktree);
                }
                Err(e) => {
                    warn!("Failed to remove worktree {}: {}", worktree.display(), e);
                    sweep
                        .errors
                        .push(format!("{}: {}", worktree.display(), e));
                }
            }
        }

        sweep
    }

    /// `gitdir: <bare>/worktrees/<name>` → `<bare>`
    async fn bare_from_pointer(&self, worktree: &Path) -> Option<PathBuf> {
        let contents = tokio::fs::read_to_string(worktree.join(".git")).await.ok()?;
        let bare = parse_pointer(&contents, worktree)?;
        is_bare_repo(&bare).then_some(bare)
    }

    async fn bare_from_scan(&self, worktree: &Path) -> Option<PathBuf> {
        let target = canonical(worktree).await;
        let mut entries = tokio::fs::read_dir(self.layout.bare_repos_dir()).await.ok()?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let bare = entry.path();
            if !is_bare_repo(&bare) {
                continue;
            }
            let Ok(registered) = self.worktree_registrations(&bare).await else {
                continue;
            };
            for path in registered {
                if canonical(&path).await == target {
                    return Some(bare);
                }
            }
        }

        None
    }
}

fn secrets(credentials: Option<&GitCredentials>) -> Vec<&str> {
    credentials.map(|c| vec![c.token.as_str()]).unwrap_or_default()
}

fn is_bare_repo(path: &Path) -> bool {
    path.join("HEAD").is_file() && path.join("objects").is_dir()
}

async fn canonical(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Owning repository from the contents of a worktree's `.git` pointer file
fn parse_pointer(contents: &str, worktree: &Path) -> Option<PathBuf> {
    let gitdir = contents.lines().next()?.trim().strip_prefix("gitdir:")?.trim();
    let gitdir = Path::new(gitdir);
    let gitdir = if gitdir.is_relative() {
        worktree.join(gitdir)
    } else {
        gitdir.to_path_buf()
    };

    let mut current = gitdir.as_path();
    while let Some(parent) = current.parent() {
        if current.file_name().is_some_and(|n| n == "worktrees") {
            return Some(parent.to_path_buf());
        }
        current = parent;
    }
    None
}

/// Linked worktree paths from `git worktree list --porcelain`; the bare
/// repository's own entry is skipped.
fn parse_worktree_list(output: &str) -> Vec<PathBuf> {
    output
        .split("\n\n")
        .filter_map(|block| {
            let mut path = None;
            let mut bare = false;
            for line in block.lines() {
                if let Some(p) = line.strip_prefix("worktree ") {
                    path = Some(PathBuf::from(p));
                } else if line.trim() == "bare" {
                    bare = true;
                }
            }
            if bare { None } else { path }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE")
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    /// Source repository with one commit on `main`
    fn source_repo(root: &Path) -> PathBuf {
        let src = root.join("source");
        std::fs::create_dir_all(&src).unwrap();
        git(&src, &["init", "-q"]);
        git(&src, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&src, &["config", "user.name", "Test"]);
        git(&src, &["config", "user.email", "test@example.com"]);
        std::fs::write(src.join("README.md"), "hello\n").unwrap();
        git(&src, &["add", "."]);
        git(&src, &["commit", "-q", "-m", "init"]);
        src
    }

    fn manager(root: &Path) -> WorktreeManager {
        WorktreeManager::new(
            WorkspaceLayout::new(root.join("work")),
            Duration::from_secs(60),
        )
    }

    async fn checkout(
        manager: &WorktreeManager,
        src: &Path,
        job_id: Uuid,
        name: &str,
    ) -> (PathBuf, PathBuf) {
        let url = src.to_string_lossy().into_owned();
        let bare = manager.ensure_bare_repo("org/a", &url, None).await.unwrap();
        manager.refresh_bare_repo(&bare, &url, None).await.unwrap();
        let worktree = manager.layout().worktree_path(job_id, name);
        manager.create_worktree(&bare, &worktree, "main").await.unwrap();
        (bare, worktree)
    }

    #[test]
    fn test_parse_pointer_strips_worktrees_segment() {
        let bare = parse_pointer(
            "gitdir: /work/bare-repos/org__a.git/worktrees/a1\n",
            Path::new("/work/jobs/1/a"),
        );
        assert_eq!(bare, Some(PathBuf::from("/work/bare-repos/org__a.git")));

        assert_eq!(parse_pointer("garbage", Path::new("/x")), None);
        assert_eq!(parse_pointer("gitdir: /somewhere/else", Path::new("/x")), None);
    }

    #[test]
    fn test_parse_worktree_list_skips_bare_entry() {
        let output = "worktree /work/bare-repos/a.git\nbare\n\nworktree /work/jobs/1/a\nHEAD 0123\ndetached\n";
        assert_eq!(
            parse_worktree_list(output),
            vec![PathBuf::from("/work/jobs/1/a")]
        );
    }

    #[tokio::test]
    async fn test_ensure_bare_repo_clones_once() {
        let tmp = TempDir::new().unwrap();
        let src = source_repo(tmp.path());
        let manager = manager(tmp.path());
        let url = src.to_string_lossy().into_owned();

        let first = manager.ensure_bare_repo("org/a", &url, None).await.unwrap();
        assert!(is_bare_repo(&first));

        // A second clone would replace the directory and lose this marker
        let marker = first.join("shipwright-marker");
        std::fs::write(&marker, "x").unwrap();

        let second = manager.ensure_bare_repo("org/a", &url, None).await.unwrap();
        assert_eq!(first, second);
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_concurrent_jobs_share_one_bare_repo() {
        let tmp = TempDir::new().unwrap();
        let src = source_repo(tmp.path());
        let manager = manager(tmp.path());
        let url = src.to_string_lossy().into_owned();

        let (a, b) = tokio::join!(
            manager.ensure_bare_repo("org/a", &url, None),
            manager.ensure_bare_repo("org/a", &url, None)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a, b);

        let entries: Vec<_> = std::fs::read_dir(manager.layout().bare_repos_dir())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);

        let (job1, job2) = (Uuid::new_v4(), Uuid::new_v4());
        let (_, wt1) = checkout(&manager, &src, job1, "a").await;
        let (_, wt2) = checkout(&manager, &src, job2, "a").await;
        assert_ne!(wt1, wt2);
        assert!(wt1.join("README.md").exists());
        assert!(wt2.join("README.md").exists());
        assert_eq!(manager.worktree_registrations(&a).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checkouts_of_same_repo_all_succeed() {
        let tmp = TempDir::new().unwrap();
        let src = source_repo(tmp.path());
        let manager = manager(tmp.path());
        let url = src.to_string_lossy().into_owned();
        manager.ensure_bare_repo("org/a", &url, None).await.unwrap();

        for round in 0..3 {
            // Advance upstream so every fetch has refs to update
            std::fs::write(src.join(format!("round-{}.txt", round)), "x\n").unwrap();
            git(&src, &["checkout", "-q", "-B", &format!("b{}", round)]);
            git(&src, &["add", "."]);
            git(&src, &["commit", "-q", "-m", &format!("round {}", round)]);
            git(&src, &["checkout", "-q", "main"]);

            let jobs: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
            let results = futures_util::future::join_all(jobs.iter().map(|job_id| {
                let (manager, url) = (&manager, &url);
                async move {
                    let bare = manager.ensure_bare_repo("org/a", url, None).await?;
                    manager.refresh_bare_repo(&bare, url, None).await?;
                    let worktree = manager.layout().worktree_path(*job_id, "a");
                    manager.create_worktree(&bare, &worktree, "main").await?;
                    Ok::<_, GitError>(worktree)
                }
            }))
            .await;

            for result in results {
                let worktree = result.unwrap();
                assert!(worktree.join("README.md").exists());
            }
        }

        let bare_repos: Vec<_> = std::fs::read_dir(manager.layout().bare_repos_dir())
            .unwrap()
            .collect();
        assert_eq!(bare_repos.len(), 1);
        let bare = manager.layout().bare_repo_path("org/a");
        assert_eq!(manager.worktree_registrations(&bare).await.unwrap().len(), 18);
    }

    #[tokio::test]
    async fn test_create_branch_switches_worktree() {
        let tmp = TempDir::new().unwrap();
        let src = source_repo(tmp.path());
        let manager = manager(tmp.path());
        let (_, worktree) = checkout(&manager, &src, Uuid::new_v4(), "a").await;

        manager
            .create_branch(&worktree, "shipwright/1234abcd-a")
            .await
            .unwrap();

        let head = run_git(
            Some(&worktree),
            &["rev-parse", "--abbrev-ref", "HEAD"],
            Duration::from_secs(10),
            &[],
        )
        .await
        .unwrap();
        assert_eq!(head, "shipwright/1234abcd-a");
    }

    #[tokio::test]
    async fn test_missing_base_branch_is_reported() {
        let tmp = TempDir::new().unwrap();
        let src = source_repo(tmp.path());
        let manager = manager(tmp.path());
        let url = src.to_string_lossy().into_owned();
        let bare = manager.ensure_bare_repo("org/a", &url, None).await.unwrap();

        let worktree = manager.layout().worktree_path(Uuid::new_v4(), "a");
        let err = manager
            .create_worktree(&bare, &worktree, "does-not-exist")
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::BranchNotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_all_worktrees_leaves_no_registrations() {
        let tmp = TempDir::new().unwrap();
        let src = source_repo(tmp.path());
        let manager = manager(tmp.path());
        let job_id = Uuid::new_v4();

        let (bare, _) = checkout(&manager, &src, job_id, "a").await;
        checkout(&manager, &src, job_id, "b").await;
        assert_eq!(manager.worktree_registrations(&bare).await.unwrap().len(), 2);

        let job_dir = manager.layout().job_dir(job_id);
        let sweep = manager.remove_all_worktrees_under(&job_dir).await;
        assert_eq!(sweep.removed.len(), 2);
        assert!(sweep.unresolved.is_empty());
        assert!(sweep.errors.is_empty());

        tokio::fs::remove_dir_all(&job_dir).await.unwrap();
        assert!(manager.worktree_registrations(&bare).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_pointer_falls_back_to_scan() {
        let tmp = TempDir::new().unwrap();
        let src = source_repo(tmp.path());
        let manager = manager(tmp.path());
        let job_id = Uuid::new_v4();
        let (bare, worktree) = checkout(&manager, &src, job_id, "a").await;

        std::fs::write(worktree.join(".git"), "gitdir: /nowhere/worktrees/a\n").unwrap();

        let sweep = manager
            .remove_all_worktrees_under(&manager.layout().job_dir(job_id))
            .await;
        assert_eq!(sweep.removed, vec![worktree]);
        assert!(manager.worktree_registrations(&bare).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_worktree_is_reported_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(tmp.path());
        let job_id = Uuid::new_v4();

        let orphan = manager.layout().worktree_path(job_id, "orphan");
        std::fs::create_dir_all(&orphan).unwrap();
        std::fs::write(orphan.join(".git"), "gitdir: /nowhere/worktrees/x\n").unwrap();
        std::fs::create_dir_all(manager.layout().job_dir(job_id).join("plain")).unwrap();

        let sweep = manager
            .remove_all_worktrees_under(&manager.layout().job_dir(job_id))
            .await;
        assert_eq!(sweep.unresolved, vec![orphan]);
        assert!(sweep.removed.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_of_missing_job_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let manager = manager(tmp.path());
        let sweep = manager
            .remove_all_worktrees_under(&tmp.path().join("missing"))
            .await;
        assert!(sweep.removed.is_empty() && sweep.unresolved.is_empty() && sweep.errors.is_empty());
    }
}
