//! Git worktrees bound to agent tasks.
//!
//! Each task gets its own working directory on its own branch, sharing only
//! `.git` history with the main checkout. A workspace is provisioned, then
//! either finalized (changes committed, optionally pushed and proposed as a
//! merge request, worktree removed, branch kept) or cleaned (worktree and
//! branch removed). The manager force-cleans anything still open at shutdown.
//!
//! Git is driven through its CLI. The blocking calls run on the tokio
//! blocking pool so the async API never stalls a driver task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::WorkspaceConfig;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Git command failed: {0}")]
    Git(String),

    #[error("Worktree already exists: {0}")]
    AlreadyExists(String),

    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error("Not a git repository: {0}")]
    NotARepo(String),

    #[error("Branch already exists: {0}")]
    BranchExists(String),

    #[error("Merge request failed: {0}")]
    Provider(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceState {
    Provisioned,
    Finalized,
    Cleaned,
}

/// A worktree provisioned for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    /// Slug derived from the task id; also the worktree directory name.
    pub id: String,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub repo_root: PathBuf,
    pub path: PathBuf,
    pub branch: String,
    /// Ref the branch was created from.
    pub base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    pub state: WorkspaceState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub repo_root: PathBuf,
    pub task_id: String,
    /// Defaults to `HEAD`.
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ProvisionRequest {
    pub fn new(repo_root: impl Into<PathBuf>, task_id: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            task_id: task_id.into(),
            base: None,
            session_id: None,
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn for_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Branch to merge into.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FinalizeOptions {
    pub commit_message: String,
    pub push: bool,
    pub remote: String,
    pub merge_request: Option<MergeRequest>,
}

impl Default for FinalizeOptions {
    fn default() -> Self {
        Self {
            commit_message: "Agent task changes".to_string(),
            push: false,
            remote: "origin".to_string(),
            merge_request: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResult {
    pub workspace: Workspace,
    /// Commit created from the worktree's changes, if there were any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_request_url: Option<String>,
}

/// Hosting provider that turns a pushed branch into a merge request.
#[async_trait]
pub trait VcsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Opens a merge request for `branch` and returns its URL.
    async fn create_merge_request(
        &self,
        repo_root: &Path,
        branch: &str,
        request: &MergeRequest,
    ) -> Result<String, WorkspaceError>;
}

/// Opens pull requests with the GitHub CLI (`gh pr create`).
#[derive(Debug, Clone, Default)]
pub struct GitHubCliProvider;

#[async_trait]
impl VcsProvider for GitHubCliProvider {
    fn name(&self) -> &str {
        "github"
    }

    async fn create_merge_request(
        &self,
        repo_root: &Path,
        branch: &str,
        request: &MergeRequest,
    ) -> Result<String, WorkspaceError> {
        let output = tokio::process::Command::new("gh")
            .args(["pr", "create", "--head", branch, "--base", &request.target])
            .args(["--title", &request.title, "--body", &request.body])
            .current_dir(repo_root)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkspaceError::Provider(stderr.trim().to_string()));
        }

        let url = String::from_utf8_lossy(&output.stdout)
            .lines()
            .rev()
            .find(|l| l.starts_with("http"))
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(url)
    }
}

/// Provider for repositories without a hosting service; records nothing remote.
#[derive(Debug, Clone, Default)]
pub struct NoopVcsProvider;

#[async_trait]
impl VcsProvider for NoopVcsProvider {
    fn name(&self) -> &str {
        "none"
    }

    async fn create_merge_request(
        &self,
        _repo_root: &Path,
        branch: &str,
        request: &MergeRequest,
    ) -> Result<String, WorkspaceError> {
        debug!("No VCS provider; skipping merge request {} -> {}", branch, request.target);
        Ok(format!("local://{branch}"))
    }
}

/// Tracks open workspaces and drives their lifecycle.
pub struct WorkspaceManager {
    config: WorkspaceConfig,
    provider: Arc<dyn VcsProvider>,
    open: Mutex<HashMap<String, Workspace>>,
}

impl std::fmt::Debug for WorkspaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceManager")
            .field("config", &self.config)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl WorkspaceManager {
    pub fn new(config: WorkspaceConfig, provider: Arc<dyn VcsProvider>) -> Self {
        Self {
            config,
            provider,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub async fn provision(&self, request: ProvisionRequest) -> Result<Workspace, WorkspaceError> {
        let slug = slugify(&request.task_id);
        if slug.is_empty() {
            return Err(WorkspaceError::NotFound(format!(
                "task id '{}' has no usable characters",
                request.task_id
            )));
        }
        if self.open.lock().await.contains_key(&slug) {
            return Err(WorkspaceError::AlreadyExists(slug));
        }

        let config = self.config.clone();
        let repo_root = request.repo_root.clone();
        let base = request.base.clone().unwrap_or_else(|| "HEAD".to_string());
        let slug_for_git = slug.clone();
        let base_for_git = base.clone();
        let (path, branch, head) = blocking(move || {
            if let Some(dir) = config.worktree_dir.to_str()
                && !config.worktree_dir.is_absolute()
            {
                ensure_gitignore(&repo_root, dir)?;
            }
            create_worktree(&repo_root, &slug_for_git, &base_for_git, &config)
        })
        .await?;

        let workspace = Workspace {
            id: slug.clone(),
            task_id: request.task_id,
            session_id: request.session_id,
            repo_root: request.repo_root,
            path,
            branch,
            base,
            head,
            state: WorkspaceState::Provisioned,
            created_at: Utc::now(),
        };
        info!(
            "Provisioned workspace {} at {} on branch {}",
            workspace.id,
            workspace.path.display(),
            workspace.branch
        );
        self.open.lock().await.insert(slug, workspace.clone());
        Ok(workspace)
    }

    pub async fn finalize(
        &self,
        id: &str,
        options: FinalizeOptions,
    ) -> Result<FinalizeResult, WorkspaceError> {
        let mut workspace = self.take(id).await?;

        let path = workspace.path.clone();
        let repo_root = workspace.repo_root.clone();
        let branch = workspace.branch.clone();
        let message = options.commit_message.clone();
        let push = options.push;
        let remote = options.remote.clone();
        let git_result = blocking(move || {
            let commit = commit_all(&path, &message)?;
            if push {
                git(&path, &["push", "-u", &remote, &branch])?;
            }
            Ok(commit)
        })
        .await;

        let commit = match git_result {
            Ok(commit) => commit,
            Err(e) => {
                // Keep it open so the caller can retry or clean up.
                self.open.lock().await.insert(workspace.id.clone(), workspace);
                return Err(e);
            }
        };

        let merge_request_url = match &options.merge_request {
            Some(request) => {
                match self
                    .provider
                    .create_merge_request(&repo_root, &workspace.branch, request)
                    .await
                {
                    Ok(url) => Some(url),
                    Err(e) => {
                        self.open.lock().await.insert(workspace.id.clone(), workspace);
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        let path = workspace.path.clone();
        blocking(move || remove_worktree(&repo_root, &path, None)).await?;

        workspace.head = commit.clone().or(workspace.head);
        workspace.state = WorkspaceState::Finalized;
        info!(
            "Finalized workspace {} (commit {:?}, merge request {:?})",
            workspace.id, commit, merge_request_url
        );
        Ok(FinalizeResult {
            workspace,
            commit,
            merge_request_url,
        })
    }

    /// Removes the worktree and its branch, discarding all changes.
    pub async fn cleanup(&self, id: &str) -> Result<Workspace, WorkspaceError> {
        let mut workspace = self.take(id).await?;
        let repo_root = workspace.repo_root.clone();
        let path = workspace.path.clone();
        let branch = workspace.branch.clone();
        blocking(move || remove_worktree(&repo_root, &path, Some(&branch))).await?;
        workspace.state = WorkspaceState::Cleaned;
        info!("Cleaned workspace {}", workspace.id);
        Ok(workspace)
    }

    /// Cleans every open workspace. Failures are logged, not returned.
    pub async fn force_cleanup_open(&self) -> usize {
        let ids: Vec<String> = self.open.lock().await.keys().cloned().collect();
        let mut cleaned = 0;
        for id in ids {
            match self.cleanup(&id).await {
                Ok(_) => cleaned += 1,
                Err(e) => warn!("Failed to clean workspace {} at shutdown: {}", id, e),
            }
        }
        cleaned
    }

    pub async fn list(&self) -> Vec<Workspace> {
        let mut workspaces: Vec<Workspace> = self.open.lock().await.values().cloned().collect();
        workspaces.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        workspaces
    }

    pub async fn get(&self, id: &str) -> Option<Workspace> {
        self.open.lock().await.get(id).cloned()
    }

    /// Open workspaces bound to a session.
    pub async fn for_session(&self, session_id: &str) -> Vec<Workspace> {
        self.open
            .lock()
            .await
            .values()
            .filter(|w| w.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect()
    }

    async fn take(&self, id: &str) -> Result<Workspace, WorkspaceError> {
        self.open
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, WorkspaceError>
where
    F: FnOnce() -> Result<T, WorkspaceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WorkspaceError::Io(io::Error::other(e)))?
}

/// Lowercase slug usable as a directory and branch component.
pub fn slugify(task_id: &str) -> String {
    let mut slug = String::with_capacity(task_id.len());
    for c in task_id.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches(|c| c == '-' || c == '.').to_string()
}

fn git(dir: &Path, args: &[&str]) -> Result<String, WorkspaceError> {
    let output = Command::new("git").args(args).current_dir(dir).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WorkspaceError::Git(stderr.trim().to_string()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Creates `<worktree_dir>/<slug>` on a new `<prefix><slug>` branch from `base`.
fn create_worktree(
    repo_root: &Path,
    slug: &str,
    base: &str,
    config: &WorkspaceConfig,
) -> Result<(PathBuf, String, Option<String>), WorkspaceError> {
    if !repo_root.join(".git").exists() {
        return Err(WorkspaceError::NotARepo(repo_root.display().to_string()));
    }

    let worktree_base = if config.worktree_dir.is_absolute() {
        config.worktree_dir.clone()
    } else {
        repo_root.join(&config.worktree_dir)
    };
    let worktree_path = worktree_base.join(slug);
    let branch = format!("{}{slug}", config.branch_prefix);

    if worktree_path.exists() {
        return Err(WorkspaceError::AlreadyExists(worktree_path.display().to_string()));
    }
    fs::create_dir_all(&worktree_base)?;

    let output = Command::new("git")
        .args(["worktree", "add", "-b", &branch])
        .arg(&worktree_path)
        .arg(base)
        .current_dir(repo_root)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("already exists") {
            if stderr.contains("branch") {
                return Err(WorkspaceError::BranchExists(branch));
            }
            return Err(WorkspaceError::AlreadyExists(worktree_path.display().to_string()));
        }
        return Err(WorkspaceError::Git(stderr.trim().to_string()));
    }

    let head = git(&worktree_path, &["rev-parse", "HEAD"]).ok();
    debug!("Created worktree at {} on branch {}", worktree_path.display(), branch);
    Ok((worktree_path, branch, head))
}

/// Stages and commits everything; `None` when the tree was clean.
fn commit_all(worktree: &Path, message: &str) -> Result<Option<String>, WorkspaceError> {
    git(worktree, &["add", "-A"])?;
    if git(worktree, &["status", "--porcelain"])?.is_empty() {
        return Ok(None);
    }
    git(worktree, &["commit", "-m", message])?;
    git(worktree, &["rev-parse", "HEAD"]).map(Some)
}

fn remove_worktree(
    repo_root: &Path,
    worktree_path: &Path,
    delete_branch: Option<&str>,
) -> Result<(), WorkspaceError> {
    if worktree_path.exists() {
        git(
            repo_root,
            &["worktree", "remove", "--force", &worktree_path.to_string_lossy()],
        )?;
    }

    if let Some(branch) = delete_branch
        && let Err(e) = git(repo_root, &["branch", "-D", branch])
    {
        // Already gone is fine.
        debug!("Failed to delete branch {}: {}", branch, e);
    }

    let _ = git(repo_root, &["worktree", "prune"]);
    debug!("Removed worktree at {}", worktree_path.display());
    Ok(())
}

/// Adds the worktree directory to `.gitignore` unless already listed.
fn ensure_gitignore(repo_root: &Path, worktree_dir: &str) -> Result<(), WorkspaceError> {
    let gitignore = repo_root.join(".gitignore");
    let pattern = format!("{}/", worktree_dir.trim_end_matches('/'));

    let existing = match fs::read_to_string(&gitignore) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if existing
        .lines()
        .map(str::trim)
        .any(|l| l == pattern || l == pattern.trim_end_matches('/'))
    {
        return Ok(());
    }

    let mut file = OpenOptions::new().create(true).append(true).open(&gitignore)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{pattern}")?;
    debug!("Added {} to .gitignore", pattern);
    Ok(())
}

/// Branches in the repository that carry `prefix`.
pub fn list_prefixed_branches(repo_root: &Path, prefix: &str) -> Result<Vec<String>, WorkspaceError> {
    let pattern = format!("refs/heads/{prefix}*");
    let out = git(repo_root, &["for-each-ref", "--format=%(refname:short)", &pattern])?;
    Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_git_repo(dir: &Path) {
        for args in [
            vec!["init", "--initial-branch=main"],
            vec!["config", "user.email", "test@test.local"],
            vec!["config", "user.name", "Test User"],
        ] {
            Command::new("git").args(&args).current_dir(dir).output().unwrap();
        }
        fs::write(dir.join("README.md"), "# Test").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "Initial commit"])
            .current_dir(dir)
            .output()
            .unwrap();
    }

    fn manager() -> WorkspaceManager {
        WorkspaceManager::new(WorkspaceConfig::default(), Arc::new(NoopVcsProvider))
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Fix Login Bug #42"), "fix-login-bug-42");
        assert_eq!(slugify("  task/one  "), "task-one");
        assert_eq!(slugify("///"), "");
    }

    #[tokio::test]
    async fn test_provision_creates_branch_and_ignores_dir() {
        let temp = TempDir::new().unwrap();
        init_git_repo(temp.path());
        let workspaces = manager();

        let ws = workspaces
            .provision(ProvisionRequest::new(temp.path(), "Task One"))
            .await
            .unwrap();

        assert_eq!(ws.id, "task-one");
        assert_eq!(ws.branch, "tether/task-one");
        assert!(ws.path.join("README.md").exists());
        assert!(ws.head.is_some());
        assert_eq!(ws.state, WorkspaceState::Provisioned);

        let gitignore = fs::read_to_string(temp.path().join(".gitignore")).unwrap();
        assert!(gitignore.contains(".tether/worktrees/"));
        assert_eq!(workspaces.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_provision_twice_is_rejected() {
        let temp = TempDir::new().unwrap();
        init_git_repo(temp.path());
        let workspaces = manager();

        workspaces
            .provision(ProvisionRequest::new(temp.path(), "dup"))
            .await
            .unwrap();
        let err = workspaces
            .provision(ProvisionRequest::new(temp.path(), "dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_not_a_repo() {
        let temp = TempDir::new().unwrap();
        let err = manager()
            .provision(ProvisionRequest::new(temp.path(), "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::NotARepo(_)));
    }

    #[tokio::test]
    async fn test_finalize_commits_and_keeps_branch() {
        let temp = TempDir::new().unwrap();
        init_git_repo(temp.path());
        let workspaces = manager();

        let ws = workspaces
            .provision(ProvisionRequest::new(temp.path(), "feature"))
            .await
            .unwrap();
        fs::write(ws.path.join("new.txt"), "agent output").unwrap();

        let result = workspaces
            .finalize(
                &ws.id,
                FinalizeOptions {
                    commit_message: "Add new.txt".to_string(),
                    merge_request: Some(MergeRequest {
                        title: "Add new.txt".to_string(),
                        body: String::new(),
                        target: "main".to_string(),
                    }),
                    ..FinalizeOptions::default()
                },
            )
            .await
            .unwrap();

        assert!(result.commit.is_some());
        assert_eq!(result.merge_request_url.as_deref(), Some("local://tether/feature"));
        assert_eq!(result.workspace.state, WorkspaceState::Finalized);
        assert!(!ws.path.exists());
        assert!(workspaces.list().await.is_empty());

        let branches = list_prefixed_branches(temp.path(), "tether/").unwrap();
        assert_eq!(branches, vec!["tether/feature"]);
    }

    #[tokio::test]
    async fn test_finalize_clean_tree_has_no_commit() {
        let temp = TempDir::new().unwrap();
        init_git_repo(temp.path());
        let workspaces = manager();

        let ws = workspaces
            .provision(ProvisionRequest::new(temp.path(), "noop"))
            .await
            .unwrap();
        let result = workspaces.finalize(&ws.id, FinalizeOptions::default()).await.unwrap();
        assert_eq!(result.commit, None);
        assert_eq!(result.merge_request_url, None);
    }

    #[tokio::test]
    async fn test_cleanup_removes_worktree_and_branch() {
        let temp = TempDir::new().unwrap();
        init_git_repo(temp.path());
        let workspaces = manager();

        let ws = workspaces
            .provision(ProvisionRequest::new(temp.path(), "scratch"))
            .await
            .unwrap();
        let cleaned = workspaces.cleanup(&ws.id).await.unwrap();

        assert_eq!(cleaned.state, WorkspaceState::Cleaned);
        assert!(!ws.path.exists());
        assert!(list_prefixed_branches(temp.path(), "tether/").unwrap().is_empty());
        assert!(matches!(
            workspaces.cleanup(&ws.id).await,
            Err(WorkspaceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_force_cleanup_open() {
        let temp = TempDir::new().unwrap();
        init_git_repo(temp.path());
        let workspaces = manager();

        for task in ["a", "b"] {
            workspaces
                .provision(ProvisionRequest::new(temp.path(), task).for_session("s1"))
                .await
                .unwrap();
        }
        assert_eq!(workspaces.for_session("s1").await.len(), 2);
        assert_eq!(workspaces.force_cleanup_open().await, 2);
        assert!(workspaces.list().await.is_empty());
    }

    #[test]
    fn test_ensure_gitignore_is_idempotent() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".gitignore"), "target/").unwrap();
        ensure_gitignore(temp.path(), ".tether/worktrees").unwrap();
        ensure_gitignore(temp.path(), ".tether/worktrees/").unwrap();
        let contents = fs::read_to_string(temp.path().join(".gitignore")).unwrap();
        assert_eq!(contents, "target/\n.tether/worktrees/\n");
    }
}
