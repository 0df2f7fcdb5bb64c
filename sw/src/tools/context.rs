//! ToolContext - per-worker execution context for tools
//!
//! Each worker gets its own context scoped to its working directory. The
//! context also carries the worker's identity, the step currently being
//! executed, the files touched during that step, and the step signals the
//! control tools have recorded.

use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::normalize_path;

use super::registry::{FileClaim, FileRegistry};
use super::signal::StepSignal;
use super::ToolError;

/// Files touched by a worker, keyed by worktree-relative path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileActivity {
    /// Written files that did not exist before this step touched them
    pub created: BTreeSet<String>,

    /// Written files that already existed
    pub modified: BTreeSet<String>,

    /// Files read during the step
    pub read: BTreeSet<String>,

    /// Files written by the most recent tool batch
    pub batch: BTreeSet<String>,
}

impl FileActivity {
    /// Whether the step wrote `path` in any way
    pub fn touched(&self, path: &str) -> bool {
        self.created.contains(path) || self.modified.contains(path)
    }
}

/// Execution context for tools - scoped to a single worker
#[derive(Clone)]
pub struct ToolContext {
    /// Working directory - all file ops constrained here
    pub worktree: PathBuf,

    /// Worker identity (for claims and logs)
    pub worker_id: String,

    /// Project the worker's plan belongs to
    pub project_id: String,

    /// Task the worker is executing
    pub task_id: String,

    /// Whether sandbox mode is enabled (default: true)
    pub sandbox_enabled: bool,

    /// 1-based index of the step in progress, 0 when none
    step_index: Arc<AtomicUsize>,

    /// Files read this step (for edit validation)
    read_files: Arc<Mutex<HashSet<String>>>,

    activity: Arc<Mutex<FileActivity>>,

    signals: Arc<Mutex<Vec<StepSignal>>>,

    registry: Option<FileRegistry>,
}

impl ToolContext {
    /// Create a new tool context
    pub fn new(worktree: PathBuf, worker_id: impl Into<String>) -> Self {
        let worker_id = worker_id.into();
        debug!(?worktree, %worker_id, "ToolContext::new: called");
        Self {
            worktree,
            worker_id,
            project_id: String::new(),
            task_id: String::new(),
            sandbox_enabled: true,
            step_index: Arc::new(AtomicUsize::new(0)),
            read_files: Arc::new(Mutex::new(HashSet::new())),
            activity: Arc::new(Mutex::new(FileActivity::default())),
            signals: Arc::new(Mutex::new(Vec::new())),
            registry: None,
        }
    }

    /// Create a context with sandbox disabled (for testing)
    pub fn new_unsandboxed(worktree: PathBuf, worker_id: impl Into<String>) -> Self {
        let mut ctx = Self::new(worktree, worker_id);
        ctx.sandbox_enabled = false;
        ctx
    }

    /// Builder method to bind the context to a plan
    pub fn with_plan(mut self, project_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self.task_id = task_id.into();
        debug!(project_id = %self.project_id, task_id = %self.task_id, "ToolContext::with_plan: called");
        self
    }

    /// Builder method to attach the shared file registry
    pub fn with_registry(mut self, registry: FileRegistry) -> Self {
        debug!(worker_id = %self.worker_id, "ToolContext::with_registry: called");
        self.registry = Some(registry);
        self
    }

    pub fn registry(&self) -> Option<&FileRegistry> {
        self.registry.as_ref()
    }

    /// Set the step in progress (0 clears it)
    pub fn set_step(&self, step_index: usize) {
        debug!(step_index, "ToolContext::set_step: called");
        self.step_index.store(step_index, Ordering::SeqCst);
    }

    /// Step in progress, if any
    pub fn step_index(&self) -> Option<usize> {
        match self.step_index.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }

    /// Track that a file was read (enables edit validation)
    pub async fn track_read(&self, path: &Path) {
        debug!(?path, "ToolContext::track_read: called");
        let key = self.relative_key(&self.absolute(path));
        self.read_files.lock().await.insert(key.clone());
        self.activity.lock().await.read.insert(key);
    }

    /// Check if a file was read (required before edit)
    pub async fn was_read(&self, path: &Path) -> bool {
        debug!(?path, "ToolContext::was_read: called");
        let key = self.relative_key(&self.absolute(path));
        self.read_files.lock().await.contains(&key)
    }

    /// Record a write for completion evidence
    ///
    /// `created` is true when the file did not exist before the write. A
    /// file created earlier in the step stays in `created` when rewritten.
    pub async fn record_write(&self, path: &Path, created: bool) {
        let key = self.relative_key(&self.absolute(path));
        debug!(%key, created, "ToolContext::record_write: called");
        let mut activity = self.activity.lock().await;
        if created {
            activity.created.insert(key.clone());
        } else if !activity.created.contains(&key) {
            activity.modified.insert(key.clone());
        }
        activity.batch.insert(key.clone());
        drop(activity);

        // A written file counts as read for a following edit
        self.read_files.lock().await.insert(key);
    }

    /// Start a new tool batch
    pub async fn begin_batch(&self) {
        debug!("ToolContext::begin_batch: called");
        self.activity.lock().await.batch.clear();
    }

    /// Snapshot of the step's file activity
    pub async fn activity(&self) -> FileActivity {
        self.activity.lock().await.clone()
    }

    /// Forget reads and writes; called when a step starts or is retried
    pub async fn reset_step_tracking(&self) {
        debug!("ToolContext::reset_step_tracking: called");
        *self.activity.lock().await = FileActivity::default();
        self.read_files.lock().await.clear();
    }

    /// Record a step signal for the engine
    pub async fn push_signal(&self, signal: StepSignal) {
        debug!(step_index = signal.step_index(), "ToolContext::push_signal: called");
        self.signals.lock().await.push(signal);
    }

    /// Take all signals recorded since the last drain
    pub async fn drain_signals(&self) -> Vec<StepSignal> {
        std::mem::take(&mut *self.signals.lock().await)
    }

    /// Claim a file in the registry; returns another worker's claim if any
    pub async fn claim_file(&self, path: &Path) -> Option<FileClaim> {
        let registry = self.registry.as_ref()?;
        let key = self.relative_key(&self.absolute(path));
        registry.claim(&self.project_id, &key, &self.worker_id, &self.task_id).await
    }

    /// Worktree-relative, normalized form of a path
    pub fn relative_key(&self, path: &Path) -> String {
        let worktree_canonical = self.worktree.canonicalize().unwrap_or_else(|_| self.worktree.clone());
        let relative = path
            .strip_prefix(&worktree_canonical)
            .or_else(|_| path.strip_prefix(&self.worktree))
            .unwrap_or(path);
        normalize_path(&relative.to_string_lossy())
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.worktree.join(path)
        }
    }

    /// Validate path is within worktree (sandbox enforcement)
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, ToolError> {
        debug!(?path, "ToolContext::validate_path: called");
        let normalized = self.absolute(path);

        if !self.sandbox_enabled {
            return Ok(normalized);
        }

        // Existing paths are canonicalized to resolve symlinks; new files are
        // resolved through their nearest existing ancestor
        let canonical = if normalized.exists() {
            normalized.canonicalize().unwrap_or_else(|_| normalized.clone())
        } else {
            resolve_through_ancestor(&normalized)
        };

        let worktree_canonical = self.worktree.canonicalize().unwrap_or_else(|_| self.worktree.clone());

        if canonical.starts_with(&worktree_canonical) {
            Ok(canonical)
        } else {
            debug!("ToolContext::validate_path: sandbox violation detected");
            Err(ToolError::SandboxViolation {
                path: path.to_path_buf(),
                worktree: self.worktree.clone(),
            })
        }
    }
}

/// Canonicalize the deepest existing ancestor and re-append the rest
///
/// `.` and `..` are folded lexically first so a missing directory cannot be
/// used to step outside.
fn resolve_through_ancestor(path: &Path) -> PathBuf {
    let mut folded = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                folded.pop();
            }
            other => folded.push(other.as_os_str()),
        }
    }

    let mut existing = folded;
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }

    let mut resolved = existing.canonicalize().unwrap_or(existing);
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    resolved
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("worktree", &self.worktree)
            .field("worker_id", &self.worker_id)
            .field("task_id", &self.task_id)
            .field("step_index", &self.step_index())
            .field("sandbox_enabled", &self.sandbox_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_track_and_check_read() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");

        let file_path = Path::new("src/lib.rs");
        assert!(!ctx.was_read(file_path).await);

        ctx.track_read(file_path).await;
        assert!(ctx.was_read(file_path).await);
        assert!(ctx.activity().await.read.contains("src/lib.rs"));
    }

    #[tokio::test]
    async fn test_record_write_created_vs_modified() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");

        ctx.record_write(&temp.path().join("src/new.rs"), true).await;
        ctx.record_write(Path::new("src/old.rs"), false).await;
        // Rewriting a file created this step keeps it in created
        ctx.record_write(Path::new("src/new.rs"), false).await;

        let activity = ctx.activity().await;
        assert!(activity.created.contains("src/new.rs"));
        assert!(activity.modified.contains("src/old.rs"));
        assert!(!activity.modified.contains("src/new.rs"));
        assert!(activity.touched("src/old.rs"));
        assert_eq!(activity.batch.len(), 2);
        assert!(ctx.was_read(Path::new("src/new.rs")).await);
    }

    #[tokio::test]
    async fn test_batch_and_step_reset() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");

        ctx.record_write(Path::new("a.rs"), true).await;
        ctx.begin_batch().await;
        let activity = ctx.activity().await;
        assert!(activity.batch.is_empty());
        assert!(activity.created.contains("a.rs"));

        ctx.reset_step_tracking().await;
        assert_eq!(ctx.activity().await, FileActivity::default());
        assert!(!ctx.was_read(Path::new("a.rs")).await);
    }

    #[tokio::test]
    async fn test_signals_drain() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");
        ctx.push_signal(StepSignal::Failure {
            step_index: 1,
            message: "boom".to_string(),
        })
        .await;

        let signals = ctx.drain_signals().await;
        assert_eq!(signals.len(), 1);
        assert!(ctx.drain_signals().await.is_empty());
    }

    #[test]
    fn test_step_index() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");
        assert_eq!(ctx.step_index(), None);

        let clone = ctx.clone();
        ctx.set_step(3);
        assert_eq!(clone.step_index(), Some(3));
    }

    #[tokio::test]
    async fn test_claim_file_reports_other_worker() {
        let temp = tempdir().unwrap();
        let registry = FileRegistry::new();
        let ctx1 = ToolContext::new(temp.path().to_path_buf(), "w1")
            .with_plan("p", "t1")
            .with_registry(registry.clone());
        let ctx2 = ToolContext::new(temp.path().to_path_buf(), "w2")
            .with_plan("p", "t2")
            .with_registry(registry);

        assert!(ctx1.claim_file(Path::new("src/db.rs")).await.is_none());
        let conflict = ctx2.claim_file(&temp.path().join("src/db.rs")).await.unwrap();
        assert_eq!(conflict.worker_id, "w1");
        assert_eq!(conflict.path, "src/db.rs");
    }

    #[test]
    fn test_validate_path_within_worktree() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("test.txt"), "content").unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");
        assert!(ctx.validate_path(Path::new("test.txt")).is_ok());
    }

    #[test]
    fn test_validate_path_outside_worktree() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");

        let result = ctx.validate_path(Path::new("/etc/passwd"));
        assert!(matches!(result.unwrap_err(), ToolError::SandboxViolation { .. }));
    }

    #[test]
    fn test_validate_new_nested_path() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");
        assert!(ctx.validate_path(Path::new("new/dir/file.txt")).is_ok());
        assert!(ctx.validate_path(Path::new("new/../../escape.txt")).is_err());
    }

    #[test]
    fn test_validate_path_with_sandbox_disabled() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new_unsandboxed(temp.path().to_path_buf(), "w1");
        assert!(ctx.validate_path(Path::new("/etc/passwd")).is_ok());
    }
}
