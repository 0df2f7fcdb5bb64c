//! Advisory file registry shared between workers
//!
//! Claims are warnings, not locks: a worker told that another worker holds
//! a file may still write it.

use std::collections::HashMap;
use std::sync::Arc;

use checkpointstore::now_ms;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A worker's claim on a project file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileClaim {
    pub project_id: String,
    pub path: String,
    pub worker_id: String,
    pub task_id: String,
    pub claimed_at: i64,
}

impl std::fmt::Display for FileClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is being modified by worker {} (task {})", self.path, self.worker_id, self.task_id)
    }
}

/// Project-scoped map of file claims
#[derive(Debug, Clone, Default)]
pub struct FileRegistry {
    claims: Arc<RwLock<HashMap<(String, String), FileClaim>>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path` for `worker_id`
    ///
    /// Returns the existing claim when another worker already holds the
    /// file; that claim is left in place.
    pub async fn claim(&self, project_id: &str, path: &str, worker_id: &str, task_id: &str) -> Option<FileClaim> {
        debug!(%project_id, %path, %worker_id, "FileRegistry::claim: called");
        let key = (project_id.to_string(), path.to_string());
        let mut claims = self.claims.write().await;

        match claims.get(&key) {
            Some(existing) if existing.worker_id != worker_id => {
                info!(%project_id, %path, holder = %existing.worker_id, %worker_id, "File already claimed by another worker");
                Some(existing.clone())
            }
            Some(_) => None,
            None => {
                claims.insert(
                    key,
                    FileClaim {
                        project_id: project_id.to_string(),
                        path: path.to_string(),
                        worker_id: worker_id.to_string(),
                        task_id: task_id.to_string(),
                        claimed_at: now_ms(),
                    },
                );
                None
            }
        }
    }

    /// Drop every claim held by `worker_id`; returns how many were released
    pub async fn release_worker(&self, worker_id: &str) -> usize {
        debug!(%worker_id, "FileRegistry::release_worker: called");
        let mut claims = self.claims.write().await;
        let before = claims.len();
        claims.retain(|_, claim| claim.worker_id != worker_id);
        before - claims.len()
    }

    /// Current claims in a project, ordered by path
    pub async fn claims_for_project(&self, project_id: &str) -> Vec<FileClaim> {
        debug!(%project_id, "FileRegistry::claims_for_project: called");
        let claims = self.claims.read().await;
        let mut result: Vec<FileClaim> = claims.values().filter(|c| c.project_id == project_id).cloned().collect();
        result.sort_by(|a, b| a.path.cmp(&b.path));
        result
    }
}
