//! Inferred step completion
//!
//! A worker may finish a step's files without calling the completion tool.
//! The engine then checks the step's declared outputs itself.

use std::path::Path;

use tracing::debug;

use crate::domain::{Step, normalize_path};
use crate::tools::FileActivity;

/// Whether a step's declared file expectations are met
///
/// Every declared create must exist and every declared modify must have
/// been written during the step. With `require_batch_touch`, the latest
/// tool batch must also have written one of the declared outputs, so a
/// step is not completed by a batch that did unrelated work. Steps that
/// declare no files are never inferred complete.
pub fn infer_completion(step: &Step, worktree: &Path, activity: &FileActivity, require_batch_touch: bool) -> bool {
    debug!(step = step.index, require_batch_touch, "infer_completion: called");
    let creates = declared(&step.files_to_create);
    let modifies = declared(&step.files_to_modify);
    if creates.is_empty() && modifies.is_empty() {
        return false;
    }

    if let Some(missing) = creates.iter().find(|p| !worktree.join(p.as_str()).exists()) {
        debug!(%missing, "infer_completion: declared create missing");
        return false;
    }

    if let Some(untouched) = modifies.iter().find(|p| !activity.touched(p)) {
        debug!(%untouched, "infer_completion: declared modify not touched");
        return false;
    }

    if require_batch_touch && !creates.iter().chain(modifies.iter()).any(|p| activity.batch.contains(p)) {
        debug!("infer_completion: latest batch touched no declared output");
        return false;
    }

    true
}

fn declared(files: &[String]) -> Vec<String> {
    files.iter().map(|f| normalize_path(f)).filter(|f| !f.is_empty()).collect()
}
