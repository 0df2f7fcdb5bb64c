//! Step dependency analysis

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{Step, normalize_path};

/// Why one step depends on another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DependencyReason {
    /// Listed in `depends_on`
    ExplicitDependency,
    /// Reads a file the other step produces
    ReadsOutput { file: String },
    /// Modifies a file the other step produces
    ModifiesOutput { file: String },
    /// Description refers to a file the other step produces
    MentionsOutput { file: String },
}

impl std::fmt::Display for DependencyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExplicitDependency => write!(f, "declared dependency"),
            Self::ReadsOutput { file } => write!(f, "reads {}", file),
            Self::ModifiesOutput { file } => write!(f, "modifies {}", file),
            Self::MentionsOutput { file } => write!(f, "refers to {}", file),
        }
    }
}

/// Strategy for deciding whether `step` needs the output of `failed`
pub trait DependencyAnalyzer: Send + Sync {
    fn dependency(&self, step: &Step, failed: &Step) -> Option<DependencyReason>;
}

/// Detects dependencies through explicit links and declared-path overlap
#[derive(Debug, Clone, Copy, Default)]
pub struct PathOverlapAnalyzer;

impl DependencyAnalyzer for PathOverlapAnalyzer {
    fn dependency(&self, step: &Step, failed: &Step) -> Option<DependencyReason> {
        debug!(step = step.index, failed = failed.index, "PathOverlapAnalyzer::dependency: called");
        if step.depends_on.contains(&failed.index) {
            return Some(DependencyReason::ExplicitDependency);
        }

        let outputs = failed.outputs();
        if outputs.is_empty() {
            return None;
        }

        if let Some(file) = first_overlap(&step.files_to_read, &outputs) {
            return Some(DependencyReason::ReadsOutput { file });
        }

        outputs
            .iter()
            .find(|file| mentions(&step.description, file))
            .map(|file| DependencyReason::MentionsOutput { file: file.clone() })
    }
}

/// First entry of `files` (normalized) that appears in `outputs`
pub(crate) fn first_overlap(files: &[String], outputs: &[String]) -> Option<String> {
    files
        .iter()
        .map(|f| normalize_path(f))
        .find(|f| !f.is_empty() && outputs.contains(f))
}

/// Whether `text` refers to `path` as a whole token
fn mentions(text: &str, path: &str) -> bool {
    if text.is_empty() || path.is_empty() {
        return false;
    }
    // A path token may not continue into more path characters on either side
    let pattern = format!(r"(?:^|[^\w/.\-]){}(?:$|[^\w/.\-]|\.(?:$|\s))", regex::escape(path));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            warn!(%path, error = %e, "Failed to build mention pattern");
            false
        }
    }
}
