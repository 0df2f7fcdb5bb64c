//! Step control signals recorded by the step tools

use serde::{Deserialize, Serialize};

use crate::domain::SelfReport;

/// Something a worker told the engine about its current step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StepSignal {
    /// Worker declared the step done
    Done {
        step_index: usize,
        summary: String,
        artifacts: Vec<String>,
    },
    /// Worker reported that the step cannot proceed
    Failure { step_index: usize, message: String },
    /// Structured progress report
    SelfReport { step_index: usize, report: SelfReport },
}

impl StepSignal {
    pub fn step_index(&self) -> usize {
        match self {
            Self::Done { step_index, .. } | Self::Failure { step_index, .. } | Self::SelfReport { step_index, .. } => {
                *step_index
            }
        }
    }
}
