//! Prompt text sent to the worker

use std::fmt::Write;
use std::path::Path;

use crate::domain::{Plan, Step};
use crate::tools::builtin::{MARK_STEP_DONE, REPORT_STEP_FAILURE, SELF_REPORT};

/// System prompt describing the plan and the step protocol
pub fn system_prompt(plan: &Plan, worktree: &Path) -> String {
    let mut prompt = format!(
        "You are an autonomous coding worker executing an implementation plan one step at a time.\n\
         Working directory: {}\n\
         Task: {}\n\n\
         Plan:\n",
        worktree.display(),
        plan.description
    );
    for step in &plan.steps {
        let _ = writeln!(prompt, "{}. {} [{}]", step.index, step.title, step.status);
    }
    let _ = write!(
        prompt,
        "\nWork only on the step you are given. When it is finished call `{}`. \
         If it cannot be finished call `{}` with the reason. \
         When asked how you are doing call `{}`.",
        MARK_STEP_DONE, REPORT_STEP_FAILURE, SELF_REPORT
    );
    prompt
}

/// Instructions for starting a step
pub fn step_prompt(step: &Step) -> String {
    let mut prompt = format!("Start step {}: {}\n\n{}\n", step.index, step.title, step.description);
    file_list(&mut prompt, "Files to create", &step.files_to_create);
    file_list(&mut prompt, "Files to modify", &step.files_to_modify);
    file_list(&mut prompt, "Files to read first", &step.files_to_read);
    let _ = write!(
        prompt,
        "\nCall `{}` with step_index {} when done, or `{}` if you are blocked. \
         Use `{}` to report progress.",
        MARK_STEP_DONE, step.index, REPORT_STEP_FAILURE, SELF_REPORT
    );
    prompt
}

/// Instructions for retrying a step after a transient failure
pub fn retry_prompt(step: &Step) -> String {
    let mut prompt = format!(
        "This is retry {} of {} for step {}. The previous attempt failed: {}\n\n",
        step.retry_count,
        step.max_retries,
        step.index,
        step.last_error.as_deref().unwrap_or("unknown error")
    );
    prompt.push_str(&step_prompt(step));
    prompt
}

/// Note prepended to the conversation when a run is resumed
pub fn resume_notice(completed_through: usize, current: Option<&Step>) -> String {
    let mut notice = String::from("Execution was interrupted and is now resuming.");
    if completed_through > 0 {
        let _ = write!(
            notice,
            " You already completed through step {}; do not redo it.",
            completed_through
        );
    }
    if let Some(step) = current {
        let _ = write!(notice, " Continue with step {}: {}.", step.index, step.title);
    }
    notice
}

/// Request for a structured progress report
pub fn self_report_prompt(step: &Step) -> String {
    format!(
        "Pause and report on step {} by calling `{}` with your progress (0-100), \
         confidence (0-100), blockers, files completed and a decision \
         (continue, pivot or escalate).",
        step.index, SELF_REPORT
    )
}

fn file_list(prompt: &mut String, heading: &str, files: &[String]) {
    if files.is_empty() {
        return;
    }
    let _ = writeln!(prompt, "\n{}:", heading);
    for file in files {
        let _ = writeln!(prompt, "- {}", file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorClass;

    fn step() -> Step {
        Step::new(2, "Db layer", "Add the database module")
            .with_creates(["src/db.rs"])
            .with_modifies(["src/lib.rs"])
    }

    #[test]
    fn test_system_prompt_lists_steps() {
        let plan = Plan::with_id("t1", "p1", "Build a thing", vec![Step::new(1, "Setup", ""), step()]);
        let prompt = system_prompt(&plan, Path::new("/work"));
        assert!(prompt.contains("Working directory: /work"));
        assert!(prompt.contains("1. Setup [pending]"));
        assert!(prompt.contains("2. Db layer [pending]"));
        assert!(prompt.contains(MARK_STEP_DONE));
    }

    #[test]
    fn test_step_prompt_lists_files() {
        let prompt = step_prompt(&step());
        assert!(prompt.starts_with("Start step 2: Db layer"));
        assert!(prompt.contains("Files to create:\n- src/db.rs"));
        assert!(prompt.contains("Files to modify:\n- src/lib.rs"));
        assert!(!prompt.contains("Files to read first"));
        assert!(prompt.contains(REPORT_STEP_FAILURE));
    }

    #[test]
    fn test_retry_prompt() {
        let mut s = step();
        s.start(0).unwrap();
        s.reset_for_retry("connection reset", ErrorClass::Transient).unwrap();
        let prompt = retry_prompt(&s);
        assert!(prompt.starts_with("This is retry 1 of 2 for step 2. The previous attempt failed: connection reset"));
        assert!(prompt.contains("Start step 2"));
    }

    #[test]
    fn test_resume_notice() {
        let s = step();
        let notice = resume_notice(1, Some(&s));
        assert!(notice.contains("You already completed through step 1; do not redo it."));
        assert!(notice.contains("Continue with step 2: Db layer."));

        let fresh = resume_notice(0, None);
        assert!(!fresh.contains("completed through"));
    }

    #[test]
    fn test_self_report_prompt() {
        assert!(self_report_prompt(&step()).contains(SELF_REPORT));
    }
}
