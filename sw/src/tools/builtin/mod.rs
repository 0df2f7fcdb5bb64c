//! Built-in tools: file collaborators and step control

mod edit_file;
mod list_directory;
mod mark_step_done;
mod read_file;
mod report_step_failure;
mod self_report;
mod write_file;

pub use edit_file::EditFileTool;
pub use list_directory::ListDirectoryTool;
pub use mark_step_done::MarkStepDoneTool;
pub use read_file::ReadFileTool;
pub use report_step_failure::ReportStepFailureTool;
pub use self_report::SelfReportTool;
pub use write_file::WriteFileTool;

/// Name of the explicit completion tool
pub const MARK_STEP_DONE: &str = "mark_step_done";

/// Name of the failure reporting tool
pub const REPORT_STEP_FAILURE: &str = "report_step_failure";

/// Name of the structured self-report tool
pub const SELF_REPORT: &str = "self_report";
