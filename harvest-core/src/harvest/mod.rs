mod orchestrator;
mod resolver;
mod rows;
mod session;
mod stats;
mod watcher;

pub use orchestrator::{DownloadOrchestrator, ItemOutcome, ItemReport, ItemState, CLOSE_CONTROL};
pub use resolver::{
    looks_like_recording_control, ActionResolution, ControlResolver, TriggerCandidate,
    TriggerRule, ACTION_RULES, SCAN_AND_CLICK_SCRIPT, TRIGGER_RULES,
};
pub use rows::{ChildRow, ResultRow, RowTraversal, WorkItem, EXPANDER};
pub use session::{HarvestOutcome, HarvestRun, HarvestSession, ATTEMPTED_STATUS};
pub use stats::HarvestStats;
pub use watcher::{
    newest_file, DirectoryWatcher, DownloadAttempt, DownloadStatus, DownloadWatcher, FileStamp,
};
