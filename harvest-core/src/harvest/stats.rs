use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::orchestrator::ItemOutcome;

/// Counters for one harvest run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestStats {
    pub rows_visited: u64,
    pub items_processed: u64,
    pub downloads_completed: u64,
    pub downloads_timed_out: u64,
    pub no_download_triggered: u64,
    pub no_trigger: u64,
    pub click_failures: u64,
    pub saved: Vec<PathBuf>,
}

impl HarvestStats {
    pub fn record_row(&mut self) {
        self.rows_visited = self.rows_visited.saturating_add(1);
    }

    pub fn record_item(&mut self, outcome: &ItemOutcome) {
        self.items_processed = self.items_processed.saturating_add(1);
        match outcome {
            ItemOutcome::Completed(path) => {
                self.downloads_completed = self.downloads_completed.saturating_add(1);
                self.saved.push(path.clone());
            }
            ItemOutcome::TimedOut { .. } => {
                self.downloads_timed_out = self.downloads_timed_out.saturating_add(1);
            }
            ItemOutcome::NoDownloadTriggered => {
                self.no_download_triggered = self.no_download_triggered.saturating_add(1);
            }
            ItemOutcome::NoTrigger => {
                self.no_trigger = self.no_trigger.saturating_add(1);
            }
            ItemOutcome::ClickFailed => {
                self.click_failures = self.click_failures.saturating_add(1);
            }
        }
    }

    pub fn attempted(&self) -> u64 {
        self.downloads_completed + self.downloads_timed_out + self.no_download_triggered
    }

    pub fn completion_rate(&self) -> f64 {
        let attempted = self.attempted();
        if attempted == 0 {
            0.0
        } else {
            (self.downloads_completed as f64 / attempted as f64) * 100.0
        }
    }
}
