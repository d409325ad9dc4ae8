use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{Locator, Needle, PortalDriver, Scope};
use crate::config::HarvestConfig;

use super::resolver::{ActionResolution, ControlResolver};
use super::rows::{ResultRow, RowTraversal, WorkItem};
use super::session::{HarvestOutcome, HarvestRun};
use super::stats::HarvestStats;
use super::watcher::{DownloadStatus, DownloadWatcher};

/// Close control of the player modal.
pub const CLOSE_CONTROL: Locator = Locator::tags(&["button"]).any(&[
    Needle::dismiss("modal"),
    Needle::class("close"),
    Needle::class("modal-close"),
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemState {
    Located,
    Expanded,
    TriggerFound,
    TriggerClicked,
    ActionFound,
    ActionClicked,
    AwaitingFile,
    Completed,
    TimedOut,
    Cleaned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ItemOutcome {
    Completed(PathBuf),
    TimedOut { in_progress: Option<PathBuf> },
    NoDownloadTriggered,
    NoTrigger,
    ClickFailed,
}

/// What happened to one item, including every state it passed through.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub row: usize,
    pub item_id: String,
    pub trigger_tier: Option<usize>,
    pub states: Vec<ItemState>,
    pub outcome: ItemOutcome,
}

impl ItemReport {
    fn new(row: usize, item_id: String) -> Self {
        Self {
            row,
            item_id,
            trigger_tier: None,
            states: vec![ItemState::Located],
            outcome: ItemOutcome::NoTrigger,
        }
    }

    fn advance(&mut self, state: ItemState) {
        debug!(row = self.row, item = %self.item_id, ?state, "item state");
        self.states.push(state);
    }

    pub fn last_state(&self) -> ItemState {
        self.states.last().copied().unwrap_or(ItemState::Located)
    }
}

/// Drives every row and item of the results table through the two-click
/// download protocol, strictly one item at a time.
pub struct DownloadOrchestrator<W> {
    rows: RowTraversal,
    resolver: ControlResolver,
    watcher: W,
    scroll_settle: Duration,
    item_gap: Duration,
}

impl<W: DownloadWatcher> DownloadOrchestrator<W> {
    pub fn new(config: &HarvestConfig, watcher: W) -> Self {
        Self {
            rows: RowTraversal::new(&config.timeouts, &config.pacing),
            resolver: ControlResolver::new(config.timeouts.player_policy()),
            watcher,
            scroll_settle: config.pacing.scroll_settle(),
            item_gap: config.pacing.item_gap(),
        }
    }

    pub(crate) fn prepare(&self) -> io::Result<()> {
        self.watcher.prepare()
    }

    pub async fn run<D: PortalDriver>(&self, driver: &mut D) -> HarvestRun {
        if !self.rows.wait_for_table(driver).await {
            warn!("results table not present");
            return HarvestRun::new(HarvestOutcome::NoTable);
        }

        let initial = self.rows.wait_for_rows(driver).await;
        info!(rows = initial, "main rows found");
        if initial == 0 {
            return HarvestRun::new(HarvestOutcome::NoRows);
        }

        let mut stats = HarvestStats::default();
        let mut items = Vec::new();
        'rows: for position in 0..initial {
            let Some(row) = self.rows.row_at(driver, position).await else {
                info!(row = position + 1, "row count shrank, stopping traversal");
                break;
            };
            stats.record_row();
            info!(row = position + 1, id = %row.id, "processing main row");
            self.rows.expand(driver, &row).await;

            // Any click may re-render the table, so the row and its children are
            // resolved again before every item.
            for index in 0.. {
                let Some(row) = self.rows.row_at(driver, position).await else {
                    info!(row = position + 1, "row disappeared, stopping traversal");
                    break 'rows;
                };
                let Some(item) = self
                    .rows
                    .children_of(driver, &row)
                    .await
                    .into_iter()
                    .nth(index)
                else {
                    break;
                };
                let report = self.process_item(driver, &row, &item).await;
                stats.record_item(&report.outcome);
                items.push(report);
                pause(self.item_gap).await;
            }
        }

        info!(
            completed = stats.downloads_completed,
            timed_out = stats.downloads_timed_out,
            completion_rate = %format!("{:.1}%", stats.completion_rate()),
            "finished processing all rows"
        );
        HarvestRun {
            outcome: HarvestOutcome::Attempted(stats),
            items,
        }
    }

    async fn process_item<D: PortalDriver>(
        &self,
        driver: &mut D,
        row: &ResultRow<D::Handle>,
        item: &WorkItem<D::Handle>,
    ) -> ItemReport {
        let (handle, item_id) = match item {
            WorkItem::Child(child) => (&child.handle, child.id.clone()),
            WorkItem::Row => (&row.handle, row.id.clone()),
        };
        let item_id = if item_id.is_empty() {
            "<no-id>".to_string()
        } else {
            item_id
        };
        let mut report = ItemReport::new(row.position + 1, item_id);
        info!(row = report.row, item = %report.item_id, "processing item");

        // Expansion happened at row level; a failed expand does not block the item.
        report.advance(ItemState::Expanded);
        if let Err(err) = driver.scroll_into_view(handle).await {
            debug!(item = %report.item_id, error = %err, "scroll into view failed");
        }
        pause(self.scroll_settle).await;

        let mut trigger = self.resolver.resolve_trigger(driver, Scope::Within(handle)).await;
        if trigger.is_none() && matches!(item, WorkItem::Child(_)) {
            trigger = self
                .resolver
                .resolve_trigger(driver, Scope::Within(&row.handle))
                .await;
            if trigger.is_some() {
                debug!(item = %report.item_id, "trigger found in main row");
            }
        }
        let Some(trigger) = trigger else {
            warn!(item = %report.item_id, "no trigger control found, skipping");
            report.outcome = ItemOutcome::NoTrigger;
            report.advance(ItemState::Cleaned);
            return report;
        };
        info!(item = %report.item_id, tier = trigger.tier, rule = trigger.rule, "trigger found");
        report.trigger_tier = Some(trigger.tier);
        report.advance(ItemState::TriggerFound);

        if !click(driver, &trigger.handle).await {
            warn!(item = %report.item_id, "failed clicking trigger, skipping");
            report.outcome = ItemOutcome::ClickFailed;
            report.advance(ItemState::Cleaned);
            return report;
        }
        report.advance(ItemState::TriggerClicked);

        let mut attempt = self.watcher.begin();
        let action = self
            .resolver
            .resolve_download_action(driver, &trigger.info)
            .await;
        match action {
            Some(ActionResolution::Found(action)) => {
                report.advance(ItemState::ActionFound);
                if !click(driver, &action.handle).await {
                    warn!(item = %report.item_id, "failed clicking download action");
                    report.outcome = ItemOutcome::ClickFailed;
                    self.clean_up(driver, &mut report).await;
                    return report;
                }
                report.advance(ItemState::ActionClicked);
            }
            Some(ActionResolution::ScriptClicked(_)) => {
                report.advance(ItemState::ActionFound);
                report.advance(ItemState::ActionClicked);
            }
            None => {
                info!(item = %report.item_id, "no download action appeared");
                report.outcome = ItemOutcome::NoDownloadTriggered;
                self.clean_up(driver, &mut report).await;
                return report;
            }
        }

        report.advance(ItemState::AwaitingFile);
        match self.watcher.wait_for_download(&mut attempt).await {
            DownloadStatus::Completed(path) => {
                info!(item = %report.item_id, path = %path.display(), "download saved");
                report.advance(ItemState::Completed);
                report.outcome = ItemOutcome::Completed(path);
            }
            DownloadStatus::TimedOut { in_progress } => {
                match &in_progress {
                    Some(partial) => warn!(
                        item = %report.item_id,
                        partial = %partial.display(),
                        "download still in progress when the wait expired"
                    ),
                    None => warn!(item = %report.item_id, "no new file detected after download click"),
                }
                report.advance(ItemState::TimedOut);
                report.outcome = ItemOutcome::TimedOut { in_progress };
            }
        }

        self.clean_up(driver, &mut report).await;
        report
    }

    async fn clean_up<D: PortalDriver>(&self, driver: &mut D, report: &mut ItemReport) {
        dismiss_player(driver).await;
        report.advance(ItemState::Cleaned);
    }
}

/// Script click first, native click when the script path fails.
async fn click<D: PortalDriver>(driver: &mut D, handle: &D::Handle) -> bool {
    let err = match driver.script_click(handle).await {
        Ok(()) => return true,
        Err(err) => err,
    };
    debug!(error = %err, "script click failed, trying native click");
    match driver.native_click(handle).await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "native click failed");
            false
        }
    }
}

async fn dismiss_player<D: PortalDriver>(driver: &mut D) {
    let close = match driver.query(Scope::Document, &CLOSE_CONTROL).await {
        Ok(found) => found.into_iter().next(),
        Err(err) => {
            debug!(error = %err, "close control query failed");
            None
        }
    };
    if let Some(close) = close {
        match driver.script_click(&close.handle).await {
            Ok(()) => {
                debug!("closed player");
                return;
            }
            Err(err) => debug!(error = %err, "close click failed"),
        }
    }
    if let Err(err) = driver.dispatch_escape().await {
        debug!(error = %err, "escape dispatch failed");
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration).await;
    }
}
