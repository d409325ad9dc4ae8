use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{Locator, Needle, PortalDriver, Scope};
use crate::config::{PacingSection, TimeoutSection};
use crate::poll::PollPolicy;

/// Dedicated expand affordance inside a top-level row.
pub const EXPANDER: Locator = Locator::tags(&["span"]).all(&[Needle::class("fa-arrow-circle-right")]);

/// A top-level results row, freshly resolved from the live table.
#[derive(Debug)]
pub struct ResultRow<H> {
    pub handle: H,
    /// Best-effort DOM id; empty when the row has none.
    pub id: String,
    pub position: usize,
    pub expander: Option<H>,
}

#[derive(Debug)]
pub struct ChildRow<H> {
    pub handle: H,
    pub id: String,
}

/// One unit of work produced by a row.
#[derive(Debug)]
pub enum WorkItem<H> {
    Child(ChildRow<H>),
    /// The row had no nested rows and is processed itself.
    Row,
}

#[derive(Debug, Clone)]
pub struct RowTraversal {
    table_wait: PollPolicy,
    row_wait: PollPolicy,
    expand_settle: Duration,
}

impl RowTraversal {
    pub fn new(timeouts: &TimeoutSection, pacing: &PacingSection) -> Self {
        Self {
            table_wait: timeouts.table_policy(),
            row_wait: timeouts.row_policy(),
            expand_settle: pacing.expand_settle(),
        }
    }

    pub async fn wait_for_table<D: PortalDriver>(&self, driver: &mut D) -> bool {
        let mut poller = self.table_wait.start();
        loop {
            match driver.table_present().await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => debug!(error = %err, "table probe failed"),
            }
            if !poller.tick().await {
                return false;
            }
        }
    }

    /// Polls until the table has rows; returns how many were present, or zero
    /// once the wait expires.
    pub async fn wait_for_rows<D: PortalDriver>(&self, driver: &mut D) -> usize {
        let mut poller = self.row_wait.start();
        loop {
            let count = self.list_top_rows(driver).await.len();
            if count > 0 {
                return count;
            }
            if !poller.tick().await {
                return 0;
            }
        }
    }

    pub async fn list_top_rows<D: PortalDriver>(&self, driver: &mut D) -> Vec<D::Handle> {
        match driver.result_rows().await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "could not query result rows");
                Vec::new()
            }
        }
    }

    /// Re-queries the live table and resolves the row now at `position`.
    /// `None` means the table shrank below it.
    pub async fn row_at<D: PortalDriver>(
        &self,
        driver: &mut D,
        position: usize,
    ) -> Option<ResultRow<D::Handle>> {
        let handle = self
            .list_top_rows(driver)
            .await
            .into_iter()
            .nth(position)?;
        let id = driver
            .attribute(&handle, "id")
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        let expander = match driver.query(Scope::Within(&handle), &EXPANDER).await {
            Ok(found) => found.into_iter().next().map(|snapshot| snapshot.handle),
            Err(err) => {
                warn!(row = position + 1, error = %err, "expander query failed");
                None
            }
        };
        Some(ResultRow {
            handle,
            id,
            position,
            expander,
        })
    }

    /// Clicks the expander, or the row itself when there is none. Failures are
    /// normal here (already expanded, nothing nested) and only logged.
    pub async fn expand<D: PortalDriver>(&self, driver: &mut D, row: &ResultRow<D::Handle>) -> bool {
        let row_number = row.position + 1;
        let (target, via) = match &row.expander {
            Some(expander) => (expander, "arrow"),
            None => (&row.handle, "row click"),
        };
        let expanded = match driver.script_click(target).await {
            Ok(()) => {
                info!(row = row_number, via, "expanded row");
                true
            }
            Err(err) => {
                debug!(row = row_number, via, error = %err, "expand click failed");
                false
            }
        };
        if expanded && !self.expand_settle.is_zero() {
            sleep(self.expand_settle).await;
        }
        expanded
    }

    /// Nested rows under `row`, falling back to the row itself.
    pub async fn children_of<D: PortalDriver>(
        &self,
        driver: &mut D,
        row: &ResultRow<D::Handle>,
    ) -> Vec<WorkItem<D::Handle>> {
        if row.id.is_empty() {
            return vec![WorkItem::Row];
        }
        let handles = match driver.child_rows(&row.id).await {
            Ok(handles) => handles,
            Err(err) => {
                warn!(row = row.position + 1, error = %err, "child row query failed");
                Vec::new()
            }
        };
        if handles.is_empty() {
            return vec![WorkItem::Row];
        }

        let mut items = Vec::with_capacity(handles.len());
        for handle in handles {
            let id = driver
                .attribute(&handle, "id")
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
            items.push(WorkItem::Child(ChildRow { handle, id }));
        }
        items
    }
}
