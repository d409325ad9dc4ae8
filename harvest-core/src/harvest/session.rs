use std::fmt;
use std::future::{self, Future};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::browser::{
    BrowserError, ChromiumPortalLauncher, LaunchOverrides, PortalLauncher, PortalSession,
};
use crate::config::HarvestConfig;
use crate::request::HarvestRequest;

use super::orchestrator::{DownloadOrchestrator, ItemReport};
use super::stats::HarvestStats;
use super::watcher::{DirectoryWatcher, DownloadWatcher};

pub const ATTEMPTED_STATUS: &str = "Downloads attempted (check Downloads folder)";

/// Terminal summary of one harvest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum HarvestOutcome {
    NoTable,
    NoRows,
    Attempted(HarvestStats),
    Failed(String),
}

impl HarvestOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, HarvestOutcome::Failed(_))
    }

    pub fn stats(&self) -> Option<&HarvestStats> {
        match self {
            HarvestOutcome::Attempted(stats) => Some(stats),
            _ => None,
        }
    }
}

impl fmt::Display for HarvestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarvestOutcome::NoTable => f.write_str("No table found"),
            HarvestOutcome::NoRows => f.write_str("No rows"),
            HarvestOutcome::Attempted(stats) => write!(
                f,
                "{ATTEMPTED_STATUS}: {} completed, {} timed out, {} without download, {} without trigger, {} click failures",
                stats.downloads_completed,
                stats.downloads_timed_out,
                stats.no_download_triggered,
                stats.no_trigger,
                stats.click_failures,
            ),
            HarvestOutcome::Failed(message) => write!(f, "Error: {message}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestRun {
    pub outcome: HarvestOutcome,
    pub items: Vec<ItemReport>,
}

impl HarvestRun {
    pub fn new(outcome: HarvestOutcome) -> Self {
        Self {
            outcome,
            items: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(HarvestOutcome::Failed(message.into()))
    }
}

/// Owns one browser session from launch to teardown and runs the engine once.
pub struct HarvestSession<L, W> {
    launcher: L,
    orchestrator: DownloadOrchestrator<W>,
    shutdown_grace: Duration,
}

impl HarvestSession<ChromiumPortalLauncher, DirectoryWatcher> {
    pub fn chromium(config: Arc<HarvestConfig>, overrides: LaunchOverrides) -> Self {
        let watcher = DirectoryWatcher::new(config.downloads.directory.clone(), &config.downloads);
        let launcher = ChromiumPortalLauncher::new(Arc::clone(&config)).with_overrides(overrides);
        Self::new(&config, launcher, watcher)
    }
}

impl<L, W> HarvestSession<L, W>
where
    L: PortalLauncher,
    W: DownloadWatcher,
{
    pub fn new(config: &HarvestConfig, launcher: L, watcher: W) -> Self {
        Self {
            launcher,
            orchestrator: DownloadOrchestrator::new(config, watcher),
            shutdown_grace: config.pacing.shutdown_grace(),
        }
    }

    pub async fn run(&self, request: &HarvestRequest) -> HarvestRun {
        self.run_until(request, future::pending()).await
    }

    /// Runs one harvest, abandoning it when `interrupt` resolves first. The
    /// browser is shut down on every path once it has been launched.
    pub async fn run_until<F>(&self, request: &HarvestRequest, interrupt: F) -> HarvestRun
    where
        F: Future<Output = ()>,
    {
        if let Err(err) = self.orchestrator.prepare() {
            error!(error = %err, "download directory unavailable");
            return HarvestRun::failed(format!("download directory unavailable: {err}"));
        }

        info!(%request, "starting harvest");
        let mut session = match self.launcher.open().await {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, "could not open browser session");
                return HarvestRun::failed(err.to_string());
            }
        };

        let (run, interrupted) = {
            let work = async {
                session.sign_in_and_filter(request).await?;
                Ok::<_, BrowserError>(self.orchestrator.run(&mut session).await)
            };
            tokio::select! {
                result = work => match result {
                    Ok(run) => (run, false),
                    Err(err) => {
                        error!(error = %err, "session setup failed");
                        (HarvestRun::failed(err.to_string()), false)
                    }
                },
                () = interrupt => {
                    warn!("harvest interrupted");
                    (HarvestRun::failed("interrupted"), true)
                }
            }
        };

        if !interrupted && !self.shutdown_grace.is_zero() {
            sleep(self.shutdown_grace).await;
        }
        if let Err(err) = session.shutdown().await {
            warn!(error = %err, "browser shutdown failed");
        }
        info!(outcome = %run.outcome, "harvest finished");
        run
    }
}
