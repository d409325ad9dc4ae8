use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use harvest_core::harvest::{HarvestRun, HarvestSession};
use harvest_core::{HarvestConfig, HarvestRequest, HarvestRequestPayload, LaunchOverrides};
use serde::Serialize;
use tracing::{info, warn};

use crate::{DisplayFallback, Result};

/// Runs one harvest and waits for it to finish.
#[derive(Args, Debug, Clone)]
pub struct HarvestArgs {
    /// Destination number to filter call history by
    #[arg(long)]
    pub destination: Option<String>,
    /// First day of the range (YYYY-MM-DD)
    #[arg(long)]
    pub start_date: Option<String>,
    /// Last day of the range (YYYY-MM-DD)
    #[arg(long)]
    pub end_date: Option<String>,
    /// JSON payload file with destination, start_date and end_date; `-` reads stdin
    #[arg(long, value_name = "FILE", conflicts_with_all = ["destination", "start_date", "end_date"])]
    pub request: Option<PathBuf>,
}

impl HarvestArgs {
    pub fn to_request(&self) -> Result<HarvestRequest> {
        if let Some(path) = &self.request {
            let raw = read_payload(path)?;
            return Ok(HarvestRequest::from_json(&raw)?);
        }
        let payload = HarvestRequestPayload {
            destination: self.destination.clone(),
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
        };
        Ok(payload.validate()?)
    }
}

fn read_payload(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut raw = String::new();
        io::stdin().read_to_string(&mut raw)?;
        Ok(raw)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

#[derive(Debug, Serialize)]
pub struct HarvestReport {
    pub request: HarvestRequest,
    pub status: String,
    #[serde(flatten)]
    pub run: HarvestRun,
}

impl HarvestReport {
    pub fn new(request: HarvestRequest, run: HarvestRun) -> Self {
        Self {
            request,
            status: run.outcome.to_string(),
            run,
        }
    }
}

impl DisplayFallback for HarvestReport {
    fn display(&self) -> String {
        let mut lines = vec![self.status.clone()];
        if let Some(stats) = self.run.outcome.stats() {
            for path in &stats.saved {
                lines.push(format!("  saved {}", path.display()));
            }
        }
        lines.join("\n")
    }
}

/// Blocks on a single-threaded runtime until the harvest ends or the process is
/// asked to stop (Ctrl-C or SIGTERM).
pub fn execute(
    config: HarvestConfig,
    request: HarvestRequest,
    overrides: LaunchOverrides,
) -> Result<HarvestReport> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let session = HarvestSession::chromium(Arc::new(config), overrides);
    let run = runtime.block_on(session.run_until(&request, interrupted()));
    Ok(HarvestReport::new(request, run))
}

async fn interrupted() {
    tokio::select! {
        _ = ctrl_c() => info!("Ctrl-C received, stopping harvest"),
        _ = terminate() => info!("SIGTERM received, stopping harvest"),
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            warn!(error = %err, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
