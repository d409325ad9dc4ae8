pub mod browser;
pub mod config;
pub mod error;
pub mod harvest;
pub mod poll;
pub mod request;

pub use browser::{
    BrowserError, BrowserResult, ChromiumPortalLauncher, LaunchOverrides, PortalDriver,
    PortalLauncher, PortalSession,
};
pub use config::{load_harvest_config, HarvestConfig};
pub use error::{ConfigError, Result};
pub use harvest::{
    newest_file, DirectoryWatcher, DownloadWatcher, HarvestOutcome, HarvestRun, HarvestSession,
    HarvestStats, ItemOutcome, ItemReport, ItemState,
};
pub use poll::{poll_until, PollPolicy, Poller};
pub use request::{HarvestRequest, HarvestRequestPayload, RequestError};
