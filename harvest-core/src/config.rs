use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::poll::PollPolicy;

pub const ENV_PORTAL_USER: &str = "HARVEST_PORTAL_USER";
pub const ENV_PORTAL_PASS: &str = "HARVEST_PORTAL_PASS";
pub const ENV_HEADLESS: &str = "HARVEST_HEADLESS";
pub const ENV_DOWNLOAD_DIR: &str = "HARVEST_DOWNLOAD_DIR";

/// Everything a harvest run needs, passed explicitly into the session.
///
/// Every section falls back to the values the portal was tuned against, so an
/// empty file (or no file at all) is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct HarvestConfig {
    pub portal: PortalSection,
    pub chromium: ChromiumSection,
    pub downloads: DownloadsSection,
    pub selectors: SelectorSection,
    pub timeouts: TimeoutSection,
    pub pacing: PacingSection,
}

impl HarvestConfig {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("portal.login_url", &self.portal.login_url),
            ("portal.call_history_url", &self.portal.call_history_url),
        ] {
            url::Url::parse(value).map_err(|err| ConfigError::Invalid {
                field,
                reason: format!("{value}: {err}"),
            })?;
        }
        if self.downloads.partial_suffixes.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::Invalid {
                field: "downloads.partial_suffixes",
                reason: "suffixes must not be empty".into(),
            });
        }
        if self.timeouts.row_poll_ms == 0
            || self.timeouts.player_poll_ms == 0
            || self.downloads.detect_poll_ms == 0
            || self.downloads.partial_poll_ms == 0
        {
            return Err(ConfigError::Invalid {
                field: "poll interval",
                reason: "poll intervals must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(user) = lookup(ENV_PORTAL_USER).filter(|v| !v.is_empty()) {
            self.portal.username = user;
        }
        if let Some(pass) = lookup(ENV_PORTAL_PASS).filter(|v| !v.is_empty()) {
            self.portal.password = pass;
        }
        if let Some(headless) = lookup(ENV_HEADLESS) {
            self.chromium.headless = !matches!(headless.trim(), "0" | "false" | "False");
        }
        if let Some(dir) = lookup(ENV_DOWNLOAD_DIR).filter(|v| !v.is_empty()) {
            self.downloads.directory = PathBuf::from(dir);
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalSection {
    pub login_url: String,
    pub call_history_url: String,
    pub username: String,
    pub password: String,
}

impl Default for PortalSection {
    fn default() -> Self {
        Self {
            login_url: "https://mt3.suretel.co.za/pbx/login.php".into(),
            call_history_url: "https://mt3.suretel.co.za/pbx/simplecdrs.php".into(),
            username: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<PathBuf>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub window: [u32; 2],
    pub request_timeout_seconds: Option<u64>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: false,
            disable_gpu: true,
            window: [1600, 1200],
            request_timeout_seconds: Some(60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadsSection {
    pub directory: PathBuf,
    pub partial_suffixes: Vec<String>,
    pub settle_seconds: u64,
    pub detect_timeout_seconds: u64,
    pub detect_poll_ms: u64,
    pub partial_timeout_seconds: u64,
    pub partial_poll_ms: u64,
    pub clock_skew_ms: u64,
}

impl DownloadsSection {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_seconds)
    }

    pub fn detect_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.detect_poll_ms),
            Duration::from_secs(self.detect_timeout_seconds),
        )
    }

    pub fn partial_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.partial_poll_ms),
            Duration::from_secs(self.partial_timeout_seconds),
        )
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_millis(self.clock_skew_ms)
    }
}

impl Default for DownloadsSection {
    fn default() -> Self {
        Self {
            directory: default_download_dir(),
            partial_suffixes: vec![".crdownload".into()],
            settle_seconds: 8,
            detect_timeout_seconds: 30,
            detect_poll_ms: 700,
            partial_timeout_seconds: 30,
            partial_poll_ms: 800,
            clock_skew_ms: 1000,
        }
    }
}

fn default_download_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join("Downloads"))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorSection {
    pub results_table: String,
    pub result_row: String,
    pub child_table_suffix: String,
    pub child_row: String,
}

impl Default for SelectorSection {
    fn default() -> Self {
        Self {
            results_table: "table#list1".into(),
            result_row: "tr.jqgrow.ui-row-ltr".into(),
            child_table_suffix: "_t".into(),
            child_row: "tr.jqgrow".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutSection {
    pub login_wait_seconds: u64,
    pub filter_wait_seconds: u64,
    pub table_wait_seconds: u64,
    pub row_poll_ms: u64,
    pub row_wait_seconds: u64,
    pub player_wait_seconds: u64,
    pub player_poll_ms: u64,
}

impl TimeoutSection {
    pub fn login_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(500),
            Duration::from_secs(self.login_wait_seconds),
        )
    }

    pub fn filter_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(500),
            Duration::from_secs(self.filter_wait_seconds),
        )
    }

    pub fn table_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(500),
            Duration::from_secs(self.table_wait_seconds),
        )
    }

    pub fn row_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.row_poll_ms),
            Duration::from_secs(self.row_wait_seconds),
        )
    }

    pub fn player_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.player_poll_ms),
            Duration::from_secs(self.player_wait_seconds),
        )
    }
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            login_wait_seconds: 30,
            filter_wait_seconds: 25,
            table_wait_seconds: 40,
            row_poll_ms: 1000,
            row_wait_seconds: 25,
            player_wait_seconds: 12,
            player_poll_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingSection {
    pub click_settle_ms: u64,
    pub scroll_settle_ms: u64,
    pub expand_settle_ms: u64,
    pub login_settle_ms: u64,
    pub filter_settle_ms: u64,
    pub item_gap_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl PacingSection {
    /// No pauses at all; used by tests and dry runs against local fixtures.
    pub fn immediate() -> Self {
        Self {
            click_settle_ms: 0,
            scroll_settle_ms: 0,
            expand_settle_ms: 0,
            login_settle_ms: 0,
            filter_settle_ms: 0,
            item_gap_ms: 0,
            shutdown_grace_ms: 0,
        }
    }

    pub fn click_settle(&self) -> Duration {
        Duration::from_millis(self.click_settle_ms)
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }

    pub fn expand_settle(&self) -> Duration {
        Duration::from_millis(self.expand_settle_ms)
    }

    pub fn login_settle(&self) -> Duration {
        Duration::from_millis(self.login_settle_ms)
    }

    pub fn filter_settle(&self) -> Duration {
        Duration::from_millis(self.filter_settle_ms)
    }

    pub fn item_gap(&self) -> Duration {
        Duration::from_millis(self.item_gap_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            click_settle_ms: 120,
            scroll_settle_ms: 200,
            expand_settle_ms: 600,
            login_settle_ms: 2000,
            filter_settle_ms: 1000,
            item_gap_ms: 1000,
            shutdown_grace_ms: 2000,
        }
    }
}

/// Loads and validates a config file, then applies environment overrides.
pub fn load_harvest_config<P: AsRef<Path>>(path: P) -> Result<HarvestConfig> {
    let mut config: HarvestConfig = load_toml(path)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
