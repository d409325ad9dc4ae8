use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ChromiumSection, HarvestConfig};

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub headless: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<HarvestConfig>,
}

impl BrowserLauncher {
    pub fn new(config: Arc<HarvestConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub async fn launch(&self) -> BrowserResult<BrowserAutomation> {
        self.launch_with_overrides(LaunchOverrides::default()).await
    }

    pub async fn launch_with_overrides(
        &self,
        overrides: LaunchOverrides,
    ) -> BrowserResult<BrowserAutomation> {
        let chromium = &self.config.chromium;
        let headless = overrides.headless.unwrap_or(chromium.headless);
        let download_dir = absolute(&self.config.downloads.directory)?;
        std::fs::create_dir_all(&download_dir)?;

        let chromium_config = build_chromium_config(chromium, headless)?;
        info!(
            headless,
            width = chromium.window[0],
            height = chromium.window[1],
            download_dir = %download_dir.display(),
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let automation = BrowserAutomation {
            browser,
            handler_task: Some(handler_task),
            download_dir,
        };
        automation.allow_downloads().await;
        Ok(automation)
    }
}

fn build_chromium_config(section: &ChromiumSection, headless: bool) -> BrowserResult<ChromiumConfig> {
    let [width, height] = section.window;
    let mut builder = ChromiumConfig::builder().viewport(ChromiumViewport {
        width,
        height,
        device_scale_factor: None,
        emulating_mobile: false,
        is_landscape: width >= height,
        has_touch: false,
    });

    if let Some(executable) = &section.executable_path {
        builder = builder.chrome_executable(executable);
    }
    if !headless {
        builder = builder.with_head();
    }
    if !section.sandbox {
        builder = builder.no_sandbox();
    }
    if let Some(timeout) = section.request_timeout_seconds {
        builder = builder.request_timeout(Duration::from_secs(timeout));
    }

    let mut args = vec![
        format!("--window-size={width},{height}"),
        "--disable-dev-shm-usage".to_string(),
        "--autoplay-policy=no-user-gesture-required".to_string(),
        "--disable-features=AudioServiceOutOfProcess,EnableDownloadBubble".to_string(),
        "--no-first-run".to_string(),
        "--password-store=basic".to_string(),
    ];
    if section.disable_gpu {
        args.push("--disable-gpu".into());
    }
    builder = builder.args(args);

    builder.build().map_err(BrowserError::Configuration)
}

fn absolute(path: &Path) -> BrowserResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[derive(Debug)]
pub struct BrowserAutomation {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    download_dir: PathBuf,
}

impl BrowserAutomation {
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub async fn new_page(&self) -> BrowserResult<Page> {
        let params = CreateTargetParams::new("about:blank");
        Ok(self.browser.new_page(params).await?)
    }

    pub async fn goto(&self, page: &Page, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        page.goto(params).await?;
        page.wait_for_navigation().await?;
        Ok(())
    }

    // Headless Chromium rejects downloads unless the behavior is set explicitly.
    async fn allow_downloads(&self) {
        let params = match SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(self.download_dir.to_string_lossy().to_string())
            .build()
        {
            Ok(params) => params,
            Err(err) => {
                debug!(error = %err, "Could not build download behavior params");
                return;
            }
        };
        match self.browser.execute(params).await {
            Ok(_) => info!(download_dir = %self.download_dir.display(), "Download behavior set"),
            Err(err) => debug!(error = %err, "Could not set download behavior"),
        }
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("Shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Err(err) = self.browser.wait().await {
            debug!(error = %err, "Failed to reap browser process");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserAutomation dropped without explicit shutdown");
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headed_config_builds_with_custom_window() {
        let section = ChromiumSection {
            executable_path: Some(PathBuf::from("/usr/bin/chromium")),
            window: [1280, 720],
            ..ChromiumSection::default()
        };
        let config = build_chromium_config(&section, false);
        assert!(config.is_ok());
    }

    #[test]
    fn relative_download_dir_is_anchored_to_cwd() {
        let resolved = absolute(Path::new("recordings")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("recordings"));
    }
}
