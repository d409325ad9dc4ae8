mod automation;
mod chromium;
mod driver;
mod error;

pub use automation::{BrowserAutomation, BrowserLauncher, LaunchOverrides};
pub use chromium::{ChromiumPortal, ChromiumPortalLauncher};
pub use driver::{
    ElementInfo, ElementSnapshot, Field, Locator, Needle, PortalDriver, PortalLauncher,
    PortalSession, Scope,
};
pub use error::{BrowserError, BrowserResult};
