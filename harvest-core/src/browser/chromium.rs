use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::HarvestConfig;
use crate::poll::PollPolicy;
use crate::request::HarvestRequest;

use super::automation::{BrowserAutomation, BrowserLauncher, LaunchOverrides};
use super::driver::{
    ElementInfo, ElementSnapshot, Locator, PortalDriver, PortalLauncher, PortalSession, Scope,
};
use super::error::{BrowserError, BrowserResult};

const MARK_ATTR: &str = "data-harvest-mark";

/// Opens [`ChromiumPortal`] sessions backed by a fresh Chromium process each time.
#[derive(Debug, Clone)]
pub struct ChromiumPortalLauncher {
    launcher: BrowserLauncher,
    config: Arc<HarvestConfig>,
    overrides: LaunchOverrides,
}

impl ChromiumPortalLauncher {
    pub fn new(config: Arc<HarvestConfig>) -> Self {
        Self {
            launcher: BrowserLauncher::new(Arc::clone(&config)),
            config,
            overrides: LaunchOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: LaunchOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

#[async_trait(?Send)]
impl PortalLauncher for ChromiumPortalLauncher {
    type Session = ChromiumPortal;

    async fn open(&self) -> BrowserResult<ChromiumPortal> {
        let automation = self
            .launcher
            .launch_with_overrides(self.overrides.clone())
            .await?;
        match automation.new_page().await {
            Ok(page) => Ok(ChromiumPortal {
                automation,
                page,
                config: Arc::clone(&self.config),
                marks: 0,
            }),
            Err(err) => {
                automation.shutdown().await?;
                Err(err)
            }
        }
    }
}

#[derive(Debug)]
pub struct ChromiumPortal {
    automation: BrowserAutomation,
    page: Page,
    config: Arc<HarvestConfig>,
    marks: u64,
}

impl ChromiumPortal {
    fn next_mark(&mut self) -> String {
        self.marks += 1;
        format!("h{}", self.marks)
    }

    async fn find_marked(&self, mark: &str) -> BrowserResult<Element> {
        Ok(self
            .page
            .find_element(format!("[{MARK_ATTR}='{mark}']"))
            .await?)
    }

    /// Runs a script that tags at most one element with the mark and reports
    /// whether it did, then resolves the tagged element.
    async fn mark_with(&mut self, template: &str, args: &[(&str, &str)]) -> BrowserResult<Option<Element>> {
        let mark = self.next_mark();
        let mut script = template.replace("__MARK__", &js_string(&mark)?);
        for (placeholder, value) in args {
            script = script.replace(placeholder, &js_string(value)?);
        }
        let tagged = self
            .page
            .evaluate(script.as_str())
            .await?
            .into_value::<bool>()
            .unwrap_or(false);
        if !tagged {
            return Ok(None);
        }
        self.find_marked(&mark).await.map(Some)
    }

    async fn wait_for_marked(
        &mut self,
        template: &str,
        args: &[(&str, &str)],
        policy: PollPolicy,
        what: &str,
    ) -> BrowserResult<Element> {
        let mut poller = policy.start();
        loop {
            if let Some(element) = self.mark_with(template, args).await? {
                return Ok(element);
            }
            if !poller.tick().await {
                return Err(BrowserError::Timeout(what.to_string()));
            }
        }
    }

    async fn wait_for_selector(&self, selector: &str, policy: PollPolicy) -> BrowserResult<Element> {
        let mut poller = policy.start();
        loop {
            if let Ok(element) = self.page.find_element(selector).await {
                return Ok(element);
            }
            if !poller.tick().await {
                return Err(BrowserError::Timeout(selector.to_string()));
            }
        }
    }

    async fn climb(&mut self, element: &Element, tags: &[&str]) -> BrowserResult<Option<Element>> {
        let mark = self.next_mark();
        let function = CLIMB_FN
            .replace("__SELECTOR__", &js_string(&tags.join(", "))?)
            .replace("__MARK__", &js_string(&mark)?);
        let returns = element.call_js_fn(function, false).await?;
        let tagged = returns
            .result
            .value
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        if !tagged {
            return Ok(None);
        }
        self.find_marked(&mark).await.map(Some)
    }

    /// Tags every match of `css` under `scope` with a fresh mark, then resolves
    /// the tagged elements from the document. The scope is reached through its
    /// remote object, which outlives the node ids discarded by document queries.
    async fn find_within(&mut self, scope: &Element, css: &str) -> BrowserResult<Vec<Element>> {
        let mark = self.next_mark();
        let function = MARK_WITHIN_FN
            .replace("__SELECTOR__", &js_string(css)?)
            .replace("__MARK__", &js_string(&mark)?);
        let returns = scope.call_js_fn(function, false).await?;
        let tagged = returns
            .result
            .value
            .and_then(|value| value.as_u64())
            .unwrap_or(0);
        if tagged == 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .page
            .find_elements(format!("[{MARK_ATTR}='{mark}']"))
            .await?)
    }

    async fn set_value(&self, element: &Element, value: &str) -> BrowserResult<()> {
        let function = SET_VALUE_FN.replace("__VALUE__", &js_string(value)?);
        element.call_js_fn(function, false).await?;
        Ok(())
    }

    async fn type_into(&self, element: &Element, text: &str) -> BrowserResult<()> {
        element.click().await?;
        element.type_str(text).await?;
        Ok(())
    }

    async fn submit_login(&mut self) -> BrowserResult<()> {
        let args = [("__TAG__", "button"), ("__TEXT__", "Login")];
        if let Some(button) = self.mark_with(MARK_BY_TEXT_SCRIPT, &args).await? {
            if button.click().await.is_ok() {
                return Ok(());
            }
        }
        if let Ok(button) = self.page.find_element("button[type='submit']").await {
            if button.click().await.is_ok() {
                return Ok(());
            }
        }
        let script = CLICK_BY_TEXT_SCRIPT
            .replace("__TAG__", &js_string("button")?)
            .replace("__TEXT__", &js_string("Login")?);
        match self.run_click_script(&script).await? {
            Some(_) => Ok(()),
            None => Err(BrowserError::NotFound("login button".into())),
        }
    }

    async fn click_filter(&mut self, group_label: Option<&str>) -> BrowserResult<()> {
        let button = match group_label {
            Some(label) => {
                self.mark_with(MARK_GROUP_BUTTON_SCRIPT, &[("__LABEL__", label), ("__TEXT__", "Filter")])
                    .await?
            }
            None => {
                self.mark_with(MARK_BY_TEXT_SCRIPT, &[("__TAG__", "button"), ("__TEXT__", "Filter")])
                    .await?
            }
        };
        if let Some(button) = button {
            if self.script_click(&button).await.is_ok() {
                return Ok(());
            }
        }
        let script = CLICK_BY_TEXT_SCRIPT
            .replace("__TAG__", &js_string("button")?)
            .replace("__TEXT__", &js_string("Filter")?);
        if self.run_click_script(&script).await?.is_none() {
            return Err(BrowserError::NotFound("filter button".into()));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl PortalDriver for ChromiumPortal {
    type Handle = Element;

    async fn table_present(&mut self) -> BrowserResult<bool> {
        let selector = self.config.selectors.results_table.as_str();
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn result_rows(&mut self) -> BrowserResult<Vec<Element>> {
        let selectors = &self.config.selectors;
        let table = match self.page.find_element(selectors.results_table.as_str()).await {
            Ok(table) => table,
            Err(_) => return Ok(Vec::new()),
        };
        let row_selector = selectors.result_row.clone();
        self.find_within(&table, &row_selector).await
    }

    async fn child_rows(&mut self, parent_id: &str) -> BrowserResult<Vec<Element>> {
        let selectors = &self.config.selectors;
        let selector = child_rows_selector(
            parent_id,
            &selectors.child_table_suffix,
            &selectors.child_row,
        );
        Ok(self.page.find_elements(selector.as_str()).await?)
    }

    async fn attribute(&mut self, handle: &Element, name: &str) -> BrowserResult<Option<String>> {
        Ok(handle.attribute(name).await?)
    }

    async fn query(
        &mut self,
        scope: Scope<'_, Element>,
        locator: &Locator,
    ) -> BrowserResult<Vec<ElementSnapshot<Element>>> {
        let css = locator.to_css();
        let found = match scope {
            Scope::Document => self.page.find_elements(css.as_str()).await?,
            Scope::Within(element) => self.find_within(element, &css).await?,
        };

        let mut snapshots = Vec::new();
        for element in found {
            let info = match describe(&element).await {
                Ok(info) => info,
                Err(err) => {
                    debug!(error = %err, "skipping element that could not be described");
                    continue;
                }
            };
            if !locator.matches(&info) {
                continue;
            }
            if locator.climb_to.is_empty() {
                snapshots.push(ElementSnapshot {
                    handle: element,
                    info,
                });
                continue;
            }
            if let Some(ancestor) = self.climb(&element, locator.climb_to).await? {
                let info = describe(&ancestor).await?;
                snapshots.push(ElementSnapshot {
                    handle: ancestor,
                    info,
                });
            }
        }
        Ok(snapshots)
    }

    async fn scroll_into_view(&mut self, handle: &Element) -> BrowserResult<()> {
        handle.call_js_fn(SCROLL_FN, false).await?;
        Ok(())
    }

    async fn script_click(&mut self, handle: &Element) -> BrowserResult<()> {
        handle.call_js_fn(SCROLL_FN, false).await?;
        sleep(self.config.pacing.click_settle()).await;
        handle.call_js_fn(CLICK_FN, false).await?;
        Ok(())
    }

    async fn native_click(&mut self, handle: &Element) -> BrowserResult<()> {
        handle.click().await?;
        Ok(())
    }

    async fn run_click_script(&mut self, script: &str) -> BrowserResult<Option<String>> {
        let result = self.page.evaluate(script).await?;
        Ok(result
            .into_value::<Option<String>>()
            .ok()
            .flatten()
            .filter(|value| !value.is_empty()))
    }

    async fn dispatch_escape(&mut self) -> BrowserResult<()> {
        self.page.evaluate(ESCAPE_SCRIPT).await?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl PortalSession for ChromiumPortal {
    async fn sign_in_and_filter(&mut self, request: &HarvestRequest) -> BrowserResult<()> {
        let config = Arc::clone(&self.config);
        let portal = &config.portal;

        info!(url = %portal.login_url, "Logging in");
        self.automation.goto(&self.page, &portal.login_url).await?;
        let username = self
            .wait_for_selector("input[name='username']", config.timeouts.login_policy())
            .await?;
        self.type_into(&username, &portal.username).await?;
        let password = self.page.find_element("input[name='password']").await?;
        self.type_into(&password, &portal.password).await?;
        self.submit_login().await?;
        sleep(config.pacing.login_settle()).await;
        info!("Logged in");

        info!(url = %portal.call_history_url, "Opening call history");
        self.automation
            .goto(&self.page, &portal.call_history_url)
            .await?;
        sleep(config.pacing.filter_settle()).await;

        let (start, end) = (request.start_bound(), request.end_bound());
        info!(start = %start, end = %end, "Applying date range");
        let filter_policy = config.timeouts.filter_policy();
        let start_input = self
            .wait_for_marked(
                MARK_LABELLED_INPUT_SCRIPT,
                &[("__LABEL__", "Start date")],
                filter_policy,
                "start date input",
            )
            .await?;
        let end_input = self
            .wait_for_marked(
                MARK_LABELLED_INPUT_SCRIPT,
                &[("__LABEL__", "End date")],
                filter_policy,
                "end date input",
            )
            .await?;
        self.set_value(&start_input, &start).await?;
        self.set_value(&end_input, &end).await?;
        sleep(config.pacing.scroll_settle()).await;
        self.click_filter(None).await?;
        sleep(config.pacing.filter_settle()).await;
        info!("Date filter applied");

        info!(destination = %request.destination(), "Filtering destination");
        let destination = self
            .wait_for_marked(
                MARK_LABELLED_INPUT_SCRIPT,
                &[("__LABEL__", "Destination")],
                filter_policy,
                "destination input",
            )
            .await?;
        self.set_value(&destination, "").await?;
        self.type_into(&destination, request.destination()).await?;
        sleep(config.pacing.scroll_settle()).await;
        self.click_filter(Some("Destination")).await?;
        sleep(config.pacing.filter_settle()).await;
        info!("Destination filter applied");
        Ok(())
    }

    async fn shutdown(self) -> BrowserResult<()> {
        let ChromiumPortal {
            automation, page, ..
        } = self;
        drop(page);
        automation.shutdown().await
    }
}

async fn describe(element: &Element) -> BrowserResult<ElementInfo> {
    let returns = element.call_js_fn(DESCRIBE_FN, false).await?;
    let raw = returns
        .result
        .value
        .and_then(|value| value.as_str().map(str::to_owned))
        .ok_or_else(|| BrowserError::Script("element description returned no value".into()))?;
    serde_json::from_str(&raw).map_err(|err| BrowserError::Script(err.to_string()))
}

fn js_string(value: &str) -> BrowserResult<String> {
    serde_json::to_string(value).map_err(|err| BrowserError::Script(err.to_string()))
}

fn css_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Rows of the sub-table whose id is `<parent_id><suffix>`, optionally behind a
/// grid prefix ending in `_`. Ends-with matching keeps row `1` from picking up
/// the sub-table of row `11`.
fn child_rows_selector(parent_id: &str, suffix: &str, child_row: &str) -> String {
    let table_id = format!("{}{}", css_escape(parent_id), css_escape(suffix));
    format!("table[id='{table_id}'] {child_row}, table[id$='_{table_id}'] {child_row}")
}

const DESCRIBE_FN: &str = r#"function() {
    const text = (value) => (value == null ? '' : String(value));
    const style = window.getComputedStyle(this);
    const boxed = this.getClientRects().length > 0;
    return JSON.stringify({
        tag: text(this.tagName).toLowerCase(),
        id: text(this.id),
        class: text(this.getAttribute('class')),
        href: text(this.href || this.getAttribute('href')),
        onclick: text(this.getAttribute('onclick')),
        dismiss: text(this.getAttribute('data-dismiss')),
        text: text(this.innerText).trim(),
        visible: boxed && style.visibility !== 'hidden' && style.display !== 'none',
    });
}"#;

const CLIMB_FN: &str = r#"function() {
    const parent = this.parentElement;
    const target = parent ? parent.closest(__SELECTOR__) : null;
    if (!target) {
        return false;
    }
    target.setAttribute('data-harvest-mark', __MARK__);
    return true;
}"#;

const MARK_WITHIN_FN: &str = r#"function() {
    const matches = this.querySelectorAll(__SELECTOR__);
    matches.forEach((el) => el.setAttribute('data-harvest-mark', __MARK__));
    return matches.length;
}"#;

const SCROLL_FN: &str = "function() { this.scrollIntoView({ block: 'center' }); }";

const CLICK_FN: &str = "function() { this.click(); }";

const SET_VALUE_FN: &str = r#"function() {
    this.value = __VALUE__;
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
}"#;

const ESCAPE_SCRIPT: &str =
    "document.dispatchEvent(new KeyboardEvent('keydown', { key: 'Escape', bubbles: true }));";

const MARK_BY_TEXT_SCRIPT: &str = r#"
(() => {
    const needle = __TEXT__;
    const match = [...document.querySelectorAll(__TAG__)].find(el =>
        (el.innerText || el.textContent || '').includes(needle) && !el.disabled);
    if (!match) {
        return false;
    }
    match.setAttribute('data-harvest-mark', __MARK__);
    return true;
})()
"#;

const CLICK_BY_TEXT_SCRIPT: &str = r#"
(() => {
    const needle = __TEXT__;
    const match = [...document.querySelectorAll(__TAG__)].find(el =>
        (el.innerText || el.textContent || '').includes(needle));
    if (!match) {
        return null;
    }
    match.click();
    return match.innerText || needle;
})()
"#;

const MARK_LABELLED_INPUT_SCRIPT: &str = r#"
(() => {
    const label = [...document.querySelectorAll('label')].find(l =>
        (l.textContent || '').includes(__LABEL__));
    if (!label) {
        return false;
    }
    for (let node = label.nextElementSibling; node; node = node.nextElementSibling) {
        if (node.tagName !== 'DIV') {
            continue;
        }
        const input = node.querySelector('input');
        if (input) {
            input.setAttribute('data-harvest-mark', __MARK__);
            return true;
        }
    }
    return false;
})()
"#;

const MARK_GROUP_BUTTON_SCRIPT: &str = r#"
(() => {
    const label = [...document.querySelectorAll('label')].find(l =>
        (l.textContent || '').includes(__LABEL__));
    const group = label ? label.closest('.form-group') : null;
    if (!group) {
        return false;
    }
    const button = [...group.querySelectorAll('button')].find(b =>
        (b.innerText || b.textContent || '').includes(__TEXT__));
    if (!button) {
        return false;
    }
    button.setAttribute('data-harvest-mark', __MARK__);
    return true;
})()
"#;
