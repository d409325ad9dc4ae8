#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use harvest_core::browser::{
    BrowserError, BrowserResult, ElementInfo, ElementSnapshot, Locator, PortalDriver,
    PortalLauncher, PortalSession, Scope,
};
use harvest_core::config::PacingSection;
use harvest_core::{HarvestConfig, HarvestRequest};
use tokio::time::{sleep, Instant};

pub type NodeId = usize;

/// Reference to a fake node, valid until the next click lands anywhere on the
/// page, like a real element whose table was re-rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeHandle {
    pub node: NodeId,
    generation: u64,
}

impl PartialEq<NodeId> for FakeHandle {
    fn eq(&self, other: &NodeId) -> bool {
        self.node == *other
    }
}

pub fn test_config(download_dir: &Path) -> HarvestConfig {
    let mut config = HarvestConfig::default();
    config.downloads.directory = download_dir.to_path_buf();
    config.downloads.partial_suffixes = vec![".crdownload".into()];
    config.pacing = PacingSection::immediate();
    config
}

pub fn request() -> HarvestRequest {
    HarvestRequest::new("0215550100", "2025-03-01", "2025-03-02").unwrap()
}

pub fn element(tag: &str) -> ElementInfo {
    ElementInfo {
        tag: tag.into(),
        visible: true,
        ..Default::default()
    }
}

pub fn anchor(class: &str, href: &str, text: &str) -> ElementInfo {
    ElementInfo {
        class: class.into(),
        href: href.into(),
        text: text.into(),
        ..element("a")
    }
}

pub fn with_class(mut info: ElementInfo, class: &str) -> ElementInfo {
    info.class = class.into();
    info
}

pub fn hidden(mut info: ElementInfo) -> ElementInfo {
    info.visible = false;
    info
}

/// Side effect of clicking a fake element.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Makes a node visible `after` the click.
    Show { node: NodeId, after: Duration },
    /// Hides a node again, as closing the player does.
    Hide { node: NodeId },
    /// Writes `name` into the download directory `after` the click. With
    /// `finalize_after`, the file first lands with the `.crdownload` suffix.
    Download {
        name: String,
        after: Duration,
        finalize_after: Option<Duration>,
    },
    /// Drops every top-level row from `keep` onwards.
    TruncateRows { keep: usize },
}

#[derive(Debug)]
struct Node {
    info: ElementInfo,
    parent: Option<NodeId>,
    revealed_at: Option<Instant>,
    effects: Vec<Effect>,
    script_click_fails: bool,
    native_click_fails: bool,
}

/// In-memory DOM standing in for the portal's results page.
#[derive(Debug, Default)]
pub struct FakePortal {
    nodes: Vec<Node>,
    rows: Vec<NodeId>,
    children: HashMap<String, Vec<NodeId>>,
    table: bool,
    download_dir: PathBuf,
    clicks: Vec<NodeId>,
    native_clicks: Vec<NodeId>,
    escapes: u32,
    escape_fails: bool,
    scripts: u32,
    generation: u64,
    sign_in_error: Option<String>,
    shutdowns: Rc<Cell<u32>>,
}

impl FakePortal {
    pub fn new(download_dir: &Path) -> Self {
        Self {
            table: true,
            download_dir: download_dir.to_path_buf(),
            ..Default::default()
        }
    }

    pub fn without_table(download_dir: &Path) -> Self {
        Self {
            table: false,
            ..Self::new(download_dir)
        }
    }

    pub fn add(&mut self, parent: Option<NodeId>, info: ElementInfo) -> NodeId {
        self.nodes.push(Node {
            info,
            parent,
            revealed_at: None,
            effects: Vec::new(),
            script_click_fails: false,
            native_click_fails: false,
        });
        self.nodes.len() - 1
    }

    pub fn add_row(&mut self, id: &str) -> NodeId {
        let mut info = with_class(element("tr"), "jqgrow ui-row-ltr");
        info.id = id.into();
        let row = self.add(None, info);
        self.rows.push(row);
        row
    }

    pub fn add_expander(&mut self, row: NodeId) -> NodeId {
        self.add(Some(row), with_class(element("span"), "fa fa-arrow-circle-right"))
    }

    /// Adds a nested row under the top-level row with id `parent_id`.
    pub fn add_child_row(&mut self, parent_id: &str, id: &str) -> NodeId {
        let mut info = with_class(element("tr"), "jqgrow");
        info.id = id.into();
        let child = self.add(None, info);
        self.children
            .entry(parent_id.to_string())
            .or_default()
            .push(child);
        child
    }

    pub fn on_click(&mut self, node: NodeId, effect: Effect) {
        self.nodes[node].effects.push(effect);
    }

    pub fn fail_script_click(&mut self, node: NodeId) {
        self.nodes[node].script_click_fails = true;
    }

    pub fn fail_native_click(&mut self, node: NodeId) {
        self.nodes[node].native_click_fails = true;
    }

    pub fn fail_escape(&mut self) {
        self.escape_fails = true;
    }

    /// A handle to `node` that is valid right now.
    pub fn handle(&self, node: NodeId) -> FakeHandle {
        FakeHandle {
            node,
            generation: self.generation,
        }
    }

    pub fn fail_sign_in(&mut self, message: &str) {
        self.sign_in_error = Some(message.into());
    }

    pub fn shutdown_counter(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.shutdowns)
    }

    pub fn clicks(&self) -> &[NodeId] {
        &self.clicks
    }

    pub fn native_clicks(&self) -> &[NodeId] {
        &self.native_clicks
    }

    pub fn escapes(&self) -> u32 {
        self.escapes
    }

    pub fn scripts(&self) -> u32 {
        self.scripts
    }

    fn live(&self, handle: &FakeHandle) -> BrowserResult<NodeId> {
        if handle.generation != self.generation {
            return Err(BrowserError::Script(format!(
                "node {} is detached from the document",
                handle.node
            )));
        }
        Ok(handle.node)
    }

    fn handles(&self, nodes: &[NodeId]) -> Vec<FakeHandle> {
        nodes.iter().map(|&node| self.handle(node)).collect()
    }

    fn visible(&self, node: NodeId) -> bool {
        match self.nodes[node].revealed_at {
            Some(at) => Instant::now() >= at,
            None => self.nodes[node].info.visible,
        }
    }

    fn info(&self, node: NodeId) -> ElementInfo {
        ElementInfo {
            visible: self.visible(node),
            ..self.nodes[node].info.clone()
        }
    }

    fn is_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.nodes[node].parent;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.nodes[parent].parent;
        }
        false
    }

    fn climb(&self, node: NodeId, tags: &[&str]) -> Option<NodeId> {
        let mut current = self.nodes[node].parent;
        while let Some(parent) = current {
            if tags.iter().any(|tag| *tag == self.nodes[parent].info.tag) {
                return Some(parent);
            }
            current = self.nodes[parent].parent;
        }
        None
    }

    fn fire(&mut self, node: NodeId) {
        self.clicks.push(node);
        self.generation += 1;
        for effect in self.nodes[node].effects.clone() {
            match effect {
                Effect::Show { node, after } => {
                    self.nodes[node].revealed_at = Some(Instant::now() + after);
                }
                Effect::Hide { node } => {
                    self.nodes[node].revealed_at = None;
                    self.nodes[node].info.visible = false;
                }
                Effect::Download {
                    name,
                    after,
                    finalize_after,
                } => {
                    let dir = self.download_dir.clone();
                    tokio::spawn(async move {
                        sleep(after).await;
                        let target = dir.join(&name);
                        match finalize_after {
                            None => {
                                let _ = std::fs::write(&target, b"RIFF");
                            }
                            Some(hold) => {
                                let partial = dir.join(format!("{name}.crdownload"));
                                let _ = std::fs::write(&partial, b"RI");
                                sleep(hold).await;
                                let _ = std::fs::rename(&partial, &target);
                            }
                        }
                    });
                }
                Effect::TruncateRows { keep } => self.rows.truncate(keep),
            }
        }
    }
}

#[async_trait(?Send)]
impl PortalDriver for FakePortal {
    type Handle = FakeHandle;

    async fn table_present(&mut self) -> BrowserResult<bool> {
        Ok(self.table)
    }

    async fn result_rows(&mut self) -> BrowserResult<Vec<FakeHandle>> {
        if !self.table {
            return Ok(Vec::new());
        }
        Ok(self.handles(&self.rows))
    }

    async fn child_rows(&mut self, parent_id: &str) -> BrowserResult<Vec<FakeHandle>> {
        let children = self.children.get(parent_id).cloned().unwrap_or_default();
        Ok(self.handles(&children))
    }

    async fn attribute(
        &mut self,
        handle: &FakeHandle,
        name: &str,
    ) -> BrowserResult<Option<String>> {
        let info = &self.nodes[self.live(handle)?].info;
        let value = match name {
            "id" => &info.id,
            "class" => &info.class,
            "href" => &info.href,
            _ => return Ok(None),
        };
        Ok(Some(value.clone()).filter(|value| !value.is_empty()))
    }

    async fn query(
        &mut self,
        scope: Scope<'_, FakeHandle>,
        locator: &Locator,
    ) -> BrowserResult<Vec<ElementSnapshot<FakeHandle>>> {
        let root = match scope {
            Scope::Document => None,
            Scope::Within(handle) => Some(self.live(handle)?),
        };
        let mut found = Vec::new();
        for node in 0..self.nodes.len() {
            if let Some(root) = root {
                if !self.is_descendant(node, root) {
                    continue;
                }
            }
            let info = self.info(node);
            if !locator.matches(&info) {
                continue;
            }
            if locator.climb_to.is_empty() {
                found.push(ElementSnapshot {
                    handle: self.handle(node),
                    info,
                });
            } else if let Some(ancestor) = self.climb(node, locator.climb_to) {
                found.push(ElementSnapshot {
                    handle: self.handle(ancestor),
                    info: self.info(ancestor),
                });
            }
        }
        Ok(found)
    }

    async fn scroll_into_view(&mut self, handle: &FakeHandle) -> BrowserResult<()> {
        self.live(handle)?;
        Ok(())
    }

    async fn script_click(&mut self, handle: &FakeHandle) -> BrowserResult<()> {
        let node = self.live(handle)?;
        if self.nodes[node].script_click_fails {
            return Err(BrowserError::Script("click handler threw".into()));
        }
        self.fire(node);
        Ok(())
    }

    async fn native_click(&mut self, handle: &FakeHandle) -> BrowserResult<()> {
        let node = self.live(handle)?;
        if self.nodes[node].native_click_fails {
            return Err(BrowserError::Unexpected("element not interactable".into()));
        }
        self.native_clicks.push(node);
        self.fire(node);
        Ok(())
    }

    // Mirrors the scan-and-click script: first anchor, visible or not, with a
    // download href or download/save text.
    async fn run_click_script(&mut self, _script: &str) -> BrowserResult<Option<String>> {
        self.scripts += 1;
        let matched = (0..self.nodes.len()).find(|&node| {
            let info = &self.nodes[node].info;
            let href = info.href.to_lowercase();
            let text = info.text.to_lowercase();
            info.tag == "a"
                && (href.contains("download") || text.contains("download") || text.contains("save"))
        });
        let Some(node) = matched else {
            return Ok(None);
        };
        self.fire(node);
        let info = &self.nodes[node].info;
        Ok(Some(if info.href.is_empty() {
            info.text.clone()
        } else {
            info.href.clone()
        }))
    }

    async fn dispatch_escape(&mut self) -> BrowserResult<()> {
        self.escapes += 1;
        if self.escape_fails {
            return Err(BrowserError::Script("keyboard event rejected".into()));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl PortalSession for FakePortal {
    async fn sign_in_and_filter(&mut self, _request: &HarvestRequest) -> BrowserResult<()> {
        match &self.sign_in_error {
            Some(message) => Err(BrowserError::Timeout(message.clone())),
            None => Ok(()),
        }
    }

    async fn shutdown(self) -> BrowserResult<()> {
        self.shutdowns.set(self.shutdowns.get() + 1);
        Ok(())
    }
}

/// Hands out one prepared [`FakePortal`], or fails like a missing browser.
pub struct FakeLauncher {
    portal: RefCell<Option<FakePortal>>,
    launch_error: Option<String>,
}

impl FakeLauncher {
    pub fn new(portal: FakePortal) -> Self {
        Self {
            portal: RefCell::new(Some(portal)),
            launch_error: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            portal: RefCell::new(None),
            launch_error: Some(message.into()),
        }
    }
}

#[async_trait(?Send)]
impl PortalLauncher for FakeLauncher {
    type Session = FakePortal;

    async fn open(&self) -> BrowserResult<FakePortal> {
        if let Some(message) = &self.launch_error {
            return Err(BrowserError::Launch(message.clone()));
        }
        self.portal
            .borrow_mut()
            .take()
            .ok_or_else(|| BrowserError::Unexpected("portal already opened".into()))
    }
}
