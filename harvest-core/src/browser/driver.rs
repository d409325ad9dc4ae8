use async_trait::async_trait;
use serde::Deserialize;

use crate::request::HarvestRequest;

use super::error::BrowserResult;

/// Element property a [`Needle`] looks into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Class,
    Href,
    Onclick,
    Dismiss,
    Text,
}

impl Field {
    /// DOM attribute backing the field; visible text has none and is only
    /// checked after the element is fetched.
    pub fn attribute(self) -> Option<&'static str> {
        match self {
            Field::Class => Some("class"),
            Field::Href => Some("href"),
            Field::Onclick => Some("onclick"),
            Field::Dismiss => Some("data-dismiss"),
            Field::Text => None,
        }
    }
}

/// Case-insensitive "field contains value" test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Needle {
    pub field: Field,
    pub value: &'static str,
}

impl Needle {
    pub const fn class(value: &'static str) -> Self {
        Self {
            field: Field::Class,
            value,
        }
    }

    pub const fn href(value: &'static str) -> Self {
        Self {
            field: Field::Href,
            value,
        }
    }

    pub const fn onclick(value: &'static str) -> Self {
        Self {
            field: Field::Onclick,
            value,
        }
    }

    pub const fn dismiss(value: &'static str) -> Self {
        Self {
            field: Field::Dismiss,
            value,
        }
    }

    pub const fn text(value: &'static str) -> Self {
        Self {
            field: Field::Text,
            value,
        }
    }

    fn css(&self) -> Option<String> {
        self.field
            .attribute()
            .map(|attr| format!("[{attr}*='{}' i]", self.value))
    }

    pub fn matches(&self, info: &ElementInfo) -> bool {
        info.field(self.field)
            .to_lowercase()
            .contains(&self.value.to_lowercase())
    }
}

/// Declarative element query.
///
/// An element matches when its tag is in `tags`, every `all` needle holds and,
/// if `any` is non-empty, at least one `any` needle holds. When `climb_to` is
/// non-empty the query yields the nearest enclosing ancestor with one of those
/// tags instead of the matched element itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    pub tags: &'static [&'static str],
    pub all: &'static [Needle],
    pub any: &'static [Needle],
    pub climb_to: &'static [&'static str],
}

impl Locator {
    pub const fn tags(tags: &'static [&'static str]) -> Self {
        Self {
            tags,
            all: &[],
            any: &[],
            climb_to: &[],
        }
    }

    pub const fn all(mut self, needles: &'static [Needle]) -> Self {
        self.all = needles;
        self
    }

    pub const fn any(mut self, needles: &'static [Needle]) -> Self {
        self.any = needles;
        self
    }

    pub const fn climb_to(mut self, tags: &'static [&'static str]) -> Self {
        self.climb_to = tags;
        self
    }

    /// Renders the locator as a CSS selector list that selects a superset of the
    /// matching elements; callers narrow the result with [`Locator::matches`].
    pub fn to_css(&self) -> String {
        let required: String = self.all.iter().filter_map(Needle::css).collect();
        let alternatives: Option<Vec<String>> = self.any.iter().map(Needle::css).collect();
        let mut parts = Vec::new();
        for tag in self.tags {
            match &alternatives {
                Some(alts) if !alts.is_empty() => {
                    for alt in alts {
                        parts.push(format!("{tag}{required}{alt}"));
                    }
                }
                _ => parts.push(format!("{tag}{required}")),
            }
        }
        parts.join(", ")
    }

    pub fn matches(&self, info: &ElementInfo) -> bool {
        self.tags.iter().any(|tag| tag.eq_ignore_ascii_case(&info.tag))
            && self.all.iter().all(|needle| needle.matches(info))
            && (self.any.is_empty() || self.any.iter().any(|needle| needle.matches(info)))
    }
}

/// Observable properties of one DOM element at the moment it was queried.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ElementInfo {
    pub tag: String,
    pub id: String,
    pub class: String,
    pub href: String,
    pub onclick: String,
    pub dismiss: String,
    pub text: String,
    pub visible: bool,
}

impl ElementInfo {
    pub fn field(&self, field: Field) -> &str {
        match field {
            Field::Class => &self.class,
            Field::Href => &self.href,
            Field::Onclick => &self.onclick,
            Field::Dismiss => &self.dismiss,
            Field::Text => &self.text,
        }
    }
}

#[derive(Debug)]
pub struct ElementSnapshot<H> {
    pub handle: H,
    pub info: ElementInfo,
}

#[derive(Debug)]
pub enum Scope<'a, H> {
    Document,
    Within(&'a H),
}

impl<H> Clone for Scope<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for Scope<'_, H> {}

/// DOM capabilities the harvesting engine relies on.
///
/// Handles survive queries, but any click may re-render the page and detach
/// them. The engine resolves rows and children again before every item and
/// stops using a handle once a later click has landed.
#[async_trait(?Send)]
pub trait PortalDriver {
    type Handle;

    async fn table_present(&mut self) -> BrowserResult<bool>;

    /// Live top-level rows of the results table, in document order.
    async fn result_rows(&mut self) -> BrowserResult<Vec<Self::Handle>>;

    /// Rows of the nested sub-table derived from `parent_id`.
    async fn child_rows(&mut self, parent_id: &str) -> BrowserResult<Vec<Self::Handle>>;

    async fn attribute(
        &mut self,
        handle: &Self::Handle,
        name: &str,
    ) -> BrowserResult<Option<String>>;

    /// All elements in `scope` matching `locator`, visible or not, in document order.
    async fn query(
        &mut self,
        scope: Scope<'_, Self::Handle>,
        locator: &Locator,
    ) -> BrowserResult<Vec<ElementSnapshot<Self::Handle>>>;

    async fn scroll_into_view(&mut self, handle: &Self::Handle) -> BrowserResult<()>;

    /// Scrolls the element to the viewport center and clicks it from script.
    async fn script_click(&mut self, handle: &Self::Handle) -> BrowserResult<()>;

    /// Dispatches a real pointer click on the element.
    async fn native_click(&mut self, handle: &Self::Handle) -> BrowserResult<()>;

    /// Evaluates a find-and-click script, returning what it clicked, if anything.
    async fn run_click_script(&mut self, script: &str) -> BrowserResult<Option<String>>;

    async fn dispatch_escape(&mut self) -> BrowserResult<()>;
}

/// An owned, authenticated browser session on the portal.
#[async_trait(?Send)]
pub trait PortalSession: PortalDriver {
    /// Signs in and leaves the page on the results table, filtered by the
    /// request's date range and destination.
    async fn sign_in_and_filter(&mut self, request: &HarvestRequest) -> BrowserResult<()>;

    async fn shutdown(self) -> BrowserResult<()>;
}

#[async_trait(?Send)]
pub trait PortalLauncher {
    type Session: PortalSession;

    async fn open(&self) -> BrowserResult<Self::Session>;
}
