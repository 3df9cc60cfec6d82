//! Injected browser surface.
//!
//! The core never touches a real DOM. Hosts describe what happened as
//! [`BrowserEvent`] values and expose the live page through [`PageContext`].
//! Navigation events deliberately carry no URL: consumers re-read
//! [`PageContext::location_href`] after the navigation has been applied,
//! because caller-supplied history URLs may be relative or absent.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Snapshot of a DOM element as seen on an event's composed path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Lower-case tag name (`button`, `reveal-nudge`, ...).
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Value of the `data-testid` attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Computed accessible name (aria-label, text content, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessible_name: Option<String>,
    /// Position among the parent's element children.
    #[serde(default)]
    pub sibling_index: usize,
    /// `input`, `textarea`, `select` or `contenteditable`.
    #[serde(default)]
    pub editable: bool,
    /// Element is a form or lives inside one.
    #[serde(default)]
    pub in_form: bool,
}

impl ElementInfo {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_test_id(mut self, test_id: &str) -> Self {
        self.test_id = Some(test_id.to_string());
        self
    }

    pub fn with_role(mut self, role: &str, accessible_name: &str) -> Self {
        self.role = Some(role.to_string());
        self.accessible_name = Some(accessible_name.to_string());
        self
    }

    pub fn at_index(mut self, sibling_index: usize) -> Self {
        self.sibling_index = sibling_index;
        self
    }

    pub fn editable(mut self) -> Self {
        self.editable = true;
        self
    }

    pub fn in_form(mut self) -> Self {
        self.in_form = true;
        self
    }
}

/// A click as delivered to a capturing document listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickEvent {
    /// Composed event path, target first, then ancestors up to the root.
    pub path: Vec<ElementInfo>,
    pub x: f64,
    pub y: f64,
}

impl ClickEvent {
    pub fn target(&self) -> Option<&ElementInfo> {
        self.path.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEventKind {
    KeyDown,
    Input,
    Change,
}

/// How the page moved to its current location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationMethod {
    PushState,
    ReplaceState,
    PopState,
    HashChange,
}

impl NavigationMethod {
    /// Short label used in signal evidence.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PushState => "push",
            Self::ReplaceState => "replace",
            Self::PopState => "popstate",
            Self::HashChange => "hashchange",
        }
    }

    /// Browser-originated navigations (as opposed to programmatic history calls).
    pub fn is_browser_initiated(self) -> bool {
        matches!(self, Self::PopState | Self::HashChange)
    }
}

impl std::fmt::Display for NavigationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw browser activity observed by the detectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserEvent {
    Click(ClickEvent),
    Key {
        kind: KeyEventKind,
        target: ElementInfo,
    },
    Submit,
    /// The host's navigation hook fired; the new location is already live.
    Navigation { method: NavigationMethod },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Live view of the page: location, document metadata and device context.
pub trait PageContext: Send + Sync {
    /// Absolute URL of the current location.
    fn location_href(&self) -> String;
    fn title(&self) -> String;
    fn referrer(&self) -> String;
    /// Host-assigned screen name, if the app has one.
    fn screen(&self) -> Option<String>;
    fn viewport(&self) -> Viewport;
    fn user_agent(&self) -> String;
}

pub type SharedPage = Arc<dyn PageContext>;

#[derive(Debug, Clone, Default)]
struct PageFields {
    href: String,
    title: String,
    referrer: String,
    screen: Option<String>,
    viewport: Viewport,
    user_agent: String,
}

/// Mutex-backed [`PageContext`] for hosts that push page state in.
#[derive(Debug, Default)]
pub struct PageState {
    fields: Mutex<PageFields>,
}

impl PageState {
    pub fn new(href: &str) -> Self {
        Self {
            fields: Mutex::new(PageFields {
                href: href.to_string(),
                viewport: Viewport {
                    width: 1280,
                    height: 800,
                },
                user_agent: format!("reveal-core/{}", env!("CARGO_PKG_VERSION")),
                ..Default::default()
            }),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn with_fields<R>(&self, f: impl FnOnce(&mut PageFields) -> R) -> R {
        let mut guard = self.fields.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Move to `href`, recording the previous location as the referrer.
    pub fn navigate(&self, href: &str) {
        self.with_fields(|p| {
            p.referrer = std::mem::replace(&mut p.href, href.to_string());
        });
    }

    pub fn set_title(&self, title: &str) {
        self.with_fields(|p| p.title = title.to_string());
    }

    pub fn set_screen(&self, screen: Option<&str>) {
        self.with_fields(|p| p.screen = screen.map(String::from));
    }

    pub fn set_viewport(&self, width: u32, height: u32) {
        self.with_fields(|p| p.viewport = Viewport { width, height });
    }

    pub fn set_user_agent(&self, user_agent: &str) {
        self.with_fields(|p| p.user_agent = user_agent.to_string());
    }
}

impl PageContext for PageState {
    fn location_href(&self) -> String {
        self.with_fields(|p| p.href.clone())
    }

    fn title(&self) -> String {
        self.with_fields(|p| p.title.clone())
    }

    fn referrer(&self) -> String {
        self.with_fields(|p| p.referrer.clone())
    }

    fn screen(&self) -> Option<String> {
        self.with_fields(|p| p.screen.clone())
    }

    fn viewport(&self) -> Viewport {
        self.with_fields(|p| p.viewport)
    }

    fn user_agent(&self) -> String {
        self.with_fields(|p| p.user_agent.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigate_tracks_referrer() {
        let page = PageState::new("https://app.test/a");
        page.navigate("https://app.test/b");
        assert_eq!(page.location_href(), "https://app.test/b");
        assert_eq!(page.referrer(), "https://app.test/a");
    }

    #[test]
    fn test_browser_event_json_shape() {
        let json = r#"{"type":"navigation","method":"pop_state"}"#;
        let event: BrowserEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            BrowserEvent::Navigation {
                method: NavigationMethod::PopState
            }
        );

        let click = r#"{"type":"click","path":[{"tag":"button","id":"save"}],"x":1.0,"y":2.0}"#;
        let event: BrowserEvent = serde_json::from_str(click).unwrap();
        match event {
            BrowserEvent::Click(c) => assert_eq!(c.target().unwrap().id.as_deref(), Some("save")),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
