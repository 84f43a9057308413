//! Desktop state snapshots.

use crate::geometry::{Point, Rect};
use crate::tree_builder::TreeDiagnostics;
use chrono::{DateTime, Local};
use deskpilot_decision::ScreenshotPayload;
use serde::{Deserialize, Serialize};

/// How a node can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Clickable or typeable control.
    Interactive,
    /// Region with content beyond its viewport.
    Scrollable,
    /// Static text, image or label.
    Informative,
}

/// A classified, on-screen element.
///
/// Coordinates are only meaningful against the snapshot that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub role: Role,
    /// Platform control type, e.g. `Button`.
    pub control_type: String,
    pub name: String,
    /// Clipped to the screen.
    pub bounds: Rect,
    pub center: Point,
    pub app: String,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDescriptor {
    pub name: String,
    pub title: String,
    pub window_id: u64,
    pub process_id: u32,
    pub bounds: Rect,
    /// True only for the foreground app.
    pub focused: bool,
    /// 0 is top-most.
    pub z_order: usize,
    pub minimized: bool,
}

impl AppDescriptor {
    /// Placeholder foreground when no top-level window is reported.
    pub fn desktop(screen: Rect) -> Self {
        Self {
            name: "Desktop".to_string(),
            title: "Desktop".to_string(),
            window_id: 0,
            process_id: 0,
            bounds: screen,
            focused: true,
            z_order: 0,
            minimized: false,
        }
    }
}

/// Where a snapshot's element data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerceptionSource {
    /// Accessibility tree only.
    Tree,
    /// Accessibility tree plus a requested screenshot.
    TreeWithVision,
    /// Screenshot only; the tree was unavailable or too sparse.
    VisionFallback,
}

/// The structured desktop state handed to the reasoning side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Cache generation this snapshot was built in.
    pub generation: u64,
    pub captured_at: DateTime<Local>,
    pub screen: Rect,
    pub cursor: Point,
    pub foreground: AppDescriptor,
    pub background: Vec<AppDescriptor>,
    pub interactive: Vec<Node>,
    pub scrollable: Vec<Node>,
    pub informative: Vec<Node>,
    pub source: PerceptionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<TreeDiagnostics>,
    /// Why the tree was not used, when `source` is `VisionFallback`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl Snapshot {
    pub fn node_count(&self) -> usize {
        self.interactive.len() + self.scrollable.len() + self.informative.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.interactive
            .iter()
            .chain(self.scrollable.iter())
            .chain(self.informative.iter())
    }

    /// Finds an app by case-insensitive name or title fragment.
    pub fn find_app(&self, name: &str) -> Option<&AppDescriptor> {
        let needle = name.to_lowercase();
        std::iter::once(&self.foreground)
            .chain(self.background.iter())
            .find(|a| {
                a.name.to_lowercase().contains(&needle) || a.title.to_lowercase().contains(&needle)
            })
    }
}
