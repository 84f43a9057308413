//! Raw accessibility elements as reported by a platform backend.
//!
//! Role names use the UI Automation control-type vocabulary on every
//! platform (`Button`, `Edit`, `List`, `Text`, ...); other backends map
//! their native roles onto it.

use crate::geometry::Rect;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementAttributes {
    pub role: String,
    pub name: Option<String>,
    pub value: Option<String>,
    /// `None` when the backend could not report a rectangle.
    pub bounds: Option<Rect>,
    pub enabled: bool,
    /// Backend says the element is scrolled out of view or hidden.
    pub is_offscreen: bool,
    pub is_keyboard_focusable: bool,
    /// Element supports a scroll pattern and has content beyond its viewport.
    pub is_scrollable: bool,
}

impl ElementAttributes {
    pub fn label(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.value.as_deref().filter(|v| !v.trim().is_empty()))
    }
}

/// One node of a window's accessibility hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UINode {
    pub attributes: ElementAttributes,
    #[serde(default)]
    pub children: Vec<UINode>,
}

impl UINode {
    pub fn new(attributes: ElementAttributes) -> Self {
        Self {
            attributes,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<UINode>) -> Self {
        self.children = children;
        self
    }

    /// Total number of nodes in this subtree.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(UINode::count).sum::<usize>()
    }
}
