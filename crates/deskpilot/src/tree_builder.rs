//! Classification of a raw accessibility tree into snapshot nodes.
//!
//! Each element is classified as Interactive, then Scrollable, then
//! Informative; the first match wins. Hidden, zero-area, fully offscreen and
//! (for controls) disabled elements are discarded. Survivors are clipped to
//! the screen and get a center point inside the clipped box.

use crate::element::{ElementAttributes, UINode};
use crate::geometry::Rect;
use crate::snapshot::{Node, Role};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

const INTERACTIVE_ROLES: &[&str] = &[
    "Button",
    "CheckBox",
    "ComboBox",
    "Edit",
    "Hyperlink",
    "ListItem",
    "MenuItem",
    "RadioButton",
    "Slider",
    "Spinner",
    "SplitButton",
    "TabItem",
    "TreeItem",
    "DataItem",
    "HeaderItem",
    "ScrollBar",
];

/// Interactive only when the element also takes keyboard focus.
const FOCUSABLE_INTERACTIVE_ROLES: &[&str] = &["Document", "Custom", "Group", "Image", "Text"];

const INFORMATIVE_ROLES: &[&str] = &[
    "Text",
    "Image",
    "StatusBar",
    "Header",
    "TitleBar",
    "ToolTip",
    "ProgressBar",
    "Label",
];

/// Per-build statistics, reported alongside every tree-based snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeDiagnostics {
    pub nodes_visited: usize,
    pub interactive: usize,
    pub scrollable: usize,
    pub informative: usize,
    pub discarded_hidden: usize,
    pub discarded_zero_area: usize,
    pub discarded_offscreen: usize,
    pub discarded_disabled: usize,
    pub max_depth_reached: usize,
    pub windows_walked: usize,
    pub windows_failed: usize,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Too little accessibility metadata to drive the app; use vision instead.
    pub sparse: bool,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassifiedTree {
    pub interactive: Vec<Node>,
    pub scrollable: Vec<Node>,
    pub informative: Vec<Node>,
    pub diagnostics: TreeDiagnostics,
}

impl ClassifiedTree {
    /// Fold another window's classification into this one.
    pub fn merge(&mut self, other: ClassifiedTree) {
        self.interactive.extend(other.interactive);
        self.scrollable.extend(other.scrollable);
        self.informative.extend(other.informative);
        let d = &mut self.diagnostics;
        let o = other.diagnostics;
        d.nodes_visited += o.nodes_visited;
        d.interactive += o.interactive;
        d.scrollable += o.scrollable;
        d.informative += o.informative;
        d.discarded_hidden += o.discarded_hidden;
        d.discarded_zero_area += o.discarded_zero_area;
        d.discarded_offscreen += o.discarded_offscreen;
        d.discarded_disabled += o.discarded_disabled;
        d.max_depth_reached = d.max_depth_reached.max(o.max_depth_reached);
        d.windows_walked += o.windows_walked;
        d.windows_failed += o.windows_failed;
        d.duration += o.duration;
    }
}

/// Context for tracking classification progress and stats
struct TreeBuildingContext<'a> {
    screen: Rect,
    app_name: &'a str,
    max_depth: usize,
    out: ClassifiedTree,
}

impl TreeBuildingContext<'_> {
    fn update_max_depth(&mut self, depth: usize) {
        let d = &mut self.out.diagnostics;
        d.max_depth_reached = d.max_depth_reached.max(depth);
    }
}

/// Decide a node's role from its attributes alone. `None` means structural.
pub fn classify(attrs: &ElementAttributes) -> Option<Role> {
    let role = attrs.role.as_str();
    if INTERACTIVE_ROLES.contains(&role)
        || (attrs.is_keyboard_focusable && FOCUSABLE_INTERACTIVE_ROLES.contains(&role))
    {
        return Some(Role::Interactive);
    }
    if attrs.is_scrollable {
        return Some(Role::Scrollable);
    }
    if INFORMATIVE_ROLES.contains(&role) && attrs.label().is_some() {
        return Some(Role::Informative);
    }
    None
}

/// Classify one window's tree against the screen rectangle.
pub fn classify_tree(
    root: &UINode,
    app_name: &str,
    screen: Rect,
    max_depth: usize,
) -> ClassifiedTree {
    let start = Instant::now();
    let mut context = TreeBuildingContext {
        screen,
        app_name,
        max_depth,
        out: ClassifiedTree::default(),
    };

    // Explicit stack: deep hierarchies must not overflow the thread stack.
    let mut stack: Vec<(&UINode, usize)> = vec![(root, 0)];
    while let Some((node, depth)) = stack.pop() {
        context.out.diagnostics.nodes_visited += 1;
        context.update_max_depth(depth);

        let attrs = &node.attributes;
        // Hidden subtrees are virtualized or collapsed; nothing below is visible.
        if attrs.is_offscreen {
            if classify(attrs).is_some() {
                context.out.diagnostics.discarded_hidden += 1;
            }
            continue;
        }

        if let Some(role) = classify(attrs) {
            visit_classified(&mut context, attrs, role);
        }

        if depth < context.max_depth {
            // Reverse so siblings come out in document order.
            for child in node.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
    }

    let mut out = context.out;
    out.diagnostics.windows_walked = 1;
    out.diagnostics.duration = start.elapsed();
    debug!(
        "[tree_builder] {}: visited {}, kept {}/{}/{} (interactive/scrollable/informative)",
        app_name,
        out.diagnostics.nodes_visited,
        out.interactive.len(),
        out.scrollable.len(),
        out.informative.len()
    );
    out
}

fn visit_classified(context: &mut TreeBuildingContext<'_>, attrs: &ElementAttributes, role: Role) {
    let diag = &mut context.out.diagnostics;
    let Some(bounds) = attrs.bounds.filter(|b| !b.is_empty()) else {
        diag.discarded_zero_area += 1;
        return;
    };
    let Some(clipped) = bounds.intersect(&context.screen) else {
        diag.discarded_offscreen += 1;
        return;
    };
    if role == Role::Interactive && !attrs.enabled {
        diag.discarded_disabled += 1;
        return;
    }

    let node = Node {
        role,
        control_type: attrs.role.clone(),
        name: attrs.label().unwrap_or_default().trim().to_string(),
        bounds: clipped,
        center: clipped.center(),
        app: context.app_name.to_string(),
        visible: true,
    };
    match role {
        Role::Interactive => {
            diag.interactive += 1;
            context.out.interactive.push(node);
        }
        Role::Scrollable => {
            diag.scrollable += 1;
            context.out.scrollable.push(node);
        }
        Role::Informative => {
            diag.informative += 1;
            context.out.informative.push(node);
        }
    }
}
