//! UI Automation tree walk over a cache request.
//!
//! All properties for the window subtree are fetched in one cross-process
//! call; the walk afterwards reads only cached values.

use crate::element::{ElementAttributes, UINode};
use crate::errors::AutomationError;
use crate::geometry::Rect;
use crate::platforms::TreeBuildConfig;
use std::time::Instant;
use tracing::{debug, info};
use uiautomation::types::{TreeScope, UIProperty};
use uiautomation::{UIAutomation, UIElement};

const CACHED_PROPERTIES: [UIProperty; 9] = [
    UIProperty::ControlType,
    UIProperty::Name,
    UIProperty::ValueValue,
    UIProperty::BoundingRectangle,
    UIProperty::IsEnabled,
    UIProperty::IsOffscreen,
    UIProperty::IsKeyboardFocusable,
    UIProperty::ScrollVerticallyScrollable,
    UIProperty::ScrollHorizontallyScrollable,
];

fn platform(context: &str) -> impl Fn(uiautomation::Error) -> AutomationError + '_ {
    move |e| AutomationError::PlatformError(format!("{context}: {e}"))
}

pub(super) fn build_window_tree(
    automation: &UIAutomation,
    window: &UIElement,
    config: &TreeBuildConfig,
) -> Result<UINode, AutomationError> {
    let start = Instant::now();

    let cache_request = automation
        .create_cache_request()
        .map_err(platform("Failed to create cache request"))?;
    for prop in CACHED_PROPERTIES {
        cache_request
            .add_property(prop)
            .map_err(platform("Failed to add cached property"))?;
    }
    cache_request
        .set_tree_scope(TreeScope::Subtree)
        .map_err(platform("Failed to set tree scope"))?;

    let true_condition = automation
        .create_true_condition()
        .map_err(platform("Failed to create true condition"))?;
    let cached_root = window
        .find_first_build_cache(TreeScope::Element, &true_condition, &cache_request)
        .map_err(platform("Failed to build cache for window"))?;

    let cache_time = start.elapsed();
    if cache_time > config.timeout {
        return Err(AutomationError::Timeout(format!(
            "UIA cache build took {cache_time:?}"
        )));
    }

    let mut count = 0usize;
    let root = build_node(&cached_root, 0, config.max_depth, &mut count);
    info!(
        "[uia] {} elements in {:?} (cache {:?})",
        count,
        start.elapsed(),
        cache_time
    );
    Ok(root)
}

fn cached_flag(element: &UIElement, property: UIProperty) -> Option<bool> {
    element
        .get_cached_property_value(property)
        .ok()
        .and_then(|v| v.try_into().ok())
}

fn attributes(element: &UIElement) -> ElementAttributes {
    let role = element
        .get_cached_control_type()
        .map(|ct| format!("{ct:?}"))
        .unwrap_or_else(|_| "Unknown".to_string());
    let name = element.get_cached_name().ok().filter(|n| !n.is_empty());
    let value = element
        .get_cached_property_value(UIProperty::ValueValue)
        .ok()
        .and_then(|v| v.get_string().ok())
        .filter(|v| !v.is_empty());
    let bounds = element
        .get_cached_bounding_rectangle()
        .ok()
        .map(|r| {
            Rect::from_xywh(
                r.get_left() as f64,
                r.get_top() as f64,
                r.get_width() as f64,
                r.get_height() as f64,
            )
        })
        .filter(|r| !r.is_empty());

    ElementAttributes {
        role,
        name,
        value,
        bounds,
        enabled: element.is_cached_enabled().unwrap_or(false),
        is_offscreen: cached_flag(element, UIProperty::IsOffscreen).unwrap_or(false),
        is_keyboard_focusable: element.is_cached_keyboard_focusable().unwrap_or(false),
        is_scrollable: cached_flag(element, UIProperty::ScrollVerticallyScrollable)
            .unwrap_or(false)
            || cached_flag(element, UIProperty::ScrollHorizontallyScrollable).unwrap_or(false),
    }
}

fn build_node(element: &UIElement, depth: usize, max_depth: usize, count: &mut usize) -> UINode {
    *count += 1;
    let mut node = UINode::new(attributes(element));

    if depth < max_depth {
        match element.get_cached_children() {
            Ok(children) => {
                node.children = children
                    .iter()
                    .map(|child| build_node(child, depth + 1, max_depth, count))
                    .collect();
            }
            Err(e) => debug!("[uia] no cached children at depth {}: {}", depth, e),
        }
    }
    node
}
