//! Compact text rendering of a snapshot for the reasoning side.
//!
//! Output format:
//! ```text
//! Cursor Location: (412,300)
//! Foreground App: Notepad - "Untitled - Notepad" [0,0,1280,720]
//! Background Apps:
//! - Explorer - "Downloads"
//! Interactive Elements:
//! #1 [Button] Save (center: (640,24))
//! Scrollable Elements:
//! #2 [List] Files (center: (300,400))
//! Informative Elements:
//! - [Text] Ln 1, Col 1
//! ```
//! Indexed entries (`#n`) are actionable targets; informative entries use a dash.

use crate::snapshot::{AppDescriptor, Node, PerceptionSource, Snapshot};
use std::fmt::Write as _;

/// Longest element name kept in the summary.
const MAX_NAME_CHARS: usize = 80;

fn truncate(name: &str) -> String {
    let single_line = name.replace(['\n', '\r'], " ");
    if single_line.chars().count() <= MAX_NAME_CHARS {
        single_line
    } else {
        let mut out: String = single_line.chars().take(MAX_NAME_CHARS).collect();
        out.push_str("...");
        out
    }
}

fn format_app(app: &AppDescriptor) -> String {
    let mut line = if app.title.is_empty() || app.title == app.name {
        app.name.clone()
    } else {
        format!("{} - \"{}\"", app.name, truncate(&app.title))
    };
    if app.minimized {
        line.push_str(" (minimized)");
    }
    line
}

fn format_indexed(out: &mut String, nodes: &[Node], next_index: &mut usize) {
    if nodes.is_empty() {
        out.push_str("(none)\n");
        return;
    }
    for node in nodes {
        let _ = write!(out, "#{} [{}]", *next_index, node.control_type);
        if !node.name.is_empty() {
            let _ = write!(out, " {}", truncate(&node.name));
        }
        let _ = writeln!(out, " (center: {})", node.center);
        *next_index += 1;
    }
}

/// Render a snapshot as the summary text given to the reasoning side.
pub fn format_snapshot_summary(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Cursor Location: {}", snapshot.cursor);
    let _ = writeln!(
        out,
        "Foreground App: {} {}",
        format_app(&snapshot.foreground),
        snapshot.foreground.bounds
    );

    out.push_str("Background Apps:\n");
    if snapshot.background.is_empty() {
        out.push_str("(none)\n");
    }
    for app in &snapshot.background {
        let _ = writeln!(out, "- {}", format_app(app));
    }

    if snapshot.source == PerceptionSource::VisionFallback {
        let _ = writeln!(
            out,
            "Element tree unavailable ({}); use the attached screenshot and absolute coordinates.",
            snapshot
                .fallback_reason
                .as_deref()
                .unwrap_or("insufficient accessibility data")
        );
        return out;
    }

    let mut next_index = 1;
    out.push_str("Interactive Elements:\n");
    format_indexed(&mut out, &snapshot.interactive, &mut next_index);
    out.push_str("Scrollable Elements:\n");
    format_indexed(&mut out, &snapshot.scrollable, &mut next_index);

    out.push_str("Informative Elements:\n");
    if snapshot.informative.is_empty() {
        out.push_str("(none)\n");
    }
    for node in &snapshot.informative {
        let _ = writeln!(out, "- [{}] {}", node.control_type, truncate(&node.name));
    }
    out
}
