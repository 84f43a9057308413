//! `get_state`: cached desktop snapshots with a vision fallback.
//!
//! A snapshot is built from the accessibility tree of the target window (or
//! of every visible window when no target is given). When the tree cannot be
//! read, or is too sparse to act on, the snapshot falls back to a screenshot.
//! Perception failures never leave this module.

use crate::cache::CacheKey;
use crate::config::PilotConfig;
use crate::element::UINode;
use crate::errors::{AutomationError, PerceptionError};
use crate::geometry::{Point, Rect};
use crate::platforms::{normalize_app_name, AccessibilityEngine, TreeBuildConfig, WindowInfo};
use crate::session::Session;
use crate::snapshot::{AppDescriptor, PerceptionSource, Snapshot};
use crate::tree_builder::{classify_tree, ClassifiedTree};
use crate::vision;
use chrono::Local;
use deskpilot_decision::ScreenshotPayload;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Screen, cursor and window metadata for one snapshot.
#[derive(Debug, Clone)]
struct DesktopLayout {
    screen: Rect,
    cursor: Point,
    foreground: AppDescriptor,
    background: Vec<AppDescriptor>,
    /// Windows whose trees are walked, foreground first.
    walk: Vec<WindowInfo>,
}

struct TreeOutcome {
    layout: DesktopLayout,
    classified: ClassifiedTree,
}

fn descriptor(window: &WindowInfo, z_order: usize, focused: bool) -> AppDescriptor {
    AppDescriptor {
        name: window.app_name.clone(),
        title: window.title.clone(),
        window_id: window.window_id,
        process_id: window.process_id,
        bounds: window.bounds,
        focused,
        z_order,
        minimized: window.minimized,
    }
}

fn matches_target(window: &WindowInfo, target: &str) -> bool {
    let needle = normalize_app_name(target);
    normalize_app_name(&window.app_name) == needle
        || window.title.to_lowercase().contains(&needle)
}

/// Read screen, cursor and windows and choose exactly one foreground app.
fn read_layout(
    engine: &dyn AccessibilityEngine,
    target_app: Option<&str>,
) -> Result<DesktopLayout, PerceptionError> {
    let screen = engine.screen_rect()?;
    let cursor = engine.cursor_position().unwrap_or_else(|e| {
        debug!("[state] cursor position unavailable: {}", e);
        screen.center()
    });
    let windows = engine.applications()?;

    let foreground_idx = match target_app {
        Some(target) => Some(
            windows
                .iter()
                .position(|w| matches_target(w, target))
                .ok_or_else(|| PerceptionError::WindowClosed(target.to_string()))?,
        ),
        None => windows
            .iter()
            .position(|w| w.is_foreground)
            .or_else(|| windows.iter().position(|w| !w.minimized)),
    };

    let foreground = match foreground_idx {
        Some(i) => descriptor(&windows[i], 0, true),
        None => AppDescriptor::desktop(screen),
    };
    let background = windows
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != foreground_idx)
        .enumerate()
        .map(|(z, (_, w))| descriptor(w, z + 1, false))
        .collect();

    let walk = match (foreground_idx, target_app) {
        (Some(i), Some(_)) => vec![windows[i].clone()],
        (Some(i), None) => std::iter::once(windows[i].clone())
            .chain(
                windows
                    .iter()
                    .enumerate()
                    .filter(|(j, w)| *j != i && !w.minimized)
                    .map(|(_, w)| w.clone()),
            )
            .collect(),
        (None, _) => Vec::new(),
    };

    Ok(DesktopLayout {
        screen,
        cursor,
        foreground,
        background,
        walk,
    })
}

/// Best-effort layout for the vision path; never fails.
fn read_layout_lenient(engine: &dyn AccessibilityEngine, fallback_screen: Rect) -> DesktopLayout {
    let screen = engine.screen_rect().unwrap_or(fallback_screen);
    let cursor = engine.cursor_position().unwrap_or_else(|_| screen.center());
    let windows = engine.applications().unwrap_or_default();
    let fg = windows.iter().position(|w| w.is_foreground);
    DesktopLayout {
        screen,
        cursor,
        foreground: fg
            .map(|i| descriptor(&windows[i], 0, true))
            .unwrap_or_else(|| AppDescriptor::desktop(screen)),
        background: windows
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != fg)
            .enumerate()
            .map(|(z, (_, w))| descriptor(w, z + 1, false))
            .collect(),
        walk: Vec::new(),
    }
}

/// One window's raw tree. A failing foreground window is reported as closed
/// when it no longer appears in the window list. Blocking.
fn read_window(
    engine: &dyn AccessibilityEngine,
    window: &WindowInfo,
    config: &TreeBuildConfig,
    is_foreground: bool,
) -> Result<UINode, PerceptionError> {
    engine.window_tree(window, config).map_err(|e| {
        if !is_foreground {
            return PerceptionError::Backend(e);
        }
        match engine.applications() {
            Ok(ws) if !ws.iter().any(|w| w.window_id == window.window_id) => {
                PerceptionError::WindowClosed(window.title.clone())
            }
            _ => PerceptionError::Backend(e),
        }
    })
}

fn join_failed(join: tokio::task::JoinError) -> PerceptionError {
    PerceptionError::Backend(AutomationError::PlatformError(format!(
        "tree builder task failed: {join}"
    )))
}

fn capture_screenshot(
    engine: &dyn AccessibilityEngine,
    config: &PilotConfig,
) -> Result<ScreenshotPayload, String> {
    let capture = engine.capture_screen().map_err(|e| e.to_string())?;
    vision::render(&capture, &config.vision).map_err(|e| e.to_string())
}

impl Session {
    /// Current desktop state, served from the cache when fresh.
    ///
    /// `use_vision` attaches a screenshot even when the tree is usable;
    /// `target_app` restricts the tree to one application's window.
    #[instrument(skip(self), fields(session = %self.id()))]
    pub async fn get_state(&self, use_vision: bool, target_app: Option<&str>) -> Arc<Snapshot> {
        self.perceive(use_vision, target_app, None).await
    }

    /// Like [`Session::get_state`], but right after launching `launched_app`:
    /// a tree with no interactive elements is read once more before giving up
    /// on it.
    #[instrument(skip(self), fields(session = %self.id()))]
    pub async fn get_state_after_launch(
        &self,
        use_vision: bool,
        target_app: Option<&str>,
        launched_app: &str,
    ) -> Arc<Snapshot> {
        self.perceive(use_vision, target_app, Some(launched_app)).await
    }

    async fn perceive(
        &self,
        use_vision: bool,
        target_app: Option<&str>,
        launched_app: Option<&str>,
    ) -> Arc<Snapshot> {
        let use_vision = use_vision || self.config().vision.enabled;
        let key = CacheKey::new(use_vision, target_app);

        let generation = {
            let mut cache = self.cache();
            if let Some(snapshot) = cache.get(&key) {
                return snapshot;
            }
            cache.generation()
        };

        let captured = Instant::now();
        let snapshot = Arc::new(
            self.build_snapshot(key.use_vision, key.target_app.as_deref(), launched_app, generation)
                .await,
        );
        let stored = self
            .cache()
            .store(key, snapshot.clone(), generation, captured);
        info!(
            "[state] built snapshot gen {} via {:?}: {} interactive, {} scrollable, {} informative in {:?}{}",
            generation,
            snapshot.source,
            snapshot.interactive.len(),
            snapshot.scrollable.len(),
            snapshot.informative.len(),
            captured.elapsed(),
            if stored { "" } else { " (not cached)" }
        );
        snapshot
    }

    /// Read the layout, then walk its windows foreground first under one
    /// deadline. The foreground window must be read in time; background
    /// windows that fail or overrun are skipped.
    async fn read_tree(&self, target_app: Option<&str>) -> Result<TreeOutcome, PerceptionError> {
        let config = self.config().clone();
        let budget = Duration::from_millis(config.tree.timeout_ms);
        let deadline = Instant::now() + budget;

        let target = target_app.map(str::to_string);
        let layout = self.with_engine(move |engine| read_layout(engine, target.as_deref()));
        let layout = match tokio::time::timeout_at(deadline, layout).await {
            Ok(result) => result.map_err(join_failed)??,
            Err(_) => return Err(PerceptionError::TraversalTimeout(budget)),
        };

        let mut classified = ClassifiedTree::default();
        let mut foreground_bounds = None;
        // No window at all leaves nothing to act on.
        let mut sparse = true;
        for (i, window) in layout.walk.iter().enumerate() {
            let is_foreground = i == 0;
            let tree_config = TreeBuildConfig {
                timeout: deadline.saturating_duration_since(Instant::now()),
                max_depth: config.tree.max_depth,
            };
            let target = window.clone();
            let read = self.with_engine(move |engine| {
                read_window(engine, &target, &tree_config, is_foreground)
            });
            let tree = match tokio::time::timeout_at(deadline, read).await {
                Ok(Ok(Ok(tree))) => tree,
                Ok(Ok(Err(e))) if is_foreground => return Err(e),
                Ok(Err(join)) if is_foreground => return Err(join_failed(join)),
                Err(_) if is_foreground => return Err(PerceptionError::TraversalTimeout(budget)),
                // The window we act on must be readable; the rest are best effort.
                Ok(Ok(Err(e))) => {
                    debug!(
                        "[state] skipping tree of '{}' ({}): {}",
                        window.title, window.app_name, e
                    );
                    classified.diagnostics.windows_failed += 1;
                    continue;
                }
                Ok(Err(join)) => {
                    debug!("[state] tree read for '{}' failed: {}", window.title, join);
                    classified.diagnostics.windows_failed += 1;
                    continue;
                }
                Err(_) => {
                    debug!(
                        "[state] tree of '{}' ({}) not read within {:?}, skipping",
                        window.title, window.app_name, budget
                    );
                    classified.diagnostics.windows_failed += 1;
                    continue;
                }
            };

            let mut part = classify_tree(&tree, &window.app_name, layout.screen, config.tree.max_depth);
            if is_foreground {
                sparse = part.interactive.len() + part.informative.len() < config.tree.sparse_threshold;
                foreground_bounds = window.bounds.intersect(&layout.screen);
            } else if let Some(fg) = foreground_bounds {
                // Elements under the foreground window cannot be reached by the pointer.
                part.interactive.retain(|n| !fg.contains(n.center));
                part.scrollable.retain(|n| !fg.contains(n.center));
                part.informative.retain(|n| !fg.contains(n.center));
            }
            classified.merge(part);
        }
        classified.diagnostics.sparse = sparse;
        Ok(TreeOutcome { layout, classified })
    }

    async fn build_snapshot(
        &self,
        use_vision: bool,
        target_app: Option<&str>,
        launched_app: Option<&str>,
        generation: u64,
    ) -> Snapshot {
        let mut tree = self.read_tree(target_app).await;

        if let Some(app) = launched_app {
            if tree
                .as_ref()
                .map_or(true, |o| o.classified.interactive.is_empty())
            {
                info!(
                    "[state] no interactive elements after launching '{}', retrying perception once",
                    app
                );
                self.record_perception_retry();
                tokio::time::sleep(Duration::from_millis(
                    self.config().run.launch_retry_delay_ms,
                ))
                .await;
                tree = self.read_tree(target_app).await;
                if matches!(&tree, Ok(o) if o.classified.interactive.is_empty()) {
                    tree = Err(PerceptionError::NoInteractiveElements(app.to_string()));
                }
            }
        }

        match tree {
            Ok(outcome) if !outcome.classified.diagnostics.sparse => {
                let screenshot = if use_vision {
                    self.screenshot().await.unwrap_or_else(|e| {
                        warn!("[state] screenshot for vision mode failed: {}", e);
                        None
                    })
                } else {
                    None
                };
                let TreeOutcome { layout, classified } = outcome;
                Snapshot {
                    generation,
                    captured_at: Local::now(),
                    screen: layout.screen,
                    cursor: layout.cursor,
                    foreground: layout.foreground,
                    background: layout.background,
                    interactive: classified.interactive,
                    scrollable: classified.scrollable,
                    informative: classified.informative,
                    source: if screenshot.is_some() {
                        PerceptionSource::TreeWithVision
                    } else {
                        PerceptionSource::Tree
                    },
                    screenshot,
                    diagnostics: Some(classified.diagnostics),
                    fallback_reason: None,
                }
            }
            Ok(outcome) => {
                let reason = format!(
                    "sparse accessibility tree ({} interactive, {} informative elements)",
                    outcome.classified.interactive.len(),
                    outcome.classified.informative.len()
                );
                self.vision_fallback(Some(outcome.layout), reason, generation)
                    .await
            }
            Err(e) => {
                warn!("[state] perception failed, falling back to vision: {}", e);
                self.vision_fallback(None, e.to_string(), generation).await
            }
        }
    }

    async fn screenshot(&self) -> Result<Option<ScreenshotPayload>, String> {
        let config = self.config().clone();
        self.with_engine(move |engine| capture_screenshot(engine, &config))
            .await
            .map_err(|e| e.to_string())?
            .map(Some)
    }

    async fn vision_fallback(
        &self,
        layout: Option<DesktopLayout>,
        reason: String,
        generation: u64,
    ) -> Snapshot {
        let config = self.config().clone();
        let result = self
            .with_engine(move |engine| {
                let shot = capture_screenshot(engine, &config);
                let fallback_screen = match &shot {
                    Ok(s) => Rect::new(0, 0, s.width as i32, s.height as i32),
                    Err(_) => Rect::new(0, 0, 0, 0),
                };
                let layout = layout.unwrap_or_else(|| read_layout_lenient(engine, fallback_screen));
                (layout, shot)
            })
            .await;

        let (layout, screenshot, reason) = match result {
            Ok((layout, Ok(shot))) => (layout, Some(shot), reason),
            Ok((layout, Err(e))) => {
                warn!("[state] vision fallback could not capture the screen: {}", e);
                (layout, None, format!("{reason}; screenshot failed: {e}"))
            }
            Err(join) => {
                let screen = Rect::new(0, 0, 0, 0);
                (
                    DesktopLayout {
                        screen,
                        cursor: Point::new(0, 0),
                        foreground: AppDescriptor::desktop(screen),
                        background: Vec::new(),
                        walk: Vec::new(),
                    },
                    None,
                    format!("{reason}; vision task failed: {join}"),
                )
            }
        };

        Snapshot {
            generation,
            captured_at: Local::now(),
            screen: layout.screen,
            cursor: layout.cursor,
            foreground: layout.foreground,
            background: layout.background,
            interactive: Vec::new(),
            scrollable: Vec::new(),
            informative: Vec::new(),
            source: PerceptionSource::VisionFallback,
            screenshot,
            diagnostics: None,
            fallback_reason: Some(reason),
        }
    }
}
