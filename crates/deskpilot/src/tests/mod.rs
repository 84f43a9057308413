//! Crate-level tests against an in-memory desktop and a scripted reasoning engine.

mod config_tests;
mod control_loop_tests;
mod scheduler_tests;
mod state_tests;

use crate::config::PilotConfig;
use crate::element::{ElementAttributes, UINode};
use crate::errors::AutomationError;
use crate::geometry::{Point, Rect};
use crate::platforms::{AccessibilityEngine, ScreenCapture, TreeBuildConfig, WindowInfo};
use crate::session::Session;
use async_trait::async_trait;
use deskpilot_decision::{
    Action, Decision, DecisionParseError, DecisionRequest, EvaluationTag, KeyCombo, MouseButton,
    ReasoningEngine, ReasoningError, ScrollDirection,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub(crate) const SCREEN: Rect = Rect {
    left: 0,
    top: 0,
    right: 1920,
    bottom: 1080,
};

pub(crate) fn element(role: &str, name: &str, bounds: Rect) -> UINode {
    UINode::new(ElementAttributes {
        role: role.to_string(),
        name: Some(name.to_string()),
        value: None,
        bounds: Some(bounds),
        enabled: true,
        is_offscreen: false,
        is_keyboard_focusable: true,
        is_scrollable: false,
    })
}

/// A window root holding `buttons` enabled buttons in a row.
pub(crate) fn window_with_buttons(buttons: &[&str]) -> UINode {
    let children = buttons
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let left = 100 + i as i32 * 120;
            element("Button", name, Rect::new(left, 100, left + 100, 140))
        })
        .collect();
    element("Window", "window", Rect::new(0, 0, 1200, 800)).with_children(children)
}

pub(crate) fn window(id: u64, app: &str, title: &str, foreground: bool) -> WindowInfo {
    WindowInfo {
        window_id: id,
        process_id: 1000 + id as u32,
        app_name: app.to_string(),
        title: title.to_string(),
        bounds: Rect::new(0, 0, 1200, 800),
        is_foreground: foreground,
        minimized: false,
    }
}

#[derive(Default)]
pub(crate) struct FakeDesktop {
    pub windows: Vec<WindowInfo>,
    pub trees: HashMap<u64, UINode>,
    /// Window and tree that appear when the named app is launched.
    pub launchable: HashMap<String, (WindowInfo, UINode)>,
    /// Upcoming `window_tree` calls that return an empty window.
    pub blank_reads: usize,
    /// Windows whose `window_tree` blocks for the given time before answering.
    pub slow_trees: HashMap<u64, Duration>,
    pub tree_reads: usize,
    pub clicks: Vec<(Point, MouseButton, u8)>,
    pub typed: Vec<String>,
    pub keys: Vec<String>,
    pub scrolls: Vec<(Option<Point>, ScrollDirection, u32)>,
    pub launched: Vec<String>,
    pub activated: Vec<u64>,
}

/// In-memory desktop. Input is recorded, never performed.
pub(crate) struct FakeEngine {
    desktop: Mutex<FakeDesktop>,
}

impl FakeEngine {
    pub fn new(desktop: FakeDesktop) -> Arc<Self> {
        init_tracing();
        Arc::new(Self {
            desktop: Mutex::new(desktop),
        })
    }

    /// One foreground `notepad` window with three buttons.
    pub fn notepad() -> Arc<Self> {
        let mut desktop = FakeDesktop::default();
        desktop.windows.push(window(1, "notepad", "Untitled - Notepad", true));
        desktop
            .trees
            .insert(1, window_with_buttons(&["File", "Edit", "Save"]));
        Self::new(desktop)
    }

    pub fn desktop(&self) -> MutexGuard<'_, FakeDesktop> {
        self.desktop.lock().unwrap()
    }
}

impl AccessibilityEngine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn screen_rect(&self) -> Result<Rect, AutomationError> {
        Ok(SCREEN)
    }

    fn cursor_position(&self) -> Result<Point, AutomationError> {
        Ok(Point::new(10, 10))
    }

    fn applications(&self) -> Result<Vec<WindowInfo>, AutomationError> {
        Ok(self.desktop().windows.clone())
    }

    fn window_tree(
        &self,
        window: &WindowInfo,
        _config: &TreeBuildConfig,
    ) -> Result<UINode, AutomationError> {
        let delay = self.desktop().slow_trees.get(&window.window_id).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut desktop = self.desktop();
        desktop.tree_reads += 1;
        if desktop.blank_reads > 0 {
            desktop.blank_reads -= 1;
            return Ok(element("Window", &window.title, window.bounds));
        }
        desktop
            .trees
            .get(&window.window_id)
            .cloned()
            .ok_or_else(|| AutomationError::ElementNotFound(window.title.clone()))
    }

    fn capture_screen(&self) -> Result<ScreenCapture, AutomationError> {
        Ok(ScreenCapture {
            rgba: vec![200; 8 * 6 * 4],
            width: 8,
            height: 6,
        })
    }

    fn move_cursor(&self, _point: Point) -> Result<(), AutomationError> {
        Ok(())
    }

    fn click(&self, point: Point, button: MouseButton, clicks: u8) -> Result<(), AutomationError> {
        self.desktop().clicks.push((point, button, clicks));
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<(), AutomationError> {
        self.desktop().typed.push(text.to_string());
        Ok(())
    }

    fn press_keys(&self, keys: &KeyCombo) -> Result<(), AutomationError> {
        self.desktop().keys.push(keys.to_string());
        Ok(())
    }

    fn scroll(
        &self,
        point: Option<Point>,
        direction: ScrollDirection,
        amount: u32,
    ) -> Result<(), AutomationError> {
        self.desktop().scrolls.push((point, direction, amount));
        Ok(())
    }

    fn drag(&self, _from: Point, _to: Point) -> Result<(), AutomationError> {
        Ok(())
    }

    fn launch_application(&self, name: &str) -> Result<(), AutomationError> {
        let mut desktop = self.desktop();
        desktop.launched.push(name.to_string());
        let Some((window, tree)) = desktop.launchable.remove(name) else {
            return Err(AutomationError::PlatformError(format!("{name} is not installed")));
        };
        for w in desktop.windows.iter_mut() {
            w.is_foreground = false;
        }
        desktop.trees.insert(window.window_id, tree);
        desktop.windows.insert(0, window);
        Ok(())
    }

    fn activate_window(&self, window: &WindowInfo) -> Result<(), AutomationError> {
        let mut desktop = self.desktop();
        desktop.activated.push(window.window_id);
        for w in desktop.windows.iter_mut() {
            w.is_foreground = w.window_id == window.window_id;
        }
        Ok(())
    }

    fn shell_invocation(&self, command: &str) -> (String, Vec<String>) {
        if cfg!(windows) {
            (
                "cmd".to_string(),
                vec!["/C".to_string(), command.to_string()],
            )
        } else {
            ("sh".to_string(), vec!["-c".to_string(), command.to_string()])
        }
    }
}

/// Config with no settle pauses so loop tests run quickly.
pub(crate) fn fast_config() -> PilotConfig {
    let mut config = PilotConfig::default();
    config.run.settle_delay_ms = 0;
    config.run.launch_retry_delay_ms = 10;
    config.executor.launch_wait_ms = 500;
    config.executor.launch_poll_ms = 10;
    config.cache.freshness_ms = Some(60_000);
    config
}

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("deskpilot=debug")
        .with_test_writer()
        .try_init();
}

pub(crate) fn session_on(engine: Arc<FakeEngine>, config: PilotConfig) -> Arc<Session> {
    Session::new(engine, Arc::new(config))
}

pub(crate) enum Reply {
    Act(Action),
    Malformed,
    BackendDown,
}

/// Replays a fixed list of replies, then repeats `fallback` (or fails) forever.
/// Every request is kept for inspection.
pub(crate) struct ScriptedReasoning {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Option<Action>,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedReasoning {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn actions(actions: Vec<Action>) -> Arc<Self> {
        Self::new(actions.into_iter().map(Reply::Act).collect())
    }

    pub fn repeating(action: Action) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(action),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub(crate) fn decision(action: Action) -> Decision {
    Decision {
        evaluation: EvaluationTag::Neutral,
        evaluation_note: String::new(),
        plan: String::new(),
        thought: format!("next: {}", action.name()),
        action,
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedReasoning {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, ReasoningError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Reply::Act(action)) => Ok(decision(action)),
            Some(Reply::Malformed) => Err(ReasoningError::Malformed(
                DecisionParseError::NoDecisionFound,
            )),
            Some(Reply::BackendDown) => Err(ReasoningError::Backend("connection refused".into())),
            None => match &self.fallback {
                Some(action) => Ok(decision(action.clone())),
                None => Err(ReasoningError::Backend("script exhausted".into())),
            },
        }
    }
}

pub(crate) fn done(summary: &str) -> Action {
    Action::Done {
        summary: summary.to_string(),
    }
}

pub(crate) fn click(x: i32, y: i32) -> Action {
    Action::Click {
        point: Point::new(x, y),
        button: MouseButton::Left,
        clicks: 1,
    }
}
