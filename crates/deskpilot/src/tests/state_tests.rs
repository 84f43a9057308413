use super::*;
use crate::executor::execute_action;
use crate::snapshot::PerceptionSource;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_offscreen_and_disabled_controls_are_dropped() {
    let mut tree = window_with_buttons(&["File", "Edit", "Save"]);
    let mut hidden = element("Button", "Hidden", Rect::new(100, 200, 200, 240));
    hidden.attributes.is_offscreen = true;
    let mut disabled = element("Button", "Disabled", Rect::new(300, 200, 400, 240));
    disabled.attributes.enabled = false;
    let beyond = element("Button", "Beyond", Rect::new(3000, 200, 3100, 240));
    tree.children.extend([hidden, disabled, beyond]);

    let engine = FakeEngine::notepad();
    engine.desktop().trees.insert(1, tree);
    let session = session_on(engine, fast_config());

    let snapshot = session.get_state(false, None).await;
    assert_eq!(snapshot.source, PerceptionSource::Tree);
    let names: Vec<&str> = snapshot.interactive.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["File", "Edit", "Save"]);
    assert_eq!(snapshot.foreground.name, "notepad");

    let diagnostics = snapshot.diagnostics.as_ref().unwrap();
    assert_eq!(diagnostics.discarded_hidden, 1);
    assert_eq!(diagnostics.discarded_disabled, 1);
    assert_eq!(diagnostics.discarded_offscreen, 1);
}

#[tokio::test]
async fn test_every_center_lies_inside_its_bounds() {
    let mut tree = window_with_buttons(&["File", "Edit", "Save"]);
    // Straddles the right edge of the screen; must be clipped.
    tree.children
        .push(element("Button", "Edge", Rect::new(1900, 100, 2000, 140)));
    let engine = FakeEngine::notepad();
    engine.desktop().trees.insert(1, tree);
    let session = session_on(engine, fast_config());

    let snapshot = session.get_state(false, None).await;
    assert_eq!(snapshot.interactive.len(), 4);
    for node in snapshot.nodes() {
        assert!(node.bounds.contains(node.center), "{node:?}");
        assert!(SCREEN.contains(node.center));
    }
}

#[tokio::test]
async fn test_repeated_get_state_is_served_from_cache() {
    let engine = FakeEngine::notepad();
    let session = session_on(engine.clone(), fast_config());

    let first = session.get_state(false, None).await;
    let reads = engine.desktop().tree_reads;
    let second = session.get_state(false, None).await;

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.desktop().tree_reads, reads);
    assert_eq!(session.cache_stats().hits, 1);

    // A different key is a different entry.
    let targeted = session.get_state(false, Some("notepad")).await;
    assert!(!Arc::ptr_eq(&first, &targeted));
}

#[tokio::test]
async fn test_mutating_action_invalidates_snapshot() {
    let engine = FakeEngine::notepad();
    let session = session_on(engine.clone(), fast_config());

    let before = session.get_state(false, None).await;
    let observation = execute_action(&session, &click(150, 120)).await;
    assert!(observation.is_success(), "{}", observation.message);

    let after = session.get_state(false, None).await;
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(after.generation > before.generation);
    assert_eq!(engine.desktop().clicks.len(), 1);
}

#[tokio::test]
async fn test_wait_keeps_snapshot_cached() {
    let engine = FakeEngine::notepad();
    let session = session_on(engine, fast_config());

    let before = session.get_state(false, None).await;
    let observation = execute_action(&session, &Action::Wait { seconds: 0.0 }).await;
    assert!(observation.is_success());
    let after = session.get_state(false, None).await;
    assert!(Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn test_sparse_tree_falls_back_to_screenshot() {
    let engine = FakeEngine::notepad();
    engine
        .desktop()
        .trees
        .insert(1, window_with_buttons(&["OK"]));
    let session = session_on(engine, fast_config());

    let snapshot = session.get_state(false, None).await;
    assert_eq!(snapshot.source, PerceptionSource::VisionFallback);
    assert!(snapshot.screenshot.is_some());
    assert!(snapshot.interactive.is_empty());
    assert!(snapshot
        .fallback_reason
        .as_deref()
        .unwrap()
        .contains("sparse"));
    // Layout survives the fallback.
    assert_eq!(snapshot.foreground.name, "notepad");
}

#[tokio::test]
async fn test_missing_target_window_falls_back_to_screenshot() {
    let session = session_on(FakeEngine::notepad(), fast_config());

    let snapshot = session.get_state(false, Some("calculator")).await;
    assert_eq!(snapshot.source, PerceptionSource::VisionFallback);
    assert!(snapshot
        .fallback_reason
        .as_deref()
        .unwrap()
        .contains("calculator"));
}

#[tokio::test]
async fn test_use_vision_attaches_screenshot_to_tree() {
    let session = session_on(FakeEngine::notepad(), fast_config());

    let snapshot = session.get_state(true, None).await;
    assert_eq!(snapshot.source, PerceptionSource::TreeWithVision);
    assert_eq!(snapshot.interactive.len(), 3);
    let shot = snapshot.screenshot.as_ref().unwrap();
    assert_eq!(shot.mime_type, "image/jpeg");
    assert_eq!((shot.width, shot.height), (8, 6));
}

#[tokio::test]
async fn test_slow_foreground_tree_falls_back_to_screenshot() {
    let engine = FakeEngine::notepad();
    engine
        .desktop()
        .slow_trees
        .insert(1, Duration::from_millis(400));
    let mut config = fast_config();
    config.tree.timeout_ms = 200;
    let session = session_on(engine, config);

    let snapshot = session.get_state(false, None).await;
    assert_eq!(snapshot.source, PerceptionSource::VisionFallback);
    assert!(snapshot.interactive.is_empty());
    assert!(snapshot
        .fallback_reason
        .as_deref()
        .unwrap()
        .contains("timed out"));
}

#[tokio::test]
async fn test_slow_background_window_keeps_foreground_tree() {
    let engine = FakeEngine::notepad();
    {
        let mut desktop = engine.desktop();
        desktop.windows.push(window(2, "calc", "Calculator", false));
        desktop
            .trees
            .insert(2, window_with_buttons(&["1", "2", "3"]));
        desktop.slow_trees.insert(2, Duration::from_millis(400));
    }
    let mut config = fast_config();
    config.tree.timeout_ms = 200;
    let session = session_on(engine, config);

    let snapshot = session.get_state(false, None).await;
    assert_eq!(snapshot.source, PerceptionSource::Tree);
    let names: Vec<&str> = snapshot.interactive.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["File", "Edit", "Save"]);
    assert_eq!(snapshot.diagnostics.as_ref().unwrap().windows_failed, 1);
    assert_eq!(snapshot.background.len(), 1);
}
