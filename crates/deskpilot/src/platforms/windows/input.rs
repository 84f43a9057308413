//! Mouse input through `SendInput`.
//!
//! Keyboard input goes through UI Automation (see `mod.rs`); only pointer
//! events need raw input here.

use crate::errors::AutomationError;
use crate::geometry::Point;
use deskpilot_decision::{MouseButton, ScrollDirection};
use std::thread;
use std::time::Duration;
use tracing::debug;
use windows::Win32::Foundation::POINT;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_MOUSE, MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_HWHEEL,
    MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP,
    MOUSEEVENTF_MOVE, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, MOUSEEVENTF_WHEEL,
    MOUSE_EVENT_FLAGS, MOUSEINPUT,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetCursorPos, GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN,
};

const WHEEL_DELTA: i32 = 120;

/// Map a screen pixel onto the 0..=65535 absolute coordinate space.
fn normalize(value: i32, extent: i32) -> i32 {
    if extent <= 1 {
        return 0;
    }
    ((value.clamp(0, extent - 1) as i64 * 65535) / (extent - 1) as i64) as i32
}

/// Signed wheel amount and the flag for the matching wheel axis.
pub(super) fn wheel_event(direction: ScrollDirection, amount: u32) -> (i32, MOUSE_EVENT_FLAGS) {
    let notches = amount.max(1).min(i32::MAX as u32 / WHEEL_DELTA as u32) as i32;
    match direction {
        ScrollDirection::Up => (notches * WHEEL_DELTA, MOUSEEVENTF_WHEEL),
        ScrollDirection::Down => (-notches * WHEEL_DELTA, MOUSEEVENTF_WHEEL),
        ScrollDirection::Right => (notches * WHEEL_DELTA, MOUSEEVENTF_HWHEEL),
        ScrollDirection::Left => (-notches * WHEEL_DELTA, MOUSEEVENTF_HWHEEL),
    }
}

fn button_flags(button: MouseButton) -> (MOUSE_EVENT_FLAGS, MOUSE_EVENT_FLAGS) {
    match button {
        MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
        MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
        MouseButton::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
    }
}

fn mouse_input(point: Point, data: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
    let (width, height) = unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: normalize(point.x, width),
                dy: normalize(point.y, height),
                mouseData: data,
                dwFlags: MOUSEEVENTF_ABSOLUTE | flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn send(inputs: &[INPUT]) -> Result<(), AutomationError> {
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(AutomationError::PlatformError(format!(
            "SendInput delivered {sent} of {} events",
            inputs.len()
        )));
    }
    Ok(())
}

pub(super) fn cursor_position() -> Result<Point, AutomationError> {
    let mut pos = POINT { x: 0, y: 0 };
    unsafe { GetCursorPos(&mut pos) }
        .map_err(|e| AutomationError::PlatformError(format!("GetCursorPos failed: {e}")))?;
    Ok(Point::new(pos.x, pos.y))
}

pub(super) fn move_to(point: Point) -> Result<(), AutomationError> {
    send(&[mouse_input(point, 0, MOUSEEVENTF_MOVE)])
}

pub(super) fn click(point: Point, button: MouseButton, clicks: u8) -> Result<(), AutomationError> {
    let (down, up) = button_flags(button);
    move_to(point)?;
    for i in 0..clicks.max(1) {
        if i > 0 {
            thread::sleep(Duration::from_millis(50));
        }
        send(&[mouse_input(point, 0, down), mouse_input(point, 0, up)])?;
    }
    debug!("[input] {:?} x{} at ({}, {})", button, clicks, point.x, point.y);
    Ok(())
}

pub(super) fn scroll(
    point: Option<Point>,
    direction: ScrollDirection,
    amount: u32,
) -> Result<(), AutomationError> {
    let at = match point {
        Some(p) => {
            move_to(p)?;
            p
        }
        None => cursor_position()?,
    };
    let (delta, flag) = wheel_event(direction, amount);
    send(&[mouse_input(at, delta, flag)])
}

pub(super) fn drag(from: Point, to: Point) -> Result<(), AutomationError> {
    move_to(from)?;
    send(&[mouse_input(from, 0, MOUSEEVENTF_LEFTDOWN)])?;
    thread::sleep(Duration::from_millis(50));

    // A few intermediate moves so drop targets see the drag.
    let steps = 10;
    let mut moved = Ok(());
    for i in 1..=steps {
        let p = Point::new(
            from.x + (to.x - from.x) * i / steps,
            from.y + (to.y - from.y) * i / steps,
        );
        moved = send(&[mouse_input(p, 0, MOUSEEVENTF_MOVE)]);
        if moved.is_err() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    // Release even when a move failed so the button is not left held.
    let released = send(&[mouse_input(to, 0, MOUSEEVENTF_LEFTUP)]);
    moved.and(released)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_spans_full_range() {
        assert_eq!(normalize(0, 1920), 0);
        assert_eq!(normalize(1919, 1920), 65535);
        assert_eq!(normalize(5000, 1920), 65535);
        assert_eq!(normalize(-3, 1920), 0);
    }

    #[test]
    fn test_wheel_event_signs() {
        assert_eq!(wheel_event(ScrollDirection::Up, 3), (360, MOUSEEVENTF_WHEEL));
        assert_eq!(wheel_event(ScrollDirection::Down, 1), (-120, MOUSEEVENTF_WHEEL));
        assert_eq!(wheel_event(ScrollDirection::Left, 0), (-120, MOUSEEVENTF_HWHEEL));
    }
}
