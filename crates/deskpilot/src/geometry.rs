//! Screen geometry shared by the tree builder, snapshot and executor.

pub use deskpilot_decision::Point;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned rectangle in screen pixels, `(left, top)` inclusive and
/// `(right, bottom)` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// From the `(x, y, width, height)` form most platform APIs report.
    pub fn from_xywh(x: f64, y: f64, width: f64, height: f64) -> Self {
        let left = x.round() as i32;
        let top = y.round() as i32;
        Self {
            left,
            top,
            right: left + width.round().max(0.0) as i32,
            bottom: top + height.round().max(0.0) as i32,
        }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left && point.x < self.right && point.y >= self.top && point.y < self.bottom
    }

    /// Overlapping region, or `None` when the rectangles do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let clipped = Rect {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        };
        (clipped.right > clipped.left && clipped.bottom > clipped.top).then_some(clipped)
    }

    /// Center point. Always inside a non-empty rectangle.
    pub fn center(&self) -> Point {
        Point::new(
            self.left + self.width() / 2,
            self.top + self.height() / 2,
        )
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{},{},{}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect_and_center() {
        let screen = Rect::new(0, 0, 1920, 1080);
        let partly_off = Rect::new(1800, 1000, 2000, 1200);
        let clipped = partly_off.intersect(&screen).unwrap();
        assert_eq!(clipped, Rect::new(1800, 1000, 1920, 1080));
        assert!(screen.contains(clipped.center()));

        let fully_off = Rect::new(-300, -300, -10, -10);
        assert_eq!(fully_off.intersect(&screen), None);
    }

    #[test]
    fn test_from_xywh() {
        let r = Rect::from_xywh(10.4, 20.6, 100.0, 50.0);
        assert_eq!(r, Rect::new(10, 21, 110, 71));
        assert_eq!(r.area(), 5000);
        assert!(Rect::from_xywh(0.0, 0.0, 0.0, 10.0).is_empty());
    }

    #[test]
    fn test_contains_is_exclusive_on_far_edge() {
        let r = Rect::new(0, 0, 10, 10);
        assert!(r.contains(Point::new(0, 0)));
        assert!(r.contains(Point::new(9, 9)));
        assert!(!r.contains(Point::new(10, 5)));
    }
}
