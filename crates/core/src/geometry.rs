use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest crop edge handed to downstream stages.
pub const MIN_RECT_DIM: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The whole image as a rectangle.
    pub fn full(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    /// Build a rectangle from edges that may lie outside the image (or be
    /// negative) and clamp it into bounds.
    pub fn from_edges(left: i64, top: i64, right: i64, bottom: i64, bounds: Size) -> Self {
        let max_w = i64::from(bounds.width);
        let max_h = i64::from(bounds.height);
        let l = left.clamp(0, max_w);
        let t = top.clamp(0, max_h);
        let r = right.clamp(l, max_w);
        let b = bottom.clamp(t, max_h);
        Rect::new(l as u32, t as u32, (r - l) as u32, (b - t) as u32).clamp_to(bounds)
    }

    /// Clamp into `bounds` and enforce the [`MIN_RECT_DIM`] floor.
    ///
    /// Undersized rectangles grow around their own centre. When the image
    /// itself is smaller than the floor the image extent wins. Idempotent.
    pub fn clamp_to(self, bounds: Size) -> Rect {
        let (x, width) = clamp_axis(self.x, self.width, bounds.width);
        let (y, height) = clamp_axis(self.y, self.height, bounds.height);
        Rect { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn center(&self) -> (f64, f64) {
        (
            f64::from(self.x) + f64::from(self.width) / 2.0,
            f64::from(self.y) + f64::from(self.height) / 2.0,
        )
    }

    pub fn fits_within(&self, bounds: Size) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(bounds.width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(bounds.height)
    }

    /// Smallest rectangle containing every point, or `None` for an empty set.
    pub fn bounding(points: &[(f64, f64)]) -> Option<Rect> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.0, first.1, first.0, first.1);
        for &(x, y) in &points[1..] {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        let min_x = min_x.round().max(0.0);
        let min_y = min_y.round().max(0.0);
        Some(Rect::new(
            min_x as u32,
            min_y as u32,
            (max_x.round() - min_x).max(0.0) as u32,
            (max_y.round() - min_y).max(0.0) as u32,
        ))
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

fn clamp_axis(start: u32, len: u32, extent: u32) -> (u32, u32) {
    let floor = MIN_RECT_DIM.min(extent);
    let start = start.min(extent);
    let len = len.min(extent - start);
    if len >= floor {
        return (start, len);
    }
    let grow = floor - len;
    let start = start.saturating_sub(grow / 2).min(extent - floor);
    (start, floor)
}
