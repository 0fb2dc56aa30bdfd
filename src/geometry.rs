use serde::{Deserialize, Serialize};

/// A fixation target in percent-of-viewport coordinates.
///
/// Targets stay normalized until the moment they are activated; see
/// [`TargetPoint::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetPoint {
    pub x: f64,
    pub y: f64,
}

impl TargetPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Fix the target to pixel coordinates against the given viewport.
    ///
    /// Resolution happens exactly once per activation, so a layout change
    /// mid-window cannot move the point under the sampler.
    pub fn resolve(&self, viewport: Viewport) -> ResolvedPoint {
        ResolvedPoint {
            cx: (self.x / 100.0 * viewport.width).round(),
            cy: (self.y / 100.0 * viewport.height).round(),
        }
    }
}

impl From<(f64, f64)> for TargetPoint {
    fn from(v: (f64, f64)) -> Self {
        TargetPoint { x: v.0, y: v.1 }
    }
}

/// Pixel dimensions of the surface the subject is looking at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Pixel position of an activated target, immutable for the lifetime of
/// its sampling window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedPoint {
    pub cx: f64,
    pub cy: f64,
}

/// Euclidean distance between two pixel positions.
pub fn distance(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    (bx - ax).hypot(by - ay)
}
