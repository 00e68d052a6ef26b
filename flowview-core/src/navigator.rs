use serde::{Deserialize, Serialize};

/// Fraction of the viewport between its leading edge and a focused match.
pub const DEFAULT_FOCUS_BIAS: f32 = 0.35;

/// Current-result cursor over a fixed-length result list. Movement wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchNavigator {
    len: usize,
    current: Option<usize>,
}

impl SearchNavigator {
    /// Starts on the first result when there is one.
    pub fn new(len: usize) -> Self {
        Self {
            len,
            current: (len > 0).then_some(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Returns false, leaving the cursor alone, for an out-of-range index.
    pub fn go_to(&mut self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.current = Some(index);
        true
    }

    pub fn next(&mut self) -> Option<usize> {
        self.step(1)
    }

    pub fn previous(&mut self) -> Option<usize> {
        self.step(-1)
    }

    fn step(&mut self, delta: isize) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let len = self.len as isize;
        let next = match self.current {
            Some(index) => (index as isize + delta).rem_euclid(len) as usize,
            None if delta >= 0 => 0,
            None => self.len - 1,
        };
        self.current = Some(next);
        Some(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollOrientation {
    #[default]
    Vertical,
    Horizontal,
}

/// Visible area in device pixels plus the current zoom factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1.0,
            height: 1.0,
            zoom: 1.0,
        }
    }
}

/// Scroll delta along the scroll axis that places `center` (un-zoomed page
/// coordinates) at `bias` of the viewport extent from its leading edge.
pub fn focus_scroll_delta(
    viewport: Viewport,
    center: (f32, f32),
    orientation: ScrollOrientation,
    bias: f32,
) -> f32 {
    let zoom = viewport.zoom.max(0.1);
    match orientation {
        ScrollOrientation::Vertical => center.1 * zoom - bias * viewport.height.max(1.0),
        ScrollOrientation::Horizontal => center.0 * zoom - bias * viewport.width.max(1.0),
    }
}
