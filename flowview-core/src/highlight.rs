use serde::Serialize;

use crate::document::{PageRect, PageSize};
use crate::search::SearchMatch;

/// Which tier a highlighted match belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Emphasis {
    /// The focused match.
    Current,
    Other,
}

/// RGBA fill and stroke for one emphasis tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightStyle {
    pub fill: [u8; 4],
    pub stroke: [u8; 4],
}

impl Emphasis {
    pub fn style(self) -> HighlightStyle {
        match self {
            Emphasis::Current => HighlightStyle {
                fill: [255, 143, 20, 170],
                stroke: [216, 96, 0, 220],
            },
            Emphasis::Other => HighlightStyle {
                fill: [255, 235, 60, 125],
                stroke: [180, 150, 0, 180],
            },
        }
    }
}

/// A rectangle in `[0, 1] x [0, 1]` page-relative coordinates, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub fn from_page_rect(bounds: &PageRect, page: PageSize) -> Self {
        let page_width = page.width.max(1.0);
        let page_height = page.height.max(1.0);
        Self {
            x: (bounds.x / page_width).clamp(0.0, 1.0),
            y: (bounds.y / page_height).clamp(0.0, 1.0),
            width: (bounds.width / page_width).clamp(0.001, 1.0),
            height: (bounds.height / page_height).clamp(0.001, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighlightRegion {
    pub result_index: usize,
    pub page_index: usize,
    pub rect: NormalizedRect,
    pub emphasis: Emphasis,
}

impl HighlightRegion {
    pub fn is_current(&self) -> bool {
        self.emphasis == Emphasis::Current
    }
}

/// Derives the overlay for the live search session.
///
/// The region set is a pure function of the results, the current index and
/// the highlight switch, so recomputing with unchanged inputs yields the
/// same regions.
#[derive(Debug, Clone)]
pub struct HighlightSync {
    enabled: bool,
    regions: Vec<HighlightRegion>,
}

impl Default for HighlightSync {
    fn default() -> Self {
        Self {
            enabled: true,
            regions: Vec::new(),
        }
    }
}

impl HighlightSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn regions(&self) -> &[HighlightRegion] {
        &self.regions
    }

    pub fn regions_on_page(&self, page_index: usize) -> impl Iterator<Item = &HighlightRegion> {
        self.regions
            .iter()
            .filter(move |region| region.page_index == page_index)
    }

    pub fn recompute(&mut self, results: &[SearchMatch], current: Option<usize>) -> &[HighlightRegion] {
        self.regions.clear();
        if self.enabled {
            self.regions.extend(results.iter().map(|result| HighlightRegion {
                result_index: result.match_index,
                page_index: result.page_index,
                rect: NormalizedRect::from_page_rect(&result.bounds, result.page_size),
                emphasis: if Some(result.match_index) == current {
                    Emphasis::Current
                } else {
                    Emphasis::Other
                },
            }));
        }
        &self.regions
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }
}
