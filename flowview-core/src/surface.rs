use crate::highlight::HighlightRegion;
use crate::navigator::Viewport;

/// The rendering layer, as seen from the viewer.
///
/// Calls arrive from the owner context while viewer state is locked, so
/// implementations must return promptly and must not call back into the
/// viewer.
pub trait RenderSurface: Send + Sync {
    fn viewport(&self) -> Viewport {
        Viewport::default()
    }

    fn navigate_to_page(&self, page_index: usize, animate: bool);

    fn scroll_by(&self, delta: f32);

    fn render_highlight_overlay(&self, regions: &[HighlightRegion]);
}

/// A surface for headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSurface;

impl RenderSurface for NullSurface {
    fn navigate_to_page(&self, _page_index: usize, _animate: bool) {}

    fn scroll_by(&self, _delta: f32) {}

    fn render_highlight_overlay(&self, _regions: &[HighlightRegion]) {}
}
