//! Generation-guarded reload and incremental search for paginated document
//! viewers.

pub mod config;
pub mod coordinator;
pub mod document;
pub mod events;
pub mod generation;
pub mod highlight;
pub mod navigator;
pub mod search;
pub mod source;
pub mod surface;
pub mod text;
pub mod viewer;

pub use config::ViewerConfig;
pub use coordinator::{Admission, Completion, LoadTicket, ReloadCoordinator};
pub use document::{
    DocumentEngine, DocumentHandle, DocumentMetadata, DocumentSlot, FindOptions, OpenError,
    PageRect, PageSize, SearchQuery, TextMatch,
};
pub use events::{EventBus, LoadFailureKind, SearchProgress, SearchResults, ViewerEvent};
pub use generation::{Generation, GenerationCounter, GenerationGuard};
pub use highlight::{Emphasis, HighlightRegion, HighlightStyle, HighlightSync, NormalizedRect};
pub use navigator::{
    focus_scroll_delta, ScrollOrientation, SearchNavigator, Viewport, DEFAULT_FOCUS_BIAS,
};
pub use search::{
    IncrementalSearch, SearchMatch, SearchObserver, SearchOptions, SearchOutcome, SearchSession,
    DEFAULT_MAX_RESULTS,
};
pub use source::{DocumentSource, LoadRequest, SourceId, SourceParseError};
pub use surface::{NullSurface, RenderSurface};
pub use text::{find_in_words, PageWord, TextDocument, TextEngine};
pub use viewer::Viewer;
