//! The owner context of one viewer instance.
//!
//! Every state change (installing a document, replacing the search session,
//! moving the current result, recomputing highlights) and every event
//! emission happens under the single `state` lock. Opens and page scans run
//! on background workers and come back through that lock, where their
//! generation is checked before anything observable happens.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, field, info, instrument, warn, Span};

use crate::config::ViewerConfig;
use crate::coordinator::{Admission, Completion, LoadTicket, ReloadCoordinator};
use crate::document::{DocumentEngine, DocumentMetadata, DocumentSlot, SearchQuery};
use crate::events::{EventBus, LoadFailureKind, SearchProgress, ViewerEvent};
use crate::generation::{Generation, GenerationCounter};
use crate::highlight::{HighlightRegion, HighlightSync};
use crate::navigator::focus_scroll_delta;
use crate::search::{
    IncrementalSearch, SearchMatch, SearchObserver, SearchOptions, SearchOutcome, SearchSession,
};
use crate::source::LoadRequest;
use crate::surface::RenderSurface;

struct ViewerState {
    coordinator: ReloadCoordinator,
    session: Option<SearchSession>,
    highlight: HighlightSync,
    current_page: usize,
}

impl ViewerState {
    fn page_count(&self) -> usize {
        self.coordinator.current().map_or(0, |slot| slot.page_count())
    }
}

struct Inner {
    engine: Arc<dyn DocumentEngine>,
    surface: Arc<dyn RenderSurface>,
    config: ViewerConfig,
    runtime: Handle,
    documents: GenerationCounter,
    searches: GenerationCounter,
    events: EventBus,
    state: Mutex<ViewerState>,
}

/// Cheaply cloneable handle to a viewer.
#[derive(Clone)]
pub struct Viewer {
    inner: Arc<Inner>,
}

impl Viewer {
    /// Binds to the ambient tokio runtime.
    pub fn new(
        engine: Arc<dyn DocumentEngine>,
        surface: Arc<dyn RenderSurface>,
        config: ViewerConfig,
    ) -> Result<Self> {
        let runtime = Handle::try_current().context("viewer must be created inside a tokio runtime")?;
        Ok(Self::with_runtime(engine, surface, config, runtime))
    }

    pub fn with_runtime(
        engine: Arc<dyn DocumentEngine>,
        surface: Arc<dyn RenderSurface>,
        config: ViewerConfig,
        runtime: Handle,
    ) -> Self {
        let documents = GenerationCounter::new();
        let coordinator = ReloadCoordinator::new(documents.clone(), config.default_page);
        Self {
            inner: Arc::new(Inner {
                engine,
                surface,
                config,
                runtime,
                documents,
                searches: GenerationCounter::new(),
                events: EventBus::new(),
                state: Mutex::new(ViewerState {
                    coordinator,
                    session: None,
                    highlight: HighlightSync::new(),
                    current_page: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> UnboundedReceiver<ViewerEvent> {
        self.inner.events.subscribe()
    }

    /// Starts loading `request`, or parks it as the single pending reload
    /// while another load is in flight. Returns the new generation when the
    /// load started immediately.
    pub fn request_load(&self, request: LoadRequest) -> Option<Generation> {
        let admission = self.inner.state.lock().coordinator.request(request);
        match admission {
            Admission::Started(ticket) => {
                let generation = ticket.generation;
                self.spawn_load(ticket);
                Some(generation)
            }
            Admission::Coalesced => None,
        }
    }

    /// Re-requests the last load, keeping the page currently shown. Returns
    /// false when nothing was ever requested.
    pub fn reload(&self) -> bool {
        let request = {
            let state = self.inner.state.lock();
            state.coordinator.last_request().cloned().map(|mut request| {
                if state.coordinator.current().is_some() {
                    request.restore_page = Some(state.current_page);
                }
                request
            })
        };
        match request {
            Some(request) => {
                self.request_load(request);
                true
            }
            None => false,
        }
    }

    /// Retries the last load with `password`.
    pub fn unlock(&self, password: impl Into<String>) -> bool {
        let request = self.inner.state.lock().coordinator.last_request().cloned();
        match request {
            Some(request) => {
                self.request_load(request.with_password(password));
                true
            }
            None => false,
        }
    }

    /// Invalidates any in-flight load and releases the current document.
    pub fn clear_source(&self) {
        let released = {
            let mut state = self.inner.state.lock();
            let released = state.coordinator.clear();
            self.inner.searches.advance();
            state.session = None;
            state.current_page = 0;
            self.inner.sync_highlights(&mut state);
            released
        };
        if let Some(slot) = released {
            self.inner.runtime.spawn_blocking(move || slot.release());
        }
    }

    fn spawn_load(&self, ticket: LoadTicket) {
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            let mut next = Some(ticket);
            while let Some(ticket) = next.take() {
                next = inner.load(&ticket).await;
            }
        });
    }

    /// Runs a search bound to the current document and resolves with its
    /// results. A superseded run resolves with no results and emits nothing
    /// further.
    #[instrument(
        skip(self, options),
        fields(generation = %self.inner.documents.current(), source = field::Empty)
    )]
    pub async fn search(&self, query: &str, options: SearchOptions) -> Vec<SearchMatch> {
        let Some(parsed) = SearchQuery::parse(query) else {
            self.clear_search();
            return Vec::new();
        };

        let run = {
            let mut state = self.inner.state.lock();
            let slot = match state.coordinator.current() {
                Some(slot) if slot.page_count() > 0 => Arc::clone(slot),
                _ => {
                    debug!("no document loaded; search skipped");
                    return Vec::new();
                }
            };
            if let Some(request) = state.coordinator.last_request() {
                Span::current().record("source", field::display(request.source.id()));
            }
            let session = self.inner.searches.next_guard();
            state.session = None;
            self.inner.sync_highlights(&mut state);
            IncrementalSearch::new(slot, parsed, options, self.inner.documents.guard(), session)
        };

        match run.run(&*self.inner).await {
            SearchOutcome::Completed(results) => results,
            SearchOutcome::Superseded => Vec::new(),
        }
    }

    /// Discards the live session and cancels an in-flight search.
    pub fn clear_search(&self) {
        let mut state = self.inner.state.lock();
        self.inner.searches.advance();
        state.session = None;
        self.inner.sync_highlights(&mut state);
    }

    pub fn highlight_search_results(&self, enable: bool) {
        let mut state = self.inner.state.lock();
        state.highlight.set_enabled(enable);
        self.inner.sync_highlights(&mut state);
    }

    /// Out-of-range indices are ignored.
    pub fn go_to_search_result(&self, index: usize) -> bool {
        let mut state = self.inner.state.lock();
        let moved = match state.session.as_mut() {
            Some(session) => session.navigator_mut().go_to(index),
            None => false,
        };
        if moved {
            self.inner.after_navigation(&mut state);
        }
        moved
    }

    pub fn next_search_result(&self) -> Option<usize> {
        self.step_search_result(true)
    }

    pub fn previous_search_result(&self) -> Option<usize> {
        self.step_search_result(false)
    }

    fn step_search_result(&self, forward: bool) -> Option<usize> {
        let mut state = self.inner.state.lock();
        let session = state.session.as_mut()?;
        let index = if forward {
            session.navigator_mut().next()
        } else {
            session.navigator_mut().previous()
        }?;
        self.inner.after_navigation(&mut state);
        Some(index)
    }

    /// Out-of-range pages are ignored.
    pub fn go_to_page(&self, page_index: usize) -> bool {
        let mut state = self.inner.state.lock();
        if page_index >= state.page_count() {
            return false;
        }
        self.inner.show_page(&mut state, page_index);
        true
    }

    pub fn page_count(&self) -> usize {
        self.inner.state.lock().page_count()
    }

    pub fn current_page(&self) -> usize {
        self.inner.state.lock().current_page
    }

    pub fn metadata(&self) -> Option<DocumentMetadata> {
        let state = self.inner.state.lock();
        state.coordinator.current().map(|slot| slot.metadata().clone())
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().coordinator.is_busy()
    }

    pub fn generation(&self) -> Generation {
        self.inner.documents.current()
    }

    pub fn search_query(&self) -> Option<String> {
        let state = self.inner.state.lock();
        state.session.as_ref().map(|session| session.query().to_owned())
    }

    pub fn search_results(&self) -> Vec<SearchMatch> {
        let state = self.inner.state.lock();
        state
            .session
            .as_ref()
            .map(|session| session.results().to_vec())
            .unwrap_or_default()
    }

    pub fn current_search_index(&self) -> Option<usize> {
        let state = self.inner.state.lock();
        state.session.as_ref().and_then(|session| session.current_index())
    }

    pub fn highlight_regions(&self) -> Vec<HighlightRegion> {
        self.inner.state.lock().highlight.regions().to_vec()
    }
}

impl Inner {
    /// Opens one ticket and applies the outcome. Returns the trailing ticket
    /// to run next, if requests were coalesced meanwhile.
    #[instrument(skip(self, ticket), fields(generation = %ticket.generation, source = %ticket.request.source.id()))]
    async fn load(&self, ticket: &LoadTicket) -> Option<LoadTicket> {
        debug!(source = %ticket.request.source, "opening document");
        let outcome = self.engine.open(&ticket.request).await;

        let mut retired = Vec::new();
        let next = {
            let mut state = self.state.lock();
            let completion = state.coordinator.complete(ticket, outcome);
            let next = completion.next_ticket().cloned();
            match completion {
                Completion::Stale { orphan } => {
                    if let Some(handle) = orphan {
                        self.runtime.spawn_blocking(move || handle.close());
                    }
                }
                Completion::Installed {
                    slot,
                    previous,
                    page,
                    ..
                } => {
                    self.install(&mut state, &slot, page);
                    retired.extend(previous);
                }
                Completion::Failed { error, .. } => {
                    warn!(error = %error, "failed to open document");
                    let kind = if error.is_password_failure() {
                        LoadFailureKind::Password
                    } else {
                        LoadFailureKind::Open
                    };
                    self.events.emit(ViewerEvent::Error {
                        generation: ticket.generation,
                        kind,
                        message: error.to_string(),
                    });
                }
            }
            next
        };

        if !retired.is_empty() {
            let release = tokio::task::spawn_blocking(move || {
                for slot in retired {
                    slot.release();
                }
            });
            if let Err(err) = release.await {
                warn!(error = %err, "failed to release previous document");
            }
        }

        next
    }

    fn install(&self, state: &mut ViewerState, slot: &Arc<DocumentSlot>, page: usize) {
        self.searches.advance();
        state.session = None;
        self.sync_highlights(state);

        info!(
            generation = %slot.generation(),
            pages = slot.page_count(),
            "document loaded"
        );
        self.events.emit(ViewerEvent::DocumentLoaded {
            generation: slot.generation(),
            page_count: slot.page_count(),
            metadata: slot.metadata().clone(),
        });

        state.current_page = page;
        self.surface.navigate_to_page(page, false);
        self.events.emit(ViewerEvent::PageChanged {
            page_index: page,
            page_count: slot.page_count(),
        });
    }

    fn sync_highlights(&self, state: &mut ViewerState) {
        let regions = match &state.session {
            Some(session) => state
                .highlight
                .recompute(session.results(), session.current_index()),
            None => {
                state.highlight.clear();
                state.highlight.regions()
            }
        };
        self.surface.render_highlight_overlay(regions);
    }

    fn show_page(&self, state: &mut ViewerState, page_index: usize) {
        let changed = state.current_page != page_index;
        state.current_page = page_index;
        self.surface
            .navigate_to_page(page_index, self.config.animate_navigation);
        if changed {
            self.events.emit(ViewerEvent::PageChanged {
                page_index,
                page_count: state.page_count(),
            });
        }
    }

    fn focus_current(&self, state: &mut ViewerState) {
        let Some((page_index, center)) = state
            .session
            .as_ref()
            .and_then(|session| session.current_match())
            .map(|found| (found.page_index, found.bounds.center()))
        else {
            return;
        };

        self.show_page(state, page_index);
        let delta = focus_scroll_delta(
            self.surface.viewport(),
            center,
            self.config.scroll_orientation,
            self.config.focus_bias,
        );
        self.surface.scroll_by(delta);
    }

    fn after_navigation(&self, state: &mut ViewerState) {
        self.sync_highlights(state);
        self.focus_current(state);
        if let Some(session) = &state.session {
            self.events
                .emit(ViewerEvent::SearchResultsFound(session.snapshot()));
        }
    }
}

impl SearchObserver for Inner {
    fn on_progress(&self, search: &IncrementalSearch, progress: SearchProgress) -> bool {
        let _state = self.state.lock();
        if search.is_stale() {
            return false;
        }
        self.events.emit(ViewerEvent::SearchProgress(progress));
        true
    }

    fn on_complete(&self, search: IncrementalSearch) -> SearchOutcome {
        let mut state = self.state.lock();
        if search.is_stale() {
            debug!(query = search.query(), "dropping superseded search results");
            return SearchOutcome::Superseded;
        }

        let session = search.into_session();
        debug!(
            query = session.query(),
            generation = %session.generation(),
            results = session.results().len(),
            "search complete"
        );
        let results = session.results().to_vec();
        // The run's option picks the initial display; the toggle overrides it afterwards.
        state.highlight.set_enabled(session.options().highlight);
        state.session = Some(session);
        self.after_navigation(&mut state);
        SearchOutcome::Completed(results)
    }
}
