//! Incremental, page-by-page search.
//!
//! An [`IncrementalSearch`] walks pages in index order, asks the engine for
//! each page's matches on a blocking worker, and reports every scanned page
//! to a [`SearchObserver`]. It carries two guards: the document generation
//! current when it started and its own search generation. Once either moves
//! on, or the slot it reads from is released, the run stops producing
//! effects and its partial results are dropped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::{DocumentSlot, FindOptions, PageRect, PageSize, SearchQuery};
use crate::events::{SearchProgress, SearchResults};
use crate::generation::{Generation, GenerationGuard};
use crate::navigator::SearchNavigator;

pub const DEFAULT_MAX_RESULTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub match_case: bool,
    pub whole_word: bool,
    pub highlight: bool,
    pub search_all_pages: bool,
    pub max_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            match_case: false,
            whole_word: false,
            highlight: true,
            search_all_pages: true,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl SearchOptions {
    pub fn effective_max_results(&self) -> usize {
        self.max_results.max(1)
    }

    fn find_options(&self) -> FindOptions {
        FindOptions {
            match_case: self.match_case,
            whole_word: self.whole_word,
        }
    }
}

/// One accepted occurrence. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMatch {
    /// Position in the session's (page, position-in-page) order.
    pub match_index: usize,
    pub page_index: usize,
    pub text: String,
    /// Page-space bounds covering every rectangle of the occurrence.
    pub bounds: PageRect,
    pub page_size: PageSize,
}

/// A completed search: its results plus the navigation cursor over them.
#[derive(Debug, Clone)]
pub struct SearchSession {
    query: String,
    options: SearchOptions,
    generation: Generation,
    results: Vec<SearchMatch>,
    navigator: SearchNavigator,
}

impl SearchSession {
    pub fn new(
        query: String,
        options: SearchOptions,
        generation: Generation,
        results: Vec<SearchMatch>,
    ) -> Self {
        Self {
            navigator: SearchNavigator::new(results.len()),
            query,
            options,
            generation,
            results,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// The document generation the session was bound to.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn results(&self) -> &[SearchMatch] {
        &self.results
    }

    pub fn current_index(&self) -> Option<usize> {
        self.navigator.current()
    }

    pub fn current_match(&self) -> Option<&SearchMatch> {
        self.navigator.current().and_then(|i| self.results.get(i))
    }

    pub fn navigator_mut(&mut self) -> &mut SearchNavigator {
        &mut self.navigator
    }

    pub fn snapshot(&self) -> SearchResults {
        SearchResults {
            query: self.query.clone(),
            results: self.results.clone(),
            current_index: self.navigator.current(),
            is_complete: true,
        }
    }
}

#[derive(Debug)]
pub enum SearchOutcome {
    Completed(Vec<SearchMatch>),
    Superseded,
}

/// Receives a run's observable effects on the owner context.
///
/// Implementations check [`IncrementalSearch::is_stale`] under the same lock
/// that serializes every other state change before emitting anything.
pub trait SearchObserver: Send + Sync {
    /// Returns false when the run has gone stale and must stop.
    fn on_progress(&self, search: &IncrementalSearch, progress: SearchProgress) -> bool;

    fn on_complete(&self, search: IncrementalSearch) -> SearchOutcome;
}

#[derive(Debug, Clone)]
struct PageHit {
    text: String,
    bounds: PageRect,
    page_size: PageSize,
}

#[derive(Clone)]
struct PageScanner {
    slot: Arc<DocumentSlot>,
    query: SearchQuery,
    find: FindOptions,
}

impl PageScanner {
    /// Blocking. `None` once the slot has been released.
    fn scan(&self, page_index: usize, limit: usize) -> Option<Vec<PageHit>> {
        self.slot.with_handle(|handle| {
            let page_size = match handle.page_size(page_index) {
                Ok(size) => size,
                Err(err) => {
                    warn!(page = page_index, error = %err, "failed to read page size");
                    PageSize::LETTER
                }
            };

            let mut matches = match handle.find_on_page(page_index, &self.query, self.find) {
                Ok(matches) => matches,
                Err(err) => {
                    warn!(page = page_index, error = %err, "page search failed; skipping page");
                    return Vec::new();
                }
            };
            matches.sort_by_key(|m| m.offset);
            matches.truncate(limit);

            matches
                .into_iter()
                .map(|m| PageHit {
                    bounds: PageRect::bounding(&m.rects).unwrap_or_default(),
                    text: m.text,
                    page_size,
                })
                .collect()
        })
    }
}

pub struct IncrementalSearch {
    scanner: PageScanner,
    options: SearchOptions,
    document: GenerationGuard,
    session: GenerationGuard,
    results: Vec<SearchMatch>,
    pages_scanned: usize,
    total_pages: usize,
}

impl IncrementalSearch {
    /// `document` must be captured from the document counter and `session`
    /// freshly allocated from the search counter.
    pub fn new(
        slot: Arc<DocumentSlot>,
        query: SearchQuery,
        options: SearchOptions,
        document: GenerationGuard,
        session: GenerationGuard,
    ) -> Self {
        Self {
            total_pages: slot.page_count(),
            scanner: PageScanner {
                find: options.find_options(),
                slot,
                query,
            },
            options,
            document,
            session,
            results: Vec::new(),
            pages_scanned: 0,
        }
    }

    pub fn query(&self) -> &str {
        self.scanner.query.text()
    }

    pub fn is_stale(&self) -> bool {
        self.document.is_stale() || self.session.is_stale() || self.scanner.slot.is_released()
    }

    fn remaining_capacity(&self) -> usize {
        self.options
            .effective_max_results()
            .saturating_sub(self.results.len())
    }

    fn absorb(&mut self, page_index: usize, hits: Vec<PageHit>) {
        for hit in hits.into_iter().take(self.remaining_capacity()) {
            self.results.push(SearchMatch {
                match_index: self.results.len(),
                page_index,
                text: hit.text,
                bounds: hit.bounds,
                page_size: hit.page_size,
            });
        }
        self.pages_scanned = page_index + 1;
    }

    fn progress(&self) -> SearchProgress {
        SearchProgress {
            query: self.query().to_owned(),
            current_page: self.pages_scanned,
            total_pages: self.total_pages,
            result_count: self.results.len(),
        }
    }

    fn is_done(&self) -> bool {
        self.results.len() >= self.options.effective_max_results()
            || (!self.options.search_all_pages && !self.results.is_empty())
    }

    pub async fn run<O: SearchObserver>(mut self, observer: &O) -> SearchOutcome {
        for page_index in 0..self.total_pages {
            if self.is_stale() {
                debug!(query = self.query(), page = page_index, "search superseded");
                return SearchOutcome::Superseded;
            }

            let scanner = self.scanner.clone();
            let limit = self.remaining_capacity();
            let hits = match tokio::task::spawn_blocking(move || scanner.scan(page_index, limit)).await {
                Ok(Some(hits)) => hits,
                Ok(None) => return SearchOutcome::Superseded,
                Err(err) => {
                    warn!(page = page_index, error = %err, "page search worker failed");
                    Vec::new()
                }
            };

            self.absorb(page_index, hits);
            let progress = self.progress();
            if !observer.on_progress(&self, progress) {
                debug!(query = self.query(), page = page_index, "search superseded");
                return SearchOutcome::Superseded;
            }

            if self.is_done() {
                break;
            }
        }

        observer.on_complete(self)
    }

    /// Turns a finished run into the live session.
    pub fn into_session(self) -> SearchSession {
        SearchSession::new(
            self.scanner.query.text().to_owned(),
            self.options,
            self.document.generation(),
            self.results,
        )
    }
}
