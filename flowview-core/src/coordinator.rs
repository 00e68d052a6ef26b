//! Load sequencing.
//!
//! The coordinator owns the document generation counter, the single in-flight
//! attempt, the single pending (coalesced) request and the installed slot. It
//! is a plain state machine: the owner context drives it under its lock and
//! performs the actual opens on background workers.

use std::sync::Arc;

use tracing::debug;

use crate::document::{DocumentHandle, DocumentSlot, OpenError};
use crate::generation::{Generation, GenerationCounter};
use crate::source::LoadRequest;

/// A started load attempt. Handed back through [`ReloadCoordinator::complete`].
#[derive(Debug, Clone)]
pub struct LoadTicket {
    pub generation: Generation,
    pub request: LoadRequest,
}

#[derive(Debug)]
pub enum Admission {
    /// Nothing was in flight; the caller must run this ticket.
    Started(LoadTicket),
    /// A load is in flight; the request replaced any earlier pending one.
    Coalesced,
}

pub enum Completion {
    /// The attempt was superseded. An opened handle comes back so the caller
    /// can close it off the owner context.
    Stale {
        orphan: Option<Box<dyn DocumentHandle>>,
    },
    Installed {
        slot: Arc<DocumentSlot>,
        previous: Option<Arc<DocumentSlot>>,
        /// Clamped page to show.
        page: usize,
        next: Option<LoadTicket>,
    },
    Failed {
        error: OpenError,
        next: Option<LoadTicket>,
    },
}

impl Completion {
    /// Trailing load the caller must run next, if any.
    pub fn next_ticket(&self) -> Option<&LoadTicket> {
        match self {
            Completion::Installed { next, .. } | Completion::Failed { next, .. } => next.as_ref(),
            Completion::Stale { .. } => None,
        }
    }
}

#[derive(Default)]
pub struct ReloadCoordinator {
    generations: GenerationCounter,
    in_flight: Option<Generation>,
    pending: Option<LoadRequest>,
    last_request: Option<LoadRequest>,
    current: Option<Arc<DocumentSlot>>,
    default_page: usize,
}

impl ReloadCoordinator {
    pub fn new(generations: GenerationCounter, default_page: usize) -> Self {
        Self {
            generations,
            default_page,
            ..Self::default()
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn current(&self) -> Option<&Arc<DocumentSlot>> {
        self.current.as_ref()
    }

    pub fn last_request(&self) -> Option<&LoadRequest> {
        self.last_request.as_ref()
    }

    pub fn request(&mut self, request: LoadRequest) -> Admission {
        self.last_request = Some(request.clone());
        if self.in_flight.is_some() {
            debug!(source = %request.source, "load in flight; coalescing request");
            self.pending = Some(request);
            return Admission::Coalesced;
        }
        Admission::Started(self.start(request))
    }

    fn start(&mut self, request: LoadRequest) -> LoadTicket {
        let generation = self.generations.advance();
        self.in_flight = Some(generation);
        LoadTicket {
            generation,
            request,
        }
    }

    /// Applies the outcome of `ticket`. Never installs a superseded attempt.
    pub fn complete(
        &mut self,
        ticket: &LoadTicket,
        outcome: Result<Box<dyn DocumentHandle>, OpenError>,
    ) -> Completion {
        if self.in_flight != Some(ticket.generation) {
            debug!(generation = %ticket.generation, "discarding stale load completion");
            return Completion::Stale {
                orphan: outcome.ok(),
            };
        }

        self.in_flight = None;
        let next = self.pending.take().map(|request| self.start(request));

        match outcome {
            Ok(handle) => {
                let slot = Arc::new(DocumentSlot::new(ticket.generation, handle));
                let page = restore_page(
                    ticket.request.restore_page.unwrap_or(self.default_page),
                    slot.page_count(),
                );
                let previous = self.current.replace(Arc::clone(&slot));
                Completion::Installed {
                    slot,
                    previous,
                    page,
                    next,
                }
            }
            Err(error) => Completion::Failed { error, next },
        }
    }

    /// Invalidates any in-flight attempt and hands back the installed slot
    /// for release. Does not start a new load.
    pub fn clear(&mut self) -> Option<Arc<DocumentSlot>> {
        let generation = self.generations.advance();
        debug!(%generation, "clearing document source");
        self.in_flight = None;
        self.pending = None;
        self.last_request = None;
        self.current.take()
    }
}

fn restore_page(requested: usize, page_count: usize) -> usize {
    requested.min(page_count.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::source::DocumentSource;
    use crate::text::TextDocument;

    fn request(name: &str) -> LoadRequest {
        LoadRequest::new(DocumentSource::asset(name))
    }

    fn handle(pages: usize) -> Box<dyn DocumentHandle> {
        Box::new(TextDocument::parse(&vec!["page"; pages].join("\x0c")))
    }

    fn started(admission: Admission) -> LoadTicket {
        match admission {
            Admission::Started(ticket) => ticket,
            Admission::Coalesced => panic!("request was coalesced"),
        }
    }

    #[test]
    fn busy_requests_coalesce_into_the_last_one() {
        let mut coordinator = ReloadCoordinator::default();
        let first = started(coordinator.request(request("a")));
        assert!(matches!(coordinator.request(request("b")), Admission::Coalesced));
        assert!(matches!(coordinator.request(request("c")), Admission::Coalesced));

        let completion = coordinator.complete(&first, Ok(handle(2)));
        let next = completion.next_ticket().cloned().unwrap();
        assert_eq!(next.request.source, DocumentSource::asset("c"));
        assert_eq!(next.generation.get(), first.generation.get() + 1);

        let last = coordinator.complete(&next, Ok(handle(3)));
        assert!(last.next_ticket().is_none());
        assert!(!coordinator.is_busy());
        assert_eq!(coordinator.current().unwrap().page_count(), 3);
    }

    #[test]
    fn completion_after_clear_is_stale() {
        let mut coordinator = ReloadCoordinator::default();
        let ticket = started(coordinator.request(request("a")));
        assert!(coordinator.clear().is_none());

        let completion = coordinator.complete(&ticket, Ok(handle(1)));
        assert!(matches!(completion, Completion::Stale { orphan: Some(_) }));
        assert!(coordinator.current().is_none());
        assert!(coordinator.last_request().is_none());
    }

    #[test]
    fn failure_still_starts_the_pending_load() {
        let mut coordinator = ReloadCoordinator::default();
        let first = started(coordinator.request(request("a")));
        coordinator.request(request("b"));

        let completion = coordinator.complete(&first, Err(OpenError::PasswordRequired));
        match completion {
            Completion::Failed { error, next } => {
                assert!(error.is_password_failure());
                assert_eq!(next.unwrap().request.source, DocumentSource::asset("b"));
            }
            _ => panic!("expected a failed completion"),
        }
        assert!(coordinator.is_busy());
    }

    #[test]
    fn failed_reload_keeps_the_previous_document() {
        let mut coordinator = ReloadCoordinator::default();
        let first = started(coordinator.request(request("a")));
        coordinator.complete(&first, Ok(handle(4)));

        let second = started(coordinator.request(request("a")));
        let completion = coordinator.complete(&second, Err(OpenError::Corrupt("bad".into())));
        assert!(matches!(completion, Completion::Failed { next: None, .. }));
        let current = coordinator.current().unwrap();
        assert_eq!(current.generation(), first.generation);
        assert!(!current.is_released());
    }

    #[test]
    fn install_hands_back_the_previous_slot_and_clamps_the_page() {
        let mut coordinator = ReloadCoordinator::new(GenerationCounter::new(), 1);
        let first = started(coordinator.request(request("a")));
        match coordinator.complete(&first, Ok(handle(3))) {
            Completion::Installed { page, previous, .. } => {
                assert_eq!(page, 1);
                assert!(previous.is_none());
            }
            _ => panic!("expected install"),
        }

        let second = started(coordinator.request(request("a").with_restore_page(40)));
        match coordinator.complete(&second, Ok(handle(3))) {
            Completion::Installed { page, previous, .. } => {
                assert_eq!(page, 2);
                assert_eq!(previous.unwrap().generation(), first.generation);
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn generations_never_decrease() {
        let mut coordinator = ReloadCoordinator::default();
        let mut seen = Vec::new();
        for round in 0..5 {
            let ticket = started(coordinator.request(request("a")));
            seen.push(ticket.generation);
            if round % 2 == 0 {
                coordinator.clear();
            } else {
                coordinator.complete(&ticket, Ok(handle(1)));
            }
        }
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn restore_page_clamps_into_range() {
        assert_eq!(restore_page(5, 3), 2);
        assert_eq!(restore_page(0, 0), 0);
        assert_eq!(restore_page(1, 3), 1);
    }
}
