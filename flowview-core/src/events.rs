use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::document::DocumentMetadata;
use crate::generation::Generation;
use crate::search::SearchMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadFailureKind {
    /// Source unreachable, corrupt or unsupported.
    Open,
    /// The document is locked; retry with a (different) password.
    Password,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchProgress {
    pub query: String,
    /// Pages scanned so far, 1-based.
    pub current_page: usize,
    pub total_pages: usize,
    pub result_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub results: Vec<SearchMatch>,
    pub current_index: Option<usize>,
    pub is_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ViewerEvent {
    DocumentLoaded {
        generation: Generation,
        page_count: usize,
        metadata: DocumentMetadata,
    },
    Error {
        generation: Generation,
        kind: LoadFailureKind,
        message: String,
    },
    PageChanged {
        page_index: usize,
        page_count: usize,
    },
    SearchProgress(SearchProgress),
    SearchResultsFound(SearchResults),
}

/// Fan-out of viewer events to any number of subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<ViewerEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<ViewerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Delivers to every live subscriber, dropping those that hung up.
    pub fn emit(&self, event: ViewerEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_events_in_order() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        for page_index in 0..3 {
            bus.emit(ViewerEvent::PageChanged {
                page_index,
                page_count: 3,
            });
        }

        for rx in [&mut first, &mut second] {
            let pages: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
                .map(|event| match event {
                    ViewerEvent::PageChanged { page_index, .. } => page_index,
                    other => panic!("unexpected event: {:?}", other),
                })
                .collect();
            assert_eq!(pages, vec![0, 1, 2]);
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.emit(ViewerEvent::PageChanged {
            page_index: 0,
            page_count: 1,
        });
        assert!(bus.subscribers.lock().is_empty());
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let event = ViewerEvent::SearchProgress(SearchProgress {
            query: "total".into(),
            current_page: 2,
            total_pages: 10,
            result_count: 1,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "search_progress");
        assert_eq!(json["current_page"], 2);

        let error = ViewerEvent::Error {
            generation: Generation::ZERO,
            kind: LoadFailureKind::Password,
            message: "locked".into(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["kind"], "password");
    }
}
