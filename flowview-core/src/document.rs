//! The document engine boundary.
//!
//! Parsing, rasterization and text location live behind [`DocumentEngine`]
//! and [`DocumentHandle`]. The core only ever reaches a handle through a
//! [`DocumentSlot`], which ties it to the generation that opened it and
//! guarantees it is closed exactly once.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generation::Generation;
use crate::source::LoadRequest;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
}

/// Page dimensions in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub const LETTER: PageSize = PageSize {
        width: 612.0,
        height: 792.0,
    };
}

/// A rectangle in page space: points, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PageRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn union(&self, other: &PageRect) -> PageRect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        PageRect {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }

    /// Smallest rectangle covering every input, or `None` for an empty slice.
    pub fn bounding(rects: &[PageRect]) -> Option<PageRect> {
        let (first, rest) = rects.split_first()?;
        Some(rest.iter().fold(*first, |acc, rect| acc.union(rect)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub match_case: bool,
    pub whole_word: bool,
}

/// A normalized query: trimmed, with internal whitespace runs collapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    text: String,
    tokens: Vec<String>,
}

impl SearchQuery {
    /// Returns `None` for empty or whitespace-only input.
    pub fn parse(raw: &str) -> Option<Self> {
        let tokens: Vec<String> = raw.split_whitespace().map(str::to_owned).collect();
        if tokens.is_empty() {
            return None;
        }
        Some(Self {
            text: tokens.join(" "),
            tokens,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_phrase(&self) -> bool {
        self.tokens.len() > 1
    }
}

/// One occurrence reported by an engine for a single page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMatch {
    /// Position of the occurrence within the page's reading order.
    pub offset: usize,
    pub text: String,
    pub rects: Vec<PageRect>,
}

/// An opened document. Owned by exactly one generation.
pub trait DocumentHandle: Send + Sync {
    fn page_count(&self) -> usize;
    fn metadata(&self) -> DocumentMetadata;
    fn page_size(&self, page_index: usize) -> Result<PageSize>;
    fn find_on_page(
        &self,
        page_index: usize,
        query: &SearchQuery,
        options: FindOptions,
    ) -> Result<Vec<TextMatch>>;
    /// Releases native resources. Called exactly once by the owning slot.
    fn close(self: Box<Self>);
}

#[async_trait::async_trait]
pub trait DocumentEngine: Send + Sync {
    async fn open(&self, request: &LoadRequest) -> Result<Box<dyn DocumentHandle>, OpenError>;
}

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("failed to read document: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported document source: {0}")]
    Unsupported(String),
    #[error("document is password-protected but no password was provided")]
    PasswordRequired,
    #[error("incorrect password")]
    IncorrectPassword,
    #[error("document is damaged or not a supported format: {0}")]
    Corrupt(String),
    #[error("{0}")]
    Engine(String),
}

impl OpenError {
    pub fn is_password_failure(&self) -> bool {
        matches!(self, Self::PasswordRequired | Self::IncorrectPassword)
    }
}

impl From<anyhow::Error> for OpenError {
    fn from(err: anyhow::Error) -> Self {
        Self::Engine(format!("{err:#}"))
    }
}

/// Single-owner home for the handle of one generation.
///
/// Readers run engine calls under the read lock; [`DocumentSlot::release`]
/// takes the write lock, so a handle is never closed while a page is being
/// searched and never touched after it is closed.
pub struct DocumentSlot {
    generation: Generation,
    page_count: usize,
    metadata: DocumentMetadata,
    released: AtomicBool,
    handle: RwLock<Option<Box<dyn DocumentHandle>>>,
}

impl DocumentSlot {
    pub fn new(generation: Generation, handle: Box<dyn DocumentHandle>) -> Self {
        Self {
            generation,
            page_count: handle.page_count(),
            metadata: handle.metadata(),
            released: AtomicBool::new(false),
            handle: RwLock::new(Some(handle)),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    /// Runs `f` against the live handle, or returns `None` once released.
    pub fn with_handle<R>(&self, f: impl FnOnce(&dyn DocumentHandle) -> R) -> Option<R> {
        let guard = self.handle.read();
        guard.as_deref().map(|handle| f(handle))
    }

    /// Lock-free; turns true as soon as a release begins.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Closes the handle once in-progress readers finish. Later calls are no-ops.
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
        let handle = self.handle.write().take();
        if let Some(handle) = handle {
            tracing::debug!(generation = %self.generation, "closing document handle");
            handle.close();
        }
    }
}

impl Drop for DocumentSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.close();
        }
    }
}
