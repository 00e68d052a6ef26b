//! Generation stamps.
//!
//! A [`GenerationCounter`] hands out monotonically increasing ids. Long-running
//! work captures a [`GenerationGuard`] when it starts and checks
//! [`GenerationGuard::is_stale`] before every externally observable effect.
//! The counter is shared between the owner context and background workers,
//! so checks never need the owner's lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Identifies one document-open attempt (or one search run) lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub const ZERO: Generation = Generation(0);

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationCounter {
    current: Arc<AtomicU64>,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next generation and makes it current.
    pub fn advance(&self) -> Generation {
        Generation(self.current.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn current(&self) -> Generation {
        Generation(self.current.load(Ordering::Acquire))
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current() == generation
    }

    /// Advances and returns a guard bound to the new generation.
    pub fn next_guard(&self) -> GenerationGuard {
        let generation = self.advance();
        GenerationGuard {
            generation,
            current: Arc::clone(&self.current),
        }
    }

    /// Captures the current generation for a unit of work that must stop
    /// producing effects once the counter moves on.
    pub fn guard(&self) -> GenerationGuard {
        GenerationGuard {
            generation: self.current(),
            current: Arc::clone(&self.current),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationGuard {
    generation: Generation,
    current: Arc<AtomicU64>,
}

impl GenerationGuard {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.current.load(Ordering::Acquire) > self.generation.0
    }
}
