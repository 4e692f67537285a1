//! Replayer: resolves requests against a loaded cassette

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::storage::{read_cassette, Cassette, SerializableRequest, SerializableResponse};
use crate::{ReelError, Result};

use super::comparator::Comparator;

/// Replayer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    /// At least one interaction is unconsumed
    Ready,
    /// Every interaction has been served
    Exhausted,
}

/// Which interactions have been served
#[derive(Debug)]
struct Consumption {
    consumed: Vec<bool>,
    /// Index of the first unconsumed interaction
    cursor: usize,
    remaining: usize,
}

impl Consumption {
    fn new(len: usize) -> Self {
        Self {
            consumed: vec![false; len],
            cursor: 0,
            remaining: len,
        }
    }

    fn consume(&mut self, index: usize) {
        self.consumed[index] = true;
        self.remaining -= 1;
        while self.cursor < self.consumed.len() && self.consumed[self.cursor] {
            self.cursor += 1;
        }
    }
}

/// Serves recorded responses, each at most once
pub struct Replayer {
    cassette: Arc<Cassette>,
    comparator: Box<dyn Comparator>,
    consumption: Mutex<Consumption>,
    misses: AtomicUsize,
}

impl Replayer {
    /// Wrap a cassette already in memory
    #[must_use]
    pub fn new(cassette: Cassette, comparator: Box<dyn Comparator>) -> Self {
        let consumption = Consumption::new(cassette.len());
        Self {
            cassette: Arc::new(cassette),
            comparator,
            consumption: Mutex::new(consumption),
            misses: AtomicUsize::new(0),
        }
    }

    /// Load the whole cassette at `path`
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound`, `MalformedCassette` or `Io`
    pub fn load(path: &Path, comparator: Box<dyn Comparator>) -> Result<Self> {
        let cassette = read_cassette(path)?;

        info!(
            "Loaded cassette {}: {} interactions (comparator: {})",
            path.display(),
            cassette.len(),
            comparator.name()
        );

        Ok(Self::new(cassette, comparator))
    }

    /// Resolve a request to the response of the first acceptable unconsumed interaction
    ///
    /// # Errors
    ///
    /// Returns `Exhausted` if nothing is left to serve, `NoMatch` if the scan
    /// ends without an accepted interaction
    pub fn resolve(&self, request: &SerializableRequest) -> Result<SerializableResponse> {
        let mut consumption = self.lock();

        if consumption.remaining == 0 {
            self.misses.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Cassette exhausted: {} {} ({} interactions served)",
                request.method,
                request.uri,
                self.cassette.len()
            );
            return Err(ReelError::Exhausted {
                consumed: self.cassette.len(),
            });
        }

        for index in consumption.cursor..self.cassette.interactions.len() {
            if consumption.consumed[index] {
                continue;
            }

            let stored = &self.cassette.interactions[index];
            let verdict = self.comparator.compare(request, stored);

            if verdict.accept {
                consumption.consume(index);
                debug!(
                    "Replaying interaction #{}: {} {} -> {} ({} remaining)",
                    index + 1,
                    request.method,
                    request.uri,
                    stored.response.status,
                    consumption.remaining
                );
                return Ok(stored.response.clone());
            }

            if verdict.short_circuit {
                break;
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        warn!(
            "No recorded match: {} {} ({} remaining, comparator: {})",
            request.method,
            request.uri,
            consumption.remaining,
            self.comparator.name()
        );

        Err(ReelError::NoMatch {
            method: request.method.clone(),
            uri: request.uri.clone(),
            remaining: consumption.remaining,
        })
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ReplayState {
        if self.lock().remaining == 0 {
            ReplayState::Exhausted
        } else {
            ReplayState::Ready
        }
    }

    /// Replay statistics
    #[must_use]
    pub fn stats(&self) -> ReplayStats {
        let remaining = self.lock().remaining;
        let total = self.cassette.len();

        ReplayStats {
            total,
            served: total - remaining,
            misses: self.misses.load(Ordering::Relaxed),
            remaining,
        }
    }

    /// The loaded cassette
    #[must_use]
    pub fn cassette(&self) -> &Cassette {
        &self.cassette
    }

    fn lock(&self) -> MutexGuard<'_, Consumption> {
        self.consumption
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Replay statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Interactions in the cassette
    pub total: usize,
    /// Interactions served
    pub served: usize,
    /// Requests that found nothing to serve
    pub misses: usize,
    /// Interactions not yet served
    pub remaining: usize,
}
