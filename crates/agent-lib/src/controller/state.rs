//! Controller state tracking
//!
//! The visible state is derived from what is in flight: a detection pass wins
//! over everything, an active auto-refresh loop wins over a lone sampling
//! pass. When a one-shot operation finishes the state falls back to whatever
//! was active before it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    /// One sampling pass in flight
    Sampling,
    /// Sampling repeats on a fixed interval until stopped
    AutoRefreshing,
    /// Full pipeline run in flight
    Detecting,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControllerState::Idle => "idle",
            ControllerState::Sampling => "sampling",
            ControllerState::AutoRefreshing => "auto_refreshing",
            ControllerState::Detecting => "detecting",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Default)]
struct Counters {
    sampling: AtomicUsize,
    detecting: AtomicUsize,
    auto_refresh: AtomicBool,
}

/// Tracks in-flight work; cloning shares the same counters
#[derive(Debug, Clone, Default)]
pub(crate) struct Activity {
    counters: Arc<Counters>,
}

impl Activity {
    pub(crate) fn state(&self) -> ControllerState {
        let c = &self.counters;
        if c.detecting.load(Ordering::SeqCst) > 0 {
            ControllerState::Detecting
        } else if c.auto_refresh.load(Ordering::SeqCst) {
            ControllerState::AutoRefreshing
        } else if c.sampling.load(Ordering::SeqCst) > 0 {
            ControllerState::Sampling
        } else {
            ControllerState::Idle
        }
    }

    pub(crate) fn sampling(&self) -> ActivityGuard {
        self.counters.sampling.fetch_add(1, Ordering::SeqCst);
        ActivityGuard {
            counters: Arc::clone(&self.counters),
            kind: Kind::Sampling,
        }
    }

    pub(crate) fn detecting(&self) -> ActivityGuard {
        self.counters.detecting.fetch_add(1, Ordering::SeqCst);
        ActivityGuard {
            counters: Arc::clone(&self.counters),
            kind: Kind::Detecting,
        }
    }

    pub(crate) fn set_auto_refresh(&self, active: bool) {
        self.counters.auto_refresh.store(active, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Sampling,
    Detecting,
}

/// Marks one operation as in flight until dropped
#[derive(Debug)]
pub(crate) struct ActivityGuard {
    counters: Arc<Counters>,
    kind: Kind,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let counter = match self.kind {
            Kind::Sampling => &self.counters.sampling,
            Kind::Detecting => &self.counters.detecting,
        };
        counter.fetch_sub(1, Ordering::SeqCst);
    }
}
