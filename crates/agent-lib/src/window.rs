//! Bounded per-entity sample windows
//!
//! The buffer owns every window. Each window holds at most `capacity` samples
//! and never spans more than `max_span`; the oldest samples go first. Entities
//! that miss `absent_cycles_before_eviction` consecutive sampling cycles are
//! dropped so short-lived processes do not accumulate.

use crate::models::{EntityId, Sample, SampleBatch, Window};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Default number of samples per window
pub const DEFAULT_WINDOW_CAPACITY: usize = 50;

/// Default maximum time covered by one window (5 minutes)
pub const DEFAULT_WINDOW_SPAN: Duration = Duration::from_secs(5 * 60);

/// Default number of consecutive missed cycles before an entity is evicted
pub const DEFAULT_ABSENT_CYCLES: u32 = 2;

/// Configuration for the window buffer
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Maximum samples kept per entity
    pub capacity: usize,
    /// Maximum age difference between the newest and oldest sample
    pub max_span: Duration,
    /// Consecutive cycles an entity may be missing before it is dropped
    pub absent_cycles_before_eviction: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_WINDOW_CAPACITY,
            max_span: DEFAULT_WINDOW_SPAN,
            absent_cycles_before_eviction: DEFAULT_ABSENT_CYCLES,
        }
    }
}

/// Samples for a single entity
#[derive(Debug)]
struct EntityWindow {
    samples: VecDeque<Sample>,
    missed_cycles: u32,
}

impl EntityWindow {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            missed_cycles: 0,
        }
    }

    fn push(&mut self, sample: Sample, config: &WindowConfig) {
        self.samples.push_back(sample);
        self.missed_cycles = 0;
        self.expire_old_samples(config.max_span);
        while self.samples.len() > config.capacity {
            self.samples.pop_front();
        }
    }

    /// Remove samples outside the time span, measured from the newest sample
    fn expire_old_samples(&mut self, max_span: Duration) {
        let cutoff = match (
            self.samples.back(),
            chrono::Duration::from_std(max_span).ok(),
        ) {
            (Some(newest), Some(span)) => newest.timestamp.checked_sub_signed(span),
            _ => None,
        };
        let Some(cutoff) = cutoff else { return };

        while let Some(front) = self.samples.front() {
            if front.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn snapshot(&self, entity: EntityId) -> Window {
        Window {
            entity,
            samples: self.samples.iter().cloned().collect(),
        }
    }
}

/// Outcome of ingesting one sampling cycle
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub recorded: usize,
    pub evicted: Vec<EntityId>,
}

/// Buffer statistics
#[derive(Debug, Clone, Default)]
pub struct BufferStats {
    pub tracked_entities: usize,
    pub tracked_processes: usize,
    pub total_samples: usize,
}

/// Time-ordered sample windows for the system and every tracked process.
///
/// One coarse lock guards the whole map: a sampling cycle takes the write
/// lock once per batch, readers clone what they need under the read lock.
/// Readers therefore see either all of a cycle's samples or none of them.
pub struct WindowBuffer {
    config: WindowConfig,
    windows: RwLock<HashMap<EntityId, EntityWindow>>,
}

impl WindowBuffer {
    pub fn new(mut config: WindowConfig) -> Self {
        config.capacity = config.capacity.max(1);
        config.absent_cycles_before_eviction = config.absent_cycles_before_eviction.max(1);
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Append one sample to its entity's window, evicting the oldest if full
    pub async fn record(&self, sample: Sample) {
        let mut windows = self.windows.write().await;
        windows
            .entry(sample.entity)
            .or_insert_with(EntityWindow::new)
            .push(sample, &self.config);
    }

    /// Record a whole sampling cycle and collect entities that have now been
    /// absent for too many consecutive cycles
    pub async fn ingest(&self, batch: &SampleBatch) -> IngestOutcome {
        let mut windows = self.windows.write().await;
        let mut seen = HashSet::with_capacity(batch.entity_count());
        let mut outcome = IngestOutcome::default();

        for sample in batch.samples() {
            seen.insert(sample.entity);
            windows
                .entry(sample.entity)
                .or_insert_with(EntityWindow::new)
                .push(sample.clone(), &self.config);
            outcome.recorded += 1;
        }

        let limit = self.config.absent_cycles_before_eviction;
        for (entity, window) in windows.iter_mut() {
            if !seen.contains(entity) {
                window.missed_cycles += 1;
                if window.missed_cycles >= limit {
                    outcome.evicted.push(*entity);
                }
            }
        }
        for entity in &outcome.evicted {
            windows.remove(entity);
        }
        outcome.evicted.sort();

        if !outcome.evicted.is_empty() {
            debug!(
                evicted = outcome.evicted.len(),
                tracked = windows.len(),
                "Evicted entities absent from recent cycles"
            );
        }

        outcome
    }

    /// Current window for an entity, possibly shorter than capacity
    pub async fn get_window(&self, entity: &EntityId) -> Option<Window> {
        let windows = self.windows.read().await;
        windows.get(entity).map(|w| w.snapshot(*entity))
    }

    /// Snapshot of every window, ordered by entity
    pub async fn windows(&self) -> Vec<Window> {
        let windows = self.windows.read().await;
        let mut all: Vec<Window> = windows
            .iter()
            .map(|(entity, w)| w.snapshot(*entity))
            .collect();
        all.sort_by_key(|w| w.entity);
        all
    }

    /// Most recent sample for an entity
    pub async fn latest(&self, entity: &EntityId) -> Option<Sample> {
        let windows = self.windows.read().await;
        windows.get(entity).and_then(|w| w.samples.back().cloned())
    }

    /// Most recent sample of every tracked process, ordered by entity
    pub async fn latest_process_samples(&self) -> Vec<Sample> {
        let windows = self.windows.read().await;
        let mut latest: Vec<Sample> = windows
            .iter()
            .filter(|(entity, _)| entity.is_process())
            .filter_map(|(_, w)| w.samples.back().cloned())
            .collect();
        latest.sort_by_key(|s| s.entity);
        latest
    }

    /// Number of entities with at least `min_samples` samples
    pub async fn ready_count(&self, min_samples: usize) -> usize {
        let windows = self.windows.read().await;
        windows
            .values()
            .filter(|w| w.samples.len() >= min_samples)
            .count()
    }

    pub async fn contains(&self, entity: &EntityId) -> bool {
        self.windows.read().await.contains_key(entity)
    }

    /// Stop tracking an entity
    pub async fn remove(&self, entity: &EntityId) -> bool {
        self.windows.write().await.remove(entity).is_some()
    }

    pub async fn stats(&self) -> BufferStats {
        let windows = self.windows.read().await;
        BufferStats {
            tracked_entities: windows.len(),
            tracked_processes: windows.keys().filter(|e| e.is_process()).count(),
            total_samples: windows.values().map(|w| w.samples.len()).sum(),
        }
    }
}

impl Default for WindowBuffer {
    fn default() -> Self {
        Self::new(WindowConfig::default())
    }
}
