//! Buffer-ratio tier classification.
//!
//! [`BufferRatioClassifier`] takes a device's persisted [`BufferRatioStore`]
//! (or none) plus the buffer ratio of a just-completed session and produces the
//! next store. Transitions follow the injected [`HysteresisThresholds`]:
//! CORE ⇄ BEST and CORE ⇄ LOW_END, never BEST ⇄ LOW_END in one step.

pub mod streak;
pub mod window;

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::debug;

use crate::store::{BufferRatioGroup, BufferRatioStore};
use crate::thresholds::{HysteresisThresholds, ThresholdError};
use streak::{StreakCategory, ToleranceStreakResult};

/// Errors emitted by the classifier.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("buffer ratio sample must be finite and non-negative (got {0})")]
    InvalidSample(f64),
}

/// Result of recording one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    pub store: BufferRatioStore,
    pub previous_group: BufferRatioGroup,
    pub category: StreakCategory,
}

impl SampleOutcome {
    pub fn group(&self) -> BufferRatioGroup {
        self.store.group
    }

    pub fn transitioned(&self) -> bool {
        self.category != StreakCategory::None
    }
}

/// Result of replaying a batch of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    pub store: BufferRatioStore,
    /// Every transition that fired, in order, with the index of the sample that caused it.
    pub transitions: Vec<(usize, StreakCategory)>,
}

/// Hysteresis classifier bound to one validated threshold policy.
#[derive(Debug, Clone)]
pub struct BufferRatioClassifier {
    thresholds: HysteresisThresholds,
}

impl BufferRatioClassifier {
    /// Builds a classifier after validating `thresholds`.
    pub fn new(thresholds: HysteresisThresholds) -> Result<Self, ThresholdError> {
        thresholds.validate()?;
        Ok(Self { thresholds })
    }

    /// Classifier using the built-in v1.1 policy.
    pub fn v1_1() -> Self {
        Self {
            thresholds: HysteresisThresholds::v1_1(),
        }
    }

    pub fn thresholds(&self) -> &HysteresisThresholds {
        &self.thresholds
    }

    /// Records the buffer ratio of a completed session.
    ///
    /// # Behavior
    /// * An absent, stale-version or corrupt store is replaced by a fresh CORE store.
    /// * The sample joins the window; the oldest sample is evicted past `windowLength`.
    /// * Only the edges leaving the current group are evaluated.
    /// * `lastUpdated` is set to `now_ms`.
    ///
    /// # Errors
    /// Returns `ClassifierError::InvalidSample` for negative or non-finite
    /// samples; nothing is recorded in that case.
    pub fn record_sample(
        &self,
        store: Option<BufferRatioStore>,
        sample: f64,
        now_ms: u64,
    ) -> Result<SampleOutcome, ClassifierError> {
        if !sample.is_finite() || sample < 0.0 {
            return Err(ClassifierError::InvalidSample(sample));
        }

        let mut next = self.adopt(store, now_ms);
        next.buffer_ratio_window.push(sample);

        let previous_group = next.group;
        let mut category = StreakCategory::None;
        for &candidate in StreakCategory::candidates(previous_group) {
            if self.evaluate(&next, candidate).meets_requirement {
                category = candidate;
                break;
            }
        }
        if let Some(group) = category.target_group() {
            debug!(
                from = %previous_group,
                to = %group,
                category = category.as_str(),
                window = next.buffer_ratio_window.len(),
                "buffer ratio tier transition"
            );
            next.group = group;
        }
        next.last_updated = now_ms;

        Ok(SampleOutcome {
            store: next,
            previous_group,
            category,
        })
    }

    /// Same as [`record_sample`](Self::record_sample) using the wall clock.
    pub fn record_sample_now(
        &self,
        store: Option<BufferRatioStore>,
        sample: f64,
    ) -> Result<SampleOutcome, ClassifierError> {
        self.record_sample(store, sample, now_ms())
    }

    /// Folds `samples` through [`record_sample`](Self::record_sample) with a fixed timestamp.
    ///
    /// Stops at the first invalid sample.
    pub fn replay(
        &self,
        store: Option<BufferRatioStore>,
        samples: &[f64],
        now_ms: u64,
    ) -> Result<ReplayOutcome, ClassifierError> {
        let mut current = self.adopt(store, now_ms);
        let mut transitions = Vec::new();
        for (idx, &sample) in samples.iter().enumerate() {
            let outcome = self.record_sample(Some(current), sample, now_ms)?;
            if outcome.transitioned() {
                transitions.push((idx, outcome.category));
            }
            current = outcome.store;
        }
        Ok(ReplayOutcome {
            store: current,
            transitions,
        })
    }

    /// Current tier, or CORE when the store is absent or unusable.
    pub fn current_group(&self, store: Option<&BufferRatioStore>) -> BufferRatioGroup {
        store
            .filter(|s| s.is_valid_for(&self.thresholds))
            .map(|s| s.group)
            .unwrap_or_default()
    }

    pub fn is_store_valid(&self, store: &BufferRatioStore) -> bool {
        store.is_valid_for(&self.thresholds)
    }

    /// Streak diagnostics for one edge against the store's current window.
    pub fn evaluate(&self, store: &BufferRatioStore, category: StreakCategory) -> ToleranceStreakResult {
        streak::evaluate(&store.buffer_ratio_window, category, &self.thresholds)
    }

    /// Explicit reset: a fresh CORE store.
    pub fn reset(&self, now_ms: u64) -> BufferRatioStore {
        BufferRatioStore::fresh(&self.thresholds, now_ms)
    }

    fn adopt(&self, store: Option<BufferRatioStore>, now_ms: u64) -> BufferRatioStore {
        match store {
            Some(mut existing) if existing.is_valid_for(&self.thresholds) => {
                existing
                    .buffer_ratio_window
                    .set_capacity(self.thresholds.window_length);
                existing
            }
            Some(stale) => {
                debug!(
                    stored_version = %stale.version,
                    active_version = %self.thresholds.version,
                    "discarding unusable buffer ratio store"
                );
                BufferRatioStore::fresh(&self.thresholds, now_ms)
            }
            None => BufferRatioStore::fresh(&self.thresholds, now_ms),
        }
    }
}

impl Default for BufferRatioClassifier {
    fn default() -> Self {
        Self::v1_1()
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
