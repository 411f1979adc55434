use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::classifier::{now_ms, BufferRatioClassifier, ClassifierError, SampleOutcome};
use crate::store::{BufferRatioGroup, BufferRatioStore};
use crate::tracker::backend::{BackendError, StoreBackend};

/// Errors emitted by the tracker.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrackerError {
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Host-side driver that loads, classifies and saves per-device stores.
///
/// # Guarantees
/// * Calls for the same device key are serialized; no sample is lost when two
///   sessions finish concurrently.
/// * Different devices never wait on each other.
/// * A store is written back only after the classifier accepted the sample.
pub struct DeviceTierTracker<B: StoreBackend> {
    classifier: BufferRatioClassifier,
    backend: B,
    locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<B: StoreBackend> DeviceTierTracker<B> {
    pub fn new(classifier: BufferRatioClassifier, backend: B) -> Self {
        info!(
            version = %classifier.thresholds().version,
            policy_id = %classifier.thresholds().policy_id(),
            "buffer ratio tracker ready"
        );
        Self {
            classifier,
            backend,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn classifier(&self) -> &BufferRatioClassifier {
        &self.classifier
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Policy fingerprint of the active thresholds.
    pub fn policy_id(&self) -> String {
        self.classifier.thresholds().policy_id()
    }

    /// Records a completed session for `device` using the wall clock.
    pub async fn record_session(&self, device: &str, sample: f64) -> Result<SampleOutcome, TrackerError> {
        self.record_session_at(device, sample, now_ms()).await
    }

    /// Records a completed session for `device` at `now_ms`.
    ///
    /// # Errors
    /// `TrackerError::Classifier` for invalid samples (nothing is written),
    /// `TrackerError::Backend` when loading or saving fails.
    pub async fn record_session_at(
        &self,
        device: &str,
        sample: f64,
        now_ms: u64,
    ) -> Result<SampleOutcome, TrackerError> {
        let lock = self.device_lock(device);
        let result = {
            let _guard = lock.lock().await;
            self.classify_and_save(device, sample, now_ms).await
        };
        self.release_lock(device, lock);
        let outcome = result?;

        if outcome.transitioned() {
            info!(
                device,
                from = %outcome.previous_group,
                to = %outcome.group(),
                category = outcome.category.as_str(),
                "device tier changed"
            );
        } else {
            debug!(device, group = %outcome.group(), sample, "session recorded");
        }
        Ok(outcome)
    }

    /// Current tier of `device`; CORE when nothing usable is persisted.
    pub async fn current_group(&self, device: &str) -> Result<BufferRatioGroup, TrackerError> {
        let stored = self.backend.load(device).await?;
        Ok(self.classifier.current_group(stored.as_ref()))
    }

    /// Persisted store for `device`, if one exists and is valid for the active policy.
    pub async fn store(&self, device: &str) -> Result<Option<BufferRatioStore>, TrackerError> {
        let stored = self.backend.load(device).await?;
        Ok(stored.filter(|store| self.classifier.is_store_valid(store)))
    }

    /// Drops everything recorded for `device`.
    pub async fn reset(&self, device: &str) -> Result<(), TrackerError> {
        let lock = self.device_lock(device);
        let result = {
            let _guard = lock.lock().await;
            self.backend.remove(device).await
        };
        self.release_lock(device, lock);
        result?;
        info!(device, "device tier reset");
        Ok(())
    }

    async fn classify_and_save(
        &self,
        device: &str,
        sample: f64,
        now_ms: u64,
    ) -> Result<SampleOutcome, TrackerError> {
        let stored = self.backend.load(device).await?;
        let outcome = self.classifier.record_sample(stored, sample, now_ms)?;
        self.backend.save(device, &outcome.store).await?;
        Ok(outcome)
    }

    fn device_lock(&self, device: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the map entry for `device` once no other caller holds or waits on it.
    fn release_lock(&self, device: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        // one reference in the map, one in `lock`
        if Arc::strong_count(&lock) <= 2 {
            if let Some(current) = locks.get(device) {
                if Arc::ptr_eq(current, &lock) {
                    locks.remove(device);
                }
            }
        }
    }

    /// Number of devices with an in-flight call.
    pub fn active_devices(&self) -> usize {
        self.locks.lock().len()
    }
}
