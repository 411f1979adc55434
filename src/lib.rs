//! Buffer-ratio device tier classification.
//!
//! Buckets playback devices into `BEST`, `CORE` and `LOW_END` tiers from a
//! rolling window of per-session buffer ratios. Entry thresholds are stricter
//! than exit thresholds and transitions need a sustained streak that tolerates
//! one outlier session, so a device on a noisy network does not flap between
//! quality ceilings.

pub mod classifier;
pub mod store;
pub mod thresholds;
pub mod tracker;

pub use classifier::streak::{StreakCategory, ToleranceStreakResult};
pub use classifier::window::SampleWindow;
pub use classifier::{BufferRatioClassifier, ClassifierError, ReplayOutcome, SampleOutcome};
pub use store::{BufferRatioGroup, BufferRatioStore};
pub use thresholds::{HysteresisThresholds, ThresholdError, THRESHOLDS_V1_1_VERSION};
pub use tracker::{DeviceTierTracker, FileBackend, MemoryBackend, StoreBackend, StoreEncoding, TrackerError};
