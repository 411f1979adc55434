use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Version string of the built-in policy.
pub const THRESHOLDS_V1_1_VERSION: &str = "1.1";

/// Error produced when a threshold policy fails validation or cannot be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ThresholdError {
    #[error("threshold version must not be empty")]
    EmptyVersion,
    #[error("{field} must be a finite, non-negative ratio (got {value})")]
    InvalidRatio { field: &'static str, value: f64 },
    #[error("enterBestBufferRatio ({enter}) must be below exitBestBufferRatio ({exit})")]
    BestBandInverted { enter: f64, exit: f64 },
    #[error("enterLowEndBufferRatio ({enter}) must be above exitLowEndBufferRatio ({exit})")]
    LowEndBandInverted { enter: f64, exit: f64 },
    #[error("exitBestBufferRatio ({best}) must not exceed exitLowEndBufferRatio ({low_end})")]
    BandsOverlap { best: f64, low_end: f64 },
    #[error("windowLength must be at least 1")]
    EmptyWindow,
    #[error("evaluationWindow ({evaluation}) must be between 1 and windowLength ({window})")]
    EvaluationWindowOutOfRange { evaluation: usize, window: usize },
    #[error("{field} ({value}) must be between 1 and evaluationWindow ({evaluation})")]
    SessionCountOutOfRange {
        field: &'static str,
        value: usize,
        evaluation: usize,
    },
    #[error("maxBreaks ({breaks}) must be smaller than evaluationWindow ({evaluation})")]
    TooManyBreaks { breaks: usize, evaluation: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Thresholds on the CORE/BEST boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreToBestThresholds {
    /// Sessions at or below this ratio count toward promotion.
    pub enter_best_buffer_ratio: f64,
    /// Sessions above this ratio count toward demotion while in BEST.
    pub exit_best_buffer_ratio: f64,
    pub enter_best_session_count: usize,
    pub exit_best_session_count: usize,
}

/// Thresholds on the CORE/LOW_END boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreToLowEndThresholds {
    /// Sessions at or above this ratio count toward entering LOW_END.
    pub enter_low_end_buffer_ratio: f64,
    /// Sessions below this ratio count toward recovery while in LOW_END.
    pub exit_low_end_buffer_ratio: f64,
    pub enter_low_end_session_count: usize,
    pub exit_low_end_session_count: usize,
}

fn default_evaluation_window() -> usize {
    6
}

fn default_max_breaks() -> usize {
    1
}

/// Versioned hysteresis policy.
///
/// Entry criteria are always stricter than exit criteria, so a device whose
/// buffer ratio hovers around one boundary does not flip tiers. Stores built
/// under a different `version` are discarded by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HysteresisThresholds {
    pub version: String,
    pub core_to_best: CoreToBestThresholds,
    pub core_to_low_end: CoreToLowEndThresholds,
    /// Maximum number of samples retained per device.
    pub window_length: usize,
    /// Most-recent samples inspected by the streak rule.
    #[serde(default = "default_evaluation_window")]
    pub evaluation_window: usize,
    /// Non-qualifying samples tolerated inside a streak.
    #[serde(default = "default_max_breaks")]
    pub max_breaks: usize,
}

impl HysteresisThresholds {
    /// Built-in v1.1 policy: 5 of 6 good sessions to reach BEST, 3 bad ones to leave it.
    pub fn v1_1() -> Self {
        Self {
            version: THRESHOLDS_V1_1_VERSION.to_string(),
            core_to_best: CoreToBestThresholds {
                enter_best_buffer_ratio: 0.02,
                exit_best_buffer_ratio: 0.03,
                enter_best_session_count: 5,
                exit_best_session_count: 3,
            },
            core_to_low_end: CoreToLowEndThresholds {
                enter_low_end_buffer_ratio: 0.10,
                exit_low_end_buffer_ratio: 0.05,
                enter_low_end_session_count: 5,
                exit_low_end_session_count: 3,
            },
            window_length: 10,
            evaluation_window: default_evaluation_window(),
            max_breaks: default_max_breaks(),
        }
    }

    /// Parses a policy from JSON and validates it.
    pub fn from_json_str(raw: &str) -> Result<Self, ThresholdError> {
        let thresholds: Self = serde_json::from_str(raw)?;
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Reads and validates a JSON policy file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ThresholdError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks every structural invariant of the policy.
    ///
    /// # Guarantees
    /// * Entry ratios are strictly stricter than exit ratios on both boundaries.
    /// * The BEST and LOW_END bands do not overlap.
    /// * Session counts fit inside the evaluation window, which fits inside the
    ///   retained window.
    pub fn validate(&self) -> Result<(), ThresholdError> {
        if self.version.trim().is_empty() {
            return Err(ThresholdError::EmptyVersion);
        }

        let best = &self.core_to_best;
        let low_end = &self.core_to_low_end;
        for (field, value) in [
            ("enterBestBufferRatio", best.enter_best_buffer_ratio),
            ("exitBestBufferRatio", best.exit_best_buffer_ratio),
            ("enterLowEndBufferRatio", low_end.enter_low_end_buffer_ratio),
            ("exitLowEndBufferRatio", low_end.exit_low_end_buffer_ratio),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ThresholdError::InvalidRatio { field, value });
            }
        }

        if best.enter_best_buffer_ratio >= best.exit_best_buffer_ratio {
            return Err(ThresholdError::BestBandInverted {
                enter: best.enter_best_buffer_ratio,
                exit: best.exit_best_buffer_ratio,
            });
        }
        if low_end.enter_low_end_buffer_ratio <= low_end.exit_low_end_buffer_ratio {
            return Err(ThresholdError::LowEndBandInverted {
                enter: low_end.enter_low_end_buffer_ratio,
                exit: low_end.exit_low_end_buffer_ratio,
            });
        }
        if best.exit_best_buffer_ratio > low_end.exit_low_end_buffer_ratio {
            return Err(ThresholdError::BandsOverlap {
                best: best.exit_best_buffer_ratio,
                low_end: low_end.exit_low_end_buffer_ratio,
            });
        }

        if self.window_length == 0 {
            return Err(ThresholdError::EmptyWindow);
        }
        if self.evaluation_window == 0 || self.evaluation_window > self.window_length {
            return Err(ThresholdError::EvaluationWindowOutOfRange {
                evaluation: self.evaluation_window,
                window: self.window_length,
            });
        }

        for (field, value) in [
            ("enterBestSessionCount", best.enter_best_session_count),
            ("exitBestSessionCount", best.exit_best_session_count),
            ("enterLowEndSessionCount", low_end.enter_low_end_session_count),
            ("exitLowEndSessionCount", low_end.exit_low_end_session_count),
        ] {
            if value == 0 || value > self.evaluation_window {
                return Err(ThresholdError::SessionCountOutOfRange {
                    field,
                    value,
                    evaluation: self.evaluation_window,
                });
            }
        }

        if self.max_breaks >= self.evaluation_window {
            return Err(ThresholdError::TooManyBreaks {
                breaks: self.max_breaks,
                evaluation: self.evaluation_window,
            });
        }
        Ok(())
    }

    /// Stable hex digest over the version and every numeric parameter.
    ///
    /// Two policies with the same `version` but different parameters produce
    /// different IDs, which lets hosts spot an edit that forgot to bump the version.
    pub fn policy_id(&self) -> String {
        let best = &self.core_to_best;
        let low_end = &self.core_to_low_end;
        let mut hasher = Sha256::new();
        hasher.update(self.version.as_bytes());
        hasher.update([0u8]);
        for ratio in [
            best.enter_best_buffer_ratio,
            best.exit_best_buffer_ratio,
            low_end.enter_low_end_buffer_ratio,
            low_end.exit_low_end_buffer_ratio,
        ] {
            hasher.update(ratio.to_bits().to_be_bytes());
        }
        for count in [
            best.enter_best_session_count,
            best.exit_best_session_count,
            low_end.enter_low_end_session_count,
            low_end.exit_low_end_session_count,
            self.window_length,
            self.evaluation_window,
            self.max_breaks,
        ] {
            hasher.update((count as u64).to_be_bytes());
        }
        let digest = hasher.finalize();
        digest.iter().map(|byte| format!("{:02x}", byte)).collect()
    }
}

impl Default for HysteresisThresholds {
    fn default() -> Self {
        Self::v1_1()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_policy_is_valid() {
        let thresholds = HysteresisThresholds::v1_1();
        assert!(thresholds.validate().is_ok());
        assert_eq!(thresholds.version, "1.1");
        assert_eq!(thresholds.window_length, 10);
        assert_eq!(thresholds.evaluation_window, 6);
    }

    #[test]
    fn inverted_best_band_rejected() {
        let mut thresholds = HysteresisThresholds::v1_1();
        thresholds.core_to_best.enter_best_buffer_ratio = 0.03;
        assert!(matches!(
            thresholds.validate(),
            Err(ThresholdError::BestBandInverted { .. })
        ));
    }

    #[test]
    fn inverted_low_end_band_rejected() {
        let mut thresholds = HysteresisThresholds::v1_1();
        thresholds.core_to_low_end.exit_low_end_buffer_ratio = 0.2;
        assert!(matches!(
            thresholds.validate(),
            Err(ThresholdError::LowEndBandInverted { .. })
        ));
    }

    #[test]
    fn session_count_must_fit_evaluation_window() {
        let mut thresholds = HysteresisThresholds::v1_1();
        thresholds.core_to_best.enter_best_session_count = 7;
        assert!(matches!(
            thresholds.validate(),
            Err(ThresholdError::SessionCountOutOfRange {
                field: "enterBestSessionCount",
                ..
            })
        ));
    }

    #[test]
    fn nan_ratio_rejected() {
        let mut thresholds = HysteresisThresholds::v1_1();
        thresholds.core_to_low_end.enter_low_end_buffer_ratio = f64::NAN;
        assert!(matches!(
            thresholds.validate(),
            Err(ThresholdError::InvalidRatio { .. })
        ));
    }

    #[test]
    fn overlapping_bands_rejected() {
        let mut thresholds = HysteresisThresholds::v1_1();
        thresholds.core_to_best.exit_best_buffer_ratio = 0.06;
        assert!(matches!(
            thresholds.validate(),
            Err(ThresholdError::BandsOverlap { .. })
        ));

        // touching bands are allowed
        thresholds.core_to_best.exit_best_buffer_ratio = 0.05;
        assert!(thresholds.validate().is_ok());
    }

    #[test]
    fn breaks_must_leave_room_for_a_streak() {
        let mut thresholds = HysteresisThresholds::v1_1();
        thresholds.max_breaks = thresholds.evaluation_window;
        assert!(matches!(
            thresholds.validate(),
            Err(ThresholdError::TooManyBreaks { breaks: 6, evaluation: 6 })
        ));

        thresholds.max_breaks = thresholds.evaluation_window - 1;
        assert!(thresholds.validate().is_ok());
    }

    #[test]
    fn blank_version_rejected() {
        let mut thresholds = HysteresisThresholds::v1_1();
        thresholds.version = "  ".into();
        assert!(matches!(thresholds.validate(), Err(ThresholdError::EmptyVersion)));
    }

    #[test]
    fn empty_window_rejected() {
        let mut thresholds = HysteresisThresholds::v1_1();
        thresholds.window_length = 0;
        assert!(matches!(thresholds.validate(), Err(ThresholdError::EmptyWindow)));
    }

    #[test]
    fn evaluation_window_must_fit_retained_window() {
        let mut thresholds = HysteresisThresholds::v1_1();
        thresholds.evaluation_window = 0;
        assert!(matches!(
            thresholds.validate(),
            Err(ThresholdError::EvaluationWindowOutOfRange { .. })
        ));
    }

    #[test]
    fn loads_policy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thresholds.json");

        let good = HysteresisThresholds::v1_1();
        std::fs::write(&path, serde_json::to_string(&good).unwrap()).unwrap();
        assert_eq!(HysteresisThresholds::from_json_file(&path).unwrap(), good);

        let mut inverted = HysteresisThresholds::v1_1();
        inverted.core_to_best.enter_best_buffer_ratio = 0.04;
        std::fs::write(&path, serde_json::to_string(&inverted).unwrap()).unwrap();
        assert!(matches!(
            HysteresisThresholds::from_json_file(&path),
            Err(ThresholdError::BestBandInverted { .. })
        ));

        assert!(matches!(
            HysteresisThresholds::from_json_file(dir.path().join("missing.json")),
            Err(ThresholdError::Io(_))
        ));
    }

    #[test]
    fn json_layout_uses_camel_case_and_defaults() {
        let raw = r#"{
            "version": "2.0",
            "coreToBest": {
                "enterBestBufferRatio": 0.01,
                "exitBestBufferRatio": 0.04,
                "enterBestSessionCount": 4,
                "exitBestSessionCount": 2
            },
            "coreToLowEnd": {
                "enterLowEndBufferRatio": 0.2,
                "exitLowEndBufferRatio": 0.08,
                "enterLowEndSessionCount": 4,
                "exitLowEndSessionCount": 2
            },
            "windowLength": 8
        }"#;
        let thresholds = HysteresisThresholds::from_json_str(raw).unwrap();
        assert_eq!(thresholds.version, "2.0");
        assert_eq!(thresholds.evaluation_window, 6);
        assert_eq!(thresholds.max_breaks, 1);
        assert_eq!(thresholds.core_to_best.enter_best_session_count, 4);
    }

    #[test]
    fn policy_id_tracks_parameters() {
        let base = HysteresisThresholds::v1_1();
        let mut tweaked = base.clone();
        tweaked.core_to_best.exit_best_buffer_ratio = 0.035;
        assert_eq!(base.policy_id(), HysteresisThresholds::v1_1().policy_id());
        assert_ne!(base.policy_id(), tweaked.policy_id());
        assert_eq!(base.policy_id().len(), 64);
    }
}
