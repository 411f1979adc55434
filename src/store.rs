use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classifier::window::SampleWindow;
use crate::thresholds::HysteresisThresholds;

/// Device performance tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BufferRatioGroup {
    /// Devices that rarely stall; allowed the highest quality ceiling.
    Best,
    /// Neutral tier every device starts in.
    #[default]
    Core,
    /// Devices that stall often; capped to a conservative ceiling.
    LowEnd,
}

impl BufferRatioGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferRatioGroup::Best => "BEST",
            BufferRatioGroup::Core => "CORE",
            BufferRatioGroup::LowEnd => "LOW_END",
        }
    }
}

impl fmt::Display for BufferRatioGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-device state persisted by the host between playback sessions.
///
/// Serialized as camelCase JSON:
/// `{"version","createdAt","group","bufferRatioWindow","lastUpdated"}` with
/// timestamps in milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferRatioStore {
    pub version: String,
    pub created_at: u64,
    pub group: BufferRatioGroup,
    pub buffer_ratio_window: SampleWindow,
    pub last_updated: u64,
}

impl BufferRatioStore {
    /// Fresh CORE store with an empty window sized for `thresholds`.
    pub fn fresh(thresholds: &HysteresisThresholds, now_ms: u64) -> Self {
        Self {
            version: thresholds.version.clone(),
            created_at: now_ms,
            group: BufferRatioGroup::Core,
            buffer_ratio_window: SampleWindow::with_capacity(thresholds.window_length),
            last_updated: now_ms,
        }
    }

    /// Whether this store can be carried forward under `thresholds`.
    ///
    /// A store is usable only when its version matches and its window is no
    /// longer than `windowLength` and holds only finite, non-negative samples.
    pub fn is_valid_for(&self, thresholds: &HysteresisThresholds) -> bool {
        self.version == thresholds.version
            && self.buffer_ratio_window.len() <= thresholds.window_length
            && self
                .buffer_ratio_window
                .iter()
                .all(|sample| sample.is_finite() && sample >= 0.0)
    }

    /// Encodes the store in its persisted JSON layout.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_serializes_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&BufferRatioGroup::LowEnd).unwrap(),
            "\"LOW_END\""
        );
        let best: BufferRatioGroup = serde_json::from_str("\"BEST\"").unwrap();
        assert_eq!(best, BufferRatioGroup::Best);
        assert_eq!(BufferRatioGroup::default(), BufferRatioGroup::Core);
    }

    #[test]
    fn persisted_layout_matches_host_format() {
        let thresholds = HysteresisThresholds::v1_1();
        let mut store = BufferRatioStore::fresh(&thresholds, 1_000);
        store.buffer_ratio_window.push(0.01);
        store.last_updated = 2_000;
        let value: serde_json::Value = serde_json::from_str(&store.to_json().unwrap()).unwrap();
        assert_eq!(value["version"], "1.1");
        assert_eq!(value["createdAt"], 1_000);
        assert_eq!(value["group"], "CORE");
        assert_eq!(value["bufferRatioWindow"], serde_json::json!([0.01]));
        assert_eq!(value["lastUpdated"], 2_000);
    }

    #[test]
    fn stale_or_corrupt_store_is_invalid() {
        let thresholds = HysteresisThresholds::v1_1();
        let mut store = BufferRatioStore::fresh(&thresholds, 0);
        assert!(store.is_valid_for(&thresholds));

        store.version = "1.0".into();
        assert!(!store.is_valid_for(&thresholds));

        let mut corrupt = BufferRatioStore::fresh(&thresholds, 0);
        corrupt.buffer_ratio_window = SampleWindow::from(vec![0.01, -1.0]);
        assert!(!corrupt.is_valid_for(&thresholds));

        let mut oversized = BufferRatioStore::fresh(&thresholds, 0);
        oversized.buffer_ratio_window = SampleWindow::from(vec![0.01; 11]);
        assert!(!oversized.is_valid_for(&thresholds));
    }
}
