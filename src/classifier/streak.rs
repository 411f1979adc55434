//! Tolerant streak detection.
//!
//! Pure decision helpers: a streak is the run of most recent samples that
//! satisfy a directional predicate, tolerating a bounded number of
//! non-qualifying "breaks". There is no logging and no state here.

use serde::{Deserialize, Serialize};

use crate::classifier::window::SampleWindow;
use crate::store::BufferRatioGroup;
use crate::thresholds::HysteresisThresholds;

/// Transition signal produced by one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreakCategory {
    EnterBest,
    ExitBest,
    EnterLowEnd,
    ExitLowEnd,
    #[default]
    None,
}

impl StreakCategory {
    /// Group a device lands in when this transition fires.
    pub fn target_group(&self) -> Option<BufferRatioGroup> {
        match self {
            StreakCategory::EnterBest => Some(BufferRatioGroup::Best),
            StreakCategory::EnterLowEnd => Some(BufferRatioGroup::LowEnd),
            StreakCategory::ExitBest | StreakCategory::ExitLowEnd => Some(BufferRatioGroup::Core),
            StreakCategory::None => None,
        }
    }

    /// Edges leaving `group`, in evaluation order.
    ///
    /// CORE checks LOW_END before BEST so a device never gets promoted when
    /// both streaks would qualify under a loosely tuned policy.
    pub fn candidates(group: BufferRatioGroup) -> &'static [StreakCategory] {
        match group {
            BufferRatioGroup::Core => &[StreakCategory::EnterLowEnd, StreakCategory::EnterBest],
            BufferRatioGroup::Best => &[StreakCategory::ExitBest],
            BufferRatioGroup::LowEnd => &[StreakCategory::ExitLowEnd],
        }
    }

    /// Whether `sample` counts toward this transition.
    pub fn qualifies(&self, sample: f64, thresholds: &HysteresisThresholds) -> bool {
        let best = &thresholds.core_to_best;
        let low_end = &thresholds.core_to_low_end;
        match self {
            StreakCategory::EnterBest => sample <= best.enter_best_buffer_ratio,
            StreakCategory::ExitBest => sample > best.exit_best_buffer_ratio,
            StreakCategory::EnterLowEnd => sample >= low_end.enter_low_end_buffer_ratio,
            StreakCategory::ExitLowEnd => sample < low_end.exit_low_end_buffer_ratio,
            StreakCategory::None => false,
        }
    }

    /// Qualifying sessions needed for this transition.
    pub fn required_sessions(&self, thresholds: &HysteresisThresholds) -> usize {
        let best = &thresholds.core_to_best;
        let low_end = &thresholds.core_to_low_end;
        match self {
            StreakCategory::EnterBest => best.enter_best_session_count,
            StreakCategory::ExitBest => best.exit_best_session_count,
            StreakCategory::EnterLowEnd => low_end.enter_low_end_session_count,
            StreakCategory::ExitLowEnd => low_end.exit_low_end_session_count,
            StreakCategory::None => usize::MAX,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreakCategory::EnterBest => "ENTER_BEST",
            StreakCategory::ExitBest => "EXIT_BEST",
            StreakCategory::EnterLowEnd => "ENTER_LOW_END",
            StreakCategory::ExitLowEnd => "EXIT_LOW_END",
            StreakCategory::None => "NONE",
        }
    }
}

/// Outcome of scanning a window for one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToleranceStreakResult {
    pub qualifying_count: usize,
    pub total_examined: usize,
    pub breaks_used: usize,
    pub meets_requirement: bool,
}

/// Scans the newest `examine` samples for a tolerant streak.
///
/// Walks newest to oldest. Qualifying samples add to the count; anything else
/// spends a break. The scan stops once `required` samples qualified or once
/// more than `max_breaks` breaks were spent, so `total_examined` is the span
/// the streak actually covers.
pub fn tolerant_streak<I, P>(
    newest_first: I,
    examine: usize,
    required: usize,
    max_breaks: usize,
    mut qualifies: P,
) -> ToleranceStreakResult
where
    I: IntoIterator<Item = f64>,
    P: FnMut(f64) -> bool,
{
    let mut result = ToleranceStreakResult::default();
    for sample in newest_first.into_iter().take(examine) {
        result.total_examined += 1;
        if qualifies(sample) {
            result.qualifying_count += 1;
            if result.qualifying_count >= required {
                break;
            }
        } else {
            result.breaks_used += 1;
            if result.breaks_used > max_breaks {
                break;
            }
        }
    }
    result.meets_requirement = result.qualifying_count >= required
        && result.total_examined - result.qualifying_count <= max_breaks;
    result
}

/// Evaluates `category` against the newest samples of `window`.
///
/// Returns a non-qualifying result while the window holds fewer than
/// `evaluationWindow` samples: no transition fires on partial history.
pub fn evaluate(
    window: &SampleWindow,
    category: StreakCategory,
    thresholds: &HysteresisThresholds,
) -> ToleranceStreakResult {
    if category == StreakCategory::None || window.len() < thresholds.evaluation_window {
        return ToleranceStreakResult::default();
    }
    tolerant_streak(
        window.recent(thresholds.evaluation_window),
        thresholds.evaluation_window,
        category.required_sessions(thresholds),
        thresholds.max_breaks,
        |sample| category.qualifies(sample, thresholds),
    )
}
