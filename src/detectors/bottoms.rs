//! Extrema-based reversal detectors
//!
//! Double Bottom, Inverse Head & Shoulders and Triple Bottom. All three start
//! from the local minima of the lows (5-bar order by default) and measure the
//! resistance formed by the highs between them.

use std::collections::HashMap;

use super::helpers::{highest_high, local_minima, lows, project_targets};
use crate::{
    params::{get_period, get_ratio, ParamMeta, ParameterizedDetector},
    Formation, OHLCVExt, PatternDetector, PatternError, PatternType, Period, Ratio, Result,
    ScoreBasis, OHLCV,
};

impl_with_defaults!(
    DoubleBottomDetector,
    InverseHeadShouldersDetector,
    TripleBottomDetector,
);

/// Fibonacci extensions of the pattern height
const FIB_EXTENSIONS: [f64; 3] = [0.382, 0.618, 1.0];

/// Triple bottom measured-move multiples
const TRIPLE_EXTENSIONS: [f64; 3] = [0.5, 0.75, 1.0];

fn check_extrema_window(order: Period, lookback: Period) -> Result<()> {
    if lookback.get() < 2 * order.get() + 1 {
        return Err(PatternError::InvalidConfig(format!(
            "lookback ({}) too short for extrema order {}",
            lookback.get(),
            order.get()
        )));
    }
    Ok(())
}

// ============================================================
// DOUBLE BOTTOM
// ============================================================

/// Double Bottom ("W"): two similar lows with a peak between them.
///
/// Every pair of local minima is tried, so several candidates may come back
/// for one window; they are returned oldest first.
#[derive(Debug, Clone)]
pub struct DoubleBottomDetector {
    pub extrema_order: Period,
    /// Minimum bars between the two lows
    pub min_spacing: Period,
    /// Maximum bars between the two lows
    pub max_spacing: Period,
    /// Max |low1 - low2| / low1
    pub symmetry_tolerance: Ratio,
    /// How far the second low may undercut the first
    pub second_low_tolerance: Ratio,
    /// Intervening peak must rise this far above the average low
    pub min_peak_height: Ratio,
    /// Invalidation/stop sits this far below the average low
    pub invalidation_buffer: Ratio,
    pub lookback: Period,
    pub min_history: Period,
}

impl Default for DoubleBottomDetector {
    fn default() -> Self {
        Self {
            extrema_order: Period::new_const(5),
            min_spacing: Period::new_const(10),
            max_spacing: Period::new_const(60),
            symmetry_tolerance: Ratio::new_const(0.03),
            second_low_tolerance: Ratio::new_const(0.03),
            min_peak_height: Ratio::new_const(0.03),
            invalidation_buffer: Ratio::new_const(0.03),
            lookback: Period::new_const(180),
            min_history: Period::new_const(60),
        }
    }
}

impl PatternDetector for DoubleBottomDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::DoubleBottom
    }

    fn min_bars(&self) -> usize {
        self.min_history.get()
    }

    fn lookback(&self) -> usize {
        self.lookback.get()
    }

    fn formations<T: OHLCV>(&self, window: &[T]) -> Vec<Formation> {
        let minima = local_minima(&lows(window), self.extrema_order.get());
        if minima.len() < 2 {
            return Vec::new();
        }

        let mut found = Vec::new();
        for (i, &first) in minima.iter().enumerate() {
            for &second in &minima[i + 1..] {
                if let Some(formation) = self.pair(window, first, second) {
                    found.push(formation);
                }
            }
        }
        found
    }

    fn validate_config(&self) -> Result<()> {
        if self.min_spacing > self.max_spacing {
            return Err(PatternError::InvalidConfig(format!(
                "min_spacing ({}) exceeds max_spacing ({})",
                self.min_spacing.get(),
                self.max_spacing.get()
            )));
        }
        check_extrema_window(self.extrema_order, self.lookback)
    }
}

impl DoubleBottomDetector {
    fn pair<T: OHLCV>(&self, window: &[T], first: usize, second: usize) -> Option<Formation> {
        let days_between = second - first;
        if days_between < self.min_spacing.get() || days_between > self.max_spacing.get() {
            return None;
        }

        let (bar1, bar2) = (&window[first], &window[second]);
        let (low1, low2) = (bar1.low(), bar2.low());
        if low1 <= f64::EPSILON {
            return None;
        }

        let symmetry_diff = (low1 - low2).abs() / low1 * 100.0;
        if symmetry_diff > self.symmetry_tolerance.pct() {
            return None;
        }
        if low2 < low1 * (1.0 - self.second_low_tolerance.get()) {
            return None;
        }

        let peak = highest_high(&window[first..=second])?;
        let avg_bottom = (low1 + low2) / 2.0;
        let peak_height_pct = (peak - avg_bottom) / avg_bottom * 100.0;
        if peak_height_pct < self.min_peak_height.pct() {
            return None;
        }

        // zero-range bars count as closing on their low
        let wick_ratio = (bar1.close_location().unwrap_or(0.0)
            + bar2.close_location().unwrap_or(0.0))
            / 2.0;
        let floor = avg_bottom * (1.0 - self.invalidation_buffer.get());

        Some(
            Formation::new(
                peak,
                floor,
                floor,
                project_targets(peak, peak - avg_bottom, FIB_EXTENSIONS),
                ScoreBasis::Reversal {
                    symmetry_diff_pct: symmetry_diff,
                    peak_height_pct,
                    days_between,
                },
            )
            .with_detail("bottom1", low1)
            .with_detail("bottom2", low2)
            .with_detail("peak", peak)
            .with_detail("symmetry_diff", symmetry_diff)
            .with_detail("peak_height_pct", peak_height_pct)
            .with_detail("wick_ratio", wick_ratio)
            .with_detail("days_between", days_between as f64),
        )
    }
}

// ============================================================
// INVERSE HEAD & SHOULDERS
// ============================================================

/// Inverse Head & Shoulders: three consecutive lows, the middle one deepest.
#[derive(Debug, Clone)]
pub struct InverseHeadShouldersDetector {
    pub extrema_order: Period,
    /// Max |left - right| / left between the shoulders
    pub shoulder_tolerance: Ratio,
    /// Head must sit this far below the shoulder average
    pub min_head_depth: Ratio,
    pub lookback: Period,
    pub min_history: Period,
}

impl Default for InverseHeadShouldersDetector {
    fn default() -> Self {
        Self {
            extrema_order: Period::new_const(5),
            shoulder_tolerance: Ratio::new_const(0.05),
            min_head_depth: Ratio::new_const(0.05),
            lookback: Period::new_const(180),
            min_history: Period::new_const(60),
        }
    }
}

impl PatternDetector for InverseHeadShouldersDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::InverseHeadShoulders
    }

    fn min_bars(&self) -> usize {
        self.min_history.get()
    }

    fn lookback(&self) -> usize {
        self.lookback.get()
    }

    fn formations<T: OHLCV>(&self, window: &[T]) -> Vec<Formation> {
        let minima = local_minima(&lows(window), self.extrema_order.get());

        minima
            .windows(3)
            .filter_map(|idx| self.triple(window, idx[0], idx[1], idx[2]))
            .collect()
    }

    fn validate_config(&self) -> Result<()> {
        check_extrema_window(self.extrema_order, self.lookback)
    }
}

impl InverseHeadShouldersDetector {
    fn triple<T: OHLCV>(
        &self,
        window: &[T],
        left: usize,
        head: usize,
        right: usize,
    ) -> Option<Formation> {
        let (left_low, head_low, right_low) =
            (window[left].low(), window[head].low(), window[right].low());

        if head_low >= left_low || head_low >= right_low || left_low <= f64::EPSILON {
            return None;
        }

        let shoulder_symmetry = (left_low - right_low).abs() / left_low * 100.0;
        if shoulder_symmetry > self.shoulder_tolerance.pct() {
            return None;
        }

        let avg_shoulder = (left_low + right_low) / 2.0;
        let head_depth = (avg_shoulder - head_low) / avg_shoulder * 100.0;
        if head_depth < self.min_head_depth.pct() {
            return None;
        }

        let peak1 = highest_high(&window[left..head])?;
        let peak2 = highest_high(&window[head..right])?;
        let neckline = (peak1 + peak2) / 2.0;

        Some(
            Formation::new(
                neckline,
                head_low,
                head_low,
                project_targets(neckline, neckline - head_low, FIB_EXTENSIONS),
                ScoreBasis::Generic {
                    quality: 100.0 - shoulder_symmetry * 10.0,
                    depth_pct: head_depth,
                },
            )
            .with_detail("left_shoulder", left_low)
            .with_detail("head", head_low)
            .with_detail("right_shoulder", right_low)
            .with_detail("neckline", neckline)
            .with_detail("shoulder_symmetry", shoulder_symmetry)
            .with_detail("head_depth_pct", head_depth),
        )
    }
}

// ============================================================
// TRIPLE BOTTOM
// ============================================================

/// Triple Bottom: three consecutive lows clustered around their mean.
#[derive(Debug, Clone)]
pub struct TripleBottomDetector {
    pub extrema_order: Period,
    /// Max distance of each low from the three-low average
    pub bottom_tolerance: Ratio,
    pub invalidation_buffer: Ratio,
    pub lookback: Period,
    pub min_history: Period,
}

impl Default for TripleBottomDetector {
    fn default() -> Self {
        Self {
            extrema_order: Period::new_const(5),
            bottom_tolerance: Ratio::new_const(0.03),
            invalidation_buffer: Ratio::new_const(0.03),
            lookback: Period::new_const(180),
            min_history: Period::new_const(90),
        }
    }
}

impl PatternDetector for TripleBottomDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::TripleBottom
    }

    fn min_bars(&self) -> usize {
        self.min_history.get()
    }

    fn lookback(&self) -> usize {
        self.lookback.get()
    }

    fn formations<T: OHLCV>(&self, window: &[T]) -> Vec<Formation> {
        let minima = local_minima(&lows(window), self.extrema_order.get());

        minima
            .windows(3)
            .filter_map(|idx| self.triple(window, idx[0], idx[1], idx[2]))
            .collect()
    }

    fn validate_config(&self) -> Result<()> {
        check_extrema_window(self.extrema_order, self.lookback)
    }
}

impl TripleBottomDetector {
    fn triple<T: OHLCV>(&self, window: &[T], b1: usize, b2: usize, b3: usize) -> Option<Formation> {
        let bottoms = [window[b1].low(), window[b2].low(), window[b3].low()];
        let avg_bottom = bottoms.iter().sum::<f64>() / 3.0;
        if avg_bottom <= f64::EPSILON {
            return None;
        }

        let tolerance = self.bottom_tolerance.get();
        if bottoms
            .iter()
            .any(|b| (b - avg_bottom).abs() / avg_bottom > tolerance)
        {
            return None;
        }

        let peak1 = highest_high(&window[b1..b2])?;
        let peak2 = highest_high(&window[b2..b3])?;
        let resistance = (peak1 + peak2) / 2.0;
        let depth_pct = (resistance - avg_bottom) / avg_bottom * 100.0;
        let floor = avg_bottom * (1.0 - self.invalidation_buffer.get());

        Some(
            Formation::new(
                resistance,
                floor,
                floor,
                project_targets(resistance, resistance - avg_bottom, TRIPLE_EXTENSIONS),
                // three touches count as a strong base
                ScoreBasis::Generic {
                    quality: 90.0,
                    depth_pct,
                },
            )
            .with_detail("bottom1", bottoms[0])
            .with_detail("bottom2", bottoms[1])
            .with_detail("bottom3", bottoms[2])
            .with_detail("resistance", resistance),
        )
    }
}

// ============================================================
// PARAMETER METADATA
// ============================================================

static DOUBLE_BOTTOM_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("extrema_order", 5.0, (3.0, 10.0, 1.0), "Neighbours on each side of a local low"),
    ParamMeta::period("min_spacing", 10.0, (5.0, 20.0, 5.0), "Minimum bars between the lows"),
    ParamMeta::period("max_spacing", 60.0, (40.0, 90.0, 10.0), "Maximum bars between the lows"),
    ParamMeta::ratio("symmetry_tolerance", 0.03, (0.01, 0.05, 0.01), "Maximum difference between the lows"),
    ParamMeta::ratio("second_low_tolerance", 0.03, (0.01, 0.05, 0.01), "Maximum undercut of the second low"),
    ParamMeta::ratio("min_peak_height", 0.03, (0.02, 0.10, 0.01), "Minimum peak height above the lows"),
    ParamMeta::ratio("invalidation_buffer", 0.03, (0.01, 0.05, 0.01), "Stop distance below the average low"),
    ParamMeta::period("lookback", 180.0, (120.0, 250.0, 10.0), "Bars scanned"),
    ParamMeta::period("min_history", 60.0, (60.0, 60.0, 1.0), "Minimum history"),
];

static INVERSE_HEAD_SHOULDERS_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("extrema_order", 5.0, (3.0, 10.0, 1.0), "Neighbours on each side of a local low"),
    ParamMeta::ratio("shoulder_tolerance", 0.05, (0.02, 0.08, 0.01), "Maximum shoulder difference"),
    ParamMeta::ratio("min_head_depth", 0.05, (0.03, 0.10, 0.01), "Minimum head depth below the shoulders"),
    ParamMeta::period("lookback", 180.0, (120.0, 250.0, 10.0), "Bars scanned"),
    ParamMeta::period("min_history", 60.0, (60.0, 60.0, 1.0), "Minimum history"),
];

static TRIPLE_BOTTOM_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("extrema_order", 5.0, (3.0, 10.0, 1.0), "Neighbours on each side of a local low"),
    ParamMeta::ratio("bottom_tolerance", 0.03, (0.01, 0.05, 0.01), "Maximum distance from the average low"),
    ParamMeta::ratio("invalidation_buffer", 0.03, (0.01, 0.05, 0.01), "Stop distance below the average low"),
    ParamMeta::period("lookback", 180.0, (120.0, 250.0, 10.0), "Bars scanned"),
    ParamMeta::period("min_history", 90.0, (90.0, 90.0, 1.0), "Minimum history"),
];

impl ParameterizedDetector for DoubleBottomDetector {
    fn param_meta() -> &'static [ParamMeta] {
        DOUBLE_BOTTOM_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            extrema_order: get_period(params, "extrema_order", 5)?,
            min_spacing: get_period(params, "min_spacing", 10)?,
            max_spacing: get_period(params, "max_spacing", 60)?,
            symmetry_tolerance: get_ratio(params, "symmetry_tolerance", 0.03)?,
            second_low_tolerance: get_ratio(params, "second_low_tolerance", 0.03)?,
            min_peak_height: get_ratio(params, "min_peak_height", 0.03)?,
            invalidation_buffer: get_ratio(params, "invalidation_buffer", 0.03)?,
            lookback: get_period(params, "lookback", 180)?,
            min_history: get_period(params, "min_history", 60)?,
        };
        detector.validate_config()?;
        Ok(detector)
    }

    fn detects() -> PatternType {
        PatternType::DoubleBottom
    }
}

impl ParameterizedDetector for InverseHeadShouldersDetector {
    fn param_meta() -> &'static [ParamMeta] {
        INVERSE_HEAD_SHOULDERS_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            extrema_order: get_period(params, "extrema_order", 5)?,
            shoulder_tolerance: get_ratio(params, "shoulder_tolerance", 0.05)?,
            min_head_depth: get_ratio(params, "min_head_depth", 0.05)?,
            lookback: get_period(params, "lookback", 180)?,
            min_history: get_period(params, "min_history", 60)?,
        };
        detector.validate_config()?;
        Ok(detector)
    }

    fn detects() -> PatternType {
        PatternType::InverseHeadShoulders
    }
}

impl ParameterizedDetector for TripleBottomDetector {
    fn param_meta() -> &'static [ParamMeta] {
        TRIPLE_BOTTOM_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            extrema_order: get_period(params, "extrema_order", 5)?,
            bottom_tolerance: get_ratio(params, "bottom_tolerance", 0.03)?,
            invalidation_buffer: get_ratio(params, "invalidation_buffer", 0.03)?,
            lookback: get_period(params, "lookback", 180)?,
            min_history: get_period(params, "min_history", 90)?,
        };
        detector.validate_config()?;
        Ok(detector)
    }

    fn detects() -> PatternType {
        PatternType::TripleBottom
    }
}
