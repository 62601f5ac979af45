//! Trendline and range formations
//!
//! Ascending Triangle, Rising Wedge and Symmetrical Triangle. Each one looks
//! only at the last `window` bars (40 by default) and keeps no extrema state.

use std::collections::HashMap;

use super::helpers::{
    highest_high, highs, is_rising, lowest_low, lows, percentile, scale_targets, trendline_slope,
};
use crate::{
    params::{get_factor, get_period, get_ratio, ParamMeta, ParameterizedDetector},
    Formation, PatternDetector, PatternError, PatternType, Period, Ratio, Result, ScoreBasis,
    OHLCV,
};

impl_with_defaults!(
    AscendingTriangleDetector,
    RisingWedgeDetector,
    SymmetricalTriangleDetector,
);

/// Last `window` bars, or None when fewer are available
fn tail<T: OHLCV>(bars: &[T], window: Period) -> Option<&[T]> {
    let n = window.get();
    (bars.len() >= n).then(|| &bars[bars.len() - n..])
}

fn check_targets(factors: &[f64; 3]) -> Result<()> {
    if factors.iter().any(|f| !f.is_finite() || *f <= 1.0) {
        return Err(PatternError::InvalidValue("target factors must be finite and above 1.0"));
    }
    if factors.windows(2).any(|w| w[0] > w[1]) {
        return Err(PatternError::InvalidConfig(format!(
            "target factors must be ascending, got {factors:?}"
        )));
    }
    Ok(())
}

// ============================================================
// ASCENDING TRIANGLE
// ============================================================

/// Ascending Triangle: flat resistance with rising lows.
#[derive(Debug, Clone)]
pub struct AscendingTriangleDetector {
    pub window: Period,
    /// Percentile of the highs taken as resistance
    pub resistance_percentile: Ratio,
    /// A high within this distance of resistance counts as a touch
    pub touch_tolerance: Ratio,
    pub min_touches: Period,
    /// Invalidation/stop sits this far below the window low
    pub invalidation_buffer: Ratio,
    /// Targets as multiples of resistance
    pub target_factors: [f64; 3],
    pub lookback: Period,
    pub min_history: Period,
}

impl Default for AscendingTriangleDetector {
    fn default() -> Self {
        Self {
            window: Period::new_const(40),
            resistance_percentile: Ratio::new_const(0.95),
            touch_tolerance: Ratio::new_const(0.01),
            min_touches: Period::new_const(2),
            invalidation_buffer: Ratio::new_const(0.02),
            target_factors: [1.03, 1.05, 1.08],
            lookback: Period::new_const(120),
            min_history: Period::new_const(40),
        }
    }
}

impl PatternDetector for AscendingTriangleDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::AscendingTriangle
    }

    fn min_bars(&self) -> usize {
        self.min_history.get()
    }

    fn lookback(&self) -> usize {
        self.lookback.get()
    }

    fn formations<T: OHLCV>(&self, window: &[T]) -> Vec<Formation> {
        self.find(window).into_iter().collect()
    }

    fn validate_config(&self) -> Result<()> {
        check_targets(&self.target_factors)
    }
}

impl AscendingTriangleDetector {
    fn find<T: OHLCV>(&self, window: &[T]) -> Option<Formation> {
        let recent = tail(window, self.window)?;
        let highs = highs(recent);

        let resistance = percentile(&highs, self.resistance_percentile.pct())?;
        if resistance <= f64::EPSILON {
            return None;
        }

        let tolerance = self.touch_tolerance.get();
        let touches = highs
            .iter()
            .filter(|h| ((*h - resistance) / resistance).abs() < tolerance)
            .count();
        if touches < self.min_touches.get() || !is_rising(&lows(recent)) {
            return None;
        }

        let floor = lowest_low(recent)? * (1.0 - self.invalidation_buffer.get());
        let touches_f = touches as f64;

        Some(
            Formation::new(
                resistance,
                floor,
                floor,
                scale_targets(resistance, self.target_factors),
                ScoreBasis::Generic {
                    quality: touches_f * 15.0,
                    depth_pct: (touches_f * 5.0).min(20.0),
                },
            )
            .with_detail("resistance", resistance)
            .with_detail("touches", touches_f),
        )
    }
}

// ============================================================
// RISING WEDGE
// ============================================================

/// Rising Wedge: both trendlines rising, the upper one steeper.
#[derive(Debug, Clone)]
pub struct RisingWedgeDetector {
    pub window: Period,
    /// Breakout sits this far above the last high
    pub breakout_buffer: Ratio,
    pub invalidation_buffer: Ratio,
    pub target_factors: [f64; 3],
    pub lookback: Period,
    pub min_history: Period,
}

impl Default for RisingWedgeDetector {
    fn default() -> Self {
        Self {
            window: Period::new_const(40),
            breakout_buffer: Ratio::new_const(0.01),
            invalidation_buffer: Ratio::new_const(0.02),
            target_factors: [1.03, 1.05, 1.08],
            lookback: Period::new_const(90),
            min_history: Period::new_const(40),
        }
    }
}

impl PatternDetector for RisingWedgeDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::RisingWedge
    }

    fn min_bars(&self) -> usize {
        self.min_history.get()
    }

    fn lookback(&self) -> usize {
        self.lookback.get()
    }

    fn formations<T: OHLCV>(&self, window: &[T]) -> Vec<Formation> {
        self.find(window).into_iter().collect()
    }

    fn validate_config(&self) -> Result<()> {
        check_targets(&self.target_factors)
    }
}

impl RisingWedgeDetector {
    fn find<T: OHLCV>(&self, window: &[T]) -> Option<Formation> {
        let recent = tail(window, self.window)?;
        let (lows, highs) = (lows(recent), highs(recent));

        if !is_rising(&lows) || !is_rising(&highs) {
            return None;
        }

        let low_slope = trendline_slope(&lows);
        let high_slope = trendline_slope(&highs);
        if high_slope <= low_slope {
            return None;
        }

        let last_high = *highs.last()?;
        let breakout = last_high * (1.0 + self.breakout_buffer.get());
        let floor = lowest_low(recent)? * (1.0 - self.invalidation_buffer.get());

        Some(
            Formation::new(
                breakout,
                floor,
                floor,
                scale_targets(breakout, self.target_factors),
                ScoreBasis::Generic {
                    quality: 70.0,
                    depth_pct: 10.0,
                },
            )
            .with_detail("low_slope", low_slope)
            .with_detail("high_slope", high_slope),
        )
    }
}

// ============================================================
// SYMMETRICAL TRIANGLE
// ============================================================

/// Symmetrical Triangle: the trading range narrows across the window.
#[derive(Debug, Clone)]
pub struct SymmetricalTriangleDetector {
    pub window: Period,
    /// Bars at each end of the window compared for range
    pub segment: Period,
    /// Late range must be below this fraction of the early range
    pub max_contraction: Ratio,
    pub invalidation_buffer: Ratio,
    pub target_factors: [f64; 3],
    pub lookback: Period,
    pub min_history: Period,
}

impl Default for SymmetricalTriangleDetector {
    fn default() -> Self {
        Self {
            window: Period::new_const(40),
            segment: Period::new_const(10),
            max_contraction: Ratio::new_const(0.8),
            invalidation_buffer: Ratio::new_const(0.02),
            target_factors: [1.04, 1.06, 1.10],
            lookback: Period::new_const(90),
            min_history: Period::new_const(40),
        }
    }
}

impl PatternDetector for SymmetricalTriangleDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::SymmetricalTriangle
    }

    fn min_bars(&self) -> usize {
        self.min_history.get()
    }

    fn lookback(&self) -> usize {
        self.lookback.get()
    }

    fn formations<T: OHLCV>(&self, window: &[T]) -> Vec<Formation> {
        self.find(window).into_iter().collect()
    }

    fn validate_config(&self) -> Result<()> {
        if self.segment.get() * 2 > self.window.get() {
            return Err(PatternError::InvalidConfig(format!(
                "segment ({}) overlaps itself in a {}-bar window",
                self.segment.get(),
                self.window.get()
            )));
        }
        check_targets(&self.target_factors)
    }
}

impl SymmetricalTriangleDetector {
    fn find<T: OHLCV>(&self, window: &[T]) -> Option<Formation> {
        let recent = tail(window, self.window)?;
        let seg = self.segment.get();
        // hand-built configs skip validate_config
        if seg * 2 > recent.len() {
            return None;
        }

        let early = relative_range(&recent[..seg])?;
        let late_bars = &recent[recent.len() - seg..];
        let late = relative_range(late_bars)?;

        if early <= f64::EPSILON || late >= early * self.max_contraction.get() {
            return None;
        }

        let breakout = highest_high(late_bars)?;
        let floor = lowest_low(recent)? * (1.0 - self.invalidation_buffer.get());

        Some(
            Formation::new(
                breakout,
                floor,
                floor,
                scale_targets(breakout, self.target_factors),
                ScoreBasis::Generic {
                    quality: (100.0 - late / early * 100.0).max(0.0),
                    depth_pct: early * 100.0,
                },
            )
            .with_detail("early_range", early)
            .with_detail("late_range", late),
        )
    }
}

/// (max high - min low) / min low; None for empty or non-positive lows
fn relative_range<T: OHLCV>(bars: &[T]) -> Option<f64> {
    let high = highest_high(bars)?;
    let low = lowest_low(bars)?;
    (low > f64::EPSILON).then(|| (high - low) / low)
}

// ============================================================
// PARAMETER METADATA
// ============================================================

static ASCENDING_TRIANGLE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("window", 40.0, (30.0, 60.0, 10.0), "Bars forming the triangle"),
    ParamMeta::ratio("resistance_percentile", 0.95, (0.90, 0.99, 0.01), "Percentile of highs used as resistance"),
    ParamMeta::ratio("touch_tolerance", 0.01, (0.005, 0.02, 0.005), "Distance counted as a resistance touch"),
    ParamMeta::period("min_touches", 2.0, (2.0, 4.0, 1.0), "Minimum resistance touches"),
    ParamMeta::ratio("invalidation_buffer", 0.02, (0.01, 0.05, 0.01), "Stop distance below the window low"),
    ParamMeta::factor("target1", 1.03, (1.01, 1.05, 0.01), "First target multiple"),
    ParamMeta::factor("target2", 1.05, (1.03, 1.08, 0.01), "Second target multiple"),
    ParamMeta::factor("target3", 1.08, (1.05, 1.15, 0.01), "Third target multiple"),
];

static RISING_WEDGE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("window", 40.0, (30.0, 60.0, 10.0), "Bars forming the wedge"),
    ParamMeta::ratio("breakout_buffer", 0.01, (0.005, 0.03, 0.005), "Breakout distance above the last high"),
    ParamMeta::ratio("invalidation_buffer", 0.02, (0.01, 0.05, 0.01), "Stop distance below the window low"),
    ParamMeta::factor("target1", 1.03, (1.01, 1.05, 0.01), "First target multiple"),
    ParamMeta::factor("target2", 1.05, (1.03, 1.08, 0.01), "Second target multiple"),
    ParamMeta::factor("target3", 1.08, (1.05, 1.15, 0.01), "Third target multiple"),
];

static SYMMETRICAL_TRIANGLE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("window", 40.0, (30.0, 60.0, 10.0), "Bars forming the triangle"),
    ParamMeta::period("segment", 10.0, (5.0, 15.0, 5.0), "Bars compared at each end"),
    ParamMeta::ratio("max_contraction", 0.8, (0.5, 0.9, 0.1), "Late range as a fraction of early range"),
    ParamMeta::ratio("invalidation_buffer", 0.02, (0.01, 0.05, 0.01), "Stop distance below the window low"),
    ParamMeta::factor("target1", 1.04, (1.02, 1.06, 0.01), "First target multiple"),
    ParamMeta::factor("target2", 1.06, (1.04, 1.10, 0.01), "Second target multiple"),
    ParamMeta::factor("target3", 1.10, (1.06, 1.15, 0.01), "Third target multiple"),
];

fn get_targets(params: &HashMap<&str, f64>, defaults: [f64; 3]) -> Result<[f64; 3]> {
    Ok([
        get_factor(params, "target1", defaults[0])?,
        get_factor(params, "target2", defaults[1])?,
        get_factor(params, "target3", defaults[2])?,
    ])
}

impl ParameterizedDetector for AscendingTriangleDetector {
    fn param_meta() -> &'static [ParamMeta] {
        ASCENDING_TRIANGLE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let defaults = Self::default();
        let detector = Self {
            window: get_period(params, "window", 40)?,
            resistance_percentile: get_ratio(params, "resistance_percentile", 0.95)?,
            touch_tolerance: get_ratio(params, "touch_tolerance", 0.01)?,
            min_touches: get_period(params, "min_touches", 2)?,
            invalidation_buffer: get_ratio(params, "invalidation_buffer", 0.02)?,
            target_factors: get_targets(params, defaults.target_factors)?,
            ..defaults
        };
        detector.validate_config()?;
        Ok(detector)
    }

    fn detects() -> PatternType {
        PatternType::AscendingTriangle
    }
}

impl ParameterizedDetector for RisingWedgeDetector {
    fn param_meta() -> &'static [ParamMeta] {
        RISING_WEDGE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let defaults = Self::default();
        let detector = Self {
            window: get_period(params, "window", 40)?,
            breakout_buffer: get_ratio(params, "breakout_buffer", 0.01)?,
            invalidation_buffer: get_ratio(params, "invalidation_buffer", 0.02)?,
            target_factors: get_targets(params, defaults.target_factors)?,
            ..defaults
        };
        detector.validate_config()?;
        Ok(detector)
    }

    fn detects() -> PatternType {
        PatternType::RisingWedge
    }
}

impl ParameterizedDetector for SymmetricalTriangleDetector {
    fn param_meta() -> &'static [ParamMeta] {
        SYMMETRICAL_TRIANGLE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let defaults = Self::default();
        let detector = Self {
            window: get_period(params, "window", 40)?,
            segment: get_period(params, "segment", 10)?,
            max_contraction: get_ratio(params, "max_contraction", 0.8)?,
            invalidation_buffer: get_ratio(params, "invalidation_buffer", 0.02)?,
            target_factors: get_targets(params, defaults.target_factors)?,
            ..defaults
        };
        detector.validate_config()?;
        Ok(detector)
    }

    fn detects() -> PatternType {
        PatternType::SymmetricalTriangle
    }
}
