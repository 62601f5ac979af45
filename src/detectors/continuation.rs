//! Continuation formations: Bull Flag and Cup & Handle
//!
//! Both are defined on fixed offsets from the end of the window rather than
//! on extrema, so each returns at most one formation.

use std::collections::HashMap;

use super::helpers::{closes, highest_high, lowest_low, mean, project_targets, sample_std};
use crate::{
    params::{get_period, get_ratio, ParamMeta, ParameterizedDetector},
    Formation, PatternDetector, PatternError, PatternType, Period, Ratio, Result, ScoreBasis,
    OHLCV,
};

impl_with_defaults!(BullFlagDetector, CupHandleDetector);

/// Fractions of the measured move used for the three targets
const MOVE_FRACTIONS: [f64; 3] = [0.5, 0.75, 1.0];

// ============================================================
// BULL FLAG
// ============================================================

/// Bull Flag: a sharp pole followed by a tight consolidation.
///
/// ```text
/// |<-- pole_length -->|<- flag_length ->|
/// start              end               now
/// ```
#[derive(Debug, Clone)]
pub struct BullFlagDetector {
    pub pole_length: Period,
    pub flag_length: Period,
    /// Minimum close-to-close gain over the pole
    pub min_pole_gain: Ratio,
    /// Maximum (high - low) / mean close over the flag
    pub max_flag_range: Ratio,
    /// Invalidation/stop sits this far below the flag low
    pub invalidation_buffer: Ratio,
    pub lookback: Period,
    pub min_history: Period,
}

impl Default for BullFlagDetector {
    fn default() -> Self {
        Self {
            pole_length: Period::new_const(20),
            flag_length: Period::new_const(10),
            min_pole_gain: Ratio::new_const(0.08),
            max_flag_range: Ratio::new_const(0.05),
            invalidation_buffer: Ratio::new_const(0.02),
            lookback: Period::new_const(60),
            min_history: Period::new_const(30),
        }
    }
}

impl PatternDetector for BullFlagDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::BullFlag
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
        let span = self.pole_length.get() + self.flag_length.get();
        if span > self.lookback.get() {
            return Err(PatternError::InvalidConfig(format!(
                "pole + flag ({span}) exceeds lookback ({})",
                self.lookback.get()
            )));
        }
        Ok(())
    }
}

impl BullFlagDetector {
    fn find<T: OHLCV>(&self, window: &[T]) -> Option<Formation> {
        let n = window.len();
        let flag_len = self.flag_length.get();
        let span = self.pole_length.get() + flag_len;
        if n < span {
            return None;
        }

        let pole_start = window[n - span].close();
        let pole_end = window[n - flag_len].close();
        if pole_start <= f64::EPSILON {
            return None;
        }
        let pole_gain = (pole_end - pole_start) / pole_start * 100.0;
        if pole_gain < self.min_pole_gain.pct() {
            return None;
        }

        let flag = &window[n - flag_len..];
        let flag_high = highest_high(flag)?;
        let flag_low = lowest_low(flag)?;
        let flag_closes = closes(flag);
        let flag_mean = mean(&flag_closes);
        if flag_mean <= f64::EPSILON {
            return None;
        }
        let flag_range = (flag_high - flag_low) / flag_mean * 100.0;
        if flag_range > self.max_flag_range.pct() {
            return None;
        }

        let first = flag_closes[0];
        let flag_slope = if first > f64::EPSILON {
            (flag_closes[flag_len - 1] - first) / first * 100.0
        } else {
            0.0
        };
        let floor = flag_low * (1.0 - self.invalidation_buffer.get());

        Some(
            Formation::new(
                flag_high,
                floor,
                floor,
                project_targets(flag_high, pole_gain * 0.01 * flag_high, MOVE_FRACTIONS),
                ScoreBasis::Generic {
                    quality: (100.0 - flag_range * 10.0).max(0.0),
                    depth_pct: pole_gain,
                },
            )
            .with_detail("pole_gain", pole_gain)
            .with_detail("flag_range", flag_range)
            .with_detail("flag_slope", flag_slope),
        )
    }
}

// ============================================================
// CUP & HANDLE
// ============================================================

/// Cup & Handle: a rounded base followed by a shallow pullback.
#[derive(Debug, Clone)]
pub struct CupHandleDetector {
    pub cup_length: Period,
    pub handle_length: Period,
    pub min_cup_depth: Ratio,
    pub max_cup_depth: Ratio,
    /// Max stdev / mean of closes over the middle third of the cup
    pub max_bottom_volatility: Ratio,
    pub min_handle_depth: Ratio,
    pub max_handle_depth: Ratio,
    /// Invalidation/stop sits this far below the handle low
    pub invalidation_buffer: Ratio,
    pub lookback: Period,
    pub min_history: Period,
}

impl Default for CupHandleDetector {
    fn default() -> Self {
        Self {
            cup_length: Period::new_const(70),
            handle_length: Period::new_const(20),
            min_cup_depth: Ratio::new_const(0.10),
            max_cup_depth: Ratio::new_const(0.40),
            max_bottom_volatility: Ratio::new_const(0.05),
            min_handle_depth: Ratio::new_const(0.03),
            max_handle_depth: Ratio::new_const(0.15),
            invalidation_buffer: Ratio::new_const(0.02),
            lookback: Period::new_const(180),
            min_history: Period::new_const(90),
        }
    }
}

impl PatternDetector for CupHandleDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::CupHandle
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
        if self.min_cup_depth > self.max_cup_depth || self.min_handle_depth > self.max_handle_depth
        {
            return Err(PatternError::InvalidConfig(
                "cup/handle depth bounds are inverted".to_string(),
            ));
        }
        if self.cup_length.get() < 3 {
            return Err(PatternError::InvalidValue("cup_length must be at least 3 bars"));
        }
        Ok(())
    }
}

impl CupHandleDetector {
    fn find<T: OHLCV>(&self, window: &[T]) -> Option<Formation> {
        let n = window.len();
        let cup_len = self.cup_length.get();
        let handle_len = self.handle_length.get();
        if n < cup_len + handle_len {
            return None;
        }

        let cup = &window[n - cup_len - handle_len..n - handle_len];
        let cup_start = cup[0].close();
        let cup_end = cup[cup_len - 1].close();
        let cup_low = lowest_low(cup)?;
        if cup_start <= f64::EPSILON || cup_end <= f64::EPSILON {
            return None;
        }

        let cup_depth = (cup_start - cup_low) / cup_start * 100.0;
        if cup_depth < self.min_cup_depth.pct() || cup_depth > self.max_cup_depth.pct() {
            return None;
        }

        // a V-shaped bottom is too volatile through its middle third
        let bottom = closes(&cup[cup_len / 3..2 * cup_len / 3]);
        let bottom_mean = mean(&bottom);
        if bottom_mean <= f64::EPSILON
            || sample_std(&bottom) / bottom_mean > self.max_bottom_volatility.get()
        {
            return None;
        }

        let handle = &window[n - handle_len..];
        let handle_high = cup_end;
        let handle_low = lowest_low(handle)?;
        let handle_depth = (handle_high - handle_low) / handle_high * 100.0;
        if handle_depth < self.min_handle_depth.pct() || handle_depth > self.max_handle_depth.pct()
        {
            return None;
        }

        let breakout = cup_start.max(handle_high);
        let floor = handle_low * (1.0 - self.invalidation_buffer.get());

        Some(
            Formation::new(
                breakout,
                floor,
                floor,
                project_targets(breakout, cup_depth * 0.01 * breakout, MOVE_FRACTIONS),
                ScoreBasis::Generic {
                    quality: (100.0 - (cup_depth - 20.0).abs() * 5.0).max(0.0),
                    depth_pct: cup_depth,
                },
            )
            .with_detail("cup_depth", cup_depth)
            .with_detail("cup_low", cup_low)
            .with_detail("handle_depth", handle_depth)
            .with_detail("handle_low", handle_low),
        )
    }
}

// ============================================================
// PARAMETER METADATA
// ============================================================

static BULL_FLAG_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("pole_length", 20.0, (10.0, 30.0, 5.0), "Bars in the pole"),
    ParamMeta::period("flag_length", 10.0, (5.0, 15.0, 5.0), "Bars in the consolidation"),
    ParamMeta::ratio("min_pole_gain", 0.08, (0.05, 0.15, 0.01), "Minimum pole gain"),
    ParamMeta::ratio("max_flag_range", 0.05, (0.03, 0.08, 0.01), "Maximum consolidation range"),
    ParamMeta::ratio("invalidation_buffer", 0.02, (0.01, 0.05, 0.01), "Stop distance below the flag low"),
];

static CUP_HANDLE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("cup_length", 70.0, (50.0, 100.0, 10.0), "Bars in the cup"),
    ParamMeta::period("handle_length", 20.0, (10.0, 30.0, 5.0), "Bars in the handle"),
    ParamMeta::ratio("min_cup_depth", 0.10, (0.05, 0.15, 0.01), "Minimum cup depth"),
    ParamMeta::ratio("max_cup_depth", 0.40, (0.30, 0.50, 0.05), "Maximum cup depth"),
    ParamMeta::ratio("max_bottom_volatility", 0.05, (0.02, 0.08, 0.01), "Maximum volatility of the cup bottom"),
    ParamMeta::ratio("min_handle_depth", 0.03, (0.01, 0.05, 0.01), "Minimum handle retracement"),
    ParamMeta::ratio("max_handle_depth", 0.15, (0.10, 0.20, 0.01), "Maximum handle retracement"),
    ParamMeta::ratio("invalidation_buffer", 0.02, (0.01, 0.05, 0.01), "Stop distance below the handle low"),
];

impl ParameterizedDetector for BullFlagDetector {
    fn param_meta() -> &'static [ParamMeta] {
        BULL_FLAG_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            pole_length: get_period(params, "pole_length", 20)?,
            flag_length: get_period(params, "flag_length", 10)?,
            min_pole_gain: get_ratio(params, "min_pole_gain", 0.08)?,
            max_flag_range: get_ratio(params, "max_flag_range", 0.05)?,
            invalidation_buffer: get_ratio(params, "invalidation_buffer", 0.02)?,
            ..Self::default()
        };
        detector.validate_config()?;
        Ok(detector)
    }

    fn detects() -> PatternType {
        PatternType::BullFlag
    }
}

impl ParameterizedDetector for CupHandleDetector {
    fn param_meta() -> &'static [ParamMeta] {
        CUP_HANDLE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            cup_length: get_period(params, "cup_length", 70)?,
            handle_length: get_period(params, "handle_length", 20)?,
            min_cup_depth: get_ratio(params, "min_cup_depth", 0.10)?,
            max_cup_depth: get_ratio(params, "max_cup_depth", 0.40)?,
            max_bottom_volatility: get_ratio(params, "max_bottom_volatility", 0.05)?,
            min_handle_depth: get_ratio(params, "min_handle_depth", 0.03)?,
            max_handle_depth: get_ratio(params, "max_handle_depth", 0.15)?,
            invalidation_buffer: get_ratio(params, "invalidation_buffer", 0.02)?,
            ..Self::default()
        };
        detector.validate_config()?;
        Ok(detector)
    }

    fn detects() -> PatternType {
        PatternType::CupHandle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::fixtures::{path, Bar};
    use crate::PatternState;

    fn from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .map(|&c| Bar {
                h: c + 1.0,
                l: c - 1.0,
                c,
                v: 1000.0,
            })
            .collect()
    }

    fn flag_bars() -> Vec<Bar> {
        from_closes(&path(&[(0, 100.0), (10, 100.0), (30, 115.0), (39, 115.0)]))
    }

    #[test]
    fn test_bull_flag() {
        let found = BullFlagDetector::default().scan(&flag_bars(), "FLAG", 50);
        assert_eq!(found.len(), 1);

        let obs = &found[0];
        assert!((obs.breakout_point - 116.0).abs() < 1e-9);
        assert!((obs.invalidation_point - 114.0 * 0.98).abs() < 1e-9);
        assert!((obs.target3 - (116.0 + 0.15 * 116.0)).abs() < 1e-6);
        assert!((obs.details["pole_gain"] - 15.0).abs() < 1e-9);
        assert_eq!(obs.state, PatternState::NearBreakout);
    }

    #[test]
    fn test_bull_flag_weak_pole() {
        let bars = from_closes(&path(&[(0, 100.0), (10, 100.0), (30, 105.0), (39, 105.0)]));
        assert!(BullFlagDetector::default().scan(&bars, "FLAG", 50).is_empty());
    }

    #[test]
    fn test_bull_flag_loose_consolidation() {
        let mut bars = flag_bars();
        bars[35].h = 125.0;
        assert!(BullFlagDetector::default().scan(&bars, "FLAG", 50).is_empty());
    }

    fn cup_bars() -> Vec<Bar> {
        from_closes(&path(&[
            (0, 100.0),
            (10, 100.0),
            (33, 80.0),
            (56, 80.0),
            (79, 98.0),
            (89, 92.0),
            (99, 96.0),
        ]))
    }

    #[test]
    fn test_cup_handle() {
        let found = CupHandleDetector::default().scan(&cup_bars(), "CUP", 50);
        assert_eq!(found.len(), 1);

        let obs = &found[0];
        assert!((obs.breakout_point - 100.0).abs() < 1e-9);
        assert!((obs.invalidation_point - 91.0 * 0.98).abs() < 1e-9);
        assert!((obs.target1 - 110.5).abs() < 1e-6);
        assert!((obs.target3 - 121.0).abs() < 1e-6);
        assert!((obs.details["cup_depth"] - 21.0).abs() < 1e-9);
        assert_eq!(obs.state, PatternState::Forming);
    }

    #[test]
    fn test_cup_too_shallow() {
        let bars = from_closes(&path(&[
            (0, 100.0),
            (10, 100.0),
            (33, 95.0),
            (56, 95.0),
            (79, 98.0),
            (89, 92.0),
            (99, 96.0),
        ]));
        assert!(CupHandleDetector::default().scan(&bars, "CUP", 50).is_empty());
    }

    #[test]
    fn test_cup_handle_short_history() {
        let bars = cup_bars();
        assert!(CupHandleDetector::default().scan(&bars[..89], "CUP", 50).is_empty());
    }

    #[test]
    fn test_inverted_depth_bounds() {
        let mut params = HashMap::new();
        params.insert("min_cup_depth", 0.5);
        assert!(CupHandleDetector::with_params(&params).is_err());
        assert_eq!(BullFlagDetector::param_meta().len(), 5);
    }
}
