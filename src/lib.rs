//! # breakout-scan - bullish chart formation scanner
//!
//! Detects early-forming bullish chart formations in daily price/volume series
//! and tracks each one from "forming" to "confirmed breakout".
//!
//! ## Quick Start
//!
//! ```rust
//! use breakout_scan::prelude::*;
//!
//! // Build an engine with all eight chart-pattern detectors
//! let engine = EngineBuilder::new()
//!     .with_all_defaults()
//!     .build()
//!     .unwrap();
//!
//! // Tier 1 (full scan) goes through the tracker, which owns the cache
//! let tracker = PatternTracker::new(engine);
//! let bars: Vec<PriceBar> = vec![];
//! let found = tracker.detect_all(&bars, "INFY.NS", 65);
//! assert!(found.is_empty());
//!
//! // Later, cheaper tiers only re-check what is already cached
//! let moved = tracker.rescan_imminent(&bars, "INFY.NS", 65);
//! assert!(moved.is_empty());
//! ```

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod detectors;
pub mod params;
pub mod scanner;
pub mod score;
pub mod state;
pub mod tracker;

pub use cache::{CacheStats, PatternCache, UpsertOutcome};
pub use scanner::{
    AlertSink, CancelToken, CollaboratorError, MarketCondition, MarketDataSource, PassError,
    PassReport, PatternSink, ScanError, Scanner, ScannerConfig, SymbolError,
};
pub use score::ScoreBasis;
pub use state::{PatternState, Reevaluation, StateThresholds};
pub use tracker::{PatternOutcome, PatternTracker, Tier};

pub mod prelude {
    pub use crate::{
        // Detectors
        detectors::*,
        // Parameters
        params::{get_factor, get_period, get_ratio, ParamMeta, ParamType, ParameterizedDetector},
        // Engine
        BuiltinDetector,
        // Scan pass
        AlertSink,
        CacheStats,
        CancelToken,
        CollaboratorError,
        // Types
        ContextProvider,
        DefaultContextProvider,
        EngineBuilder,
        Formation,
        MarketCondition,
        MarketContext,
        MarketDataSource,
        OHLCVExt,
        PassError,
        PassReport,
        PatternCache,
        // Core traits
        PatternDetector,
        PatternEngine,
        // Errors
        PatternError,
        PatternObservation,
        PatternOutcome,
        PatternSink,
        PatternState,
        PatternTracker,
        PatternType,
        Period,
        PriceBar,
        Ratio,
        Reevaluation,
        Result,
        ScanError,
        Scanner,
        ScannerConfig,
        ScoreBasis,
        StateThresholds,
        SymbolError,
        Tier,
        UpsertOutcome,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors raised by configuration and input validation.
///
/// Detection itself is total: short or degenerate series produce no
/// observations rather than an error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(PatternError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(PatternError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Ratio from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }

    /// The ratio expressed in percent (0.03 -> 3.0)
    #[inline]
    pub fn pct(self) -> f64 {
        self.0 * 100.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(PatternError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;

    fn timestamp(&self) -> Option<i64> {
        None
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    /// Where the close sits inside the bar: 0.0 at the low, 1.0 at the high.
    /// Returns None if range ≈ 0
    #[inline]
    fn close_location(&self) -> Option<f64> {
        let range = self.range();
        (range > f64::EPSILON).then(|| (self.close() - self.low()) / range)
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        if self.high() < self.low() {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "high < low",
            });
        }
        if self.open().is_nan()
            || self.high().is_nan()
            || self.low().is_nan()
            || self.close().is_nan()
            || self.volume().is_nan()
        {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if self.open().is_infinite()
            || self.high().is_infinite()
            || self.low().is_infinite()
            || self.close().is_infinite()
            || self.volume().is_infinite()
        {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if self.volume() < 0.0 {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "negative volume",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

/// One daily bar as delivered by the market-data collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for PriceBar {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    /// Midnight UTC of the bar date, in seconds
    fn timestamp(&self) -> Option<i64> {
        self.date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
    }
}

// ============================================================
// PATTERN TYPES
// ============================================================

/// The eight bullish chart formations the engine knows about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    DoubleBottom,
    InverseHeadShoulders,
    AscendingTriangle,
    BullFlag,
    CupHandle,
    TripleBottom,
    RisingWedge,
    SymmetricalTriangle,
}

impl PatternType {
    pub const ALL: [PatternType; 8] = [
        PatternType::DoubleBottom,
        PatternType::InverseHeadShoulders,
        PatternType::AscendingTriangle,
        PatternType::BullFlag,
        PatternType::CupHandle,
        PatternType::TripleBottom,
        PatternType::RisingWedge,
        PatternType::SymmetricalTriangle,
    ];

    /// Stable identifier used by the persistence and notification collaborators
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::DoubleBottom => "DOUBLE_BOTTOM",
            PatternType::InverseHeadShoulders => "INVERSE_HEAD_SHOULDERS",
            PatternType::AscendingTriangle => "ASCENDING_TRIANGLE",
            PatternType::BullFlag => "BULL_FLAG",
            PatternType::CupHandle => "CUP_HANDLE",
            PatternType::TripleBottom => "TRIPLE_BOTTOM",
            PatternType::RisingWedge => "RISING_WEDGE",
            PatternType::SymmetricalTriangle => "SYMMETRICAL_TRIANGLE",
        }
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            PatternType::DoubleBottom => "Double Bottom",
            PatternType::InverseHeadShoulders => "Inverse Head & Shoulders",
            PatternType::AscendingTriangle => "Ascending Triangle",
            PatternType::BullFlag => "Bull Flag",
            PatternType::CupHandle => "Cup & Handle",
            PatternType::TripleBottom => "Triple Bottom",
            PatternType::RisingWedge => "Rising Wedge",
            PatternType::SymmetricalTriangle => "Symmetrical Triangle",
        }
    }

    /// Parse the identifier produced by [`PatternType::as_str`]
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == id)
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// FORMATION / OBSERVATION
// ============================================================

/// Geometry found by a detector, before any state or score is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formation {
    pub breakout_point: f64,
    pub invalidation_point: f64,
    pub stop_loss: f64,
    pub targets: [f64; 3],
    pub basis: ScoreBasis,
    /// Measurements behind the match, for diagnostics only
    pub details: BTreeMap<String, f64>,
}

impl Formation {
    pub fn new(
        breakout_point: f64,
        invalidation_point: f64,
        stop_loss: f64,
        targets: [f64; 3],
        basis: ScoreBasis,
    ) -> Self {
        Self {
            breakout_point,
            invalidation_point,
            stop_loss,
            targets,
            basis,
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: f64) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }
}

/// A detected formation for one symbol, together with its lifecycle state.
///
/// Breakout, invalidation, stop and target levels are fixed when the
/// observation is created. Only the dynamic fields (`state`,
/// `strength_score`, `current_price`, `distance_pct`, `volume_confirmed`,
/// `as_of`) change on re-evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternObservation {
    pub symbol: String,
    pub pattern_type: PatternType,
    pub state: PatternState,
    /// 0..=100
    pub strength_score: u8,
    pub current_price: f64,
    pub breakout_point: f64,
    /// (breakout_point - current_price) / current_price * 100
    pub distance_pct: f64,
    pub invalidation_point: f64,
    pub stop_loss: f64,
    pub target1: f64,
    pub target2: f64,
    pub target3: f64,
    pub volume_confirmed: bool,
    pub score_basis: ScoreBasis,
    pub details: BTreeMap<String, f64>,
    /// Timestamp of the bar the dynamic fields were computed from
    pub as_of: Option<i64>,
}

impl PatternObservation {
    /// Attach state and score to a freshly detected formation.
    pub fn new(
        symbol: &str,
        pattern_type: PatternType,
        formation: Formation,
        ctx: &MarketContext,
        thresholds: &StateThresholds,
    ) -> Self {
        let distance_pct = state::distance_pct(formation.breakout_point, ctx.current_price);
        let state = state::determine_state(
            ctx.current_price,
            formation.breakout_point,
            distance_pct,
            ctx.volume_ratio,
            thresholds,
        );
        let [target1, target2, target3] = formation.targets;

        Self {
            symbol: symbol.to_string(),
            pattern_type,
            state,
            strength_score: score::strength_score(&formation.basis, ctx),
            current_price: ctx.current_price,
            breakout_point: formation.breakout_point,
            distance_pct,
            invalidation_point: formation.invalidation_point,
            stop_loss: formation.stop_loss,
            target1,
            target2,
            target3,
            volume_confirmed: ctx.volume_confirmed,
            score_basis: formation.basis,
            details: formation.details,
            as_of: ctx.as_of,
        }
    }

    #[inline]
    pub fn targets(&self) -> [f64; 3] {
        [self.target1, self.target2, self.target3]
    }

    /// Number of profit targets reached at `price` (0..=3)
    pub fn targets_hit(&self, price: f64) -> u8 {
        self.targets().iter().filter(|t| price >= **t).count() as u8
    }

    #[inline]
    pub fn is_invalidated_by(&self, price: f64) -> bool {
        price < self.invalidation_point
    }
}

// ============================================================
// MARKET CONTEXT
// ============================================================

/// Per-symbol, per-pass inputs shared by every detector and the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    /// Externally supplied market condition score, 0..=100
    pub market_score: u8,
    /// Recent volume over baseline volume (1.0 = neutral)
    pub volume_ratio: f64,
    pub volume_confirmed: bool,
    /// Last close above its trend moving average
    pub above_trend: bool,
    pub current_price: f64,
    pub as_of: Option<i64>,
}

impl Default for MarketContext {
    fn default() -> Self {
        Self {
            market_score: 0,
            volume_ratio: 1.0,
            volume_confirmed: false,
            above_trend: false,
            current_price: 0.0,
            as_of: None,
        }
    }
}

/// Provider of market context - computed once per symbol per pass
pub trait ContextProvider: Send + Sync {
    fn compute<T: OHLCV>(&self, bars: &[T], market_score: u8) -> MarketContext;
}

/// Default context provider using trailing volume windows and a simple moving average
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultContextProvider {
    /// Recent bars averaged for the volume ratio numerator
    pub volume_lookback: Period,
    /// Total bars in the volume window (baseline = window - lookback)
    pub volume_window: Period,
    /// Volume ratio above which volume counts as confirmed
    pub confirm_factor: f64,
    pub trend_period: Period,
}

impl Default for DefaultContextProvider {
    fn default() -> Self {
        Self {
            volume_lookback: Period::new_const(3),
            volume_window: Period::new_const(20),
            confirm_factor: 1.3,
            trend_period: Period::new_const(50),
        }
    }
}

impl ContextProvider for DefaultContextProvider {
    fn compute<T: OHLCV>(&self, bars: &[T], market_score: u8) -> MarketContext {
        let Some(last) = bars.last() else {
            return MarketContext {
                market_score: market_score.min(100),
                ..MarketContext::default()
            };
        };

        let lookback = self.volume_lookback.get();
        let window = self.volume_window.get();
        let current_price = last.close();

        let above_trend = if bars.len() >= self.trend_period.get() {
            let closes: Vec<f64> = bars.iter().map(|b| b.close()).collect();
            detectors::sma(&closes, self.trend_period.get())
                .is_some_and(|ma| current_price > ma)
        } else {
            false
        };

        MarketContext {
            market_score: market_score.min(100),
            volume_ratio: detectors::volume_ratio(bars, lookback, window),
            volume_confirmed: detectors::volume_confirmed(
                bars,
                lookback,
                window,
                self.confirm_factor,
            ),
            above_trend,
            current_price,
            as_of: last.timestamp(),
        }
    }
}

impl DefaultContextProvider {
    fn validate(&self) -> Result<()> {
        if self.volume_lookback >= self.volume_window {
            return Err(PatternError::InvalidConfig(format!(
                "volume_lookback ({}) must be shorter than volume_window ({})",
                self.volume_lookback.get(),
                self.volume_window.get()
            )));
        }
        if !self.confirm_factor.is_finite() || self.confirm_factor <= 0.0 {
            return Err(PatternError::InvalidValue(
                "confirm_factor must be positive and finite",
            ));
        }
        Ok(())
    }
}

// ============================================================
// PATTERN DETECTOR TRAIT
// ============================================================

/// Geometric detector for one chart pattern.
///
/// Implementors only describe the geometry ([`PatternDetector::formations`]).
/// Windowing, the minimum-history gate, invalidation rejection and the
/// state/score attachment are shared by the provided methods.
pub trait PatternDetector: Send + Sync {
    fn pattern_type(&self) -> PatternType;

    /// Minimum history; shorter series never produce a match
    fn min_bars(&self) -> usize;

    /// Most recent bars the detector looks at
    fn lookback(&self) -> usize;

    /// Candidate formations in `window`, oldest first.
    /// `window` is already cut to [`PatternDetector::lookback`] bars.
    fn formations<T: OHLCV>(&self, window: &[T]) -> Vec<Formation>;

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }

    /// Detect with a precomputed context.
    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        symbol: &str,
        ctx: &MarketContext,
        thresholds: &StateThresholds,
    ) -> Vec<PatternObservation> {
        if bars.len() < self.min_bars() {
            return Vec::new();
        }
        let start = bars.len().saturating_sub(self.lookback());

        self.formations(&bars[start..])
            .into_iter()
            // an already-broken formation is never reported
            .filter(|f| ctx.current_price >= f.invalidation_point)
            .map(|f| PatternObservation::new(symbol, self.pattern_type(), f, ctx, thresholds))
            .collect()
    }

    /// Detect with the default context provider and state thresholds.
    ///
    /// The config is not validated here; a detector built by hand rather
    /// than through [`EngineBuilder`] should pass [`PatternDetector::validate_config`] first.
    fn scan<T: OHLCV>(&self, bars: &[T], symbol: &str, market_score: u8) -> Vec<PatternObservation> {
        let ctx = DefaultContextProvider::default().compute(bars, market_score);
        self.detect(bars, symbol, &ctx, &StateThresholds::default())
    }
}

// ============================================================
// BUILTIN DETECTORS - generated via macro
// ============================================================

use detectors::*;

/// Macro to generate BuiltinDetector enum without boilerplate
macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty)
        ),* $(,)?
    ) => {
        /// All builtin detectors - enum dispatch, no vtable
        #[derive(Debug, Clone)]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl BuiltinDetector {
            #[inline]
            pub fn detect<T: OHLCV>(
                &self,
                bars: &[T],
                symbol: &str,
                ctx: &MarketContext,
                thresholds: &StateThresholds,
            ) -> Vec<PatternObservation> {
                match self {
                    $(Self::$variant(d) => PatternDetector::detect(d, bars, symbol, ctx, thresholds)),*
                }
            }

            #[inline]
            pub fn pattern_type(&self) -> PatternType {
                match self {
                    $(Self::$variant(d) => PatternDetector::pattern_type(d)),*
                }
            }

            #[inline]
            pub fn min_bars(&self) -> usize {
                match self {
                    $(Self::$variant(d) => PatternDetector::min_bars(d)),*
                }
            }

            pub fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(d) => PatternDetector::validate_config(d)),*
                }
            }
        }
    };
}

define_builtin_detectors! {
    // Extrema-based reversals
    DoubleBottom(DoubleBottomDetector),
    InverseHeadShoulders(InverseHeadShouldersDetector),
    TripleBottom(TripleBottomDetector),

    // Trendline / range formations
    AscendingTriangle(AscendingTriangleDetector),
    RisingWedge(RisingWedgeDetector),
    SymmetricalTriangle(SymmetricalTriangleDetector),

    // Continuations
    BullFlag(BullFlagDetector),
    CupHandle(CupHandleDetector),
}

// ============================================================
// PATTERN ENGINE
// ============================================================

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub min_strength: Option<u8>,
    pub validate_data: bool,
    pub pattern_filter: Option<Vec<PatternType>>,
    pub thresholds: StateThresholds,
}

/// Runs the detectors and re-evaluates observations against fresh bars.
///
/// The engine is stateless; the per-symbol cache lives in
/// [`PatternTracker`].
pub struct PatternEngine<C: ContextProvider = DefaultContextProvider> {
    builtin: Vec<BuiltinDetector>,
    context_provider: C,
    config: EngineConfig,
}

impl<C: ContextProvider> PatternEngine<C> {
    pub fn new(context_provider: C) -> Self {
        Self {
            builtin: Vec::new(),
            context_provider,
            config: EngineConfig::default(),
        }
    }

    #[inline]
    pub fn compute_context<T: OHLCV>(&self, bars: &[T], market_score: u8) -> MarketContext {
        self.context_provider.compute(bars, market_score)
    }

    #[inline]
    pub fn thresholds(&self) -> &StateThresholds {
        &self.config.thresholds
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn context_provider(&self) -> &C {
        &self.context_provider
    }

    pub fn detectors(&self) -> &[BuiltinDetector] {
        &self.builtin
    }

    /// Run every configured detector on `bars` (tier 1 detection, no caching).
    pub fn detect_all<T: OHLCV>(
        &self,
        bars: &[T],
        symbol: &str,
        market_score: u8,
    ) -> Vec<PatternObservation> {
        if bars.is_empty() {
            return Vec::new();
        }
        let ctx = self.compute_context(bars, market_score);
        self.detect_with_context(bars, symbol, &ctx)
    }

    /// Run every configured detector with a precomputed context.
    pub fn detect_with_context<T: OHLCV>(
        &self,
        bars: &[T],
        symbol: &str,
        ctx: &MarketContext,
    ) -> Vec<PatternObservation> {
        let mut results = Vec::new();

        for detector in &self.builtin {
            if !self.wants(detector.pattern_type()) || bars.len() < detector.min_bars() {
                continue;
            }
            results.extend(
                detector
                    .detect(bars, symbol, ctx, &self.config.thresholds)
                    .into_iter()
                    .filter(|o| self.should_include(o)),
            );
        }

        results
    }

    /// Re-check a cached observation against a fresh context.
    pub fn reevaluate(&self, observation: &PatternObservation, ctx: &MarketContext) -> Reevaluation {
        state::reevaluate(observation, ctx, &self.config.thresholds)
    }

    pub fn validate_bars<T: OHLCV>(&self, bars: &[T]) -> Result<()> {
        for (i, bar) in bars.iter().enumerate() {
            bar.validate().map_err(|e| match e {
                PatternError::InvalidOHLCV { reason, .. } => {
                    PatternError::InvalidOHLCV { index: i, reason }
                }
                other => other,
            })?;
        }
        Ok(())
    }

    fn wants(&self, pattern_type: PatternType) -> bool {
        self.config
            .pattern_filter
            .as_ref()
            .map_or(true, |filter| filter.contains(&pattern_type))
    }

    fn should_include(&self, o: &PatternObservation) -> bool {
        match self.config.min_strength {
            Some(min) => o.strength_score >= min,
            None => true,
        }
    }

    fn validate(&self) -> Result<()> {
        for d in &self.builtin {
            d.validate_config()?;
        }
        self.config.thresholds.validate()
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating PatternEngine instances
pub struct EngineBuilder<C: ContextProvider = DefaultContextProvider> {
    context_provider: C,
    builtin: Vec<BuiltinDetector>,
    config: EngineConfig,
}

impl Default for EngineBuilder<DefaultContextProvider> {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder<DefaultContextProvider> {
    pub fn new() -> Self {
        Self {
            context_provider: DefaultContextProvider::default(),
            builtin: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    /// Replace the default provider's settings, validating them
    pub fn context_settings(mut self, provider: DefaultContextProvider) -> Result<Self> {
        provider.validate()?;
        self.context_provider = provider;
        Ok(self)
    }
}

/// Generate an array of `BuiltinDetector` variants using `Default::default()` for each inner type.
macro_rules! builtin_defaults {
  ($($variant:ident),* $(,)?) => {
    [$(BuiltinDetector::$variant(Default::default())),*]
  };
}

impl<C: ContextProvider> EngineBuilder<C> {
    /// Change context provider
    pub fn context_provider<C2: ContextProvider>(self, provider: C2) -> EngineBuilder<C2> {
        EngineBuilder {
            context_provider: provider,
            builtin: self.builtin,
            config: self.config,
        }
    }

    /// Add all eight detectors with default configurations, in reference order
    pub fn with_all_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![
            DoubleBottom,
            InverseHeadShoulders,
            AscendingTriangle,
            BullFlag,
            CupHandle,
            TripleBottom,
            RisingWedge,
            SymmetricalTriangle,
        ]);
        self
    }

    /// Add the extrema-based reversal detectors (3)
    pub fn with_reversal_defaults(mut self) -> Self {
        self.builtin
            .extend(builtin_defaults![DoubleBottom, InverseHeadShoulders, TripleBottom]);
        self
    }

    /// Add the trendline/range detectors (3)
    pub fn with_triangle_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![
            AscendingTriangle,
            RisingWedge,
            SymmetricalTriangle,
        ]);
        self
    }

    /// Add the continuation detectors (2)
    pub fn with_continuation_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![BullFlag, CupHandle]);
        self
    }

    /// Add a builtin detector
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, detector: BuiltinDetector) -> Self {
        self.builtin.push(detector);
        self
    }

    /// Add with config validation
    pub fn add_checked(mut self, detector: BuiltinDetector) -> Result<Self> {
        detector.validate_config()?;
        self.builtin.push(detector);
        Ok(self)
    }

    /// Set minimum strength filter for tier-1 detections
    pub fn min_strength(mut self, strength: u8) -> Self {
        self.config.min_strength = Some(strength);
        self
    }

    /// Enable/disable data validation in scan passes
    pub fn validate_data(mut self, enable: bool) -> Self {
        self.config.validate_data = enable;
        self
    }

    /// Filter to specific patterns only
    pub fn only_patterns(mut self, types: impl IntoIterator<Item = PatternType>) -> Self {
        self.config.pattern_filter = Some(types.into_iter().collect());
        self
    }

    /// Override the state machine cut-offs
    pub fn state_thresholds(mut self, thresholds: StateThresholds) -> Self {
        self.config.thresholds = thresholds;
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<PatternEngine<C>> {
        let engine = PatternEngine {
            builtin: self.builtin,
            context_provider: self.context_provider,
            config: self.config,
        };
        engine.validate()?;
        Ok(engine)
    }
}

// ============================================================
// TYPE ALIASES
// ============================================================

/// Default engine with DefaultContextProvider
pub type DefaultEngine = PatternEngine<DefaultContextProvider>;

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Test OHLCV bar
    #[derive(Debug, Clone)]
    struct Bar {
        h: f64,
        l: f64,
        c: f64,
        v: f64,
    }

    impl Bar {
        fn new(h: f64, l: f64, c: f64, v: f64) -> Self {
            Self { h, l, c, v }
        }
    }

    impl OHLCV for Bar {
        fn open(&self) -> f64 {
            self.c
        }

        fn high(&self) -> f64 {
            self.h
        }

        fn low(&self) -> f64 {
            self.l
        }

        fn close(&self) -> f64 {
            self.c
        }

        fn volume(&self) -> f64 {
            self.v
        }
    }

    fn make_uptrend_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64;
                Bar::new(base + 1.0, base - 1.0, base, 1000.0)
            })
            .collect()
    }

    #[test]
    fn test_ratio_validation() {
        assert!(Ratio::new(0.0).is_ok());
        assert!(Ratio::new(1.0).is_ok());
        assert!(Ratio::new(0.5).is_ok());
        assert!(Ratio::new(-0.1).is_err());
        assert!(Ratio::new(1.1).is_err());
        assert!(Ratio::new(f64::NAN).is_err());
        assert!(Ratio::new(f64::INFINITY).is_err());
        assert!((Ratio::new_const(0.03).pct() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_period_validation() {
        assert!(Period::new(1).is_ok());
        assert!(Period::new(100).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_close_location() {
        let bar = Bar::new(110.0, 90.0, 105.0, 1.0);
        assert!((bar.close_location().unwrap() - 0.75).abs() < 1e-12);
        assert!(Bar::new(100.0, 100.0, 100.0, 1.0).close_location().is_none());
    }

    #[test]
    fn test_validate_rejects_inverted_bar() {
        let engine = EngineBuilder::new().build().unwrap();
        let bars = vec![
            Bar::new(101.0, 99.0, 100.0, 1.0),
            Bar::new(99.0, 101.0, 100.0, 1.0),
        ];
        match engine.validate_bars(&bars) {
            Err(PatternError::InvalidOHLCV { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_pattern_type_ids() {
        for t in PatternType::ALL {
            assert_eq!(PatternType::from_id(t.as_str()), Some(t));
        }
        assert_eq!(PatternType::CupHandle.to_string(), "CUP_HANDLE");
        assert_eq!(PatternType::from_id("HEAD_SHOULDERS"), None);
    }

    #[test]
    fn test_price_bar_timestamp() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let bar = PriceBar::new(date, 1.0, 2.0, 0.5, 1.5, 10.0);
        assert_eq!(bar.timestamp(), Some(1_704_153_600));
    }

    #[test]
    fn test_engine_builder() {
        let engine = EngineBuilder::new().with_all_defaults().build();
        assert!(engine.is_ok());
        assert_eq!(engine.unwrap().detectors().len(), 8);
    }

    #[test]
    fn test_group_defaults_cover_all() {
        let engine = EngineBuilder::new()
            .with_reversal_defaults()
            .with_triangle_defaults()
            .with_continuation_defaults()
            .build()
            .unwrap();
        let mut types: Vec<_> = engine.detectors().iter().map(|d| d.pattern_type()).collect();
        types.sort();
        let mut all = PatternType::ALL.to_vec();
        all.sort();
        assert_eq!(types, all);
    }

    #[test]
    fn test_context_settings_rejects_inverted_window() {
        let provider = DefaultContextProvider {
            volume_lookback: Period::new_const(20),
            volume_window: Period::new_const(20),
            ..DefaultContextProvider::default()
        };
        assert!(EngineBuilder::new().context_settings(provider).is_err());
    }

    #[test]
    fn test_empty_scan() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        let bars: Vec<Bar> = vec![];
        assert!(engine.detect_all(&bars, "EMPTY", 50).is_empty());
    }

    #[test]
    fn test_short_history_scan() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        let bars = make_uptrend_bars(25);
        assert!(engine.detect_all(&bars, "SHORT", 50).is_empty());
    }

    #[test]
    fn test_context_volume_and_trend() {
        let mut bars = make_uptrend_bars(60);
        for bar in bars.iter_mut().skip(57) {
            bar.v = 2000.0;
        }
        let ctx = DefaultContextProvider::default().compute(&bars, 120);
        assert_eq!(ctx.market_score, 100);
        assert!((ctx.volume_ratio - 2.0).abs() < 1e-12);
        assert!(ctx.volume_confirmed);
        assert!(ctx.above_trend);
        assert_eq!(ctx.current_price, 159.0);
    }

    #[test]
    fn test_context_short_series_is_neutral() {
        let bars = make_uptrend_bars(10);
        let ctx = DefaultContextProvider::default().compute(&bars, 40);
        assert_eq!(ctx.volume_ratio, 1.0);
        assert!(!ctx.volume_confirmed);
        assert!(!ctx.above_trend);
    }

    #[test]
    fn test_pattern_filter() {
        let engine = EngineBuilder::new()
            .with_all_defaults()
            .only_patterns([PatternType::CupHandle])
            .build()
            .unwrap();
        let bars = make_uptrend_bars(120);
        let found = engine.detect_all(&bars, "UP", 50);
        assert!(found.iter().all(|o| o.pattern_type == PatternType::CupHandle));
    }

    #[test]
    fn test_min_strength_filter() {
        let engine = EngineBuilder::new()
            .with_all_defaults()
            .min_strength(101)
            .build()
            .unwrap();
        let bars = make_uptrend_bars(120);
        assert!(engine.detect_all(&bars, "UP", 100).is_empty());
    }

    #[test]
    fn test_targets_hit() {
        let formation = Formation::new(
            100.0,
            90.0,
            90.0,
            [103.0, 105.0, 108.0],
            ScoreBasis::Generic {
                quality: 50.0,
                depth_pct: 5.0,
            },
        );
        let ctx = MarketContext {
            current_price: 95.0,
            ..MarketContext::default()
        };
        let obs = PatternObservation::new(
            "X",
            PatternType::BullFlag,
            formation,
            &ctx,
            &StateThresholds::default(),
        );
        assert_eq!(obs.targets_hit(99.0), 0);
        assert_eq!(obs.targets_hit(105.0), 2);
        assert_eq!(obs.targets_hit(200.0), 3);
        assert!(obs.is_invalidated_by(89.9));
        assert!(!obs.is_invalidated_by(90.0));
    }
}
