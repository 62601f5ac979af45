//! Strength scoring
//!
//! Two weighted rubrics, both clamped to 0..=100:
//!
//! | Factor        | Reversal (double bottom) | Generic (other seven) |
//! |---------------|--------------------------|-----------------------|
//! | quality       | 30 (symmetry tiers)      | 35 (linear)           |
//! | depth/height  | 20 (tiers)               | 20 (linear)           |
//! | volume        | 25                       | 25                    |
//! | market        | 15                       | 15                    |
//! | time / trend  | 10 (bar spacing)         | 5 (above trend MA)    |
//!
//! The geometric inputs are kept on the observation as a [`ScoreBasis`], so
//! re-evaluation can recompute the volume, market and trend parts from fresh
//! data without re-running detection.

use serde::{Deserialize, Serialize};

use crate::MarketContext;

pub const MARKET_WEIGHT: f64 = 15.0;
pub const MAX_SCORE: u32 = 100;

/// Geometric inputs to the scorer, fixed at detection time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rubric", rename_all = "snake_case")]
pub enum ScoreBasis {
    /// Tiered rubric used for double bottoms
    Reversal {
        symmetry_diff_pct: f64,
        peak_height_pct: f64,
        days_between: usize,
    },
    /// Linear rubric used by the remaining detectors
    Generic { quality: f64, depth_pct: f64 },
}

pub fn strength_score(basis: &ScoreBasis, ctx: &MarketContext) -> u8 {
    match *basis {
        ScoreBasis::Reversal {
            symmetry_diff_pct,
            peak_height_pct,
            days_between,
        } => reversal_strength(symmetry_diff_pct, peak_height_pct, days_between, ctx),
        ScoreBasis::Generic { quality, depth_pct } => generic_strength(quality, depth_pct, ctx),
    }
}

/// Double-bottom rubric: symmetry 30, peak height 20, volume 25, market 15, spacing 10.
pub fn reversal_strength(
    symmetry_diff_pct: f64,
    peak_height_pct: f64,
    days_between: usize,
    ctx: &MarketContext,
) -> u8 {
    let symmetry = match symmetry_diff_pct {
        d if d <= 0.5 => 30,
        d if d <= 1.0 => 25,
        d if d <= 2.0 => 20,
        d if d <= 3.0 => 15,
        _ => 0,
    };

    let height = match peak_height_pct {
        h if h >= 10.0 => 20,
        h if h >= 7.0 => 15,
        h if h >= 5.0 => 10,
        h if h >= 3.0 => 5,
        _ => 0,
    };

    let volume = match ctx.volume_ratio {
        r if r >= 1.5 => 25,
        r if r >= 1.3 => 20,
        r if r >= 1.1 => 15,
        r if r >= 1.0 => 10,
        _ => 0,
    };

    let spacing = match days_between {
        20..=40 => 10,
        15..=50 => 7,
        10..=60 => 5,
        _ => 0,
    };

    clamp(symmetry + height + volume + market_points(ctx.market_score) + spacing)
}

/// Generic rubric: quality 35, depth 20, volume 25, market 15, trend alignment 5.
pub fn generic_strength(quality: f64, depth_pct: f64, ctx: &MarketContext) -> u8 {
    let quality_points = linear_points(quality * 0.35, 35);
    let depth_points = linear_points(depth_pct * 2.0, 20);

    // no points below 1.1 here, unlike the reversal rubric
    let volume = match ctx.volume_ratio {
        r if r >= 1.5 => 25,
        r if r >= 1.3 => 20,
        r if r >= 1.1 => 15,
        _ => 0,
    };

    let trend = if ctx.above_trend { 5 } else { 0 };

    clamp(quality_points + depth_points + volume + market_points(ctx.market_score) + trend)
}

/// Linear pass-through of the external market score: round(score / 100 * 15)
pub fn market_points(market_score: u8) -> u32 {
    (f64::from(market_score.min(100)) / 100.0 * MARKET_WEIGHT).round() as u32
}

/// Truncate `raw` to whole points within 0..=cap
fn linear_points(raw: f64, cap: u32) -> u32 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0;
    }
    (raw.trunc() as u32).min(cap)
}

fn clamp(total: u32) -> u8 {
    total.min(MAX_SCORE) as u8
}
