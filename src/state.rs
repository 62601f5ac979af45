//! Breakout-proximity state machine
//!
//! Every re-check assigns one of four lifecycle states from the current
//! price, the fixed breakout level and the volume ratio. The machine is not
//! monotonic: a confirmed breakout whose volume support fades drops back to
//! [`PatternState::NearBreakout`]. The only terminal exit is invalidation,
//! which removes the observation instead of storing a fifth state.

use serde::{Deserialize, Serialize};

use crate::{score, MarketContext, PatternError, PatternObservation, Result};

/// Lifecycle state of an active observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternState {
    Forming,
    NearBreakout,
    BreakoutImminent,
    BreakoutConfirmed,
}

impl PatternState {
    pub const ALL: [PatternState; 4] = [
        PatternState::Forming,
        PatternState::NearBreakout,
        PatternState::BreakoutImminent,
        PatternState::BreakoutConfirmed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PatternState::Forming => "FORMING",
            PatternState::NearBreakout => "NEAR_BREAKOUT",
            PatternState::BreakoutImminent => "BREAKOUT_IMMINENT",
            PatternState::BreakoutConfirmed => "BREAKOUT_CONFIRMED",
        }
    }
}

impl std::fmt::Display for PatternState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cut-offs for the state transition function
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateThresholds {
    /// Volume ratio needed for a close above breakout to count as confirmed
    pub confirm_volume: f64,
    /// Distance (percent) at or under which a breakout may be imminent
    pub imminent_distance_pct: f64,
    /// Volume ratio needed for the imminent state
    pub imminent_volume: f64,
    /// Distance (percent) at or under which the pattern is near breakout
    pub near_distance_pct: f64,
}

impl Default for StateThresholds {
    fn default() -> Self {
        Self {
            confirm_volume: 1.3,
            imminent_distance_pct: 0.5,
            imminent_volume: 1.5,
            near_distance_pct: 2.0,
        }
    }
}

impl StateThresholds {
    pub fn validate(&self) -> Result<()> {
        let all = [
            self.confirm_volume,
            self.imminent_distance_pct,
            self.imminent_volume,
            self.near_distance_pct,
        ];
        if all.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(PatternError::InvalidValue(
                "state thresholds must be finite and non-negative",
            ));
        }
        if self.imminent_distance_pct > self.near_distance_pct {
            return Err(PatternError::InvalidConfig(format!(
                "imminent distance {}% exceeds near distance {}%",
                self.imminent_distance_pct, self.near_distance_pct
            )));
        }
        Ok(())
    }
}

/// Signed distance from the current price up to the breakout level, in percent.
/// Negative once price has cleared the breakout.
#[inline]
pub fn distance_pct(breakout_point: f64, current_price: f64) -> f64 {
    if current_price.abs() <= f64::EPSILON {
        return 0.0;
    }
    (breakout_point - current_price) / current_price * 100.0
}

/// The transition function. Pure: same inputs, same state.
pub fn determine_state(
    current_price: f64,
    breakout_point: f64,
    distance_pct: f64,
    volume_ratio: f64,
    thresholds: &StateThresholds,
) -> PatternState {
    if current_price > breakout_point {
        // weak-volume breakouts are demoted, not confirmed
        return if volume_ratio >= thresholds.confirm_volume {
            PatternState::BreakoutConfirmed
        } else {
            PatternState::NearBreakout
        };
    }

    if distance_pct <= thresholds.imminent_distance_pct {
        if volume_ratio >= thresholds.imminent_volume {
            PatternState::BreakoutImminent
        } else {
            PatternState::NearBreakout
        }
    } else if distance_pct <= thresholds.near_distance_pct {
        PatternState::NearBreakout
    } else {
        PatternState::Forming
    }
}

/// Result of re-checking a cached observation
#[derive(Debug, Clone, PartialEq)]
pub enum Reevaluation {
    /// Price fell through the invalidation level; drop the observation
    Invalidated,
    Updated {
        observation: PatternObservation,
        changed: bool,
    },
}

/// Re-check `observation` against a fresh context.
///
/// Geometry is kept as is. State, price, distance, volume flag, score and
/// `as_of` are refreshed.
pub fn reevaluate(
    observation: &PatternObservation,
    ctx: &MarketContext,
    thresholds: &StateThresholds,
) -> Reevaluation {
    if observation.is_invalidated_by(ctx.current_price) {
        return Reevaluation::Invalidated;
    }

    let distance = distance_pct(observation.breakout_point, ctx.current_price);
    let state = determine_state(
        ctx.current_price,
        observation.breakout_point,
        distance,
        ctx.volume_ratio,
        thresholds,
    );

    let mut updated = observation.clone();
    updated.state = state;
    updated.current_price = ctx.current_price;
    updated.distance_pct = distance;
    updated.volume_confirmed = ctx.volume_confirmed;
    updated.strength_score = score::strength_score(&updated.score_basis, ctx);
    updated.as_of = ctx.as_of;

    Reevaluation::Updated {
        changed: state != observation.state,
        observation: updated,
    }
}
