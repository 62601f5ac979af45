//! Chart-pattern detectors
//!
//! Each detector describes the geometry of one bullish formation over a
//! bounded window of recent bars. Windowing, the minimum-history gate and
//! invalidation rejection are shared through [`crate::PatternDetector`].
//!
//! # Pattern Categories
//!
//! - **Bottoms (3)**: Double Bottom, Inverse Head & Shoulders, Triple Bottom
//! - **Triangles (3)**: Ascending Triangle, Rising Wedge, Symmetrical Triangle
//! - **Continuations (2)**: Bull Flag, Cup & Handle

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod bottoms;
pub mod continuation;
pub mod triangles;

// Re-export all detectors for convenience
pub use bottoms::*;
pub use continuation::*;
pub use helpers::*;
pub use triangles::*;

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::OHLCV;

    #[derive(Debug, Clone)]
    pub struct Bar {
        pub h: f64,
        pub l: f64,
        pub c: f64,
        pub v: f64,
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

    /// Piecewise-linear series through `(index, value)` knots, inclusive of the last knot.
    pub fn path(knots: &[(usize, f64)]) -> Vec<f64> {
        let mut out = vec![knots[0].1];
        for pair in knots.windows(2) {
            let ((i0, v0), (i1, v1)) = (pair[0], pair[1]);
            let step = (v1 - v0) / (i1 - i0) as f64;
            out.extend((1..=i1 - i0).map(|k| v0 + step * k as f64));
        }
        out
    }

    /// Bars whose low follows `lows`, with high = low + 2 and close = low + 1.
    pub fn from_lows(lows: &[f64]) -> Vec<Bar> {
        lows.iter()
            .map(|&l| Bar {
                h: l + 2.0,
                l,
                c: l + 1.0,
                v: 1000.0,
            })
            .collect()
    }
}
