//! Feature extractors shared across all detector modules
//!
//! Stateless numeric routines over price/volume series. All of them are
//! total: short or degenerate input yields an empty result or a neutral
//! value instead of an error.

use crate::OHLCV;

// ============================================================
// LOCAL EXTREMA
// ============================================================

/// Indices strictly lower than `order` neighbours on each side.
///
/// Sliding comparison, not a global sort. Fewer than `2 * order + 1`
/// points gives an empty result.
pub fn local_minima(values: &[f64], order: usize) -> Vec<usize> {
    local_extrema(values, order, |center, neighbour| center < neighbour)
}

/// Indices strictly higher than `order` neighbours on each side.
pub fn local_maxima(values: &[f64], order: usize) -> Vec<usize> {
    local_extrema(values, order, |center, neighbour| center > neighbour)
}

fn local_extrema(values: &[f64], order: usize, beats: impl Fn(f64, f64) -> bool) -> Vec<usize> {
    let n = values.len();
    if order == 0 || n < 2 * order + 1 {
        return Vec::new();
    }

    (order..n - order)
        .filter(|&i| {
            let center = values[i];
            (1..=order).all(|k| beats(center, values[i - k]) && beats(center, values[i + k]))
        })
        .collect()
}

// ============================================================
// TRENDLINES
// ============================================================

/// Ordinary least-squares slope of `values` against their position index.
/// Fewer than 2 points gives 0.0.
pub fn trendline_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });

    if den <= f64::EPSILON || !num.is_finite() {
        return 0.0;
    }
    num / den
}

/// True when the fitted trendline slopes upward. Needs at least 5 points.
#[inline]
pub fn is_rising(values: &[f64]) -> bool {
    values.len() >= 5 && trendline_slope(values) > 0.0
}

// ============================================================
// VOLUME
// ============================================================

/// Mean volume of the last `lookback` bars over the mean of the preceding
/// `window - lookback` bars.
///
/// Returns 1.0 (neutral) with fewer than `window` bars, an empty baseline,
/// or a zero baseline.
pub fn volume_ratio<T: OHLCV>(bars: &[T], lookback: usize, window: usize) -> f64 {
    volume_means(bars, lookback, window)
        .filter(|(_, base)| *base > f64::EPSILON)
        .map_or(1.0, |(recent, base)| recent / base)
}

/// Recent volume above `factor` times the baseline. False on short history.
pub fn volume_confirmed<T: OHLCV>(bars: &[T], lookback: usize, window: usize, factor: f64) -> bool {
    volume_means(bars, lookback, window).is_some_and(|(recent, base)| recent > base * factor)
}

fn volume_means<T: OHLCV>(bars: &[T], lookback: usize, window: usize) -> Option<(f64, f64)> {
    let n = bars.len();
    if lookback == 0 || lookback >= window || n < window {
        return None;
    }

    let volumes: Vec<f64> = bars[n - window..].iter().map(|b| b.volume()).collect();
    let split = window - lookback;
    Some((mean(&volumes[split..]), mean(&volumes[..split])))
}

// ============================================================
// STATISTICS
// ============================================================

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator); 0.0 under two points
pub fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

/// Percentile with linear interpolation between closest ranks (`pct` in 0..=100)
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() || !pct.is_finite() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = pct.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Simple moving average of the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    Some(mean(&values[values.len() - period..]))
}

// ============================================================
// TARGETS
// ============================================================

/// `base + height * m` for each multiple (measured-move targets)
#[inline]
pub fn project_targets(base: f64, height: f64, multiples: [f64; 3]) -> [f64; 3] {
    multiples.map(|m| base + height * m)
}

/// `base * f` for each factor (fixed-percentage targets)
#[inline]
pub fn scale_targets(base: f64, factors: [f64; 3]) -> [f64; 3] {
    factors.map(|f| base * f)
}

// ============================================================
// BAR SLICES
// ============================================================

#[inline]
pub fn lows<T: OHLCV>(bars: &[T]) -> Vec<f64> {
    bars.iter().map(|b| b.low()).collect()
}

#[inline]
pub fn highs<T: OHLCV>(bars: &[T]) -> Vec<f64> {
    bars.iter().map(|b| b.high()).collect()
}

#[inline]
pub fn closes<T: OHLCV>(bars: &[T]) -> Vec<f64> {
    bars.iter().map(|b| b.close()).collect()
}

/// Highest high in `bars`; None when empty
pub fn highest_high<T: OHLCV>(bars: &[T]) -> Option<f64> {
    bars.iter().map(|b| b.high()).reduce(f64::max)
}

/// Lowest low in `bars`; None when empty
pub fn lowest_low<T: OHLCV>(bars: &[T]) -> Option<f64> {
    bars.iter().map(|b| b.low()).reduce(f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct V(f64);

    impl OHLCV for V {
        fn open(&self) -> f64 {
            1.0
        }
        fn high(&self) -> f64 {
            1.0
        }
        fn low(&self) -> f64 {
            1.0
        }
        fn close(&self) -> f64 {
            1.0
        }
        fn volume(&self) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_local_minima_window() {
        let values = [5.0, 4.0, 3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(local_minima(&values, 2), vec![4]);
        assert_eq!(local_minima(&values, 4), vec![4]);
        assert!(local_minima(&values, 5).is_empty());
    }

    #[test]
    fn test_local_minima_plateau_is_not_extremum() {
        let values = [3.0, 2.0, 1.0, 1.0, 2.0, 3.0];
        assert!(local_minima(&values, 1).is_empty());
    }

    #[test]
    fn test_local_maxima() {
        let values = [1.0, 3.0, 1.0, 0.0, 1.0, 4.0, 1.0];
        assert_eq!(local_maxima(&values, 1), vec![1, 5]);
    }

    #[test]
    fn test_extrema_short_input() {
        assert!(local_minima(&[1.0, 0.0], 1).is_empty());
        assert!(local_maxima(&[], 3).is_empty());
        assert!(local_minima(&[2.0, 1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn test_trendline_slope() {
        assert!((trendline_slope(&[1.0, 3.0, 5.0, 7.0]) - 2.0).abs() < 1e-12);
        assert!((trendline_slope(&[4.0, 3.0, 2.0]) + 1.0).abs() < 1e-12);
        assert_eq!(trendline_slope(&[4.0]), 0.0);
        assert_eq!(trendline_slope(&[]), 0.0);
        assert_eq!(trendline_slope(&[2.0, 2.0, 2.0]), 0.0);
    }

    #[test]
    fn test_is_rising_needs_five_points() {
        assert!(!is_rising(&[1.0, 2.0, 3.0, 4.0]));
        assert!(is_rising(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        assert!(!is_rising(&[5.0, 4.0, 3.0, 2.0, 1.0]));
    }

    #[test]
    fn test_volume_ratio() {
        let mut bars: Vec<V> = (0..20).map(|_| V(1000.0)).collect();
        assert_eq!(volume_ratio(&bars, 3, 20), 1.0);
        for b in bars.iter_mut().skip(17) {
            b.0 = 1500.0;
        }
        assert!((volume_ratio(&bars, 3, 20) - 1.5).abs() < 1e-12);
        assert!(volume_confirmed(&bars, 3, 20, 1.3));
        assert!(!volume_confirmed(&bars, 3, 20, 1.6));
    }

    #[test]
    fn test_volume_ratio_neutral_cases() {
        let short: Vec<V> = (0..19).map(|_| V(1000.0)).collect();
        assert_eq!(volume_ratio(&short, 3, 20), 1.0);
        assert!(!volume_confirmed(&short, 3, 20, 1.3));

        let silent: Vec<V> = (0..20).map(|i| V(if i >= 17 { 10.0 } else { 0.0 })).collect();
        assert_eq!(volume_ratio(&silent, 3, 20), 1.0);
    }

    #[test]
    fn test_statistics() {
        assert_eq!(mean(&[]), 0.0);
        assert!((sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.138_089_935).abs() < 1e-6);
        assert_eq!(sample_std(&[3.0]), 0.0);
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 2), Some(3.5));
        assert_eq!(sma(&[1.0], 2), None);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values: Vec<f64> = (1..=5).map(f64::from).collect();
        assert_eq!(percentile(&values, 50.0), Some(3.0));
        assert_eq!(percentile(&values, 95.0), Some(4.8));
        assert_eq!(percentile(&values, 100.0), Some(5.0));
        assert_eq!(percentile(&[], 50.0), None);
    }
}
