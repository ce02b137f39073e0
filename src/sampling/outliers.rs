//! Outlier rejection for repeated single readings.
//!
//! Profiler readings taken at a fixed position are noisy and, more importantly,
//! occasionally spike upward (a missed revolution or a stale frame inflates the
//! D4σ width). Two filters are provided:
//!
//! - `trim_top_fraction`: sort and drop the largest fraction of readings
//! - `remove_spikes`: drop prominent local maxima until none remain, then check
//!   the two end points (which can never be local maxima) against their neighbour
//!
//! Both filters return a subset of their input values and never grow the input.

use tracing::warn;

use crate::domain::OutlierMode;

/// Threshold used when a spike threshold is not a positive finite number.
pub const DEFAULT_SPIKE_THRESHOLD: f64 = 0.2;

/// Sort ascending and drop the top `round(fraction·N)` values.
///
/// Fractions are clamped into `[0, 1]`; a fraction of 1 drops everything and the
/// caller decides what an empty result means.
pub fn trim_top_fraction(samples: &[f64], fraction: f64) -> Vec<f64> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    if n == 0 {
        return sorted;
    }
    let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
    let drop = ((fraction * n as f64).round() as usize).min(n);
    sorted.truncate(n - drop);
    sorted
}

/// Remove upward spikes whose prominence reaches `threshold`.
///
/// `threshold` is absolute here; use [`spike_threshold`] to resolve a relative one.
pub fn remove_spikes(samples: &[f64], threshold: f64) -> Vec<f64> {
    let mut values = samples.to_vec();

    loop {
        let peaks: Vec<usize> = local_maxima(&values)
            .into_iter()
            .filter(|&p| prominence(&values, p) >= threshold)
            .collect();
        if peaks.is_empty() {
            break;
        }
        // Peaks come out in ascending order; remove back to front.
        for &p in peaks.iter().rev() {
            values.remove(p);
        }
    }

    // The ends cannot be local maxima, so compare them to their only neighbour.
    // Both checks look at the same array before anything is removed.
    let n = values.len();
    if n >= 3 {
        let drop_last = (values[n - 1] - values[n - 2]).abs() > threshold;
        let drop_first = (values[0] - values[1]).abs() > threshold;
        if drop_last {
            values.pop();
        }
        if drop_first {
            values.remove(0);
        }
    }

    values
}

/// Resolve a spike threshold against the readings it will be applied to.
///
/// Values `≤ 1` are a fraction of the mean; larger values are absolute. A
/// threshold that is not a positive finite number falls back to
/// [`DEFAULT_SPIKE_THRESHOLD`] with a warning.
pub fn spike_threshold(samples: &[f64], threshold: f64) -> f64 {
    let threshold = if threshold.is_finite() && threshold > 0.0 {
        threshold
    } else {
        warn!(threshold, "invalid spike threshold, using {DEFAULT_SPIKE_THRESHOLD}");
        DEFAULT_SPIKE_THRESHOLD
    };

    if threshold <= 1.0 {
        threshold * crate::math::mean(samples)
    } else {
        threshold
    }
}

/// Apply the configured outlier filter to one axis worth of readings.
pub fn apply(mode: OutlierMode, samples: &[f64]) -> Vec<f64> {
    match mode {
        OutlierMode::None => samples.to_vec(),
        OutlierMode::TrimTop { fraction } => trim_top_fraction(samples, fraction),
        OutlierMode::Spikes { threshold } => remove_spikes(samples, spike_threshold(samples, threshold)),
    }
}

/// Indices of strict local maxima. A flat-topped peak reports its middle index
/// (rounded down); the first and last samples are never maxima.
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }

    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

/// Height of a peak above the higher of the two minima separating it from
/// taller samples (or the array ends) on either side.
fn prominence(x: &[f64], peak: usize) -> f64 {
    let height = x[peak];

    let mut left_min = height;
    for &v in x[..peak].iter().rev() {
        if v > height {
            break;
        }
        left_min = left_min.min(v);
    }

    let mut right_min = height;
    for &v in &x[peak + 1..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }

    height - left_min.max(right_min)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_subset(out: &[f64], input: &[f64]) -> bool {
        let mut pool = input.to_vec();
        out.iter().all(|v| match pool.iter().position(|p| p == v) {
            Some(i) => {
                pool.swap_remove(i);
                true
            }
            None => false,
        })
    }

    #[test]
    fn trim_drops_the_largest_values() {
        let input: Vec<f64> = (0..20).map(|i| ((i * 7) % 20) as f64).collect();
        let out = trim_top_fraction(&input, 0.1);

        assert_eq!(out.len(), 20 - 2);
        assert!(is_subset(&out, &input));
        assert!(out.iter().all(|&v| v < 18.0));
    }

    #[test]
    fn trim_with_zero_fraction_keeps_everything() {
        let input = [3.0, 1.0, 2.0];
        assert_eq!(trim_top_fraction(&input, 0.0), vec![1.0, 2.0, 3.0]);
        assert_eq!(trim_top_fraction(&input, 0.1), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn trim_of_everything_leaves_nothing() {
        assert!(trim_top_fraction(&[5.0, 4.0], 1.0).is_empty());
        assert!(trim_top_fraction(&[5.0, 4.0], 3.0).is_empty());
        assert_eq!(trim_top_fraction(&[5.0, 4.0], 0.4), vec![4.0]);
    }

    #[test]
    fn local_maxima_reports_plateau_middle() {
        let x = [0.0, 1.0, 3.0, 3.0, 3.0, 1.0, 0.0];
        assert_eq!(local_maxima(&x), vec![3]);
        // A plateau running into the end is not a peak.
        assert!(local_maxima(&[0.0, 2.0, 2.0]).is_empty());
    }

    #[test]
    fn prominence_uses_higher_of_the_side_minima() {
        let x = [0.0, 5.0, 2.0, 4.0, 1.0];
        assert_eq!(prominence(&x, 3), 2.0);
        assert_eq!(prominence(&x, 1), 5.0 - 1.0);
    }

    #[test]
    fn spikes_are_removed_until_none_remain() {
        let input = [100.0, 101.0, 150.0, 100.0, 99.0, 160.0, 170.0, 100.0, 101.0, 100.0];
        let out = remove_spikes(&input, 20.0);

        assert!(is_subset(&out, &input));
        assert!(out.iter().all(|&v| v < 150.0), "{out:?}");
        assert_eq!(out.len(), 7);
    }

    #[test]
    fn spike_removal_drops_jumping_end_points() {
        let input = [160.0, 100.0, 101.0, 100.0, 99.0, 100.0, 40.0];
        let out = remove_spikes(&input, 20.0);
        assert_eq!(out, vec![100.0, 101.0, 100.0, 99.0, 100.0]);
    }

    #[test]
    fn spike_removal_leaves_short_inputs_alone() {
        assert_eq!(remove_spikes(&[1.0, 100.0], 5.0), vec![1.0, 100.0]);
    }

    #[test]
    fn relative_threshold_scales_with_mean() {
        let samples = [100.0, 100.0];
        assert!((spike_threshold(&samples, 0.2) - 20.0).abs() < 1e-12);
        assert_eq!(spike_threshold(&samples, 15.0), 15.0);
        assert!((spike_threshold(&samples, -3.0) - 20.0).abs() < 1e-12);
    }
}
