//! Averaged beam-width readings at a fixed stage position.

use tracing::debug;

use crate::domain::{Axis, AxisPair, AxisSelection, OutlierMode, WidthStat};
use crate::error::{AppError, AppResult};
use crate::hardware::BeamProfiler;
use crate::math::{mean, population_std};
use crate::sampling::outliers;

/// Leading readings discarded by default; the profiler keeps delivering frames
/// from before the last move for roughly this many revolutions.
pub const DEFAULT_WARM_UP: usize = 10;

/// Result of one averaging call.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    /// Mean and population standard deviation for each requested axis.
    pub widths: AxisPair<Option<WidthStat>>,
    /// Every reading kept after the warm-up discard, before outlier rejection.
    pub raw: Vec<AxisPair<f64>>,
}

impl SampleOutcome {
    pub fn width(&self, axis: Axis) -> AppResult<WidthStat> {
        self.widths
            .get(axis)
            .ok_or_else(|| AppError::InvalidInput(format!("{} axis was not sampled", axis.label())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AveragingSampler {
    pub warm_up: usize,
    pub outliers: OutlierMode,
}

impl Default for AveragingSampler {
    fn default() -> Self {
        Self {
            warm_up: DEFAULT_WARM_UP,
            outliers: OutlierMode::None,
        }
    }
}

impl AveragingSampler {
    pub fn new(warm_up: usize, outliers: OutlierMode) -> Self {
        Self { warm_up, outliers }
    }

    /// Take `samples + warm_up` readings, drop the warm-up, filter each axis,
    /// and average.
    pub fn sample<P: BeamProfiler + ?Sized>(
        &self,
        profiler: &mut P,
        axes: AxisSelection,
        samples: usize,
    ) -> AppResult<SampleOutcome> {
        if samples == 0 {
            return Err(AppError::InvalidInput("sample count must be > 0".to_string()));
        }

        profiler.wait_stable()?;

        let mut raw = Vec::with_capacity(samples);
        for i in 0..samples + self.warm_up {
            let reading = profiler.read_single()?;
            if i >= self.warm_up {
                raw.push(reading);
            }
        }

        let mut widths = AxisPair::splat(None);
        for &axis in axes.axes() {
            let values: Vec<f64> = raw.iter().map(|r| *r.get(axis)).collect();
            let kept = outliers::apply(self.outliers, &values);
            if kept.is_empty() {
                return Err(AppError::Sensor(format!(
                    "all {} readings on {} axis were rejected",
                    values.len(),
                    axis.label()
                )));
            }
            let stat = WidthStat {
                mean: mean(&kept),
                std_dev: population_std(&kept),
            };
            debug!(
                axis = axis.label(),
                kept = kept.len(),
                mean = stat.mean,
                std = stat.std_dev,
                "averaged readings"
            );
            *widths.get_mut(axis) = Some(stat);
        }

        Ok(SampleOutcome { widths, raw })
    }
}
