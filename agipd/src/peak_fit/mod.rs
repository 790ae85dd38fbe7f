//! Photon-peak fitting on ADU histograms.
//!
//! `hg_calibrate` locates the zero- and one-photon peaks of high-gain
//! readings; `mg_calibrate` estimates the high/medium relative gain from
//! per-pixel mean ratios.


use ndarray::{Array2, Array3, ArrayView1, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::dark_calibration::DarkCalibration;
use crate::error::{Error, Peak, Result};
use crate::fitting::{self, FitBounds, GaussianFit, LMConfig};
use crate::gain_levels::{GainLevelTable, GainMode};
use crate::histogram::{Histogram, argmax};
use crate::roi::Roi;

// ============================================================================
// Configuration
// ============================================================================

/// Tuning of the peak search and fits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakFitConfig {
    /// Fit `ln(max(count, 1)) - min` instead of raw counts.
    pub log_transform: bool,
    /// Replace the ADU-0 bin with the mean of its neighbours.
    pub suppress_zero_bin: bool,
    /// Upper bound on the width of the relative gain peak.
    pub max_relative_width: f64,
    pub lm: LMConfig,
}

impl Default for PeakFitConfig {
    fn default() -> Self {
        Self {
            log_transform: true,
            suppress_zero_bin: true,
            max_relative_width: 10.0,
            lm: LMConfig::default(),
        }
    }
}

impl PeakFitConfig {
    /// Fit raw counts with the ADU-0 bin kept as recorded.
    pub fn raw_counts() -> Self {
        Self {
            log_transform: false,
            suppress_zero_bin: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_relative_width > 0.0) {
            return Err(Error::InvalidConfiguration(format!(
                "max_relative_width must be positive, got {}",
                self.max_relative_width
            )));
        }
        self.lm.validate().map_err(Error::InvalidConfiguration)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Zero- and one-photon peak positions of one pixel group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotonPeaks {
    /// ADU of the zero-photon peak, the dark offset.
    pub zero_adu: f64,
    /// ADU of the one-photon peak.
    pub one_adu: f64,
    pub zero_fit: GaussianFit,
    pub one_fit: GaussianFit,
}

impl PhotonPeaks {
    /// ADU per photon.
    #[inline]
    pub fn gain(&self) -> f64 {
        self.one_adu - self.zero_adu
    }
}

/// Ratio between high- and medium-gain response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativeGain {
    pub value: f64,
    pub fit: GaussianFit,
    /// Pixels that contributed a nonzero ratio.
    pub pixels: usize,
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct PeakFitEngine {
    config: PeakFitConfig,
}

impl PeakFitEngine {
    pub fn new(config: PeakFitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PeakFitConfig {
        &self.config
    }

    /// Histogram `values` over `full_roi` and apply zero-bin suppression and
    /// the log transform as configured.
    pub fn prepare_histogram(&self, values: &[f32], full_roi: Roi) -> Result<Histogram> {
        let mut hist = Histogram::from_values(values.iter().map(|&v| v as f64), full_roi);
        if hist.total() == 0.0 {
            return Err(Error::EmptyHistogram { roi: full_roi });
        }
        if self.config.suppress_zero_bin {
            hist.suppress_zero_bin();
        }
        if self.config.log_transform {
            hist.log_transform();
        }
        Ok(hist)
    }

    /// Locate the zero- and one-photon peaks of high-gain readings.
    pub fn hg_calibrate(
        &self,
        values: &[f32],
        full_roi: Roi,
        zero_roi: Roi,
        one_roi: Roi,
    ) -> Result<PhotonPeaks> {
        zero_roi.index_within(&full_roi)?;
        one_roi.index_within(&full_roi)?;
        let hist = self.prepare_histogram(values, full_roi)?;
        self.refit(&hist, zero_roi, one_roi)
    }

    /// Peak search and fits on an already prepared histogram.
    ///
    /// The zero-photon Gaussian is fit and subtracted from the whole
    /// histogram before the one-photon peak is searched.
    pub fn refit(&self, hist: &Histogram, zero_roi: Roi, one_roi: Roi) -> Result<PhotonPeaks> {
        let base = hist.roi();
        let zero_range = zero_roi.index_within(&base)?;
        let one_range = one_roi.index_within(&base)?;
        let xs = hist.centres();
        let counts = hist.counts();

        let zero_bin = zero_range.start
            + argmax(&counts[zero_range.clone()]).ok_or(Error::EmptyHistogram { roi: zero_roi })?;
        let zero_adu = xs[zero_bin];
        let zero_fit = fitting::fit(
            &xs[zero_range.clone()],
            &counts[zero_range],
            Some(zero_adu),
            &FitBounds::default(),
            &self.config.lm,
        )
        .map_err(|reason| Error::FitConvergence {
            peak: Peak::ZeroPhoton,
            reason,
        })?;

        let residual: Vec<f64> = xs
            .iter()
            .zip(counts.iter())
            .map(|(&x, &c)| c - zero_fit.evaluate(x))
            .collect();

        let one_bin = one_range.start
            + argmax(&residual[one_range.clone()]).ok_or(Error::EmptyHistogram { roi: one_roi })?;
        let one_adu = xs[one_bin];
        let one_fit = fitting::fit(
            &xs[one_range.clone()],
            &residual[one_range],
            Some(one_adu),
            &FitBounds::default(),
            &self.config.lm,
        )
        .map_err(|reason| Error::FitConvergence {
            peak: Peak::OnePhoton,
            reason,
        })?;

        tracing::debug!(
            zero_adu,
            one_adu,
            zero_width = zero_fit.width,
            one_width = one_fit.width,
            "Located photon peaks"
        );

        Ok(PhotonPeaks {
            zero_adu,
            one_adu,
            zero_fit,
            one_fit,
        })
    }

    /// Relative gain from pools of medium- and high-gain readings.
    ///
    /// Both pools are `(frame, row, col)` with 0 marking readings that belong
    /// to another gain stage. Pixels lacking readings in either pool get a
    /// ratio of 0 and are left out of the histogram.
    pub fn mg_calibrate(
        &self,
        medium: ArrayView3<f32>,
        high: ArrayView3<f32>,
        rel_roi: Roi,
    ) -> Result<RelativeGain> {
        let ratios = pixel_ratios(medium, high)?;
        let nonzero: Vec<f64> = ratios.iter().copied().filter(|&r| r != 0.0).collect();
        let hist = Histogram::integer_centred(nonzero.iter().copied(), rel_roi);
        if hist.total() == 0.0 {
            return Err(Error::EmptyHistogram { roi: rel_roi });
        }

        let bounds = FitBounds::new(
            (rel_roi.lower() as f64, rel_roi.higher() as f64),
            (0.0, self.config.max_relative_width),
        );
        let fit = fitting::fit_fixed_amplitude(
            &hist.centres(),
            hist.counts(),
            hist.max(),
            &bounds,
            &self.config.lm,
        )
        .map_err(|reason| Error::FitConvergence {
            peak: Peak::RelativeGain,
            reason,
        })?;

        tracing::info!(
            relative_gain = fit.centre,
            width = fit.width,
            pixels = nonzero.len(),
            "Fitted relative gain"
        );

        Ok(RelativeGain {
            value: fit.centre,
            fit,
            pixels: nonzero.len(),
        })
    }

    /// Relative gain of one module and memory cell from raw frames.
    ///
    /// Readings are split by gain mode, bad pixels dropped, the dark offset of
    /// their stage subtracted and negative results clipped to 0 before the
    /// pools go to [`PeakFitEngine::mg_calibrate`].
    #[allow(clippy::too_many_arguments)]
    pub fn relative_gain(
        &self,
        frames: ArrayView3<u16>,
        indicators: ArrayView3<u16>,
        levels: &GainLevelTable,
        dark: &DarkCalibration,
        cell: usize,
        module_id: usize,
        rel_roi: Roi,
    ) -> Result<RelativeGain> {
        if frames.shape() != indicators.shape() {
            return Err(Error::shape_mismatch(
                "frame data",
                indicators.shape(),
                frames.shape(),
            ));
        }
        let mask = levels.mask_frames(indicators, module_id)?;
        let high = gain_pool(frames, mask.view(), dark, GainMode::High, cell, module_id)?;
        let medium = gain_pool(frames, mask.view(), dark, GainMode::Medium, cell, module_id)?;
        self.mg_calibrate(medium.view(), high.view(), rel_roi)
    }
}

/// Offset-corrected readings of one gain stage, 0 elsewhere.
fn gain_pool(
    frames: ArrayView3<u16>,
    mask: ArrayView3<u8>,
    dark: &DarkCalibration,
    mode: GainMode,
    cell: usize,
    module_id: usize,
) -> Result<Array3<f32>> {
    let offset = dark.offset(mode, cell, module_id)?;
    let bad = dark.bad_pixels(mode, cell, module_id)?;
    let shape_error = || Error::shape_mismatch("frame data", offset.shape(), frames.shape());
    let offset = offset.broadcast(frames.raw_dim()).ok_or_else(shape_error)?;
    let bad = bad.broadcast(frames.raw_dim()).ok_or_else(shape_error)?;
    let wanted = mode.mask_value();

    Ok(Zip::from(&frames)
        .and(&mask)
        .and(&offset)
        .and(&bad)
        .par_map_collect(|&raw, &m, &o, &b| {
            if m == wanted && b == 0 {
                (raw as f32 - o).max(0.0)
            } else {
                0.0
            }
        }))
}

/// Per-pixel ratio of mean nonzero high-gain to mean nonzero medium-gain
/// reading; 0 where either pool has no nonzero reading.
pub fn pixel_ratios(medium: ArrayView3<f32>, high: ArrayView3<f32>) -> Result<Array2<f64>> {
    if medium.shape() != high.shape() {
        return Err(Error::shape_mismatch(
            "high gain pool",
            medium.shape(),
            high.shape(),
        ));
    }
    Ok(Zip::from(medium.lanes(Axis(0)))
        .and(high.lanes(Axis(0)))
        .par_map_collect(|m, h| {
            let mean_medium = mean_nonzero(m);
            let mean_high = mean_nonzero(h);
            if mean_medium != 0.0 && mean_high != 0.0 {
                mean_high / mean_medium
            } else {
                0.0
            }
        }))
}

fn mean_nonzero(lane: ArrayView1<f32>) -> f64 {
    let (count, sum) = lane
        .iter()
        .filter(|&&v| v != 0.0)
        .fold((0usize, 0.0f64), |(n, s), &v| (n + 1, s + v as f64));
    if count == 0 { 0.0 } else { sum / count as f64 }
}
