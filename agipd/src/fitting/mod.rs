//! Gaussian peak fitting.
//!
//! A Levenberg-Marquardt loop over the [`FitModel`](lm_optimizer::FitModel) trait drives three
//! Gaussian variants: centre held fixed, all parameters free, and
//! amplitude pinned. The fits are deterministic: same input, same result.

mod gaussian;
mod linear_solver;
mod lm_optimizer;


use thiserror::Error;

use crate::histogram::argmax;
use gaussian::{FixedAmplitudeGaussian, FixedCentreGaussian, FreeGaussian, Interval};

use lm_optimizer::{LMResult, optimize};

pub use gaussian::gauss;
pub use lm_optimizer::LMConfig;

/// Widths are never allowed below this, so the model stays finite.
pub const MIN_WIDTH: f64 = 1e-3;

/// A free centre may move at most this far from the argmax of the data.
pub const CENTRE_SEARCH_RADIUS: f64 = 10.0;

/// Full width at half maximum of a unit-width Gaussian, `2 sqrt(2 ln 2)`.
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

/// Why a fit produced no result.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum FitFailure {
    #[error("{xs} abscissae paired with {ys} values")]
    LengthMismatch { xs: usize, ys: usize },

    #[error("{points} data points cannot determine {parameters} free parameters")]
    InsufficientPoints { points: usize, parameters: usize },

    #[error("iteration budget of {iterations} exhausted")]
    NotConverged { iterations: usize },

    #[error("normal equations are singular")]
    SingularSystem,

    #[error("data or model evaluated to a non-finite value")]
    NonFinite,
}

/// Feasible region for centre and width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitBounds {
    pub centre: (f64, f64),
    pub width: (f64, f64),
}

impl Default for FitBounds {
    fn default() -> Self {
        Self {
            centre: (f64::NEG_INFINITY, f64::INFINITY),
            width: (0.0, f64::INFINITY),
        }
    }
}

impl FitBounds {
    pub fn new(centre: (f64, f64), width: (f64, f64)) -> Self {
        Self { centre, width }
    }

    fn centre_interval(&self) -> Interval {
        Interval {
            lo: self.centre.0,
            hi: self.centre.1.max(self.centre.0),
        }
    }

    fn width_interval(&self) -> Interval {
        let lo = self.width.0.max(MIN_WIDTH);
        Interval {
            lo,
            hi: self.width.1.max(lo),
        }
    }
}

/// Fitted Gaussian with diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFit {
    pub amplitude: f64,
    pub centre: f64,
    pub width: f64,
    /// Root mean square of the residuals at the solution.
    pub rms_residual: f64,
    pub iterations: usize,
}

impl GaussianFit {
    #[inline]
    pub fn evaluate(&self, x: f64) -> f64 {
        gauss(x, self.amplitude, self.centre, self.width)
    }

    fn from_result<const N: usize>(
        amplitude: f64,
        centre: f64,
        width: f64,
        result: &LMResult<N>,
        points: usize,
    ) -> Result<Self, FitFailure> {
        let fit = Self {
            amplitude,
            centre,
            width,
            rms_residual: (result.chi2 / points as f64).sqrt(),
            iterations: result.iterations,
        };
        let finite = [fit.amplitude, fit.centre, fit.width, fit.rms_residual]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(FitFailure::NonFinite);
        }
        Ok(fit)
    }
}

/// Fit a Gaussian to `(xs, ys)`.
///
/// With `init_centre` the centre is held there and only amplitude and width
/// are fit. Without it all three are free, with the centre restricted to
/// [`CENTRE_SEARCH_RADIUS`] around the argmax of `ys` and to `bounds.centre`.
/// Amplitude stays non-negative and width inside `bounds.width`.
pub fn fit(
    xs: &[f64],
    ys: &[f64],
    init_centre: Option<f64>,
    bounds: &FitBounds,
    config: &LMConfig,
) -> Result<GaussianFit, FitFailure> {
    check_data(xs, ys)?;
    let width = bounds.width_interval();

    match init_centre {
        Some(centre) => {
            let model = FixedCentreGaussian { centre, width };
            let amplitude = value_nearest(xs, ys, centre);
            let initial = [amplitude, width.clamp(width_estimate(xs, ys, centre))];
            let result = optimize(&model, xs, ys, initial, config)?;
            let [amplitude, width] = result.params;
            GaussianFit::from_result(amplitude, centre, width, &result, xs.len())
        }
        None => {
            let peak = argmax(ys).ok_or(FitFailure::InsufficientPoints {
                points: 0,
                parameters: 3,
            })?;
            let limits = bounds.centre_interval();
            let lo = limits.clamp(xs[peak] - CENTRE_SEARCH_RADIUS);
            let hi = limits.clamp(xs[peak] + CENTRE_SEARCH_RADIUS);
            let centre = Interval { lo, hi };
            let start = centre.clamp(xs[peak]);
            let model = FreeGaussian { centre, width };
            let initial = [ys[peak], start, width.clamp(half_maximum_width(xs, ys, peak))];
            let result = optimize(&model, xs, ys, initial, config)?;
            let [amplitude, centre, width] = result.params;
            GaussianFit::from_result(amplitude, centre, width, &result, xs.len())
        }
    }
}

/// Fit centre and width of a Gaussian whose amplitude is pinned.
pub fn fit_fixed_amplitude(
    xs: &[f64],
    ys: &[f64],
    amplitude: f64,
    bounds: &FitBounds,
    config: &LMConfig,
) -> Result<GaussianFit, FitFailure> {
    check_data(xs, ys)?;
    if !amplitude.is_finite() {
        return Err(FitFailure::NonFinite);
    }
    let centre = bounds.centre_interval();
    let width = bounds.width_interval();
    let start = match argmax(ys) {
        Some(peak) => centre.clamp(xs[peak]),
        None => centre.clamp(0.0),
    };
    let model = FixedAmplitudeGaussian {
        amplitude,
        centre,
        width,
    };
    let initial = [start, width.clamp(width_estimate(xs, ys, start))];
    let result = optimize(&model, xs, ys, initial, config)?;
    let [centre, width] = result.params;
    GaussianFit::from_result(amplitude, centre, width, &result, xs.len())
}

fn check_data(xs: &[f64], ys: &[f64]) -> Result<(), FitFailure> {
    if xs.len() != ys.len() {
        return Err(FitFailure::LengthMismatch {
            xs: xs.len(),
            ys: ys.len(),
        });
    }
    if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
        return Err(FitFailure::NonFinite);
    }
    Ok(())
}

fn value_nearest(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    xs.iter()
        .zip(ys.iter())
        .min_by(|a, b| (a.0 - x).abs().total_cmp(&(b.0 - x).abs()))
        .map(|(_, &y)| y.max(0.0))
        .unwrap_or(0.0)
}

/// Second moment of the positive part of `ys` around `centre`, at least 1.
fn width_estimate(xs: &[f64], ys: &[f64], centre: f64) -> f64 {
    let (weight, moment) = xs
        .iter()
        .zip(ys.iter())
        .filter(|(_, y)| **y > 0.0)
        .fold((0.0, 0.0), |(w, m), (&x, &y)| {
            (w + y, m + y * (x - centre) * (x - centre))
        });
    if weight > 0.0 {
        (moment / weight).sqrt().max(1.0)
    } else {
        1.0
    }
}

/// Width implied by the run of samples above half of `ys[peak]` that
/// contains `peak`, searched no further than [`CENTRE_SEARCH_RADIUS`] from
/// it. At least 1.
fn half_maximum_width(xs: &[f64], ys: &[f64], peak: usize) -> f64 {
    let half = ys[peak] / 2.0;
    let inside = |i: usize| ys[i] > half && (xs[i] - xs[peak]).abs() <= CENTRE_SEARCH_RADIUS;
    let mut lo = peak;
    while lo > 0 && inside(lo - 1) {
        lo -= 1;
    }
    let mut hi = peak;
    while hi + 1 < ys.len() && inside(hi + 1) {
        hi += 1;
    }
    let spacing = if xs.len() > 1 {
        (xs[xs.len() - 1] - xs[0]).abs() / (xs.len() - 1) as f64
    } else {
        1.0
    };
    let full_width = (xs[hi] - xs[lo]).abs() + spacing;
    (full_width / FWHM_PER_SIGMA).max(1.0)
}
