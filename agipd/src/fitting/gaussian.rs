//! Gaussian model variants for the LM optimizer.

use super::lm_optimizer::FitModel;

/// `amplitude * exp(-(x - centre)² / (2 width²))`.
#[inline]
pub fn gauss(x: f64, amplitude: f64, centre: f64, width: f64) -> f64 {
    let dx = x - centre;
    amplitude * (-dx * dx / (2.0 * width * width)).exp()
}

/// Derivatives of [`gauss`] with respect to (amplitude, centre, width).
#[inline]
fn gauss_partials(x: f64, amplitude: f64, centre: f64, width: f64) -> [f64; 3] {
    let dx = x - centre;
    let w2 = width * width;
    let shape = (-dx * dx / (2.0 * w2)).exp();
    let value = amplitude * shape;
    [shape, value * dx / w2, value * dx * dx / (w2 * width)]
}

/// Closed interval a parameter is clamped to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Interval {
    pub lo: f64,
    pub hi: f64,
}

impl Interval {
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lo).min(self.hi)
    }
}

/// Parameters `[amplitude, width]`; centre held fixed.
pub(crate) struct FixedCentreGaussian {
    pub centre: f64,
    pub width: Interval,
}

impl FitModel<2> for FixedCentreGaussian {
    #[inline]
    fn evaluate(&self, x: f64, params: &[f64; 2]) -> f64 {
        gauss(x, params[0], self.centre, params[1])
    }

    #[inline]
    fn jacobian_row(&self, x: f64, params: &[f64; 2]) -> [f64; 2] {
        let [d_amp, _, d_width] = gauss_partials(x, params[0], self.centre, params[1]);
        [d_amp, d_width]
    }

    #[inline]
    fn constrain(&self, params: &mut [f64; 2]) {
        params[0] = params[0].max(0.0);
        params[1] = self.width.clamp(params[1]);
    }
}

/// Parameters `[amplitude, centre, width]`.
pub(crate) struct FreeGaussian {
    pub centre: Interval,
    pub width: Interval,
}

impl FitModel<3> for FreeGaussian {
    #[inline]
    fn evaluate(&self, x: f64, params: &[f64; 3]) -> f64 {
        gauss(x, params[0], params[1], params[2])
    }

    #[inline]
    fn jacobian_row(&self, x: f64, params: &[f64; 3]) -> [f64; 3] {
        gauss_partials(x, params[0], params[1], params[2])
    }

    #[inline]
    fn constrain(&self, params: &mut [f64; 3]) {
        params[0] = params[0].max(0.0);
        params[1] = self.centre.clamp(params[1]);
        params[2] = self.width.clamp(params[2]);
    }
}

/// Parameters `[centre, width]`; amplitude pinned.
pub(crate) struct FixedAmplitudeGaussian {
    pub amplitude: f64,
    pub centre: Interval,
    pub width: Interval,
}

impl FitModel<2> for FixedAmplitudeGaussian {
    #[inline]
    fn evaluate(&self, x: f64, params: &[f64; 2]) -> f64 {
        gauss(x, self.amplitude, params[0], params[1])
    }

    #[inline]
    fn jacobian_row(&self, x: f64, params: &[f64; 2]) -> [f64; 2] {
        let [_, d_centre, d_width] = gauss_partials(x, self.amplitude, params[0], params[1]);
        [d_centre, d_width]
    }

    #[inline]
    fn constrain(&self, params: &mut [f64; 2]) {
        params[0] = self.centre.clamp(params[0]);
        params[1] = self.width.clamp(params[1]);
    }
}
