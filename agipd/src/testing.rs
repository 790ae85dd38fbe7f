//! Shared helpers for unit tests.

use ndarray::Array4;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constants::{MODULE_COLS, MODULE_ROWS};
use crate::dark_calibration::DarkCalibration;

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Inverse standard normal CDF (Acklam's rational approximation, |error| < 1.2e-9).
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e1,
        2.209460984245205e2,
        -2.759285104469687e2,
        1.383577518672690e2,
        -3.066479806614716e1,
        2.506628277459239,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e1,
        1.615858368580409e2,
        -1.556989798598866e2,
        6.680131188771972e1,
        -1.328068155288572e1,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-3,
        -3.223964580411365e-1,
        -2.400758277161838,
        -2.549732539343734,
        4.374664141464968,
        2.938163982698783,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-3,
        3.224671290700398e-1,
        2.445134137142996,
        3.754408661907416,
    ];
    const P_LOW: f64 = 0.02425;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p > 1.0 - P_LOW {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    } else {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    }
}

/// `count` evenly spaced quantiles of N(mean, sigma), rounded to whole ADU.
///
/// Deterministic stand-in for drawing `count` normal samples.
pub fn stratified_normal(count: usize, mean: f64, sigma: f64) -> Vec<f32> {
    (0..count)
        .map(|i| {
            let p = (i as f64 + 0.5) / count as f64;
            (mean + sigma * normal_quantile(p)).round() as f32
        })
        .collect()
}

/// Dark-run readings with a zero-photon peak at `offset` (sigma 3) and a
/// one-photon peak `gain` ADU above it (sigma 8), 90/10 weighted.
pub fn photon_peak_samples(count: usize, offset: f64, gain: f64) -> Vec<f32> {
    let zero = count * 9 / 10;
    let mut values = stratified_normal(zero, offset, 3.0);
    values.extend(stratified_normal(count - zero, offset + gain, 8.0));
    values
}

/// One N(mean, sigma) draw via the Box-Muller transform.
pub fn random_normal(rng: &mut StdRng, mean: f64, sigma: f64) -> f64 {
    // Open interval so ln never sees 0.
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random();
    mean + sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Randomly drawn counterpart of [`photon_peak_samples`]: each reading is a
/// one-photon event with probability 0.1, rounded to whole ADU.
pub fn random_photon_peak_samples(count: usize, offset: f64, gain: f64, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let value = if rng.random_bool(0.1) {
                random_normal(&mut rng, offset + gain, 8.0)
            } else {
                random_normal(&mut rng, offset, 3.0)
            };
            value.round() as f32
        })
        .collect()
}

/// Dark calibration for `modules` modules and `cells` memory cells with the
/// same offset and gain level in every pixel of a gain stage and no bad pixels.
pub fn uniform_dark(
    cells: usize,
    modules: usize,
    offsets: [f32; 3],
    levels: [f32; 3],
) -> DarkCalibration {
    let shape = (3, cells, modules * MODULE_ROWS, MODULE_COLS);
    let offset = Array4::from_shape_fn(shape, |(g, _, _, _)| offsets[g]);
    let gain_level = Array4::from_shape_fn(shape, |(g, _, _, _)| levels[g]);
    DarkCalibration::new(offset, Array4::zeros(shape), gain_level).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_quantile_known_values() {
        assert!(normal_quantile(0.5).abs() < 1e-12);
        assert!((normal_quantile(0.975) - 1.959964).abs() < 1e-5);
        assert!((normal_quantile(0.001) + 3.090232).abs() < 1e-5);
    }

    #[test]
    fn test_stratified_normal_is_symmetric() {
        let values = stratified_normal(1000, 0.0, 3.0);
        let mean: f32 = values.iter().sum::<f32>() / values.len() as f32;
        assert!(mean.abs() < 1e-2);
        assert_eq!(values[0], -values[999]);
    }

    #[test]
    fn test_random_normal_moments() {
        let mut rng = StdRng::seed_from_u64(11);
        let draws: Vec<f64> = (0..20_000).map(|_| random_normal(&mut rng, 5.0, 2.0)).collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let var = draws.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / draws.len() as f64;
        assert!((mean - 5.0).abs() < 0.1, "{mean}");
        assert!((var.sqrt() - 2.0).abs() < 0.1, "{var}");
    }

    #[test]
    fn test_random_photon_peak_samples_seeded() {
        let a = random_photon_peak_samples(1000, 0.0, 60.0, 3);
        let b = random_photon_peak_samples(1000, 0.0, 60.0, 3);
        assert_eq!(a, b);
        let one_photon = a.iter().filter(|&&v| v > 30.0).count();
        assert!((50..150).contains(&one_photon), "{one_photon}");
    }
}
