//! Levenberg-Marquardt optimizer for one-dimensional curve fitting.
//!
//! Generic over the number of free parameters so the fixed-centre and
//! fixed-amplitude Gaussian variants share one loop. Uses f64 throughout.

use serde::{Deserialize, Serialize};

use super::FitFailure;
use super::linear_solver::solve;

/// Relative chi² improvement below which an accepted step counts as converged.
const CHI2_RELATIVE_TOLERANCE: f64 = 1e-12;
/// Gradient magnitude below which a singular system is already at its minimum.
const GRADIENT_TOLERANCE: f64 = 1e-12;
/// Largest cosine between the residual vector and any Jacobian column at a
/// stationary point.
const GRADIENT_COSINE_TOLERANCE: f64 = 1e-10;
/// Chi² this small relative to the sum of squared data is an exact fit.
const CHI2_ABSOLUTE_FLOOR: f64 = 1e-24;
/// Damping beyond which no descent direction is left.
const MAX_LAMBDA: f64 = 1e10;

/// Configuration for Levenberg-Marquardt optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LMConfig {
    /// Maximum iterations.
    pub max_iterations: usize,
    /// Convergence threshold for parameter changes.
    pub convergence_threshold: f64,
    /// Initial damping parameter.
    pub initial_lambda: f64,
    /// Factor to increase lambda on failed step.
    pub lambda_up: f64,
    /// Factor to decrease lambda on successful step.
    pub lambda_down: f64,
}

impl Default for LMConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            convergence_threshold: 1e-8,
            initial_lambda: 0.001,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

impl LMConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err("max_iterations must be at least 1".to_string());
        }
        if !(self.convergence_threshold > 0.0) {
            return Err(format!(
                "convergence_threshold must be positive, got {}",
                self.convergence_threshold
            ));
        }
        if !(self.initial_lambda > 0.0) {
            return Err(format!(
                "initial_lambda must be positive, got {}",
                self.initial_lambda
            ));
        }
        if !(self.lambda_up > 1.0) || !(self.lambda_down > 0.0 && self.lambda_down < 1.0) {
            return Err(format!(
                "lambda factors must satisfy lambda_up > 1 and 0 < lambda_down < 1, got {} and {}",
                self.lambda_up, self.lambda_down
            ));
        }
        Ok(())
    }
}

/// Result of L-M optimization.
#[derive(Debug, Clone, Copy)]
pub struct LMResult<const N: usize> {
    pub params: [f64; N],
    pub chi2: f64,
    pub iterations: usize,
}

/// Model that can be fit with L-M optimization.
pub trait FitModel<const N: usize> {
    /// Evaluate the model at `x`.
    fn evaluate(&self, x: f64, params: &[f64; N]) -> f64;

    /// Partial derivatives with respect to each parameter at `x`.
    fn jacobian_row(&self, x: f64, params: &[f64; N]) -> [f64; N];

    /// Clamp parameters back into their feasible region after an update.
    fn constrain(&self, params: &mut [f64; N]);
}

/// Minimize the squared residuals of `model` against `(xs, ys)`.
pub fn optimize<const N: usize, M: FitModel<N>>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    initial_params: [f64; N],
    config: &LMConfig,
) -> Result<LMResult<N>, FitFailure> {
    if xs.len() != ys.len() {
        return Err(FitFailure::LengthMismatch {
            xs: xs.len(),
            ys: ys.len(),
        });
    }
    if xs.len() < N {
        return Err(FitFailure::InsufficientPoints {
            points: xs.len(),
            parameters: N,
        });
    }

    let mut params = initial_params;
    model.constrain(&mut params);
    let mut lambda = config.initial_lambda;
    let mut prev_chi2 = compute_chi2(model, xs, ys, &params);
    if !prev_chi2.is_finite() {
        return Err(FitFailure::NonFinite);
    }
    let exact_fit_chi2 = CHI2_ABSOLUTE_FLOOR * ys.iter().map(|y| y * y).sum::<f64>();

    let mut jacobian = Vec::with_capacity(xs.len());
    let mut residuals = Vec::with_capacity(xs.len());

    for iter in 0..config.max_iterations {
        let iterations = iter + 1;
        let done = LMResult {
            params,
            chi2: prev_chi2,
            iterations,
        };

        // Residuals at rounding level.
        if prev_chi2 <= exact_fit_chi2 {
            return Ok(done);
        }

        fill_jacobian_residuals(model, xs, ys, &params, &mut jacobian, &mut residuals);
        let (hessian, gradient) = compute_hessian_gradient(&jacobian, &residuals);
        if is_stationary(&hessian, &gradient, prev_chi2) {
            return Ok(done);
        }

        let mut damped_hessian = hessian;
        for (i, row) in damped_hessian.iter_mut().enumerate() {
            row[i] *= 1.0 + lambda;
        }

        let Some(delta) = solve(&damped_hessian, &gradient) else {
            let max_gradient = gradient.iter().fold(0.0f64, |a, g| a.max(g.abs()));
            if max_gradient <= GRADIENT_TOLERANCE {
                return Ok(done);
            }
            // Rank-deficient J^T J: more damping lifts the diagonal.
            lambda *= config.lambda_up;
            if lambda > MAX_LAMBDA {
                return Err(FitFailure::SingularSystem);
            }
            continue;
        };

        let mut new_params = params;
        for (p, d) in new_params.iter_mut().zip(delta.iter()) {
            *p += d;
        }
        model.constrain(&mut new_params);

        let new_chi2 = compute_chi2(model, xs, ys, &new_params);

        // Step actually taken, after clamping, relative to each parameter's size.
        let threshold = config.convergence_threshold;
        let small_step = new_params
            .iter()
            .zip(params.iter())
            .all(|(n, p)| (n - p).abs() <= threshold * (p.abs() + threshold));

        if new_chi2 < prev_chi2 {
            let improvement = prev_chi2 - new_chi2;
            params = new_params;
            lambda *= config.lambda_down;
            prev_chi2 = new_chi2;

            if small_step
                || improvement <= CHI2_RELATIVE_TOLERANCE * (prev_chi2 + improvement)
            {
                return Ok(LMResult {
                    params,
                    chi2: prev_chi2,
                    iterations,
                });
            }
        } else {
            if small_step {
                return Ok(done);
            }
            lambda *= config.lambda_up;
            // No damping finds a descent step: params sit on a (possibly constrained) minimum.
            if lambda > MAX_LAMBDA {
                return Ok(done);
            }
        }
    }

    Err(FitFailure::NotConverged {
        iterations: config.max_iterations,
    })
}

/// True when the residual vector is orthogonal to every Jacobian column.
fn is_stationary<const N: usize>(
    hessian: &[[f64; N]; N],
    gradient: &[f64; N],
    chi2: f64,
) -> bool {
    let residual_norm = chi2.sqrt();
    if residual_norm == 0.0 {
        return true;
    }
    (0..N).all(|i| {
        let column_norm = hessian[i][i].sqrt();
        column_norm == 0.0
            || gradient[i].abs() <= GRADIENT_COSINE_TOLERANCE * column_norm * residual_norm
    })
}

pub(crate) fn compute_chi2<const N: usize, M: FitModel<N>>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    params: &[f64; N],
) -> f64 {
    xs.iter()
        .zip(ys.iter())
        .map(|(&x, &y)| {
            let residual = y - model.evaluate(x, params);
            residual * residual
        })
        .sum()
}

fn fill_jacobian_residuals<const N: usize, M: FitModel<N>>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    params: &[f64; N],
    jacobian: &mut Vec<[f64; N]>,
    residuals: &mut Vec<f64>,
) {
    jacobian.clear();
    residuals.clear();

    for (&x, &y) in xs.iter().zip(ys.iter()) {
        jacobian.push(model.jacobian_row(x, params));
        residuals.push(y - model.evaluate(x, params));
    }
}

/// Compute Hessian (J^T J) and gradient (J^T r).
/// Only the upper triangle is accumulated, then mirrored.
#[allow(clippy::needless_range_loop)]
pub(crate) fn compute_hessian_gradient<const N: usize>(
    jacobian: &[[f64; N]],
    residuals: &[f64],
) -> ([[f64; N]; N], [f64; N]) {
    let mut hessian = [[0.0f64; N]; N];
    let mut gradient = [0.0f64; N];

    for (row, &r) in jacobian.iter().zip(residuals.iter()) {
        for i in 0..N {
            gradient[i] += row[i] * r;
            for j in i..N {
                hessian[i][j] += row[i] * row[j];
            }
        }
    }

    for i in 1..N {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }

    (hessian, gradient)
}
