use std::f64::consts::SQRT_2;

use faer::linalg::solvers::DenseSolveCore;
use faer::{Col, ColRef, Mat};
use itertools::izip;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use statrs::function::{erf, gamma};

/// ln(2π)
pub(crate) const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Probability content of the ±1σ interval of a standard normal distribution.
pub(crate) const ONE_SIGMA_CONTENT: f64 = 0.682_689_492_137_085_85;

pub(crate) use gamma::ln_gamma;

/// `log(sum_i w_i exp(x_i))`, shifting by the largest term before exponentiating.
pub(crate) fn weighted_log_sum_exp(weights: &[f64], log_values: &[f64]) -> f64 {
    assert!(weights.len() == log_values.len());

    let max = log_values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if !max.is_finite() {
        return max;
    }

    let sum: f64 = izip!(weights, log_values)
        .map(|(&w, &x)| w * (x - max).exp())
        .sum();
    sum.ln() + max
}

/// Standard normal cumulative distribution.
///
/// Built on the `statrs` complementary error function, which is accurate to
/// a few parts in 1e11.
pub(crate) fn normal_cdf(x: f64) -> f64 {
    0.5 * erf::erfc(-x / SQRT_2)
}

/// Inverse of the standard normal cumulative distribution.
pub(crate) fn normal_quantile(p: f64) -> f64 {
    SQRT_2 * erf::erf_inv(2.0 * p - 1.0)
}

/// Lower regularized incomplete gamma function P(a, x), total for x outside (0, ∞).
pub(crate) fn gamma_p(a: f64, x: f64) -> f64 {
    if a.is_nan() || x.is_nan() {
        f64::NAN
    } else if x <= 0.0 {
        0.0
    } else if x == f64::INFINITY {
        1.0
    } else {
        gamma::gamma_lr(a, x)
    }
}

/// Upper regularized incomplete gamma function Q(a, x) = 1 - P(a, x).
pub(crate) fn gamma_q(a: f64, x: f64) -> f64 {
    1.0 - gamma_p(a, x)
}

pub(crate) fn chi_squared_cdf(x: f64, degrees_of_freedom: f64) -> f64 {
    gamma_p(0.5 * degrees_of_freedom, 0.5 * x)
}

pub(crate) fn chi_squared_quantile(p: f64, degrees_of_freedom: f64) -> Option<f64> {
    ChiSquared::new(degrees_of_freedom)
        .ok()
        .map(|dist| dist.inverse_cdf(p))
}

/// Cholesky factorization `L Lᵀ` of a symmetric positive-definite matrix
/// together with its inverse.
#[derive(Clone, Debug)]
pub(crate) struct Cholesky {
    pub(crate) factor: Mat<f64>,
    pub(crate) inverse: Mat<f64>,
}

fn is_finite(mat: &Mat<f64>) -> bool {
    let mut ok = true;
    faer::zip!(mat).for_each(|faer::unzip!(val)| ok &= val.is_finite());
    ok
}

/// Factorize `matrix`, reading only its lower triangle.
///
/// Returns `None` if the matrix is not numerically positive definite.
pub(crate) fn cholesky(matrix: &Mat<f64>) -> Option<Cholesky> {
    let llt = matrix.llt(faer::Side::Lower).ok()?;
    let factor = llt.L().to_owned();
    let positive = (0..factor.nrows()).all(|i| factor[(i, i)] > 0.0);
    if !(positive && is_finite(&factor)) {
        return None;
    }
    let inverse = llt.inverse();
    is_finite(&inverse).then_some(Cholesky { factor, inverse })
}

impl Cholesky {
    /// `0.5 * ln(det(L Lᵀ))`
    pub(crate) fn half_log_det(&self) -> f64 {
        (0..self.factor.nrows()).map(|i| self.factor[(i, i)].ln()).sum()
    }

    /// `L z`, turning independent standard normals into correlated ones.
    pub(crate) fn correlate(&self, z: &[f64]) -> Col<f64> {
        &self.factor * ColRef::from_slice(z)
    }

    /// `xᵀ (L Lᵀ)⁻¹ x`
    pub(crate) fn chi_squared(&self, x: ColRef<'_, f64>) -> f64 {
        quadratic_form(&self.inverse, x)
    }
}

/// `xᵀ A x`
pub(crate) fn quadratic_form(matrix: &Mat<f64>, x: ColRef<'_, f64>) -> f64 {
    x.transpose() * (matrix * x)
}

/// Unbiased sample covariance of the coordinates `indices` of `points`.
///
/// Returns the covariance together with the number of points, or `None` if
/// fewer than two points are available.
pub(crate) fn sample_covariance<'a, I>(points: I, indices: &[usize]) -> Option<(Mat<f64>, usize)>
where
    I: Iterator<Item = &'a [f64]> + Clone,
{
    let dim = indices.len();
    let mut mean = vec![0f64; dim];
    let mut count = 0usize;
    for point in points.clone() {
        izip!(mean.iter_mut(), indices).for_each(|(mean, &idx)| *mean += point[idx]);
        count += 1;
    }
    if count < 2 {
        return None;
    }
    mean.iter_mut().for_each(|mean| *mean /= count as f64);

    let mut covariance = Mat::<f64>::zeros(dim, dim);
    let mut diff = vec![0f64; dim];
    for point in points {
        izip!(diff.iter_mut(), indices, mean.iter())
            .for_each(|(diff, &idx, &mean)| *diff = point[idx] - mean);
        for i in 0..dim {
            for j in i..dim {
                covariance[(i, j)] += diff[i] * diff[j];
            }
        }
    }

    let norm = ((count - 1) as f64).recip();
    for i in 0..dim {
        for j in i..dim {
            let value = covariance[(i, j)] * norm;
            covariance[(i, j)] = value;
            covariance[(j, i)] = value;
        }
    }
    Some((covariance, count))
}
