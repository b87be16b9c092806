use faer::{ColRef, Mat};
use itertools::Itertools;
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

use super::{no_observation_suffix, LogLikelihoodBlock, TestStatistic};
use crate::error::LikelihoodError;
use crate::math::{chi_squared_cdf, cholesky, normal_quantile, Cholesky, LN_2PI};
use crate::observable_cache::{ObservableCache, ObservableId};

/// Multivariate Gaussian density of a measured vector.
///
/// The predictions are mapped into measurement space by a linear response
/// matrix `R`, so that `χ² = (R o - μ)ᵀ C⁻¹ (R o - μ)`.
#[derive(Clone, Debug)]
pub struct MultivariateGaussianBlock {
    ids: Vec<ObservableId>,
    mean: Vec<f64>,
    covariance: Mat<f64>,
    response: Mat<f64>,
    decomposition: Cholesky,
    norm: f64,
    number_of_observations: u32,
}

impl MultivariateGaussianBlock {
    /// Measurement of the predictions themselves.
    pub fn new(
        ids: Vec<ObservableId>,
        mean: Vec<f64>,
        covariance: Mat<f64>,
        number_of_observations: u32,
    ) -> Result<Self, LikelihoodError> {
        let response = Mat::from_fn(mean.len(), ids.len(), |i, j| if i == j { 1.0 } else { 0.0 });
        Self::with_response(ids, mean, covariance, response, number_of_observations)
    }

    pub fn with_response(
        ids: Vec<ObservableId>,
        mean: Vec<f64>,
        covariance: Mat<f64>,
        response: Mat<f64>,
        number_of_observations: u32,
    ) -> Result<Self, LikelihoodError> {
        let dim_meas = mean.len();
        let dim_pred = ids.len();
        if covariance.nrows() != covariance.ncols() {
            return Err(LikelihoodError::Configuration(format!(
                "covariance matrix is not square ({}x{})",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        if covariance.nrows() != dim_meas {
            return Err(LikelihoodError::Configuration(format!(
                "{dim_meas} measurements but covariance matrix of dimension {}",
                covariance.nrows()
            )));
        }
        if response.nrows() != dim_meas {
            return Err(LikelihoodError::Configuration(format!(
                "{dim_meas} measurements but {} rows in the response matrix",
                response.nrows()
            )));
        }
        if response.ncols() != dim_pred {
            return Err(LikelihoodError::Configuration(format!(
                "{dim_pred} predictions but {} columns in the response matrix",
                response.ncols()
            )));
        }

        let decomposition = cholesky(&covariance).ok_or_else(|| {
            LikelihoodError::Numerical("Cholesky decomposition of the covariance failed".to_string())
        })?;
        let norm = -0.5 * dim_meas as f64 * LN_2PI - decomposition.half_log_det();

        Ok(Self {
            ids,
            mean,
            covariance,
            response,
            decomposition,
            norm,
            number_of_observations,
        })
    }

    /// Build the covariance from variances and a correlation matrix.
    pub fn from_correlation(
        ids: Vec<ObservableId>,
        mean: Vec<f64>,
        variances: &[f64],
        correlation: &Mat<f64>,
        number_of_observations: u32,
    ) -> Result<Self, LikelihoodError> {
        let k = variances.len();
        if correlation.nrows() != k || correlation.ncols() != k {
            return Err(LikelihoodError::Configuration(format!(
                "{k} variances but correlation matrix of shape {}x{}",
                correlation.nrows(),
                correlation.ncols()
            )));
        }
        let covariance =
            Mat::from_fn(k, k, |i, j| correlation[(i, j)] * (variances[i] * variances[j]).sqrt());
        Self::new(ids, mean, covariance, number_of_observations)
    }

    pub fn covariance(&self) -> &Mat<f64> {
        &self.covariance
    }

    pub fn inverse_covariance(&self) -> &Mat<f64> {
        &self.decomposition.inverse
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn chi_square(&self, cache: &ObservableCache) -> f64 {
        let observables = self.ids.iter().map(|&id| cache[id]).collect_vec();
        let residual = self
            .mean
            .iter()
            .enumerate()
            .map(|(i, mean)| {
                let predicted: f64 = observables
                    .iter()
                    .enumerate()
                    .map(|(j, o)| self.response[(i, j)] * o)
                    .sum();
                predicted - mean
            })
            .collect_vec();
        self.decomposition.chi_squared(ColRef::from_slice(&residual))
    }

    fn standard_normals(&self, rng: &mut dyn RngCore) -> Vec<f64> {
        (0..self.mean.len())
            .map(|_| StandardNormal.sample(&mut *rng))
            .collect()
    }

    /// Draw a synthetic measured vector `μ + L z`.
    pub fn pseudo_measurement(&self, rng: &mut dyn RngCore) -> Vec<f64> {
        let z = self.standard_normals(rng);
        let step = self.decomposition.correlate(&z);
        self.mean.iter().enumerate().map(|(i, m)| m + step[i]).collect()
    }
}

fn format_matrix(matrix: &Mat<f64>) -> String {
    (0..matrix.nrows())
        .map(|i| format!("( {} )", (0..matrix.ncols()).map(|j| matrix[(i, j)]).join(" ")))
        .join("")
}

impl LogLikelihoodBlock for MultivariateGaussianBlock {
    fn as_string(&self) -> String {
        format!(
            "Multivariate Gaussian: means = ( {} ), covariance matrix = ({}), inverse covariance matrix = ({}){}",
            self.mean.iter().join(" "),
            format_matrix(&self.covariance),
            format_matrix(&self.decomposition.inverse),
            no_observation_suffix(self.number_of_observations)
        )
    }

    fn clone_onto(
        &self,
        source: &ObservableCache,
        target: &mut ObservableCache,
    ) -> Box<dyn LogLikelihoodBlock> {
        let ids = self.ids.iter().map(|&id| target.adopt(source, id)).collect();
        Box::new(Self { ids, ..self.clone() })
    }

    fn evaluate(&self, cache: &ObservableCache) -> Result<f64, LikelihoodError> {
        Ok(self.norm - 0.5 * self.chi_square(cache))
    }

    fn number_of_observations(&self) -> u32 {
        self.number_of_observations
    }

    // Pseudo data centered on the prediction are compared with the
    // prediction, so only the residual `L z` matters.
    fn sample(&self, _cache: &ObservableCache, rng: &mut dyn RngCore) -> Result<f64, LikelihoodError> {
        let z = self.standard_normals(rng);
        let residual = self.decomposition.correlate(&z);
        Ok(self.norm - 0.5 * self.decomposition.chi_squared(residual.as_ref()))
    }

    fn significance(&self, cache: &ObservableCache) -> Result<f64, LikelihoodError> {
        let p = chi_squared_cdf(self.chi_square(cache), self.mean.len() as f64);
        Ok(normal_quantile(0.5 * (p + 1.0)))
    }

    fn primary_test_statistic(&self, cache: &ObservableCache) -> Result<TestStatistic, LikelihoodError> {
        Ok(TestStatistic::ChiSquare {
            value: self.chi_square(cache),
            degrees_of_freedom: self.number_of_observations,
            significance: None,
        })
    }
}
