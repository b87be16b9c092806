use faer::{ColRef, Mat};
use rand::RngCore;
use rand_distr::{ChiSquared, Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use super::{ProposalFunction, MULTIVARIATE_GAUSSIAN, MULTIVARIATE_STUDENT_T};
use crate::diagnostics::Diagnostics;
use crate::error::ProposalError;
use crate::math::{cholesky, ln_gamma, sample_covariance, Cholesky, LN_2PI};
use crate::state::{ChainState, History};
use crate::storage::ProposalStore;

/// Shape of a multivariate proposal density.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Kernel {
    Gaussian,
    StudentT { degrees_of_freedom: f64 },
}

impl Kernel {
    fn type_tag(&self) -> &'static str {
        match self {
            Kernel::Gaussian => MULTIVARIATE_GAUSSIAN,
            Kernel::StudentT { .. } => MULTIVARIATE_STUDENT_T,
        }
    }
}

/// Settings for the covariance adaptation of a multivariate proposal.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultivariateSettings {
    /// Multiply the initial covariance by the scale factor.
    pub automatic_scaling: bool,
    /// A new covariance estimate enters with weight `1 / (n + 1)^cooling_power`
    /// at the `n`-th adaptation.
    pub cooling_power: f64,
    pub scale_min: f64,
    pub scale_max: f64,
    /// Factor applied to the scale when the efficiency leaves its target range.
    pub scale_update_factor: f64,
    /// Defaults to `2.38² / d`.
    pub initial_scale: Option<f64>,
}

impl Default for MultivariateSettings {
    fn default() -> Self {
        Self {
            automatic_scaling: true,
            cooling_power: 0.5,
            scale_min: 1e-4,
            scale_max: 100.0,
            scale_update_factor: 1.5,
            initial_scale: None,
        }
    }
}

/// Local proposal `x = y + L z` around the current point, with `L Lᵀ` the
/// scaled covariance estimate.
#[derive(Clone, Debug)]
pub struct MultivariateProposal {
    kernel: Kernel,
    settings: MultivariateSettings,
    indices: Vec<usize>,
    covariance: Mat<f64>,
    decomposition: Cholesky,
    sample_covariance: Mat<f64>,
    scale: f64,
    adaptations: u64,
    norm: f64,
    chi_squared: Option<ChiSquared<f64>>,
    diagnostics: Diagnostics,
}

impl MultivariateProposal {
    /// `covariance` is the initial estimate of the target's covariance.
    pub fn new(
        kernel: Kernel,
        covariance: Mat<f64>,
        settings: MultivariateSettings,
    ) -> Result<Self, ProposalError> {
        let dimension = covariance.nrows();
        if dimension == 0 || covariance.ncols() != dimension {
            return Err(ProposalError::Configuration(format!(
                "covariance matrix must be square and non-empty, found {}x{}",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        if !(settings.scale_min > 0.0
            && settings.scale_min < settings.scale_max
            && settings.scale_update_factor > 1.0
            && settings.cooling_power >= 0.0)
        {
            return Err(ProposalError::Configuration(format!(
                "inconsistent adaptation settings {settings:?}"
            )));
        }
        let chi_squared = match kernel {
            Kernel::Gaussian => None,
            Kernel::StudentT { degrees_of_freedom } => Some(
                ChiSquared::new(degrees_of_freedom)
                    .ok()
                    .filter(|_| degrees_of_freedom > 0.0 && degrees_of_freedom.is_finite())
                    .ok_or_else(|| {
                        ProposalError::Configuration(format!(
                            "degrees of freedom ({degrees_of_freedom}) must be positive"
                        ))
                    })?,
            ),
        };

        let scale = settings
            .initial_scale
            .unwrap_or(2.38 * 2.38 / dimension as f64);
        let scaled = if settings.automatic_scaling {
            Mat::from_fn(dimension, dimension, |i, j| scale * covariance[(i, j)])
        } else {
            covariance.clone()
        };
        if let Some(i) = (0..dimension).find(|&i| !(scaled[(i, i)] > 0.0)) {
            return Err(ProposalError::Configuration(format!(
                "diagonal covariance element {i} must be positive, found {}",
                scaled[(i, i)]
            )));
        }

        let mut proposal = Self {
            kernel,
            settings,
            indices: (0..dimension).collect(),
            covariance: Mat::zeros(dimension, dimension),
            decomposition: Cholesky {
                factor: Mat::zeros(dimension, dimension),
                inverse: Mat::zeros(dimension, dimension),
            },
            sample_covariance: covariance,
            scale,
            adaptations: 0,
            norm: 0.0,
            chi_squared,
            diagnostics: Diagnostics::current(),
        };
        proposal.install_covariance(scaled)?;
        Ok(proposal)
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn covariance(&self) -> &Mat<f64> {
        &self.covariance
    }

    pub fn sample_covariance(&self) -> &Mat<f64> {
        &self.sample_covariance
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn adaptations(&self) -> u64 {
        self.adaptations
    }

    pub fn cooling_power(&self) -> f64 {
        self.settings.cooling_power
    }

    pub fn settings(&self) -> &MultivariateSettings {
        &self.settings
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Use the coordinates `indices` of the chain states in `adapt` and `reset`.
    pub fn set_indices(&mut self, indices: Vec<usize>) -> Result<(), ProposalError> {
        if indices.len() != self.dimension() {
            return Err(ProposalError::Configuration(format!(
                "{} indices for a proposal of dimension {}",
                indices.len(),
                self.dimension()
            )));
        }
        self.indices = indices;
        Ok(())
    }

    /// Factorize `covariance` and make it the proposal covariance.
    ///
    /// A matrix that is not positive definite loses its off-diagonal
    /// elements and is factorized once more.
    fn install_covariance(&mut self, mut covariance: Mat<f64>) -> Result<(), ProposalError> {
        let decomposition = match cholesky(&covariance) {
            Some(decomposition) => decomposition,
            None => {
                let dimension = covariance.nrows();
                self.diagnostics.in_scope(|| {
                    tracing::warn!(
                        dimension,
                        "proposal covariance is not positive definite, dropping off-diagonal elements"
                    )
                });
                for i in 0..dimension {
                    for j in 0..dimension {
                        if i != j {
                            covariance[(i, j)] = 0.0;
                        }
                    }
                }
                cholesky(&covariance).ok_or_else(|| {
                    self.diagnostics.in_scope(|| {
                        tracing::error!(?covariance, "no Cholesky decomposition of the proposal covariance")
                    });
                    ProposalError::Numerical(
                        "Cholesky decomposition of the proposal covariance failed; \
                         accept more moves between updates or shrink the initial covariance"
                            .to_string(),
                    )
                })?
            }
        };

        let dimension = covariance.nrows() as f64;
        let half_log_det = decomposition.half_log_det();
        self.norm = match self.kernel {
            Kernel::Gaussian => -0.5 * dimension * LN_2PI - half_log_det,
            Kernel::StudentT { degrees_of_freedom: dof } => {
                ln_gamma(0.5 * (dof + dimension)) - ln_gamma(0.5 * dof)
                    - 0.5 * dimension * (dof * std::f64::consts::PI).ln()
                    - half_log_det
            }
        };
        self.decomposition = decomposition;
        self.covariance = covariance;
        Ok(())
    }

    fn check_points<'a>(&self, mut points: impl Iterator<Item = &'a ChainState>) -> Result<(), ProposalError> {
        let required = self.indices.iter().max().map_or(0, |&max| max + 1);
        match points.find(|state| state.point.len() < required) {
            Some(state) => Err(ProposalError::Configuration(format!(
                "chain state of dimension {} lacks coordinates up to {}",
                state.point.len(),
                required - 1
            ))),
            None => Ok(()),
        }
    }

    /// Update the covariance from the states of the latest window.
    ///
    /// The window's sample covariance is blended into the running estimate,
    /// and the scale factor grows or shrinks to steer the efficiency into
    /// `[efficiency_min, efficiency_max]`.
    pub fn adapt(
        &mut self,
        window: &[ChainState],
        efficiency: f64,
        efficiency_min: f64,
        efficiency_max: f64,
    ) -> Result<(), ProposalError> {
        self.check_points(window.iter())?;
        let (estimate, _) = sample_covariance(window.iter().map(ChainState::point), &self.indices)
            .ok_or(ProposalError::InsufficientHistory(window.len()))?;

        let adaptations = self.adaptations + 1;
        let weight = ((adaptations + 1) as f64).powf(-self.settings.cooling_power);
        let dimension = self.dimension();
        let blended = Mat::from_fn(dimension, dimension, |i, j| {
            (1.0 - weight) * self.sample_covariance[(i, j)] + weight * estimate[(i, j)]
        });

        let old_scale = self.scale;
        let mut scale = self.scale;
        let factor = self.settings.scale_update_factor;
        if efficiency > efficiency_max {
            scale *= factor;
        } else if efficiency < efficiency_min {
            scale /= factor;
        }
        if scale > self.settings.scale_max {
            scale = self.settings.scale_max;
            self.diagnostics
                .in_scope(|| tracing::warn!(scale, efficiency, "covariance scale reached its maximum"));
        } else if scale < self.settings.scale_min {
            scale = self.settings.scale_min;
            self.diagnostics
                .in_scope(|| tracing::warn!(scale, efficiency, "covariance scale reached its minimum"));
        }

        let covariance = Mat::from_fn(dimension, dimension, |i, j| scale * blended[(i, j)]);
        self.install_covariance(covariance)?;
        self.sample_covariance = blended;
        self.scale = scale;
        self.adaptations = adaptations;
        self.diagnostics.in_scope(|| {
            tracing::debug!(adaptations, weight, old_scale, scale, "adapted proposal covariance")
        });
        Ok(())
    }

    /// Estimate the covariance from scratch from several histories.
    ///
    /// The first `skip_initial` fraction of every history is discarded. The
    /// covariance becomes `scale` times the new estimate and the adaptation
    /// count starts over.
    pub fn reset(&mut self, histories: &[History], scale: f64, skip_initial: f64) -> Result<(), ProposalError> {
        if !(0.0..1.0).contains(&skip_initial) {
            return Err(ProposalError::Configuration(format!(
                "fraction of skipped states ({skip_initial}) must lie in [0, 1)"
            )));
        }
        if !(scale > 0.0) {
            return Err(ProposalError::Configuration(format!("scale ({scale}) must be positive")));
        }
        let tails = || {
            histories.iter().flat_map(move |history| {
                let skipped = (skip_initial * history.len() as f64) as usize;
                history[skipped..].iter()
            })
        };
        self.check_points(tails())?;
        let (estimate, count) = sample_covariance(tails().map(ChainState::point), &self.indices)
            .ok_or_else(|| ProposalError::InsufficientHistory(tails().count()))?;

        if scale > self.settings.scale_max {
            self.diagnostics
                .in_scope(|| tracing::warn!(scale, "covariance scale above its maximum"));
        } else if scale < self.settings.scale_min {
            self.diagnostics
                .in_scope(|| tracing::warn!(scale, "covariance scale below its minimum"));
        }

        let dimension = self.dimension();
        let covariance = Mat::from_fn(dimension, dimension, |i, j| scale * estimate[(i, j)]);
        self.install_covariance(covariance)?;
        self.sample_covariance = estimate;
        self.scale = scale;
        self.adaptations = 0;
        self.diagnostics.in_scope(|| {
            tracing::debug!(states = count, histories = histories.len(), scale, "reset proposal covariance")
        });
        Ok(())
    }

    /// Multiply the scale factor by `factor`.
    ///
    /// The covariance follows the scale, so `rescale(1.0 / scale())` leaves the
    /// unscaled estimate in place. The adaptation count is kept.
    pub fn rescale(&mut self, factor: f64) -> Result<(), ProposalError> {
        if !(factor > 0.0 && factor.is_finite()) {
            return Err(ProposalError::Configuration(format!(
                "rescale factor ({factor}) must be positive"
            )));
        }
        let dimension = self.dimension();
        let covariance = Mat::from_fn(dimension, dimension, |i, j| factor * self.covariance[(i, j)]);
        self.install_covariance(covariance)?;
        self.scale *= factor;
        Ok(())
    }

    fn chi_squared(&self, x: &[f64], y: &[f64]) -> f64 {
        let diff: Vec<f64> = x.iter().zip(y).map(|(x, y)| x - y).collect();
        self.decomposition.chi_squared(ColRef::from_slice(&diff))
    }

    /// Rebuild a proposal written by [`ProposalFunction::dump_state`].
    pub(crate) fn restore(
        store: &dyn ProposalStore,
        path: &str,
        tag: &str,
        dimension: usize,
    ) -> Result<Self, ProposalError> {
        let kernel = match tag {
            MULTIVARIATE_GAUSSIAN => Kernel::Gaussian,
            MULTIVARIATE_STUDENT_T => Kernel::StudentT {
                degrees_of_freedom: store.read_f64(&format!("{path}/scalars/degrees of freedom"))?,
            },
            other => return Err(ProposalError::UnknownProposal(other.to_string())),
        };
        let covariance = read_matrix(store, &format!("{path}/covariance"), dimension)?;
        let sample_covariance = read_matrix(store, &format!("{path}/sample covariance"), dimension)?;
        let settings = MultivariateSettings {
            automatic_scaling: false,
            cooling_power: store.read_f64(&format!("{path}/scalars/cooling factor"))?,
            ..Default::default()
        };

        let mut proposal = Self::new(kernel, covariance, settings)?;
        proposal.sample_covariance = sample_covariance;
        proposal.scale = store.read_f64(&format!("{path}/scalars/covariance scale"))?;
        proposal.adaptations = store.read_u64(&format!("{path}/scalars/adaptations"))?;
        Ok(proposal)
    }
}

fn read_matrix(store: &dyn ProposalStore, path: &str, dimension: usize) -> Result<Mat<f64>, ProposalError> {
    let values = store.read_f64_array(path)?;
    if values.len() != dimension * dimension {
        return Err(ProposalError::Configuration(format!(
            "'{path}' holds {} values, expected {}",
            values.len(),
            dimension * dimension
        )));
    }
    Ok(Mat::from_fn(dimension, dimension, |i, j| values[i * dimension + j]))
}

fn flatten(matrix: &Mat<f64>) -> Vec<f64> {
    let n = matrix.nrows();
    (0..n * n).map(|k| matrix[(k / n, k % n)]).collect()
}

impl ProposalFunction for MultivariateProposal {
    fn type_tag(&self) -> &'static str {
        self.kernel.type_tag()
    }

    fn dimension(&self) -> usize {
        self.covariance.nrows()
    }

    fn evaluate(&self, x: &[f64], y: &[f64]) -> f64 {
        let chi_squared = self.chi_squared(x, y);
        match self.kernel {
            Kernel::Gaussian => self.norm - 0.5 * chi_squared,
            Kernel::StudentT { degrees_of_freedom: dof } => {
                self.norm - 0.5 * (dof + self.dimension() as f64) * (chi_squared / dof).ln_1p()
            }
        }
    }

    fn propose(&self, current: &[f64], proposal: &mut [f64], rng: &mut dyn RngCore) {
        let dimension = self.dimension();
        let z: Vec<f64> = (0..dimension).map(|_| StandardNormal.sample(&mut *rng)).collect();
        let step = self.decomposition.correlate(&z);

        let stretch = match (&self.kernel, &self.chi_squared) {
            (Kernel::StudentT { degrees_of_freedom }, Some(chi_squared)) => {
                (degrees_of_freedom / chi_squared.sample(&mut *rng)).sqrt()
            }
            _ => 1.0,
        };
        for (i, (proposal, current)) in proposal.iter_mut().zip(current).enumerate() {
            *proposal = current + stretch * step[i];
        }
    }

    fn adapt(
        &mut self,
        window: &[ChainState],
        efficiency: f64,
        efficiency_min: f64,
        efficiency_max: f64,
    ) -> Result<(), ProposalError> {
        MultivariateProposal::adapt(self, window, efficiency, efficiency_min, efficiency_max)
    }

    fn clone_proposal(&self) -> Box<dyn ProposalFunction> {
        Box::new(self.clone())
    }

    fn dump_state(&self, store: &mut dyn ProposalStore, path: &str) -> Result<(), ProposalError> {
        super::write_meta(store, path, self.type_tag(), self.dimension())?;
        store.write(&format!("{path}/covariance"), flatten(&self.covariance).into())?;
        store.write(
            &format!("{path}/sample covariance"),
            flatten(&self.sample_covariance).into(),
        )?;
        store.write(&format!("{path}/scalars/covariance scale"), self.scale.into())?;
        store.write(
            &format!("{path}/scalars/cooling factor"),
            self.settings.cooling_power.into(),
        )?;
        store.write(&format!("{path}/scalars/adaptations"), self.adaptations.into())?;
        if let Kernel::StudentT { degrees_of_freedom } = self.kernel {
            store.write(
                &format!("{path}/scalars/degrees of freedom"),
                degrees_of_freedom.into(),
            )?;
        }
        Ok(())
    }

    fn multivariate(&self) -> Option<&MultivariateProposal> {
        Some(self)
    }

    fn multivariate_mut(&mut self) -> Option<&mut MultivariateProposal> {
        Some(self)
    }
}
