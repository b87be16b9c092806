use rand::RngCore;
use rand_distr::{Distribution, Gamma};

use super::{no_observation_suffix, LogLikelihoodBlock, TestStatistic};
use crate::diagnostics::Diagnostics;
use crate::error::LikelihoodError;
use crate::math::{gamma_p, ln_gamma, normal_quantile};
use crate::observable_cache::{ObservableCache, ObservableId};
use crate::roots;

const QUANTILE_TOLERANCE: f64 = 1e-4;

/// Amoroso (generalized gamma) density, used for measurements quoted as
/// upper limits above a physical boundary `a`.
///
/// With `z = (x - a) / θ` the log-density is
/// `(αβ - 1) ln z - z^β - ln Γ(α) + ln(β / θ)`.
#[derive(Clone, Debug)]
pub struct AmorosoBlock {
    id: ObservableId,
    physical_limit: f64,
    theta: f64,
    alpha: f64,
    beta: f64,
    norm: f64,
    gamma: Gamma<f64>,
    number_of_observations: u32,
    diagnostics: Diagnostics,
}

impl AmorosoBlock {
    pub fn new(
        id: ObservableId,
        physical_limit: f64,
        theta: f64,
        alpha: f64,
        beta: f64,
        number_of_observations: u32,
    ) -> Result<Self, LikelihoodError> {
        for (name, value) in [("scale parameter theta", theta), ("shape parameter alpha", alpha), ("shape parameter beta", beta)] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(LikelihoodError::Configuration(format!(
                    "{name} ({value}) must be positive"
                )));
            }
        }
        let gamma = Gamma::new(alpha, 1.0)
            .map_err(|err| LikelihoodError::Configuration(format!("alpha = {alpha}: {err}")))?;

        Ok(Self {
            id,
            physical_limit,
            theta,
            alpha,
            beta,
            norm: -ln_gamma(alpha) + (beta / theta).ln(),
            gamma,
            number_of_observations,
            diagnostics: Diagnostics::current(),
        })
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Like [`AmorosoBlock::new`], additionally checking that the shape
    /// reproduces the quoted 10%, 50% and 90% upper limits.
    pub fn with_limits(
        id: ObservableId,
        physical_limit: f64,
        upper_limits: [f64; 3],
        theta: f64,
        alpha: f64,
        beta: f64,
        number_of_observations: u32,
    ) -> Result<Self, LikelihoodError> {
        let [x_10, x_50, x_90] = upper_limits;
        if x_10 <= physical_limit {
            return Err(LikelihoodError::Configuration(format!(
                "10% upper limit {x_10} <= physical limit {physical_limit}"
            )));
        }
        if x_50 <= physical_limit {
            return Err(LikelihoodError::Configuration(format!(
                "50% upper limit {x_50} <= physical limit {physical_limit}"
            )));
        }
        if x_90 <= x_50 {
            return Err(LikelihoodError::Configuration(format!(
                "90% upper limit {x_90} <= 50% upper limit {x_50}"
            )));
        }

        let block = Self::new(id, physical_limit, theta, alpha, beta, number_of_observations)?;
        for (x, quantile) in [(x_10, 0.1), (x_50, 0.5), (x_90, 0.9)] {
            let cdf = block.cdf(x);
            if (cdf - quantile).abs() > QUANTILE_TOLERANCE {
                return Err(LikelihoodError::Configuration(format!(
                    "cdf({x}) = {cdf} deviates from {quantile}"
                )));
            }
        }
        Ok(block)
    }

    pub fn cdf(&self, x: f64) -> f64 {
        if x <= self.physical_limit {
            return 0.0;
        }
        let w = ((x - self.physical_limit) / self.theta).powf(self.beta);
        gamma_p(self.alpha, w)
    }

    pub fn mode(&self) -> f64 {
        let shape = (self.alpha - self.beta.recip()).max(0.0);
        self.physical_limit + self.theta * shape.powf(self.beta.recip())
    }

    fn standardize(&self, x: f64) -> f64 {
        (x - self.physical_limit) / self.theta
    }

    /// `ln f(value) - ln f(x)`, large and positive at the physical limit.
    fn log_density_gap(&self, value: f64, x: f64) -> f64 {
        let zp = self.standardize(value);
        let zm = self.standardize(x);
        if zm == 0.0 {
            return f64::MAX;
        }
        (self.alpha * self.beta - 1.0) * (zp.ln() - zm.ln()) + zm.powf(self.beta) - zp.powf(self.beta)
    }

    fn mirror_failed(&self, value: f64, reason: impl std::fmt::Display) -> LikelihoodError {
        self.diagnostics.in_scope(|| {
            tracing::error!(value, %reason, "could not find the mirror point of the Amoroso density")
        });
        LikelihoodError::Numerical(format!("mirror point of {value}: {reason}"))
    }
}

impl LogLikelihoodBlock for AmorosoBlock {
    fn as_string(&self) -> String {
        format!(
            "Amoroso limit: mode = {:.5} (a = {:.5}, theta = {:.5}, alpha = {:.5}, beta = {:.5}){}",
            self.mode(),
            self.physical_limit,
            self.theta,
            self.alpha,
            self.beta,
            no_observation_suffix(self.number_of_observations)
        )
    }

    fn clone_onto(
        &self,
        source: &ObservableCache,
        target: &mut ObservableCache,
    ) -> Box<dyn LogLikelihoodBlock> {
        let id = target.adopt(source, self.id);
        Box::new(Self { id, ..self.clone() })
    }

    fn evaluate(&self, cache: &ObservableCache) -> Result<f64, LikelihoodError> {
        let z = self.standardize(cache[self.id]);
        Ok(self.norm + (self.alpha * self.beta - 1.0) * z.ln() - z.powf(self.beta))
    }

    fn number_of_observations(&self) -> u32 {
        self.number_of_observations
    }

    // A standard gamma draw is the Weibull transform of the pseudo
    // observation, so only the power term needs to be undone.
    fn sample(&self, _cache: &ObservableCache, rng: &mut dyn RngCore) -> Result<f64, LikelihoodError> {
        let w = self.gamma.sample(rng);
        let z = w.powf(self.beta.recip());
        Ok(self.norm + (self.alpha * self.beta - 1.0) * z.ln() - w)
    }

    fn significance(&self, cache: &ObservableCache) -> Result<f64, LikelihoodError> {
        let value = cache[self.id];
        if value <= self.physical_limit {
            return Ok(f64::INFINITY);
        }

        // Mode at the boundary: the probability between limit and value is the cdf.
        if (self.alpha * self.beta - 1.0).abs() < 1e-13 {
            return Ok(-normal_quantile(0.5 * (self.cdf(value) + 1.0)));
        }

        let mode = self.mode();
        if value == mode {
            return Ok(0.0);
        }
        let (x_min, x_max) = if value > mode {
            (self.physical_limit, mode)
        } else {
            let mut x_max = mode + (mode - value);
            let mut expansions = 0;
            while self.log_density_gap(value, x_max) < 0.0 {
                x_max = mode + 2.0 * (x_max - mode);
                expansions += 1;
                if expansions > 64 {
                    return Err(self.mirror_failed(value, "no point above the mode is as unlikely"));
                }
            }
            (mode, x_max)
        };

        let estimate = roots::brent(|x| self.log_density_gap(value, x), x_min, x_max)
            .map_err(|err| self.mirror_failed(value, err))?;

        let p = (self.cdf(value) - self.cdf(estimate)).abs();
        let sigma = normal_quantile(0.5 * (p + 1.0));
        Ok(if mode > value { sigma } else { -sigma })
    }

    fn primary_test_statistic(&self, _cache: &ObservableCache) -> Result<TestStatistic, LikelihoodError> {
        Ok(TestStatistic::Empty)
    }
}
