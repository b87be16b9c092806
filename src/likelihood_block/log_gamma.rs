use rand::RngCore;
use rand_distr::{Distribution, Gamma};

use super::{no_observation_suffix, LogLikelihoodBlock, Measurement, TestStatistic};
use crate::diagnostics::Diagnostics;
use crate::error::LikelihoodError;
use crate::math::{gamma_p, gamma_q, ln_gamma, normal_quantile, ONE_SIGMA_CONTENT};
use crate::observable_cache::{ObservableCache, ObservableId};
use crate::roots;

const CONTENT_TOLERANCE: f64 = 1e-4;
const DENSITY_TOLERANCE: f64 = 2.5e-2;
const NEARLY_SYMMETRIC: f64 = 1.05;
const MAX_SAMPLE_ATTEMPTS: usize = 1000;

/// Log-gamma density for asymmetric uncertainties.
///
/// With `z = (x - ν) / λ` the log-density is `α z - e^z - ln Γ(α) - ln |λ|`.
/// The shape is fixed such that `[min, max]` holds 68.27% probability and
/// the density is equal at both ends. A negative `λ` mirrors the density, so
/// the longer tail is always on the side of the larger uncertainty.
#[derive(Clone, Debug)]
pub struct LogGammaBlock {
    id: ObservableId,
    measurement: Measurement,
    nu: f64,
    lambda: f64,
    alpha: f64,
    norm: f64,
    gamma: Gamma<f64>,
    number_of_observations: u32,
    diagnostics: Diagnostics,
}

impl LogGammaBlock {
    /// Fit the shape to the measurement.
    pub fn new(
        id: ObservableId,
        measurement: Measurement,
        number_of_observations: u32,
    ) -> Result<Self, LikelihoodError> {
        Self::new_with_diagnostics(id, measurement, number_of_observations, Diagnostics::current())
    }

    /// Like [`LogGammaBlock::new`], reporting construction warnings to
    /// `diagnostics` as well.
    pub fn new_with_diagnostics(
        id: ObservableId,
        measurement: Measurement,
        number_of_observations: u32,
        diagnostics: Diagnostics,
    ) -> Result<Self, LikelihoodError> {
        warn_if_nearly_symmetric(&diagnostics, &measurement);
        let (alpha, lambda) = fit_shape(&measurement)?;
        Self::build(id, measurement, alpha, lambda, number_of_observations, diagnostics)
    }

    /// Use a known shape. It must still describe the measurement.
    pub fn with_shape(
        id: ObservableId,
        measurement: Measurement,
        alpha: f64,
        lambda: f64,
        number_of_observations: u32,
    ) -> Result<Self, LikelihoodError> {
        Self::with_shape_and_diagnostics(
            id,
            measurement,
            alpha,
            lambda,
            number_of_observations,
            Diagnostics::current(),
        )
    }

    pub fn with_shape_and_diagnostics(
        id: ObservableId,
        measurement: Measurement,
        alpha: f64,
        lambda: f64,
        number_of_observations: u32,
        diagnostics: Diagnostics,
    ) -> Result<Self, LikelihoodError> {
        if !(alpha > 0.0) {
            return Err(LikelihoodError::Configuration(format!(
                "shape parameter alpha ({alpha}) must be positive"
            )));
        }
        if lambda == 0.0 || !lambda.is_finite() {
            return Err(LikelihoodError::Configuration(format!(
                "scale parameter lambda ({lambda}) must be finite and non-zero"
            )));
        }
        warn_if_nearly_symmetric(&diagnostics, &measurement);
        Self::build(id, measurement, alpha, lambda, number_of_observations, diagnostics)
    }

    fn build(
        id: ObservableId,
        measurement: Measurement,
        alpha: f64,
        lambda: f64,
        number_of_observations: u32,
        diagnostics: Diagnostics,
    ) -> Result<Self, LikelihoodError> {
        let gamma = Gamma::new(alpha, 1.0)
            .map_err(|err| LikelihoodError::Configuration(format!("alpha = {alpha}: {err}")))?;
        let block = Self {
            id,
            measurement,
            nu: measurement.central() - lambda * alpha.ln(),
            lambda,
            alpha,
            norm: -ln_gamma(alpha) - lambda.abs().ln(),
            gamma,
            number_of_observations,
            diagnostics,
        };

        let content = block.cdf(measurement.max()) - block.cdf(measurement.min());
        if (content - ONE_SIGMA_CONTENT).abs() > CONTENT_TOLERANCE {
            return Err(LikelihoodError::Configuration(format!(
                "the interval [{}, {}] contains {content} instead of approx. 68%",
                measurement.min(),
                measurement.max()
            )));
        }
        let density_gap = (block.log_kernel(measurement.max()) - block.log_kernel(measurement.min())).abs();
        if density_gap > DENSITY_TOLERANCE {
            return Err(LikelihoodError::Configuration(format!(
                "densities at {} and {} differ by {density_gap} on log scale",
                measurement.min(),
                measurement.max()
            )));
        }
        Ok(block)
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn nu(&self) -> f64 {
        self.nu
    }

    fn standardize(&self, x: f64) -> f64 {
        (x - self.nu) / self.lambda
    }

    /// Log-density up to the normalization.
    fn log_kernel(&self, x: f64) -> f64 {
        let z = self.standardize(x);
        self.alpha * z - z.exp()
    }

    pub fn cdf(&self, x: f64) -> f64 {
        let w = self.standardize(x).exp();
        if self.lambda < 0.0 {
            gamma_q(self.alpha, w)
        } else {
            gamma_p(self.alpha, w)
        }
    }

    /// Point on the other side of the mode with the same density as `value`.
    fn mirror(&self, value: f64) -> Result<f64, LikelihoodError> {
        let central = self.measurement.central();
        let zp = self.standardize(value);
        let fdf = |x: f64| {
            let zm = self.standardize(x);
            let f = self.alpha * (zp - zm) - zp.exp() + zm.exp();
            let df = (zm.exp() - self.alpha) / self.lambda;
            (f, df)
        };
        // Iterates must stay strictly on the far side of the mode.
        let side = (value - central).signum();
        let safeguard = |current: f64, proposed: f64| {
            if (proposed - central) * side >= 0.0 || !proposed.is_finite() {
                0.5 * (current + central)
            } else {
                proposed
            }
        };

        roots::newton(fdf, safeguard, 2.0 * central - value).map_err(|err| {
            self.diagnostics.in_scope(|| {
                tracing::error!(value, %err, "could not find the mirror point of the log-gamma density")
            });
            LikelihoodError::Numerical(format!("mirror point of {value}: {err}"))
        })
    }
}

fn warn_if_nearly_symmetric(diagnostics: &Diagnostics, measurement: &Measurement) {
    let (lower, upper) = (measurement.sigma_lower(), measurement.sigma_upper());
    let ratio = lower.max(upper) / lower.min(upper);
    if ratio < NEARLY_SYMMETRIC {
        diagnostics.in_scope(|| {
            tracing::warn!(
                sigma_lower = lower,
                sigma_upper = upper,
                "log-gamma fit for nearly symmetric uncertainties is ill-conditioned, consider a Gaussian block"
            )
        });
    }
}

/// Solve for `(α, λ)` given the measurement.
///
/// Equal densities at `central - σ₋` and `central + σ₊` require, with `u = 1/λ`,
/// `(σ₊ + σ₋) u = e^{σ₊ u} - e^{-σ₋ u}`, whose non-trivial root has the sign
/// of `σ₋ - σ₊`. Given `λ`, `α` follows from the 68% content.
fn fit_shape(measurement: &Measurement) -> Result<(f64, f64), LikelihoodError> {
    let (upper, lower) = (measurement.sigma_upper(), measurement.sigma_lower());
    let numerical = |what: &str, err: roots::RootError| {
        LikelihoodError::Numerical(format!("log-gamma fit of {what}: {err}"))
    };

    let curvature = lower * lower - upper * upper;
    if curvature == 0.0 {
        return Err(LikelihoodError::Configuration(
            "symmetric uncertainties cannot be described by a log-gamma density".to_string(),
        ));
    }
    let equal_density = |u: f64| (upper + lower) * u - (upper * u).exp_m1() + (-lower * u).exp_m1();

    // Close to zero the curvature term dominates, far out the exponentials.
    let guess = 3.0 * curvature / (upper.powi(3) + lower.powi(3));
    let mut near = 0.5 * guess;
    let mut far = 2.0 * guess;
    for _ in 0..64 {
        if equal_density(near).signum() == curvature.signum() {
            break;
        }
        near *= 0.5;
    }
    for _ in 0..64 {
        if equal_density(far).signum() != curvature.signum() {
            break;
        }
        far *= 2.0;
    }
    let u = roots::brent(equal_density, near, far).map_err(|err| numerical("lambda", err))?;

    let log_upper = upper * u;
    let log_lower = -lower * u;
    let content_gap = |ln_alpha: f64| {
        let alpha = ln_alpha.exp();
        (gamma_p(alpha, alpha * log_upper.exp()) - gamma_p(alpha, alpha * log_lower.exp())).abs()
            - ONE_SIGMA_CONTENT
    };
    let mut ln_alpha_max = 10.0;
    while content_gap(ln_alpha_max) < 0.0 {
        ln_alpha_max += 10.0;
        if ln_alpha_max > 50.0 {
            return Err(LikelihoodError::Numerical(
                "log-gamma fit of alpha: no shape holds 68% in the interval".to_string(),
            ));
        }
    }
    let ln_alpha = roots::brent(content_gap, -10.0, ln_alpha_max).map_err(|err| numerical("alpha", err))?;

    Ok((ln_alpha.exp(), u.recip()))
}

impl LogLikelihoodBlock for LogGammaBlock {
    fn as_string(&self) -> String {
        let m = &self.measurement;
        format!(
            "LogGamma: {} + {} - {} (nu = {}, lambda = {}, alpha = {}){}",
            m.central(),
            m.sigma_upper(),
            m.sigma_lower(),
            self.nu,
            self.lambda,
            self.alpha,
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
        Ok(self.norm + self.log_kernel(cache[self.id]))
    }

    fn number_of_observations(&self) -> u32 {
        self.number_of_observations
    }

    // Pseudo measurements within three standard deviations of the central
    // value, each taken as the mode of a shifted density that is then
    // evaluated at the central value.
    fn sample(&self, _cache: &ObservableCache, rng: &mut dyn RngCore) -> Result<f64, LikelihoodError> {
        let central = self.measurement.central();
        let range_min = central - 3.0 * self.measurement.sigma_lower();
        let range_max = central + 3.0 * self.measurement.sigma_upper();

        for _ in 0..MAX_SAMPLE_ATTEMPTS {
            let x = self.lambda * self.gamma.sample(rng).ln() + self.nu;
            if range_min < x && x < range_max {
                let nu_pseudo = x - self.lambda * self.alpha.ln();
                let z = (central - nu_pseudo) / self.lambda;
                return Ok(self.norm + self.alpha * z - z.exp());
            }
        }
        Err(LikelihoodError::Numerical(format!(
            "no pseudo measurement within three standard deviations after {MAX_SAMPLE_ATTEMPTS} draws"
        )))
    }

    fn significance(&self, cache: &ObservableCache) -> Result<f64, LikelihoodError> {
        let value = cache[self.id];
        let central = self.measurement.central();
        if value == central {
            return Ok(0.0);
        }
        let mirror = self.mirror(value)?;
        let p = (self.cdf(value) - self.cdf(mirror)).abs();
        let sigma = normal_quantile(0.5 * (p + 1.0));
        Ok(if central > value { sigma } else { -sigma })
    }

    fn primary_test_statistic(&self, _cache: &ObservableCache) -> Result<TestStatistic, LikelihoodError> {
        Ok(TestStatistic::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::testing::WarningCounter;
    use crate::observable_cache::testing::Fixture;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rand::{rngs::SmallRng, SeedableRng};

    fn measurement() -> Measurement {
        Measurement::new(0.34, 0.53, 0.63).unwrap()
    }

    #[test]
    fn fit_reproduces_known_shapes() {
        let mut fixture = Fixture::default();
        let (_, id) = fixture.observable("mass", 0.53);

        let block = LogGammaBlock::new(id, measurement(), 1).unwrap();
        assert_relative_eq!(block.alpha(), 0.383056, max_relative = 1e-5);
        assert_relative_eq!(block.lambda(), 0.0687907, max_relative = 1e-5);

        // larger uncertainty below the central value flips the sign of lambda
        let block = LogGammaBlock::new(id, Measurement::new(0.1, 0.11, 0.13).unwrap(), 1).unwrap();
        assert_relative_eq!(block.alpha(), 0.338082, max_relative = 1e-5);
        assert_relative_eq!(block.lambda(), -0.00649023, max_relative = 1e-5);
    }

    #[test]
    fn explicit_shape_agrees_with_fit() {
        let mut fixture = Fixture::default();
        let (_, id) = fixture.observable("mass", 0.57);

        let manual = LogGammaBlock::with_shape(id, measurement(), 0.383056, 0.0687907, 1).unwrap();
        let fitted = LogGammaBlock::new(id, measurement(), 1).unwrap();

        assert_relative_eq!(manual.evaluate(&fixture.cache).unwrap(), 1.005543554, max_relative = 5e-4);
        assert_relative_eq!(
            manual.evaluate(&fixture.cache).unwrap(),
            fitted.evaluate(&fixture.cache).unwrap(),
            max_relative = 5e-4
        );
    }

    #[test]
    fn inconsistent_shape_is_rejected() {
        let mut fixture = Fixture::default();
        let (_, id) = fixture.observable("mass", 0.57);
        let err = LogGammaBlock::with_shape(id, measurement(), 2.0, 0.0687907, 1).unwrap_err();
        assert!(matches!(err, LikelihoodError::Configuration(_)));
        assert!(LogGammaBlock::with_shape(id, measurement(), -1.0, 0.1, 1).is_err());
    }

    #[test]
    fn steeper_side_falls_faster() {
        let mut fixture = Fixture::default();
        let (x, id) = fixture.observable("mass", 0.73);
        let block = LogGammaBlock::new(id, measurement(), 1).unwrap();
        let above = block.evaluate(&fixture.cache).unwrap();
        fixture.set(x, 0.33);
        let below = block.evaluate(&fixture.cache).unwrap();
        assert!(above < below);
    }

    #[test]
    fn one_sigma_at_interval_ends() {
        let mut fixture = Fixture::default();
        let (x, id) = fixture.observable("mass", 0.34);
        let block = LogGammaBlock::new(id, measurement(), 1).unwrap();

        let mut target = ObservableCache::new();
        let clone = block.clone_onto(&fixture.cache, &mut target);
        assert_eq!(
            clone.evaluate(&target).unwrap(),
            block.evaluate(&fixture.cache).unwrap()
        );

        assert_relative_eq!(block.significance(&fixture.cache).unwrap(), 1.0, max_relative = 1e-5);
        fixture.set(x, 0.63);
        assert_relative_eq!(block.significance(&fixture.cache).unwrap(), -1.0, max_relative = 1e-5);
        fixture.set(x, 0.53);
        assert_eq!(block.significance(&fixture.cache).unwrap(), 0.0);
    }

    #[test]
    fn nearly_symmetric_input_warns() {
        let mut fixture = Fixture::default();
        let (_, id) = fixture.observable("x", 1.0);
        let counter = WarningCounter::default();

        let block = counter
            .diagnostics()
            .in_scope(|| LogGammaBlock::new(id, Measurement::new(0.98, 1.0, 1.0205).unwrap(), 1));
        assert!(block.is_ok());
        assert_eq!(counter.count(), 1);

        counter
            .diagnostics()
            .in_scope(|| LogGammaBlock::new(id, measurement(), 1))
            .unwrap();
        assert_eq!(counter.count(), 1);

        let symmetric = counter
            .diagnostics()
            .in_scope(|| LogGammaBlock::new(id, Measurement::symmetric(1.0, 0.5).unwrap(), 1));
        assert!(symmetric.is_err());
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn injected_handle_sees_construction_warnings() {
        let mut fixture = Fixture::default();
        let (_, id) = fixture.observable("x", 1.0);
        let counter = WarningCounter::default();
        let nearly_symmetric = Measurement::new(0.98, 1.0, 1.0205).unwrap();

        let fitted =
            LogGammaBlock::new_with_diagnostics(id, nearly_symmetric, 1, counter.diagnostics()).unwrap();
        assert_eq!(counter.count(), 1);

        LogGammaBlock::with_shape_and_diagnostics(
            id,
            nearly_symmetric,
            fitted.alpha(),
            fitted.lambda(),
            1,
            counter.diagnostics(),
        )
        .unwrap();
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn pseudo_measurements_stay_in_range() {
        let mut fixture = Fixture::default();
        let (_, id) = fixture.observable("mass", 4.3);
        let block = LogGammaBlock::new(id, Measurement::new(4.195, 4.3, 4.4).unwrap(), 1).unwrap();
        let at_central = block.evaluate(&fixture.cache).unwrap();

        let mut rng = SmallRng::seed_from_u64(2022);
        for _ in 0..1000 {
            let value = block.sample(&fixture.cache, &mut rng).unwrap();
            assert!(value.is_finite());
            assert!(value <= at_central + 1e-12);
        }
    }

    proptest! {
        #[test]
        fn cdf_matches_content(lower in 0.05f64..1.0, ratio in 1.2f64..3.0, flip in proptest::bool::ANY) {
            let (sigma_lower, sigma_upper) = if flip { (lower * ratio, lower) } else { (lower, lower * ratio) };
            let m = Measurement::new(-sigma_lower, 0.0, sigma_upper).unwrap();
            let mut fixture = Fixture::default();
            let (_, id) = fixture.observable("x", 0.0);
            let block = Diagnostics::silent().in_scope(|| LogGammaBlock::new(id, m, 1)).unwrap();
            let content = block.cdf(m.max()) - block.cdf(m.min());
            prop_assert!((content - ONE_SIGMA_CONTENT).abs() < 1e-4);
            prop_assert_eq!(block.cdf(f64::INFINITY), 1.0);
            prop_assert_eq!(block.cdf(f64::NEG_INFINITY), 0.0);
        }
    }
}
