use std::f64::consts::PI;

use rand::{Rng, RngCore};

use super::{no_observation_suffix, LogLikelihoodBlock, Measurement, TestStatistic};
use crate::error::LikelihoodError;
use crate::math::normal_quantile;
use crate::observable_cache::{ObservableCache, ObservableId};

/// Gaussian density with possibly different widths below and above the mode.
///
/// The density is
/// `P(y|x) = c_a N(y|x, a) θ(y - x) + c_b N(y|x, b) θ(x - y)` with
/// `c_a = 2a / (a + b)` and `c_b = 2b / (a + b)`, which keeps the
/// distribution function continuous at the mode and normalized.
#[derive(Clone, Debug)]
pub struct GaussianBlock {
    id: ObservableId,
    measurement: Measurement,
    c_upper: f64,
    c_lower: f64,
    norm: f64,
    number_of_observations: u32,
}

impl GaussianBlock {
    pub fn new(id: ObservableId, measurement: Measurement, number_of_observations: u32) -> Self {
        let sigma_lower = measurement.sigma_lower();
        let sigma_upper = measurement.sigma_upper();
        Self {
            id,
            measurement,
            c_upper: 2.0 * sigma_upper / (sigma_upper + sigma_lower),
            c_lower: 2.0 * sigma_lower / (sigma_upper + sigma_lower),
            norm: ((2.0 / PI).sqrt() / (sigma_upper + sigma_lower)).ln(),
            number_of_observations,
        }
    }

    pub fn id(&self) -> ObservableId {
        self.id
    }

    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    fn sigma_at(&self, value: f64) -> f64 {
        if value > self.measurement.central() {
            self.measurement.sigma_upper()
        } else {
            self.measurement.sigma_lower()
        }
    }
}

impl LogLikelihoodBlock for GaussianBlock {
    fn as_string(&self) -> String {
        let m = &self.measurement;
        let uncertainty = if m.sigma_upper() == m.sigma_lower() {
            format!(" +- {}", m.sigma_upper())
        } else {
            format!(" + {} - {}", m.sigma_upper(), m.sigma_lower())
        };
        format!(
            "Gaussian: {}{}{}",
            m.central(),
            uncertainty,
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
        let value = cache[self.id];
        let chi = (value - self.measurement.central()) / self.sigma_at(value);
        Ok(self.norm - 0.5 * chi * chi)
    }

    fn number_of_observations(&self) -> u32 {
        self.number_of_observations
    }

    // The measured distribution is mirrored and shifted onto the prediction:
    // pseudo data are generated around the fixed prediction with the
    // measurement's widths swapped, and compared with that prediction.
    fn sample(&self, cache: &ObservableCache, rng: &mut dyn RngCore) -> Result<f64, LikelihoodError> {
        let theory = cache[self.id];
        let a = self.measurement.sigma_lower();
        let b = self.measurement.sigma_upper();
        let u: f64 = rng.random();

        let split = b / (a + b);
        let (observed, sigma) = if u < split {
            (theory + b * normal_quantile(u / self.c_upper), b)
        } else {
            (theory + a * normal_quantile(0.5 + (u - split) / self.c_lower), a)
        };

        let chi = (theory - observed) / sigma;
        Ok(self.norm - 0.5 * chi * chi)
    }

    fn significance(&self, cache: &ObservableCache) -> Result<f64, LikelihoodError> {
        let value = cache[self.id];
        Ok((self.measurement.central() - value) / self.sigma_at(value))
    }

    fn primary_test_statistic(&self, cache: &ObservableCache) -> Result<TestStatistic, LikelihoodError> {
        let chi = self.significance(cache)?;
        Ok(TestStatistic::ChiSquare {
            value: chi * chi,
            degrees_of_freedom: 1,
            significance: Some(chi),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable_cache::testing::Fixture;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn asymmetric_significance() {
        let mut fixture = Fixture::default();
        let (x, id) = fixture.observable("x", 1.3);
        let block = GaussianBlock::new(id, Measurement::new(0.8, 1.0, 1.3).unwrap(), 1);

        assert_eq!(block.significance(&fixture.cache).unwrap(), -1.0);

        fixture.set(x, 0.6);
        assert_abs_diff_eq!(block.significance(&fixture.cache).unwrap(), 2.0, epsilon = 1e-12);
        match block.primary_test_statistic(&fixture.cache).unwrap() {
            TestStatistic::ChiSquare {
                value,
                degrees_of_freedom,
                significance,
            } => {
                assert_abs_diff_eq!(value, 4.0, epsilon = 1e-10);
                assert_eq!(degrees_of_freedom, 1);
                assert_abs_diff_eq!(significance.unwrap(), 2.0, epsilon = 1e-12);
            }
            TestStatistic::Empty => panic!("expected a chi-square statistic"),
        }
    }

    #[test]
    fn evaluate_uses_side_dependent_width() {
        let mut fixture = Fixture::default();
        let (x, id) = fixture.observable("x", 1.0);
        let block = GaussianBlock::new(id, Measurement::new(0.8, 1.0, 1.3).unwrap(), 1);
        let at_mode = block.evaluate(&fixture.cache).unwrap();
        assert_abs_diff_eq!(at_mode, ((2.0 / PI).sqrt() / 0.5).ln(), epsilon = 1e-14);

        fixture.set(x, 1.3);
        let upper = block.evaluate(&fixture.cache).unwrap();
        fixture.set(x, 0.8);
        let lower = block.evaluate(&fixture.cache).unwrap();
        assert_abs_diff_eq!(upper, at_mode - 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(lower, at_mode - 0.5, epsilon = 1e-12);
    }

    #[test]
    fn as_string_formats() {
        let mut fixture = Fixture::default();
        let (_, id) = fixture.observable("x", 1.0);
        let symmetric = GaussianBlock::new(id, Measurement::symmetric(1.0, 0.5).unwrap(), 0);
        assert_eq!(symmetric.as_string(), "Gaussian: 1 +- 0.5; no observation");
        let asymmetric = GaussianBlock::new(id, Measurement::new(0.5, 1.0, 2.0).unwrap(), 1);
        assert_eq!(asymmetric.as_string(), "Gaussian: 1 + 1 - 0.5");
    }

    #[test]
    fn clone_reproduces_evaluate() {
        let mut fixture = Fixture::default();
        fixture.observable("other", 3.0);
        let (_, id) = fixture.observable("x", 1.17);
        let block = GaussianBlock::new(id, Measurement::new(0.8, 1.0, 1.3).unwrap(), 1);

        let mut target = ObservableCache::new();
        let clone = block.clone_onto(&fixture.cache, &mut target);
        assert_eq!(
            clone.evaluate(&target).unwrap(),
            block.evaluate(&fixture.cache).unwrap()
        );
    }

    #[test]
    fn sampled_chi_square_has_unit_mean() {
        let mut fixture = Fixture::default();
        let (_, id) = fixture.observable("x", 0.3);
        let block = GaussianBlock::new(id, Measurement::new(0.5, 1.0, 2.0).unwrap(), 1);
        let norm = ((2.0 / PI).sqrt() / 1.5).ln();

        let mut rng = SmallRng::seed_from_u64(42);
        let n = 20_000;
        let mean: f64 = (0..n)
            .map(|_| -2.0 * (block.sample(&fixture.cache, &mut rng).unwrap() - norm))
            .sum::<f64>()
            / n as f64;
        assert_abs_diff_eq!(mean, 1.0, epsilon = 0.05);
    }

    proptest! {
        #[test]
        fn symmetric_peak_at_central(central in -10f64..10f64, sigma in 0.01f64..5f64, a in 0f64..3f64, b in 0f64..3f64) {
            let mut fixture = Fixture::default();
            let (x, id) = fixture.observable("x", central);
            let block = GaussianBlock::new(id, Measurement::symmetric(central, sigma).unwrap(), 1);
            let peak = block.evaluate(&fixture.cache).unwrap();

            let (near, far) = if a < b { (a, b) } else { (b, a) };
            prop_assume!(far - near > 1e-3);
            fixture.set(x, central + near * sigma);
            let near_value = block.evaluate(&fixture.cache).unwrap();
            fixture.set(x, central - far * sigma);
            let far_value = block.evaluate(&fixture.cache).unwrap();

            prop_assert!(near_value <= peak);
            prop_assert!(far_value < near_value);
        }
    }
}
