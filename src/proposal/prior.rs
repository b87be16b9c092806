use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::ProposalError;
use crate::math::{normal_cdf, normal_quantile, LN_2PI};

/// One-dimensional density on a finite range, used as an independence
/// proposal for a single coordinate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MarginalPrior {
    Flat {
        min: f64,
        max: f64,
    },
    /// Gaussian with widths `central - lower` and `upper - central` on
    /// either side of the mode, truncated to `[min, max]`.
    Gaussian {
        min: f64,
        max: f64,
        lower: f64,
        central: f64,
        upper: f64,
    },
}

impl MarginalPrior {
    pub fn flat(min: f64, max: f64) -> Result<Self, ProposalError> {
        let prior = Self::Flat { min, max };
        prior.validate()?;
        Ok(prior)
    }

    pub fn gaussian(min: f64, max: f64, lower: f64, central: f64, upper: f64) -> Result<Self, ProposalError> {
        let prior = Self::Gaussian {
            min,
            max,
            lower,
            central,
            upper,
        };
        prior.validate()?;
        Ok(prior)
    }

    /// Check a prior that was deserialized rather than built by a constructor.
    pub fn validate(&self) -> Result<(), ProposalError> {
        let (min, max) = self.range();
        if !(min < max && min.is_finite() && max.is_finite()) {
            return Err(ProposalError::Configuration(format!(
                "prior range [{min}, {max}] is empty or unbounded"
            )));
        }
        if let Self::Gaussian {
            lower,
            central,
            upper,
            ..
        } = *self
        {
            if !(lower < central && central < upper) {
                return Err(ProposalError::Configuration(format!(
                    "Gaussian prior needs lower < central < upper, found ({lower}, {central}, {upper})"
                )));
            }
        }
        Ok(())
    }

    pub fn range(&self) -> (f64, f64) {
        match *self {
            Self::Flat { min, max } | Self::Gaussian { min, max, .. } => (min, max),
        }
    }

    /// Log-density at `x`, `-inf` outside the range.
    pub fn evaluate(&self, x: f64) -> f64 {
        let (min, max) = self.range();
        if !(min..=max).contains(&x) {
            return f64::NEG_INFINITY;
        }
        match *self {
            Self::Flat { min, max } => -(max - min).ln(),
            Self::Gaussian {
                lower,
                central,
                upper,
                ..
            } => {
                let shape = AsymmetricNormal::new(lower, central, upper);
                let chi = (x - central) / shape.sigma_at(x);
                let content = shape.cdf(max) - shape.cdf(min);
                (2.0 / (shape.sigma_lower + shape.sigma_upper)).ln() - 0.5 * LN_2PI - 0.5 * chi * chi
                    - content.ln()
            }
        }
    }

    /// Draw by inverting the distribution function.
    pub fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        let u: f64 = rng.random();
        match *self {
            Self::Flat { min, max } => min + u * (max - min),
            Self::Gaussian {
                min,
                max,
                lower,
                central,
                upper,
            } => {
                let shape = AsymmetricNormal::new(lower, central, upper);
                let (cdf_min, cdf_max) = (shape.cdf(min), shape.cdf(max));
                shape.quantile(cdf_min + u * (cdf_max - cdf_min)).clamp(min, max)
            }
        }
    }

    pub fn as_string(&self) -> String {
        match *self {
            Self::Flat { min, max } => format!("flat prior on [{min}, {max}]"),
            Self::Gaussian {
                min,
                max,
                lower,
                central,
                upper,
            } => {
                let shape = AsymmetricNormal::new(lower, central, upper);
                let width = if (shape.sigma_upper - shape.sigma_lower).abs() < 1e-15 {
                    format!(" +- {}", shape.sigma_upper)
                } else {
                    format!(" + {} - {}", shape.sigma_upper, shape.sigma_lower)
                };
                format!("Gaussian prior on [{min}, {max}], x = {central}{width}")
            }
        }
    }
}

/// Untruncated asymmetric Gaussian, continuous at the mode.
struct AsymmetricNormal {
    central: f64,
    sigma_lower: f64,
    sigma_upper: f64,
}

impl AsymmetricNormal {
    fn new(lower: f64, central: f64, upper: f64) -> Self {
        Self {
            central,
            sigma_lower: central - lower,
            sigma_upper: upper - central,
        }
    }

    fn sigma_at(&self, x: f64) -> f64 {
        if x < self.central {
            self.sigma_lower
        } else {
            self.sigma_upper
        }
    }

    /// Probability mass below the mode.
    fn lower_mass(&self) -> f64 {
        self.sigma_lower / (self.sigma_lower + self.sigma_upper)
    }

    fn cdf(&self, x: f64) -> f64 {
        let total = self.sigma_lower + self.sigma_upper;
        if x < self.central {
            2.0 * self.sigma_lower / total * normal_cdf((x - self.central) / self.sigma_lower)
        } else {
            self.lower_mass()
                + 2.0 * self.sigma_upper / total * (normal_cdf((x - self.central) / self.sigma_upper) - 0.5)
        }
    }

    fn quantile(&self, p: f64) -> f64 {
        let total = self.sigma_lower + self.sigma_upper;
        if p < self.lower_mass() {
            self.central + self.sigma_lower * normal_quantile(p * total / (2.0 * self.sigma_lower))
        } else {
            let rest = (p - self.lower_mass()) * total / (2.0 * self.sigma_upper);
            self.central + self.sigma_upper * normal_quantile(0.5 + rest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn flat_prior() {
        let prior = MarginalPrior::flat(-1.0, 3.0).unwrap();
        assert_eq!(prior.evaluate(0.5), -(4f64.ln()));
        assert_eq!(prior.evaluate(3.5), f64::NEG_INFINITY);
        assert_eq!(prior.as_string(), "flat prior on [-1, 3]");

        let mut rng = SmallRng::seed_from_u64(11);
        for _ in 0..100 {
            let x = prior.sample(&mut rng);
            assert!((-1.0..=3.0).contains(&x));
        }
        assert!(MarginalPrior::flat(1.0, 1.0).is_err());
    }

    #[test]
    fn wide_gaussian_matches_normal_density() {
        let prior = MarginalPrior::gaussian(-100.0, 100.0, 1.0, 2.0, 3.0).unwrap();
        let expected = -0.5 * LN_2PI - 0.5 * 0.25;
        assert_relative_eq!(prior.evaluate(2.5), expected, max_relative = 1e-12);
        assert_eq!(prior.as_string(), "Gaussian prior on [-100, 100], x = 2 +- 1");
    }

    #[test]
    fn truncated_gaussian_is_normalized() {
        let prior = MarginalPrior::gaussian(0.0, 1.5, 0.5, 1.0, 1.3).unwrap();
        let steps = 20_000;
        let width = 1.5 / steps as f64;
        let integral: f64 = (0..steps)
            .map(|i| prior.evaluate((i as f64 + 0.5) * width).exp() * width)
            .sum();
        assert_relative_eq!(integral, 1.0, max_relative = 1e-6);
    }

    #[test]
    fn samples_follow_the_truncated_shape() {
        let prior = MarginalPrior::gaussian(0.0, 1.5, 0.5, 1.0, 1.3).unwrap();
        let shape = AsymmetricNormal::new(0.5, 1.0, 1.3);
        let below_mode = (shape.cdf(1.0) - shape.cdf(0.0)) / (shape.cdf(1.5) - shape.cdf(0.0));

        let mut rng = SmallRng::seed_from_u64(5);
        let n = 50_000;
        let mut count = 0;
        for _ in 0..n {
            let x = prior.sample(&mut rng);
            assert!((0.0..=1.5).contains(&x));
            if x < 1.0 {
                count += 1;
            }
        }
        assert_relative_eq!(count as f64 / n as f64, below_mode, max_relative = 2e-2);
    }

    #[test]
    fn serialized_form_is_tagged() {
        let prior = MarginalPrior::gaussian(0.0, 1.5, 0.5, 1.0, 1.3).unwrap();
        let json = serde_json::to_string(&prior).unwrap();
        assert!(json.contains("\"type\":\"gaussian\""));
        assert_eq!(serde_json::from_str::<MarginalPrior>(&json).unwrap(), prior);
        assert!(MarginalPrior::gaussian(0.0, 1.5, 1.0, 1.0, 1.3).is_err());
    }
}
