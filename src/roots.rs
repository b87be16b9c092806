//! One-dimensional root finders used by the significance computations.

use thiserror::Error;

pub(crate) const MAX_ITERATIONS: usize = 400;

/// Relative tolerance on the iterate.
pub(crate) const TOLERANCE: f64 = 1e-7;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub(crate) enum RootError {
    #[error("root is not bracketed by [{lower}, {upper}]")]
    NotBracketed { lower: f64, upper: f64 },
    #[error("no convergence after {iterations} iterations, last iterate {last}")]
    NoConvergence { iterations: usize, last: f64 },
    #[error("vanishing derivative at {0}")]
    ZeroDerivative(f64),
}

fn converged(previous: f64, next: f64) -> bool {
    (next - previous).abs() <= TOLERANCE * next.abs()
}

/// Newton iteration on `fdf(x) = (f(x), f'(x))`.
///
/// Every proposed iterate is passed through `safeguard(current, proposed)`,
/// which may pull it back into the admissible region.
pub(crate) fn newton(
    mut fdf: impl FnMut(f64) -> (f64, f64),
    safeguard: impl Fn(f64, f64) -> f64,
    start: f64,
) -> Result<f64, RootError> {
    let mut x = start;
    for _ in 0..MAX_ITERATIONS {
        let (f, df) = fdf(x);
        if f == 0.0 {
            return Ok(x);
        }
        if df == 0.0 || !df.is_finite() {
            return Err(RootError::ZeroDerivative(x));
        }
        let next = safeguard(x, x - f / df);
        if converged(x, next) {
            return Ok(next);
        }
        x = next;
    }
    Err(RootError::NoConvergence {
        iterations: MAX_ITERATIONS,
        last: x,
    })
}

/// Brent-Dekker bracketed root search on `[lower, upper]`.
pub(crate) fn brent(mut f: impl FnMut(f64) -> f64, lower: f64, upper: f64) -> Result<f64, RootError> {
    let (mut a, mut b) = (lower, upper);
    let (mut fa, mut fb) = (f(a), f(b));

    if fa == 0.0 {
        return Ok(a);
    }
    if fb == 0.0 {
        return Ok(b);
    }
    if fa.is_nan() || fb.is_nan() || fa.signum() == fb.signum() {
        return Err(RootError::NotBracketed { lower, upper });
    }

    let (mut c, mut fc) = (b, fb);
    let (mut d, mut e) = (b - a, b - a);

    for _ in 0..MAX_ITERATIONS {
        if fb.signum() == fc.signum() {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol = 2.0 * f64::EPSILON * b.abs() + 0.5 * (TOLERANCE * b.abs()).max(1e-15);
        let m = 0.5 * (c - b);
        if fb == 0.0 || m.abs() <= tol {
            return Ok(b);
        }

        if e.abs() < tol || fa.abs() <= fb.abs() {
            d = m;
            e = m;
        } else {
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * m * s, 1.0 - s)
            } else {
                let q = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * m * q * (q - r) - (b - a) * (r - 1.0)),
                    (q - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            } else {
                p = -p;
            }
            let bound = (3.0 * m * q - (tol * q).abs()).min((e * q).abs());
            if 2.0 * p < bound {
                e = d;
                d = p / q;
            } else {
                d = m;
                e = m;
            }
        }

        a = b;
        fa = fb;
        b += if d.abs() > tol { d } else { tol.copysign(m) };
        fb = f(b);
    }

    Err(RootError::NoConvergence {
        iterations: MAX_ITERATIONS,
        last: b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn brent_finds_cube_root() {
        let root = brent(|x| x * x * x - 2.0, 0.0, 4.0).unwrap();
        assert_relative_eq!(root, 2f64.cbrt(), max_relative = 1e-6);
    }

    #[test]
    fn brent_requires_bracket() {
        let err = brent(|x| x * x + 1.0, -1.0, 1.0).unwrap_err();
        assert_eq!(err, RootError::NotBracketed { lower: -1.0, upper: 1.0 });
    }

    #[test]
    fn newton_respects_safeguard() {
        // Without the guard the first step from 10 overshoots below zero.
        let root = newton(
            |x| (x.ln(), x.recip()),
            |current, proposed| if proposed <= 0.0 { 0.5 * current } else { proposed },
            10.0,
        )
        .unwrap();
        assert_relative_eq!(root, 1.0, max_relative = 1e-7);
    }

    #[test]
    fn newton_reports_flat_function() {
        let err = newton(|_| (1.0, 0.0), |_, x| x, 3.0).unwrap_err();
        assert_eq!(err, RootError::ZeroDerivative(3.0));
    }
}
