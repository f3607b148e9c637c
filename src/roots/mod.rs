//! Secant-method root finding
//!
//! Used to calibrate launch positions and field angles, where each function
//! evaluation is a ray trace. The iteration is vectorized: every element of
//! the input array is an independent root search sharing one convergence
//! test.

use ndarray::{Array1, Zip};

use crate::constants::{ROOT_MAX_ABS_ERROR, ROOT_MAX_ITERATIONS};
use crate::{RayfieldError, Result};

/// Convergence and iteration limits for [`find_root`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecantOptions {
    pub max_abs_error: f64,
    pub max_iterations: usize,
}

impl Default for SecantOptions {
    fn default() -> Self {
        SecantOptions {
            max_abs_error: ROOT_MAX_ABS_ERROR,
            max_iterations: ROOT_MAX_ITERATIONS,
        }
    }
}

/// Finds roots of `func` near `guess` with the secant method
///
/// The two starting points are `guess - step` and `guess + step`. The search
/// stops once every `|f(x1) - f(x0)|` is below `max_abs_error` (NaN
/// differences are ignored). Where two successive evaluations are exactly
/// equal the most recent estimate is kept instead of dividing by zero.
///
/// # Errors
///
/// [`RayfieldError::MaxIterationsExceeded`] after `max_iterations` passes
/// without converging (each pass evaluates `func` twice), or whatever error
/// `func` returns.
pub fn find_root<F>(
    mut func: F,
    guess: &Array1<f64>,
    step: &Array1<f64>,
    options: SecantOptions,
) -> Result<Array1<f64>>
where
    F: FnMut(&Array1<f64>) -> Result<Array1<f64>>,
{
    if guess.len() != step.len() {
        return Err(RayfieldError::ShapeMismatch(format!(
            "guess has {} elements but step has {}",
            guess.len(),
            step.len()
        )));
    }

    let mut x0 = guess - step;
    let mut x1 = guess + step;

    let mut i = 0;
    loop {
        if i >= options.max_iterations {
            return Err(RayfieldError::MaxIterationsExceeded(options.max_iterations));
        }
        i += 1;

        let f0 = func(&x0)?;
        let f1 = func(&x1)?;
        let df = &f1 - &f0;

        let max_df = df
            .iter()
            .filter(|d| !d.is_nan())
            .fold(0.0_f64, |acc, d| acc.max(d.abs()));
        if max_df < options.max_abs_error {
            break;
        }

        let mut x2 = Array1::<f64>::zeros(x1.len());
        Zip::from(&mut x2)
            .and(&x0)
            .and(&x1)
            .and(&f0)
            .and(&f1)
            .for_each(|x2, &a, &b, &fa, &fb| {
                let d = fb - fa;
                *x2 = if d == 0.0 { b } else { (a * fb - b * fa) / d };
            });

        x0 = x1;
        x1 = x2;
    }

    log::debug!("secant search converged after {} iterations", i);
    Ok(x1)
}

/// Scalar convenience wrapper around [`find_root`]
pub fn find_root_scalar<F>(mut func: F, guess: f64, step: f64, options: SecantOptions) -> Result<f64>
where
    F: FnMut(f64) -> Result<f64>,
{
    let root = find_root(
        |x| Ok(Array1::from_elem(1, func(x[0])?)),
        &Array1::from_elem(1, guess),
        &Array1::from_elem(1, step),
        options,
    )?;
    Ok(root[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_linear_root() {
        let root = find_root_scalar(|x| Ok(3.0 * x - 6.0), 0.0, 1.0, SecantOptions::default()).unwrap();
        assert_abs_diff_eq!(root, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_quadratic_root() {
        let root = find_root_scalar(|x| Ok(x * x - 2.0), 1.0, 0.1, SecantOptions::default()).unwrap();
        assert_abs_diff_eq!(root, 2.0_f64.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_vectorized_roots() {
        let targets = array![1.0, -4.0, 9.0];
        let root = find_root(
            |x| Ok(x - &targets),
            &array![0.0, 0.0, 0.0],
            &array![1.0, 1.0, 1.0],
            SecantOptions::default(),
        )
        .unwrap();
        for (r, t) in root.iter().zip(targets.iter()) {
            assert_abs_diff_eq!(*r, *t, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_flat_function_keeps_estimate() {
        // f is constant, so the differences are zero on the first pass
        let root = find_root_scalar(|_| Ok(5.0), 3.0, 1.0, SecantOptions::default()).unwrap();
        assert_eq!(root, 4.0);
    }

    #[test]
    fn test_max_iterations_exceeded() {
        let options = SecantOptions {
            max_abs_error: 1e-9,
            max_iterations: 5,
        };
        // No real root: the secant iterates wander without converging
        let result = find_root_scalar(|x| Ok(x * x + 1.0), 0.5, 0.25, options);
        assert!(matches!(result, Err(RayfieldError::MaxIterationsExceeded(5))));
    }

    #[test]
    fn test_iteration_budget_is_exact() {
        let options = SecantOptions {
            max_abs_error: 1e-9,
            max_iterations: 4,
        };
        // Successive evaluations always differ by 1
        let mut calls = 0usize;
        let result = find_root_scalar(
            |_| {
                calls += 1;
                Ok(calls as f64)
            },
            0.0,
            1.0,
            options,
        );
        assert!(matches!(result, Err(RayfieldError::MaxIterationsExceeded(4))));
        assert_eq!(calls, 2 * 4);
    }

    #[test]
    fn test_shape_mismatch() {
        let result = find_root(
            |x| Ok(x.clone()),
            &array![0.0, 1.0],
            &array![1.0],
            SecantOptions::default(),
        );
        assert!(result.is_err());
    }
}
