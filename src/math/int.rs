//! Integer helpers: day bucketing, checked reserve arithmetic and the
//! integer n-th root used for the liquidity parameter.

use num_bigint::{BigInt, BigUint};
use num_integer::Integer;
use num_traits::{One, Signed, Zero};

use crate::errors::{ProjectionError, ProjectionResult};

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Default bound on Newton steps.
pub const DEFAULT_MAX_ROOT_ITERATIONS: u32 = 100_000;

pub fn day_index(timestamp: u64) -> u64 {
    timestamp / SECONDS_PER_DAY
}

pub fn product(values: &[BigUint]) -> BigUint {
    values.iter().fold(BigUint::one(), |acc, v| acc * v)
}

pub fn sum(values: &[BigUint]) -> BigUint {
    values.iter().fold(BigUint::zero(), |acc, v| acc + v)
}

/// `a - b`, or `None` when it would go below zero.
pub fn checked_sub(a: &BigUint, b: &BigUint) -> Option<BigUint> {
    if b > a {
        None
    } else {
        Some(a - b)
    }
}

/// `a - b` clamped at zero.
pub fn saturating_sub(a: &BigUint, b: &BigUint) -> BigUint {
    checked_sub(a, b).unwrap_or_else(BigUint::zero)
}

/// Floor n-th root by Newton iteration on integers.
///
/// Starts at `2^ceil(bits(x) / n)`, which is never below the root, and steps
/// `root += floor((x / root^(n-1) - root) / n)` while the step is negative.
/// The first non-negative step means `root` is already the floor root, so it
/// is returned without applying that step.
pub fn nth_root(x: &BigUint, n: u32, max_iterations: u32) -> ProjectionResult<BigUint> {
    if n == 0 {
        return Err(ProjectionError::NumericDivergence(
            "zeroth root is undefined".to_string(),
        ));
    }
    if x.is_zero() {
        return Ok(BigUint::zero());
    }
    if n == 1 {
        return Ok(x.clone());
    }

    let shift = x.bits().div_ceil(u64::from(n));
    let mut root = BigInt::one() << shift;
    let x = BigInt::from(x.clone());
    let n_big = BigInt::from(n);

    for _ in 0..max_iterations {
        let pow = num_traits::pow(root.clone(), (n - 1) as usize);
        let delta = ((&x / &pow) - &root).div_floor(&n_big);
        if !delta.is_negative() {
            return root.to_biguint().ok_or_else(|| {
                ProjectionError::NumericDivergence("root went negative".to_string())
            });
        }
        root += delta;
        if !root.is_positive() {
            return Err(ProjectionError::NumericDivergence(format!(
                "root iteration left the positive domain for n={n}"
            )));
        }
    }

    Err(ProjectionError::NumericDivergence(format!(
        "n-th root (n={n}) did not converge within {max_iterations} iterations"
    )))
}
