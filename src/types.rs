//! Shared numeric types for chance-constrained loads.
//!
//! `BinLoad` is the incrementally maintained aggregate state of a bin. It is the
//! only thing the feasibility oracle needs to know about a bin.

use std::ops::{Add, AddAssign};

use serde::Serialize;
use utoipa::ToSchema;

/// Tolerance used when verifying loads after the fact (tests, diagnostics).
///
/// The feasibility decision itself never applies a tolerance.
pub const LOAD_TOLERANCE: f64 = 1e-9;

/// Additive guard in relative gap denominators.
pub const GAP_EPSILON: f64 = 1e-6;

/// Aggregate nominal demand and spread of a set of items.
///
/// # Examples
/// ```
/// use chance_pack::types::BinLoad;
///
/// let load = BinLoad::new(4.0, 1.0) + BinLoad::new(4.0, 1.0);
/// assert!((load.chance_load(1.0) - (8.0 + 2f64.sqrt())).abs() < 1e-12);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct BinLoad {
    pub sum_mu: f64,
    pub sum_b: f64,
}

impl BinLoad {
    #[inline]
    pub const fn new(sum_mu: f64, sum_b: f64) -> Self {
        Self { sum_mu, sum_b }
    }

    /// Empty bin.
    #[inline]
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Chance-constrained load `sum_mu + dalpha * sqrt(sum_b)`.
    #[inline]
    pub fn chance_load(&self, dalpha: f64) -> f64 {
        self.sum_mu + dalpha * self.sum_b.sqrt()
    }

    /// Remaining capacity under the chance constraint (negative when overloaded).
    #[inline]
    pub fn slack(&self, dalpha: f64, capacity: f64) -> f64 {
        capacity - self.chance_load(dalpha)
    }

    /// Whether the load respects `capacity` up to `tolerance`.
    #[inline]
    pub fn within(&self, dalpha: f64, capacity: f64, tolerance: f64) -> bool {
        self.chance_load(dalpha) <= capacity + tolerance
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sum_mu == 0.0 && self.sum_b == 0.0
    }
}

impl Add for BinLoad {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.sum_mu + rhs.sum_mu, self.sum_b + rhs.sum_b)
    }
}

impl AddAssign for BinLoad {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.sum_mu += rhs.sum_mu;
        self.sum_b += rhs.sum_b;
    }
}

impl From<(f64, f64)> for BinLoad {
    #[inline]
    fn from(tuple: (f64, f64)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

/// Validation helpers shared by the data model and the reader.
pub mod validation {
    /// Validates a strictly positive finite value.
    pub fn validate_positive(value: f64, name: &str) -> Result<(), String> {
        if value.is_nan() {
            return Err(format!("{} must not be NaN", name));
        }
        if value.is_infinite() {
            return Err(format!("{} must not be infinite", name));
        }
        if value <= 0.0 {
            return Err(format!("{} must be positive, got: {}", name, value));
        }
        Ok(())
    }

    /// Validates a non-negative finite value.
    pub fn validate_non_negative(value: f64, name: &str) -> Result<(), String> {
        if value.is_nan() {
            return Err(format!("{} must not be NaN", name));
        }
        if value.is_infinite() {
            return Err(format!("{} must not be infinite", name));
        }
        if value < 0.0 {
            return Err(format!("{} must not be negative, got: {}", name, value));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_load_accumulates() {
        let mut load = BinLoad::zero();
        assert!(load.is_empty());
        load += BinLoad::new(4.0, 1.0);
        load += BinLoad::new(3.0, 3.0);
        assert_eq!(load, BinLoad::new(7.0, 4.0));
        assert!((load.chance_load(0.5) - 8.0).abs() < LOAD_TOLERANCE);
    }

    #[test]
    fn test_bin_load_slack_and_within() {
        let load = BinLoad::new(8.0, 4.0);
        assert!((load.slack(1.0, 10.0) - 0.0).abs() < LOAD_TOLERANCE);
        assert!(load.within(1.0, 10.0, 0.0));
        assert!(!load.within(1.5, 10.0, LOAD_TOLERANCE));
    }

    #[test]
    fn test_validation_positive() {
        assert!(validation::validate_positive(1.0, "Capacity").is_ok());
        assert!(validation::validate_positive(0.0, "Capacity").is_err());
        assert!(validation::validate_positive(-1.0, "Capacity").is_err());
        assert!(validation::validate_positive(f64::NAN, "Capacity").is_err());
        assert!(validation::validate_positive(f64::INFINITY, "Capacity").is_err());
    }

    #[test]
    fn test_validation_non_negative() {
        assert!(validation::validate_non_negative(0.0, "Spread").is_ok());
        assert!(validation::validate_non_negative(-0.5, "Spread").is_err());
        assert!(validation::validate_non_negative(f64::NAN, "Spread").is_err());
    }
}
