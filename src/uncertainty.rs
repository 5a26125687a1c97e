//! Uncertainty model: maps an uncertainty case and a confidence level to the
//! chance-constraint risk multiplier `Dalpha` and per-item spreads `b_i`.
//!
//! All three cases share the form `b_i = (width_i * base_i)^2`; they differ in the
//! multiplier and in which item parameter provides `width_i`:
//! - Gaussian: `width = sigma`, `Dalpha = Phi^{-1}(alpha)`
//! - Hoeffding: `width = A_ub - A_lb`, `Dalpha = sqrt(-ln(1 - alpha) / 2)`
//! - Distributionally robust: `width = sigma`, `Dalpha = sqrt(alpha / (1 - alpha))`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ChancePackError, Result};
use crate::types::validation;

/// Closed set of supported uncertainty cases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyCase {
    Gaussian,
    Hoeffding,
    DistributionallyRobust,
}

impl UncertaintyCase {
    /// Single-letter tag used in instance descriptors.
    pub fn tag(&self) -> &'static str {
        match self {
            UncertaintyCase::Gaussian => "g",
            UncertaintyCase::Hoeffding => "h",
            UncertaintyCase::DistributionallyRobust => "d",
        }
    }

    /// Risk multiplier for confidence level `alpha` in the open interval (0, 1).
    pub fn risk_multiplier(&self, alpha: f64) -> Result<f64> {
        validate_alpha(alpha)?;
        let dalpha = match self {
            UncertaintyCase::Gaussian => standard_normal_quantile(alpha),
            UncertaintyCase::Hoeffding => (-(1.0 - alpha).ln() / 2.0).sqrt(),
            UncertaintyCase::DistributionallyRobust => (alpha / (1.0 - alpha)).sqrt(),
        };
        if !dalpha.is_finite() || dalpha < 0.0 {
            return Err(ChancePackError::NumericDomain(format!(
                "{} risk multiplier for alpha {} is {}, expected a finite non-negative value",
                self, alpha, dalpha
            )));
        }
        Ok(dalpha)
    }

    /// Variance-like spread of one item with nominal size `base`.
    pub fn spread(&self, params: &ItemParams, base: f64) -> Result<f64> {
        params.validate()?;
        validate_non_negative(base, "Item base size")?;
        let width = match self {
            UncertaintyCase::Gaussian | UncertaintyCase::DistributionallyRobust => params.sigma,
            UncertaintyCase::Hoeffding => params.a_ub - params.a_lb,
        };
        Ok((width * base).powi(2))
    }
}

impl fmt::Display for UncertaintyCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UncertaintyCase::Gaussian => write!(f, "gaussian"),
            UncertaintyCase::Hoeffding => write!(f, "hoeffding"),
            UncertaintyCase::DistributionallyRobust => write!(f, "distributionally-robust"),
        }
    }
}

impl FromStr for UncertaintyCase {
    type Err = ChancePackError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "g" | "gaussian" => Ok(UncertaintyCase::Gaussian),
            "h" | "hoeffding" => Ok(UncertaintyCase::Hoeffding),
            "d" | "dro" | "distributionally-robust" | "distributionally_robust" => {
                Ok(UncertaintyCase::DistributionallyRobust)
            }
            other => Err(ChancePackError::MalformedInstance(format!(
                "unknown uncertainty case '{}'",
                other
            ))),
        }
    }
}

/// Raw distributional parameters of one item.
///
/// * `a_lb`, `a_ub` - support bounds of the multiplicative demand factor
/// * `mu_factor` - mean of the demand factor (nominal demand is `base * mu_factor`)
/// * `sigma` - standard deviation of the demand factor
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ItemParams {
    pub a_lb: f64,
    pub a_ub: f64,
    pub mu_factor: f64,
    pub sigma: f64,
}

impl ItemParams {
    fn validate(&self) -> Result<()> {
        validate_non_negative(self.a_lb, "Lower support bound")?;
        validate_non_negative(self.a_ub, "Upper support bound")?;
        validate_non_negative(self.mu_factor, "Mean factor")?;
        validate_non_negative(self.sigma, "Standard deviation")?;
        if self.a_ub < self.a_lb {
            return Err(ChancePackError::NumericDomain(format!(
                "Upper support bound {} is below lower bound {}",
                self.a_ub, self.a_lb
            )));
        }
        Ok(())
    }
}

/// Risk multiplier and spread for a single item in one call.
pub fn risk_and_spread(
    case: UncertaintyCase,
    alpha: f64,
    params: &ItemParams,
    base: f64,
) -> Result<(f64, f64)> {
    Ok((case.risk_multiplier(alpha)?, case.spread(params, base)?))
}

fn validate_alpha(alpha: f64) -> Result<()> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(ChancePackError::NumericDomain(format!(
            "Confidence level must lie strictly between 0 and 1, got: {}",
            alpha
        )));
    }
    Ok(())
}

fn validate_non_negative(value: f64, name: &str) -> Result<()> {
    validation::validate_non_negative(value, name).map_err(ChancePackError::NumericDomain)
}

/// Inverse of the standard normal CDF (Acklam's rational approximation).
///
/// Relative error is below 1.2e-9 on (0, 1). Returns infinities at the boundaries.
pub fn standard_normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}
