//! Deterministic construction of instances from raw item parameters.
//!
//! Each item has a nominal size `base` and distributional parameters. Its demand is
//! `base * mu_factor` and its spread comes from the uncertainty model. Items that
//! would leave less than `headroom` of free capacity alone in a bin are scaled down by
//! `ratio = max((mu + Dalpha * sqrt(b) + headroom) / capacity, 1)`, dividing `mu` by
//! `ratio` and `b` by `ratio^2`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ChancePackError, Result};
use crate::model::Instance;
use crate::types::validation;
use crate::uncertainty::{ItemParams, UncertaintyCase};

/// Raw description of one item.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RawItem {
    /// Nominal item size before the demand factor is applied.
    pub base: f64,
    /// Distributional parameters, flattened into the item's JSON object.
    #[serde(flatten)]
    pub params: ItemParams,
}

/// Settings shared by all items of a generated instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeneratorSettings {
    /// Uncertainty case that turns `alpha` into `Dalpha` and parameters into spreads.
    pub case: UncertaintyCase,
    /// Confidence level in `(0, 1)`.
    pub alpha: f64,
    /// Bin capacity, strictly positive.
    pub capacity: f64,
    /// Free capacity every item must leave when packed alone; larger items are scaled.
    pub headroom: f64,
}

impl GeneratorSettings {
    /// Headroom used unless overridden.
    pub const DEFAULT_HEADROOM: f64 = 5.0;

    /// Creates settings with the default headroom. Values are validated by
    /// [`build_instance`].
    pub fn new(case: UncertaintyCase, alpha: f64, capacity: f64) -> Self {
        Self {
            case,
            alpha,
            capacity,
            headroom: Self::DEFAULT_HEADROOM,
        }
    }

    /// Overrides the headroom.
    pub fn with_headroom(mut self, headroom: f64) -> Self {
        self.headroom = headroom;
        self
    }

    /// Descriptor line `"<tag> <capacity> <n> <alpha>"`.
    pub fn descriptor(&self, item_count: usize) -> String {
        format!(
            "{} {} {} {}",
            self.case.tag(),
            self.capacity,
            item_count,
            self.alpha
        )
    }
}

/// Builds a validated instance from raw items.
///
/// Fails with `NumericDomain` for invalid parameters and with `InfeasibleItem` when an
/// item still cannot be packed alone after scaling (possible for a negative headroom);
/// callers regenerate in that case.
pub fn build_instance(settings: &GeneratorSettings, raw_items: &[RawItem]) -> Result<Instance> {
    validation::validate_positive(settings.capacity, "Capacity")
        .map_err(ChancePackError::NumericDomain)?;
    if settings.headroom.is_nan() || settings.headroom.is_infinite() {
        return Err(ChancePackError::NumericDomain(format!(
            "Headroom must be finite, got: {}",
            settings.headroom
        )));
    }

    let dalpha = settings.case.risk_multiplier(settings.alpha)?;

    let mut mus = Vec::with_capacity(raw_items.len());
    let mut bs = Vec::with_capacity(raw_items.len());
    for raw in raw_items {
        let b = settings.case.spread(&raw.params, raw.base)?;
        let mu = raw.base * raw.params.mu_factor;
        let ratio = ((mu + dalpha * b.sqrt() + settings.headroom) / settings.capacity).max(1.0);
        mus.push(mu / ratio);
        bs.push(b / (ratio * ratio));
    }

    let instance = Instance::new(
        settings.descriptor(raw_items.len()),
        settings.capacity,
        dalpha,
        mus,
        bs,
    )?;
    tracing::debug!(
        case = %settings.case,
        alpha = settings.alpha,
        items = instance.len(),
        dalpha,
        "instance built from raw items"
    );
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LOAD_TOLERANCE;

    fn raw(base: f64, sigma: f64) -> RawItem {
        RawItem {
            base,
            params: ItemParams {
                a_lb: 0.4,
                a_ub: 0.8,
                mu_factor: 0.5,
                sigma,
            },
        }
    }

    #[test]
    fn small_items_keep_their_values() {
        let settings = GeneratorSettings::new(UncertaintyCase::Gaussian, 0.9, 72.0);
        let instance = build_instance(&settings, &[raw(4.0, 0.2)]).unwrap();
        let item = instance.item(0);
        assert!((item.mu - 2.0).abs() < 1e-12);
        assert!((item.b - 0.64).abs() < 1e-12);
        assert_eq!(instance.descriptor(), "g 72 1 0.9");
    }

    #[test]
    fn large_items_are_scaled_below_capacity() {
        let settings = GeneratorSettings::new(UncertaintyCase::DistributionallyRobust, 0.99, 10.0);
        let instance = build_instance(&settings, &[raw(32.0, 0.5), raw(1.0, 0.1)]).unwrap();
        for item in instance.items() {
            assert!(item.solo_load(instance.dalpha()) <= instance.capacity() + LOAD_TOLERANCE);
        }
        // Scaling divides the solo load by `ratio`.
        let unscaled = 16.0 + instance.dalpha() * 16.0;
        let expected = 10.0 * unscaled / (unscaled + 5.0);
        let scaled = instance.item(0).solo_load(instance.dalpha());
        assert!((scaled - expected).abs() < 1e-9);
    }

    #[test]
    fn hoeffding_uses_support_width() {
        let settings = GeneratorSettings::new(UncertaintyCase::Hoeffding, 0.8, 72.0);
        let instance = build_instance(&settings, &[raw(2.0, 0.3)]).unwrap();
        assert!((instance.item(0).b - (0.4f64 * 2.0).powi(2)).abs() < 1e-12);
    }

    #[test]
    fn invalid_alpha_is_a_domain_error() {
        let settings = GeneratorSettings::new(UncertaintyCase::Hoeffding, 1.0, 72.0);
        let err = build_instance(&settings, &[raw(2.0, 0.3)]).unwrap_err();
        assert!(matches!(err, ChancePackError::NumericDomain(_)));
    }

    #[test]
    fn negative_headroom_can_leave_items_unpackable() {
        let settings =
            GeneratorSettings::new(UncertaintyCase::Gaussian, 0.95, 10.0).with_headroom(-3.0);
        let err = build_instance(&settings, &[raw(40.0, 0.5)]).unwrap_err();
        assert!(matches!(err, ChancePackError::InfeasibleItem { .. }));
    }

    #[test]
    fn empty_item_list_builds_a_readable_instance() {
        let settings = GeneratorSettings::new(UncertaintyCase::Gaussian, 0.9, 72.0);
        let instance = build_instance(&settings, &[]).unwrap();
        assert!(instance.is_empty());
        assert_eq!(instance.descriptor(), "g 72 0 0.9");

        let text = crate::reader::format_instance(&instance);
        assert_eq!(crate::reader::parse_instance(&text).unwrap(), instance);
    }
}
