//! Feasibility oracle for chance-constrained bins.
//!
//! The load of a bin is `sum_mu + dalpha * sqrt(sum_b)`. Because of the square root
//! the cost of an item depends on what is already in the bin, so the oracle reports
//! the marginal capacity an item would consume rather than its own demand.

use crate::model::Item;
use crate::types::BinLoad;

/// Tests whether `candidate` fits a bin in state `load`.
///
/// Returns `Some(marginal_use)` when
/// `sum_mu + mu + dalpha * sqrt(sum_b + b) <= capacity`, where `marginal_use` is
/// that left-hand side minus the bin's current chance-constrained load.
/// The comparison is exact; ties count as fitting.
///
/// # Examples
/// ```
/// use chance_pack::feasibility::fits;
/// use chance_pack::model::Item;
/// use chance_pack::types::BinLoad;
///
/// let item = Item::new(0, 4.0, 1.0).unwrap();
/// let marginal = fits(&BinLoad::new(4.0, 1.0), 1.0, 10.0, &item).unwrap();
/// assert!((marginal - (4.0 + 2f64.sqrt() - 1.0)).abs() < 1e-12);
/// assert!(fits(&BinLoad::new(8.0, 2.0), 1.0, 10.0, &item).is_none());
/// ```
#[inline]
pub fn fits(load: &BinLoad, dalpha: f64, capacity: f64, candidate: &Item) -> Option<f64> {
    let lhs = load.sum_mu + candidate.mu + dalpha * (load.sum_b + candidate.b).sqrt();
    if lhs <= capacity {
        Some(lhs - load.sum_mu - dalpha * load.sum_b.sqrt())
    } else {
        None
    }
}

/// Marginal capacity use of `candidate` regardless of whether it fits.
#[inline]
pub fn marginal_use(load: &BinLoad, dalpha: f64, candidate: &Item) -> f64 {
    (*load + candidate.load()).chance_load(dalpha) - load.chance_load(dalpha)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: usize, mu: f64, b: f64) -> Item {
        Item::new(index, mu, b).unwrap()
    }

    #[test]
    fn empty_bin_marginal_equals_solo_load() {
        let candidate = item(0, 3.0, 4.0);
        let marginal = fits(&BinLoad::zero(), 1.5, 10.0, &candidate).unwrap();
        assert!((marginal - candidate.solo_load(1.5)).abs() < 1e-12);
    }

    #[test]
    fn exact_capacity_counts_as_fit() {
        // 6 + 2 * sqrt(4) == 10
        let candidate = item(0, 6.0, 4.0);
        assert!(fits(&BinLoad::zero(), 2.0, 10.0, &candidate).is_some());
        assert!(fits(&BinLoad::zero(), 2.0, 10.0 - 1e-12, &candidate).is_none());
    }

    #[test]
    fn three_equal_items_do_not_share_a_bin() {
        let candidate = item(2, 4.0, 1.0);
        assert!(fits(&BinLoad::new(4.0, 1.0), 1.0, 10.0, &candidate).is_some());
        assert!(fits(&BinLoad::new(8.0, 2.0), 1.0, 10.0, &candidate).is_none());
    }

    #[test]
    fn marginal_spread_cost_shrinks_as_bin_fills() {
        let candidate = item(0, 0.0, 1.0);
        let first = marginal_use(&BinLoad::zero(), 1.0, &candidate);
        let later = marginal_use(&BinLoad::new(0.0, 8.0), 1.0, &candidate);
        assert!(later < first);
    }

    #[test]
    fn marginal_use_matches_fits_when_feasible() {
        let load = BinLoad::new(2.0, 3.0);
        let candidate = item(1, 1.0, 2.0);
        let from_fits = fits(&load, 1.2, 100.0, &candidate).unwrap();
        assert!((from_fits - marginal_use(&load, 1.2, &candidate)).abs() < 1e-12);
    }
}
