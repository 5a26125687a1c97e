//! Constructive packing heuristics for chance-constrained bins.
//!
//! The best-fit packer fills one bin at a time. Each scan pass tests every unpacked
//! item against the open bin and commits the one with the smallest marginal capacity
//! use; when nothing fits the bin is closed and a fresh one is opened. Every pass
//! either commits an item or closes a bin, so at most `2 * n` passes run and the total
//! work is `O(n^2)`.
//!
//! The first-fit packer is a cheaper baseline: it sweeps the unpacked items once per
//! bin in index order and takes every item that still fits.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{ChancePackError, Result};
use crate::feasibility::fits;
use crate::model::{Bin, Instance, Packing};
use crate::types::BinLoad;

/// Constructive heuristic used to build the reference packing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum PackingStrategy {
    #[default]
    BestFit,
    FirstFit,
}

impl FromStr for PackingStrategy {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "best_fit" | "best" => Ok(PackingStrategy::BestFit),
            "first_fit" | "first" => Ok(PackingStrategy::FirstFit),
            other => Err(format!("unknown packing strategy '{}'", other)),
        }
    }
}

impl fmt::Display for PackingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackingStrategy::BestFit => write!(f, "best-fit"),
            PackingStrategy::FirstFit => write!(f, "first-fit"),
        }
    }
}

/// Configuration for the packing heuristics.
#[derive(Copy, Clone, Debug)]
pub struct PackingConfig {
    /// Heuristic producing the reference packing
    pub strategy: PackingStrategy,
    /// Whether to also run the first-fit baseline for diagnostics
    pub compute_baseline: bool,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PackingConfig {
    pub const DEFAULT_COMPUTE_BASELINE: bool = true;

    pub fn builder() -> PackingConfigBuilder {
        PackingConfigBuilder::default()
    }
}

/// Builder for `PackingConfig`.
#[derive(Clone, Debug)]
pub struct PackingConfigBuilder {
    config: PackingConfig,
}

impl Default for PackingConfigBuilder {
    fn default() -> Self {
        Self {
            config: PackingConfig {
                strategy: PackingStrategy::default(),
                compute_baseline: PackingConfig::DEFAULT_COMPUTE_BASELINE,
            },
        }
    }
}

impl PackingConfigBuilder {
    pub fn strategy(mut self, strategy: PackingStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn compute_baseline(mut self, enabled: bool) -> Self {
        self.config.compute_baseline = enabled;
        self
    }

    pub fn build(self) -> PackingConfig {
        self.config
    }
}

/// Events emitted while packing, suitable for live streaming.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(tag = "type")]
pub enum PackEvent {
    /// A new, empty bin was opened.
    BinOpened { bin: usize },
    /// An item was committed to the open bin.
    ItemCommitted {
        bin: usize,
        item: usize,
        marginal_use: f64,
        chance_load: f64,
    },
    /// A bin was closed for good.
    BinClosed {
        bin: usize,
        items: Vec<usize>,
        chance_load: f64,
    },
    /// Packing finished.
    Finished { bins: usize },
}

/// Per-bin figures of a finished packing.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct BinDiagnostics {
    pub bin: usize,
    pub item_count: usize,
    pub sum_mu: f64,
    pub sum_b: f64,
    pub chance_load: f64,
    pub slack: f64,
    pub fill_ratio: f64,
}

impl BinDiagnostics {
    fn from_bin(bin_idx: usize, bin: &Bin, instance: &Instance) -> Self {
        let dalpha = instance.dalpha();
        let capacity = instance.capacity();
        let chance_load = bin.load.chance_load(dalpha);
        Self {
            bin: bin_idx,
            item_count: bin.len(),
            sum_mu: bin.load.sum_mu,
            sum_b: bin.load.sum_b,
            chance_load,
            slack: capacity - chance_load,
            fill_ratio: chance_load / capacity,
        }
    }
}

/// Summary over all bins.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct PackingSummary {
    pub strategy: String,
    pub bin_count: usize,
    pub item_count: usize,
    pub average_fill_ratio: f64,
    pub min_slack: f64,
    /// Bin count of the first-fit baseline, when computed
    pub first_fit_bins: Option<usize>,
}

/// Result of a packing run.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct PackingResult {
    pub packing: Packing,
    pub diagnostics: Vec<BinDiagnostics>,
    pub summary: PackingSummary,
}

impl PackingResult {
    pub fn bin_count(&self) -> usize {
        self.packing.bin_count()
    }

    pub fn into_packing(self) -> Packing {
        self.packing
    }
}

/// Packs with the configured strategy and collects diagnostics.
pub fn pack_with_config(instance: &Instance, config: PackingConfig) -> Result<PackingResult> {
    pack_with_progress(instance, config, |_| {})
}

/// Like `pack_with_config`, reporting every step to `on_event`.
pub fn pack_with_progress(
    instance: &Instance,
    config: PackingConfig,
    mut on_event: impl FnMut(&PackEvent),
) -> Result<PackingResult> {
    let packing = match config.strategy {
        PackingStrategy::BestFit => best_fit_with_progress(instance, &mut on_event)?,
        PackingStrategy::FirstFit => first_fit_with_progress(instance, &mut on_event)?,
    };

    let first_fit_bins = match (config.compute_baseline, config.strategy) {
        (false, _) => None,
        (true, PackingStrategy::FirstFit) => Some(packing.bin_count()),
        (true, PackingStrategy::BestFit) => Some(first_fit_bin_count(instance)?),
    };

    let diagnostics: Vec<BinDiagnostics> = packing
        .bins
        .iter()
        .enumerate()
        .map(|(idx, bin)| BinDiagnostics::from_bin(idx, bin, instance))
        .collect();

    let average_fill_ratio = if diagnostics.is_empty() {
        0.0
    } else {
        diagnostics.iter().map(|d| d.fill_ratio).sum::<f64>() / diagnostics.len() as f64
    };
    let min_slack = diagnostics
        .iter()
        .map(|d| d.slack)
        .fold(instance.capacity(), f64::min);

    let summary = PackingSummary {
        strategy: config.strategy.to_string(),
        bin_count: packing.bin_count(),
        item_count: instance.len(),
        average_fill_ratio,
        min_slack,
        first_fit_bins,
    };

    on_event(&PackEvent::Finished {
        bins: packing.bin_count(),
    });

    Ok(PackingResult {
        packing,
        diagnostics,
        summary,
    })
}

/// Best-fit packing of `instance`.
///
/// Deterministic: the same instance always yields the same packing.
///
/// # Examples
/// ```
/// use chance_pack::model::Instance;
/// use chance_pack::optimizer::best_fit;
///
/// let instance = Instance::new("g 10 3 0.9", 10.0, 1.0, vec![4.0; 3], vec![1.0; 3]).unwrap();
/// let packing = best_fit(&instance).unwrap();
/// assert_eq!(packing.as_index_lists(), vec![vec![0, 1], vec![2]]);
/// ```
pub fn best_fit(instance: &Instance) -> Result<Packing> {
    best_fit_with_progress(instance, &mut ignore_event)
}

fn best_fit_with_progress(
    instance: &Instance,
    on_event: &mut impl FnMut(&PackEvent),
) -> Result<Packing> {
    let dalpha = instance.dalpha();
    let capacity = instance.capacity();

    // Unpacked items stay in index order; that order is the scan order.
    let mut unpacked: Vec<usize> = (0..instance.len()).collect();
    let mut bins: Vec<Bin> = Vec::new();
    let mut current = Bin::new();
    let mut bin_open = false;

    while !unpacked.is_empty() {
        if !bin_open {
            on_event(&PackEvent::BinOpened { bin: bins.len() });
            bin_open = true;
        }

        // Scan phase: smallest marginal use, earliest index on ties.
        let mut best: Option<(usize, f64)> = None;
        for (pos, &idx) in unpacked.iter().enumerate() {
            if let Some(marginal) = fits(&current.load, dalpha, capacity, instance.item(idx)) {
                if best.is_none_or(|(_, best_use)| marginal < best_use) {
                    best = Some((pos, marginal));
                }
            }
        }

        // Commit phase.
        match best {
            Some((pos, marginal)) => {
                let idx = unpacked.remove(pos);
                current.push(instance.item(idx));
                tracing::trace!(bin = bins.len(), item = idx, marginal, "item committed");
                on_event(&PackEvent::ItemCommitted {
                    bin: bins.len(),
                    item: idx,
                    marginal_use: marginal,
                    chance_load: current.load.chance_load(dalpha),
                });
            }
            None if current.is_empty() => {
                let item = instance.item(unpacked[0]);
                return Err(ChancePackError::InfeasibleItem {
                    index: item.index,
                    load: item.solo_load(dalpha),
                    capacity,
                });
            }
            None => {
                close_bin(&mut bins, &mut current, dalpha, on_event);
                bin_open = false;
            }
        }
    }

    if bin_open {
        close_bin(&mut bins, &mut current, dalpha, on_event);
    }

    tracing::debug!(
        items = instance.len(),
        bins = bins.len(),
        "best-fit packing finished"
    );
    Ok(Packing::new(bins))
}

/// First-fit packing of `instance`.
pub fn first_fit(instance: &Instance) -> Result<Packing> {
    first_fit_with_progress(instance, &mut ignore_event)
}

/// Number of bins the first-fit heuristic needs.
pub fn first_fit_bin_count(instance: &Instance) -> Result<usize> {
    Ok(first_fit(instance)?.bin_count())
}

fn first_fit_with_progress(
    instance: &Instance,
    on_event: &mut impl FnMut(&PackEvent),
) -> Result<Packing> {
    let dalpha = instance.dalpha();
    let capacity = instance.capacity();

    let mut unpacked: Vec<usize> = (0..instance.len()).collect();
    let mut bins: Vec<Bin> = Vec::new();

    while !unpacked.is_empty() {
        let bin_idx = bins.len();
        on_event(&PackEvent::BinOpened { bin: bin_idx });

        let mut current = Bin::new();
        unpacked.retain(|&idx| {
            let item = instance.item(idx);
            match fits(&current.load, dalpha, capacity, item) {
                Some(marginal) => {
                    current.push(item);
                    on_event(&PackEvent::ItemCommitted {
                        bin: bin_idx,
                        item: idx,
                        marginal_use: marginal,
                        chance_load: current.load.chance_load(dalpha),
                    });
                    false
                }
                None => true,
            }
        });

        if current.is_empty() {
            let item = instance.item(unpacked[0]);
            return Err(ChancePackError::InfeasibleItem {
                index: item.index,
                load: item.solo_load(dalpha),
                capacity,
            });
        }
        close_bin(&mut bins, &mut current, dalpha, on_event);
    }

    tracing::debug!(
        items = instance.len(),
        bins = bins.len(),
        "first-fit packing finished"
    );
    Ok(Packing::new(bins))
}

/// Closes the open bin; its item list is stored in ascending index order.
fn close_bin(
    bins: &mut Vec<Bin>,
    current: &mut Bin,
    dalpha: f64,
    on_event: &mut impl FnMut(&PackEvent),
) {
    let mut bin = std::mem::take(current);
    bin.items.sort_unstable();
    on_event(&PackEvent::BinClosed {
        bin: bins.len(),
        items: bin.items.clone(),
        chance_load: bin.load.chance_load(dalpha),
    });
    bins.push(bin);
}

fn ignore_event(_: &PackEvent) {}

/// Aggregate state after committing `order` one by one.
pub fn load_in_order(instance: &Instance, order: &[usize]) -> BinLoad {
    let mut bin = Bin::new();
    for &idx in order {
        bin.push(instance.item(idx));
    }
    bin.load
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LOAD_TOLERANCE;

    fn instance(capacity: f64, dalpha: f64, mus: Vec<f64>, bs: Vec<f64>) -> Instance {
        let n = mus.len();
        Instance::new(
            format!("g {} {} 0.9", capacity, n),
            capacity,
            dalpha,
            mus,
            bs,
        )
        .unwrap()
    }

    /// Literal queue-with-sentinel formulation, used as a reference.
    fn queue_reference(inst: &Instance) -> Vec<Vec<usize>> {
        use std::collections::VecDeque;

        const SENTINEL: isize = -1;
        let n = inst.len();
        let mut queue: VecDeque<isize> = (0..n as isize).collect();
        queue.push_back(SENTINEL);
        let mut assignment = vec![usize::MAX; n];
        let mut num_packs = 0;
        let mut load = BinLoad::zero();
        let mut best: isize = -1;
        let mut best_use = inst.capacity() + 1.0;
        let mut skip: isize = -2;

        while let Some(entry) = queue.pop_front() {
            if entry == SENTINEL {
                if queue.is_empty() {
                    num_packs += 1;
                    break;
                } else if best != -1 {
                    assignment[best as usize] = num_packs;
                    load += inst.item(best as usize).load();
                    skip = best;
                } else {
                    num_packs += 1;
                    load = BinLoad::zero();
                    skip = -2;
                }
                queue.push_back(SENTINEL);
                best = -1;
                best_use = inst.capacity() + 1.0;
                continue;
            }
            if entry == skip {
                continue;
            }
            if let Some(marginal) =
                fits(&load, inst.dalpha(), inst.capacity(), inst.item(entry as usize))
            {
                if marginal < best_use {
                    best = entry;
                    best_use = marginal;
                }
            }
            queue.push_back(entry);
        }

        let mut bins = vec![Vec::new(); num_packs];
        for (item, &bin) in assignment.iter().enumerate() {
            bins[bin].push(item);
        }
        bins
    }

    fn assert_valid(inst: &Instance, packing: &Packing) {
        packing.verify(inst, LOAD_TOLERANCE).unwrap();
        for bin in &packing.bins {
            assert!(bin.load.within(inst.dalpha(), inst.capacity(), LOAD_TOLERANCE));
        }
    }

    fn mixed_instance() -> Instance {
        instance(
            20.0,
            1.6,
            vec![3.0, 7.5, 1.2, 9.0, 4.4, 2.2, 6.1, 0.5, 5.0, 8.3, 1.9, 3.3],
            vec![0.4, 2.0, 0.1, 4.0, 1.1, 0.3, 1.8, 0.05, 0.9, 3.2, 0.2, 0.7],
        )
    }

    #[test]
    fn three_items_need_two_bins() {
        let inst = instance(10.0, 1.0, vec![4.0; 3], vec![1.0; 3]);
        let packing = best_fit(&inst).unwrap();
        assert_eq!(packing.bin_count(), 2);
        assert_eq!(packing.as_index_lists(), vec![vec![0, 1], vec![2]]);
        assert_valid(&inst, &packing);
    }

    #[test]
    fn single_item_gets_single_bin() {
        let inst = instance(10.0, 1.0, vec![3.0], vec![4.0]);
        let packing = best_fit(&inst).unwrap();
        assert_eq!(packing.as_index_lists(), vec![vec![0]]);
    }

    #[test]
    fn item_filling_capacity_exactly_is_packed() {
        let inst = instance(10.0, 2.0, vec![6.0], vec![4.0]);
        let packing = best_fit(&inst).unwrap();
        assert_eq!(packing.bin_count(), 1);
    }

    #[test]
    fn empty_instance_yields_no_bins() {
        let inst = instance(10.0, 1.0, vec![], vec![]);
        assert_eq!(best_fit(&inst).unwrap().bin_count(), 0);
        assert_eq!(first_fit(&inst).unwrap().bin_count(), 0);
    }

    #[test]
    fn prefers_smallest_marginal_use() {
        // Item 1 opens the bin, item 2 joins it, item 0 no longer fits.
        let inst = instance(10.0, 1.0, vec![7.0, 1.0, 3.0], vec![0.0, 0.0, 0.0]);
        let packing = best_fit(&inst).unwrap();
        assert_eq!(packing.as_index_lists(), vec![vec![1, 2], vec![0]]);
    }

    #[test]
    fn matches_queue_formulation() {
        let inst = mixed_instance();
        let packing = best_fit(&inst).unwrap();
        assert_eq!(packing.as_index_lists(), queue_reference(&inst));
        assert_valid(&inst, &packing);
    }

    #[test]
    fn matches_queue_formulation_with_ties() {
        let inst = instance(10.0, 0.5, vec![2.0, 2.0, 3.0, 2.0, 3.0, 1.0], vec![1.0; 6]);
        assert_eq!(
            best_fit(&inst).unwrap().as_index_lists(),
            queue_reference(&inst)
        );
    }

    #[test]
    fn repeated_runs_are_identical() {
        let inst = mixed_instance();
        let first = best_fit(&inst).unwrap();
        let second = best_fit(&inst).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn commit_order_does_not_change_aggregate_state() {
        let inst = mixed_instance();
        let forward = load_in_order(&inst, &[2, 7, 10]);
        let backward = load_in_order(&inst, &[10, 7, 2]);
        let shuffled = load_in_order(&inst, &[7, 2, 10]);
        for other in [backward, shuffled] {
            assert!((forward.sum_mu - other.sum_mu).abs() < LOAD_TOLERANCE);
            assert!((forward.sum_b - other.sum_b).abs() < LOAD_TOLERANCE);
        }
    }

    #[test]
    fn first_fit_is_valid_and_never_better_than_trivial_bound() {
        let inst = mixed_instance();
        let packing = first_fit(&inst).unwrap();
        assert_valid(&inst, &packing);
        let total_mu: f64 = inst.items().iter().map(|i| i.mu).sum();
        assert!(packing.bin_count() as f64 >= (total_mu / inst.capacity()).ceil());
    }

    #[test]
    fn first_fit_takes_items_in_index_order() {
        let inst = instance(10.0, 0.0, vec![6.0, 5.0, 4.0], vec![0.0; 3]);
        let packing = first_fit(&inst).unwrap();
        assert_eq!(packing.as_index_lists(), vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn progress_events_describe_the_packing() {
        let inst = instance(10.0, 1.0, vec![4.0; 3], vec![1.0; 3]);
        let mut events = Vec::new();
        let result = pack_with_progress(&inst, PackingConfig::builder().build(), |evt| {
            events.push(evt.clone())
        })
        .unwrap();

        let opened = events
            .iter()
            .filter(|e| matches!(e, PackEvent::BinOpened { .. }))
            .count();
        let committed = events
            .iter()
            .filter(|e| matches!(e, PackEvent::ItemCommitted { .. }))
            .count();
        assert_eq!(opened, 2);
        assert_eq!(committed, 3);
        assert!(matches!(events.last(), Some(PackEvent::Finished { bins: 2 })));
        assert_eq!(result.summary.bin_count, 2);
        assert_eq!(result.summary.first_fit_bins, Some(2));
    }

    #[test]
    fn diagnostics_report_slack_per_bin() {
        let inst = instance(10.0, 1.0, vec![4.0; 3], vec![1.0; 3]);
        let result = pack_with_config(&inst, PackingConfig::default()).unwrap();
        assert_eq!(result.diagnostics.len(), 2);
        let first = &result.diagnostics[0];
        assert!((first.chance_load - (8.0 + 2f64.sqrt())).abs() < LOAD_TOLERANCE);
        assert!((first.slack - (2.0 - 2f64.sqrt())).abs() < LOAD_TOLERANCE);
        assert!(result.summary.min_slack <= first.slack);
    }

    #[test]
    fn strategy_parses_from_text() {
        assert_eq!(
            "best-fit".parse::<PackingStrategy>().unwrap(),
            PackingStrategy::BestFit
        );
        assert_eq!(
            "FIRST_FIT".parse::<PackingStrategy>().unwrap(),
            PackingStrategy::FirstFit
        );
        assert!("worst".parse::<PackingStrategy>().is_err());
    }
}
