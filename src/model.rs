//! Data model for chance-constrained bin packing.
//!
//! - `Item`: nominal demand `mu` and spread `b` of one item
//! - `Instance`: capacity, risk multiplier and the ordered items
//! - `Bin`: item indices of one bin with its incrementally kept `BinLoad`
//! - `Packing`: a partition of all items into bins

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ChancePackError, Result};
use crate::types::{BinLoad, validation};

/// One item with random demand.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Item {
    /// Position of the item in its instance.
    pub index: usize,
    /// Nominal (mean) demand.
    pub mu: f64,
    /// Spread term; enters the chance load through `sqrt(sum b)`.
    pub b: f64,
}

impl Item {
    /// Creates an item after validating that `mu` and `b` are finite and non-negative.
    pub fn new(index: usize, mu: f64, b: f64) -> Result<Self> {
        validation::validate_non_negative(mu, &format!("Nominal demand of item {}", index))
            .map_err(ChancePackError::NumericDomain)?;
        validation::validate_non_negative(b, &format!("Spread of item {}", index))
            .map_err(ChancePackError::NumericDomain)?;
        Ok(Self { index, mu, b })
    }

    /// The item's contribution to a bin's aggregate state.
    #[inline]
    pub fn load(&self) -> BinLoad {
        BinLoad::new(self.mu, self.b)
    }

    /// Chance-constrained load of the item packed alone.
    #[inline]
    pub fn solo_load(&self, dalpha: f64) -> f64 {
        self.load().chance_load(dalpha)
    }
}

/// Immutable problem instance.
///
/// Construction enforces that every item is packable alone:
/// `mu_i + dalpha * sqrt(b_i) <= capacity`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Instance {
    descriptor: String,
    capacity: f64,
    dalpha: f64,
    items: Vec<Item>,
}

impl Instance {
    /// Builds and validates an instance from parallel demand/spread vectors.
    ///
    /// # Examples
    /// ```
    /// use chance_pack::model::Instance;
    ///
    /// let instance = Instance::new("g 10 3 0.9", 10.0, 1.0, vec![4.0; 3], vec![1.0; 3]).unwrap();
    /// assert_eq!(instance.len(), 3);
    ///
    /// assert!(Instance::new("g 10 1 0.9", 10.0, 1.0, vec![9.5], vec![1.0]).is_err());
    /// ```
    pub fn new(
        descriptor: impl Into<String>,
        capacity: f64,
        dalpha: f64,
        mus: Vec<f64>,
        bs: Vec<f64>,
    ) -> Result<Self> {
        validation::validate_positive(capacity, "Capacity")
            .map_err(ChancePackError::MalformedInstance)?;
        validation::validate_non_negative(dalpha, "Risk multiplier")
            .map_err(ChancePackError::NumericDomain)?;
        if mus.len() != bs.len() {
            return Err(ChancePackError::MalformedInstance(format!(
                "{} nominal demands but {} spreads",
                mus.len(),
                bs.len()
            )));
        }

        let items = mus
            .into_iter()
            .zip(bs)
            .enumerate()
            .map(|(index, (mu, b))| Item::new(index, mu, b))
            .collect::<Result<Vec<_>>>()?;

        let instance = Self {
            descriptor: descriptor.into().trim_end().to_string(),
            capacity,
            dalpha,
            items,
        };
        instance.ensure_packable()?;
        Ok(instance)
    }

    /// Free-text descriptor line carried through to result records.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Bin capacity, strictly positive.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Risk multiplier `Dalpha` applied to `sqrt(sum b)`.
    pub fn dalpha(&self) -> f64 {
        self.dalpha
    }

    /// Items in instance order; `items()[i].index == i`.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Item at `index`.
    ///
    /// # Panics
    /// Panics if `index >= self.len()`.
    pub fn item(&self, index: usize) -> &Item {
        &self.items[index]
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True for an instance without items; it packs into zero bins.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Aggregate load of an arbitrary subset of items.
    pub fn load_of(&self, indices: &[usize]) -> BinLoad {
        indices
            .iter()
            .fold(BinLoad::zero(), |acc, &i| acc + self.items[i].load())
    }

    fn ensure_packable(&self) -> Result<()> {
        match first_unpackable_item(&self.items, self.dalpha, self.capacity) {
            Some(item) => Err(ChancePackError::InfeasibleItem {
                index: item.index,
                load: item.solo_load(self.dalpha),
                capacity: self.capacity,
            }),
            None => Ok(()),
        }
    }
}

/// First item that does not fit an empty bin, if any.
pub fn first_unpackable_item(items: &[Item], dalpha: f64, capacity: f64) -> Option<&Item> {
    items
        .iter()
        .find(|item| item.solo_load(dalpha) > capacity)
}

/// A bin: assigned item indices plus their aggregate load.
#[derive(Clone, Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct Bin {
    /// Item indices; ascending once the packer closes the bin.
    pub items: Vec<usize>,
    /// Running `(sum mu, sum b)` of the items.
    pub load: BinLoad,
}

impl Bin {
    /// Creates an empty bin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item and updates the aggregate state.
    pub fn push(&mut self, item: &Item) {
        self.items.push(item.index);
        self.load += item.load();
    }

    /// Number of items in the bin.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Partition of all item indices into bins.
#[derive(Clone, Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct Packing {
    pub bins: Vec<Bin>,
}

impl Packing {
    pub fn new(bins: Vec<Bin>) -> Self {
        Self { bins }
    }

    /// Number of bins, including empty ones.
    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// Number of bins holding at least one item.
    pub fn used_bin_count(&self) -> usize {
        self.bins.iter().filter(|bin| !bin.is_empty()).count()
    }

    /// Bin index of every item, or `None` for items missing from the packing.
    pub fn assignment(&self, item_count: usize) -> Vec<Option<usize>> {
        let mut assignment = vec![None; item_count];
        for (bin_idx, bin) in self.bins.iter().enumerate() {
            for &item in &bin.items {
                if item < item_count {
                    assignment[item] = Some(bin_idx);
                }
            }
        }
        assignment
    }

    /// Bins as plain index lists.
    pub fn as_index_lists(&self) -> Vec<Vec<usize>> {
        self.bins.iter().map(|bin| bin.items.clone()).collect()
    }

    /// Checks that the packing partitions the instance's items and that every bin
    /// respects capacity within `tolerance`.
    pub fn verify(&self, instance: &Instance, tolerance: f64) -> std::result::Result<(), String> {
        let mut seen = vec![false; instance.len()];
        for (bin_idx, bin) in self.bins.iter().enumerate() {
            for &item in &bin.items {
                if item >= instance.len() {
                    return Err(format!("Bin {} holds unknown item {}", bin_idx, item));
                }
                if std::mem::replace(&mut seen[item], true) {
                    return Err(format!("Item {} is packed more than once", item));
                }
            }
            let load = instance.load_of(&bin.items);
            if !load.within(instance.dalpha(), instance.capacity(), tolerance) {
                return Err(format!(
                    "Bin {} load {} exceeds capacity {}",
                    bin_idx,
                    load.chance_load(instance.dalpha()),
                    instance.capacity()
                ));
            }
        }
        if let Some(missing) = seen.iter().position(|packed| !packed) {
            return Err(format!("Item {} is not packed", missing));
        }
        Ok(())
    }
}
