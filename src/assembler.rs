//! Assembly of the exact second-order-cone formulation and its warm start.
//!
//! For `n` items and `K` bin slots (`K` = bins of the reference packing):
//!
//! | variable | meaning | domain |
//! |---|---|---|
//! | `y_k` | slot `k` is used | binary |
//! | `x_i_k` | item `i` is assigned to slot `k` | binary |
//! | `xc_i_k` | spread share of item `i` in slot `k` | `[0, sqrt(b_i)]` |
//! | `z_k` | cone radius of slot `k` | `>= 0` |
//!
//! Constraints:
//! - link: `sqrt(b_i) * x_i_k - xc_i_k <= 0`
//! - assign: `sum_k x_i_k >= 1` (or `= 1` with [`AssignmentRule::ExactlyOne`])
//! - cone: `sum_i xc_i_k^2 - z_k^2 <= 0`
//! - capacity: `sum_i mu_i * x_i_k + Dalpha * z_k - cap * y_k <= 0`
//!
//! Objective: minimize `sum_k y_k`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ChancePackError, Result};
use crate::model::{Bin, Instance, Packing};

/// Variable handle: position in [`ConicModel::variables`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct VarId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VarKind {
    Binary,
    Continuous,
}

/// Decision variable. `upper: None` means unbounded above.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Variable {
    pub name: String,
    pub kind: VarKind,
    pub lower: f64,
    pub upper: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LinearTerm {
    pub var: VarId,
    pub coef: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Sense {
    LessEqual,
    GreaterEqual,
    Equal,
}

/// Model constraint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// `sum(coef * var) <sense> rhs`
    Linear {
        name: String,
        terms: Vec<LinearTerm>,
        sense: Sense,
        rhs: f64,
    },
    /// `sum(member^2) - radius^2 <= 0`
    SecondOrderCone {
        name: String,
        members: Vec<VarId>,
        radius: VarId,
    },
}

impl Constraint {
    pub fn name(&self) -> &str {
        match self {
            Constraint::Linear { name, .. } | Constraint::SecondOrderCone { name, .. } => name,
        }
    }

    /// Amount by which `values` violate the constraint (0 when satisfied).
    ///
    /// Fails when `values` has no entry for a referenced variable.
    pub fn violation(&self, values: &[f64]) -> Result<f64> {
        match self {
            Constraint::Linear {
                terms, sense, rhs, ..
            } => {
                let lhs = linear_value(terms, values)?;
                Ok(match sense {
                    Sense::LessEqual => (lhs - rhs).max(0.0),
                    Sense::GreaterEqual => (rhs - lhs).max(0.0),
                    Sense::Equal => (lhs - rhs).abs(),
                })
            }
            Constraint::SecondOrderCone {
                members, radius, ..
            } => {
                let mut squares = 0.0;
                for &member in members {
                    squares += value_of(values, member)?.powi(2);
                }
                Ok((squares - value_of(values, *radius)?.powi(2)).max(0.0))
            }
        }
    }
}

fn value_of(values: &[f64], var: VarId) -> Result<f64> {
    values.get(var.0).copied().ok_or_else(|| {
        ChancePackError::SolveFailed(format!(
            "point has {} values, variable {} is out of range",
            values.len(),
            var.0
        ))
    })
}

fn linear_value(terms: &[LinearTerm], values: &[f64]) -> Result<f64> {
    terms
        .iter()
        .map(|t| value_of(values, t.var).map(|value| t.coef * value))
        .sum()
}

/// How the per-item assignment constraint is stated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentRule {
    /// `sum_k x_i_k >= 1`; an item may be covered by several slots.
    #[default]
    AtLeastOne,
    /// `sum_k x_i_k = 1`
    ExactlyOne,
}

/// Positions of the variable families inside the variable vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VariableLayout {
    pub items: usize,
    pub slots: usize,
}

impl VariableLayout {
    pub fn bin_used(&self, slot: usize) -> VarId {
        VarId(slot)
    }

    pub fn assign(&self, item: usize, slot: usize) -> VarId {
        VarId(self.slots + item * self.slots + slot)
    }

    pub fn aux(&self, item: usize, slot: usize) -> VarId {
        VarId(self.slots + self.items * self.slots + item * self.slots + slot)
    }

    pub fn radius(&self, slot: usize) -> VarId {
        VarId(self.slots + 2 * self.items * self.slots + slot)
    }

    pub fn variable_count(&self) -> usize {
        2 * self.slots + 2 * self.items * self.slots
    }
}

/// Assembled exact formulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConicModel {
    pub name: String,
    pub layout: VariableLayout,
    pub variables: Vec<Variable>,
    pub constraints: Vec<Constraint>,
    /// Minimized linear objective.
    pub objective: Vec<LinearTerm>,
}

impl ConicModel {
    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.0]
    }

    /// Objective at `values`; the point must hold one value per variable.
    pub fn objective_value(&self, values: &[f64]) -> Result<f64> {
        self.check_point(values)?;
        linear_value(&self.objective, values)
    }

    /// Largest constraint or bound violation of a complete point.
    ///
    /// A point whose length differs from the variable count is rejected.
    pub fn max_violation(&self, values: &[f64]) -> Result<f64> {
        self.check_point(values)?;
        let bounds = self.variables.iter().zip(values).map(|(var, &value)| {
            let below = (var.lower - value).max(0.0);
            let above = var.upper.map_or(0.0, |ub| (value - ub).max(0.0));
            let integral = match var.kind {
                VarKind::Binary => (value - value.round()).abs(),
                VarKind::Continuous => 0.0,
            };
            below.max(above).max(integral)
        });
        let mut worst = bounds.fold(0.0, f64::max);
        for constraint in &self.constraints {
            worst = worst.max(constraint.violation(values)?);
        }
        Ok(worst)
    }

    fn check_point(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.variables.len() {
            return Err(ChancePackError::SolveFailed(format!(
                "point has {} values, model has {} variables",
                values.len(),
                self.variables.len()
            )));
        }
        Ok(())
    }
}

/// Partial starting point handed to the solver alongside the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WarmStart {
    pub entries: Vec<WarmStartEntry>,
    /// Objective of the reference packing: its bin count.
    pub objective: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WarmStartEntry {
    pub var: VarId,
    pub name: String,
    pub value: f64,
}

impl WarmStart {
    /// Value set for `var`, if any.
    pub fn value(&self, var: VarId) -> Option<f64> {
        self.entries.iter().find(|e| e.var == var).map(|e| e.value)
    }

    /// Slots that receive at least one assigned item.
    pub fn used_slots(&self, layout: &VariableLayout) -> usize {
        (0..layout.slots)
            .filter(|&slot| {
                (0..layout.items).any(|item| self.value(layout.assign(item, slot)) == Some(1.0))
            })
            .count()
    }
}

/// Model plus warm start, ready for an exact solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AssembledModel {
    pub model: ConicModel,
    pub warm_start: WarmStart,
}

impl AssembledModel {
    /// Upper bound on the bin count: the reference packing's bin count.
    pub fn upper_bound(&self) -> usize {
        self.model.layout.slots
    }
}

/// Options for [`assemble`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssemblyOptions {
    pub assignment: AssignmentRule,
}

/// Builds the model and warm start for `instance` with `K = reference.bin_count()` slots.
pub fn assemble(instance: &Instance, reference: &Packing) -> Result<AssembledModel> {
    assemble_with_options(instance, reference, AssemblyOptions::default())
}

/// Like [`assemble`] with explicit options.
pub fn assemble_with_options(
    instance: &Instance,
    reference: &Packing,
    options: AssemblyOptions,
) -> Result<AssembledModel> {
    check_reference(instance, reference)?;

    let layout = VariableLayout {
        items: instance.len(),
        slots: reference.bin_count(),
    };
    let model = build_model(instance, layout, options);
    let warm_start = build_warm_start(&model, reference);

    tracing::debug!(
        items = layout.items,
        slots = layout.slots,
        variables = model.variables.len(),
        constraints = model.constraints.len(),
        "conic model assembled"
    );
    Ok(AssembledModel { model, warm_start })
}

fn check_reference(instance: &Instance, reference: &Packing) -> Result<()> {
    let assignment = reference.assignment(instance.len());
    if let Some(item) = assignment.iter().position(Option::is_none) {
        return Err(ChancePackError::MalformedInstance(format!(
            "reference packing does not contain item {}",
            item
        )));
    }
    if let Some(item) = reference
        .bins
        .iter()
        .flat_map(|bin| bin.items.iter())
        .find(|&&item| item >= instance.len())
    {
        return Err(ChancePackError::MalformedInstance(format!(
            "reference packing refers to unknown item {}",
            item
        )));
    }
    Ok(())
}

fn build_model(instance: &Instance, layout: VariableLayout, options: AssemblyOptions) -> ConicModel {
    let n = layout.items;
    let k_slots = layout.slots;
    let sqrt_b: Vec<f64> = instance.items().iter().map(|item| item.b.sqrt()).collect();

    let mut variables = Vec::with_capacity(layout.variable_count());
    for k in 0..k_slots {
        variables.push(Variable {
            name: format!("y_{}", k),
            kind: VarKind::Binary,
            lower: 0.0,
            upper: Some(1.0),
        });
    }
    for i in 0..n {
        for k in 0..k_slots {
            variables.push(Variable {
                name: format!("x_{}_{}", i, k),
                kind: VarKind::Binary,
                lower: 0.0,
                upper: Some(1.0),
            });
        }
    }
    for (i, &root) in sqrt_b.iter().enumerate() {
        for k in 0..k_slots {
            variables.push(Variable {
                name: format!("xc_{}_{}", i, k),
                kind: VarKind::Continuous,
                lower: 0.0,
                upper: Some(root),
            });
        }
    }
    for k in 0..k_slots {
        variables.push(Variable {
            name: format!("z_{}", k),
            kind: VarKind::Continuous,
            lower: 0.0,
            upper: None,
        });
    }

    let mut constraints = Vec::with_capacity(n * k_slots + n + 2 * k_slots);

    for (i, &root) in sqrt_b.iter().enumerate() {
        for k in 0..k_slots {
            constraints.push(Constraint::Linear {
                name: format!("link_{}_{}", i, k),
                terms: vec![
                    LinearTerm {
                        var: layout.assign(i, k),
                        coef: root,
                    },
                    LinearTerm {
                        var: layout.aux(i, k),
                        coef: -1.0,
                    },
                ],
                sense: Sense::LessEqual,
                rhs: 0.0,
            });
        }
    }

    let assign_sense = match options.assignment {
        AssignmentRule::AtLeastOne => Sense::GreaterEqual,
        AssignmentRule::ExactlyOne => Sense::Equal,
    };
    for i in 0..n {
        constraints.push(Constraint::Linear {
            name: format!("assign_{}", i),
            terms: (0..k_slots)
                .map(|k| LinearTerm {
                    var: layout.assign(i, k),
                    coef: 1.0,
                })
                .collect(),
            sense: assign_sense,
            rhs: 1.0,
        });
    }

    for k in 0..k_slots {
        constraints.push(Constraint::SecondOrderCone {
            name: format!("cone_{}", k),
            members: (0..n).map(|i| layout.aux(i, k)).collect(),
            radius: layout.radius(k),
        });

        let mut terms: Vec<LinearTerm> = instance
            .items()
            .iter()
            .map(|item| LinearTerm {
                var: layout.assign(item.index, k),
                coef: item.mu,
            })
            .collect();
        terms.push(LinearTerm {
            var: layout.radius(k),
            coef: instance.dalpha(),
        });
        terms.push(LinearTerm {
            var: layout.bin_used(k),
            coef: -instance.capacity(),
        });
        constraints.push(Constraint::Linear {
            name: format!("capacity_{}", k),
            terms,
            sense: Sense::LessEqual,
            rhs: 0.0,
        });
    }

    let objective = (0..k_slots)
        .map(|k| LinearTerm {
            var: layout.bin_used(k),
            coef: 1.0,
        })
        .collect();

    ConicModel {
        name: instance.descriptor().to_string(),
        layout,
        variables,
        constraints,
        objective,
    }
}

/// Radius 1 for every slot and `x_i_k = 1` for every packed pair. The radius is not
/// tightened to the bin's spread; the solver completes and repairs the point.
fn build_warm_start(model: &ConicModel, reference: &Packing) -> WarmStart {
    let layout = model.layout;
    let mut entries = Vec::new();
    for (slot, bin) in reference.bins.iter().enumerate() {
        let radius = layout.radius(slot);
        entries.push(WarmStartEntry {
            var: radius,
            name: model.variable(radius).name.clone(),
            value: 1.0,
        });
        for &item in &bin.items {
            let assign = layout.assign(item, slot);
            entries.push(WarmStartEntry {
                var: assign,
                name: model.variable(assign).name.clone(),
                value: 1.0,
            });
        }
    }
    WarmStart {
        entries,
        objective: reference.bin_count() as f64,
    }
}

/// Complete, feasible point matching `packing`: `y_k = 1` for non-empty slots,
/// `xc_i_k = sqrt(b_i) * x_i_k` and `z_k = sqrt(sum_b)` of each slot.
pub fn packing_point(instance: &Instance, layout: &VariableLayout, packing: &Packing) -> Vec<f64> {
    let mut values = vec![0.0; layout.variable_count()];
    for (slot, bin) in packing.bins.iter().enumerate().take(layout.slots) {
        if !bin.is_empty() {
            values[layout.bin_used(slot).0] = 1.0;
        }
        for &item in &bin.items {
            values[layout.assign(item, slot).0] = 1.0;
            values[layout.aux(item, slot).0] = instance.item(item).b.sqrt();
        }
        values[layout.radius(slot).0] = instance.load_of(&bin.items).sum_b.sqrt();
    }
    values
}

/// Packing encoded by solver values: each item goes to the first slot with
/// `x_i_k >= 0.5`; empty slots are dropped.
pub fn extract_packing(
    instance: &Instance,
    layout: &VariableLayout,
    values: &[f64],
) -> Result<Packing> {
    if values.len() != layout.variable_count() {
        return Err(ChancePackError::SolveFailed(format!(
            "solution has {} values, model has {} variables",
            values.len(),
            layout.variable_count()
        )));
    }

    let mut bins = vec![Bin::new(); layout.slots];
    for item in instance.items() {
        let slot = (0..layout.slots)
            .find(|&k| values[layout.assign(item.index, k).0] >= 0.5)
            .ok_or_else(|| {
                ChancePackError::SolveFailed(format!(
                    "solution leaves item {} unassigned",
                    item.index
                ))
            })?;
        bins[slot].push(item);
    }
    bins.retain(|bin| !bin.is_empty());
    Ok(Packing::new(bins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::best_fit;

    fn scenario() -> (Instance, Packing) {
        let instance =
            Instance::new("g 10 3 0.9", 10.0, 1.0, vec![4.0; 3], vec![1.0; 3]).unwrap();
        let packing = best_fit(&instance).unwrap();
        (instance, packing)
    }

    fn mixed() -> (Instance, Packing) {
        let instance = Instance::new(
            "h 15 6 0.8",
            15.0,
            0.9,
            vec![3.0, 6.5, 2.0, 5.0, 7.5, 1.0],
            vec![1.0, 4.0, 0.25, 2.0, 3.0, 0.5],
        )
        .unwrap();
        let packing = best_fit(&instance).unwrap();
        (instance, packing)
    }

    #[test]
    fn counts_variables_and_constraints() {
        let (instance, packing) = scenario();
        let assembled = assemble(&instance, &packing).unwrap();
        let model = &assembled.model;
        let (n, k) = (3, 2);
        assert_eq!(model.variables.len(), 2 * k + 2 * n * k);
        assert_eq!(model.constraints.len(), n * k + n + 2 * k);
        assert_eq!(model.objective.len(), k);
        assert_eq!(assembled.upper_bound(), 2);
    }

    #[test]
    fn layout_names_match_positions() {
        let (instance, packing) = mixed();
        let assembled = assemble(&instance, &packing).unwrap();
        let model = &assembled.model;
        let layout = model.layout;
        assert_eq!(model.variable(layout.bin_used(1)).name, "y_1");
        assert_eq!(model.variable(layout.assign(4, 1)).name, "x_4_1");
        assert_eq!(model.variable(layout.aux(5, 0)).name, "xc_5_0");
        assert_eq!(model.variable(layout.radius(0)).name, "z_0");
        assert_eq!(model.variable(layout.aux(1, 0)).upper, Some(2.0));
        assert_eq!(model.variable(layout.radius(0)).upper, None);
    }

    #[test]
    fn capacity_row_carries_demands_risk_and_capacity() {
        let (instance, packing) = scenario();
        let assembled = assemble(&instance, &packing).unwrap();
        let layout = assembled.model.layout;
        let row = assembled
            .model
            .constraints
            .iter()
            .find(|c| c.name() == "capacity_1")
            .unwrap();
        match row {
            Constraint::Linear {
                terms, sense, rhs, ..
            } => {
                assert_eq!(*sense, Sense::LessEqual);
                assert_eq!(*rhs, 0.0);
                assert!(terms.contains(&LinearTerm {
                    var: layout.assign(2, 1),
                    coef: 4.0
                }));
                assert!(terms.contains(&LinearTerm {
                    var: layout.radius(1),
                    coef: 1.0
                }));
                assert!(terms.contains(&LinearTerm {
                    var: layout.bin_used(1),
                    coef: -10.0
                }));
            }
            other => panic!("unexpected constraint {other:?}"),
        }
    }

    #[test]
    fn assignment_rows_are_relaxed_by_default() {
        let (instance, packing) = scenario();
        let relaxed = assemble(&instance, &packing).unwrap();
        let strict = assemble_with_options(
            &instance,
            &packing,
            AssemblyOptions {
                assignment: AssignmentRule::ExactlyOne,
            },
        )
        .unwrap();
        let sense_of = |model: &ConicModel| {
            model.constraints.iter().find_map(|c| match c {
                Constraint::Linear { name, sense, .. } if name == "assign_0" => Some(*sense),
                _ => None,
            })
        };
        assert_eq!(sense_of(&relaxed.model), Some(Sense::GreaterEqual));
        assert_eq!(sense_of(&strict.model), Some(Sense::Equal));
    }

    #[test]
    fn warm_start_marks_reference_packing() {
        let (instance, packing) = scenario();
        let assembled = assemble(&instance, &packing).unwrap();
        let layout = assembled.model.layout;
        let warm = &assembled.warm_start;

        assert_eq!(warm.value(layout.radius(0)), Some(1.0));
        assert_eq!(warm.value(layout.radius(1)), Some(1.0));
        assert_eq!(warm.value(layout.assign(0, 0)), Some(1.0));
        assert_eq!(warm.value(layout.assign(1, 0)), Some(1.0));
        assert_eq!(warm.value(layout.assign(2, 1)), Some(1.0));
        assert_eq!(warm.value(layout.assign(2, 0)), None);
        assert_eq!(warm.entries.len(), 2 + 3);
    }

    #[test]
    fn warm_start_objective_equals_used_bins() {
        let (instance, packing) = mixed();
        let assembled = assemble(&instance, &packing).unwrap();
        let layout = assembled.model.layout;
        assert_eq!(assembled.warm_start.objective, packing.bin_count() as f64);
        assert_eq!(
            assembled.warm_start.used_slots(&layout),
            packing.used_bin_count()
        );
        assert_eq!(packing.used_bin_count(), packing.bin_count());
    }

    #[test]
    fn packing_point_is_feasible_with_reference_objective() {
        let (instance, packing) = mixed();
        let assembled = assemble(&instance, &packing).unwrap();
        let point = packing_point(&instance, &assembled.model.layout, &packing);
        assert!(assembled.model.max_violation(&point).unwrap() < 1e-9);
        assert_eq!(
            assembled.model.objective_value(&point).unwrap(),
            packing.bin_count() as f64
        );
    }

    #[test]
    fn overloaded_point_violates_capacity() {
        let (instance, packing) = scenario();
        let assembled = assemble(&instance, &packing).unwrap();
        let layout = assembled.model.layout;
        // Everything into slot 0.
        let mut all = Bin::new();
        for item in instance.items() {
            all.push(item);
        }
        let point = packing_point(&instance, &layout, &Packing::new(vec![all, Bin::new()]));
        assert!(assembled.model.max_violation(&point).unwrap() > 1.0);
    }

    #[test]
    fn short_point_is_rejected() {
        let (instance, packing) = mixed();
        let model = assemble(&instance, &packing).unwrap().model;
        let short = [0.0; 3];

        assert!(matches!(
            model.max_violation(&short),
            Err(ChancePackError::SolveFailed(_))
        ));
        assert!(model.objective_value(&short).is_err());
        let cone = model
            .constraints
            .iter()
            .find(|c| c.name() == "cone_0")
            .unwrap();
        assert!(cone.violation(&short).is_err());
    }

    #[test]
    fn extraction_picks_first_slot_for_duplicated_items() {
        let (instance, packing) = scenario();
        let assembled = assemble(&instance, &packing).unwrap();
        let layout = assembled.model.layout;
        let mut point = packing_point(&instance, &layout, &packing);
        // Item 2 also covered by slot 0: allowed by the relaxed assignment rows.
        point[layout.assign(2, 0).0] = 1.0;

        let extracted = extract_packing(&instance, &layout, &point).unwrap();
        assert_eq!(extracted.as_index_lists(), vec![vec![0, 1, 2]]);

        let reference_point = packing_point(&instance, &layout, &packing);
        let extracted = extract_packing(&instance, &layout, &reference_point).unwrap();
        assert_eq!(extracted.as_index_lists(), packing.as_index_lists());
    }

    #[test]
    fn extraction_rejects_unassigned_items() {
        let (instance, packing) = scenario();
        let layout = assemble(&instance, &packing).unwrap().model.layout;
        let point = vec![0.0; layout.variable_count()];
        assert!(extract_packing(&instance, &layout, &point).is_err());
        assert!(extract_packing(&instance, &layout, &[]).is_err());
    }

    #[test]
    fn incomplete_reference_is_rejected() {
        let (instance, _) = scenario();
        let mut bin = Bin::new();
        bin.push(instance.item(0));
        assert!(assemble(&instance, &Packing::new(vec![bin])).is_err());
    }

    #[test]
    fn model_serializes_to_json() {
        let (instance, packing) = scenario();
        let assembled = assemble(&instance, &packing).unwrap();
        let json = serde_json::to_value(&assembled).unwrap();
        assert_eq!(json["model"]["constraints"][9]["type"], "second_order_cone");
        let back: AssembledModel = serde_json::from_value(json).unwrap();
        assert_eq!(back, assembled);
    }
}
