//! Result record written for every solved instance.
//!
//! ```text
//! <descriptor line>
//! status: solved
//! soltime: 12.5
//! nodes: 301
//! relgap: 0.0
//! obj: 7.0
//! best_bound: 7.0
//! relgap_round: 0.0
//! first_solution: 8
//! ```

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{ChancePackError, Result};
use crate::solver::{SolveOutcome, SolveStatus};
use crate::types::GAP_EPSILON;

/// Outcome of one exact solve, rendered as `key: value` lines after the descriptor.
///
/// Keys are written in a fixed order: `status`, `soltime`, `nodes`, `relgap`, `obj`,
/// `best_bound`, `relgap_round`, `first_solution`.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct ResultRecord {
    /// Descriptor line of the instance, copied verbatim.
    pub descriptor: String,
    pub status: SolveStatus,
    /// Solver wall-clock time in seconds.
    pub solve_time: f64,
    /// Branch-and-bound nodes processed.
    pub nodes: u64,
    /// `|bound - obj| / (bound + 1e-6)` in percent.
    pub relgap: f64,
    /// Incumbent objective (bin count).
    pub objective: f64,
    /// Best proven lower bound.
    pub best_bound: f64,
    /// Same gap against `ceil(bound)`.
    pub relgap_round: f64,
    /// Bin count of the warm start.
    pub first_solution: usize,
}

impl ResultRecord {
    /// Builds the record for `outcome`; `first_solution` is the warm start's bin count.
    pub fn new(descriptor: &str, outcome: &SolveOutcome, first_solution: usize) -> Self {
        Self {
            descriptor: descriptor.trim_end().to_string(),
            status: outcome.status,
            solve_time: outcome.solve_time,
            nodes: outcome.nodes,
            relgap: relative_gap(outcome.best_bound, outcome.objective),
            objective: outcome.objective,
            best_bound: outcome.best_bound,
            relgap_round: relative_gap(outcome.best_bound.ceil(), outcome.objective),
            first_solution,
        }
    }

    /// Renders the record as file text, one `key: value` line per field.
    ///
    /// Floating-point values keep their decimal point (`2.0`, not `2`).
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.descriptor);
        let _ = writeln!(out, "status: {}", self.status);
        let _ = writeln!(out, "soltime: {:?}", self.solve_time);
        let _ = writeln!(out, "nodes: {}", self.nodes);
        let _ = writeln!(out, "relgap: {:?}", self.relgap);
        let _ = writeln!(out, "obj: {:?}", self.objective);
        let _ = writeln!(out, "best_bound: {:?}", self.best_bound);
        let _ = writeln!(out, "relgap_round: {:?}", self.relgap_round);
        let _ = writeln!(out, "first_solution: {}", self.first_solution);
        out
    }

    /// Writes the record, replacing any previous content of `path`.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.render()).map_err(|err| ChancePackError::io(path, err))
    }
}

/// Relative gap in percent, rounded to four decimals before scaling.
pub fn relative_gap(bound: f64, objective: f64) -> f64 {
    let ratio = (bound - objective).abs() / (bound + GAP_EPSILON);
    (ratio * 10_000.0).round() / 10_000.0 * 100.0
}

/// An instance counts as solved iff its result file exists and is non-empty.
pub fn is_solved(result_path: impl AsRef<Path>) -> bool {
    fs::metadata(result_path).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

/// Removes the files of an unsolved instance. Missing files are fine.
pub fn discard_unsolved(result_path: &Path, log_path: &Path) -> Result<()> {
    for path in [result_path, log_path] {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(ChancePackError::io(path, err)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(objective: f64, best_bound: f64) -> SolveOutcome {
        SolveOutcome {
            status: SolveStatus::TimeLimit,
            solve_time: 3600.0,
            nodes: 42,
            objective,
            best_bound,
            solution: None,
            log: String::new(),
        }
    }

    #[test]
    fn gaps_follow_rounding_rules() {
        let record = ResultRecord::new("g 72 50 0.9\n", &outcome(10.0, 9.2), 11);
        // |9.2 - 10| / 9.200001 = 0.086956...
        assert!((record.relgap - 8.7).abs() < 1e-9);
        // ceil(9.2) = 10
        assert!(record.relgap_round.abs() < 1e-9);
        assert_eq!(record.descriptor, "g 72 50 0.9");
    }

    #[test]
    fn closed_gap_is_zero() {
        assert_eq!(relative_gap(7.0, 7.0), 0.0);
    }

    #[test]
    fn render_lists_keys_in_order() {
        let record = ResultRecord::new("d 72 3 0.95", &outcome(2.0, 2.0), 2);
        let text = record.render();
        let keys: Vec<&str> = text
            .lines()
            .skip(1)
            .filter_map(|line| line.split(':').next())
            .collect();
        assert_eq!(
            keys,
            vec![
                "status",
                "soltime",
                "nodes",
                "relgap",
                "obj",
                "best_bound",
                "relgap_round",
                "first_solution"
            ]
        );
        assert!(text.starts_with("d 72 3 0.95\n"));
        assert!(text.contains("status: time_limit\n"));
        assert!(text.contains("obj: 2.0\n"));
        assert!(text.contains("first_solution: 2\n"));
    }

    #[test]
    fn solved_classification_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let result = dir.path().join("a_bcsocp.result");
        let log = dir.path().join("a_bcsocp.log");

        assert!(!is_solved(&result));
        fs::write(&result, "").unwrap();
        fs::write(&log, "partial").unwrap();
        assert!(!is_solved(&result));

        discard_unsolved(&result, &log).unwrap();
        assert!(!result.exists());
        assert!(!log.exists());
        // Idempotent.
        discard_unsolved(&result, &log).unwrap();

        ResultRecord::new("g 10 1 0.9", &outcome(1.0, 1.0), 1)
            .write_to(&result)
            .unwrap();
        assert!(is_solved(&result));
    }
}
