//! Boundary to the external exact solver.
//!
//! The core hands over a [`ConicModel`], a [`WarmStart`] and [`SolveParams`] and gets
//! back a [`SolveOutcome`]. No solution means the instance is unsolved within the
//! budget, never that it is infeasible.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::assembler::{ConicModel, WarmStart};
use crate::error::{ChancePackError, Result};

/// Final state reported by the solver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Solved,
    TimeLimit,
    Infeasible,
    Error,
}

impl SolveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolveStatus::Solved => "solved",
            SolveStatus::TimeLimit => "time_limit",
            SolveStatus::Infeasible => "infeasible",
            SolveStatus::Error => "error",
        }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SolveStatus {
    type Err = String;

    /// Lenient: accepts solver-specific spellings such as `OPTIMAL_SOLUTION`,
    /// `FEASIBLE_SOLUTION` or `time limit exceeded`.
    ///
    /// Only an optimal (gap-closed) run counts as solved. A feasible incumbent without
    /// a proof of optimality means the search stopped on its limit.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower.is_empty() {
            return Err("empty solve status".to_string());
        }
        let status = if lower.contains("infeasible") {
            SolveStatus::Infeasible
        } else if lower.contains("unsolved") {
            SolveStatus::Error
        } else if lower.contains("optimal") || lower.contains("solved") {
            SolveStatus::Solved
        } else if lower.contains("time") || lower.contains("limit") || lower.contains("feasible")
        {
            SolveStatus::TimeLimit
        } else {
            SolveStatus::Error
        };
        Ok(status)
    }
}

/// Parameters passed through to the solver.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolveParams {
    /// Wall-clock limit in seconds.
    pub time_limit_secs: f64,
    /// Worker threads; 0 lets the solver choose.
    pub threads: usize,
    /// Absolute MIP gap at which the search stops.
    pub abs_gap: f64,
}

impl Default for SolveParams {
    fn default() -> Self {
        Self {
            time_limit_secs: Self::DEFAULT_TIME_LIMIT_SECS,
            threads: 0,
            abs_gap: Self::DEFAULT_ABS_GAP,
        }
    }
}

impl SolveParams {
    pub const DEFAULT_TIME_LIMIT_SECS: f64 = 3600.0;
    pub const DEFAULT_ABS_GAP: f64 = 1.0;

    /// `parallel = false` pins the solver to one thread; `true` lets it choose.
    pub fn new(time_limit_secs: f64, parallel: bool) -> Self {
        Self {
            time_limit_secs,
            threads: if parallel { 0 } else { 1 },
            abs_gap: Self::DEFAULT_ABS_GAP,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.time_limit_secs.is_finite() || self.time_limit_secs <= 0.0 {
            return Err(ChancePackError::NumericDomain(format!(
                "Time limit must be positive and finite, got: {}",
                self.time_limit_secs
            )));
        }
        if !self.abs_gap.is_finite() || self.abs_gap < 0.0 {
            return Err(ChancePackError::NumericDomain(format!(
                "Absolute gap must be non-negative and finite, got: {}",
                self.abs_gap
            )));
        }
        Ok(())
    }
}

/// What the solver returns for a solved instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    /// Elapsed solve time in seconds.
    pub solve_time: f64,
    pub nodes: u64,
    /// Incumbent objective (bins used).
    pub objective: f64,
    pub best_bound: f64,
    /// Values of all model variables, when the solver reports them.
    pub solution: Option<Vec<f64>>,
    /// Solver's textual output, kept for the log sink.
    #[serde(default)]
    pub log: String,
}

/// External exact solver.
pub trait ExactSolver {
    /// Solves `model` from `warm_start`. Returns `SolverUnavailable` when the solver
    /// cannot be reached and `SolveFailed` when it returns no incumbent.
    fn solve(
        &self,
        model: &ConicModel,
        warm_start: &WarmStart,
        params: &SolveParams,
    ) -> Result<SolveOutcome>;
}

/// Solver run as a child process.
///
/// The process is invoked as
/// `<program> [args...] <model.json> <warmstart.json> <report.txt> <time_limit> <threads> <abs_gap>`
/// and must write a `key: value` report with at least `obj`. Recognized keys are
/// `status`, `soltime`, `nodes`, `obj`, `best_bound` and `values` (space-separated
/// variable values in model order).
#[derive(Clone, Debug)]
pub struct CommandSolver {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandSolver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Parses a whitespace-separated command line such as `python3 solve_socp.py`.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            ChancePackError::SolverUnavailable("empty solver command".to_string())
        })?;
        Ok(Self::new(program).with_args(parts))
    }

    /// Leading arguments placed before the model files.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ExactSolver for CommandSolver {
    fn solve(
        &self,
        model: &ConicModel,
        warm_start: &WarmStart,
        params: &SolveParams,
    ) -> Result<SolveOutcome> {
        params.validate()?;

        let workdir = tempfile::tempdir()
            .map_err(|err| ChancePackError::io(std::env::temp_dir(), err))?;
        let model_path = workdir.path().join("model.json");
        let warm_path = workdir.path().join("warmstart.json");
        let report_path = workdir.path().join("report.txt");

        write_json(&model_path, model)?;
        write_json(&warm_path, warm_start)?;

        tracing::debug!(
            program = %self.program.display(),
            time_limit = params.time_limit_secs,
            threads = params.threads,
            "invoking exact solver"
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&model_path)
            .arg(&warm_path)
            .arg(&report_path)
            .arg(params.time_limit_secs.to_string())
            .arg(params.threads.to_string())
            .arg(params.abs_gap.to_string())
            .output()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    ChancePackError::SolverUnavailable(format!(
                        "{}: {}",
                        self.program.display(),
                        err
                    ))
                }
                _ => ChancePackError::io(&self.program, err),
            })?;

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ChancePackError::SolveFailed(format!(
                "solver exited with {}: {}",
                output.status,
                log.lines().last().unwrap_or_default()
            )));
        }

        let report = match fs::read_to_string(&report_path) {
            Ok(report) => report,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ChancePackError::SolveFailed(
                    "solver wrote no report".to_string(),
                ));
            }
            Err(err) => return Err(ChancePackError::io(&report_path, err)),
        };

        let mut outcome = parse_report(&report)?;
        outcome.log = log;
        Ok(outcome)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = fs::File::create(path).map_err(|err| ChancePackError::io(path, err))?;
    serde_json::to_writer(io::BufWriter::new(file), value)?;
    Ok(())
}

/// Parses a solver report of `key: value` lines. Unknown keys are ignored.
pub fn parse_report(report: &str) -> Result<SolveOutcome> {
    let mut status = None;
    let mut solve_time = 0.0;
    let mut nodes = 0;
    let mut objective = None;
    let mut best_bound = None;
    let mut solution = None;

    for line in report.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "status" => status = Some(value.parse::<SolveStatus>().map_err(failed)?),
            "soltime" => solve_time = parse_field(value, "soltime")?,
            "nodes" => nodes = parse_field::<f64>(value, "nodes")? as u64,
            "obj" => objective = Some(parse_field(value, "obj")?),
            "best_bound" => best_bound = Some(parse_field(value, "best_bound")?),
            "values" => {
                solution = Some(
                    value
                        .split_whitespace()
                        .map(|raw| parse_field(raw, "values"))
                        .collect::<Result<Vec<f64>>>()?,
                )
            }
            _ => {}
        }
    }

    let status = status.unwrap_or(SolveStatus::Solved);
    let objective = objective.ok_or_else(|| {
        ChancePackError::SolveFailed(format!("solver returned no solution (status {})", status))
    })?;

    Ok(SolveOutcome {
        status,
        solve_time,
        nodes,
        objective,
        best_bound: best_bound.unwrap_or(objective),
        solution,
        log: String::new(),
    })
}

fn parse_field<T: FromStr>(raw: &str, key: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    raw.parse::<T>()
        .map_err(|err| failed(format!("report field {} '{}': {}", key, raw, err)))
}

fn failed(details: String) -> ChancePackError {
    ChancePackError::SolveFailed(details)
}
