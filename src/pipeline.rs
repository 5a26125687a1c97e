//! End-to-end driver: instance file to result record.
//!
//! read → pack → assemble → solve → write. All paths come in through [`RunConfig`].

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::assembler::{self, AssemblyOptions, VariableLayout};
use crate::error::{ChancePackError, Result};
use crate::model::{Instance, Packing};
use crate::optimizer::{self, PackingConfig};
use crate::reader;
use crate::report::{self, ResultRecord};
use crate::solver::{ExactSolver, SolveParams};
use crate::types::LOAD_TOLERANCE;

/// Everything one run needs.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub instance_path: PathBuf,
    pub result_path: PathBuf,
    pub log_path: PathBuf,
    pub params: SolveParams,
    pub packing: PackingConfig,
    pub assembly: AssemblyOptions,
}

impl RunConfig {
    /// Sinks named `<dir>/<instance file name>_<tag>.result` and `.log`.
    pub fn for_instance(
        instance_path: impl Into<PathBuf>,
        result_dir: &Path,
        log_dir: &Path,
        tag: &str,
        params: SolveParams,
    ) -> Self {
        let instance_path = instance_path.into();
        let name = instance_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "instance".to_string());
        Self {
            result_path: result_dir.join(format!("{}_{}.result", name, tag)),
            log_path: log_dir.join(format!("{}_{}.log", name, tag)),
            instance_path,
            params,
            packing: PackingConfig::default(),
            assembly: AssemblyOptions::default(),
        }
    }

    pub fn with_packing(mut self, packing: PackingConfig) -> Self {
        self.packing = packing;
        self
    }
}

/// Runs the pipeline for one instance.
///
/// An unsolved instance (solver unavailable or no incumbent) returns the error and
/// leaves neither result nor log file behind.
pub fn run_instance(config: &RunConfig, solver: &dyn ExactSolver) -> Result<ResultRecord> {
    let instance = reader::read_instance(&config.instance_path)?;
    tracing::info!(
        instance = %config.instance_path.display(),
        items = instance.len(),
        "instance loaded"
    );

    let packed = optimizer::pack_with_config(&instance, config.packing)?;
    tracing::info!(
        strategy = %packed.summary.strategy,
        bins = packed.bin_count(),
        first_fit_bins = ?packed.summary.first_fit_bins,
        "reference packing built"
    );

    let assembled =
        assembler::assemble_with_options(&instance, &packed.packing, config.assembly)?;

    let mut log = String::new();
    let _ = writeln!(log, "instance: {}", config.instance_path.display());
    let _ = writeln!(log, "descriptor: {}", instance.descriptor());
    let _ = writeln!(log, "reference bins: {}", assembled.upper_bound());
    let _ = writeln!(
        log,
        "variables: {} constraints: {}",
        assembled.model.variables.len(),
        assembled.model.constraints.len()
    );
    fs::write(&config.log_path, &log).map_err(|err| ChancePackError::io(&config.log_path, err))?;

    let outcome = match solver.solve(&assembled.model, &assembled.warm_start, &config.params) {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(
                instance = %config.instance_path.display(),
                error = %err,
                "instance unsolved"
            );
            report::discard_unsolved(&config.result_path, &config.log_path)?;
            return Err(err);
        }
    };
    tracing::info!(
        status = %outcome.status,
        objective = outcome.objective,
        best_bound = outcome.best_bound,
        nodes = outcome.nodes,
        "solver finished"
    );

    if let Some(values) = &outcome.solution {
        match solver_packing(&instance, &assembled.model.layout, values) {
            Ok(packing) => {
                tracing::debug!(bins = packing.bin_count(), "solver packing verified");
                let _ = writeln!(log, "solver bins: {}", packing.bin_count());
            }
            Err(err) => tracing::warn!(error = %err, "solver solution does not verify"),
        }
    }

    log.push_str(&outcome.log);
    fs::write(&config.log_path, &log).map_err(|err| ChancePackError::io(&config.log_path, err))?;

    let record = ResultRecord::new(instance.descriptor(), &outcome, assembled.upper_bound());
    record.write_to(&config.result_path)?;
    Ok(record)
}

fn solver_packing(instance: &Instance, layout: &VariableLayout, values: &[f64]) -> Result<Packing> {
    let packing = assembler::extract_packing(instance, layout, values)?;
    packing
        .verify(instance, LOAD_TOLERANCE)
        .map_err(ChancePackError::SolveFailed)?;
    Ok(packing)
}
