use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chance_pack::assembler::assemble;
use chance_pack::config::AppConfig;
use chance_pack::generator::{GeneratorSettings, RawItem, build_instance};
use chance_pack::optimizer::{PackingConfig, PackingStrategy, pack_with_config};
use chance_pack::pipeline::{RunConfig, run_instance};
use chance_pack::solver::CommandSolver;
use chance_pack::uncertainty::UncertaintyCase;
use chance_pack::{ChancePackError, Result, api, reader};

#[derive(Parser)]
#[command(name = "chance-pack")]
#[command(version)]
#[command(about = "Chance-constrained bin packing: best-fit heuristic and exact model assembly")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API (default)
    Serve,

    /// Pack an instance file and print the bins
    Pack {
        instance: PathBuf,

        /// Heuristic for the packing
        #[arg(short, long)]
        strategy: Option<PackingStrategy>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Assemble the conic model and warm start and write them as JSON
    Model {
        instance: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run the exact solver on instance files and write result records
    Solve {
        #[arg(required = true)]
        instances: Vec<PathBuf>,

        /// Solver command line; overrides CHANCE_PACK_SOLVER_COMMAND
        #[arg(long)]
        solver: Option<String>,

        /// Time limit in seconds; overrides CHANCE_PACK_TIME_LIMIT
        #[arg(long)]
        time_limit: Option<f64>,
    },

    /// Validate an instance and compare heuristic bin counts
    Check { instance: PathBuf },

    /// Build an instance file from raw item parameters (JSON array)
    Build {
        #[arg(long)]
        case: UncertaintyCase,

        #[arg(long)]
        alpha: f64,

        #[arg(long)]
        capacity: f64,

        #[arg(long, default_value_t = GeneratorSettings::DEFAULT_HEADROOM)]
        headroom: f64,

        #[arg(long)]
        items: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Loads `.env`; a missing file is not an error.
fn load_dotenv() -> Option<dotenvy::Error> {
    match dotenvy::dotenv() {
        Err(err)
            if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) =>
        {
            Some(err)
        }
        _ => None,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let dotenv_error = load_dotenv();
    setup_logging(cli.verbose);
    if let Some(err) = dotenv_error {
        tracing::warn!("Could not load .env: {}", err);
    }

    let app_config = AppConfig::from_env();

    let outcome = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            tracing::info!("Packing service starting");
            api::start_api_server(app_config.api.clone(), app_config.packing.clone())
                .await
                .map_err(|err| ChancePackError::io(app_config.api.socket_addr().to_string(), err))
                .map(|()| ExitCode::SUCCESS)
        }
        Commands::Pack {
            instance,
            strategy,
            json,
        } => {
            let mut config = app_config.packing.packing_config();
            if let Some(strategy) = strategy {
                config.strategy = strategy;
            }
            run_pack(&instance, config, json)
        }
        Commands::Model { instance, output } => run_model(&instance, &output),
        Commands::Solve {
            instances,
            solver,
            time_limit,
        } => run_solve(&app_config, &instances, solver.as_deref(), time_limit),
        Commands::Check { instance } => run_check(&instance),
        Commands::Build {
            case,
            alpha,
            capacity,
            headroom,
            items,
            output,
        } => {
            let settings = GeneratorSettings::new(case, alpha, capacity).with_headroom(headroom);
            run_build(&settings, &items, &output)
        }
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run_pack(path: &Path, config: PackingConfig, json: bool) -> Result<ExitCode> {
    let instance = reader::read_instance(path)?;
    let result = pack_with_config(&instance, config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(ExitCode::SUCCESS);
    }

    for diag in &result.diagnostics {
        println!(
            "bin {}: items {:?} load {:.4} / {} (slack {:.4})",
            diag.bin,
            result.packing.bins[diag.bin].items,
            diag.chance_load,
            instance.capacity(),
            diag.slack
        );
    }
    println!("bins: {}", result.bin_count());
    Ok(ExitCode::SUCCESS)
}

fn run_model(path: &Path, output: &Path) -> Result<ExitCode> {
    let instance = reader::read_instance(path)?;
    let packing = pack_with_config(&instance, PackingConfig::default())?.into_packing();
    let assembled = assemble(&instance, &packing)?;

    let file = fs::File::create(output).map_err(|err| ChancePackError::io(output, err))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), &assembled)?;
    tracing::info!(
        output = %output.display(),
        slots = assembled.upper_bound(),
        variables = assembled.model.variables.len(),
        constraints = assembled.model.constraints.len(),
        "model written"
    );
    Ok(ExitCode::SUCCESS)
}

fn run_solve(
    app_config: &AppConfig,
    instances: &[PathBuf],
    solver_override: Option<&str>,
    time_limit: Option<f64>,
) -> Result<ExitCode> {
    let command = solver_override
        .or(app_config.solver.command())
        .ok_or_else(|| {
            ChancePackError::SolverUnavailable(
                "no solver command configured (CHANCE_PACK_SOLVER_COMMAND or --solver)"
                    .to_string(),
            )
        })?;
    let solver = CommandSolver::from_command_line(command)?;

    let mut params = app_config.solver.params();
    if let Some(limit) = time_limit {
        params.time_limit_secs = limit;
    }
    params.validate()?;

    let output = &app_config.output;
    for dir in [output.result_dir(), output.log_dir()] {
        fs::create_dir_all(dir).map_err(|err| ChancePackError::io(dir, err))?;
    }

    let mut solved = 0;
    let mut unsolved = 0;
    let mut failed = 0;
    for path in instances {
        let config = RunConfig::for_instance(
            path,
            output.result_dir(),
            output.log_dir(),
            output.solver_tag(),
            params,
        )
        .with_packing(app_config.packing.packing_config());

        match run_instance(&config, &solver) {
            Ok(record) => {
                solved += 1;
                println!(
                    "{}: {} obj {} bound {} (first solution {})",
                    path.display(),
                    record.status,
                    record.objective,
                    record.best_bound,
                    record.first_solution
                );
            }
            Err(err) if err.is_unsolved() => {
                unsolved += 1;
                println!("{}: unsolved ({})", path.display(), err);
            }
            Err(err) => {
                failed += 1;
                tracing::error!(instance = %path.display(), "{}", err);
            }
        }
    }

    tracing::info!(solved, unsolved, failed, "solve run finished");
    Ok(if failed > 0 {
        ExitCode::FAILURE
    } else if unsolved > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn run_check(path: &Path) -> Result<ExitCode> {
    let instance = reader::read_instance(path)?;
    let config = PackingConfig::builder()
        .strategy(PackingStrategy::BestFit)
        .compute_baseline(true)
        .build();
    let result = pack_with_config(&instance, config)?;

    println!(
        "{}: {} items, capacity {}, Dalpha {}",
        path.display(),
        instance.len(),
        instance.capacity(),
        instance.dalpha()
    );
    println!("best-fit bins: {}", result.bin_count());
    if let Some(first_fit) = result.summary.first_fit_bins {
        println!("first-fit bins: {}", first_fit);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_build(settings: &GeneratorSettings, items: &Path, output: &Path) -> Result<ExitCode> {
    let text = fs::read_to_string(items).map_err(|err| ChancePackError::io(items, err))?;
    let raw_items: Vec<RawItem> = serde_json::from_str(&text)?;
    let instance = build_instance(settings, &raw_items)?;
    reader::write_instance(output, &instance)?;
    tracing::info!(
        output = %output.display(),
        items = instance.len(),
        dalpha = instance.dalpha(),
        "instance written"
    );
    Ok(ExitCode::SUCCESS)
}
