use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::optimizer::{PackingConfig, PackingStrategy};
use crate::solver::SolveParams;

/// Source of raw configuration values by variable name.
pub(crate) type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub solver: SolverConfig,
    pub output: OutputConfig,
    pub packing: PackingSettings,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(&env_string)
    }

    fn from_lookup(lookup: Lookup<'_>) -> Self {
        Self {
            api: ApiConfig::from_lookup(lookup),
            solver: SolverConfig::from_lookup(lookup),
            output: OutputConfig::from_lookup(lookup),
            packing: PackingSettings::from_lookup(lookup),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8080;
    const HOST_VAR: &'static str = "CHANCE_PACK_API_HOST";
    const PORT_VAR: &'static str = "CHANCE_PACK_API_PORT";

    fn from_lookup(lookup: Lookup<'_>) -> Self {
        let host_value = lookup(Self::HOST_VAR).unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, effective_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                tracing::warn!(
                    "Could not parse {} ('{}'): {}. Using {}.",
                    Self::HOST_VAR,
                    host_value,
                    err,
                    Self::DEFAULT_HOST
                );
                (
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = match lookup(Self::PORT_VAR) {
            Some(raw) => match raw.parse::<u16>() {
                Ok(value) if value != 0 => value,
                Ok(_) => {
                    tracing::warn!(
                        "{} must not be 0. Using {}.",
                        Self::PORT_VAR,
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
                Err(err) => {
                    tracing::warn!(
                        "Could not parse {} ('{}'): {}. Using {}.",
                        Self::PORT_VAR,
                        raw,
                        err,
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
            },
            None => Self::DEFAULT_PORT,
        };

        Self {
            bind_ip,
            display_host: effective_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }
}

/// Configuration for the external exact solver.
#[derive(Clone, Debug)]
pub struct SolverConfig {
    params: SolveParams,
    command: Option<String>,
}

impl SolverConfig {
    const TIME_LIMIT_VAR: &'static str = "CHANCE_PACK_TIME_LIMIT";
    const THREADS_VAR: &'static str = "CHANCE_PACK_THREADS";
    const PARALLEL_VAR: &'static str = "CHANCE_PACK_PARALLEL";
    const ABS_GAP_VAR: &'static str = "CHANCE_PACK_ABS_GAP";
    const COMMAND_VAR: &'static str = "CHANCE_PACK_SOLVER_COMMAND";

    fn from_lookup(lookup: Lookup<'_>) -> Self {
        let time_limit_secs = load_f64_with_warning(
            lookup,
            Self::TIME_LIMIT_VAR,
            SolveParams::DEFAULT_TIME_LIMIT_SECS,
            |value| value.is_finite() && value > 0.0,
            "must be greater than 0",
            "Time limit differs from the benchmark default",
        );

        let abs_gap = load_f64_with_warning(
            lookup,
            Self::ABS_GAP_VAR,
            SolveParams::DEFAULT_ABS_GAP,
            |value| value.is_finite() && value >= 0.0,
            "must not be negative",
            "Absolute gap changed; a gap below 1 makes the solver prove bin-count optimality",
        );

        let threads = match lookup(Self::THREADS_VAR) {
            Some(raw) => match raw.parse::<usize>() {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(
                        "Could not parse {} ('{}'): {}. Letting the solver choose.",
                        Self::THREADS_VAR,
                        raw,
                        err
                    );
                    0
                }
            },
            None => 0,
        };

        let parallel = lookup(Self::PARALLEL_VAR)
            .and_then(|raw| parse_bool(&raw, Self::PARALLEL_VAR))
            .unwrap_or(true);

        let params = SolveParams {
            time_limit_secs,
            threads: if parallel { threads } else { 1 },
            abs_gap,
        };

        Self {
            params,
            command: lookup(Self::COMMAND_VAR),
        }
    }

    pub fn params(&self) -> SolveParams {
        self.params
    }

    /// Command line of the solver executable, if configured.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }
}

/// Where result and log files of solved instances go.
#[derive(Clone, Debug)]
pub struct OutputConfig {
    result_dir: PathBuf,
    log_dir: PathBuf,
    solver_tag: String,
}

impl OutputConfig {
    const DEFAULT_RESULT_DIR: &'static str = "results";
    const DEFAULT_LOG_DIR: &'static str = "logs";
    const DEFAULT_SOLVER_TAG: &'static str = "bcsocp";

    fn from_lookup(lookup: Lookup<'_>) -> Self {
        Self {
            result_dir: lookup("CHANCE_PACK_RESULT_DIR")
                .unwrap_or_else(|| Self::DEFAULT_RESULT_DIR.to_string())
                .into(),
            log_dir: lookup("CHANCE_PACK_LOG_DIR")
                .unwrap_or_else(|| Self::DEFAULT_LOG_DIR.to_string())
                .into(),
            solver_tag: lookup("CHANCE_PACK_SOLVER_TAG")
                .unwrap_or_else(|| Self::DEFAULT_SOLVER_TAG.to_string()),
        }
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Suffix of result and log file names.
    pub fn solver_tag(&self) -> &str {
        &self.solver_tag
    }
}

/// Configuration of the reference packing heuristic.
#[derive(Clone, Debug)]
pub struct PackingSettings {
    packing: PackingConfig,
}

impl PackingSettings {
    const STRATEGY_VAR: &'static str = "CHANCE_PACK_STRATEGY";
    const BASELINE_VAR: &'static str = "CHANCE_PACK_FIRST_FIT_BASELINE";

    pub(crate) fn from_lookup(lookup: Lookup<'_>) -> Self {
        let strategy = match lookup(Self::STRATEGY_VAR) {
            Some(raw) => raw.parse::<PackingStrategy>().unwrap_or_else(|err| {
                tracing::warn!(
                    "{} is invalid: {}. Using {}.",
                    Self::STRATEGY_VAR,
                    err,
                    PackingStrategy::default()
                );
                PackingStrategy::default()
            }),
            None => PackingStrategy::default(),
        };
        if strategy != PackingStrategy::BestFit {
            tracing::warn!(
                "Reference packing uses {} instead of best-fit ({} = {}).",
                strategy,
                Self::STRATEGY_VAR,
                strategy
            );
        }

        let compute_baseline = lookup(Self::BASELINE_VAR)
            .and_then(|raw| parse_bool(&raw, Self::BASELINE_VAR))
            .unwrap_or(PackingConfig::DEFAULT_COMPUTE_BASELINE);

        let packing = PackingConfig::builder()
            .strategy(strategy)
            .compute_baseline(compute_baseline)
            .build();

        Self { packing }
    }

    /// Returns the configured PackingConfig.
    pub fn packing_config(&self) -> PackingConfig {
        self.packing
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            tracing::warn!("Access to {} failed: {}. Using default value.", name, err);
            None
        }
    }
}

fn parse_bool(raw: &str, var_name: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        other => {
            tracing::warn!(
                "Could not interpret {} ('{}') as boolean value. Using default value.",
                var_name,
                other
            );
            None
        }
    }
}

fn load_f64_with_warning(
    lookup: Lookup<'_>,
    var_name: &str,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
    warning: &str,
) -> f64 {
    match lookup(var_name) {
        Some(raw) => match raw.parse::<f64>() {
            Ok(value) => {
                if !validator(value) {
                    tracing::warn!(
                        "{} contains invalid value '{}': {}. Using {}.",
                        var_name,
                        raw,
                        invalid_hint,
                        default
                    );
                    default
                } else {
                    let tolerance = (default.abs().max(1.0)) * 1e-9;
                    if (value - default).abs() > tolerance {
                        tracing::info!("{} ({} = {}).", warning, var_name, value);
                    }
                    value
                }
            }
            Err(err) => {
                tracing::warn!(
                    "Could not parse {} ('{}') as number: {}. Using {}.",
                    var_name,
                    raw,
                    err,
                    default
                );
                default
            }
        },
        None => default,
    }
}
