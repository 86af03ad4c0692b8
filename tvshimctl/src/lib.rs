use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tvshim_core::{
    classify_line, hex_dump, load_shim_config, load_shim_config_with, ControlMessage,
    ExecutionPlan, GopAdjustment, ShimConfig, TerminationCoordinator, TerminationReport,
    TerminationTarget,
};

pub mod shim;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] tvshim_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("nothing to stop: pass --tag and/or --input")]
    MissingTarget,
    #[error("backend.indirection is empty; the backend is not isolated")]
    NotIsolated,
    #[error("no termination strategy stopped the backend")]
    StillRunning,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "tvshim operator interface", long_about = None)]
pub struct Cli {
    /// Alternate tvshim.toml (defaults to $TVSHIM_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify an invocation and show the backend command without running it
    Plan(PlanArgs),
    /// Stop an isolated backend through the indirection command
    Stop(StopArgs),
    /// Print the effective configuration
    Config,
    /// Classify one line of the control protocol
    ClassifyLine(ClassifyLineArgs),
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Arguments exactly as the caller would pass them to the shim
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Session tag embedded in the backend's metadata
    #[arg(long)]
    pub tag: Option<String>,
    /// Literal input path the backend was started with
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Args, Debug)]
pub struct ClassifyLineArgs {
    #[arg(allow_hyphen_values = true)]
    pub line: String,
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Plan(args) => {
            let plan = context.plan(&args.args);
            render(&plan, cli.format)?;
        }
        Commands::Stop(args) => {
            let report = context.stop(args)?;
            render(&report, cli.format)?;
            if !report.report.stopped() {
                return Err(AppError::StillRunning);
            }
        }
        Commands::Config => {
            render(&context.config, cli.format)?;
        }
        Commands::ClassifyLine(args) => {
            let report = LineReport::new(&args.line);
            render(&report, cli.format)?;
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: ShimConfig,
    coordinator: TerminationCoordinator,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(path) => load_shim_config_with(Some(path), |key| std::env::var(key).ok())?,
            None => load_shim_config()?,
        };
        Ok(Self::from_config(config))
    }

    fn from_config(config: ShimConfig) -> Self {
        let coordinator = TerminationCoordinator::new(config.backend.indirection.clone());
        Self {
            config,
            coordinator,
        }
    }

    fn plan(&self, args: &[String]) -> ExecutionPlan {
        ExecutionPlan::build(args.iter().cloned(), &self.config)
    }

    fn stop(&self, args: &StopArgs) -> Result<StopReport> {
        let target = TerminationTarget {
            tag: args.tag.clone().filter(|tag| !tag.is_empty()),
            input: args.input.clone().filter(|input| !input.is_empty()),
        };
        if target.tag.is_none() && target.input.is_none() {
            return Err(AppError::MissingTarget);
        }
        if !self.config.is_isolated() {
            return Err(AppError::NotIsolated);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let report = runtime.block_on(self.coordinator.terminate_target(&target));
        Ok(StopReport {
            tag: target.tag,
            input: target.input,
            report,
        })
    }
}

impl DisplayFallback for ExecutionPlan {
    fn display(&self) -> String {
        let mut lines = vec![format!("mode: {}", self.mode)];
        if let Some(session) = &self.session {
            lines.push(format!("session: {}", session.tag()));
        }
        if let Some(derived) = &self.derived {
            lines.push(format!(
                "rates: bitrate={} maxrate={} bufsize={}",
                derived.bitrate, derived.maxrate, derived.bufsize
            ));
            let gop = match &derived.gop.adjustment {
                GopAdjustment::Clamped { from, .. } => {
                    format!("{} (clamped from {from})", derived.gop.value)
                }
                GopAdjustment::Skipped { .. } => {
                    format!("{} (clamp skipped)", derived.gop.value)
                }
                GopAdjustment::Disabled | GopAdjustment::Unchanged => derived.gop.value.clone(),
            };
            lines.push(format!("gop: {gop}"));
            lines.push(format!(
                "filter: {}",
                derived.filter.as_deref().unwrap_or("-")
            ));
        }
        lines.push(format!("command: {}", self.command));
        lines.join("\n")
    }
}

impl DisplayFallback for ShimConfig {
    fn display(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|err| format!("<unrenderable config: {err}>"))
    }
}

#[derive(Debug, Serialize)]
pub struct StopReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    pub report: TerminationReport,
}

impl DisplayFallback for StopReport {
    fn display(&self) -> String {
        if self.report.is_noop() {
            return "No termination strategy applied".to_string();
        }
        let mut lines = Vec::new();
        for attempt in &self.report.attempts {
            let status = attempt
                .status
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!(
                "[{outcome}] {strategy} pattern={pattern} status={status}",
                outcome = if attempt.succeeded { "ok" } else { "fail" },
                strategy = attempt.strategy,
                pattern = attempt.pattern,
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct LineReport {
    pub message: ControlMessage,
    pub hex: String,
}

impl LineReport {
    fn new(line: &str) -> Self {
        Self {
            message: classify_line(line),
            hex: hex_dump(line),
        }
    }
}

impl DisplayFallback for LineReport {
    fn display(&self) -> String {
        let (verdict, line) = match &self.message {
            ControlMessage::Stop(line) => ("stop", line),
            ControlMessage::Unhandled(line) => ("unhandled", line),
        };
        format!("{verdict}: {line:?}\nhex: {}", self.hex)
    }
}
