use std::os::unix::process::CommandExt;

use thiserror::Error;
use tokio::io::{BufReader, Stdin};

use crate::command::{BackendCommand, ExecutionPlan};
use crate::config::ShimConfig;
use crate::derive::{DerivedParameters, GopAdjustment};
use crate::error::ConfigError;
use crate::journal::LogTag;
use crate::mode::Mode;
use crate::record;
use crate::supervisor::{ControlStream, Supervisor, SupervisorError};
use crate::terminate::TerminationCoordinator;

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("failed to exec {program}: {source}")]
    Exec {
        program: String,
        source: std::io::Error,
    },
}

/// One run of the shim: classify, synthesize, then exec or supervise.
#[derive(Debug)]
pub struct Invocation {
    config: ShimConfig,
    supervisor: Supervisor,
}

impl Invocation {
    pub fn new(config: ShimConfig) -> Self {
        let coordinator = TerminationCoordinator::new(config.backend.indirection.clone());
        Self {
            supervisor: Supervisor::new(coordinator),
            config,
        }
    }

    pub fn with_supervisor(mut self, supervisor: Supervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn config(&self) -> &ShimConfig {
        &self.config
    }

    pub fn plan<I, S>(&self, args: I) -> ExecutionPlan
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExecutionPlan::build(args, &self.config)
    }

    /// Returns the backend's exit code. Passthrough never returns on success
    /// because the current process is replaced by the legacy backend.
    pub async fn run<I, S>(&self, args: I) -> Result<i32, InvocationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let plan = self.plan(args);
        record!(
            LogTag::Original,
            "{}",
            plan.request.original_args().join(" ")
        );
        record!(LogTag::Info, "mode: {}", plan.mode);

        match plan.mode {
            Mode::Passthrough => {
                record!(LogTag::Passthrough, "{}", plan.command);
                Err(replace_process(&plan.command))
            }
            Mode::CopyOnly => {
                record!(LogTag::Copy, "{}", plan.command);
                let exit = self
                    .supervisor
                    .run(
                        &plan.command,
                        None,
                        ControlStream::<BufReader<Stdin>>::Inherited,
                    )
                    .await?;
                Ok(exit.code())
            }
            Mode::Transcode => {
                if let Some(derived) = &plan.derived {
                    log_derivations(derived);
                }
                record!(LogTag::Transcode, "{}", plan.command);
                let control = ControlStream::Emulated {
                    reader: BufReader::new(tokio::io::stdin()),
                    hex_dump: self.config.logging.hex_dump,
                };
                let exit = self
                    .supervisor
                    .run(&plan.command, plan.session.as_ref(), control)
                    .await?;
                Ok(exit.code())
            }
        }
    }
}

fn log_derivations(derived: &DerivedParameters) {
    record!(
        LogTag::Info,
        "bitrate {} -> maxrate {}, bufsize {}",
        derived.bitrate,
        derived.maxrate,
        derived.bufsize
    );
    match &derived.gop.adjustment {
        GopAdjustment::Clamped { from, to } => {
            record!(LogTag::Info, "gop clamped from {from} to {to}")
        }
        GopAdjustment::Skipped { gop, max } => {
            record!(LogTag::Info, "gop clamp skipped: {gop:?} / {max:?} not numeric")
        }
        GopAdjustment::Disabled | GopAdjustment::Unchanged => {}
    }
    match &derived.filter {
        Some(filter) => record!(LogTag::Info, "video filter: {filter}"),
        None => record!(LogTag::Info, "no video filter configured"),
    }
}

/// Replaces the current process; only returns on failure.
fn replace_process(command: &BackendCommand) -> InvocationError {
    let source = std::process::Command::new(command.program())
        .args(command.args())
        .exec();
    InvocationError::Exec {
        program: command.program().to_string(),
        source,
    }
}
