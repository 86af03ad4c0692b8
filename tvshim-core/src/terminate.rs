//! Stops a backend that runs behind an indirection command.
//!
//! The indirection command offers no structured process API, so processes
//! are matched by command line with `pkill -f`, escalating through:
//!
//! 1. graceful signal matching the session tag (unambiguous across sessions),
//! 2. graceful signal matching the literal input path,
//! 3. forceful signal matching the literal input path.
//!
//! Each step is safe to repeat: a target that is already gone only yields a
//! non-zero `pkill` status, which is logged.

use std::fmt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tokio::process::Command;

use crate::journal::LogTag;
use crate::session::Session;
use crate::{record, record_warn};

pub const PKILL: &str = "pkill";

fn ere_metacharacters() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[\\.^$|?*+()\[\]{}]").expect("valid regex"))
}

/// Escapes `value` for POSIX extended regular expressions, which is what
/// `pkill -f` matches against.
pub fn ere_escape(value: &str) -> String {
    ere_metacharacters()
        .replace_all(value, "\\${0}")
        .into_owned()
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<ExitStatus>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<ExitStatus> {
        Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .status()
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStrategy {
    TagGraceful,
    PathGraceful,
    PathForceful,
}

impl TerminationStrategy {
    fn signal(self) -> &'static str {
        match self {
            TerminationStrategy::TagGraceful | TerminationStrategy::PathGraceful => "-TERM",
            TerminationStrategy::PathForceful => "-KILL",
        }
    }
}

impl fmt::Display for TerminationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TerminationStrategy::TagGraceful => "tag/graceful",
            TerminationStrategy::PathGraceful => "path/graceful",
            TerminationStrategy::PathForceful => "path/forceful",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminationAttempt {
    pub strategy: TerminationStrategy,
    pub pattern: String,
    /// `None` when the indirection command could not be run at all.
    pub status: Option<i32>,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TerminationReport {
    pub attempts: Vec<TerminationAttempt>,
}

impl TerminationReport {
    pub fn stopped(&self) -> bool {
        self.attempts.iter().any(|attempt| attempt.succeeded)
    }

    pub fn is_noop(&self) -> bool {
        self.attempts.is_empty()
    }
}

/// Which processes a manual or automatic stop should target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationTarget {
    pub tag: Option<String>,
    pub input: Option<String>,
}

impl From<&Session> for TerminationTarget {
    fn from(session: &Session) -> Self {
        Self {
            tag: Some(session.tag().to_string()),
            input: session.input().map(str::to_string),
        }
    }
}

#[derive(Clone)]
pub struct TerminationCoordinator {
    indirection: Vec<String>,
    executor: Arc<dyn CommandExecutor>,
}

impl fmt::Debug for TerminationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminationCoordinator")
            .field("indirection", &self.indirection)
            .finish()
    }
}

impl TerminationCoordinator {
    pub fn new(indirection: Vec<String>) -> Self {
        Self {
            indirection,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// No-op for sessions that are not isolated: signalling the local
    /// child is enough there.
    pub async fn terminate(&self, session: &Session) -> TerminationReport {
        if !session.is_isolated() {
            return TerminationReport::default();
        }
        self.terminate_target(&TerminationTarget::from(session)).await
    }

    pub async fn terminate_target(&self, target: &TerminationTarget) -> TerminationReport {
        let mut report = TerminationReport::default();
        let Some((program, prefix)) = self.indirection.split_first() else {
            return report;
        };
        let invoker = Invoker {
            program,
            prefix,
            executor: self.executor.as_ref(),
        };

        if let Some(tag) = target.tag.as_deref().filter(|tag| !tag.is_empty()) {
            let attempt = invoker
                .attempt(TerminationStrategy::TagGraceful, ere_escape(tag))
                .await;
            let done = attempt.succeeded;
            report.attempts.push(attempt);
            if done {
                return report;
            }
        }

        let Some(input) = target.input.as_deref().filter(|input| !input.is_empty()) else {
            return report;
        };
        let pattern = ere_escape(input);

        let attempt = invoker
            .attempt(TerminationStrategy::PathGraceful, pattern.clone())
            .await;
        let done = attempt.succeeded;
        report.attempts.push(attempt);
        if done {
            return report;
        }

        let attempt = invoker
            .attempt(TerminationStrategy::PathForceful, pattern)
            .await;
        if !attempt.succeeded {
            record_warn!(
                LogTag::Kill,
                "all termination strategies failed for {input}; giving up"
            );
        }
        report.attempts.push(attempt);
        report
    }
}

struct Invoker<'a> {
    program: &'a str,
    prefix: &'a [String],
    executor: &'a dyn CommandExecutor,
}

impl Invoker<'_> {
    async fn attempt(&self, strategy: TerminationStrategy, pattern: String) -> TerminationAttempt {
        let program = self.program;
        let mut args: Vec<String> = self.prefix.to_vec();
        args.push(PKILL.to_string());
        args.push(strategy.signal().to_string());
        args.push("-f".to_string());
        args.push(pattern.clone());

        let result = self.executor.run(Path::new(program), &args).await;
        let (status, succeeded) = match result {
            Ok(status) => (status.code(), status.success()),
            Err(error) => {
                record_warn!(
                    LogTag::Kill,
                    "{strategy}: failed to run {program}: {error}"
                );
                (None, false)
            }
        };
        record!(
            LogTag::Kill,
            "{strategy}: {program} {} -> status {status:?}",
            args.join(" ")
        );
        TerminationAttempt {
            strategy,
            pattern,
            status,
            succeeded,
        }
    }
}
