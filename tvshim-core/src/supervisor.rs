use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::process::Command;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::command::BackendCommand;
use crate::control::ControlChannel;
use crate::journal::LogTag;
use crate::session::Session;
use crate::terminate::TerminationCoordinator;
use crate::{record, record_warn};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("failed to wait for backend: {0}")]
    Wait(#[source] std::io::Error),
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalSignal {
    Interrupt,
    Terminate,
    Hangup,
}

impl fmt::Display for ExternalSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExternalSignal::Interrupt => "SIGINT",
            ExternalSignal::Terminate => "SIGTERM",
            ExternalSignal::Hangup => "SIGHUP",
        };
        write!(f, "{}", label)
    }
}

/// Both stop sources converge on this one request type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopRequest {
    Control(String),
    Signal(ExternalSignal),
}

impl fmt::Display for StopRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopRequest::Control(line) => write!(f, "control command {line:?}"),
            StopRequest::Signal(signal) => write!(f, "{signal}"),
        }
    }
}

/// Where the child's stdin comes from.
pub enum ControlStream<R> {
    /// The child reads the caller's stdin itself (legacy backend).
    Inherited,
    /// The child gets no stdin; `reader` is interpreted on its behalf.
    Emulated { reader: R, hex_dump: bool },
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisedExit {
    pub status: ExitStatus,
    pub stop_requests: usize,
}

impl SupervisedExit {
    pub fn code(&self) -> i32 {
        exit_code(self.status)
    }
}

/// Child exit status as a shell would report it.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    coordinator: TerminationCoordinator,
    forward_signals: bool,
}

impl Supervisor {
    pub fn new(coordinator: TerminationCoordinator) -> Self {
        Self {
            coordinator,
            forward_signals: true,
        }
    }

    pub fn with_signal_forwarding(mut self, enabled: bool) -> Self {
        self.forward_signals = enabled;
        self
    }

    pub fn coordinator(&self) -> &TerminationCoordinator {
        &self.coordinator
    }

    /// Spawns `command` and blocks until it exits. Stop requests from the
    /// control stream or from signals run the termination coordinator for
    /// `session` and then send SIGTERM to the child.
    pub async fn run<R>(
        &self,
        command: &BackendCommand,
        session: Option<&Session>,
        control: ControlStream<R>,
    ) -> Result<SupervisedExit, SupervisorError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let mut process = Command::new(command.program());
        process
            .args(command.args())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        match &control {
            ControlStream::Inherited => process.stdin(Stdio::inherit()),
            ControlStream::Emulated { .. } => process.stdin(Stdio::null()),
        };

        let mut child = process.spawn().map_err(|source| SupervisorError::Spawn {
            program: command.program().to_string(),
            source,
        })?;
        let pid = child.id();
        if let (Some(session), Some(pid)) = (session, pid) {
            session.attach_pid(pid);
        }
        record!(LogTag::Info, "backend started (pid {pid:?})");

        let (stops, mut requests) = mpsc::unbounded_channel();
        let control_task: Option<JoinHandle<_>> = match control {
            ControlStream::Inherited => None,
            ControlStream::Emulated { reader, hex_dump } => Some(tokio::spawn(
                ControlChannel::new(reader, hex_dump, stops.clone()).run(),
            )),
        };
        let signal_task = if self.forward_signals {
            match listen_for_signals(stops.clone()) {
                Ok(task) => Some(task),
                Err(error) => {
                    let _ = child.start_kill();
                    return Err(error);
                }
            }
        } else {
            None
        };
        drop(stops);

        let mut stop_requests = 0usize;
        let waited = loop {
            tokio::select! {
                status = child.wait() => break status,
                Some(request) = requests.recv() => {
                    stop_requests += 1;
                    self.stop(&request, session, pid).await;
                }
            }
        };

        // the session tag may still match a stale backend process
        if let Some(session) = session {
            self.coordinator.terminate(session).await;
        }
        if let Some(task) = control_task {
            task.abort();
        }
        if let Some(task) = signal_task {
            task.abort();
        }

        let status = waited.map_err(SupervisorError::Wait)?;
        record!(
            LogTag::Info,
            "backend exited with {} after {stop_requests} stop request(s)",
            exit_code(status)
        );
        Ok(SupervisedExit {
            status,
            stop_requests,
        })
    }

    async fn stop(&self, request: &StopRequest, session: Option<&Session>, pid: Option<u32>) {
        record!(LogTag::Info, "stopping backend: {request}");
        if let Some(session) = session {
            self.coordinator.terminate(session).await;
        }
        if let Some(pid) = pid {
            signal_child(pid, Signal::SIGTERM);
        }
    }
}

fn signal_child(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        record_warn!(LogTag::Kill, "refusing to signal out-of-range pid {pid}");
        return;
    };
    if raw <= 0 {
        return;
    }
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => record!(LogTag::Kill, "sent {signal} to pid {pid}"),
        Err(Errno::ESRCH) => debug!(pid, "backend already gone"),
        Err(error) => record_warn!(LogTag::Kill, "failed to send {signal} to pid {pid}: {error}"),
    }
}

fn listen_for_signals(
    stops: mpsc::UnboundedSender<StopRequest>,
) -> Result<JoinHandle<()>, SupervisorError> {
    let mut interrupt = signal(SignalKind::interrupt()).map_err(SupervisorError::Signals)?;
    let mut terminate = signal(SignalKind::terminate()).map_err(SupervisorError::Signals)?;
    let mut hangup = signal(SignalKind::hangup()).map_err(SupervisorError::Signals)?;
    Ok(tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = interrupt.recv() => ExternalSignal::Interrupt,
                Some(()) = terminate.recv() => ExternalSignal::Terminate,
                Some(()) = hangup.recv() => ExternalSignal::Hangup,
                else => break,
            };
            if stops.send(StopRequest::Signal(received)).is_err() {
                break;
            }
        }
    }))
}
