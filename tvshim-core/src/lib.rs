pub mod command;
pub mod config;
pub mod control;
pub mod derive;
pub mod error;
pub mod invocation;
pub mod journal;
pub mod mode;
pub mod request;
pub mod session;
pub mod supervisor;
pub mod terminate;

pub use command::{BackendCommand, ExecutionPlan, Token};
pub use config::{
    load_shim_config, load_shim_config_with, AudioMapping, AudioSection, BackendSection,
    DemuxSection, LoggingSection, OutputSection, ShimConfig, TriggerSection, VideoSection,
};
pub use control::{classify_line, ControlChannel, ControlMessage, ControlOutcome};
pub use derive::{clamp_gop, scale_rate, select_filter, DerivedParameters, GopAdjustment};
pub use error::{ConfigError, Result};
pub use invocation::{Invocation, InvocationError};
pub use journal::{hex_dump, LogTag};
pub use mode::{Mode, ModeTriggers};
pub use request::{FrameSize, RequestParameters};
pub use session::Session;
pub use supervisor::{
    exit_code, ControlStream, ExternalSignal, StopRequest, SupervisedExit, Supervisor,
    SupervisorError,
};
pub use terminate::{
    CommandExecutor, SystemCommandExecutor, TerminationAttempt, TerminationCoordinator,
    TerminationReport, TerminationStrategy, TerminationTarget,
};
