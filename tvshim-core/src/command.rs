use std::fmt;

use serde::Serialize;

use crate::config::{AudioMapping, ShimConfig};
use crate::derive::DerivedParameters;
use crate::mode::{Mode, ModeTriggers};
use crate::request::RequestParameters;
use crate::session::Session;

pub const GENPTS_FLAGS: [&str; 2] = ["-fflags", "+genpts"];
pub const LEGACY_CONTROL_FLAG: &str = "-stdin";
pub const STDOUT_TARGET: &str = "pipe:1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Token {
    Flag { name: String },
    Option { name: String, value: String },
    /// Forwarded as-is: caller arguments, configured argument lists, outputs.
    Raw { value: String },
}

impl Token {
    fn push_to(&self, argv: &mut Vec<String>) {
        match self {
            Token::Flag { name } => argv.push(name.clone()),
            Token::Option { name, value } => {
                argv.push(name.clone());
                argv.push(value.clone());
            }
            Token::Raw { value } => argv.push(value.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendCommand {
    program: String,
    tokens: Vec<Token>,
}

impl BackendCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            tokens: Vec::new(),
        }
    }

    pub fn flag(mut self, name: &str) -> Self {
        self.tokens.push(Token::Flag { name: name.into() });
        self
    }

    pub fn flag_if(self, condition: bool, name: &str) -> Self {
        if condition {
            self.flag(name)
        } else {
            self
        }
    }

    pub fn option(mut self, name: &str, value: impl Into<String>) -> Self {
        self.tokens.push(Token::Option {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn option_opt(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.option(name, value),
            None => self,
        }
    }

    pub fn raw(mut self, value: impl Into<String>) -> Self {
        self.tokens.push(Token::Raw {
            value: value.into(),
        });
        self
    }

    pub fn raw_all<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens
            .extend(values.into_iter().map(|value| Token::Raw {
                value: value.into(),
            }));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Arguments after the program name, flattened.
    pub fn args(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.tokens.len() * 2);
        for token in &self.tokens {
            token.push_to(&mut argv);
        }
        argv
    }

    pub fn contains_pair(&self, name: &str, value: &str) -> bool {
        self.args()
            .windows(2)
            .any(|pair| pair[0] == name && pair[1] == value)
    }
}

impl fmt::Display for BackendCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in self.args() {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// `-fflags +genpts` followed by the caller's arguments, untouched.
pub fn passthrough_command(request: &RequestParameters, config: &ShimConfig) -> BackendCommand {
    BackendCommand::new(&config.backend.legacy_executable)
        .raw_all(GENPTS_FLAGS)
        .raw_all(request.original_args().iter().cloned())
}

pub fn copy_only_command(request: &RequestParameters, config: &ShimConfig) -> BackendCommand {
    BackendCommand::new(&config.backend.legacy_executable)
        .option("-probesize", &config.demux.probe_size)
        .option("-analyzeduration", &config.demux.analyze_duration)
        .option("-max_delay", "0")
        .option_opt("-ss", request.start.as_deref())
        .flag_if(request.active_file, "-activefile")
        .flag(LEGACY_CONTROL_FLAG)
        .option("-i", request.input_or_placeholder())
        .option("-c:v", "copy")
        .option("-c:a", "copy")
        .option_opt("-packetsize", request.packet_size.as_deref())
        .option_opt("-aspect", request.aspect.as_deref())
        .option("-f", &config.output.format)
        .raw(STDOUT_TARGET)
}

pub fn transcode_command(
    request: &RequestParameters,
    derived: &DerivedParameters,
    session: &Session,
    config: &ShimConfig,
) -> BackendCommand {
    let backend = &config.backend;
    let video = &config.video;

    let mut command = match backend.indirection.split_first() {
        Some((program, rest)) => BackendCommand::new(program)
            .raw_all(rest.iter().cloned())
            .raw(&backend.executable),
        None => BackendCommand::new(&backend.executable),
    };

    command = command
        .raw_all(backend.hwaccel_args.iter().cloned())
        .option("-probesize", &config.demux.probe_size)
        .option("-analyzeduration", &config.demux.analyze_duration)
        .option("-max_delay", "0");
    if request.active_file {
        command = command.option("-follow", "1");
    }
    command = command
        .option_opt("-ss", request.start.as_deref())
        .option("-i", request.input_or_placeholder())
        .option_opt("-vf", derived.filter.as_deref())
        .option("-c:v", &video.encoder);
    if !video.preset_flag.is_empty() && !video.preset_value.is_empty() {
        command = command.option(&video.preset_flag, &video.preset_value);
    }
    command = command
        .option("-b:v", &derived.bitrate)
        .option("-maxrate", &derived.maxrate)
        .option("-bufsize", &derived.bufsize)
        .option("-r", &request.frame_rate)
        .option("-g", &derived.gop.value)
        .option("-bf", &request.max_bframes)
        .raw_all(video.extra_args.iter().cloned());

    command = if config.audio.reencode {
        command
            .option("-c:a", &config.audio.codec)
            .option("-b:a", &request.audio_bitrate)
            .option("-ar", &request.audio_rate)
            .option("-ac", &request.audio_channels)
    } else {
        command.option("-c:a", "copy")
    };

    if config.audio.mapping == AudioMapping::All {
        command = command.option("-map", "0:v:0").option("-map", "0:a?");
    }

    command
        .option_opt("-packetsize", request.packet_size.as_deref())
        .option_opt("-aspect", request.aspect.as_deref())
        .option("-metadata", format!("comment={}", session.tag()))
        .option("-muxpreload", "0")
        .option("-muxdelay", "0")
        .option("-f", &config.output.format)
        .raw(STDOUT_TARGET)
}

/// Everything decided before anything is spawned.
#[derive(Debug, Serialize)]
pub struct ExecutionPlan {
    pub mode: Mode,
    pub request: RequestParameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived: Option<DerivedParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    pub command: BackendCommand,
}

impl ExecutionPlan {
    pub fn build<I, S>(args: I, config: &ShimConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = RequestParameters::extract(args);
        let session = Session::new(request.input.clone(), config.is_isolated());
        Self::build_with_session(request, config, session)
    }

    /// `session` is only kept when the request classifies as a transcode.
    pub fn build_with_session(
        request: RequestParameters,
        config: &ShimConfig,
        session: Session,
    ) -> Self {
        let mode = ModeTriggers::from(&config.triggers).classify(&request);
        match mode {
            Mode::Passthrough => Self {
                mode,
                command: passthrough_command(&request, config),
                request,
                derived: None,
                session: None,
            },
            Mode::CopyOnly => Self {
                mode,
                command: copy_only_command(&request, config),
                request,
                derived: None,
                session: None,
            },
            Mode::Transcode => {
                let derived = DerivedParameters::compute(&request, &config.video);
                let command = transcode_command(&request, &derived, &session, config);
                Self {
                    mode,
                    request,
                    derived: Some(derived),
                    session: Some(session),
                    command,
                }
            }
        }
    }
}
