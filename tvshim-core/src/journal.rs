//! Diagnostic log records.
//!
//! Every line is `<timestamp> [<TAG>] <payload>` with the tag padded to a
//! fixed width. Records never go to stdout, which carries the media stream.

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingSection;
use crate::error::{ConfigError, Result};

pub const TAG_WIDTH: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Original,
    Passthrough,
    Copy,
    Transcode,
    ControlRaw,
    ControlHex,
    Kill,
    Info,
}

impl LogTag {
    pub fn label(self) -> &'static str {
        match self {
            LogTag::Original => "ORIGINAL",
            LogTag::Passthrough => "PASSTHRU",
            LogTag::Copy => "COPY",
            LogTag::Transcode => "TRANSCODE",
            LogTag::ControlRaw => "CTRL-RAW",
            LogTag::ControlHex => "CTRL-HEX",
            LogTag::Kill => "KILL",
            LogTag::Info => "INFO",
        }
    }
}

impl fmt::Display for LogTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:<width$}]", self.label(), width = TAG_WIDTH)
    }
}

/// Emits an `info` record carrying `tag`.
#[macro_export]
macro_rules! record {
    ($tag:expr, $($arg:tt)+) => {
        ::tracing::info!("{} {}", $tag, format_args!($($arg)+))
    };
}

/// Emits a `warn` record carrying `tag`.
#[macro_export]
macro_rules! record_warn {
    ($tag:expr, $($arg:tt)+) => {
        ::tracing::warn!("{} {}", $tag, format_args!($($arg)+))
    };
}

/// Installs the global subscriber. With logging disabled only warnings reach
/// stderr; otherwise records are appended to the configured destination.
pub fn init(logging: &LoggingSection) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_target(false)
        .with_level(false);

    let installed = if logging.enabled {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logging.destination)
            .map_err(|source| ConfigError::LogDestination {
                source,
                path: logging.destination.clone(),
            })?;
        let filter =
            EnvFilter::try_new(&logging.filter).unwrap_or_else(|_| EnvFilter::new("info"));
        builder
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .try_init()
    } else {
        builder
            .with_env_filter(EnvFilter::new("warn"))
            .with_writer(std::io::stderr)
            .try_init()
    };
    // a subscriber installed earlier (tests, embedding binaries) keeps precedence
    let _ = installed;
    Ok(())
}

/// Space-separated hex bytes of `line`, for diagnosing control input.
pub fn hex_dump(line: &str) -> String {
    let encoded = hex::encode(line.as_bytes());
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 2);
    for (index, pair) in encoded.as_bytes().chunks(2).enumerate() {
        if index > 0 {
            out.push(' ');
        }
        out.push(pair[0] as char);
        out.push(pair[1] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_render_at_fixed_width() {
        for tag in [
            LogTag::Original,
            LogTag::Passthrough,
            LogTag::Copy,
            LogTag::Transcode,
            LogTag::ControlRaw,
            LogTag::ControlHex,
            LogTag::Kill,
            LogTag::Info,
        ] {
            assert_eq!(tag.to_string().len(), TAG_WIDTH + 2, "{tag:?}");
        }
        assert_eq!(LogTag::Copy.to_string(), "[COPY     ]");
    }

    #[test]
    fn hex_dump_separates_bytes() {
        assert_eq!(hex_dump("q\r"), "71 0d");
        assert_eq!(hex_dump(""), "");
    }

    #[test]
    fn init_writes_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let logging = LoggingSection {
            enabled: true,
            destination: dir.path().join("shim.log"),
            ..LoggingSection::default()
        };
        init(&logging).unwrap();
        assert!(logging.destination.exists());
    }

    #[test]
    fn init_reports_unwritable_destination() {
        let logging = LoggingSection {
            enabled: true,
            destination: "/nonexistent-dir/shim.log".into(),
            ..LoggingSection::default()
        };
        assert!(matches!(
            init(&logging),
            Err(ConfigError::LogDestination { .. })
        ));
    }
}
