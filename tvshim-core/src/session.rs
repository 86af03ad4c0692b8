use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One transcode execution. Everything except the child pid is fixed at
/// construction; the pid is set exactly once, right after spawn.
#[derive(Debug, Serialize)]
pub struct Session {
    tag: String,
    input: Option<String>,
    isolated: bool,
    started_at: DateTime<Utc>,
    #[serde(skip)]
    pid: OnceLock<u32>,
}

impl Session {
    pub fn new(input: Option<String>, isolated: bool) -> Self {
        Self::with_tag(generate_tag(), input, isolated)
    }

    pub fn with_tag(tag: impl Into<String>, input: Option<String>, isolated: bool) -> Self {
        Self {
            tag: tag.into(),
            input: input.filter(|value| !value.is_empty()),
            isolated,
            started_at: Utc::now(),
            pid: OnceLock::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn input(&self) -> Option<&str> {
        self.input.as_deref()
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    /// Returns false if a pid was already recorded.
    pub fn attach_pid(&self, pid: u32) -> bool {
        self.pid.set(pid).is_ok()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }
}

/// `tvshim-<pid>-<8 hex>`; unique across concurrent invocations on one host.
pub fn generate_tag() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("tvshim-{}-{}", std::process::id(), &random[..8])
}
