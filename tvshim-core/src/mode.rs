use std::fmt;

use serde::Serialize;

use crate::config::TriggerSection;
use crate::request::RequestParameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Passthrough,
    CopyOnly,
    Transcode,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Mode::Passthrough => "passthrough",
            Mode::CopyOnly => "copy-only",
            Mode::Transcode => "transcode",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeTriggers {
    pub codec: String,
    pub format: String,
}

impl From<&TriggerSection> for ModeTriggers {
    fn from(section: &TriggerSection) -> Self {
        Self {
            codec: section.codec.clone(),
            format: section.format.clone(),
        }
    }
}

impl ModeTriggers {
    pub fn new(codec: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            codec: codec.into(),
            format: format.into(),
        }
    }

    /// An empty codec trigger disables interception altogether.
    pub fn classify(&self, request: &RequestParameters) -> Mode {
        if self.codec.is_empty() || request.video_codec != self.codec {
            Mode::Passthrough
        } else if !self.format.is_empty() && request.format == self.format {
            Mode::CopyOnly
        } else {
            Mode::Transcode
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(codec: &str, format: &str) -> RequestParameters {
        RequestParameters::extract(["-vcodec", codec, "-f", format])
    }

    #[test]
    fn empty_codec_trigger_always_passes_through() {
        let triggers = ModeTriggers::new("", "dvd");
        assert_eq!(triggers.classify(&request("mpeg4", "dvd")), Mode::Passthrough);
        assert_eq!(triggers.classify(&request("", "")), Mode::Passthrough);
    }

    #[test]
    fn codec_mismatch_passes_through() {
        let triggers = ModeTriggers::new("mpeg4", "dvd");
        assert_eq!(
            triggers.classify(&request("mpeg2video", "mpegts")),
            Mode::Passthrough
        );
        // exact match only
        assert_eq!(triggers.classify(&request("MPEG4", "dvd")), Mode::Passthrough);
    }

    #[test]
    fn format_trigger_selects_copy_only() {
        let triggers = ModeTriggers::new("mpeg4", "dvd");
        assert_eq!(triggers.classify(&request("mpeg4", "dvd")), Mode::CopyOnly);
        assert_eq!(triggers.classify(&request("mpeg4", "mpegts")), Mode::Transcode);
    }

    #[test]
    fn empty_format_trigger_never_copies() {
        let triggers = ModeTriggers::new("mpeg4", "");
        assert_eq!(triggers.classify(&request("mpeg4", "")), Mode::Transcode);
        assert_eq!(triggers.classify(&request("mpeg4", "dvd")), Mode::Transcode);
    }

    #[test]
    fn classification_covers_every_combination() {
        let hints = ["", "mpeg4", "mpeg2video"];
        let formats = ["", "dvd", "mpegts"];
        for codec_trigger in hints {
            for format_trigger in formats {
                let triggers = ModeTriggers::new(codec_trigger, format_trigger);
                for hint in hints {
                    for format in formats {
                        let mode = triggers.classify(&request(hint, format));
                        let passthrough = codec_trigger.is_empty() || hint != codec_trigger;
                        let expected = if passthrough {
                            Mode::Passthrough
                        } else if !format_trigger.is_empty() && format == format_trigger {
                            Mode::CopyOnly
                        } else {
                            Mode::Transcode
                        };
                        assert_eq!(mode, expected, "{codec_trigger}/{format_trigger} {hint}/{format}");
                    }
                }
            }
        }
    }
}
