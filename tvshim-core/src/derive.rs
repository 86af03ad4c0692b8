use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::config::VideoSection;
use crate::request::RequestParameters;

pub const WIDTH_PLACEHOLDER: &str = "{width}";
pub const HEIGHT_PLACEHOLDER: &str = "{height}";

fn rate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([0-9]+(?:\.[0-9]+)?)([kKmM]?)$").expect("valid regex")
    })
}

/// Multiplies the numeric prefix of `value` by `factor`, rounds to the
/// nearest integer and reattaches the unit suffix. Anything outside the
/// `<number>[kKmM]` grammar comes back untouched.
pub fn scale_rate(value: &str, factor: f64) -> String {
    let Some(captures) = rate_pattern().captures(value) else {
        return value.to_string();
    };
    let Ok(number) = captures[1].parse::<f64>() else {
        return value.to_string();
    };
    let scaled = (number * factor).round();
    if !scaled.is_finite() {
        return value.to_string();
    }
    format!("{}{}", scaled as u64, &captures[2])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GopAdjustment {
    /// No ceiling configured.
    Disabled,
    Unchanged,
    Clamped { from: String, to: String },
    /// One side was not a plain integer.
    Skipped { gop: String, max: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GopDecision {
    pub value: String,
    pub adjustment: GopAdjustment,
}

fn is_plain_integer(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

pub fn clamp_gop(gop: &str, max: &str) -> GopDecision {
    if max.is_empty() {
        return GopDecision {
            value: gop.to_string(),
            adjustment: GopAdjustment::Disabled,
        };
    }
    if !is_plain_integer(gop) || !is_plain_integer(max) {
        return GopDecision {
            value: gop.to_string(),
            adjustment: GopAdjustment::Skipped {
                gop: gop.to_string(),
                max: max.to_string(),
            },
        };
    }
    // digits only; compare by magnitude without overflowing
    let exceeds = match (gop.parse::<u128>(), max.parse::<u128>()) {
        (Ok(g), Ok(m)) => g > m,
        _ => {
            let g = gop.trim_start_matches('0');
            let m = max.trim_start_matches('0');
            g.len() > m.len() || (g.len() == m.len() && g > m)
        }
    };
    if exceeds {
        GopDecision {
            value: max.to_string(),
            adjustment: GopAdjustment::Clamped {
                from: gop.to_string(),
                to: max.to_string(),
            },
        }
    } else {
        GopDecision {
            value: gop.to_string(),
            adjustment: GopAdjustment::Unchanged,
        }
    }
}

pub fn expand_filter_template(template: &str, width: &str, height: &str) -> String {
    template
        .replace(WIDTH_PLACEHOLDER, width)
        .replace(HEIGHT_PLACEHOLDER, height)
}

/// Scale+deinterlace when the caller asked for a size, deinterlace-only
/// otherwise, nothing when the chosen filter is not configured.
pub fn select_filter(request: &RequestParameters, video: &VideoSection) -> Option<String> {
    if request.frame_size.explicit && !video.scale_filter_template.is_empty() {
        if let Some((width, height)) = request.frame_size.dimensions() {
            return Some(expand_filter_template(
                &video.scale_filter_template,
                width,
                height,
            ));
        }
    }
    if video.deinterlace_filter.is_empty() {
        None
    } else {
        Some(video.deinterlace_filter.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedParameters {
    pub bitrate: String,
    pub maxrate: String,
    pub bufsize: String,
    pub gop: GopDecision,
    pub filter: Option<String>,
}

impl DerivedParameters {
    pub fn compute(request: &RequestParameters, video: &VideoSection) -> Self {
        Self {
            bitrate: request.bitrate.clone(),
            maxrate: scale_rate(&request.bitrate, video.maxrate_multiplier),
            bufsize: scale_rate(&request.bitrate, video.bufsize_multiplier),
            gop: clamp_gop(&request.gop, &video.gop_max),
            filter: select_filter(request, video),
        }
    }
}
