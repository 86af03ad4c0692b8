use std::fmt;

use serde::Serialize;

/// Placeholder used when a transcode request names no input.
pub const MISSING_INPUT_PLACEHOLDER: &str = "/dev/null";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameSize {
    pub raw: String,
    /// Set only when the request carried `-s`.
    pub explicit: bool,
}

impl FrameSize {
    /// Splits `WxH` into its two halves; `None` when there is no `x`.
    pub fn dimensions(&self) -> Option<(&str, &str)> {
        let (width, height) = self.raw.split_once(['x', 'X'])?;
        if width.is_empty() || height.is_empty() {
            return None;
        }
        Some((width, height))
    }
}

impl Default for FrameSize {
    fn default() -> Self {
        Self {
            raw: "1280x720".into(),
            explicit: false,
        }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Fields recognised in the caller's argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestParameters {
    pub video_codec: String,
    pub active_file: bool,
    pub input: Option<String>,
    pub start: Option<String>,
    pub bitrate: String,
    pub frame_rate: String,
    pub frame_size: FrameSize,
    pub gop: String,
    pub max_bframes: String,
    pub audio_bitrate: String,
    pub audio_rate: String,
    pub audio_channels: String,
    pub format: String,
    pub packet_size: Option<String>,
    pub aspect: Option<String>,
    #[serde(skip)]
    original: Vec<String>,
}

impl Default for RequestParameters {
    fn default() -> Self {
        Self {
            video_codec: String::new(),
            active_file: false,
            input: None,
            start: None,
            bitrate: "4000k".into(),
            frame_rate: "29.97".into(),
            frame_size: FrameSize::default(),
            gop: "300".into(),
            max_bframes: "0".into(),
            audio_bitrate: "192k".into(),
            audio_rate: "48000".into(),
            audio_channels: "2".into(),
            format: String::new(),
            packet_size: None,
            aspect: None,
            original: Vec::new(),
        }
    }
}

impl RequestParameters {
    /// Single left-to-right scan. Unknown flags are skipped; a recognised
    /// flag with no following token leaves its field at the default.
    pub fn extract<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let original: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut request = RequestParameters::default();

        let mut index = 0;
        while index < original.len() {
            let flag = original[index].as_str();
            if flag == "-activefile" {
                request.active_file = true;
                index += 1;
                continue;
            }
            let Some(field) = ValueFlag::from_flag(flag) else {
                index += 1;
                continue;
            };
            let Some(value) = original.get(index + 1) else {
                break;
            };
            request.assign(field, value.clone());
            index += 2;
        }

        request.original = original;
        request
    }

    fn assign(&mut self, field: ValueFlag, value: String) {
        match field {
            ValueFlag::VideoCodec => self.video_codec = value,
            ValueFlag::Input => self.input = Some(value),
            ValueFlag::Start => self.start = Some(value),
            ValueFlag::Bitrate => self.bitrate = value,
            ValueFlag::FrameRate => self.frame_rate = value,
            ValueFlag::FrameSize => {
                self.frame_size = FrameSize {
                    raw: value,
                    explicit: true,
                }
            }
            ValueFlag::Gop => self.gop = value,
            ValueFlag::MaxBframes => self.max_bframes = value,
            ValueFlag::AudioBitrate => self.audio_bitrate = value,
            ValueFlag::AudioRate => self.audio_rate = value,
            ValueFlag::AudioChannels => self.audio_channels = value,
            ValueFlag::Format => self.format = value,
            ValueFlag::PacketSize => self.packet_size = Some(value),
            ValueFlag::Aspect => self.aspect = Some(value),
        }
    }

    /// The argument vector exactly as received.
    pub fn original_args(&self) -> &[String] {
        &self.original
    }

    pub fn input_or_placeholder(&self) -> &str {
        self.input
            .as_deref()
            .filter(|input| !input.is_empty())
            .unwrap_or(MISSING_INPUT_PLACEHOLDER)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueFlag {
    VideoCodec,
    Input,
    Start,
    Bitrate,
    FrameRate,
    FrameSize,
    Gop,
    MaxBframes,
    AudioBitrate,
    AudioRate,
    AudioChannels,
    Format,
    PacketSize,
    Aspect,
}

impl ValueFlag {
    fn from_flag(flag: &str) -> Option<Self> {
        let field = match flag {
            "-vcodec" => ValueFlag::VideoCodec,
            "-i" => ValueFlag::Input,
            "-ss" => ValueFlag::Start,
            "-b" => ValueFlag::Bitrate,
            "-r" => ValueFlag::FrameRate,
            "-s" => ValueFlag::FrameSize,
            "-g" => ValueFlag::Gop,
            "-bf" => ValueFlag::MaxBframes,
            "-ab" => ValueFlag::AudioBitrate,
            "-ar" => ValueFlag::AudioRate,
            "-ac" => ValueFlag::AudioChannels,
            "-f" => ValueFlag::Format,
            "-packetsize" => ValueFlag::PacketSize,
            "-aspect" => ValueFlag::Aspect,
            _ => return None,
        };
        Some(field)
    }
}
