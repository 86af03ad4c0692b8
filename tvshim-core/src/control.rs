use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::journal::{hex_dump, LogTag};
use crate::record;
use crate::supervisor::StopRequest;

/// Case-insensitive prefixes that ask the backend to stop.
pub const STOP_VOCABULARY: [&str; 3] = ["stop", "quit", "q"];

/// Longest control line accepted, newline included. Longer lines are
/// skipped up to their next newline.
pub const MAX_LINE_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "line", rename_all = "snake_case")]
pub enum ControlMessage {
    Stop(String),
    Unhandled(String),
}

impl ControlMessage {
    pub fn is_stop(&self) -> bool {
        matches!(self, ControlMessage::Stop(_))
    }
}

pub fn classify_line(line: &str) -> ControlMessage {
    let normalized = line.trim().to_ascii_lowercase();
    if !normalized.is_empty()
        && STOP_VOCABULARY
            .iter()
            .any(|word| normalized.starts_with(word))
    {
        ControlMessage::Stop(line.to_string())
    } else {
        ControlMessage::Unhandled(line.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Input closed; `stops` counts the stop requests forwarded.
    EndOfStream { stops: usize },
    /// The supervisor stopped listening.
    Detached,
    ReadFailed,
}

/// Reads the caller's control stream and turns stop commands into
/// [`StopRequest::Control`] on the supervisor's cancellation channel.
pub struct ControlChannel<R> {
    reader: R,
    hex_dump: bool,
    stops: mpsc::UnboundedSender<StopRequest>,
}

impl<R> ControlChannel<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R, hex_dump: bool, stops: mpsc::UnboundedSender<StopRequest>) -> Self {
        Self {
            reader,
            hex_dump,
            stops,
        }
    }

    pub async fn run(mut self) -> ControlOutcome {
        let mut forwarded = 0usize;
        let mut buffer = Vec::with_capacity(MAX_LINE_BYTES);
        let mut skipping = false;
        loop {
            buffer.clear();
            let read = (&mut self.reader)
                .take(MAX_LINE_BYTES as u64)
                .read_until(b'\n', &mut buffer)
                .await;
            match read {
                Ok(0) => {
                    if forwarded == 0 {
                        record!(
                            LogTag::Info,
                            "control stream closed without a stop command"
                        );
                    }
                    return ControlOutcome::EndOfStream { stops: forwarded };
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(%error, "control stream read failed");
                    return ControlOutcome::ReadFailed;
                }
            }

            let complete = buffer.last() == Some(&b'\n');
            if skipping {
                skipping = !complete;
                continue;
            }
            if !complete && buffer.len() >= MAX_LINE_BYTES {
                skipping = true;
                record!(
                    LogTag::Info,
                    "ignoring control command longer than {MAX_LINE_BYTES} bytes"
                );
                continue;
            }

            let text = String::from_utf8_lossy(&buffer);
            let line = text.trim_end_matches(['\n', '\r']);
            record!(LogTag::ControlRaw, "{line}");
            if self.hex_dump {
                record!(LogTag::ControlHex, "{}", hex_dump(line));
            }

            match classify_line(line) {
                ControlMessage::Stop(command) => {
                    record!(LogTag::Info, "stop requested via control stream ({command})");
                    if self.stops.send(StopRequest::Control(command)).is_err() {
                        return ControlOutcome::Detached;
                    }
                    forwarded += 1;
                }
                ControlMessage::Unhandled(command) => {
                    record!(LogTag::Info, "ignoring control command {command:?}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn stop_vocabulary_matches_by_prefix_case_insensitively() {
        for line in ["stop", "STOP", "Stop now", "quit", "QUIT\r", "q", "Q", "  q  "] {
            assert!(classify_line(line).is_stop(), "{line:?}");
        }
    }

    #[test]
    fn other_lines_are_unhandled() {
        for line in ["", "   ", "pause", "status", "s", "xq"] {
            assert_eq!(
                classify_line(line),
                ControlMessage::Unhandled(line.to_string())
            );
        }
    }

    #[tokio::test]
    async fn forwards_each_stop_and_reports_end_of_stream() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input: &[u8] = b"status\nSTOP\nq\r\n";
        let outcome = ControlChannel::new(BufReader::new(input), true, tx)
            .run()
            .await;
        assert_eq!(outcome, ControlOutcome::EndOfStream { stops: 2 });
        assert_eq!(rx.recv().await, Some(StopRequest::Control("STOP".into())));
        assert_eq!(rx.recv().await, Some(StopRequest::Control("q".into())));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn end_of_stream_without_stop_is_quiet() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input: &[u8] = b"hello\n";
        let outcome = ControlChannel::new(BufReader::new(input), false, tx)
            .run()
            .await;
        assert_eq!(outcome, ControlOutcome::EndOfStream { stops: 0 });
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn detaches_when_supervisor_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let input: &[u8] = b"quit\n";
        let outcome = ControlChannel::new(BufReader::new(input), false, tx)
            .run()
            .await;
        assert_eq!(outcome, ControlOutcome::Detached);
    }

    #[tokio::test]
    async fn overlong_line_is_skipped_up_to_its_newline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut input = vec![b'q'; MAX_LINE_BYTES * 2 + 17];
        input.extend_from_slice(b"\nstop\n");
        let outcome = ControlChannel::new(BufReader::new(&input[..]), false, tx)
            .run()
            .await;
        assert_eq!(outcome, ControlOutcome::EndOfStream { stops: 1 });
        assert_eq!(rx.recv().await, Some(StopRequest::Control("stop".into())));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn line_just_under_the_limit_is_classified() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut input = b"quit".to_vec();
        input.resize(MAX_LINE_BYTES - 1, b' ');
        input.push(b'\n');
        let outcome = ControlChannel::new(BufReader::new(&input[..]), false, tx)
            .run()
            .await;
        assert_eq!(outcome, ControlOutcome::EndOfStream { stops: 1 });
        let expected = String::from_utf8(input[..MAX_LINE_BYTES - 1].to_vec()).unwrap();
        assert_eq!(rx.recv().await, Some(StopRequest::Control(expected)));
    }

    #[tokio::test]
    async fn last_line_without_newline_is_processed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input: &[u8] = b"stop";
        ControlChannel::new(BufReader::new(input), false, tx)
            .run()
            .await;
        assert_eq!(rx.recv().await, Some(StopRequest::Control("stop".into())));
    }
}
