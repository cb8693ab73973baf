//! The caller side of the stream: turns chat requests into frames and tone,
//! keeping both lanes topped up without letting either run away.

use std::f32::consts::TAU;
use std::time::Duration;

use ffmpeg_feed::{AudioBlock, Frame, OutputStream, StreamConfig, StreamMode};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use twitch_chat::{ChatClient, ChatMessage};

use crate::config::ProducerConfig;

const IDLE: Duration = Duration::from_millis(1);

/// A solid colour plus a continuous sine tone, both changeable from chat.
pub struct TestCard {
    height: usize,
    width: usize,
    colour: [f32; 3],
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    samples_per_frame: usize,
    // radians, carried over between blocks so the tone has no clicks
    phase: f32,
}

impl TestCard {
    pub fn new(stream: &StreamConfig, producer: &ProducerConfig) -> Self {
        Self {
            height: stream.height,
            width: stream.width,
            colour: [0.0; 3],
            frequency: producer.tone_hz,
            amplitude: producer.tone_amplitude,
            sample_rate: stream.sample_rate,
            samples_per_frame: stream.samples_per_frame(),
            phase: 0.0,
        }
    }

    /// Applies a chat request: `red`, `green` or `blue` set the colour, a
    /// plain number sets the tone frequency in Hz. Returns whether anything
    /// changed.
    pub fn apply(&mut self, request: &str) -> bool {
        let request = request.trim();
        let colour = match request {
            "red" => [1.0, 0.0, 0.0],
            "green" => [0.0, 1.0, 0.0],
            "blue" => [0.0, 0.0, 1.0],
            _ => {
                return match request.parse::<u32>() {
                    Ok(hz) if hz > 0 && request.bytes().all(|b| b.is_ascii_digit()) => {
                        self.frequency = hz as f32;
                        true
                    }
                    _ => false,
                };
            }
        };
        self.colour = colour;
        true
    }

    pub fn colour(&self) -> [f32; 3] {
        self.colour
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn frame(&self) -> Frame {
        Frame::filled(self.height, self.width, self.colour)
    }

    /// One video frame's worth of tone, continuing where the last block ended.
    pub fn audio(&mut self) -> AudioBlock {
        let step = TAU * self.frequency / self.sample_rate as f32;
        let samples = (0..self.samples_per_frame)
            .map(|i| self.amplitude * (self.phase + step * i as f32).sin())
            .collect();
        self.phase = (self.phase + step * self.samples_per_frame as f32) % TAU;
        AudioBlock::mono(samples)
    }
}

/// One-line JSON form of a chat request, as it appears in the log.
pub fn request_json(message: &ChatMessage) -> String {
    serde_json::to_string(message)
        .unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
}

/// Feeds `stream` until `cancel` fires.
///
/// Paced modes: video is topped up while its buffer holds fewer than
/// `max_backlog` frames, then audio likewise; with both full the loop idles
/// for a millisecond. Direct mode has no buffers, so the loop paces itself at
/// the frame rate instead.
pub async fn run(
    stream: &OutputStream,
    mut chat: Option<&mut ChatClient>,
    card: &mut TestCard,
    producer: &ProducerConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let audio = stream.config().audio_enabled;
    let mut ticker = tokio::time::interval(stream.config().frame_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while !cancel.is_cancelled() {
        if let Some(chat) = chat.as_deref_mut() {
            for message in chat.receive_messages() {
                log::info!("chat request {}", request_json(&message));
                if card.apply(&message.message) {
                    log::debug!(
                        "test card now {:?} at {} Hz",
                        card.colour(),
                        card.frequency()
                    );
                }
            }
        }

        if stream.mode() == StreamMode::Direct {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            stream.send_video_frame(&card.frame(), None).await?;
            if audio {
                stream.send_audio(&card.audio(), None).await?;
            }
        } else if stream.video_buffer_depth() < producer.max_backlog {
            stream.send_video_frame(&card.frame(), None).await?;
        } else if audio && stream.audio_buffer_depth() < producer.max_backlog {
            stream.send_audio(&card.audio(), None).await?;
        } else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(IDLE) => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use super::*;

    fn card() -> TestCard {
        let stream = StreamConfig::builder("key").size(4, 2).build().unwrap();
        TestCard::new(&stream, &ProducerConfig::default())
    }

    // stands in for ffmpeg: swallows stdin until told to stop
    fn create_mock_ffmpeg(dir: &Path) -> PathBuf {
        let path = dir.join("mock_ffmpeg");
        let mut script = fs::File::create(&path).unwrap();
        writeln!(script, "#!/bin/sh").unwrap();
        writeln!(script, "exec cat > /dev/null").unwrap();
        drop(script);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_chat_requests_change_the_card() {
        let mut card = card();
        assert_eq!(card.colour(), [0.0; 3]);
        assert_eq!(card.frequency(), 440.0);

        assert!(card.apply("red"));
        assert_eq!(card.colour(), [1.0, 0.0, 0.0]);
        assert!(card.apply(" blue "));
        assert_eq!(card.colour(), [0.0, 0.0, 1.0]);
        assert!(card.apply("220"));
        assert_eq!(card.frequency(), 220.0);

        assert!(!card.apply("purple"));
        assert!(!card.apply("+300"));
        assert!(!card.apply("0"));
        assert_eq!(card.frequency(), 220.0);
        assert!(card.frame().data()[..3] == [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_request_json_is_one_line() {
        let message = ChatMessage {
            channel: "#bot".into(),
            username: "viewer".into(),
            message: "green\nplease".into(),
        };
        let json = request_json(&message);
        assert!(!json.contains('\n'));
        assert_eq!(
            json,
            r##"{"channel":"#bot","username":"viewer","message":"green\nplease"}"##
        );
    }

    #[test]
    fn test_tone_is_phase_continuous() {
        let mut card = card();
        let first = card.audio();
        let second = card.audio();
        assert_eq!(first.len(), 1470);

        // the jump across the block boundary is no bigger than within a block
        let step = TAU * 440.0 / 44_100.0;
        let max_delta = card.amplitude * step * 1.01;
        let boundary = (second.left()[0] - first.left()[first.len() - 1]).abs();
        assert!(boundary <= max_delta, "click of {} at block boundary", boundary);
    }

    #[tokio::test]
    async fn test_run_keeps_backlog_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let config = StreamConfig::builder("key")
            .size(4, 2)
            .audio(true)
            .ffmpeg_path(create_mock_ffmpeg(dir.path()).to_string_lossy())
            .build()
            .unwrap();
        let producer = ProducerConfig {
            max_backlog: 5,
            ..ProducerConfig::default()
        };
        let stream = OutputStream::open(config.clone()).await.unwrap();
        let mut card = TestCard::new(&config, &producer);
        let cancel = CancellationToken::new();

        let stopper = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                cancel.cancel();
            })
        };
        run(&stream, None, &mut card, &producer, &cancel).await.unwrap();
        stopper.await.unwrap();

        assert!(stream.video_buffer_depth() <= 5);
        assert!(stream.audio_buffer_depth() <= 5);
        assert!(stream.video_buffer_depth() > 0);
        stream.close().await;
    }

    #[tokio::test]
    async fn test_run_direct_mode_paces_itself() {
        let dir = tempfile::tempdir().unwrap();
        let config = StreamConfig::builder("key")
            .size(4, 2)
            .mode(StreamMode::Direct)
            .ffmpeg_path(create_mock_ffmpeg(dir.path()).to_string_lossy())
            .build()
            .unwrap();
        let producer = ProducerConfig::default();
        let stream = OutputStream::open(config.clone()).await.unwrap();
        let mut card = TestCard::new(&config, &producer);
        let cancel = CancellationToken::new();
        cancel.cancel();

        run(&stream, None, &mut card, &producer, &cancel).await.unwrap();
        assert_eq!(stream.video_buffer_depth(), 0);
        assert_eq!(stream.transport().restart_count(), 0);
        stream.close().await;
    }
}
