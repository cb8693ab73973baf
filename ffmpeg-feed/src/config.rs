use std::fmt::{Debug, Formatter};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FeedError, FeedResult};

/// Frame rates outside this range are rejected; the frame period must stay a
/// representable `Duration` and one frame of audio a sane allocation.
pub const MIN_FPS: f64 = 0.1;
pub const MAX_FPS: f64 = 1000.0;

/// Sample rate the encoder reads the audio fifo at.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

fn default_width() -> usize {
    640
}

fn default_height() -> usize {
    480
}

fn default_fps() -> f64 {
    30.0
}

fn default_ingest_url() -> String {
    "rtmp://live-ams.twitch.tv/app".into()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".into()
}

fn default_video_bitrate_kbps() -> u32 {
    3000
}

fn default_audio_bitrate_kbps() -> u32 {
    160
}

fn default_audio_codec() -> String {
    "aac".into()
}

fn default_preset() -> String {
    "faster".into()
}

fn default_keyframe_interval() -> u32 {
    60
}

fn default_threads() -> u32 {
    2
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

/// How frames reach the encoder. Fixed for the lifetime of a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Every submitted frame is written immediately.
    Direct,
    /// The last submitted frame is re-sent at the configured cadence.
    Repeater,
    /// Submitted frames are queued by sequence number and drained at the cadence.
    #[default]
    Buffered,
}

/// What a paced lane does after a write fails with a closed pipe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeErrorPolicy {
    /// The lane loop exits on the first closed pipe.
    #[default]
    StopLane,
    /// The payload is dropped and the lane keeps ticking; the next tick restarts the encoder.
    Continue,
}

/// Ingest endpoint. The stream key is appended to the ingest URL.
#[derive(Clone, Deserialize)]
pub struct Destination {
    #[serde(default = "default_ingest_url")]
    pub ingest_url: String,
    pub stream_key: String,
}

impl Destination {
    pub fn new(stream_key: impl Into<String>) -> Self {
        Self {
            ingest_url: default_ingest_url(),
            stream_key: stream_key.into(),
        }
    }

    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.ingest_url.trim_end_matches('/'),
            self.stream_key
        )
    }
}

impl Debug for Destination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("ingest_url", &self.ingest_url)
            .field("stream_key", &"<redacted>")
            .finish()
    }
}

/// Stream configuration, fixed at construction.
#[derive(Clone, Debug, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_width")]
    pub width: usize,
    #[serde(default = "default_height")]
    pub height: usize,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub audio_enabled: bool,
    #[serde(default)]
    pub mode: StreamMode,
    pub destination: Destination,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Forward the encoder's diagnostics to the log instead of discarding them.
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_video_bitrate_kbps")]
    pub video_bitrate_kbps: u32,
    #[serde(default = "default_audio_bitrate_kbps")]
    pub audio_bitrate_kbps: u32,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    // "ultrafast", "faster", "medium", etc.
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval: u32,
    #[serde(default = "default_threads")]
    pub threads: u32,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub on_pipe_error: PipeErrorPolicy,
}

impl StreamConfig {
    pub fn builder(stream_key: impl Into<String>) -> StreamConfigBuilder {
        StreamConfigBuilder::new(stream_key)
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(FeedError::InvalidConfig(format!(
                "frame size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(FeedError::InvalidConfig(format!(
                "fps must be a positive number, got {}",
                self.fps
            )));
        }
        if !(MIN_FPS..=MAX_FPS).contains(&self.fps) {
            return Err(FeedError::InvalidConfig(format!(
                "fps must be between {} and {}, got {}",
                MIN_FPS, MAX_FPS, self.fps
            )));
        }
        if self.sample_rate == 0 {
            return Err(FeedError::InvalidConfig("sample rate must be positive".into()));
        }
        if self.destination.stream_key.trim().is_empty() {
            return Err(FeedError::InvalidConfig("stream key is empty".into()));
        }
        Ok(())
    }

    /// Expected frame shape `(height, width, 3)`.
    pub fn frame_shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, crate::frame::CHANNELS)
    }

    /// Pacing period of the video lane.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }

    /// Number of audio samples covering one video frame.
    pub fn samples_per_frame(&self) -> usize {
        ((self.sample_rate as f64 / self.fps).round() as usize).max(1)
    }
}

pub struct StreamConfigBuilder {
    config: StreamConfig,
}

impl StreamConfigBuilder {
    fn new(stream_key: impl Into<String>) -> Self {
        Self {
            config: StreamConfig {
                width: default_width(),
                height: default_height(),
                fps: default_fps(),
                audio_enabled: false,
                mode: StreamMode::default(),
                destination: Destination::new(stream_key),
                ffmpeg_path: default_ffmpeg_path(),
                verbose: false,
                video_bitrate_kbps: default_video_bitrate_kbps(),
                audio_bitrate_kbps: default_audio_bitrate_kbps(),
                audio_codec: default_audio_codec(),
                preset: default_preset(),
                keyframe_interval: default_keyframe_interval(),
                threads: default_threads(),
                sample_rate: default_sample_rate(),
                on_pipe_error: PipeErrorPolicy::default(),
            },
        }
    }

    pub fn size(mut self, width: usize, height: usize) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    pub fn fps(mut self, fps: f64) -> Self {
        self.config.fps = fps;
        self
    }

    pub fn audio(mut self, enabled: bool) -> Self {
        self.config.audio_enabled = enabled;
        self
    }

    pub fn mode(mut self, mode: StreamMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn ingest_url(mut self, url: impl Into<String>) -> Self {
        self.config.destination.ingest_url = url.into();
        self
    }

    pub fn ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.config.ffmpeg_path = path.into();
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn on_pipe_error(mut self, policy: PipeErrorPolicy) -> Self {
        self.config.on_pipe_error = policy;
        self
    }

    pub fn build(self) -> FeedResult<StreamConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
