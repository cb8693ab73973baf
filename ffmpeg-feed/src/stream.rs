//! The producer-facing stream.
//!
//! [`OutputStream`] validates and encodes submissions, then hands them to one
//! of two strategies:
//!
//! - **Direct**: the bytes are written to the encoder on the caller's task.
//! - **Paced** (repeater and buffered modes): each lane has a source the
//!   caller fills and a [`Pacer`] that drains it. A repeater source only holds
//!   the last known chunk; a buffered source orders chunks by sequence number
//!   and falls back to the last sent chunk when it runs dry.
//!
//! Submissions never block in the paced modes. The buffered source is
//! unbounded; [`OutputStream::video_buffer_depth`] and
//! [`OutputStream::audio_buffer_depth`] are the only backpressure signals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::buffer::{OrderedBuffer, SequenceCounter};
use crate::config::{PipeErrorPolicy, StreamConfig, StreamMode};
use crate::error::{FeedError, FeedResult};
use crate::frame::{AudioBlock, Chunk, Frame, Payload};
use crate::launcher::FfmpegLauncher;
use crate::pacer::{Pacer, Tick};
use crate::transport::{FrameTransport, Lane, Launcher};

/// Frequency of the stand-in tone sent before any audio was submitted.
pub const FALLBACK_TONE_HZ: f32 = 440.0;
pub const FALLBACK_TONE_AMPLITUDE: f32 = 0.05;

enum LaneSource {
    LastKnown(Mutex<Chunk>),
    Ordered {
        buffer: OrderedBuffer<Chunk>,
        counter: SequenceCounter,
        seed: Chunk,
    },
}

impl LaneSource {
    fn for_mode(mode: StreamMode, initial: Chunk) -> Self {
        match mode {
            StreamMode::Repeater => LaneSource::LastKnown(Mutex::new(initial)),
            _ => LaneSource::Ordered {
                buffer: OrderedBuffer::with_last_sent(initial.clone()),
                counter: SequenceCounter::new(),
                seed: initial,
            },
        }
    }

    fn accept(&self, chunk: Chunk, seq: Option<u64>) {
        match self {
            LaneSource::LastKnown(last) => *last.lock() = chunk,
            LaneSource::Ordered {
                buffer, counter, ..
            } => {
                let seq = seq.unwrap_or_else(|| counter.next_seq());
                buffer.push(seq, chunk);
            }
        }
    }

    fn next(&self) -> Chunk {
        match self {
            LaneSource::LastKnown(last) => last.lock().clone(),
            LaneSource::Ordered { buffer, seed, .. } => {
                buffer.pop_or_repeat().unwrap_or_else(|| seed.clone())
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            LaneSource::LastKnown(_) => 0,
            LaneSource::Ordered { buffer, .. } => buffer.size(),
        }
    }
}

struct Lanes {
    video: Arc<LaneSource>,
    audio: Option<Arc<LaneSource>>,
}

impl Lanes {
    fn get(&self, lane: Lane) -> Option<&Arc<LaneSource>> {
        match lane {
            Lane::Video => Some(&self.video),
            Lane::Audio => self.audio.as_ref(),
        }
    }
}

enum Strategy {
    Direct,
    Paced(Lanes),
}

pub struct OutputStream {
    config: StreamConfig,
    transport: Arc<FrameTransport>,
    strategy: Strategy,
    pacers: Vec<(Lane, Pacer)>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl OutputStream {
    /// Launches ffmpeg and, in the paced modes, starts the lane pacers.
    ///
    /// Fails with [`FeedError::ProcessLaunch`] when the encoder cannot be started.
    pub async fn open(config: StreamConfig) -> FeedResult<Self> {
        config.validate()?;
        let launcher = FfmpegLauncher::new(config.clone())?;
        Self::with_launcher(config, launcher).await
    }

    pub async fn with_launcher<L: Launcher + 'static>(
        config: StreamConfig,
        launcher: L,
    ) -> FeedResult<Self> {
        config.validate()?;
        let transport = Arc::new(FrameTransport::new(launcher));
        transport.start().await?;

        let cancel = CancellationToken::new();
        let mut pacers = Vec::new();
        let strategy = match config.mode {
            StreamMode::Direct => Strategy::Direct,
            mode => {
                let lanes = Lanes {
                    video: Arc::new(LaneSource::for_mode(mode, initial_video(&config))),
                    audio: config
                        .audio_enabled
                        .then(|| Arc::new(LaneSource::for_mode(mode, initial_audio(&config)))),
                };
                for lane in [Lane::Video, Lane::Audio] {
                    if let Some(source) = lanes.get(lane) {
                        let pacer = spawn_lane(
                            lane,
                            Arc::clone(source),
                            Arc::clone(&transport),
                            config.on_pipe_error,
                            cancel.child_token(),
                        );
                        pacers.push((lane, pacer));
                    }
                }
                Strategy::Paced(lanes)
            }
        };

        log::info!(
            "output stream open: {:?} mode, {}x{} @ {} fps, audio {}",
            config.mode,
            config.width,
            config.height,
            config.fps,
            if config.audio_enabled { "on" } else { "off" }
        );
        Ok(Self {
            config,
            transport,
            strategy,
            pacers,
            cancel,
            closed: AtomicBool::new(false),
        })
    }

    /// Submits a payload. `seq` orders it within its lane in buffered mode;
    /// without one the lane's own counter assigns the next number. A supplied
    /// number is used verbatim and does not advance the counter.
    ///
    /// Returns immediately in the paced modes. In direct mode the write
    /// happens here; a frame lost to a closed pipe is dropped with a warning
    /// and the next submission restarts the encoder.
    pub async fn submit(&self, payload: Payload, seq: Option<u64>) -> FeedResult<()> {
        match payload {
            Payload::Video(frame) => self.send_video_frame(&frame, seq).await,
            Payload::Audio(block) => self.send_audio(&block, seq).await,
        }
    }

    pub async fn send_video_frame(&self, frame: &Frame, seq: Option<u64>) -> FeedResult<()> {
        self.check_open()?;
        let expected = self.config.frame_shape();
        if frame.shape() != expected {
            return Err(FeedError::ShapeMismatch {
                expected,
                actual: frame.shape(),
            });
        }
        let chunk = Chunk::new(frame.to_rgb24(), self.config.frame_period());
        self.deliver(Lane::Video, chunk, seq).await
    }

    pub async fn send_audio(&self, block: &AudioBlock, seq: Option<u64>) -> FeedResult<()> {
        self.check_open()?;
        if !self.config.audio_enabled {
            return Err(FeedError::AudioDisabled);
        }
        if block.is_empty() {
            return Err(FeedError::EmptyAudio);
        }
        let chunk = Chunk::new(block.to_s16le(), block.duration(self.config.sample_rate));
        self.deliver(Lane::Audio, chunk, seq).await
    }

    pub fn video_buffer_depth(&self) -> usize {
        self.depth(Lane::Video)
    }

    pub fn audio_buffer_depth(&self) -> usize {
        self.depth(Lane::Audio)
    }

    /// Whether the lane's pacer is still ticking. Always false in direct mode.
    pub fn lane_running(&self, lane: Lane) -> bool {
        self.pacers
            .iter()
            .any(|(l, pacer)| *l == lane && !pacer.is_finished())
    }

    /// Stops the pacers and asks the encoder to finish. Does not wait for it.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.transport.close().await;
        log::info!("output stream closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> StreamMode {
        self.config.mode
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<FrameTransport> {
        &self.transport
    }

    fn check_open(&self) -> FeedResult<()> {
        if self.is_closed() {
            return Err(FeedError::Closed);
        }
        Ok(())
    }

    fn depth(&self, lane: Lane) -> usize {
        match &self.strategy {
            Strategy::Direct => 0,
            Strategy::Paced(lanes) => lanes.get(lane).map_or(0, |source| source.depth()),
        }
    }

    async fn deliver(&self, lane: Lane, chunk: Chunk, seq: Option<u64>) -> FeedResult<()> {
        match &self.strategy {
            Strategy::Direct => match self.transport.write(lane, &chunk.data).await {
                Err(FeedError::PipeClosed) if !self.transport.is_closed() => {
                    log::warn!("{} dropped, encoder pipe closed", chunk);
                    Ok(())
                }
                Err(FeedError::PipeClosed) => Err(FeedError::Closed),
                other => other,
            },
            Strategy::Paced(lanes) => {
                let source = lanes.get(lane).ok_or(FeedError::AudioDisabled)?;
                source.accept(chunk, seq);
                Ok(())
            }
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        if self.is_closed() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let transport = Arc::clone(&self.transport);
            handle.spawn(async move { transport.close().await });
        }
    }
}

fn initial_video(config: &StreamConfig) -> Chunk {
    let frame = Frame::filled(config.height, config.width, [1.0; 3]);
    Chunk::new(frame.to_rgb24(), config.frame_period())
}

fn initial_audio(config: &StreamConfig) -> Chunk {
    let block = AudioBlock::tone(
        FALLBACK_TONE_HZ,
        FALLBACK_TONE_AMPLITUDE,
        config.sample_rate,
        config.samples_per_frame(),
    );
    Chunk::new(block.to_s16le(), block.duration(config.sample_rate))
}

fn spawn_lane(
    lane: Lane,
    source: Arc<LaneSource>,
    transport: Arc<FrameTransport>,
    policy: PipeErrorPolicy,
    cancel: CancellationToken,
) -> Pacer {
    Pacer::spawn(format!("{} lane", lane), cancel, move || {
        let source = Arc::clone(&source);
        let transport = Arc::clone(&transport);
        async move {
            let chunk = source.next();
            match transport.write(lane, &chunk.data).await {
                Ok(()) => Tick::Continue(chunk.duration),
                Err(FeedError::PipeClosed) if transport.is_closed() => {
                    log::debug!("{} lane: transport closed", lane);
                    Tick::Stop
                }
                Err(FeedError::PipeClosed) => match policy {
                    PipeErrorPolicy::StopLane => {
                        log::warn!("{} lane stopped: encoder pipe closed", lane);
                        Tick::Stop
                    }
                    PipeErrorPolicy::Continue => {
                        log::warn!("{} lane dropped {}", lane, chunk);
                        Tick::Continue(chunk.duration)
                    }
                },
                Err(e) => {
                    log::error!("{} lane stopped: {}", lane, e);
                    Tick::Stop
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod stream_test;
