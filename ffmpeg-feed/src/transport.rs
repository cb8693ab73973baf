//! Byte pipe to the external encoder.
//!
//! [`FrameTransport`] owns the encoder process exclusively. Every write first
//! checks that the current process is alive and relaunches it if not, so a
//! single write triggers at most one restart. The process control handle and
//! the two input pipes sit behind separate locks: ffmpeg reads its inputs in
//! lockstep, and a video write blocked on a full stdin must not hold up the
//! audio write that would unblock it.

use std::fmt::{Display, Formatter};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{FeedError, FeedResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lane {
    Video,
    Audio,
}

impl Display for Lane {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::Video => write!(f, "video"),
            Lane::Audio => write!(f, "audio"),
        }
    }
}

/// One input of the encoder.
#[async_trait]
pub trait RawSink: Send {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Liveness and shutdown of a running encoder.
pub trait EncoderControl: Send {
    fn pid(&self) -> Option<u32>;

    fn is_alive(&mut self) -> bool;

    /// Asks the encoder to flush and exit. Returns without waiting for it.
    fn terminate(&mut self);
}

/// A freshly launched encoder and its inputs.
pub struct Encoder {
    pub control: Box<dyn EncoderControl>,
    pub video: Box<dyn RawSink>,
    /// `None` when the encoder was started without an audio input.
    pub audio: Option<Box<dyn RawSink>>,
}

#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> FeedResult<Encoder>;
}

struct Control {
    encoder: Option<Box<dyn EncoderControl>>,
    generation: u64,
    // generation whose pipe failed while the process may still be running
    broken: Option<u64>,
}

struct Slot {
    generation: u64,
    sink: Option<Box<dyn RawSink>>,
}

impl Slot {
    fn empty() -> Mutex<Self> {
        Mutex::new(Self {
            generation: 0,
            sink: None,
        })
    }
}

pub struct FrameTransport {
    launcher: Box<dyn Launcher>,
    control: Mutex<Control>,
    video: Mutex<Slot>,
    audio: Mutex<Slot>,
    closed: AtomicBool,
    generation: AtomicU64,
    restarts: AtomicU64,
}

impl FrameTransport {
    /// Creates the transport without launching anything; see [`start`](Self::start).
    pub fn new<L: Launcher + 'static>(launcher: L) -> Self {
        Self {
            launcher: Box::new(launcher),
            control: Mutex::new(Control {
                encoder: None,
                generation: 0,
                broken: None,
            }),
            video: Slot::empty(),
            audio: Slot::empty(),
            closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
        }
    }

    /// Launches the encoder unless one is already running.
    pub async fn start(&self) -> FeedResult<()> {
        let mut control = self.control.lock().await;
        if self.is_closed() {
            return Err(FeedError::PipeClosed);
        }
        if control.encoder.is_some() {
            log::debug!("encoder already running");
            return Ok(());
        }
        self.relaunch(&mut control).await
    }

    /// Gracefully terminates the current encoder, if any, and launches a new one.
    ///
    /// Safe to call while a write is in flight: that write fails with
    /// [`FeedError::PipeClosed`] and the next one goes to the new process.
    pub async fn restart(&self) -> FeedResult<()> {
        let mut control = self.control.lock().await;
        if self.is_closed() {
            return Err(FeedError::PipeClosed);
        }
        self.relaunch(&mut control).await
    }

    pub async fn write_video(&self, data: &[u8]) -> FeedResult<()> {
        self.write(Lane::Video, data).await
    }

    pub async fn write_audio(&self, data: &[u8]) -> FeedResult<()> {
        self.write(Lane::Audio, data).await
    }

    pub async fn write(&self, lane: Lane, data: &[u8]) -> FeedResult<()> {
        self.ensure_alive().await?;

        let mut slot = self.slot(lane).lock().await;
        if self.is_closed() {
            return Err(FeedError::PipeClosed);
        }
        let generation = slot.generation;
        let Some(sink) = slot.sink.as_mut() else {
            return Err(match lane {
                Lane::Audio => FeedError::AudioDisabled,
                Lane::Video => FeedError::PipeClosed,
            });
        };

        if let Err(e) = sink.write_all(data).await {
            drop(slot);
            log::warn!(
                "{} write to encoder generation {} failed: {}",
                lane,
                generation,
                e
            );
            self.mark_broken(generation).await;
            return Err(FeedError::PipeClosed);
        }
        Ok(())
    }

    /// Signals the encoder to finish and refuses further writes. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut control = self.control.lock().await;
        if let Some(mut encoder) = control.encoder.take() {
            log::info!(
                "closing encoder generation {} (pid {:?})",
                control.generation,
                encoder.pid()
            );
            encoder.terminate();
        }
        drop(control);

        // a writer still holding a slot finds the pipe gone on its own
        for slot in [&self.video, &self.audio] {
            if let Ok(mut slot) = slot.try_lock() {
                slot.sink = None;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Launches after the first one.
    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Number of encoders launched so far; 0 before the first start.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    fn slot(&self, lane: Lane) -> &Mutex<Slot> {
        match lane {
            Lane::Video => &self.video,
            Lane::Audio => &self.audio,
        }
    }

    async fn ensure_alive(&self) -> FeedResult<()> {
        let mut control = self.control.lock().await;
        if self.is_closed() {
            return Err(FeedError::PipeClosed);
        }

        let generation = control.generation;
        let broken = control.broken == Some(generation);
        let alive = control
            .encoder
            .as_mut()
            .is_some_and(|encoder| encoder.is_alive());
        if alive && !broken {
            return Ok(());
        }

        if control.encoder.is_some() {
            log::warn!(
                "encoder generation {} is {}, restarting",
                generation,
                if broken { "unwritable" } else { "gone" }
            );
        }
        self.relaunch(&mut control).await
    }

    async fn relaunch(&self, control: &mut Control) -> FeedResult<()> {
        if let Some(mut old) = control.encoder.take() {
            log::info!(
                "terminating encoder generation {} (pid {:?})",
                control.generation,
                old.pid()
            );
            old.terminate();
        }

        let encoder = match self.launcher.launch().await {
            Ok(encoder) => encoder,
            Err(e) => {
                self.video.lock().await.sink = None;
                self.audio.lock().await.sink = None;
                return Err(e);
            }
        };

        let generation = control.generation + 1;
        {
            let mut video = self.video.lock().await;
            video.generation = generation;
            video.sink = Some(encoder.video);
        }
        {
            let mut audio = self.audio.lock().await;
            audio.generation = generation;
            audio.sink = encoder.audio;
        }

        if generation > 1 {
            let restarts = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
            log::info!(
                "encoder restarted (restart #{}, pid {:?})",
                restarts,
                encoder.control.pid()
            );
        } else {
            log::info!("encoder started (pid {:?})", encoder.control.pid());
        }

        control.encoder = Some(encoder.control);
        control.generation = generation;
        control.broken = None;
        self.generation.store(generation, Ordering::Relaxed);
        Ok(())
    }

    async fn mark_broken(&self, generation: u64) {
        let mut control = self.control.lock().await;
        if control.generation == generation {
            control.broken = Some(generation);
        }
    }
}

impl Drop for FrameTransport {
    fn drop(&mut self) {
        if let Some(mut encoder) = self.control.get_mut().encoder.take() {
            log::info!("transport dropped, terminating encoder (pid {:?})", encoder.pid());
            encoder.terminate();
        }
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;
