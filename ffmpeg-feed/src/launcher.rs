//! Production [`Launcher`]: spawns ffmpeg, feeds video through its stdin and
//! audio through a named pipe.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::stat::Mode;
use nix::unistd::Pid;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStderr};

use crate::command::build_ffmpeg_command;
use crate::config::StreamConfig;
use crate::error::{FeedError, FeedResult};
use crate::transport::{Encoder, EncoderControl, Launcher, RawSink};

/// How long a terminated encoder gets to flush before it is killed.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

const AUDIO_FIFO_NAME: &str = "audio.s16le";

pub struct FfmpegLauncher {
    config: StreamConfig,
    // removed together with the fifo when the launcher is dropped
    fifo_dir: Option<TempDir>,
}

impl FfmpegLauncher {
    /// Creates the audio fifo up front when audio is enabled, so every
    /// relaunch reuses the same path.
    pub fn new(config: StreamConfig) -> FeedResult<Self> {
        let fifo_dir = if config.audio_enabled {
            let dir = tempfile::Builder::new().prefix("ffmpeg-feed-").tempdir()?;
            let path = dir.path().join(AUDIO_FIFO_NAME);
            nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)?;
            log::debug!("created audio fifo {}", path.display());
            Some(dir)
        } else {
            None
        };
        Ok(Self { config, fifo_dir })
    }

    pub fn audio_fifo(&self) -> Option<PathBuf> {
        self.fifo_dir
            .as_ref()
            .map(|dir| dir.path().join(AUDIO_FIFO_NAME))
    }
}

#[async_trait]
impl Launcher for FfmpegLauncher {
    async fn launch(&self) -> FeedResult<Encoder> {
        let fifo = self.audio_fifo();
        let mut cmd = build_ffmpeg_command(&self.config, fifo.as_deref());
        let mut child = cmd.spawn().map_err(|source| FeedError::ProcessLaunch {
            binary: self.config.ffmpeg_path.clone(),
            source,
        })?;
        let pid = child.id();
        log::debug!(
            "launched {} (pid {:?}): {}x{} @ {} fps, audio {}, ingest {}",
            self.config.ffmpeg_path,
            pid,
            self.config.width,
            self.config.height,
            self.config.fps,
            if fifo.is_some() { "fifo" } else { "silent" },
            self.config.destination.ingest_url
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("encoder stdin was not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, pid));
        }

        Ok(Encoder {
            control: Box::new(FfmpegProcess {
                child: Some(child),
                pid,
            }),
            video: Box::new(PipeSink::new(stdin)),
            audio: fifo.map(|path| Box::new(FifoSink::new(path)) as Box<dyn RawSink>),
        })
    }
}

pub struct FfmpegProcess {
    child: Option<Child>,
    pid: Option<u32>,
}

impl EncoderControl for FfmpegProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Sends SIGINT so ffmpeg can close the stream cleanly, then hands the
    /// child to a reaper task that kills it after [`SHUTDOWN_TIMEOUT`].
    fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(Some(status)) = child.try_wait() {
            log::debug!("encoder (pid {:?}) already exited with {}", self.pid, status);
            return;
        }
        if let Some(pid) = self.pid {
            log::info!("sending SIGINT to encoder (pid {})", pid);
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                log::debug!("SIGINT to encoder (pid {}) failed: {}", pid, e);
            }
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(reap(child, self.pid));
            }
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    log::debug!("kill of encoder (pid {:?}) failed: {}", self.pid, e);
                }
            }
        }
    }
}

async fn reap(mut child: Child, pid: Option<u32>) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => log::info!("encoder (pid {:?}) exited with {}", pid, status),
        Ok(Err(e)) => log::warn!("waiting for encoder (pid {:?}) failed: {}", pid, e),
        Err(_) => {
            log::warn!("encoder (pid {:?}) did not exit in time, killing", pid);
            if let Err(e) = child.kill().await {
                log::warn!("kill of encoder (pid {:?}) failed: {}", pid, e);
            }
        }
    }
}

async fn forward_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => log::debug!(target: "ffmpeg", "[{}] {}", pid.unwrap_or_default(), line),
            Ok(None) => break,
            Err(e) => {
                log::debug!(target: "ffmpeg", "[{}] stderr closed: {}", pid.unwrap_or_default(), e);
                break;
            }
        }
    }
}

/// Any async writer used as an encoder input (ffmpeg's stdin in production).
pub struct PipeSink<W> {
    inner: W,
}

impl<W> PipeSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> RawSink for PipeSink<W> {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data).await
    }
}

/// Writer end of the audio fifo.
///
/// Opened non-blocking on the first write. Until the encoder has opened the
/// fifo for reading the open fails with `ENXIO` and the data is dropped.
pub struct FifoSink {
    path: PathBuf,
    sender: Option<pipe::Sender>,
}

impl FifoSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sender: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.sender.is_some()
    }
}

#[async_trait]
impl RawSink for FifoSink {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.sender.is_none() {
            match pipe::OpenOptions::new().open_sender(&self.path) {
                Ok(sender) => {
                    log::debug!("audio fifo {} opened", self.path.display());
                    self.sender = Some(sender);
                }
                Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {
                    log::trace!("audio fifo has no reader yet, dropped {} bytes", data.len());
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(sender) = self.sender.as_mut() {
            if let Err(e) = sender.write_all(data).await {
                self.sender = None;
                return Err(e);
            }
        }
        Ok(())
    }
}
