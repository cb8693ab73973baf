//! In-memory encoder used by the transport and stream tests.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{FeedError, FeedResult};
use crate::transport::{Encoder, EncoderControl, Lane, Launcher, RawSink};

#[derive(Default)]
struct MockState {
    launches: u64,
    fail_launch: bool,
    terminated: Vec<u64>,
    dead: HashSet<u64>,
    broken: HashSet<u64>,
    video: Vec<(u64, Bytes)>,
    audio: Vec<(u64, Bytes)>,
}

impl MockState {
    fn writable(&self, id: u64) -> bool {
        !self.dead.contains(&id) && !self.broken.contains(&id) && !self.terminated.contains(&id)
    }
}

/// Launches fake encoders identified by their launch number (1, 2, ...).
#[derive(Clone, Default)]
pub struct MockLauncher {
    state: Arc<Mutex<MockState>>,
    audio: bool,
}

impl MockLauncher {
    pub fn new(audio: bool) -> Self {
        Self {
            state: Arc::default(),
            audio,
        }
    }

    pub fn launches(&self) -> u64 {
        self.state.lock().launches
    }

    pub fn terminated(&self) -> Vec<u64> {
        self.state.lock().terminated.clone()
    }

    /// Launched encoders that have neither exited nor been terminated.
    pub fn alive(&self) -> Vec<u64> {
        let state = self.state.lock();
        (1..=state.launches)
            .filter(|id| !state.dead.contains(id) && !state.terminated.contains(id))
            .collect()
    }

    /// Simulates the encoder exiting on its own.
    pub fn kill(&self, id: u64) {
        self.state.lock().dead.insert(id);
    }

    pub fn kill_current(&self) {
        let mut state = self.state.lock();
        let id = state.launches;
        state.dead.insert(id);
    }

    /// The process keeps running but its pipes fail.
    pub fn break_pipe(&self, id: u64) {
        self.state.lock().broken.insert(id);
    }

    pub fn fail_launches(&self, fail: bool) {
        self.state.lock().fail_launch = fail;
    }

    pub fn video_writes(&self) -> Vec<(u64, Bytes)> {
        self.state.lock().video.clone()
    }

    pub fn audio_writes(&self) -> Vec<(u64, Bytes)> {
        self.state.lock().audio.clone()
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(&self) -> FeedResult<Encoder> {
        let id = {
            let mut state = self.state.lock();
            if state.fail_launch {
                return Err(FeedError::ProcessLaunch {
                    binary: "mock-ffmpeg".into(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
                });
            }
            state.launches += 1;
            state.launches
        };

        let sink = |lane| -> Box<dyn RawSink> {
            Box::new(MockSink {
                id,
                lane,
                state: Arc::clone(&self.state),
            })
        };
        Ok(Encoder {
            control: Box::new(MockControl {
                id,
                state: Arc::clone(&self.state),
            }),
            video: sink(Lane::Video),
            audio: self.audio.then(|| sink(Lane::Audio)),
        })
    }
}

struct MockControl {
    id: u64,
    state: Arc<Mutex<MockState>>,
}

impl EncoderControl for MockControl {
    fn pid(&self) -> Option<u32> {
        Some(1000 + self.id as u32)
    }

    fn is_alive(&mut self) -> bool {
        let state = self.state.lock();
        !state.dead.contains(&self.id) && !state.terminated.contains(&self.id)
    }

    fn terminate(&mut self) {
        let mut state = self.state.lock();
        if !state.terminated.contains(&self.id) {
            state.terminated.push(self.id);
        }
    }
}

struct MockSink {
    id: u64,
    lane: Lane,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl RawSink for MockSink {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if !state.writable(self.id) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        let record = (self.id, Bytes::copy_from_slice(data));
        match self.lane {
            Lane::Video => state.video.push(record),
            Lane::Audio => state.audio.push(record),
        }
        Ok(())
    }
}
