//! Feeds raw video frames and PCM audio to an external ffmpeg process at a
//! fixed real-time cadence.
//!
//! ```text
//!  producers ──submit──► OutputStream ──┬─ Direct ───────────────────────────┐
//!                                       ├─ Repeater: last known ◄─ Pacer ────┤
//!                                       └─ Buffered: OrderedBuffer ◄─ Pacer ─┤
//!                                                                           ▼
//!                                                   FrameTransport (stdin / audio fifo)
//!                                                                           │
//!                                                                        ffmpeg ──► ingest
//! ```
//!
//! Video and audio are independent lanes: each has its own buffer and, in the
//! paced modes, its own [`pacer::Pacer`].

pub mod buffer;
pub mod command;
pub mod config;
pub mod error;
pub mod frame;
pub mod launcher;
pub mod pacer;
pub mod stream;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Destination, PipeErrorPolicy, StreamConfig, StreamMode};
pub use error::{FeedError, FeedResult};
pub use frame::{AudioBlock, Frame, Payload};
pub use stream::OutputStream;
