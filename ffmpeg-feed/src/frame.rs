use std::fmt::{Display, Formatter};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FeedError, FeedResult};

/// Colour channels per pixel (rgb24 on the wire).
pub const CHANNELS: usize = 3;

/// A video frame of shape `(height, width, 3)` with values in `[0.0, 1.0]`.
///
/// Pixels are stored row-major, channels interleaved, the same layout the
/// encoder reads as `rgb24`.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl Frame {
    pub fn new(height: usize, width: usize, data: Vec<f32>) -> FeedResult<Self> {
        let expected = height * width * CHANNELS;
        if data.len() != expected {
            return Err(FeedError::BufferLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            height,
            width,
            data,
        })
    }

    /// A frame where every pixel has the same colour.
    pub fn filled(height: usize, width: usize, rgb: [f32; 3]) -> Self {
        let mut data = Vec::with_capacity(height * width * CHANNELS);
        for _ in 0..height * width {
            data.extend_from_slice(&rgb);
        }
        Self {
            height,
            width,
            data,
        }
    }

    pub fn from_fn<F>(height: usize, width: usize, mut pixel: F) -> Self
    where
        F: FnMut(usize, usize) -> [f32; 3],
    {
        let mut data = Vec::with_capacity(height * width * CHANNELS);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&pixel(y, x));
            }
        }
        Self {
            height,
            width,
            data,
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, CHANNELS)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Clips to `[0, 1]`, scales by 255 and truncates to one byte per channel.
    pub fn to_rgb24(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.data.len());
        for v in &self.data {
            // NaN saturates to 0
            out.put_u8((v * 255.0).clamp(0.0, 255.0) as u8);
        }
        out.freeze()
    }
}

/// A block of stereo samples with values in `[-1.0, 1.0]`.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBlock {
    left: Vec<f32>,
    right: Vec<f32>,
}

impl AudioBlock {
    pub fn new(left: Vec<f32>, right: Vec<f32>) -> FeedResult<Self> {
        if left.len() != right.len() {
            return Err(FeedError::AudioChannelMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        Ok(Self { left, right })
    }

    /// Same samples on both channels.
    pub fn mono(samples: Vec<f32>) -> Self {
        Self {
            right: samples.clone(),
            left: samples,
        }
    }

    /// A sine tone, used as the stand-in when no audio has been produced yet.
    /// Some ingest servers misbehave on pure digital silence.
    pub fn tone(frequency: f32, amplitude: f32, sample_rate: u32, samples: usize) -> Self {
        let step = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
        Self::mono(
            (0..samples)
                .map(|i| amplitude * (step * i as f32).sin())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    pub fn right(&self) -> &[f32] {
        &self.right
    }

    pub fn duration(&self, sample_rate: u32) -> Duration {
        Duration::from_secs_f64(self.len() as f64 / sample_rate as f64)
    }

    /// Interleaved signed 16-bit little-endian samples, `L R L R ...`.
    pub fn to_s16le(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.len() * 4);
        for (l, r) in self.left.iter().zip(&self.right) {
            out.put_i16_le(to_i16(*l));
            out.put_i16_le(to_i16(*r));
        }
        out.freeze()
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Anything a producer can submit to a stream.
#[derive(Clone, Debug)]
pub enum Payload {
    Video(Frame),
    Audio(AudioBlock),
}

impl From<Frame> for Payload {
    fn from(frame: Frame) -> Self {
        Payload::Video(frame)
    }
}

impl From<AudioBlock> for Payload {
    fn from(block: AudioBlock) -> Self {
        Payload::Audio(block)
    }
}

/// Wire-ready bytes for one lane plus the playback time they cover.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub data: Bytes,
    pub duration: Duration,
}

impl Chunk {
    pub fn new(data: Bytes, duration: Duration) -> Self {
        Self { data, duration }
    }
}

impl Display for Chunk {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "Chunk {{ data: {}, duration: {:?} }}", self.data.len(), self.duration)
    }
}
