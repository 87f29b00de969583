//! Host audio channels for emulated USB audio devices.
//!
//! A channel is an unframed byte stream of PCM samples flowing in one direction between the
//! device model and the host audio subsystem:
//! - [`Direction::Capture`]: the host produces (microphone), the device pulls
//! - [`Direction::Playback`]: the device pushes, the host consumes (speaker)
//!
//! The host side runs in its own execution context, so every query is a snapshot that may
//! already be stale by the time the device acts on it.

pub mod memory;

pub use memory::{ChannelFaults, HostEnd, MemoryBackend};

use thiserror::Error;

/// Defensive upper bound for channel frequencies accepted by backends.
pub const MAX_CHANNEL_FREQUENCY_HZ: u32 = 384_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Capture,
    Playback,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Capture => "capture",
            Direction::Playback => "playback",
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian.
    S16Le,
}

impl SampleFormat {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16Le => 2,
        }
    }
}

/// Declared format of a channel's byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub channels: u8,
    pub sample: SampleFormat,
    pub frequency_hz: u32,
}

impl PcmFormat {
    pub const fn mono_s16le(frequency_hz: u32) -> Self {
        Self {
            channels: 1,
            sample: SampleFormat::S16Le,
            frequency_hz,
        }
    }

    pub const fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample.bytes_per_sample()
    }

    /// Number of bytes covering `ms` milliseconds of audio in this format.
    pub const fn bytes_for_ms(&self, ms: u32) -> usize {
        self.frequency_hz as usize * self.bytes_per_frame() * ms as usize / 1000
    }

    fn validate(&self) -> Result<(), ChannelError> {
        if self.channels == 0
            || self.frequency_hz == 0
            || self.frequency_hz > MAX_CHANNEL_FREQUENCY_HZ
        {
            return Err(ChannelError::UnsupportedFormat(*self));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("audio channel unavailable: {0}")]
    Unavailable(String),
    #[error("audio channel i/o failure: {0}")]
    Io(String),
    #[error("unsupported audio format {0:?}")]
    UnsupportedFormat(PcmFormat),
}

/// One open host audio channel. Dropping the channel closes it.
///
/// Implementations are responsible for their own thread safety with respect to the host side;
/// callers only serialize their own calls.
pub trait AudioChannel: Send {
    fn direction(&self) -> Direction;

    fn format(&self) -> PcmFormat;

    /// Change the declared format in place, keeping the channel open.
    fn set_format(&mut self, format: PcmFormat) -> Result<(), ChannelError>;

    /// Start transferring. Channels are opened paused.
    fn resume(&mut self) -> Result<(), ChannelError>;

    /// Discard all buffered bytes.
    fn clear(&mut self) -> Result<(), ChannelError>;

    /// Bytes currently buffered and ready to be pulled.
    fn available(&self) -> Result<usize, ChannelError>;

    /// Pull up to `buf.len()` bytes. May return fewer than [`AudioChannel::available`] reported.
    fn pull(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError>;

    fn push(&mut self, data: &[u8]) -> Result<(), ChannelError>;
}

/// Factory for host audio channels.
pub trait AudioBackend: Send {
    fn open(
        &mut self,
        direction: Direction,
        format: PcmFormat,
    ) -> Result<Box<dyn AudioChannel>, ChannelError>;
}

/// Backend used when host audio is disabled: every open fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl AudioBackend for NullBackend {
    fn open(
        &mut self,
        direction: Direction,
        _format: PcmFormat,
    ) -> Result<Box<dyn AudioChannel>, ChannelError> {
        Err(ChannelError::Unavailable(format!(
            "host audio disabled ({direction})"
        )))
    }
}
