//! Audio device abstraction.
//!
//! Capture and playback are blocking, so callers run them on a dedicated
//! worker (`tokio::task::spawn_blocking`) and never on the async scheduler.
//! Handles release their device exactly once, on drop.

mod memory;

#[cfg(feature = "cpal-audio")]
mod cpal_device;

pub use memory::{MemoryAudioDevice, MemoryAudioStats};

#[cfg(feature = "cpal-audio")]
pub use cpal_device::CpalAudioDevice;

use crate::errors::VoiceResult;

/// Default sample rate for the realtime endpoint (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Default frames per captured chunk.
pub const DEFAULT_CHUNK_FRAMES: usize = 1024;

/// Sample encoding on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian PCM
    #[default]
    Pcm16,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Pcm16 => 2,
        }
    }
}

/// Stream parameters for opening a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl AudioSpec {
    /// 16-bit mono PCM at `sample_rate`.
    pub fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            format: SampleFormat::Pcm16,
        }
    }

    /// Bytes per frame (one sample per channel).
    pub fn frame_bytes(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self::pcm16_mono(DEFAULT_SAMPLE_RATE)
    }
}

/// Open microphone stream.
pub trait CaptureHandle: Send {
    /// Block until `size` bytes are available.
    ///
    /// On device overflow the available (possibly empty) data is returned
    /// instead of an error; the overflow is logged.
    fn read_chunk(&mut self, size: usize) -> VoiceResult<Vec<u8>>;
}

/// Open speaker stream.
pub trait PlaybackHandle: Send {
    /// Block until the device has accepted `data` for playback.
    fn write_chunk(&mut self, data: &[u8]) -> VoiceResult<()>;
}

/// Source of capture and playback handles.
pub trait AudioDevice: Send + Sync {
    fn open_capture(&self, spec: &AudioSpec) -> VoiceResult<Box<dyn CaptureHandle>>;

    fn open_playback(&self, spec: &AudioSpec) -> VoiceResult<Box<dyn PlaybackHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec() {
        let spec = AudioSpec::default();
        assert_eq!(spec.sample_rate, 24000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.frame_bytes(), 2);
    }
}
