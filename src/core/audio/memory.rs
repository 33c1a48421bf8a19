//! In-memory audio device: scripted capture, recorded playback.
//!
//! Used by tests and by tooling that feeds prerecorded PCM instead of a
//! microphone.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{AudioDevice, AudioSpec, CaptureHandle, PlaybackHandle};
use crate::errors::{VoiceError, VoiceResult};

/// How long an exhausted capture waits before reporting an empty chunk.
const IDLE_CAPTURE_DELAY: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Shared {
    script: Mutex<VecDeque<Vec<u8>>>,
    played: Mutex<Vec<u8>>,
    capture_opened: AtomicUsize,
    capture_released: AtomicUsize,
    playback_opened: AtomicUsize,
    playback_released: AtomicUsize,
    fail_open: Mutex<Option<String>>,
}

/// Open/release counters observed on a `MemoryAudioDevice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryAudioStats {
    pub capture_opened: usize,
    pub capture_released: usize,
    pub playback_opened: usize,
    pub playback_released: usize,
}

/// Audio device backed by memory buffers. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryAudioDevice {
    shared: Arc<Shared>,
}

impl MemoryAudioDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device whose capture yields `chunks` in order, then silence.
    pub fn with_capture<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let device = Self::new();
        device.shared.script.lock().extend(chunks);
        device
    }

    /// Make every subsequent open fail with a device error.
    pub fn fail_open(&self, reason: impl Into<String>) {
        *self.shared.fail_open.lock() = Some(reason.into());
    }

    /// Everything written to playback so far.
    pub fn played(&self) -> Vec<u8> {
        self.shared.played.lock().clone()
    }

    pub fn stats(&self) -> MemoryAudioStats {
        MemoryAudioStats {
            capture_opened: self.shared.capture_opened.load(Ordering::SeqCst),
            capture_released: self.shared.capture_released.load(Ordering::SeqCst),
            playback_opened: self.shared.playback_opened.load(Ordering::SeqCst),
            playback_released: self.shared.playback_released.load(Ordering::SeqCst),
        }
    }

    fn check_open(&self) -> VoiceResult<()> {
        match self.shared.fail_open.lock().as_ref() {
            Some(reason) => Err(VoiceError::Device(reason.clone())),
            None => Ok(()),
        }
    }
}

impl AudioDevice for MemoryAudioDevice {
    fn open_capture(&self, _spec: &AudioSpec) -> VoiceResult<Box<dyn CaptureHandle>> {
        self.check_open()?;
        self.shared.capture_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryCapture {
            shared: self.shared.clone(),
            pending: VecDeque::new(),
        }))
    }

    fn open_playback(&self, _spec: &AudioSpec) -> VoiceResult<Box<dyn PlaybackHandle>> {
        self.check_open()?;
        self.shared.playback_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryPlayback {
            shared: self.shared.clone(),
        }))
    }
}

struct MemoryCapture {
    shared: Arc<Shared>,
    pending: VecDeque<u8>,
}

impl CaptureHandle for MemoryCapture {
    fn read_chunk(&mut self, size: usize) -> VoiceResult<Vec<u8>> {
        while self.pending.len() < size {
            match self.shared.script.lock().pop_front() {
                Some(chunk) => self.pending.extend(chunk),
                None => break,
            }
        }

        if self.pending.is_empty() {
            std::thread::sleep(IDLE_CAPTURE_DELAY);
            return Ok(Vec::new());
        }

        let take = size.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }
}

impl Drop for MemoryCapture {
    fn drop(&mut self) {
        self.shared.capture_released.fetch_add(1, Ordering::SeqCst);
    }
}

struct MemoryPlayback {
    shared: Arc<Shared>,
}

impl PlaybackHandle for MemoryPlayback {
    fn write_chunk(&mut self, data: &[u8]) -> VoiceResult<()> {
        self.shared.played.lock().extend_from_slice(data);
        Ok(())
    }
}

impl Drop for MemoryPlayback {
    fn drop(&mut self) {
        self.shared.playback_released.fetch_add(1, Ordering::SeqCst);
    }
}
