//! Microphone and speaker access through cpal.
//!
//! `cpal::Stream` is not `Send`, so each handle owns a thread that builds the
//! stream, keeps it alive, and drops it when the handle is dropped. Samples
//! cross between the audio callback and the blocking `read_chunk` /
//! `write_chunk` calls through a condvar-guarded ring.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SizedSample, StreamConfig};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::{AudioDevice, AudioSpec, CaptureHandle, PlaybackHandle};
use crate::errors::{VoiceError, VoiceResult};

/// Captured samples kept before the oldest are dropped (about 2s at 24kHz).
const MAX_CAPTURE_SAMPLES: usize = 48_000;

/// Queued playback samples before `write_chunk` blocks.
const MAX_PLAYBACK_SAMPLES: usize = 24_000;

/// Poll interval of the stream-owning thread.
const PARK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Ring {
    samples: Mutex<RingState>,
    changed: Condvar,
}

#[derive(Default)]
struct RingState {
    buf: VecDeque<i16>,
    overflowed: bool,
}

/// Default input and output devices of the platform host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalAudioDevice;

impl CpalAudioDevice {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDevice for CpalAudioDevice {
    fn open_capture(&self, spec: &AudioSpec) -> VoiceResult<Box<dyn CaptureHandle>> {
        let ring = Arc::new(Ring::default());
        let worker = StreamWorker::spawn(*spec, ring.clone(), Direction::Input)?;
        Ok(Box::new(CpalCapture {
            ring,
            spec: *spec,
            _worker: worker,
        }))
    }

    fn open_playback(&self, spec: &AudioSpec) -> VoiceResult<Box<dyn PlaybackHandle>> {
        let ring = Arc::new(Ring::default());
        let worker = StreamWorker::spawn(*spec, ring.clone(), Direction::Output)?;
        Ok(Box::new(CpalPlayback {
            ring,
            pending: None,
            _worker: worker,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Input,
    Output,
}

/// Thread owning one cpal stream for the lifetime of a handle.
struct StreamWorker {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StreamWorker {
    fn spawn(spec: AudioSpec, ring: Arc<Ring>, direction: Direction) -> VoiceResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();

        let thread = thread::Builder::new()
            .name(format!("audio-{direction:?}").to_lowercase())
            .spawn(move || {
                let stream = match open_stream(&spec, ring, direction) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(format!("Failed to start stream: {e}")));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while !stop_flag.load(Ordering::SeqCst) {
                    thread::park_timeout(PARK_INTERVAL);
                }
                debug!(?direction, "Releasing audio stream");
                drop(stream);
            })
            .map_err(|e| VoiceError::Device(format!("Failed to spawn audio thread: {e}")))?;

        let mut worker = Self {
            stop,
            thread: Some(thread),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(worker),
            Ok(Err(e)) => {
                worker.shutdown();
                Err(VoiceError::Device(e))
            }
            Err(_) => {
                worker.shutdown();
                Err(VoiceError::Device("audio thread exited during setup".to_string()))
            }
        }
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_stream(spec: &AudioSpec, ring: Arc<Ring>, direction: Direction) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let config = StreamConfig {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    match direction {
        Direction::Input => {
            let device = host
                .default_input_device()
                .ok_or_else(|| "Input device not found".to_string())?;
            let configs = device
                .supported_input_configs()
                .map_err(|e| format!("Failed to get supported input configs: {e}"))?;
            match pick_sample_format(configs, spec, "Input")? {
                cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, ring),
                cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, ring),
                cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, ring),
                other => Err(format!("Unsupported sample format: {other:?}")),
            }
        }
        Direction::Output => {
            let device = host
                .default_output_device()
                .ok_or_else(|| "Output device not found".to_string())?;
            let configs = device
                .supported_output_configs()
                .map_err(|e| format!("Failed to get supported output configs: {e}"))?;
            match pick_sample_format(configs, spec, "Output")? {
                cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, ring),
                cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, ring),
                cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, ring),
                other => Err(format!("Unsupported sample format: {other:?}")),
            }
        }
    }
}

/// Sample format of a supported configuration matching the channel count and
/// rate of `spec`, preferring I16 over F32 over U16.
fn pick_sample_format<I>(configs: I, spec: &AudioSpec, label: &str) -> Result<cpal::SampleFormat, String>
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    let preference = [
        cpal::SampleFormat::I16,
        cpal::SampleFormat::F32,
        cpal::SampleFormat::U16,
    ];
    let formats: Vec<cpal::SampleFormat> = configs
        .filter(|c| {
            c.channels() == spec.channels
                && c.min_sample_rate() <= spec.sample_rate
                && c.max_sample_rate() >= spec.sample_rate
        })
        .map(|c| c.sample_format())
        .collect();

    preference
        .into_iter()
        .find(|f| formats.contains(f))
        .ok_or_else(|| {
            format!(
                "{label} device has no {}-channel configuration at {} Hz in I16, F32 or U16",
                spec.channels, spec.sample_rate
            )
        })
}

fn build_input<T>(device: &Device, config: &StreamConfig, ring: Arc<Ring>) -> Result<cpal::Stream, String>
where
    T: Sample + SizedSample,
    i16: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut state = ring.samples.lock();
                state.buf.extend(data.iter().map(|s| i16::from_sample(*s)));
                if state.buf.len() > MAX_CAPTURE_SAMPLES {
                    let excess = state.buf.len() - MAX_CAPTURE_SAMPLES;
                    state.buf.drain(..excess);
                    state.overflowed = true;
                }
                ring.changed.notify_all();
            },
            |err| warn!(error = %err, "Audio capture error"),
            None,
        )
        .map_err(|e| format!("Failed to build input stream: {e}"))
}

fn build_output<T>(device: &Device, config: &StreamConfig, ring: Arc<Ring>) -> Result<cpal::Stream, String>
where
    T: Sample + SizedSample + FromSample<i16>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut state = ring.samples.lock();
                for dst in data.iter_mut() {
                    let sample = state.buf.pop_front().unwrap_or(0);
                    *dst = T::from_sample(sample);
                }
                ring.changed.notify_all();
            },
            |err| warn!(error = %err, "Audio playback error"),
            None,
        )
        .map_err(|e| format!("Failed to build output stream: {e}"))
}

struct CpalCapture {
    ring: Arc<Ring>,
    spec: AudioSpec,
    _worker: StreamWorker,
}

impl CaptureHandle for CpalCapture {
    fn read_chunk(&mut self, size: usize) -> VoiceResult<Vec<u8>> {
        let wanted = size / 2;
        // Twice the chunk duration before giving up on a full chunk
        let wait = Duration::from_secs_f64(2.0 * wanted as f64 / self.spec.sample_rate as f64);

        let mut state = self.ring.samples.lock();
        if state.buf.len() < wanted {
            let _ = self.ring.changed.wait_while_for(&mut state, |s| s.buf.len() < wanted, wait);
        }

        if state.overflowed {
            state.overflowed = false;
            warn!(available = state.buf.len(), "Capture overflow, returning partial chunk");
        }

        let take = wanted.min(state.buf.len());
        let mut out = Vec::with_capacity(take * 2);
        for sample in state.buf.drain(..take) {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(out)
    }
}

struct CpalPlayback {
    ring: Arc<Ring>,
    /// Low byte of a sample split across two writes
    pending: Option<u8>,
    _worker: StreamWorker,
}

impl PlaybackHandle for CpalPlayback {
    fn write_chunk(&mut self, data: &[u8]) -> VoiceResult<()> {
        let samples = pcm16_samples(&mut self.pending, data);

        let mut state = self.ring.samples.lock();
        self.ring
            .changed
            .wait_while(&mut state, |s| s.buf.len() > MAX_PLAYBACK_SAMPLES);
        state.buf.extend(samples);
        Ok(())
    }
}

/// Little-endian PCM16 samples of `data`, prefixed by a byte left over from
/// the previous call. A trailing odd byte is kept in `pending`.
fn pcm16_samples(pending: &mut Option<u8>, data: &[u8]) -> Vec<i16> {
    let mut samples = Vec::with_capacity(data.len() / 2 + 1);
    let mut rest = data;
    if let Some(low) = pending.take() {
        match rest.split_first() {
            Some((&high, tail)) => {
                samples.push(i16::from_le_bytes([low, high]));
                rest = tail;
            }
            None => {
                *pending = Some(low);
                return samples;
            }
        }
    }

    let mut pairs = rest.chunks_exact(2);
    samples.extend(pairs.by_ref().map(|pair| i16::from_le_bytes([pair[0], pair[1]])));
    if let [odd] = pairs.remainder() {
        *pending = Some(*odd);
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_byte_carried_into_next_write() {
        let mut pending = None;
        let first = pcm16_samples(&mut pending, &[0x01, 0x00, 0x34]);
        assert_eq!(first, vec![1]);
        assert_eq!(pending, Some(0x34));

        let second = pcm16_samples(&mut pending, &[0x12, 0xff, 0x7f]);
        assert_eq!(second, vec![0x1234, i16::MAX]);
        assert_eq!(pending, None);

        assert!(pcm16_samples(&mut pending, &[0x05]).is_empty());
        assert!(pcm16_samples(&mut pending, &[]).is_empty());
        assert_eq!(pcm16_samples(&mut pending, &[0x00]), vec![5]);
    }

    fn range(channels: u16, min: u32, max: u32, format: cpal::SampleFormat) -> cpal::SupportedStreamConfigRange {
        cpal::SupportedStreamConfigRange::new(
            channels,
            min,
            max,
            cpal::SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn test_pick_sample_format() {
        let spec = AudioSpec::default();
        let configs = vec![
            range(2, 8_000, 48_000, cpal::SampleFormat::I16),
            range(spec.channels, 8_000, 48_000, cpal::SampleFormat::F32),
            range(spec.channels, spec.sample_rate, spec.sample_rate, cpal::SampleFormat::I16),
        ];
        let format = pick_sample_format(configs.into_iter(), &spec, "Input").unwrap();
        assert_eq!(format, cpal::SampleFormat::I16);

        let configs = vec![range(2, 8_000, 48_000, cpal::SampleFormat::I16)];
        let err = pick_sample_format(configs.into_iter(), &spec, "Output").unwrap_err();
        assert!(err.starts_with("Output device"));
        assert!(err.contains(&format!("{} Hz", spec.sample_rate)));
        assert!(err.contains(&format!("{}-channel", spec.channels)));
    }
}
