//! Duplex frame pump between two open transports.
//!
//! Two forwarding loops run concurrently inside the caller's task, one per
//! direction. Each loop reads one frame, hands it to the observer, and sends
//! it before reading the next, so a slow destination stalls its source
//! instead of filling a buffer. The first loop to stop moves the pump to
//! `Draining`, cancels its counterpart, and closes its own destination; once
//! both loops have returned the pump is `Stopped`.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::transport::{Frame, FrameSink, FrameSource, Transport};

/// Lifecycle of a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Forwarding direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Downstream peer to upstream endpoint
    Upstream,
    /// Upstream endpoint to downstream peer
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => write!(f, "upstream"),
            Direction::Downstream => write!(f, "downstream"),
        }
    }
}

/// Hook invoked for every forwarded frame. Must not alter the frame.
pub trait FrameObserver: Send + Sync {
    fn observe(&self, direction: Direction, frame: &Frame);
}

/// Observer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl FrameObserver for NoopObserver {
    fn observe(&self, _direction: Direction, _frame: &Frame) {}
}

/// Why a forwarding loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The source closed cleanly
    SourceClosed,
    /// Reading from the source failed
    SourceFailed(String),
    /// Writing to the destination failed
    SinkFailed(String),
    /// The other loop or an external shutdown stopped this one
    Cancelled,
}

impl StopReason {
    pub fn is_error(&self) -> bool {
        matches!(self, StopReason::SourceFailed(_) | StopReason::SinkFailed(_))
    }
}

/// Counters of one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionReport {
    pub direction: Direction,
    pub frames: u64,
    pub bytes: u64,
    pub stop: StopReason,
}

/// Outcome of a pump run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
    pub upstream: DirectionReport,
    pub downstream: DirectionReport,
}

impl PumpReport {
    /// The loop that ended the session (the one not cancelled).
    pub fn initiator(&self) -> Option<&DirectionReport> {
        [&self.upstream, &self.downstream]
            .into_iter()
            .find(|r| r.stop != StopReason::Cancelled)
    }
}

pub struct DuplexPump {
    observer: Arc<dyn FrameObserver>,
    state: watch::Sender<PumpState>,
    cancel: CancellationToken,
}

impl Default for DuplexPump {
    fn default() -> Self {
        Self::new(Arc::new(NoopObserver))
    }
}

impl DuplexPump {
    pub fn new(observer: Arc<dyn FrameObserver>) -> Self {
        Self {
            observer,
            state: watch::Sender::new(PumpState::Idle),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> PumpState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<PumpState> {
        self.state.subscribe()
    }

    /// Token that stops both loops when cancelled.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Forward frames in both directions until either side closes or fails.
    ///
    /// Returns once both loops have stopped and both destinations have been
    /// closed.
    pub async fn run(self, downstream: Transport, upstream: Transport) -> PumpReport {
        let (down_source, down_sink) = downstream.into_parts();
        let (up_source, up_sink) = upstream.into_parts();

        self.state.send_replace(PumpState::Running);
        info!("Pump running");

        let (upstream, downstream) = tokio::join!(
            self.forward(Direction::Upstream, down_source, up_sink),
            self.forward(Direction::Downstream, up_source, down_sink),
        );

        self.state.send_replace(PumpState::Stopped);
        info!(
            up_frames = upstream.frames,
            down_frames = downstream.frames,
            "Pump stopped"
        );

        PumpReport {
            upstream,
            downstream,
        }
    }

    async fn forward(
        &self,
        direction: Direction,
        mut source: Box<dyn FrameSource>,
        mut sink: Box<dyn FrameSink>,
    ) -> DirectionReport {
        let mut frames = 0u64;
        let mut bytes = 0u64;

        let stop = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break StopReason::Cancelled,
                next = source.recv() => next,
            };

            let frame = match next {
                None => break StopReason::SourceClosed,
                Some(Err(e)) => break StopReason::SourceFailed(e.to_string()),
                Some(Ok(frame)) => frame,
            };

            self.observer.observe(direction, &frame);
            let len = frame.len() as u64;

            let sent = tokio::select! {
                biased;
                sent = sink.send(frame) => sent,
                _ = self.cancel.cancelled() => break StopReason::Cancelled,
            };
            if let Err(e) = sent {
                break StopReason::SinkFailed(e.to_string());
            }

            frames += 1;
            bytes += len;
        };

        self.state.send_if_modified(|state| {
            if *state == PumpState::Running {
                *state = PumpState::Draining;
                true
            } else {
                false
            }
        });
        self.cancel.cancel();

        if let Err(e) = sink.close().await {
            debug!(%direction, error = %e, "Closing destination failed");
        }
        debug!(%direction, frames, bytes, ?stop, "Forwarding loop stopped");

        DirectionReport {
            direction,
            frames,
            bytes,
            stop,
        }
    }
}
