//! Message types shared between the NVRLite workers
//!
//! Every cross-worker conversation happens over typed channels carrying these
//! messages; no mutable state is shared. The supervisor wires one channel per
//! pair, routed by stream id at wiring time rather than through a broker.

use std::path::PathBuf;

use gst_media::{EncodedPacket, StreamInfo};
use tokio::sync::mpsc;

/// Commands accepted by a capture worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureCommand {
    /// Begin (or keep) ingesting the RTSP stream.
    Enable,
    /// Drop the connection and idle.
    Disable,
    /// Terminate the worker thread.
    Shutdown,
}

/// Commands accepted by a recorder worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderCommand {
    Start,
    Stop,
    /// Finalize any open output and terminate the task.
    Shutdown,
}

/// Events flowing from a capture worker to its recorder.
///
/// Delivered over a bounded broadcast channel per stream: FIFO, and on
/// overflow the oldest undelivered event is discarded so the read path never
/// blocks. `Info` always precedes the first `Packet` of an open cycle.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Info(StreamInfo),
    Packet(EncodedPacket),
}

/// Notifications flowing from the workers to the control plane.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    /// The recorder opened its output and flushed the pre-roll.
    RecordingStarted { id: String, file: PathBuf },
    /// Stop was acknowledged; the post-roll (if any) is still being written.
    RecordingStopped { id: String },
    /// The trailer is on disk and the output is closed.
    RecordingFinalized { id: String },
    /// Start was refused or the output could not be allocated.
    RecordingStartFailed { id: String },
    /// Capture connectivity changed.
    StreamOnline { id: String, online: bool },
}

impl ControlEvent {
    pub fn stream_id(&self) -> &str {
        match self {
            ControlEvent::RecordingStarted { id, .. }
            | ControlEvent::RecordingStopped { id }
            | ControlEvent::RecordingFinalized { id }
            | ControlEvent::RecordingStartFailed { id }
            | ControlEvent::StreamOnline { id, .. } => id,
        }
    }
}

/// Sender side of the worker → control-plane notification channel.
pub type ControlEventSender = mpsc::UnboundedSender<ControlEvent>;

/// Capacity of the per-stream capture → recorder event channel. At 30 fps
/// this buffers several seconds of encoded packets before lag sets in.
pub const CAPTURE_EVENT_CAPACITY: usize = 256;

/// Capacity of the per-worker command channels.
pub const COMMAND_CAPACITY: usize = 8;
