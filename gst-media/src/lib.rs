//! GStreamer ↔ Rust media adapters for NVRLite
//!
//! Provides the two capability sets the recorder pipeline is built on:
//!
//! - **Input**: an RTSP capture pipeline (`rtspsrc` → depayloader → parser →
//!   `appsink`) delivering encoded H.264/H.265 packets with their timestamps,
//!   plus the negotiated stream descriptor (size, codec, extradata).
//! - **Output**: an MP4 writer pipeline (`appsrc` → `mp4mux` → `filesink`)
//!   accepting packets that have already been rebased to the recording start.
//!
//! All timestamps cross these adapters in nanoseconds; [`TimeBase`] and
//! [`rescale`] cover the conversion arithmetic the recorder needs.

pub mod capture;
pub mod error;
pub mod packet;
pub mod writer;

pub use capture::{CaptureOptions, CapturePipeline, ReadOutcome};
pub use error::MediaError;
pub use packet::{rescale, EncodedPacket, RebasedPacket, StreamInfo, TimeBase, VideoCodec};
pub use writer::Mp4Writer;
