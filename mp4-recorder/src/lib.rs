//! Pre-roll MP4 recorder for NVRLite
//!
//! One [`RecorderWorker`] per stream consumes the capture event channel,
//! keeps a rolling [`prebuffer`](crate::prebuffer::Prebuffer) of recent
//! packets, and on command muxes pre-roll + live packets + post-roll into a
//! timestamped MP4 via the `gst-media` writer.

mod prebuffer;
mod worker;

pub use prebuffer::Prebuffer;
pub use worker::{RecorderSettings, RecorderWorker};
