//! Error types for the media adapters

use std::time::Duration;
use gstreamer::prelude::GstObjectExt;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("GStreamer error: {0}")]
    Glib(#[from] gstreamer::glib::BoolError),

    #[error("pipeline refused state change: {0}")]
    StateChange(#[from] gstreamer::StateChangeError),

    #[error("pipeline error from {src}: {message}")]
    Pipeline { src: String, message: String },

    #[error("source did not produce a sample within {0:?}")]
    OpenTimeout(Duration),

    #[error("end of stream during open")]
    OpenEos,

    #[error("unsupported stream caps: {0}")]
    UnsupportedCaps(String),

    #[error("stream caps missing field `{0}`")]
    MissingCapsField(&'static str),

    #[error("buffer push rejected: {0:?}")]
    Flow(gstreamer::FlowError),

    #[error("muxer did not reach end of stream within {0:?}")]
    FinalizeTimeout(Duration),
}

impl From<gstreamer::FlowError> for MediaError {
    fn from(e: gstreamer::FlowError) -> Self {
        MediaError::Flow(e)
    }
}

impl MediaError {
    /// Build a [`MediaError::Pipeline`] from a bus error message.
    pub(crate) fn from_bus_error(msg: &gstreamer::message::Error) -> Self {
        MediaError::Pipeline {
            src: msg
                .src()
                .map(|s| s.path_string().to_string())
                .unwrap_or_else(|| "unknown".into()),
            message: msg.error().to_string(),
        }
    }
}
