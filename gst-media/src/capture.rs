//! RTSP capture pipeline
//!
//! Builds `rtspsrc ! depay ! parse ! appsink` per stream and hands out the
//! parsed packets synchronously. The depayloader/parser pair is chosen when
//! `rtspsrc` exposes its pad, because the codec is only known after the RTSP
//! DESCRIBE exchange. Audio and metadata streams are refused up front via the
//! `select-stream` signal so the source never allocates transport for them.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;

use crate::error::MediaError;
use crate::packet::{EncodedPacket, StreamInfo, TimeBase, VideoCodec};

/// Options applied to the RTSP source.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Jitter-buffer latency budget in milliseconds.
    pub latency_ms: u32,
    /// TCP socket timeout; a dead connection is reported after this long.
    pub socket_timeout: Duration,
    /// How long `open` waits for the first parsed sample before giving up.
    pub open_timeout: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            latency_ms: 200,
            socket_timeout: Duration::from_secs(5),
            open_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one [`CapturePipeline::read`] call.
#[derive(Debug)]
pub enum ReadOutcome {
    Packet(EncodedPacket),
    /// Nothing arrived within the timeout; the connection may still be fine.
    Timeout,
    Eos,
}

/// One open RTSP connection delivering parsed encoded video packets.
///
/// Owned exclusively by its capture worker; never shared across threads.
pub struct CapturePipeline {
    pipeline: gst::Pipeline,
    appsink: AppSink,
    bus: gst::Bus,
    info: StreamInfo,
    /// Sample pulled while waiting for caps during open; returned by the
    /// first `read` so nothing is lost.
    pending: VecDeque<EncodedPacket>,
    id: String,
}

impl CapturePipeline {
    /// Connect to `url` and block until the first parsed video sample is
    /// available, so the stream descriptor is complete before any packet is
    /// handed out.
    pub fn open(id: &str, url: &str, opts: &CaptureOptions) -> Result<Self, MediaError> {
        let pipeline = gst::Pipeline::new();

        let src = gst::ElementFactory::make("rtspsrc")
            .property("location", url)
            .property("latency", opts.latency_ms)
            .property("tcp-timeout", opts.socket_timeout.as_micros() as u64)
            .property_from_str("protocols", "tcp")
            .build()?;

        let appsink = gst::ElementFactory::make("appsink")
            .build()?
            .dynamic_cast::<AppSink>()
            .expect("appsink element is an AppSink");

        appsink.set_sync(false);
        appsink.set_max_buffers(64);
        appsink.set_drop(false);
        appsink.set_caps(Some(&packetized_video_caps()));

        pipeline.add_many([&src, appsink.upcast_ref()])?;

        // Refuse non-video streams before transport is set up.
        src.connect("select-stream", false, |args| {
            let caps = args[2].get::<gst::Caps>().ok()?;
            let media = caps
                .structure(0)
                .and_then(|s| s.get::<&str>("media").ok());
            Some((media == Some("video")).to_value())
        });

        // The codec is known only once rtspsrc exposes its pad; build the
        // depay/parse tail for whatever it negotiated.
        let pipeline_weak = pipeline.downgrade();
        let appsink_clone = appsink.clone();
        src.connect_pad_added(move |_src, src_pad| {
            let Some(pipeline) = pipeline_weak.upgrade() else {
                return;
            };
            link_video_pad(&pipeline, src_pad, &appsink_clone);
        });

        let bus = pipeline.bus().expect("pipeline has a bus");

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(e.into());
        }

        // Wait for the first sample; its caps carry the stream descriptor.
        let deadline = Instant::now() + opts.open_timeout;
        let first = loop {
            if let Some(err) = poll_bus_error(&bus) {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(err);
            }
            match appsink.try_pull_sample(gst::ClockTime::from_mseconds(100)) {
                Some(sample) => break sample,
                None if appsink.is_eos() => {
                    let _ = pipeline.set_state(gst::State::Null);
                    return Err(MediaError::OpenEos);
                }
                None => {
                    if Instant::now() >= deadline {
                        let _ = pipeline.set_state(gst::State::Null);
                        return Err(MediaError::OpenTimeout(opts.open_timeout));
                    }
                }
            }
        };

        let info = match info_from_sample(id, &first) {
            Ok(info) => info,
            Err(e) => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(e);
            }
        };

        let mut pending = VecDeque::new();
        match packet_from_sample(id, &first) {
            Ok(pkt) => pending.push_back(pkt),
            Err(e) => tracing::warn!(stream_id = %id, error = %e, "dropping unreadable first sample"),
        }

        Ok(Self {
            pipeline,
            appsink,
            bus,
            info,
            pending,
            id: id.to_string(),
        })
    }

    /// Stream descriptor negotiated during open.
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Pull the next video packet, waiting at most `timeout`.
    pub fn read(&mut self, timeout: Duration) -> Result<ReadOutcome, MediaError> {
        if let Some(pkt) = self.pending.pop_front() {
            return Ok(ReadOutcome::Packet(pkt));
        }

        if let Some(err) = poll_bus_error(&self.bus) {
            return Err(err);
        }

        let clock_timeout = gst::ClockTime::from_nseconds(timeout.as_nanos() as u64);
        match self.appsink.try_pull_sample(clock_timeout) {
            Some(sample) => Ok(ReadOutcome::Packet(packet_from_sample(&self.id, &sample)?)),
            None if self.appsink.is_eos() => Ok(ReadOutcome::Eos),
            None => {
                if let Some(err) = poll_bus_error(&self.bus) {
                    return Err(err);
                }
                Ok(ReadOutcome::Timeout)
            }
        }
    }

    /// Tear the connection down.
    pub fn close(self) {
        // Drop does the work.
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Caps accepted at the appsink: packetized AUs for either codec, parameter
/// sets out-of-band so they land in `codec_data`.
fn packetized_video_caps() -> gst::Caps {
    gst::Caps::builder_full()
        .structure(
            gst::Structure::builder("video/x-h264")
                .field("stream-format", "avc")
                .field("alignment", "au")
                .build(),
        )
        .structure(
            gst::Structure::builder("video/x-h265")
                .field("stream-format", "hvc1")
                .field("alignment", "au")
                .build(),
        )
        .build()
}

/// Hook the depayloader/parser tail for a freshly exposed rtspsrc video pad.
fn link_video_pad(pipeline: &gst::Pipeline, src_pad: &gst::Pad, appsink: &AppSink) {
    let caps = src_pad
        .current_caps()
        .unwrap_or_else(|| src_pad.query_caps(None));
    let Some(s) = caps.structure(0) else {
        return;
    };
    if !matches!(s.get::<&str>("media"), Ok("video")) {
        return;
    }

    let codec = match s.get::<&str>("encoding-name") {
        Ok("H264") => VideoCodec::H264,
        Ok("H265") => VideoCodec::H265,
        other => {
            tracing::warn!(encoding = ?other, "ignoring unsupported video encoding");
            return;
        }
    };

    let sink_pad = appsink
        .static_pad("sink")
        .expect("appsink has a sink pad");
    if sink_pad.is_linked() {
        return;
    }

    let elements = (|| -> Result<(gst::Element, gst::Element), MediaError> {
        let depay = gst::ElementFactory::make(codec.depayloader()).build()?;
        let parse = gst::ElementFactory::make(codec.parser()).build()?;
        pipeline.add_many([&depay, &parse])?;
        depay.link(&parse)?;
        parse.link(appsink.upcast_ref::<gst::Element>())?;
        depay.sync_state_with_parent()?;
        parse.sync_state_with_parent()?;
        Ok((depay, parse))
    })();

    let (depay, _parse) = match elements {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, "failed to build depay/parse tail");
            return;
        }
    };

    let depay_sink = depay.static_pad("sink").expect("depayloader has a sink pad");
    if let Err(e) = src_pad.link(&depay_sink) {
        tracing::warn!(error = ?e, "failed to link rtspsrc pad");
    }
}

/// Non-blocking check for a fatal bus message.
fn poll_bus_error(bus: &gst::Bus) -> Option<MediaError> {
    while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
        if let gst::MessageView::Error(err) = msg.view() {
            return Some(MediaError::from_bus_error(&err));
        }
    }
    None
}

/// Build the stream descriptor from the first sample's caps.
fn info_from_sample(id: &str, sample: &gst::Sample) -> Result<StreamInfo, MediaError> {
    let caps = sample
        .caps()
        .ok_or(MediaError::MissingCapsField("caps"))?;
    let s = caps
        .structure(0)
        .ok_or(MediaError::MissingCapsField("structure"))?;

    let codec = VideoCodec::from_caps_name(s.name().as_str())
        .ok_or_else(|| MediaError::UnsupportedCaps(s.name().to_string()))?;
    let width = s
        .get::<i32>("width")
        .map_err(|_| MediaError::MissingCapsField("width"))?;
    let height = s
        .get::<i32>("height")
        .map_err(|_| MediaError::MissingCapsField("height"))?;

    let extradata = match s.get::<gst::Buffer>("codec_data") {
        Ok(buf) => buf
            .map_readable()
            .map(|m| m.as_slice().to_vec())
            .unwrap_or_default(),
        Err(_) => {
            tracing::warn!(stream_id = %id, "negotiated caps carry no codec_data");
            Vec::new()
        }
    };

    Ok(StreamInfo {
        id: id.to_string(),
        width,
        height,
        time_base: TimeBase::NANOSECONDS,
        codec,
        extradata,
    })
}

/// Convert a pulled sample into an [`EncodedPacket`].
fn packet_from_sample(id: &str, sample: &gst::Sample) -> Result<EncodedPacket, MediaError> {
    let buffer = sample
        .buffer()
        .ok_or(MediaError::MissingCapsField("buffer"))?;
    let map = buffer.map_readable()?;

    Ok(EncodedPacket {
        id: id.to_string(),
        data: map.as_slice().to_vec(),
        pts: buffer.pts().map(|t| t.nseconds() as i64),
        dts: buffer.dts().map(|t| t.nseconds() as i64),
        duration: buffer.duration().map(|t| t.nseconds() as i64).unwrap_or(0),
        key: !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT),
        time_base: TimeBase::NANOSECONDS,
    })
}
