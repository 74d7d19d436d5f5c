//! MP4 output pipeline
//!
//! `appsrc ! mp4mux ! filesink` fed with packets the recorder has already
//! rebased. Finalizing pushes EOS and waits for the muxer to write the
//! trailer before the pipeline is torn down; a file is only playable once
//! that has happened.

use std::path::Path;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;

use crate::error::MediaError;
use crate::packet::{RebasedPacket, StreamInfo, TimeBase};

/// How long `finalize` waits for the muxer to flush the trailer.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(5);

/// One open MP4 output accepting a single video stream.
pub struct Mp4Writer {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    bus: gst::Bus,
    finalized: bool,
}

impl Mp4Writer {
    /// Allocate the output for `path` and configure its video stream from the
    /// capture descriptor. The muxer writes its header once data flows; a bad
    /// path or unusable caps surface here.
    pub fn create(path: &Path, info: &StreamInfo) -> Result<Self, MediaError> {
        let pipeline = gst::Pipeline::new();

        let mut caps = gst::Caps::builder(info.codec.caps_name())
            .field("stream-format", info.codec.stream_format())
            .field("alignment", "au")
            .field("width", info.width)
            .field("height", info.height);
        if !info.extradata.is_empty() {
            caps = caps.field("codec_data", gst::Buffer::from_slice(info.extradata.clone()));
        }

        let appsrc = gst::ElementFactory::make("appsrc")
            .build()?
            .dynamic_cast::<AppSrc>()
            .expect("appsrc element is an AppSrc");
        appsrc.set_caps(Some(&caps.build()));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(false);
        appsrc.set_do_timestamp(false);
        appsrc.set_block(true);

        let mux = gst::ElementFactory::make("mp4mux").build()?;
        let sink = gst::ElementFactory::make("filesink")
            .property("location", path.to_string_lossy().as_ref())
            .build()?;

        pipeline.add_many([appsrc.upcast_ref(), &mux, &sink])?;
        appsrc.link(&mux)?;
        mux.link(&sink)?;

        let bus = pipeline.bus().expect("pipeline has a bus");

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(e.into());
        }
        // Catch synchronous failures such as an unwritable location.
        if let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            let _ = pipeline.set_state(gst::State::Null);
            if let gst::MessageView::Error(err) = msg.view() {
                return Err(MediaError::from_bus_error(&err));
            }
        }

        Ok(Self {
            pipeline,
            appsrc,
            bus,
            finalized: false,
        })
    }

    /// Time base the rebased packets must be expressed in.
    pub fn time_base(&self) -> TimeBase {
        TimeBase::NANOSECONDS
    }

    /// Append one rebased packet to the output.
    pub fn write(&mut self, packet: RebasedPacket) -> Result<(), MediaError> {
        let key = packet.key;
        let pts = packet.pts;
        let dts = packet.dts;
        let duration = packet.duration;

        let mut buffer = gst::Buffer::from_slice(packet.data);
        {
            let buffer = buffer.get_mut().expect("freshly created buffer is owned");
            if let Some(pts) = pts {
                buffer.set_pts(clock_time(pts));
            }
            if let Some(dts) = dts {
                buffer.set_dts(clock_time(dts));
            }
            if duration > 0 {
                buffer.set_duration(clock_time(duration));
            }
            if !key {
                buffer.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }

        self.appsrc.push_buffer(buffer)?;
        Ok(())
    }

    /// Push EOS and wait for the trailer to hit the disk, then tear down.
    pub fn finalize(mut self) -> Result<(), MediaError> {
        self.finalized = true;
        self.appsrc.end_of_stream()?;

        let timeout = gst::ClockTime::from_nseconds(FINALIZE_TIMEOUT.as_nanos() as u64);
        let result = loop {
            match self
                .bus
                .timed_pop_filtered(timeout, &[gst::MessageType::Eos, gst::MessageType::Error])
            {
                Some(msg) => match msg.view() {
                    gst::MessageView::Eos(_) => break Ok(()),
                    gst::MessageView::Error(err) => break Err(MediaError::from_bus_error(&err)),
                    _ => continue,
                },
                None => break Err(MediaError::FinalizeTimeout(FINALIZE_TIMEOUT)),
            }
        };

        let _ = self.pipeline.set_state(gst::State::Null);
        result
    }
}

impl Drop for Mp4Writer {
    fn drop(&mut self) {
        // Abandoned without finalize (worker shutdown mid-write): the file is
        // left truncated, which is the best we can do without blocking Drop.
        if !self.finalized {
            let _ = self.appsrc.end_of_stream();
        }
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// mp4mux consumes unsigned running time; the first GOP's decode offsets can
/// rebase below zero and clamp here.
fn clock_time(v: i64) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(v.max(0) as u64)
}
