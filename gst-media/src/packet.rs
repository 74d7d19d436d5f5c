//! Packet and stream descriptor types shared across the capture/record path.

/// Rational time base converting timestamp ticks to seconds.
///
/// GStreamer pipelines deliver timestamps in nanoseconds, so the capture side
/// always reports [`TimeBase::NANOSECONDS`]; keeping the rational around lets
/// the recorder rescale into whatever the output side negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    /// 1 / 1_000_000_000 — the clock GStreamer buffers run on.
    pub const NANOSECONDS: TimeBase = TimeBase {
        num: 1,
        den: 1_000_000_000,
    };

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Convert a tick count in this time base to seconds.
    pub fn ticks_to_secs(&self, ticks: i64) -> f64 {
        ticks as f64 * self.num as f64 / self.den as f64
    }
}

/// Rescale `value` from one time base to another, rounding to nearest with
/// halves away from zero.
pub fn rescale(value: i64, from: TimeBase, to: TimeBase) -> i64 {
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    let half = den / 2;
    let rounded = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    rounded as i64
}

/// Video codec carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
}

impl VideoCodec {
    /// GStreamer caps media type for this codec.
    pub fn caps_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/x-h264",
            VideoCodec::H265 => "video/x-h265",
        }
    }

    /// Packetized stream format the parsers are asked to produce
    /// (length-prefixed NALs with the parameter sets in `codec_data`).
    pub fn stream_format(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "avc",
            VideoCodec::H265 => "hvc1",
        }
    }

    /// RTP depayloader element for this codec.
    pub fn depayloader(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "rtph264depay",
            VideoCodec::H265 => "rtph265depay",
        }
    }

    /// Parser element for this codec.
    pub fn parser(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264parse",
            VideoCodec::H265 => "h265parse",
        }
    }

    pub fn from_caps_name(name: &str) -> Option<Self> {
        match name {
            "video/x-h264" => Some(VideoCodec::H264),
            "video/x-h265" => Some(VideoCodec::H265),
            _ => None,
        }
    }
}

/// Stream descriptor emitted once per successful RTSP open.
///
/// The recorder must have received one of these before it can configure an
/// output; `extradata` carries the codec parameter sets (`codec_data` from
/// the negotiated caps, e.g. an `avcC` box for H.264).
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub id: String,
    pub width: i32,
    pub height: i32,
    pub time_base: TimeBase,
    pub codec: VideoCodec,
    pub extradata: Vec<u8>,
}

/// One encoded video packet in the source stream's time base.
///
/// `pts`/`dts` are `None` when the source did not stamp them; they are never
/// substituted with sentinel numbers.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    pub id: String,
    pub data: Vec<u8>,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub key: bool,
    pub time_base: TimeBase,
}

impl EncodedPacket {
    /// Timestamp used for prebuffer window arithmetic and start-PTS latching.
    pub fn src_ts(&self) -> Option<i64> {
        self.pts.or(self.dts)
    }
}

/// A packet whose timestamps have been re-expressed relative to the recording
/// start and in the output time base. This is the only shape [`crate::Mp4Writer`]
/// accepts.
#[derive(Debug, Clone)]
pub struct RebasedPacket {
    pub data: Vec<u8>,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub key: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_identity() {
        let ns = TimeBase::NANOSECONDS;
        assert_eq!(rescale(123_456_789, ns, ns), 123_456_789);
    }

    #[test]
    fn test_rescale_90khz_to_ns() {
        // One second in a 90 kHz clock is one second in nanoseconds.
        let rtp = TimeBase::new(1, 90_000);
        assert_eq!(rescale(90_000, rtp, TimeBase::NANOSECONDS), 1_000_000_000);
    }

    #[test]
    fn test_rescale_rounds_to_nearest() {
        // 1 ns in a 90 kHz clock is 0.00009 ticks -> rounds to 0;
        // 6 us is 0.54 ticks -> rounds to 1.
        let rtp = TimeBase::new(1, 90_000);
        assert_eq!(rescale(1, TimeBase::NANOSECONDS, rtp), 0);
        assert_eq!(rescale(6_000, TimeBase::NANOSECONDS, rtp), 1);
    }

    #[test]
    fn test_rescale_negative_half_away_from_zero() {
        let rtp = TimeBase::new(1, 90_000);
        assert_eq!(rescale(-90_000, rtp, TimeBase::NANOSECONDS), -1_000_000_000);
        assert_eq!(rescale(-6_000, TimeBase::NANOSECONDS, rtp), -1);
    }

    #[test]
    fn test_src_ts_prefers_pts() {
        let mut pkt = EncodedPacket {
            id: "cam1".into(),
            data: vec![],
            pts: Some(100),
            dts: Some(90),
            duration: 0,
            key: false,
            time_base: TimeBase::NANOSECONDS,
        };
        assert_eq!(pkt.src_ts(), Some(100));
        pkt.pts = None;
        assert_eq!(pkt.src_ts(), Some(90));
        pkt.dts = None;
        assert_eq!(pkt.src_ts(), None);
    }

    #[test]
    fn test_ticks_to_secs() {
        assert_eq!(TimeBase::NANOSECONDS.ticks_to_secs(500_000_000), 0.5);
        assert_eq!(TimeBase::new(1, 90_000).ticks_to_secs(45_000), 0.5);
    }
}
