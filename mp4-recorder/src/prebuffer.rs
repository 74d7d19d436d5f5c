//! Rolling pre-roll packet buffer
//!
//! Keeps the most recent encoded packets while nothing is being written, so a
//! started recording can begin slightly in the past. The window is pruned by
//! source timestamps, not by packet count.

use std::collections::VecDeque;

use gst_media::EncodedPacket;

pub struct Prebuffer {
    packets: VecDeque<EncodedPacket>,
    horizon_secs: f64,
}

impl Prebuffer {
    pub fn new(horizon_secs: f32) -> Self {
        Self {
            packets: VecDeque::new(),
            horizon_secs: horizon_secs as f64,
        }
    }

    /// Append a packet and prune everything older than the horizon, measured
    /// from the newest timestamped packet.
    ///
    /// Untimestamped packets are kept while they are the newest data and are
    /// pruned together with the window once newer timestamped packets exist.
    pub fn push(&mut self, packet: EncodedPacket) {
        self.packets.push_back(packet);
        self.prune();
    }

    fn prune(&mut self) {
        let Some(last) = self.packets.back() else {
            return;
        };
        let Some(last_ts) = last.src_ts() else {
            // No newer timestamped packet to measure against.
            return;
        };
        let last_sec = last.time_base.ticks_to_secs(last_ts);

        while let Some(front) = self.packets.front() {
            match front.src_ts() {
                None => {
                    self.packets.pop_front();
                }
                Some(ts) => {
                    let first_sec = front.time_base.ticks_to_secs(ts);
                    if last_sec - first_sec > self.horizon_secs {
                        self.packets.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
    }

    /// Drop leading delta frames so the drained backlog starts decodable.
    pub fn trim_to_keyframe(&mut self) {
        while self.packets.front().is_some_and(|p| !p.key) {
            self.packets.pop_front();
        }
    }

    /// Take the whole backlog in arrival order, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<EncodedPacket> {
        std::mem::take(&mut self.packets).into()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gst_media::TimeBase;

    fn pkt(pts_ms: Option<i64>, key: bool) -> EncodedPacket {
        EncodedPacket {
            id: "cam1".into(),
            data: vec![0u8; 4],
            pts: pts_ms.map(|ms| ms * 1_000_000),
            dts: None,
            duration: 0,
            key,
            time_base: TimeBase::NANOSECONDS,
        }
    }

    #[test]
    fn test_prunes_beyond_horizon() {
        let mut buf = Prebuffer::new(1.0);
        for ms in (0..3000).step_by(100) {
            buf.push(pkt(Some(ms), ms % 1000 == 0));
        }
        // Only the trailing second (plus the boundary packet) survives.
        assert!(buf.len() <= 11);
        let drained = buf.drain();
        let first = drained.first().unwrap().pts.unwrap();
        let last = drained.last().unwrap().pts.unwrap();
        assert!(last - first <= 1_000_000_000);
    }

    #[test]
    fn test_keeps_everything_within_horizon() {
        let mut buf = Prebuffer::new(5.0);
        for ms in (0..1000).step_by(100) {
            buf.push(pkt(Some(ms), false));
        }
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_untimestamped_retained_until_newer_timestamped() {
        let mut buf = Prebuffer::new(1.0);
        buf.push(pkt(None, true));
        buf.push(pkt(None, false));
        assert_eq!(buf.len(), 2, "nothing to measure the window against yet");

        // A timestamped packet arrives; the untimestamped leaders go with
        // the window.
        buf.push(pkt(Some(5000), true));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_trim_to_keyframe() {
        let mut buf = Prebuffer::new(10.0);
        buf.push(pkt(Some(0), false));
        buf.push(pkt(Some(100), false));
        buf.push(pkt(Some(200), true));
        buf.push(pkt(Some(300), false));

        buf.trim_to_keyframe();
        let drained = buf.drain();
        assert_eq!(drained.len(), 2);
        assert!(drained[0].key);
        assert_eq!(drained[0].pts, Some(200 * 1_000_000));
    }

    #[test]
    fn test_trim_on_empty_and_all_delta() {
        let mut buf = Prebuffer::new(10.0);
        buf.trim_to_keyframe();
        assert!(buf.is_empty());

        buf.push(pkt(Some(0), false));
        buf.push(pkt(Some(100), false));
        buf.trim_to_keyframe();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_clears() {
        let mut buf = Prebuffer::new(10.0);
        buf.push(pkt(Some(0), true));
        assert_eq!(buf.drain().len(), 1);
        assert!(buf.is_empty());
    }
}
