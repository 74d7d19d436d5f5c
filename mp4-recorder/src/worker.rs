//! Per-stream MP4 recorder worker
//!
//! Runs an event loop over three message kinds (stream info, packets,
//! commands) plus the post-roll timer. The prebuffer is maintained on every
//! packet; starting a recording flushes it into a fresh MP4 and packets keep
//! flowing into the file until a stop (plus post-roll) finalizes it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use gst_media::{rescale, EncodedPacket, Mp4Writer, RebasedPacket, StreamInfo, TimeBase};
use nvr_common::{CaptureEvent, ControlEvent, ControlEventSender, RecorderCommand};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::prebuffer::Prebuffer;

/// Recorder tunables, one set per stream.
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    /// Folder the MP4 files land in; must exist.
    pub folder: PathBuf,
    /// Pre-roll window in seconds.
    pub pre_seconds: f32,
    /// Extra seconds written after a stop request.
    pub post_seconds: f32,
    /// Drop leading delta frames from the pre-roll so output starts on a
    /// keyframe.
    pub trim_to_keyframe: bool,
}

pub struct RecorderWorker {
    id: String,
    settings: RecorderSettings,
    events: broadcast::Receiver<CaptureEvent>,
    commands: mpsc::Receiver<RecorderCommand>,
    notify: ControlEventSender,
    info: Option<StreamInfo>,
    prebuffer: Prebuffer,
    writer: Option<Mp4Writer>,
    /// Source timestamp of the first written packet; all output timestamps
    /// are relative to it.
    rec_start_ts: Option<i64>,
    events_closed: bool,
}

impl RecorderWorker {
    pub fn new(
        id: String,
        settings: RecorderSettings,
        events: broadcast::Receiver<CaptureEvent>,
        commands: mpsc::Receiver<RecorderCommand>,
        notify: ControlEventSender,
    ) -> Self {
        let prebuffer = Prebuffer::new(settings.pre_seconds);
        Self {
            id,
            settings,
            events,
            commands,
            notify,
            info: None,
            prebuffer,
            writer: None,
            rec_start_ts: None,
            events_closed: false,
        }
    }

    /// Event loop; returns once shut down, with any open output finalized.
    pub async fn run(mut self) {
        debug!(stream_id = %self.id, "recorder worker started");

        // Armed while a stop waits out its post-roll.
        let mut stop_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(RecorderCommand::Start) => self.start_recording(),
                    Some(RecorderCommand::Stop) => self.stop_recording(&mut stop_deadline),
                    Some(RecorderCommand::Shutdown) | None => break,
                },
                ev = self.events.recv(), if !self.events_closed => match ev {
                    Ok(CaptureEvent::Info(info)) => self.on_info(info),
                    Ok(CaptureEvent::Packet(pkt)) => self.on_packet(pkt),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(stream_id = %self.id, dropped = n, "packet channel overflowed, oldest packets dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => self.events_closed = true,
                },
                _ = tokio::time::sleep_until(stop_deadline.unwrap_or_else(Instant::now)), if stop_deadline.is_some() => {
                    self.finalize(&mut stop_deadline);
                }
            }
        }

        self.finalize(&mut stop_deadline);
        debug!(stream_id = %self.id, "recorder worker finished");
    }

    fn on_info(&mut self, info: StreamInfo) {
        if self.writer.is_some() {
            debug!(stream_id = %self.id, "stream info update ignored while recording");
            return;
        }
        // A new open cycle restarts the source clock; timestamps buffered
        // from the previous cycle are not comparable with what follows.
        if !self.prebuffer.is_empty() {
            debug!(stream_id = %self.id, dropped = self.prebuffer.len(), "pre-roll from previous connection discarded");
            self.prebuffer.clear();
        }
        info!(stream_id = %self.id, width = info.width, height = info.height, "stream info ready");
        self.info = Some(info);
    }

    fn on_packet(&mut self, packet: EncodedPacket) {
        if self.writer.is_some() {
            self.write_packet(&packet);
        }
        self.prebuffer.push(packet);
    }

    /// Open the output, flush the pre-roll, announce the file. Idempotent:
    /// a Start while already recording is a no-op.
    fn start_recording(&mut self) {
        if self.writer.is_some() {
            info!(stream_id = %self.id, "already recording");
            return;
        }
        let Some(info) = self.info.as_ref() else {
            warn!(stream_id = %self.id, "start refused: stream info not ready");
            self.notify_start_failed();
            return;
        };

        let file = record_file_path(&self.settings.folder, &self.id, Local::now());
        let writer = match Mp4Writer::create(&file, info) {
            Ok(writer) => writer,
            Err(e) => {
                error!(stream_id = %self.id, file = %file.display(), error = %e, "failed to open recording output");
                self.notify_start_failed();
                return;
            }
        };

        self.rec_start_ts = None;
        self.writer = Some(writer);

        if self.settings.trim_to_keyframe {
            self.prebuffer.trim_to_keyframe();
        }
        let backlog = self.prebuffer.drain();
        for packet in &backlog {
            self.write_packet(packet);
        }

        info!(stream_id = %self.id, file = %file.display(), preroll_packets = backlog.len(), "recording started");
        let _ = self.notify.send(ControlEvent::RecordingStarted {
            id: self.id.clone(),
            file,
        });
    }

    /// Acknowledge a stop and arm the post-roll timer (or finalize right
    /// away). Idempotent: ignored when not recording or already pending.
    fn stop_recording(&mut self, stop_deadline: &mut Option<Instant>) {
        if self.writer.is_none() {
            debug!(stream_id = %self.id, "stop ignored, not recording");
            return;
        }
        if stop_deadline.is_some() {
            debug!(stream_id = %self.id, "stop already pending");
            return;
        }

        let _ = self.notify.send(ControlEvent::RecordingStopped {
            id: self.id.clone(),
        });

        if self.settings.post_seconds <= 0.0 {
            self.finalize(stop_deadline);
        } else {
            info!(stream_id = %self.id, post_seconds = self.settings.post_seconds, "stop acknowledged, post-roll armed");
            *stop_deadline =
                Some(Instant::now() + Duration::from_secs_f32(self.settings.post_seconds));
        }
    }

    /// Write the trailer and release the output. Safe to call when idle.
    fn finalize(&mut self, stop_deadline: &mut Option<Instant>) {
        *stop_deadline = None;
        self.rec_start_ts = None;

        let Some(writer) = self.writer.take() else {
            return;
        };
        match writer.finalize() {
            Ok(()) => info!(stream_id = %self.id, "recording finalized"),
            Err(e) => error!(stream_id = %self.id, error = %e, "failed to finalize recording"),
        }
        let _ = self.notify.send(ControlEvent::RecordingFinalized {
            id: self.id.clone(),
        });
    }

    fn write_packet(&mut self, packet: &EncodedPacket) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if self.rec_start_ts.is_none() {
            self.rec_start_ts = packet.src_ts();
        }
        let rebased = rebase(packet, self.rec_start_ts, writer.time_base());
        // Per-packet write failures do not abort the recording.
        if let Err(e) = writer.write(rebased) {
            warn!(stream_id = %self.id, error = %e, "error writing packet");
        }
    }

    fn notify_start_failed(&self) {
        let _ = self.notify.send(ControlEvent::RecordingStartFailed {
            id: self.id.clone(),
        });
    }
}

/// Re-express a packet's timestamps relative to the recording start, in the
/// output time base. Packets before the start latch (or without timestamps)
/// keep `None`.
fn rebase(packet: &EncodedPacket, rec_start_ts: Option<i64>, out_tb: TimeBase) -> RebasedPacket {
    let pts = match (packet.pts, rec_start_ts) {
        (Some(pts), Some(start)) => Some(rescale(pts - start, packet.time_base, out_tb)),
        _ => None,
    };
    let dts = match (packet.dts, rec_start_ts) {
        (Some(dts), Some(start)) => Some(rescale(dts - start, packet.time_base, out_tb)),
        _ => None,
    };
    let duration = if packet.duration > 0 {
        rescale(packet.duration, packet.time_base, out_tb)
    } else {
        0
    };

    RebasedPacket {
        data: packet.data.clone(),
        pts,
        dts,
        duration,
        key: packet.key,
    }
}

/// `rec_<streamId>_<YYYY-MM-DD_HH-MM-SS>.mp4` in the recordings folder,
/// local time.
fn record_file_path(folder: &Path, stream_id: &str, now: DateTime<Local>) -> PathBuf {
    folder.join(format!(
        "rec_{}_{}.mp4",
        stream_id,
        now.format("%Y-%m-%d_%H-%M-%S")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nvr_common::CAPTURE_EVENT_CAPACITY;
    use tokio::time::timeout;

    fn settings() -> RecorderSettings {
        RecorderSettings {
            folder: PathBuf::from("/tmp"),
            pre_seconds: 1.0,
            post_seconds: 0.5,
            trim_to_keyframe: true,
        }
    }

    fn spawn_worker() -> (
        mpsc::Sender<RecorderCommand>,
        broadcast::Sender<CaptureEvent>,
        mpsc::UnboundedReceiver<ControlEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = broadcast::channel(CAPTURE_EVENT_CAPACITY);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let worker = RecorderWorker::new("cam1".into(), settings(), event_rx, cmd_rx, notify_tx);
        let handle = tokio::spawn(worker.run());
        (cmd_tx, event_tx, notify_rx, handle)
    }

    #[tokio::test]
    async fn test_start_without_info_is_refused() {
        let (cmd, _events, mut notify, handle) = spawn_worker();

        cmd.send(RecorderCommand::Start).await.unwrap();
        let ev = timeout(Duration::from_secs(1), notify.recv())
            .await
            .expect("notification expected")
            .unwrap();
        assert!(matches!(ev, ControlEvent::RecordingStartFailed { .. }));

        cmd.send(RecorderCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_silent() {
        let (cmd, _events, mut notify, handle) = spawn_worker();

        cmd.send(RecorderCommand::Stop).await.unwrap();
        cmd.send(RecorderCommand::Shutdown).await.unwrap();
        handle.await.unwrap();

        assert!(notify.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_on_closed_command_channel() {
        let (cmd, _events, _notify, handle) = spawn_worker();
        drop(cmd);
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker exits when commands close")
            .unwrap();
    }

    #[test]
    fn test_new_stream_info_discards_stale_preroll() {
        let (_cmd_tx, cmd_rx) = mpsc::channel(8);
        let (_event_tx, event_rx) = broadcast::channel(CAPTURE_EVENT_CAPACITY);
        let (notify_tx, _notify_rx) = mpsc::unbounded_channel();
        let mut worker =
            RecorderWorker::new("cam1".into(), settings(), event_rx, cmd_rx, notify_tx);

        worker.on_packet(EncodedPacket {
            id: "cam1".into(),
            data: vec![0u8; 8],
            pts: Some(7_000_000_000),
            dts: None,
            duration: 0,
            key: true,
            time_base: TimeBase::NANOSECONDS,
        });
        assert_eq!(worker.prebuffer.len(), 1);

        // Reconnect: a fresh descriptor arrives with a restarted clock.
        worker.on_info(gst_media::StreamInfo {
            id: "cam1".into(),
            width: 1280,
            height: 720,
            time_base: TimeBase::NANOSECONDS,
            codec: gst_media::VideoCodec::H264,
            extradata: vec![1, 2, 3],
        });
        assert!(worker.prebuffer.is_empty());
        assert!(worker.info.is_some());
    }

    #[test]
    fn test_rebase_latches_offsets() {
        let pkt = EncodedPacket {
            id: "cam1".into(),
            data: vec![1, 2, 3],
            pts: Some(2_000),
            dts: Some(1_500),
            duration: 40,
            key: true,
            time_base: TimeBase::NANOSECONDS,
        };
        let out = rebase(&pkt, Some(1_000), TimeBase::NANOSECONDS);
        assert_eq!(out.pts, Some(1_000));
        assert_eq!(out.dts, Some(500));
        assert_eq!(out.duration, 40);
        assert!(out.key);
    }

    #[test]
    fn test_rebase_without_latch_keeps_none() {
        let pkt = EncodedPacket {
            id: "cam1".into(),
            data: vec![],
            pts: None,
            dts: None,
            duration: 0,
            key: false,
            time_base: TimeBase::NANOSECONDS,
        };
        let out = rebase(&pkt, None, TimeBase::NANOSECONDS);
        assert_eq!(out.pts, None);
        assert_eq!(out.dts, None);
        assert_eq!(out.duration, 0);
    }

    #[test]
    fn test_rebase_converts_time_base() {
        // 90 kHz source into nanosecond output.
        let pkt = EncodedPacket {
            id: "cam1".into(),
            data: vec![],
            pts: Some(180_000),
            dts: Some(90_000),
            duration: 3_000,
            key: false,
            time_base: TimeBase::new(1, 90_000),
        };
        let out = rebase(&pkt, Some(90_000), TimeBase::NANOSECONDS);
        assert_eq!(out.pts, Some(1_000_000_000));
        assert_eq!(out.dts, Some(0));
        assert_eq!(out.duration, 33_333_333);
    }

    #[test]
    fn test_record_file_path_format() {
        let when = Local.with_ymd_and_hms(2025, 11, 29, 12, 58, 3).unwrap();
        let path = record_file_path(Path::new("/var/rec"), "cam1", when);
        assert_eq!(
            path,
            PathBuf::from("/var/rec/rec_cam1_2025-11-29_12-58-03.mp4")
        );
    }
}
