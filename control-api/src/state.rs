//! Observed per-stream control state
//!
//! The only mutable state shared between HTTP handlers and the notification
//! pump, guarded by a single reader-writer lock: read-lock for snapshots and
//! pre-checks, write-lock for mutations. Notification handling never holds
//! the lock across a channel send — `apply` only reports that a Stop must be
//! re-issued and the pump sends it after the lock is released.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use nvr_common::{CaptureCommand, ControlEvent, RecorderCommand};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Snapshot of one stream as the control plane sees it.
#[derive(Debug, Default, Clone)]
pub struct StreamControl {
    pub streaming: bool,
    pub recording: bool,
    /// A start was issued and `recordingStarted` has not arrived yet.
    pub recording_pending: bool,
    /// A stop arrived while the start was still pending; re-issued once the
    /// start confirms.
    pub stop_pending: bool,
    /// File of the current/most recent recording. Cleared when a new start
    /// is issued, preserved across stop so `/record/stop` can return it.
    pub last_file: Option<PathBuf>,
}

/// Command channels for one stream's pair of workers.
pub struct StreamHandles {
    pub capture: mpsc::Sender<CaptureCommand>,
    pub recorder: mpsc::Sender<RecorderCommand>,
}

/// Outcome of the `/record/start` pre-check.
pub enum StartGate {
    AlreadyRecording(Option<PathBuf>),
    AlreadyPending,
    Proceed,
}

/// Outcome of the `/record/stop` pre-check.
pub enum StopGate {
    NotRecording(Option<PathBuf>),
    Proceed,
}

pub struct ControlState {
    pub recordings_dir: PathBuf,
    handles: HashMap<String, StreamHandles>,
    streams: RwLock<HashMap<String, StreamControl>>,
}

impl ControlState {
    /// Register the configured streams; ids not present here are unknown to
    /// every endpoint.
    pub fn new(recordings_dir: PathBuf, handles: HashMap<String, StreamHandles>) -> Self {
        let streams = handles
            .keys()
            .map(|id| (id.clone(), StreamControl::default()))
            .collect();
        Self {
            recordings_dir,
            handles,
            streams: RwLock::new(streams),
        }
    }

    pub fn handles(&self, id: &str) -> Option<&StreamHandles> {
        self.handles.get(id)
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    pub async fn snapshot(&self, id: &str) -> Option<StreamControl> {
        self.streams.read().await.get(id).cloned()
    }

    /// All streams, sorted by id for stable output.
    pub async fn snapshot_all(&self) -> Vec<(String, StreamControl)> {
        let streams = self.streams.read().await;
        let mut all: Vec<_> = streams
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub async fn last_file(&self, id: &str) -> Option<PathBuf> {
        self.streams
            .read()
            .await
            .get(id)
            .and_then(|s| s.last_file.clone())
    }

    /// `/record/start` step 1: decide under the write lock and mark pending.
    pub async fn begin_record_start(&self, id: &str) -> StartGate {
        let mut streams = self.streams.write().await;
        let entry = streams.entry(id.to_string()).or_default();
        if entry.recording {
            return StartGate::AlreadyRecording(entry.last_file.clone());
        }
        if entry.recording_pending {
            return StartGate::AlreadyPending;
        }
        entry.recording_pending = true;
        entry.stop_pending = false;
        entry.last_file = None;
        StartGate::Proceed
    }

    /// `/record/stop` steps 1–3: pre-check, and flag `stop_pending` when the
    /// start has not confirmed yet.
    pub async fn begin_record_stop(&self, id: &str) -> StopGate {
        let (was_recording, was_pending, last_file) = {
            let streams = self.streams.read().await;
            match streams.get(id) {
                Some(s) => (s.recording, s.recording_pending, s.last_file.clone()),
                None => (false, false, None),
            }
        };

        if !was_recording && !was_pending {
            return StopGate::NotRecording(last_file);
        }
        if was_pending && !was_recording {
            let mut streams = self.streams.write().await;
            if let Some(entry) = streams.get_mut(id) {
                entry.stop_pending = true;
            }
        }
        StopGate::Proceed
    }

    /// Fold one worker notification into the observed state. Returns the
    /// stream id when a deferred Stop must be re-sent to the recorder.
    pub async fn apply(&self, event: &ControlEvent) -> Option<String> {
        let mut streams = self.streams.write().await;
        let entry = streams.entry(event.stream_id().to_string()).or_default();

        match event {
            ControlEvent::RecordingStarted { id, file } => {
                debug!(stream_id = %id, file = %file.display(), "recording started");
                entry.last_file = Some(file.clone());
                entry.recording = true;
                entry.recording_pending = false;
                if entry.stop_pending {
                    // A stop raced the pending start; chase the confirmed
                    // start with the stop it was waiting for.
                    entry.stop_pending = false;
                    return Some(id.clone());
                }
            }
            ControlEvent::RecordingStopped { id } => {
                debug!(stream_id = %id, "recording stopped");
                entry.recording = false;
                entry.recording_pending = false;
                entry.stop_pending = false;
            }
            ControlEvent::RecordingFinalized { id } => {
                debug!(stream_id = %id, "recording finalized");
                entry.recording = false;
                entry.recording_pending = false;
                entry.stop_pending = false;
            }
            ControlEvent::RecordingStartFailed { id } => {
                warn!(stream_id = %id, "recording start failed");
                entry.recording_pending = false;
                entry.stop_pending = false;
            }
            ControlEvent::StreamOnline { id, online } => {
                debug!(stream_id = %id, online, "stream online changed");
                entry.streaming = *online;
            }
        }
        None
    }
}

/// Pump worker notifications into the control state for the lifetime of the
/// channel.
pub async fn run_notifications(
    state: Arc<ControlState>,
    mut events: mpsc::UnboundedReceiver<ControlEvent>,
) {
    while let Some(event) = events.recv().await {
        if let Some(id) = state.apply(&event).await {
            if let Some(handles) = state.handles(&id) {
                let _ = handles.recorder.send(RecorderCommand::Stop).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_for(ids: &[&str]) -> ControlState {
        let handles = ids
            .iter()
            .map(|id| {
                let (capture, _) = mpsc::channel(8);
                let (recorder, _) = mpsc::channel(8);
                (id.to_string(), StreamHandles { capture, recorder })
            })
            .collect();
        ControlState::new(PathBuf::from("/tmp"), handles)
    }

    #[tokio::test]
    async fn test_registered_streams_are_known_with_defaults() {
        let state = state_for(&["cam1", "cam2"]);
        assert!(state.is_known("cam1"));
        assert!(!state.is_known("nope"));

        let snap = state.snapshot("cam1").await.unwrap();
        assert!(!snap.streaming && !snap.recording && snap.last_file.is_none());
        assert!(state.snapshot("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_start_gate_transitions() {
        let state = state_for(&["cam1"]);

        assert!(matches!(
            state.begin_record_start("cam1").await,
            StartGate::Proceed
        ));
        assert!(matches!(
            state.begin_record_start("cam1").await,
            StartGate::AlreadyPending
        ));

        state
            .apply(&ControlEvent::RecordingStarted {
                id: "cam1".into(),
                file: PathBuf::from("rec_cam1_x.mp4"),
            })
            .await;
        match state.begin_record_start("cam1").await {
            StartGate::AlreadyRecording(Some(file)) => {
                assert_eq!(file, PathBuf::from("rec_cam1_x.mp4"));
            }
            _ => panic!("expected AlreadyRecording with file"),
        }

        // recording implies not pending.
        let snap = state.snapshot("cam1").await.unwrap();
        assert!(snap.recording && !snap.recording_pending);
    }

    #[tokio::test]
    async fn test_stop_during_pending_start_resends_stop() {
        let state = state_for(&["cam1"]);

        assert!(matches!(
            state.begin_record_start("cam1").await,
            StartGate::Proceed
        ));
        // Stop arrives while start is still pending.
        assert!(matches!(
            state.begin_record_stop("cam1").await,
            StopGate::Proceed
        ));
        assert!(state.snapshot("cam1").await.unwrap().stop_pending);

        // The confirmed start reports the deferred stop for re-send.
        let resend = state
            .apply(&ControlEvent::RecordingStarted {
                id: "cam1".into(),
                file: PathBuf::from("rec_cam1_x.mp4"),
            })
            .await;
        assert_eq!(resend.as_deref(), Some("cam1"));
        assert!(!state.snapshot("cam1").await.unwrap().stop_pending);
    }

    #[tokio::test]
    async fn test_stop_when_idle_reports_not_recording() {
        let state = state_for(&["cam1"]);
        assert!(matches!(
            state.begin_record_stop("cam1").await,
            StopGate::NotRecording(None)
        ));
    }

    #[tokio::test]
    async fn test_stopped_preserves_last_file() {
        let state = state_for(&["cam1"]);
        state
            .apply(&ControlEvent::RecordingStarted {
                id: "cam1".into(),
                file: PathBuf::from("rec_cam1_x.mp4"),
            })
            .await;
        state
            .apply(&ControlEvent::RecordingStopped { id: "cam1".into() })
            .await;

        let snap = state.snapshot("cam1").await.unwrap();
        assert!(!snap.recording);
        assert_eq!(snap.last_file, Some(PathBuf::from("rec_cam1_x.mp4")));
    }

    #[tokio::test]
    async fn test_start_failed_clears_pending() {
        let state = state_for(&["cam1"]);
        state.begin_record_start("cam1").await;
        state
            .apply(&ControlEvent::RecordingStartFailed { id: "cam1".into() })
            .await;

        let snap = state.snapshot("cam1").await.unwrap();
        assert!(!snap.recording_pending && !snap.stop_pending && !snap.recording);
    }

    #[tokio::test]
    async fn test_online_changes_streaming_only() {
        let state = state_for(&["cam1"]);
        state
            .apply(&ControlEvent::StreamOnline {
                id: "cam1".into(),
                online: true,
            })
            .await;
        let snap = state.snapshot("cam1").await.unwrap();
        assert!(snap.streaming && !snap.recording);
    }
}
