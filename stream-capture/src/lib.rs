//! Per-stream RTSP capture worker
//!
//! Each worker owns one RTSP connection on a dedicated thread (the media
//! stack blocks on socket I/O) and runs a small reconnect state machine:
//!
//! ```text
//! DISABLED --enable--> CONNECTING --open ok--> ONLINE --read err--> CONNECTING
//!     ^                    |  open fail: wait 5 s, retry
//!     +----disable---------+
//! ```
//!
//! On a successful open the negotiated [`StreamInfo`] is broadcast before any
//! packet, and the control plane is told the stream is online. All waits are
//! sliced against the stop flag so shutdown is never delayed by a retry timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gst_media::{CaptureOptions, CapturePipeline, ReadOutcome};
use nvr_common::{CaptureCommand, CaptureEvent, ControlEvent, ControlEventSender};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Delay between reconnect attempts.
const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Idle poll period while disabled.
const IDLE_POLL: Duration = Duration::from_millis(100);
/// Slice used for all waits so the stop flag is observed promptly.
const WAIT_SLICE: Duration = Duration::from_millis(10);
/// How long a single appsink pull blocks before commands are re-checked.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// One capture worker; construct with [`CaptureWorker::new`] and hand it to
/// [`spawn`] (or call [`CaptureWorker::run`] on a thread of your own).
pub struct CaptureWorker {
    id: String,
    url: String,
    options: CaptureOptions,
    commands: mpsc::Receiver<CaptureCommand>,
    events: broadcast::Sender<CaptureEvent>,
    notify: ControlEventSender,
    stop: Arc<AtomicBool>,
    enabled: bool,
    online: bool,
}

impl CaptureWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        url: String,
        options: CaptureOptions,
        commands: mpsc::Receiver<CaptureCommand>,
        events: broadcast::Sender<CaptureEvent>,
        notify: ControlEventSender,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            url,
            options,
            commands,
            events,
            notify,
            stop,
            enabled: false,
            online: false,
        }
    }

    /// Worker main loop; returns when shut down.
    pub fn run(mut self) {
        debug!(stream_id = %self.id, "capture worker started");

        let mut pipeline: Option<CapturePipeline> = None;

        while !self.stop.load(Ordering::Relaxed) {
            if self.drain_commands() {
                break;
            }

            if !self.enabled {
                if pipeline.take().is_some() {
                    debug!(stream_id = %self.id, "streaming disabled, input closed");
                }
                self.set_online(false);
                self.wait(IDLE_POLL);
                continue;
            }

            if pipeline.is_none() {
                match CapturePipeline::open(&self.id, &self.url, &self.options) {
                    Ok(p) => {
                        info!(stream_id = %self.id, width = p.info().width, height = p.info().height, "RTSP stream open");
                        let _ = self.events.send(CaptureEvent::Info(p.info().clone()));
                        self.set_online(true);
                        pipeline = Some(p);
                    }
                    Err(e) => {
                        warn!(stream_id = %self.id, error = %e, "RTSP open failed, retrying in {}s", RETRY_DELAY.as_secs());
                        self.set_online(false);
                        self.wait(RETRY_DELAY);
                        continue;
                    }
                }
            }

            let outcome = pipeline
                .as_mut()
                .expect("pipeline is open in the read path")
                .read(READ_TIMEOUT);
            match outcome {
                Ok(ReadOutcome::Packet(pkt)) => {
                    // Fails only when the recorder is gone, i.e. during
                    // shutdown; the stop flag ends the loop shortly after.
                    let _ = self.events.send(CaptureEvent::Packet(pkt));
                }
                Ok(ReadOutcome::Timeout) => {}
                Ok(ReadOutcome::Eos) => {
                    warn!(stream_id = %self.id, "RTSP stream ended, reconnecting");
                    pipeline = None;
                    self.set_online(false);
                }
                Err(e) => {
                    warn!(stream_id = %self.id, error = %e, "RTSP read failed, reconnecting");
                    pipeline = None;
                    self.set_online(false);
                }
            }
        }

        drop(pipeline);
        self.set_online(false);
        debug!(stream_id = %self.id, "capture worker finished");
    }

    /// Apply queued commands; returns true on shutdown.
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(CaptureCommand::Enable) => {
                    if !self.enabled {
                        info!(stream_id = %self.id, "streaming enabled");
                    }
                    self.enabled = true;
                }
                Ok(CaptureCommand::Disable) => {
                    if self.enabled {
                        info!(stream_id = %self.id, "streaming disabled");
                    }
                    self.enabled = false;
                }
                Ok(CaptureCommand::Shutdown) => return true,
                Err(mpsc::error::TryRecvError::Empty) => return false,
                Err(mpsc::error::TryRecvError::Disconnected) => return true,
            }
        }
    }

    /// Publish an online/offline edge to the control plane.
    fn set_online(&mut self, online: bool) {
        if self.online != online {
            self.online = online;
            info!(stream_id = %self.id, online, "stream status changed");
            let _ = self.notify.send(ControlEvent::StreamOnline {
                id: self.id.clone(),
                online,
            });
        }
    }

    /// Sleep for `duration` in slices, returning early when the stop flag is
    /// raised or a command is waiting.
    fn wait(&mut self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.stop.load(Ordering::Relaxed) || !self.commands.is_empty() {
                return;
            }
            let slice = remaining.min(WAIT_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }
}

/// Spawn a capture worker on its own named thread.
pub fn spawn(worker: CaptureWorker) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("capture-{}", worker.id))
        .spawn(move || worker.run())
}
