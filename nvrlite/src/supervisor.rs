//! Worker lifecycle and channel wiring
//!
//! One capture thread and one recorder task per configured stream, wired
//! capture → recorder per stream, with all workers reporting into a single
//! notification channel the control plane consumes. Shutdown raises the stop
//! flag, sends shutdown commands, and joins everything so every open MP4 gets
//! its trailer before the process exits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use control_api::{control_router, run_notifications, ControlState, StreamHandles};
use gst_media::CaptureOptions;
use mp4_recorder::{RecorderSettings, RecorderWorker};
use nvr_common::{CaptureCommand, RecorderCommand, CAPTURE_EVENT_CAPACITY, COMMAND_CAPACITY};
use stream_capture::CaptureWorker;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::config::AppConfig;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();

    let mut handles = HashMap::new();
    let mut capture_threads = Vec::new();
    let mut recorder_tasks = Vec::new();
    let mut capture_cmds = Vec::new();
    let mut recorder_cmds = Vec::new();

    for stream in &config.streams {
        let (capture_tx, capture_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (recorder_tx, recorder_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, event_rx) = broadcast::channel(CAPTURE_EVENT_CAPACITY);

        let capture = CaptureWorker::new(
            stream.id.clone(),
            stream.url.clone(),
            CaptureOptions::default(),
            capture_rx,
            event_tx,
            notify_tx.clone(),
            stop.clone(),
        );
        let thread = stream_capture::spawn(capture)
            .with_context(|| format!("failed to spawn capture thread for {}", stream.id))?;
        capture_threads.push(thread);

        let recorder = RecorderWorker::new(
            stream.id.clone(),
            RecorderSettings {
                folder: config.rec_base_folder.clone(),
                pre_seconds: config.pre_buffering_time,
                post_seconds: config.post_buffering_time,
                trim_to_keyframe: true,
            },
            event_rx,
            recorder_rx,
            notify_tx.clone(),
        );
        recorder_tasks.push(tokio::spawn(recorder.run()));

        handles.insert(
            stream.id.clone(),
            StreamHandles {
                capture: capture_tx.clone(),
                recorder: recorder_tx.clone(),
            },
        );
        capture_cmds.push(capture_tx);
        recorder_cmds.push(recorder_tx);
        info!(stream_id = %stream.id, url = %stream.url, "stream registered");
    }

    let state = Arc::new(ControlState::new(config.rec_base_folder.clone(), handles));
    let notifications = tokio::spawn(run_notifications(state.clone(), notify_rx));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("failed to bind HTTP port {}", config.http_port))?;
    info!(port = config.http_port, "HTTP control plane listening");

    if config.autostart {
        for cmd in &capture_cmds {
            let _ = cmd.send(CaptureCommand::Enable).await;
        }
        info!("autostart: all streams enabled");
    }

    axum::serve(listener, control_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("shutting down");
    stop.store(true, Ordering::Relaxed);
    for cmd in &capture_cmds {
        let _ = cmd.try_send(CaptureCommand::Shutdown);
    }
    for cmd in &recorder_cmds {
        let _ = cmd.send(RecorderCommand::Shutdown).await;
    }

    // Capture threads observe the stop flag within one read timeout.
    for thread in capture_threads {
        let _ = thread.join();
    }
    // Recorders finalize any open output on their way out.
    for task in recorder_tasks {
        let _ = task.await;
    }

    drop(notify_tx);
    let _ = notifications.await;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
}
