//! Voice note capture engine
//!
//! A `Recorder` owns one capture session at a time: it acquires the
//! microphone, runs the processing graph and encoder, keeps the duration and
//! visualizer up to date, and hands finished takes to an upload collaborator.
//! All of it is driven by a single state loop around `state_machine::reduce`.

pub mod audio;
pub mod capability;
pub mod duration;
pub mod effects;
pub mod naming;
pub mod settings;
pub mod state_machine;
pub mod upload;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use audio::{cleanup_old_playback, create_frame_channel, AudioBackend, FrameReceiver};
use capability::Capabilities;
use effects::{CaptureEffectRunner, EffectRunner};
use settings::RecorderSettings;
use state_machine::{reduce, Context, Effect, Event, Session, Status};
use upload::Uploader;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Status as seen by the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecorderStatus {
    #[default]
    Idle,
    Arming,
    Recording,
    Paused,
    Stopping,
    Preview,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub mime_type: String,
    pub size_bytes: usize,
}

/// Snapshot published to observers after every transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderView {
    pub status: RecorderStatus,
    pub title: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub artifact: Option<ArtifactInfo>,
    /// Playable file for the finished take
    pub playback: Option<PathBuf>,
    pub saving: bool,
}

impl RecorderView {
    fn from_session(session: &Session) -> Self {
        let status = match &session.status {
            Status::Idle => RecorderStatus::Idle,
            Status::Arming { .. } => RecorderStatus::Arming,
            Status::Recording(_) => RecorderStatus::Recording,
            Status::Paused(_) => RecorderStatus::Paused,
            Status::Stopping(_) => RecorderStatus::Stopping,
            Status::Preview(_) => RecorderStatus::Preview,
        };
        let (playback, saving) = match &session.status {
            Status::Preview(take) => (take.playback.clone(), take.uploading),
            _ => (None, false),
        };
        Self {
            status,
            title: session.title.clone(),
            duration_ms: session.duration_ms,
            error: session.error.clone(),
            artifact: session.artifact().map(|a| ArtifactInfo {
                mime_type: a.mime_type().to_string(),
                size_bytes: a.len(),
            }),
            playback,
            saving,
        }
    }
}

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Recorder has shut down")]
    Closed,
}

impl From<mpsc::error::SendError<Event>> for RecorderError {
    fn from(_: mpsc::error::SendError<Event>) -> Self {
        RecorderError::Closed
    }
}

/// Handle to a running recorder. Dropping it (or calling `shutdown`)
/// aborts any capture in progress and releases all resources.
pub struct Recorder {
    tx: mpsc::Sender<Event>,
    view: watch::Receiver<RecorderView>,
    frames: FrameReceiver,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Recorder {
    /// Spawn the state loop on the current tokio runtime.
    pub fn spawn(
        capabilities: Capabilities,
        backend: Arc<dyn AudioBackend>,
        uploader: Arc<dyn Uploader>,
        settings: RecorderSettings,
    ) -> Self {
        let playback_dir = settings.playback_dir();
        match cleanup_old_playback(&playback_dir) {
            Ok(0) => {}
            Ok(n) => log::info!("Removed {} old playback files from {:?}", n, playback_dir),
            Err(e) => log::warn!("Failed to clean up playback files in {:?}: {}", playback_dir, e),
        }

        let (tx, rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);
        let (view_tx, view_rx) = watch::channel(RecorderView::default());
        let (frames_tx, frames_rx) = create_frame_channel();

        let effect_runner =
            CaptureEffectRunner::new(backend, uploader, capabilities, settings, frames_tx);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_state_loop(
            rx,
            tx.clone(),
            effect_runner,
            view_tx,
            capabilities.supported(),
            shutdown.clone(),
        ));

        log::info!(
            "Recorder started (capture supported: {}, processing: {})",
            capabilities.media_capture,
            capabilities.audio_processing
        );

        Self {
            tx,
            view: view_rx,
            frames: frames_rx,
            shutdown,
            task: Some(task),
        }
    }

    /// Send an event to the state machine
    pub async fn send(&self, event: Event) -> Result<(), RecorderError> {
        self.tx.send(event).await?;
        Ok(())
    }

    pub async fn start(&self) -> Result<(), RecorderError> {
        self.send(Event::Start).await
    }

    pub async fn pause(&self) -> Result<(), RecorderError> {
        self.send(Event::Pause).await
    }

    pub async fn resume(&self) -> Result<(), RecorderError> {
        self.send(Event::Resume).await
    }

    pub async fn stop(&self) -> Result<(), RecorderError> {
        self.send(Event::Stop).await
    }

    /// Upload the finished take, optionally replacing its title.
    pub async fn save(&self, title: Option<String>) -> Result<(), RecorderError> {
        self.send(Event::Save { title }).await
    }

    pub async fn reset(&self) -> Result<(), RecorderError> {
        self.send(Event::Reset).await
    }

    pub async fn set_title(&self, title: impl Into<String>) -> Result<(), RecorderError> {
        self.send(Event::SetTitle {
            title: title.into(),
        })
        .await
    }

    /// Current snapshot.
    pub fn view(&self) -> RecorderView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecorderView> {
        self.view.clone()
    }

    /// Latest visualizer frame; empty whenever capture is not running.
    pub fn visualizer(&self) -> FrameReceiver {
        self.frames.clone()
    }

    /// Abort any capture, release everything, and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("State loop task failed: {}", e);
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Publish the session snapshot to observers
fn emit_view(view: &watch::Sender<RecorderView>, session: &Session) {
    let snapshot = RecorderView::from_session(session);
    log::debug!("Emitting view: {:?}", serde_json::to_string(&snapshot));
    view.send_replace(snapshot);
}

/// Reduce one event and execute its effects in order.
fn dispatch(
    session: Session,
    event: Event,
    supported: bool,
    effect_runner: &Arc<dyn EffectRunner>,
    tx: &mpsc::Sender<Event>,
    view: &watch::Sender<RecorderView>,
) -> Session {
    log::debug!("Received event: {:?}", event);

    let from = session.status.name();
    let (next, effects) = reduce(session, event, &Context::current(supported));

    // Log state transitions
    if from != next.status.name() {
        log::info!("State transition: {} -> {}", from, next.status.name());
    }

    for eff in effects {
        match eff {
            Effect::EmitUi => emit_view(view, &next),
            other => effect_runner.spawn(other, tx.clone()),
        }
    }
    next
}

/// Run the main state loop
async fn run_state_loop(
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    effect_runner: Arc<dyn EffectRunner>,
    view: watch::Sender<RecorderView>,
    supported: bool,
    shutdown: CancellationToken,
) {
    let mut session = Session::default();
    emit_view(&view, &session);
    log::info!("State loop started");

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                log::info!("Shutdown requested, stopping state loop");
                break;
            }
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        session = dispatch(session, event, supported, &effect_runner, &tx, &view);
    }

    // Unmount: forced reset from whatever state we are in
    dispatch(session, Event::Reset, supported, &effect_runner, &tx, &view);
    log::info!("State loop ended");
}
