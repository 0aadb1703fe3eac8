//! Effect runner
//!
//! Executes effects produced by the state machine. Teardown effects (stream,
//! graph, periodic tasks) run inline so they complete before the state loop
//! publishes the next view; microphone acquisition, playback files and
//! uploads run as tasks and report back through the event channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::{
    clear_frame, create_encoder_channel, generate_playback_path, remove_playback_file,
    run_visualizer_feed, Artifact, AudioBackend, CaptureError, CaptureResources, EncoderMessage,
    EncoderReceiver, FrameSender,
};
use crate::capability::Capabilities;
use crate::settings::RecorderSettings;
use crate::state_machine::{Effect, Event};
use crate::upload::{UploadRequest, Uploader};

/// Trait for running effects.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// A cancellable periodic task (duration ticker or visualizer feed).
struct PeriodicTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Captures = Arc<Mutex<HashMap<Uuid, CaptureResources>>>;

/// Real effect runner: owns the microphone streams, processing graphs,
/// periodic tasks and the upload collaborator.
pub struct CaptureEffectRunner {
    backend: Arc<dyn AudioBackend>,
    uploader: Arc<dyn Uploader>,
    capabilities: Capabilities,
    settings: RecorderSettings,
    captures: Captures,
    ticker: Mutex<Option<PeriodicTask>>,
    visualizer: Mutex<Option<PeriodicTask>>,
    frames: FrameSender,
}

impl CaptureEffectRunner {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        uploader: Arc<dyn Uploader>,
        capabilities: Capabilities,
        settings: RecorderSettings,
        frames: FrameSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            uploader,
            capabilities,
            settings,
            captures: Arc::new(Mutex::new(HashMap::new())),
            ticker: Mutex::new(None),
            visualizer: Mutex::new(None),
            frames,
        })
    }

    fn acquire_microphone(&self, id: Uuid, tx: mpsc::Sender<Event>) {
        let backend = self.backend.clone();
        let captures = self.captures.clone();
        let processing = self.settings.processing;
        let processing_available = self.capabilities.audio_processing;
        let chunk_interval_ms = self.settings.chunk_interval_ms;

        tokio::spawn(async move {
            let (encoder_tx, encoder_rx) = create_encoder_channel();

            // The platform may block while it asks the user for access
            let opened = tokio::task::spawn_blocking(move || {
                CaptureResources::open(
                    backend.as_ref(),
                    &processing,
                    processing_available,
                    chunk_interval_ms,
                    encoder_tx,
                )
            })
            .await
            .unwrap_or_else(|e| Err(CaptureError::Stream(format!("acquisition task failed: {}", e))));

            match opened {
                Ok(resources) => {
                    let processing = resources.has_processing();
                    log::info!(
                        "Microphone acquired for {} ({})",
                        id,
                        if processing { "processed" } else { "raw stream" }
                    );
                    lock(&captures).insert(id, resources);

                    tokio::spawn(forward_encoder(id, encoder_rx, tx.clone()));
                    let _ = tx.send(Event::MicrophoneReady { id, processing }).await;
                }
                Err(err) => {
                    log::warn!("Microphone acquisition failed for {}: {}", id, err);
                    let _ = tx.send(Event::MicrophoneFailed { id, err }).await;
                }
            }
        });
    }

    fn start_ticker(&self, id: Uuid, tx: mpsc::Sender<Event>) {
        let period = self.settings.ticker_interval();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        if tx.send(Event::Tick { id }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        replace_task(&self.ticker, Some(PeriodicTask { cancel, handle }));
        log::debug!("Duration ticker started for {} ({:?})", id, period);
    }

    fn start_visualizer(&self, id: Uuid) {
        let tap = lock(&self.captures).get(&id).and_then(CaptureResources::tap);
        let Some(tap) = tap else {
            log::debug!("No analysis tap for {}; visualizer not started", id);
            return;
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_visualizer_feed(
            tap,
            self.frames.clone(),
            self.settings.visualizer_interval(),
            cancel.clone(),
        ));
        replace_task(&self.visualizer, Some(PeriodicTask { cancel, handle }));
    }

    fn stop_visualizer(&self, clear: bool) {
        replace_task(&self.visualizer, None);
        if clear {
            clear_frame(&self.frames);
        }
    }

    fn set_encoder_paused(&self, id: Uuid, paused: bool) {
        match lock(&self.captures).get(&id) {
            Some(resources) => resources.set_paused(paused),
            None => log::warn!("No capture for {} to {}", id, if paused { "pause" } else { "resume" }),
        }
    }

    fn finalize_capture(&self, id: Uuid, tx: mpsc::Sender<Event>) {
        let resources = lock(&self.captures).remove(&id);
        match resources {
            Some(mut resources) => {
                resources.finish();
                log::info!("Capture {} finalized; microphone released", id);
            }
            None => {
                log::warn!("FinalizeCapture: no active capture for {}", id);
                tokio::spawn(async move {
                    let _ = tx
                        .send(Event::EncoderFailed {
                            id,
                            err: "capture resources missing".to_string(),
                        })
                        .await;
                });
            }
        }
    }

    fn release_capture(&self, id: Uuid) {
        let resources = lock(&self.captures).remove(&id);
        if let Some(mut resources) = resources {
            resources.release();
            log::info!("Capture {} released", id);
        }
    }

    fn release_all(&self) {
        let drained: Vec<_> = lock(&self.captures).drain().collect();
        for (id, mut resources) in drained {
            resources.release();
            log::info!("Capture {} released", id);
        }
    }

    fn prepare_playback(&self, id: Uuid, artifact: Artifact, tx: mpsc::Sender<Event>) {
        let dir = self.settings.playback_dir();
        tokio::spawn(async move {
            let path = match generate_playback_path(&dir, id, artifact.file_extension()) {
                Ok(path) => path,
                Err(e) => {
                    log::warn!("Playback directory {:?} unavailable: {}", dir, e);
                    return;
                }
            };
            if let Err(e) = tokio::fs::write(&path, artifact.bytes()).await {
                log::warn!("Failed to write playback file {:?}: {}", path, e);
                return;
            }
            log::debug!("Playback file ready: {:?}", path);
            let _ = tx.send(Event::PlaybackReady { id, path }).await;
        });
    }

    fn upload(&self, id: Uuid, request: UploadRequest, tx: mpsc::Sender<Event>) {
        let uploader = self.uploader.clone();
        tokio::spawn(async move {
            let event = match uploader.upload(request).await {
                Ok(record_id) => Event::UploadOk { id, record_id },
                Err(e) => Event::UploadFailed {
                    id,
                    err: e.to_string(),
                },
            };
            let _ = tx.send(event).await;
        });
    }
}

fn replace_task(slot: &Mutex<Option<PeriodicTask>>, next: Option<PeriodicTask>) {
    let previous = std::mem::replace(&mut *lock(slot), next);
    if let Some(task) = previous {
        task.stop();
    }
}

fn revoke_playback(path: PathBuf) {
    if let Err(e) = remove_playback_file(&path) {
        log::warn!("Failed to remove playback file {:?}: {}", path, e);
    }
}

/// Deliver encoder output to the state loop, tagged with the session id.
async fn forward_encoder(id: Uuid, mut rx: EncoderReceiver, tx: mpsc::Sender<Event>) {
    while let Some(message) = rx.recv().await {
        let (event, last) = match message {
            EncoderMessage::Chunk(chunk) => (Event::ChunkAvailable { id, chunk }, false),
            EncoderMessage::Stopped(format) => (Event::EncoderStopped { id, format }, true),
            EncoderMessage::Failed(err) => (Event::EncoderFailed { id, err }, true),
        };
        if tx.send(event).await.is_err() || last {
            break;
        }
    }
    log::debug!("Encoder forwarder for {} finished", id);
}

impl EffectRunner for CaptureEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::AcquireMicrophone { id } => self.acquire_microphone(id, tx),
            Effect::StartTicker { id } => self.start_ticker(id, tx),
            Effect::StopTicker => replace_task(&self.ticker, None),
            Effect::StartVisualizer { id } => self.start_visualizer(id),
            Effect::StopVisualizer { clear } => self.stop_visualizer(clear),
            Effect::PauseEncoder { id } => self.set_encoder_paused(id, true),
            Effect::ResumeEncoder { id } => self.set_encoder_paused(id, false),
            Effect::FinalizeCapture { id } => self.finalize_capture(id, tx),
            Effect::ReleaseCapture { id } => self.release_capture(id),
            Effect::ReleaseAll => self.release_all(),
            Effect::PreparePlayback { id, artifact } => self.prepare_playback(id, artifact, tx),
            Effect::RevokePlayback { path } => revoke_playback(path),
            Effect::Upload { id, request } => self.upload(id, request, tx),
            Effect::EmitUi => {
                unreachable!("EmitUi should be handled in run_state_loop");
            }
        }
    }
}

impl Drop for CaptureEffectRunner {
    fn drop(&mut self) {
        replace_task(&self.ticker, None);
        replace_task(&self.visualizer, None);
        self.release_all();
    }
}
