//! Capture state machine
//!
//! Single-writer design: every command and every hardware/async callback is
//! an `Event`, and all transitions go through `reduce()`, which returns the
//! next session plus the effects to execute. The reducer never touches
//! hardware; the effect runner does.
//!
//! Effects that release the microphone, the processing graph or periodic
//! tasks are always listed before `EmitUi`, so observers never see a new
//! state while those resources are still held.

use std::path::PathBuf;

use chrono::{DateTime, Local, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::audio::{Artifact, AudioFormat, CaptureError, Chunk};
use crate::duration::DurationAccountant;
use crate::naming::default_title;
use crate::upload::{RecordId, UploadRequest};

pub const UNSUPPORTED_MESSAGE: &str = "Recording not supported in this browser.";
pub const ENCODER_FAILED_MESSAGE: &str = "Recording failed. Please try again.";

/// Capture in progress (recording, paused, or waiting for the final chunk).
#[derive(Debug, Clone)]
pub struct ActiveCapture {
    pub session_id: Uuid,
    pub clock: DurationAccountant,
    /// Encoded segments in delivery order; reset at every start.
    pub chunks: Vec<Chunk>,
    /// Wall-clock time at which capture began.
    pub recorded_at: DateTime<Utc>,
    /// Whether the processing graph (and thus the visualizer) is active.
    pub processing: bool,
}

/// A finished take awaiting save or discard.
#[derive(Debug, Clone)]
pub struct Take {
    pub session_id: Uuid,
    pub artifact: Artifact,
    pub recorded_at: DateTime<Utc>,
    pub playback: Option<PathBuf>,
    pub uploading: bool,
}

#[derive(Debug, Clone, Default)]
pub enum Status {
    #[default]
    Idle,
    /// Microphone request in flight.
    Arming { session_id: Uuid },
    Recording(ActiveCapture),
    Paused(ActiveCapture),
    /// Hardware released; waiting for the encoder's stop marker.
    Stopping(ActiveCapture),
    Preview(Take),
}

impl Status {
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            Status::Idle => None,
            Status::Arming { session_id } => Some(*session_id),
            Status::Recording(c) | Status::Paused(c) | Status::Stopping(c) => Some(c.session_id),
            Status::Preview(take) => Some(take.session_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Status::Idle => "Idle",
            Status::Arming { .. } => "Arming",
            Status::Recording(_) => "Recording",
            Status::Paused(_) => "Paused",
            Status::Stopping(_) => "Stopping",
            Status::Preview(_) => "Preview",
        }
    }

    fn capture_mut(&mut self) -> Option<&mut ActiveCapture> {
        match self {
            Status::Recording(c) | Status::Paused(c) | Status::Stopping(c) => Some(c),
            _ => None,
        }
    }
}

/// The one live capture session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub status: Status,
    pub title: String,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl Session {
    fn idle_with_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn chunks(&self) -> &[Chunk] {
        match &self.status {
            Status::Recording(c) | Status::Paused(c) | Status::Stopping(c) => &c.chunks,
            _ => &[],
        }
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match &self.status {
            Status::Preview(take) => Some(&take.artifact),
            _ => None,
        }
    }
}

/// Inputs the reducer reads besides the event itself.
#[derive(Debug, Clone)]
pub struct Context {
    /// Injected capability descriptor result.
    pub supported: bool,
    pub now: Instant,
    pub wall_clock: DateTime<Local>,
}

impl Context {
    pub fn current(supported: bool) -> Self {
        Self {
            supported,
            now: Instant::now(),
            wall_clock: Local::now(),
        }
    }
}

/// Commands from the UI and callbacks from the effect runner.
#[derive(Debug, Clone)]
pub enum Event {
    Start,
    Pause,
    Resume,
    Stop,
    Save { title: Option<String> },
    Reset,
    SetTitle { title: String },

    /// Duration ticker fired
    Tick { id: Uuid },

    // Microphone acquisition
    MicrophoneReady { id: Uuid, processing: bool },
    MicrophoneFailed { id: Uuid, err: CaptureError },

    // Encoder
    ChunkAvailable { id: Uuid, chunk: Chunk },
    EncoderStopped { id: Uuid, format: AudioFormat },
    EncoderFailed { id: Uuid, err: String },

    PlaybackReady { id: Uuid, path: PathBuf },

    // Upload collaborator
    UploadOk { id: Uuid, record_id: RecordId },
    UploadFailed { id: Uuid, err: String },
}

/// Effects to be executed after a state transition.
#[derive(Debug, Clone)]
pub enum Effect {
    AcquireMicrophone { id: Uuid },
    StartTicker { id: Uuid },
    StopTicker,
    StartVisualizer { id: Uuid },
    /// `clear` also blanks the published frame (stop/reset, not pause)
    StopVisualizer { clear: bool },
    PauseEncoder { id: Uuid },
    ResumeEncoder { id: Uuid },
    /// Release the microphone, flush the encoder, tear down the graph
    FinalizeCapture { id: Uuid },
    /// Release the microphone and graph, discarding buffered audio
    ReleaseCapture { id: Uuid },
    ReleaseAll,
    PreparePlayback { id: Uuid, artifact: Artifact },
    RevokePlayback { path: PathBuf },
    Upload { id: Uuid, request: UploadRequest },
    /// Publish the session snapshot to observers
    EmitUi,
}

/// Reducer function: (session, event) -> (next_session, effects)
///
/// Key rules:
/// - Events carrying another session's id are stale and ignored
///   (a stale microphone grant is released, a stale playback file removed)
/// - Commands that are invalid in the current state are no-ops
pub fn reduce(session: Session, event: Event, ctx: &Context) -> (Session, Vec<Effect>) {
    use Effect::*;
    use Event::*;

    let Session {
        status,
        title,
        duration_ms,
        error,
    } = session;

    match (status, event) {
        // -----------------
        // Idle
        // -----------------
        (Status::Idle, Start) => {
            if !ctx.supported {
                log::warn!("Start rejected: recording is not supported");
                return (Session::idle_with_error(UNSUPPORTED_MESSAGE), vec![EmitUi]);
            }
            let id = Uuid::new_v4();
            (
                Session {
                    status: Status::Arming { session_id: id },
                    ..Session::default()
                },
                vec![AcquireMicrophone { id }, EmitUi],
            )
        }

        // -----------------
        // Arming
        // -----------------
        (Status::Arming { session_id }, MicrophoneReady { id, processing }) if session_id == id => {
            let capture = ActiveCapture {
                session_id,
                clock: DurationAccountant::start(ctx.now),
                chunks: Vec::new(),
                recorded_at: ctx.wall_clock.with_timezone(&Utc),
                processing,
            };
            let mut effects = vec![StartTicker { id }];
            if processing {
                effects.push(StartVisualizer { id });
            }
            effects.push(EmitUi);
            (
                Session {
                    status: Status::Recording(capture),
                    title: default_title(&ctx.wall_clock),
                    duration_ms: 0,
                    error: None,
                },
                effects,
            )
        }
        (Status::Arming { session_id }, MicrophoneFailed { id, err }) if session_id == id => {
            log::error!("Microphone acquisition failed for {}: {}", id, err);
            (
                Session::idle_with_error(err.user_message()),
                // Anything partially acquired goes too
                vec![ReleaseCapture { id }, EmitUi],
            )
        }

        // -----------------
        // Recording
        // -----------------
        (Status::Recording(mut capture), Pause) => {
            capture.clock.pause(ctx.now);
            let id = capture.session_id;
            let duration_ms = capture.clock.elapsed_ms(ctx.now);
            (
                Session {
                    status: Status::Paused(capture),
                    title,
                    duration_ms,
                    error,
                },
                vec![
                    StopTicker,
                    StopVisualizer { clear: false },
                    PauseEncoder { id },
                    EmitUi,
                ],
            )
        }
        (Status::Recording(capture), Tick { id }) if capture.session_id == id => {
            let duration_ms = capture.clock.elapsed_ms(ctx.now);
            (
                Session {
                    status: Status::Recording(capture),
                    title,
                    duration_ms,
                    error,
                },
                vec![EmitUi],
            )
        }

        // -----------------
        // Paused
        // -----------------
        (Status::Paused(mut capture), Resume) if capture.clock.is_paused() => {
            capture.clock.resume(ctx.now);
            let id = capture.session_id;
            let mut effects = vec![ResumeEncoder { id }, StartTicker { id }];
            if capture.processing {
                effects.push(StartVisualizer { id });
            }
            effects.push(EmitUi);
            (
                Session {
                    status: Status::Recording(capture),
                    title,
                    duration_ms,
                    error,
                },
                effects,
            )
        }

        // -----------------
        // Recording / Paused
        // -----------------
        (Status::Recording(capture) | Status::Paused(capture), Stop) => {
            let id = capture.session_id;
            let duration_ms = capture.clock.elapsed_ms(ctx.now);
            log::info!("Stopping recording {} at {} ms", id, duration_ms);
            (
                Session {
                    status: Status::Stopping(capture),
                    title,
                    duration_ms,
                    error,
                },
                vec![
                    StopTicker,
                    StopVisualizer { clear: true },
                    FinalizeCapture { id },
                    EmitUi,
                ],
            )
        }
        (
            mut status @ (Status::Recording(_) | Status::Paused(_) | Status::Stopping(_)),
            ChunkAvailable { id, chunk },
        ) if status.session_id() == Some(id) => {
            if let Some(capture) = status.capture_mut() {
                capture.chunks.push(chunk);
            }
            (
                Session {
                    status,
                    title,
                    duration_ms,
                    error,
                },
                vec![],
            )
        }
        (
            status @ (Status::Recording(_) | Status::Paused(_) | Status::Stopping(_)),
            EncoderFailed { id, err },
        ) if status.session_id() == Some(id) => {
            log::error!("Encoder failed during {} of {}: {}", status.name(), id, err);
            (
                Session::idle_with_error(ENCODER_FAILED_MESSAGE),
                vec![
                    StopTicker,
                    StopVisualizer { clear: true },
                    ReleaseCapture { id },
                    EmitUi,
                ],
            )
        }

        // -----------------
        // Stopping
        // -----------------
        (Status::Stopping(capture), EncoderStopped { id, format }) if capture.session_id == id => {
            match Artifact::assemble(&capture.chunks, format) {
                Ok(artifact) => {
                    log::info!(
                        "Recording {} finalized: {} chunks, {} bytes, {} ms",
                        id,
                        capture.chunks.len(),
                        artifact.len(),
                        duration_ms
                    );
                    let take = Take {
                        session_id: id,
                        artifact: artifact.clone(),
                        recorded_at: capture.recorded_at,
                        playback: None,
                        uploading: false,
                    };
                    (
                        Session {
                            status: Status::Preview(take),
                            title,
                            duration_ms,
                            error: None,
                        },
                        vec![PreparePlayback { id, artifact }, EmitUi],
                    )
                }
                Err(e) => {
                    log::error!("Failed to assemble recording {}: {}", id, e);
                    (Session::idle_with_error(ENCODER_FAILED_MESSAGE), vec![EmitUi])
                }
            }
        }

        // -----------------
        // Preview
        // -----------------
        (Status::Preview(mut take), PlaybackReady { id, path }) if take.session_id == id => {
            take.playback = Some(path);
            (
                Session {
                    status: Status::Preview(take),
                    title,
                    duration_ms,
                    error,
                },
                vec![EmitUi],
            )
        }
        (Status::Preview(mut take), Save { title: title_override }) if !take.uploading => {
            let title = match title_override {
                Some(t) if !t.trim().is_empty() => t.trim().to_string(),
                _ => title,
            };
            take.uploading = true;
            let id = take.session_id;
            let request = UploadRequest {
                title: title.clone(),
                recorded_at: take.recorded_at,
                duration_ms,
                artifact: take.artifact.clone(),
            };
            (
                Session {
                    status: Status::Preview(take),
                    title,
                    duration_ms,
                    error: None,
                },
                vec![Upload { id, request }, EmitUi],
            )
        }
        (Status::Preview(take), UploadOk { id, record_id }) if take.session_id == id => {
            log::info!("Recording {} saved as record {}", id, record_id);
            let mut effects = Vec::new();
            if let Some(path) = take.playback {
                effects.push(RevokePlayback { path });
            }
            effects.push(EmitUi);
            (Session::default(), effects)
        }
        (Status::Preview(mut take), UploadFailed { id, err }) if take.session_id == id => {
            log::error!("Saving recording {} failed: {}", id, err);
            take.uploading = false;
            (
                Session {
                    status: Status::Preview(take),
                    title,
                    duration_ms,
                    error: Some(format!("Failed to save recording: {}", err)),
                },
                vec![EmitUi],
            )
        }

        // -----------------
        // Title is editable once a title exists
        // -----------------
        (
            status @ (Status::Recording(_)
            | Status::Paused(_)
            | Status::Stopping(_)
            | Status::Preview(_)),
            SetTitle { title: new_title },
        ) => (
            Session {
                status,
                title: new_title,
                duration_ms,
                error,
            },
            vec![EmitUi],
        ),

        // -----------------
        // Reset: valid from anywhere, idempotent
        // -----------------
        (status, Reset) => {
            if !matches!(status, Status::Idle) {
                log::info!("Reset from {}", status.name());
            }
            let mut effects = vec![StopTicker, StopVisualizer { clear: true }, ReleaseAll];
            if let Status::Preview(Take {
                playback: Some(path),
                ..
            }) = status
            {
                effects.push(RevokePlayback { path });
            }
            effects.push(EmitUi);
            (Session::default(), effects)
        }

        // -----------------
        // Stale results that still hold resources
        // -----------------
        (status, MicrophoneReady { id, .. }) => {
            log::debug!("Releasing microphone granted to stale session {}", id);
            (
                Session {
                    status,
                    title,
                    duration_ms,
                    error,
                },
                vec![ReleaseCapture { id }],
            )
        }
        (status, PlaybackReady { id, path }) => {
            log::debug!("Discarding playback file for stale session {}", id);
            (
                Session {
                    status,
                    title,
                    duration_ms,
                    error,
                },
                vec![RevokePlayback { path }],
            )
        }

        // -----------------
        // Unhandled: no transition
        // -----------------
        (status, _) => (
            Session {
                status,
                title,
                duration_ms,
                error,
            },
            vec![],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ctx(now: Instant) -> Context {
        Context {
            supported: true,
            now,
            wall_clock: Local::now(),
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn has(effects: &[Effect], pred: impl Fn(&Effect) -> bool) -> bool {
        effects.iter().any(pred)
    }

    /// Index of the first effect matching `pred`.
    fn position(effects: &[Effect], pred: impl Fn(&Effect) -> bool) -> usize {
        effects.iter().position(pred).expect("effect not found")
    }

    fn recording(t0: Instant) -> (Session, Uuid) {
        let (s, _) = reduce(Session::default(), Event::Start, &ctx(t0));
        let id = s.status.session_id().unwrap();
        let (s, _) = reduce(
            s,
            Event::MicrophoneReady {
                id,
                processing: true,
            },
            &ctx(t0),
        );
        assert!(matches!(s.status, Status::Recording(_)));
        (s, id)
    }

    fn preview(t0: Instant) -> (Session, Uuid) {
        let (s, id) = recording(t0);
        let (s, _) = reduce(
            s,
            Event::ChunkAvailable {
                id,
                chunk: Chunk(vec![0, 0, 1, 0]),
            },
            &ctx(t0 + ms(500)),
        );
        let (s, _) = reduce(s, Event::Stop, &ctx(t0 + ms(1000)));
        let (s, _) = reduce(
            s,
            Event::EncoderStopped {
                id,
                format: AudioFormat {
                    sample_rate: 8000,
                    channels: 1,
                },
            },
            &ctx(t0 + ms(1010)),
        );
        assert!(matches!(s.status, Status::Preview(_)));
        (s, id)
    }

    #[test]
    fn idle_start_transitions_to_arming() {
        let (next, effects) = reduce(Session::default(), Event::Start, &ctx(Instant::now()));
        assert!(matches!(next.status, Status::Arming { .. }));
        assert!(has(&effects, |e| matches!(e, Effect::AcquireMicrophone { .. })));
        assert!(has(&effects, |e| matches!(e, Effect::EmitUi)));
    }

    #[test]
    fn unsupported_start_stays_idle_without_requesting_microphone() {
        let context = Context {
            supported: false,
            ..ctx(Instant::now())
        };
        let (next, effects) = reduce(Session::default(), Event::Start, &context);
        assert!(matches!(next.status, Status::Idle));
        assert_eq!(next.error.as_deref(), Some(UNSUPPORTED_MESSAGE));
        assert!(!has(&effects, |e| matches!(e, Effect::AcquireMicrophone { .. })));
    }

    #[test]
    fn microphone_ready_starts_ticker_and_visualizer() {
        let t0 = Instant::now();
        let (s, _) = reduce(Session::default(), Event::Start, &ctx(t0));
        let id = s.status.session_id().unwrap();
        let (s, effects) = reduce(
            s,
            Event::MicrophoneReady {
                id,
                processing: true,
            },
            &ctx(t0),
        );
        assert!(matches!(s.status, Status::Recording(_)));
        assert!(!s.title.is_empty());
        assert!(s.chunks().is_empty());
        assert!(has(&effects, |e| matches!(e, Effect::StartTicker { .. })));
        assert!(has(&effects, |e| matches!(e, Effect::StartVisualizer { .. })));
    }

    #[test]
    fn raw_stream_recording_has_no_visualizer() {
        let t0 = Instant::now();
        let (s, _) = reduce(Session::default(), Event::Start, &ctx(t0));
        let id = s.status.session_id().unwrap();
        let (_, effects) = reduce(
            s,
            Event::MicrophoneReady {
                id,
                processing: false,
            },
            &ctx(t0),
        );
        assert!(has(&effects, |e| matches!(e, Effect::StartTicker { .. })));
        assert!(!has(&effects, |e| matches!(e, Effect::StartVisualizer { .. })));
    }

    #[test]
    fn permission_denied_returns_to_idle_and_releases() {
        let (s, _) = reduce(Session::default(), Event::Start, &ctx(Instant::now()));
        let id = s.status.session_id().unwrap();
        let (s, effects) = reduce(
            s,
            Event::MicrophoneFailed {
                id,
                err: CaptureError::PermissionDenied("denied".to_string()),
            },
            &ctx(Instant::now()),
        );
        assert!(matches!(s.status, Status::Idle));
        assert!(s.error.is_some());
        assert!(has(&effects, |e| matches!(e, Effect::ReleaseCapture { id: r } if *r == id)));
    }

    #[test]
    fn double_start_while_recording_is_noop() {
        let (s, id) = recording(Instant::now());
        let (s, effects) = reduce(s, Event::Start, &ctx(Instant::now()));
        assert!(matches!(s.status, Status::Recording(ref c) if c.session_id == id));
        assert!(effects.is_empty());
    }

    #[test]
    fn duration_excludes_paused_interval() {
        // start at 0, pause at 2000, resume at 3000, stop at 4500
        let t0 = Instant::now();
        let (s, _) = recording(t0);
        let (s, _) = reduce(s, Event::Pause, &ctx(t0 + ms(2000)));
        assert!(matches!(s.status, Status::Paused(_)));
        let (s, _) = reduce(s, Event::Resume, &ctx(t0 + ms(3000)));
        assert!(matches!(s.status, Status::Recording(_)));
        let (s, _) = reduce(s, Event::Stop, &ctx(t0 + ms(4500)));
        assert!(matches!(s.status, Status::Stopping(_)));
        assert_eq!(s.duration_ms, 3500);
    }

    #[test]
    fn stop_while_paused_uses_frozen_clock() {
        let t0 = Instant::now();
        let (s, _) = recording(t0);
        let (s, _) = reduce(s, Event::Pause, &ctx(t0 + ms(1200)));
        let (s, _) = reduce(s, Event::Stop, &ctx(t0 + ms(9000)));
        assert_eq!(s.duration_ms, 1200);
    }

    #[test]
    fn ticks_update_duration_only_while_recording() {
        let t0 = Instant::now();
        let (s, id) = recording(t0);
        let (s, effects) = reduce(s, Event::Tick { id }, &ctx(t0 + ms(300)));
        assert_eq!(s.duration_ms, 300);
        assert!(has(&effects, |e| matches!(e, Effect::EmitUi)));

        let (s, _) = reduce(s, Event::Pause, &ctx(t0 + ms(400)));
        let (s, effects) = reduce(s, Event::Tick { id }, &ctx(t0 + ms(900)));
        assert_eq!(s.duration_ms, 400);
        assert!(effects.is_empty());
    }

    #[test]
    fn pause_outside_recording_is_noop() {
        let (s, effects) = reduce(Session::default(), Event::Pause, &ctx(Instant::now()));
        assert!(matches!(s.status, Status::Idle));
        assert!(effects.is_empty());

        let (s, _) = preview(Instant::now());
        let (s, effects) = reduce(s, Event::Pause, &ctx(Instant::now()));
        assert!(matches!(s.status, Status::Preview(_)));
        assert!(effects.is_empty());
    }

    #[test]
    fn resume_outside_paused_is_noop() {
        let t0 = Instant::now();
        let (s, _) = recording(t0);
        let (s, effects) = reduce(s, Event::Resume, &ctx(t0 + ms(100)));
        assert!(matches!(s.status, Status::Recording(_)));
        assert!(effects.is_empty());

        let (s, effects) = reduce(Session::default(), Event::Resume, &ctx(t0));
        assert!(matches!(s.status, Status::Idle));
        assert!(effects.is_empty());
    }

    #[test]
    fn resume_without_recorded_pause_instant_is_noop() {
        let t0 = Instant::now();
        let (s, id) = recording(t0);
        // Paused status whose clock was never paused
        let capture = match s.status {
            Status::Recording(c) => c,
            _ => unreachable!(),
        };
        let s = Session {
            status: Status::Paused(capture),
            ..Session::default()
        };
        let (s, effects) = reduce(s, Event::Resume, &ctx(t0 + ms(10)));
        assert!(matches!(s.status, Status::Paused(ref c) if c.session_id == id));
        assert!(effects.is_empty());
    }

    #[test]
    fn pause_stops_periodic_tasks_before_emitting() {
        let (s, _) = recording(Instant::now());
        let (_, effects) = reduce(s, Event::Pause, &ctx(Instant::now()));
        let emit = position(&effects, |e| matches!(e, Effect::EmitUi));
        assert!(position(&effects, |e| matches!(e, Effect::StopTicker)) < emit);
        assert!(
            position(&effects, |e| matches!(e, Effect::StopVisualizer { clear: false })) < emit
        );
        assert!(position(&effects, |e| matches!(e, Effect::PauseEncoder { .. })) < emit);
    }

    #[test]
    fn stop_releases_hardware_before_emitting() {
        let (s, id) = recording(Instant::now());
        let (_, effects) = reduce(s, Event::Stop, &ctx(Instant::now()));
        let emit = position(&effects, |e| matches!(e, Effect::EmitUi));
        assert!(position(&effects, |e| matches!(e, Effect::StopTicker)) < emit);
        assert!(position(&effects, |e| matches!(e, Effect::StopVisualizer { clear: true })) < emit);
        assert!(
            position(&effects, |e| matches!(e, Effect::FinalizeCapture { id: f } if *f == id))
                < emit
        );
    }

    #[test]
    fn stop_without_capture_is_noop() {
        let (s, effects) = reduce(Session::default(), Event::Stop, &ctx(Instant::now()));
        assert!(matches!(s.status, Status::Idle));
        assert!(effects.is_empty());
    }

    #[test]
    fn chunks_accumulate_in_order_and_assemble_on_encoder_stop() {
        let t0 = Instant::now();
        let (s, id) = recording(t0);
        let (s, _) = reduce(
            s,
            Event::ChunkAvailable {
                id,
                chunk: Chunk(vec![1, 0]),
            },
            &ctx(t0),
        );
        let (s, _) = reduce(s, Event::Stop, &ctx(t0 + ms(50)));
        // Final chunk delivered after stop, before the stop marker
        let (s, _) = reduce(
            s,
            Event::ChunkAvailable {
                id,
                chunk: Chunk(vec![2, 0]),
            },
            &ctx(t0 + ms(60)),
        );
        assert_eq!(s.chunks(), &[Chunk(vec![1, 0]), Chunk(vec![2, 0])]);

        let (s, effects) = reduce(
            s,
            Event::EncoderStopped {
                id,
                format: AudioFormat {
                    sample_rate: 8000,
                    channels: 1,
                },
            },
            &ctx(t0 + ms(70)),
        );
        let artifact = s.artifact().expect("artifact in preview");
        assert_eq!(artifact.mime_type(), "audio/wav");
        // Two 16-bit samples at the end of the file
        assert_eq!(&artifact.bytes()[artifact.len() - 4..], &[1, 0, 2, 0]);
        assert_eq!(s.duration_ms, 50);
        assert!(has(&effects, |e| matches!(e, Effect::PreparePlayback { .. })));
    }

    #[test]
    fn stop_with_no_chunks_yields_empty_artifact() {
        let t0 = Instant::now();
        let (s, id) = recording(t0);
        let (s, _) = reduce(s, Event::Stop, &ctx(t0));
        let (s, _) = reduce(
            s,
            Event::EncoderStopped {
                id,
                format: AudioFormat {
                    sample_rate: 8000,
                    channels: 1,
                },
            },
            &ctx(t0),
        );
        assert!(matches!(s.status, Status::Preview(_)));
        assert_eq!(s.duration_ms, 0);
        let artifact = s.artifact().unwrap();
        assert!(!artifact.is_empty());
    }

    #[test]
    fn encoder_failure_returns_to_idle_with_error() {
        let (s, id) = recording(Instant::now());
        let (s, effects) = reduce(
            s,
            Event::EncoderFailed {
                id,
                err: "device lost".to_string(),
            },
            &ctx(Instant::now()),
        );
        assert!(matches!(s.status, Status::Idle));
        assert_eq!(s.error.as_deref(), Some(ENCODER_FAILED_MESSAGE));
        assert!(s.artifact().is_none());
        assert!(has(&effects, |e| matches!(e, Effect::ReleaseCapture { .. })));
    }

    #[test]
    fn stale_events_are_ignored() {
        let t0 = Instant::now();
        let (s, id) = recording(t0);
        let stale = Uuid::new_v4();

        let (s, effects) = reduce(
            s,
            Event::ChunkAvailable {
                id: stale,
                chunk: Chunk(vec![9, 9]),
            },
            &ctx(t0),
        );
        assert!(s.chunks().is_empty());
        assert!(effects.is_empty());

        let (s, effects) = reduce(s, Event::Tick { id: stale }, &ctx(t0 + ms(500)));
        assert_eq!(s.duration_ms, 0);
        assert!(effects.is_empty());

        let (s, effects) = reduce(
            s,
            Event::EncoderFailed {
                id: stale,
                err: "old".to_string(),
            },
            &ctx(t0),
        );
        assert!(matches!(s.status, Status::Recording(ref c) if c.session_id == id));
        assert!(effects.is_empty());
    }

    #[test]
    fn late_microphone_grant_after_reset_is_released() {
        let (s, _) = reduce(Session::default(), Event::Start, &ctx(Instant::now()));
        let id = s.status.session_id().unwrap();
        let (s, _) = reduce(s, Event::Reset, &ctx(Instant::now()));
        assert!(matches!(s.status, Status::Idle));

        let (s, effects) = reduce(
            s,
            Event::MicrophoneReady {
                id,
                processing: true,
            },
            &ctx(Instant::now()),
        );
        assert!(matches!(s.status, Status::Idle));
        assert!(has(&effects, |e| matches!(e, Effect::ReleaseCapture { id: r } if *r == id)));
        assert!(!has(&effects, |e| matches!(e, Effect::StartTicker { .. })));
    }

    #[test]
    fn reset_from_any_state_clears_everything() {
        let t0 = Instant::now();
        let mut sessions = vec![Session::default()];
        let (arming, _) = reduce(Session::default(), Event::Start, &ctx(t0));
        sessions.push(arming);
        let (rec, id) = recording(t0);
        let (rec, _) = reduce(
            rec,
            Event::ChunkAvailable {
                id,
                chunk: Chunk(vec![0, 0]),
            },
            &ctx(t0),
        );
        sessions.push(rec.clone());
        let (paused, _) = reduce(rec.clone(), Event::Pause, &ctx(t0 + ms(10)));
        sessions.push(paused);
        let (stopping, _) = reduce(rec, Event::Stop, &ctx(t0 + ms(10)));
        sessions.push(stopping);
        let (prev, _) = preview(t0);
        sessions.push(prev);
        sessions.push(Session::idle_with_error("boom"));

        for s in sessions {
            let from = s.status.name();
            let (next, effects) = reduce(s, Event::Reset, &ctx(t0 + ms(20)));
            assert!(matches!(next.status, Status::Idle), "from {}", from);
            assert!(next.artifact().is_none());
            assert!(next.chunks().is_empty());
            assert_eq!(next.title, "");
            assert_eq!(next.duration_ms, 0);
            assert!(next.error.is_none());
            assert!(has(&effects, |e| matches!(e, Effect::ReleaseAll)));
            assert!(has(&effects, |e| matches!(e, Effect::StopTicker)));
        }
    }

    #[test]
    fn reset_revokes_playback_file() {
        let (s, id) = preview(Instant::now());
        let path = PathBuf::from("/tmp/voxnote-playback.wav");
        let (s, _) = reduce(
            s,
            Event::PlaybackReady {
                id,
                path: path.clone(),
            },
            &ctx(Instant::now()),
        );
        let (_, effects) = reduce(s, Event::Reset, &ctx(Instant::now()));
        assert!(has(&effects, |e| matches!(e, Effect::RevokePlayback { path: p } if *p == path)));
    }

    #[test]
    fn stale_playback_file_is_revoked() {
        let path = PathBuf::from("/tmp/stale.wav");
        let (s, effects) = reduce(
            Session::default(),
            Event::PlaybackReady {
                id: Uuid::new_v4(),
                path: path.clone(),
            },
            &ctx(Instant::now()),
        );
        assert!(matches!(s.status, Status::Idle));
        assert!(has(&effects, |e| matches!(e, Effect::RevokePlayback { path: p } if *p == path)));
    }

    #[test]
    fn save_sends_final_duration_and_start_time() {
        let t0 = Instant::now();
        let (s, id) = preview(t0);
        let recorded_at = match &s.status {
            Status::Preview(take) => take.recorded_at,
            _ => unreachable!(),
        };
        let final_ms = s.duration_ms;

        let (s, effects) = reduce(s, Event::Save { title: None }, &ctx(t0 + ms(5000)));
        let request = effects
            .iter()
            .find_map(|e| match e {
                Effect::Upload { id: u, request } if *u == id => Some(request.clone()),
                _ => None,
            })
            .expect("upload effect");
        assert_eq!(request.duration_ms, final_ms);
        assert_eq!(request.recorded_at, recorded_at);
        assert_eq!(request.title, s.title);
        assert!(matches!(s.status, Status::Preview(ref t) if t.uploading));
    }

    #[test]
    fn save_uses_title_override() {
        let (s, _) = preview(Instant::now());
        let (s, effects) = reduce(
            s,
            Event::Save {
                title: Some("  Grocery list  ".to_string()),
            },
            &ctx(Instant::now()),
        );
        assert_eq!(s.title, "Grocery list");
        assert!(has(&effects, |e| matches!(e, Effect::Upload { request, .. } if request.title == "Grocery list")));
    }

    #[test]
    fn save_while_uploading_is_ignored() {
        let (s, _) = preview(Instant::now());
        let (s, _) = reduce(s, Event::Save { title: None }, &ctx(Instant::now()));
        let (_, effects) = reduce(s, Event::Save { title: None }, &ctx(Instant::now()));
        assert!(effects.is_empty());
    }

    #[test]
    fn upload_success_returns_to_idle() {
        let (s, id) = preview(Instant::now());
        let (s, _) = reduce(s, Event::Save { title: None }, &ctx(Instant::now()));
        let (s, _) = reduce(
            s,
            Event::UploadOk {
                id,
                record_id: RecordId("7".to_string()),
            },
            &ctx(Instant::now()),
        );
        assert!(matches!(s.status, Status::Idle));
        assert!(s.artifact().is_none());
        assert_eq!(s.title, "");
    }

    #[test]
    fn upload_failure_keeps_preview_and_allows_retry() {
        let (s, id) = preview(Instant::now());
        let before = s.artifact().cloned();
        let (s, _) = reduce(s, Event::Save { title: None }, &ctx(Instant::now()));
        let (s, _) = reduce(
            s,
            Event::UploadFailed {
                id,
                err: "Network error: timeout".to_string(),
            },
            &ctx(Instant::now()),
        );
        assert!(matches!(s.status, Status::Preview(ref t) if !t.uploading));
        assert!(s.error.is_some());
        assert_eq!(s.artifact().cloned(), before);

        let (s, effects) = reduce(s, Event::Save { title: None }, &ctx(Instant::now()));
        assert!(has(&effects, |e| matches!(e, Effect::Upload { .. })));
        assert!(s.error.is_none());
    }

    #[test]
    fn title_is_editable_in_preview_but_not_idle() {
        let (s, _) = preview(Instant::now());
        let (s, _) = reduce(
            s,
            Event::SetTitle {
                title: "Renamed".to_string(),
            },
            &ctx(Instant::now()),
        );
        assert_eq!(s.title, "Renamed");

        let (s, effects) = reduce(
            Session::default(),
            Event::SetTitle {
                title: "ignored".to_string(),
            },
            &ctx(Instant::now()),
        );
        assert_eq!(s.title, "");
        assert!(effects.is_empty());
    }

    #[test]
    fn start_from_preview_is_noop() {
        let (s, id) = preview(Instant::now());
        let (s, effects) = reduce(s, Event::Start, &ctx(Instant::now()));
        assert!(matches!(s.status, Status::Preview(ref t) if t.session_id == id));
        assert!(effects.is_empty());
    }
}
