//! Microphone backend using CPAL
//!
//! cpal streams are not `Send` on every host, so each stream lives on a
//! dedicated audio thread. The returned handle talks to that thread over a
//! channel; closing it drops the stream and joins the thread.

use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, Stream, StreamConfig};

use super::backend::{AudioBackend, CaptureError, ErrorSink, InputConfig, InputStream, SampleSink};

/// Backend bound to the default input device of the default host.
/// The device is resolved on every open so that device changes are picked up.
#[derive(Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn default_device() -> Result<Device, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;
    log::info!("Using audio input device: {:?}", device.name());
    Ok(device)
}

/// cpal reports permission problems as backend-specific strings.
fn classify_backend_error(description: String) -> CaptureError {
    let lower = description.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        CaptureError::PermissionDenied(description)
    } else {
        CaptureError::Stream(description)
    }
}

impl AudioBackend for CpalBackend {
    fn default_config(&self) -> Result<InputConfig, CaptureError> {
        let device = default_device()?;
        let supported = device.default_input_config().map_err(|e| match e {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => CaptureError::NoInputDevice,
            cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
                CaptureError::Stream("input streams are not supported".to_string())
            }
            cpal::DefaultStreamConfigError::BackendSpecific { err } => {
                classify_backend_error(err.description)
            }
        })?;

        log::info!(
            "Audio config: {} Hz, {} channels, {:?}",
            supported.sample_rate().0,
            supported.channels(),
            supported.sample_format()
        );

        Ok(InputConfig {
            sample_rate: supported.sample_rate().0,
            channels: supported.channels(),
        })
    }

    fn open_input(
        &self,
        config: &InputConfig,
        sink: SampleSink,
        on_error: ErrorSink,
    ) -> Result<Box<dyn InputStream>, CaptureError> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), CaptureError>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let requested = *config;

        let thread = std::thread::Builder::new()
            .name("voxnote-audio".to_string())
            .spawn(move || {
                let stream = match build_stream(&requested, sink, on_error) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(classify_backend_error(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until the handle is closed (explicit stop or sender dropped)
                let _ = stop_rx.recv();
                drop(stream);
                log::debug!("Audio thread exiting");
            })
            .map_err(|e| CaptureError::Stream(format!("Failed to spawn audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Microphone stream started");
                Ok(Box::new(CpalInputStream {
                    config: requested,
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                }))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::Stream(
                    "audio thread exited before the stream started".to_string(),
                ))
            }
        }
    }
}

fn build_stream(
    config: &InputConfig,
    sink: SampleSink,
    on_error: ErrorSink,
) -> Result<Stream, CaptureError> {
    let device = default_device()?;
    let supported = device
        .default_input_config()
        .map_err(|e| classify_backend_error(e.to_string()))?;
    let sample_format = supported.sample_format();
    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &stream_config, sink, on_error),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &stream_config, sink, on_error),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &stream_config, sink, on_error),
        other => Err(CaptureError::Stream(format!(
            "unsupported sample format {:?}",
            other
        ))),
    }
}

fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    mut sink: SampleSink,
    mut on_error: ErrorSink,
) -> Result<Stream, CaptureError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let mut mono: Vec<f32> = Vec::new();

    let err_fn = move |err: cpal::StreamError| {
        if let cpal::StreamError::DeviceNotAvailable = err {
            log::error!("Audio input device lost");
            on_error(CaptureError::DeviceLost);
        } else {
            // Transient (xruns and the like); the stream keeps running
            log::warn!("Audio stream error: {}", err);
        }
    };

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                downmix_into(data, channels, &mut mono);
                sink(&mono);
            },
            err_fn,
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => CaptureError::NoInputDevice,
            cpal::BuildStreamError::BackendSpecific { err } => {
                classify_backend_error(err.description)
            }
            other => CaptureError::Stream(other.to_string()),
        })
}

/// Average interleaved frames down to mono f32.
fn downmix_into<T>(data: &[T], channels: usize, out: &mut Vec<f32>)
where
    T: Copy,
    f32: FromSample<T>,
{
    out.clear();
    for frame in data.chunks(channels) {
        let sum: f32 = frame.iter().map(|&s| f32::from_sample_(s)).sum();
        out.push(sum / frame.len() as f32);
    }
}

/// Handle to a stream running on its own audio thread.
struct CpalInputStream {
    config: InputConfig,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl InputStream for CpalInputStream {
    fn config(&self) -> InputConfig {
        self.config
    }

    fn close(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Audio thread panicked");
            }
            log::info!("Microphone stream released");
        }
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.close();
    }
}
