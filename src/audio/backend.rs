//! Platform seam for microphone access
//!
//! The effect runner only talks to the microphone through `AudioBackend`,
//! so tests can substitute a scripted device.

use thiserror::Error;

/// Errors that can occur while acquiring or running the microphone.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Audio capture is not supported on this platform")]
    Unsupported,
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("No audio input device found")]
    NoInputDevice,
    #[error("Audio input device was disconnected")]
    DeviceLost,
    #[error("Audio stream failed: {0}")]
    Stream(String),
}

impl CaptureError {
    /// Message shown to the user when acquisition fails.
    pub fn user_message(&self) -> String {
        match self {
            CaptureError::Unsupported => crate::state_machine::UNSUPPORTED_MESSAGE.to_string(),
            CaptureError::PermissionDenied(_) => {
                "Microphone access denied. Check your permission settings.".to_string()
            }
            CaptureError::NoInputDevice => "No microphone found.".to_string(),
            CaptureError::DeviceLost => "The microphone was disconnected.".to_string(),
            CaptureError::Stream(e) => format!("Could not start recording: {}", e),
        }
    }
}

/// Negotiated input format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Receives mono f32 samples in [-1, 1] from the audio thread.
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Receives abnormal stream terminations from the audio thread.
pub type ErrorSink = Box<dyn FnMut(CaptureError) + Send + 'static>;

/// A live microphone stream.
/// Closing must be idempotent; dropping the stream closes it.
pub trait InputStream: Send {
    fn config(&self) -> InputConfig;
    fn close(&mut self);
}

/// Source of microphone streams.
///
/// Both calls may block (permission prompts, device negotiation), so the
/// runner invokes them from a blocking task.
pub trait AudioBackend: Send + Sync + 'static {
    /// Resolve the default input device's format, requesting access if needed.
    fn default_config(&self) -> Result<InputConfig, CaptureError>;

    /// Open and start a stream delivering samples to `sink`.
    fn open_input(
        &self,
        config: &InputConfig,
        sink: SampleSink,
        on_error: ErrorSink,
    ) -> Result<Box<dyn InputStream>, CaptureError>;
}
