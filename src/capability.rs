//! Capability descriptor
//!
//! Computed once (usually at startup) and injected into the recorder, so that
//! `start()` never consults hidden global state.

use cpal::traits::HostTrait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The platform can open a microphone input stream.
    pub media_capture: bool,
    /// The platform can run the processing graph (gain, compressor, analysis tap).
    pub audio_processing: bool,
}

impl Capabilities {
    pub fn full() -> Self {
        Self {
            media_capture: true,
            audio_processing: true,
        }
    }

    pub fn unsupported() -> Self {
        Self {
            media_capture: false,
            audio_processing: false,
        }
    }

    /// Probe the default audio host for an input device.
    pub fn detect() -> Self {
        let host = cpal::default_host();
        let media_capture = host.default_input_device().is_some();
        log::info!(
            "Capabilities: host={:?}, media_capture={}",
            host.id(),
            media_capture
        );
        Self {
            media_capture,
            // The processing graph is pure in-process DSP
            audio_processing: true,
        }
    }

    /// Whether recording can be attempted at all.
    pub fn supported(&self) -> bool {
        self.media_capture
    }
}
