//! Audio capture module
//!
//! Microphone access (CPAL), the processing graph, the chunking encoder,
//! and the visualizer feed.

pub mod analyser;
pub mod backend;
mod capture;
pub mod encoder;
pub mod graph;
pub mod microphone;
mod paths;
pub mod visualizer;

pub use analyser::{AnalysisTap, AnalyserSettings, VisualizerFrame};
pub use backend::{AudioBackend, CaptureError, ErrorSink, InputConfig, InputStream, SampleSink};
pub use capture::CaptureResources;
pub use encoder::{create_encoder_channel, Artifact, AudioFormat, Chunk, EncoderMessage, EncoderReceiver};
pub use graph::{CompressorSettings, GraphError, ProcessingSettings};
pub use microphone::CpalBackend;
pub use paths::{cleanup_old_playback, default_playback_dir, generate_playback_path, remove_playback_file};
pub use visualizer::{clear_frame, create_frame_channel, run_visualizer_feed, FrameReceiver, FrameSender};
