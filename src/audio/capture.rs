//! Resources owned by one capture session
//!
//! `CaptureResources` bundles the microphone stream, the processing graph
//! and the encoder. Finishing flushes the encoder after the stream has
//! stopped; releasing discards buffered audio. Both are idempotent, and
//! dropping the bundle releases it.

use std::sync::{Arc, Mutex, MutexGuard};

use super::analyser::AnalysisTap;
use super::backend::{AudioBackend, CaptureError, InputStream};
use super::encoder::{AudioFormat, ChunkEncoder, EncoderMessage, EncoderSender};
use super::graph::{GraphError, ProcessingGraph, ProcessingSettings};

/// Sample path executed on the audio thread.
pub struct CapturePipeline {
    graph: Option<ProcessingGraph>,
    encoder: ChunkEncoder,
    scratch: Vec<f32>,
}

impl CapturePipeline {
    pub fn new(graph: Option<ProcessingGraph>, encoder: ChunkEncoder) -> Self {
        Self {
            graph,
            encoder,
            scratch: Vec::new(),
        }
    }

    pub fn process(&mut self, samples: &[f32]) {
        self.scratch.clear();
        self.scratch.extend_from_slice(samples);
        if let Some(graph) = self.graph.as_mut() {
            graph.process(&mut self.scratch);
        }
        self.encoder.push(&self.scratch);
    }

    fn close_graph(&mut self) {
        if let Some(mut graph) = self.graph.take() {
            graph.close();
        }
    }
}

pub struct CaptureResources {
    stream: Option<Box<dyn InputStream>>,
    pipeline: Arc<Mutex<CapturePipeline>>,
    tap: Option<AnalysisTap>,
}

fn lock(pipeline: &Mutex<CapturePipeline>) -> MutexGuard<'_, CapturePipeline> {
    // A panic on the audio thread must not prevent teardown
    pipeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CaptureResources {
    /// Request the microphone, build the graph (falling back to the raw
    /// stream if that fails), and start encoding. Blocks until the platform
    /// answers the access request.
    pub fn open(
        backend: &dyn AudioBackend,
        processing: &ProcessingSettings,
        processing_available: bool,
        chunk_interval_ms: u64,
        encoder_tx: EncoderSender,
    ) -> Result<Self, CaptureError> {
        let config = backend.default_config()?;

        let graph = if processing_available {
            ProcessingGraph::build(processing, config.sample_rate)
        } else {
            Err(GraphError::Unavailable)
        };
        let graph = match graph {
            Ok(g) => Some(g),
            Err(e) => {
                log::warn!("Processing graph unavailable, recording raw stream: {}", e);
                None
            }
        };
        let tap = graph.as_ref().map(ProcessingGraph::tap);

        let format = AudioFormat {
            sample_rate: config.sample_rate,
            channels: 1,
        };
        let encoder = ChunkEncoder::new(format, chunk_interval_ms, encoder_tx.clone());
        let pipeline = Arc::new(Mutex::new(CapturePipeline::new(graph, encoder)));

        let sink_pipeline = pipeline.clone();
        let sink = Box::new(move |samples: &[f32]| lock(&sink_pipeline).process(samples));
        let on_error = Box::new(move |err: CaptureError| {
            let _ = encoder_tx.send(EncoderMessage::Failed(err.to_string()));
        });

        // On failure the graph and encoder are dropped with `pipeline`
        let stream = backend.open_input(&config, sink, on_error)?;
        let opened = stream.config();
        log::info!(
            "Input stream open: {} Hz, {} channel(s), {}",
            opened.sample_rate,
            opened.channels,
            if tap.is_some() { "processing graph" } else { "raw" }
        );

        Ok(Self {
            stream: Some(stream),
            pipeline,
            tap,
        })
    }

    /// Analysis tap, if the processing graph was built.
    pub fn tap(&self) -> Option<AnalysisTap> {
        self.tap.clone()
    }

    pub fn has_processing(&self) -> bool {
        self.tap.is_some()
    }

    pub fn set_paused(&self, paused: bool) {
        lock(&self.pipeline).encoder.set_paused(paused);
    }

    fn close_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
    }

    /// Stop the microphone, deliver the encoder's remaining audio and stop
    /// marker, and tear down the graph.
    pub fn finish(&mut self) {
        // No callback can run once the stream is closed, so nothing lands after the flush
        self.close_stream();
        let mut pipeline = lock(&self.pipeline);
        pipeline.encoder.flush();
        pipeline.close_graph();
    }

    /// Stop everything and discard buffered audio.
    pub fn release(&mut self) {
        self.close_stream();
        let mut pipeline = lock(&self.pipeline);
        pipeline.encoder.discard();
        pipeline.close_graph();
    }
}

impl Drop for CaptureResources {
    fn drop(&mut self) {
        self.release();
    }
}
