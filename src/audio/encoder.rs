//! Chunking PCM encoder and artifact assembly
//!
//! The encoder turns processed mono samples into 16-bit little-endian PCM
//! segments, one per chunk interval of captured audio. Segments travel to the
//! state machine as messages; the final artifact is a WAV file assembled from
//! them in order once the encoder reports that it has stopped.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use hound::{WavSpec, WavWriter};
use tokio::sync::mpsc;

pub const WAV_MIME_TYPE: &str = "audio/wav";

/// Format of the encoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// One encoded segment (PCM16 LE).
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk(pub Vec<u8>);

impl Chunk {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chunk({} bytes)", self.0.len())
    }
}

/// Messages delivered from the encoder to the state loop, in order.
#[derive(Debug)]
pub enum EncoderMessage {
    Chunk(Chunk),
    /// Flush completed; no further chunk will follow.
    Stopped(AudioFormat),
    /// The capture stream terminated abnormally.
    Failed(String),
}

pub type EncoderSender = mpsc::UnboundedSender<EncoderMessage>;
pub type EncoderReceiver = mpsc::UnboundedReceiver<EncoderMessage>;

pub fn create_encoder_channel() -> (EncoderSender, EncoderReceiver) {
    mpsc::unbounded_channel()
}

pub struct ChunkEncoder {
    format: AudioFormat,
    bytes_per_chunk: usize,
    pending: Vec<u8>,
    paused: bool,
    finished: bool,
    tx: EncoderSender,
}

impl ChunkEncoder {
    pub fn new(format: AudioFormat, chunk_interval_ms: u64, tx: EncoderSender) -> Self {
        let samples_per_chunk = (u64::from(format.sample_rate) * u64::from(format.channels)
            * chunk_interval_ms
            / 1000)
            .max(1) as usize;
        let bytes_per_chunk = samples_per_chunk * 2;
        Self {
            format,
            bytes_per_chunk,
            pending: Vec::with_capacity(bytes_per_chunk),
            paused: false,
            finished: false,
            tx,
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Encode samples; dropped while paused or after flush/discard.
    pub fn push(&mut self, samples: &[f32]) {
        if self.paused || self.finished {
            return;
        }
        for &sample in samples {
            self.pending
                .extend_from_slice(&sample_to_i16(sample).to_le_bytes());
            if self.pending.len() >= self.bytes_per_chunk {
                self.emit_pending();
            }
        }
    }

    /// Deliver the partial chunk (if any), then the stop marker.
    pub fn flush(&mut self) {
        if self.finished {
            return;
        }
        self.emit_pending();
        self.finished = true;
        if self.tx.send(EncoderMessage::Stopped(self.format)).is_err() {
            log::warn!("Encoder stop marker dropped: receiver gone");
        }
    }

    /// Drop buffered audio without delivering it.
    pub fn discard(&mut self) {
        self.pending.clear();
        self.finished = true;
    }

    fn emit_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let bytes = std::mem::replace(&mut self.pending, Vec::with_capacity(self.bytes_per_chunk));
        if self.tx.send(EncoderMessage::Chunk(Chunk(bytes))).is_err() {
            log::warn!("Encoded chunk dropped: receiver gone");
        }
    }
}

/// Convert a float sample to i16, clamping out-of-range input.
fn sample_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

/// A finished recording: encoded bytes plus MIME type.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    data: Arc<[u8]>,
    mime_type: String,
}

impl Artifact {
    /// Build a WAV file from the chunks, in order.
    /// Zero chunks produce a valid header-only file.
    pub fn assemble(chunks: &[Chunk], format: AudioFormat) -> Result<Self, hound::Error> {
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec)?;
            for chunk in chunks {
                for pair in chunk.0.chunks_exact(2) {
                    writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
                }
            }
            writer.finalize()?;
        }

        Ok(Self {
            data: cursor.into_inner().into(),
            mime_type: WAV_MIME_TYPE.to_string(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn file_extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            WAV_MIME_TYPE => "wav",
            _ => "bin",
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}
