//! Frequency-domain analysis tap
//!
//! Keeps the most recent `fft_size` samples and, on demand, turns them into
//! a byte-scaled magnitude spectrum: Blackman window, FFT, magnitude / N,
//! exponential smoothing against the previous snapshot, then a linear map of
//! the dB value from [min_db, max_db] onto 0..=255.

use std::sync::{Arc, Mutex};

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use super::graph::GraphError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserSettings {
    /// Transform size; must be a power of two in 32..=32768.
    pub fft_size: usize,
    /// Weight of the previous snapshot, 0.0..=1.0.
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl Default for AnalyserSettings {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
            min_db: -100.0,
            max_db: -30.0,
        }
    }
}

/// Latest amplitude-bin snapshot published to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VisualizerFrame {
    pub bins: Vec<u8>,
}

impl VisualizerFrame {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

pub struct Analyser {
    settings: AnalyserSettings,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    ring: Vec<f32>,
    write_pos: usize,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl Analyser {
    pub fn new(settings: AnalyserSettings) -> Result<Self, GraphError> {
        let n = settings.fft_size;
        if !n.is_power_of_two() || !(32..=32768).contains(&n) {
            return Err(GraphError::InvalidParameter(format!(
                "fft_size must be a power of two in 32..=32768, got {}",
                n
            )));
        }
        if !(0.0..=1.0).contains(&settings.smoothing) {
            return Err(GraphError::InvalidParameter(format!(
                "smoothing must be within 0..=1, got {}",
                settings.smoothing
            )));
        }
        if !(settings.min_db < settings.max_db) {
            return Err(GraphError::InvalidParameter(format!(
                "min_db ({}) must be below max_db ({})",
                settings.min_db, settings.max_db
            )));
        }

        let fft = FftPlanner::new().plan_fft_forward(n);
        Ok(Self {
            settings,
            fft,
            window: blackman_window(n),
            ring: vec![0.0; n],
            write_pos: 0,
            smoothed: vec![0.0; n / 2],
            scratch: vec![Complex::new(0.0, 0.0); n],
        })
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.settings.fft_size / 2
    }

    pub fn push(&mut self, samples: &[f32]) {
        let n = self.ring.len();
        for &s in samples {
            self.ring[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % n;
        }
    }

    pub fn snapshot(&mut self) -> VisualizerFrame {
        let n = self.ring.len();
        // Oldest sample first
        for i in 0..n {
            let s = self.ring[(self.write_pos + i) % n];
            self.scratch[i] = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let tau = self.settings.smoothing;
        let range = self.settings.max_db - self.settings.min_db;
        let bins = self
            .smoothed
            .iter_mut()
            .zip(self.scratch.iter())
            .map(|(prev, c)| {
                let magnitude = c.norm() / n as f32;
                *prev = tau * *prev + (1.0 - tau) * magnitude;
                let db = 20.0 * prev.max(1e-12).log10();
                let scaled = (db - self.settings.min_db) / range * 255.0;
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect();

        VisualizerFrame { bins }
    }

    pub fn reset(&mut self) {
        self.ring.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
    }
}

fn blackman_window(n: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42f32, 0.5f32, 0.08f32);
    (0..n)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
            a0 - a1 * x.cos() + a2 * (2.0 * x).cos()
        })
        .collect()
}

/// Shared read side of the analyser, sampled by the visualizer feed.
/// Returns empty frames once the graph has been torn down.
#[derive(Clone)]
pub struct AnalysisTap {
    inner: Arc<Mutex<Option<Analyser>>>,
}

impl AnalysisTap {
    pub(crate) fn new(analyser: Analyser) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(analyser))),
        }
    }

    pub(crate) fn push(&self, samples: &[f32]) {
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(analyser) = guard.as_mut() {
                analyser.push(samples);
            }
        }
    }

    pub fn snapshot(&self) -> VisualizerFrame {
        match self.inner.lock() {
            Ok(mut guard) => guard
                .as_mut()
                .map(Analyser::snapshot)
                .unwrap_or_default(),
            Err(_) => VisualizerFrame::empty(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|g| g.is_none()).unwrap_or(true)
    }

    pub(crate) fn close(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.take();
        }
    }
}
