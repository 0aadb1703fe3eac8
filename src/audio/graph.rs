//! Audio processing graph
//!
//! microphone → gain → compressor → analysis tap → encoder
//!
//! A graph is built fresh for every capture and torn down when capture ends.
//! If it cannot be built the caller records the raw stream instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::analyser::{AnalysisTap, Analyser, AnalyserSettings};

#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("Audio processing is not available on this platform")]
    Unavailable,
    #[error("Audio processing is disabled")]
    Disabled,
    #[error("Invalid processing parameter: {0}")]
    InvalidParameter(String),
}

/// Speech-tuned dynamics compressor parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorSettings {
    pub threshold_db: f32,
    pub knee_db: f32,
    pub ratio: f32,
    pub attack_secs: f32,
    pub release_secs: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold_db: -50.0,
            knee_db: 40.0,
            ratio: 12.0,
            attack_secs: 0.003,
            release_secs: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub enabled: bool,
    /// Linear gain applied before compression (attenuation to avoid clipping).
    pub input_gain: f32,
    pub compressor: CompressorSettings,
    pub analyser: AnalyserSettings,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            input_gain: 0.8,
            compressor: CompressorSettings::default(),
            analyser: AnalyserSettings::default(),
        }
    }
}

fn amp_to_db(amp: f32) -> f32 {
    20.0 * amp.max(1e-9).log10()
}

fn db_to_amp(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Smoothing coefficient for a time constant; 0 means instantaneous.
fn time_constant_coeff(secs: f32, sample_rate: u32) -> f32 {
    if secs <= 0.0 {
        return 0.0;
    }
    (-1.0 / (secs * sample_rate as f32)).exp()
}

pub struct Compressor {
    threshold_db: f32,
    knee_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    /// Current (smoothed) gain reduction in dB, always <= 0.
    reduction_db: f32,
}

impl Compressor {
    pub fn new(settings: &CompressorSettings, sample_rate: u32) -> Result<Self, GraphError> {
        let finite = [
            settings.threshold_db,
            settings.knee_db,
            settings.ratio,
            settings.attack_secs,
            settings.release_secs,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(GraphError::InvalidParameter(
                "compressor parameters must be finite".to_string(),
            ));
        }
        if settings.ratio < 1.0 {
            return Err(GraphError::InvalidParameter(format!(
                "compressor ratio must be >= 1, got {}",
                settings.ratio
            )));
        }
        if settings.knee_db < 0.0 || settings.attack_secs < 0.0 || settings.release_secs < 0.0 {
            return Err(GraphError::InvalidParameter(
                "compressor knee, attack and release must be non-negative".to_string(),
            ));
        }

        Ok(Self {
            threshold_db: settings.threshold_db,
            knee_db: settings.knee_db,
            ratio: settings.ratio,
            attack_coeff: time_constant_coeff(settings.attack_secs, sample_rate),
            release_coeff: time_constant_coeff(settings.release_secs, sample_rate),
            reduction_db: 0.0,
        })
    }

    /// Static soft-knee curve: gain reduction (dB, <= 0) for an input level.
    pub fn gain_reduction_db(&self, input_db: f32) -> f32 {
        let over = input_db - self.threshold_db;
        let slope = 1.0 / self.ratio - 1.0;
        if 2.0 * over < -self.knee_db {
            0.0
        } else if self.knee_db > 0.0 && 2.0 * over.abs() <= self.knee_db {
            let x = over + self.knee_db / 2.0;
            slope * x * x / (2.0 * self.knee_db)
        } else {
            slope * over
        }
    }

    pub fn process(&mut self, block: &mut [f32]) {
        for s in block.iter_mut() {
            let target = self.gain_reduction_db(amp_to_db(s.abs()));
            // More reduction uses the attack constant, less uses release
            let coeff = if target < self.reduction_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.reduction_db = target + coeff * (self.reduction_db - target);
            *s *= db_to_amp(self.reduction_db);
        }
    }
}

pub struct ProcessingGraph {
    gain: f32,
    compressor: Compressor,
    tap: AnalysisTap,
}

impl ProcessingGraph {
    pub fn build(settings: &ProcessingSettings, sample_rate: u32) -> Result<Self, GraphError> {
        if !settings.enabled {
            return Err(GraphError::Disabled);
        }
        if sample_rate == 0 {
            return Err(GraphError::InvalidParameter("sample rate is zero".to_string()));
        }
        if !settings.input_gain.is_finite() || settings.input_gain < 0.0 {
            return Err(GraphError::InvalidParameter(format!(
                "input gain must be a non-negative number, got {}",
                settings.input_gain
            )));
        }

        let compressor = Compressor::new(&settings.compressor, sample_rate)?;
        let analyser = Analyser::new(settings.analyser)?;
        log::debug!(
            "Processing graph built: gain={}, fft_size={}, {} Hz",
            settings.input_gain,
            settings.analyser.fft_size,
            sample_rate
        );

        Ok(Self {
            gain: settings.input_gain,
            compressor,
            tap: AnalysisTap::new(analyser),
        })
    }

    pub fn tap(&self) -> AnalysisTap {
        self.tap.clone()
    }

    /// Run one block through gain and compression, then feed the tap.
    pub fn process(&mut self, block: &mut [f32]) {
        for s in block.iter_mut() {
            *s *= self.gain;
        }
        self.compressor.process(block);
        self.tap.push(block);
    }

    /// Tear down the graph. Safe to call more than once.
    pub fn close(&mut self) {
        if !self.tap.is_closed() {
            self.tap.close();
            log::debug!("Processing graph closed");
        }
    }
}

impl Drop for ProcessingGraph {
    fn drop(&mut self) {
        self.close();
    }
}
