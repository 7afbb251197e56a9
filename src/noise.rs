//! Per-channel noise streams
//!
//! Every channel draws its voltage noise and clock jitter from its own
//! `ChaCha8Rng` stream: the run seed picks the key, the channel id picks the
//! stream. Results therefore only depend on the seed, never on which thread
//! processed which channel.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::calibration::ChipCalibration;
use crate::units::Millivolts;
use crate::HgcrocError;

/// Stream index used for a channel's noise draws.
pub fn noise_stream_index(channel: u32) -> u64 {
    2 * channel as u64 + 1
}

/// Stream index used for a channel's deposit draws in the simulation harness.
pub fn deposit_stream_index(channel: u32) -> u64 {
    2 * channel as u64
}

/// Seeded generator for one channel and one purpose.
pub fn channel_rng(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

/// Gaussian noise and jitter source for one channel
#[derive(Debug, Clone)]
pub struct NoiseStream {
    rng: ChaCha8Rng,
    voltage: Option<Normal<f64>>,
    jitter: Option<Normal<f64>>,
}

impl NoiseStream {
    /// Stream for `channel` of a run seeded with `seed`.
    ///
    /// When the calibration has noise disabled the stream yields zeros.
    pub fn for_channel(
        calibration: &ChipCalibration,
        seed: u64,
        channel: u32,
    ) -> Result<Self, HgcrocError> {
        let rng = channel_rng(seed, noise_stream_index(channel));
        if !calibration.noise_enabled() {
            return Ok(Self::silent_with(rng));
        }

        let voltage = Normal::new(0.0, calibration.noise_rms().value())
            .map_err(|e| HgcrocError::InvalidCalibration(format!("noise RMS: {e}")))?;
        let jitter = Normal::new(0.0, calibration.timing_jitter())
            .map_err(|e| HgcrocError::InvalidCalibration(format!("timing jitter: {e}")))?;

        Ok(Self {
            rng,
            voltage: Some(voltage),
            jitter: Some(jitter),
        })
    }

    /// Stream that never adds noise or jitter
    pub fn silent() -> Self {
        Self::silent_with(ChaCha8Rng::seed_from_u64(0))
    }

    fn silent_with(rng: ChaCha8Rng) -> Self {
        Self {
            rng,
            voltage: None,
            jitter: None,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.voltage.is_none() && self.jitter.is_none()
    }

    /// Next voltage noise sample
    pub fn next_voltage(&mut self) -> Millivolts {
        match &self.voltage {
            Some(dist) => Millivolts(dist.sample(&mut self.rng)),
            None => Millivolts(0.0),
        }
    }

    /// Next clock jitter sample [ns]
    pub fn next_jitter(&mut self) -> f64 {
        match &self.jitter {
            Some(dist) => dist.sample(&mut self.rng),
            None => 0.0,
        }
    }
}
