//! Simulation harness
//!
//! Generates synthetic deposits for a block of channels and pushes them
//! through the channel response, one window per event.

use rand::Rng;
use rand_distr::{Distribution, Exp, Normal, Poisson};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};
use tracing::{info, warn};

use crate::calibration::{ChipCalibration, DetectorVariant, DEFAULT_ECAL_ELECTRONS_PER_MIP};
use crate::noise::{channel_rng, deposit_stream_index, NoiseStream};
use crate::response::{ChannelResponse, Deposit, Hit};
use crate::sample::DigiSample;
use crate::HgcrocError;

/// Simulation configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Channels on the chip
    #[serde_as(as = "DefaultOnNull")]
    pub channels: u32,
    /// Windows digitized per channel
    #[serde_as(as = "DefaultOnNull")]
    pub events: usize,
    /// Probability that a channel is hit in a given event
    #[serde_as(as = "DefaultOnNull")]
    pub occupancy: f64,
    /// Mean of the exponential MIP-count spectrum (silicon variants)
    #[serde_as(as = "DefaultOnNull")]
    pub mean_mips: f64,
    #[serde_as(as = "DefaultOnNull")]
    pub electrons_per_mip: f64,
    /// Poisson mean of the photo-electron count (scintillator variant)
    #[serde_as(as = "DefaultOnNull")]
    pub mean_photoelectrons: f64,
    /// Gaussian spread of hit times around the measurement time [ns]
    #[serde_as(as = "DefaultOnNull")]
    pub hit_time_spread: f64,
    #[serde_as(as = "DefaultOnNull")]
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            channels: 72,
            events: 100,
            occupancy: 0.3,
            mean_mips: 5.0,
            electrons_per_mip: DEFAULT_ECAL_ELECTRONS_PER_MIP,
            mean_photoelectrons: 20.0,
            hit_time_spread: 1.0,
            seed: 42,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), HgcrocError> {
        if self.channels == 0 {
            return Err(HgcrocError::InvalidConfig(
                "channels must be greater than zero".to_string(),
            ));
        }

        if self.events == 0 {
            return Err(HgcrocError::InvalidConfig(
                "events must be greater than zero".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.occupancy) {
            return Err(HgcrocError::InvalidConfig(
                "occupancy must lie in [0, 1]".to_string(),
            ));
        }

        let positive = [
            ("mean_mips", self.mean_mips),
            ("electrons_per_mip", self.electrons_per_mip),
            ("mean_photoelectrons", self.mean_photoelectrons),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(HgcrocError::InvalidConfig(format!(
                    "{name} must be finite and positive, got {value}"
                )));
            }
        }

        if !(self.hit_time_spread.is_finite() && self.hit_time_spread >= 0.0) {
            return Err(HgcrocError::InvalidConfig(
                "hit_time_spread must be finite and non-negative".to_string(),
            ));
        }

        Ok(())
    }
}

/// One read-out sample together with what produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigiRecord {
    pub event: usize,
    pub channel: u32,
    pub hit: Hit,
    pub sample: DigiSample,
}

/// Aggregate counts over a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimSummary {
    pub variant: DetectorVariant,
    pub seed: u64,
    pub channels: u32,
    pub events: usize,
    pub noise_enabled: bool,
    pub windows: usize,
    pub below_threshold: usize,
    pub normal_samples: usize,
    pub tot_samples: usize,
    pub toa_crossings: usize,
    pub truncated_tot: usize,
    /// Mean ADC of non-saturated samples
    pub mean_adc: f64,
    /// Longest drain seen [ns]
    pub max_tot_duration: f64,
}

/// Result of a run
#[derive(Debug, Clone)]
pub struct SimRun {
    /// Read-out samples sorted by (event, channel)
    pub records: Vec<DigiRecord>,
    pub summary: SimSummary,
}

/// Deposit spectrum for the calibration's detector variant
enum Spectrum {
    Mips { count: Exp<f64>, electrons_per_mip: f64 },
    Photoelectrons(Poisson<f64>),
}

impl Spectrum {
    fn for_variant(variant: DetectorVariant, config: &SimConfig) -> Result<Self, HgcrocError> {
        match variant {
            DetectorVariant::Hcal => Poisson::new(config.mean_photoelectrons)
                .map(Spectrum::Photoelectrons)
                .map_err(|e| HgcrocError::InvalidConfig(format!("mean_photoelectrons: {e}"))),
            DetectorVariant::Ecal | DetectorVariant::Generic => Exp::new(1.0 / config.mean_mips)
                .map(|count| Spectrum::Mips {
                    count,
                    electrons_per_mip: config.electrons_per_mip,
                })
                .map_err(|e| HgcrocError::InvalidConfig(format!("mean_mips: {e}"))),
        }
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> Deposit {
        match self {
            Spectrum::Mips { count, electrons_per_mip } => {
                Deposit::Electrons(count.sample(rng) * electrons_per_mip)
            }
            Spectrum::Photoelectrons(pe) => Deposit::Photoelectrons(pe.sample(rng)),
        }
    }

    fn empty(&self) -> Deposit {
        match self {
            Spectrum::Mips { .. } => Deposit::Electrons(0.0),
            Spectrum::Photoelectrons(_) => Deposit::Photoelectrons(0.0),
        }
    }
}

fn simulate_channel(
    calibration: &ChipCalibration,
    config: &SimConfig,
    spectrum: &Spectrum,
    timing: &Normal<f64>,
    channel: u32,
) -> Result<Vec<DigiRecord>, HgcrocError> {
    let mut rng = channel_rng(config.seed, deposit_stream_index(channel));
    let mut noise = NoiseStream::for_channel(calibration, config.seed, channel)?;
    let mut response = ChannelResponse::new(calibration);
    let mut records = Vec::new();

    for event in 0..config.events {
        // Draw every variate each event so the stream position never depends on occupancy
        let occupied = rng.gen::<f64>() < config.occupancy;
        let deposit = spectrum.draw(&mut rng);
        let time = calibration.measurement_time() + timing.sample(&mut rng);

        let hit = Hit {
            deposit: if occupied { deposit } else { spectrum.empty() },
            time,
        };
        if let Some(sample) = response.digitize_hit(&hit, &mut noise) {
            records.push(DigiRecord {
                event,
                channel,
                hit,
                sample,
            });
        }
    }

    Ok(records)
}

fn summarize(calibration: &ChipCalibration, config: &SimConfig, records: &[DigiRecord]) -> SimSummary {
    let windows = config.channels as usize * config.events;
    let tot: Vec<_> = records.iter().filter_map(|r| r.sample.tot).collect();
    let adc: Vec<f64> = records
        .iter()
        .filter(|r| !r.sample.is_tot())
        .map(|r| f64::from(r.sample.adc_t))
        .collect();

    SimSummary {
        variant: calibration.variant(),
        seed: config.seed,
        channels: config.channels,
        events: config.events,
        noise_enabled: calibration.noise_enabled(),
        windows,
        below_threshold: windows - records.len(),
        normal_samples: adc.len(),
        tot_samples: tot.len(),
        toa_crossings: records.iter().filter(|r| r.sample.toa_crossed).count(),
        truncated_tot: tot.iter().filter(|t| t.truncated).count(),
        mean_adc: if adc.is_empty() {
            0.0
        } else {
            adc.iter().sum::<f64>() / adc.len() as f64
        },
        max_tot_duration: tot.iter().map(|t| t.drain_duration).fold(0.0, f64::max),
    }
}

/// Digitize `config.events` windows on every channel.
///
/// Channels run in parallel; each owns its deposit and noise streams, so the
/// result depends only on the seed.
pub fn run_simulation(calibration: &ChipCalibration, config: &SimConfig) -> Result<SimRun, HgcrocError> {
    config.validate()?;

    let spectrum = Spectrum::for_variant(calibration.variant(), config)?;
    let timing = Normal::new(0.0, config.hit_time_spread)
        .map_err(|e| HgcrocError::InvalidConfig(format!("hit_time_spread: {e}")))?;

    if !calibration.noise_enabled() {
        warn!("noise disabled: samples are noiseless and jitter-free");
    }
    info!(
        variant = %calibration.variant(),
        channels = config.channels,
        events = config.events,
        seed = config.seed,
        "starting simulation"
    );

    let per_channel = (0..config.channels)
        .into_par_iter()
        .map(|channel| simulate_channel(calibration, config, &spectrum, &timing, channel))
        .collect::<Result<Vec<_>, _>>()?;

    let mut records: Vec<DigiRecord> = per_channel.into_iter().flatten().collect();
    records.sort_by_key(|r| (r.event, r.channel));

    let summary = summarize(calibration, config, &records);
    info!(
        readouts = records.len(),
        tot = summary.tot_samples,
        mean_adc = summary.mean_adc,
        "simulation complete"
    );

    Ok(SimRun { records, summary })
}
