//! HGCROC - readout-chip emulation
//!
//! Models how the HGCROC front-end ASIC turns the charge collected on a
//! calorimeter readout pad (or the photo-electrons of a scintillator
//! channel) into a digitized sample: pedestal, gain, noise, readout and
//! time-of-arrival thresholds, and the time-over-threshold saturation mode.

pub mod calibration;
pub mod config;
pub mod noise;
pub mod output;
pub mod pulse;
pub mod response;
pub mod sample;
pub mod sim;
pub mod units;

use thiserror::Error;

// Re-export main types
pub use calibration::{
    CalibrationSettings, ChipCalibration, DetectorVariant, GainRule, NoiseModel, ThresholdRule,
};
pub use config::DigitizerConfig;
pub use noise::NoiseStream;
pub use output::{create_timestamped_output_dir, write_run_into_dir, RunOutputs};
pub use pulse::PulseShape;
pub use response::{digitize, ChannelResponse, ChannelState, Deposit, Hit, TotDrain};
pub use sample::{DigiSample, SampleWord, TotRecord};
pub use sim::{run_simulation, DigiRecord, SimConfig, SimRun, SimSummary};
pub use units::{voltage_from_charge, voltage_from_photoelectrons, AdcCounts, Femtocoulombs, Millivolts};

#[derive(Debug, Error)]
pub enum HgcrocError {
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),
    #[error("unknown detector variant: {0}")]
    UnknownVariant(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
