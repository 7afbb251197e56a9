use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

use crate::calibration::{CalibrationSettings, ChipCalibration, DetectorVariant, NoiseModel, ThresholdRule};
use crate::sim::SimConfig;
use crate::HgcrocError;

/// Run configuration of the `hgcroc-digitize` binary.
///
/// Starts from the variant's preset; every calibration field left out (or
/// `null`) keeps the preset value.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigitizerConfig {
    #[serde_as(as = "DefaultOnNull")]
    pub variant: DetectorVariant,
    pub pedestal: Option<f64>,
    pub readout_pad_capacitance: Option<f64>,
    pub max_adc_range: Option<f64>,
    /// Pins the gain; otherwise it follows capacitance and ADC range
    pub gain: Option<f64>,
    pub clock_cycle: Option<f64>,
    pub measurement_time: Option<f64>,
    pub timing_jitter: Option<f64>,
    pub tot_max_time: Option<f64>,
    pub drain_rate: Option<f64>,
    pub noise: Option<NoiseModel>,
    #[serde_as(as = "DefaultOnNull")]
    pub noise_enabled: bool,
    /// Re-derive the MIP thresholds with this MIP scale
    pub electrons_per_mip: Option<f64>,
    pub readout_threshold: Option<ThresholdRule>,
    pub toa_threshold: Option<ThresholdRule>,
    pub tot_threshold: Option<ThresholdRule>,
    #[serde_as(as = "DefaultOnNull")]
    pub sim: SimConfig,
}

impl Default for DigitizerConfig {
    fn default() -> Self {
        Self {
            variant: DetectorVariant::Ecal,
            pedestal: None,
            readout_pad_capacitance: None,
            max_adc_range: None,
            gain: None,
            clock_cycle: None,
            measurement_time: None,
            timing_jitter: None,
            tot_max_time: None,
            drain_rate: None,
            noise: None,
            noise_enabled: true,
            electrons_per_mip: None,
            readout_threshold: None,
            toa_threshold: None,
            tot_threshold: None,
            sim: SimConfig::default(),
        }
    }
}

impl DigitizerConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, HgcrocError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HgcrocError> {
        self.sim.validate()?;
        self.settings()?.validate()
    }

    /// Preset of the variant with the overrides applied, not yet finalized.
    pub fn settings(&self) -> Result<CalibrationSettings, HgcrocError> {
        let mut settings = CalibrationSettings::preset(self.variant);

        if let Some(v) = self.pedestal {
            settings.set_pedestal(v)?;
        }
        // capacitance and range reset the gain rule, so a pinned gain goes last
        if let Some(v) = self.readout_pad_capacitance {
            settings.set_readout_pad_capacitance(v)?;
        }
        if let Some(v) = self.max_adc_range {
            settings.set_max_adc_range(v)?;
        }
        if let Some(v) = self.gain {
            settings.set_gain(v)?;
        }
        if let Some(v) = self.clock_cycle {
            settings.set_clock_cycle(v)?;
        }
        if let Some(v) = self.measurement_time {
            settings.set_measurement_time(v)?;
        }
        if let Some(v) = self.timing_jitter {
            settings.set_timing_jitter(v)?;
        }
        if let Some(v) = self.tot_max_time {
            settings.set_tot_max_time(v)?;
        }
        if let Some(v) = self.drain_rate {
            settings.set_drain_rate(v)?;
        }
        if let Some(noise) = self.noise {
            settings.set_noise(noise.intercept, noise.slope)?;
        }
        settings.set_noise_enabled(self.noise_enabled);

        if let Some(e) = self.electrons_per_mip {
            settings.set_threshold_defaults(e)?;
        }
        if let Some(rule) = self.readout_threshold {
            settings.set_readout_threshold(rule)?;
        }
        if let Some(rule) = self.toa_threshold {
            settings.set_toa_threshold(rule)?;
        }
        if let Some(rule) = self.tot_threshold {
            settings.set_tot_threshold(rule)?;
        }

        Ok(settings)
    }

    pub fn calibration(&self) -> Result<ChipCalibration, HgcrocError> {
        self.settings()?.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let config: DigitizerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DigitizerConfig::default());
        let cal = config.calibration().unwrap();
        assert_eq!(cal, ChipCalibration::for_variant(DetectorVariant::Ecal).unwrap());
    }

    #[test]
    fn test_null_fields_fall_back_to_defaults() {
        let raw = r#"{ "variant": null, "noise_enabled": null, "sim": null, "pedestal": null }"#;
        let config: DigitizerConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config, DigitizerConfig::default());
    }

    #[test]
    fn test_overrides_apply() {
        let raw = r#"{
            "variant": "hcal",
            "pedestal": 30,
            "noise_enabled": false,
            "tot_threshold": { "rule": "photoelectrons", "pe": 100 },
            "sim": { "channels": 4, "events": 10 }
        }"#;
        let config: DigitizerConfig = serde_json::from_str(raw).unwrap();
        let cal = config.calibration().unwrap();
        assert_eq!(cal.variant(), DetectorVariant::Hcal);
        assert_eq!(cal.pedestal().value(), 30.0);
        assert!(!cal.noise_enabled());
        // baseline 3 mV + 100 PE * 5 mV
        assert!((cal.tot_threshold().value() - 503.0).abs() < 1e-9);
        assert_eq!(config.sim.channels, 4);
        assert_eq!(config.sim.seed, SimConfig::default().seed);
    }

    #[test]
    fn test_pinned_gain_survives_capacitance_override() {
        let config = DigitizerConfig {
            readout_pad_capacitance: Some(40.0),
            gain: Some(0.2),
            ..Default::default()
        };
        assert_eq!(config.calibration().unwrap().gain(), 0.2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = DigitizerConfig {
            readout_pad_capacitance: Some(-1.0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(HgcrocError::InvalidCalibration(_))
        ));

        let mut config = DigitizerConfig::default();
        config.sim.events = 0;
        assert!(matches!(config.validate(), Err(HgcrocError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_variant_fails_to_parse() {
        let raw = r#"{ "variant": "muon" }"#;
        assert!(serde_json::from_str::<DigitizerConfig>(raw).is_err());
    }
}
