//! Chip calibration
//!
//! `CalibrationSettings` holds the base constants of one chip variant and the
//! *rules* that turn them into gain and thresholds. `ChipCalibration` is the
//! finalized, immutable result: every derived quantity is resolved in a single
//! `build` step, so a threshold can never lag behind a pedestal, gain or
//! capacitance change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::pulse::PulseShape;
use crate::response::TOT_TDC_TICKS;
use crate::units::{voltage_from_charge, voltage_from_photoelectrons, AdcCounts, Millivolts};
use crate::HgcrocError;

/// Full scale of the 10-bit ADC.
pub const ADC_CODES: f64 = 1024.0;

/// Largest ADC code the chip can report.
pub const ADC_MAX_CODE: u16 = 1023;

/// Electrons produced by a MIP crossing the silicon sensors.
pub const DEFAULT_ECAL_ELECTRONS_PER_MIP: f64 = 37_000.0;

/// Calorimeter flavour a calibration is prepared for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorVariant {
    /// Bare chip defaults, no detector-specific threshold convention
    Generic,
    /// Silicon electromagnetic calorimeter (thresholds in MIP equivalents)
    #[default]
    Ecal,
    /// Scintillator hadronic calorimeter (thresholds in photo-electrons)
    Hcal,
}

impl DetectorVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorVariant::Generic => "generic",
            DetectorVariant::Ecal => "ecal",
            DetectorVariant::Hcal => "hcal",
        }
    }
}

impl fmt::Display for DetectorVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorVariant {
    type Err = HgcrocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generic" => Ok(DetectorVariant::Generic),
            "ecal" | "electromagnetic" => Ok(DetectorVariant::Ecal),
            "hcal" | "hadronic" => Ok(DetectorVariant::Hcal),
            other => Err(HgcrocError::UnknownVariant(other.to_string())),
        }
    }
}

/// How the gain [mV / ADC] is obtained
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "value", rename_all = "snake_case")]
pub enum GainRule {
    /// maximum ADC range / pad capacitance / 1024
    Derived,
    /// Fixed by hand, independent of capacitance and ADC range
    Fixed(f64),
}

/// How a threshold is placed; resolved to an absolute voltage at finalization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ThresholdRule {
    /// Never crossed
    Disabled,
    /// Absolute voltage
    Voltage { millivolts: f64 },
    /// ADC counts above the pedestal
    CountsAbovePedestal { counts: f64 },
    /// Multiples of a MIP above the pedestal baseline
    Mips { multiple: f64, electrons_per_mip: f64 },
    /// Photo-electrons above the pedestal baseline
    Photoelectrons { pe: f64 },
}

impl ThresholdRule {
    fn resolve(&self, gain: f64, pedestal: f64, capacitance_pf: f64) -> Millivolts {
        let baseline = AdcCounts(pedestal).to_voltage(gain);
        match *self {
            ThresholdRule::Disabled => Millivolts(f64::INFINITY),
            ThresholdRule::Voltage { millivolts } => Millivolts(millivolts),
            ThresholdRule::CountsAbovePedestal { counts } => {
                AdcCounts(pedestal + counts).to_voltage(gain)
            }
            ThresholdRule::Mips {
                multiple,
                electrons_per_mip,
            } => baseline + voltage_from_charge(multiple * electrons_per_mip, capacitance_pf),
            ThresholdRule::Photoelectrons { pe } => baseline + voltage_from_photoelectrons(pe),
        }
    }

    fn check(&self, name: &str) -> Result<(), HgcrocError> {
        let ok = match *self {
            ThresholdRule::Disabled => true,
            ThresholdRule::Voltage { millivolts } => millivolts.is_finite(),
            ThresholdRule::CountsAbovePedestal { counts } => counts.is_finite(),
            ThresholdRule::Mips {
                multiple,
                electrons_per_mip,
            } => multiple.is_finite() && electrons_per_mip.is_finite() && electrons_per_mip > 0.0,
            ThresholdRule::Photoelectrons { pe } => pe.is_finite(),
        };
        if ok {
            Ok(())
        } else {
            Err(invalid(format!("{name} rule {self:?} is not physical")))
        }
    }
}

/// Linear model of the noise (in electrons) against pad capacitance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseModel {
    /// Noise when there is no capacitance [electrons]
    pub intercept: f64,
    /// Noise per unit capacitance [electrons / pF]
    pub slope: f64,
}

/// Base constants of one chip, before finalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSettings {
    /// Variant these settings were prepared for
    pub variant: DetectorVariant,
    /// Baseline readout of the chip [ADC counts]
    pub pedestal: f64,
    /// Cycle of the chip clock [ns]
    pub clock_cycle: f64,
    /// Time within the clock window the voltage is measured [ns]
    pub measurement_time: f64,
    /// Uncertainty on the chip clock [ns]
    pub timing_jitter: f64,
    /// Capacitance of one readout pad [pF]
    pub readout_pad_capacitance: f64,
    /// Largest charge the chip can read out [fC]
    pub max_adc_range: f64,
    /// Voltage samples per digi
    pub sample_count: usize,
    /// Index of the sample of interest within a digi
    pub sample_of_interest: usize,
    pub gain: GainRule,
    pub noise: NoiseModel,
    pub readout_threshold: ThresholdRule,
    pub toa_threshold: ThresholdRule,
    pub tot_threshold: ThresholdRule,
    /// Longest time over threshold the chip can measure [ns]
    pub tot_max_time: f64,
    /// Rate the pad drains during saturation [fC / ns]
    pub drain_rate: f64,
    /// Noise switch, only turned off for testing
    pub noise_enabled: bool,
    pub pulse_shape: PulseShape,
}

fn invalid(msg: impl Into<String>) -> HgcrocError {
    HgcrocError::InvalidCalibration(msg.into())
}

fn require_positive(name: &str, value: f64) -> Result<(), HgcrocError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be finite and > 0, got {value}")))
    }
}

fn require_non_negative(name: &str, value: f64) -> Result<(), HgcrocError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be finite and >= 0, got {value}")))
    }
}

/// The TOT range must leave a non-zero TDC tick.
fn require_tot_range(tot_max_time: f64) -> Result<(), HgcrocError> {
    require_positive("tot_max_time", tot_max_time)?;
    if tot_max_time / f64::from(TOT_TDC_TICKS) > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!(
            "tot_max_time {tot_max_time} is too small to split into {TOT_TDC_TICKS} TDC ticks"
        )))
    }
}

impl CalibrationSettings {
    /// Chip defaults with no detector threshold convention applied
    pub fn generic() -> Self {
        let clock_cycle = 25.0;
        let tot_max_time = 200.0;
        Self {
            variant: DetectorVariant::Generic,
            pedestal: 50.0,
            clock_cycle,
            measurement_time: 0.0,
            timing_jitter: clock_cycle / 100.0,
            readout_pad_capacitance: 20.0,
            max_adc_range: 320.0,
            sample_count: 10,
            sample_of_interest: 0,
            gain: GainRule::Derived,
            noise: NoiseModel {
                intercept: 700.0,
                slope: 25.0,
            },
            readout_threshold: ThresholdRule::CountsAbovePedestal { counts: 2.0 },
            toa_threshold: ThresholdRule::Disabled,
            tot_threshold: ThresholdRule::Disabled,
            tot_max_time,
            drain_rate: 10240.0 / tot_max_time,
            noise_enabled: true,
            pulse_shape: PulseShape::hgcroc(),
        }
    }

    /// Defaults for the requested detector variant
    pub fn preset(variant: DetectorVariant) -> Self {
        let mut settings = Self::generic();
        match variant {
            DetectorVariant::Generic => {}
            DetectorVariant::Ecal => {
                settings.variant = DetectorVariant::Ecal;
                settings.apply_mip_thresholds(DEFAULT_ECAL_ELECTRONS_PER_MIP);
            }
            DetectorVariant::Hcal => {
                settings.variant = DetectorVariant::Hcal;
                settings.apply_hadronic_thresholds();
            }
        }
        settings
    }

    pub fn set_pedestal(&mut self, pedestal: f64) -> Result<&mut Self, HgcrocError> {
        require_non_negative("pedestal", pedestal)?;
        self.pedestal = pedestal;
        Ok(self)
    }

    /// Changing the capacitance returns the gain to its derived value.
    pub fn set_readout_pad_capacitance(&mut self, capacitance_pf: f64) -> Result<&mut Self, HgcrocError> {
        require_positive("readout_pad_capacitance", capacitance_pf)?;
        self.readout_pad_capacitance = capacitance_pf;
        self.gain = GainRule::Derived;
        Ok(self)
    }

    /// Changing the ADC range returns the gain to its derived value.
    pub fn set_max_adc_range(&mut self, max_adc_range_fc: f64) -> Result<&mut Self, HgcrocError> {
        require_positive("max_adc_range", max_adc_range_fc)?;
        self.max_adc_range = max_adc_range_fc;
        self.gain = GainRule::Derived;
        Ok(self)
    }

    /// Pin the gain, decoupling it from capacitance and ADC range.
    pub fn set_gain(&mut self, gain: f64) -> Result<&mut Self, HgcrocError> {
        require_positive("gain", gain)?;
        self.gain = GainRule::Fixed(gain);
        Ok(self)
    }

    pub fn set_clock_cycle(&mut self, clock_cycle: f64) -> Result<&mut Self, HgcrocError> {
        require_positive("clock_cycle", clock_cycle)?;
        self.clock_cycle = clock_cycle;
        Ok(self)
    }

    pub fn set_measurement_time(&mut self, measurement_time: f64) -> Result<&mut Self, HgcrocError> {
        require_non_negative("measurement_time", measurement_time)?;
        self.measurement_time = measurement_time;
        Ok(self)
    }

    pub fn set_timing_jitter(&mut self, timing_jitter: f64) -> Result<&mut Self, HgcrocError> {
        require_non_negative("timing_jitter", timing_jitter)?;
        self.timing_jitter = timing_jitter;
        Ok(self)
    }

    pub fn set_sample_count(&mut self, sample_count: usize) -> Result<&mut Self, HgcrocError> {
        if sample_count == 0 {
            return Err(invalid("sample_count must be greater than zero"));
        }
        self.sample_count = sample_count;
        Ok(self)
    }

    pub fn set_sample_of_interest(&mut self, index: usize) -> Result<&mut Self, HgcrocError> {
        if index >= self.sample_count {
            return Err(invalid(format!(
                "sample_of_interest {index} out of range for {} samples",
                self.sample_count
            )));
        }
        self.sample_of_interest = index;
        Ok(self)
    }

    pub fn set_readout_threshold(&mut self, rule: ThresholdRule) -> Result<&mut Self, HgcrocError> {
        rule.check("readout_threshold")?;
        self.readout_threshold = rule;
        Ok(self)
    }

    pub fn set_toa_threshold(&mut self, rule: ThresholdRule) -> Result<&mut Self, HgcrocError> {
        rule.check("toa_threshold")?;
        self.toa_threshold = rule;
        Ok(self)
    }

    pub fn set_tot_threshold(&mut self, rule: ThresholdRule) -> Result<&mut Self, HgcrocError> {
        rule.check("tot_threshold")?;
        self.tot_threshold = rule;
        Ok(self)
    }

    pub fn set_tot_max_time(&mut self, tot_max_time: f64) -> Result<&mut Self, HgcrocError> {
        require_tot_range(tot_max_time)?;
        self.tot_max_time = tot_max_time;
        Ok(self)
    }

    pub fn set_drain_rate(&mut self, drain_rate: f64) -> Result<&mut Self, HgcrocError> {
        require_positive("drain_rate", drain_rate)?;
        self.drain_rate = drain_rate;
        Ok(self)
    }

    pub fn set_noise_enabled(&mut self, enabled: bool) -> &mut Self {
        self.noise_enabled = enabled;
        self
    }

    pub fn set_pulse_shape(&mut self, shape: PulseShape) -> Result<&mut Self, HgcrocError> {
        if !shape.is_finite() {
            return Err(invalid("pulse shape parameters must be finite"));
        }
        self.pulse_shape = shape;
        Ok(self)
    }

    /// Set the linear noise model.
    ///
    /// The noise RMS becomes `voltage_from_charge(intercept + slope * capacitance)`
    /// at finalization. Thresholds are not affected.
    pub fn set_noise(&mut self, intercept: f64, slope: f64) -> Result<&mut Self, HgcrocError> {
        require_non_negative("noise intercept", intercept)?;
        require_non_negative("noise slope", slope)?;
        self.noise = NoiseModel { intercept, slope };
        Ok(self)
    }

    /// MIP-based thresholds of the silicon calorimeter.
    ///
    /// - toa is 5 MIPs above the pedestal
    /// - tot is 50 MIPs above the pedestal
    ///
    /// Both are resolved against the final pedestal, gain and capacitance.
    pub fn set_threshold_defaults(&mut self, electrons_per_mip: f64) -> Result<&mut Self, HgcrocError> {
        require_positive("electrons_per_mip", electrons_per_mip)?;
        self.apply_mip_thresholds(electrons_per_mip);
        Ok(self)
    }

    /// Photo-electron based thresholds of the scintillator calorimeter.
    ///
    /// Sets pedestal 25, ADC range 8192 fC and pins the gain at 0.1 mV/ADC.
    /// Readout at 1 PE, toa at 0.1*68 PE, tot at 2*68 PE above the baseline.
    pub fn set_threshold_defaults_for_hadronic_variant(&mut self) -> &mut Self {
        self.apply_hadronic_thresholds();
        self
    }

    fn apply_mip_thresholds(&mut self, electrons_per_mip: f64) {
        self.toa_threshold = ThresholdRule::Mips {
            multiple: 5.0,
            electrons_per_mip,
        };
        self.tot_threshold = ThresholdRule::Mips {
            multiple: 50.0,
            electrons_per_mip,
        };
    }

    fn apply_hadronic_thresholds(&mut self) {
        self.pedestal = 25.0;
        // with cap = 20 pF: gain 0.4 <=> 8 pC range, gain 0.1 <=> 2 pC range
        self.max_adc_range = 8192.0;
        self.gain = GainRule::Fixed(0.1);
        // TODO: 0.1*68 and 2*68 PE come from an empirical MIP scale; confirm with the HCal test beam calibration.
        self.readout_threshold = ThresholdRule::Photoelectrons { pe: 1.0 };
        self.toa_threshold = ThresholdRule::Photoelectrons { pe: 0.1 * 68.0 };
        self.tot_threshold = ThresholdRule::Photoelectrons { pe: 2.0 * 68.0 };
    }

    /// Check every constant, including ones written directly to the fields.
    pub fn validate(&self) -> Result<(), HgcrocError> {
        require_non_negative("pedestal", self.pedestal)?;
        require_positive("clock_cycle", self.clock_cycle)?;
        require_non_negative("measurement_time", self.measurement_time)?;
        require_non_negative("timing_jitter", self.timing_jitter)?;
        require_positive("readout_pad_capacitance", self.readout_pad_capacitance)?;
        require_positive("max_adc_range", self.max_adc_range)?;
        if self.sample_count == 0 {
            return Err(invalid("sample_count must be greater than zero"));
        }
        if self.sample_of_interest >= self.sample_count {
            return Err(invalid(format!(
                "sample_of_interest {} out of range for {} samples",
                self.sample_of_interest, self.sample_count
            )));
        }
        if let GainRule::Fixed(gain) = self.gain {
            require_positive("gain", gain)?;
        }
        require_non_negative("noise intercept", self.noise.intercept)?;
        require_non_negative("noise slope", self.noise.slope)?;
        self.readout_threshold.check("readout_threshold")?;
        self.toa_threshold.check("toa_threshold")?;
        self.tot_threshold.check("tot_threshold")?;
        require_tot_range(self.tot_max_time)?;
        require_positive("drain_rate", self.drain_rate)?;
        if !self.pulse_shape.is_finite() {
            return Err(invalid("pulse shape parameters must be finite"));
        }
        Ok(())
    }

    /// Finalize: validate and resolve every derived quantity at once.
    pub fn build(&self) -> Result<ChipCalibration, HgcrocError> {
        self.validate()?;

        let capacitance = self.readout_pad_capacitance;
        let gain = match self.gain {
            GainRule::Derived => self.max_adc_range / capacitance / ADC_CODES,
            GainRule::Fixed(gain) => gain,
        };
        let noise_rms = voltage_from_charge(
            self.noise.intercept + self.noise.slope * capacitance,
            capacitance,
        );

        let calibration = ChipCalibration {
            settings: self.clone(),
            gain,
            noise_rms,
            readout_threshold: self.readout_threshold.resolve(gain, self.pedestal, capacitance),
            toa_threshold: self.toa_threshold.resolve(gain, self.pedestal, capacitance),
            tot_threshold: self.tot_threshold.resolve(gain, self.pedestal, capacitance),
        };

        tracing::debug!(
            variant = %self.variant,
            gain,
            noise_rms = noise_rms.0,
            readout_threshold = calibration.readout_threshold.0,
            toa_threshold = calibration.toa_threshold.0,
            tot_threshold = calibration.tot_threshold.0,
            "finalized chip calibration"
        );

        Ok(calibration)
    }
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self::generic()
    }
}

/// Finalized calibration, shared read-only by every channel of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CalibrationSettings", into = "CalibrationSettings")]
pub struct ChipCalibration {
    settings: CalibrationSettings,
    gain: f64,
    noise_rms: Millivolts,
    readout_threshold: Millivolts,
    toa_threshold: Millivolts,
    tot_threshold: Millivolts,
}

impl TryFrom<CalibrationSettings> for ChipCalibration {
    type Error = HgcrocError;

    fn try_from(settings: CalibrationSettings) -> Result<Self, Self::Error> {
        settings.build()
    }
}

impl From<ChipCalibration> for CalibrationSettings {
    fn from(calibration: ChipCalibration) -> Self {
        calibration.settings
    }
}

impl ChipCalibration {
    /// Finalized defaults for a variant
    pub fn for_variant(variant: DetectorVariant) -> Result<Self, HgcrocError> {
        CalibrationSettings::preset(variant).build()
    }

    /// Finalized defaults for a variant tag such as `"ecal"`
    pub fn from_tag(tag: &str) -> Result<Self, HgcrocError> {
        Self::for_variant(tag.parse()?)
    }

    /// Copy of the base settings, for building a modified calibration
    pub fn to_settings(&self) -> CalibrationSettings {
        self.settings.clone()
    }

    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    /// New calibration with `update` applied to the base settings.
    pub fn rebuild_with<F>(&self, update: F) -> Result<Self, HgcrocError>
    where
        F: FnOnce(&mut CalibrationSettings) -> Result<(), HgcrocError>,
    {
        let mut settings = self.to_settings();
        update(&mut settings)?;
        settings.build()
    }

    pub fn with_noise(&self, intercept: f64, slope: f64) -> Result<Self, HgcrocError> {
        self.rebuild_with(|s| s.set_noise(intercept, slope).map(|_| ()))
    }

    pub fn with_threshold_defaults(&self, electrons_per_mip: f64) -> Result<Self, HgcrocError> {
        self.rebuild_with(|s| s.set_threshold_defaults(electrons_per_mip).map(|_| ()))
    }

    pub fn with_hadronic_threshold_defaults(&self) -> Result<Self, HgcrocError> {
        self.rebuild_with(|s| {
            s.set_threshold_defaults_for_hadronic_variant();
            Ok(())
        })
    }

    pub fn variant(&self) -> DetectorVariant {
        self.settings.variant
    }

    /// Baseline [ADC counts]
    pub fn pedestal(&self) -> AdcCounts {
        AdcCounts(self.settings.pedestal)
    }

    /// Voltage of the pedestal baseline
    pub fn baseline(&self) -> Millivolts {
        self.pedestal().to_voltage(self.gain)
    }

    /// Conversion from ADC counts to voltage [mV / ADC]
    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Average noise of the chip
    pub fn noise_rms(&self) -> Millivolts {
        self.noise_rms
    }

    /// Minimum voltage for the chip to build a digi
    pub fn readout_threshold(&self) -> Millivolts {
        self.readout_threshold
    }

    /// Voltage at which the time of arrival is measured
    pub fn toa_threshold(&self) -> Millivolts {
        self.toa_threshold
    }

    /// Voltage at which the chip saturates and measures time over threshold
    pub fn tot_threshold(&self) -> Millivolts {
        self.tot_threshold
    }

    pub fn clock_cycle(&self) -> f64 {
        self.settings.clock_cycle
    }

    pub fn measurement_time(&self) -> f64 {
        self.settings.measurement_time
    }

    pub fn timing_jitter(&self) -> f64 {
        self.settings.timing_jitter
    }

    pub fn readout_pad_capacitance(&self) -> f64 {
        self.settings.readout_pad_capacitance
    }

    pub fn max_adc_range(&self) -> f64 {
        self.settings.max_adc_range
    }

    pub fn sample_count(&self) -> usize {
        self.settings.sample_count
    }

    pub fn sample_of_interest(&self) -> usize {
        self.settings.sample_of_interest
    }

    pub fn tot_max_time(&self) -> f64 {
        self.settings.tot_max_time
    }

    pub fn drain_rate(&self) -> f64 {
        self.settings.drain_rate
    }

    pub fn noise_enabled(&self) -> bool {
        self.settings.noise_enabled
    }

    pub fn pulse_shape(&self) -> &PulseShape {
        &self.settings.pulse_shape
    }

    /// Voltage of a number of electrons on this chip's readout pads
    pub fn voltage_from_charge(&self, electrons: f64) -> Millivolts {
        voltage_from_charge(electrons, self.settings.readout_pad_capacitance)
    }

    /// Quantize a voltage into an ADC code, clamped to the 10-bit range.
    pub fn adc_code(&self, voltage: Millivolts) -> u16 {
        let counts = voltage.to_adc(self.gain).value().floor();
        if counts.is_nan() || counts <= 0.0 {
            0
        } else if counts >= ADC_MAX_CODE as f64 {
            ADC_MAX_CODE
        } else {
            counts as u16
        }
    }
}
