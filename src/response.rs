//! Channel response
//!
//! Turns the deposit in one channel into a digitized sample. Each channel owns
//! a small state machine that is reset at the start of every digitization
//! window:
//!
//! - `BelowThreshold`: nothing read out
//! - `NormalSample`: voltage at or above the readout threshold, ADC mode
//! - `TimeOverThreshold`: voltage at or above the TOT threshold; the pad
//!   drains at the calibration's drain rate until the charge falls back under
//!   the threshold or the maximum TOT elapses, after which the channel is
//!   back to `BelowThreshold`
//!
//! The drain is resolved within the window that saturated, so callers only
//! ever observe the first two states between windows.

use serde::{Deserialize, Serialize};

use crate::calibration::{ChipCalibration, ADC_MAX_CODE};
use crate::noise::NoiseStream;
use crate::sample::{DigiSample, TotRecord};
use crate::units::{voltage_from_photoelectrons, Femtocoulombs, Millivolts};

/// Ticks of the 12-bit TDC spanning the maximum TOT.
pub const TOT_TDC_TICKS: u32 = 4096;

/// Ticks of the 10-bit TOA TDC spanning one clock cycle.
pub const TOA_TDC_TICKS: u32 = 1024;

/// Raw signal delivered to one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum Deposit {
    /// Electrons (or e-h pairs) collected on a silicon pad
    Electrons(f64),
    /// Photo-electrons from a scintillator bar
    Photoelectrons(f64),
}

impl Deposit {
    /// Amplitude of the shaper pulse above the pedestal baseline
    pub fn signal(&self, calibration: &ChipCalibration) -> Millivolts {
        match *self {
            Deposit::Electrons(n) => calibration.voltage_from_charge(n),
            Deposit::Photoelectrons(pe) => voltage_from_photoelectrons(pe),
        }
    }

    pub fn amount(&self) -> f64 {
        match *self {
            Deposit::Electrons(n) | Deposit::Photoelectrons(n) => n,
        }
    }
}

/// A deposit arriving at a given time within the clock window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub deposit: Deposit,
    /// Arrival time relative to the start of the window [ns]
    pub time: f64,
}

/// Progress of the pad drain while saturated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TotDrain {
    /// Time the TOT threshold was crossed [ns]
    pub entry_time: f64,
    /// Charge still above the TOT threshold
    pub excess_charge: Femtocoulombs,
    /// Time spent draining so far [ns]
    pub elapsed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainStatus {
    Draining,
    Recovered,
    TimedOut,
}

impl TotDrain {
    fn new(entry_time: f64, excess_charge: Femtocoulombs) -> Self {
        Self {
            entry_time,
            excess_charge,
            elapsed: 0.0,
        }
    }

    fn step(&mut self, dt: f64, drain_rate: f64, tot_max_time: f64) -> DrainStatus {
        self.elapsed += dt;
        self.excess_charge = self.excess_charge - Femtocoulombs(drain_rate * dt);

        if self.excess_charge.value() < 0.0 {
            DrainStatus::Recovered
        } else if self.elapsed >= tot_max_time {
            DrainStatus::TimedOut
        } else {
            DrainStatus::Draining
        }
    }

    fn record(&self, truncated: bool, tot_max_time: f64) -> TotRecord {
        let duration = self.elapsed.min(tot_max_time);
        let tick = tot_max_time / TOT_TDC_TICKS as f64;
        let counts = (duration / tick).round().min((TOT_TDC_TICKS - 1) as f64);
        TotRecord {
            entry_time: self.entry_time,
            drain_duration: duration,
            tdc_counts: counts as u16,
            truncated,
        }
    }
}

/// State of one channel within the current window
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ChannelState {
    #[default]
    BelowThreshold,
    NormalSample,
    TimeOverThreshold(TotDrain),
}

/// Response model of one channel, borrowing the shared calibration
#[derive(Debug, Clone)]
pub struct ChannelResponse<'a> {
    calibration: &'a ChipCalibration,
    state: ChannelState,
}

impl<'a> ChannelResponse<'a> {
    pub fn new(calibration: &'a ChipCalibration) -> Self {
        Self {
            calibration,
            state: ChannelState::BelowThreshold,
        }
    }

    pub fn calibration(&self) -> &'a ChipCalibration {
        self.calibration
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// Start a new digitization window.
    pub fn begin_window(&mut self) {
        self.state = ChannelState::BelowThreshold;
    }

    /// Digitize a deposit sampled at the pulse peak with a given noise value.
    pub fn digitize(&mut self, deposit: Deposit, noise: Millivolts) -> Option<DigiSample> {
        let signal = deposit.signal(self.calibration);
        self.digitize_signal(signal, noise)
    }

    /// Digitize a pulse amplitude sampled at its peak.
    pub fn digitize_signal(&mut self, signal: Millivolts, noise: Millivolts) -> Option<DigiSample> {
        let t = self.calibration.measurement_time();
        self.sample_window(signal, t, t, noise)
    }

    /// Digitize a timed hit, drawing noise and clock jitter from `stream`.
    ///
    /// The shaped pulse is sampled at the measurement time shifted by the jitter.
    pub fn digitize_hit(&mut self, hit: &Hit, stream: &mut NoiseStream) -> Option<DigiSample> {
        let noise = stream.next_voltage();
        let sample_time = self.calibration.measurement_time() + stream.next_jitter();
        let signal = hit.deposit.signal(self.calibration);
        self.sample_window(signal, hit.time, sample_time, noise)
    }

    /// One drain step of `dt` ns; yields the record once the channel is back below threshold.
    fn advance(&mut self, dt: f64) -> Option<TotRecord> {
        let cal = self.calibration;
        if !(dt > 0.0) {
            return None;
        }
        let ChannelState::TimeOverThreshold(drain) = &mut self.state else {
            return None;
        };

        match drain.step(dt, cal.drain_rate(), cal.tot_max_time()) {
            DrainStatus::Draining => None,
            status => {
                let record = drain.record(status == DrainStatus::TimedOut, cal.tot_max_time());
                self.state = ChannelState::BelowThreshold;
                Some(record)
            }
        }
    }

    fn sample_window(
        &mut self,
        amplitude: Millivolts,
        hit_time: f64,
        sample_time: f64,
        noise: Millivolts,
    ) -> Option<DigiSample> {
        self.begin_window();

        let cal = self.calibration;
        let baseline = cal.baseline();
        let noise = if cal.noise_enabled() { noise } else { Millivolts(0.0) };
        let voltage = baseline + cal.pulse_shape().at(amplitude, hit_time, sample_time) + noise;

        // NaN and infinities never cross, so a disabled (+inf) threshold stays uncrossed
        if !voltage.value().is_finite() || !(voltage >= cal.readout_threshold()) {
            return None;
        }
        self.state = ChannelState::NormalSample;

        let toa_crossed = voltage >= cal.toa_threshold();
        let toa = if toa_crossed {
            let level = cal.toa_threshold() - baseline - noise;
            let t = self.edge_time(amplitude, hit_time, level, sample_time);
            Some(self.toa_counts(t))
        } else {
            None
        };

        let tot = if voltage >= cal.tot_threshold() {
            let level = cal.tot_threshold() - baseline - noise;
            let entry_time = self.edge_time(amplitude, hit_time, level, sample_time);
            Some(self.saturate(voltage, entry_time))
        } else {
            None
        };

        let adc_t = if tot.is_some() {
            ADC_MAX_CODE
        } else {
            cal.adc_code(voltage)
        };

        Some(DigiSample {
            adc_t,
            adc_tm1: cal.adc_code(baseline),
            toa_crossed,
            toa,
            tot,
        })
    }

    fn saturate(&mut self, voltage: Millivolts, entry_time: f64) -> TotRecord {
        let cal = self.calibration;
        let excess = (voltage - cal.tot_threshold()).to_charge(cal.readout_pad_capacitance());
        self.state = ChannelState::TimeOverThreshold(TotDrain::new(entry_time, excess));

        let tick = cal.tot_max_time() / TOT_TDC_TICKS as f64;
        for _ in 0..TOT_TDC_TICKS {
            if let Some(record) = self.advance(tick) {
                return record;
            }
        }

        // The TDC is full: report a truncated drain whatever the tick arithmetic did
        let record = match self.state {
            ChannelState::TimeOverThreshold(drain) => drain.record(true, cal.tot_max_time()),
            _ => TotDrain::new(entry_time, excess).record(true, cal.tot_max_time()),
        };
        self.state = ChannelState::BelowThreshold;
        record
    }

    /// Rising-edge time of the pulse at `level`, or `fallback` when only noise got it there.
    fn edge_time(&self, amplitude: Millivolts, hit_time: f64, level: Millivolts, fallback: f64) -> f64 {
        self.calibration
            .pulse_shape()
            .crossing_time(amplitude, hit_time, level)
            .unwrap_or(fallback)
    }

    fn toa_counts(&self, t: f64) -> u16 {
        let cycle = self.calibration.clock_cycle();
        let phase = t.rem_euclid(cycle) / cycle;
        let counts = (phase * TOA_TDC_TICKS as f64).floor();
        if counts.is_finite() {
            counts.clamp(0.0, (TOA_TDC_TICKS - 1) as f64) as u16
        } else {
            0
        }
    }
}

/// Digitize one deposit on a fresh channel.
pub fn digitize(deposit: Deposit, calibration: &ChipCalibration, noise: Millivolts) -> Option<DigiSample> {
    ChannelResponse::new(calibration).digitize(deposit, noise)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationSettings, DetectorVariant, DEFAULT_ECAL_ELECTRONS_PER_MIP};

    fn ecal() -> ChipCalibration {
        ChipCalibration::for_variant(DetectorVariant::Ecal).unwrap()
    }

    fn mips(n: f64) -> Deposit {
        Deposit::Electrons(n * DEFAULT_ECAL_ELECTRONS_PER_MIP)
    }

    #[test]
    fn test_below_threshold_produces_nothing() {
        let cal = ecal();
        let mut channel = ChannelResponse::new(&cal);
        assert!(channel.digitize(Deposit::Electrons(10.0), Millivolts(0.0)).is_none());
        assert_eq!(*channel.state(), ChannelState::BelowThreshold);
    }

    #[test]
    fn test_readout_threshold_is_inclusive() {
        let cal = ecal();
        let at = cal.readout_threshold() - cal.baseline();
        assert_eq!(at, Millivolts(0.03125));

        let sample = digitize_signal(&cal, at).expect("equal to threshold reads out");
        assert_eq!(sample.adc_t, 52);
        assert_eq!(sample.adc_tm1, 50);

        let one_count_below = at - Millivolts(cal.gain());
        assert!(digitize_signal(&cal, one_count_below).is_none());
    }

    fn digitize_signal(cal: &ChipCalibration, signal: Millivolts) -> Option<DigiSample> {
        ChannelResponse::new(cal).digitize_signal(signal, Millivolts(0.0))
    }

    #[test]
    fn test_normal_sample_with_toa() {
        let cal = ecal();
        let mut channel = ChannelResponse::new(&cal);
        let sample = channel.digitize(mips(10.0), Millivolts(0.0)).unwrap();
        assert_eq!(*channel.state(), ChannelState::NormalSample);
        assert!(sample.toa_crossed);
        assert!(sample.toa.unwrap() < 1024);
        assert!(sample.tot.is_none());
        // 10 MIPs ~ 192 counts above the pedestal of 50
        assert_eq!(sample.adc_t, 241);
    }

    #[test]
    fn test_small_signal_misses_toa() {
        let cal = ecal();
        let sample = digitize(mips(1.0), &cal, Millivolts(0.0)).unwrap();
        assert!(!sample.toa_crossed);
        assert_eq!(sample.toa, None);
    }

    #[test]
    fn test_saturation_drains_back_below_threshold() {
        let cal = ecal();
        let mut channel = ChannelResponse::new(&cal);
        let sample = channel.digitize(mips(100.0), Millivolts(0.0)).unwrap();
        assert_eq!(*channel.state(), ChannelState::BelowThreshold);
        assert_eq!(sample.adc_t, ADC_MAX_CODE);

        let tot = sample.tot.expect("100 MIPs saturate");
        assert!(!tot.truncated);
        let signal = mips(100.0).signal(&cal);
        let excess = (cal.baseline() + signal - cal.tot_threshold())
            .to_charge(cal.readout_pad_capacitance())
            .value();
        let expected = excess / cal.drain_rate();
        let tick = cal.tot_max_time() / TOT_TDC_TICKS as f64;
        assert!((tot.drain_duration - expected).abs() <= tick + 1e-9);
    }

    #[test]
    fn test_tot_grows_with_charge_and_is_capped() {
        let cal = ecal();
        let small = digitize(mips(100.0), &cal, Millivolts(0.0)).unwrap().tot.unwrap();
        let large = digitize(mips(400.0), &cal, Millivolts(0.0)).unwrap().tot.unwrap();
        assert!(large.drain_duration > small.drain_duration);
        assert!(large.tdc_counts > small.tdc_counts);

        let huge = digitize(Deposit::Electrons(1.0e9), &cal, Millivolts(0.0))
            .unwrap()
            .tot
            .unwrap();
        assert!(huge.truncated);
        assert_eq!(huge.drain_duration, cal.tot_max_time());
        assert_eq!(huge.tdc_counts, (TOT_TDC_TICKS - 1) as u16);
    }

    #[test]
    fn test_advance_outside_tot_is_noop() {
        let cal = ecal();
        let mut channel = ChannelResponse::new(&cal);
        assert!(channel.advance(1.0).is_none());
        channel.digitize(mips(10.0), Millivolts(0.0));
        assert!(channel.advance(1.0).is_none());
        assert_eq!(*channel.state(), ChannelState::NormalSample);
        channel.begin_window();
        assert_eq!(*channel.state(), ChannelState::BelowThreshold);
    }

    #[test]
    fn test_drain_steps_back_below_threshold() {
        let cal = ecal();
        let mut channel = ChannelResponse::new(&cal);
        // 10.24 fC above threshold drains in 0.2 ns at 51.2 fC/ns
        channel.state = ChannelState::TimeOverThreshold(TotDrain::new(3.0, Femtocoulombs(10.24)));

        let tick = cal.tot_max_time() / TOT_TDC_TICKS as f64;
        let mut steps = 1;
        let record = loop {
            if let Some(record) = channel.advance(tick) {
                break record;
            }
            assert!(matches!(channel.state(), ChannelState::TimeOverThreshold(_)));
            steps += 1;
        };
        assert_eq!(*channel.state(), ChannelState::BelowThreshold);
        assert_eq!(record.entry_time, 3.0);
        assert!(!record.truncated);
        assert_eq!(u32::from(record.tdc_counts), steps);
        assert!(record.drain_duration >= 0.2 && record.drain_duration <= 0.2 + tick);
    }

    #[test]
    fn test_saturating_window_ends_below_threshold() {
        let cal = ecal();
        let mut channel = ChannelResponse::new(&cal);
        let sample = channel.digitize(mips(1000.0), Millivolts(0.0)).unwrap();
        assert!(sample.is_tot());
        assert_eq!(*channel.state(), ChannelState::BelowThreshold);
    }

    #[test]
    fn test_tiny_tot_range_still_terminates() {
        let mut settings = CalibrationSettings::preset(DetectorVariant::Ecal);
        settings.set_tot_max_time(1.0e-300).unwrap();
        let cal = settings.build().unwrap();
        let tot = digitize(Deposit::Electrons(1.0e8), &cal, Millivolts(0.0))
            .unwrap()
            .tot
            .unwrap();
        assert!(tot.truncated);
        assert_eq!(tot.tdc_counts, (TOT_TDC_TICKS - 1) as u16);
    }

    #[test]
    fn test_disabled_noise_ignores_caller_noise() {
        let mut settings = CalibrationSettings::preset(DetectorVariant::Ecal);
        settings.set_noise_enabled(false);
        let cal = settings.build().unwrap();
        assert!(digitize(Deposit::Electrons(0.0), &cal, Millivolts(1.0)).is_none());

        let quiet = digitize(mips(10.0), &cal, Millivolts(0.0));
        let noisy = digitize(mips(10.0), &cal, Millivolts(1.0));
        assert_eq!(quiet, noisy);
    }

    #[test]
    fn test_infinite_deposit_never_crosses_disabled_thresholds() {
        let cal = ChipCalibration::for_variant(DetectorVariant::Generic).unwrap();
        assert!(digitize(Deposit::Electrons(f64::INFINITY), &cal, Millivolts(0.0)).is_none());
        assert!(digitize(mips(1.0), &cal, Millivolts(f64::INFINITY)).is_none());

        let ecal = ecal();
        assert!(digitize(Deposit::Photoelectrons(f64::INFINITY), &ecal, Millivolts(0.0)).is_none());
    }

    #[test]
    fn test_malformed_input_is_below_threshold() {
        let cal = ecal();
        assert!(digitize(Deposit::Electrons(-5.0e6), &cal, Millivolts(0.0)).is_none());
        assert!(digitize(Deposit::Electrons(f64::NAN), &cal, Millivolts(0.0)).is_none());
    }

    #[test]
    fn test_noise_can_lift_signal_over_threshold() {
        let cal = ecal();
        let signal = Millivolts(0.02);
        assert!(digitize_signal(&cal, signal).is_none());
        let sample = ChannelResponse::new(&cal)
            .digitize_signal(signal, Millivolts(0.02))
            .unwrap();
        assert!(sample.adc_t >= 52);
    }

    #[test]
    fn test_hadronic_photoelectron_response() {
        let cal = ChipCalibration::for_variant(DetectorVariant::Hcal).unwrap();
        assert!(digitize(Deposit::Photoelectrons(1.0), &cal, Millivolts(0.0)).is_some());
        assert!(digitize(Deposit::Photoelectrons(0.5), &cal, Millivolts(0.0)).is_none());

        let sample = digitize(Deposit::Photoelectrons(10.0), &cal, Millivolts(0.0)).unwrap();
        assert!(sample.toa_crossed);
        assert!(sample.tot.is_none());

        let saturated = digitize(Deposit::Photoelectrons(200.0), &cal, Millivolts(0.0)).unwrap();
        assert!(saturated.tot.is_some());
    }

    #[test]
    fn test_hit_at_measurement_time_matches_peak_sampling() {
        let mut settings = CalibrationSettings::preset(DetectorVariant::Ecal);
        settings.set_noise_enabled(false);
        let cal = settings.build().unwrap();

        let hit = Hit {
            deposit: mips(10.0),
            time: cal.measurement_time(),
        };
        let mut stream = NoiseStream::silent();
        let timed = ChannelResponse::new(&cal).digitize_hit(&hit, &mut stream);
        let peak = digitize(hit.deposit, &cal, Millivolts(0.0));
        assert_eq!(timed, peak);
    }

    #[test]
    fn test_late_hit_reads_lower() {
        let cal = ecal();
        let mut stream = NoiseStream::silent();
        let on_time = ChannelResponse::new(&cal)
            .digitize_hit(&Hit { deposit: mips(10.0), time: 0.0 }, &mut stream)
            .unwrap();
        let late = ChannelResponse::new(&cal)
            .digitize_hit(&Hit { deposit: mips(10.0), time: 15.0 }, &mut stream)
            .unwrap();
        assert!(late.adc_t < on_time.adc_t);
    }
}
