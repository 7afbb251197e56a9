//! End-to-end calibration scenarios for the silicon and scintillator presets.

use approx::assert_relative_eq;
use hgcroc::{
    digitize, voltage_from_charge, voltage_from_photoelectrons, CalibrationSettings, ChipCalibration, Deposit,
    DetectorVariant, Millivolts, ThresholdRule,
};

fn ecal_settings() -> CalibrationSettings {
    let mut settings = CalibrationSettings::preset(DetectorVariant::Ecal);
    settings
        .set_readout_pad_capacitance(20.0)
        .unwrap()
        .set_max_adc_range(320.0)
        .unwrap()
        .set_pedestal(50.0)
        .unwrap();
    settings
}

#[test]
fn test_ecal_scenario() {
    let mut settings = ecal_settings();
    settings.set_noise(700.0, 25.0).unwrap();
    settings.set_threshold_defaults(1.0).unwrap();
    let cal = settings.build().unwrap();

    assert_eq!(cal.gain(), 0.015625);
    assert_eq!(cal.baseline(), Millivolts(0.78125));
    assert_eq!(cal.noise_rms(), voltage_from_charge(1200.0, 20.0));
    assert_relative_eq!(cal.noise_rms().value(), 0.00972, epsilon = 1e-12);

    assert_relative_eq!(cal.toa_threshold().value(), 0.7812905, epsilon = 1e-12);
    assert_relative_eq!(cal.tot_threshold().value(), 0.781655, epsilon = 1e-12);
    assert_eq!(
        cal.toa_threshold(),
        cal.baseline() + voltage_from_charge(5.0, 20.0)
    );
    assert_eq!(
        cal.tot_threshold(),
        cal.baseline() + voltage_from_charge(50.0, 20.0)
    );
}

#[test]
fn test_hcal_scenario() {
    let mut settings = CalibrationSettings::generic();
    settings.set_threshold_defaults_for_hadronic_variant();
    let cal = settings.build().unwrap();

    assert_eq!(cal.pedestal().value(), 25.0);
    assert_eq!(cal.gain(), 0.1);
    assert_eq!(cal.max_adc_range(), 8192.0);

    let baseline = 25.0 * 0.1;
    assert_relative_eq!(cal.readout_threshold().value(), 7.5, epsilon = 1e-12);
    assert_relative_eq!(
        cal.toa_threshold().value(),
        baseline + voltage_from_photoelectrons(0.1 * 68.0).value(),
        epsilon = 1e-12
    );
    assert_relative_eq!(
        cal.tot_threshold().value(),
        baseline + voltage_from_photoelectrons(2.0 * 68.0).value(),
        epsilon = 1e-12
    );
    assert_relative_eq!(cal.tot_threshold().value(), 682.5, epsilon = 1e-9);
}

#[test]
fn test_hcal_preset_matches_explicit_convention() {
    let preset = ChipCalibration::for_variant(DetectorVariant::Hcal).unwrap();
    let explicit = ChipCalibration::for_variant(DetectorVariant::Generic)
        .unwrap()
        .with_hadronic_threshold_defaults()
        .unwrap();
    assert_eq!(preset.gain(), explicit.gain());
    assert_eq!(preset.readout_threshold(), explicit.readout_threshold());
    assert_eq!(preset.toa_threshold(), explicit.toa_threshold());
    assert_eq!(preset.tot_threshold(), explicit.tot_threshold());
}

#[test]
fn test_serde_round_trip_is_bit_identical() {
    for variant in [DetectorVariant::Generic, DetectorVariant::Ecal, DetectorVariant::Hcal] {
        let cal = ChipCalibration::for_variant(variant)
            .unwrap()
            .with_noise(812.5, 31.25)
            .unwrap();
        let raw = serde_json::to_string(&cal).unwrap();
        let back: ChipCalibration = serde_json::from_str(&raw).unwrap();

        assert_eq!(back.gain().to_bits(), cal.gain().to_bits());
        assert_eq!(back.noise_rms().value().to_bits(), cal.noise_rms().value().to_bits());
        assert_eq!(
            back.readout_threshold().value().to_bits(),
            cal.readout_threshold().value().to_bits()
        );
        assert_eq!(back.toa_threshold().value().to_bits(), cal.toa_threshold().value().to_bits());
        assert_eq!(back.tot_threshold().value().to_bits(), cal.tot_threshold().value().to_bits());
        assert_eq!(back, cal);
    }
}

#[test]
fn test_threshold_defaults_are_idempotent() {
    let once = ChipCalibration::for_variant(DetectorVariant::Ecal)
        .unwrap()
        .with_threshold_defaults(42_000.0)
        .unwrap();
    let twice = once.with_threshold_defaults(42_000.0).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_noise_retune_needs_explicit_threshold_rederivation() {
    let cal = ChipCalibration::for_variant(DetectorVariant::Ecal).unwrap();
    let noisier = cal.with_noise(2000.0, 50.0).unwrap();
    assert!(noisier.noise_rms() > cal.noise_rms());
    assert_eq!(noisier.readout_threshold(), cal.readout_threshold());
    assert_eq!(noisier.tot_threshold(), cal.tot_threshold());
}

#[test]
fn test_readout_boundary_on_voltage_rule() {
    let cal = ChipCalibration::for_variant(DetectorVariant::Ecal)
        .unwrap()
        .rebuild_with(|s| {
            s.set_readout_threshold(ThresholdRule::Voltage { millivolts: 1.0 })?;
            Ok(())
        })
        .unwrap();
    assert_eq!(cal.readout_threshold(), Millivolts(1.0));

    // 0.21875 mV above the 0.78125 mV baseline lands exactly on 1 mV
    let at = Millivolts(0.21875);
    let mut channel = hgcroc::ChannelResponse::new(&cal);
    assert!(channel.digitize_signal(at, Millivolts(0.0)).is_some());
    assert!(channel
        .digitize_signal(at - Millivolts(cal.gain()), Millivolts(0.0))
        .is_none());
}

#[test]
fn test_variant_tags() {
    assert_eq!(
        ChipCalibration::from_tag("hadronic").unwrap().variant(),
        DetectorVariant::Hcal
    );
    assert!(matches!(
        ChipCalibration::from_tag("muon"),
        Err(hgcroc::HgcrocError::UnknownVariant(tag)) if tag == "muon"
    ));
}

#[test]
fn test_generic_variant_never_saturates() {
    let cal = ChipCalibration::for_variant(DetectorVariant::Generic).unwrap();
    let sample = digitize(Deposit::Electrons(1.0e9), &cal, Millivolts(0.0)).unwrap();
    assert!(!sample.toa_crossed);
    assert!(sample.tot.is_none());
    assert_eq!(sample.adc_t, 1023);
}
