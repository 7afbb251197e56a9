//! Tagged electrical quantities
//!
//! The chip mixes three unit domains: voltages on the shaper output
//! (millivolts), digitizer output (ADC counts) and collected charge
//! (femtocoulombs). Each gets its own type so a threshold in one domain
//! cannot be compared against a value in another without an explicit,
//! calibration-aware conversion.

use std::fmt;
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Charge of 1000 electrons [fC].
pub const FC_PER_KILO_ELECTRON: f64 = 0.162;

/// Empirical photo-electron response of the scintillator readout [mV / PE].
pub const MV_PER_PHOTOELECTRON: f64 = 5.0;

/// Voltage on the shaper output [mV]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Millivolts(pub f64);

/// Digitizer domain value [ADC counts], kept fractional until quantized
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdcCounts(pub f64);

/// Collected charge [fC]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Femtocoulombs(pub f64);

impl Millivolts {
    /// Value in millivolts
    pub fn value(self) -> f64 {
        self.0
    }

    /// Charge held on a pad of the given capacitance [pF] at this voltage.
    pub fn to_charge(self, capacitance_pf: f64) -> Femtocoulombs {
        // mV * pF = fC
        Femtocoulombs(self.0 * capacitance_pf)
    }

    /// ADC counts equivalent at the given gain [mV / ADC].
    pub fn to_adc(self, gain: f64) -> AdcCounts {
        AdcCounts(self.0 / gain)
    }
}

impl AdcCounts {
    /// Value in ADC counts
    pub fn value(self) -> f64 {
        self.0
    }

    /// Voltage equivalent at the given gain [mV / ADC].
    pub fn to_voltage(self, gain: f64) -> Millivolts {
        Millivolts(self.0 * gain)
    }
}

impl Femtocoulombs {
    /// Value in femtocoulombs
    pub fn value(self) -> f64 {
        self.0
    }

    /// Voltage this charge produces on a pad of the given capacitance [pF].
    pub fn to_voltage(self, capacitance_pf: f64) -> Millivolts {
        Millivolts(self.0 / capacitance_pf)
    }
}

macro_rules! impl_linear_ops {
    ($ty:ident, $unit:literal) => {
        impl Add for $ty {
            type Output = $ty;

            fn add(self, rhs: $ty) -> $ty {
                $ty(self.0 + rhs.0)
            }
        }

        impl Sub for $ty {
            type Output = $ty;

            fn sub(self, rhs: $ty) -> $ty {
                $ty(self.0 - rhs.0)
            }
        }

        impl Mul<f64> for $ty {
            type Output = $ty;

            fn mul(self, rhs: f64) -> $ty {
                $ty(self.0 * rhs)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} {}", self.0, $unit)
            }
        }
    };
}

impl_linear_ops!(Millivolts, "mV");
impl_linear_ops!(AdcCounts, "ADC");
impl_linear_ops!(Femtocoulombs, "fC");

/// Voltage produced by a number of electrons (or e-h pairs) on a readout pad.
///
/// electrons ( 0.162 fC / 1000 electrons ) ( 1 / capacitance in pF ) = voltage [mV]
pub fn voltage_from_charge(electrons: f64, capacitance_pf: f64) -> Millivolts {
    Millivolts(electrons * (FC_PER_KILO_ELECTRON / 1000.0) / capacitance_pf)
}

/// Voltage produced by a number of photo-electrons (1 PE ~ 5 mV).
///
/// Empirical constant of the scintillator channels, not derived from the
/// pad capacitance.
pub fn voltage_from_photoelectrons(photoelectrons: f64) -> Millivolts {
    Millivolts(photoelectrons * MV_PER_PHOTOELECTRON)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voltage_from_charge_reference_point() {
        let v = voltage_from_charge(1000.0, 20.0);
        assert!((v.value() - 0.0081).abs() < 1e-12);
    }

    #[test]
    fn test_voltage_from_charge_inverse_in_capacitance() {
        let v10 = voltage_from_charge(5000.0, 10.0);
        let v20 = voltage_from_charge(5000.0, 20.0);
        assert!((v10.value() - 2.0 * v20.value()).abs() < 1e-15);
    }

    #[test]
    fn test_photoelectron_voltage() {
        assert_eq!(voltage_from_photoelectrons(1.0), Millivolts(5.0));
        assert_eq!(voltage_from_photoelectrons(0.0), Millivolts(0.0));
    }

    #[test]
    fn test_domain_conversions() {
        let gain = 0.015625;
        let v = AdcCounts(52.0).to_voltage(gain);
        assert_eq!(v, Millivolts(0.8125));
        assert_eq!(v.to_adc(gain), AdcCounts(52.0));

        let q = Millivolts(2.0).to_charge(20.0);
        assert_eq!(q, Femtocoulombs(40.0));
        assert_eq!(q.to_voltage(20.0), Millivolts(2.0));
    }

    #[test]
    fn test_display_carries_unit() {
        assert_eq!(Millivolts(1.5).to_string(), "1.5 mV");
        assert_eq!(Femtocoulombs(3.0).to_string(), "3 fC");
    }
}
