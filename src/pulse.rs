//! Shaper pulse model
//!
//! The analog pulse leaving the chip's shaper is modelled as the product of
//! a rising and a falling logistic edge. The shape is normalized so that it
//! reaches the requested amplitude exactly at the hit time, which is where
//! the unnormalized product peaks (`time_peak` after the start of the edge).

use serde::{Deserialize, Serialize};

use crate::units::Millivolts;

/// Number of bisection steps used to locate a threshold crossing.
const CROSSING_ITERATIONS: usize = 60;

/// Pulse shape parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseShape {
    /// Slope of the rising edge [1/ns] (negative: the logistic rises)
    pub rate_up_slope: f64,
    /// Centre of the rising edge [ns]
    pub time_up_slope: f64,
    /// Slope of the falling edge [1/ns]
    pub rate_dn_slope: f64,
    /// Centre of the falling edge [ns]
    pub time_dn_slope: f64,
    /// Time of the pulse maximum relative to the start of the edge [ns]
    pub time_peak: f64,
}

impl PulseShape {
    /// Create a new pulse shape
    pub fn new(
        rate_up_slope: f64,
        time_up_slope: f64,
        rate_dn_slope: f64,
        time_dn_slope: f64,
        time_peak: f64,
    ) -> Self {
        Self {
            rate_up_slope,
            time_up_slope,
            rate_dn_slope,
            time_dn_slope,
            time_peak,
        }
    }

    /// Shape measured on the HGCROC test bench
    pub fn hgcroc() -> Self {
        Self {
            rate_up_slope: -0.345,
            time_up_slope: 70.6547,
            rate_dn_slope: 0.140068,
            time_dn_slope: 87.7649,
            time_peak: 77.732,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.rate_up_slope.is_finite()
            && self.time_up_slope.is_finite()
            && self.rate_dn_slope.is_finite()
            && self.time_dn_slope.is_finite()
            && self.time_peak.is_finite()
    }

    fn edges(&self, u: f64) -> f64 {
        (1.0 + (self.rate_up_slope * (u - self.time_up_slope)).exp())
            * (1.0 + (self.rate_dn_slope * (u - self.time_dn_slope)).exp())
    }

    /// Pulse height at time `t` for a pulse of `amplitude` peaking at `hit_time`.
    pub fn at(&self, amplitude: Millivolts, hit_time: f64, t: f64) -> Millivolts {
        let norm = self.edges(self.time_peak);
        let u = t - hit_time + self.time_peak;
        let denom = self.edges(u);
        if !denom.is_finite() {
            return Millivolts(0.0);
        }
        Millivolts(amplitude.0 * (norm / denom))
    }

    /// Time at which the rising edge of the pulse first reaches `level`.
    ///
    /// Returns `None` when the pulse never gets that high.
    pub fn crossing_time(&self, amplitude: Millivolts, hit_time: f64, level: Millivolts) -> Option<f64> {
        if !(amplitude.0 >= level.0) {
            return None;
        }

        let mut lo = hit_time - self.time_peak;
        let mut hi = hit_time;
        if self.at(amplitude, hit_time, lo).0 >= level.0 {
            return Some(lo);
        }

        for _ in 0..CROSSING_ITERATIONS {
            let mid = 0.5 * (lo + hi);
            if self.at(amplitude, hit_time, mid).0 >= level.0 {
                hi = mid;
            } else {
                lo = mid;
            }
        }

        Some(hi)
    }
}

impl Default for PulseShape {
    fn default() -> Self {
        Self::hgcroc()
    }
}
