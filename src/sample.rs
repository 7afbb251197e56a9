//! Digitized samples and their on-chip word format
//!
//! A sample is one clock of one channel. On the chip it is a 32-bit word:
//!
//! | bit 31 | bit 30 | bits 20..29 | bits 10..19 | bits 0..9 |
//! |---|---|---|---|---|
//! | TOT in progress | TOT complete | first measurement | second measurement | TOA |
//!
//! The meaning of the two measurements depends on the flags: ADC of the
//! previous and of this clock while no TOT is complete, ADC of the previous
//! clock and the TOT once the TOT measurement is complete.

use std::fmt;

use serde::{Deserialize, Serialize};

const TEN_BIT_MASK: u32 = (1 << 10) - 1;
const FIRST_FLAG_POS: u32 = 31;
const SECOND_FLAG_POS: u32 = 30;
const FIRST_MEAS_POS: u32 = 20;
const SECOND_MEAS_POS: u32 = 10;

/// TOT values above this are compressed by a factor 8 into the 10-bit field.
const TOT_LINEAR_LIMIT: u32 = 512;

/// Saturation record of a channel that went into time-over-threshold mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TotRecord {
    /// Time the signal crossed the TOT threshold [ns]
    pub entry_time: f64,
    /// Time it took the pad to drain back under the threshold [ns]
    pub drain_duration: f64,
    /// Drain duration in 12-bit TDC ticks
    pub tdc_counts: u16,
    /// The drain was cut off at the chip's maximum TOT
    pub truncated: bool,
}

/// One digitized sample of one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DigiSample {
    /// ADC counts of this clock
    pub adc_t: u16,
    /// ADC counts of the previous clock
    pub adc_tm1: u16,
    /// The time-of-arrival threshold was crossed
    pub toa_crossed: bool,
    /// Time of arrival in 10-bit TDC counts within the clock cycle
    pub toa: Option<u16>,
    /// Present when the channel saturated
    pub tot: Option<TotRecord>,
}

impl DigiSample {
    pub fn is_tot(&self) -> bool {
        self.tot.is_some()
    }

    /// Pack into the 32-bit chip word.
    pub fn to_word(&self) -> SampleWord {
        let toa = self.toa.map(u32::from).unwrap_or(0);
        match self.tot {
            Some(tot) => SampleWord::pack(
                false,
                true,
                u32::from(self.adc_tm1),
                compress_tot(u32::from(tot.tdc_counts)),
                toa,
            ),
            None => SampleWord::pack(
                false,
                false,
                u32::from(self.adc_tm1),
                u32::from(self.adc_t),
                toa,
            ),
        }
    }
}

/// Squeeze the 12-bit internal TOT measurement into 10 bits.
fn compress_tot(tot: u32) -> u32 {
    if tot > TOT_LINEAR_LIMIT {
        TOT_LINEAR_LIMIT + tot / 8
    } else {
        tot
    }
}

fn expand_tot(packed: u32) -> u32 {
    if packed > TOT_LINEAR_LIMIT {
        (packed - TOT_LINEAR_LIMIT) * 8
    } else {
        packed
    }
}

/// Measurements decoded from a sample word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedSample {
    pub tot_progress: bool,
    pub tot_complete: bool,
    pub adc_t: Option<u16>,
    pub adc_tm1: Option<u16>,
    pub tot: Option<u16>,
    pub toa: u16,
}

/// Packed 32-bit sample word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleWord(pub u32);

impl SampleWord {
    /// Pack flags and measurements; measurements over 10 bits saturate.
    pub fn pack(tot_progress: bool, tot_complete: bool, first: u32, second: u32, toa: u32) -> Self {
        let clamp = |v: u32| v.min(TEN_BIT_MASK) & TEN_BIT_MASK;
        SampleWord(
            (u32::from(tot_progress) << FIRST_FLAG_POS)
                | (u32::from(tot_complete) << SECOND_FLAG_POS)
                | (clamp(first) << FIRST_MEAS_POS)
                | (clamp(second) << SECOND_MEAS_POS)
                | clamp(toa),
        )
    }

    pub fn tot_progress(&self) -> bool {
        (self.0 >> FIRST_FLAG_POS) & 1 == 1
    }

    pub fn tot_complete(&self) -> bool {
        (self.0 >> SECOND_FLAG_POS) & 1 == 1
    }

    fn first(&self) -> u16 {
        ((self.0 >> FIRST_MEAS_POS) & TEN_BIT_MASK) as u16
    }

    fn second(&self) -> u16 {
        ((self.0 >> SECOND_MEAS_POS) & TEN_BIT_MASK) as u16
    }

    pub fn toa(&self) -> u16 {
        (self.0 & TEN_BIT_MASK) as u16
    }

    /// Interpret the two measurements according to the flags.
    pub fn decode(&self) -> DecodedSample {
        let (progress, complete) = (self.tot_progress(), self.tot_complete());
        let (adc_t, adc_tm1, tot) = match (progress, complete) {
            (true, true) => (Some(self.first()), None, Some(self.second())),
            (false, true) => (
                None,
                Some(self.first()),
                Some(expand_tot(u32::from(self.second())) as u16),
            ),
            _ => (Some(self.second()), Some(self.first()), None),
        };
        DecodedSample {
            tot_progress: progress,
            tot_complete: complete,
            adc_t,
            adc_tm1,
            tot,
            toa: self.toa(),
        }
    }
}

impl fmt::Display for SampleWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.decode();
        write!(
            f,
            "Sample {{ tot prog: {}, tot comp: {}, ",
            d.tot_progress, d.tot_complete
        )?;
        match (d.adc_t, d.adc_tm1, d.tot) {
            (Some(adc_t), _, Some(tot)) => write!(f, "adc t: {adc_t}, tot: {tot}, ")?,
            (_, Some(adc_tm1), Some(tot)) => write!(f, "adc t-1: {adc_tm1}, tot: {tot}, ")?,
            (adc_t, adc_tm1, _) => write!(
                f,
                "adc t-1: {}, adc t: {}, ",
                adc_tm1.unwrap_or_default(),
                adc_t.unwrap_or_default()
            )?,
        }
        write!(f, "toa: {} }}", d.toa)
    }
}
