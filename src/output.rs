use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use csv::Writer;
use serde::Serialize;

use crate::calibration::ChipCalibration;
use crate::response::Deposit;
use crate::sim::{DigiRecord, SimRun, SimSummary};
use crate::HgcrocError;

/// Files written for one run
#[derive(Debug, Clone)]
pub struct RunOutputs {
    pub output_dir: PathBuf,
    pub digis_path: PathBuf,
    pub summary_path: PathBuf,
    pub calibration_path: PathBuf,
}

/// Create `<root>/<UTC timestamp>` for one run.
///
/// Runs started within the same second get `-01`, `-02`, ... suffixes, so a
/// run never writes into another run's directory.
pub fn create_timestamped_output_dir(root: &Path) -> Result<PathBuf, HgcrocError> {
    fs::create_dir_all(root)?;

    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let mut output_dir = root.join(&timestamp);
    let mut counter = 1_u32;

    while output_dir.exists() {
        output_dir = root.join(format!("{timestamp}-{counter:02}"));
        counter += 1;
    }

    fs::create_dir_all(&output_dir)?;
    Ok(output_dir)
}

fn fmt_f64(value: f64) -> String {
    format!("{value:.6}")
}

fn fmt_option<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn write_digis_csv(path: &Path, records: &[DigiRecord]) -> Result<(), HgcrocError> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record([
        "event",
        "channel",
        "deposit_kind",
        "deposit_amount",
        "hit_time",
        "adc_t",
        "adc_tm1",
        "toa_crossed",
        "toa",
        "tot_counts",
        "tot_duration",
        "tot_truncated",
        "word",
    ])?;

    for record in records {
        let sample = &record.sample;
        let kind = match record.hit.deposit {
            Deposit::Electrons(_) => "electrons",
            Deposit::Photoelectrons(_) => "photoelectrons",
        };
        writer.write_record([
            record.event.to_string(),
            record.channel.to_string(),
            kind.to_string(),
            fmt_f64(record.hit.deposit.amount()),
            fmt_f64(record.hit.time),
            sample.adc_t.to_string(),
            sample.adc_tm1.to_string(),
            sample.toa_crossed.to_string(),
            fmt_option(sample.toa),
            fmt_option(sample.tot.map(|t| t.tdc_counts)),
            fmt_option(sample.tot.map(|t| fmt_f64(t.drain_duration))),
            fmt_option(sample.tot.map(|t| t.truncated)),
            format!("0x{:08x}", sample.to_word().0),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), HgcrocError> {
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw)?;
    Ok(())
}

pub fn write_summary_json(path: &Path, summary: &SimSummary) -> Result<(), HgcrocError> {
    write_json(path, summary)
}

/// Writes the base settings; reading the file back finalizes them again.
pub fn write_calibration_json(path: &Path, calibration: &ChipCalibration) -> Result<(), HgcrocError> {
    write_json(path, calibration)
}

pub fn write_run_into_dir(
    output_dir: &Path,
    calibration: &ChipCalibration,
    run: &SimRun,
) -> Result<RunOutputs, HgcrocError> {
    let outputs = RunOutputs {
        output_dir: output_dir.to_path_buf(),
        digis_path: output_dir.join("digis.csv"),
        summary_path: output_dir.join("summary.json"),
        calibration_path: output_dir.join("calibration.json"),
    };

    write_digis_csv(&outputs.digis_path, &run.records)?;
    write_summary_json(&outputs.summary_path, &run.summary)?;
    write_calibration_json(&outputs.calibration_path, calibration)?;

    tracing::info!(dir = %output_dir.display(), records = run.records.len(), "wrote run outputs");
    Ok(outputs)
}
