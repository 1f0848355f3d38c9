//! Result-table shaping for disaggregation output.
//!
//! Turns per-appliance predicted power traces into polars DataFrames: one
//! `Float32` column per appliance plus a `timestep` index column, with
//! vertical concatenation of per-chunk frames and CSV export. Power values
//! are stored single precision; the index is the sample offset into the
//! original aggregate trace.

use std::fs::{self, File};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use polars::prelude::*;

/// Assemble one window's predictions into a DataFrame.
///
/// `predictions` is indexed `[appliance][time]` and must be rectangular with
/// one entry per appliance name. `start_index` is the offset of this window
/// within the full aggregate trace, so chunk frames concatenate into a
/// gapless global index.
pub fn prediction_frame(
    appliances: &[String],
    predictions: &[Vec<f64>],
    start_index: i64,
) -> Result<DataFrame> {
    if appliances.len() != predictions.len() {
        return Err(anyhow!(
            "{} appliance names against {} prediction traces",
            appliances.len(),
            predictions.len()
        ));
    }
    if predictions.is_empty() {
        return Err(anyhow!("no appliances to tabulate"));
    }
    let window_len = predictions[0].len();
    for (name, trace) in appliances.iter().zip(predictions.iter()) {
        if trace.len() != window_len {
            return Err(anyhow!(
                "appliance '{}' has {} samples, expected {}",
                name,
                trace.len(),
                window_len
            ));
        }
    }

    let timestep: Vec<i64> = (0..window_len as i64).map(|t| start_index + t).collect();
    let mut columns = vec![Series::new("timestep", timestep)];
    for (name, trace) in appliances.iter().zip(predictions.iter()) {
        let values: Vec<f32> = trace.iter().map(|&p| p as f32).collect();
        columns.push(Series::new(name, values));
    }

    DataFrame::new(columns).context("assembling prediction frame")
}

/// Concatenate per-chunk prediction frames in chunk order.
///
/// Frames must share a schema (same appliances, produced by
/// [`prediction_frame`] with consecutive start indices).
pub fn concat_chunk_frames(frames: &[DataFrame]) -> Result<DataFrame> {
    let mut iter = frames.iter();
    let first = iter
        .next()
        .ok_or_else(|| anyhow!("no chunk frames to concatenate"))?;
    let mut out = first.clone();
    for frame in iter {
        out = out.vstack(frame).context("stacking chunk frame")?;
    }
    Ok(out)
}

/// Write a prediction frame to CSV.
pub fn write_predictions_csv(df: &mut DataFrame, path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    CsvWriter::new(&mut file)
        .finish(df)
        .context("writing CSV file")
}
