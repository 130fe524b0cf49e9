use std::io::Write;

use serde::Serialize;
use thiserror::Error;

use crate::batch::BatchItem;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    index: usize,
    file: &'a str,
    manifest: &'a str,
    /// `barcode`, `ocr`, `none`, or `error` when the image failed.
    source: String,
    time_ms: u64,
    raw: &'a str,
}

/// One row per batch item, in the order given:
/// `index,file,manifest,source,time_ms,raw`.
pub fn write_csv<W: Write>(items: &[BatchItem], writer: W) -> Result<(), ReportError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for item in items {
        let error_text;
        let row = match &item.result {
            Ok(outcome) => ReportRow {
                index: item.index,
                file: &item.name,
                manifest: outcome.fields.manifest_number.as_deref().unwrap_or(""),
                source: outcome.manifest_source.to_string(),
                time_ms: outcome.diagnostics.elapsed_ms,
                raw: &outcome.raw_text,
            },
            Err(e) => {
                error_text = e.to_string();
                ReportRow {
                    index: item.index,
                    file: &item.name,
                    manifest: "",
                    source: "error".to_string(),
                    time_ms: 0,
                    raw: &error_text,
                }
            }
        };
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}
