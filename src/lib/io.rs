use crate::crosstab::{Diagnostics, LabeledMatrix, ShrinkageTable};
use crate::error::{Error, Result};
use crate::fit::FitResult;
use crate::model::{observations_from_counts, CountObservation};
use crate::table::OutcomeChunk;
use ahash::AHashMap as HashMap;
use atoi::FromRadix10SignedChecked;
use csv::{ByteRecord, ReaderBuilder, WriterBuilder};
use log::{debug, info};
use serde::Serialize;
use std::fmt::Display;
use std::io::{Read as IoRead, Write};
use strum::IntoEnumIterator;
use strum_macros::{Display as StrumDisplay, EnumIter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, StrumDisplay)]
#[strum(serialize_all = "snake_case")]
pub enum OutcomeField {
    Outcome,
    Row,
    Column,
}

/// Header names of the outcome, row group and column group columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeColumns {
    pub outcome: String,
    pub row: String,
    pub column: String,
}

impl OutcomeColumns {
    pub fn new(outcome: &str, row: &str, column: &str) -> Self {
        Self {
            outcome: outcome.to_string(),
            row: row.to_string(),
            column: column.to_string(),
        }
    }

    fn name(&self, field: OutcomeField) -> &str {
        match field {
            OutcomeField::Outcome => &self.outcome,
            OutcomeField::Row => &self.row,
            OutcomeField::Column => &self.column,
        }
    }
}

impl Default for OutcomeColumns {
    fn default() -> Self {
        Self::new("outcome", "row", "column")
    }
}

#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub mapping: HashMap<OutcomeField, usize>,
}

impl FieldMapping {
    /// Looks up every field's column in the header record.
    pub fn from_headers(headers: &ByteRecord, columns: &OutcomeColumns) -> Result<Self> {
        let mut mapping = HashMap::new();
        for field in OutcomeField::iter() {
            let name = columns.name(field);
            let idx = column_index(headers, name)?;
            debug!("Column '{}' ({}) at index {}", name, field, idx);
            mapping.insert(field, idx);
        }
        Ok(Self { mapping })
    }

    pub fn idx(&self, field: OutcomeField) -> Option<usize> {
        self.mapping.get(&field).copied()
    }
}

fn column_index(headers: &ByteRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name.as_bytes())
        .ok_or_else(|| Error::MissingColumn(name.to_string()))
}

/// Parses a 0/1 outcome. Empty and NA values are missing.
pub fn parse_outcome(field: &[u8]) -> std::result::Result<Option<bool>, String> {
    let value = std::str::from_utf8(field)
        .map_err(|e| format!("outcome is not valid UTF-8: {}", e))?
        .trim();
    match value {
        "" | "NA" | "NaN" | "nan" | "." => Ok(None),
        "1" | "1.0" | "true" | "True" | "TRUE" => Ok(Some(true)),
        "0" | "0.0" | "false" | "False" | "FALSE" => Ok(Some(false)),
        other => Err(format!("outcome must be 0 or 1, got '{}'", other)),
    }
}

fn utf8_field<'a>(record: &'a ByteRecord, idx: usize, line: u64) -> Result<&'a str> {
    let bytes = record.get(idx).ok_or_else(|| Error::Parse {
        line,
        reason: format!("record has no field {}", idx),
    })?;
    std::str::from_utf8(bytes).map_err(|e| Error::Parse {
        line,
        reason: e.to_string(),
    })
}

/// Reads a tab-separated outcome table in chunks of at most `chunk_size`
/// records. Rows with a missing outcome are skipped.
pub struct OutcomeChunkReader<R: IoRead> {
    reader: csv::Reader<R>,
    mapping: FieldMapping,
    chunk_size: usize,
    line: u64,
    pub skipped: u64,
    pub eof_reached: bool,
}

impl<R: IoRead> OutcomeChunkReader<R> {
    pub fn new(inner: R, columns: &OutcomeColumns, chunk_size: usize) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .buffer_capacity(128 * (1 << 10))
            .from_reader(inner);
        let headers = reader.byte_headers()?.clone();
        let mapping = FieldMapping::from_headers(&headers, columns)?;
        Ok(Self {
            reader,
            mapping,
            chunk_size: chunk_size.max(1),
            line: 1,
            skipped: 0,
            eof_reached: false,
        })
    }

    pub fn next_chunk(&mut self) -> Result<Option<OutcomeChunk>> {
        let mut chunk = OutcomeChunk::new();
        if self.eof_reached {
            return Ok(None);
        }
        let outcome_idx = self.field_idx(OutcomeField::Outcome)?;
        let row_idx = self.field_idx(OutcomeField::Row)?;
        let column_idx = self.field_idx(OutcomeField::Column)?;

        let mut record = ByteRecord::new();
        while chunk.len() < self.chunk_size {
            if !self.reader.read_byte_record(&mut record)? {
                self.eof_reached = true;
                break;
            }
            self.line += 1;
            let line = self.line;

            let outcome_field = record.get(outcome_idx).unwrap_or(b"");
            let outcome = parse_outcome(outcome_field)
                .map_err(|reason| Error::Parse { line, reason })?;
            let Some(outcome) = outcome else {
                self.skipped += 1;
                continue;
            };
            let row = utf8_field(&record, row_idx, line)?;
            let column = utf8_field(&record, column_idx, line)?;
            chunk.push(outcome, row, column);
        }

        if chunk.is_empty() {
            return Ok(None);
        }
        debug!("Read chunk of {} records up to line {}", chunk.len(), self.line);
        Ok(Some(chunk))
    }

    pub fn read_all(&mut self) -> Result<Vec<OutcomeChunk>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk()? {
            chunks.push(chunk);
        }
        if self.skipped > 0 {
            info!("Skipped {} rows with a missing outcome", self.skipped);
        }
        Ok(chunks)
    }

    fn field_idx(&self, field: OutcomeField) -> Result<usize> {
        self.mapping
            .idx(field)
            .ok_or_else(|| Error::MissingColumn(field.to_string()))
    }
}

/// Parses a whole field as a signed integer. Trailing characters after the
/// digits are rejected.
fn parse_count(field: &[u8]) -> Option<i64> {
    let field = field.trim_ascii();
    let sign = matches!(field.first(), Some(b'+' | b'-')) as usize;
    let (value, used) = i64::from_radix_10_signed_checked(field);
    if used <= sign || used != field.len() {
        return None;
    }
    value
}

/// Reads (successes, trials) pairs from two columns of a tab-separated table.
pub fn read_count_observations<R: IoRead>(
    inner: R,
    successes_column: &str,
    trials_column: &str,
) -> Result<Vec<CountObservation>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(inner);
    let headers = reader.byte_headers()?.clone();
    let k_idx = column_index(&headers, successes_column)?;
    let n_idx = column_index(&headers, trials_column)?;

    let mut counts = Vec::new();
    let mut record = ByteRecord::new();
    let mut line = 1;
    while reader.read_byte_record(&mut record)? {
        line += 1;
        let parse = |idx: usize, name: &str| -> Result<i64> {
            let field = record.get(idx).unwrap_or(b"");
            parse_count(field).ok_or_else(|| Error::Parse {
                line,
                reason: format!(
                    "could not parse {} value '{}'",
                    name,
                    String::from_utf8_lossy(field)
                ),
            })
        };
        counts.push((parse(k_idx, successes_column)?, parse(n_idx, trials_column)?));
    }
    debug!("Read {} count rows", counts.len());
    observations_from_counts(counts)
}

/// Writes a labeled matrix as TSV, row labels in the first column.
pub fn write_matrix<W, R, C, T>(writer: W, matrix: &LabeledMatrix<R, C, T>, corner: &str) -> Result<()>
where
    W: Write,
    R: Display,
    C: Display,
    T: Display,
{
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);

    let mut header = vec![corner.to_string()];
    header.extend(matrix.columns().iter().map(|c| c.to_string()));
    writer.write_record(&header)?;

    for (i, label) in matrix.rows().iter().enumerate() {
        let mut record = vec![label.to_string()];
        record.extend(matrix.row(i).iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Fit summary and variance diagnostics of one shrinkage run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShrinkageReport {
    pub fit: FitResult,
    pub prior_mean: f64,
    pub aic: f64,
    pub bic: f64,
    pub n_rows: usize,
    pub n_columns: usize,
    pub diagnostics: Diagnostics,
}

impl ShrinkageReport {
    pub fn from_table<R, C>(table: &ShrinkageTable<R, C>) -> Self {
        Self {
            fit: table.fit.clone(),
            prior_mean: table.fit.prior_mean(),
            aic: table.fit.aic(),
            bic: table.fit.bic(),
            n_rows: table.shrunken.n_rows(),
            n_columns: table.shrunken.n_columns(),
            diagnostics: table.diagnostics.clone(),
        }
    }
}

pub fn write_report<W: Write, T: Serialize>(mut writer: W, report: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, report)?;
    writeln!(writer)?;
    Ok(())
}
