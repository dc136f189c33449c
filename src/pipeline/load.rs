//! Output tables and the run manifest.
//!
//! Tables are rendered to CSV in memory so the sink only has to stage, check and
//! promote bytes. Validation re-reads what was staged.

use std::collections::BTreeMap;
use std::io::Read;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants;
use crate::error::{EtlError, Result};
use crate::pipeline::exclusions::ExclusionLedger;
use crate::pipeline::ingestion::ExtractedSource;
use crate::pipeline::processing::aggregate::{ReconciliationReport, StarSchema};
use crate::pipeline::processing::resolve::NameMap;
use crate::pipeline::processing::statistics::StatisticsReport;

/// One rendered CSV table
#[derive(Debug, Clone)]
pub struct OutputTable {
    pub name: &'static str,
    /// Columns that must exist and be non-empty on every row
    pub key_columns: &'static [&'static str],
    pub rows: usize,
    pub bytes: Vec<u8>,
}

impl OutputTable {
    pub fn from_rows<T: Serialize>(name: &'static str, key_columns: &'static [&'static str], rows: &[T]) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        // serde only emits a header with the first row
        if rows.is_empty() {
            writer.write_record(key_columns)?;
        }
        for row in rows {
            writer.serialize(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| EtlError::io(name, e.into_error()))?;
        Ok(Self { name, key_columns, rows: rows.len(), bytes })
    }
}

/// Check a staged table: key columns present and filled in; returns the data row count
pub fn validate_table(name: &str, key_columns: &[&str], input: impl Read) -> Result<usize> {
    let invalid = |message: String| EtlError::OutputValidation { table: name.to_string(), message };
    let mut reader = csv::ReaderBuilder::new().from_reader(input);
    let headers = reader.headers()?.clone();
    let mut positions = Vec::with_capacity(key_columns.len());
    for column in key_columns {
        let pos = headers
            .iter()
            .position(|h| h == *column)
            .ok_or_else(|| invalid(format!("missing column {}", column)))?;
        positions.push((*column, pos));
    }
    let mut rows = 0usize;
    for record in reader.records() {
        let record = record?;
        rows += 1;
        for (column, pos) in &positions {
            if record.get(*pos).map_or(true, |v| v.trim().is_empty()) {
                return Err(invalid(format!("row {} has an empty {}", rows, column)));
            }
        }
    }
    Ok(rows)
}

/// Render every output table of a run
pub fn build_tables(
    schema: &StarSchema,
    names: &NameMap,
    ledger: &ExclusionLedger,
    stats: &StatisticsReport,
) -> Result<Vec<OutputTable>> {
    Ok(vec![
        OutputTable::from_rows(constants::DIM_DONORS, &["DONOR_ID", "NAME"], &schema.donors)?,
        OutputTable::from_rows(constants::DIM_COMMITTEES, &["CMTE_ID"], &schema.committees)?,
        OutputTable::from_rows(constants::DIM_CANDIDATES, &["CAND_ID"], &schema.candidates)?,
        OutputTable::from_rows(constants::DIM_DATES, &["DATE"], &schema.dates)?,
        OutputTable::from_rows(
            constants::FACT_CONTRIBUTIONS,
            &["TRANSACTION_ID", "DONOR_ID", "CMTE_ID"],
            &schema.facts,
        )?,
        OutputTable::from_rows(constants::BRIDGE_CANDIDATE_COMMITTEE, &["CAND_ID", "CMTE_ID"], &schema.bridge)?,
        OutputTable::from_rows(constants::ORPHAN_CONTRIBUTIONS, &["TRANSACTION_ID", "CMTE_ID"], &schema.orphans)?,
        OutputTable::from_rows(constants::NAME_MAP, &["RAW_NAME", "DONOR_ID"], names.entries())?,
        OutputTable::from_rows(constants::EXCLUSIONS, &["FILE", "REASON"], ledger.entries())?,
        OutputTable::from_rows(constants::TOP_DONORS, &["RANK", "DONOR_ID"], &schema.top_donors)?,
        OutputTable::from_rows(constants::TOP_COMMITTEES, &["RANK", "CMTE_ID"], &schema.top_committees)?,
        OutputTable::from_rows(constants::BREAKDOWN_COMMITTEE_CATEGORY, &["CATEGORY"], &schema.by_category)?,
        OutputTable::from_rows(constants::BREAKDOWN_DONOR_TIER, &["TIER"], &schema.by_tier)?,
        OutputTable::from_rows(constants::BREAKDOWN_QUARTERLY, &["QUARTER"], &schema.by_quarter)?,
        OutputTable::from_rows(constants::BREAKDOWN_PARTY, &["PARTY"], &schema.by_party)?,
        OutputTable::from_rows(constants::SUMMARY_TOTALS, &["Metric"], &schema.summary_totals)?,
        OutputTable::from_rows(constants::INEQUALITY_METRICS, &["METRIC"], &stats.inequality)?,
        OutputTable::from_rows(constants::LORENZ_CURVE, &["POPULATION_PCT", "AMOUNT_PCT"], &stats.lorenz)?,
        OutputTable::from_rows(constants::HYPOTHESIS_TESTS, &["HYPOTHESIS", "TEST", "STATUS"], &stats.tests)?,
    ])
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestOutput {
    pub file: String,
    pub rows: usize,
}

/// Everything needed to audit a run, written as `run_manifest.json`
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub run_id: String,
    pub cycle: u16,
    pub started_at: DateTime<Utc>,
    pub inputs: Vec<ExtractedSource>,
    pub included: BTreeMap<String, usize>,
    pub exclusions: BTreeMap<String, usize>,
    pub imputations: BTreeMap<String, usize>,
    pub reconciliation: ReconciliationReport,
    pub outputs: Vec<ManifestOutput>,
}

impl RunManifest {
    pub fn to_table(&self) -> Result<OutputTable> {
        let bytes = serde_json::to_vec_pretty(self)?;
        Ok(OutputTable { name: constants::RUN_MANIFEST, key_columns: &[], rows: 0, bytes })
    }
}
