//! Schema normalizer: turns raw rows into typed records.
//!
//! Each source is normalized independently. Rows are validated against the file type's
//! layout and either become a [`NormalizedRecord`] or an [`Exclusion`] with a reason code.
//! Schema problems that affect the whole file (missing required header, shifted columns)
//! are fatal and abort the run.

pub mod schema;
pub mod values;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::domain::{
    CandidateRecord, CandidateSummaryRecord, CommitteeRecord, CommitteeSummaryRecord,
    ContributionRecord, ExpenditureRecord, FileType, LinkageRecord, NormalizedRecord,
    RecordOrigin, TransferRecord,
};
use crate::error::{EtlError, Result};
use crate::pipeline::exclusions::{Exclusion, ExclusionLedger, ReasonCode};
use crate::pipeline::ingestion::extract::{RawChunk, RawRow};
use crate::pipeline::processing::relationships::{is_valid_candidate_id, is_valid_committee_id};
use crate::pipeline::processing::resolve::canonicalize;

use schema::{check_sample, detect_columns, layout_for, ColumnMap, Layout};
use values::{parse_date, parse_money, parse_year};

pub use values::round_cents;

/// Field name under which missing transaction dates are counted
pub const IMPUTED_DATE: &str = "TRANSACTION_DT";

/// Resolved column layout of one source
#[derive(Debug, Clone)]
pub struct SourceSchema {
    pub file_type: FileType,
    pub file_name: Arc<str>,
    pub layout: &'static Layout,
    pub columns: ColumnMap,
}

impl SourceSchema {
    /// Inspect the leading rows of a source: header detection, then type checks on a sample
    pub fn detect(source: &SourceConfig, file_name: Arc<str>, leading: &[RawRow], sample_rows: usize) -> Result<Self> {
        let layout = layout_for(source.file_type);
        let columns = detect_columns(layout, &file_name, leading.first(), source.has_header)?;
        let skip = usize::from(columns.header);
        let end = leading.len().min(skip + sample_rows);
        check_sample(layout, &columns, &file_name, &leading[skip.min(end)..end])?;
        Ok(Self { file_type: source.file_type, file_name, layout, columns })
    }

    fn get<'a>(&self, row: &'a RawRow, name: &str) -> &'a str {
        self.columns.get(&row.fields, name)
    }

    fn origin(&self, row: &RawRow) -> RecordOrigin {
        RecordOrigin { file: self.file_name.clone(), line: row.line }
    }

    fn record_key(&self, row: &RawRow) -> String {
        ["SUB_ID", "CMTE_ID", "CAND_ID"]
            .iter()
            .map(|name| self.get(row, name))
            .find(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("line {}", row.line))
    }

    fn exclude(&self, row: &RawRow, reason: ReasonCode, detail: impl Into<String>) -> Exclusion {
        Exclusion::new(self.file_name.as_ref(), row.line, reason, self.record_key(row), detail)
    }

    /// Validate one row; `Err` carries the exclusion to record
    pub fn normalize_row(
        &self,
        row: &RawRow,
        ledger: &mut ExclusionLedger,
    ) -> std::result::Result<NormalizedRecord, Exclusion> {
        if row.fields.len() != self.columns.width {
            return Err(self.exclude(
                row,
                ReasonCode::WrongFieldCount,
                format!("expected {} fields, found {}", self.columns.width, row.fields.len()),
            ));
        }
        for spec in self.layout.required() {
            if self.get(row, spec.name).is_empty() {
                return Err(self.exclude(row, ReasonCode::MissingField, format!("{} is empty", spec.name)));
            }
        }
        if self.get(row, "MEMO_CD").eq_ignore_ascii_case("X") {
            return Err(self.exclude(row, ReasonCode::MemoItem, "memo entry"));
        }

        match self.file_type {
            FileType::CommitteeMaster => self.committee(row).map(NormalizedRecord::Committee),
            FileType::CandidateMaster => self.candidate(row).map(NormalizedRecord::Candidate),
            FileType::Linkage => self.linkage(row).map(NormalizedRecord::Linkage),
            FileType::IndividualContributions => {
                self.contribution(row, ledger).map(NormalizedRecord::Contribution)
            }
            FileType::CommitteeToCandidate => self.transfer(row, ledger).map(NormalizedRecord::Transfer),
            FileType::OperatingExpenditures => {
                self.expenditure(row, ledger).map(NormalizedRecord::Expenditure)
            }
            FileType::CommitteeSummary => self.committee_summary(row).map(NormalizedRecord::CommitteeSummary),
            FileType::CandidateSummary => self.candidate_summary(row).map(NormalizedRecord::CandidateSummary),
        }
    }

    fn committee_id(&self, row: &RawRow) -> std::result::Result<String, Exclusion> {
        let id = self.get(row, "CMTE_ID").to_ascii_uppercase();
        if is_valid_committee_id(&id) {
            Ok(id)
        } else {
            Err(self.exclude(row, ReasonCode::InvalidIdentifier, format!("bad committee id '{}'", id)))
        }
    }

    fn candidate_id(&self, row: &RawRow) -> std::result::Result<String, Exclusion> {
        let id = self.get(row, "CAND_ID").to_ascii_uppercase();
        if is_valid_candidate_id(&id) {
            Ok(id)
        } else {
            Err(self.exclude(row, ReasonCode::InvalidIdentifier, format!("bad candidate id '{}'", id)))
        }
    }

    fn money(&self, row: &RawRow, name: &str) -> std::result::Result<rust_decimal::Decimal, Exclusion> {
        let raw = self.get(row, name);
        if raw.is_empty() && !self.layout.required().any(|f| f.name == name) {
            return Ok(rust_decimal::Decimal::ZERO);
        }
        parse_money(raw).ok_or_else(|| {
            self.exclude(row, ReasonCode::MalformedValue, format!("{} '{}' is not an amount", name, raw))
        })
    }

    /// Transaction date, or `None` counted as an imputation
    fn transaction_date(&self, row: &RawRow, ledger: &mut ExclusionLedger) -> Option<chrono::NaiveDate> {
        let date = parse_date(self.get(row, "TRANSACTION_DT"));
        if date.is_none() {
            ledger.impute(IMPUTED_DATE);
        }
        date
    }

    fn optional_committee(&self, row: &RawRow, name: &str) -> Option<String> {
        let id = self.get(row, name).to_ascii_uppercase();
        is_valid_committee_id(&id).then_some(id)
    }

    fn text(&self, row: &RawRow, name: &str) -> String {
        self.get(row, name).to_string()
    }

    fn committee(&self, row: &RawRow) -> std::result::Result<CommitteeRecord, Exclusion> {
        let cmte_id = self.committee_id(row)?;
        let cand = self.get(row, "CAND_ID").to_ascii_uppercase();
        Ok(CommitteeRecord {
            cmte_id,
            name: self.text(row, "CMTE_NM"),
            state: self.get(row, "CMTE_ST").to_ascii_uppercase(),
            designation: self.get(row, "CMTE_DSGN").to_ascii_uppercase(),
            cmte_type: self.get(row, "CMTE_TP").to_ascii_uppercase(),
            party: self.get(row, "CMTE_PTY_AFFILIATION").to_ascii_uppercase(),
            filing_frequency: self.get(row, "CMTE_FILING_FREQ").to_ascii_uppercase(),
            connected_org: self.text(row, "CONNECTED_ORG_NM"),
            cand_id: is_valid_candidate_id(&cand).then_some(cand),
            origin: self.origin(row),
        })
    }

    fn candidate(&self, row: &RawRow) -> std::result::Result<CandidateRecord, Exclusion> {
        let cand_id = self.candidate_id(row)?;
        let office_code = match self.get(row, "CAND_OFFICE") {
            "" => cand_id[..1].to_string(),
            code => code.to_ascii_uppercase(),
        };
        Ok(CandidateRecord {
            cand_id,
            name: self.text(row, "CAND_NAME"),
            party: self.get(row, "CAND_PTY_AFFILIATION").to_ascii_uppercase(),
            election_year: parse_year(self.get(row, "CAND_ELECTION_YR")),
            office_state: self.get(row, "CAND_OFFICE_ST").to_ascii_uppercase(),
            office_code,
            district: self.text(row, "CAND_OFFICE_DISTRICT"),
            incumbency: self.get(row, "CAND_ICI").to_ascii_uppercase(),
            principal_committee: self.optional_committee(row, "CAND_PCC"),
            origin: self.origin(row),
        })
    }

    fn linkage(&self, row: &RawRow) -> std::result::Result<LinkageRecord, Exclusion> {
        Ok(LinkageRecord {
            cand_id: self.candidate_id(row)?,
            cmte_id: self.committee_id(row)?,
            cmte_type: self.get(row, "CMTE_TP").to_ascii_uppercase(),
            designation: self.get(row, "CMTE_DSGN").to_ascii_uppercase(),
            origin: self.origin(row),
        })
    }

    fn contribution(
        &self,
        row: &RawRow,
        ledger: &mut ExclusionLedger,
    ) -> std::result::Result<ContributionRecord, Exclusion> {
        let cmte_id = self.committee_id(row)?;
        if canonicalize(self.get(row, "NAME")).is_empty() {
            return Err(self.exclude(row, ReasonCode::MissingField, "NAME has no letters or digits"));
        }
        let amount = self.money(row, "TRANSACTION_AMT")?;
        Ok(ContributionRecord {
            transaction_id: self.text(row, "SUB_ID"),
            cmte_id,
            transaction_type: self.get(row, "TRANSACTION_TP").to_ascii_uppercase(),
            entity_type: self.get(row, "ENTITY_TP").to_ascii_uppercase(),
            name: self.text(row, "NAME"),
            city: self.text(row, "CITY"),
            state: self.get(row, "STATE").to_ascii_uppercase(),
            zip: self.text(row, "ZIP_CODE"),
            employer: self.text(row, "EMPLOYER"),
            occupation: self.text(row, "OCCUPATION"),
            date: self.transaction_date(row, ledger),
            amount,
            memo_text: self.text(row, "MEMO_TEXT"),
            origin: self.origin(row),
        })
    }

    fn transfer(&self, row: &RawRow, ledger: &mut ExclusionLedger) -> std::result::Result<TransferRecord, Exclusion> {
        let cmte_id = self.committee_id(row)?;
        let cand_id = self.candidate_id(row)?;
        let amount = self.money(row, "TRANSACTION_AMT")?;
        Ok(TransferRecord {
            transaction_id: self.text(row, "SUB_ID"),
            cmte_id,
            cand_id,
            transaction_type: self.get(row, "TRANSACTION_TP").to_ascii_uppercase(),
            date: self.transaction_date(row, ledger),
            amount,
            origin: self.origin(row),
        })
    }

    fn expenditure(
        &self,
        row: &RawRow,
        ledger: &mut ExclusionLedger,
    ) -> std::result::Result<ExpenditureRecord, Exclusion> {
        let cmte_id = self.committee_id(row)?;
        let amount = self.money(row, "TRANSACTION_AMT")?;
        Ok(ExpenditureRecord {
            transaction_id: self.text(row, "SUB_ID"),
            cmte_id,
            payee: self.text(row, "NAME"),
            purpose: self.text(row, "PURPOSE"),
            date: self.transaction_date(row, ledger),
            amount,
            origin: self.origin(row),
        })
    }

    fn committee_summary(&self, row: &RawRow) -> std::result::Result<CommitteeSummaryRecord, Exclusion> {
        Ok(CommitteeSummaryRecord {
            cmte_id: self.committee_id(row)?,
            total_receipts: self.money(row, "TTL_RECEIPTS")?,
            total_disbursements: self.money(row, "TTL_DISB")?,
            cash_on_hand: self.money(row, "COH_COP")?,
            origin: self.origin(row),
        })
    }

    fn candidate_summary(&self, row: &RawRow) -> std::result::Result<CandidateSummaryRecord, Exclusion> {
        Ok(CandidateSummaryRecord {
            cand_id: self.candidate_id(row)?,
            total_receipts: self.money(row, "TTL_RECEIPTS")?,
            total_disbursements: self.money(row, "TTL_DISB")?,
            origin: self.origin(row),
        })
    }
}

/// All typed records of a run, grouped by kind
#[derive(Debug, Default, Clone)]
pub struct NormalizedData {
    pub committees: Vec<CommitteeRecord>,
    pub candidates: Vec<CandidateRecord>,
    pub linkages: Vec<LinkageRecord>,
    pub contributions: Vec<ContributionRecord>,
    pub transfers: Vec<TransferRecord>,
    pub expenditures: Vec<ExpenditureRecord>,
    pub committee_summaries: Vec<CommitteeSummaryRecord>,
    pub candidate_summaries: Vec<CandidateSummaryRecord>,
}

impl NormalizedData {
    pub fn push(&mut self, record: NormalizedRecord) {
        match record {
            NormalizedRecord::Committee(r) => self.committees.push(r),
            NormalizedRecord::Candidate(r) => self.candidates.push(r),
            NormalizedRecord::Linkage(r) => self.linkages.push(r),
            NormalizedRecord::Contribution(r) => self.contributions.push(r),
            NormalizedRecord::Transfer(r) => self.transfers.push(r),
            NormalizedRecord::Expenditure(r) => self.expenditures.push(r),
            NormalizedRecord::CommitteeSummary(r) => self.committee_summaries.push(r),
            NormalizedRecord::CandidateSummary(r) => self.candidate_summaries.push(r),
        }
    }

    pub fn len(&self) -> usize {
        self.committees.len()
            + self.candidates.len()
            + self.linkages.len()
            + self.contributions.len()
            + self.transfers.len()
            + self.expenditures.len()
            + self.committee_summaries.len()
            + self.candidate_summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-source normalization state
struct SourceState {
    config: SourceConfig,
    /// Chunks held back until enough rows are buffered to detect the schema
    pending: Vec<RawChunk>,
    pending_rows: usize,
    schema: Option<SourceSchema>,
    records: Vec<NormalizedRecord>,
    ledger: ExclusionLedger,
    finished: bool,
}

/// Consumes raw chunks from every source and produces typed records.
///
/// Chunks of different sources may arrive interleaved; within a source they arrive in
/// order. Results are merged in configuration order so the output does not depend on
/// worker scheduling.
pub struct SchemaNormalizer {
    sources: Vec<SourceState>,
    sample_rows: usize,
}

impl SchemaNormalizer {
    pub fn new(sources: &[SourceConfig], sample_rows: usize) -> Self {
        let sources = sources
            .iter()
            .map(|config| SourceState {
                config: config.clone(),
                pending: Vec::new(),
                pending_rows: 0,
                schema: None,
                records: Vec::new(),
                ledger: ExclusionLedger::new(),
                finished: false,
            })
            .collect();
        Self { sources, sample_rows: sample_rows.max(1) }
    }

    fn state(&mut self, source_index: usize) -> Result<&mut SourceState> {
        self.sources
            .get_mut(source_index)
            .ok_or_else(|| EtlError::Config(format!("chunk for unknown source #{}", source_index)))
    }

    /// Take one chunk; rows are normalized as soon as the source's schema is known
    pub fn accept(&mut self, chunk: RawChunk) -> Result<()> {
        let sample_rows = self.sample_rows;
        let state = self.state(chunk.source_index)?;
        if state.schema.is_some() {
            normalize_rows(state, &chunk.rows);
            return Ok(());
        }
        state.pending_rows += chunk.rows.len();
        state.pending.push(chunk);
        // header row + sample
        if state.pending_rows > sample_rows {
            resolve_schema(state, sample_rows)?;
        }
        Ok(())
    }

    /// Mark a source fully read
    pub fn finish_source(&mut self, source_index: usize) -> Result<()> {
        let sample_rows = self.sample_rows;
        let state = self.state(source_index)?;
        if state.schema.is_none() {
            resolve_schema(state, sample_rows)?;
        }
        state.finished = true;
        crate::metrics::normalize::records_emitted(state.config.file_type.as_str(), state.records.len());
        info!(
            "Normalized {}: {} records, {} excluded",
            state.config.display_name(),
            state.records.len(),
            state.ledger.total()
        );
        Ok(())
    }

    /// Merge all sources in configuration order, excluding duplicate keys after the first
    pub fn finish(self) -> (NormalizedData, ExclusionLedger) {
        let mut data = NormalizedData::default();
        let mut ledger = ExclusionLedger::new();
        let mut seen: HashSet<(FileType, String)> = HashSet::new();

        for state in self.sources {
            if !state.finished {
                warn!("Source {} did not report completion", state.config.display_name());
            }
            let file_type = state.config.file_type;
            ledger.merge(state.ledger);
            for record in state.records {
                if let Some(key) = record.dedup_key() {
                    if !seen.insert((file_type, key.to_string())) {
                        let origin = record.origin();
                        ledger.record(Exclusion::new(
                            origin.file.as_ref(),
                            origin.line,
                            ReasonCode::DuplicateRecord,
                            key,
                            format!("{} already seen in {}", key, file_type),
                        ));
                        continue;
                    }
                }
                data.push(record);
            }
        }
        (data, ledger)
    }
}

fn resolve_schema(state: &mut SourceState, sample_rows: usize) -> Result<()> {
    let pending = std::mem::take(&mut state.pending);
    state.pending_rows = 0;
    let leading: Vec<RawRow> = pending
        .iter()
        .flat_map(|c| c.rows.iter())
        .take(sample_rows + 1)
        .cloned()
        .collect();
    let file_name: Arc<str> = pending
        .first()
        .map(|c| c.file_name.clone())
        .unwrap_or_else(|| Arc::from(state.config.display_name()));

    let schema = SourceSchema::detect(&state.config, file_name, &leading, sample_rows)?;
    debug!(
        "{}: {} mode, width {}",
        schema.file_name,
        if schema.columns.header { "header" } else { "positional" },
        schema.columns.width
    );
    let header_line = if schema.columns.header { leading.first().map(|r| r.line) } else { None };
    state.schema = Some(schema);

    for chunk in pending {
        let rows: Vec<RawRow> = chunk
            .rows
            .into_iter()
            .filter(|r| Some(r.line) != header_line)
            .collect();
        normalize_rows(state, &rows);
    }
    Ok(())
}

fn normalize_rows(state: &mut SourceState, rows: &[RawRow]) {
    let Some(schema) = state.schema.as_ref() else {
        return;
    };
    for row in rows {
        match schema.normalize_row(row, &mut state.ledger) {
            Ok(record) => state.records.push(record),
            Err(exclusion) => state.ledger.record(exclusion),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn chunk(source_index: usize, file_type: FileType, rows: Vec<Vec<&str>>) -> RawChunk {
        RawChunk {
            source_index,
            file_type,
            file_name: Arc::from("test.txt"),
            sequence: 0,
            rows: rows
                .into_iter()
                .enumerate()
                .map(|(i, cells)| RawRow {
                    line: i as u64 + 1,
                    fields: cells.into_iter().map(String::from).collect(),
                })
                .collect(),
        }
    }

    fn itcont_row<'a>(cmte: &'a str, name: &'a str, date: &'a str, amount: &'a str, sub_id: &'a str) -> Vec<&'a str> {
        let mut cells = vec![""; 21];
        cells[0] = cmte;
        cells[5] = "15";
        cells[6] = "IND";
        cells[7] = name;
        cells[9] = "CA";
        cells[13] = date;
        cells[14] = amount;
        cells[20] = sub_id;
        cells
    }

    fn run(file_type: FileType, rows: Vec<Vec<&str>>) -> Result<(NormalizedData, ExclusionLedger)> {
        let sources = vec![SourceConfig::new(file_type, "test.txt")];
        let mut normalizer = SchemaNormalizer::new(&sources, 50);
        normalizer.accept(chunk(0, file_type, rows))?;
        normalizer.finish_source(0)?;
        Ok(normalizer.finish())
    }

    #[test]
    fn test_contribution_rows_are_typed() {
        let (data, ledger) = run(
            FileType::IndividualContributions,
            vec![itcont_row("C00000001", "DOE, JANE", "10152023", "250", "1001")],
        )
        .unwrap();
        assert_eq!(ledger.total(), 0);
        let c = &data.contributions[0];
        assert_eq!(c.amount, Decimal::from(250));
        assert_eq!(c.date, chrono::NaiveDate::from_ymd_opt(2023, 10, 15));
        assert_eq!(c.state, "CA");
        assert_eq!(c.origin.line, 1);
    }

    #[test]
    fn test_row_level_exclusions_carry_reason_codes() {
        let mut memo = itcont_row("C00000001", "DOE, JANE", "10152023", "50", "1005");
        memo[18] = "X";
        let (data, ledger) = run(
            FileType::IndividualContributions,
            vec![
                itcont_row("C00000001", "DOE, JANE", "10152023", "250", "1001"),
                itcont_row("C00000001", "", "10152023", "250", "1002"),
                itcont_row("C00000001", "ROE, RICHARD", "10152023", "lots", "1003"),
                itcont_row("BADID", "ROE, RICHARD", "10152023", "10", "1004"),
                memo,
                vec!["C00000001", "too", "short"],
                itcont_row("C00000001", "DOE, JANE", "10152023", "250", "1001"),
            ],
        )
        .unwrap();

        assert_eq!(data.contributions.len(), 1);
        assert_eq!(ledger.count(ReasonCode::MissingField), 1);
        assert_eq!(ledger.count(ReasonCode::MalformedValue), 1);
        assert_eq!(ledger.count(ReasonCode::InvalidIdentifier), 1);
        assert_eq!(ledger.count(ReasonCode::MemoItem), 1);
        assert_eq!(ledger.count(ReasonCode::WrongFieldCount), 1);
        assert_eq!(ledger.count(ReasonCode::DuplicateRecord), 1);
    }

    #[test]
    fn test_missing_date_is_imputed_not_excluded() {
        let (data, ledger) = run(
            FileType::IndividualContributions,
            vec![
                itcont_row("C00000001", "DOE, JANE", "", "250", "1001"),
                itcont_row("C00000001", "DOE, JANE", "20231015", "250", "1002"),
            ],
        )
        .unwrap();
        assert_eq!(data.contributions.len(), 2);
        assert_eq!(data.contributions[0].date, None);
        assert_eq!(ledger.imputations().get(IMPUTED_DATE), Some(&1));
        assert_eq!(ledger.total(), 0);
    }

    #[test]
    fn test_header_row_is_skipped() {
        let (data, _) = run(
            FileType::Linkage,
            vec![
                vec!["candidate_id", "committee_id"],
                vec!["H0CA01234", "C00000001"],
            ],
        )
        .unwrap();
        assert_eq!(data.linkages.len(), 1);
        assert_eq!(data.linkages[0].cmte_id, "C00000001");
        assert_eq!(data.linkages[0].origin.line, 2);
    }

    #[test]
    fn test_schema_detected_across_small_chunks() {
        let sources = vec![SourceConfig::new(FileType::Linkage, "ccl.csv")];
        let mut normalizer = SchemaNormalizer::new(&sources, 1);
        normalizer
            .accept(chunk(0, FileType::Linkage, vec![vec!["CAND_ID", "CMTE_ID"]]))
            .unwrap();
        let mut second = chunk(0, FileType::Linkage, vec![vec!["S2TX00011", "C00000002"]]);
        second.rows[0].line = 2;
        normalizer.accept(second).unwrap();
        normalizer.finish_source(0).unwrap();
        let (data, ledger) = normalizer.finish();
        assert_eq!(data.linkages.len(), 1);
        assert_eq!(ledger.total(), 0);
    }

    #[test]
    fn test_optional_ids_dropped_when_invalid() {
        let mut cells = vec![""; 15];
        cells[0] = "c00000001";
        cells[1] = "FRIENDS OF DOE";
        cells[9] = "h";
        cells[14] = "NOTACAND";
        let (data, _) = run(FileType::CommitteeMaster, vec![cells]).unwrap();
        let committee = &data.committees[0];
        assert_eq!(committee.cmte_id, "C00000001");
        assert_eq!(committee.cmte_type, "H");
        assert_eq!(committee.cand_id, None);
    }
}
