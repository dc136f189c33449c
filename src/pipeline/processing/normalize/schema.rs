//! FEC bulk file layouts, header alias mapping and column-type checks.

use std::collections::HashMap;

use tracing::debug;

use crate::domain::FileType;
use crate::error::{EtlError, Result};
use crate::pipeline::ingestion::extract::RawRow;

use super::values::{infer_kind, parse_date, parse_money, ValueKind};

/// Expected content of a layout column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Money,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Rows with this field empty are excluded as `MissingField`
    pub required: bool,
}

const fn text(name: &'static str) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::Text, required: false }
}

const fn key(name: &'static str) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::Text, required: true }
}

const fn money(name: &'static str) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::Money, required: false }
}

const fn amount(name: &'static str) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::Money, required: true }
}

const fn date(name: &'static str) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::Date, required: false }
}

/// Positional layout of one bulk file type
#[derive(Debug)]
pub struct Layout {
    pub file_type: FileType,
    pub fields: &'static [FieldSpec],
}

impl Layout {
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn required(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }
}

static COMMITTEE_MASTER: Layout = Layout {
    file_type: FileType::CommitteeMaster,
    fields: &[
        key("CMTE_ID"),
        key("CMTE_NM"),
        text("TRES_NM"),
        text("CMTE_ST1"),
        text("CMTE_ST2"),
        text("CMTE_CITY"),
        text("CMTE_ST"),
        text("CMTE_ZIP"),
        text("CMTE_DSGN"),
        text("CMTE_TP"),
        text("CMTE_PTY_AFFILIATION"),
        text("CMTE_FILING_FREQ"),
        text("ORG_TP"),
        text("CONNECTED_ORG_NM"),
        text("CAND_ID"),
    ],
};

static CANDIDATE_MASTER: Layout = Layout {
    file_type: FileType::CandidateMaster,
    fields: &[
        key("CAND_ID"),
        key("CAND_NAME"),
        text("CAND_PTY_AFFILIATION"),
        text("CAND_ELECTION_YR"),
        text("CAND_OFFICE_ST"),
        text("CAND_OFFICE"),
        text("CAND_OFFICE_DISTRICT"),
        text("CAND_ICI"),
        text("CAND_STATUS"),
        text("CAND_PCC"),
        text("CAND_ST1"),
        text("CAND_ST2"),
        text("CAND_CITY"),
        text("CAND_ST"),
        text("CAND_ZIP"),
    ],
};

static LINKAGE: Layout = Layout {
    file_type: FileType::Linkage,
    fields: &[
        key("CAND_ID"),
        text("CAND_ELECTION_YR"),
        text("FEC_ELECTION_YR"),
        key("CMTE_ID"),
        text("CMTE_TP"),
        text("CMTE_DSGN"),
        text("LINKAGE_ID"),
    ],
};

static INDIVIDUAL_CONTRIBUTIONS: Layout = Layout {
    file_type: FileType::IndividualContributions,
    fields: &[
        key("CMTE_ID"),
        text("AMNDT_IND"),
        text("RPT_TP"),
        text("TRANSACTION_PGI"),
        text("IMAGE_NUM"),
        text("TRANSACTION_TP"),
        text("ENTITY_TP"),
        key("NAME"),
        text("CITY"),
        text("STATE"),
        text("ZIP_CODE"),
        text("EMPLOYER"),
        text("OCCUPATION"),
        date("TRANSACTION_DT"),
        amount("TRANSACTION_AMT"),
        text("OTHER_ID"),
        text("TRAN_ID"),
        text("FILE_NUM"),
        text("MEMO_CD"),
        text("MEMO_TEXT"),
        key("SUB_ID"),
    ],
};

static COMMITTEE_TO_CANDIDATE: Layout = Layout {
    file_type: FileType::CommitteeToCandidate,
    fields: &[
        key("CMTE_ID"),
        text("AMNDT_IND"),
        text("RPT_TP"),
        text("TRANSACTION_PGI"),
        text("IMAGE_NUM"),
        text("TRANSACTION_TP"),
        text("ENTITY_TP"),
        text("NAME"),
        text("CITY"),
        text("STATE"),
        text("ZIP_CODE"),
        text("EMPLOYER"),
        text("OCCUPATION"),
        date("TRANSACTION_DT"),
        amount("TRANSACTION_AMT"),
        text("OTHER_ID"),
        key("CAND_ID"),
        text("TRAN_ID"),
        text("FILE_NUM"),
        text("MEMO_CD"),
        text("MEMO_TEXT"),
        key("SUB_ID"),
    ],
};

static OPERATING_EXPENDITURES: Layout = Layout {
    file_type: FileType::OperatingExpenditures,
    fields: &[
        key("CMTE_ID"),
        text("AMNDT_IND"),
        text("RPT_YR"),
        text("RPT_TP"),
        text("IMAGE_NUM"),
        text("LINE_NUM"),
        text("FORM_TP_CD"),
        text("SCHED_TP_CD"),
        text("NAME"),
        text("CITY"),
        text("STATE"),
        text("ZIP_CODE"),
        date("TRANSACTION_DT"),
        amount("TRANSACTION_AMT"),
        text("TRANSACTION_PGI"),
        text("PURPOSE"),
        text("CATEGORY"),
        text("CATEGORY_DESC"),
        text("MEMO_CD"),
        text("MEMO_TEXT"),
        text("ENTITY_TP"),
        key("SUB_ID"),
        text("FILE_NUM"),
        text("TRAN_ID"),
        text("BACK_REF_TRAN_ID"),
    ],
};

static COMMITTEE_SUMMARY: Layout = Layout {
    file_type: FileType::CommitteeSummary,
    fields: &[
        key("CMTE_ID"),
        text("CMTE_NM"),
        text("CMTE_TP"),
        text("CMTE_DSGN"),
        text("CMTE_FILING_FREQ"),
        amount("TTL_RECEIPTS"),
        money("TRANS_FROM_AFF"),
        money("INDV_CONTRIB"),
        money("OTHER_POL_CMTE_CONTRIB"),
        money("CAND_CONTRIB"),
        money("CAND_LOANS"),
        money("TTL_LOANS_RECEIVED"),
        amount("TTL_DISB"),
        money("TRANF_TO_AFF"),
        money("INDV_REFUNDS"),
        money("OTHER_POL_CMTE_REFUNDS"),
        money("CAND_LOAN_REPAY"),
        money("LOAN_REPAY"),
        money("COH_BOP"),
        money("COH_COP"),
        money("DEBTS_OWED_BY"),
        money("NONFED_TRANS_RECEIVED"),
        money("CONTRIB_TO_OTHER_CMTE"),
        money("IND_EXP"),
        money("PTY_COORD_EXP"),
        money("NONFED_SHARE_EXP"),
        date("CVG_END_DT"),
    ],
};

static CANDIDATE_SUMMARY: Layout = Layout {
    file_type: FileType::CandidateSummary,
    fields: &[
        key("CAND_ID"),
        text("CAND_NAME"),
        text("CAND_ICI"),
        text("PTY_CD"),
        text("CAND_PTY_AFFILIATION"),
        amount("TTL_RECEIPTS"),
        money("TRANS_FROM_AUTH"),
        amount("TTL_DISB"),
        money("TRANS_TO_AUTH"),
        money("COH_BOP"),
        money("COH_COP"),
        money("CAND_CONTRIB"),
        money("CAND_LOANS"),
        money("OTHER_LOANS"),
        money("CAND_LOAN_REPAY"),
        money("OTHER_LOAN_REPAY"),
        money("DEBTS_OWED_BY"),
        money("TTL_INDIV_CONTRIB"),
        text("CAND_OFFICE_ST"),
        text("CAND_OFFICE_DISTRICT"),
        text("SPEC_ELECTION"),
        text("PRIM_ELECTION"),
        text("RUN_ELECTION"),
        text("GEN_ELECTION"),
        text("GEN_ELECTION_PRECENT"),
        money("OTHER_POL_CMTE_CONTRIB"),
        money("POL_PTY_CONTRIB"),
        date("CVG_END_DT"),
        money("INDIV_REFUNDS"),
        money("CMTE_REFUNDS"),
    ],
};

pub fn layout_for(file_type: FileType) -> &'static Layout {
    match file_type {
        FileType::CommitteeMaster => &COMMITTEE_MASTER,
        FileType::CandidateMaster => &CANDIDATE_MASTER,
        FileType::Linkage => &LINKAGE,
        FileType::IndividualContributions => &INDIVIDUAL_CONTRIBUTIONS,
        FileType::CommitteeToCandidate => &COMMITTEE_TO_CANDIDATE,
        FileType::OperatingExpenditures => &OPERATING_EXPENDITURES,
        FileType::CommitteeSummary => &COMMITTEE_SUMMARY,
        FileType::CandidateSummary => &CANDIDATE_SUMMARY,
    }
}

/// Friendly header names seen in API exports and hand-made files.
/// Several targets are listed where the meaning depends on the layout.
const ALIASES: &[(&str, &[&str])] = &[
    ("COMMITTEE_ID", &["CMTE_ID"]),
    ("COMMITTEE", &["CMTE_ID"]),
    ("COMMITTEE_NAME", &["CMTE_NM"]),
    ("COMMITTEE_TYPE", &["CMTE_TP"]),
    ("COMMITTEE_DESIGNATION", &["CMTE_DSGN"]),
    ("DESIGNATION", &["CMTE_DSGN"]),
    ("FILING_FREQUENCY", &["CMTE_FILING_FREQ"]),
    ("CONNECTED_ORGANIZATION", &["CONNECTED_ORG_NM"]),
    ("CANDIDATE_ID", &["CAND_ID"]),
    ("CANDIDATE_NAME", &["CAND_NAME"]),
    ("PRINCIPAL_COMMITTEE", &["CAND_PCC"]),
    ("PRINCIPAL_CAMPAIGN_COMMITTEE", &["CAND_PCC"]),
    ("INCUMBENT_CHALLENGE", &["CAND_ICI"]),
    ("ELECTION_YEAR", &["CAND_ELECTION_YR"]),
    ("OFFICE", &["CAND_OFFICE"]),
    ("DISTRICT", &["CAND_OFFICE_DISTRICT"]),
    ("PARTY", &["CMTE_PTY_AFFILIATION", "CAND_PTY_AFFILIATION"]),
    ("PARTY_AFFILIATION", &["CMTE_PTY_AFFILIATION", "CAND_PTY_AFFILIATION"]),
    ("STATE", &["STATE", "CMTE_ST", "CAND_OFFICE_ST"]),
    ("CONTRIBUTOR_NAME", &["NAME"]),
    ("DONOR_NAME", &["NAME"]),
    ("PAYEE_NAME", &["NAME"]),
    ("RECIPIENT_NAME", &["NAME"]),
    ("CONTRIBUTOR_CITY", &["CITY"]),
    ("CONTRIBUTOR_STATE", &["STATE"]),
    ("CONTRIBUTOR_ZIP", &["ZIP_CODE"]),
    ("ZIP", &["ZIP_CODE", "CMTE_ZIP", "CAND_ZIP"]),
    ("CONTRIBUTOR_EMPLOYER", &["EMPLOYER"]),
    ("CONTRIBUTOR_OCCUPATION", &["OCCUPATION"]),
    ("AMOUNT", &["TRANSACTION_AMT"]),
    ("CONTRIBUTION_RECEIPT_AMOUNT", &["TRANSACTION_AMT"]),
    ("DISBURSEMENT_AMOUNT", &["TRANSACTION_AMT"]),
    ("DATE", &["TRANSACTION_DT"]),
    ("CONTRIBUTION_RECEIPT_DATE", &["TRANSACTION_DT"]),
    ("DISBURSEMENT_DATE", &["TRANSACTION_DT"]),
    ("TRANSACTION_DATE", &["TRANSACTION_DT"]),
    ("TRANSACTION_AMOUNT", &["TRANSACTION_AMT"]),
    ("TRANSACTION_TYPE", &["TRANSACTION_TP"]),
    ("RECEIPT_TYPE", &["TRANSACTION_TP"]),
    ("ENTITY_TYPE", &["ENTITY_TP"]),
    ("TRANSACTION_ID", &["SUB_ID"]),
    ("SUB_ID", &["SUB_ID"]),
    ("MEMO_CODE", &["MEMO_CD"]),
    ("PURPOSE", &["PURPOSE"]),
    ("DISBURSEMENT_DESCRIPTION", &["PURPOSE"]),
    ("TOTAL_RECEIPTS", &["TTL_RECEIPTS"]),
    ("RECEIPTS", &["TTL_RECEIPTS"]),
    ("TOTAL_DISBURSEMENTS", &["TTL_DISB"]),
    ("DISBURSEMENTS", &["TTL_DISB"]),
    ("CASH_ON_HAND_END_PERIOD", &["COH_COP"]),
    ("CASH_ON_HAND", &["COH_COP"]),
];

/// Uppercase, turn every run of non-alphanumerics into one `_`, trim the ends
pub fn header_token(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_uppercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Map one header cell onto a layout field name, if it names one
pub fn resolve_alias(layout: &Layout, raw: &str) -> Option<&'static str> {
    let token = header_token(raw);
    if let Some(spec) = layout.fields.iter().find(|f| f.name == token) {
        return Some(spec.name);
    }
    ALIASES
        .iter()
        .filter(|(alias, _)| *alias == token)
        .flat_map(|(_, targets)| targets.iter())
        .find_map(|target| layout.fields.iter().find(|f| f.name == *target).map(|f| f.name))
}

/// How the columns of one source map onto its layout
#[derive(Debug, Clone)]
pub struct ColumnMap {
    by_name: HashMap<&'static str, usize>,
    /// Number of fields a valid row must have
    pub width: usize,
    pub header: bool,
}

impl ColumnMap {
    pub fn positional(layout: &Layout) -> Self {
        let by_name = layout.fields.iter().enumerate().map(|(i, f)| (f.name, i)).collect();
        Self { by_name, width: layout.fields.len(), header: false }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Value of a field in a row, empty when the field is not mapped
    pub fn get<'a>(&self, fields: &'a [String], name: &str) -> &'a str {
        self.column(name)
            .and_then(|idx| fields.get(idx))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Outcome of inspecting a candidate header row
enum HeaderMatch {
    /// Every required field is named
    Complete(ColumnMap),
    /// Some layout fields are named but `missing` is not
    Partial { missing: &'static str },
    /// Nothing in the row names a layout field
    NotAHeader,
}

fn match_header(layout: &Layout, row: &RawRow) -> HeaderMatch {
    let mut by_name = HashMap::new();
    for (idx, cell) in row.fields.iter().enumerate() {
        if let Some(name) = resolve_alias(layout, cell) {
            by_name.entry(name).or_insert(idx);
        }
    }
    match layout.required().find(|f| !by_name.contains_key(f.name)) {
        None => HeaderMatch::Complete(ColumnMap { by_name, width: row.fields.len(), header: true }),
        // A single matching cell is more likely a data value than a header
        Some(_) if by_name.len() < 2 => HeaderMatch::NotAHeader,
        Some(missing) => HeaderMatch::Partial { missing: missing.name },
    }
}

/// Decide how a source's columns map onto its layout.
///
/// With `has_header` unset the first row counts as a header when it names every required
/// field. A first row that names some layout fields but not all required ones is treated
/// as a broken header rather than data.
pub fn detect_columns(
    layout: &Layout,
    file: &str,
    first_row: Option<&RawRow>,
    has_header: Option<bool>,
) -> Result<ColumnMap> {
    let Some(row) = first_row else {
        return Ok(ColumnMap::positional(layout));
    };
    match (has_header, match_header(layout, row)) {
        (Some(false), _) => Ok(ColumnMap::positional(layout)),
        (_, HeaderMatch::Complete(map)) => {
            debug!("{}: header detected with {} columns", file, map.width);
            Ok(map)
        }
        (Some(true), HeaderMatch::NotAHeader) => {
            let first = layout.required().next().map(|f| f.name).unwrap_or("?");
            Err(EtlError::schema_missing(file, first))
        }
        (_, HeaderMatch::Partial { missing }) => Err(EtlError::schema_missing(file, missing)),
        (None, HeaderMatch::NotAHeader) => Ok(ColumnMap::positional(layout)),
    }
}

/// Most frequent non-empty kind among sampled values
pub fn dominant_kind<'a>(values: impl Iterator<Item = &'a str>) -> ValueKind {
    let mut counts: HashMap<ValueKind, usize> = HashMap::new();
    for value in values {
        let kind = infer_kind(value);
        if kind != ValueKind::Empty {
            *counts.entry(kind).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(kind, _)| kind)
        .unwrap_or(ValueKind::Empty)
}

/// Check sampled rows against the layout's monetary and date columns.
///
/// A column where most non-empty values fail to parse as its declared kind means the
/// columns are shifted, which is reported as a schema mismatch on that field.
pub fn check_sample(layout: &Layout, columns: &ColumnMap, file: &str, sample: &[RawRow]) -> Result<()> {
    let rows: Vec<&RawRow> = sample.iter().filter(|r| r.fields.len() == columns.width).collect();
    if rows.is_empty() {
        return Ok(());
    }

    for spec in layout.fields.iter().filter(|f| f.kind != FieldKind::Text) {
        let Some(idx) = columns.column(spec.name) else {
            continue;
        };
        let values: Vec<&str> = rows
            .iter()
            .map(|r| r.fields[idx].as_str())
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            continue;
        }
        let parsed = values
            .iter()
            .filter(|v| match spec.kind {
                FieldKind::Money => parse_money(v).is_some(),
                FieldKind::Date => parse_date(v).is_some(),
                FieldKind::Text => true,
            })
            .count();
        if parsed * 2 < values.len() {
            let kind = dominant_kind(values.iter().copied());
            return Err(EtlError::SchemaMismatch {
                file: file.to_string(),
                field: spec.name.to_string(),
                detail: format!(
                    "sampled as {} ({} of {} values parse as {:?})",
                    kind,
                    parsed,
                    values.len(),
                    spec.kind
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(line: u64, cells: &[&str]) -> RawRow {
        RawRow { line, fields: cells.iter().map(|s| s.to_string()).collect() }
    }

    #[test]
    fn test_layout_widths_match_bulk_files() {
        assert_eq!(layout_for(FileType::CommitteeMaster).fields.len(), 15);
        assert_eq!(layout_for(FileType::CandidateMaster).fields.len(), 15);
        assert_eq!(layout_for(FileType::Linkage).fields.len(), 7);
        assert_eq!(layout_for(FileType::IndividualContributions).fields.len(), 21);
        assert_eq!(layout_for(FileType::CommitteeToCandidate).fields.len(), 22);
        assert_eq!(layout_for(FileType::OperatingExpenditures).fields.len(), 25);
        assert_eq!(layout_for(FileType::CommitteeSummary).fields.len(), 27);
        assert_eq!(layout_for(FileType::CandidateSummary).fields.len(), 30);
    }

    #[test]
    fn test_alias_mapping_ignores_case_and_punctuation() {
        let layout = layout_for(FileType::CommitteeMaster);
        assert_eq!(resolve_alias(layout, "committee_id"), Some("CMTE_ID"));
        assert_eq!(resolve_alias(layout, "Committee ID"), Some("CMTE_ID"));
        assert_eq!(resolve_alias(layout, "CMTE_ID"), Some("CMTE_ID"));
        assert_eq!(resolve_alias(layout, "party"), Some("CMTE_PTY_AFFILIATION"));
        assert_eq!(resolve_alias(layout, "favorite color"), None);

        let candidates = layout_for(FileType::CandidateMaster);
        assert_eq!(resolve_alias(candidates, "Party"), Some("CAND_PTY_AFFILIATION"));
    }

    #[test]
    fn test_header_detected_when_required_fields_named() {
        let layout = layout_for(FileType::CommitteeMaster);
        let header = row(1, &["Committee ID", "Committee Name", "Committee Type"]);
        let map = detect_columns(layout, "cm.csv", Some(&header), None).unwrap();
        assert!(map.header);
        assert_eq!(map.width, 3);
        assert_eq!(map.column("CMTE_TP"), Some(2));
    }

    #[test]
    fn test_data_row_falls_back_to_positional() {
        let layout = layout_for(FileType::CommitteeMaster);
        let data = row(1, &["C00000001", "FRIENDS OF X"]);
        let map = detect_columns(layout, "cm.txt", Some(&data), None).unwrap();
        assert!(!map.header);
        assert_eq!(map.width, 15);
    }

    #[test]
    fn test_header_missing_required_field_is_schema_mismatch() {
        let layout = layout_for(FileType::IndividualContributions);
        let header = row(1, &["committee_id", "name", "amount", "date"]);
        let err = detect_columns(layout, "itcont.csv", Some(&header), None).unwrap_err();
        match err {
            EtlError::SchemaMismatch { field, .. } => assert_eq!(field, "SUB_ID"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_shifted_amount_column_is_schema_mismatch() {
        let layout = layout_for(FileType::IndividualContributions);
        let columns = ColumnMap::positional(layout);
        let mut cells = vec![""; 21];
        cells[0] = "C00000001";
        cells[7] = "DOE, JANE";
        cells[13] = "10152023";
        cells[14] = "ANYTOWN";
        cells[20] = "1";
        let sample = vec![row(1, &cells), row(2, &cells)];
        let err = check_sample(layout, &columns, "itcont.txt", &sample).unwrap_err();
        match err {
            EtlError::SchemaMismatch { field, detail, .. } => {
                assert_eq!(field, "TRANSACTION_AMT");
                assert!(detail.contains("Text"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_header_token() {
        assert_eq!(header_token(" Committee  ID "), "COMMITTEE_ID");
        assert_eq!(header_token("cmte-id"), "CMTE_ID");
        assert_eq!(header_token("__x__"), "X");
    }
}
