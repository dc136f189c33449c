//! Domain data shapes shared across pipeline stages.
//!
//! Typed records produced by the schema normalizer live here together with the small
//! classification enums (tiers, categories, periods) that appear in the output tables.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::EtlError;

/// Versioned FEC bulk file layouts understood by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    CommitteeMaster,
    CandidateMaster,
    Linkage,
    IndividualContributions,
    CommitteeToCandidate,
    OperatingExpenditures,
    CommitteeSummary,
    CandidateSummary,
}

impl FileType {
    pub const ALL: [FileType; 8] = [
        FileType::CommitteeMaster,
        FileType::CandidateMaster,
        FileType::Linkage,
        FileType::IndividualContributions,
        FileType::CommitteeToCandidate,
        FileType::OperatingExpenditures,
        FileType::CommitteeSummary,
        FileType::CandidateSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::CommitteeMaster => constants::COMMITTEE_MASTER,
            FileType::CandidateMaster => constants::CANDIDATE_MASTER,
            FileType::Linkage => constants::LINKAGE,
            FileType::IndividualContributions => constants::INDIVIDUAL_CONTRIBUTIONS,
            FileType::CommitteeToCandidate => constants::COMMITTEE_TO_CANDIDATE,
            FileType::OperatingExpenditures => constants::OPERATING_EXPENDITURES,
            FileType::CommitteeSummary => constants::COMMITTEE_SUMMARY,
            FileType::CandidateSummary => constants::CANDIDATE_SUMMARY,
        }
    }

    /// File name prefix used by the FEC bulk download area (`cm24.zip`, `indiv24.zip`, ...)
    pub fn bulk_prefix(&self) -> &'static str {
        match self {
            FileType::CommitteeMaster => "cm",
            FileType::CandidateMaster => "cn",
            FileType::Linkage => "ccl",
            FileType::IndividualContributions => "indiv",
            FileType::CommitteeToCandidate => "pas2",
            FileType::OperatingExpenditures => "oppexp",
            FileType::CommitteeSummary => "webk",
            FileType::CandidateSummary => "weball",
        }
    }

    /// Master files must be fully loaded before facts can be related to them
    pub fn is_master(&self) -> bool {
        matches!(self, FileType::CommitteeMaster | FileType::CandidateMaster)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s.trim() || t.bulk_prefix() == s.trim())
            .ok_or_else(|| EtlError::Config(format!("Unknown file type: {}", s)))
    }
}

/// Where a record came from, kept for exclusion reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOrigin {
    pub file: Arc<str>,
    pub line: u64,
}

/// Donor tiers over total contribution amount, highest band first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DonorTier {
    Mega,
    Major,
    Significant,
    Small,
    Nano,
}

impl DonorTier {
    /// Evaluation order of the bands
    pub const DESCENDING: [DonorTier; 5] = [
        DonorTier::Mega,
        DonorTier::Major,
        DonorTier::Significant,
        DonorTier::Small,
        DonorTier::Nano,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DonorTier::Mega => "Mega",
            DonorTier::Major => "Major",
            DonorTier::Significant => "Significant",
            DonorTier::Small => "Small",
            DonorTier::Nano => "Nano",
        }
    }
}

impl fmt::Display for DonorTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommitteeCategory {
    #[serde(rename = "Super PAC")]
    SuperPac,
    #[serde(rename = "Traditional PAC")]
    TraditionalPac,
    Party,
    Candidate,
    Other,
}

impl CommitteeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitteeCategory::SuperPac => "Super PAC",
            CommitteeCategory::TraditionalPac => "Traditional PAC",
            CommitteeCategory::Party => "Party",
            CommitteeCategory::Candidate => "Candidate",
            CommitteeCategory::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitteeStatus {
    Active,
    Terminated,
    Unknown,
}

impl CommitteeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitteeStatus::Active => "Active",
            CommitteeStatus::Terminated => "Terminated",
            CommitteeStatus::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Office {
    House,
    Senate,
    President,
}

impl Office {
    pub fn from_code(code: char) -> Option<Self> {
        match code.to_ascii_uppercase() {
            'H' => Some(Office::House),
            'S' => Some(Office::Senate),
            'P' => Some(Office::President),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Office::House => "House",
            Office::Senate => "Senate",
            Office::President => "President",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElectionPeriod {
    Primary,
    General,
    Unknown,
}

impl ElectionPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElectionPeriod::Primary => "Primary",
            ElectionPeriod::General => "General",
            ElectionPeriod::Unknown => "Unknown",
        }
    }
}

/// Quarter and election period of a transaction date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemporalPeriod {
    /// 1..=4, `None` when the date was imputed as unknown
    pub quarter: Option<u8>,
    pub period: ElectionPeriod,
}

impl TemporalPeriod {
    pub const UNKNOWN: TemporalPeriod = TemporalPeriod {
        quarter: None,
        period: ElectionPeriod::Unknown,
    };

    pub fn quarter_label(&self) -> String {
        match self.quarter {
            Some(q) => format!("Q{}", q),
            None => "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkSource {
    /// Listed in the candidate-committee linkage file
    Explicit,
    /// `CAND_ID` column of the committee master
    CommitteeMaster,
    /// Principal campaign committee column of the candidate master
    CandidatePrincipal,
}

impl LinkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkSource::Explicit => "Explicit",
            LinkSource::CommitteeMaster => "CommitteeMaster",
            LinkSource::CandidatePrincipal => "CandidatePrincipal",
        }
    }
}

// ---------------------------------------------------------------------------
// Typed records emitted by the schema normalizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CommitteeRecord {
    pub cmte_id: String,
    pub name: String,
    pub state: String,
    pub designation: String,
    pub cmte_type: String,
    pub party: String,
    pub filing_frequency: String,
    pub connected_org: String,
    pub cand_id: Option<String>,
    pub origin: RecordOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub cand_id: String,
    pub name: String,
    pub party: String,
    pub election_year: Option<i32>,
    pub office_state: String,
    pub office_code: String,
    pub district: String,
    pub incumbency: String,
    pub principal_committee: Option<String>,
    pub origin: RecordOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkageRecord {
    pub cand_id: String,
    pub cmte_id: String,
    pub cmte_type: String,
    pub designation: String,
    pub origin: RecordOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContributionRecord {
    pub transaction_id: String,
    pub cmte_id: String,
    pub transaction_type: String,
    pub entity_type: String,
    pub name: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub employer: String,
    pub occupation: String,
    pub date: Option<NaiveDate>,
    pub amount: Decimal,
    pub memo_text: String,
    pub origin: RecordOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub transaction_id: String,
    pub cmte_id: String,
    pub cand_id: String,
    pub transaction_type: String,
    pub date: Option<NaiveDate>,
    pub amount: Decimal,
    pub origin: RecordOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpenditureRecord {
    pub transaction_id: String,
    pub cmte_id: String,
    pub payee: String,
    pub purpose: String,
    pub date: Option<NaiveDate>,
    pub amount: Decimal,
    pub origin: RecordOrigin,
}

/// Totals a committee reported on its summary filing
#[derive(Debug, Clone, PartialEq)]
pub struct CommitteeSummaryRecord {
    pub cmte_id: String,
    pub total_receipts: Decimal,
    pub total_disbursements: Decimal,
    pub cash_on_hand: Decimal,
    pub origin: RecordOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSummaryRecord {
    pub cand_id: String,
    pub total_receipts: Decimal,
    pub total_disbursements: Decimal,
    pub origin: RecordOrigin,
}

/// Every typed record the normalizer can emit
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedRecord {
    Committee(CommitteeRecord),
    Candidate(CandidateRecord),
    Linkage(LinkageRecord),
    Contribution(ContributionRecord),
    Transfer(TransferRecord),
    Expenditure(ExpenditureRecord),
    CommitteeSummary(CommitteeSummaryRecord),
    CandidateSummary(CandidateSummaryRecord),
}

impl NormalizedRecord {
    pub fn origin(&self) -> &RecordOrigin {
        match self {
            NormalizedRecord::Committee(r) => &r.origin,
            NormalizedRecord::Candidate(r) => &r.origin,
            NormalizedRecord::Linkage(r) => &r.origin,
            NormalizedRecord::Contribution(r) => &r.origin,
            NormalizedRecord::Transfer(r) => &r.origin,
            NormalizedRecord::Expenditure(r) => &r.origin,
            NormalizedRecord::CommitteeSummary(r) => &r.origin,
            NormalizedRecord::CandidateSummary(r) => &r.origin,
        }
    }

    /// Key under which a second occurrence counts as a duplicate; linkages have none
    /// because repeated links are collapsed by the relationship builder
    pub fn dedup_key(&self) -> Option<&str> {
        match self {
            NormalizedRecord::Committee(r) => Some(&r.cmte_id),
            NormalizedRecord::Candidate(r) => Some(&r.cand_id),
            NormalizedRecord::Linkage(_) => None,
            NormalizedRecord::Contribution(r) => Some(&r.transaction_id),
            NormalizedRecord::Transfer(r) => Some(&r.transaction_id),
            NormalizedRecord::Expenditure(r) => Some(&r.transaction_id),
            NormalizedRecord::CommitteeSummary(r) => Some(&r.cmte_id),
            NormalizedRecord::CandidateSummary(r) => Some(&r.cand_id),
        }
    }
}
