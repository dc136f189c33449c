use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

/// Why a row or record was left out of (or flagged in) the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ReasonCode {
    /// A critical field was empty
    MissingField,
    /// A value could not be parsed (amount, year, ...)
    MalformedValue,
    /// The row had a different number of fields than its layout
    WrongFieldCount,
    /// A committee or candidate id did not match its identifier pattern
    InvalidIdentifier,
    /// A transaction id seen earlier in the run
    DuplicateRecord,
    /// FEC memo line whose amount is reported elsewhere
    MemoItem,
    /// A foreign key that does not resolve to a known entity
    RelationshipGap,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::MissingField => "MissingField",
            ReasonCode::MalformedValue => "MalformedValue",
            ReasonCode::WrongFieldCount => "WrongFieldCount",
            ReasonCode::InvalidIdentifier => "InvalidIdentifier",
            ReasonCode::DuplicateRecord => "DuplicateRecord",
            ReasonCode::MemoItem => "MemoItem",
            ReasonCode::RelationshipGap => "RelationshipGap",
        }
    }

    /// Error taxonomy class the reason belongs to
    pub fn error_class(&self) -> &'static str {
        match self {
            ReasonCode::RelationshipGap => "RelationshipGap",
            ReasonCode::MemoItem | ReasonCode::DuplicateRecord => "Filtered",
            _ => "ParseError",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One excluded or flagged record, as written to `exclusions.csv`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Exclusion {
    pub file: String,
    pub line: u64,
    pub reason: ReasonCode,
    pub error_class: &'static str,
    pub record_key: String,
    pub detail: String,
}

impl Exclusion {
    pub fn new(
        file: impl Into<String>,
        line: u64,
        reason: ReasonCode,
        record_key: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            reason,
            error_class: reason.error_class(),
            record_key: record_key.into(),
            detail: detail.into(),
        }
    }
}

/// Running tally of every exclusion and imputation in a run
#[derive(Debug, Default, Clone)]
pub struct ExclusionLedger {
    entries: Vec<Exclusion>,
    counts: BTreeMap<ReasonCode, usize>,
    imputations: BTreeMap<&'static str, usize>,
}

impl ExclusionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, exclusion: Exclusion) {
        debug!(
            reason = %exclusion.reason,
            file = %exclusion.file,
            line = exclusion.line,
            key = %exclusion.record_key,
            "excluded record: {}",
            exclusion.detail
        );
        crate::metrics::normalize::row_excluded(exclusion.reason.as_str());
        *self.counts.entry(exclusion.reason).or_insert(0) += 1;
        self.entries.push(exclusion);
    }

    /// Count a value filled in under a documented rule instead of excluding the row
    pub fn impute(&mut self, field: &'static str) {
        crate::metrics::normalize::imputation(field);
        *self.imputations.entry(field).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: ExclusionLedger) {
        for (reason, count) in other.counts {
            *self.counts.entry(reason).or_insert(0) += count;
        }
        for (field, count) in other.imputations {
            *self.imputations.entry(field).or_insert(0) += count;
        }
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[Exclusion] {
        &self.entries
    }

    pub fn counts(&self) -> &BTreeMap<ReasonCode, usize> {
        &self.counts
    }

    pub fn count(&self, reason: ReasonCode) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn imputations(&self) -> &BTreeMap<&'static str, usize> {
        &self.imputations
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    /// Log one line per reason code
    pub fn log_summary(&self) {
        for (reason, count) in &self.counts {
            info!(reason = %reason, count, "exclusions by reason");
        }
        for (field, count) in &self.imputations {
            info!(field, count, "imputed values");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_counts_by_reason() {
        let mut ledger = ExclusionLedger::new();
        ledger.record(Exclusion::new("itcont.txt", 3, ReasonCode::MissingField, "SUB1", "NAME is empty"));
        ledger.record(Exclusion::new("itcont.txt", 9, ReasonCode::MissingField, "SUB2", "CMTE_ID is empty"));
        ledger.record(Exclusion::new("itcont.txt", 12, ReasonCode::RelationshipGap, "SUB3", "unknown committee"));
        ledger.impute("TRANSACTION_DT");

        assert_eq!(ledger.count(ReasonCode::MissingField), 2);
        assert_eq!(ledger.count(ReasonCode::RelationshipGap), 1);
        assert_eq!(ledger.count(ReasonCode::MemoItem), 0);
        assert_eq!(ledger.total(), 3);
        assert_eq!(ledger.imputations().get("TRANSACTION_DT"), Some(&1));
        assert_eq!(ledger.entries()[2].error_class, "RelationshipGap");
    }

    #[test]
    fn test_merge_adds_counts() {
        let mut a = ExclusionLedger::new();
        a.record(Exclusion::new("a", 1, ReasonCode::MemoItem, "k", "memo"));
        let mut b = ExclusionLedger::new();
        b.record(Exclusion::new("b", 2, ReasonCode::MemoItem, "k2", "memo"));
        b.impute("TRANSACTION_DT");

        a.merge(b);
        assert_eq!(a.count(ReasonCode::MemoItem), 2);
        assert_eq!(a.total(), 2);
        assert_eq!(a.imputations().get("TRANSACTION_DT"), Some(&1));
    }
}
