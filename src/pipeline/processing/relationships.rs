//! Relationship builder: validates foreign keys between the normalized record sets.
//!
//! Contributions to a committee missing from the master file are kept aside as orphans.
//! Linkages, transfers, expenditures and summaries with an unknown key are dropped.
//! Every dropped or orphaned record is entered in the exclusion ledger as a
//! `RelationshipGap`.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::domain::{
    CandidateRecord, CandidateSummaryRecord, CommitteeRecord, CommitteeStatus, CommitteeSummaryRecord,
    ContributionRecord, ExpenditureRecord, LinkSource, Office, RecordOrigin, TransferRecord,
};
use crate::pipeline::exclusions::{Exclusion, ExclusionLedger, ReasonCode};
use crate::pipeline::processing::normalize::NormalizedData;

static COMMITTEE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^C\d{8}$").expect("committee id pattern is valid"));

static CANDIDATE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[HSP][0-9][0-9A-Z]{2}[0-9]{5}$").expect("candidate id pattern is valid"));

/// `C` followed by eight digits
pub fn is_valid_committee_id(id: &str) -> bool {
    COMMITTEE_ID.is_match(id)
}

/// Office letter, digit, two alphanumerics (state or district), five digits
pub fn is_valid_candidate_id(id: &str) -> bool {
    CANDIDATE_ID.is_match(id)
}

/// Office sought, read from the first character of a valid candidate id
pub fn office_from_id(cand_id: &str) -> Option<Office> {
    if !is_valid_candidate_id(cand_id) {
        return None;
    }
    cand_id.chars().next().and_then(Office::from_code)
}

pub fn committee_status(filing_frequency: &str) -> CommitteeStatus {
    if filing_frequency.trim().eq_ignore_ascii_case("T") {
        CommitteeStatus::Terminated
    } else {
        CommitteeStatus::Active
    }
}

/// A validated candidate–committee link
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Linkage {
    pub cand_id: String,
    pub cmte_id: String,
    pub link_source: LinkSource,
}

/// Record sets with every foreign key checked
#[derive(Debug, Default)]
pub struct Relationships {
    pub committees: BTreeMap<String, CommitteeRecord>,
    pub candidates: BTreeMap<String, CandidateRecord>,
    /// Sorted by candidate then committee, one per pair
    pub linkages: Vec<Linkage>,
    pub contributions: Vec<ContributionRecord>,
    pub orphans: Vec<ContributionRecord>,
    pub transfers: Vec<TransferRecord>,
    pub expenditures: Vec<ExpenditureRecord>,
    pub committee_summaries: BTreeMap<String, CommitteeSummaryRecord>,
    pub candidate_summaries: BTreeMap<String, CandidateSummaryRecord>,
}

fn gap(ledger: &mut ExclusionLedger, kind: &'static str, origin: &RecordOrigin, key: &str, detail: String) {
    crate::metrics::relationships::gap(kind);
    ledger.record(Exclusion::new(
        origin.file.as_ref(),
        origin.line,
        ReasonCode::RelationshipGap,
        key,
        detail,
    ));
}

/// Check every foreign key and collect the linkage bridge
#[instrument(skip_all)]
pub fn build_relationships(data: NormalizedData, ledger: &mut ExclusionLedger) -> Relationships {
    let committees: BTreeMap<String, CommitteeRecord> =
        data.committees.into_iter().map(|c| (c.cmte_id.clone(), c)).collect();
    let candidates: BTreeMap<String, CandidateRecord> =
        data.candidates.into_iter().map(|c| (c.cand_id.clone(), c)).collect();

    let mut links: BTreeMap<(String, String), LinkSource> = BTreeMap::new();
    let mut add_link = |cand_id: &str, cmte_id: &str, source: LinkSource| {
        links
            .entry((cand_id.to_string(), cmte_id.to_string()))
            .and_modify(|existing| *existing = (*existing).min(source))
            .or_insert(source);
    };

    for link in &data.linkages {
        let key = format!("{}/{}", link.cand_id, link.cmte_id);
        if !candidates.contains_key(&link.cand_id) {
            gap(ledger, "linkage", &link.origin, &key, format!("unknown candidate {}", link.cand_id));
        } else if !committees.contains_key(&link.cmte_id) {
            gap(ledger, "linkage", &link.origin, &key, format!("unknown committee {}", link.cmte_id));
        } else {
            add_link(&link.cand_id, &link.cmte_id, LinkSource::Explicit);
        }
    }
    for committee in committees.values() {
        if let Some(cand_id) = &committee.cand_id {
            if candidates.contains_key(cand_id) {
                add_link(cand_id, &committee.cmte_id, LinkSource::CommitteeMaster);
            } else {
                gap(
                    ledger,
                    "inferred_linkage",
                    &committee.origin,
                    &committee.cmte_id,
                    format!("committee names unknown candidate {}", cand_id),
                );
            }
        }
    }
    for candidate in candidates.values() {
        if let Some(cmte_id) = &candidate.principal_committee {
            if committees.contains_key(cmte_id) {
                add_link(&candidate.cand_id, cmte_id, LinkSource::CandidatePrincipal);
            } else {
                gap(
                    ledger,
                    "inferred_linkage",
                    &candidate.origin,
                    &candidate.cand_id,
                    format!("principal committee {} unknown", cmte_id),
                );
            }
        }
    }
    let linkages: Vec<Linkage> = links
        .into_iter()
        .map(|((cand_id, cmte_id), link_source)| Linkage { cand_id, cmte_id, link_source })
        .collect();

    let mut contributions = Vec::with_capacity(data.contributions.len());
    let mut orphans = Vec::new();
    for contribution in data.contributions {
        if committees.contains_key(&contribution.cmte_id) {
            contributions.push(contribution);
        } else {
            gap(
                ledger,
                "orphan_contribution",
                &contribution.origin,
                &contribution.transaction_id,
                format!("committee {} not in committee master", contribution.cmte_id),
            );
            orphans.push(contribution);
        }
    }

    let mut transfers = Vec::with_capacity(data.transfers.len());
    for transfer in data.transfers {
        if !committees.contains_key(&transfer.cmte_id) {
            gap(ledger, "transfer", &transfer.origin, &transfer.transaction_id, format!("unknown committee {}", transfer.cmte_id));
        } else if !candidates.contains_key(&transfer.cand_id) {
            gap(ledger, "transfer", &transfer.origin, &transfer.transaction_id, format!("unknown candidate {}", transfer.cand_id));
        } else {
            transfers.push(transfer);
        }
    }

    let mut expenditures = Vec::with_capacity(data.expenditures.len());
    for expenditure in data.expenditures {
        if committees.contains_key(&expenditure.cmte_id) {
            expenditures.push(expenditure);
        } else {
            gap(
                ledger,
                "expenditure",
                &expenditure.origin,
                &expenditure.transaction_id,
                format!("unknown committee {}", expenditure.cmte_id),
            );
        }
    }

    let mut committee_summaries = BTreeMap::new();
    for summary in data.committee_summaries {
        if committees.contains_key(&summary.cmte_id) {
            committee_summaries.insert(summary.cmte_id.clone(), summary);
        } else {
            gap(ledger, "committee_summary", &summary.origin, &summary.cmte_id, "committee not in committee master".to_string());
        }
    }
    let mut candidate_summaries = BTreeMap::new();
    for summary in data.candidate_summaries {
        if candidates.contains_key(&summary.cand_id) {
            candidate_summaries.insert(summary.cand_id.clone(), summary);
        } else {
            gap(ledger, "candidate_summary", &summary.origin, &summary.cand_id, "candidate not in candidate master".to_string());
        }
    }

    if !orphans.is_empty() {
        let missing: HashSet<&str> = orphans.iter().map(|o| o.cmte_id.as_str()).collect();
        warn!(
            "{} contributions reference {} committees absent from the committee master",
            orphans.len(),
            missing.len()
        );
    }
    crate::metrics::relationships::linkages(linkages.len());
    crate::metrics::relationships::orphans(orphans.len());
    info!(
        "Relationships: {} committees, {} candidates, {} linkages, {} contributions, {} orphans",
        committees.len(),
        candidates.len(),
        linkages.len(),
        contributions.len(),
        orphans.len()
    );

    Relationships {
        committees,
        candidates,
        linkages,
        contributions,
        orphans,
        transfers,
        expenditures,
        committee_summaries,
        candidate_summaries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn origin(line: u64) -> RecordOrigin {
        RecordOrigin { file: Arc::from("test.txt"), line }
    }

    fn committee(id: &str, cand_id: Option<&str>, freq: &str) -> CommitteeRecord {
        CommitteeRecord {
            cmte_id: id.to_string(),
            name: format!("COMMITTEE {}", id),
            state: "CA".to_string(),
            designation: "P".to_string(),
            cmte_type: "H".to_string(),
            party: "DEM".to_string(),
            filing_frequency: freq.to_string(),
            connected_org: String::new(),
            cand_id: cand_id.map(String::from),
            origin: origin(1),
        }
    }

    fn candidate(id: &str, pcc: Option<&str>) -> CandidateRecord {
        CandidateRecord {
            cand_id: id.to_string(),
            name: "DOE, JANE".to_string(),
            party: "DEM".to_string(),
            election_year: Some(2024),
            office_state: "CA".to_string(),
            office_code: "H".to_string(),
            district: "12".to_string(),
            incumbency: "I".to_string(),
            principal_committee: pcc.map(String::from),
            origin: origin(1),
        }
    }

    fn contribution(sub_id: &str, cmte_id: &str, amount: i64) -> ContributionRecord {
        ContributionRecord {
            transaction_id: sub_id.to_string(),
            cmte_id: cmte_id.to_string(),
            transaction_type: "15".to_string(),
            entity_type: "IND".to_string(),
            name: "DOE, JOHN".to_string(),
            city: "OAKLAND".to_string(),
            state: "CA".to_string(),
            zip: "94612".to_string(),
            employer: String::new(),
            occupation: String::new(),
            date: None,
            amount: Decimal::from(amount),
            memo_text: String::new(),
            origin: origin(7),
        }
    }

    #[test]
    fn test_identifier_patterns() {
        assert!(is_valid_committee_id("C00123456"));
        assert!(!is_valid_committee_id("C0012345"));
        assert!(!is_valid_committee_id("X00123456"));
        assert!(is_valid_candidate_id("H0CA12345"));
        assert!(is_valid_candidate_id("P80001571"));
        assert!(!is_valid_candidate_id("Q0CA12345"));
        assert!(!is_valid_candidate_id("H0CA1234"));
    }

    #[test]
    fn test_office_from_id() {
        assert_eq!(office_from_id("S4TX00011"), Some(Office::Senate));
        assert_eq!(office_from_id("P80001571"), Some(Office::President));
        assert_eq!(office_from_id("bogus"), None);
    }

    #[test]
    fn test_committee_status_from_filing_frequency() {
        assert_eq!(committee_status("T"), CommitteeStatus::Terminated);
        assert_eq!(committee_status("Q"), CommitteeStatus::Active);
    }

    #[test]
    fn test_orphan_contribution_is_kept_aside_with_relationship_gap() {
        let data = NormalizedData {
            committees: vec![committee("C00000001", None, "Q")],
            contributions: vec![contribution("1", "C00000001", 100), contribution("2", "C99999999", 40)],
            ..Default::default()
        };
        let mut ledger = ExclusionLedger::new();
        let rel = build_relationships(data, &mut ledger);

        assert_eq!(rel.contributions.len(), 1);
        assert_eq!(rel.orphans.len(), 1);
        assert_eq!(rel.orphans[0].transaction_id, "2");
        assert_eq!(ledger.count(ReasonCode::RelationshipGap), 1);
        assert_eq!(ledger.entries()[0].record_key, "2");
    }

    #[test]
    fn test_linkages_deduplicated_keeping_most_explicit_source() {
        let data = NormalizedData {
            committees: vec![committee("C00000001", Some("H0CA12345"), "Q")],
            candidates: vec![candidate("H0CA12345", Some("C00000001"))],
            linkages: vec![crate::domain::LinkageRecord {
                cand_id: "H0CA12345".to_string(),
                cmte_id: "C00000001".to_string(),
                cmte_type: "H".to_string(),
                designation: "P".to_string(),
                origin: origin(2),
            }],
            ..Default::default()
        };
        let mut ledger = ExclusionLedger::new();
        let rel = build_relationships(data, &mut ledger);
        assert_eq!(rel.linkages.len(), 1);
        assert_eq!(rel.linkages[0].link_source, LinkSource::Explicit);
        assert_eq!(ledger.total(), 0);
    }

    #[test]
    fn test_inferred_links_without_linkage_file() {
        let data = NormalizedData {
            committees: vec![
                committee("C00000001", Some("H0CA12345"), "Q"),
                committee("C00000002", None, "Q"),
            ],
            candidates: vec![candidate("H0CA12345", Some("C00000002"))],
            ..Default::default()
        };
        let mut ledger = ExclusionLedger::new();
        let rel = build_relationships(data, &mut ledger);
        let sources: Vec<_> = rel.linkages.iter().map(|l| (l.cmte_id.as_str(), l.link_source)).collect();
        assert_eq!(
            sources,
            vec![
                ("C00000001", LinkSource::CommitteeMaster),
                ("C00000002", LinkSource::CandidatePrincipal)
            ]
        );
    }

    #[test]
    fn test_transfer_to_unknown_candidate_is_gap() {
        let data = NormalizedData {
            committees: vec![committee("C00000001", None, "Q")],
            transfers: vec![TransferRecord {
                transaction_id: "9".to_string(),
                cmte_id: "C00000001".to_string(),
                cand_id: "H0CA99999".to_string(),
                transaction_type: "24K".to_string(),
                date: None,
                amount: Decimal::from(5000),
                origin: origin(3),
            }],
            ..Default::default()
        };
        let mut ledger = ExclusionLedger::new();
        let rel = build_relationships(data, &mut ledger);
        assert!(rel.transfers.is_empty());
        assert_eq!(ledger.count(ReasonCode::RelationshipGap), 1);
    }
}
