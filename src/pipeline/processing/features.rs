//! Derived analytical features: donor tiers, committee categories, temporal buckets and
//! shadow-PAC detection. Everything here is a pure function of its inputs.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::TierThresholds;
use crate::constants::PRIMARY_PARTIES;
use crate::domain::{CandidateRecord, CommitteeCategory, ContributionRecord, DonorTier, ElectionPeriod, TemporalPeriod, TransferRecord};

/// Party label used for candidates without a declared party
pub const UNKNOWN_PARTY: &str = "UNK";

/// First band whose lower bound the amount reaches, checked from Mega down
pub fn classify_tier(amount: Decimal, thresholds: &TierThresholds) -> DonorTier {
    if amount >= thresholds.mega {
        DonorTier::Mega
    } else if amount >= thresholds.major {
        DonorTier::Major
    } else if amount >= thresholds.significant {
        DonorTier::Significant
    } else if amount >= thresholds.small {
        DonorTier::Small
    } else {
        DonorTier::Nano
    }
}

pub fn categorize_committee(cmte_tp: &str) -> CommitteeCategory {
    match cmte_tp.trim().to_ascii_uppercase().as_str() {
        "O" | "U" => CommitteeCategory::SuperPac,
        "X" | "Y" | "Z" => CommitteeCategory::Party,
        "H" | "S" | "P" => CommitteeCategory::Candidate,
        "N" | "Q" | "V" | "W" => CommitteeCategory::TraditionalPac,
        _ => CommitteeCategory::Other,
    }
}

/// Calendar quarter and election period; Q1-Q2 are primary season, Q3-Q4 general
pub fn temporal_period(date: Option<NaiveDate>) -> TemporalPeriod {
    let Some(date) = date else {
        return TemporalPeriod::UNKNOWN;
    };
    let quarter = ((date.month() - 1) / 3 + 1) as u8;
    let period = if quarter <= 2 { ElectionPeriod::Primary } else { ElectionPeriod::General };
    TemporalPeriod { quarter: Some(quarter), period }
}

/// Negative amounts and refund transaction types (22x) reduce a donor's total
pub fn is_refund(contribution: &ContributionRecord) -> bool {
    contribution.amount.is_sign_negative() || contribution.transaction_type.starts_with("22")
}

/// Earmarked contributions passed through a conduit
pub fn is_bundled(contribution: &ContributionRecord) -> bool {
    matches!(contribution.transaction_type.as_str(), "15E" | "24I" | "24T")
        || contribution.memo_text.to_ascii_uppercase().contains("EARMARK")
}

/// A committee's candidate-directed disbursements split by the candidates' party
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartyShares {
    totals: BTreeMap<String, Decimal>,
}

impl PartyShares {
    pub fn add(&mut self, party: &str, amount: Decimal) {
        let party = if party.trim().is_empty() { UNKNOWN_PARTY } else { party.trim() };
        *self.totals.entry(party.to_ascii_uppercase()).or_insert(Decimal::ZERO) += amount;
    }

    /// Sum over parties with a positive net amount
    pub fn total(&self) -> Decimal {
        self.totals.values().filter(|v| v.is_sign_positive() && !v.is_zero()).copied().sum()
    }

    pub fn share(&self, party: &str) -> Option<f64> {
        let total = self.total();
        if total.is_zero() {
            return None;
        }
        let amount = self.totals.get(party).copied().unwrap_or(Decimal::ZERO);
        if !amount.is_sign_positive() {
            return Some(0.0);
        }
        (amount / total).to_f64()
    }

    /// DEM, REP, then the remaining known parties in lexicographic order
    pub fn ordered_parties(&self) -> Vec<&str> {
        let mut parties: Vec<&str> = PRIMARY_PARTIES
            .iter()
            .copied()
            .filter(|p| self.totals.contains_key(*p))
            .collect();
        parties.extend(
            self.totals
                .keys()
                .map(String::as_str)
                .filter(|p| !PRIMARY_PARTIES.contains(p) && *p != UNKNOWN_PARTY),
        );
        parties
    }

    /// Party with the largest share; ties go to the earlier party in visiting order
    pub fn leading_party(&self) -> Option<(&str, f64)> {
        let mut best: Option<(&str, f64)> = None;
        for party in self.ordered_parties() {
            if let Some(share) = self.share(party) {
                if share > 0.0 && best.map_or(true, |(_, s)| share > s) {
                    best = Some((party, share));
                }
            }
        }
        best
    }
}

/// Group itemized committee→candidate transfers into per-committee party shares
pub fn party_shares<'a>(
    transfers: impl IntoIterator<Item = &'a TransferRecord>,
    candidates: &BTreeMap<String, CandidateRecord>,
) -> BTreeMap<String, PartyShares> {
    let mut shares: BTreeMap<String, PartyShares> = BTreeMap::new();
    for transfer in transfers {
        let party = candidates.get(&transfer.cand_id).map(|c| c.party.as_str()).unwrap_or("");
        shares.entry(transfer.cmte_id.clone()).or_default().add(party, transfer.amount);
    }
    shares
}

/// No declared party and not itself a party or candidate committee
pub fn is_facially_nonpartisan(declared_party: &str, category: CommitteeCategory) -> bool {
    declared_party.trim().is_empty()
        && !matches!(category, CommitteeCategory::Party | CommitteeCategory::Candidate)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowPacAssessment {
    pub flagged: bool,
    pub dominant_party: Option<String>,
    pub share: Option<f64>,
}

impl ShadowPacAssessment {
    pub const NOT_FLAGGED: ShadowPacAssessment = ShadowPacAssessment {
        flagged: false,
        dominant_party: None,
        share: None,
    };
}

/// Flag a facially nonpartisan committee whose candidate-directed money goes at least
/// `threshold` to one party. Parties are visited DEM, REP, then the rest alphabetically;
/// the first to reach the threshold is reported.
pub fn assess_shadow_pac(shares: &PartyShares, threshold: f64, nonpartisan: bool) -> ShadowPacAssessment {
    if !nonpartisan {
        return ShadowPacAssessment::NOT_FLAGGED;
    }
    for party in shares.ordered_parties() {
        if let Some(share) = shares.share(party) {
            if share >= threshold {
                return ShadowPacAssessment {
                    flagged: true,
                    dominant_party: Some(party.to_string()),
                    share: Some(share),
                };
            }
        }
    }
    ShadowPacAssessment::NOT_FLAGGED
}
