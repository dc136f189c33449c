//! Star-schema aggregation.
//!
//! Builds the fact table from related contributions, then the donor, committee and
//! candidate dimensions in parallel. Totals are reconciled before anything is written:
//! any internal mismatch is a fatal `Reconciliation` error, while receipts reported on
//! committee summary filings are compared and reported without failing the run.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::TierThresholds;
use crate::constants::PRIMARY_PARTIES;
use crate::domain::{CommitteeCategory, CommitteeStatus, DonorTier, ElectionPeriod, Office};
use crate::error::{EtlError, Result};
use crate::pipeline::processing::features::{
    assess_shadow_pac, categorize_committee, classify_tier, is_bundled, is_facially_nonpartisan, is_refund,
    party_shares, temporal_period, PartyShares, UNKNOWN_PARTY,
};
use crate::pipeline::processing::normalize::round_cents;
use crate::pipeline::processing::relationships::{committee_status, office_from_id, Linkage, Relationships};
use crate::pipeline::processing::resolve::NameMap;
use crate::pipeline::processing::statistics::StatisticsInput;

/// Settings the aggregator needs, taken from the validated configuration
#[derive(Debug, Clone)]
pub struct AggregateSettings {
    pub tiers: TierThresholds,
    pub shadow_pac_share: f64,
    pub super_connected_committees: usize,
    pub reconciliation_tolerance: f64,
    pub top_n: usize,
}

// ---------------------------------------------------------------------------
// Output rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FactRow {
    pub transaction_id: String,
    pub donor_id: String,
    pub cmte_id: String,
    pub amount: Decimal,
    pub date: Option<NaiveDate>,
    pub quarter: String,
    pub election_period: ElectionPeriod,
    pub is_refund: bool,
    pub is_bundled: bool,
    pub transaction_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DonorRow {
    pub donor_id: String,
    pub name: String,
    pub state: String,
    pub employer: String,
    pub occupation: String,
    pub total_amount: Decimal,
    pub contribution_count: usize,
    pub committee_count: usize,
    pub tier: DonorTier,
    pub super_connected: bool,
    pub first_contribution_date: Option<NaiveDate>,
    pub last_contribution_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CommitteeRow {
    pub cmte_id: String,
    pub name: String,
    pub category: CommitteeCategory,
    pub cmte_type: String,
    pub designation: String,
    pub state: String,
    pub declared_party: String,
    pub party_lean: String,
    pub shadow_pac: bool,
    pub shadow_party: Option<String>,
    pub shadow_share: Option<f64>,
    pub status: CommitteeStatus,
    pub connected_org: String,
    pub total_receipts: Decimal,
    pub contribution_count: usize,
    pub donor_count: usize,
    pub total_disbursements: Decimal,
    pub reported_receipts: Option<Decimal>,
    pub reported_disbursements: Option<Decimal>,
    pub cash_on_hand: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CandidateRow {
    pub cand_id: String,
    pub name: String,
    pub office: Option<Office>,
    pub party: String,
    pub state: String,
    pub district: String,
    pub incumbency: String,
    pub election_year: Option<i32>,
    pub linked_committees: usize,
    pub total_raised: Decimal,
    pub total_spent: Decimal,
    pub reported_receipts: Option<Decimal>,
    pub reported_disbursements: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DateRow {
    pub date: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub quarter: String,
    pub election_period: ElectionPeriod,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OrphanRow {
    pub transaction_id: String,
    pub cmte_id: String,
    pub contributor_name: String,
    pub state: String,
    pub amount: Decimal,
    pub date: Option<NaiveDate>,
    pub committee_status: CommitteeStatus,
    pub reason: &'static str,
    pub source_file: String,
    pub source_line: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TopDonorRow {
    pub rank: usize,
    pub donor_id: String,
    pub name: String,
    pub state: String,
    pub tier: DonorTier,
    pub total_amount: Decimal,
    pub committee_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TopCommitteeRow {
    pub rank: usize,
    pub cmte_id: String,
    pub name: String,
    pub category: CommitteeCategory,
    pub total_receipts: Decimal,
    pub donor_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct CategoryBreakdownRow {
    pub category: CommitteeCategory,
    pub committee_count: usize,
    pub total_receipts: Decimal,
    pub share_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TierBreakdownRow {
    pub tier: DonorTier,
    pub donor_count: usize,
    pub total_amount: Decimal,
    pub mean_amount: Decimal,
    pub median_amount: Decimal,
    pub mean_committees: f64,
    pub share_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct QuarterlyBreakdownRow {
    pub quarter: String,
    pub election_period: ElectionPeriod,
    pub donor_count: usize,
    pub contribution_count: usize,
    pub total_amount: Decimal,
    pub mean_amount: Decimal,
    pub median_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PartyBreakdownRow {
    pub party: String,
    pub candidate_count: usize,
    pub total_raised: Decimal,
    pub total_spent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryTotalRow {
    #[serde(rename = "Metric")]
    pub metric: &'static str,
    #[serde(rename = "Amount")]
    pub amount: Decimal,
}

/// Outcome of the total and per-committee checks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub source_total: Decimal,
    pub fact_total: Decimal,
    pub orphan_total: Decimal,
    pub difference: Decimal,
    pub relative_difference: f64,
    pub tolerance: f64,
    pub committees_checked: usize,
    pub committee_mismatches: usize,
    pub passed: bool,
    /// Committees with a reported total on their summary filing
    pub reported_checked: usize,
    /// Reported totals outside tolerance of the fact sum; informational only
    pub reported_mismatches: usize,
    pub reported_gaps: Vec<ReportedReceiptGap>,
}

/// A committee whose reported total receipts disagree with its itemized facts.
/// Reported receipts also cover non-individual and unitemized money, so these never fail a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportedReceiptGap {
    pub cmte_id: String,
    pub fact_total: Decimal,
    pub reported_receipts: Decimal,
    pub difference: Decimal,
    pub relative_difference: f64,
}

/// Every table produced by the aggregator
#[derive(Debug, Clone, Default)]
pub struct StarSchema {
    pub facts: Vec<FactRow>,
    pub donors: Vec<DonorRow>,
    pub committees: Vec<CommitteeRow>,
    pub candidates: Vec<CandidateRow>,
    pub dates: Vec<DateRow>,
    pub bridge: Vec<Linkage>,
    pub orphans: Vec<OrphanRow>,
    pub top_donors: Vec<TopDonorRow>,
    pub top_committees: Vec<TopCommitteeRow>,
    pub by_category: Vec<CategoryBreakdownRow>,
    pub by_tier: Vec<TierBreakdownRow>,
    pub by_quarter: Vec<QuarterlyBreakdownRow>,
    pub by_party: Vec<PartyBreakdownRow>,
    pub summary_totals: Vec<SummaryTotalRow>,
}

impl StarSchema {
    /// Inputs for the statistics engine; candidates with nothing raised are left out of
    /// the party comparison
    pub fn statistics_input(&self) -> StatisticsInput {
        let mut quarterly_counts = [0u64; 4];
        for fact in &self.facts {
            if let Some(q) = quarter_index(&fact.quarter) {
                quarterly_counts[q] += 1;
            }
        }
        let party_totals = |party: &str| -> Vec<f64> {
            self.candidates
                .iter()
                .filter(|c| c.party == party && c.total_raised > Decimal::ZERO)
                .map(|c| c.total_raised.to_f64().unwrap_or(0.0))
                .collect()
        };
        StatisticsInput {
            donor_totals: self
                .donors
                .iter()
                .map(|d| (d.tier, d.total_amount.to_f64().unwrap_or(0.0)))
                .collect(),
            super_connected_donors: self.donors.iter().filter(|d| d.super_connected).count(),
            quarterly_counts,
            dem_candidate_totals: party_totals(PRIMARY_PARTIES[0]),
            rep_candidate_totals: party_totals(PRIMARY_PARTIES[1]),
        }
    }
}

fn quarter_index(label: &str) -> Option<usize> {
    match label {
        "Q1" => Some(0),
        "Q2" => Some(1),
        "Q3" => Some(2),
        "Q4" => Some(3),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn median(values: &mut [Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.sort();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        round_cents((values[mid - 1] + values[mid]) / Decimal::TWO)
    } else {
        values[mid]
    }
}

fn mean(total: Decimal, count: usize) -> Decimal {
    if count == 0 {
        Decimal::ZERO
    } else {
        round_cents(total / Decimal::from(count))
    }
}

fn pct(part: Decimal, whole: Decimal) -> f64 {
    if whole.is_zero() {
        0.0
    } else {
        (part / whole * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
    }
}

/// Most frequent non-empty value, ties to the lexicographically smallest
fn most_common<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values.filter(|v| !v.is_empty()) {
        *counts.entry(value).or_insert(0) += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((value, count));
        }
    }
    best.map(|(v, _)| v.to_string()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Build all tables and reconcile them against the validated source total
#[instrument(skip_all)]
pub fn aggregate(
    rel: &Relationships,
    names: Arc<NameMap>,
    source_total: Decimal,
    settings: &AggregateSettings,
) -> Result<(StarSchema, ReconciliationReport)> {
    let facts: Vec<FactRow> = rel
        .contributions
        .par_iter()
        .map(|c| {
            let donor = names.resolve(&c.name, &c.state).ok_or_else(|| {
                EtlError::Reconciliation(format!(
                    "contribution {} ({}) has no resolved donor",
                    c.transaction_id, c.name
                ))
            })?;
            let period = temporal_period(c.date);
            Ok(FactRow {
                transaction_id: c.transaction_id.clone(),
                donor_id: donor.donor_id.clone(),
                cmte_id: c.cmte_id.clone(),
                amount: c.amount,
                date: c.date,
                quarter: period.quarter_label(),
                election_period: period.period,
                is_refund: is_refund(c),
                is_bundled: is_bundled(c),
                transaction_type: c.transaction_type.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut receipts: HashMap<&str, Decimal> = HashMap::new();
    for fact in &facts {
        *receipts.entry(fact.cmte_id.as_str()).or_insert(Decimal::ZERO) += fact.amount;
    }

    let (donors, (committees, candidates)) = rayon::join(
        || build_donors(&facts, rel, &names, settings),
        || {
            rayon::join(
                || build_committees(&facts, rel, settings),
                || build_candidates(rel, &receipts),
            )
        },
    );

    let dates: Vec<DateRow> = facts
        .iter()
        .filter_map(|f| f.date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|date| {
            let period = temporal_period(Some(date));
            DateRow {
                date,
                year: date.year(),
                month: date.month(),
                quarter: period.quarter_label(),
                election_period: period.period,
            }
        })
        .collect();

    let orphans: Vec<OrphanRow> = rel
        .orphans
        .iter()
        .map(|c| OrphanRow {
            transaction_id: c.transaction_id.clone(),
            cmte_id: c.cmte_id.clone(),
            contributor_name: c.name.clone(),
            state: c.state.clone(),
            amount: c.amount,
            date: c.date,
            committee_status: CommitteeStatus::Unknown,
            reason: "RelationshipGap",
            source_file: c.origin.file.to_string(),
            source_line: c.origin.line,
        })
        .collect();

    let mut schema = StarSchema {
        facts,
        donors,
        committees,
        candidates,
        dates,
        bridge: rel.linkages.clone(),
        orphans,
        ..Default::default()
    };

    let report = reconcile(&schema, rel, source_total, settings.reconciliation_tolerance)?;
    summarize(&mut schema, settings.top_n, &report);

    info!(
        "Aggregated {} facts, {} donors, {} committees, {} candidates, {} dates",
        schema.facts.len(),
        schema.donors.len(),
        schema.committees.len(),
        schema.candidates.len(),
        schema.dates.len()
    );
    Ok((schema, report))
}

fn build_donors(facts: &[FactRow], rel: &Relationships, names: &NameMap, settings: &AggregateSettings) -> Vec<DonorRow> {
    struct Acc<'a> {
        total: Decimal,
        count: usize,
        committees: BTreeSet<&'a str>,
        first: Option<NaiveDate>,
        last: Option<NaiveDate>,
        employers: Vec<&'a str>,
        occupations: Vec<&'a str>,
    }

    let mut by_donor: HashMap<&str, Acc> = HashMap::new();
    for (fact, source) in facts.iter().zip(&rel.contributions) {
        let acc = by_donor.entry(fact.donor_id.as_str()).or_insert_with(|| Acc {
            total: Decimal::ZERO,
            count: 0,
            committees: BTreeSet::new(),
            first: None,
            last: None,
            employers: Vec::new(),
            occupations: Vec::new(),
        });
        acc.total += fact.amount;
        acc.count += 1;
        acc.committees.insert(fact.cmte_id.as_str());
        if let Some(date) = fact.date {
            acc.first = Some(acc.first.map_or(date, |d| d.min(date)));
            acc.last = Some(acc.last.map_or(date, |d| d.max(date)));
        }
        acc.employers.push(source.employer.as_str());
        acc.occupations.push(source.occupation.as_str());
    }

    let mut rows: Vec<DonorRow> = names
        .entities()
        .iter()
        .filter_map(|entity| {
            let acc = by_donor.get(entity.donor_id.as_str())?;
            Some(DonorRow {
                donor_id: entity.donor_id.clone(),
                name: entity.canonical_name.clone(),
                state: entity.state.clone(),
                employer: most_common(acc.employers.iter().copied()),
                occupation: most_common(acc.occupations.iter().copied()),
                total_amount: acc.total,
                contribution_count: acc.count,
                committee_count: acc.committees.len(),
                tier: classify_tier(acc.total, &settings.tiers),
                super_connected: acc.committees.len() >= settings.super_connected_committees,
                first_contribution_date: acc.first,
                last_contribution_date: acc.last,
            })
        })
        .collect();
    rows.sort_by(|a, b| a.donor_id.cmp(&b.donor_id));
    rows
}

fn build_committees(facts: &[FactRow], rel: &Relationships, settings: &AggregateSettings) -> Vec<CommitteeRow> {
    let mut receipts: HashMap<&str, (Decimal, usize, BTreeSet<&str>)> = HashMap::new();
    for fact in facts {
        let entry = receipts
            .entry(fact.cmte_id.as_str())
            .or_insert_with(|| (Decimal::ZERO, 0, BTreeSet::new()));
        entry.0 += fact.amount;
        entry.1 += 1;
        entry.2.insert(fact.donor_id.as_str());
    }

    let mut disbursements: HashMap<&str, Decimal> = HashMap::new();
    for e in &rel.expenditures {
        *disbursements.entry(e.cmte_id.as_str()).or_insert(Decimal::ZERO) += e.amount;
    }
    for t in &rel.transfers {
        *disbursements.entry(t.cmte_id.as_str()).or_insert(Decimal::ZERO) += t.amount;
    }

    let shares = party_shares(&rel.transfers, &rel.candidates);
    let no_shares = PartyShares::default();
    let mut flagged = 0usize;

    let rows: Vec<CommitteeRow> = rel
        .committees
        .values()
        .map(|c| {
            let category = categorize_committee(&c.cmte_type);
            let committee_shares = shares.get(&c.cmte_id).unwrap_or(&no_shares);
            let assessment = assess_shadow_pac(
                committee_shares,
                settings.shadow_pac_share,
                is_facially_nonpartisan(&c.party, category),
            );
            if assessment.flagged {
                flagged += 1;
            }
            let party_lean = if !c.party.is_empty() {
                c.party.clone()
            } else {
                committee_shares
                    .leading_party()
                    .map(|(p, _)| p.to_string())
                    .unwrap_or_default()
            };
            let (total_receipts, contribution_count, donor_count) = receipts
                .get(c.cmte_id.as_str())
                .map(|(total, count, donors)| (*total, *count, donors.len()))
                .unwrap_or((Decimal::ZERO, 0, 0));
            let summary = rel.committee_summaries.get(&c.cmte_id);
            CommitteeRow {
                cmte_id: c.cmte_id.clone(),
                name: c.name.clone(),
                category,
                cmte_type: c.cmte_type.clone(),
                designation: c.designation.clone(),
                state: c.state.clone(),
                declared_party: c.party.clone(),
                party_lean,
                shadow_pac: assessment.flagged,
                shadow_party: assessment.dominant_party,
                shadow_share: assessment.share,
                status: committee_status(&c.filing_frequency),
                connected_org: c.connected_org.clone(),
                total_receipts,
                contribution_count,
                donor_count,
                total_disbursements: disbursements.get(c.cmte_id.as_str()).copied().unwrap_or(Decimal::ZERO),
                reported_receipts: summary.map(|s| s.total_receipts),
                reported_disbursements: summary.map(|s| s.total_disbursements),
                cash_on_hand: summary.map(|s| s.cash_on_hand),
            }
        })
        .collect();

    crate::metrics::features::shadow_pacs_flagged(flagged);
    if flagged > 0 {
        info!("{} committees flagged as shadow PACs", flagged);
    }
    rows
}

fn build_candidates(rel: &Relationships, receipts: &HashMap<&str, Decimal>) -> Vec<CandidateRow> {
    let mut linked: HashMap<&str, Vec<&str>> = HashMap::new();
    for link in &rel.linkages {
        linked.entry(link.cand_id.as_str()).or_default().push(link.cmte_id.as_str());
    }
    let mut transfers_in: HashMap<&str, Decimal> = HashMap::new();
    for t in &rel.transfers {
        *transfers_in.entry(t.cand_id.as_str()).or_insert(Decimal::ZERO) += t.amount;
    }
    let mut spent_by_committee: HashMap<&str, Decimal> = HashMap::new();
    for e in &rel.expenditures {
        *spent_by_committee.entry(e.cmte_id.as_str()).or_insert(Decimal::ZERO) += e.amount;
    }

    rel.candidates
        .values()
        .map(|c| {
            let committees = linked.get(c.cand_id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let raised: Decimal = committees
                .iter()
                .map(|id| receipts.get(id).copied().unwrap_or(Decimal::ZERO))
                .sum::<Decimal>()
                + transfers_in.get(c.cand_id.as_str()).copied().unwrap_or(Decimal::ZERO);
            let spent: Decimal = committees
                .iter()
                .map(|id| spent_by_committee.get(id).copied().unwrap_or(Decimal::ZERO))
                .sum();
            let summary = rel.candidate_summaries.get(&c.cand_id);
            CandidateRow {
                cand_id: c.cand_id.clone(),
                name: c.name.clone(),
                office: office_from_id(&c.cand_id),
                party: c.party.clone(),
                state: c.office_state.clone(),
                district: c.district.clone(),
                incumbency: c.incumbency.clone(),
                election_year: c.election_year,
                linked_committees: committees.len(),
                total_raised: raised,
                total_spent: spent,
                reported_receipts: summary.map(|s| s.total_receipts),
                reported_disbursements: summary.map(|s| s.total_disbursements),
            }
        })
        .collect()
}

/// Check the fact table against committee totals, entity counts and the source total
pub fn reconcile(
    schema: &StarSchema,
    rel: &Relationships,
    source_total: Decimal,
    tolerance: f64,
) -> Result<ReconciliationReport> {
    let mut fact_sums: HashMap<&str, Decimal> = HashMap::new();
    for fact in &schema.facts {
        *fact_sums.entry(fact.cmte_id.as_str()).or_insert(Decimal::ZERO) += fact.amount;
    }
    let mut mismatches = Vec::new();
    for committee in &schema.committees {
        let expected = fact_sums.get(committee.cmte_id.as_str()).copied().unwrap_or(Decimal::ZERO);
        if expected != committee.total_receipts {
            mismatches.push(format!(
                "{}: facts {} vs receipts {}",
                committee.cmte_id, expected, committee.total_receipts
            ));
        }
    }
    let mut reported_checked = 0;
    let mut reported_gaps = Vec::new();
    for committee in &schema.committees {
        let Some(reported) = committee.reported_receipts else {
            continue;
        };
        reported_checked += 1;
        let facts = fact_sums.get(committee.cmte_id.as_str()).copied().unwrap_or(Decimal::ZERO);
        let difference = (facts - reported).abs();
        let relative = relative_to(difference, reported);
        if relative > tolerance {
            reported_gaps.push(ReportedReceiptGap {
                cmte_id: committee.cmte_id.clone(),
                fact_total: facts,
                reported_receipts: reported,
                difference,
                relative_difference: relative,
            });
        }
    }
    if !reported_gaps.is_empty() {
        warn!(
            "{} of {} committees report receipts that differ from their itemized contributions",
            reported_gaps.len(),
            reported_checked
        );
        for gap in reported_gaps.iter().take(5) {
            warn!(
                "  {}: facts {} vs reported {} ({:.4}%)",
                gap.cmte_id,
                gap.fact_total,
                gap.reported_receipts,
                gap.relative_difference * 100.0
            );
        }
    }

    if let Some(unknown) = fact_sums.keys().find(|id| !rel.committees.contains_key(**id)) {
        mismatches.push(format!("{}: facts reference a committee outside the dimension", unknown));
    }

    let fact_total: Decimal = schema.facts.iter().map(|f| f.amount).sum();
    let orphan_total: Decimal = schema.orphans.iter().map(|o| o.amount).sum();
    let difference = (fact_total + orphan_total - source_total).abs();
    let relative_difference = relative_to(difference, source_total);

    let report = ReconciliationReport {
        source_total,
        fact_total,
        orphan_total,
        difference,
        relative_difference,
        tolerance,
        committees_checked: schema.committees.len(),
        committee_mismatches: mismatches.len(),
        passed: mismatches.is_empty() && relative_difference <= tolerance,
        reported_checked,
        reported_mismatches: reported_gaps.len(),
        reported_gaps,
    };

    if !mismatches.is_empty() {
        return Err(EtlError::Reconciliation(format!(
            "{} committee totals disagree with the fact table: {}",
            mismatches.len(),
            mismatches.iter().take(5).cloned().collect::<Vec<_>>().join("; ")
        )));
    }
    if relative_difference > tolerance {
        return Err(EtlError::Reconciliation(format!(
            "fact total {} + orphan total {} differs from source total {} by {:.6}% (tolerance {:.4}%)",
            fact_total,
            orphan_total,
            source_total,
            relative_difference * 100.0,
            tolerance * 100.0
        )));
    }

    let distinct_donors: BTreeSet<&str> = schema.facts.iter().map(|f| f.donor_id.as_str()).collect();
    let counts = [
        ("donors", schema.donors.len(), distinct_donors.len()),
        ("committees", schema.committees.len(), rel.committees.len()),
        ("candidates", schema.candidates.len(), rel.candidates.len()),
    ];
    for (table, rows, entities) in counts {
        if rows != entities {
            return Err(EtlError::Reconciliation(format!(
                "dimension {} has {} rows but {} distinct entities",
                table, rows, entities
            )));
        }
    }

    info!(
        "Reconciled: facts {} + orphans {} = source {} ({} committees checked)",
        fact_total,
        orphan_total,
        source_total,
        schema.committees.len()
    );
    Ok(report)
}

/// `difference / |base|`; infinite when the base is zero and the difference is not
fn relative_to(difference: Decimal, base: Decimal) -> f64 {
    if base.is_zero() {
        if difference.is_zero() { 0.0 } else { f64::INFINITY }
    } else {
        (difference / base.abs()).to_f64().unwrap_or(f64::INFINITY)
    }
}

fn summarize(schema: &mut StarSchema, top_n: usize, report: &ReconciliationReport) {
    let mut donors: Vec<&DonorRow> = schema.donors.iter().collect();
    donors.sort_by(|a, b| b.total_amount.cmp(&a.total_amount).then_with(|| a.donor_id.cmp(&b.donor_id)));
    schema.top_donors = donors
        .iter()
        .take(top_n)
        .enumerate()
        .map(|(i, d)| TopDonorRow {
            rank: i + 1,
            donor_id: d.donor_id.clone(),
            name: d.name.clone(),
            state: d.state.clone(),
            tier: d.tier,
            total_amount: d.total_amount,
            committee_count: d.committee_count,
        })
        .collect();

    let mut committees: Vec<&CommitteeRow> = schema.committees.iter().collect();
    committees.sort_by(|a, b| b.total_receipts.cmp(&a.total_receipts).then_with(|| a.cmte_id.cmp(&b.cmte_id)));
    schema.top_committees = committees
        .iter()
        .take(top_n)
        .enumerate()
        .map(|(i, c)| TopCommitteeRow {
            rank: i + 1,
            cmte_id: c.cmte_id.clone(),
            name: c.name.clone(),
            category: c.category,
            total_receipts: c.total_receipts,
            donor_count: c.donor_count,
        })
        .collect();

    let receipts_total: Decimal = schema.committees.iter().map(|c| c.total_receipts).sum();
    let mut by_category: BTreeMap<CommitteeCategory, (usize, Decimal)> = BTreeMap::new();
    for c in &schema.committees {
        let entry = by_category.entry(c.category).or_insert((0, Decimal::ZERO));
        entry.0 += 1;
        entry.1 += c.total_receipts;
    }
    schema.by_category = by_category
        .into_iter()
        .map(|(category, (count, total))| CategoryBreakdownRow {
            category,
            committee_count: count,
            total_receipts: total,
            share_pct: pct(total, receipts_total),
        })
        .collect();

    let donor_total: Decimal = schema.donors.iter().map(|d| d.total_amount).sum();
    schema.by_tier = DonorTier::DESCENDING
        .iter()
        .map(|tier| {
            let members: Vec<&DonorRow> = schema.donors.iter().filter(|d| d.tier == *tier).collect();
            let total: Decimal = members.iter().map(|d| d.total_amount).sum();
            let mut amounts: Vec<Decimal> = members.iter().map(|d| d.total_amount).collect();
            let committees: usize = members.iter().map(|d| d.committee_count).sum();
            TierBreakdownRow {
                tier: *tier,
                donor_count: members.len(),
                total_amount: total,
                mean_amount: mean(total, members.len()),
                median_amount: median(&mut amounts),
                mean_committees: if members.is_empty() { 0.0 } else { committees as f64 / members.len() as f64 },
                share_pct: pct(total, donor_total),
            }
        })
        .collect();

    let mut by_quarter: BTreeMap<String, (ElectionPeriod, BTreeSet<&str>, Vec<Decimal>)> = BTreeMap::new();
    for fact in &schema.facts {
        let entry = by_quarter
            .entry(fact.quarter.clone())
            .or_insert_with(|| (fact.election_period, BTreeSet::new(), Vec::new()));
        entry.1.insert(fact.donor_id.as_str());
        entry.2.push(fact.amount);
    }
    schema.by_quarter = by_quarter
        .into_iter()
        .map(|(quarter, (period, donors, mut amounts))| {
            let total: Decimal = amounts.iter().copied().sum();
            QuarterlyBreakdownRow {
                quarter,
                election_period: period,
                donor_count: donors.len(),
                contribution_count: amounts.len(),
                total_amount: total,
                mean_amount: mean(total, amounts.len()),
                median_amount: median(&mut amounts),
            }
        })
        .collect();

    let mut by_party: BTreeMap<String, (usize, Decimal, Decimal)> = BTreeMap::new();
    for c in &schema.candidates {
        let party = if c.party.is_empty() { UNKNOWN_PARTY.to_string() } else { c.party.clone() };
        let entry = by_party.entry(party).or_insert((0, Decimal::ZERO, Decimal::ZERO));
        entry.0 += 1;
        entry.1 += c.total_raised;
        entry.2 += c.total_spent;
    }
    schema.by_party = by_party
        .into_iter()
        .map(|(party, (count, raised, spent))| PartyBreakdownRow {
            party,
            candidate_count: count,
            total_raised: raised,
            total_spent: spent,
        })
        .collect();

    let refund_total: Decimal = schema.facts.iter().filter(|f| f.is_refund).map(|f| f.amount).sum();
    let bundled_total: Decimal = schema.facts.iter().filter(|f| f.is_bundled).map(|f| f.amount).sum();
    let disbursement_total: Decimal = schema.committees.iter().map(|c| c.total_disbursements).sum();
    let count = |n: usize| Decimal::from(n as u64);
    schema.summary_totals = vec![
        SummaryTotalRow { metric: "Total Contributions", amount: report.fact_total },
        SummaryTotalRow { metric: "Orphan Contributions", amount: report.orphan_total },
        SummaryTotalRow { metric: "Validated Source Total", amount: report.source_total },
        SummaryTotalRow { metric: "Refunds", amount: refund_total },
        SummaryTotalRow { metric: "Bundled Contributions", amount: bundled_total },
        SummaryTotalRow { metric: "Total Disbursements", amount: disbursement_total },
        SummaryTotalRow { metric: "Contribution Count", amount: count(schema.facts.len()) },
        SummaryTotalRow { metric: "Donor Count", amount: count(schema.donors.len()) },
        SummaryTotalRow { metric: "Committee Count", amount: count(schema.committees.len()) },
        SummaryTotalRow { metric: "Candidate Count", amount: count(schema.candidates.len()) },
        SummaryTotalRow {
            metric: "Shadow PAC Count",
            amount: count(schema.committees.iter().filter(|c| c.shadow_pac).count()),
        },
    ];

    if schema.orphans.len() > schema.facts.len() {
        warn!(
            "More orphan contributions ({}) than facts ({}); is the committee master complete?",
            schema.orphans.len(),
            schema.facts.len()
        );
    }
}
