/// Source file type names used in configuration and on the CLI
pub const COMMITTEE_MASTER: &str = "committee_master";
pub const CANDIDATE_MASTER: &str = "candidate_master";
pub const LINKAGE: &str = "linkage";
pub const INDIVIDUAL_CONTRIBUTIONS: &str = "individual_contributions";
pub const COMMITTEE_TO_CANDIDATE: &str = "committee_to_candidate";
pub const OPERATING_EXPENDITURES: &str = "operating_expenditures";
pub const COMMITTEE_SUMMARY: &str = "committee_summary";
pub const CANDIDATE_SUMMARY: &str = "candidate_summary";

/// Base URL of the FEC bulk download area; files live under `{base}/{cycle}/`
pub const FEC_BULK_BASE_URL: &str = "https://www.fec.gov/files/bulk-downloads";

/// Default input delimiter of FEC bulk files
pub const DEFAULT_DELIMITER: char = '|';

/// Output table file names
pub const DIM_DONORS: &str = "dim_donors.csv";
pub const DIM_COMMITTEES: &str = "dim_committees.csv";
pub const DIM_CANDIDATES: &str = "dim_candidates.csv";
pub const DIM_DATES: &str = "dim_dates.csv";
pub const FACT_CONTRIBUTIONS: &str = "fact_contributions.csv";
pub const BRIDGE_CANDIDATE_COMMITTEE: &str = "bridge_candidate_committee.csv";
pub const ORPHAN_CONTRIBUTIONS: &str = "orphan_contributions.csv";
pub const NAME_MAP: &str = "name_map.csv";
pub const EXCLUSIONS: &str = "exclusions.csv";
pub const TOP_DONORS: &str = "top_donors.csv";
pub const TOP_COMMITTEES: &str = "top_committees.csv";
pub const BREAKDOWN_COMMITTEE_CATEGORY: &str = "breakdown_committee_category.csv";
pub const BREAKDOWN_DONOR_TIER: &str = "breakdown_donor_tier.csv";
pub const BREAKDOWN_QUARTERLY: &str = "breakdown_quarterly.csv";
pub const BREAKDOWN_PARTY: &str = "breakdown_party.csv";
pub const SUMMARY_TOTALS: &str = "summary_totals.csv";
pub const INEQUALITY_METRICS: &str = "inequality_metrics.csv";
pub const LORENZ_CURVE: &str = "lorenz_curve.csv";
pub const HYPOTHESIS_TESTS: &str = "hypothesis_tests.csv";
pub const RUN_MANIFEST: &str = "run_manifest.json";

/// Party codes visited first when checking partisan concentration
pub const PRIMARY_PARTIES: [&str; 2] = ["DEM", "REP"];
