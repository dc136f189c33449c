use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use tempfile::{tempdir, TempDir};

use fec_etl::config::{EtlConfig, SourceConfig};
use fec_etl::domain::FileType;
use fec_etl::pipeline::ReasonCode;
use fec_etl::{run_pipeline, CancelFlag, RunStatus};

// ---------------------------------------------------------------------------
// Fixture rows in FEC bulk layouts
// ---------------------------------------------------------------------------

fn cm_row(id: &str, name: &str, state: &str, tp: &str, party: &str, freq: &str, cand: &str) -> String {
    format!("{id}|{name}|TREASURER|1 MAIN ST||LOS ANGELES|{state}|90001|P|{tp}|{party}|{freq}|||{cand}")
}

fn cn_row(id: &str, name: &str, party: &str, state: &str, pcc: &str) -> String {
    format!("{id}|{name}|{party}|2024|{state}|H|01|I|C|{pcc}|||SPRINGFIELD|{state}|00001")
}

fn itcont_row(cmte: &str, name: &str, state: &str, date: &str, amount: &str, memo: &str, sub: &str) -> String {
    format!("{cmte}|N|Q3|P|202401019000|15|IND|{name}|SPRINGFIELD|{state}|90001|ACME|ENGINEER|{date}|{amount}||T{sub}|1|{memo}||{sub}")
}

fn itpas2_row(cmte: &str, cand: &str, amount: &str, sub: &str) -> String {
    format!("{cmte}|N|Q3|G|202401019000|24K|CAN|CAMPAIGN|AUSTIN|TX|78701|||09012024|{amount}|{cand}|{cand}|T{sub}|1|||{sub}")
}

fn webk_row(id: &str, name: &str, receipts: &str) -> String {
    format!("{id}|{name}|H|P|Q|{receipts}|0|0|0|0|0|0|0|0|0|0|0|0|0|0|0|0|0|0|0|0|12312024")
}

fn committee_rows() -> Vec<String> {
    vec![
        cm_row("C00000001", "FRIENDS OF SMITH", "CA", "H", "DEM", "Q", "H4CA01001"),
        cm_row("C00000002", "AMERICANS FOR TOMORROW", "DC", "O", "", "Q", ""),
        cm_row("C00000003", "OLD GUARD PAC", "CA", "Q", "", "T", ""),
    ]
}

fn contribution_rows() -> Vec<String> {
    vec![
        itcont_row("C00000001", "DOE, JANE", "CA", "10152023", "500", "", "1001"),
        itcont_row("C00000001", "DOE JANE", "CA", "02012024", "250", "", "1002"),
        itcont_row("C00000002", "ROE, RICHARD", "TX", "07042024", "1500000", "", "1003"),
        itcont_row("C00000002", "DOE, JANE", "CA", "", "100", "", "1004"),
        itcont_row("C00000001", "SMITH, AL", "CA", "03032024", "50", "X", "1005"),
        itcont_row("C00000009", "ORPHAN, OLLIE", "NY", "05052024", "75", "", "1006"),
        itcont_row("C00000001", "BAD, AMOUNT", "CA", "05052024", "abc", "", "1007"),
        itcont_row("C00000001", "DOE, JANE", "CA", "10152023", "500", "", "1001"),
        "C00000001|N|Q3".to_string(),
        itcont_row("C00000003", "LEE, KIM", "CA", "08082024", "300", "", "1010"),
    ]
}

struct Fixture {
    dir: TempDir,
    config: EtlConfig,
}

impl Fixture {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn output(&self) -> PathBuf {
        self.config.run.output_dir.clone()
    }
}

fn write_lines(path: &Path, lines: &[String]) {
    let mut body = lines.join("\n");
    body.push('\n');
    fs::write(path, body).unwrap();
}

fn write_zip(path: &Path, entry: &str, lines: &[String]) {
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file(entry, zip::write::FileOptions::default()).unwrap();
    for line in lines {
        writeln!(zip, "{}", line).unwrap();
    }
    zip.finish().unwrap();
}

/// Committee master, candidate master, contributions and transfers; committee master zipped on request
fn fixture(zipped_committees: bool) -> Fixture {
    let dir = tempdir().unwrap();
    let raw = dir.path().join("raw");
    fs::create_dir_all(&raw).unwrap();

    let cm_path = if zipped_committees {
        let p = raw.join("cm24.zip");
        write_zip(&p, "cm.txt", &committee_rows());
        p
    } else {
        let p = raw.join("cm.txt");
        write_lines(&p, &committee_rows());
        p
    };
    let cn_path = raw.join("cn.txt");
    write_lines(
        &cn_path,
        &[
            cn_row("H4CA01001", "SMITH, JOHN", "DEM", "CA", "C00000001"),
            cn_row("H4TX02002", "JONES, MARY", "REP", "TX", ""),
        ],
    );
    let itcont_path = raw.join("itcont.txt");
    write_lines(&itcont_path, &contribution_rows());
    let pas2_path = raw.join("itpas2.txt");
    write_lines(
        &pas2_path,
        &[
            itpas2_row("C00000002", "H4TX02002", "9000", "2001"),
            itpas2_row("C00000002", "H4CA01001", "1000", "2002"),
        ],
    );

    let mut config = EtlConfig::default();
    config.run.output_dir = dir.path().join("output");
    config.run.backup_dir = Some(dir.path().join("backup"));
    config.run.log_dir = dir.path().join("logs");
    config.run.chunk_size = 3;
    config.run.sample_rows = 5;
    config.thresholds.super_connected_committees = 2;
    config.sources = vec![
        SourceConfig::new(FileType::CommitteeMaster, cm_path),
        SourceConfig::new(FileType::CandidateMaster, cn_path),
        SourceConfig::new(FileType::IndividualContributions, itcont_path),
        SourceConfig::new(FileType::CommitteeToCandidate, pas2_path),
    ];
    Fixture { dir, config }
}

fn read_table(dir: &Path, name: &str) -> Vec<HashMap<String, String>> {
    let mut reader = csv::Reader::from_path(dir.join(name)).unwrap();
    reader.deserialize().map(|r| r.unwrap()).collect()
}

fn find<'a>(rows: &'a [HashMap<String, String>], column: &str, value: &str) -> &'a HashMap<String, String> {
    rows.iter()
        .find(|r| r.get(column).map(String::as_str) == Some(value))
        .unwrap_or_else(|| panic!("no row with {} = {}", column, value))
}

fn dec(value: &str) -> Decimal {
    value.parse().unwrap()
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_end_to_end_run_writes_reconciled_star_schema() {
    let fx = fixture(false);
    let result = run_pipeline(&fx.config, CancelFlag::new()).await;
    assert_eq!(result.status, RunStatus::Succeeded, "{:?}", result.error);

    assert_eq!(result.included["contributions"], 5);
    assert_eq!(result.included["orphan_contributions"], 1);
    assert_eq!(result.included["committees"], 3);
    assert_eq!(result.included["candidates"], 2);
    assert_eq!(result.included["donors"], 3);

    assert_eq!(result.exclusions[&ReasonCode::MemoItem], 1);
    assert_eq!(result.exclusions[&ReasonCode::MalformedValue], 1);
    assert_eq!(result.exclusions[&ReasonCode::DuplicateRecord], 1);
    assert_eq!(result.exclusions[&ReasonCode::WrongFieldCount], 1);
    assert_eq!(result.exclusions[&ReasonCode::RelationshipGap], 1);
    assert_eq!(result.imputations["TRANSACTION_DT"], 1);

    let report = result.reconciliation.clone().unwrap();
    assert!(report.passed);
    assert_eq!(report.fact_total, dec("1501150"));
    assert_eq!(report.orphan_total, dec("75"));
    assert_eq!(report.source_total, dec("1501225"));

    let out = fx.output();
    for name in [
        "dim_donors.csv",
        "dim_committees.csv",
        "dim_candidates.csv",
        "dim_dates.csv",
        "fact_contributions.csv",
        "bridge_candidate_committee.csv",
        "orphan_contributions.csv",
        "name_map.csv",
        "exclusions.csv",
        "summary_totals.csv",
        "inequality_metrics.csv",
        "lorenz_curve.csv",
        "hypothesis_tests.csv",
        "run_manifest.json",
    ] {
        assert!(out.join(name).is_file(), "{} missing", name);
    }
    let leftovers: Vec<_> = fs::read_dir(&out)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".staging"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_committee_receipts_equal_fact_sums_and_orphan_is_kept_apart() {
    let fx = fixture(false);
    let result = run_pipeline(&fx.config, CancelFlag::new()).await;
    assert!(result.is_success(), "{:?}", result.error);
    let out = fx.output();

    let facts = read_table(&out, "fact_contributions.csv");
    let committees = read_table(&out, "dim_committees.csv");
    for committee in &committees {
        let id = &committee["CMTE_ID"];
        let sum: Decimal = facts
            .iter()
            .filter(|f| &f["CMTE_ID"] == id)
            .map(|f| dec(&f["AMOUNT"]))
            .sum();
        assert_eq!(dec(&committee["TOTAL_RECEIPTS"]), sum, "committee {}", id);
    }
    assert_eq!(dec(&find(&committees, "CMTE_ID", "C00000001")["TOTAL_RECEIPTS"]), dec("750"));
    assert_eq!(find(&committees, "CMTE_ID", "C00000003")["STATUS"], "Terminated");
    assert!(facts.iter().all(|f| f["CMTE_ID"] != "C00000009"));

    let orphans = read_table(&out, "orphan_contributions.csv");
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0]["CMTE_ID"], "C00000009");
    assert_eq!(orphans[0]["COMMITTEE_STATUS"], "Unknown");
    assert_eq!(orphans[0]["REASON"], "RelationshipGap");
}

#[tokio::test]
async fn test_donor_resolution_tiers_and_temporal_buckets() {
    let fx = fixture(false);
    let result = run_pipeline(&fx.config, CancelFlag::new()).await;
    assert!(result.is_success(), "{:?}", result.error);
    let out = fx.output();

    let donors = read_table(&out, "dim_donors.csv");
    let jane = find(&donors, "NAME", "DOE JANE");
    assert_eq!(dec(&jane["TOTAL_AMOUNT"]), dec("850"));
    assert_eq!(jane["CONTRIBUTION_COUNT"], "3");
    assert_eq!(jane["TIER"], "Small");
    assert_eq!(jane["SUPER_CONNECTED"], "true");
    assert!(jane["DONOR_ID"].starts_with("DNR-"));
    assert_eq!(find(&donors, "NAME", "ROE, RICHARD")["TIER"], "Mega");
    assert_eq!(find(&donors, "NAME", "LEE, KIM")["TIER"], "Nano");

    let facts = read_table(&out, "fact_contributions.csv");
    let october = find(&facts, "TRANSACTION_ID", "1001");
    assert_eq!(october["DATE"], "2023-10-15");
    assert_eq!(october["QUARTER"], "Q4");
    assert_eq!(october["ELECTION_PERIOD"], "General");
    let undated = find(&facts, "TRANSACTION_ID", "1004");
    assert_eq!(undated["DATE"], "");
    assert_eq!(undated["QUARTER"], "Unknown");
    assert_eq!(undated["DONOR_ID"], jane["DONOR_ID"]);

    let name_map = read_table(&out, "name_map.csv");
    let spellings: Vec<&str> = name_map
        .iter()
        .filter(|e| e["DONOR_ID"] == jane["DONOR_ID"])
        .map(|e| e["RAW_NAME"].as_str())
        .collect();
    assert_eq!(spellings.len(), 2);
}

#[tokio::test]
async fn test_shadow_pac_and_candidate_totals() {
    let fx = fixture(false);
    let result = run_pipeline(&fx.config, CancelFlag::new()).await;
    assert!(result.is_success(), "{:?}", result.error);
    let out = fx.output();

    let committees = read_table(&out, "dim_committees.csv");
    let pac = find(&committees, "CMTE_ID", "C00000002");
    assert_eq!(pac["CATEGORY"], "Super PAC");
    assert_eq!(pac["SHADOW_PAC"], "true");
    assert_eq!(pac["SHADOW_PARTY"], "REP");
    assert_eq!(dec(&pac["TOTAL_DISBURSEMENTS"]), dec("10000"));
    assert_eq!(find(&committees, "CMTE_ID", "C00000001")["SHADOW_PAC"], "false");

    let candidates = read_table(&out, "dim_candidates.csv");
    let smith = find(&candidates, "CAND_ID", "H4CA01001");
    assert_eq!(smith["OFFICE"], "House");
    assert_eq!(smith["LINKED_COMMITTEES"], "1");
    assert_eq!(dec(&smith["TOTAL_RAISED"]), dec("1750"));

    let bridge = read_table(&out, "bridge_candidate_committee.csv");
    assert_eq!(bridge.len(), 1);
    assert_eq!(bridge[0]["LINK_SOURCE"], "CommitteeMaster");

    // one candidate per party: the t-test is reported as skipped, not fatal
    let tests = read_table(&out, "hypothesis_tests.csv");
    let welch = find(&tests, "HYPOTHESIS", "H3: Partisan Asymmetry");
    assert_eq!(welch["STATUS"], "skipped");
}

#[tokio::test]
async fn test_zipped_committee_master_gives_same_result() {
    let plain = fixture(false);
    let zipped = fixture(true);
    let a = run_pipeline(&plain.config, CancelFlag::new()).await;
    let b = run_pipeline(&zipped.config, CancelFlag::new()).await;
    assert!(a.is_success() && b.is_success(), "{:?} {:?}", a.error, b.error);
    assert_eq!(a.included, b.included);
    assert_eq!(a.exclusions, b.exclusions);

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(zipped.output().join("run_manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["inputs"][0]["archive_entry"], "cm.txt");
    assert_eq!(manifest["inputs"][0]["sha256"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_header_row_with_aliases_is_detected() {
    let mut fx = fixture(false);
    let header = "cmte_id|amndt_ind|rpt_tp|transaction_pgi|image_num|transaction_tp|entity_tp|name|city|state|\
                  zip_code|employer|occupation|transaction_dt|transaction_amt|other_id|tran_id|file_num|memo_cd|\
                  memo_text|sub_id";
    let mut lines = vec![header.to_string()];
    lines.extend(contribution_rows());
    let path = fx.path("itcont_header.txt");
    write_lines(&path, &lines);
    fx.config.sources[2] = SourceConfig::new(FileType::IndividualContributions, path);

    let result = run_pipeline(&fx.config, CancelFlag::new()).await;
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.included["contributions"], 5);
}

#[tokio::test]
async fn test_schema_mismatch_aborts_without_touching_output() {
    let mut fx = fixture(false);
    let out = fx.output();
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("dim_donors.csv"), "previous run\n").unwrap();

    let path = fx.path("itcont_bad.txt");
    write_lines(
        &path,
        &[
            "CMTE_ID|NAME|TRANSACTION_AMT".to_string(),
            "C00000001|DOE, JANE|500".to_string(),
        ],
    );
    fx.config.sources[2] = SourceConfig::new(FileType::IndividualContributions, &path);

    let result = run_pipeline(&fx.config, CancelFlag::new()).await;
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.error_kind, Some("SchemaMismatch"));
    let message = result.error.unwrap();
    assert!(message.contains("itcont_bad.txt"), "{}", message);
    assert!(message.contains("SUB_ID"), "{}", message);

    assert_eq!(fs::read_to_string(out.join("dim_donors.csv")).unwrap(), "previous run\n");
    assert_eq!(fs::read_dir(&out).unwrap().count(), 1);
}

#[tokio::test]
async fn test_second_run_backs_up_previous_output() {
    let mut fx = fixture(false);
    fx.config.run.backup = true;
    let first = run_pipeline(&fx.config, CancelFlag::new()).await;
    assert!(first.is_success(), "{:?}", first.error);
    assert!(!fx.path("backup").exists());

    let second = run_pipeline(&fx.config, CancelFlag::new()).await;
    assert!(second.is_success(), "{:?}", second.error);
    let backups: Vec<_> = fs::read_dir(fx.path("backup")).unwrap().filter_map(|e| e.ok()).collect();
    assert_eq!(backups.len(), 1);
    assert!(backups[0].path().join("dim_donors.csv").is_file());
    assert!(backups[0].path().join("run_manifest.json").is_file());
}

#[tokio::test]
async fn test_reported_receipts_disagreeing_with_facts_are_reported() {
    let mut fx = fixture(false);
    let path = fx.path("webk.txt");
    write_lines(
        &path,
        &[
            webk_row("C00000001", "FRIENDS OF SMITH", "9999999"),
            webk_row("C00000002", "AMERICANS FOR TOMORROW", "1500100"),
        ],
    );
    fx.config.sources.push(SourceConfig::new(FileType::CommitteeSummary, path));

    let result = run_pipeline(&fx.config, CancelFlag::new()).await;
    assert_eq!(result.status, RunStatus::Succeeded, "{:?}", result.error);
    let report = result.reconciliation.clone().unwrap();
    assert!(report.passed);
    assert_eq!(report.reported_checked, 2);
    assert_eq!(report.reported_mismatches, 1);
    assert_eq!(report.reported_gaps[0].cmte_id, "C00000001");
    assert_eq!(report.reported_gaps[0].fact_total, dec("750"));

    let out = fx.output();
    let committees = read_table(&out, "dim_committees.csv");
    let smith = find(&committees, "CMTE_ID", "C00000001");
    assert_eq!(dec(&smith["TOTAL_RECEIPTS"]), dec("750"));
    assert_eq!(dec(&smith["REPORTED_RECEIPTS"]), dec("9999999"));

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("run_manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["reconciliation"]["reported_mismatches"], 1);
    assert_eq!(manifest["reconciliation"]["reported_gaps"][0]["cmte_id"], "C00000001");
}

#[tokio::test]
async fn test_exclusion_lines_match_physical_lines_after_blank_lines() {
    let mut fx = fixture(false);
    let mut lines = contribution_rows();
    lines.insert(2, String::new());
    lines.insert(3, String::new());
    let path = fx.path("itcont_blank.txt");
    write_lines(&path, &lines);
    fx.config.sources[2] = SourceConfig::new(FileType::IndividualContributions, path);

    let result = run_pipeline(&fx.config, CancelFlag::new()).await;
    assert!(result.is_success(), "{:?}", result.error);

    let exclusions = read_table(&fx.output(), "exclusions.csv");
    assert_eq!(find(&exclusions, "REASON", "MemoItem")["LINE"], "7");
    assert_eq!(find(&exclusions, "REASON", "WrongFieldCount")["LINE"], "11");
}
