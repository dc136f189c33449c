//! Single entry point for a pipeline run.
//!
//! Steps run in a fixed order. Any fatal error stops the run before output is promoted
//! and discards whatever was staged; cancellation behaves the same way.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::app::ports::TableSinkPort;
use crate::config::EtlConfig;
use crate::error::{EtlError, Result};
use crate::infra::csv_output_adapter::CsvOutputAdapter;
use crate::pipeline::exclusions::{ExclusionLedger, ReasonCode};
use crate::pipeline::ingestion::{spawn_extract_worker, ExtractMessage, ExtractedSource};
use crate::pipeline::load::{build_tables, ManifestOutput, OutputTable, RunManifest};
use crate::pipeline::processing::aggregate::{aggregate, AggregateSettings, ReconciliationReport};
use crate::pipeline::processing::normalize::{NormalizedData, SchemaNormalizer};
use crate::pipeline::processing::relationships::build_relationships;
use crate::pipeline::processing::resolve::NameMap;
use crate::pipeline::processing::statistics::compute_statistics;
use crate::pipeline::CancelFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Result of executing a pipeline step
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub success: bool,
    pub processed_count: usize,
    /// Records left out (recorded in the exclusion ledger)
    pub failed_count: usize,
    pub error_count: usize,
    pub message: String,
    pub duration_secs: f64,
}

impl StepResult {
    pub fn success(processed: usize, message: String) -> Self {
        Self {
            success: true,
            processed_count: processed,
            failed_count: 0,
            error_count: 0,
            message,
            duration_secs: 0.0,
        }
    }

    pub fn with_errors(processed: usize, failed: usize, errors: usize, message: String) -> Self {
        Self {
            success: errors == 0,
            processed_count: processed,
            failed_count: failed,
            error_count: errors,
            message,
            duration_secs: 0.0,
        }
    }

    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            processed_count: 0,
            failed_count: 0,
            error_count: 1,
            message,
            duration_secs: 0.0,
        }
    }
}

/// Everything a caller needs to know about a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<(String, StepResult)>,
    pub included: BTreeMap<String, usize>,
    pub exclusions: BTreeMap<ReasonCode, usize>,
    pub imputations: BTreeMap<String, usize>,
    pub reconciliation: Option<ReconciliationReport>,
    pub outputs: Vec<PathBuf>,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
}

impl RunResult {
    fn new(run_id: String) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            status: RunStatus::Failed,
            started_at: now,
            finished_at: now,
            steps: Vec::new(),
            included: BTreeMap::new(),
            exclusions: BTreeMap::new(),
            imputations: BTreeMap::new(),
            reconciliation: None,
            outputs: Vec::new(),
            error: None,
            error_kind: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn total_excluded(&self) -> usize {
        self.exclusions.values().sum()
    }

    fn record_step(&mut self, name: &'static str, started: Instant, mut step: StepResult) {
        step.duration_secs = started.elapsed().as_secs_f64();
        crate::metrics::run::step_duration(name, step.duration_secs);
        info!("✅ Step '{}' completed in {:.2}s: {}", name, step.duration_secs, step.message);
        self.steps.push((name.to_string(), step));
    }

    fn record_ledger(&mut self, ledger: &ExclusionLedger) {
        self.exclusions = ledger.counts().clone();
        self.imputations = ledger
            .imputations()
            .iter()
            .map(|(field, count)| (field.to_string(), *count))
            .collect();
    }

    /// Terminal summary: included and excluded counts, reconciliation and any fatal error
    pub fn print_summary(&self) {
        let status = match self.status {
            RunStatus::Succeeded => "✅ Succeeded",
            RunStatus::Failed => "❌ Failed",
            RunStatus::Cancelled => "⏹️  Cancelled",
        };
        println!("\n📊 Run {} {} in {:.2}s", self.run_id, status, self.duration_secs());

        if !self.included.is_empty() {
            println!("\n   Included:");
            for (table, count) in &self.included {
                println!("     {:<24} {}", table, count);
            }
        }

        println!("\n   Excluded: {}", self.total_excluded());
        for (reason, count) in &self.exclusions {
            println!("     {:<24} {}", reason.as_str(), count);
        }
        for (field, count) in &self.imputations {
            println!("     imputed {:<16} {}", field, count);
        }

        if let Some(report) = &self.reconciliation {
            println!(
                "\n   Reconciliation: facts {} + orphans {} vs source {} ({})",
                report.fact_total,
                report.orphan_total,
                report.source_total,
                if report.passed { "passed" } else { "FAILED" }
            );
            if report.reported_checked > 0 {
                println!(
                    "   Reported receipts: {} of {} committees differ from itemized facts",
                    report.reported_mismatches, report.reported_checked
                );
            }
        }

        if !self.outputs.is_empty() {
            println!("\n   Output files: {}", self.outputs.len());
            if let Some(dir) = self.outputs.first().and_then(|p| p.parent()) {
                println!("     {}", dir.display());
            }
        }

        if let Some(message) = &self.error {
            println!("\n⚠️  {}: {}", self.error_kind.unwrap_or("Error"), message);
        }
    }
}

fn check_cancel(cancel: &CancelFlag) -> Result<()> {
    if cancel.is_cancelled() {
        Err(EtlError::Cancelled)
    } else {
        Ok(())
    }
}

/// Run the whole pipeline; never panics on bad input, every failure ends up in the result
pub async fn run_pipeline(config: &EtlConfig, cancel: CancelFlag) -> RunResult {
    let run_id = Uuid::new_v4().to_string();
    let span = info_span!("run", run_id = %run_id);
    async move {
        crate::metrics::run::started();
        info!("🚀 Starting run for cycle {} with {} sources", config.run.cycle, config.sources.len());

        let mut result = RunResult::new(run_id);
        match execute(config, &cancel, &mut result).await {
            Ok(()) => {
                result.status = RunStatus::Succeeded;
                crate::metrics::run::succeeded();
            }
            Err(e) => {
                result.status = if matches!(e, EtlError::Cancelled) {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                crate::metrics::run::failed(e.kind());
                error!("💥 Run stopped: {}", e);
                result.error_kind = Some(e.kind());
                result.error = Some(e.to_string());
            }
        }
        result.finished_at = Utc::now();
        info!("Run finished with status {:?} in {:.2}s", result.status, result.duration_secs());
        result
    }
    .instrument(span)
    .await
}

async fn execute(config: &EtlConfig, cancel: &CancelFlag, result: &mut RunResult) -> Result<()> {
    let started = Instant::now();
    config.validate()?;
    let tiers = config.tier_thresholds()?;
    result.record_step("validate_config", started, StepResult::success(config.sources.len(), "thresholds valid".to_string()));
    check_cancel(cancel)?;

    let started = Instant::now();
    let (data, mut ledger, inputs) = extract_and_normalize(config, cancel).await?;
    let rows_read: u64 = inputs.iter().map(|s| s.rows).sum();
    result.record_step(
        "extract_normalize",
        started,
        StepResult::with_errors(
            data.len(),
            ledger.total(),
            0,
            format!("{} rows read, {} records, {} excluded", rows_read, data.len(), ledger.total()),
        ),
    );
    result.record_ledger(&ledger);
    check_cancel(cancel)?;

    let started = Instant::now();
    let names = Arc::new(NameMap::build(
        data.contributions.iter().map(|c| (c.name.as_str(), c.state.as_str())),
        &config.resolver,
    ));
    result.record_step(
        "resolve",
        started,
        StepResult::success(
            names.entries().len(),
            format!("{} donors from {} spellings ({} fuzzy merges)", names.len(), names.entries().len(), names.fuzzy_merges()),
        ),
    );
    check_cancel(cancel)?;

    // validated source total: every contribution that survived normalization
    let source_total: Decimal = data.contributions.iter().map(|c| c.amount).sum();

    let started = Instant::now();
    let before = ledger.total();
    let rel = build_relationships(data, &mut ledger);
    result.record_step(
        "relationships",
        started,
        StepResult::with_errors(
            rel.contributions.len(),
            ledger.total() - before,
            0,
            format!("{} linkages, {} orphan contributions", rel.linkages.len(), rel.orphans.len()),
        ),
    );
    result.record_ledger(&ledger);
    check_cancel(cancel)?;

    let started = Instant::now();
    let settings = AggregateSettings {
        tiers,
        shadow_pac_share: config.thresholds.shadow_pac_share,
        super_connected_committees: config.thresholds.super_connected_committees,
        reconciliation_tolerance: config.thresholds.reconciliation_tolerance,
        top_n: config.statistics.top_n,
    };
    let (schema, report) = aggregate(&rel, names.clone(), source_total, &settings)?;
    result.reconciliation = Some(report.clone());
    result.record_step(
        "aggregate",
        started,
        StepResult::success(schema.facts.len(), format!("reconciled {} facts", schema.facts.len())),
    );
    check_cancel(cancel)?;

    let started = Instant::now();
    let stats = compute_statistics(&schema.statistics_input(), &config.statistics);
    let skipped = stats.tests.iter().filter(|t| t.status == "skipped").count();
    result.record_step(
        "statistics",
        started,
        StepResult::success(stats.tests.len(), format!("{} tests, {} skipped", stats.tests.len(), skipped)),
    );

    result.included = BTreeMap::from([
        ("committees".to_string(), schema.committees.len()),
        ("candidates".to_string(), schema.candidates.len()),
        ("donors".to_string(), schema.donors.len()),
        ("contributions".to_string(), schema.facts.len()),
        ("orphan_contributions".to_string(), schema.orphans.len()),
        ("linkages".to_string(), schema.bridge.len()),
        ("transfers".to_string(), rel.transfers.len()),
        ("expenditures".to_string(), rel.expenditures.len()),
    ]);
    ledger.log_summary();
    check_cancel(cancel)?;

    let started = Instant::now();
    let tables = build_tables(&schema, &names, &ledger, &stats)?;
    let manifest = RunManifest {
        run_id: result.run_id.clone(),
        cycle: config.run.cycle,
        started_at: result.started_at,
        inputs,
        included: result.included.clone(),
        exclusions: result.exclusions.iter().map(|(r, c)| (r.as_str().to_string(), *c)).collect(),
        imputations: result.imputations.clone(),
        reconciliation: report,
        outputs: tables
            .iter()
            .map(|t| ManifestOutput { file: t.name.to_string(), rows: t.rows })
            .collect(),
    };
    let mut staged = tables;
    staged.push(manifest.to_table()?);

    let sink = CsvOutputAdapter::new(&config.run, &result.run_id)?;
    result.outputs = load(&sink, &staged, cancel).await?;
    result.record_step(
        "load",
        started,
        StepResult::success(result.outputs.len(), format!("{} files promoted", result.outputs.len())),
    );
    Ok(())
}

/// Stage every table, then promote; anything that fails leaves the output directory as it was
async fn load(sink: &dyn TableSinkPort, tables: &[OutputTable], cancel: &CancelFlag) -> Result<Vec<PathBuf>> {
    if let Err(e) = stage_all(sink, tables, cancel).await {
        sink.discard().await;
        return Err(e);
    }
    match sink.commit().await {
        Ok(paths) => Ok(paths),
        Err(e) => {
            sink.discard().await;
            Err(e)
        }
    }
}

async fn stage_all(sink: &dyn TableSinkPort, tables: &[OutputTable], cancel: &CancelFlag) -> Result<()> {
    for table in tables {
        check_cancel(cancel)?;
        sink.stage(table).await?;
    }
    check_cancel(cancel)
}

/// Run one extraction worker per source and feed their chunks to the normalizer
async fn extract_and_normalize(
    config: &EtlConfig,
    cancel: &CancelFlag,
) -> Result<(NormalizedData, ExclusionLedger, Vec<ExtractedSource>)> {
    let (tx, mut rx) = mpsc::channel(config.run.channel_capacity);
    let handles: Vec<_> = config
        .sources
        .iter()
        .enumerate()
        .map(|(idx, source)| spawn_extract_worker(idx, source.clone(), config.run.chunk_size, cancel.clone(), tx.clone()))
        .collect();
    drop(tx);

    let mut normalizer = SchemaNormalizer::new(&config.sources, config.run.sample_rows);
    let mut inputs = Vec::with_capacity(config.sources.len());
    let mut failure: Option<EtlError> = None;

    while let Some(message) = rx.recv().await {
        if cancel.is_cancelled() {
            failure = Some(EtlError::Cancelled);
            break;
        }
        let outcome = match message {
            ExtractMessage::Chunk(chunk) => normalizer.accept(chunk),
            ExtractMessage::Finished(source) => {
                let done = normalizer.finish_source(source.source_index);
                inputs.push(source);
                done
            }
        };
        if let Err(e) = outcome {
            failure = Some(e);
            break;
        }
    }
    // closing the channel stops any worker still sending
    drop(rx);

    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
            Err(join) => {
                warn!("Extraction worker did not finish: {}", join);
                if failure.is_none() {
                    failure = Some(EtlError::Worker(join.to_string()));
                }
            }
        }
    }
    if let Some(e) = failure {
        return Err(e);
    }
    check_cancel(cancel)?;

    inputs.sort_by_key(|s| s.source_index);
    let (data, ledger) = normalizer.finish();
    Ok((data, ledger, inputs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::domain::FileType;
    use tempfile::tempdir;

    #[test]
    fn test_step_result_constructors() {
        assert!(StepResult::success(3, "ok".to_string()).success);
        let with_exclusions = StepResult::with_errors(10, 2, 0, "2 excluded".to_string());
        assert!(with_exclusions.success);
        assert_eq!(with_exclusions.failed_count, 2);
        assert!(!StepResult::with_errors(10, 0, 1, "boom".to_string()).success);
        assert_eq!(StepResult::failure("boom".to_string()).error_count, 1);
    }

    #[tokio::test]
    async fn test_invalid_thresholds_fail_before_reading_input() {
        let dir = tempdir().unwrap();
        let mut config = EtlConfig::default();
        config.run.output_dir = dir.path().join("out");
        config.sources = vec![
            SourceConfig::new(FileType::CommitteeMaster, dir.path().join("missing_cm.txt")),
            SourceConfig::new(FileType::IndividualContributions, dir.path().join("missing_itcont.txt")),
        ];
        config.thresholds.tiers.small = 20_000.0;

        let result = run_pipeline(&config, CancelFlag::new()).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.error_kind, Some("ThresholdConfigError"));
        assert!(!config.run.output_dir.exists());
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_reports_cancelled() {
        let dir = tempdir().unwrap();
        let mut config = EtlConfig::default();
        config.run.output_dir = dir.path().join("out");
        config.sources = vec![
            SourceConfig::new(FileType::CommitteeMaster, dir.path().join("cm.txt")),
            SourceConfig::new(FileType::IndividualContributions, dir.path().join("itcont.txt")),
        ];
        let cancel = CancelFlag::new();
        cancel.cancel();

        let result = run_pipeline(&config, cancel).await;
        assert_eq!(result.status, RunStatus::Cancelled);
        assert!(result.outputs.is_empty());
        assert!(!config.run.output_dir.exists());
    }

    #[tokio::test]
    async fn test_missing_input_file_is_io_failure() {
        let dir = tempdir().unwrap();
        let mut config = EtlConfig::default();
        config.run.output_dir = dir.path().join("out");
        config.sources = vec![
            SourceConfig::new(FileType::CommitteeMaster, dir.path().join("cm.txt")),
            SourceConfig::new(FileType::IndividualContributions, dir.path().join("itcont.txt")),
        ];

        let result = run_pipeline(&config, CancelFlag::new()).await;
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.error_kind, Some("Io"));
        assert!(result.error.unwrap().contains("cm.txt"));
    }
}
