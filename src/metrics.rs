//! Metrics for the ETL run, organized by pipeline stage.
//!
//! Recording is always on; a Prometheus exporter is only installed when
//! `FEC_ETL_METRICS_ADDR` is set.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Once;

use tracing::{info, warn};

static INIT: Once = Once::new();

/// Enum representing all metric names used in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Run
    RunsStarted,
    RunsSucceeded,
    RunsFailed,
    StepDuration,

    // Extract
    ExtractRowsRead,
    ExtractChunksSent,
    ExtractBytesRead,

    // Normalize
    NormalizeRecordsEmitted,
    NormalizeRowsExcluded,
    NormalizeImputations,

    // Resolve
    ResolveNamesSeen,
    ResolveEntitiesCreated,
    ResolveFuzzyMerges,

    // Relationships
    RelationshipLinkages,
    RelationshipGaps,
    RelationshipOrphans,

    // Features
    FeaturesShadowPacsFlagged,

    // Aggregate
    AggregateRowsWritten,

    // Statistics
    StatisticsTestsRun,
    StatisticsUndefined,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RunsStarted => "fec_etl_runs_started_total",
            MetricName::RunsSucceeded => "fec_etl_runs_succeeded_total",
            MetricName::RunsFailed => "fec_etl_runs_failed_total",
            MetricName::StepDuration => "fec_etl_step_duration_seconds",
            MetricName::ExtractRowsRead => "fec_etl_extract_rows_read_total",
            MetricName::ExtractChunksSent => "fec_etl_extract_chunks_sent_total",
            MetricName::ExtractBytesRead => "fec_etl_extract_bytes_read_total",
            MetricName::NormalizeRecordsEmitted => "fec_etl_normalize_records_emitted_total",
            MetricName::NormalizeRowsExcluded => "fec_etl_normalize_rows_excluded_total",
            MetricName::NormalizeImputations => "fec_etl_normalize_imputations_total",
            MetricName::ResolveNamesSeen => "fec_etl_resolve_names_seen_total",
            MetricName::ResolveEntitiesCreated => "fec_etl_resolve_entities_created_total",
            MetricName::ResolveFuzzyMerges => "fec_etl_resolve_fuzzy_merges_total",
            MetricName::RelationshipLinkages => "fec_etl_relationship_linkages_total",
            MetricName::RelationshipGaps => "fec_etl_relationship_gaps_total",
            MetricName::RelationshipOrphans => "fec_etl_relationship_orphans_total",
            MetricName::FeaturesShadowPacsFlagged => "fec_etl_features_shadow_pacs_flagged_total",
            MetricName::AggregateRowsWritten => "fec_etl_aggregate_rows_written_total",
            MetricName::StatisticsTestsRun => "fec_etl_statistics_tests_run_total",
            MetricName::StatisticsUndefined => "fec_etl_statistics_undefined_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus exporter when `FEC_ETL_METRICS_ADDR` is configured. Idempotent.
pub fn init_metrics() {
    INIT.call_once(|| {
        let addr_str = match std::env::var("FEC_ETL_METRICS_ADDR") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => return,
        };
        let addr: SocketAddr = match addr_str.trim().parse() {
            Ok(addr) => addr,
            Err(_) => {
                warn!("Invalid FEC_ETL_METRICS_ADDR '{}', metrics exporter disabled", addr_str);
                return;
            }
        };
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
            Err(e) => warn!("Prometheus exporter install failed: {}", e),
        }
    });
}

// ============================================================================
// Run Metrics
// ============================================================================

pub mod run {
    use super::MetricName;

    pub fn started() {
        ::metrics::counter!(MetricName::RunsStarted.as_str()).increment(1);
    }

    pub fn succeeded() {
        ::metrics::counter!(MetricName::RunsSucceeded.as_str()).increment(1);
    }

    pub fn failed(kind: &'static str) {
        ::metrics::counter!(MetricName::RunsFailed.as_str(), "kind" => kind).increment(1);
    }

    pub fn step_duration(step: &'static str, secs: f64) {
        ::metrics::histogram!(MetricName::StepDuration.as_str(), "step" => step).record(secs);
    }
}

// ============================================================================
// Extract Metrics
// ============================================================================

pub mod extract {
    use super::MetricName;

    pub fn chunk_sent(file_type: &'static str, rows: usize) {
        ::metrics::counter!(MetricName::ExtractChunksSent.as_str(), "file_type" => file_type)
            .increment(1);
        ::metrics::counter!(MetricName::ExtractRowsRead.as_str(), "file_type" => file_type)
            .increment(rows as u64);
    }

    pub fn bytes_read(file_type: &'static str, bytes: u64) {
        ::metrics::counter!(MetricName::ExtractBytesRead.as_str(), "file_type" => file_type)
            .increment(bytes);
    }
}

// ============================================================================
// Normalize Metrics
// ============================================================================

pub mod normalize {
    use super::MetricName;

    pub fn records_emitted(file_type: &'static str, count: usize) {
        ::metrics::counter!(MetricName::NormalizeRecordsEmitted.as_str(), "file_type" => file_type)
            .increment(count as u64);
    }

    pub fn row_excluded(reason: &'static str) {
        ::metrics::counter!(MetricName::NormalizeRowsExcluded.as_str(), "reason" => reason)
            .increment(1);
    }

    pub fn imputation(field: &'static str) {
        ::metrics::counter!(MetricName::NormalizeImputations.as_str(), "field" => field)
            .increment(1);
    }
}

// ============================================================================
// Resolve Metrics
// ============================================================================

pub mod resolve {
    use super::MetricName;

    pub fn names_seen(count: usize) {
        ::metrics::counter!(MetricName::ResolveNamesSeen.as_str()).increment(count as u64);
    }

    pub fn entities_created(count: usize) {
        ::metrics::counter!(MetricName::ResolveEntitiesCreated.as_str()).increment(count as u64);
    }

    pub fn fuzzy_merges(count: usize) {
        ::metrics::counter!(MetricName::ResolveFuzzyMerges.as_str()).increment(count as u64);
    }
}

// ============================================================================
// Relationship Metrics
// ============================================================================

pub mod relationships {
    use super::MetricName;

    pub fn linkages(count: usize) {
        ::metrics::counter!(MetricName::RelationshipLinkages.as_str()).increment(count as u64);
    }

    pub fn gap(kind: &'static str) {
        ::metrics::counter!(MetricName::RelationshipGaps.as_str(), "kind" => kind).increment(1);
    }

    pub fn orphans(count: usize) {
        ::metrics::counter!(MetricName::RelationshipOrphans.as_str()).increment(count as u64);
    }
}

// ============================================================================
// Feature / Aggregate / Statistics Metrics
// ============================================================================

pub mod features {
    use super::MetricName;

    pub fn shadow_pacs_flagged(count: usize) {
        ::metrics::counter!(MetricName::FeaturesShadowPacsFlagged.as_str()).increment(count as u64);
    }
}

pub mod aggregate {
    use super::MetricName;

    pub fn rows_written(table: &'static str, rows: usize) {
        ::metrics::counter!(MetricName::AggregateRowsWritten.as_str(), "table" => table)
            .increment(rows as u64);
    }
}

pub mod statistics {
    use super::MetricName;

    pub fn test_run(test: &'static str) {
        ::metrics::counter!(MetricName::StatisticsTestsRun.as_str(), "test" => test).increment(1);
    }

    pub fn undefined(statistic: &'static str) {
        ::metrics::counter!(MetricName::StatisticsUndefined.as_str(), "statistic" => statistic)
            .increment(1);
    }
}
