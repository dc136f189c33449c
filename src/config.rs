//! Run configuration loaded from `fec_etl.toml`.
//!
//! Every section is optional and falls back to the defaults documented on its fields.
//! Threshold values are validated once, before any input is read, so a bad boundary
//! aborts the run without touching the output directory.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::domain::FileType;
use crate::error::{EtlError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "fec_etl.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EtlConfig {
    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub thresholds: ThresholdsConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub statistics: StatisticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Election cycle year, used for bulk download URLs
    #[serde(default = "default_cycle")]
    pub cycle: u16,

    /// Directory the output tables are promoted into
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Copy existing output files aside before replacing them
    #[serde(default = "default_true")]
    pub backup: bool,

    /// Backup location; defaults to `<output_dir>/../backup`
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    /// Rows per chunk sent from an extraction worker
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunks buffered between extraction workers and the normalizer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Rows sampled per file for column type inference
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cycle: default_cycle(),
            output_dir: default_output_dir(),
            backup: true,
            backup_dir: None,
            chunk_size: default_chunk_size(),
            channel_capacity: default_channel_capacity(),
            sample_rows: default_sample_rows(),
            log_dir: default_log_dir(),
        }
    }
}

impl RunConfig {
    pub fn resolved_backup_dir(&self) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => self
                .output_dir
                .parent()
                .map(|p| p.join("backup"))
                .unwrap_or_else(|| PathBuf::from("backup")),
        }
    }
}

fn default_cycle() -> u16 {
    2024
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/output")
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    50_000
}

fn default_channel_capacity() -> usize {
    8
}

fn default_sample_rows() -> usize {
    200
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

/// One raw input file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub file_type: FileType,

    /// Plain delimited text file or a zip archive containing one
    pub path: PathBuf,

    /// Where `fetch` downloads the file from when it differs from the FEC bulk default
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub delimiter: Option<char>,

    /// `None` means detect from the first row
    #[serde(default)]
    pub has_header: Option<bool>,
}

impl SourceConfig {
    pub fn new(file_type: FileType, path: impl Into<PathBuf>) -> Self {
        Self {
            file_type,
            path: path.into(),
            url: None,
            delimiter: None,
            has_header: None,
        }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter.unwrap_or(constants::DEFAULT_DELIMITER)
    }

    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default)]
    pub tiers: TierBandsConfig,

    /// Single-party share of candidate-directed disbursements that flags a shadow PAC
    #[serde(default = "default_shadow_pac_share")]
    pub shadow_pac_share: f64,

    /// Distinct committees a donor must support to count as super-connected
    #[serde(default = "default_super_connected")]
    pub super_connected_committees: usize,

    /// Relative tolerance for total reconciliation (0.0001 = 0.01%)
    #[serde(default = "default_reconciliation_tolerance")]
    pub reconciliation_tolerance: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            tiers: TierBandsConfig::default(),
            shadow_pac_share: default_shadow_pac_share(),
            super_connected_committees: default_super_connected(),
            reconciliation_tolerance: default_reconciliation_tolerance(),
        }
    }
}

fn default_shadow_pac_share() -> f64 {
    0.80
}

fn default_super_connected() -> usize {
    10
}

fn default_reconciliation_tolerance() -> f64 {
    0.0001
}

/// Lower bounds (inclusive, in dollars) of the four upper donor tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierBandsConfig {
    pub mega: f64,
    pub major: f64,
    pub significant: f64,
    pub small: f64,
}

impl Default for TierBandsConfig {
    fn default() -> Self {
        Self {
            mega: 1_000_000.0,
            major: 100_000.0,
            significant: 10_000.0,
            small: 400.0,
        }
    }
}

/// Validated tier boundaries; anything below `small` is Nano
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierThresholds {
    pub mega: Decimal,
    pub major: Decimal,
    pub significant: Decimal,
    pub small: Decimal,
}

impl TierThresholds {
    pub fn new(mega: Decimal, major: Decimal, significant: Decimal, small: Decimal) -> Result<Self> {
        let bounds = [("mega", mega), ("major", major), ("significant", significant), ("small", small)];
        for (name, value) in bounds {
            if value.is_sign_negative() {
                return Err(EtlError::ThresholdConfig(format!(
                    "tier boundary '{}' must not be negative (got {})",
                    name, value
                )));
            }
        }
        for pair in bounds.windows(2) {
            if pair[0].1 <= pair[1].1 {
                return Err(EtlError::ThresholdConfig(format!(
                    "tier boundary '{}' ({}) must be greater than '{}' ({})",
                    pair[0].0, pair[0].1, pair[1].0, pair[1].1
                )));
            }
        }
        Ok(Self { mega, major, significant, small })
    }

    pub fn from_config(cfg: &TierBandsConfig) -> Result<Self> {
        let to_decimal = |name: &str, value: f64| -> Result<Decimal> {
            if !value.is_finite() {
                return Err(EtlError::ThresholdConfig(format!(
                    "tier boundary '{}' must be a finite number",
                    name
                )));
            }
            Decimal::try_from(value)
                .map(|d| d.round_dp(2))
                .map_err(|e| EtlError::ThresholdConfig(format!("tier boundary '{}': {}", name, e)))
        };
        Self::new(
            to_decimal("mega", cfg.mega)?,
            to_decimal("major", cfg.major)?,
            to_decimal("significant", cfg.significant)?,
            to_decimal("small", cfg.small)?,
        )
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            mega: Decimal::from(1_000_000),
            major: Decimal::from(100_000),
            significant: Decimal::from(10_000),
            small: Decimal::from(400),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Maximum Levenshtein distance for two names to merge
    #[serde(default = "default_fuzzy_max_edits")]
    pub fuzzy_max_edits: usize,

    /// Names shorter than this only merge on exact canonical match
    #[serde(default = "default_fuzzy_min_name_len")]
    pub fuzzy_min_name_len: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fuzzy_max_edits: default_fuzzy_max_edits(),
            fuzzy_min_name_len: default_fuzzy_min_name_len(),
        }
    }
}

fn default_fuzzy_max_edits() -> usize {
    2
}

fn default_fuzzy_min_name_len() -> usize {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsConfig {
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,

    /// Maximum number of Lorenz points written (endpoints always kept)
    #[serde(default = "default_lorenz_points")]
    pub lorenz_points: usize,

    /// Rows in the top-N summary tables
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            significance_level: default_significance_level(),
            lorenz_points: default_lorenz_points(),
            top_n: default_top_n(),
        }
    }
}

fn default_significance_level() -> f64 {
    0.05
}

fn default_lorenz_points() -> usize {
    101
}

fn default_top_n() -> usize {
    100
}

impl EtlConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let mut config: EtlConfig = toml::from_str(&content)?;

        // Relative source paths are resolved against the config file's directory
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            for source in &mut config.sources {
                if source.path.is_relative() {
                    source.path = base.join(&source.path);
                }
            }
        }
        Ok(config)
    }

    /// Apply `FEC_ETL_*` environment overrides (a `.env` file is loaded by the binary)
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("FEC_ETL_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.run.output_dir = PathBuf::from(dir.trim());
            }
        }
        if let Ok(cycle) = std::env::var("FEC_ETL_CYCLE") {
            self.run.cycle = cycle
                .trim()
                .parse()
                .map_err(|_| EtlError::Config(format!("FEC_ETL_CYCLE is not a year: {}", cycle)))?;
        }
        Ok(())
    }

    pub fn tier_thresholds(&self) -> Result<TierThresholds> {
        TierThresholds::from_config(&self.thresholds.tiers)
    }

    /// Validate everything that must hold before the run touches any input
    pub fn validate(&self) -> Result<()> {
        self.tier_thresholds()?;

        let share = self.thresholds.shadow_pac_share;
        if !(share > 0.0 && share <= 1.0) {
            return Err(EtlError::ThresholdConfig(format!(
                "shadow_pac_share must be in (0, 1], got {}",
                share
            )));
        }
        let tolerance = self.thresholds.reconciliation_tolerance;
        if !(tolerance >= 0.0 && tolerance < 1.0) {
            return Err(EtlError::ThresholdConfig(format!(
                "reconciliation_tolerance must be in [0, 1), got {}",
                tolerance
            )));
        }
        if self.thresholds.super_connected_committees == 0 {
            return Err(EtlError::ThresholdConfig(
                "super_connected_committees must be at least 1".to_string(),
            ));
        }
        let alpha = self.statistics.significance_level;
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(EtlError::ThresholdConfig(format!(
                "significance_level must be in (0, 1), got {}",
                alpha
            )));
        }
        if self.statistics.lorenz_points < 2 {
            return Err(EtlError::ThresholdConfig(
                "lorenz_points must be at least 2".to_string(),
            ));
        }
        if self.run.chunk_size == 0 || self.run.channel_capacity == 0 {
            return Err(EtlError::Config(
                "chunk_size and channel_capacity must be positive".to_string(),
            ));
        }

        let present: HashSet<FileType> = self.sources.iter().map(|s| s.file_type).collect();
        for required in [FileType::CommitteeMaster, FileType::IndividualContributions] {
            if !present.contains(&required) {
                return Err(EtlError::Config(format!(
                    "a '{}' source is required",
                    required
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_sources() -> Vec<SourceConfig> {
        vec![
            SourceConfig::new(FileType::CommitteeMaster, "cm.txt"),
            SourceConfig::new(FileType::IndividualContributions, "itcont.txt"),
        ]
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: EtlConfig = toml::from_str("").unwrap();
        assert_eq!(config.run.cycle, 2024);
        assert_eq!(config.thresholds.shadow_pac_share, 0.80);
        assert_eq!(config.statistics.significance_level, 0.05);
        assert_eq!(config.tier_thresholds().unwrap(), TierThresholds::default());
    }

    #[test]
    fn test_parse_sources_and_thresholds() {
        let config: EtlConfig = toml::from_str(
            r#"
            [run]
            cycle = 2022
            output_dir = "out"

            [[sources]]
            file_type = "committee_master"
            path = "raw/cm22.zip"

            [[sources]]
            file_type = "individual_contributions"
            path = "raw/itcont.txt"
            has_header = false

            [resolver]
            fuzzy_max_edits = 1
            fuzzy_min_name_len = 8

            [thresholds]
            shadow_pac_share = 0.75

            [thresholds.tiers]
            mega = 2000000
            major = 200000
            significant = 20000
            small = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.run.cycle, 2022);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[1].has_header, Some(false));
        assert_eq!(config.sources[0].delimiter(), '|');
        assert_eq!(config.tier_thresholds().unwrap().small, Decimal::from(500));
        assert_eq!(config.resolver.fuzzy_max_edits, 1);
        assert_eq!(config.resolver.fuzzy_min_name_len, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sample_config_file_parses() {
        let config: EtlConfig = toml::from_str(include_str!("../fec_etl.toml")).unwrap();
        assert_eq!(config.resolver.fuzzy_max_edits, 2);
        assert_eq!(config.resolver.fuzzy_min_name_len, 6);
        assert_eq!(config.sources.len(), 7);
        assert!(config.tier_thresholds().is_ok());
    }

    #[test]
    fn test_negative_tier_boundary_is_threshold_error() {
        let mut config = EtlConfig { sources: minimal_sources(), ..Default::default() };
        config.thresholds.tiers.small = -1.0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EtlError::ThresholdConfig(_)));
    }

    #[test]
    fn test_overlapping_tier_boundaries_rejected() {
        let mut config = EtlConfig { sources: minimal_sources(), ..Default::default() };
        config.thresholds.tiers.major = 10_000.0;
        assert!(matches!(config.validate(), Err(EtlError::ThresholdConfig(_))));
    }

    #[test]
    fn test_shadow_share_out_of_range_rejected() {
        let mut config = EtlConfig { sources: minimal_sources(), ..Default::default() };
        config.thresholds.shadow_pac_share = 1.5;
        assert!(matches!(config.validate(), Err(EtlError::ThresholdConfig(_))));
    }

    #[test]
    fn test_missing_required_source_is_config_error() {
        let config = EtlConfig {
            sources: vec![SourceConfig::new(FileType::CommitteeMaster, "cm.txt")],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_backup_dir_defaults_next_to_output() {
        let run = RunConfig { output_dir: PathBuf::from("data/output"), ..Default::default() };
        assert_eq!(run.resolved_backup_dir(), PathBuf::from("data/backup"));
    }
}
