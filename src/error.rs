use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Schema mismatch in {file}: required field '{field}' {detail}")]
    SchemaMismatch {
        file: String,
        field: String,
        detail: String,
    },

    #[error("Parse error in {file} line {line}: {message}")]
    Parse {
        file: String,
        line: u64,
        message: String,
    },

    #[error("Relationship gap: {0}")]
    RelationshipGap(String),

    #[error("Invalid threshold configuration: {0}")]
    ThresholdConfig(String),

    #[error("Statistic undefined: {0}")]
    StatisticUndefined(String),

    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Archive error in {path}: {message}")]
    Zip { path: PathBuf, message: String },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Output table {table} failed validation: {message}")]
    OutputValidation { table: String, message: String },

    #[error("Extraction worker failed: {0}")]
    Worker(String),

    #[error("Pipeline run cancelled")]
    Cancelled,
}

impl EtlError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EtlError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn schema_missing(file: impl Into<String>, field: impl Into<String>) -> Self {
        EtlError::SchemaMismatch {
            file: file.into(),
            field: field.into(),
            detail: "is missing".to_string(),
        }
    }

    /// Short machine-readable name used in run summaries and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            EtlError::SchemaMismatch { .. } => "SchemaMismatch",
            EtlError::Parse { .. } => "ParseError",
            EtlError::RelationshipGap(_) => "RelationshipGap",
            EtlError::ThresholdConfig(_) => "ThresholdConfigError",
            EtlError::StatisticUndefined(_) => "StatisticUndefined",
            EtlError::Reconciliation(_) => "Reconciliation",
            EtlError::Config(_) => "Config",
            EtlError::Io { .. } => "Io",
            EtlError::Csv(_) => "Csv",
            EtlError::Zip { .. } => "Zip",
            EtlError::Toml(_) => "Toml",
            EtlError::Json(_) => "Json",
            EtlError::Http(_) => "Http",
            EtlError::OutputValidation { .. } => "OutputValidation",
            EtlError::Worker(_) => "Worker",
            EtlError::Cancelled => "Cancelled",
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
