use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::app::ports::TableSinkPort;
use crate::config::RunConfig;
use crate::error::{EtlError, Result};
use crate::pipeline::load::{validate_table, OutputTable};

/// File-based implementation of TableSinkPort.
///
/// Tables are written to a per-run staging directory inside the output directory and
/// checked there; `commit` backs up any files about to be replaced and renames the
/// staged files into place.
pub struct CsvOutputAdapter {
    output_dir: PathBuf,
    staging_dir: PathBuf,
    /// Timestamped backup location, `None` when backups are off
    backup_dir: Option<PathBuf>,
    staged: Mutex<Vec<&'static str>>,
}

impl CsvOutputAdapter {
    pub fn new(run: &RunConfig, run_id: &str) -> Result<Self> {
        let output_dir = run.output_dir.clone();
        let staging_dir = output_dir.join(format!(".staging-{}", run_id));
        fs::create_dir_all(&staging_dir).map_err(|e| EtlError::io(&staging_dir, e))?;
        let backup_dir = run.backup.then(|| {
            let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
            let short_id: String = run_id.chars().take(8).collect();
            run.resolved_backup_dir().join(format!("{}_{}", stamp, short_id))
        });
        debug!("Staging output in {}", staging_dir.display());
        Ok(Self {
            output_dir,
            staging_dir,
            backup_dir,
            staged: Mutex::new(Vec::new()),
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn staged_names(&self) -> Vec<&'static str> {
        match self.staged.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn backup_existing(&self, names: &[&'static str]) -> Result<usize> {
        let Some(backup_dir) = &self.backup_dir else {
            return Ok(0);
        };
        let mut copied = 0;
        for name in names {
            let current = self.output_dir.join(name);
            if !current.is_file() {
                continue;
            }
            if copied == 0 {
                fs::create_dir_all(backup_dir).map_err(|e| EtlError::io(backup_dir, e))?;
            }
            let target = backup_dir.join(name);
            fs::copy(&current, &target).map_err(|e| EtlError::io(&target, e))?;
            copied += 1;
        }
        if copied > 0 {
            info!("Backed up {} existing output files to {}", copied, backup_dir.display());
        }
        Ok(copied)
    }
}

#[async_trait]
impl TableSinkPort for CsvOutputAdapter {
    async fn stage(&self, table: &OutputTable) -> Result<()> {
        let path = self.staging_dir.join(table.name);
        fs::write(&path, &table.bytes).map_err(|e| EtlError::io(&path, e))?;

        if !table.key_columns.is_empty() {
            let file = File::open(&path).map_err(|e| EtlError::io(&path, e))?;
            let rows = validate_table(table.name, table.key_columns, BufReader::new(file))?;
            if rows != table.rows {
                return Err(EtlError::OutputValidation {
                    table: table.name.to_string(),
                    message: format!("staged {} rows, expected {}", rows, table.rows),
                });
            }
            crate::metrics::aggregate::rows_written(table.name, rows);
        }

        match self.staged.lock() {
            Ok(mut guard) => guard.push(table.name),
            Err(poisoned) => poisoned.into_inner().push(table.name),
        }
        debug!("Staged {} ({} rows)", table.name, table.rows);
        Ok(())
    }

    async fn commit(&self) -> Result<Vec<PathBuf>> {
        let names = self.staged_names();
        self.backup_existing(&names)?;

        let mut promoted = Vec::with_capacity(names.len());
        for name in &names {
            let from = self.staging_dir.join(name);
            let to = self.output_dir.join(name);
            fs::rename(&from, &to).map_err(|e| EtlError::io(&to, e))?;
            promoted.push(to);
        }
        fs::remove_dir_all(&self.staging_dir).map_err(|e| EtlError::io(&self.staging_dir, e))?;
        info!("Promoted {} output files into {}", promoted.len(), self.output_dir.display());
        Ok(promoted)
    }

    async fn discard(&self) {
        if let Err(e) = fs::remove_dir_all(&self.staging_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove staging directory {}: {}", self.staging_dir.display(), e);
            }
        }
        info!("Discarded staged output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run_config(root: &Path, backup: bool) -> RunConfig {
        RunConfig {
            output_dir: root.join("output"),
            backup,
            backup_dir: Some(root.join("backup")),
            ..Default::default()
        }
    }

    fn table(name: &'static str, body: &str, rows: usize) -> OutputTable {
        OutputTable { name, key_columns: &["CMTE_ID"], rows, bytes: body.as_bytes().to_vec() }
    }

    #[tokio::test]
    async fn test_commit_promotes_and_backs_up() {
        let dir = tempdir().unwrap();
        let run = run_config(dir.path(), true);
        fs::create_dir_all(&run.output_dir).unwrap();
        fs::write(run.output_dir.join("dim_committees.csv"), "CMTE_ID\nOLD\n").unwrap();

        let sink = CsvOutputAdapter::new(&run, "0123456789abcdef").unwrap();
        sink.stage(&table("dim_committees.csv", "CMTE_ID\nC00000001\n", 1)).await.unwrap();
        // nothing visible before commit
        assert_eq!(
            fs::read_to_string(run.output_dir.join("dim_committees.csv")).unwrap(),
            "CMTE_ID\nOLD\n"
        );

        let promoted = sink.commit().await.unwrap();
        assert_eq!(promoted, vec![run.output_dir.join("dim_committees.csv")]);
        assert_eq!(fs::read_to_string(&promoted[0]).unwrap(), "CMTE_ID\nC00000001\n");
        assert!(!sink.staging_dir().exists());

        let backups: Vec<_> = fs::read_dir(dir.path().join("backup")).unwrap().collect();
        assert_eq!(backups.len(), 1);
        let backup_dir = backups[0].as_ref().unwrap().path();
        assert!(backup_dir.file_name().unwrap().to_string_lossy().ends_with("_01234567"));
        assert_eq!(fs::read_to_string(backup_dir.join("dim_committees.csv")).unwrap(), "CMTE_ID\nOLD\n");
    }

    #[tokio::test]
    async fn test_discard_leaves_output_untouched() {
        let dir = tempdir().unwrap();
        let run = run_config(dir.path(), false);
        let sink = CsvOutputAdapter::new(&run, "run-1").unwrap();
        sink.stage(&table("dim_committees.csv", "CMTE_ID\nC00000001\n", 1)).await.unwrap();
        sink.discard().await;

        assert!(!sink.staging_dir().exists());
        assert!(!run.output_dir.join("dim_committees.csv").exists());
        assert!(!dir.path().join("backup").exists());
    }

    #[tokio::test]
    async fn test_invalid_table_is_rejected_at_staging() {
        let dir = tempdir().unwrap();
        let run = run_config(dir.path(), false);
        let sink = CsvOutputAdapter::new(&run, "run-2").unwrap();
        let err = sink
            .stage(&table("dim_committees.csv", "CMTE_ID,NAME\n,NO ID\n", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::OutputValidation { .. }));
    }
}
