use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::app::ports::HttpClientPort;
use crate::config::SourceConfig;
use crate::domain::FileType;
use crate::error::{EtlError, Result};
use crate::pipeline::ingestion::extract::bulk_url;

/// A bulk file written to disk by `fetch`
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedFile {
    pub file_type: FileType,
    pub url: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
    pub etag: Option<String>,
    /// Already present and left alone
    pub skipped: bool,
}

/// Downloads the configured sources' bulk archives for one election cycle
pub struct FetchUseCase<H: HttpClientPort + ?Sized> {
    pub http: Box<H>,
    pub cycle: u16,
    /// Re-download files that already exist
    pub overwrite: bool,
}

impl<H: HttpClientPort + ?Sized> FetchUseCase<H> {
    pub fn new(http: Box<H>, cycle: u16, overwrite: bool) -> Self {
        Self { http, cycle, overwrite }
    }

    pub fn url_for(&self, source: &SourceConfig) -> String {
        source
            .url
            .clone()
            .unwrap_or_else(|| bulk_url(source.file_type, self.cycle))
    }

    pub async fn fetch_one(&self, source: &SourceConfig) -> Result<FetchedFile> {
        let url = self.url_for(source);
        if source.path.exists() && !self.overwrite {
            info!("{} already present, skipping download", source.path.display());
            return Ok(FetchedFile {
                file_type: source.file_type,
                url,
                path: source.path.clone(),
                bytes: 0,
                sha256: String::new(),
                etag: None,
                skipped: true,
            });
        }

        info!("Fetching {} from {}", source.file_type, url);
        let resp = self.http.get(&url).await?;
        if !(200..300).contains(&resp.status) {
            return Err(EtlError::Http(format!("{} returned status {}", url, resp.status)));
        }

        let sha256 = {
            let mut h = Sha256::new();
            h.update(&resp.bytes);
            hex::encode(h.finalize())
        };
        if let Some(parent) = source.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| EtlError::io(parent, e))?;
        }
        // staged as .part, then renamed into place
        let partial = source.path.with_extension("part");
        std::fs::write(&partial, &resp.bytes).map_err(|e| EtlError::io(&partial, e))?;
        std::fs::rename(&partial, &source.path).map_err(|e| EtlError::io(&source.path, e))?;

        info!("Saved {} ({} bytes, sha256 {})", source.path.display(), resp.bytes.len(), &sha256[..12]);
        Ok(FetchedFile {
            file_type: source.file_type,
            url,
            path: source.path.clone(),
            bytes: resp.bytes.len() as u64,
            sha256,
            etag: resp.etag,
            skipped: false,
        })
    }

    /// Fetch every source in order; the first failure stops the run
    pub async fn fetch_all(&self, sources: &[SourceConfig]) -> Result<Vec<FetchedFile>> {
        let mut fetched = Vec::with_capacity(sources.len());
        for source in sources {
            match self.fetch_one(source).await {
                Ok(file) => fetched.push(file),
                Err(e) => {
                    warn!("Fetch of {} failed: {}", source.file_type, e);
                    return Err(e);
                }
            }
        }
        Ok(fetched)
    }
}
