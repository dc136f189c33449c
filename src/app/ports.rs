use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::load::OutputTable;

/// Destination for a run's output tables.
///
/// Tables are staged first; nothing becomes visible in the output location until
/// `commit`. `discard` drops whatever was staged.
#[async_trait]
pub trait TableSinkPort: Send + Sync {
    async fn stage(&self, table: &OutputTable) -> Result<()>;
    async fn commit(&self) -> Result<Vec<PathBuf>>;
    async fn discard(&self);
}

// Fetch-side ports
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpGetResult>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub content_length: u64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}
