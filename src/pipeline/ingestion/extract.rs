use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};
use zip::ZipArchive;

use crate::config::SourceConfig;
use crate::constants;
use crate::domain::FileType;
use crate::error::{EtlError, Result};
use crate::pipeline::CancelFlag;

/// One delimited line of a source file, fields split but not yet interpreted
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 1-based line number in the (decompressed) text file
    pub line: u64,
    pub fields: Vec<String>,
}

/// A bounded batch of rows from one source
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub source_index: usize,
    pub file_type: FileType,
    pub file_name: Arc<str>,
    /// Position of this chunk within its source, starting at 0
    pub sequence: usize,
    pub rows: Vec<RawRow>,
}

/// Facts about a fully read source, recorded in the run manifest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedSource {
    pub source_index: usize,
    pub file_type: FileType,
    pub path: String,
    /// Entry read from a zip archive, if the source was one
    pub archive_entry: Option<String>,
    pub sha256: String,
    pub bytes: u64,
    pub rows: u64,
    pub chunks: usize,
}

/// Messages an extraction worker sends to the normalizer
#[derive(Debug)]
pub enum ExtractMessage {
    Chunk(RawChunk),
    Finished(ExtractedSource),
}

/// Bulk download URL for a file type and election cycle
pub fn bulk_url(file_type: FileType, cycle: u16) -> String {
    format!(
        "{}/{}/{}{:02}.zip",
        constants::FEC_BULK_BASE_URL,
        cycle,
        file_type.bulk_prefix(),
        cycle % 100
    )
}

/// SHA-256 and byte length of a file, streamed
pub fn checksum_file(path: &Path) -> Result<(String, u64)> {
    let file = File::open(path).map_err(|e| EtlError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).map_err(|e| EtlError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Pick the archive entry holding the data: the first `.txt` entry, else the first file
fn select_entry<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>, path: &Path) -> Result<usize> {
    let mut first_file = None;
    for idx in 0..archive.len() {
        let entry = archive.by_index(idx).map_err(|e| EtlError::Zip {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if entry.is_dir() {
            continue;
        }
        if entry.name().to_ascii_lowercase().ends_with(".txt") {
            return Ok(idx);
        }
        first_file.get_or_insert(idx);
    }
    first_file.ok_or_else(|| EtlError::Zip {
        path: path.to_path_buf(),
        message: "archive contains no data file".to_string(),
    })
}

/// Split delimited text into rows and hand them to `on_chunk` in batches of `chunk_size`
fn stream_rows<R: Read>(
    reader: R,
    source: &SourceConfig,
    chunk_size: usize,
    cancel: &CancelFlag,
    on_chunk: &mut dyn FnMut(Vec<RawRow>) -> Result<()>,
) -> Result<(u64, usize)> {
    let delimiter = u8::try_from(source.delimiter()).map_err(|_| {
        EtlError::Config(format!(
            "delimiter of {} must be a single-byte character",
            source.display_name()
        ))
    })?;

    // FEC bulk text is not quoted: a stray double quote is part of the value.
    // Lines are counted physically, blank ones included, so exclusions point at the file.
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);
    let mut batch = Vec::with_capacity(chunk_size.min(8192));
    let mut line = 0u64;
    let mut rows = 0u64;
    let mut chunks = 0usize;

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| EtlError::io(&source.path, e))?;
        if read == 0 {
            break;
        }
        line += 1;
        let text = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
        let text = text.strip_suffix(b"\r").unwrap_or(text);
        if text.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let fields: Vec<String> = text
            .split(|b| *b == delimiter)
            .map(|f| String::from_utf8_lossy(f).trim().to_string())
            .collect();
        rows += 1;
        batch.push(RawRow { line, fields });

        if batch.len() >= chunk_size {
            if cancel.is_cancelled() {
                return Err(EtlError::Cancelled);
            }
            on_chunk(std::mem::take(&mut batch))?;
            chunks += 1;
        }
    }
    if !batch.is_empty() {
        on_chunk(batch)?;
        chunks += 1;
    }
    Ok((rows, chunks))
}

/// Read one source (plain text or zip) in chunks, synchronously
#[instrument(skip(source, cancel, on_chunk), fields(file_type = %source.file_type, path = %source.path.display()))]
pub fn read_source(
    source_index: usize,
    source: &SourceConfig,
    chunk_size: usize,
    cancel: &CancelFlag,
    on_chunk: &mut dyn FnMut(RawChunk) -> Result<()>,
) -> Result<ExtractedSource> {
    let path = source.path.as_path();
    let (sha256, bytes) = checksum_file(path)?;
    crate::metrics::extract::bytes_read(source.file_type.as_str(), bytes);

    let file_name: Arc<str> = Arc::from(source.display_name());
    let mut sequence = 0usize;
    let mut emit = |rows: Vec<RawRow>| -> Result<()> {
        crate::metrics::extract::chunk_sent(source.file_type.as_str(), rows.len());
        let chunk = RawChunk {
            source_index,
            file_type: source.file_type,
            file_name: file_name.clone(),
            sequence,
            rows,
        };
        sequence += 1;
        on_chunk(chunk)
    };

    let file = File::open(path).map_err(|e| EtlError::io(path, e))?;
    let (archive_entry, (rows, chunks)) = if is_zip(path) {
        let mut archive = ZipArchive::new(file).map_err(|e| EtlError::Zip {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let idx = select_entry(&mut archive, path)?;
        let entry = archive.by_index(idx).map_err(|e| EtlError::Zip {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let name = entry.name().to_string();
        debug!("Reading archive entry {}", name);
        let counts = stream_rows(entry, source, chunk_size, cancel, &mut emit)?;
        (Some(name), counts)
    } else {
        let counts = stream_rows(BufReader::new(file), source, chunk_size, cancel, &mut emit)?;
        (None, counts)
    };

    info!("Extracted {} rows in {} chunks from {}", rows, chunks, file_name);
    Ok(ExtractedSource {
        source_index,
        file_type: source.file_type,
        path: path.display().to_string(),
        archive_entry,
        sha256,
        bytes,
        rows,
        chunks,
    })
}

/// Spawn a blocking worker that streams one source into the bounded channel.
///
/// The worker owns its input and only talks to the rest of the pipeline through `tx`;
/// when the receiver is gone the worker stops with `Cancelled`.
pub fn spawn_extract_worker(
    source_index: usize,
    source: SourceConfig,
    chunk_size: usize,
    cancel: CancelFlag,
    tx: mpsc::Sender<ExtractMessage>,
) -> JoinHandle<Result<()>> {
    tokio::task::spawn_blocking(move || {
        let mut send = |chunk: RawChunk| -> Result<()> {
            tx.blocking_send(ExtractMessage::Chunk(chunk))
                .map_err(|_| EtlError::Cancelled)
        };
        let extracted = read_source(source_index, &source, chunk_size, &cancel, &mut send)?;
        tx.blocking_send(ExtractMessage::Finished(extracted))
            .map_err(|_| EtlError::Cancelled)
    })
}
