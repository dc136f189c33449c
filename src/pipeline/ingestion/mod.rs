// Pipeline ingestion: chunked reading of plain and zipped bulk files

pub mod extract;

pub use extract::{spawn_extract_worker, ExtractMessage, ExtractedSource, RawChunk, RawRow};
