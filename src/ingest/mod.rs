//! Streaming ingest: byte source → incremental JSON parse → normalized
//! messages → shard store + caller sink.

mod normalize;
mod source;
mod stream;

pub use normalize::{conversation_ts, count_chars, normalize_role, normalize_ts};
pub use source::{ByteSource, ReaderSource, Utf8Stream, file_source};
pub use stream::{IngestOptions, IngestOutcome, IngestPipeline, IngestProgress};
