//! Incremental, chunk-boundary-safe JSON stream parser.
//!
//! The pipeline reads the source in bounded chunks, decodes UTF-8
//! incrementally, and scans the growing text buffer for complete top-level
//! JSON values without ever materializing the whole file. Malformed segments
//! are logged and skipped; parsing always resumes at the next value.

use serde_json::Value;

use crate::constants::{MAX_CHUNK_BYTES, MIN_CHUNK_BYTES, PREFERRED_CHUNK_BYTES};
use crate::error::Result;
use crate::ingest::normalize::{
    author_name, conversation_ts, count_images, message_ts, normalize_content, normalize_role,
    pick_model, visit_conversation,
};
use crate::ingest::source::{ByteSource, Utf8Stream};
use crate::stats::StatsContext;
use crate::store::{BlobStore, ShardStore};
use crate::types::{CancelToken, Message, Role};

/// Ingest tunables.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// When set, only assistant messages whose author name matches exactly
    /// are emitted.
    pub assistant_name: Option<String>,
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub finished: bool,
    pub aborted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IngestProgress {
    pub parse_pct: f64,
    pub shard_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootShape {
    Unknown,
    Array,
    Object,
}

enum ScanEnd {
    Complete(usize),
    NeedMore,
    Mismatch(usize),
}

struct ParseState {
    buffer: String,
    parse_index: usize,
    root: RootShape,
    finished: bool,
}

impl ParseState {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            parse_index: 0,
            root: RootShape::Unknown,
            finished: false,
        }
    }

    /// Drops the consumed prefix so the buffer stays bounded by the size of
    /// one unparsed value plus one chunk.
    fn compact(&mut self, consumed: usize) {
        if consumed > 0 {
            self.buffer.drain(..consumed);
            self.parse_index = self.parse_index.saturating_sub(consumed);
        }
    }
}

/// Streaming ingest run over one byte source. Owns nothing; borrows the shard
/// store and the stats context so callers keep full control of their
/// lifecycles.
pub struct IngestPipeline<'a, B: BlobStore> {
    store: &'a mut ShardStore<B>,
    stats: &'a mut StatsContext,
    options: IngestOptions,
}

impl<'a, B: BlobStore> IngestPipeline<'a, B> {
    pub fn new(
        store: &'a mut ShardStore<B>,
        stats: &'a mut StatsContext,
        options: IngestOptions,
    ) -> Self {
        Self {
            store,
            stats,
            options,
        }
    }

    /// Consumes the source fully (or until cancelled), emitting normalized
    /// assistant messages to `on_message` and the shard store, and progress
    /// after every chunk plus a terminal 100%.
    pub fn ingest<S: ByteSource>(
        &mut self,
        mut source: S,
        on_message: &mut dyn FnMut(&Message),
        on_progress: &mut dyn FnMut(IngestProgress),
    ) -> Result<IngestOutcome> {
        self.stats.reset();

        let total_bytes = source.len_hint().unwrap_or(0);
        let chunk_size = chunk_size_for(total_bytes);
        let mut chunk = vec![0u8; chunk_size];
        let mut decoder = Utf8Stream::new();
        let mut state = ParseState::new();
        let mut bytes_read = 0u64;
        let mut aborted = false;

        loop {
            if self.options.cancel.is_cancelled() {
                aborted = true;
                break;
            }
            let read = source.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            bytes_read += read as u64;
            decoder.push(&chunk[..read], &mut state.buffer);
            self.process_buffer(&mut state, false, on_message)?;

            let parse_pct = if total_bytes > 0 {
                ((bytes_read as f64 / total_bytes as f64) * 100.0).min(100.0)
            } else {
                0.0
            };
            on_progress(IngestProgress {
                parse_pct,
                shard_pct: shard_pct(self.store.progress()),
            });
        }

        if aborted {
            tracing::debug!(bytes_read, "ingest aborted by caller");
            return Ok(IngestOutcome {
                finished: false,
                aborted: true,
            });
        }

        decoder.finish(&mut state.buffer);
        self.process_buffer(&mut state, true, on_message)?;
        if !state.finished && !state.buffer.trim().is_empty() {
            tracing::warn!(
                bytes = state.buffer.len(),
                "dropping unterminated trailing data"
            );
        }
        self.store.finalize()?;
        on_progress(IngestProgress {
            parse_pct: 100.0,
            shard_pct: 100.0,
        });
        Ok(IngestOutcome {
            finished: true,
            aborted: false,
        })
    }

    fn process_buffer(
        &mut self,
        state: &mut ParseState,
        is_final: bool,
        on_message: &mut dyn FnMut(&Message),
    ) -> Result<()> {
        if state.finished {
            // Trailing bytes after the root value are ignored.
            state.buffer.clear();
            state.parse_index = 0;
            return Ok(());
        }
        let mut consumed = 0;
        while state.parse_index < state.buffer.len() && !state.finished {
            match state.root {
                RootShape::Unknown => {
                    let next = skip_ws(&state.buffer, state.parse_index);
                    if next >= state.buffer.len() {
                        state.parse_index = next;
                        break;
                    }
                    match state.buffer.as_bytes()[next] {
                        b'[' => {
                            state.root = RootShape::Array;
                            state.parse_index = next + 1;
                            consumed = state.parse_index;
                        }
                        b'{' => {
                            state.root = RootShape::Object;
                            state.parse_index = next;
                        }
                        _ => {
                            // Malformed prefix tolerance: skip forward.
                            state.parse_index = next + next_char_len(&state.buffer, next);
                            consumed = state.parse_index;
                        }
                    }
                }
                RootShape::Array => {
                    let start = skip_ws(&state.buffer, state.parse_index);
                    if start >= state.buffer.len() {
                        state.parse_index = start;
                        break;
                    }
                    match state.buffer.as_bytes()[start] {
                        b',' => {
                            state.parse_index = start + 1;
                            consumed = state.parse_index;
                            continue;
                        }
                        b']' => {
                            state.parse_index = start + 1;
                            consumed = state.parse_index;
                            state.finished = true;
                            break;
                        }
                        _ => {}
                    }
                    match find_value_end(&state.buffer, start) {
                        ScanEnd::NeedMore => break,
                        ScanEnd::Mismatch(pos) => {
                            tracing::warn!(offset = start, "bracket mismatch, skipping segment");
                            state.parse_index = pos + 1;
                            consumed = state.parse_index;
                        }
                        ScanEnd::Complete(end) if end == start => {
                            // Zero-width value means a stray delimiter; step
                            // over it so the scan always makes progress.
                            state.parse_index = start + next_char_len(&state.buffer, start);
                            consumed = state.parse_index;
                        }
                        ScanEnd::Complete(end) => {
                            state.parse_index = end;
                            consumed = state.parse_index;
                            self.handle_segment(&state.buffer[start..end], on_message)?;
                        }
                    }
                }
                RootShape::Object => {
                    match find_value_end(&state.buffer, state.parse_index) {
                        ScanEnd::NeedMore => break,
                        ScanEnd::Mismatch(pos) => {
                            tracing::warn!(
                                offset = state.parse_index,
                                "bracket mismatch in object root"
                            );
                            state.parse_index = pos + 1;
                            consumed = state.parse_index;
                            state.finished = true;
                        }
                        ScanEnd::Complete(end) => {
                            let start = state.parse_index;
                            match serde_json::from_str::<Value>(&state.buffer[start..end]) {
                                Ok(conv) => {
                                    state.parse_index = end;
                                    consumed = state.parse_index;
                                    self.handle_conversation(&conv, on_message)?;
                                    state.finished = true;
                                }
                                Err(err) if !is_final => {
                                    // The object may simply be truncated at a
                                    // chunk boundary; buffer more and retry.
                                    tracing::trace!(error = %err, "object parse deferred");
                                    return Ok(());
                                }
                                Err(err) => {
                                    tracing::warn!(error = %err, "failed to parse object root");
                                    state.parse_index = end;
                                    consumed = state.parse_index;
                                    state.finished = true;
                                }
                            }
                        }
                    }
                    break;
                }
            }
        }
        state.compact(consumed);
        Ok(())
    }

    fn handle_segment(
        &mut self,
        segment: &str,
        on_message: &mut dyn FnMut(&Message),
    ) -> Result<()> {
        match serde_json::from_str::<Value>(segment) {
            Ok(conv) => self.handle_conversation(&conv, on_message),
            Err(err) => {
                tracing::warn!(error = %err, len = segment.len(), "failed to parse segment");
                Ok(())
            }
        }
    }

    fn handle_conversation(
        &mut self,
        conv: &Value,
        on_message: &mut dyn FnMut(&Message),
    ) -> Result<()> {
        let conv_ts = conversation_ts(conv);
        let mut nodes = Vec::new();
        visit_conversation(conv, &mut |msg| nodes.push(msg.clone()));
        for node in &nodes {
            self.process_message(node, conv_ts, on_message)?;
        }
        Ok(())
    }

    fn process_message(
        &mut self,
        msg: &Value,
        conv_ts: Option<i64>,
        on_message: &mut dyn FnMut(&Message),
    ) -> Result<()> {
        if !msg.is_object() {
            return Ok(());
        }
        let role = normalize_role(msg);
        let ts = message_ts(msg).or(conv_ts);
        let model = pick_model(msg);
        let content = normalize_content(msg);
        let image_count = count_images(msg, &content);

        // Timeline/model aggregators see every discovered message regardless
        // of the emission filter.
        if let Some(ts) = ts {
            self.stats
                .activity
                .bump_activity(ts, role, &content, image_count);
        }
        self.stats
            .models
            .bump_model(ts, role, &content, model.as_deref());

        if role != Some(Role::Assistant) {
            return Ok(());
        }
        let name = author_name(msg);
        if let Some(filter) = &self.options.assistant_name {
            if name.as_deref() != Some(filter.as_str()) {
                return Ok(());
            }
        }

        let message = Message {
            role: Role::Assistant,
            name,
            text: content,
            ts,
            model,
        };
        on_message(&message);
        self.store.append(message)?;
        Ok(())
    }
}

fn shard_pct(progress: crate::types::ShardProgress) -> f64 {
    let total = progress.persisted_bytes + progress.pending_bytes;
    if total == 0 {
        0.0
    } else {
        (progress.persisted_bytes as f64 / total as f64) * 100.0
    }
}

/// `clamp(max(min, total, preferred), min, max)`: bounded per-step latency
/// while minimizing read-call overhead.
fn chunk_size_for(total_bytes: u64) -> usize {
    let requested = if total_bytes > 0 {
        (total_bytes as usize).min(MAX_CHUNK_BYTES)
    } else {
        PREFERRED_CHUNK_BYTES
    };
    requested
        .max(MIN_CHUNK_BYTES)
        .max(PREFERRED_CHUNK_BYTES)
        .min(MAX_CHUNK_BYTES)
}

fn next_char_len(buffer: &str, index: usize) -> usize {
    buffer[index..].chars().next().map_or(1, char::len_utf8)
}

fn skip_ws(buffer: &str, start: usize) -> usize {
    let bytes = buffer.as_bytes();
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\n' | b'\r' | b'\t' => i += 1,
            // UTF-8 encoded BOM (U+FEFF)
            0xEF if bytes[i..].starts_with(&[0xEF, 0xBB, 0xBF]) => i += 3,
            _ => break,
        }
    }
    i
}

/// Locates the end (exclusive) of the JSON value starting at `start`.
/// String- and escape-aware; never allocates.
fn find_value_end(buffer: &str, start: usize) -> ScanEnd {
    let bytes = buffer.as_bytes();
    if start >= bytes.len() {
        return ScanEnd::NeedMore;
    }
    match bytes[start] {
        b'"' => {
            let mut escaped = false;
            for (offset, &b) in bytes[start + 1..].iter().enumerate() {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    return ScanEnd::Complete(start + 2 + offset);
                }
            }
            ScanEnd::NeedMore
        }
        b'{' | b'[' => {
            let mut stack: Vec<u8> = Vec::new();
            let mut in_string = false;
            let mut escaped = false;
            for (offset, &b) in bytes[start..].iter().enumerate() {
                if escaped {
                    escaped = false;
                    continue;
                }
                match b {
                    b'\\' if in_string => escaped = true,
                    b'"' => in_string = !in_string,
                    _ if in_string => {}
                    b'{' | b'[' => stack.push(b),
                    b'}' | b']' => {
                        let opener = stack.pop();
                        let matches = matches!(
                            (opener, b),
                            (Some(b'{'), b'}') | (Some(b'['), b']')
                        );
                        if !matches {
                            return ScanEnd::Mismatch(start + offset);
                        }
                        if stack.is_empty() {
                            return ScanEnd::Complete(start + offset + 1);
                        }
                    }
                    _ => {}
                }
            }
            ScanEnd::NeedMore
        }
        _ => {
            // Number or literal: runs to the next delimiter.
            for (offset, &b) in bytes[start..].iter().enumerate() {
                if matches!(b, b',' | b']' | b'}' | b'\n' | b'\r' | b'\t' | b' ') {
                    return ScanEnd::Complete(start + offset);
                }
            }
            ScanEnd::NeedMore
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::source::ReaderSource;
    use crate::store::MemoryBlobStore;
    use crate::types::ShardFilter;
    use std::io::Cursor;

    fn run_ingest(input: &str, options: IngestOptions) -> (Vec<Message>, IngestOutcome) {
        let mut store = ShardStore::with_bounds(MemoryBlobStore::new(), 1024, 2048);
        let mut stats = StatsContext::default();
        let mut pipeline = IngestPipeline::new(&mut store, &mut stats, options);
        let mut messages = Vec::new();
        let source = ReaderSource::with_len(
            Cursor::new(input.as_bytes().to_vec()),
            input.len() as u64,
        );
        let outcome = pipeline
            .ingest(source, &mut |m| messages.push(m.clone()), &mut |_| {})
            .expect("ingest");
        (messages, outcome)
    }

    #[test]
    fn array_root_emits_assistant_messages() {
        let input = r#"[{"messages":[
            {"role":"assistant","content":"hello world","create_time":1700000000},
            {"role":"user","content":"ignored"}
        ]}]"#;
        let (messages, outcome) = run_ingest(input, IngestOptions::default());
        assert!(outcome.finished);
        assert!(!outcome.aborted);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hello world");
        assert_eq!(messages[0].ts, Some(1_700_000_000_000));
    }

    #[test]
    fn malformed_segments_are_skipped() {
        let input = r#"[
            {"messages":[{"role":"assistant","content":"first"}]},
            {"broken": truue},
            {"messages":[{"role":"assistant","content":"second"}]}
        ]"#;
        let (messages, outcome) = run_ingest(input, IngestOptions::default());
        assert!(outcome.finished);
        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn garbage_prefix_is_tolerated() {
        let input = "\u{feff}garbage [{\"messages\":[{\"role\":\"assistant\",\"content\":\"ok\"}]}]";
        let (messages, _) = run_ingest(input, IngestOptions::default());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "ok");
    }

    #[test]
    fn object_root_parses_single_conversation() {
        let input = r#"{"mapping":{"a":{"message":{"role":"assistant","content":"tree"}}}}"#;
        let (messages, outcome) = run_ingest(input, IngestOptions::default());
        assert!(outcome.finished);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "tree");
    }

    #[test]
    fn name_filter_gates_emission() {
        let input = r#"[{"messages":[
            {"role":"assistant","name":"Echo","content":"yes"},
            {"role":"assistant","name":"Other","content":"no"}
        ]}]"#;
        let options = IngestOptions {
            assistant_name: Some("Echo".into()),
            ..IngestOptions::default()
        };
        let (messages, _) = run_ingest(input, options);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "yes");
    }

    #[test]
    fn cancellation_reports_aborted_outcome() {
        let options = IngestOptions::default();
        options.cancel.cancel();
        let (messages, outcome) = run_ingest(
            r#"[{"messages":[{"role":"assistant","content":"never"}]}]"#,
            options,
        );
        assert!(messages.is_empty());
        assert!(!outcome.finished);
        assert!(outcome.aborted);
    }

    #[test]
    fn emission_is_chunk_size_invariant() {
        let conversations: Vec<String> = (0..40)
            .map(|i| {
                format!(
                    r#"{{"create_time":1700000{i:03},"messages":[{{"role":"assistant","content":"msg number {i} with some body"}},{{"role":"user","content":"question {i}"}}]}}"#
                )
            })
            .collect();
        let input = format!("[{}]", conversations.join(","));

        // Reference: single pass over the whole input.
        let (reference, _) = run_ingest(&input, IngestOptions::default());
        assert_eq!(reference.len(), 40);

        // Byte-at-a-time source exercises every chunk boundary.
        struct Trickle {
            data: Vec<u8>,
            pos: usize,
        }
        impl ByteSource for Trickle {
            fn len_hint(&self) -> Option<u64> {
                Some(self.data.len() as u64)
            }
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.pos >= self.data.len() {
                    return Ok(0);
                }
                let n = buf.len().min(7).min(self.data.len() - self.pos);
                buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
                self.pos += n;
                Ok(n)
            }
        }

        let mut store = ShardStore::with_bounds(MemoryBlobStore::new(), 1024, 2048);
        let mut stats = StatsContext::default();
        let mut pipeline = IngestPipeline::new(&mut store, &mut stats, IngestOptions::default());
        let mut trickled = Vec::new();
        pipeline
            .ingest(
                Trickle {
                    data: input.into_bytes(),
                    pos: 0,
                },
                &mut |m| trickled.push(m.clone()),
                &mut |_| {},
            )
            .expect("trickled ingest");
        assert_eq!(trickled, reference);
    }

    #[test]
    fn end_to_end_single_message_persists_one_shard() {
        let input = r#"[{"messages":[{"role":"assistant","content":"hello world","create_time":1700000000}]}]"#;
        let mut store = ShardStore::with_bounds(MemoryBlobStore::new(), 1024, 2048);
        let mut stats = StatsContext::default();
        let mut pipeline =
            IngestPipeline::new(&mut store, &mut stats, IngestOptions::default());
        let mut messages = Vec::new();
        let source = ReaderSource::with_len(
            Cursor::new(input.as_bytes().to_vec()),
            input.len() as u64,
        );
        let mut progress_calls = 0;
        let outcome = pipeline
            .ingest(source, &mut |m| messages.push(m.clone()), &mut |_| {
                progress_calls += 1;
            })
            .expect("ingest");
        assert!(outcome.finished);
        assert!(progress_calls >= 1);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].ts, Some(1_700_000_000_000));

        let shards = store.list_shards(ShardFilter::default()).expect("list");
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].message_count, 1);
        let loaded = store
            .read_shard_messages(shards[0].id)
            .expect("read")
            .expect("present");
        assert_eq!(loaded[0].text, "hello world");
    }
}
