//! Byte sources and the streaming UTF-8 decoder.

use std::io::Read;
use std::path::Path;

use crate::error::Result;

/// A chunked byte producer with an optional known total length.
pub trait ByteSource {
    /// Total size in bytes, when known. Drives chunk sizing and progress.
    fn len_hint(&self) -> Option<u64>;

    /// Reads up to `buf.len()` bytes. Zero means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Adapts any `io::Read` into a byte source.
#[derive(Debug)]
pub struct ReaderSource<R> {
    inner: R,
    len: Option<u64>,
}

impl<R: Read> ReaderSource<R> {
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self { inner, len: None }
    }

    #[must_use]
    pub fn with_len(inner: R, len: u64) -> Self {
        Self {
            inner,
            len: Some(len),
        }
    }
}

impl<R: Read> ByteSource for ReaderSource<R> {
    fn len_hint(&self) -> Option<u64> {
        self.len
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Opens a file as a byte source with its length hint populated.
pub fn file_source<P: AsRef<Path>>(path: P) -> Result<ReaderSource<fs_err::File>> {
    let file = fs_err::File::open(path.as_ref())?;
    let len = file.metadata()?.len();
    Ok(ReaderSource::with_len(file, len))
}

/// Incremental UTF-8 decoder that holds partial multi-byte sequences across
/// chunk boundaries. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    carry: Vec<u8>,
}

impl Utf8Stream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `bytes` into `out`, buffering any trailing incomplete sequence.
    pub fn push(&mut self, bytes: &[u8], out: &mut String) {
        if self.carry.is_empty() {
            self.decode(bytes, out, true);
        } else {
            let mut joined = std::mem::take(&mut self.carry);
            joined.extend_from_slice(bytes);
            self.decode(&joined, out, true);
        }
    }

    /// Flushes the decoder. A dangling partial sequence becomes U+FFFD.
    pub fn finish(&mut self, out: &mut String) {
        if !self.carry.is_empty() {
            let tail = std::mem::take(&mut self.carry);
            self.decode(&tail, out, false);
        }
    }

    fn decode(&mut self, mut bytes: &[u8], out: &mut String, keep_partial: bool) {
        loop {
            match std::str::from_utf8(bytes) {
                Ok(valid) => {
                    out.push_str(valid);
                    return;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    // Safe split: everything before valid_up_to is valid UTF-8.
                    out.push_str(&String::from_utf8_lossy(&bytes[..valid_up_to]));
                    bytes = &bytes[valid_up_to..];
                    match err.error_len() {
                        Some(invalid) => {
                            out.push('\u{FFFD}');
                            bytes = &bytes[invalid..];
                        }
                        None => {
                            // Incomplete tail: either carry it or replace it.
                            if keep_partial {
                                self.carry = bytes.to_vec();
                            } else {
                                out.push('\u{FFFD}');
                            }
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multibyte_sequence_split_across_chunks() {
        // "你好" is six bytes; split inside the second character.
        let bytes = "你好".as_bytes();
        let mut decoder = Utf8Stream::new();
        let mut out = String::new();
        decoder.push(&bytes[..4], &mut out);
        assert_eq!(out, "你");
        decoder.push(&bytes[4..], &mut out);
        assert_eq!(out, "你好");
        decoder.finish(&mut out);
        assert_eq!(out, "你好");
    }

    #[test]
    fn invalid_bytes_become_replacement_chars() {
        let mut decoder = Utf8Stream::new();
        let mut out = String::new();
        decoder.push(&[b'a', 0xFF, b'b'], &mut out);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn dangling_partial_is_replaced_at_finish() {
        let mut decoder = Utf8Stream::new();
        let mut out = String::new();
        decoder.push(&"你".as_bytes()[..2], &mut out);
        assert_eq!(out, "");
        decoder.finish(&mut out);
        assert_eq!(out, "\u{FFFD}");
    }

    #[test]
    fn reader_source_reports_length() {
        let data = b"hello".to_vec();
        let source = ReaderSource::with_len(std::io::Cursor::new(data), 5);
        assert_eq!(source.len_hint(), Some(5));
    }
}
