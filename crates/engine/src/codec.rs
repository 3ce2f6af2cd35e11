//! Framing for the engine's stdout protocol.
//!
//! The engine answers each query with one JSON document, possibly spread over
//! several lines and surrounded by arbitrary log noise. A document starts at
//! the first `{` after a noise line and ends where the brace depth returns to
//! zero. Braces inside JSON string literals (the echoed query text, entity
//! values) do not count.

use std::io::{self, BufRead, Read};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::trace;

use crate::config::DEFAULT_MAX_DOCUMENT_BYTES;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed engine document: {0}")]
    Malformed(String),

    #[error("engine output ended before a complete document")]
    UnexpectedEof,

    #[error("engine document exceeds {limit} bytes")]
    Oversized { limit: usize },

    #[error("failed to read engine output: {0}")]
    Io(#[from] io::Error),
}

/// Brace depth of a document being accumulated, outside string literals.
#[derive(Debug, Default)]
struct Depth {
    open: usize,
    in_string: bool,
    escaped: bool,
}

impl Depth {
    /// Feed `chunk`; returns the byte offset just past the closing brace once
    /// the document is complete.
    fn scan(&mut self, chunk: &str) -> Option<usize> {
        for (idx, c) in chunk.char_indices() {
            if self.in_string {
                match c {
                    _ if self.escaped => self.escaped = false,
                    '\\' => self.escaped = true,
                    '"' => self.in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => self.in_string = true,
                '{' => self.open += 1,
                '}' => {
                    self.open = self.open.saturating_sub(1);
                    if self.open == 0 {
                        return Some(idx + 1);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Pulls brace-framed JSON documents off a line-oriented reader.
#[derive(Debug)]
pub struct ResultReader<R> {
    reader: R,
    max_document_bytes: usize,
    line: String,
}

impl<R: BufRead> ResultReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            line: String::new(),
        }
    }

    pub fn with_max_document_bytes(mut self, limit: usize) -> Self {
        self.max_document_bytes = limit;
        self
    }

    /// Read and deserialize the next document.
    pub fn next_result<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        let document = self.next_document()?;
        serde_json::from_str(&document).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Read the raw text of the next document.
    ///
    /// Never consumes input past the line that closes the document, and never
    /// buffers more than `max_document_bytes` of a single line. Text after the
    /// closing brace on that line is dropped.
    pub fn next_document(&mut self) -> Result<String, ProtocolError> {
        let mut document = String::new();
        let mut depth = Depth::default();

        loop {
            let budget = self.max_document_bytes.saturating_sub(document.len());
            self.line.clear();
            let read = (&mut self.reader)
                .take(budget as u64 + 1)
                .read_line(&mut self.line)?;
            if read == 0 {
                return Err(ProtocolError::UnexpectedEof);
            }
            if read > budget {
                return Err(ProtocolError::Oversized {
                    limit: self.max_document_bytes,
                });
            }

            let chunk = if document.is_empty() {
                match self.line.find('{') {
                    Some(start) => &self.line[start..],
                    None => {
                        trace!(line = self.line.trim_end(), "skipping engine noise");
                        continue;
                    }
                }
            } else {
                self.line.as_str()
            };

            if let Some(end) = depth.scan(chunk) {
                let trailing = chunk[end..].trim();
                if !trailing.is_empty() {
                    trace!(trailing, "dropping text after engine document");
                }
                document.push_str(&chunk[..end]);
                return Ok(document);
            }
            document.push_str(chunk);
        }
    }
}
