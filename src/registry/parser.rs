//! Registry stream parsing.
//!
//! Bytes arrive in arbitrary chunks; [`LineSplitter`] turns them into lines,
//! [`RecordParser`] turns lines into [`RecordChange`]s and [`BatchCollector`]
//! applies the per-record interruption check while accumulating a
//! [`FetchBatch`].

use super::source::{Endpoint, FetchBatch, FetchMode};
use crate::error::DirectoryError;
use crate::store::record::derive_id;
use crate::store::{keys, CollectionRecord, Properties, RecordChange};
use crate::types::Interrupt;
use tracing::{debug, trace};

/// Line closing a record in the line-terminated response format.
const RECORD_TERMINATOR: &str = "*";

/// Reassembles lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line it completes (without terminator).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(take_line(&mut self.pending));
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Trailing line left without a final newline, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(take_line(&mut self.pending))
        }
    }
}

fn take_line(buffer: &mut Vec<u8>) -> String {
    if buffer.last() == Some(&b'\r') {
        buffer.pop();
    }
    let line = String::from_utf8_lossy(buffer).into_owned();
    buffer.clear();
    line
}

/// Incremental `key = value` record parser.
#[derive(Debug, Default)]
pub struct RecordParser {
    line_no: usize,
    start_line: usize,
    properties: Properties,
    error: Option<String>,
}

impl RecordParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Returns a finished record when `line` closes one.
    pub fn push_line(&mut self, line: &str) -> Option<Result<RecordChange, DirectoryError>> {
        self.line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == RECORD_TERMINATOR {
            return self.finish();
        }
        if trimmed.starts_with('#') {
            return None;
        }
        if self.properties.is_empty() && self.error.is_none() {
            self.start_line = self.line_no;
        }
        match trimmed.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                self.properties.push_repeatable(key.trim(), value.trim());
            }
            _ => {
                if self.error.is_none() {
                    self.error = Some(format!("expected `key = value`, got {:?}", trimmed));
                }
            }
        }
        None
    }

    /// Close the record in progress, if any.
    pub fn finish(&mut self) -> Option<Result<RecordChange, DirectoryError>> {
        if self.properties.is_empty() && self.error.is_none() {
            return None;
        }
        let properties = std::mem::take(&mut self.properties);
        let line = self.start_line;
        if let Some(reason) = self.error.take() {
            return Some(Err(DirectoryError::ParseError { line, reason }));
        }
        Some(build_change(properties).map_err(|reason| DirectoryError::ParseError { line, reason }))
    }
}

fn build_change(properties: Properties) -> Result<RecordChange, String> {
    if properties.contains_key(keys::REMOVE) {
        return derive_id(&properties)
            .map(RecordChange::Remove)
            .ok_or_else(|| "removal marker without identifier".to_string());
    }
    CollectionRecord::from_properties(properties)
        .map(RecordChange::Upsert)
        .ok_or_else(|| "record has no ID, creator_did or publisher_did".to_string())
}

/// Accumulates one fetch attempt.
pub struct BatchCollector<'a> {
    parser: RecordParser,
    batch: FetchBatch,
    interrupt: &'a Interrupt,
}

impl<'a> BatchCollector<'a> {
    pub fn new(endpoint: Endpoint, mode: FetchMode, interrupt: &'a Interrupt) -> Self {
        Self {
            parser: RecordParser::new(),
            batch: FetchBatch::empty(endpoint, mode),
            interrupt,
        }
    }

    /// Feed one line. Returns false once the session was interrupted; the
    /// caller stops reading and calls [`BatchCollector::finish`].
    pub fn push_line(&mut self, line: &str) -> bool {
        if self.batch.interrupted {
            return false;
        }
        match self.parser.push_line(line) {
            Some(item) => self.accept(item),
            None => true,
        }
    }

    fn accept(&mut self, item: Result<RecordChange, DirectoryError>) -> bool {
        if self.interrupt.is_triggered() {
            self.batch.interrupted = true;
            trace!(
                endpoint = %self.batch.endpoint,
                record_count = self.batch.changes.len(),
                "Registry stream interrupted"
            );
            return false;
        }
        match item {
            Ok(change) => self.batch.changes.push(change),
            Err(err) => {
                self.batch.skipped += 1;
                debug!(endpoint = %self.batch.endpoint, error = %err, "Skipping registry record");
            }
        }
        true
    }

    /// Flush a record left open at a clean end of stream and return the batch.
    pub fn finish(mut self) -> FetchBatch {
        if !self.batch.interrupted {
            if let Some(item) = self.parser.finish() {
                self.accept(item);
            }
        }
        self.batch
    }
}

/// Parse a complete in-memory response.
pub fn parse_records(
    body: &str,
    endpoint: Endpoint,
    mode: FetchMode,
    interrupt: &Interrupt,
) -> FetchBatch {
    let mut collector = BatchCollector::new(endpoint, mode, interrupt);
    for line in body.lines() {
        if !collector.push_line(line) {
            break;
        }
    }
    collector.finish()
}
