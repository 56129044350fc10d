//! The Change Feed: everything that happened in a scope since a cursor.

pub mod filter;
pub mod flatten;
pub mod record;
pub mod writer;

pub use filter::PathFilter;
pub use flatten::Flattener;
pub use record::{ChangeRecord, ChangeType, NodeSnapshot, UnknownChangeType};
pub use writer::FeedWriter;

use std::io::Write;
use rusqlite::Connection;
use serde::Serialize;
use crate::error::Result;
use crate::scope::ScopeId;
use crate::storage::ChangeLog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedOptions {
    pub filter: Option<PathFilter>,
    pub flatten: bool,
    pub stream: bool,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self { filter: None, flatten: true, stream: false }
    }
}

/// Request parameters of a feed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedParams {
    pub since: i64,
    pub options: FeedOptions,
}

impl FeedParams {
    /// Parse `seq_id`, `filter`, `flatten` and `stream` from decoded query
    /// pairs. `None` when `seq_id` is missing.
    pub fn from_query<'a, I>(pairs: I) -> Option<Self>
    where I: IntoIterator<Item = (&'a str, &'a str)>
    {
        let mut since = None;
        let mut options = FeedOptions::default();
        for (key, value) in pairs {
            match key {
                "seq_id" => since = Some(parse_cursor(value)),
                "filter" => options.filter = PathFilter::new(value),
                "flatten" => options.flatten = value != "false",
                "stream" => options.stream = true,
                _ => {}
            }
        }
        since.map(|since| Self { since, options })
    }
}

/// Cursor sanitizing: anything but ASCII alphanumerics is dropped, then the
/// leading digits are read. Garbage reads as 0.
pub fn parse_cursor(raw: &str) -> i64 {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct FeedQuery {
    pub scope: ScopeId,
    pub since: i64,
    pub options: FeedOptions,
    /// Logical path of the repository's recycle bin, if it has one.
    pub recycle_path: Option<String>,
}

impl FeedQuery {
    pub fn new(scope: ScopeId, params: FeedParams) -> Self {
        Self { scope, since: params.since, options: params.options, recycle_path: None }
    }

    pub fn with_recycle_path(mut self, recycle_path: Option<String>) -> Self {
        self.recycle_path = recycle_path;
        self
    }
}

/// A fully collected feed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangesPage {
    pub changes: Vec<ChangeRecord>,
    pub last_seq: i64,
}

/// Per-row processing of a feed query, independent of where rows come from.
pub struct FeedPipeline<'q> {
    options: &'q FeedOptions,
    recycle_path: Option<&'q str>,
    flattener: Flattener,
    last_seq: Option<i64>,
}

impl<'q> FeedPipeline<'q> {
    pub fn new(options: &'q FeedOptions, recycle_path: Option<&'q str>) -> Self {
        Self { options, recycle_path, flattener: Flattener::new(), last_seq: None }
    }

    pub fn push<F>(&mut self, record: ChangeRecord, emit: &mut F) -> Result<()>
    where F: FnMut(ChangeRecord) -> Result<()>
    {
        // Every row read moves the checkpoint, emitted or not.
        self.last_seq = Some(self.last_seq.map_or(record.seq, |s| s.max(record.seq)));

        let record = match self.recycle_path {
            Some(bin) => record.reclassify_recycled(bin),
            None => record,
        };

        if self.options.flatten {
            if let Some(done) = self.flattener.push(record) {
                self.emit_filtered(done, emit)?;
            }
            Ok(())
        } else {
            self.emit_filtered(record, emit)
        }
    }

    /// Flush the last flattened group; returns the highest seq read.
    pub fn finish<F>(mut self, emit: &mut F) -> Result<Option<i64>>
    where F: FnMut(ChangeRecord) -> Result<()>
    {
        if let Some(done) = self.flattener.finish() {
            self.emit_filtered(done, emit)?;
        }
        Ok(self.last_seq)
    }

    fn emit_filtered<F>(&self, record: ChangeRecord, emit: &mut F) -> Result<()>
    where F: FnMut(ChangeRecord) -> Result<()>
    {
        let record = match &self.options.filter {
            Some(filter) => match filter.apply(record) {
                Some(r) => r,
                None => return Ok(()),
            },
            None => record,
        };
        emit(record)
    }
}

pub struct ChangeFeed<'a> {
    conn: &'a Connection,
}

impl<'a> ChangeFeed<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Run `query`, handing every outgoing record to `emit`. Returns the
    /// checkpoint the client should resume from.
    pub fn query_changes<F>(&self, query: &FeedQuery, mut emit: F) -> Result<i64>
    where F: FnMut(ChangeRecord) -> Result<()>
    {
        let log = ChangeLog::new(self.conn);
        let prefix = query.options.filter.as_ref().map(PathFilter::prefix);
        let mut pipeline = FeedPipeline::new(&query.options, query.recycle_path.as_deref());
        let mut emitted = 0usize;
        let mut counted = |record: ChangeRecord| {
            emitted += 1;
            emit(record)
        };

        log.scan_since(&query.scope, query.since, prefix.as_deref(), |record| pipeline.push(record, &mut counted))?;
        let observed = pipeline.finish(&mut counted)?;

        let last_seq = match observed {
            Some(seq) => seq,
            None => log.max_seq()?.filter(|s| *s > 0).unwrap_or(1),
        };
        tracing::debug!("[Feed] scope={} since={} emitted={} last_seq={}", query.scope, query.since, emitted, last_seq);
        Ok(last_seq)
    }

    pub fn collect(&self, query: &FeedQuery) -> Result<ChangesPage> {
        let mut changes = Vec::new();
        let last_seq = self.query_changes(query, |record| {
            changes.push(record);
            Ok(())
        })?;
        Ok(ChangesPage { changes, last_seq })
    }

    /// Write the response in the wire format selected by `options.stream`.
    pub fn write_to<W: Write>(&self, query: &FeedQuery, out: W) -> Result<i64> {
        let mut writer = FeedWriter::new(out, query.options.stream);
        let last_seq = self.query_changes(query, |record| writer.write_record(&record))?;
        writer.finish(last_seq)?;
        Ok(last_seq)
    }
}
