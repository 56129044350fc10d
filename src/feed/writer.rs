//! Wire formats of the change feed.
//!
//! Document mode writes `{"changes":[...],"last_seq":N}`. Stream mode writes
//! one JSON record per line, flushing after each, and ends with
//! `LAST_SEQ:N` on its own line.

use std::io::Write;
use crate::error::Result;
use super::record::ChangeRecord;

pub struct FeedWriter<W: Write> {
    out: W,
    stream: bool,
    started: bool,
    written: usize,
}

impl<W: Write> FeedWriter<W> {
    pub fn new(out: W, stream: bool) -> Self {
        Self { out, stream, started: false, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    fn begin(&mut self) -> Result<()> {
        if !self.started {
            if !self.stream {
                self.out.write_all(br#"{"changes":["#)?;
            }
            self.started = true;
        }
        Ok(())
    }

    pub fn write_record(&mut self, record: &ChangeRecord) -> Result<()> {
        self.begin()?;
        if self.written > 0 {
            self.out.write_all(if self.stream { b"\n" } else { b"," })?;
        }
        serde_json::to_writer(&mut self.out, record)?;
        self.written += 1;
        if self.stream {
            self.out.flush()?;
        }
        Ok(())
    }

    pub fn finish(mut self, last_seq: i64) -> Result<W> {
        self.begin()?;
        if self.stream {
            write!(self.out, "\nLAST_SEQ:{}", last_seq)?;
        } else {
            write!(self.out, r#"],"last_seq":{}}}"#, last_seq)?;
        }
        self.out.flush()?;
        Ok(self.out)
    }
}
