//! Append-only JSONL log of input events.
//!
//! The log is the replay source of truth. Readers consume whole lines only:
//! a trailing line without its newline is left for the next poll, and lines
//! that fail to parse are counted and skipped so one bad record never stalls
//! the stream.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;

use crate::engine::events::Event;
use crate::logging::{self, v_num, v_str, Domain};

#[derive(Debug)]
pub struct EventLog {
    file: File,
}

/// An event together with the byte offset just past its line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    pub event: Event,
    pub end_offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBatch {
    pub events: Vec<LoggedEvent>,
    /// Unparseable lines passed over.
    pub skipped: usize,
    /// Where the next read should start.
    pub next_offset: u64,
}

impl EventLog {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        let line = serde_json::to_string(event).map_err(io::Error::other)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()
    }
}

/// Every event in the log, from the start.
pub fn replay(path: impl AsRef<Path>) -> io::Result<LogBatch> {
    read_from(path, 0)
}

/// Complete lines from `offset` onwards. A missing file reads as empty.
pub fn read_from(path: impl AsRef<Path>, offset: u64) -> io::Result<LogBatch> {
    let path = path.as_ref();
    let mut batch = LogBatch { next_offset: offset, ..Default::default() };
    if !path.exists() {
        return Ok(batch);
    }

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 || buf.last() != Some(&b'\n') {
            break;
        }
        let line_start = batch.next_offset;
        batch.next_offset += n as u64;

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(line) {
            Ok(event) => batch.events.push(LoggedEvent { event, end_offset: batch.next_offset }),
            Err(err) => {
                batch.skipped += 1;
                logging::log_warning(
                    Domain::Storage,
                    "event_log_bad_line",
                    &[
                        ("path", v_str(&path.to_string_lossy())),
                        ("offset", v_num(line_start)),
                        ("msg", v_str(&err.to_string())),
                    ],
                );
            }
        }
    }
    Ok(batch)
}
