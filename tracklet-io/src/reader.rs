//! File readers: hit-pattern files and event files.

use crate::event::EventRecord;
use crate::{Error, Result};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use tracing::info;
use tracklet_algorithms::{DerivativeTable, FitConfig};
use tracklet_core::TableError;

/// Registers every pattern of a pattern file with `table`.
///
/// Reading stops silently at the first malformed line; the number of
/// registered patterns is returned.
///
/// # Errors
/// Returns an error if the file cannot be read or a pattern cannot be
/// registered.
pub fn read_pattern_file<P: AsRef<Path>>(table: &mut DerivativeTable, path: P) -> Result<usize> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let n = table.read_patterns(&text)?;
    info!(path = %path.display(), patterns = n, "read pattern file");
    Ok(n)
}

/// Builds and fills a derivative table from a pattern file.
///
/// # Errors
/// Returns an error if the file cannot be read, holds no pattern, or a
/// pattern cannot be registered or filled.
pub fn load_derivative_table<P: AsRef<Path>>(path: P, config: &FitConfig) -> Result<DerivativeTable> {
    let mut table = DerivativeTable::new(config);
    read_pattern_file(&mut table, path)?;
    if table.entries() == 0 {
        return Err(TableError::Empty.into());
    }
    table.fill_table()?;
    Ok(table)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EventFile {
    Many(Vec<EventRecord>),
    One(EventRecord),
}

/// Reads an event file: a single event object or an array of events.
///
/// # Errors
/// Returns an error if the file cannot be opened or is not valid event
/// JSON.
pub fn read_events<P: AsRef<Path>>(path: P) -> Result<Vec<EventRecord>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let events = match serde_json::from_reader(BufReader::new(file))? {
        EventFile::Many(events) => events,
        EventFile::One(event) => vec![event],
    };
    if events.is_empty() {
        return Err(Error::InvalidFormat(format!(
            "{}: no events",
            path.display()
        )));
    }
    Ok(events)
}
