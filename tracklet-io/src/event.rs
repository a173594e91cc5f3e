//! Event files.
//!
//! An event is stored as its candidate arena plus the wiring of its fit
//! units:
//!
//! ```json
//! {
//!   "candidates": [ ... ],
//!   "units": [
//!     { "name": "FT_L1L2", "sector": 0,
//!       "inputs": [ { "port": "fullmatch1in1", "name": "FM_L1L2_L3PHI1", "entries": [0, 2] } ] }
//!   ]
//! }
//! ```
//!
//! Memory entries are indices into `candidates`.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracklet_algorithms::{Event, EventReport, FitTrackUnit};
use tracklet_core::{Candidate, CandidateRef, FullMatchMemory};

/// A memory connected to a fit unit input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    /// Input port, e.g. `fullmatch2in3` or `tpar1in`.
    pub port: String,
    /// Memory name.
    pub name: String,
    /// Candidate indices in memory order.
    #[serde(default)]
    pub entries: Vec<CandidateRef>,
}

/// A fit unit and its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub name: String,
    pub sector: u32,
    #[serde(default)]
    pub inputs: Vec<InputRecord>,
}

/// One event as stored on disk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventRecord {
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub units: Vec<UnitRecord>,
}

impl EventRecord {
    /// Wires the fit units and returns the event ready for processing.
    ///
    /// # Errors
    /// Returns an error if an input port name is unknown.
    pub fn into_event(self) -> Result<Event> {
        let units = self
            .units
            .into_iter()
            .map(|unit| {
                let mut fit_unit = FitTrackUnit::new(unit.name, unit.sector);
                for input in unit.inputs {
                    let memory = FullMatchMemory::with_entries(input.name, input.entries);
                    fit_unit.add_input(&input.port, memory)?;
                }
                Ok(fit_unit)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Event::new(self.candidates, units))
    }
}

/// Fitted candidates and unit reports of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOutput {
    pub candidates: Vec<Candidate>,
    pub report: EventReport,
}

impl EventOutput {
    /// Pairs a processed event with its report.
    pub fn new(event: Event, report: EventReport) -> Self {
        Self {
            candidates: event.candidates,
            report,
        }
    }
}

/// Writes events as a pretty-printed JSON array.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_events<P: AsRef<Path>>(path: P, events: &[EventRecord]) -> Result<()> {
    write_json(path, events)
}

/// Writes processed events as a pretty-printed JSON array.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_outputs<P: AsRef<Path>>(path: P, outputs: &[EventOutput]) -> Result<()> {
    write_json(path, outputs)
}

fn write_json<P: AsRef<Path>, T: Serialize + ?Sized>(path: P, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
