//! tracklet-io: File I/O for the tracklet track-fit emulator.
//!
//! This crate reads hit-pattern files into derivative tables, exports the
//! tables in the firmware memory format, records hit patterns seen by the
//! fit and reads and writes event files as JSON.
//!

mod error;
pub mod event;
pub mod export;
mod reader;
mod writer;

pub use error::{Error, Result};
pub use event::{write_events, write_outputs, EventOutput, EventRecord, InputRecord, UnitRecord};
pub use export::{export_tables, ExportSummary, Seeding};
pub use reader::{load_derivative_table, read_events, read_pattern_file};
pub use writer::{write_hit_patterns, HitPatternWriter};
