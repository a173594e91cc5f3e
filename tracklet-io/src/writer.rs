//! Hit-pattern writer.
//!
//! Patterns are written in the pattern-file format, one
//! `<layer mask> <disk mask> <multiplicity>` line each, so a recorded file
//! can be fed back to the table builder.

use crate::Result;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracklet_algorithms::{EventReport, HitPattern};

/// Writer for recorded hit patterns.
pub struct HitPatternWriter<W: Write = BufWriter<File>> {
    writer: W,
    seen: HashSet<HitPattern>,
    unique: bool,
    written: usize,
}

impl HitPatternWriter {
    /// Creates a new file writer.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> HitPatternWriter<W> {
    /// Wraps an arbitrary sink.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            seen: HashSet::new(),
            unique: false,
            written: 0,
        }
    }

    /// Writes each distinct pattern only once.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Writes one pattern.
    pub fn write_pattern(&mut self, pattern: &HitPattern) -> Result<()> {
        if self.unique && !self.seen.insert(*pattern) {
            return Ok(());
        }
        writeln!(self.writer, "{pattern}")?;
        self.written += 1;
        Ok(())
    }

    /// Writes the patterns recorded in an event report.
    pub fn write_report(&mut self, report: &EventReport) -> Result<()> {
        for pattern in report.hit_patterns() {
            self.write_pattern(pattern)?;
        }
        Ok(())
    }

    /// Number of lines written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes and returns the underlying sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Writes the hit patterns of all reports to a file.
///
/// Returns the number of lines written.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_hit_patterns<P: AsRef<Path>>(
    path: P,
    reports: &[EventReport],
    unique: bool,
) -> Result<usize> {
    let mut writer = HitPatternWriter::create(path)?;
    if unique {
        writer = writer.unique();
    }
    for report in reports {
        writer.write_report(report)?;
    }
    writer.flush()?;
    Ok(writer.written())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn pattern(layer_mask: u32, disk_mask: u32, multiplicity: u32) -> HitPattern {
        HitPattern {
            layer_mask,
            disk_mask,
            alpha_index: 0,
            multiplicity,
        }
    }

    #[test]
    fn test_write_pattern_format() {
        let mut writer = HitPatternWriter::new(Vec::new());
        writer.write_pattern(&pattern(0b11_1100, 0, 1)).unwrap();
        writer
            .write_pattern(&pattern(0b11_0000, 0b10_1000_0000, 8))
            .unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, "111100 0000000000 1\n110000 1010000000 8\n");
    }

    #[test]
    fn test_unique_writer_skips_repeats() {
        let mut writer = HitPatternWriter::new(Vec::new()).unique();
        for _ in 0..3 {
            writer.write_pattern(&pattern(0b11_1100, 0, 1)).unwrap();
        }
        assert_eq!(writer.written(), 1);
    }

    #[test]
    fn test_write_hit_patterns_to_file() {
        let file = NamedTempFile::new().unwrap();
        let reports = vec![EventReport::default()];
        let n = write_hit_patterns(file.path(), &reports, false).unwrap();
        assert_eq!(n, 0);
        assert!(std::fs::read_to_string(file.path()).unwrap().is_empty());
    }
}
