//! Hardware derivative-table export.
//!
//! Writes the three addressing memories and, per seeding and coefficient,
//! one file of fixed-point coefficients laid out for the firmware fit.
//! Every file holds one binary word string per line.
//!
//! In a coefficient file each table row becomes one line of four words,
//! one per fit input of the seeding. Inputs the row has no hit for, and
//! all inputs of rows the seeding cannot produce, hold a placeholder that
//! saturates to the largest word.
//!
//! `LayerDiskMem` words are `LAYER_DISK_MEM_BITS` (18) wide, enough for
//! any row address of the table. Older firmware images read 10-bit
//! words there, which truncates addresses of row 1024 and up; unassigned
//! combinations are still written as the 10-bit all-ones code, zero
//! extended.

use crate::Result;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;
use tracklet_algorithms::{DerivativeTable, TrackDer};
use tracklet_core::constants::{DISK_MEM_BITS, LAYER_DISK_MEM_BITS, LAYER_MEM_BITS};
use tracklet_core::FixedWord;

const PREFIX: &str = "FitDerTableNew_";

/// Unassigned combined codes are written as this value, the 10-bit
/// all-ones code of the older memory layout.
const NO_ADDRESS: i32 = (1 << 10) - 1;

/// Fit inputs per seeding.
const N_INPUTS: usize = 4;

/// Written for an input without a coefficient.
const PLACEHOLDER: i64 = 9_999_999;

const PHI_BITS: u32 = 14;
const ZORDR_BITS: u32 = 16;

/// Seedings with a fit unit in the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seeding {
    L1L2,
    L3L4,
    L5L6,
    D1D2,
    D3D4,
    D1L1,
    D1L2,
}

impl Seeding {
    /// All seedings in file order.
    pub const ALL: [Seeding; 7] = [
        Seeding::L1L2,
        Seeding::L3L4,
        Seeding::L5L6,
        Seeding::D1D2,
        Seeding::D3D4,
        Seeding::D1L1,
        Seeding::D1L2,
    ];

    /// Hit positions of the two seeding stubs.
    ///
    /// Positions 1..=6 are layers L1..L6 and 7..=11 disks D1..D5.
    pub fn seed_positions(self) -> (u32, u32) {
        match self {
            Seeding::L1L2 => (1, 2),
            Seeding::L3L4 => (3, 4),
            Seeding::L5L6 => (5, 6),
            Seeding::D1D2 => (7, 8),
            Seeding::D3D4 => (9, 10),
            Seeding::D1L1 => (7, 1),
            Seeding::D1L2 => (7, 2),
        }
    }

    /// Fit input fed by the hit at `position`, if any.
    pub fn input(self, position: u32) -> Option<usize> {
        match (self, position) {
            (Seeding::L1L2, 3 | 10)
            | (Seeding::L3L4 | Seeding::L5L6 | Seeding::D1D2 | Seeding::D3D4, 1) => Some(0),
            (Seeding::L1L2, 4 | 9)
            | (Seeding::L3L4 | Seeding::L5L6, 2)
            | (Seeding::D1D2, 9)
            | (Seeding::D3D4, 7) => Some(1),
            (Seeding::L1L2, 5 | 8)
            | (Seeding::L3L4, 5 | 8)
            | (Seeding::L5L6, 3)
            | (Seeding::D1D2, 10)
            | (Seeding::D3D4, 8) => Some(2),
            (Seeding::L1L2 | Seeding::L3L4, 6 | 7)
            | (Seeding::L5L6, 4)
            | (Seeding::D1D2 | Seeding::D3D4, 2 | 11) => Some(3),
            // Both overlap seedings read disks D2..D5.
            (Seeding::D1L1 | Seeding::D1L2, 8..=11) => Some((position - 8) as usize),
            _ => None,
        }
    }
}

impl fmt::Display for Seeding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Coefficient files: name, parameter row and whether the column is the
/// z (barrel) or r (disk) residual.
const COEFFICIENTS: [(&str, usize, bool); 8] = [
    ("Rinvdphi", 0, false),
    ("Rinvdzordr", 0, true),
    ("Phi0dphi", 1, false),
    ("Phi0dzordr", 1, true),
    ("Tdphi", 2, false),
    ("Tdzordr", 2, true),
    ("Z0dphi", 3, false),
    ("Z0dzordr", 3, true),
];

/// Files written by [`export_tables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportSummary {
    /// Number of files written.
    pub files: usize,
    /// Lines per coefficient file.
    pub rows: usize,
}

/// 11-bit hit word: layers L1..L6 then one bit per disk D1..D5, position
/// `p` in bit `11 - p`.
fn hit_bits(row: &TrackDer) -> u32 {
    let disk_mask = row.disk_mask();
    let disk_hits = (0..5).fold(0, |acc, d| {
        let hit = u32::from(disk_mask & (3 << (2 * (4 - d))) != 0);
        (acc << 1) | hit
    });
    (row.layer_mask() << 5) | disk_hits
}

/// Coefficients of `row` per coefficient file and fit input of `seeding`.
fn coefficient_slots(row: &TrackDer, seeding: Seeding) -> [[i64; N_INPUTS]; 8] {
    let mut slots = [[PLACEHOLDER; N_INPUTS]; 8];
    let hits = hit_bits(row);
    let has_hit = |position: u32| hits & (1 << (11 - position)) != 0;

    let (seed1, seed2) = seeding.seed_positions();
    if !(has_hit(seed1) && has_hit(seed2)) {
        return slots;
    }

    let iminv_dt = row.iminv_dt();
    let mut hit = 0;
    for position in 1..12 {
        if position == seed1 || position == seed2 {
            hit += 1;
            continue;
        }
        if !has_hit(position) {
            continue;
        }
        if let Some(input) = seeding.input(position) {
            for (slot, &(_, param, zordr)) in slots.iter_mut().zip(&COEFFICIENTS) {
                slot[input] = i64::from(iminv_dt[param][2 * hit + usize::from(zordr)]);
            }
        }
        hit += 1;
    }
    slots
}

fn coefficient_word(value: i64, zordr: bool) -> Result<FixedWord> {
    let nbits = if zordr { ZORDR_BITS } else { PHI_BITS };
    let limit = 1i64 << (nbits - 1);
    let value = if value > limit { limit - 1 } else { value };
    Ok(FixedWord::saturating(value, nbits, true)?)
}

fn write_memory(dir: &Path, name: &str, codes: &[i32], nbits: u32, unassigned: i32) -> Result<()> {
    let path = dir.join(format!("{PREFIX}{name}.txt"));
    let mut out = BufWriter::new(File::create(path)?);
    for &code in codes {
        let code = if code < 0 { unassigned } else { code };
        writeln!(out, "{}", FixedWord::unsigned(code, nbits)?)?;
    }
    out.flush()?;
    Ok(())
}

/// Writes the hardware table files of `table` into `dir`.
///
/// The directory is created if needed.
///
/// # Errors
/// Returns an error if a file cannot be written or an address does not
/// fit its memory word.
pub fn export_tables<P: AsRef<Path>>(table: &DerivativeTable, dir: P) -> Result<ExportSummary> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    write_memory(
        dir,
        "LayerMem",
        table.layer_mem(),
        LAYER_MEM_BITS,
        (1 << LAYER_MEM_BITS) - 1,
    )?;
    write_memory(
        dir,
        "DiskMem",
        table.disk_mem(),
        DISK_MEM_BITS,
        (1 << DISK_MEM_BITS) - 1,
    )?;
    write_memory(
        dir,
        "LayerDiskMem",
        table.layer_disk_mem(),
        LAYER_DISK_MEM_BITS,
        NO_ADDRESS,
    )?;

    let mut outputs = Vec::with_capacity(COEFFICIENTS.len() * Seeding::ALL.len());
    for (name, _, _) in COEFFICIENTS {
        for seeding in Seeding::ALL {
            let path = dir.join(format!("{PREFIX}{name}_{seeding}.txt"));
            outputs.push(BufWriter::new(File::create(path)?));
        }
    }

    for row in table.rows() {
        for (s, &seeding) in Seeding::ALL.iter().enumerate() {
            let slots = coefficient_slots(row, seeding);
            for (c, (values, &(_, _, zordr))) in slots.iter().zip(&COEFFICIENTS).enumerate() {
                let mut line = String::with_capacity(N_INPUTS * ZORDR_BITS as usize);
                for &value in values {
                    line.push_str(&coefficient_word(value, zordr)?.to_bit_string());
                }
                writeln!(outputs[c * Seeding::ALL.len() + s], "{line}")?;
            }
        }
    }
    for out in &mut outputs {
        out.flush()?;
    }

    let summary = ExportSummary {
        files: 3 + outputs.len(),
        rows: table.rows().len(),
    };
    info!(
        dir = %dir.display(),
        files = summary.files,
        rows = summary.rows,
        "exported derivative table"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracklet_algorithms::FitConfig;

    fn table(patterns: &str) -> DerivativeTable {
        DerivativeTable::from_patterns(&FitConfig::default(), patterns).unwrap()
    }

    #[test]
    fn test_hit_bits() {
        let t = table("110000 1001000000 8");
        assert_eq!(hit_bits(&t.rows()[0]), 0b110000_11000);
    }

    #[test]
    fn test_barrel_row_slots() {
        let t = table("111100 0000000000 1");
        let row = &t.rows()[0];
        let iminv_dt = row.iminv_dt();

        let l1l2 = coefficient_slots(row, Seeding::L1L2);
        // L3 and L4 are the third and fourth hits of the row.
        assert_eq!(l1l2[0][0], i64::from(iminv_dt[0][4]));
        assert_eq!(l1l2[1][1], i64::from(iminv_dt[0][7]));
        assert_eq!(l1l2[6][1], i64::from(iminv_dt[3][6]));
        assert_eq!(l1l2[0][2], PLACEHOLDER);
        assert_eq!(l1l2[0][3], PLACEHOLDER);

        let l3l4 = coefficient_slots(row, Seeding::L3L4);
        assert_eq!(l3l4[2][0], i64::from(iminv_dt[1][0]));
        assert_eq!(l3l4[3][1], i64::from(iminv_dt[1][3]));

        let l5l6 = coefficient_slots(row, Seeding::L5L6);
        assert!(l5l6.iter().flatten().all(|&v| v == PLACEHOLDER));
    }

    #[test]
    fn test_overlap_seedings_share_inputs() {
        for position in 1..12 {
            assert_eq!(
                Seeding::D1L1.input(position),
                Seeding::D1L2.input(position)
            );
        }
        assert_eq!(Seeding::D1L1.input(8), Some(0));
        assert_eq!(Seeding::D1L1.input(11), Some(3));
        assert_eq!(Seeding::D1L1.input(2), None);
    }

    #[test]
    fn test_every_input_has_a_position() {
        for seeding in Seeding::ALL {
            let (seed1, seed2) = seeding.seed_positions();
            assert_eq!(seeding.input(seed1), None, "{seeding}");
            assert_eq!(seeding.input(seed2), None, "{seeding}");
            for input in 0..N_INPUTS {
                assert!(
                    (1..12).any(|p| seeding.input(p) == Some(input)),
                    "{seeding} input {input}"
                );
            }
        }
    }

    #[test]
    fn test_coefficient_word_clamps_placeholder() {
        assert_eq!(
            coefficient_word(PLACEHOLDER, false).unwrap().value(),
            (1 << 13) - 1
        );
        assert_eq!(
            coefficient_word(PLACEHOLDER, true).unwrap().value(),
            (1 << 15) - 1
        );
        assert_eq!(coefficient_word(-5, false).unwrap().to_bit_string(), "11111111111011");
    }
}
