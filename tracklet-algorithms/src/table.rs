//! Derivative lookup table.
//!
//! Correction coefficients are precomputed for every registered hit
//! pattern. A pattern is addressed through three small memories, the same
//! way the firmware does it:
//!
//! 1. the 6-bit layer mask selects a dense layer code (`LayerMem`),
//! 2. the 10-bit disk mask selects a dense disk code (`DiskMem`),
//! 3. `layercode + (diskcode << 6)` selects the first row of the pattern
//!    (`LayerDiskMem`).
//!
//! Each pattern owns `multiplicity × 2^rinv_bits` consecutive rows, one per
//! stereo-angle combination and curvature bin.
//!
//! The table is built once (`add_entry`/`read_patterns`, then
//! `fill_table`) and is read-only afterwards; fits share it behind an
//! `Arc`.

use crate::derivatives::{calculate_derivatives, gett, DiskGeometry, IMatrix, Matrix, N_COLUMNS};
use rayon::prelude::*;
use tracing::{debug, info};
use tracklet_core::constants::{
    DISK_MEM_BITS, DISK_STEREO_SCALE, LAYER_DISK_MEM_BITS, LAYER_MEM_BITS, MAX_TABLE_COEFFICIENT,
    N_DISKS, N_LAYERS, RINV_MAX, RMEAN, ZMEAN,
};
use tracklet_core::{FitConfig, TableError};

const UNASSIGNED: i32 = -1;

/// One row of the derivative table.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDer {
    layer_mask: u32,
    disk_mask: u32,
    alpha_mask: u32,
    irinv: u32,
    t: f64,
    n_hits: usize,
    minv_dt: Matrix,
    iminv_dt: IMatrix,
}

impl TrackDer {
    fn new(layer_mask: u32, disk_mask: u32, alpha_mask: u32, irinv: u32) -> Self {
        Self {
            layer_mask,
            disk_mask,
            alpha_mask,
            irinv,
            t: 0.0,
            n_hits: 0,
            minv_dt: [[0.0; N_COLUMNS]; 4],
            iminv_dt: [[0; N_COLUMNS]; 4],
        }
    }

    /// Layer hit pattern (layer 1 in bit 5).
    #[inline]
    pub fn layer_mask(&self) -> u32 {
        self.layer_mask
    }

    /// Disk hit pattern (disk 1 in bits 9..8).
    #[inline]
    pub fn disk_mask(&self) -> u32 {
        self.disk_mask
    }

    /// Stereo-angle combination of this row.
    #[inline]
    pub fn alpha_mask(&self) -> u32 {
        self.alpha_mask
    }

    /// Curvature bin of this row.
    #[inline]
    pub fn irinv(&self) -> u32 {
        self.irinv
    }

    /// `t` the coefficients were computed for.
    #[inline]
    pub fn t(&self) -> f64 {
        self.t
    }

    /// Number of hits in the pattern.
    #[inline]
    pub fn n_hits(&self) -> usize {
        self.n_hits
    }

    /// Number of barrel hits in the pattern.
    #[inline]
    pub fn n_layers(&self) -> usize {
        self.layer_mask.count_ones() as usize
    }

    /// Floating coefficients.
    pub fn minv_dt(&self) -> &Matrix {
        &self.minv_dt
    }

    /// Fixed-point coefficients.
    pub fn iminv_dt(&self) -> &IMatrix {
        &self.iminv_dt
    }

    /// Copies the coefficients into fit matrices.
    ///
    /// Rows are stored for forward tracks. For `it < 0` the backward track
    /// is the mirror image in z: the t and z0 rows of phi and disk r
    /// columns and the rinv and phi0 rows of barrel z columns change sign.
    pub fn fill(&self, it: i32, minv_dt: &mut Matrix, iminv_dt: &mut IMatrix) {
        *minv_dt = self.minv_dt;
        *iminv_dt = self.iminv_dt;

        if it >= 0 {
            return;
        }

        let barrel_columns = 2 * self.n_layers();
        for j in 0..2 * self.n_hits {
            let rows = if j % 2 == 1 && j < barrel_columns {
                0..2
            } else {
                2..4
            };
            for p in rows {
                minv_dt[p][j] = -minv_dt[p][j];
                iminv_dt[p][j] = -iminv_dt[p][j];
            }
        }
    }
}

/// Derivative table keyed by hit pattern, stereo angle and curvature bin.
#[derive(Debug, Clone)]
pub struct DerivativeTable {
    alpha_bits: u32,
    rinv_bits: u32,
    layer_mem: Vec<i32>,
    disk_mem: Vec<i32>,
    layer_disk_mem: Vec<i32>,
    next_layer: usize,
    next_disk: usize,
    next_row: usize,
    rows: Vec<TrackDer>,
    patterns: usize,
}

impl DerivativeTable {
    /// Creates an empty table for the configured alpha and curvature
    /// resolution.
    pub fn new(config: &FitConfig) -> Self {
        Self {
            alpha_bits: config.alpha_bits,
            rinv_bits: config.rinv_bits,
            layer_mem: vec![UNASSIGNED; 1 << N_LAYERS],
            disk_mem: vec![UNASSIGNED; 1 << (2 * N_DISKS)],
            layer_disk_mem: vec![UNASSIGNED; 1 << (LAYER_MEM_BITS + DISK_MEM_BITS)],
            next_layer: 0,
            next_disk: 0,
            next_row: 0,
            rows: Vec::new(),
            patterns: 0,
        }
    }

    /// Builds and fills a table from pattern-file text.
    ///
    /// # Errors
    /// Returns an error if a pattern cannot be registered, no pattern was
    /// found, or a coefficient overflows.
    pub fn from_patterns(config: &FitConfig, text: &str) -> Result<Self, TableError> {
        let mut table = Self::new(config);
        table.read_patterns(text)?;
        if table.entries() == 0 {
            return Err(TableError::Empty);
        }
        table.fill_table()?;
        Ok(table)
    }

    /// Bits of stereo-angle resolution per 2S disk.
    #[inline]
    pub fn alpha_bits(&self) -> u32 {
        self.alpha_bits
    }

    /// Bits of curvature binning.
    #[inline]
    pub fn rinv_bits(&self) -> u32 {
        self.rinv_bits
    }

    /// Number of allocated rows.
    #[inline]
    pub fn entries(&self) -> usize {
        self.next_row
    }

    /// Number of registered patterns.
    #[inline]
    pub fn patterns(&self) -> usize {
        self.patterns
    }

    /// Layer mask to dense layer code; `-1` where unassigned.
    pub fn layer_mem(&self) -> &[i32] {
        &self.layer_mem
    }

    /// Disk mask to dense disk code; `-1` where unassigned.
    pub fn disk_mem(&self) -> &[i32] {
        &self.disk_mem
    }

    /// Combined code to first row; `-1` where unassigned.
    pub fn layer_disk_mem(&self) -> &[i32] {
        &self.layer_disk_mem
    }

    /// All rows in address order.
    pub fn rows(&self) -> &[TrackDer] {
        &self.rows
    }

    /// Registers a hit pattern with `multiplicity` stereo-angle
    /// combinations and `nrinv` curvature bins.
    ///
    /// # Errors
    /// Returns an error for out-of-range masks or multiplicity, exhausted
    /// code or address space, and duplicate registration.
    pub fn add_entry(
        &mut self,
        layer_mask: u32,
        disk_mask: u32,
        multiplicity: u32,
        nrinv: u32,
    ) -> Result<(), TableError> {
        let max = 1 << (3 * self.alpha_bits);
        if multiplicity > max {
            return Err(TableError::MultiplicityOutOfRange { multiplicity, max });
        }
        if layer_mask as usize >= self.layer_mem.len() {
            return Err(TableError::LayerMaskOutOfRange(layer_mask));
        }
        if disk_mask as usize >= self.disk_mem.len() {
            return Err(TableError::DiskMaskOutOfRange(disk_mask));
        }

        let layer_code = assign_code(
            &mut self.layer_mem[layer_mask as usize],
            &mut self.next_layer,
            "layer",
            LAYER_MEM_BITS,
        )?;
        let disk_code = assign_code(
            &mut self.disk_mem[disk_mask as usize],
            &mut self.next_disk,
            "disk",
            DISK_MEM_BITS,
        )?;

        let slot = &mut self.layer_disk_mem[layer_code + (disk_code << LAYER_MEM_BITS)];
        if *slot != UNASSIGNED {
            return Err(TableError::DuplicateEntry {
                layer_mask,
                disk_mask,
            });
        }

        let address = self.next_row;
        if address >= 1 << LAYER_DISK_MEM_BITS {
            return Err(TableError::AddressOutOfRange {
                address,
                bits: LAYER_DISK_MEM_BITS,
            });
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        {
            *slot = address as i32;
        }
        self.next_row += (multiplicity * nrinv) as usize;
        self.patterns += 1;

        self.rows.reserve((multiplicity * nrinv) as usize);
        for alpha in 0..multiplicity {
            for irinv in 0..nrinv {
                self.rows
                    .push(TrackDer::new(layer_mask, disk_mask, alpha, irinv));
            }
        }
        Ok(())
    }

    /// Registers the patterns of a pattern file.
    ///
    /// The text is a whitespace-separated stream of
    /// `<layer mask> <disk mask> <multiplicity>` triples, masks in binary.
    /// Reading stops silently at the first incomplete or malformed triple.
    ///
    /// Returns the number of registered patterns.
    ///
    /// # Errors
    /// Returns an error if a pattern cannot be registered.
    pub fn read_patterns(&mut self, text: &str) -> Result<usize, TableError> {
        let nrinv = 1 << self.rinv_bits;
        let mut tokens = text.split_whitespace();
        let mut count = 0;

        while let (Some(layers), Some(disks), Some(multiplicity)) =
            (tokens.next(), tokens.next(), tokens.next())
        {
            let Ok(multiplicity) = multiplicity.parse::<u32>() else {
                break;
            };
            let multiplicity = self.rescale_multiplicity(multiplicity);
            self.add_entry(
                parse_binary(layers),
                parse_binary(disks),
                multiplicity,
                nrinv,
            )?;
            count += 1;
        }

        debug!(patterns = count, rows = self.entries(), "read fit patterns");
        Ok(count)
    }

    /// Pattern files list multiplicities for three alpha bits per 2S disk.
    fn rescale_multiplicity(&self, multiplicity: u32) -> u32 {
        match (self.alpha_bits, multiplicity) {
            (2, 8) | (1, 64) => 4,
            (2, 64) => 16,
            (2, 512) => 64,
            (1, 8) => 2,
            (1, 512) => 8,
            _ => multiplicity,
        }
    }

    /// Computes the coefficients of every row.
    ///
    /// # Errors
    /// Returns [`TableError::CoefficientOverflow`] if a fixed-point
    /// coefficient does not fit the datapath.
    pub fn fill_table(&mut self) -> Result<(), TableError> {
        let alpha_bits = self.alpha_bits;
        let rinv_bits = self.rinv_bits;

        self.rows
            .par_iter_mut()
            .try_for_each(|row| fill_row(row, alpha_bits, rinv_bits))?;

        info!(
            patterns = self.patterns,
            rows = self.entries(),
            layer_codes = self.next_layer,
            disk_codes = self.next_disk,
            "filled derivative table"
        );
        Ok(())
    }

    /// First row of a pattern, or `None` if it was never registered.
    pub fn index(&self, layer_mask: u32, disk_mask: u32) -> Option<usize> {
        let layer_code = *self.layer_mem.get(layer_mask as usize)?;
        let disk_code = *self.disk_mem.get(disk_mask as usize)?;
        if layer_code < 0 || disk_code < 0 {
            debug!(
                "no table code for layermask={:06b} diskmask={:010b}",
                layer_mask, disk_mask
            );
            return None;
        }

        let address = self.layer_disk_mem[(layer_code + (disk_code << LAYER_MEM_BITS)) as usize];
        if address < 0 {
            debug!(
                "no table entry for layermask={:06b} diskmask={:010b}",
                layer_mask, disk_mask
            );
            return None;
        }
        usize::try_from(address).ok()
    }

    /// Row for a pattern, stereo-angle combination and curvature bin, or
    /// `None` outside the rows registered for the pattern.
    pub fn derivatives(
        &self,
        layer_mask: u32,
        disk_mask: u32,
        alpha_index: u32,
        rinv_index: u32,
    ) -> Option<&TrackDer> {
        let base = self.index(layer_mask, disk_mask)?;
        let row = base + ((alpha_index as usize) << self.rinv_bits) + rinv_index as usize;
        // Indices past the pattern's own rows land in the next pattern.
        self.rows.get(row).filter(|der| {
            der.layer_mask == layer_mask
                && der.disk_mask == disk_mask
                && der.alpha_mask == alpha_index
                && der.irinv == rinv_index
        })
    }
}

fn assign_code(
    slot: &mut i32,
    next: &mut usize,
    kind: &'static str,
    bits: u32,
) -> Result<usize, TableError> {
    if *slot == UNASSIGNED {
        if *next >= 1 << bits {
            return Err(TableError::CodeExhausted {
                kind,
                code: *next,
                bits,
            });
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        {
            *slot = *next as i32;
        }
        *next += 1;
    }
    #[allow(clippy::cast_sign_loss)]
    Ok(*slot as usize)
}

/// Parses the leading binary digits of a token; no digits parse as zero.
fn parse_binary(token: &str) -> u32 {
    token
        .bytes()
        .take_while(|b| matches!(b, b'0' | b'1'))
        .fold(0u32, |acc, b| (acc << 1) | u32::from(b - b'0'))
}

/// Center of curvature bin `irinv`.
pub fn bin_rinv(irinv: u32, rinv_bits: u32) -> f64 {
    let half = f64::from(1u32 << (rinv_bits - 1));
    (f64::from(irinv) - (half - 0.5)) * RINV_MAX / half
}

/// Stereo angle of alpha bin `ialpha` at radius `r`.
fn bin_alpha(ialpha: u32, alpha_bits: u32, r: f64) -> f64 {
    let scale = f64::from(1u32 << (alpha_bits - 1));
    DISK_STEREO_SCALE * (f64::from(ialpha) - (scale - 0.5)) / scale / (r * r)
}

fn fill_row(row: &mut TrackDer, alpha_bits: u32, rinv_bits: u32) -> Result<(), TableError> {
    let rinv = bin_rinv(row.irinv, rinv_bits);
    let t = gett(row.disk_mask, row.layer_mask);

    let radii: Vec<f64> = RMEAN
        .iter()
        .enumerate()
        .filter(|(l, _)| row.layer_mask & (1 << (N_LAYERS - 1 - l)) != 0)
        .map(|(_, &r)| r)
        .collect();

    let mut alpha_mask = row.alpha_mask;
    let mut disks = Vec::with_capacity(N_DISKS);
    for (d, &z) in ZMEAN.iter().enumerate() {
        let pair = 2 * (N_DISKS - 1 - d);
        if row.disk_mask & (3 << pair) == 0 {
            continue;
        }
        let mut alpha = 0.0;
        if row.disk_mask & (1 << pair) != 0 {
            let r = z / t;
            alpha = bin_alpha(alpha_mask & ((1 << alpha_bits) - 1), alpha_bits, r);
            alpha_mask >>= alpha_bits;
        }
        disks.push(DiskGeometry { z, alpha });
    }

    let der = calculate_derivatives(&radii, &disks, t, rinv)?;

    let n = der.n_hits();
    for p in 0..4 {
        for j in 0..2 * n {
            let value = der.iminv_dt[p][j];
            if value.abs() >= MAX_TABLE_COEFFICIENT {
                return Err(TableError::CoefficientOverflow {
                    layer_mask: row.layer_mask,
                    disk_mask: row.disk_mask,
                    value,
                });
            }
        }
    }

    row.t = t;
    row.n_hits = n;
    row.minv_dt = der.minv_dt;
    row.iminv_dt = der.iminv_dt;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> FitConfig {
        FitConfig::new().with_alpha_bits(2).with_rinv_bits(3)
    }

    #[test]
    fn test_parse_binary_like_strtol() {
        assert_eq!(parse_binary("111100"), 60);
        assert_eq!(parse_binary("0000000011"), 3);
        assert_eq!(parse_binary("101x1"), 5);
        assert_eq!(parse_binary("x"), 0);
    }

    #[test]
    fn test_multiplicity_rescale() {
        let table = DerivativeTable::new(&config());
        assert_eq!(table.rescale_multiplicity(8), 4);
        assert_eq!(table.rescale_multiplicity(64), 16);
        assert_eq!(table.rescale_multiplicity(512), 64);
        assert_eq!(table.rescale_multiplicity(1), 1);

        let table = DerivativeTable::new(&config().with_alpha_bits(1));
        assert_eq!(table.rescale_multiplicity(8), 2);
        assert_eq!(table.rescale_multiplicity(64), 4);
        assert_eq!(table.rescale_multiplicity(512), 8);

        let table = DerivativeTable::new(&config().with_alpha_bits(3));
        assert_eq!(table.rescale_multiplicity(512), 512);
    }

    #[test]
    fn test_add_entry_allocates_rows() {
        let mut table = DerivativeTable::new(&config());
        table.add_entry(0b111100, 0, 1, 8).unwrap();
        table.add_entry(0b110000, 0b0000000011, 4, 8).unwrap();

        assert_eq!(table.entries(), 8 + 32);
        assert_eq!(table.patterns(), 2);
        assert_eq!(table.index(0b111100, 0), Some(0));
        assert_eq!(table.index(0b110000, 0b0000000011), Some(8));

        let row = table.derivatives(0b110000, 0b0000000011, 2, 5).unwrap();
        assert_eq!(row.alpha_mask(), 2);
        assert_eq!(row.irinv(), 5);
        assert_eq!(row.layer_mask(), 0b110000);
    }

    #[test]
    fn test_duplicate_entry_fails() {
        let mut table = DerivativeTable::new(&config());
        table.add_entry(0b111100, 0, 1, 8).unwrap();
        assert_eq!(
            table.add_entry(0b111100, 0, 1, 8),
            Err(TableError::DuplicateEntry {
                layer_mask: 0b111100,
                disk_mask: 0
            })
        );
    }

    #[test]
    fn test_out_of_range_registration() {
        let mut table = DerivativeTable::new(&config());
        assert_eq!(
            table.add_entry(64, 0, 1, 8),
            Err(TableError::LayerMaskOutOfRange(64))
        );
        assert_eq!(
            table.add_entry(0, 1024, 1, 8),
            Err(TableError::DiskMaskOutOfRange(1024))
        );
        assert_eq!(
            table.add_entry(0, 0, 65, 8),
            Err(TableError::MultiplicityOutOfRange {
                multiplicity: 65,
                max: 64
            })
        );
    }

    #[test]
    fn test_unregistered_pattern_is_none() {
        let mut table = DerivativeTable::new(&config());
        table.add_entry(0b111100, 0, 1, 8).unwrap();
        assert!(table.index(0b111110, 0).is_none());
        assert!(table.index(0b111100, 0b10).is_none());
        assert!(table.derivatives(0b001111, 0, 0, 0).is_none());
        assert!(table.index(1 << 7, 0).is_none());
    }

    #[test]
    fn test_read_patterns_stops_at_malformed_triple() {
        let mut table = DerivativeTable::new(&config());
        let text = "111100 0000000000 1\n110000 0000001111 1\n111000 oops\n001111 0000000000 1\n";
        assert_eq!(table.read_patterns(text).unwrap(), 2);
        assert!(table.index(0b001111, 0).is_none());
    }

    #[test]
    fn test_read_patterns_keeps_last_line_without_newline() {
        let mut table = DerivativeTable::new(&config());
        let text = "110000 1010000000 1\n111100 0000000000 1";
        assert_eq!(table.read_patterns(text).unwrap(), 2);
        assert_eq!(table.index(0b111100, 0), Some(8));
    }

    #[test]
    fn test_derivatives_stay_inside_pattern() {
        let table =
            DerivativeTable::from_patterns(&config(), "110000 1001000000 1\n111100 0000000000 1")
                .unwrap();
        assert_eq!(table.index(0b111100, 0), Some(8));

        let row = table.derivatives(0b110000, 0b1001000000, 0, 7).unwrap();
        assert_eq!(row.layer_mask(), 0b110000);
        assert_eq!(row.disk_mask(), 0b1001000000);
        assert_eq!(row.irinv(), 7);

        // Alpha combination past the registered multiplicity.
        assert!(table.derivatives(0b110000, 0b1001000000, 1, 0).is_none());
        // Curvature bin past the last one.
        assert!(table.derivatives(0b110000, 0b1001000000, 0, 8).is_none());
        assert!(table.derivatives(0b111100, 0, 0, 8).is_none());
        assert!(table.derivatives(0b111100, 0, 0, 7).is_some());
    }

    #[test]
    fn test_bin_rinv_is_symmetric() {
        assert_relative_eq!(bin_rinv(0, 3), -bin_rinv(7, 3));
        assert_relative_eq!(bin_rinv(3, 3), -bin_rinv(4, 3));
        assert_relative_eq!(bin_rinv(7, 3), 3.5 * RINV_MAX / 4.0);
    }

    #[test]
    fn test_fill_table_barrel_pattern() {
        let table =
            DerivativeTable::from_patterns(&config(), "111100 0000000000 1\n001111 0000000000 1")
                .unwrap();
        let row = table.derivatives(0b111100, 0, 0, 4).unwrap();
        assert_eq!(row.n_hits(), 4);
        assert_eq!(row.t(), 0.0);
        assert!(row.minv_dt()[0][0] != 0.0);
        assert!(row.iminv_dt()[1][0] != 0);
    }

    #[test]
    fn test_fill_mirrors_backward_tracks() {
        let table =
            DerivativeTable::from_patterns(&config(), "111100 0000000000 1\n110000 1001000000 4")
                .unwrap();
        let row = table.derivatives(0b110000, 0b1001000000, 1, 2).unwrap();
        assert_eq!(row.n_hits(), 4);
        assert!(row.t() > 2.0 && row.t() < 2.4);

        let mut minv_dt = [[0.0; N_COLUMNS]; 4];
        let mut iminv_dt = [[0; N_COLUMNS]; 4];
        row.fill(-5, &mut minv_dt, &mut iminv_dt);

        let forward = row.minv_dt();
        // Barrel phi column: t and z0 rows flip.
        assert_eq!(minv_dt[0][0], forward[0][0]);
        assert_eq!(minv_dt[2][0], -forward[2][0]);
        // Barrel z column: rinv and phi0 rows flip.
        assert_eq!(minv_dt[1][1], -forward[1][1]);
        assert_eq!(minv_dt[3][1], forward[3][1]);
        // Disk r column: t and z0 rows flip.
        assert_eq!(minv_dt[0][5], forward[0][5]);
        assert_eq!(minv_dt[3][5], -forward[3][5]);
        assert_eq!(iminv_dt[3][5], -row.iminv_dt()[3][5]);

        row.fill(5, &mut minv_dt, &mut iminv_dt);
        assert_eq!(&minv_dt, forward);
    }

    #[test]
    fn test_empty_table_is_error() {
        assert_eq!(
            DerivativeTable::from_patterns(&config(), "").unwrap_err(),
            TableError::Empty
        );
    }
}
