//! Linearized helix-fit derivatives.
//!
//! For a hit pattern (barrel radii, disk positions and stereo angles) and a
//! reference track (`rinv`, `t`) this module builds the design matrix `D`
//! of the residuals with respect to (rinv, phi0, t, z0), solves the normal
//! equations and returns the correction coefficients `MinvDt` that turn
//! residuals into parameter corrections, in floating point and in the
//! fixed-point units of the fit datapath.
//!
//! Column layout: hit `i` owns columns `2i` (phi residual) and `2i + 1`
//! (z residual in the barrel, r residual in the disks). Barrel hits come
//! first, in the order given, then disk hits.

use tracklet_core::constants::{
    BARREL_PS_RADIUS, CHISQ_PHI_FACT_BITS, CHISQ_Z_FACT_BITS, FIT_PHI0_BITSHIFT,
    FIT_RINV_BITSHIFT, FIT_T_BITSHIFT, FIT_Z0_BITSHIFT, KPHI0PARS, KPHI1, KPHIPROJ123, KR,
    KRINVPARS, KRPROJSHIFTDISK, KTPARS, KZ, KZPARS, KZPROJ, MAX_FIT_HITS, NBITS_ZPROJ_L123,
    NBITS_ZPROJ_L456, RMEAN, SIGMA_X, SIGMA_Z, SIGMA_Z2, T_MAX_ACCEPTANCE, ZLENGTH, ZMEAN,
};
use tracklet_core::TableError;

/// Residual columns of a full fit (two per hit).
pub const N_COLUMNS: usize = 2 * MAX_FIT_HITS;

/// Floating coefficients, one row per parameter.
pub type Matrix = [[f64; N_COLUMNS]; 4];

/// Fixed-point coefficients, one row per parameter.
pub type IMatrix = [[i32; N_COLUMNS]; 4];

/// Datapath right shift of each fitted parameter (rinv, phi0, t, z0).
pub const PARAM_BITSHIFTS: [u32; 4] = [
    FIT_RINV_BITSHIFT,
    FIT_PHI0_BITSHIFT,
    FIT_T_BITSHIFT,
    FIT_Z0_BITSHIFT,
];

const BARREL_PARAM_LSB: [f64; 4] = [KRINVPARS, KPHI0PARS, KTPARS, KZPARS];
const DISK_PARAM_LSB: [f64; 4] = [KRINVPARS, KPHI0PARS, KTPARS, KZ];

/// Position and stereo angle of a disk hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskGeometry {
    /// Signed disk z (cm).
    pub z: f64,
    /// Stereo angle; zero for PS modules.
    pub alpha: f64,
}

impl DiskGeometry {
    fn is_ps(&self) -> bool {
        self.alpha.abs() < 1e-10
    }
}

/// Output of [`calculate_derivatives`].
#[derive(Debug, Clone, PartialEq)]
pub struct Derivatives {
    /// Number of barrel hits.
    pub n_layers: usize,
    /// Number of disk hits.
    pub n_disks: usize,
    /// Design matrix, each column divided by its measurement width.
    pub d: Matrix,
    /// Design matrix in chi-square datapath units.
    pub id: IMatrix,
    /// Parameter change per unit residual.
    pub minv_dt: Matrix,
    /// `minv_dt` in datapath units (pre-shift).
    pub iminv_dt: IMatrix,
    /// Measurement width of each column.
    pub sigma: [f64; N_COLUMNS],
    /// LSB of the residual feeding each column.
    pub kfactor: [f64; N_COLUMNS],
}

impl Derivatives {
    /// Total number of hits.
    #[inline]
    pub fn n_hits(&self) -> usize {
        self.n_layers + self.n_disks
    }

    /// Normal matrix `D·Dᵗ` over the used columns.
    pub fn normal_matrix(&self) -> [[f64; 4]; 4] {
        normal_matrix(&self.d, 2 * self.n_hits())
    }
}

fn normal_matrix(d: &Matrix, columns: usize) -> [[f64; 4]; 4] {
    let mut m = [[0.0; 4]; 4];
    for (i1, row) in m.iter_mut().enumerate() {
        for (i2, value) in row.iter_mut().enumerate() {
            for j in 0..columns {
                *value += d[i1][j] * d[i2][j];
            }
        }
    }
    m
}

/// Gauss–Jordan inversion of the leading `n × n` block of `m`.
///
/// `m` is an augmented `n × 2n` matrix; on return the inverse occupies
/// columns `n..2n`. There is no pivoting: the fixed-point scale factors are
/// tuned to exactly this elimination order.
pub fn invert(m: &mut [[f64; 8]; 4], n: usize) {
    debug_assert!(n <= 4);

    for i in 0..n {
        for j in n..2 * n {
            m[i][j] = if i == j - n { 1.0 } else { 0.0 };
        }
    }

    for i in 0..n {
        for j in 0..n {
            if i != j {
                let ratio = m[j][i] / m[i][i];
                for k in 0..2 * n {
                    m[j][k] -= ratio * m[i][k];
                }
            }
        }
    }

    for i in 0..n {
        let a = m[i][i];
        for j in 0..2 * n {
            m[i][j] /= a;
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_datapath(shift: u32, value: f64, k_residual: f64, k_param: f64) -> i32 {
    (f64::from(1u32 << shift) * value * k_residual / k_param) as i32
}

#[allow(clippy::cast_possible_truncation)]
fn to_chisq_units(value: f64, fact_bits: u32, k_param: f64, shift: u32) -> i32 {
    (value * f64::from(1u32 << fact_bits) * k_param / f64::from(1u32 << shift)) as i32
}

/// Computes the fit coefficients for a hit pattern.
///
/// `radii` are the barrel hit radii, `disks` the disk hits (with signed z),
/// `t` and `rinv` the reference track.
///
/// # Errors
/// Returns [`TableError::TooManyHits`] for more than six hits.
#[allow(clippy::too_many_lines, clippy::similar_names)]
pub fn calculate_derivatives(
    radii: &[f64],
    disks: &[DiskGeometry],
    t: f64,
    rinv: f64,
) -> Result<Derivatives, TableError> {
    let n_layers = radii.len();
    let n_disks = disks.len();
    let n = n_layers + n_disks;
    if n > MAX_FIT_HITS {
        return Err(TableError::TooManyHits(n));
    }

    let mut d: Matrix = [[0.0; N_COLUMNS]; 4];
    let mut sigma = [0.0; N_COLUMNS];
    let mut kfactor = [0.0; N_COLUMNS];
    let mut rnew = [0.0; MAX_FIT_HITS];

    let mut j = 0;
    for (i, &ri) in radii.iter().enumerate() {
        rnew[i] = ri;

        d[0][j] = -0.5 * ri * ri / (1.0 - 0.25 * ri * ri * rinv * rinv).sqrt() / SIGMA_X;
        d[1][j] = ri / SIGMA_X;
        sigma[j] = SIGMA_X;
        kfactor[j] = KPHI1;
        j += 1;

        let sigma_z = if ri < BARREL_PS_RADIUS { SIGMA_Z } else { SIGMA_Z2 };
        d[2][j] = (2.0 / rinv) * (0.5 * ri * rinv).asin() / sigma_z;
        d[3][j] = 1.0 / sigma_z;
        sigma[j] = sigma_z;
        kfactor[j] = KZ;
        j += 1;
    }

    for (i, disk) in disks.iter().enumerate() {
        let zi = disk.z;
        let z0 = 0.0;

        let rmultiplier = disk.alpha * zi / t;
        let phimultiplier = zi / t;

        let arg = 0.5 * rinv * (zi - z0) / t;
        let drdrinv = -2.0 * arg.sin() / (rinv * rinv) + (zi - z0) * arg.cos() / (rinv * t);
        let drdphi0 = 0.0;
        let drdt = -(zi - z0) * arg.cos() / (t * t);
        let drdz0 = -arg.cos() / t;

        let dphidrinv = -0.5 * (zi - z0) / t;
        let dphidphi0 = 1.0;
        let dphidt = 0.5 * rinv * (zi - z0) / (t * t);
        let dphidz0 = 0.5 * rinv / t;

        rnew[n_layers + i] = (zi - z0) / t;

        d[0][j] = (phimultiplier * dphidrinv + rmultiplier * drdrinv) / SIGMA_X;
        d[1][j] = (phimultiplier * dphidphi0 + rmultiplier * drdphi0) / SIGMA_X;
        d[2][j] = (phimultiplier * dphidt + rmultiplier * drdt) / SIGMA_X;
        d[3][j] = (phimultiplier * dphidz0 + rmultiplier * drdz0) / SIGMA_X;
        sigma[j] = SIGMA_X;
        kfactor[j] = KPHIPROJ123;
        j += 1;

        let sigma_r = if disk.is_ps() { SIGMA_Z } else { SIGMA_Z2 };
        d[0][j] = drdrinv / sigma_r;
        d[1][j] = drdphi0 / sigma_r;
        d[2][j] = drdt / sigma_r;
        d[3][j] = drdz0 / sigma_r;
        sigma[j] = sigma_r;
        kfactor[j] = KR;
        j += 1;
    }

    let mut m = [[0.0; 8]; 4];
    let normal = normal_matrix(&d, 2 * n);
    for (row, normal_row) in m.iter_mut().zip(normal.iter()) {
        row[..4].copy_from_slice(normal_row);
    }
    invert(&mut m, 4);

    let mut minv_dt: Matrix = [[0.0; N_COLUMNS]; 4];
    let mut iminv_dt: IMatrix = [[0; N_COLUMNS]; 4];
    let mut id: IMatrix = [[0; N_COLUMNS]; 4];

    for j in 0..2 * n {
        for i1 in 0..4 {
            for i2 in 0..4 {
                minv_dt[i1][j] += m[i1][i2 + 4] * d[i2][j];
            }
        }
    }

    for i in 0..n {
        let (phi, zr) = (2 * i, 2 * i + 1);

        for p in 0..4 {
            id[p][phi] = to_chisq_units(
                d[p][phi],
                CHISQ_PHI_FACT_BITS,
                BARREL_PARAM_LSB[p],
                PARAM_BITSHIFTS[p],
            );
            id[p][zr] = to_chisq_units(
                d[p][zr],
                CHISQ_Z_FACT_BITS,
                BARREL_PARAM_LSB[p],
                PARAM_BITSHIFTS[p],
            );
        }

        for row in &mut minv_dt {
            row[phi] *= rnew[i] / SIGMA_X;
        }

        if i < n_layers {
            let (sigma_z, k_z) = if rnew[i] < BARREL_PS_RADIUS {
                (SIGMA_Z, KZPROJ)
            } else {
                let fact = f64::from(1u32 << (NBITS_ZPROJ_L123 - NBITS_ZPROJ_L456));
                (SIGMA_Z2, fact * KZPROJ)
            };
            for p in 0..4 {
                minv_dt[p][zr] /= sigma_z;
                iminv_dt[p][phi] =
                    to_datapath(PARAM_BITSHIFTS[p], minv_dt[p][phi], KPHI1, BARREL_PARAM_LSB[p]);
                iminv_dt[p][zr] =
                    to_datapath(PARAM_BITSHIFTS[p], minv_dt[p][zr], k_z, BARREL_PARAM_LSB[p]);
            }
        } else {
            let sigma_r = if disks[i - n_layers].is_ps() {
                SIGMA_Z
            } else {
                SIGMA_Z2
            };
            for p in 0..4 {
                minv_dt[p][zr] /= sigma_r;
                iminv_dt[p][phi] =
                    to_datapath(PARAM_BITSHIFTS[p], minv_dt[p][phi], KPHIPROJ123, DISK_PARAM_LSB[p]);
                iminv_dt[p][zr] = to_datapath(
                    PARAM_BITSHIFTS[p],
                    minv_dt[p][zr],
                    KRPROJSHIFTDISK,
                    DISK_PARAM_LSB[p],
                );
            }
        }
    }

    Ok(Derivatives {
        n_layers,
        n_disks,
        d,
        id,
        minv_dt,
        iminv_dt,
        sigma,
        kfactor,
    })
}

/// Representative `t` of a hit pattern.
///
/// Every disk hit restricts `t` to the window in which its module type
/// (PS in the upper bit of the disk pair, 2S in the lower bit) is crossed;
/// every barrel hit caps `t` at the barrel half length over its radius.
/// Returns the middle of the surviving window, or `0.0` without disk hits.
pub fn gett(disk_mask: u32, layer_mask: u32) -> f64 {
    if disk_mask == 0 {
        return 0.0;
    }

    let mut tmax: f64 = 1000.0;
    let mut tmin: f64 = 0.0;

    for (d, &z) in ZMEAN.iter().enumerate() {
        let pair = 2 * (4 - d as u32);

        if disk_mask & (1 << (pair + 1)) != 0 {
            let dmax = (z / 22.0).min(T_MAX_ACCEPTANCE);
            let dmin = z / 65.0;
            tmax = tmax.min(dmax);
            tmin = tmin.max(dmin);
        }

        if disk_mask & (1 << pair) != 0 {
            let dmax = z / 65.0;
            let dmin = z / 105.0;
            tmax = tmax.min(dmax);
            tmin = tmin.max(dmin);
        }
    }

    for (l, &r) in RMEAN.iter().enumerate() {
        if layer_mask & (1 << (5 - l)) != 0 {
            tmax = tmax.min(ZLENGTH / r);
        }
    }

    0.5 * (tmax + tmin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gett_without_disks_is_zero() {
        for layer_mask in 0..64 {
            assert_eq!(gett(0, layer_mask), 0.0);
        }
    }

    #[test]
    fn test_gett_single_ps_disk() {
        // PS hit in disk 1 only: window [z/65, z/22].
        let z = ZMEAN[0];
        let t = gett(0b10_0000_0000, 0);
        assert_relative_eq!(t, 0.5 * (z / 22.0 + z / 65.0));
    }

    #[test]
    fn test_gett_layer_caps_window() {
        // 2S hit in disk 1 and a hit in layer 1.
        let z = ZMEAN[0];
        let t = gett(0b01_0000_0000, 0b10_0000);
        let tmax = (z / 65.0).min(ZLENGTH / RMEAN[0]);
        assert_relative_eq!(t, 0.5 * (tmax + z / 105.0));
    }

    #[test]
    fn test_invert_identity_and_known_matrix() {
        let mut m = [[0.0; 8]; 4];
        m[0][0] = 4.0;
        m[1][1] = 2.0;
        m[2][2] = 1.0;
        m[3][3] = 0.5;
        m[0][1] = 1.0;
        m[1][0] = 1.0;
        invert(&mut m, 4);

        // Inverse of [[4, 1], [1, 2]] is [[2, -1], [-1, 4]] / 7.
        assert_relative_eq!(m[0][4], 2.0 / 7.0, epsilon = 1e-12);
        assert_relative_eq!(m[0][5], -1.0 / 7.0, epsilon = 1e-12);
        assert_relative_eq!(m[1][5], 4.0 / 7.0, epsilon = 1e-12);
        assert_relative_eq!(m[2][6], 1.0, epsilon = 1e-12);
        assert_relative_eq!(m[3][7], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_too_many_hits() {
        let radii = RMEAN.to_vec();
        let disks = [DiskGeometry { z: ZMEAN[0], alpha: 0.0 }];
        assert_eq!(
            calculate_derivatives(&radii, &disks, 1.0, 0.001),
            Err(TableError::TooManyHits(7))
        );
    }

    #[test]
    fn test_normal_matrix_is_symmetric() {
        let disks = [
            DiskGeometry { z: ZMEAN[0], alpha: 0.0 },
            DiskGeometry { z: ZMEAN[1], alpha: 1.2e-4 },
        ];
        let der = calculate_derivatives(&RMEAN[..2], &disks, 1.3, -0.002).unwrap();
        let m = der.normal_matrix();
        for i in 0..4 {
            for j in 0..4 {
                assert_relative_eq!(m[i][j], m[j][i], max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn test_two_layer_circle_fit() {
        let rinv = 1e-3;
        let (r1, r2) = (RMEAN[0], RMEAN[1]);
        let der = calculate_derivatives(&[r1, r2], &[], 0.0, rinv).unwrap();

        // phi_i = phi0 - asin(r_i rinv / 2) linearized: dphi = dphi0 - r g dr / 2.
        let g = |r: f64| 1.0 / (1.0 - 0.25 * r * r * rinv * rinv).sqrt();
        let (a1, a2) = (r1 * g(r1), r2 * g(r2));
        let den = a2 - a1;
        assert_relative_eq!(der.minv_dt[0][0], 2.0 / den, max_relative = 1e-9);
        assert_relative_eq!(der.minv_dt[0][2], -2.0 / den, max_relative = 1e-9);
        assert_relative_eq!(der.minv_dt[1][0], a2 / den, max_relative = 1e-9);
        assert_relative_eq!(der.minv_dt[1][2], -a1 / den, max_relative = 1e-9);

        // z_i = z0 + t s_i with s_i the arc length to radius r_i.
        let s = |r: f64| (2.0 / rinv) * (0.5 * r * rinv).asin();
        let (s1, s2) = (s(r1), s(r2));
        assert_relative_eq!(der.minv_dt[2][1], 1.0 / (s1 - s2), max_relative = 1e-9);
        assert_relative_eq!(der.minv_dt[2][3], -1.0 / (s1 - s2), max_relative = 1e-9);
        assert_relative_eq!(der.minv_dt[3][1], -s2 / (s1 - s2), max_relative = 1e-9);
        assert_relative_eq!(der.minv_dt[3][3], s1 / (s1 - s2), max_relative = 1e-9);

        // The phi residuals do not move t or z0 and vice versa.
        assert_relative_eq!(der.minv_dt[2][0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(der.minv_dt[0][1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fixed_point_tracks_floating() {
        let der = calculate_derivatives(&RMEAN[..4], &[], 0.0, 0.002).unwrap();
        for p in 0..4 {
            let shift = f64::from(1u32 << PARAM_BITSHIFTS[p]);
            let back = f64::from(der.iminv_dt[p][0]) / shift * BARREL_PARAM_LSB[p] / KPHI1;
            assert!(
                (back - der.minv_dt[p][0]).abs() <= BARREL_PARAM_LSB[p] / KPHI1 / shift,
                "parameter {p}: {back} vs {}",
                der.minv_dt[p][0]
            );
        }
    }
}
