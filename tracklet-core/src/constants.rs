//! Detector geometry and fixed-point scale constants.
//!
//! These values are the versioned hardware configuration of the track
//! finder. The fixed-point tables and bit shifts are tuned against them;
//! change them only together with the firmware.

/// Number of barrel layers.
pub const N_LAYERS: usize = 6;

/// Number of disks per endcap.
pub const N_DISKS: usize = 5;

/// Maximum number of stubs entering one fit (seed stubs included).
pub const MAX_FIT_HITS: usize = 6;

/// Number of phi sectors.
pub const N_SECTORS: u32 = 28;

/// Azimuthal width of one sector.
pub const DPHI_SECTOR: f64 = 0.224_399_475_256_413_8;

/// Mean radius of each barrel layer (cm).
pub const RMEAN: [f64; N_LAYERS] = [24.9316, 37.1777, 52.2656, 68.7598, 86.0156, 108.3105];

/// Mean |z| of each disk (cm).
pub const ZMEAN: [f64; N_DISKS] = [131.1914, 154.9805, 185.3320, 221.6016, 265.0195];

/// Half length of the barrel (cm).
pub const ZLENGTH: f64 = 120.0;

/// Outer radius of the disks (cm).
pub const RMAXDISK: f64 = 120.0;

/// Radius separating PS (inner) from 2S (outer) barrel layers (cm).
pub const BARREL_PS_RADIUS: f64 = 60.0;

/// Largest |rinv| covered by the derivative table (1/cm).
pub const RINV_MAX: f64 = 0.0057;

/// `sinh(2.4)`, the largest |t| inside the tracker acceptance.
pub const T_MAX_ACCEPTANCE: f64 = 5.466_229_213_676_094;

/// Disk stereo-angle scale: alpha = 4.57 * ialpha / r^2.
pub const DISK_STEREO_SCALE: f64 = 4.57;

/// `sqrt(12)`, converting a pitch to a Gaussian width.
pub const SQRT_12: f64 = 3.464_101_615_137_754_4;

/// Measurement width of a phi residual (cm).
pub const SIGMA_X: f64 = 0.01 / SQRT_12;

/// Measurement width of a PS z (or disk r) residual (cm).
pub const SIGMA_Z: f64 = 0.15 / SQRT_12;

/// Measurement width of a 2S z (or disk r) residual (cm).
pub const SIGMA_Z2: f64 = 5.0 / SQRT_12;

/// Largest phi residual accepted by the fit (rad).
pub const MAX_PHI_RESIDUAL: f64 = 0.2;

/// Upper bound on candidate IDs used by the stream merge.
pub const TCID_BOUND: u32 = 1 << 16;

// Stub and projection word widths.

pub const NBITS_PHI_STUB_L123: u32 = 14;
pub const NBITS_PHI_STUB_L456: u32 = 17;
pub const NBITS_Z_L123: u32 = 12;
pub const NBITS_Z_L456: u32 = 8;
pub const NBITS_R_DISK: u32 = 12;
pub const NBITS_ZPROJ_L123: u32 = 12;
pub const NBITS_ZPROJ_L456: u32 = 8;

// Track parameter word widths.

pub const NBITS_RINV: u32 = 14;
pub const NBITS_PHI0: u32 = 18;
pub const NBITS_T: u32 = 14;
pub const NBITS_Z0: u32 = 10;

/// Width of the disk stereo-angle index carried by a stub.
pub const NBITS_ALPHA: u32 = 4;

// LSB sizes.

/// Phi LSB of inner-layer stubs (rad).
pub const KPHI: f64 = DPHI_SECTOR / (1u32 << NBITS_PHI_STUB_L123) as f64;

/// Phi LSB of outer-layer stubs, used for all barrel phi residuals (rad).
pub const KPHI1: f64 = DPHI_SECTOR / (1u32 << NBITS_PHI_STUB_L456) as f64;

/// z LSB (cm).
pub const KZ: f64 = 2.0 * ZLENGTH / (1u32 << NBITS_Z_L123) as f64;

/// Disk r LSB (cm).
pub const KR: f64 = RMAXDISK / (1u32 << NBITS_R_DISK) as f64;

/// rinv LSB (1/cm).
pub const KRINVPARS: f64 = KPHI1 / KR / 64.0;

/// phi0 LSB (rad).
pub const KPHI0PARS: f64 = 2.0 * KPHI1;

/// t LSB.
pub const KTPARS: f64 = 1.0 / 1024.0;

/// z0 LSB (cm).
pub const KZPARS: f64 = KZ;

/// Phi LSB of disk projections and residuals (rad).
pub const KPHIPROJ123: f64 = 4.0 * KPHI1;

/// z LSB of barrel projections and inner-layer residuals (cm).
pub const KZPROJ: f64 = KZ;

/// r LSB of disk residuals (cm).
pub const KRPROJSHIFTDISK: f64 = KR;

// Fit datapath shifts.

pub const FIT_RINV_BITSHIFT: u32 = 9;
pub const FIT_PHI0_BITSHIFT: u32 = 6;
pub const FIT_T_BITSHIFT: u32 = 10;
pub const FIT_Z0_BITSHIFT: u32 = 8;
pub const CHISQ_PHI_FACT_BITS: u32 = 14;
pub const CHISQ_Z_FACT_BITS: u32 = 14;

// Derivative table address widths.

pub const LAYER_MEM_BITS: u32 = 6;
pub const DISK_MEM_BITS: u32 = 7;
pub const LAYER_DISK_MEM_BITS: u32 = 18;

/// Largest magnitude (exclusive) of a stored fixed-point coefficient.
pub const MAX_TABLE_COEFFICIENT: i32 = 1 << 15;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_derived_lsbs() {
        assert_relative_eq!(DPHI_SECTOR, 2.0 * std::f64::consts::PI / f64::from(N_SECTORS));
        assert_relative_eq!(SQRT_12, 12f64.sqrt());
        assert_relative_eq!(T_MAX_ACCEPTANCE, 2.4f64.sinh());
        assert_relative_eq!(KZ, 0.058_593_75);
        assert_relative_eq!(KR, 0.029_296_875);
        assert_relative_eq!(KPHI / KPHI1, 8.0);
    }

    #[test]
    fn test_rinv_range_fits_word() {
        let half = f64::from(1u32 << (NBITS_RINV - 1));
        assert!(half * KRINVPARS > RINV_MAX);
    }
}
