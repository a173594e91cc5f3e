//! Seed candidates and their fit results.

use crate::constants::{
    KPHI0PARS, KRINVPARS, KTPARS, KZPARS, N_DISKS, N_LAYERS, NBITS_PHI0, NBITS_RINV, NBITS_T,
    NBITS_Z0,
};
use crate::{FixedWord, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The four helix parameters in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HelixParams {
    /// Inverse transverse curvature radius (1/cm).
    pub rinv: f64,
    /// Azimuth at the origin (rad).
    pub phi0: f64,
    /// Tangent of the polar angle (`dz/ds`).
    pub t: f64,
    /// Longitudinal origin (cm).
    pub z0: f64,
}

impl HelixParams {
    /// Creates a parameter set.
    pub fn new(rinv: f64, phi0: f64, t: f64, z0: f64) -> Self {
        Self { rinv, phi0, t, z0 }
    }
}

/// The four helix parameters as hardware words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FixedHelix {
    pub rinv: FixedWord,
    pub phi0: FixedWord,
    pub t: FixedWord,
    pub z0: FixedWord,
}

impl FixedHelix {
    /// Builds the parameter words from raw integers.
    ///
    /// # Errors
    /// Returns an error if a value does not fit its parameter word.
    pub fn from_values(rinv: i32, phi0: i32, t: i32, z0: i32) -> Result<Self> {
        Ok(Self {
            rinv: FixedWord::signed(rinv, NBITS_RINV)?,
            phi0: FixedWord::signed(phi0, NBITS_PHI0)?,
            t: FixedWord::signed(t, NBITS_T)?,
            z0: FixedWord::signed(z0, NBITS_Z0)?,
        })
    }

    /// Digitizes physical parameters (truncating toward zero).
    ///
    /// # Errors
    /// Returns an error if a parameter is outside its word range.
    #[allow(clippy::cast_possible_truncation)]
    pub fn digitize(params: &HelixParams) -> Result<Self> {
        Self::from_values(
            (params.rinv / KRINVPARS) as i32,
            (params.phi0 / KPHI0PARS) as i32,
            (params.t / KTPARS) as i32,
            (params.z0 / KZPARS) as i32,
        )
    }

    /// Converts the words back to physical units.
    pub fn to_physical(&self) -> HelixParams {
        HelixParams {
            rinv: f64::from(self.rinv.value()) * KRINVPARS,
            phi0: f64::from(self.phi0.value()) * KPHI0PARS,
            t: f64::from(self.t.value()) * KTPARS,
            z0: f64::from(self.z0.value()) * KZPARS,
        }
    }
}

/// The two stubs a candidate was seeded from.
///
/// Disk numbers are signed: negative for the backward endcap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum SeedTopology {
    /// Seeded in barrel layers `layer` and `layer + 1`.
    Barrel { layer: u8 },
    /// Seeded in two disks.
    Disk { disk: i8, disk2: i8 },
    /// Seeded in a barrel layer and a disk.
    Overlap { layer: u8, disk: i8 },
}

impl SeedTopology {
    /// Returns true for barrel seeds.
    pub fn is_barrel(&self) -> bool {
        matches!(self, Self::Barrel { .. })
    }

    /// Returns true for disk seeds.
    pub fn is_disk(&self) -> bool {
        matches!(self, Self::Disk { .. })
    }

    /// Returns true for barrel/disk overlap seeds.
    pub fn is_overlap(&self) -> bool {
        matches!(self, Self::Overlap { .. })
    }
}

/// Residuals of a matched stub in a barrel layer.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LayerResidual {
    /// Phi residual computed from the hardware-resolution seed (rad).
    pub phi: f64,
    /// z residual computed from the hardware-resolution seed (cm).
    pub z: f64,
    /// Phi residual computed from the exact seed (rad).
    pub phi_exact: f64,
    /// z residual computed from the exact seed (cm).
    pub z_exact: f64,
    /// Phi residual in `KPHI1` units.
    pub iphi: FixedWord,
    /// z residual in `KZPROJ` units (inner layers) or coarser outer-layer units.
    pub iz: FixedWord,
}

/// Residuals of a matched stub in a disk.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiskResidual {
    /// Phi residual computed from the hardware-resolution seed (rad).
    pub phi: f64,
    /// r residual computed from the hardware-resolution seed (cm).
    pub r: f64,
    /// Phi residual computed from the exact seed (rad).
    pub phi_exact: f64,
    /// r residual computed from the exact seed (cm).
    pub r_exact: f64,
    /// Phi residual in `KPHIPROJ123` units.
    pub iphi: FixedWord,
    /// r residual in `KRPROJSHIFTDISK` units.
    pub ir: FixedWord,
    /// Stereo angle of the stub; zero for PS modules.
    pub alpha: f64,
    /// Digitized stereo angle (signed word).
    pub ialpha: FixedWord,
}

impl DiskResidual {
    /// Returns true if the stub comes from a PS module (no stereo angle).
    #[inline]
    pub fn is_ps(&self) -> bool {
        self.alpha.abs() < 1e-20
    }
}

/// Fixed-point fit output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FixedFit {
    pub rinv: i32,
    pub phi0: i32,
    pub t: i32,
    pub z0: i32,
    /// Compressed chi-square per degree of freedom (10 bits).
    pub chisq: u32,
}

impl FixedFit {
    /// Converts the fitted words to physical units.
    pub fn to_physical(&self) -> HelixParams {
        HelixParams {
            rinv: f64::from(self.rinv) * KRINVPARS,
            phi0: f64::from(self.phi0) * KPHI0PARS,
            t: f64::from(self.t) * KTPARS,
            z0: f64::from(self.z0) * KZPARS,
        }
    }
}

/// Result of a successful track fit.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitResult {
    /// Parameters fitted from the hardware-resolution seed.
    pub params: HelixParams,
    /// Parameters fitted from the exact seed.
    pub exact: HelixParams,
    /// Fixed-point fit.
    pub fixed: FixedFit,
    /// Chi-square per degree of freedom.
    pub chisq: f64,
    /// Chi-square per degree of freedom of the exact fit.
    pub chisq_exact: f64,
}

/// A seed candidate with its matched stubs.
///
/// Created by the tracklet-forming stage, mutated in place by the fit.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Candidate {
    /// Candidate identifier; defines the merge order.
    pub tcid: u32,
    /// Sector the candidate was formed in.
    pub home_sector: u32,
    /// Seeding stubs.
    pub seed: SeedTopology,
    /// Seed parameters at hardware resolution.
    pub approx: HelixParams,
    /// Seed parameters at full precision.
    pub exact: HelixParams,
    /// Seed parameters as hardware words.
    pub fixed: FixedHelix,
    #[cfg_attr(feature = "serde", serde(default))]
    layers: [Option<LayerResidual>; N_LAYERS],
    #[cfg_attr(feature = "serde", serde(default))]
    disks: [Option<DiskResidual>; N_DISKS],
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    fit: Option<FitResult>,
}

impl Candidate {
    /// Creates a candidate without matches.
    pub fn new(
        tcid: u32,
        home_sector: u32,
        seed: SeedTopology,
        approx: HelixParams,
        exact: HelixParams,
        fixed: FixedHelix,
    ) -> Self {
        Self {
            tcid,
            home_sector,
            seed,
            approx,
            exact,
            fixed,
            layers: [None; N_LAYERS],
            disks: [None; N_DISKS],
            fit: None,
        }
    }

    /// Records a match in barrel layer `layer` (1..=6).
    ///
    /// # Panics
    /// Panics if `layer` is not a barrel layer.
    pub fn set_layer_match(&mut self, layer: u8, residual: LayerResidual) {
        assert!((1..=N_LAYERS).contains(&usize::from(layer)), "no barrel layer {layer}");
        self.layers[usize::from(layer) - 1] = Some(residual);
    }

    /// Records a match in disk `disk` (±1..=5).
    ///
    /// # Panics
    /// Panics if `|disk|` is not a disk number.
    pub fn set_disk_match(&mut self, disk: i8, residual: DiskResidual) {
        let index = usize::from(disk.unsigned_abs());
        assert!((1..=N_DISKS).contains(&index), "no disk {disk}");
        self.disks[index - 1] = Some(residual);
    }

    /// Builder form of [`Candidate::set_layer_match`].
    #[must_use]
    pub fn with_layer_match(mut self, layer: u8, residual: LayerResidual) -> Self {
        self.set_layer_match(layer, residual);
        self
    }

    /// Builder form of [`Candidate::set_disk_match`].
    #[must_use]
    pub fn with_disk_match(mut self, disk: i8, residual: DiskResidual) -> Self {
        self.set_disk_match(disk, residual);
        self
    }

    /// Match in barrel layer `layer` (1..=6), if any.
    pub fn layer_match(&self, layer: u8) -> Option<&LayerResidual> {
        usize::from(layer)
            .checked_sub(1)
            .and_then(|index| self.layers.get(index))
            .and_then(Option::as_ref)
    }

    /// Match in disk `disk` (±1..=5), if any.
    pub fn disk_match(&self, disk: i8) -> Option<&DiskResidual> {
        usize::from(disk.unsigned_abs())
            .checked_sub(1)
            .and_then(|index| self.disks.get(index))
            .and_then(Option::as_ref)
    }

    /// Number of matched layers and disks (seed stubs excluded).
    pub fn n_matches(&self) -> usize {
        self.layers.iter().flatten().count() + self.disks.iter().flatten().count()
    }

    /// Fit result, if the candidate was fitted.
    pub fn fit(&self) -> Option<&FitResult> {
        self.fit.as_ref()
    }

    /// Returns true once a fit has been written.
    pub fn is_fit(&self) -> bool {
        self.fit.is_some()
    }

    /// Stores a fit result.
    pub fn set_fit(&mut self, fit: FitResult) {
        self.fit = Some(fit);
    }

    /// Drops any stored fit result.
    pub fn clear_fit(&mut self) {
        self.fit = None;
    }
}
