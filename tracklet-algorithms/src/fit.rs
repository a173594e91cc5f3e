//! Linearized track fit.
//!
//! A seed candidate with its matched stubs is fitted by a single linear
//! correction step: the residuals of the matched stubs are multiplied with
//! the correction coefficients of the candidate's hit pattern, taken from
//! the derivative table (or recomputed, see [`DerivativeMode`]). The fit is
//! carried out three times: from the hardware-resolution seed, from the
//! exact seed, and in the integer arithmetic of the firmware.

use crate::derivatives::{
    calculate_derivatives, gett, Derivatives, DiskGeometry, IMatrix, Matrix, N_COLUMNS,
    PARAM_BITSHIFTS,
};
use crate::table::DerivativeTable;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use tracklet_core::constants::{
    CHISQ_PHI_FACT_BITS, CHISQ_Z_FACT_BITS, KRINVPARS, MAX_FIT_HITS, MAX_PHI_RESIDUAL, N_DISKS,
    N_LAYERS, RINV_MAX, RMEAN, ZMEAN,
};
use tracklet_core::{
    Candidate, DerivativeMode, DiskResidual, Error, FitConfig, FitResult, FixedFit, HelixParams,
    LayerResidual, Result, SeedTopology,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Outcome of a fit attempt that did not violate an invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FitOutcome {
    /// A fit result was written to the candidate.
    Fitted,
    /// The hit pattern has no table entry; the candidate is left unfitted.
    MissingDerivatives,
}

/// Table signature of a candidate's hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitPattern {
    /// Layer hits, layer 1 in bit 5.
    pub layer_mask: u32,
    /// Disk hits, two bits per disk, disk 1 in bits 9..8 (PS upper, 2S lower).
    pub disk_mask: u32,
    /// Stereo-angle combination of the 2S disk hits.
    pub alpha_index: u32,
    /// Number of stereo-angle combinations of the pattern.
    pub multiplicity: u32,
}

impl fmt::Display for HitPattern {
    /// Formats the pattern as a pattern-file line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:06b} {:010b} {}",
            self.layer_mask, self.disk_mask, self.multiplicity
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum Station {
    Layer(u8),
    Disk(i8),
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Layer(l) => write!(f, "L{l}"),
            Self::Disk(d) => write!(f, "D{d}"),
        }
    }
}

/// One hit of the fit: seed stubs carry zero residuals.
#[derive(Debug, Clone, Copy)]
struct Hit {
    station: Station,
    phi: f64,
    zr: f64,
    phi_exact: f64,
    zr_exact: f64,
    iphi: i32,
    izr: i32,
    alpha: f64,
}

impl Hit {
    fn seed(station: Station) -> Self {
        Self {
            station,
            phi: 0.0,
            zr: 0.0,
            phi_exact: 0.0,
            zr_exact: 0.0,
            iphi: 0,
            izr: 0,
            alpha: 0.0,
        }
    }

    fn layer(layer: u8, m: &LayerResidual) -> Self {
        Self {
            station: Station::Layer(layer),
            phi: m.phi,
            zr: m.z,
            phi_exact: m.phi_exact,
            zr_exact: m.z_exact,
            iphi: m.iphi.value(),
            izr: m.iz.value(),
            alpha: 0.0,
        }
    }

    fn disk(disk: i8, m: &DiskResidual) -> Self {
        Self {
            station: Station::Disk(disk),
            phi: m.phi,
            zr: m.r,
            phi_exact: m.phi_exact,
            zr_exact: m.r_exact,
            iphi: m.iphi.value(),
            izr: m.ir.value(),
            alpha: m.alpha,
        }
    }
}

type Hits = SmallVec<[Hit; MAX_FIT_HITS]>;

/// Hits of a candidate in table order, with their pattern.
#[derive(Debug, Default)]
struct Topology {
    pattern: HitPattern,
    layers: Hits,
    disks: Hits,
    power: u32,
}

impl Topology {
    fn new() -> Self {
        Self {
            pattern: HitPattern {
                multiplicity: 1,
                ..HitPattern::default()
            },
            power: 1,
            ..Self::default()
        }
    }

    fn n_hits(&self) -> usize {
        self.layers.len() + self.disks.len()
    }

    fn push_layer(&mut self, hit: Hit, layer: u8) {
        self.pattern.layer_mask |= 1 << (N_LAYERS - usize::from(layer));
        self.layers.push(hit);
    }

    fn push_seed_disk(&mut self, disk: i8) {
        self.pattern.disk_mask |= ps_bit(disk);
        self.disks.push(Hit::seed(Station::Disk(disk)));
    }

    fn push_disk(&mut self, disk: i8, m: &DiskResidual, alpha_bits: u32) {
        if m.is_ps() {
            self.pattern.disk_mask |= ps_bit(disk);
        } else {
            let shift = m.ialpha.nbits().saturating_sub(alpha_bits);
            let ialpha = (1 << (alpha_bits - 1)) + (m.ialpha.value() >> shift);
            #[allow(clippy::cast_sign_loss)]
            {
                self.pattern.alpha_index += ialpha as u32 * self.power;
            }
            self.power <<= alpha_bits;
            self.pattern.disk_mask |= ps_bit(disk) >> 1;
            self.pattern.multiplicity <<= alpha_bits;
        }
        self.disks.push(Hit::disk(disk, m));
    }
}

fn ps_bit(disk: i8) -> u32 {
    1 << (2 * (N_DISKS - usize::from(disk.unsigned_abs())) + 1)
}

/// Compresses a fixed-point chi-square to 10 bits.
///
/// Four linear bands with growing step size; everything from `2^20` up
/// saturates at `2^10 - 1`.
pub fn compress_chisq(chisq: u32) -> u32 {
    match chisq {
        x if x < 1 << 8 => x,
        x if x < 1 << 12 => (1 << 8) + (x >> 4),
        x if x < 1 << 16 => (1 << 9) + (x >> 8),
        x if x < 1 << 20 => (1 << 9) + (1 << 8) + (x >> 12),
        _ => (1 << 10) - 1,
    }
}

/// Curvature bin of the table for a seed curvature.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn rinv_index(rinv: f64, rinv_bits: u32) -> u32 {
    let half = f64::from(1u32 << (rinv_bits - 1));
    let index = (half * rinv / RINV_MAX + half) as i64;
    index.clamp(0, (1i64 << rinv_bits) - 1) as u32
}

/// Track fitter sharing a frozen derivative table.
#[derive(Debug, Clone)]
pub struct TrackFitter {
    table: Arc<DerivativeTable>,
    config: FitConfig,
}

impl TrackFitter {
    /// Creates a fitter.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if the configuration is invalid or the
    /// table was built with another alpha or curvature resolution.
    pub fn new(table: Arc<DerivativeTable>, config: FitConfig) -> Result<Self> {
        config.validate()?;
        if table.alpha_bits() != config.alpha_bits || table.rinv_bits() != config.rinv_bits {
            return Err(Error::ConfigError(format!(
                "table built for alpha_bits={} rinv_bits={}, fitter configured for alpha_bits={} rinv_bits={}",
                table.alpha_bits(),
                table.rinv_bits(),
                config.alpha_bits,
                config.rinv_bits
            )));
        }
        Ok(Self { table, config })
    }

    /// Shared derivative table.
    pub fn table(&self) -> &Arc<DerivativeTable> {
        &self.table
    }

    /// Fit configuration.
    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Hit pattern the fit would look up for `candidate`.
    pub fn hit_pattern(&self, candidate: &Candidate) -> HitPattern {
        self.topology(candidate).pattern
    }

    /// Hit pattern worth recording in a pattern file: barrel seeds only,
    /// and only while the multiplicity is addressable.
    pub fn recorded_pattern(&self, candidate: &Candidate) -> Option<HitPattern> {
        if !candidate.seed.is_barrel() {
            return None;
        }
        let pattern = self.hit_pattern(candidate);
        (pattern.multiplicity <= self.config.max_multiplicity()).then_some(pattern)
    }

    fn topology(&self, candidate: &Candidate) -> Topology {
        let alpha_bits = self.config.alpha_bits;
        let max_multiplicity = self.config.max_multiplicity();
        let backward = candidate.fixed.t.value() < 0;
        let signed = |d: u8| {
            #[allow(clippy::cast_possible_wrap)]
            let d = d as i8;
            if backward {
                -d
            } else {
                d
            }
        };
        let mut topo = Topology::new();

        match candidate.seed {
            SeedTopology::Barrel { layer } => {
                for l in 1..=N_LAYERS as u8 {
                    if l == layer || Some(l) == layer.checked_add(1) {
                        topo.push_layer(Hit::seed(Station::Layer(l)), l);
                    } else if let Some(m) = candidate.layer_match(l) {
                        topo.push_layer(Hit::layer(l, m), l);
                    }
                }
                for d in 1..=N_DISKS as u8 {
                    if topo.pattern.layer_mask & (1 << (d - 1)) != 0
                        || topo.pattern.multiplicity == max_multiplicity
                        || topo.n_hits() >= MAX_FIT_HITS
                    {
                        continue;
                    }
                    #[allow(clippy::cast_possible_wrap)]
                    let d = d as i8;
                    if let Some(m) = candidate.disk_match(d) {
                        topo.push_disk(d, m, alpha_bits);
                    }
                }
            }
            SeedTopology::Disk { disk, disk2 } => {
                for l in 1..=2 {
                    if let Some(m) = candidate.layer_match(l) {
                        topo.push_layer(Hit::layer(l, m), l);
                    }
                }
                for d1 in 1..=N_DISKS as u8 {
                    if d1 == 5 && topo.pattern.layer_mask & (1 << 4) != 0 {
                        continue;
                    }
                    let d = signed(d1);
                    if d == disk || d == disk2 {
                        topo.push_seed_disk(d);
                        continue;
                    }
                    if topo.n_hits() >= MAX_FIT_HITS {
                        continue;
                    }
                    if let Some(m) = candidate.disk_match(d) {
                        topo.push_disk(d, m, alpha_bits);
                    }
                }
            }
            SeedTopology::Overlap { layer, disk } => {
                for l in 1..=2 {
                    if l == layer {
                        topo.push_layer(Hit::seed(Station::Layer(l)), l);
                    } else if let Some(m) = candidate.layer_match(l) {
                        topo.push_layer(Hit::layer(l, m), l);
                    }
                }
                for d1 in 1..=N_DISKS as u8 {
                    if topo.pattern.multiplicity == max_multiplicity {
                        continue;
                    }
                    let d = signed(d1);
                    if d == disk {
                        topo.push_seed_disk(d);
                        continue;
                    }
                    if topo.n_hits() >= MAX_FIT_HITS {
                        continue;
                    }
                    if let Some(m) = candidate.disk_match(d) {
                        topo.push_disk(d, m, alpha_bits);
                    }
                }
            }
        }
        topo
    }

    /// Fits `candidate` and stores the result in it.
    ///
    /// # Errors
    /// Returns [`Error::ResidualOutOfRange`] for a phi residual of 0.2 rad
    /// or more.
    #[allow(
        clippy::too_many_lines,
        clippy::similar_names,
        clippy::cast_possible_truncation
    )]
    pub fn fit(&self, candidate: &mut Candidate) -> Result<FitOutcome> {
        let topo = self.topology(candidate);
        let pattern = topo.pattern;

        let seed_rinv = f64::from(candidate.fixed.rinv.value()) * KRINVPARS;
        let rinv_bin = rinv_index(seed_rinv, self.config.rinv_bits);

        let Some(row) = self.table.derivatives(
            pattern.layer_mask,
            pattern.disk_mask,
            pattern.alpha_index,
            rinv_bin,
        ) else {
            debug!(
                tcid = candidate.tcid,
                "no derivatives for layermask={:06b} diskmask={:010b} eta={:.3}",
                pattern.layer_mask,
                pattern.disk_mask,
                candidate.exact.t.asinh()
            );
            return Ok(FitOutcome::MissingDerivatives);
        };

        let t = candidate.exact.t;
        let rinv = candidate.exact.rinv;
        let sign = if t < 0.0 { -1.0 } else { 1.0 };
        let mut ttabi = sign * gett(pattern.disk_mask, pattern.layer_mask);
        let mut ttab = ttabi;

        let radii: SmallVec<[f64; MAX_FIT_HITS]> = topo
            .layers
            .iter()
            .map(|hit| match hit.station {
                Station::Layer(l) => RMEAN[usize::from(l) - 1],
                Station::Disk(_) => 0.0,
            })
            .collect();
        let disks: SmallVec<[DiskGeometry; MAX_FIT_HITS]> = topo
            .disks
            .iter()
            .map(|hit| {
                let z = match hit.station {
                    Station::Disk(d) => sign * ZMEAN[usize::from(d.unsigned_abs()) - 1],
                    Station::Layer(_) => 0.0,
                };
                DiskGeometry { z, alpha: hit.alpha }
            })
            .collect();

        let geometry: Derivatives = calculate_derivatives(&radii, &disks, t, rinv)?;
        let mut minv_dt: Matrix = [[0.0; N_COLUMNS]; 4];
        let mut iminv_dt: IMatrix = [[0; N_COLUMNS]; 4];
        match self.config.derivative_mode {
            DerivativeMode::Exact => {
                minv_dt = geometry.minv_dt;
                iminv_dt = geometry.iminv_dt;
                ttabi = t;
                ttab = t;
            }
            DerivativeMode::ExactForFloating => {
                let mut unused: Matrix = [[0.0; N_COLUMNS]; 4];
                row.fill(candidate.fixed.t.value(), &mut unused, &mut iminv_dt);
                minv_dt = geometry.minv_dt;
                ttab = t;
            }
            DerivativeMode::Table => {
                row.fill(candidate.fixed.t.value(), &mut minv_dt, &mut iminv_dt);
            }
        }
        let d = &geometry.d;
        let id = &geometry.id;
        let sigma = &geometry.sigma;
        let kfactor = &geometry.kfactor;

        let n_layers = topo.layers.len();
        let n = topo.n_hits();
        let mut rstub = [0.0; MAX_FIT_HITS];
        for (i, &r) in radii.iter().enumerate() {
            rstub[i] = r;
        }
        for (i, disk) in disks.iter().enumerate() {
            rstub[n_layers + i] = disk.z / ttabi;
        }

        let mut delta = [0.0; N_COLUMNS];
        let mut delta_exact = [0.0; N_COLUMNS];
        let mut idelta = [0i32; N_COLUMNS];
        let mut chisq_seed_exact = 0.0;

        for (i, hit) in topo.layers.iter().chain(topo.disks.iter()).enumerate() {
            let mut phi = hit.phi;
            let mut phi_exact = hit.phi_exact;
            let mut iphi = hit.iphi;
            if i >= n_layers {
                iphi = (f64::from(iphi) * (t / ttabi)) as i32;
                phi *= t / ttab;
                phi_exact *= t / ttab;
            }

            for value in [phi, phi_exact] {
                if value.abs() >= MAX_PHI_RESIDUAL {
                    return Err(Error::ResidualOutOfRange {
                        tcid: candidate.tcid,
                        station: hit.station.to_string(),
                        value,
                    });
                }
            }

            idelta[2 * i] = iphi;
            delta[2 * i] = phi;
            delta_exact[2 * i] = phi_exact;
            idelta[2 * i + 1] = hit.izr;
            delta[2 * i + 1] = hit.zr;
            delta_exact[2 * i + 1] = hit.zr_exact;

            chisq_seed_exact += phi_exact * phi_exact + hit.zr_exact * hit.zr_exact;
        }

        let mut dpar = [0.0; 4];
        let mut dpar_exact = [0.0; 4];
        let mut cov_exact = [0.0; 4];
        let mut idpar = [0i64; 4];
        for j in 0..2 * n {
            for p in 0..4 {
                dpar[p] -= minv_dt[p][j] * delta[j];
                dpar_exact[p] -= minv_dt[p][j] * delta_exact[j];
                cov_exact[p] += d[p][j] * delta_exact[j];
                idpar[p] += i64::from(iminv_dt[p][j]) * i64::from(idelta[j]);
            }
        }

        let delta_chisq_exact: f64 = dpar_exact
            .iter()
            .zip(cov_exact.iter())
            .map(|(a, b)| a * b)
            .sum();

        let seed_fixed = [
            candidate.fixed.rinv.value(),
            candidate.fixed.phi0.value(),
            candidate.fixed.t.value(),
            candidate.fixed.z0.value(),
        ];
        let mut ifit = [0i32; 4];
        for p in 0..4 {
            ifit[p] = (i64::from(seed_fixed[p]) + (idpar[p] >> PARAM_BITSHIFTS[p])) as i32;
        }

        let approx = candidate.approx;
        let exact = candidate.exact;
        let params = HelixParams::new(
            approx.rinv - dpar[0],
            approx.phi0 - dpar[1],
            approx.t - dpar[2],
            approx.z0 - dpar[3],
        );
        let exact_fit = HelixParams::new(
            exact.rinv - dpar_exact[0],
            exact.phi0 - dpar_exact[1],
            exact.t - dpar_exact[2],
            exact.z0 - dpar_exact[3],
        );

        let mut chisq = 0.0;
        let mut ichisq: u32 = 0;
        let correction = |k: usize| -> (f64, f64) {
            let mut float = 0.0;
            let mut fixed = 0.0;
            for p in 0..4 {
                float += d[p][k] * dpar[p];
                #[allow(clippy::cast_precision_loss)]
                {
                    fixed += (i64::from(id[p][k]) * idpar[p]) as f64;
                }
            }
            (float, fixed)
        };

        for i in 0..n {
            let k = 2 * i;
            let (float, fixed) = correction(k);
            let phi_factor = rstub[i] * delta[k] / sigma[k] + float;
            let iphi_factor = kfactor[k] * rstub[i] * f64::from(idelta[k])
                * f64::from(1u32 << CHISQ_PHI_FACT_BITS)
                / sigma[k]
                - fixed;
            chisq += phi_factor * phi_factor;
            ichisq = (f64::from(ichisq)
                + iphi_factor * iphi_factor / f64::from(1u32 << (2 * CHISQ_PHI_FACT_BITS - 4)))
                as u32;

            let k = 2 * i + 1;
            let (float, fixed) = correction(k);
            let rz_factor = delta[k] / sigma[k] + float;
            let irz_factor = kfactor[k] * f64::from(idelta[k])
                * f64::from(1u32 << CHISQ_Z_FACT_BITS)
                / sigma[k]
                - fixed;
            chisq += rz_factor * rz_factor;
            ichisq = (f64::from(ichisq)
                + irz_factor * irz_factor / f64::from(1u32 << (2 * CHISQ_Z_FACT_BITS - 4)))
                as u32;

            if self.config.debug_chisq {
                debug!(
                    tcid = candidate.tcid,
                    stub = i,
                    phi = phi_factor,
                    iphi = iphi_factor / f64::from(1u32 << CHISQ_PHI_FACT_BITS),
                    rz = rz_factor,
                    irz = irz_factor / f64::from(1u32 << CHISQ_Z_FACT_BITS),
                    "chi-square terms"
                );
            }
        }

        let dof = (2 * n).saturating_sub(4).max(1);
        #[allow(clippy::cast_precision_loss)]
        let dof_f = dof as f64;
        let chisq = chisq / dof_f;
        let chisq_exact = (chisq_seed_exact + delta_chisq_exact) / dof_f;
        let ichisq = compress_chisq(ichisq / dof as u32);

        candidate.set_fit(FitResult {
            params,
            exact: exact_fit,
            fixed: FixedFit {
                rinv: ifit[0],
                phi0: ifit[1],
                t: ifit[2],
                z0: ifit[3],
                chisq: ichisq,
            },
            chisq,
            chisq_exact,
        });
        Ok(FitOutcome::Fitted)
    }
}
