//! Grain-size distribution (GSD) bookkeeping.
//!
//! A GSD is a set of mass fractions `pct[lith][bin]` over a fixed ψ-scale
//! (log2 grain size in mm) shared by every lithology. [`Gsd::normalize`]
//! and [`Gsd::stats`] are the two operations every other component in this
//! crate (cross-section resistance, Wilcock-Crowe capacity, bank
//! stability) depends on.

use serde::{Deserialize, Serialize};

/// A per-node (or per-library-group) grain-size distribution across one or
/// more lithologies, on a fixed ψ-scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gsd {
    /// ψ-scale bin edges, length `ngsz + 2` by convention (e.g. -3..=11).
    pub psi: Vec<f64>,
    /// `pct[lith][bin]`, mass fraction of lithology `lith` in bin `bin`.
    pub pct: Vec<Vec<f64>>,
    /// Per-lithology abrasion coefficient.
    pub abrasion: Vec<f64>,
    /// Per-lithology density (kg/m^3).
    pub density: Vec<f64>,
    /// D50 in ψ units, updated by [`Gsd::stats`].
    pub dsg: f64,
    /// D84 in ψ units.
    pub d84: f64,
    /// D90 in ψ units.
    pub d90: f64,
    /// Standard deviation in ψ units.
    pub stdv: f64,
    /// Mass fraction with `psi <= 0` (i.e. grain size <= 1 mm).
    pub sand_pct: f64,
}

impl Gsd {
    /// A GSD with `nlith` lithologies and `ngsz` size bins, all fractions
    /// zero. Matches the 15-bin, psi in [-3, 11) default library entry.
    pub fn new(nlith: usize, ngsz: usize) -> Self {
        Self {
            psi: (0..ngsz + 2).map(|j| -3.0 + j as f64).collect(),
            pct: vec![vec![0.0; ngsz]; nlith],
            abrasion: vec![0.0; nlith],
            density: vec![0.0; nlith],
            dsg: 0.0,
            d84: 0.0,
            d90: 0.0,
            stdv: 0.0,
            sand_pct: 0.0,
        }
    }

    fn ngsz(&self) -> usize {
        self.psi.len().saturating_sub(2)
    }

    /// Zero out negative fractions, then divide every entry by the total
    /// mass so `sum(pct) == 1`. Safe on all-zero input: leaves the
    /// distribution at zero without raising a flag (a recoverable clamp,
    /// not an error per the error-handling design).
    pub fn normalize(&mut self) {
        let ngsz = self.ngsz();
        let nlith = self.pct.len();
        let mut ktot = vec![0.0; ngsz];

        self.sand_pct = 0.0;

        let mut cumtot = 0.0;
        for j in 0..ngsz {
            for k in 0..nlith {
                if self.pct[k][j] > 0.0 {
                    ktot[j] += self.pct[k][j];
                } else {
                    self.pct[k][j] = 0.0;
                }
            }
            cumtot += ktot[j];
        }

        if cumtot <= 0.0 {
            return;
        }

        for j in 0..ngsz {
            for k in 0..nlith {
                if self.pct[k][j] > 0.0 {
                    self.pct[k][j] /= cumtot;
                }
                if self.psi[j] <= 0.0 {
                    self.sand_pct += self.pct[k][j];
                }
            }
        }
    }

    /// Compute `dsg`/`d84`/`d90`/`stdv` from the current (already
    /// normalized) fractions. Uses the moment-like form from the source
    /// (not true percentiles) deliberately, per the design document.
    pub fn stats(&mut self) {
        let ngsz = self.ngsz();
        let nlith = self.pct.len();
        let mut ktot = vec![0.0; ngsz];

        self.dsg = 0.0;
        self.d84 = 0.0;
        self.d90 = 0.0;

        for j in 0..ngsz {
            for k in 0..nlith {
                ktot[j] += self.pct[k][j];
            }
            let mid = self.psi[j] + self.psi[j + 1];
            self.dsg += 0.50 * mid * ktot[j];
            self.d84 += 0.84 * mid * ktot[j];
            self.d90 += 0.90 * mid * ktot[j];
        }

        let mut variance = 0.0;
        for j in 0..ngsz {
            let mid = 0.5 * (self.psi[j] + self.psi[j + 1]) - self.dsg;
            variance += 0.5 * mid * mid * ktot[j];
        }
        self.stdv = if variance > 0.0 { variance.sqrt() } else { 0.0 };
    }

    /// D50/D84/D90 in physical units (m), converting from the ψ-scale
    /// statistics via `D = 2^psi / 1000`.
    pub fn d50_m(&self) -> f64 {
        2f64.powf(self.dsg) / 1000.0
    }

    pub fn d84_m(&self) -> f64 {
        2f64.powf(self.d84) / 1000.0
    }

    pub fn d90_m(&self) -> f64 {
        2f64.powf(self.d90) / 1000.0
    }

    /// Sum of all mass fractions in `pct`, the quantity `normalize` drives
    /// to 1.0 (or leaves at 0.0 for an empty distribution).
    pub fn total_fraction(&self) -> f64 {
        self.pct.iter().flat_map(|lith| lith.iter()).sum()
    }

    /// Apply a 5-wide interpolation kernel to shift the distribution
    /// coarser (positive `dial`) or finer (negative `dial`), `dial` in
    /// `[-2, 2]`. Init-time only, per the design document; the kernel
    /// sums to 1 so total mass is preserved.
    pub fn substrate_shift(&mut self, dial: f64) {
        let dial = dial.clamp(-2.0, 2.0);
        let kernel = substrate_kernel(dial);
        let ngsz = self.ngsz();

        for lith in self.pct.iter_mut() {
            let original = lith.clone();
            for j in 0..ngsz {
                let mut shifted = 0.0;
                for (k, weight) in kernel.iter().enumerate() {
                    // Kernel is centered: offset -2..=2, positive dial
                    // shifts mass toward coarser (higher-index) bins.
                    let offset = k as isize - 2;
                    let src = j as isize - offset;
                    if src >= 0 && (src as usize) < ngsz {
                        shifted += weight * original[src as usize];
                    }
                }
                lith[j] = shifted;
            }
        }
        self.normalize();
        self.stats();
    }
}

/// A 5-wide kernel over offsets `-2..=2` that sums to 1: a unit impulse at
/// offset 0 (`dial == 0`, no shift) that slides continuously toward
/// offset `+2` as `dial -> 2` (coarser: bin `j` draws from the
/// lower-index, finer original bin `j - offset`) or toward offset `-2` as
/// `dial -> -2` (finer). Implemented as linear interpolation between the
/// two integer offsets bracketing `dial`, so the kernel is a genuine
/// shift rather than a symmetric blur — `substrate_kernel(dial)` and
/// `substrate_kernel(-dial)` are mirror images of each other, not equal.
fn substrate_kernel(dial: f64) -> [f64; 5] {
    let center = dial.clamp(-2.0, 2.0);
    let floor_offset = center.floor();
    let frac = center - floor_offset;
    let idx_floor = (floor_offset as isize + 2).clamp(0, 4) as usize;
    let idx_ceil = (idx_floor + 1).min(4);

    let mut kernel = [0.0; 5];
    kernel[idx_floor] += 1.0 - frac;
    kernel[idx_ceil] += frac;
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(nlith: usize, ngsz: usize, value: f64) -> Gsd {
        let mut gsd = Gsd::new(nlith, ngsz);
        for lith in gsd.pct.iter_mut() {
            for bin in lith.iter_mut() {
                *bin = value;
            }
        }
        gsd
    }

    #[test]
    fn normalize_drives_sum_to_one() {
        let mut gsd = uniform(3, 15, 2.0);
        gsd.normalize();
        assert!((gsd.total_fraction() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_zero_input_stays_zero() {
        let mut gsd = uniform(3, 15, 0.0);
        gsd.normalize();
        assert_eq!(gsd.total_fraction(), 0.0);
    }

    #[test]
    fn normalize_drops_negative_fractions() {
        let mut gsd = uniform(1, 3, 1.0);
        gsd.pct[0][1] = -0.5;
        gsd.normalize();
        assert_eq!(gsd.pct[0][1], 0.0);
    }

    /// Scenario E from the design document: 50% at psi=2, 50% at psi=8.
    #[test]
    fn scenario_e_grain_size_statistics() {
        let mut gsd = Gsd::new(1, 15);
        // psi bin j covers [psi[j], psi[j+1]); psi=2 -> j=5 (psi[5]=2),
        // psi=8 -> j=11 (psi[11]=8).
        gsd.pct[0][5] = 0.5;
        gsd.pct[0][11] = 0.5;
        gsd.normalize();
        gsd.stats();
        assert!((gsd.dsg - 5.5).abs() < 1e-6);
        assert!((gsd.stdv - 3.0).abs() < 0.1);
    }

    #[test]
    fn substrate_shift_direction_depends_on_dial_sign() {
        let mut base = Gsd::new(1, 15);
        base.pct[0][7] = 1.0;
        base.normalize();
        base.stats();
        let baseline_dsg = base.dsg;

        let mut coarser = base.clone();
        coarser.substrate_shift(2.0);
        let mut finer = base.clone();
        finer.substrate_shift(-2.0);

        assert!(coarser.dsg > baseline_dsg, "positive dial should coarsen dsg");
        assert!(finer.dsg < baseline_dsg, "negative dial should fine dsg");
        assert!(
            (coarser.dsg - finer.dsg).abs() > 1e-6,
            "positive and negative dial must not produce the same distribution"
        );
    }
}
