//! Cross-section (XS) geometry, conveyance, energy coefficient, shear
//! partitioning and Wilcock-Crowe transport capacity for a compound
//! trapezoidal-with-toe + floodplain channel.
//!
//! A [`CrossSection`] may host up to 10 [`Channel`] sub-channels sharing a
//! common floodplain; the "main channel" is whichever currently carries
//! the largest flow area. All geometry here is algebraic and
//! non-iterative — the iterative solvers in [`crate::critical_depth`],
//! [`crate::solver`] and [`crate::preissmann`] repeatedly re-evaluate it at
//! trial depths.

use crate::{deg_to_rad, Gsd, GS, RHO};
use serde::{Deserialize, Serialize};

/// Maximum number of sub-channels a cross-section may host.
pub const MAX_CHANNELS: usize = 10;

/// Derived hydraulic quantities recomputed on every depth change.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geometry {
    /// `[channel, floodplain, total]` flow area (m^2).
    pub flow_area: [f64; 3],
    /// `[channel, floodplain, total]` wetted perimeter (m).
    pub flow_perim: [f64; 3],
    /// Hydraulic radius (m), `flow_area[2] / flow_perim[2]`.
    pub hyd_radius: f64,
    /// Top width of flow (m).
    pub top_w: f64,
    /// Centroid depth of flow below the water surface (m), approximate.
    pub centr: f64,
    /// Bank-to-bank width at the top of the in-channel flow section (m).
    pub b2b: f64,
}

/// One flow-carrying channel within a cross-section. In a single-channel
/// section, channel 0 carries the whole discharge (`q_prop == 1.0`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Bed width of the channel (m).
    pub width: f64,
    /// Bank angle, **degrees** (0 < theta < 90).
    pub theta: f64,
    /// Fraction of the node's total discharge carried by this channel;
    /// `sum(QProp) == 1` over a node's channels.
    pub q_prop: f64,
    /// Vertical height of the sub-bank "toe" (m).
    pub hmax: f64,
    /// Bank height above the channel bed (m).
    pub bank_height: f64,
    /// Current flow depth above the channel bed (m).
    pub depth: f64,
    /// Floodplain width available to this channel (m).
    pub fp_width: f64,
    /// Floodplain lateral slope coefficient (H:V).
    pub fp_slope: f64,
    /// Valley-wall slope coefficient (H:V) beyond the floodplain.
    pub valley_wall_slope: f64,
    /// Derived geometry, updated by [`Channel::update_geometry`].
    #[serde(default)]
    pub geom: Geometry,
    /// Keulegan resistance factor `omega`, updated with [`Channel::eci`].
    #[serde(default)]
    pub omega: f64,
    /// Roughness height `k_s` (m).
    #[serde(default)]
    pub roughness: f64,
    /// Mean conveyance `K_ch + K_fp`.
    #[serde(default)]
    pub k_mean: f64,
    /// Energy coefficient.
    #[serde(default = "default_eci")]
    pub eci: f64,
    /// Mean velocity (m/s), `Qm / flow_area[2]`.
    #[serde(default)]
    pub mean_velocity: f64,
    /// Shear velocity `u* = sqrt(g R S)`.
    #[serde(default)]
    pub ustar: f64,
    /// Bed shear stress (Pa).
    #[serde(default)]
    pub tau_bed: f64,
    /// Bank shear stress (Pa).
    #[serde(default)]
    pub tau_bank: f64,
    /// Competent grain size the flow can move (m).
    #[serde(default)]
    pub comp_d: f64,
    /// Wilcock-Crowe bedload transport capacity (m^3/s).
    #[serde(default)]
    pub qb_cap: f64,
    /// Critical depth for this channel at the current discharge (m).
    #[serde(default)]
    pub crit_depth: f64,
    /// Overbank flag, set by [`Channel::update_geometry`].
    #[serde(default)]
    pub overbank: bool,
    /// Aspect ratio `width / depth`, used by the regime coordinator to
    /// decide whether a channel must be split (§4.7).
    #[serde(default)]
    pub aspect: f64,
}

fn default_eci() -> f64 {
    1.0
}

impl Channel {
    pub fn new(width: f64, theta: f64, hmax: f64, bank_height: f64) -> Self {
        Self {
            width,
            theta,
            q_prop: 1.0,
            hmax,
            bank_height,
            depth: 0.0,
            fp_width: width * 10.0,
            fp_slope: 0.035,
            valley_wall_slope: 5.0,
            geom: Geometry::default(),
            omega: 0.0,
            roughness: 0.01,
            k_mean: 0.0,
            eci: 1.0,
            mean_velocity: 0.0,
            ustar: 0.0,
            tau_bed: 0.0,
            tau_bank: 0.0,
            comp_d: 0.0,
            qb_cap: 0.0,
            crit_depth: 0.0,
            overbank: false,
            aspect: 0.0,
        }
    }

    /// Top-of-floodplain elevation above the channel bed: the floodplain
    /// is assumed to rise 1.5 m before meeting the valley wall.
    fn top_fp(&self) -> f64 {
        self.bank_height + 1.5
    }

    /// Recompute `geom` (area, perimeter, hydraulic radius, top width,
    /// centroid, b2b) for the current `depth`. Three regimes: in-bank,
    /// over-bank, valley-filling (§4.2).
    pub fn update_geometry(&mut self) {
        let theta_rad = deg_to_rad(self.theta);
        let depth = self.depth;

        self.geom.b2b = if self.bank_height > self.hmax {
            self.width + 2.0 * (self.bank_height - self.hmax) / theta_rad.tan()
        } else {
            self.width
        };
        let b2b = self.geom.b2b;
        let top_fp = self.top_fp();

        self.overbank = depth > self.bank_height;

        if depth > top_fp {
            let ov_fp = depth - top_fp;
            let ov_bank = 1.5;

            self.geom.flow_area[0] = b2b * self.bank_height
                - (self.bank_height - self.hmax).powi(2) / theta_rad.tan()
                + (ov_bank + ov_fp) * b2b;
            self.geom.flow_area[1] = 0.5 * (ov_bank * self.fp_slope * 1.5)
                + 0.5 * (ov_bank * 1.5)
                + (ov_fp * (self.fp_width - b2b))
                + (ov_fp * ov_fp / self.valley_wall_slope);

            self.geom.flow_perim[0] =
                self.width + 2.0 * self.hmax + 2.0 * (self.bank_height - self.hmax) / theta_rad.tan();
            self.geom.flow_perim[1] = ov_bank * (self.fp_slope + std::f64::consts::SQRT_2) + self.fp_width
                - (self.fp_slope * ov_bank + b2b + ov_bank + 2.0 * ov_fp / self.valley_wall_slope);

            self.geom.top_w = self.fp_width;
        } else if depth > self.bank_height {
            let ov_bank = depth - self.bank_height;

            self.geom.flow_area[0] = b2b * self.bank_height
                - (self.bank_height - self.hmax).powi(2) / theta_rad.tan()
                + ov_bank * (b2b + 0.5 * ov_bank);
            self.geom.flow_area[1] = 0.5 * ov_bank * ov_bank * self.fp_slope;

            self.geom.flow_perim[0] =
                self.width + 2.0 * self.hmax + 2.0 * (self.bank_height - self.hmax) / theta_rad.tan();
            self.geom.flow_perim[1] = ov_bank * (self.fp_slope + std::f64::consts::SQRT_2);

            self.geom.top_w = b2b + ov_bank * (self.valley_wall_slope + self.fp_slope);
        } else {
            if depth <= (self.bank_height - self.hmax) {
                self.geom.flow_area[0] = self.width * depth + depth.powi(2) / theta_rad.tan();
                self.geom.flow_perim[0] = self.width + 2.0 * depth / theta_rad.sin();
                self.geom.top_w = self.width + 2.0 * depth / theta_rad.tan();
            } else {
                self.geom.flow_area[0] =
                    b2b * depth - (self.bank_height - self.hmax).powi(2) / theta_rad.tan();
                self.geom.flow_perim[0] = self.width + 2.0 * (self.bank_height - self.hmax) / theta_rad.sin()
                    + 2.0 * (depth - (self.bank_height - self.hmax));
                self.geom.top_w = self.width + 2.0 * (self.bank_height - self.hmax) / theta_rad.tan();
            }
            self.geom.flow_area[1] = 0.0;
            self.geom.flow_perim[1] = 0.0;
        }

        self.geom.flow_area[2] = self.geom.flow_area[0] + self.geom.flow_area[1];
        self.geom.flow_perim[2] = self.geom.flow_perim[0] + self.geom.flow_perim[1];
        self.geom.hyd_radius = if self.geom.flow_perim[2] > 0.0 {
            self.geom.flow_area[2] / self.geom.flow_perim[2]
        } else {
            0.0
        };

        self.geom.centr = (depth / 3.0) * (2.0 * self.width + self.geom.top_w)
            / (self.width + self.geom.top_w).max(1e-9);
    }

    /// Keulegan resistance and conveyance/energy coefficient (`K`, `eci`),
    /// driven by the active-layer GSD's D50/sigma.
    pub fn update_conveyance(&mut self, gsd: &Gsd) {
        let d50 = gsd.d50_m();
        self.roughness = (2.0 * d50 * gsd.stdv.powf(1.28)).max(0.01);
        self.omega = 1.0 / (2.5 * (11.0 * self.depth / self.roughness).ln());

        let k_ch = self.geom.flow_area[0] * (crate::G * self.depth).sqrt() / self.omega;
        let ov_bank = self.depth - self.bank_height;

        if ov_bank > 0.0 && self.geom.flow_area[1] > 0.0 {
            let k_fp = self.geom.flow_area[1] * (crate::G * ov_bank * 0.5).sqrt() / self.omega;
            self.k_mean = k_ch + k_fp;
            self.eci = (k_ch.powi(3) / self.geom.flow_area[0].powi(2)
                + k_fp.powi(3) / self.geom.flow_area[1].powi(2))
                / (self.k_mean.powi(3) / self.geom.flow_area[2].powi(2));
        } else {
            self.eci = 1.0;
            self.k_mean = k_ch;
        }
    }

    /// Knight shear partitioning between bed and banks, plus the
    /// competent-grain-size estimate (§4.2).
    pub fn update_stress(&mut self, bed_slope: f64) {
        let theta_rad = deg_to_rad(self.theta);

        self.ustar = (crate::G * self.depth * bed_slope.abs()).sqrt();
        self.mean_velocity = self.ustar / self.omega;

        let sf_bank = 10f64.powf(
            -1.4026 * (self.width / (self.geom.flow_perim[2] - self.width) + 1.5).log10() + 0.3516,
        );
        let total_stress = crate::G * RHO * self.depth * bed_slope;

        self.tau_bed = total_stress * (1.0 - sf_bank / 100.0) * (self.geom.b2b / (2.0 * self.width) + 0.5);
        self.tau_bank =
            total_stress * sf_bank * (self.geom.b2b + self.width) * theta_rad.sin() / (4.0 * self.depth);

        self.comp_d = self.tau_bed / (0.02 * crate::G * RHO * GS);
        self.aspect = if self.depth > 0.0 {
            self.width / self.depth
        } else {
            0.0
        };
    }

    /// Wilcock-Crowe surface-based bedload transport capacity (§4.2).
    /// `gsd` is the node's active-layer distribution (already normalized).
    pub fn wilcock_crowe_capacity(&mut self, gsd: &Gsd) {
        let d50 = gsd.d50_m();
        let tau_ref = 0.021 + 0.015 * (-20.0 * gsd.sand_pct).exp();
        let phi = (self.ustar.powi(2) / (0.65 * crate::G * d50)) / tau_ref;

        let ngsz = gsd.psi.len().saturating_sub(2);
        let mut sum_fw = 0.0;
        for j in 0..ngsz {
            let dj_mm = 2f64.powf(0.5 * (gsd.psi[j] + gsd.psi[j + 1]));
            let dj = dj_mm / 1000.0;
            let fj: f64 = gsd.pct.iter().map(|lith| lith[j]).sum();
            if fj <= 0.0 {
                continue;
            }
            let b = 0.67 / (1.0 + (1.5 - dj / d50).exp());
            let arg = phi * (dj / d50).powf(-b);
            let w_star = if arg < 1.35 {
                0.002 * arg.powf(7.5)
            } else {
                14.0 * (1.0 - 0.894 / arg.sqrt()).powf(4.5)
            };
            sum_fw += fj * w_star;
        }

        self.qb_cap = sum_fw * self.ustar.powi(3) / (0.65 * crate::G) * self.width;
    }
}

/// A full compound cross-section: up to [`MAX_CHANNELS`] sub-channels
/// sharing a floodplain. The "main channel" is whichever currently has
/// the largest total flow area.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossSection {
    pub channels: Vec<Channel>,
    pub sinuosity: f64,
}

impl CrossSection {
    pub fn single(channel: Channel) -> Self {
        Self {
            channels: vec![channel],
            sinuosity: 1.0,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Index of the channel with the largest total flow area.
    pub fn main_channel(&self) -> usize {
        self.channels
            .iter()
            .enumerate()
            .max_by(|a, b| {
                a.1.geom.flow_area[2]
                    .partial_cmp(&b.1.geom.flow_area[2])
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Total flow area across all sub-channels (§3: `flow_area[2]`
    /// aggregated at the node level).
    pub fn total_flow_area(&self) -> f64 {
        self.channels.iter().map(|ch| ch.geom.flow_area[2]).sum()
    }

    /// `sum(QProp)` over all sub-channels; should be 1.0 after a valid
    /// split (§3 invariant).
    pub fn total_q_prop(&self) -> f64 {
        self.channels.iter().map(|ch| ch.q_prop).sum()
    }

    /// Reset to a single bankfull channel, discarding any splits from a
    /// previous regime pass. Used by `setRegimeWidth` (§4.7) before each
    /// per-node regime reassessment.
    pub fn regime_reset(&mut self) {
        let mut main = self.channels[self.main_channel()].clone();
        main.q_prop = 1.0;
        self.channels = vec![main];
    }
}
