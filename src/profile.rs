//! Profile coordinator: owns the node array, advances time, triggers
//! regime updates, and threads tributary inflows into cumulative
//! discharge (§2, §5).

use crate::config::{InitConfig, SolverConfig};
use crate::hydrograph::Hydrograph;
use crate::section::{Channel, CrossSection};
use crate::snapshot::SnapshotRow;
use crate::{regime, solver, GrateError, Gsd, Result, G};
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

/// One node of the long profile, upstream (`n = 0`) to downstream.
#[derive(Debug, Clone)]
pub struct Node {
    pub x: f64,
    pub eta: f64,
    pub bedrock: f64,
    pub sinuosity: f64,
    pub xs: CrossSection,
    /// Active-layer grain-size distribution.
    pub gsd: Gsd,
    /// Stratigraphic column, ordered top (index 0) to bottom; consumed
    /// top-down on degradation, appended bottom-up on aggradation.
    pub strat: Vec<Gsd>,
    /// Remaining thickness in the topmost live layer (m).
    pub toplayer: f64,
    /// Nominal thickness of a full layer (m).
    pub layer_thickness: f64,
    /// Index of the deepest live layer.
    pub ntop: usize,
}

impl Node {
    /// Re-normalize and re-derive the active-layer GSD statistics; must be
    /// called after any mutation to `gsd.pct` (§3 invariant).
    pub fn refresh_gsd(&mut self) {
        self.gsd.normalize();
        self.gsd.stats();
    }

    /// Apply a bed-elevation change, consuming stratigraphic layers
    /// top-down on degradation and appending bottom-up on aggradation
    /// (Lifecycle, §3). `supply` is the composition of material being
    /// deposited on aggradation (e.g. the reach's bedload transport GSD);
    /// ignored on degradation, where the exposed substrate instead
    /// replaces the active layer's own composition.
    pub fn apply_bed_change(&mut self, delta_eta: f64, supply: Option<&Gsd>) {
        if delta_eta < -f64::EPSILON {
            self.degrade(-delta_eta);
        } else if delta_eta > f64::EPSILON {
            self.aggrade(delta_eta, supply);
        }
        self.eta += delta_eta;
    }

    fn degrade(&mut self, mut thickness: f64) {
        while thickness > 0.0 {
            if thickness < self.toplayer {
                self.toplayer -= thickness;
                thickness = 0.0;
            } else {
                thickness -= self.toplayer;
                if self.strat.is_empty() {
                    warn!("node exhausted stratigraphic column, bed cannot degrade further");
                    break;
                }
                self.gsd = self.strat.remove(0);
                self.toplayer = self.layer_thickness;
                self.ntop = self.ntop.saturating_sub(1);
            }
        }
        self.refresh_gsd();
    }

    fn aggrade(&mut self, thickness: f64, supply: Option<&Gsd>) {
        if let Some(supply) = supply {
            blend_gsd_mass_weighted(&mut self.gsd, supply, self.toplayer, thickness);
        }
        self.toplayer += thickness;
        while self.toplayer > self.layer_thickness {
            let overflow = self.toplayer - self.layer_thickness;
            self.strat.insert(0, self.gsd.clone());
            self.toplayer = overflow;
            self.ntop += 1;
        }
        self.refresh_gsd();
    }
}

/// Mass-weighted blend of `supply` into `gsd`, treating `gsd` as
/// representing `existing_thickness` and `supply` as representing
/// `added_thickness` of newly deposited material.
fn blend_gsd_mass_weighted(gsd: &mut Gsd, supply: &Gsd, existing_thickness: f64, added_thickness: f64) {
    let total = existing_thickness + added_thickness;
    if total <= 0.0 {
        return;
    }
    let w_existing = existing_thickness / total;
    let w_added = added_thickness / total;
    for (lith, supply_lith) in gsd.pct.iter_mut().zip(supply.pct.iter()) {
        for (bin, &supply_bin) in lith.iter_mut().zip(supply_lith.iter()) {
            *bin = *bin * w_existing + supply_bin * w_added;
        }
    }
}

/// The full engine: node array plus the time-series and configuration
/// context needed to advance it.
pub struct Profile {
    pub nodes: Vec<Node>,
    pub dx: f64,
    pub qw_cumul: Vec<f64>,
    pub bed_slope: Vec<f64>,
    pub fr2: Vec<f64>,
    pub hydrograph: Hydrograph,
    pub config: SolverConfig,
    /// Bed porosity, used by the Exner sediment-continuity update.
    pub poro: f64,
    pub time: f64,
    pub start_time: DateTime<Utc>,
    pub step_counter: u64,
    /// Marches upstream from `nnodes - 2` down to 2, then wraps (§4.7).
    pub regime_counter: usize,
    rng: ChaCha8Rng,
}

impl Profile {
    /// Build a profile from a validated [`InitConfig`].
    pub fn new(
        init: &InitConfig,
        hydrograph: Hydrograph,
        config: SolverConfig,
        start_time: DateTime<Utc>,
    ) -> Result<Self> {
        init.validate()?;

        let dx = if init.long_profile.len() > 1 {
            init.long_profile[1].x - init.long_profile[0].x
        } else {
            1.0
        };

        // Substrate-shift dial is a one-shot init-time transform over the
        // whole GSD library (§4.1), applied once here rather than per-node.
        let library: Vec<Gsd> = init
            .gsd_library
            .iter()
            .map(|group| {
                let mut gsd = Gsd::new(init.nlith, init.ngsz);
                gsd.pct = group.pct.clone();
                gsd.abrasion = init.abrasion.clone();
                gsd.density = init.density.clone();
                gsd.normalize();
                gsd.stats();
                if config.substr_dial != 0.0 {
                    gsd.substrate_shift(config.substr_dial);
                }
                gsd
            })
            .collect();

        let mut nodes = Vec::with_capacity(init.nnodes);
        for (n, row) in init.long_profile.iter().enumerate() {
            let mut channel = Channel::new(row.width, row.theta, row.hmax, row.hmax * 3.0);
            channel.fp_width = row.width * row.fp_width_factor;
            let xs = CrossSection::single(channel);

            let gsd = library
                .get(row.active_layer_group)
                .ok_or_else(|| {
                    GrateError::Config(format!(
                        "node {n}: activeLayerGroup {} out of range",
                        row.active_layer_group
                    ))
                })?
                .clone();

            let layer_groups: Vec<usize> = match &init.stratigraphy {
                Some(strat) => strat[n].clone(),
                None => vec![row.strat_group; init.nlayer],
            };
            let mut strat = Vec::with_capacity(layer_groups.len());
            for &g in &layer_groups {
                let layer = library.get(g).ok_or_else(|| {
                    GrateError::Config(format!("node {n}: stratGroup {g} out of range"))
                })?;
                strat.push(layer.clone());
            }

            nodes.push(Node {
                x: row.x,
                eta: row.eta,
                bedrock: row.bedrock,
                sinuosity: row.sinuosity.clamp(1.0, 2.6),
                xs,
                gsd,
                strat,
                toplayer: init.default_la,
                layer_thickness: init.layer_thickness,
                ntop: layer_groups.len().saturating_sub(1),
            });
        }

        let nnodes = nodes.len();
        Ok(Self {
            nodes,
            dx,
            qw_cumul: vec![0.0; nnodes],
            bed_slope: vec![0.0; nnodes],
            fr2: vec![0.0; nnodes],
            hydrograph,
            rng: ChaCha8Rng::seed_from_u64(config.rng_seed),
            config,
            poro: init.poro,
            time: 0.0,
            start_time,
            step_counter: 0,
            regime_counter: nnodes.saturating_sub(2),
        })
    }

    pub fn nnodes(&self) -> usize {
        self.nodes.len()
    }

    fn current_timestamp(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::milliseconds((self.time * 1000.0) as i64)
    }

    /// Advance the simulation by one `dt`, per the ordering guarantees in
    /// §5: build QwCumul, update the downstream boundary, recompute bed
    /// slope, run the backwater sweep, optionally update one node's
    /// regime, then advance time.
    pub fn step(&mut self) -> Result<()> {
        self.build_qw_cumul();
        solver::back_water(self)?;

        if self.config.regime_flag {
            regime::set_regime_width(self)?;
        }

        self.update_stratigraphy();

        self.time += self.config.dt;
        self.step_counter += 1;
        info!(step = self.step_counter, time = self.time, "advanced profile");
        Ok(())
    }

    /// Exner sediment-continuity update (§4.2, §3): refresh each node's
    /// Wilcock-Crowe transport capacity from its current shear/GSD state,
    /// then advance bed elevation by the spatial divergence of capacity
    /// between neighboring nodes, scaled by `qsTweak` and applied through
    /// [`Node::apply_bed_change`] so the stratigraphic column is consumed
    /// or built up in step with the running simulation rather than only
    /// in isolated unit tests.
    fn update_stratigraphy(&mut self) {
        let n = self.nodes.len();
        if n < 2 {
            return;
        }

        for i in 0..n {
            let bed_slope = self.bed_slope[i];
            let node = &mut self.nodes[i];
            let idx = node.xs.main_channel();
            let ch = &mut node.xs.channels[idx];
            ch.update_stress(bed_slope);
            ch.wilcock_crowe_capacity(&node.gsd);
        }

        let qs_tweak = self.config.qs_tweak;
        let qb: Vec<f64> = self
            .nodes
            .iter()
            .map(|node| node.xs.channels[node.xs.main_channel()].qb_cap * qs_tweak)
            .collect();
        let widths: Vec<f64> = self
            .nodes
            .iter()
            .map(|node| node.xs.channels[node.xs.main_channel()].width.max(1e-6))
            .collect();

        let dt = self.config.dt;
        let poro_term = (1.0 - self.poro).max(1e-3);

        let mut delta_eta = vec![0.0; n];
        delta_eta[0] = -dt / (poro_term * widths[0]) * (qb[1] - qb[0]) / self.dx;
        delta_eta[n - 1] = -dt / (poro_term * widths[n - 1]) * (qb[n - 1] - qb[n - 2]) / self.dx;
        for i in 1..n - 1 {
            delta_eta[i] =
                -dt / (poro_term * widths[i]) * (qb[i + 1] - qb[i - 1]) / (2.0 * self.dx);
        }

        for i in 0..n {
            let supply = if delta_eta[i] > 0.0 && i > 0 {
                Some(self.nodes[i - 1].gsd.clone())
            } else {
                None
            };
            self.nodes[i].apply_bed_change(delta_eta[i], supply.as_ref());
        }
    }

    /// Build `QwCumul[n]` from the hydrograph at the current time,
    /// scaled by `qwTweak` (§3, §6).
    fn build_qw_cumul(&mut self) {
        let t = self.current_timestamp();
        let node_x: Vec<f64> = self.nodes.iter().map(|n| n.x).collect();
        self.qw_cumul = self
            .hydrograph
            .cumulative_at_nodes(&node_x, t, self.config.qw_tweak);
    }

    /// Bed slope with upstream/downstream weighting `hydUpw`, including
    /// sinuosity scaling (§4.4). Boundary nodes use one-sided differences.
    pub fn update_bed_slope(&mut self) {
        let n = self.nodes.len();
        for i in 1..n.saturating_sub(1) {
            let upw = self.config.hyd_upw;
            let sinu = self.nodes[i].sinuosity;
            self.bed_slope[i] = (upw * (self.nodes[i - 1].eta - self.nodes[i].eta)
                + (1.0 - upw) * (self.nodes[i].eta - self.nodes[i + 1].eta))
                / (self.dx * sinu);
        }
        if n >= 2 {
            self.bed_slope[0] = (self.nodes[0].eta - self.nodes[1].eta) / self.dx;
            self.bed_slope[n - 1] = (self.nodes[n - 2].eta - self.nodes[n - 1].eta) / self.dx;
        }
    }

    pub fn rng_mut(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Build one [`SnapshotRow`] per node from the current state, for
    /// emission at a `writeInterval`-spaced step (§6). Derived fields
    /// (`wsl`, `v`, `fr`) are re-derived here rather than cached, so a
    /// reload-and-recompute round trip reproduces them identically
    /// (invariant 6).
    pub fn snapshot_rows(&self) -> Vec<SnapshotRow> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(n, node)| {
                let ch = &node.xs.channels[node.xs.main_channel()];
                let depth = ch.depth;
                let fr = if depth > 0.0 {
                    (ch.eci * ch.mean_velocity * ch.mean_velocity / (G * depth))
                        .max(0.0)
                        .sqrt()
                } else {
                    0.0
                };
                SnapshotRow {
                    t: self.time,
                    x: node.x,
                    eta: node.eta,
                    depth,
                    wsl: node.eta + depth,
                    q: self.qw_cumul[n],
                    v: ch.mean_velocity,
                    fr,
                    tau_bed: ch.tau_bed,
                    tau_bank: ch.tau_bank,
                    width: ch.width,
                    bank_height: ch.bank_height,
                    theta: ch.theta,
                    d50: node.gsd.d50_m(),
                    d84: node.gsd.d84_m(),
                    d90: node.gsd.d90_m(),
                    sigma: node.gsd.stdv,
                    qb: ch.qb_cap,
                }
            })
            .collect()
    }

    /// Advance the simulation with the fully-dynamic Preissmann solver
    /// instead of the quasi-steady backwater sweep (§4.4). Intended for
    /// runs where `dt` is small enough to resolve a sharp hydrograph
    /// (Scenario F); the rest of the step ordering (QwCumul, regime,
    /// time advance) is unchanged from [`Profile::step`].
    pub fn step_dynamic(
        &mut self,
        upstream: crate::preissmann::UpstreamBc,
        downstream: crate::preissmann::DownstreamBc,
    ) -> Result<()> {
        self.build_qw_cumul();
        self.update_bed_slope();
        crate::preissmann::fully_dynamic(self, upstream, downstream)?;

        if self.config.regime_flag {
            regime::set_regime_width(self)?;
        }

        self.update_stratigraphy();

        self.time += self.config.dt;
        self.step_counter += 1;
        info!(step = self.step_counter, time = self.time, "advanced profile (fully dynamic)");
        Ok(())
    }

    /// Clamp sinuosity into `[1.0, 2.6]`, logging if a clamp was applied
    /// (a recoverable clamp per §7, never an error).
    pub fn clamp_sinuosity(&mut self, n: usize) {
        let s = self.nodes[n].sinuosity;
        let clamped = s.clamp(1.0, 2.6);
        if (clamped - s).abs() > f64::EPSILON {
            warn!(node = n, from = s, to = clamped, "sinuosity clamped");
        }
        self.nodes[n].sinuosity = clamped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node() -> Node {
        let channel = Channel::new(30.0, 30.0, 0.5, 1.5);
        let mut gsd = Gsd::new(1, 15);
        gsd.pct[0][9] = 1.0;
        gsd.normalize();
        gsd.stats();

        let mut strat = Vec::new();
        for _ in 0..3 {
            let mut layer = Gsd::new(1, 15);
            layer.pct[0][4] = 1.0; // finer substrate than the active layer
            layer.normalize();
            layer.stats();
            strat.push(layer);
        }

        Node {
            x: 0.0,
            eta: 10.0,
            bedrock: 0.0,
            sinuosity: 1.0,
            xs: CrossSection::single(channel),
            gsd,
            strat,
            toplayer: 0.3,
            layer_thickness: 0.3,
            ntop: 2,
        }
    }

    #[test]
    fn degradation_consumes_layers_top_down() {
        let mut node = sample_node();
        let original_gsd_bin = node.gsd.pct[0][9];
        node.apply_bed_change(-0.5, None);

        assert!((node.eta - 9.5).abs() < 1e-9);
        // 0.5 m of degradation exceeds the 0.3 m toplayer, so the next
        // stored layer (finer composition) becomes the active layer.
        assert_eq!(node.strat.len(), 2);
        assert_ne!(node.gsd.pct[0][9], original_gsd_bin);
        assert!(node.gsd.pct[0][4] > 0.0);
    }

    #[test]
    fn degradation_within_toplayer_keeps_active_gsd() {
        let mut node = sample_node();
        node.apply_bed_change(-0.1, None);
        assert!((node.toplayer - 0.2).abs() < 1e-9);
        assert_eq!(node.strat.len(), 3);
        assert_eq!(node.gsd.pct[0][9], 1.0);
    }

    #[test]
    fn aggradation_appends_a_new_layer_once_full() {
        let mut node = sample_node();
        let supply = node.gsd.clone();
        node.apply_bed_change(0.4, Some(&supply));

        assert!((node.eta - 10.4).abs() < 1e-9);
        assert_eq!(node.strat.len(), 4, "overflow thickness should push a completed layer");
        assert!((node.toplayer - 0.1).abs() < 1e-6);
    }

    /// A live `step()` must exercise the Exner update: bed elevation at
    /// interior nodes should move away from its initial value once the
    /// backwater sweep has populated non-uniform shear/capacity along the
    /// reach, and every node must stay at or above bedrock.
    #[test]
    fn step_advances_bed_elevation_via_sediment_continuity() {
        use crate::config::{GsdGroup, InitConfig, ProfileRow, SolverConfig};
        use crate::hydrograph::Hydrograph;
        use chrono::Utc;

        let nnodes = 10;
        let mut long_profile = Vec::with_capacity(nnodes);
        for n in 0..nnodes {
            // A pinch-point in the middle (narrower width) sharpens shear
            // there relative to its neighbors, giving a nonzero qb_cap
            // divergence for the Exner update to act on.
            let width = if n == 5 { 15.0 } else { 30.0 };
            long_profile.push(ProfileRow {
                x: n as f64 * 100.0,
                eta: 10.0 - 0.001 * n as f64 * 100.0,
                bedrock: -10.0,
                width,
                sinuosity: 1.0,
                fp_width_factor: 10.0,
                hmax: 0.5,
                theta: 30.0,
                active_layer_group: 0,
                strat_group: 0,
            });
        }
        let mut pct = vec![vec![0.0; 15]];
        pct[0][9] = 1.0;
        let init = InitConfig {
            nnodes,
            layer_thickness: 0.3,
            default_la: 0.1,
            nlayer: 2,
            poro: 0.35,
            ngsz: 15,
            nlith: 1,
            ngrp: 1,
            gsd_library: vec![GsdGroup { pct }],
            abrasion: vec![1e-6],
            density: vec![2650.0],
            long_profile,
            stratigraphy: None,
        };

        let mut profile =
            Profile::new(&init, Hydrograph::default(), SolverConfig::default(), Utc::now()).unwrap();
        let initial_eta: Vec<f64> = profile.nodes.iter().map(|n| n.eta).collect();

        for _ in 0..50 {
            profile.step().unwrap();
        }

        let any_changed = profile
            .nodes
            .iter()
            .zip(initial_eta.iter())
            .any(|(node, &eta0)| (node.eta - eta0).abs() > 1e-9);
        assert!(any_changed, "sediment continuity should move at least one node's bed elevation");

        for node in &profile.nodes {
            assert!(node.eta >= node.bedrock, "bed elevation must not fall below bedrock");
            assert!(node.eta.is_finite());
        }
    }
}
