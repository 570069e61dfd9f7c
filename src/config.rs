//! Initialization contract and configurable knobs (§6).
//!
//! These structs are the entire surface between this crate and an
//! external parser (XML, JSON, whatever the embedding application uses):
//! the core never reads a config file itself, it only consumes an already
//! -parsed [`InitConfig`].

use serde::{Deserialize, Serialize};

/// Per-node entry of the long-profile array consumed at init.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRow {
    pub x: f64,
    pub eta: f64,
    pub bedrock: f64,
    pub width: f64,
    pub sinuosity: f64,
    pub fp_width_factor: f64,
    pub hmax: f64,
    pub theta: f64,
    pub active_layer_group: usize,
    pub strat_group: usize,
}

/// A GSD library entry: normalized percentages for one `(lithology, size
/// bin)` grid, shared by reference across nodes via `activeLayerGroup` /
/// `stratGroup` indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GsdGroup {
    /// `pct[lith][bin]`.
    pub pct: Vec<Vec<f64>>,
}

/// The structured configuration consumed from an external parser (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitConfig {
    pub nnodes: usize,
    pub layer_thickness: f64,
    pub default_la: f64,
    pub nlayer: usize,
    pub poro: f64,
    pub ngsz: usize,
    pub nlith: usize,
    pub ngrp: usize,
    /// `ngrp x nlith x ngsz` library of normalized GSD groups.
    pub gsd_library: Vec<GsdGroup>,
    pub abrasion: Vec<f64>,
    pub density: Vec<f64>,
    pub long_profile: Vec<ProfileRow>,
    /// Optional explicit stratigraphy: `nodes x layers` of GSD-group
    /// indices. When absent, every layer at a node replicates that node's
    /// `strat_group`.
    pub stratigraphy: Option<Vec<Vec<usize>>>,
}

impl InitConfig {
    /// Basic structural validation: a malformed config is a fatal error
    /// at init (§7), never a silent default substitution.
    pub fn validate(&self) -> crate::Result<()> {
        if self.long_profile.len() != self.nnodes {
            return Err(crate::GrateError::Config(format!(
                "long_profile has {} rows, expected nnodes = {}",
                self.long_profile.len(),
                self.nnodes
            )));
        }
        if self.gsd_library.len() != self.ngrp {
            return Err(crate::GrateError::Config(format!(
                "gsd_library has {} groups, expected ngrp = {}",
                self.gsd_library.len(),
                self.ngrp
            )));
        }
        for (i, group) in self.gsd_library.iter().enumerate() {
            if group.pct.len() != self.nlith {
                return Err(crate::GrateError::Config(format!(
                    "gsd_library[{i}] has {} lithologies, expected nlith = {}",
                    group.pct.len(),
                    self.nlith
                )));
            }
            for (k, lith) in group.pct.iter().enumerate() {
                if lith.len() != self.ngsz {
                    return Err(crate::GrateError::Config(format!(
                        "gsd_library[{i}][{k}] has {} size bins, expected ngsz = {}",
                        lith.len(),
                        self.ngsz
                    )));
                }
            }
        }
        if let Some(strat) = &self.stratigraphy {
            if strat.len() != self.nnodes {
                return Err(crate::GrateError::Config(format!(
                    "stratigraphy has {} node rows, expected nnodes = {}",
                    strat.len(),
                    self.nnodes
                )));
            }
        }
        for row in &self.long_profile {
            if row.eta < row.bedrock {
                return Err(crate::GrateError::Config(format!(
                    "node at x={} has eta ({}) below bedrock ({})",
                    row.x, row.eta, row.bedrock
                )));
            }
        }
        Ok(())
    }
}

/// Configurable knobs recognized by the solver (§6). Defaults match the
/// reference values named in the design document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverConfig {
    /// Preissmann weighting coefficient, in `[0.5, 1.0]`.
    pub preiss_theta: f64,
    /// Upwind weighting for bed slope, in `[0, 1]`.
    pub hyd_upw: f64,
    /// Time step (s).
    pub dt: f64,
    /// Steps between snapshot emissions.
    pub write_interval: u64,
    /// Whether `setRegimeWidth` runs each step.
    pub regime_flag: bool,
    /// Stochastic multipliers, all user-bounded per §3/§4.
    pub qs_tweak: f64,
    pub qw_tweak: f64,
    pub feed_qw: f64,
    pub feed_qs: f64,
    pub hmax_tweak: f64,
    pub substr_dial: f64,
    pub rand_abr: f64,
    /// Seed for the reproducible regime-split RNG (§5).
    pub rng_seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            preiss_theta: 0.7,
            hyd_upw: 0.3,
            dt: 3600.0,
            write_interval: 24,
            regime_flag: false,
            qs_tweak: 1.0,
            qw_tweak: 1.0,
            feed_qw: 0.0,
            feed_qs: 0.0,
            hmax_tweak: 1.0,
            substr_dial: 0.0,
            rand_abr: 0.0,
            rng_seed: 0,
        }
    }
}
