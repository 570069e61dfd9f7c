//! Hydraulic solver family: `backWater`, `energyConserve`, `quasiNormal`
//! (§4.4). These operate on each node's main channel — the sub-channel
//! bookkeeping in [`crate::section::CrossSection`] only matters to the
//! regime solver's per-channel bedload capacity.

use crate::critical_depth;
use crate::profile::Profile;
use crate::{GrateError, Result, G};
use tracing::{debug, warn};

const FR2_THRESHOLD: f64 = 0.9 * 0.9;

fn refresh_geometry(profile: &mut Profile, n: usize) {
    let q = profile.qw_cumul[n];
    let node = &mut profile.nodes[n];
    node.refresh_gsd();
    let idx = node.xs.main_channel();
    let ch = &mut node.xs.channels[idx];
    ch.update_geometry();
    if ch.geom.flow_area[2] > 0.0 {
        ch.mean_velocity = q / ch.geom.flow_area[2];
    }
    if ch.geom.hyd_radius > 0.0 {
        ch.update_conveyance(&node.gsd);
    }
}

/// Quasi-steady backwater sweep: marches from `n = N-2` down to `n = 1`,
/// choosing `energyConserve` or `quasiNormal` per node depending on
/// Froude number and bed slope sign (§4.4).
pub fn back_water(profile: &mut Profile) -> Result<()> {
    let last = profile.nnodes() - 1;
    profile.update_bed_slope();

    // Downstream boundary: empirical rating curve, no upstream influence.
    {
        let q = profile.qw_cumul[last];
        let node = &mut profile.nodes[last];
        let idx = node.xs.main_channel();
        {
            let ch = &mut node.xs.channels[idx];
            ch.depth = 0.3 * q.powf(0.3);
        }
        refresh_geometry_at(profile, last);
        let node = &profile.nodes[last];
        let ch = &node.xs.channels[node.xs.main_channel()];
        profile.fr2[last] = ch.eci * ch.mean_velocity.powi(2) / (G * ch.depth.max(1e-9));
    }

    // Upstream boundary: quasiNormal.
    quasi_normal(profile, 0)?;

    for n in (1..last).rev() {
        let q = profile.qw_cumul[n];
        let seed = if profile.bed_slope[n] <= 0.0 {
            let down_depth = profile.nodes[n + 1].xs.channels
                [profile.nodes[n + 1].xs.main_channel()]
            .depth;
            down_depth - profile.bed_slope[n] * profile.dx
        } else {
            0.3 * q.powf(0.3)
        };

        {
            let node = &mut profile.nodes[n];
            let idx = node.xs.main_channel();
            node.xs.channels[idx].depth = seed.max(0.01);
        }
        refresh_geometry_at(profile, n);

        let (fr2, crit_depth, bed_slope_n) = {
            let node = &mut profile.nodes[n];
            let idx = node.xs.main_channel();
            let ch = &mut node.xs.channels[idx];
            let fr2 = ch.eci * ch.mean_velocity.powi(2) / (G * ch.depth.max(1e-9));
            let cd = critical_depth::critical_depth(ch, q, ch.fp_width, n)?;
            (fr2, cd, profile.bed_slope[n])
        };
        profile.fr2[n] = fr2;

        let mut failed = false;
        if fr2 < FR2_THRESHOLD && bed_slope_n > 0.0 {
            if let Err(e) = energy_conserve(profile, n) {
                warn!(node = n, error = %e, "energyConserve failed, falling back");
                failed = true;
            }
        } else {
            quasi_normal(profile, n + 1)?;
            if let Err(e) = quasi_normal(profile, n) {
                warn!(node = n, error = %e, "quasiNormal failed, copying downstream depth");
                failed = true;
            }
        }

        let (depth_now, down_depth) = {
            let down = profile.nodes[n + 1].xs.channels[profile.nodes[n + 1].xs.main_channel()].depth;
            let node = &profile.nodes[n];
            (node.xs.channels[node.xs.main_channel()].depth, down)
        };

        if failed {
            let node = &mut profile.nodes[n];
            let idx = node.xs.main_channel();
            node.xs.channels[idx].depth = down_depth;
            refresh_geometry_at(profile, n);
        } else if depth_now < crit_depth {
            debug!(node = n, depth = depth_now, crit_depth, "clamped to critical depth");
            let node = &mut profile.nodes[n];
            let idx = node.xs.main_channel();
            node.xs.channels[idx].depth = crit_depth;
            refresh_geometry_at(profile, n);
        }

        let depth_final = {
            let node = &profile.nodes[n];
            node.xs.channels[node.xs.main_channel()].depth
        };
        if depth_final < 0.0 || !depth_final.is_finite() {
            return Err(GrateError::Invariant(format!(
                "negative or non-finite depth at node {n}: {depth_final}"
            )));
        }

        let bed_slope_n = profile.bed_slope[n];
        let node = &mut profile.nodes[n];
        let idx = node.xs.main_channel();
        node.xs.channels[idx].update_stress(bed_slope_n);
    }

    Ok(())
}

fn refresh_geometry_at(profile: &mut Profile, n: usize) {
    refresh_geometry(profile, n);
}

/// Standard-step energy-conservation backwater solve between node `n`
/// (unknown) and `n+1` (already solved), bisecting on upstream depth
/// (§4.4).
pub fn energy_conserve(profile: &mut Profile, n: usize) -> Result<()> {
    const MAX_ITER: u32 = 300;

    refresh_geometry(profile, n);
    refresh_geometry(profile, n + 1);

    let (down_depth, down_eci, down_velocity, down_k_mean, crit_depth) = {
        let node_u = &profile.nodes[n];
        let ch_u = &node_u.xs.channels[node_u.xs.main_channel()];
        let node_d = &profile.nodes[n + 1];
        let ch_d = &node_d.xs.channels[node_d.xs.main_channel()];
        (ch_d.depth, ch_d.eci, ch_d.mean_velocity, ch_d.k_mean, ch_u.crit_depth)
    };
    let vh_down = down_eci * down_velocity * down_velocity / (2.0 * G);
    let q_down = profile.qw_cumul[n + 1];
    let sf2 = (q_down * q_down) / (down_k_mean * down_k_mean).max(1e-12);

    let h1_init = crit_depth.max(1e-6);
    let mut h2 = (10.0 * crit_depth).max((down_depth + profile.bed_slope[n + 1] * profile.dx) * 2.0);

    // Expand h2 until the energy function is positive.
    let mut ff = -1.0_f64;
    let mut expansions = 0;
    while ff <= 0.0 {
        {
            let node = &mut profile.nodes[n];
            let idx = node.xs.main_channel();
            node.xs.channels[idx].depth = h2;
        }
        refresh_geometry(profile, n);
        let (sf, vhu, depth) = {
            let node = &profile.nodes[n];
            let ch = &node.xs.channels[node.xs.main_channel()];
            let q = profile.qw_cumul[n];
            (q / ch.k_mean.max(1e-12), ch.eci * ch.mean_velocity.powi(2) / (2.0 * G), ch.depth)
        };
        ff = (depth + vhu) - (down_depth + vh_down)
            + ((profile.bed_slope[n + 1] + profile.bed_slope[n]) / 2.0 - sf) * profile.dx;
        h2 = 2.0 * depth;
        expansions += 1;
        if expansions > 300 {
            return Err(GrateError::Convergence {
                routine: "energyConserve(expand)",
                node: n,
                iterations: expansions,
            });
        }
    }

    let mut h1 = h1_init;
    let h2_found = {
        let node = &profile.nodes[n];
        node.xs.channels[node.xs.main_channel()].depth
    };
    let mut depth = (h1 + h2_found) / 1.5;

    let mut error = 1.0_f64;
    let mut iter = 0;
    loop {
        {
            let node = &mut profile.nodes[n];
            let idx = node.xs.main_channel();
            node.xs.channels[idx].depth = depth;
        }
        refresh_geometry(profile, n);

        let (vhu, depth_now) = {
            let node = &profile.nodes[n];
            let ch = &node.xs.channels[node.xs.main_channel()];
            (ch.eci * ch.mean_velocity.powi(2) / (2.0 * G), ch.depth)
        };

        let mut sf = sf2;
        if iter > 1 {
            let (q_n, k_n) = {
                let node = &profile.nodes[n];
                let ch = &node.xs.channels[node.xs.main_channel()];
                (profile.qw_cumul[n], ch.k_mean)
            };
            let qm = (q_n + q_down) / 2.0;
            let km = (k_n + down_k_mean) / 2.0;
            let sfx = qm / km.max(1e-12);
            sf = sfx * sfx;
        }

        let ff = (depth_now + vhu) - (down_depth + vh_down) + (profile.bed_slope[n] - sf) * profile.dx;
        if ff > 0.0 {
            h2 = depth_now;
        } else {
            h1 = depth_now;
        }

        if h2 > crit_depth {
            let candidate = (h1 + h2) / 2.0;
            error = (candidate - depth_now).abs() / depth_now.max(1e-9);
            depth = candidate;
        } else {
            depth = crit_depth;
            break;
        }

        iter += 1;
        if error <= 5e-4 {
            break;
        }
        if iter > MAX_ITER {
            return Err(GrateError::Convergence {
                routine: "energyConserve",
                node: n,
                iterations: iter,
            });
        }
        if depth < 0.0 {
            return Err(GrateError::Invariant(format!(
                "energyConserve produced negative depth at node {n}"
            )));
        }
    }

    {
        let node = &mut profile.nodes[n];
        let idx = node.xs.main_channel();
        node.xs.channels[idx].depth = depth;
    }
    refresh_geometry(profile, n);
    Ok(())
}

/// Uniform-flow (normal-depth) Newton solve at a single node, used both as
/// a sub-step of `backWater` and directly by the regime solver's
/// per-channel normal-depth resolution (§4.4, §4.6).
pub fn quasi_normal(profile: &mut Profile, n: usize) -> Result<()> {
    const MAX_ITER: u32 = 900;

    refresh_geometry(profile, n);

    let mut iter = 0;
    let mut error = 1.0_f64;

    loop {
        let bed_slope = profile.bed_slope[n];
        let q = profile.qw_cumul[n];

        let (depth, updated_depth) = {
            let node = &mut profile.nodes[n];
            let idx = node.xs.main_channel();
            let ch = &mut node.xs.channels[idx];
            ch.update_geometry();
            if ch.geom.hyd_radius > 0.0 {
                ch.update_conveyance(&node.gsd);
            }

            let r = ch.geom.hyd_radius.abs();
            let ff = q / ch.geom.top_w.max(1e-9) - r * (G * r * bed_slope).sqrt() * ch.omega;
            let fp = -2.5 * (G * r * bed_slope).sqrt() * (1.5 * (11.0 * r / ch.roughness).ln() + 1.0);

            let delta = -ff / fp;
            let new_depth = ch.depth + delta / 2.0;
            ch.depth = new_depth.max(1e-4);
            (delta, ch.depth)
        };

        error = (depth / updated_depth.max(1e-9)).abs();
        iter += 1;
        if error <= 1e-4 {
            break;
        }
        if iter > MAX_ITER {
            return Err(GrateError::Convergence {
                routine: "quasiNormal",
                node: n,
                iterations: iter,
            });
        }
    }

    refresh_geometry(profile, n);
    let bed_slope = profile.bed_slope[n];
    let node = &mut profile.nodes[n];
    let idx = node.xs.main_channel();
    node.xs.channels[idx].update_stress(bed_slope);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GsdGroup, InitConfig, ProfileRow, SolverConfig};
    use crate::hydrograph::Hydrograph;
    use chrono::Utc;

    /// Scenario A setup: 10 nodes, flat-ish bed, constant discharge.
    fn scenario_a() -> Profile {
        let nnodes = 10;
        let mut long_profile = Vec::with_capacity(nnodes);
        for n in 0..nnodes {
            long_profile.push(ProfileRow {
                x: n as f64 * 100.0,
                eta: 10.0 - 0.001 * n as f64 * 100.0,
                bedrock: -10.0,
                width: 30.0,
                sinuosity: 1.0,
                fp_width_factor: 10.0,
                hmax: 0.5,
                theta: 30.0,
                active_layer_group: 0,
                strat_group: 0,
            });
        }
        let mut pct = vec![vec![0.0; 15]];
        pct[0][9] = 1.0; // concentrate mass near psi=6 -> D50 ~ 64mm-ish bin
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
        Profile::new(&init, Hydrograph::default(), SolverConfig::default(), Utc::now()).unwrap()
    }

    #[test]
    fn back_water_produces_positive_depths_at_interior_nodes() {
        let mut profile = scenario_a();
        profile.qw_cumul = vec![40.0; profile.nnodes()];
        let result = back_water(&mut profile);
        assert!(result.is_ok());
        for n in 1..profile.nnodes() - 1 {
            let node = &profile.nodes[n];
            let depth = node.xs.channels[node.xs.main_channel()].depth;
            assert!(depth > 0.0, "node {n} depth {depth} should be positive");
        }
    }
}
