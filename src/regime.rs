//! Regime-width coordinator (`regimeModel` / `findStable` /
//! `setRegimeWidth`, §4.5-4.7).
//!
//! Regime theory resolves a channel's self-formed width as the value that
//! maximizes bedload transport capacity at the node's current discharge,
//! subject to a bank-stability constraint on `theta`. [`set_regime_width`]
//! marches one node per call (so a full-profile sweep takes `nnodes - 2`
//! steps), splitting any channel whose aspect ratio exceeds [`ASPECT_TOL`]
//! into two at a random proportion.

use crate::profile::Profile;
use crate::section::Channel;
use crate::{deg_to_rad, Gsd, Result, G, GS, RHO};
use rand::Rng;
use tracing::warn;

/// Maximum tolerated width/depth aspect before a channel is split.
const ASPECT_TOL: f64 = 50.0;
/// Sweeps of the split loop per call (§4.7).
const SPLIT_SWEEPS: usize = 5;
/// Friction angle for bank sediment (degrees).
const PHI: f64 = 40.0;
const TAU_STAR: f64 = 0.02;

/// Bank-stability threshold shear stress at bank angle `theta_deg` (§4.6).
fn bank_crit(d90: f64, theta_deg: f64) -> f64 {
    let ratio = (deg_to_rad(theta_deg).sin() / deg_to_rad(PHI).sin()).powi(2);
    G * RHO * GS * d90 * TAU_STAR * (1.0 - ratio).max(0.0).sqrt()
}

/// Newton depth solve for a channel carrying a specified discharge `q`
/// with roughness height `d84`, independent of the node's main-channel
/// bookkeeping used by [`crate::solver::quasi_normal`] (regime assessment
/// walks sub-channels that are not necessarily the node's main channel).
fn channel_find_depth(channel: &mut Channel, q: f64, d84: f64, bed_slope: f64) -> Result<()> {
    const MAX_ITER: u32 = 200;
    let ks = d84.max(1e-5);
    let slope = bed_slope.abs().max(1e-6);

    channel.depth = channel.depth.max(0.1);
    let mut iter = 0;
    loop {
        channel.update_geometry();
        let r = channel.geom.hyd_radius.abs().max(1e-6);
        let omega = 1.0 / (2.5 * (11.0 * r / ks).ln());
        let ff = q / channel.geom.top_w.max(1e-9) - r * (G * r * slope).sqrt() * omega;
        let fp = -2.5 * (G * r * slope).sqrt() * (1.5 * (11.0 * r / ks).ln() + 1.0);
        let delta = -ff / fp;
        channel.depth = (channel.depth + delta / 2.0).max(1e-4);

        iter += 1;
        if (delta / channel.depth).abs() <= 1e-4 {
            break;
        }
        if iter > MAX_ITER {
            warn!(iterations = iter, "channelFindDepth did not converge, using last estimate");
            break;
        }
    }
    channel.update_geometry();
    Ok(())
}

/// Find the bank angle `theta` that balances bank shear against
/// `bank_crit`, holding width fixed (`findStable`, §4.6).
fn find_stable(channel: &mut Channel, q: f64, gsd: &Gsd, bed_slope: f64) -> Result<()> {
    const TOL: f64 = 1e-3;
    const MAX_ITER: u32 = 250;

    let d84 = gsd.d84_m();
    let d90 = gsd.d90_m();
    let delta_x = 0.01 * channel.theta;
    let mut upper = channel.theta - delta_x;
    let mut lower = delta_x;
    channel.theta = 0.25 * PHI;

    channel_find_depth(channel, q, d84, bed_slope)?;
    channel.update_stress(bed_slope);

    if channel.bank_height <= channel.hmax {
        channel.theta = 89.0;
        channel.update_stress(bed_slope);
        return Ok(());
    }

    let mut crit = bank_crit(d90, channel.theta);
    let mut converg = (channel.tau_bank - crit) / crit.max(1e-9);
    let mut iter = 0;
    while converg.abs() > TOL {
        if converg > 0.0 {
            upper = channel.theta;
        } else {
            lower = channel.theta;
        }
        channel.theta = 0.5 * (upper + lower);

        channel_find_depth(channel, q, d84, bed_slope)?;
        channel.update_stress(bed_slope);
        crit = bank_crit(d90, channel.theta);
        converg = (channel.tau_bank - crit) / crit.max(1e-9);

        iter += 1;
        if iter > MAX_ITER {
            warn!(iterations = iter, "findStable exceeded iteration budget");
            break;
        }
    }
    Ok(())
}

/// Assess the regime width of one sub-channel at node `n`: a
/// gradient-ascent bracket followed by bisection on the bedload-capacity
/// derivative with respect to width (`regimeModel`, §4.5).
fn regime_model(profile: &mut Profile, n: usize, ch_idx: usize) -> Result<()> {
    const TOL: f64 = 1e-5;

    let q_node = profile.qw_cumul[n];
    let bed_slope = profile.bed_slope[n];
    let gsd = profile.nodes[n].gsd.clone();

    let q = {
        let ch = &profile.nodes[n].xs.channels[ch_idx];
        q_node * ch.q_prop
    };

    let mut qb_at = |profile: &mut Profile, width: f64| -> Result<f64> {
        let ch = &mut profile.nodes[n].xs.channels[ch_idx];
        ch.width = width;
        find_stable(ch, q, &gsd, bed_slope)?;
        ch.wilcock_crowe_capacity(&gsd);
        Ok(ch.qb_cap)
    };

    let mut p = 4.0 * q.max(0.0).sqrt();
    let plus = qb_at(profile, p * 1.001)?;
    let minus = qb_at(profile, p * 0.999)?;
    let mut gradient_prev = plus - minus;
    let mut p1 = p;

    p += if gradient_prev > 0.0 { 0.25 * p } else { -0.25 * p };
    let plus = qb_at(profile, p * 1.001)?;
    let minus = qb_at(profile, p * 0.999)?;
    let mut gradient = plus - minus;
    let mut p2 = p;

    let mut guard = 0;
    while gradient / gradient_prev > 0.0 {
        gradient_prev = gradient;
        p1 = p;
        p += if gradient > 0.0 { 0.25 * p } else { -0.25 * p };
        let plus = qb_at(profile, p * 1.001)?;
        let minus = qb_at(profile, p * 0.999)?;
        gradient = plus - minus;
        p2 = p;

        guard += 1;
        if guard > 200 {
            warn!(node = n, channel = ch_idx, "regimeModel bracket search exceeded guard");
            break;
        }
    }

    let mut p_upper = p1.max(p2);
    let mut p_lower = p1.min(p2);
    let mut p_mid = 0.5 * (p_upper + p_lower);
    let mut converg = (p_upper - p_lower) / p_mid.max(1e-9);

    let mut iter = 0;
    while converg > TOL {
        let plus = qb_at(profile, p_mid * 1.001)?;
        let minus = qb_at(profile, p_mid * 0.999)?;
        let grad = plus - minus;
        if grad > 0.0 {
            p_lower = p_mid;
        } else {
            p_upper = p_mid;
        }
        p_mid = 0.5 * (p_upper + p_lower);
        converg = (p_upper - p_lower) / p_mid.max(1e-9);

        iter += 1;
        if iter > 500 {
            warn!(node = n, channel = ch_idx, "regimeModel bisection exceeded iteration budget");
            break;
        }
    }

    let ch = &mut profile.nodes[n].xs.channels[ch_idx];
    ch.width = p_mid;
    ch.bank_height = ch.hmax + deg_to_rad(ch.theta).sin() * ((ch.geom.b2b - ch.width) / 2.0);
    find_stable(ch, q, &gsd, bed_slope)?;
    Ok(())
}

/// Advance the regime assessment by one node, marching upstream from
/// `nnodes - 2` and wrapping to `2` (§4.7). No-op on profiles with fewer
/// than 4 nodes.
pub fn set_regime_width(profile: &mut Profile) -> Result<()> {
    let n = profile.regime_counter;
    if profile.nnodes() < 4 {
        return Ok(());
    }

    let old_bank_height = profile.nodes[n]
        .xs
        .channels
        .iter()
        .map(|c| c.bank_height)
        .fold(0.0_f64, f64::max);
    let old_area = profile.nodes[n].xs.total_flow_area();

    profile.nodes[n].xs.regime_reset();
    regime_model(profile, n, 0)?;
    {
        let node = &mut profile.nodes[n];
        let idx = node.xs.main_channel();
        node.xs.channels[idx].update_geometry();
    }

    for _ in 0..SPLIT_SWEEPS {
        for ch_idx in 0..profile.nodes[n].xs.num_channels().min(10) {
            let split_ratio: f64 = profile.rng_mut().gen_range(0.0..1.0);
            let aspect = profile.nodes[n].xs.channels[ch_idx].aspect;
            let num_channels = profile.nodes[n].xs.num_channels();

            if aspect > ASPECT_TOL && num_channels < 10 {
                let parent_q_prop = profile.nodes[n].xs.channels[ch_idx].q_prop;
                let mut new_channel = profile.nodes[n].xs.channels[ch_idx].clone();
                new_channel.q_prop = split_ratio * parent_q_prop;
                profile.nodes[n].xs.channels.push(new_channel);
                let new_idx = profile.nodes[n].xs.num_channels() - 1;

                regime_model(profile, n, new_idx)?;
                profile.nodes[n].xs.channels[ch_idx].q_prop = (1.0 - split_ratio) * parent_q_prop;
                regime_model(profile, n, ch_idx)?;
            }

            for ch in &mut profile.nodes[n].xs.channels {
                ch.update_geometry();
            }
        }
    }

    if profile.step_counter > 260 {
        let new_bank_height = profile.nodes[n]
            .xs
            .channels
            .iter()
            .map(|c| c.bank_height)
            .fold(0.0_f64, f64::max);
        let new_area = profile.nodes[n].xs.total_flow_area();

        let delta_area = old_area - new_area;
        let mut delta_eta = new_bank_height - old_bank_height;
        if n + 1 < profile.nnodes() {
            let fp_width = profile.nodes[n + 1].xs.channels[0].fp_width;
            delta_eta += delta_area / fp_width.max(1e-6);
        }

        let reach_drop = profile.bed_slope[n] * profile.dx * profile.nodes[n].sinuosity;
        if reach_drop.abs() > 1e-9 {
            profile.nodes[n].sinuosity *= (reach_drop + delta_eta) / reach_drop;
        }
        profile.clamp_sinuosity(n);
    }

    if profile.regime_counter >= 1 {
        profile.regime_counter -= 1;
    }
    if profile.regime_counter < 2 {
        profile.regime_counter = profile.nnodes().saturating_sub(2);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_crit_is_positive_below_friction_angle() {
        let crit = bank_crit(0.06, 30.0);
        assert!(crit > 0.0);
    }

    #[test]
    fn bank_crit_vanishes_at_friction_angle() {
        let crit = bank_crit(0.06, PHI);
        assert!(crit.abs() < 1e-6);
    }
}
