//! Critical-depth finder (`xsCritDepth`, §4.3).
//!
//! Three branches selected by the overbank state and the dimensionless
//! group `k = g*w^2*H_bank^3 / Q^2`. The branch structure is fragile by
//! design — see the design document's note that property tests must cover
//! crossings near `k = 1` and near `k = max C`.

use crate::section::Channel;
use crate::{GrateError, Result, G};

const SCAN_POINTS: [f64; 16] = [
    1.0001, 1.0005, 1.001, 1.005, 1.01, 1.02, 1.03, 1.04, 1.05, 1.06, 1.07, 1.1, 1.2, 1.5, 2.0, 3.0,
];

/// Compound-channel energy-derivative coefficient `C(y_r)`, shared by all
/// three branches.
fn c_of_yr(y_r: f64, b_r: f64, b_f: f64, m: f64) -> f64 {
    1.0 / (y_r + 2.0 * b_r * (y_r - 1.0))
        * ((m / y_r).powi(2) + ((1.0 - m) / (y_r - 1.0)).powi(2) * (0.5 * b_r))
        + 2.0 * m * (1.0 - m) / 3.0
            * (y_r + 2.0 * b_r * (y_r - 1.0))
            * (5.0 / (y_r * (y_r - 1.0)) - 2.0 / (b_f + y_r - 1.0))
            * ((m / y_r) - (1.0 - m) / (y_r - 1.0) * 0.5 * b_r)
}

/// Bisect the fixed-point relation `y_r = y*(y_r)` in `[1.0001, 5]`,
/// returning the relative depth `y_r = d / bank_height`.
fn solve_yr(bank_height: f64, depth: f64, b_r: f64, b_f: f64, m: f64, c: f64) -> f64 {
    let mut upper = 5.0_f64;
    let mut lower = 1.0001_f64;
    let mut y_r = 1.1_f64;
    let mut converg = 1.0_f64;
    let mut iter = 0;

    while converg > 1e-3 && iter < 50 {
        if converg > 0.0 {
            upper = y_r;
        } else {
            lower = y_r;
        }
        y_r = 0.5 * (upper + lower);

        let y_star = (2.0 * b_r) / (2.0 * b_r + 1.0)
            + 1.0 / c
                * (2.0 * b_r + 1.0)
                * ((m / depth).powi(2) + ((1.0 - m) / (y_r - 1.0)).powi(2) * (0.5 * b_r))
            + (2.0 * m * (1.0 - m)) / 3.0
                * c
                * (2.0 * b_r + 1.0)
                * (5.0 / y_r * (y_r - 1.0) - 2.0 / (b_f + y_r - 1.0))
                * (m / y_r - (1.0 - m) / (y_r - 1.0) * 1.0 / (2.0 * b_r));

        converg = (y_r - y_star).abs();
        iter += 1;
    }
    let _ = bank_height;
    y_r
}

/// Compute the critical depth for a single channel at cumulative
/// discharge `q`, mutating `channel.crit_depth`. `fp_width`/`bed_width`
/// feed the compound-channel width ratio `b_r`.
pub fn critical_depth(
    channel: &mut Channel,
    q: f64,
    fp_width: f64,
    node: usize,
) -> Result<f64> {
    let bank_height = channel.bank_height;
    let bed_width = channel.width;
    let overbank = channel.overbank;

    let b_f = (fp_width - bed_width) / bank_height;
    let n_r = 0.05_f64;

    let (m, k) = if overbank {
        let b_r = (fp_width - bed_width) / bed_width;
        let m = 1.0
            / (1.0
                + 2.0 * n_r * (channel.geom.flow_area[1] / channel.geom.flow_area[0]).powf(1.6667)
                    * (channel.geom.flow_perim[0] / channel.geom.flow_perim[1]).powf(0.6667));
        let k = G * bed_width.powi(2) * bank_height.powi(3) / (q * q);
        (m, k)
    } else {
        (1.0, G * bed_width.powi(2) / (q * q))
    };

    let b_r = if overbank {
        (fp_width - bed_width) / bed_width
    } else {
        1.0
    };
    let y_r_nominal = if overbank {
        channel.depth / bank_height
    } else {
        1.0
    };
    let c = c_of_yr(y_r_nominal.max(1.0001), b_r, b_f, m);

    if k < 1.0 && overbank {
        // Branch 1: single supra-floodplain root.
        let y_r = solve_yr(bank_height, channel.depth.max(1e-6), b_r, b_f, m, c);
        let depth = y_r * bank_height;
        channel.crit_depth = depth;
        return Ok(depth);
    }

    if !overbank {
        // Branch 2: in-bank flow, bisect absolute depth.
        let mut ymax = bank_height + 1.0;
        let ymin0 = 0.15_f64;
        let mut expansions = 0;
        loop {
            channel.depth = ymax;
            channel.update_geometry();
            let ff = q / channel.geom.flow_area[2] / (G * channel.geom.hyd_radius).sqrt() - 1.0;
            if ff <= 0.0 {
                break;
            }
            ymax *= 1.5;
            expansions += 1;
            if expansions > 50 {
                return Err(GrateError::Convergence {
                    routine: "xsCritDepth(in-bank expansion)",
                    node,
                    iterations: expansions,
                });
            }
        }

        let mut ymin = ymin0;
        let mut y1 = 0.5 * (ymin + ymax);
        let mut iter = 0;
        loop {
            channel.depth = y1;
            channel.update_geometry();
            let ff = q / channel.geom.flow_area[2] / (G * channel.geom.hyd_radius).sqrt() - 1.0;
            if ff < 0.0 {
                ymax = y1;
            } else {
                ymin = y1;
            }
            let y2 = 0.5 * (ymin + ymax);
            let dy = y2 - y1;
            if (dy / y2).abs() < 1e-3 {
                channel.crit_depth = y2;
                return Ok(y2);
            }
            y1 = y2;
            iter += 1;
            if iter > 50 {
                return Err(GrateError::Convergence {
                    routine: "xsCritDepth(in-bank bisection)",
                    node,
                    iterations: iter,
                });
            }
        }
    }

    // Branch 3: overbank, but with a sub-bank root possible.
    let c_max = SCAN_POINTS
        .iter()
        .skip(1)
        .map(|&y_r| c_of_yr(y_r, b_r, b_f, m))
        .fold(f64::MIN, f64::max);

    let y_c1 = (q * q / (G * bed_width.powi(2))).powf(0.334);

    if k > c_max {
        channel.crit_depth = y_c1;
        return Ok(y_c1);
    }

    let y_c3 = solve_yr(bank_height, channel.depth.max(1e-6), b_r, b_f, m, c) * bank_height;

    let mut y_r = 1.001_f64;
    let mut c_scan = 1.5_f64;
    let mut iter = 0;
    while c_scan < k {
        c_scan = c_of_yr(y_r, b_r, b_f, m);
        y_r *= 1.01;
        iter += 1;
        if iter > 10_000 {
            return Err(GrateError::Convergence {
                routine: "xsCritDepth(overbank marching scan)",
                node,
                iterations: iter,
            });
        }
    }
    let y_c2 = y_r * bank_height;

    let depth = if channel.depth > bank_height {
        y_c3
    } else if (channel.depth - bank_height).abs() < 1e-9 {
        y_c2
    } else {
        y_c1
    };
    channel.crit_depth = depth;
    Ok(depth)
}
