//! GRATE — a one-dimensional morphodynamic river simulator.
//!
//! Given an initial longitudinal channel profile, bed-material grain-size
//! distribution, and a discharge time series, this crate advances a
//! river's water-surface profile, bed elevation, channel width and
//! grain-size composition through time. It is the coupled numerical core
//! only: XML/config parsing, the on-disk hydrograph text format and any
//! graphical front-end are external collaborators (see [`config`] and
//! [`hydrograph`] for the narrow contract they talk to).

pub mod config;
pub mod critical_depth;
pub mod gsd;
pub mod hydrograph;
pub mod preissmann;
pub mod profile;
pub mod regime;
pub mod section;
pub mod snapshot;
pub mod solver;

pub use config::{InitConfig, ProfileRow, SolverConfig};
pub use gsd::Gsd;
pub use hydrograph::{Hydrograph, HydrographRecord};
pub use profile::{Node, Profile};
pub use section::{Channel, CrossSection};
pub use snapshot::SnapshotRow;

/// Gravitational acceleration (m/s^2).
pub const G: f64 = 9.81;

/// Water density (kg/m^3).
pub const RHO: f64 = 1000.0;

/// Submerged specific gravity of quartz sediment.
pub const GS: f64 = 1.65;

/// Convert degrees to radians. `theta` and the bank friction angle `phi`
/// are stored in degrees everywhere in this crate and converted exactly
/// once, at point of use.
#[inline]
pub fn deg_to_rad(deg: f64) -> f64 {
    deg * std::f64::consts::PI / 180.0
}

/// Errors surfaced by the engine, per the taxonomy in the design document:
/// config errors are fatal at init, convergence failures name the failing
/// routine/node/iteration count, and invariant violations are always
/// fatal. Recoverable clamps (critical-depth clamp, sinuosity clamp,
/// all-zero GSD) are never represented as errors — they are applied
/// in-place and logged at `warn` via `tracing`.
#[derive(Debug, thiserror::Error)]
pub enum GrateError {
    #[error("config error: {0}")]
    Config(String),

    #[error("{routine} failed to converge at node {node} after {iterations} iterations")]
    Convergence {
        routine: &'static str,
        node: usize,
        iterations: u32,
    },

    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Crate-wide result alias, following the single-`Result`-alias convention
/// used throughout this codebase.
pub type Result<T> = std::result::Result<T, GrateError>;
