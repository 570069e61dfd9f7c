//! Snapshot output (§6). Emitted at every `writeInterval`-spaced step as
//! one newline-delimited JSON object per node, matching this codebase's
//! pervasive use of `serde_json` over a bespoke binary encoding. The
//! format is round-trippable: reloading a snapshot and re-deriving its
//! fields from `(width, depth, theta, ...)` reproduces the same values
//! (invariant 6).

use serde::{Deserialize, Serialize};
use std::io::Write;

/// One per-node row of a snapshot, containing at minimum the fields named
/// in §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRow {
    pub t: f64,
    pub x: f64,
    pub eta: f64,
    pub depth: f64,
    pub wsl: f64,
    pub q: f64,
    pub v: f64,
    pub fr: f64,
    pub tau_bed: f64,
    pub tau_bank: f64,
    pub width: f64,
    pub bank_height: f64,
    pub theta: f64,
    pub d50: f64,
    pub d84: f64,
    pub d90: f64,
    pub sigma: f64,
    pub qb: f64,
}

/// Write a full snapshot (one JSON object per line) to `writer`.
pub fn write_snapshot<W: Write>(mut writer: W, rows: &[SnapshotRow]) -> std::io::Result<()> {
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Parse a newline-delimited JSON snapshot back into rows.
pub fn read_snapshot(text: &str) -> serde_json::Result<Vec<SnapshotRow>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}
