//! Discharge time series (`Qw`, §6). A hydrograph is a set of sources,
//! each keyed by its streamwise insertion coordinate; within a source,
//! records are chronologically sorted and time is interpolated linearly
//! between consecutive records.
//!
//! Parsing the on-disk line-oriented record format is out of scope for
//! this crate (§1); [`HydrographRecord`] is the parsed contract an
//! external reader hands in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One parsed hydrograph record: `(coord, timestamp, Q, group)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrographRecord {
    pub coord: f64,
    pub timestamp: DateTime<Utc>,
    pub q: f64,
    pub group: u32,
}

/// A single chronologically-sorted source time series at one streamwise
/// coordinate.
#[derive(Debug, Clone)]
struct Source {
    coord: f64,
    records: Vec<HydrographRecord>,
}

/// The full set of discharge sources for a run.
#[derive(Debug, Clone, Default)]
pub struct Hydrograph {
    sources: Vec<Source>,
}

impl Hydrograph {
    /// Build sources from records already grouped in insertion order:
    /// records with the same `coord` as the previous record extend the
    /// current source; a change in `coord` starts a new one. This mirrors
    /// the line-oriented parsing contract in §6 exactly (sources are
    /// separated by a change in coord, not re-sorted by it).
    pub fn from_records(records: Vec<HydrographRecord>) -> Self {
        let mut sources: Vec<Source> = Vec::new();
        let mut current_coord = f64::NAN;

        for record in records {
            if record.coord != current_coord || sources.is_empty() {
                sources.push(Source {
                    coord: record.coord,
                    records: Vec::new(),
                });
                current_coord = record.coord;
            }
            sources.last_mut().unwrap().records.push(record);
        }

        Self { sources }
    }

    /// Linearly interpolate discharge at `coord`'s source for time `t`.
    /// Before the first record, returns the first record's `Q`; after the
    /// last, returns the last record's `Q` (hold constant at both ends).
    pub fn discharge_at(&self, coord: f64, t: DateTime<Utc>) -> Option<f64> {
        let source = self.sources.iter().find(|s| s.coord == coord)?;
        Self::interpolate(&source.records, t)
    }

    fn interpolate(records: &[HydrographRecord], t: DateTime<Utc>) -> Option<f64> {
        if records.is_empty() {
            return None;
        }
        if t <= records[0].timestamp {
            return Some(records[0].q);
        }
        if t >= records[records.len() - 1].timestamp {
            return Some(records[records.len() - 1].q);
        }
        for pair in records.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if t >= a.timestamp && t <= b.timestamp {
                let span = (b.timestamp - a.timestamp).num_milliseconds() as f64;
                if span <= 0.0 {
                    return Some(b.q);
                }
                let frac = (t - a.timestamp).num_milliseconds() as f64 / span;
                return Some(a.q + frac * (b.q - a.q));
            }
        }
        None
    }

    /// Build `QwCumul[n]` for every node: the sum of every source's
    /// current discharge whose `coord` lies at or upstream of `x[n]`
    /// (smaller streamwise coordinate), scaled by `qw_tweak`.
    pub fn cumulative_at_nodes(&self, node_x: &[f64], t: DateTime<Utc>, qw_tweak: f64) -> Vec<f64> {
        let mut cumul = vec![0.0; node_x.len()];
        for source in &self.sources {
            let Some(q) = Self::interpolate(&source.records, t) else {
                continue;
            };
            for (n, &x) in node_x.iter().enumerate() {
                if source.coord <= x {
                    cumul[n] += q * qw_tweak;
                }
            }
        }
        cumul
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(coord: f64, hour: u32, q: f64) -> HydrographRecord {
        HydrographRecord {
            coord,
            timestamp: Utc.with_ymd_and_hms(2020, 1, 1, hour, 0, 0).unwrap(),
            q,
            group: 1,
        }
    }

    #[test]
    fn interpolates_linearly_within_a_source() {
        let hydro = Hydrograph::from_records(vec![record(0.0, 0, 10.0), record(0.0, 10, 20.0)]);
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 5, 0, 0).unwrap();
        let q = hydro.discharge_at(0.0, t).unwrap();
        assert!((q - 15.0).abs() < 1e-6);
    }

    #[test]
    fn coord_change_starts_a_new_source() {
        let hydro = Hydrograph::from_records(vec![
            record(0.0, 0, 10.0),
            record(0.0, 5, 10.0),
            record(500.0, 0, 5.0),
        ]);
        assert_eq!(hydro.source_count(), 2);
    }

    /// Invariant 4: steady, single-source, closed reach — every node
    /// upstream of the source (here, the only source) sees the same Q.
    #[test]
    fn mass_conservation_single_source() {
        let hydro = Hydrograph::from_records(vec![record(0.0, 0, 40.0), record(0.0, 10, 40.0)]);
        let node_x: Vec<f64> = (0..10).map(|n| n as f64 * 100.0).collect();
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 3, 0, 0).unwrap();
        let cumul = hydro.cumulative_at_nodes(&node_x, t, 1.0);
        for q in cumul {
            assert!((q - 40.0).abs() < 1e-9);
        }
    }
}
