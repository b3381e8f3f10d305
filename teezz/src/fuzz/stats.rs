//! Campaign-wide counters (spec.md §4.6, §9). Grounded on
//! `original_source/fuzz/runner/fuzzrunner.py`'s `get_stats`/`_load_stats`/
//! `_save_stats`. Per spec.md §9's design note, this is a plain,
//! non-atomic struct owned by the fuzz loop and borrowed immutably by
//! everything else: the loop itself is a single `tokio` task, so there is
//! no concurrent-writer problem to solve the way the teacher's atomics-based
//! metrics does for its multi-threaded ingestion pipeline.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::call::CoverageTuple;
use crate::error::{Result, TeezzError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignStats {
    pub sequences: u64,
    pub interactions: u64,
    pub successes: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub crashtimeouts: u64,
    pub hardresets: u64,
    pub factoryresets: u64,
    pub resets: u64,
    pub crashes: u64,
    pub newcov: u64,
    pub ta_successes: u64,
    pub ta_fails: u64,
    pub elapsed_time: u64,
    #[serde(default)]
    pub cov_seen: HashSet<CoverageTuple>,
}

impl CampaignStats {
    /// Folds freshly observed coverage tuples into the seen set, bumping
    /// `newcov` once per tuple not previously seen. Returns whether any of
    /// `tuples` were new, the signal the candidate's classification
    /// (SUCCESS+new-cov vs SUCCESS+old-cov) is built on.
    pub fn record_coverage(&mut self, tuples: &[CoverageTuple]) -> bool {
        let mut any_new = false;
        for &t in tuples {
            if self.cov_seen.insert(t) {
                self.newcov += 1;
                any_new = true;
            }
        }
        any_new
    }

    /// Loads `path`, or a fresh zeroed `CampaignStats` if it does not
    /// exist yet (first run of a campaign).
    pub fn load(path: &Path) -> Result<CampaignStats> {
        if !path.exists() {
            return Ok(CampaignStats::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| TeezzError::io(path, e))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        std::fs::write(path, serialized).map_err(|e| TeezzError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_coverage_counts_each_tuple_new_exactly_once() {
        let mut stats = CampaignStats::default();
        let a = CoverageTuple(1, 2, 0, 0);
        let b = CoverageTuple(1, 2, 0, 0);
        let c = CoverageTuple(3, 4, 0, 0);

        assert!(stats.record_coverage(&[a]));
        assert!(!stats.record_coverage(&[b]));
        assert!(stats.record_coverage(&[c]));
        assert_eq!(stats.newcov, 2);
        assert_eq!(stats.cov_seen.len(), 2);
    }

    #[test]
    fn load_on_a_missing_path_returns_a_zeroed_default() {
        let dir = tempfile::tempdir().unwrap();
        let stats = CampaignStats::load(&dir.path().join("stats.json")).unwrap();
        assert_eq!(stats.sequences, 0);
        assert!(stats.cov_seen.is_empty());
    }

    #[test]
    fn save_then_load_round_trips_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let mut stats = CampaignStats::default();
        stats.sequences = 10;
        stats.crashes = 2;
        stats.elapsed_time = 3600;
        stats.record_coverage(&[CoverageTuple(1, 1, 1, 1)]);
        stats.save(&path).unwrap();

        let loaded = CampaignStats::load(&path).unwrap();
        assert_eq!(loaded.sequences, 10);
        assert_eq!(loaded.crashes, 2);
        assert_eq!(loaded.elapsed_time, 3600);
        assert_eq!(loaded.cov_seen.len(), 1);
    }
}
