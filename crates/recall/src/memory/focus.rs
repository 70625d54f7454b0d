//! Focus levels
//!
//! A focus level bundles how many results to fetch, how far back to look,
//! and how deep to follow links. Higher levels never recall less than
//! lower ones.

use chrono::Duration;
use serde::Deserialize;

use crate::error::{RecallError, Result};

/// Number of focus levels (0..=5)
pub const FOCUS_LEVELS: usize = 6;

/// One row of the focus table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FocusPreset {
    /// Maximum semantic-phase results
    pub result_limit: usize,
    /// How far back (in hours) semantic search looks
    pub time_window_hours: u64,
    /// BFS depth for link expansion
    pub link_depth: usize,
}

impl FocusPreset {
    pub const fn new(result_limit: usize, time_window_hours: u64, link_depth: usize) -> Self {
        Self {
            result_limit,
            time_window_hours,
            link_depth,
        }
    }

    pub fn time_window(&self) -> Duration {
        let max_hours = i64::MAX / 3_600_000;
        let hours = i64::try_from(self.time_window_hours)
            .unwrap_or(max_hours)
            .min(max_hours);
        Duration::hours(hours)
    }

    /// Built-in table: a day of context at level 0 up to ten years at level 5
    pub fn default_levels() -> Vec<FocusPreset> {
        vec![
            FocusPreset::new(3, 24, 0),
            FocusPreset::new(5, 24 * 7, 1),
            FocusPreset::new(10, 24 * 30, 1),
            FocusPreset::new(15, 24 * 90, 2),
            FocusPreset::new(25, 24 * 365, 2),
            FocusPreset::new(50, 24 * 3650, 3),
        ]
    }

    fn dominates(&self, lower: &FocusPreset) -> bool {
        self.result_limit >= lower.result_limit
            && self.time_window_hours >= lower.time_window_hours
            && self.link_depth >= lower.link_depth
    }
}

/// Validated, monotonic table of six focus presets
#[derive(Debug, Clone)]
pub struct FocusTable {
    levels: Vec<FocusPreset>,
}

impl FocusTable {
    /// Build a table, rejecting the wrong length or any decrease between levels
    pub fn new(levels: Vec<FocusPreset>) -> Result<Self> {
        if levels.len() != FOCUS_LEVELS {
            return Err(RecallError::Config(format!(
                "focus table needs exactly {FOCUS_LEVELS} levels, got {}",
                levels.len()
            )));
        }

        for (level, pair) in levels.windows(2).enumerate() {
            if !pair[1].dominates(&pair[0]) {
                return Err(RecallError::Config(format!(
                    "focus level {} must not recall less than level {level}",
                    level + 1
                )));
            }
        }

        Ok(Self { levels })
    }

    /// Preset for `level`; levels above the top are clamped to the top
    pub fn resolve(&self, level: usize) -> FocusPreset {
        self.levels[level.min(FOCUS_LEVELS - 1)]
    }

    pub fn levels(&self) -> &[FocusPreset] {
        &self.levels
    }
}

impl Default for FocusTable {
    fn default() -> Self {
        Self {
            levels: FocusPreset::default_levels(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_monotonic() {
        let table = FocusTable::default();
        for low in 0..FOCUS_LEVELS {
            for high in low + 1..FOCUS_LEVELS {
                let a = table.resolve(low);
                let b = table.resolve(high);
                assert!(a.result_limit <= b.result_limit);
                assert!(a.time_window() <= b.time_window());
                assert!(a.link_depth <= b.link_depth);
            }
        }
        FocusTable::new(FocusPreset::default_levels()).unwrap();
    }

    #[test]
    fn test_rejects_decreasing_depth() {
        let mut levels = FocusPreset::default_levels();
        levels[4].link_depth = 0;
        assert!(FocusTable::new(levels).is_err());
    }

    #[test]
    fn test_rejects_wrong_length() {
        let mut levels = FocusPreset::default_levels();
        levels.pop();
        assert!(FocusTable::new(levels).is_err());
    }

    #[test]
    fn test_equal_neighbours_allowed() {
        let levels = vec![FocusPreset::new(5, 24, 1); FOCUS_LEVELS];
        assert!(FocusTable::new(levels).is_ok());
    }

    #[test]
    fn test_resolve_clamps_high_levels() {
        let table = FocusTable::default();
        assert_eq!(table.resolve(99), table.resolve(5));
    }
}
