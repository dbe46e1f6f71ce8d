//! Selection criteria - the immutable constraint snapshot for one playlist.
//!
//! # Key Concepts
//! - Relaxable bands: BPM windows, genre mix, era mix
//! - Hard constraint: the domestic-content minimum, never relaxed
//! - Relaxation: a pure transform producing a new criteria value per iteration

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// BPM widening applied from relaxation level 1 onwards.
pub const BPM_RELAXATION_STEP: u32 = 10;

/// Genre tolerance widening applied from relaxation level 2 onwards.
pub const GENRE_RELAXATION_STEP: f64 = 0.05;

/// Era tolerance widening applied from relaxation level 3 onwards.
pub const ERA_RELAXATION_STEP: f64 = 0.05;

/// Highest relaxation level with its own step; later iterations reuse it.
pub const MAX_RELAXATION_LEVEL: u32 = 3;

/// Errors raised when criteria violate their invariants.
#[derive(Debug, Error, PartialEq)]
pub enum CriteriaError {
    #[error("BPM range {start}-{end} has min {min} greater than max {max}")]
    InvertedBpmRange {
        start: String,
        end: String,
        min: u32,
        max: u32,
    },

    #[error("Invalid time '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("{field} must lie in [0, 1], got {value}")]
    FractionOutOfRange { field: String, value: f64 },

    #[error("Era '{label}' has min year {min_year} after max year {max_year}")]
    InvertedEra {
        label: String,
        min_year: i32,
        max_year: i32,
    },
}

/// A time-windowed tempo band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BpmRange {
    /// Window start, `HH:MM`
    pub start: String,
    /// Window end, `HH:MM`
    pub end: String,
    pub min: u32,
    pub max: u32,
}

impl BpmRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>, min: u32, max: u32) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            min,
            max,
        }
    }

    pub fn contains(&self, bpm: f64) -> bool {
        bpm >= self.min as f64 && bpm <= self.max as f64
    }
}

/// Target share of a genre with its tolerance band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenreTarget {
    pub target: f64,
    pub tolerance: f64,
}

impl GenreTarget {
    pub fn new(target: f64, tolerance: f64) -> Self {
        Self { target, tolerance }
    }

    /// Lower bound of the accepted band, clamped to 0.
    pub fn lower(&self) -> f64 {
        (self.target - self.tolerance).max(0.0)
    }

    /// Upper bound of the accepted band, clamped to 1.
    pub fn upper(&self) -> f64 {
        (self.target + self.tolerance).min(1.0)
    }
}

/// Target share of a release era.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EraTarget {
    pub min_year: i32,
    pub max_year: i32,
    pub target: f64,
    pub tolerance: f64,
}

impl EraTarget {
    pub fn new(min_year: i32, max_year: i32, target: f64, tolerance: f64) -> Self {
        Self {
            min_year,
            max_year,
            target,
            tolerance,
        }
    }

    pub fn lower(&self) -> f64 {
        (self.target - self.tolerance).max(0.0)
    }

    pub fn upper(&self) -> f64 {
        (self.target + self.tolerance).min(1.0)
    }
}

/// Constraint snapshot for one playlist.
///
/// # Invariants
/// - every percentage and fraction lies in `[0, 1]`
/// - every BPM range has `min <= max`
/// - `domestic_min` is identical on every relaxed copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    #[serde(default)]
    pub bpm_ranges: Vec<BpmRange>,

    #[serde(default)]
    pub genres: BTreeMap<String, GenreTarget>,

    #[serde(default)]
    pub eras: BTreeMap<String, EraTarget>,

    /// Minimum fraction of tracks carrying the domestic origin marker.
    pub domestic_min: f64,

    /// Origin marker counted as domestic (compared case-insensitively).
    #[serde(default = "default_domestic_marker")]
    pub domestic_marker: String,

    #[serde(default)]
    pub energy_notes: Vec<String>,

    #[serde(default)]
    pub rotation_targets: BTreeMap<String, f64>,

    #[serde(default)]
    pub no_repeat_hours: u32,

    #[serde(default)]
    pub excluded_track_ids: BTreeSet<String>,
}

fn default_domestic_marker() -> String {
    "CA".to_string()
}

impl SelectionCriteria {
    /// Create criteria with only the hard constraint set.
    pub fn new(domestic_min: f64) -> Self {
        Self {
            bpm_ranges: Vec::new(),
            genres: BTreeMap::new(),
            eras: BTreeMap::new(),
            domestic_min,
            domestic_marker: default_domestic_marker(),
            energy_notes: Vec::new(),
            rotation_targets: BTreeMap::new(),
            no_repeat_hours: 0,
            excluded_track_ids: BTreeSet::new(),
        }
    }

    pub fn with_bpm_range(mut self, range: BpmRange) -> Self {
        self.bpm_ranges.push(range);
        self
    }

    pub fn with_genre(mut self, name: impl Into<String>, target: GenreTarget) -> Self {
        self.genres.insert(name.into(), target);
        self
    }

    pub fn with_era(mut self, label: impl Into<String>, era: EraTarget) -> Self {
        self.eras.insert(label.into(), era);
        self
    }

    pub fn with_excluded(mut self, track_id: impl Into<String>) -> Self {
        self.excluded_track_ids.insert(track_id.into());
        self
    }

    /// Check every invariant.
    pub fn validate(&self) -> Result<(), CriteriaError> {
        for range in &self.bpm_ranges {
            for time in [&range.start, &range.end] {
                NaiveTime::parse_from_str(time, "%H:%M")
                    .map_err(|_| CriteriaError::InvalidTime(time.clone()))?;
            }
            if range.min > range.max {
                return Err(CriteriaError::InvertedBpmRange {
                    start: range.start.clone(),
                    end: range.end.clone(),
                    min: range.min,
                    max: range.max,
                });
            }
        }

        check_fraction("domestic_min", self.domestic_min)?;

        for (name, genre) in &self.genres {
            check_fraction(&format!("genre '{}' target", name), genre.target)?;
            check_fraction(&format!("genre '{}' tolerance", name), genre.tolerance)?;
        }

        for (label, era) in &self.eras {
            check_fraction(&format!("era '{}' target", label), era.target)?;
            check_fraction(&format!("era '{}' tolerance", label), era.tolerance)?;
            if era.min_year > era.max_year {
                return Err(CriteriaError::InvertedEra {
                    label: label.clone(),
                    min_year: era.min_year,
                    max_year: era.max_year,
                });
            }
        }

        for (category, share) in &self.rotation_targets {
            check_fraction(&format!("rotation '{}' target", category), *share)?;
        }

        Ok(())
    }

    /// Overall BPM band actually requested: lowest min to highest max.
    pub fn bpm_band(&self) -> Option<(u32, u32)> {
        let min = self.bpm_ranges.iter().map(|r| r.min).min()?;
        let max = self.bpm_ranges.iter().map(|r| r.max).max()?;
        Some((min, max))
    }

    /// Whether `bpm` falls inside any configured window.
    pub fn bpm_in_range(&self, bpm: f64) -> bool {
        self.bpm_ranges.iter().any(|r| r.contains(bpm))
    }

    pub fn is_domestic(&self, country: &str) -> bool {
        country.trim().eq_ignore_ascii_case(self.domestic_marker.trim())
    }

    /// Derive the criteria for relaxation `iteration` from this (original) value.
    ///
    /// Steps are cumulative and always computed from `self`:
    /// 1. BPM windows widened by ±10
    /// 2. genre tolerances widened by +0.05
    /// 3. era tolerances widened by +0.05
    ///
    /// The domestic minimum, exclusions and rotation targets pass through.
    pub fn relaxed(&self, iteration: u32) -> Self {
        let level = iteration.min(MAX_RELAXATION_LEVEL);
        let mut relaxed = self.clone();

        if level >= 1 {
            for range in &mut relaxed.bpm_ranges {
                range.min = range.min.saturating_sub(BPM_RELAXATION_STEP);
                range.max = range.max.saturating_add(BPM_RELAXATION_STEP);
            }
        }

        if level >= 2 {
            for genre in relaxed.genres.values_mut() {
                genre.tolerance = (genre.tolerance + GENRE_RELAXATION_STEP).min(1.0);
            }
        }

        if level >= 3 {
            for era in relaxed.eras.values_mut() {
                era.tolerance = (era.tolerance + ERA_RELAXATION_STEP).min(1.0);
            }
        }

        relaxed
    }
}

/// Free-function form of [`SelectionCriteria::relaxed`].
pub fn relax(criteria: &SelectionCriteria, iteration: u32) -> SelectionCriteria {
    criteria.relaxed(iteration)
}

fn check_fraction(field: &str, value: f64) -> Result<(), CriteriaError> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(CriteriaError::FractionOutOfRange {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}
