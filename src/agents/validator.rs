//! Satisfaction scoring against the original, unrelaxed criteria.

use serde::Serialize;

use super::types::SelectedTrack;
use crate::criteria::SelectionCriteria;

/// Per-component scores. A component is `None` when it could not be assessed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub bpm: Option<f64>,
    pub genre: Option<f64>,
    pub domestic: Option<f64>,
    pub overall: f64,
}

/// Score `tracks` in `[0, 1]`. Empty input scores exactly 0.0.
pub fn score(tracks: &[SelectedTrack], original: &SelectionCriteria) -> f64 {
    score_breakdown(tracks, original).overall
}

/// Component scores averaged over the components that apply.
///
/// Each component only counts tracks carrying the relevant attribute.
pub fn score_breakdown(tracks: &[SelectedTrack], original: &SelectionCriteria) -> ScoreBreakdown {
    if tracks.is_empty() {
        return ScoreBreakdown::default();
    }

    let bpm = bpm_component(tracks, original);
    let genre = genre_component(tracks, original);
    let domestic = domestic_component(tracks, original);

    let present: Vec<f64> = [bpm, genre, domestic].into_iter().flatten().collect();
    let overall = if present.is_empty() {
        0.0
    } else {
        (present.iter().sum::<f64>() / present.len() as f64).clamp(0.0, 1.0)
    };

    ScoreBreakdown {
        bpm,
        genre,
        domestic,
        overall,
    }
}

fn bpm_component(tracks: &[SelectedTrack], criteria: &SelectionCriteria) -> Option<f64> {
    if criteria.bpm_ranges.is_empty() {
        return None;
    }
    let bpms: Vec<f64> = tracks.iter().filter_map(|t| t.bpm).collect();
    if bpms.is_empty() {
        return None;
    }
    let within = bpms.iter().filter(|b| criteria.bpm_in_range(**b)).count();
    Some(within as f64 / bpms.len() as f64)
}

fn genre_component(tracks: &[SelectedTrack], criteria: &SelectionCriteria) -> Option<f64> {
    if criteria.genres.is_empty() {
        return None;
    }
    let genres: Vec<&str> = tracks.iter().filter_map(|t| t.genre.as_deref()).collect();
    if genres.is_empty() {
        return None;
    }

    let total = genres.len() as f64;
    let scores: Vec<f64> = criteria
        .genres
        .iter()
        .map(|(name, target)| {
            let count = genres
                .iter()
                .filter(|g| g.trim().eq_ignore_ascii_case(name.trim()))
                .count();
            let share = count as f64 / total;
            let (lower, upper) = (target.lower(), target.upper());
            if share >= lower && share <= upper {
                1.0
            } else {
                let distance = if share < lower {
                    lower - share
                } else {
                    share - upper
                };
                (1.0 - distance).max(0.0)
            }
        })
        .collect();

    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

fn domestic_component(tracks: &[SelectedTrack], criteria: &SelectionCriteria) -> Option<f64> {
    let countries: Vec<&str> = tracks.iter().filter_map(|t| t.country.as_deref()).collect();
    if countries.is_empty() {
        return None;
    }
    if criteria.domestic_min <= 0.0 {
        return Some(1.0);
    }
    let domestic = countries.iter().filter(|c| criteria.is_domestic(c)).count();
    let actual = domestic as f64 / countries.len() as f64;
    Some(if actual >= criteria.domestic_min {
        1.0
    } else {
        actual / criteria.domestic_min
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::{BpmRange, GenreTarget};
    use crate::testing::track;

    fn criteria() -> SelectionCriteria {
        SelectionCriteria::new(0.30).with_bpm_range(BpmRange::new("06:00", "10:00", 100, 130))
    }

    fn tracks_with_domestic(total: usize, with_country: usize, domestic: usize) -> Vec<SelectedTrack> {
        (0..total)
            .map(|i| {
                let mut t = track(&format!("t{}", i), 100.0 + i as f64 * 2.5);
                t.country = if i < domestic {
                    Some("CA".to_string())
                } else if i < with_country {
                    Some("US".to_string())
                } else {
                    None
                };
                t
            })
            .collect()
    }

    #[test]
    fn test_all_components_satisfied() {
        let tracks = tracks_with_domestic(12, 12, 4);
        assert!((score(&tracks, &criteria()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_domestic_shortfall_forces_relaxation() {
        let tracks = tracks_with_domestic(12, 10, 1);
        let breakdown = score_breakdown(&tracks, &criteria());
        assert_eq!(breakdown.bpm, Some(1.0));
        let domestic = breakdown.domestic.unwrap();
        assert!((domestic - 1.0 / 3.0).abs() < 1e-9);
        assert!(breakdown.overall < 0.80);
        assert!((breakdown.overall - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_tracks_score_zero() {
        assert_eq!(score(&[], &criteria()), 0.0);
    }

    #[test]
    fn test_scored_against_original_windows() {
        let original = criteria();
        let relaxed = original.relaxed(1);
        let tracks = vec![track("fast", 135.0)];
        assert_eq!(score_breakdown(&tracks, &original).bpm, Some(0.0));
        assert_eq!(score_breakdown(&tracks, &relaxed).bpm, Some(1.0));
    }

    #[test]
    fn test_genre_distance_from_band() {
        let criteria = SelectionCriteria::new(0.0)
            .with_genre("Rock", GenreTarget::new(0.5, 0.1))
            .with_genre("Jazz", GenreTarget::new(0.2, 0.05));
        let tracks: Vec<SelectedTrack> = (0..10)
            .map(|i| {
                let mut t = track(&format!("t{}", i), 120.0);
                t.genre = Some(if i < 8 { "rock" } else { "Pop" }.to_string());
                t
            })
            .collect();
        // Rock 0.8 vs [0.4, 0.6] -> 0.8; Jazz 0.0 vs [0.15, 0.25] -> 0.85
        let genre = score_breakdown(&tracks, &criteria).genre.unwrap();
        assert!((genre - 0.825).abs() < 1e-9);
    }

    #[test]
    fn test_missing_components_omitted() {
        let mut t = track("a", 120.0);
        t.country = None;
        let breakdown = score_breakdown(&[t], &criteria());
        assert_eq!(breakdown.domestic, None);
        assert_eq!(breakdown.genre, None);
        assert_eq!(breakdown.overall, 1.0);
    }

    #[test]
    fn test_zero_domestic_min_always_satisfied() {
        let tracks = tracks_with_domestic(5, 5, 0);
        let breakdown = score_breakdown(&tracks, &SelectionCriteria::new(0.0));
        assert_eq!(breakdown.domestic, Some(1.0));
    }
}
