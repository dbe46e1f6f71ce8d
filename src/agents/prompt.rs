//! Prompt construction for track selection.

use std::fmt::{self, Write as _};

use crate::criteria::SelectionCriteria;

/// System prompt sent ahead of every selection request.
pub const SYSTEM_PROMPT: &str = "You are a music director building radio playlists from a station catalog. \
Use the catalog tools to find real tracks and respond only with the JSON object requested.";

/// Text and declared tools for one reasoning-service call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPayload {
    pub prompt: String,
    pub tools: Vec<String>,
}

fn percent(value: f64) -> String {
    format!("{:.0}%", value * 100.0)
}

/// Render the selection prompt.
///
/// A `template_override` is returned unmodified and nothing else is rendered.
pub fn build(
    criteria: &SelectionCriteria,
    target_count: usize,
    tools: &[String],
    template_override: Option<&str>,
) -> RequestPayload {
    let prompt = match template_override {
        Some(template) => template.to_string(),
        // Writing to a String never fails.
        None => render(criteria, target_count, tools).unwrap_or_default(),
    };

    RequestPayload {
        prompt,
        tools: tools.to_vec(),
    }
}

fn render(
    criteria: &SelectionCriteria,
    target_count: usize,
    tools: &[String],
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "Select exactly {} tracks for this playlist.", target_count)?;

    writeln!(out, "\n## Tempo")?;
    match criteria.bpm_band() {
        Some((min, max)) => {
            writeln!(out, "Overall BPM band: {}-{} BPM", min, max)?;
            for range in &criteria.bpm_ranges {
                writeln!(
                    out,
                    "- {}-{}: {}-{} BPM",
                    range.start, range.end, range.min, range.max
                )?;
            }
        }
        None => writeln!(out, "No tempo constraint.")?,
    }

    if !criteria.genres.is_empty() {
        writeln!(out, "\n## Genre mix (target ± tolerance)")?;
        for (name, genre) in &criteria.genres {
            writeln!(
                out,
                "- {}: {} ± {} (acceptable {}-{})",
                name,
                percent(genre.target),
                percent(genre.tolerance),
                percent(genre.lower()),
                percent(genre.upper())
            )?;
        }
    }

    if !criteria.eras.is_empty() {
        writeln!(out, "\n## Era mix (target ± tolerance)")?;
        for (label, era) in &criteria.eras {
            writeln!(
                out,
                "- {} ({}-{}): {} ± {} (acceptable {}-{})",
                label,
                era.min_year,
                era.max_year,
                percent(era.target),
                percent(era.tolerance),
                percent(era.lower()),
                percent(era.upper())
            )?;
        }
    }

    writeln!(out, "\n## Domestic content (NON-NEGOTIABLE)")?;
    writeln!(
        out,
        "At least {} of the tracks MUST have country \"{}\". This minimum is a hard requirement and is never relaxed; the tempo, genre and era bands above are targets.",
        percent(criteria.domestic_min),
        criteria.domestic_marker
    )?;

    if !criteria.rotation_targets.is_empty() {
        writeln!(out, "\n## Rotation")?;
        for (category, share) in &criteria.rotation_targets {
            writeln!(out, "- {}: {}", category, percent(*share))?;
        }
    }

    if !criteria.energy_notes.is_empty() {
        writeln!(out, "\n## Energy flow")?;
        for note in &criteria.energy_notes {
            writeln!(out, "- {}", note)?;
        }
    }

    if criteria.no_repeat_hours > 0 {
        writeln!(
            out,
            "\nDo not pick tracks played in the last {} hours.",
            criteria.no_repeat_hours
        )?;
    }

    if !criteria.excluded_track_ids.is_empty() {
        let excluded: Vec<&str> = criteria
            .excluded_track_ids
            .iter()
            .map(String::as_str)
            .collect();
        writeln!(out, "\nNever select these track ids: {}", excluded.join(", "))?;
    }

    if !tools.is_empty() {
        writeln!(out, "\n## Tools")?;
        writeln!(
            out,
            "You may call: {}. Only select tracks you found in the catalog.",
            tools.join(", ")
        )?;
    }

    out.push_str(OUTPUT_INSTRUCTIONS);
    Ok(out)
}

const OUTPUT_INSTRUCTIONS: &str = r#"
## Output
Respond with a single JSON object and nothing else:
{
    "tracks": [
        {
            "track_id": "catalog id",
            "title": "...",
            "artist": "...",
            "album": "...",
            "bpm": 120,
            "genre": "...",
            "year": 1999,
            "country": "CA",
            "duration_seconds": 210,
            "rotation_category": "...",
            "selection_reason": "why this track fits"
        }
    ],
    "reasoning": "how the playlist meets the constraints"
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::{BpmRange, EraTarget, GenreTarget};

    fn criteria() -> SelectionCriteria {
        SelectionCriteria::new(0.3)
            .with_bpm_range(BpmRange::new("06:00", "09:00", 100, 120))
            .with_bpm_range(BpmRange::new("09:00", "12:00", 110, 130))
            .with_genre("Rock", GenreTarget::new(0.4, 0.1))
            .with_era("90s", EraTarget::new(1990, 1999, 0.25, 0.05))
    }

    fn tools() -> Vec<String> {
        vec!["search_catalog".to_string(), "list_genres".to_string()]
    }

    #[test]
    fn test_bpm_band_spans_all_ranges() {
        let payload = build(&criteria(), 12, &tools(), None);
        assert!(payload.prompt.contains("Overall BPM band: 100-130 BPM"));
        assert!(payload.prompt.contains("06:00-09:00: 100-120 BPM"));
    }

    #[test]
    fn test_bands_rendered_as_percentages() {
        let payload = build(&criteria(), 12, &tools(), None);
        assert!(payload.prompt.contains("Rock: 40% ± 10% (acceptable 30%-50%)"));
        assert!(payload.prompt.contains("90s (1990-1999): 25% ± 5% (acceptable 20%-30%)"));
    }

    #[test]
    fn test_domestic_minimum_is_non_negotiable() {
        let payload = build(&criteria(), 12, &tools(), None);
        assert!(payload.prompt.contains("NON-NEGOTIABLE"));
        assert!(payload.prompt.contains("At least 30% of the tracks MUST have country \"CA\""));
    }

    #[test]
    fn test_output_shape_and_tools_listed() {
        let payload = build(&criteria(), 12, &tools(), None);
        assert!(payload.prompt.contains("Select exactly 12 tracks"));
        assert!(payload.prompt.contains("\"tracks\""));
        assert!(payload.prompt.contains("\"reasoning\""));
        assert!(payload.prompt.contains("You may call: search_catalog, list_genres."));
        assert_eq!(payload.tools, tools());
    }

    #[test]
    fn test_override_returned_unmodified() {
        let template = "Pick {count} songs. {literal braces}";
        let payload = build(&criteria(), 12, &tools(), Some(template));
        assert_eq!(payload.prompt, template);
        assert_eq!(payload.tools, tools());
    }

    #[test]
    fn test_exclusions_listed() {
        let payload = build(&criteria().with_excluded("trk-9"), 5, &[], None);
        assert!(payload.prompt.contains("Never select these track ids: trk-9"));
        assert!(!payload.prompt.contains("## Tools"));
    }
}
