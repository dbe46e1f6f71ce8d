//! Parsing of the reasoning service's structured output.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::types::{SelectedTrack, SelectionError, ToolInvocation, ValidationStatus};
use crate::criteria::SelectionCriteria;

pub const SOURCE_CATALOG: &str = "catalog";
pub const SOURCE_REASONING_SERVICE: &str = "reasoning_service";
pub const DEFAULT_ROTATION_CATEGORY: &str = "unassigned";

/// Tracks, reasoning and self-reported tool log from one response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSelection {
    pub tracks: Vec<SelectedTrack>,
    pub reasoning: String,
    pub tool_calls: Vec<ToolInvocation>,
}

/// Track entry as the model writes it. Ids and numbers may arrive as either
/// JSON strings or JSON numbers.
#[derive(Debug, Deserialize)]
struct RawTrack {
    #[serde(default, alias = "id", deserialize_with = "string_or_number")]
    track_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    album: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    bpm: Option<f64>,
    #[serde(default)]
    genre: Option<String>,
    #[serde(default, deserialize_with = "year_or_string")]
    year: Option<i32>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default, alias = "duration", deserialize_with = "number_or_string")]
    duration_seconds: Option<f64>,
    #[serde(default)]
    rotation_category: Option<String>,
    #[serde(default, alias = "reason")]
    selection_reason: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn number_or_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(number.filter(|v| v.is_finite()))
}

fn year_or_string<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Some(Value::String(s)) => s.trim().parse::<i32>().ok(),
        _ => None,
    })
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").ok())
        .as_ref()
}

/// Find the JSON object in a model reply.
///
/// Accepts a bare object, a fenced code block, or an object embedded in prose.
pub fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(re) = fence_regex() {
        for captures in re.captures_iter(trimmed) {
            if let Some(body) = captures.get(1) {
                if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(body.as_str()) {
                    return Some(value);
                }
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Collect every track id mentioned in a catalog tool result.
pub fn collect_track_ids(output: &str, ids: &mut HashSet<String>) {
    fn walk(value: &Value, ids: &mut HashSet<String>) {
        match value {
            Value::Object(map) => {
                for (key, v) in map {
                    if key == "track_id" || key == "id" {
                        match v {
                            Value::String(s) => {
                                ids.insert(s.clone());
                            }
                            Value::Number(n) => {
                                ids.insert(n.to_string());
                            }
                            _ => {}
                        }
                    }
                    walk(v, ids);
                }
            }
            Value::Array(items) => items.iter().for_each(|v| walk(v, ids)),
            _ => {}
        }
    }

    if let Ok(value) = serde_json::from_str::<Value>(output) {
        walk(&value, ids);
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_tool_log(value: &Value) -> Vec<ToolInvocation> {
    let Some(items) = value.get("tool_calls").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let name = item
                .get("tool_name")
                .or_else(|| item.get("name"))
                .and_then(Value::as_str)?;
            Some(ToolInvocation {
                tool_name: name.to_string(),
                arguments: item
                    .get("arguments")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default())),
                succeeded: item.get("succeeded").and_then(Value::as_bool).unwrap_or(true),
                summary: item
                    .get("summary")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        })
        .collect()
}

/// Parse a model reply into playlist tracks.
///
/// Excluded and duplicate ids are dropped and positions renumbered from 1.
/// Tracks whose id appears in `catalog_ids` are marked verified.
///
/// # Errors
/// - [`SelectionError::MalformedResponse`] when no JSON object with a
///   `tracks` array can be found
/// - [`SelectionError::NoMatch`] when the array yields no usable tracks
pub fn parse_selection(
    content: &str,
    criteria: &SelectionCriteria,
    catalog_ids: &HashSet<String>,
) -> Result<ParsedSelection, SelectionError> {
    let value = extract_json(content).ok_or_else(|| {
        SelectionError::MalformedResponse("no JSON object in response".to_string())
    })?;

    let raw_tracks = value
        .get("tracks")
        .and_then(Value::as_array)
        .ok_or_else(|| SelectionError::MalformedResponse("missing 'tracks' array".to_string()))?;

    let mut seen = HashSet::new();
    let mut tracks = Vec::with_capacity(raw_tracks.len());

    for (index, item) in raw_tracks.iter().enumerate() {
        let raw: RawTrack = match serde_json::from_value(item.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(index, "Skipping unreadable track entry: {}", e);
                continue;
            }
        };

        let Some(track_id) = non_blank(raw.track_id) else {
            tracing::warn!(index, "Skipping track without id");
            continue;
        };
        if criteria.excluded_track_ids.contains(&track_id) {
            tracing::warn!(track_id = %track_id, "Dropping excluded track");
            continue;
        }
        if !seen.insert(track_id.clone()) {
            tracing::debug!(track_id = %track_id, "Dropping duplicate track");
            continue;
        }

        let title = non_blank(raw.title);
        let artist = non_blank(raw.artist);
        let duration = raw
            .duration_seconds
            .filter(|d| d.is_finite() && *d >= 1.0)
            .map(|d| d.round() as u32);

        let verified = catalog_ids.contains(&track_id);
        let complete = title.is_some() && artist.is_some() && duration.is_some();
        let validation_status = match (complete, verified) {
            (false, _) => ValidationStatus::Incomplete,
            (true, true) => ValidationStatus::Verified,
            (true, false) => ValidationStatus::Unverified,
        };

        tracks.push(SelectedTrack {
            track_id,
            title: title.unwrap_or_else(|| "Unknown title".to_string()),
            artist: artist.unwrap_or_else(|| "Unknown artist".to_string()),
            album: non_blank(raw.album).unwrap_or_default(),
            bpm: raw.bpm.filter(|b| b.is_finite() && *b > 0.0),
            genre: non_blank(raw.genre),
            year: raw.year,
            country: non_blank(raw.country),
            duration_seconds: duration.unwrap_or(1),
            rotation_category: non_blank(raw.rotation_category)
                .unwrap_or_else(|| DEFAULT_ROTATION_CATEGORY.to_string()),
            position: tracks.len() + 1,
            selection_reason: non_blank(raw.selection_reason).unwrap_or_default(),
            validation_status,
            metadata_source: if verified {
                SOURCE_CATALOG
            } else {
                SOURCE_REASONING_SERVICE
            }
            .to_string(),
        });
    }

    if tracks.is_empty() {
        return Err(SelectionError::NoMatch);
    }

    Ok(ParsedSelection {
        tracks,
        reasoning: value
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        tool_calls: parse_tool_log(&value),
    })
}
