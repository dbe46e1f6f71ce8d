//! Catalog tools: search the library, list genres, find similar tracks and
//! pull rotation analytics.
//!
//! Each tool checks its arguments locally so malformed calls are reported
//! back to the model without a round trip to the catalog.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{CatalogEndpoint, Tool};

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> anyhow::Result<T> {
    serde_json::from_value(args)
        .map_err(|e| anyhow::anyhow!("Invalid arguments for {}: {}", tool, e))
}

#[derive(Debug, Deserialize, Serialize)]
struct SearchCatalogArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bpm_min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bpm_max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    year_min: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    year_max: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

/// Search the music catalog by genre, tempo, era and origin.
pub struct SearchCatalog;

#[async_trait]
impl Tool for SearchCatalog {
    fn name(&self) -> &str {
        "search_catalog"
    }

    fn description(&self) -> &str {
        "Search the station music catalog. Filter by free-text query, genre, BPM range, release year range and country of origin. Returns matching tracks with their catalog ids and metadata."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Free-text search over title and artist" },
                "genre": { "type": "string", "description": "Genre name as returned by list_genres" },
                "bpm_min": { "type": "integer", "minimum": 0 },
                "bpm_max": { "type": "integer", "minimum": 0 },
                "year_min": { "type": "integer" },
                "year_max": { "type": "integer" },
                "country": { "type": "string", "description": "ISO country code, e.g. CA" },
                "limit": { "type": "integer", "minimum": 1, "maximum": 200 }
            }
        })
    }

    async fn execute(&self, args: Value, catalog: &CatalogEndpoint) -> anyhow::Result<String> {
        let args: SearchCatalogArgs = parse_args(self.name(), args)?;
        if let (Some(min), Some(max)) = (args.bpm_min, args.bpm_max) {
            if min > max {
                anyhow::bail!("bpm_min ({}) is greater than bpm_max ({})", min, max);
            }
        }
        if let (Some(min), Some(max)) = (args.year_min, args.year_max) {
            if min > max {
                anyhow::bail!("year_min ({}) is greater than year_max ({})", min, max);
            }
        }
        catalog.call(self.name(), &serde_json::to_value(&args)?).await
    }
}

/// List genres present in the catalog with track counts.
pub struct ListGenres;

#[async_trait]
impl Tool for ListGenres {
    fn name(&self) -> &str {
        "list_genres"
    }

    fn description(&self) -> &str {
        "List every genre in the catalog with the number of tracks in each."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: Value, catalog: &CatalogEndpoint) -> anyhow::Result<String> {
        catalog.call(self.name(), &json!({})).await
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct FindSimilarArgs {
    track_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

/// Find tracks that sound like a given catalog track.
pub struct FindSimilarTracks;

#[async_trait]
impl Tool for FindSimilarTracks {
    fn name(&self) -> &str {
        "find_similar_tracks"
    }

    fn description(&self) -> &str {
        "Find catalog tracks similar to the given track id in tempo, genre and energy."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "track_id": { "type": "string", "description": "Catalog id of the seed track" },
                "limit": { "type": "integer", "minimum": 1, "maximum": 50 }
            },
            "required": ["track_id"]
        })
    }

    async fn execute(&self, args: Value, catalog: &CatalogEndpoint) -> anyhow::Result<String> {
        let args: FindSimilarArgs = parse_args(self.name(), args)?;
        if args.track_id.trim().is_empty() {
            anyhow::bail!("track_id must not be empty");
        }
        catalog.call(self.name(), &serde_json::to_value(&args)?).await
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct LibraryAnalyticsArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    since_hours: Option<u32>,
}

/// Rotation and play-history statistics for the library.
pub struct LibraryAnalytics;

#[async_trait]
impl Tool for LibraryAnalytics {
    fn name(&self) -> &str {
        "library_analytics"
    }

    fn description(&self) -> &str {
        "Return library statistics: genre and era distribution, domestic share, and tracks played within the last N hours."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "genre": { "type": "string" },
                "since_hours": { "type": "integer", "minimum": 1, "description": "Play-history window in hours" }
            }
        })
    }

    async fn execute(&self, args: Value, catalog: &CatalogEndpoint) -> anyhow::Result<String> {
        let args: LibraryAnalyticsArgs = parse_args(self.name(), args)?;
        catalog.call(self.name(), &serde_json::to_value(&args)?).await
    }
}
