//! Relaxation controller - the per-playlist selection loop.
//!
//! # Loop
//! ```text
//! iteration 0: original criteria
//! iteration 1: BPM windows ±10
//! iteration 2: + genre tolerances +0.05
//! iteration 3: + era tolerances +0.05
//! ```
//! Every result is scored against the original criteria. The first score at
//! or above the threshold ends the loop. Cost errors end it with an error;
//! other failures count as a zero-score attempt.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::agents::types::{
    AttemptRecord, RelaxationOutcome, SelectedTrack, SelectionError, SelectionRequest,
};
use crate::agents::validator;
use crate::agents::SelectionService;
use crate::budget::BudgetManager;
use crate::config::Config;
use crate::criteria::{SelectionCriteria, MAX_RELAXATION_LEVEL};
use crate::tools::DEFAULT_TOOL_NAMES;

/// Loop limits taken from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaxationSettings {
    /// Relaxation iterations after the unrelaxed attempt
    pub max_iterations: u32,
    pub satisfaction_threshold: f64,
    pub max_cost_per_request: f64,
    pub request_timeout: Duration,
    pub tools: Vec<String>,
}

impl Default for RelaxationSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RelaxationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_iterations: config.max_iterations,
            satisfaction_threshold: config.satisfaction_threshold,
            max_cost_per_request: config.max_cost_per_request,
            request_timeout: config.request_timeout(),
            tools: DEFAULT_TOOL_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One playlist to fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistJob {
    pub playlist_id: String,
    pub target_count: usize,
    pub criteria: SelectionCriteria,
}

/// Drives selection attempts for one or more playlists.
pub struct RelaxationController {
    service: Arc<dyn SelectionService>,
    budget: Arc<BudgetManager>,
    settings: RelaxationSettings,
}

impl RelaxationController {
    pub fn new(
        service: Arc<dyn SelectionService>,
        budget: Arc<BudgetManager>,
        settings: RelaxationSettings,
    ) -> Self {
        Self {
            service,
            budget,
            settings,
        }
    }

    pub fn settings(&self) -> &RelaxationSettings {
        &self.settings
    }

    /// Best-effort track list for one playlist.
    ///
    /// Empty when no attempt produced tracks.
    pub async fn run(
        &self,
        playlist_id: &str,
        criteria: &SelectionCriteria,
        target_count: usize,
    ) -> Result<Vec<SelectedTrack>, SelectionError> {
        Ok(self
            .run_detailed(playlist_id, criteria, target_count)
            .await?
            .tracks)
    }

    /// Run the loop and report every attempt.
    ///
    /// # Errors
    /// Only terminal errors: cost overruns, ledger failures, invalid
    /// requests and a missing catalog endpoint.
    pub async fn run_detailed(
        &self,
        playlist_id: &str,
        criteria: &SelectionCriteria,
        target_count: usize,
    ) -> Result<RelaxationOutcome, SelectionError> {
        let threshold = self.settings.satisfaction_threshold;
        let mut attempt_log = Vec::new();
        let mut last_success: Option<(Vec<SelectedTrack>, f64, u32)> = None;

        for iteration in 0..=self.settings.max_iterations {
            let level = iteration.min(MAX_RELAXATION_LEVEL);
            let attempt_criteria = if iteration == 0 {
                criteria.clone()
            } else {
                criteria.relaxed(iteration)
            };

            let request = SelectionRequest::new(
                playlist_id,
                attempt_criteria,
                target_count,
                self.settings.max_cost_per_request,
                self.settings.request_timeout,
            )?
            .with_tools(self.settings.tools.clone());

            tracing::info!(
                playlist_id,
                iteration,
                relaxation_level = level,
                request_id = %request.id,
                "Starting selection attempt"
            );

            match self.service.select(&request).await {
                Ok(response) => {
                    let breakdown = validator::score_breakdown(&response.tracks, criteria);
                    let score = breakdown.overall;
                    tracing::info!(
                        playlist_id,
                        iteration,
                        tracks = response.tracks.len(),
                        score,
                        bpm = ?breakdown.bpm,
                        genre = ?breakdown.genre,
                        domestic = ?breakdown.domestic,
                        "Scored selection attempt"
                    );
                    attempt_log.push(AttemptRecord {
                        iteration,
                        relaxation_level: level,
                        track_count: response.tracks.len(),
                        score,
                        cost_usd: response.cost_usd,
                        error: None,
                    });

                    if score >= threshold {
                        return Ok(RelaxationOutcome {
                            playlist_id: playlist_id.to_string(),
                            tracks: response.tracks,
                            score,
                            attempts: iteration + 1,
                            relaxation_level: level,
                            satisfied: true,
                            attempt_log,
                        });
                    }
                    last_success = Some((response.tracks, score, level));
                }
                Err(e) if e.is_terminal() => {
                    tracing::error!(playlist_id, iteration, "Selection aborted: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(playlist_id, iteration, "Selection attempt failed: {}", e);
                    attempt_log.push(AttemptRecord {
                        iteration,
                        relaxation_level: level,
                        track_count: 0,
                        score: 0.0,
                        cost_usd: 0.0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let attempts = attempt_log.len() as u32;
        let (tracks, score, relaxation_level) = last_success.unwrap_or((Vec::new(), 0.0, 0));
        tracing::warn!(
            playlist_id,
            attempts,
            score,
            threshold,
            tracks = tracks.len(),
            "Satisfaction threshold not reached, returning best effort"
        );

        Ok(RelaxationOutcome {
            playlist_id: playlist_id.to_string(),
            tracks,
            score,
            attempts,
            relaxation_level,
            satisfied: false,
            attempt_log,
        })
    }

    /// Run several playlists concurrently against the shared budget.
    ///
    /// The total budget is allocated across the jobs first. Each job's
    /// result is reported separately; one failing does not stop the others.
    pub async fn run_batch(
        &self,
        jobs: &[PlaylistJob],
    ) -> Result<Vec<Result<RelaxationOutcome, SelectionError>>, SelectionError> {
        let ids: Vec<String> = jobs.iter().map(|j| j.playlist_id.clone()).collect();
        self.budget.allocate(&ids)?;

        tracing::info!(playlists = jobs.len(), "Running playlist batch");

        let runs = jobs
            .iter()
            .map(|job| self.run_detailed(&job.playlist_id, &job.criteria, job.target_count));
        Ok(join_all(runs).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{BudgetManager, BudgetSettings, MemoryLedger, ModelPricing};
    use crate::criteria::{BpmRange, EraTarget, GenreTarget};
    use crate::testing::{track, CountingService};
    use tokio_test::{assert_err, assert_ok};

    fn criteria() -> SelectionCriteria {
        SelectionCriteria::new(0.30)
            .with_bpm_range(BpmRange::new("06:00", "10:00", 100, 130))
            .with_genre("Rock", GenreTarget::new(0.5, 0.1))
            .with_era("90s", EraTarget::new(1990, 1999, 0.3, 0.1))
    }

    fn budget() -> Arc<BudgetManager> {
        Arc::new(
            BudgetManager::open(
                BudgetSettings::default(),
                Arc::new(ModelPricing::default()),
                Box::new(MemoryLedger::new()),
            )
            .unwrap(),
        )
    }

    fn controller(service: Arc<CountingService>) -> RelaxationController {
        RelaxationController::new(service, budget(), RelaxationSettings::default())
    }

    /// Ten tracks, all in tempo, half Rock, with `domestic` Canadian.
    fn tracks(domestic: usize) -> Vec<SelectedTrack> {
        (0..10)
            .map(|i| {
                let mut t = track(&format!("t{}", i), 110.0);
                t.genre = Some(if i % 2 == 0 { "Rock" } else { "Pop" }.to_string());
                t.country = Some(if i < domestic { "CA" } else { "US" }.to_string());
                t
            })
            .collect()
    }

    #[tokio::test]
    async fn test_first_attempt_satisfies() {
        // bpm 1.0, genre 1.0, domestic 0.2/0.3 -> overall ~0.89
        let service = Arc::new(CountingService::new(vec![Ok(tracks(2))]));
        let outcome = assert_ok!(
            controller(service.clone())
                .run_detailed("morning", &criteria(), 10)
                .await
        );

        assert!(outcome.score >= 0.85);
        assert!(outcome.satisfied);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(service.calls(), 1);
        assert_eq!(service.requests()[0].criteria, criteria());
    }

    #[tokio::test]
    async fn test_relaxation_order_and_domestic_fixed() {
        let service = Arc::new(CountingService::new(vec![
            Ok(tracks(0)),
            Ok(tracks(0)),
            Ok(tracks(0)),
            Ok(tracks(0)),
        ]));
        let outcome = assert_ok!(
            controller(service.clone())
                .run_detailed("morning", &criteria(), 10)
                .await
        );

        assert!(!outcome.satisfied);
        assert_eq!(outcome.attempts, 4);

        let seen: Vec<SelectionCriteria> =
            service.requests().into_iter().map(|r| r.criteria).collect();
        assert_eq!(seen[0], criteria());
        assert_eq!((seen[1].bpm_ranges[0].min, seen[1].bpm_ranges[0].max), (90, 140));
        assert_eq!(seen[1].genres["Rock"].tolerance, 0.1);
        assert!((seen[2].genres["Rock"].tolerance - 0.15).abs() < 1e-9);
        assert_eq!(seen[2].eras["90s"].tolerance, 0.1);
        assert!((seen[3].eras["90s"].tolerance - 0.15).abs() < 1e-9);
        assert_eq!((seen[3].bpm_ranges[0].min, seen[3].bpm_ranges[0].max), (90, 140));
        for c in &seen {
            assert_eq!(c.domestic_min, 0.30);
        }
    }

    #[tokio::test]
    async fn test_stops_once_relaxed_attempt_satisfies() {
        let service = Arc::new(CountingService::new(vec![Ok(tracks(0)), Ok(tracks(3))]));
        let outcome = assert_ok!(
            controller(service.clone())
                .run_detailed("morning", &criteria(), 10)
                .await
        );
        assert!(outcome.satisfied);
        assert_eq!(outcome.relaxation_level, 1);
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn test_soft_failures_relax_and_return_last_success() {
        let service = Arc::new(CountingService::new(vec![
            Ok(tracks(0)),
            Err(SelectionError::Timeout(Duration::from_secs(1))),
            Err(SelectionError::MalformedResponse("bad".to_string())),
            Err(SelectionError::NoMatch),
        ]));
        let outcome = assert_ok!(
            controller(service.clone())
                .run_detailed("morning", &criteria(), 10)
                .await
        );

        assert_eq!(service.calls(), 4);
        assert_eq!(outcome.tracks.len(), 10);
        assert_eq!(outcome.relaxation_level, 0);
        assert!(!outcome.satisfied);
        assert_eq!(outcome.attempt_log[1].score, 0.0);
        assert!(outcome.attempt_log[3].error.is_some());
    }

    #[tokio::test]
    async fn test_unavailable_tool_moves_to_next_iteration() {
        let service = Arc::new(CountingService::new(vec![
            Err(SelectionError::ToolUnavailable("endpoint down".to_string())),
            Ok(tracks(3)),
        ]));
        let outcome = assert_ok!(
            controller(service.clone())
                .run_detailed("morning", &criteria(), 10)
                .await
        );

        assert_eq!(service.calls(), 2);
        assert!(outcome.satisfied);
        assert_eq!(outcome.relaxation_level, 1);
        assert_eq!(outcome.attempt_log[0].score, 0.0);
        assert!(outcome.attempt_log[0].error.is_some());
    }

    #[tokio::test]
    async fn test_no_success_returns_empty() {
        let service = Arc::new(CountingService::new(
            (0..4).map(|_| Err(SelectionError::NoMatch)).collect(),
        ));
        let tracks = assert_ok!(controller(service).run("morning", &criteria(), 10).await);
        assert!(tracks.is_empty());
    }

    #[tokio::test]
    async fn test_cost_error_aborts_loop() {
        let service = Arc::new(CountingService::new(vec![
            Ok(tracks(0)),
            Err(SelectionError::CostExceeded {
                scope: "morning".to_string(),
                attempted: 2.0,
                allowed: 1.0,
            }),
            Ok(tracks(5)),
        ]));
        let err = assert_err!(
            controller(service.clone())
                .run("morning", &criteria(), 10)
                .await
        );
        assert!(matches!(err, SelectionError::CostExceeded { .. }));
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_criteria_rejected_before_any_call() {
        let service = Arc::new(CountingService::new(Vec::new()));
        let err = assert_err!(
            controller(service.clone())
                .run("morning", &SelectionCriteria::new(2.0), 10)
                .await
        );
        assert!(matches!(err, SelectionError::InvalidRequest(_)));
        assert_eq!(service.calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_allocates_and_runs_all() {
        let service = Arc::new(CountingService::new(vec![Ok(tracks(3)), Ok(tracks(3))]));
        let budget = budget();
        let controller =
            RelaxationController::new(service.clone(), budget.clone(), RelaxationSettings::default());
        let jobs = vec![
            PlaylistJob {
                playlist_id: "morning".to_string(),
                target_count: 10,
                criteria: criteria(),
            },
            PlaylistJob {
                playlist_id: "evening".to_string(),
                target_count: 10,
                criteria: criteria(),
            },
        ];

        let results = assert_ok!(controller.run_batch(&jobs).await);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.as_ref().map(|o| o.satisfied).unwrap_or(false)));

        let summary = budget.summary().unwrap();
        assert_eq!(summary.identifiers["morning"].allocated, Some(5.0));
        assert_eq!(summary.identifiers["evening"].allocated, Some(5.0));
    }
}
