//! Load run coordination
//!
//! Launches every prepared session at once, one worker per load node, then
//! joins them under a deadline of `load_time + grace_period` (capped by the
//! optional scenario timeout). No result is observed until every worker has
//! reported its launch.

use std::time::Duration;

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{error, info, warn};

use super::result::{RunOutcome, RunResult, ScenarioResult};
use super::session::LoadSession;

/// Upper bound on a remote termination attempt
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Added to `load_time` to form each session's deadline
    pub grace_period: Duration,
    /// Hard cap for the whole run; sessions still going are terminated
    pub scenario_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(120),
            scenario_timeout: None,
        }
    }
}

pub struct LoadRunCoordinator {
    config: CoordinatorConfig,
}

impl LoadRunCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    /// Run all sessions concurrently and aggregate their outcomes
    ///
    /// Never retries: each session's outcome is terminal for the scenario.
    pub async fn run(&self, sessions: Vec<LoadSession>) -> ScenarioResult {
        let endpoints = sessions
            .first()
            .map(|s| s.parameters().endpoints())
            .unwrap_or_default();
        if sessions.is_empty() {
            warn!("No load sessions to run");
            return ScenarioResult::from_runs(Vec::new(), endpoints);
        }

        let started = Instant::now();
        let scenario_deadline = self.config.scenario_timeout.map(|t| started + t);
        let slots: Vec<(String, String)> = sessions
            .iter()
            .map(|s| (s.node().address.clone(), s.artifact_path().to_string()))
            .collect();

        info!("Launching {} load sessions", sessions.len());

        let (launch_tx, mut launch_rx) = mpsc::channel::<usize>(sessions.len());
        let mut workers = JoinSet::new();
        for (index, session) in sessions.into_iter().enumerate() {
            let launch_tx = launch_tx.clone();
            let session_timeout = session.parameters().load_time + self.config.grace_period;

            workers.spawn(async move {
                let launched_at = Instant::now();
                let mut deadline = launched_at + session_timeout;
                if let Some(cap) = scenario_deadline
                    && cap < deadline
                {
                    deadline = cap;
                }
                let _ = launch_tx.send(index).await;
                drop(launch_tx);
                counter!("clusterload_sessions_launched_total").increment(1);

                let (outcome, output_tail) = supervise(&session, deadline).await;
                let elapsed = launched_at.elapsed();
                histogram!("clusterload_session_duration_seconds").record(elapsed.as_secs_f64());

                let result = RunResult {
                    node: session.node().address.clone(),
                    artifact_path: session.artifact_path().to_string(),
                    outcome,
                    elapsed,
                    output_tail,
                    launched_at: launched_at.into_std(),
                    joined_at: launched_at.into_std(),
                };
                (index, result)
            });
        }
        drop(launch_tx);

        // Every worker drops its sender right after launching
        let mut launched = 0;
        while launch_rx.recv().await.is_some() {
            launched += 1;
        }
        info!("All {} load sessions launched", launched);

        let mut results: Vec<Option<RunResult>> = vec![None; slots.len()];
        while let Some(joined) = workers.join_next().await {
            let joined_at = Instant::now().into_std();
            match joined {
                Ok((index, mut result)) => {
                    result.joined_at = joined_at;
                    results[index] = Some(result);
                }
                Err(e) => error!("Load session worker died: {}", e),
            }
        }

        let results: Vec<RunResult> = results
            .into_iter()
            .zip(slots)
            .map(|(result, (node, artifact_path))| {
                result.unwrap_or_else(|| {
                    let now = Instant::now().into_std();
                    RunResult {
                        node,
                        artifact_path,
                        outcome: RunOutcome::Errored {
                            message: "session worker died".to_string(),
                        },
                        elapsed: started.elapsed(),
                        output_tail: String::new(),
                        launched_at: now,
                        joined_at: now,
                    }
                })
            })
            .collect();

        let scenario = ScenarioResult::from_runs(results, endpoints);
        for failed in scenario.failed_runs() {
            warn!("Session on {} ended with {:?}", failed.node, failed.outcome);
        }
        info!(
            "Load run finished in {:.1}s: {}/{} sessions succeeded",
            started.elapsed().as_secs_f64(),
            scenario.results.len() - scenario.failed_runs().count(),
            scenario.results.len()
        );
        scenario
    }
}

/// Drive one session to a terminal outcome
async fn supervise(session: &LoadSession, deadline: Instant) -> (RunOutcome, String) {
    match timeout_at(deadline, session.execute()).await {
        Ok(Ok(output)) => {
            let tail = output.last_line().to_string();
            if !output.success() {
                counter!("clusterload_sessions_failed_total").increment(1);
                return (
                    RunOutcome::Failed {
                        exit_status: output.exit_status,
                    },
                    tail,
                );
            }
            match session.artifact_present().await {
                Ok(true) => (RunOutcome::Succeeded, tail),
                Ok(false) => {
                    warn!("{} exited cleanly but wrote no artifact", session.node().address);
                    (RunOutcome::MissingArtifact, tail)
                }
                Err(e) => (RunOutcome::Errored { message: e.to_string() }, tail),
            }
        }
        Ok(Err(e)) => (RunOutcome::Errored { message: e.to_string() }, String::new()),
        Err(_) => {
            warn!(
                "Session on {} exceeded its deadline, terminating",
                session.node().address
            );
            counter!("clusterload_sessions_timed_out_total").increment(1);
            let termination_failed = match timeout(TERMINATE_TIMEOUT, session.terminate()).await {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    error!("Failed to terminate session on {}: {}", session.node().address, e);
                    true
                }
                Err(_) => {
                    error!("Terminating session on {} timed out", session.node().address);
                    true
                }
            };
            (RunOutcome::TimedOut { termination_failed }, String::new())
        }
    }
}
