use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::QuestionConfig;
use crate::create_timestamp;
use crate::grader::{ExecutionResult, Grader};
use crate::script::ScriptEvaluator;
use crate::session::Launch;

/// One submission waiting to be graded
#[derive(Debug, Clone)]
pub struct GradeJob {
    pub name: String,
    pub source: String,
}

#[derive(Serialize, Debug)]
pub struct GradeReport {
    pub submission: String,
    pub graded_at: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Serialize, Debug)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Graded(ExecutionResult),
    /// The grading subsystem broke; says nothing about the submission
    Failed { error: String },
    Canceled,
}

/// Grades every job, running at most `threads` simulators at once
///
/// Each job is its own grading request with its own cache. Reports come back
/// in job order. Jobs not yet started when `token` is cancelled are reported
/// as canceled; running ones finish.
pub async fn grade_all(
    jobs: Vec<GradeJob>,
    launcher: Arc<dyn Launch>,
    evaluator: Arc<dyn ScriptEvaluator>,
    question: Arc<QuestionConfig>,
    threads: usize,
    token: CancellationToken,
) -> Vec<GradeReport> {
    let permits = Arc::new(Semaphore::new(threads.max(1)));
    let mut workers = JoinSet::new();

    for (idx, job) in jobs.iter().cloned().enumerate() {
        let permits = permits.clone();
        let launcher = launcher.clone();
        let evaluator = evaluator.clone();
        let question = question.clone();
        let token = token.clone();

        workers.spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                permit = permits.acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                log::info!("Submission {} canceled before grading", job.name);
                return (idx, Outcome::Canceled, create_timestamp());
            };

            let name = job.name.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let grader = Grader::new(launcher, evaluator, (*question).clone());
                grader.run_usercode(&job.source)
            });

            let outcome = match handle.await {
                Ok(Ok(result)) => {
                    log::info!(
                        "Submission {name} graded: validated={} fraction={}",
                        result.validated,
                        result.fraction
                    );
                    Outcome::Graded(result)
                }
                Ok(Err(e)) => {
                    log::error!("Grading submission {name} failed: {e}");
                    Outcome::Failed {
                        error: e.to_string(),
                    }
                }
                Err(e) => {
                    log::error!("Grading task for submission {name} panicked: {e:?}");
                    Outcome::Failed {
                        error: "grading task panicked".to_string(),
                    }
                }
            };
            (idx, outcome, create_timestamp())
        });
    }

    let mut outcomes: Vec<Option<(Outcome, String)>> = jobs.iter().map(|_| None).collect();
    while let Some(res) = workers.join_next().await {
        match res {
            Ok((idx, outcome, graded_at)) => outcomes[idx] = Some((outcome, graded_at)),
            Err(e) => log::error!("Worker handle finished with error: {:?}", e),
        }
    }

    jobs.into_iter()
        .zip(outcomes)
        .map(|(job, outcome)| {
            let (outcome, graded_at) = outcome.unwrap_or_else(|| {
                let lost = Outcome::Failed {
                    error: "worker lost".to_string(),
                };
                (lost, create_timestamp())
            });
            GradeReport {
                submission: job.name,
                graded_at,
                outcome,
            }
        })
        .collect()
}
