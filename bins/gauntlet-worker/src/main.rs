mod analysis;
mod config;
mod criteria;
mod engine;
mod evaluator;
mod executor;
mod runner;

#[cfg(test)]
mod testing;

use analysis::LlmAnalyzer;
use config::WorkerConfig;
use engine::{cancel_pair, CancelSignal, DockerEngine};
use executor::{ChallengeEvaluator, EvaluationError};
use gauntlet_common::languages::LanguageRegistry;
use gauntlet_common::redis;
use gauntlet_common::storage::{RedisStorage, Storage, StorageError};
use gauntlet_common::types::{EvaluationRecord, SubmissionJob, SubmissionStatus};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Gauntlet Worker booting...");

    let config = WorkerConfig::from_env()?;

    // Load language configurations
    let languages = LanguageRegistry::load(&config.languages_path).map_err(|e| {
        error!("Failed to load language configurations: {}", e);
        error!("Make sure {} exists", config.languages_path.display());
        e
    })?;
    info!("Loaded language configurations for: {:?}", languages.names());

    let client = ::redis::Client::open(config.redis_url.as_str())?;
    let redis_conn = ::redis::aio::ConnectionManager::new(client).await?;
    info!("Connected to Redis: {}", config.redis_url);

    let engine = DockerEngine::connect().await?;
    info!("Connected to Docker daemon");

    let mut evaluator = ChallengeEvaluator::new(
        Arc::new(engine),
        languages,
        config.max_parallel_sandboxes,
    )
    .with_policy(config.policy)
    .with_limits(config.limits)
    .with_analysis_timeout(config.analysis_timeout);

    match &config.analysis {
        Some(analysis) => {
            info!(model = %analysis.model, "AI analysis enabled");
            let analyzer = LlmAnalyzer::new(analysis.clone(), config.analysis_timeout)?;
            evaluator = evaluator.with_analyzer(Arc::new(analyzer));
        }
        None => warn!("AI_API_KEY not set, submissions are scored on tests only"),
    }

    let storage: Arc<dyn Storage> = Arc::new(RedisStorage::new(redis_conn.clone()));
    let (shutdown, cancel) = cancel_pair();

    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        warn!("Received shutdown signal, cancelling in-flight evaluations...");
        shutdown.cancel();
    });

    worker_loop(
        redis_conn,
        Arc::new(evaluator),
        storage,
        config.max_parallel_sandboxes,
        cancel,
    )
    .await;

    info!("Worker shutdown complete");
    Ok(())
}

async fn worker_loop(
    mut redis_conn: ::redis::aio::ConnectionManager,
    evaluator: Arc<ChallengeEvaluator>,
    storage: Arc<dyn Storage>,
    max_in_flight: usize,
    mut cancel: CancelSignal,
) {
    let slots = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut in_flight = JoinSet::new();

    loop {
        // Reap finished evaluations
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Evaluation task panicked");
            }
        }

        // Only take a job off the queue once it can start
        let permit = tokio::select! {
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = cancel.cancelled() => break,
        };

        // BLPOP with 5 second timeout for graceful shutdown
        let popped = tokio::select! {
            popped = redis::pop_job(&mut redis_conn, 5.0) => popped,
            _ = cancel.cancelled() => break,
        };

        match popped {
            Ok(Some(job)) => {
                info!(
                    submission_id = %job.submission_id,
                    challenge_id = %job.challenge.challenge_id,
                    language = %job.language,
                    test_cases = job.challenge.test_cases.len(),
                    source_size = job.source_code.len(),
                    "Received submission"
                );
                let evaluator = evaluator.clone();
                let storage = storage.clone();
                let cancel = cancel.clone();
                in_flight.spawn(async move {
                    process_job(&evaluator, storage.as_ref(), job, cancel).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }

    info!(in_flight = in_flight.len(), "Draining in-flight evaluations");
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Evaluation task panicked");
        }
    }
}

/// Evaluate one job and persist the outcome
#[instrument(skip_all, fields(submission_id = %job.submission_id))]
async fn process_job(
    evaluator: &ChallengeEvaluator,
    storage: &dyn Storage,
    job: SubmissionJob,
    cancel: CancelSignal,
) {
    let submission = job.submission();
    let outcome = evaluator
        .evaluate_submission(
            &submission,
            &job.challenge,
            &job.source_code,
            &job.language,
            &job.options,
            cancel,
        )
        .await;

    let persisted = match outcome {
        Ok(record) => persist_evaluation(storage, &record).await,
        Err(EvaluationError::Validation { violations }) => {
            storage
                .mark_submission(&job.submission_id, SubmissionStatus::Rejected, violations)
                .await
        }
        Err(e @ (EvaluationError::UnsupportedLanguage(_) | EvaluationError::InvalidSubmission(_))) => {
            storage
                .mark_submission(
                    &job.submission_id,
                    SubmissionStatus::Rejected,
                    vec![e.to_string()],
                )
                .await
        }
        Err(e @ (EvaluationError::Infrastructure(_) | EvaluationError::Cancelled)) => {
            storage
                .mark_submission(
                    &job.submission_id,
                    SubmissionStatus::Failed,
                    vec![e.to_string()],
                )
                .await
        }
    };

    if let Err(e) = persisted {
        // Non-fatal - worker continues
        error!(error = %e, "Failed to persist evaluation outcome");
    }
}

/// Store the record, then feed the statistics aggregator exactly once
async fn persist_evaluation(
    storage: &dyn Storage,
    record: &EvaluationRecord,
) -> Result<(), StorageError> {
    match storage.update_submission_results(record).await {
        Ok(()) => {}
        Err(StorageError::AlreadyEvaluated(id)) => {
            warn!(submission_id = %id, "Submission already evaluated, skipping statistics");
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    let new_participant = storage
        .increment_participant_count(&record.challenge_id, &record.user_id)
        .await?;
    storage
        .update_challenge_metrics(&record.challenge_id, record.total_score, record.passed)
        .await?;

    info!(
        submission_id = %record.submission_id,
        total_score = record.total_score,
        passed = record.passed,
        new_participant = new_participant,
        "Evaluation persisted"
    );
    Ok(())
}
