// HTTP route handlers for the Gauntlet API

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use gauntlet_common::storage::StorageError;
use gauntlet_common::types::{Challenge, SubmissionJob, SubmissionRecord, SubmissionStatus};
use gauntlet_common::validator::{validate_challenge, ValidationOptions, ValidationReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::AppState;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": message.into()
        })),
    )
        .into_response()
}

fn storage_failure(context: &str, e: StorageError) -> Response {
    error!(error = %e, "{}", context);
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{}: {}", context, e),
    )
}

fn rejected(report: ValidationReport) -> Response {
    metrics::CHALLENGES_REJECTED.inc();
    (StatusCode::UNPROCESSABLE_ENTITY, Json(report)).into_response()
}

/// Learner-facing copy of a challenge: hidden cases keep their weight only
fn public_view(mut challenge: Challenge) -> Challenge {
    for tc in challenge.test_cases.iter_mut().filter(|tc| tc.is_hidden) {
        tc.input.clear();
        tc.expected_output.clear();
        tc.description.clear();
    }
    challenge
}

/// POST /challenges - Validate and publish a new challenge
pub async fn create_challenge(
    State(state): State<Arc<AppState>>,
    Json(challenge): Json<Challenge>,
) -> Response {
    let report = validate_challenge(&challenge, &state.validation);
    if !report.is_valid {
        info!(
            challenge_id = %challenge.challenge_id,
            errors = report.errors.len(),
            "Challenge rejected by validation"
        );
        return rejected(report);
    }

    match state.storage.get_challenge(&challenge.challenge_id).await {
        Ok(Some(_)) => {
            return error_response(
                StatusCode::CONFLICT,
                format!(
                    "Challenge '{}' already exists; use PUT to update it",
                    challenge.challenge_id
                ),
            )
        }
        Ok(None) => {}
        Err(e) => return storage_failure("Failed to look up challenge", e),
    }

    if let Err(e) = state.storage.put_challenge(&challenge).await {
        return storage_failure("Failed to store challenge", e);
    }

    metrics::CHALLENGES_PUBLISHED.inc();
    info!(
        challenge_id = %challenge.challenge_id,
        test_cases = challenge.test_cases.len(),
        warnings = report.warnings.len(),
        "Challenge published"
    );
    (StatusCode::CREATED, Json(report)).into_response()
}

/// PUT /challenges/:id - Replace an existing challenge after re-validation
pub async fn update_challenge(
    State(state): State<Arc<AppState>>,
    Path(challenge_id): Path<String>,
    Json(challenge): Json<Challenge>,
) -> Response {
    if challenge.challenge_id != challenge_id {
        return error_response(
            StatusCode::BAD_REQUEST,
            "challenge_id in the body does not match the path",
        );
    }

    match state.storage.get_challenge(&challenge_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("Challenge '{}' not found", challenge_id),
            )
        }
        Err(e) => return storage_failure("Failed to look up challenge", e),
    }

    let report = validate_challenge(&challenge, &state.validation);
    if !report.is_valid {
        return rejected(report);
    }

    if let Err(e) = state.storage.put_challenge(&challenge).await {
        return storage_failure("Failed to store challenge", e);
    }

    metrics::CHALLENGES_PUBLISHED.inc();
    info!(challenge_id = %challenge_id, "Challenge updated");
    (StatusCode::OK, Json(report)).into_response()
}

/// GET /challenges/:id
pub async fn get_challenge(
    State(state): State<Arc<AppState>>,
    Path(challenge_id): Path<String>,
) -> Response {
    match state.storage.get_challenge(&challenge_id).await {
        Ok(Some(challenge)) => (StatusCode::OK, Json(public_view(challenge))).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("Challenge '{}' not found", challenge_id),
        ),
        Err(e) => storage_failure("Failed to load challenge", e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateQuery {
    pub min_test_cases: Option<usize>,
}

/// POST /challenges/validate - Report only, nothing is stored
pub async fn validate(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ValidateQuery>,
    Json(challenge): Json<Challenge>,
) -> Response {
    let options = ValidationOptions {
        require_minimum_test_cases: query
            .min_test_cases
            .unwrap_or(state.validation.require_minimum_test_cases),
        ..state.validation.clone()
    };
    let report = validate_challenge(&challenge, &options);
    (StatusCode::OK, Json(report)).into_response()
}

/// Limits and grading flags are operator settings, never part of the request
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub challenge_id: String,
    pub user_id: String,
    pub language: String,
    pub source_code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
}

/// POST /submissions - Queue a submission for evaluation
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    if payload.user_id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "user_id is required");
    }
    if payload.source_code.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "source_code is required");
    }
    if !state.languages.is_enabled(&payload.language) {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!(
                "Unsupported language '{}'; available: {:?}",
                payload.language,
                state.languages.names()
            ),
        );
    }

    let challenge = match state.storage.get_challenge(&payload.challenge_id).await {
        Ok(Some(challenge)) => challenge,
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("Challenge '{}' not found", payload.challenge_id),
            )
        }
        Err(e) => return storage_failure("Failed to load challenge", e),
    };

    if !challenge.is_active {
        return error_response(
            StatusCode::CONFLICT,
            format!("Challenge '{}' is not accepting submissions", challenge.challenge_id),
        );
    }

    let report = validate_challenge(&challenge, &state.validation);
    if !report.is_valid {
        warn!(challenge_id = %challenge.challenge_id, "Stored challenge no longer validates");
        return rejected(report);
    }

    let job = SubmissionJob {
        submission_id: Uuid::new_v4(),
        user_id: payload.user_id,
        language: payload.language.to_lowercase(),
        source_code: payload.source_code,
        challenge,
        options: state.evaluation,
        queued_at: Utc::now(),
    };

    if let Err(e) = state
        .storage
        .create_submission_record(&SubmissionRecord::queued(&job))
        .await
    {
        return storage_failure("Failed to record submission", e);
    }

    if let Err(e) = state.queue.enqueue(&job).await {
        error!(submission_id = %job.submission_id, error = %e, "Failed to queue submission");
        if let Err(mark_err) = state
            .storage
            .mark_submission(
                &job.submission_id,
                SubmissionStatus::Failed,
                vec![format!("failed to queue submission: {}", e)],
            )
            .await
        {
            error!(submission_id = %job.submission_id, error = %mark_err, "Failed to mark submission");
        }
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to queue submission: {}", e),
        );
    }

    metrics::SUBMISSIONS_QUEUED.inc();
    info!(
        submission_id = %job.submission_id,
        challenge_id = %job.challenge.challenge_id,
        language = %job.language,
        "Submission queued"
    );

    (
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            submission_id: job.submission_id,
            status: SubmissionStatus::Queued,
        }),
    )
        .into_response()
}

/// GET /submissions/:id - Status, and the evaluation record once available.
/// Hidden cases appear only as the aggregate in the feedback.
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Response {
    let submission_uuid = match Uuid::parse_str(&submission_id) {
        Ok(id) => id,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid submission ID format"),
    };

    match state.storage.get_submission(&submission_uuid).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record.for_learner())).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("Submission '{}' not found", submission_id),
        ),
        Err(e) => storage_failure("Failed to load submission", e),
    }
}

/// GET /challenges/:id/stats
pub async fn challenge_stats(
    State(state): State<Arc<AppState>>,
    Path(challenge_id): Path<String>,
) -> Response {
    match state.storage.get_challenge(&challenge_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("Challenge '{}' not found", challenge_id),
            )
        }
        Err(e) => return storage_failure("Failed to look up challenge", e),
    }

    match state.storage.challenge_metrics(&challenge_id).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => storage_failure("Failed to load challenge metrics", e),
    }
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn prometheus_metrics() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        ),
    }
}
