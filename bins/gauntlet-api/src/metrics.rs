// Prometheus counters exposed on GET /metrics
use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter};

lazy_static! {
    pub static ref SUBMISSIONS_QUEUED: IntCounter = register_int_counter!(
        "gauntlet_submissions_queued_total",
        "Submissions accepted and pushed onto the evaluation queue"
    )
    .expect("metric can be registered");
    pub static ref CHALLENGES_PUBLISHED: IntCounter = register_int_counter!(
        "gauntlet_challenges_published_total",
        "Challenges created or updated after passing validation"
    )
    .expect("metric can be registered");
    pub static ref CHALLENGES_REJECTED: IntCounter = register_int_counter!(
        "gauntlet_challenges_rejected_total",
        "Challenge documents refused by validation"
    )
    .expect("metric can be registered");
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = prometheus::TextEncoder::new();
    encoder.encode_to_string(&prometheus::gather())
}
