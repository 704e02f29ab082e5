// Prometheus metrics definitions for the Study-Battle backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Matches currently in waiting or active status.
    pub static ref ACTIVE_MATCHES: IntGauge =
        IntGauge::new("studybattle_active_matches", "Matches currently open").unwrap();

    /// Live WebSocket connections.
    pub static ref CONNECTED_WEBSOCKETS: IntGauge =
        IntGauge::new("studybattle_connected_websockets", "Live WebSocket connections").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total matches created.
    pub static ref MATCHES_CREATED_TOTAL: IntCounter = IntCounter::new(
        "studybattle_matches_created_total",
        "Total matches created",
    )
    .unwrap();

    /// Total matches finished.
    pub static ref MATCHES_FINISHED_TOTAL: IntCounter = IntCounter::new(
        "studybattle_matches_finished_total",
        "Total matches finished",
    )
    .unwrap();

    /// Total rounds started.
    pub static ref ROUNDS_STARTED_TOTAL: IntCounter = IntCounter::new(
        "studybattle_rounds_started_total",
        "Total rounds started",
    )
    .unwrap();

    /// Total rounds resolved, by outcome (win, timeout, skip).
    pub static ref ROUNDS_RESOLVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("studybattle_rounds_resolved_total", "Total rounds resolved"),
        &["outcome"],
    )
    .unwrap();

    /// Total answers graded, by result (correct, incorrect).
    pub static ref ANSWERS_GRADED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("studybattle_answers_graded_total", "Total answers graded"),
        &["result"],
    )
    .unwrap();

    /// Question generation calls that failed and stalled a round.
    pub static ref QUESTION_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "studybattle_question_failures_total",
        "Failed question generation calls",
    )
    .unwrap();

    /// Total WebSocket events sent to clients.
    pub static ref WEBSOCKET_EVENTS_SENT_TOTAL: IntCounter = IntCounter::new(
        "studybattle_websocket_events_sent_total",
        "Total WebSocket events sent",
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Time from round start to a winning submission, in seconds.
    pub static ref WINNING_ANSWER_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "studybattle_winning_answer_seconds",
            "Elapsed time of winning submissions",
        )
        .buckets(vec![1.0, 2.0, 5.0, 10.0, 15.0, 20.0, 30.0, 60.0]),
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_MATCHES.clone()),
        Box::new(CONNECTED_WEBSOCKETS.clone()),
        Box::new(MATCHES_CREATED_TOTAL.clone()),
        Box::new(MATCHES_FINISHED_TOTAL.clone()),
        Box::new(ROUNDS_STARTED_TOTAL.clone()),
        Box::new(ROUNDS_RESOLVED_TOTAL.clone()),
        Box::new(ANSWERS_GRADED_TOTAL.clone()),
        Box::new(QUESTION_FAILURES_TOTAL.clone()),
        Box::new(WEBSOCKET_EVENTS_SENT_TOTAL.clone()),
        Box::new(WINNING_ANSWER_SECONDS.clone()),
    ];

    for c in collectors {
        REGISTRY.register(c).expect("failed to register metric");
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let before = MATCHES_CREATED_TOTAL.get();
        MATCHES_CREATED_TOTAL.inc();
        assert_eq!(MATCHES_CREATED_TOTAL.get(), before + 1);
    }

    #[test]
    fn test_vec_counter_labels() {
        let before = ROUNDS_RESOLVED_TOTAL.with_label_values(&["win"]).get();
        ROUNDS_RESOLVED_TOTAL.with_label_values(&["win"]).inc();
        assert_eq!(
            ROUNDS_RESOLVED_TOTAL.with_label_values(&["win"]).get(),
            before + 1
        );
    }

    #[test]
    fn test_gather_metrics_exposition() {
        register_metrics();
        MATCHES_CREATED_TOTAL.inc();
        let text = gather_metrics();
        assert!(text.contains("studybattle_matches_created_total"));
    }
}
