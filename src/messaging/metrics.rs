//! Prometheus metrics for messaging

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec};

/// Messaging metrics
pub struct MessagingMetrics {
    /// Payloads acknowledged by the broker
    pub messages_produced: CounterVec,

    /// Produce or flush failures
    pub produce_failures: CounterVec,

    /// Terminal flushes issued by batch sends
    pub flushes: CounterVec,

    /// Payloads handed to a handler
    pub messages_consumed: CounterVec,

    /// Records skipped because of transient broker errors
    pub transient_skips: CounterVec,

    /// Checkpoint commits
    pub commits: CounterVec,

    /// Consumer loops aborted by a fatal error
    pub fatal_errors: CounterVec,

    /// Payloads redirected to a dead-letter destination
    pub dead_lettered: CounterVec,
}

lazy_static! {
    pub static ref MESSAGING_METRICS: MessagingMetrics = MessagingMetrics {
        messages_produced: register_counter_vec!(
            "mq_messages_produced_total",
            "Total number of payloads acknowledged by the broker",
            &["destination"]
        )
        .unwrap(),

        produce_failures: register_counter_vec!(
            "mq_produce_failures_total",
            "Total number of produce or flush failures",
            &["destination", "operation"]
        )
        .unwrap(),

        flushes: register_counter_vec!(
            "mq_flushes_total",
            "Total number of terminal flushes",
            &["destination"]
        )
        .unwrap(),

        messages_consumed: register_counter_vec!(
            "mq_messages_consumed_total",
            "Total number of payloads handed to a handler",
            &["destination"]
        )
        .unwrap(),

        transient_skips: register_counter_vec!(
            "mq_transient_skips_total",
            "Total number of records skipped after a transient broker error",
            &["destination"]
        )
        .unwrap(),

        commits: register_counter_vec!(
            "mq_commits_total",
            "Total number of checkpoint commits",
            &["destination"]
        )
        .unwrap(),

        fatal_errors: register_counter_vec!(
            "mq_consumer_fatal_errors_total",
            "Total number of consumer loops aborted by a fatal error",
            &["destination"]
        )
        .unwrap(),

        dead_lettered: register_counter_vec!(
            "mq_dead_lettered_total",
            "Total number of payloads redirected to a dead-letter destination",
            &["destination"]
        )
        .unwrap(),
    };
}

/// Initialize messaging metrics
pub fn init_messaging_metrics() {
    lazy_static::initialize(&MESSAGING_METRICS);
}
