//! Metrics instrumentation for lifecycle-dns.
//!
//! All metrics are prefixed with `lifecycle_dns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// How a message left the pipeline, for the event counter.
#[derive(Debug, Clone, Copy)]
pub enum EventOutcome {
    /// DNS mutations were applied.
    Applied,
    /// The event required no mutation (disassociation, resolver miss).
    Skipped,
    /// The event type is not one this service handles.
    Ignored,
    /// The envelope could not be decoded.
    DecodeError,
    /// A control-plane lookup failed.
    ResolveError,
    /// The DNS update transaction failed.
    UpdateError,
}

/// Record a handled message and its pipeline duration.
pub fn record_event_handled(outcome: EventOutcome, duration: std::time::Duration) {
    let outcome_str = match outcome {
        EventOutcome::Applied => "applied",
        EventOutcome::Skipped => "skipped",
        EventOutcome::Ignored => "ignored",
        EventOutcome::DecodeError => "decode_error",
        EventOutcome::ResolveError => "resolve_error",
        EventOutcome::UpdateError => "update_error",
    };

    counter!("lifecycle_dns.event.count", "outcome" => outcome_str).increment(1);
    histogram!("lifecycle_dns.event.duration.seconds").record(duration.as_secs_f64());
}

/// Result of one update transaction.
#[derive(Debug, Clone, Copy)]
pub enum UpdateResult {
    /// The name server accepted the transaction.
    Applied,
    /// The transaction never reached the name server.
    TransportFailure,
    /// The name server rejected the transaction.
    Rejected,
}

/// Record an update transaction attempt.
pub fn record_update(result: UpdateResult) {
    let result_str = match result {
        UpdateResult::Applied => "applied",
        UpdateResult::TransportFailure => "transport_failure",
        UpdateResult::Rejected => "rejected",
    };

    counter!("lifecycle_dns.update.count", "result" => result_str).increment(1);
}

/// Bus reconnect reasons.
#[derive(Debug, Clone, Copy)]
pub enum ReconnectReason {
    /// First connection to the broker.
    InitialConnect,
    /// The consumer stream ended normally.
    StreamEnded,
    /// The consumer encountered an error.
    Error,
}

/// Record a bus (re)connection.
pub fn record_bus_reconnect(reason: ReconnectReason) {
    let reason_str = match reason {
        ReconnectReason::InitialConnect => "initial_connect",
        ReconnectReason::StreamEnded => "stream_ended",
        ReconnectReason::Error => "error",
    };

    counter!("lifecycle_dns.bus.reconnect.count", "reason" => reason_str).increment(1);
}

/// Record one instance-metadata write attempt.
pub fn record_annotation(success: bool) {
    let result_str = if success { "ok" } else { "failed" };
    counter!("lifecycle_dns.annotation.count", "result" => result_str).increment(1);
}

/// Record the current address-cache size.
pub fn record_cache_size(entries: usize) {
    gauge!("lifecycle_dns.cache.entries").set(entries as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
