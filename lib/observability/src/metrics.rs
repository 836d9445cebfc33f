use vise::{Counter, Gauge, Metrics};

/// Counters and gauges for the causal-replay core.
#[derive(Debug, Metrics)]
#[metrics(prefix = "causalstream_core")]
pub struct CoreMetrics {
    /// Determinants successfully decoded from a causal log.
    pub determinants_decoded: Counter,
    /// `StreamElement`s dispatched to the operator/valve, live or replayed.
    pub records_dispatched: Counter,
    /// Network buffers returned to the pool exactly once.
    pub buffers_recycled: Counter,
    /// `InFlightLogRequestEvent`s sent for a late-arriving channel.
    pub in_flight_log_requests: Counter,
    /// `finishReplaying` length-mismatch failures.
    pub replay_length_mismatches: Counter,
    /// `checkAsyncEvent` overshoot failures.
    pub record_count_overshoots: Counter,
    /// Subpartitions currently being rebuilt by a recovery thread.
    pub recovering_subpartitions: Gauge<i64>,
}

#[vise::register]
pub static CORE_METRICS: vise::Global<CoreMetrics> = vise::Global::new();
