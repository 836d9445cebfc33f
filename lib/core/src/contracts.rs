//! Contracts for collaborators owned outside this crate: the barrier
//! handler, the operator, the watermark/status valve and output
//! subpartitions. None of these have a production implementation here —
//! only mocks, behind `#[cfg(test)]` or in the demo binary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

/// Absolute index of an input channel.
pub type Channel = causalstream_determinant::Channel;

/// A timestamp as produced by the (external) watermark/status model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(pub i64);

/// Idle/active toggle for a channel's stream status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStatus {
    pub idle: bool,
}

/// A latency probe passed through unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyMarker {
    pub marked_at_millis: i64,
    pub source_subtask_index: u32,
}

/// The four kinds of element a per-channel deserializer can hand back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamElement<R> {
    Record(R),
    Watermark(Watermark),
    StreamStatus(StreamStatus),
    LatencyMarker(LatencyMarker),
}

/// A network buffer in flight between the barrier handler and a
/// deserializer. Reference-counted by the (external) pool; `recycle` must
/// be called exactly once per buffer. A second call is logged, not a panic
/// — `cleanup()` must not throw when asked to recycle something already
/// recycled.
#[derive(Debug)]
pub struct Buffer {
    pub bytes: Bytes,
    recycled: AtomicBool,
}

impl Buffer {
    pub fn new(bytes: Bytes) -> Self {
        Self {
            bytes,
            recycled: AtomicBool::new(false),
        }
    }

    pub fn recycle(&self) {
        if self.recycled.swap(true, Ordering::SeqCst) {
            tracing::warn!("buffer recycled more than once");
        } else {
            causalstream_observability::CORE_METRICS.buffers_recycled.inc();
        }
    }

    pub fn is_recycled(&self) -> bool {
        self.recycled.load(Ordering::SeqCst)
    }
}

/// Either a network buffer or a control event, tagged with the channel it
/// arrived on.
pub enum BufferOrEvent {
    Buffer { channel: Channel, buffer: Buffer },
    Event { channel: Channel, event: InputEvent },
}

/// Events the buffer/event stream may carry. Only `EndOfPartition` is
/// tolerated; anything else is a fatal protocol violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    EndOfPartition,
    Other(String),
}

/// Delivers `BufferOrEvent`s and tracks checkpoint barrier alignment.
/// Owned by the input processor; `get_next_non_blocked` is the only
/// suspension point in the live input loop.
#[async_trait]
pub trait BarrierHandler: Send {
    async fn get_next_non_blocked(&mut self) -> Option<BufferOrEvent>;
    fn is_empty(&self) -> bool;
    fn unblock_channel_if_blocked(&mut self, channel: Channel);
    fn cleanup(&mut self);
    fn alignment_duration_nanos(&self) -> u64;
}

/// Result of pulling from a deserializer's pinned buffer. Record
/// production and buffer exhaustion are independent signals: a single call
/// may report both.
#[derive(Debug)]
pub struct NextRecord<R> {
    pub element: Option<StreamElement<R>>,
    pub buffer_consumed: bool,
}

/// Turns raw buffer bytes for one channel into typed stream elements. Owns
/// at most one in-flight buffer at a time.
pub trait RecordDeserializer: Send {
    type Record: Send;

    /// Hands a freshly arrived buffer to this deserializer. Must not be
    /// called while a buffer is already pinned.
    fn set_buffer(&mut self, buffer: Buffer);

    /// Attempts to produce the next element from the pinned buffer.
    /// Called with no buffer pinned, returns neither an element nor a
    /// consumed signal rather than panicking.
    fn next_record(&mut self) -> NextRecord<Self::Record>;

    /// Removes and returns the pinned buffer, if any, so the caller can
    /// recycle it. Leaves the deserializer unpinned.
    fn take_buffer(&mut self) -> Option<Buffer>;
}

/// Fallback/primary counter for records seen by the operator. Obtained
/// eagerly at construction (see design notes on the lazy-initialisation
/// race in the reference implementation) rather than lazily on the hot
/// path.
pub trait NumRecordsIn: Send + Sync {
    fn inc(&self);
}

/// An `AtomicU64`-backed `NumRecordsIn` used when the operator's own metric
/// group is unavailable.
#[derive(Debug, Default)]
pub struct LocalNumRecordsIn(std::sync::atomic::AtomicU64);

impl LocalNumRecordsIn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl NumRecordsIn for LocalNumRecordsIn {
    fn inc(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// An operator's metric group, exposing at least the `numRecordsIn`
/// counter. `Operator::metric_group` returns `None` when this isn't
/// available yet, in which case the input processor substitutes
/// `LocalNumRecordsIn` and logs a warning.
pub trait OperatorMetricGroup: Send + Sync {
    fn num_records_in(&self) -> Arc<dyn NumRecordsIn>;
}

/// The stream operator records and watermarks are dispatched to. Consumed,
/// never owned: its own processing logic is out of scope.
pub trait Operator: Send {
    type Record: Send;

    fn process_element(&mut self, record: Self::Record) -> anyhow::Result<()>;
    fn process_watermark(&mut self, watermark: Watermark) -> anyhow::Result<()>;
    fn process_latency_marker(&mut self, marker: LatencyMarker) -> anyhow::Result<()>;
    fn set_key_context_element1(&mut self, record: &Self::Record);
    fn metric_group(&self) -> Option<Arc<dyn OperatorMetricGroup>>;
}

/// Reports the aggregate watermark timestamp to a gauge when the valve
/// emits. Analogous to `watermarkGauge.set(ts)`.
pub trait WatermarkGauge: Send + Sync {
    fn set(&self, timestamp_millis: i64);
}

/// Publishes the aggregate idle/active status when the valve emits.
/// Analogous to `statusMaintainer.toggle(ss)`.
pub trait StatusMaintainer: Send + Sync {
    fn toggle(&self, status: StreamStatus);
}

/// Callback pair the valve invokes, under the task lock, when it decides
/// to emit an aggregated watermark or status change. Modelled as a single
/// function pair rather than an inner-class hierarchy.
pub struct ValveCallbacks<'a> {
    pub handle_watermark: &'a mut (dyn FnMut(Watermark) -> anyhow::Result<()> + Send + 'a),
    pub handle_stream_status: &'a mut (dyn FnMut(StreamStatus) -> anyhow::Result<()> + Send + 'a),
}

/// Holds per-channel watermarks/status and aggregates them into a monotone
/// output. Its own aggregation algorithm is out of scope; this crate only
/// defines the boundary it is driven through.
pub trait Valve: Send {
    fn input_watermark(
        &mut self,
        watermark: Watermark,
        channel: Channel,
        callbacks: &mut ValveCallbacks<'_>,
    ) -> anyhow::Result<()>;

    fn input_stream_status(
        &mut self,
        status: StreamStatus,
        channel: Channel,
        callbacks: &mut ValveCallbacks<'_>,
    ) -> anyhow::Result<()>;
}

/// One output channel of the operator's result partition, rebuilt by a
/// `SubpartitionRecoveryThread` during replay.
#[async_trait]
pub trait PipelinedSubpartition: Send + Sync {
    /// Rebuilds and re-logs a buffer of `length` bytes that was originally
    /// cut on this subpartition.
    async fn rebuild_and_log_buffer(&self, length: i32) -> anyhow::Result<()>;

    /// Marks (or clears) the "recovering in-flight" flag; while set, the
    /// network layer reports no data to downstream pulls.
    fn mark_recovering_in_flight(&self, recovering: bool);

    fn notify_data_available(&self);

    /// Re-sends in-flight buffers for a late-arriving downstream replay
    /// request, skipping buffers already acknowledged.
    async fn request_replay(&self, checkpoint_id: u64, buffers_to_skip: u64) -> anyhow::Result<()>;
}

/// The out-of-scope async output side a replayed `Timestamp`/`Rng`
/// determinant's value is ultimately delivered to, once its target record
/// count is reached.
pub trait AsyncDeterminantSink: Send + Sync {
    fn on_timestamp(&self, timestamp_millis: i64);
    fn on_random_int(&self, value: i32);
}

/// Authoritative lengths held by the causal-log store, used to validate
/// that replay consumed exactly as many bytes as were recorded.
pub trait CausalLogStore: Send + Sync {
    fn main_thread_log_length(&self) -> usize;
    fn subpartition_log_length(
        &self,
        dataset_id: causalstream_determinant::DatasetId,
        subpartition: causalstream_determinant::SubpartitionIndex,
    ) -> usize;
}

/// A request to resend in-flight buffers for a channel that reconnected
/// late, skipping buffers already received.
#[derive(Debug, Clone, Copy)]
pub struct InFlightLogRequestEvent {
    pub dataset_id: causalstream_determinant::DatasetId,
    pub subpartition: causalstream_determinant::SubpartitionIndex,
    pub current_epoch: u64,
    pub buffers_to_skip: u64,
}
