//! Minimal, demo-only implementations of the collaborator contracts
//! `causalstream_core::contracts` leaves out of scope. Good enough to
//! drive the end-to-end scenarios from a single process; nothing here is
//! meant to survive contact with a real network layer.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use causalstream_core::contracts::{
    AsyncDeterminantSink, BarrierHandler, Buffer, BufferOrEvent, CausalLogStore, InputEvent,
    NextRecord, Operator, OperatorMetricGroup, PipelinedSubpartition, RecordDeserializer,
    StatusMaintainer, StreamElement, StreamStatus, Valve, ValveCallbacks, Watermark,
    WatermarkGauge,
};
use causalstream_core::OperatorState;
use causalstream_determinant::{DatasetId, SubpartitionIndex};

/// Replays a fixed, scripted sequence of `BufferOrEvent`s, one per call.
pub struct ScriptedBarrierHandler {
    script: VecDeque<BufferOrEvent>,
}

impl ScriptedBarrierHandler {
    pub fn new(script: Vec<BufferOrEvent>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait]
impl BarrierHandler for ScriptedBarrierHandler {
    async fn get_next_non_blocked(&mut self) -> Option<BufferOrEvent> {
        self.script.pop_front()
    }

    fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    fn unblock_channel_if_blocked(&mut self, _channel: causalstream_core::contracts::Channel) {}

    fn cleanup(&mut self) {
        self.script.clear();
    }

    fn alignment_duration_nanos(&self) -> u64 {
        0
    }
}

/// Deserializes one buffer into a single `Record(String)`, treating the
/// buffer's bytes as UTF-8. A real deserializer would frame many records
/// per buffer; one-record-per-buffer is all the demo scenarios need.
#[derive(Default)]
pub struct LineDeserializer {
    pending: Option<Buffer>,
}

impl RecordDeserializer for LineDeserializer {
    type Record = String;

    fn set_buffer(&mut self, buffer: Buffer) {
        self.pending = Some(buffer);
    }

    fn next_record(&mut self) -> NextRecord<Self::Record> {
        let Some(buffer) = &self.pending else {
            return NextRecord {
                element: None,
                buffer_consumed: false,
            };
        };
        let text = String::from_utf8_lossy(&buffer.bytes).into_owned();
        NextRecord {
            element: Some(StreamElement::Record(text)),
            buffer_consumed: true,
        }
    }

    fn take_buffer(&mut self) -> Option<Buffer> {
        self.pending.take()
    }
}

/// Appends whatever it's handed to an in-memory log, for assertions after
/// a scenario runs.
#[derive(Default)]
pub struct RecordingOperator {
    pub records: Vec<String>,
    pub watermarks: Vec<Watermark>,
}

impl Operator for RecordingOperator {
    type Record = String;

    fn process_element(&mut self, record: Self::Record) -> anyhow::Result<()> {
        tracing::info!(%record, "operator processed record");
        self.records.push(record);
        Ok(())
    }

    fn process_watermark(&mut self, watermark: Watermark) -> anyhow::Result<()> {
        self.watermarks.push(watermark);
        Ok(())
    }

    fn process_latency_marker(
        &mut self,
        _marker: causalstream_core::contracts::LatencyMarker,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn set_key_context_element1(&mut self, _record: &Self::Record) {}

    fn metric_group(&self) -> Option<std::sync::Arc<dyn OperatorMetricGroup>> {
        None
    }
}

/// A valve that forwards every per-channel watermark/status straight
/// through as the aggregate one, with no alignment logic of its own.
#[derive(Default)]
pub struct PassThroughValve;

impl Valve for PassThroughValve {
    fn input_watermark(
        &mut self,
        watermark: Watermark,
        _channel: causalstream_core::contracts::Channel,
        callbacks: &mut ValveCallbacks<'_>,
    ) -> anyhow::Result<()> {
        (callbacks.handle_watermark)(watermark)
    }

    fn input_stream_status(
        &mut self,
        status: StreamStatus,
        _channel: causalstream_core::contracts::Channel,
        callbacks: &mut ValveCallbacks<'_>,
    ) -> anyhow::Result<()> {
        (callbacks.handle_stream_status)(status)
    }
}

/// Logs whatever it's asked to do instead of touching a real result
/// partition.
pub struct LoggingSubpartition {
    pub dataset_id: DatasetId,
    pub subpartition: SubpartitionIndex,
}

#[async_trait]
impl PipelinedSubpartition for LoggingSubpartition {
    async fn rebuild_and_log_buffer(&self, length: i32) -> anyhow::Result<()> {
        tracing::info!(
            dataset_id = ?self.dataset_id,
            subpartition = self.subpartition,
            length,
            "rebuilt buffer during recovery"
        );
        Ok(())
    }

    fn mark_recovering_in_flight(&self, recovering: bool) {
        tracing::debug!(
            dataset_id = ?self.dataset_id,
            subpartition = self.subpartition,
            recovering,
            "recovering-in-flight flag toggled"
        );
    }

    fn notify_data_available(&self) {}

    async fn request_replay(&self, checkpoint_id: u64, buffers_to_skip: u64) -> anyhow::Result<()> {
        tracing::info!(
            dataset_id = ?self.dataset_id,
            subpartition = self.subpartition,
            checkpoint_id,
            buffers_to_skip,
            "replay requested for late-reconnecting downstream"
        );
        Ok(())
    }
}

/// Records fired async determinants so a scenario can assert on their
/// order once replay finishes.
#[derive(Default)]
pub struct RecordingSink {
    pub timestamps: Mutex<Vec<i64>>,
    pub random_ints: Mutex<Vec<i32>>,
}

impl AsyncDeterminantSink for RecordingSink {
    fn on_timestamp(&self, timestamp_millis: i64) {
        self.timestamps.lock().unwrap().push(timestamp_millis);
    }

    fn on_random_int(&self, value: i32) {
        self.random_ints.lock().unwrap().push(value);
    }
}

/// A `CausalLogStore` whose lengths are fixed in at construction time,
/// matching whatever log bytes the scenario encoded up front.
#[derive(Default)]
pub struct FixedCausalLog {
    pub main_thread_log_length: usize,
    pub subpartition_log_lengths: std::collections::HashMap<(DatasetId, SubpartitionIndex), usize>,
}

impl CausalLogStore for FixedCausalLog {
    fn main_thread_log_length(&self) -> usize {
        self.main_thread_log_length
    }

    fn subpartition_log_length(&self, dataset_id: DatasetId, subpartition: SubpartitionIndex) -> usize {
        self.subpartition_log_lengths
            .get(&(dataset_id, subpartition))
            .copied()
            .unwrap_or(0)
    }
}

/// A `WatermarkGauge` that drops every reading; the demo scenarios only
/// care about the operator/epoch side, not an exported gauge.
#[derive(Default)]
pub struct NoOpGauge;

impl WatermarkGauge for NoOpGauge {
    fn set(&self, _timestamp_millis: i64) {}
}

/// A `StatusMaintainer` that drops every toggle.
#[derive(Default)]
pub struct NoOpStatus;

impl StatusMaintainer for NoOpStatus {
    fn toggle(&self, _status: StreamStatus) {}
}

/// Wires an operator and valve into an `OperatorState`, resolving
/// `numRecordsIn` from the operator's own metric group where the demo
/// operators implement one, and no-op gauge/status collaborators
/// otherwise.
pub fn operator_state<O, V>(operator: O, valve: V) -> OperatorState<O, V>
where
    O: Operator,
{
    OperatorState::new(
        operator,
        valve,
        std::sync::Arc::new(NoOpGauge),
        std::sync::Arc::new(NoOpStatus),
    )
}

pub fn buffer_event(channel: causalstream_core::contracts::Channel, text: &str) -> BufferOrEvent {
    BufferOrEvent::Buffer {
        channel,
        buffer: Buffer::new(bytes::Bytes::copy_from_slice(text.as_bytes())),
    }
}

pub fn end_of_partition_event(channel: causalstream_core::contracts::Channel) -> BufferOrEvent {
    BufferOrEvent::Event {
        channel,
        event: InputEvent::EndOfPartition,
    }
}
