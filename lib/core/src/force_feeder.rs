use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::BytesMut;
use causalstream_determinant::Determinant;

use crate::contracts::{
    BarrierHandler, Channel, InputEvent, NextRecord, Operator, RecordDeserializer, Valve,
};
use crate::dispatch::{OperatorState, dispatch};
use crate::epoch::EpochTracker;
use crate::error::CoreError;
use crate::input_processor::InputLoop;
use crate::recovery::RecoveryManager;

/// The replay-mode input driver: channel selection is pre-determined by
/// the recovery manager's pending `Order` determinant stream rather than
/// by buffer arrival order. Upstream buffers may arrive in a different
/// order than during the original run — the force-feeder always reads the
/// channel the log names next, which reproduces the original logical
/// interleaving regardless.
pub struct ForceFeederInputProcessor<B, D, O, V>
where
    B: BarrierHandler,
    D: RecordDeserializer,
    O: Operator<Record = D::Record>,
    V: Valve,
{
    barrier_handler: B,
    record_deserializers: Vec<D>,
    current_channel: Option<Channel>,
    is_finished: bool,
    operator_state: Arc<Mutex<OperatorState<O, V>>>,
    epoch: Arc<EpochTracker>,
    recovery: Arc<RecoveryManager>,
    /// The log we continue writing to while replaying, so it stays
    /// continuous across the replay/live boundary.
    local_log: BytesMut,
}

impl<B, D, O, V> ForceFeederInputProcessor<B, D, O, V>
where
    B: BarrierHandler,
    D: RecordDeserializer,
    O: Operator<Record = D::Record>,
    V: Valve,
{
    pub fn new(
        barrier_handler: B,
        record_deserializers: Vec<D>,
        operator_state: Arc<Mutex<OperatorState<O, V>>>,
        epoch: Arc<EpochTracker>,
        recovery: Arc<RecoveryManager>,
    ) -> Self {
        Self {
            barrier_handler,
            record_deserializers,
            current_channel: None,
            is_finished: false,
            operator_state,
            epoch,
            recovery,
            local_log: BytesMut::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    /// The `Order`/`RandomEmit` determinants we re-recorded while
    /// replaying, so the causal log remains continuous into live running.
    pub fn local_log(&self) -> &[u8] {
        &self.local_log
    }

    fn recycle_consumed_buffer(&mut self, channel: Channel) {
        if let Some(buffer) = self.record_deserializers[channel as usize].take_buffer() {
            buffer.recycle();
        }
        self.current_channel = None;
    }

    async fn pin_next_channel(&mut self) -> Result<Channel, CoreError> {
        let channel = self.recovery.replay_next_channel()?;
        self.current_channel = Some(channel);
        Ok(channel)
    }
}

#[async_trait]
impl<B, D, O, V> InputLoop for ForceFeederInputProcessor<B, D, O, V>
where
    B: BarrierHandler,
    D: RecordDeserializer,
    O: Operator<Record = D::Record>,
    V: Valve,
{
    async fn process_input(&mut self) -> Result<bool, CoreError> {
        if self.is_finished {
            return Ok(false);
        }

        let channel = match self.current_channel {
            Some(channel) => channel,
            None => self.pin_next_channel().await?,
        };

        let NextRecord {
            element,
            buffer_consumed,
        } = self.record_deserializers[channel as usize].next_record();

        if buffer_consumed {
            self.recycle_consumed_buffer(channel);
        }

        if let Some(element) = element {
            // Re-record `Order(channel)` once per dispatched element, not
            // once per pin: a buffer that yields several elements must
            // reproduce one `Order` per element, or the re-recorded log
            // would under-count against the original run's.
            self.local_log
                .extend_from_slice(&Determinant::Order(channel).encode());
            // Watermark/status are idempotent valve operations during
            // replay and dispatch the same way as live; only `Record`
            // needs to report "one record processed" to the caller, but
            // every kind makes equal progress for `process_input`'s
            // purposes.
            dispatch(&self.operator_state, &self.epoch, channel, element)?;
            return Ok(true);
        }

        if buffer_consumed {
            // Deserializer unpinned with nothing to dispatch; the next
            // call re-pins via the log's next Order determinant.
            return Ok(true);
        }

        // The buffer that arrives next need not belong to the channel the
        // log currently has pinned for replay — arrival order during
        // replay may differ from the original run. Route it to its own
        // channel's deserializer regardless; `current_channel` still
        // governs which deserializer we next pull a record from.
        match self.barrier_handler.get_next_non_blocked().await {
            Some(crate::contracts::BufferOrEvent::Buffer {
                channel: arrived_channel,
                buffer,
            }) => {
                self.record_deserializers[arrived_channel as usize].set_buffer(buffer);
                Ok(true)
            }
            Some(crate::contracts::BufferOrEvent::Event { channel, event }) => match event {
                InputEvent::EndOfPartition => Ok(true),
                InputEvent::Other(_) => Err(CoreError::UnexpectedEvent { channel }),
            },
            None => {
                self.is_finished = true;
                if !self.barrier_handler.is_empty() {
                    return Err(CoreError::TrailingBarrierData);
                }
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use bytes::{Bytes, BytesMut};
    use causalstream_determinant::{DatasetId, Determinant, SubpartitionIndex};
    use dashmap::DashMap;

    use super::*;
    use crate::contracts::{
        AsyncDeterminantSink, Buffer, BufferOrEvent, CausalLogStore, LatencyMarker, NextRecord,
        StatusMaintainer, StreamElement, StreamStatus, ValveCallbacks, Watermark, WatermarkGauge,
    };
    use crate::recovery::RecoveryManager;

    struct ScriptedBarrierHandler {
        events: VecDeque<BufferOrEvent>,
    }

    #[async_trait]
    impl BarrierHandler for ScriptedBarrierHandler {
        async fn get_next_non_blocked(&mut self) -> Option<BufferOrEvent> {
            self.events.pop_front()
        }
        fn is_empty(&self) -> bool {
            self.events.is_empty()
        }
        fn unblock_channel_if_blocked(&mut self, _channel: Channel) {}
        fn cleanup(&mut self) {}
        fn alignment_duration_nanos(&self) -> u64 {
            0
        }
    }

    /// Single-record-per-buffer deserializer, keyed to whatever channel it
    /// is installed at.
    #[derive(Default)]
    struct OneShotDeserializer {
        pending: Option<Buffer>,
    }

    impl RecordDeserializer for OneShotDeserializer {
        type Record = String;

        fn set_buffer(&mut self, buffer: Buffer) {
            self.pending = Some(buffer);
        }

        fn next_record(&mut self) -> NextRecord<Self::Record> {
            match &self.pending {
                Some(buffer) => NextRecord {
                    element: Some(StreamElement::Record(
                        String::from_utf8(buffer.bytes.to_vec()).unwrap(),
                    )),
                    buffer_consumed: true,
                },
                None => NextRecord {
                    element: None,
                    buffer_consumed: false,
                },
            }
        }

        fn take_buffer(&mut self) -> Option<Buffer> {
            self.pending.take()
        }
    }

    struct RecordingOperator {
        calls: Vec<String>,
    }

    impl Operator for RecordingOperator {
        type Record = String;

        fn process_element(&mut self, record: String) -> anyhow::Result<()> {
            self.calls.push(record);
            Ok(())
        }
        fn process_watermark(&mut self, _watermark: Watermark) -> anyhow::Result<()> {
            Ok(())
        }
        fn process_latency_marker(&mut self, _marker: LatencyMarker) -> anyhow::Result<()> {
            Ok(())
        }
        fn set_key_context_element1(&mut self, _record: &String) {}
        fn metric_group(&self) -> Option<Arc<dyn crate::contracts::OperatorMetricGroup>> {
            None
        }
    }

    struct NoOpValve;
    impl Valve for NoOpValve {
        fn input_watermark(
            &mut self,
            watermark: Watermark,
            _channel: Channel,
            callbacks: &mut ValveCallbacks<'_>,
        ) -> anyhow::Result<()> {
            (callbacks.handle_watermark)(watermark)
        }
        fn input_stream_status(
            &mut self,
            status: StreamStatus,
            _channel: Channel,
            callbacks: &mut ValveCallbacks<'_>,
        ) -> anyhow::Result<()> {
            (callbacks.handle_stream_status)(status)
        }
    }

    struct NoOpGauge;
    impl WatermarkGauge for NoOpGauge {
        fn set(&self, _timestamp_millis: i64) {}
    }
    struct NoOpStatus;
    impl StatusMaintainer for NoOpStatus {
        fn toggle(&self, _status: StreamStatus) {}
    }

    struct NoOpSink;
    impl AsyncDeterminantSink for NoOpSink {
        fn on_timestamp(&self, _timestamp_millis: i64) {}
        fn on_random_int(&self, _value: i32) {}
    }

    struct FixedLengthCausalLog {
        main_thread_log_length: usize,
    }
    impl CausalLogStore for FixedLengthCausalLog {
        fn main_thread_log_length(&self) -> usize {
            self.main_thread_log_length
        }
        fn subpartition_log_length(&self, _dataset_id: DatasetId, _subpartition: SubpartitionIndex) -> usize {
            0
        }
    }

    fn buffer_event(channel: Channel, text: &str) -> BufferOrEvent {
        BufferOrEvent::Buffer {
            channel,
            buffer: Buffer::new(Bytes::from(text.to_string())),
        }
    }

    fn encode_log(determinants: &[Determinant]) -> Bytes {
        let mut buf = BytesMut::new();
        for d in determinants {
            d.encode_into(&mut buf);
        }
        buf.freeze()
    }

    /// Scenario 3: given the log from the two-channel interleaving
    /// scenario (`Order(0), Order(1), Order(0)`) and inputs arriving as
    /// `[C(ch1), A(ch0), B(ch0)]` — a different order than they were
    /// originally recorded in — the force-feeder still feeds A, C, B to
    /// the operator.
    #[tokio::test]
    async fn replay_reproduces_interleaving_despite_different_arrival_order() {
        let log = encode_log(&[
            Determinant::Order(0),
            Determinant::Order(1),
            Determinant::Order(0),
        ]);
        let recovery = Arc::new(RecoveryManager::new(
            Arc::new(FixedLengthCausalLog {
                main_thread_log_length: log.len(),
            }),
            Arc::new(NoOpSink),
            DashMap::new(),
        ));
        recovery
            .enter_replaying(causalstream_determinant::VertexCausalLogDelta::new(
                Some(log),
                Default::default(),
            ))
            .unwrap();

        let events = vec![
            buffer_event(1, "C"),
            buffer_event(0, "A"),
            buffer_event(0, "B"),
        ];
        let operator_state = Arc::new(Mutex::new(OperatorState::new(
            RecordingOperator { calls: Vec::new() },
            NoOpValve,
            Arc::new(NoOpGauge),
            Arc::new(NoOpStatus),
        )));
        let mut processor = ForceFeederInputProcessor::new(
            ScriptedBarrierHandler {
                events: events.into(),
            },
            vec![OneShotDeserializer::default(), OneShotDeserializer::default()],
            Arc::clone(&operator_state),
            Arc::new(EpochTracker::new()),
            recovery,
        );

        for _ in 0..6 {
            processor.process_input().await.unwrap();
        }

        let calls = operator_state.lock().unwrap().operator.calls.clone();
        assert_eq!(calls, vec!["A", "C", "B"]);
    }

    #[tokio::test]
    async fn non_order_determinant_at_log_head_is_fatal() {
        let log = encode_log(&[Determinant::Rng(1)]);
        let recovery = Arc::new(RecoveryManager::new(
            Arc::new(FixedLengthCausalLog {
                main_thread_log_length: log.len(),
            }),
            Arc::new(NoOpSink),
            DashMap::new(),
        ));
        recovery
            .enter_replaying(causalstream_determinant::VertexCausalLogDelta::new(
                Some(log),
                Default::default(),
            ))
            .unwrap();

        let operator_state = Arc::new(Mutex::new(OperatorState::new(
            RecordingOperator { calls: Vec::new() },
            NoOpValve,
            Arc::new(NoOpGauge),
            Arc::new(NoOpStatus),
        )));
        let mut processor = ForceFeederInputProcessor::new(
            ScriptedBarrierHandler {
                events: VecDeque::new(),
            },
            vec![OneShotDeserializer::default()],
            operator_state,
            Arc::new(EpochTracker::new()),
            recovery,
        );

        let err = processor.process_input().await.unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedDeterminant { .. }));
    }
}
