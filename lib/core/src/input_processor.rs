use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::contracts::{
    BarrierHandler, Buffer, BufferOrEvent, Channel, InputEvent, NextRecord, Operator,
    RecordDeserializer, StreamElement, Valve,
};
use crate::dispatch::{OperatorState, dispatch};
use crate::epoch::EpochTracker;
use crate::error::CoreError;

/// Common shape of the live input processor (§4.2) and the force-feeder
/// (§4.3): both drive one unit of progress per call and share the same
/// dispatch path, differing only in how the next channel is chosen.
#[async_trait]
pub trait InputLoop: Send {
    /// Drives one unit of progress. Returns `true` while more input may be
    /// available, `false` once the upstream stream is definitively
    /// finished — after which it always returns `false`.
    async fn process_input(&mut self) -> Result<bool, CoreError>;
}

/// Demultiplexes arriving byte buffers into typed stream elements per
/// channel, choosing the next channel by buffer arrival order.
pub struct LiveInputProcessor<B, D, O, V>
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
}

impl<B, D, O, V> LiveInputProcessor<B, D, O, V>
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
    ) -> Self {
        Self {
            barrier_handler,
            record_deserializers,
            current_channel: None,
            is_finished: false,
            operator_state,
            epoch,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    /// Recycles any pinned network buffers (each at most once), clears
    /// every deserializer, then cleans up the barrier handler. Safe to
    /// call more than once.
    pub fn cleanup(&mut self) {
        for deserializer in &mut self.record_deserializers {
            if let Some(buffer) = deserializer.take_buffer() {
                buffer.recycle();
            }
        }
        self.barrier_handler.cleanup();
    }

    fn recycle_consumed_buffer(&mut self, channel: Channel) {
        if let Some(buffer) = self.record_deserializers[channel as usize].take_buffer() {
            buffer.recycle();
        }
        self.current_channel = None;
    }

    fn dispatch_element(
        &self,
        channel: Channel,
        element: StreamElement<O::Record>,
    ) -> Result<(), CoreError> {
        dispatch(&self.operator_state, &self.epoch, channel, element)
    }
}

#[async_trait]
impl<B, D, O, V> InputLoop for LiveInputProcessor<B, D, O, V>
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

        if let Some(channel) = self.current_channel {
            let NextRecord {
                element,
                buffer_consumed,
            } = self.record_deserializers[channel as usize].next_record();

            if buffer_consumed {
                self.recycle_consumed_buffer(channel);
            }
            if let Some(element) = element {
                self.dispatch_element(channel, element)?;
                return Ok(true);
            }
            if buffer_consumed {
                // Unpinned with nothing to dispatch this call; fall
                // through to request the next buffer/event below.
            } else {
                return Ok(true);
            }
        }

        match self.barrier_handler.get_next_non_blocked().await {
            Some(BufferOrEvent::Buffer { channel, buffer }) => {
                self.current_channel = Some(channel);
                self.record_deserializers[channel as usize].set_buffer(buffer);
                Ok(true)
            }
            Some(BufferOrEvent::Event { channel, event }) => match event {
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
    use std::sync::Mutex as StdMutex;

    use bytes::Bytes;

    use super::*;
    use crate::contracts::{
        LatencyMarker, StatusMaintainer, StreamStatus, ValveCallbacks, WatermarkGauge,
    };

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

    /// One record per buffer, consumed in exactly one `next_record` call.
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
                Some(buffer) => {
                    let record = String::from_utf8(buffer.bytes.to_vec()).unwrap();
                    NextRecord {
                        element: Some(StreamElement::Record(record)),
                        buffer_consumed: true,
                    }
                }
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
        fn process_watermark(&mut self, watermark: crate::contracts::Watermark) -> anyhow::Result<()> {
            self.calls.push(format!("watermark({})", watermark.0));
            Ok(())
        }
        fn process_latency_marker(&mut self, _marker: LatencyMarker) -> anyhow::Result<()> {
            Ok(())
        }
        fn set_key_context_element1(&mut self, _record: &String) {}
        fn metric_group(&self) -> Option<std::sync::Arc<dyn crate::contracts::OperatorMetricGroup>> {
            None
        }
    }

    struct NoOpValve;

    impl Valve for NoOpValve {
        fn input_watermark(
            &mut self,
            watermark: crate::contracts::Watermark,
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

    fn buffer_event(channel: Channel, text: &str) -> BufferOrEvent {
        BufferOrEvent::Buffer {
            channel,
            buffer: Buffer::new(Bytes::from(text.to_string())),
        }
    }

    fn make_processor(
        events: Vec<BufferOrEvent>,
        channels: usize,
    ) -> (
        LiveInputProcessor<ScriptedBarrierHandler, OneShotDeserializer, RecordingOperator, NoOpValve>,
        Arc<Mutex<OperatorState<RecordingOperator, NoOpValve>>>,
    ) {
        let operator_state = Arc::new(Mutex::new(OperatorState::new(
            RecordingOperator { calls: Vec::new() },
            NoOpValve,
            Arc::new(NoOpGauge),
            Arc::new(NoOpStatus),
        )));
        let processor = LiveInputProcessor::new(
            ScriptedBarrierHandler {
                events: events.into(),
            },
            (0..channels)
                .map(|_| OneShotDeserializer { pending: None })
                .collect(),
            Arc::clone(&operator_state),
            Arc::new(EpochTracker::new()),
        );
        (processor, operator_state)
    }

    #[tokio::test]
    async fn two_channel_interleaving_matches_arrival_order() {
        // Channel 0 delivers [A, B]; channel 1 delivers [C] between them.
        let events = vec![
            buffer_event(0, "A"),
            buffer_event(1, "C"),
            buffer_event(0, "B"),
        ];
        let (mut processor, operator_state) = make_processor(events, 2);

        // Each buffer requires two process_input calls: one to pin it,
        // one to pull the record out.
        for _ in 0..6 {
            assert!(processor.process_input().await.unwrap());
        }

        let calls = operator_state.lock().unwrap().operator.calls.clone();
        assert_eq!(calls, vec!["A", "C", "B"]);
        assert_eq!(processor.epoch.current(), 3);
    }

    #[tokio::test]
    async fn end_of_partition_then_none_finishes_cleanly() {
        let events = vec![BufferOrEvent::Event {
            channel: 0,
            event: InputEvent::EndOfPartition,
        }];
        let (mut processor, _operator_state) = make_processor(events, 1);

        assert!(processor.process_input().await.unwrap());
        assert!(!processor.process_input().await.unwrap());
        assert!(processor.is_finished());
        assert!(!processor.process_input().await.unwrap());
    }

    #[tokio::test]
    async fn non_end_of_partition_event_is_fatal() {
        let events = vec![BufferOrEvent::Event {
            channel: 0,
            event: InputEvent::Other("checkpoint-barrier".to_string()),
        }];
        let (mut processor, _operator_state) = make_processor(events, 1);

        let err = processor.process_input().await.unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedEvent { channel: 0 }));
    }
}
