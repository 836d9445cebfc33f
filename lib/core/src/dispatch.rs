use std::sync::{Arc, Mutex};

use crate::contracts::{
    Channel, LocalNumRecordsIn, NumRecordsIn, Operator, StatusMaintainer, StreamElement,
    StreamStatus, Valve, ValveCallbacks, Watermark, WatermarkGauge,
};
use crate::epoch::EpochTracker;
use crate::error::CoreError;

/// Everything the task lock guards: the operator, the valve, and the
/// collaborators the valve's emit callbacks report into.
pub struct OperatorState<O, V> {
    pub operator: O,
    pub valve: V,
    pub num_records_in: Arc<dyn NumRecordsIn>,
    pub watermark_gauge: Arc<dyn WatermarkGauge>,
    pub status_maintainer: Arc<dyn StatusMaintainer>,
}

impl<O, V> OperatorState<O, V>
where
    O: Operator,
{
    /// Obtains `numRecordsIn` from the operator's own metric group. Falls
    /// back to a local counter and logs a warning when the group isn't
    /// available yet, rather than failing construction.
    pub fn new(
        operator: O,
        valve: V,
        watermark_gauge: Arc<dyn WatermarkGauge>,
        status_maintainer: Arc<dyn StatusMaintainer>,
    ) -> Self {
        let num_records_in = match operator.metric_group() {
            Some(group) => group.num_records_in(),
            None => {
                tracing::warn!(
                    "operator metric group unavailable; falling back to local numRecordsIn counter"
                );
                Arc::new(LocalNumRecordsIn::new()) as Arc<dyn NumRecordsIn>
            }
        };
        Self {
            operator,
            valve,
            num_records_in,
            watermark_gauge,
            status_maintainer,
        }
    }
}

/// Dispatches one produced `StreamElement` to the operator/valve under the
/// task lock, then increments the record counter exactly once. The lock is
/// never held across the `.await` points of the surrounding input loop —
/// only for the duration of this call.
pub fn dispatch<O, V>(
    lock: &Mutex<OperatorState<O, V>>,
    epoch: &EpochTracker,
    channel: Channel,
    element: StreamElement<O::Record>,
) -> Result<(), CoreError>
where
    O: Operator,
    V: Valve,
{
    {
        let mut guard = lock.lock().expect("task lock poisoned");
        let OperatorState {
            operator,
            valve,
            num_records_in,
            watermark_gauge,
            status_maintainer,
        } = &mut *guard;

        match element {
            StreamElement::Watermark(wm) => {
                let mut handle_watermark = |w: Watermark| {
                    watermark_gauge.set(w.0);
                    operator.process_watermark(w)
                };
                let mut handle_stream_status = |_s: StreamStatus| Ok(());
                let mut callbacks = ValveCallbacks {
                    handle_watermark: &mut handle_watermark,
                    handle_stream_status: &mut handle_stream_status,
                };
                valve
                    .input_watermark(wm, channel, &mut callbacks)
                    .map_err(CoreError::ValveCallback)?;
            }
            StreamElement::StreamStatus(status) => {
                let mut handle_watermark = |_w: Watermark| Ok(());
                let mut handle_stream_status = |s: StreamStatus| {
                    status_maintainer.toggle(s);
                    Ok(())
                };
                let mut callbacks = ValveCallbacks {
                    handle_watermark: &mut handle_watermark,
                    handle_stream_status: &mut handle_stream_status,
                };
                valve
                    .input_stream_status(status, channel, &mut callbacks)
                    .map_err(CoreError::ValveCallback)?;
            }
            StreamElement::LatencyMarker(marker) => {
                operator
                    .process_latency_marker(marker)
                    .map_err(CoreError::ValveCallback)?;
            }
            StreamElement::Record(record) => {
                num_records_in.inc();
                operator.set_key_context_element1(&record);
                operator
                    .process_element(record)
                    .map_err(CoreError::ValveCallback)?;
            }
        }
    }

    epoch.increment();
    causalstream_observability::CORE_METRICS.records_dispatched.inc();
    Ok(())
}
