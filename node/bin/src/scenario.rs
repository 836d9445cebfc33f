//! Runnable demonstrations of the causal-replay core's end-to-end
//! scenarios, wired with the mocks in [`crate::mocks`].

use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use causalstream_core::contracts::InputEvent;
use causalstream_core::recovery::RecoveryManager;
use causalstream_core::{EpochTracker, ForceFeederInputProcessor, InputLoop, LiveInputProcessor};
use causalstream_determinant::{DatasetId, Determinant, VertexCausalLogDelta};
use dashmap::DashMap;

use crate::mocks::{
    FixedCausalLog, LineDeserializer, LoggingSubpartition, PassThroughValve, RecordingOperator,
    RecordingSink, ScriptedBarrierHandler, buffer_event, end_of_partition_event, operator_state,
};

/// Two channels interleave during live processing; the operator sees them
/// in arrival order.
pub async fn live_two_channel_interleaving() -> anyhow::Result<()> {
    let barrier_handler = ScriptedBarrierHandler::new(vec![
        buffer_event(0, "A"),
        buffer_event(1, "B"),
        buffer_event(0, "C"),
        end_of_partition_event(0),
        end_of_partition_event(1),
    ]);
    let deserializers = vec![LineDeserializer::default(), LineDeserializer::default()];
    let state = Arc::new(Mutex::new(operator_state(RecordingOperator::default(), PassThroughValve)));
    let epoch = Arc::new(EpochTracker::new());

    let mut processor =
        LiveInputProcessor::new(barrier_handler, deserializers, Arc::clone(&state), Arc::clone(&epoch));

    while processor.process_input().await? {}
    processor.cleanup();

    let records = state.lock().unwrap().operator.records.clone();
    tracing::info!(?records, epoch = epoch.current(), "live scenario finished");
    Ok(())
}

/// Replays the same logical interleaving via the force-feeder, with
/// buffers arriving in a different order than the original run.
pub async fn replay_reproduces_interleaving() -> anyhow::Result<()> {
    let mut main_thread_log = BytesMut::new();
    Determinant::Order(0).encode_into(&mut main_thread_log);
    Determinant::Order(1).encode_into(&mut main_thread_log);
    Determinant::Order(0).encode_into(&mut main_thread_log);

    let causal_log = Arc::new(FixedCausalLog {
        main_thread_log_length: main_thread_log.len(),
        ..Default::default()
    });
    let sink = Arc::new(RecordingSink::default());
    let recovery = Arc::new(RecoveryManager::new(causal_log, sink, DashMap::new()));

    recovery.enter_replaying(VertexCausalLogDelta::new(
        Some(main_thread_log.freeze()),
        Default::default(),
    ))?;

    // Buffers arrive for channel 1 first this time, unlike the original run.
    let barrier_handler = ScriptedBarrierHandler::new(vec![
        buffer_event(1, "B"),
        buffer_event(0, "A"),
        buffer_event(0, "C"),
    ]);
    let deserializers = vec![LineDeserializer::default(), LineDeserializer::default()];
    let state = Arc::new(Mutex::new(operator_state(RecordingOperator::default(), PassThroughValve)));
    let epoch = Arc::new(EpochTracker::new());

    let mut processor = ForceFeederInputProcessor::new(
        barrier_handler,
        deserializers,
        Arc::clone(&state),
        Arc::clone(&epoch),
        Arc::clone(&recovery),
    );

    // Three logged channel selections, each pinned then dispatched on its
    // own call: six calls drains the log exactly, with no live tail to
    // fall through to once it's exhausted.
    for _ in 0..6 {
        processor.process_input().await?;
    }

    let records = state.lock().unwrap().operator.records.clone();
    tracing::info!(?records, "replay reproduced original interleaving despite reordered arrival");
    Ok(())
}

/// A non-`EndOfPartition` event arriving mid-stream is a fatal protocol
/// violation, not a recoverable condition.
pub async fn fatal_event_aborts_processing() -> anyhow::Result<()> {
    let barrier_handler = ScriptedBarrierHandler::new(vec![
        buffer_event(0, "A"),
        causalstream_core::contracts::BufferOrEvent::Event {
            channel: 0,
            event: InputEvent::Other("unexpected-checkpoint-abort".to_string()),
        },
    ]);
    let deserializers = vec![LineDeserializer::default()];
    let state = Arc::new(Mutex::new(operator_state(RecordingOperator::default(), PassThroughValve)));
    let epoch = Arc::new(EpochTracker::new());

    let mut processor = LiveInputProcessor::new(barrier_handler, deserializers, state, epoch);

    // Pinning the buffer, dispatching its one record, then reaching the
    // event each take a call of their own before the event is fatal.
    loop {
        match processor.process_input().await {
            Ok(true) => continue,
            Ok(false) => anyhow::bail!("expected the unexpected event to be fatal"),
            Err(err) => {
                tracing::info!(%err, "unexpected event correctly aborted processing");
                return Ok(());
            }
        }
    }
}

/// A recovery thread rebuilds a subpartition's buffers, logging each one,
/// while the main log replays a `Timestamp` determinant due after its
/// second channel selection.
pub async fn recovery_rebuilds_subpartition_and_fires_async_determinant() -> anyhow::Result<()> {
    let dataset_id = DatasetId::new(1, 1);
    let subpartition = 0;

    let mut main_thread_log = BytesMut::new();
    Determinant::Order(0).encode_into(&mut main_thread_log);
    Determinant::Order(1).encode_into(&mut main_thread_log);
    Determinant::Timestamp(1_700_000_000_000).encode_into(&mut main_thread_log);

    let mut subpartition_log = BytesMut::new();
    Determinant::BufferBuilt {
        dataset_id,
        subpartition,
        length: 128,
    }
    .encode_into(&mut subpartition_log);

    let mut subpartition_log_lengths = std::collections::HashMap::new();
    subpartition_log_lengths.insert((dataset_id, subpartition), subpartition_log.len());
    let causal_log = Arc::new(FixedCausalLog {
        main_thread_log_length: main_thread_log.len(),
        subpartition_log_lengths,
    });
    let sink = Arc::new(RecordingSink::default());

    let subpartitions = DashMap::new();
    subpartitions.insert(
        (dataset_id, subpartition),
        Arc::new(LoggingSubpartition {
            dataset_id,
            subpartition,
        }) as Arc<dyn causalstream_core::contracts::PipelinedSubpartition>,
    );

    let recovery = Arc::new(RecoveryManager::new(causal_log, Arc::clone(&sink), subpartitions));

    let mut partition_deltas = std::collections::HashMap::new();
    let mut by_subpartition = std::collections::HashMap::new();
    by_subpartition.insert(subpartition, subpartition_log.freeze());
    partition_deltas.insert(dataset_id, by_subpartition);

    let handles = recovery.enter_replaying(VertexCausalLogDelta::new(
        Some(main_thread_log.freeze()),
        partition_deltas,
    ))?;

    recovery.wait_ready_to_replay().await;
    recovery.replay_next_channel()?;
    recovery.replay_next_channel()?;
    recovery.check_async_event(2)?;

    for handle in handles {
        handle.join().expect("recovery thread panicked")?;
    }

    tracing::info!(
        timestamps = ?sink.timestamps.lock().unwrap(),
        "recovery thread rebuilt its subpartition and the async determinant fired"
    );
    Ok(())
}
