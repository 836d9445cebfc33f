use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use causalstream_determinant::{Channel, DatasetId, SubpartitionIndex, VertexCausalLogDelta};
use dashmap::DashMap;
use tokio::sync::watch;

use super::replaying::ReplayingState;
use super::subpartition_thread::SubpartitionRecoveryThread;
use crate::contracts::{AsyncDeterminantSink, CausalLogStore, InFlightLogRequestEvent, PipelinedSubpartition};
use crate::error::CoreError;

/// `WaitingConnections -> Replaying -> Running`. Only the `Replaying`
/// entry and exit are modelled here; `WaitingConnections` is a marker the
/// task starts in before a `VertexCausalLogDelta` arrives.
enum State {
    WaitingConnections,
    Replaying(ReplayingState),
    Running,
}

/// Shared context for the recovery state machine. One instance per
/// recovering task; the force-feeder, the operator/output side, and the
/// subpartition recovery threads all hold an `Arc` to it.
pub struct RecoveryManager {
    state: Mutex<State>,
    subpartition_table: DashMap<(DatasetId, SubpartitionIndex), Arc<dyn PipelinedSubpartition>>,
    causal_log: Arc<dyn CausalLogStore>,
    async_sink: Arc<dyn AsyncDeterminantSink>,
    unanswered_in_flight_log_requests: Mutex<Vec<InFlightLogRequestEvent>>,
    number_of_recovering_subpartitions: Arc<AtomicI64>,
    recovery_interrupt: Arc<AtomicBool>,
    ready_to_replay_tx: watch::Sender<bool>,
    ready_to_replay_rx: watch::Receiver<bool>,
}

impl RecoveryManager {
    pub fn new(
        causal_log: Arc<dyn CausalLogStore>,
        async_sink: Arc<dyn AsyncDeterminantSink>,
        subpartition_table: DashMap<(DatasetId, SubpartitionIndex), Arc<dyn PipelinedSubpartition>>,
    ) -> Self {
        let (ready_to_replay_tx, ready_to_replay_rx) = watch::channel(false);
        Self {
            state: Mutex::new(State::WaitingConnections),
            subpartition_table,
            causal_log,
            async_sink,
            unanswered_in_flight_log_requests: Mutex::new(Vec::new()),
            number_of_recovering_subpartitions: Arc::new(AtomicI64::new(0)),
            recovery_interrupt: Arc::new(AtomicBool::new(false)),
            ready_to_replay_tx,
            ready_to_replay_rx,
        }
    }

    pub fn number_of_recovering_subpartitions(&self) -> i64 {
        self.number_of_recovering_subpartitions.load(Ordering::SeqCst)
    }

    /// Completes once `enter_replaying` has spawned recovery threads and
    /// decoded the main-thread log's first determinant — independent of
    /// whether those threads have finished.
    pub async fn wait_ready_to_replay(&self) {
        let mut rx = self.ready_to_replay_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    /// Entry into `Replaying` (§4.4): spawns one recovery thread per
    /// `(dataset, subpartition)` delta, stores the main-thread buffer, and
    /// decodes it into the replay queues. Signals `wait_ready_to_replay`
    /// once this returns.
    pub fn enter_replaying(
        &self,
        delta: VertexCausalLogDelta,
    ) -> Result<Vec<std::thread::JoinHandle<anyhow::Result<()>>>, CoreError> {
        let mut handles = Vec::with_capacity(delta.subpartition_count());

        for (dataset_id, by_subpartition) in &delta.partition_deltas {
            for (subpartition, buffer) in by_subpartition {
                let Some(handle) = self
                    .subpartition_table
                    .get(&(*dataset_id, *subpartition))
                    .map(|entry| Arc::clone(entry.value()))
                else {
                    tracing::error!(
                        ?dataset_id,
                        subpartition,
                        "no PipelinedSubpartition registered for recovered dataset"
                    );
                    continue;
                };

                let pending_request = {
                    let mut pending = self.unanswered_in_flight_log_requests.lock().unwrap();
                    let position = pending.iter().position(|r| {
                        r.dataset_id == *dataset_id && r.subpartition == *subpartition
                    });
                    position.map(|i| pending.remove(i))
                };

                handles.push(SubpartitionRecoveryThread::spawn(
                    *dataset_id,
                    *subpartition,
                    buffer.clone(),
                    handle,
                    Arc::clone(&self.causal_log),
                    Arc::clone(&self.number_of_recovering_subpartitions),
                    Arc::clone(&self.recovery_interrupt),
                    pending_request,
                ));
            }
        }

        let replaying = ReplayingState::from_main_thread_delta(delta.main_thread_delta)?;
        let finished = replaying.is_finished();
        {
            let mut state = self.state.lock().unwrap();
            *state = State::Replaying(replaying);
        }
        if finished {
            self.finish_replaying()?;
        }

        let _ = self.ready_to_replay_tx.send(true);
        Ok(handles)
    }

    fn with_replaying<T>(
        &self,
        f: impl FnOnce(&mut ReplayingState) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            State::Replaying(replaying) => {
                let result = f(replaying)?;
                if replaying.is_finished() {
                    let main_log_len = replaying.main_log_len();
                    drop(state);
                    self.finish_replaying_with_len(main_log_len)?;
                }
                Ok(result)
            }
            _ => Err(CoreError::NotReplaying),
        }
    }

    pub fn replay_next_channel(&self) -> Result<Channel, CoreError> {
        self.with_replaying(|r| r.replay_next_channel())
    }

    pub fn replay_next_random_route(&self) -> Result<Channel, CoreError> {
        self.with_replaying(|r| r.replay_next_random_route())
    }

    pub fn replay_next_timestamp(&self) -> Result<i64, CoreError> {
        self.with_replaying(|r| r.replay_next_timestamp())
    }

    pub fn replay_random_int(&self) -> Result<i32, CoreError> {
        self.with_replaying(|r| r.replay_random_int())
    }

    /// Pumps `checkAsyncEvent` for as long as the async queue's head is
    /// due at `current_record_count`, since firing one entry can make the
    /// next one due immediately too. Firing the last entry can itself
    /// finish replaying and transition to `Running` mid-loop — that's not
    /// an error, just nothing left to check.
    pub fn check_async_event(&self, current_record_count: u64) -> Result<(), CoreError> {
        loop {
            let fired = match self.with_replaying(|r| {
                r.check_async_event(current_record_count, self.async_sink.as_ref())
            }) {
                Ok(fired) => fired,
                Err(CoreError::NotReplaying) => return Ok(()),
                Err(other) => return Err(other),
            };
            if !fired {
                return Ok(());
            }
        }
    }

    /// A late-arriving channel's resend request. Honored immediately by
    /// any already-running recovery thread's subpartition, or queued for
    /// the next `enter_replaying` to pick up if recovery hasn't reached it
    /// yet.
    pub fn notify_new_input_channel(&self, request: InFlightLogRequestEvent) {
        causalstream_observability::CORE_METRICS.in_flight_log_requests.inc();
        self.unanswered_in_flight_log_requests
            .lock()
            .unwrap()
            .push(request);
    }

    fn finish_replaying(&self) -> Result<(), CoreError> {
        let main_log_len = {
            let state = self.state.lock().unwrap();
            match &*state {
                State::Replaying(replaying) => replaying.main_log_len(),
                _ => return Ok(()),
            }
        };
        self.finish_replaying_with_len(main_log_len)
    }

    fn finish_replaying_with_len(&self, consumed: usize) -> Result<(), CoreError> {
        let authoritative = self.causal_log.main_thread_log_length();
        if consumed != authoritative {
            causalstream_observability::CORE_METRICS.replay_length_mismatches.inc();
            return Err(CoreError::ReplayLengthMismatch {
                consumed,
                authoritative,
            });
        }
        let mut state = self.state.lock().unwrap();
        *state = State::Running;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.state.lock().unwrap(), State::Running)
    }

    /// Signals recovery threads still rebuilding buffers to stop early.
    pub fn interrupt_recovery(&self) {
        self.recovery_interrupt.store(true, Ordering::SeqCst);
    }
}
