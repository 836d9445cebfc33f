use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use causalstream_determinant::{DatasetId, Determinant, SubpartitionIndex, decode_next};

use crate::contracts::{CausalLogStore, InFlightLogRequestEvent, PipelinedSubpartition};

/// One OS thread per `(dataset, subpartition)` being recovered, per the
/// preemptive-OS-thread scheduling model: these run alongside the task
/// thread and each other with no inter-thread dependency.
pub struct SubpartitionRecoveryThread {
    dataset_id: DatasetId,
    subpartition: SubpartitionIndex,
    buffer: Bytes,
    subpartition_handle: Arc<dyn PipelinedSubpartition>,
    causal_log: Arc<dyn CausalLogStore>,
    recovering_count: Arc<std::sync::atomic::AtomicI64>,
    interrupt: Arc<AtomicBool>,
    pending_in_flight_request: Option<InFlightLogRequestEvent>,
}

impl SubpartitionRecoveryThread {
    pub fn spawn(
        dataset_id: DatasetId,
        subpartition: SubpartitionIndex,
        buffer: Bytes,
        subpartition_handle: Arc<dyn PipelinedSubpartition>,
        causal_log: Arc<dyn CausalLogStore>,
        recovering_count: Arc<std::sync::atomic::AtomicI64>,
        interrupt: Arc<AtomicBool>,
        pending_in_flight_request: Option<InFlightLogRequestEvent>,
    ) -> std::thread::JoinHandle<anyhow::Result<()>> {
        let worker = Self {
            dataset_id,
            subpartition,
            buffer,
            subpartition_handle,
            causal_log,
            recovering_count,
            interrupt,
            pending_in_flight_request,
        };
        std::thread::Builder::new()
            .name(format!(
                "subpartition-recovery-{}-{}",
                dataset_id.upper, subpartition
            ))
            .spawn(move || worker.run())
            .expect("failed to spawn subpartition recovery thread")
    }

    fn run(mut self) -> anyhow::Result<()> {
        let count = self.recovering_count.fetch_add(1, Ordering::SeqCst) + 1;
        causalstream_observability::CORE_METRICS
            .recovering_subpartitions
            .set(count);
        self.subpartition_handle.mark_recovering_in_flight(true);

        let result = self.rebuild_buffers();

        self.subpartition_handle.mark_recovering_in_flight(false);
        self.subpartition_handle.notify_data_available();
        let count = self.recovering_count.fetch_sub(1, Ordering::SeqCst) - 1;
        causalstream_observability::CORE_METRICS
            .recovering_subpartitions
            .set(count);

        result
    }

    fn rebuild_buffers(&mut self) -> anyhow::Result<()> {
        let mut cursor = self.buffer.clone();
        let mut consumed = 0usize;

        while !cursor.is_empty() {
            if self.interrupt.load(Ordering::SeqCst) {
                anyhow::bail!("subpartition recovery thread interrupted");
            }

            let before = cursor.len();
            let determinant = decode_next(&mut cursor)?.ok_or_else(|| {
                anyhow::anyhow!("recovery buffer truncated mid-determinant")
            })?;
            consumed += before - cursor.len();
            causalstream_observability::CORE_METRICS.determinants_decoded.inc();

            match determinant {
                Determinant::BufferBuilt { length, .. } => {
                    futures::executor::block_on(
                        self.subpartition_handle.rebuild_and_log_buffer(length),
                    )?;
                }
                other => {
                    anyhow::bail!(
                        "expected BufferBuilt determinant while recovering subpartition, got {other:?}"
                    );
                }
            }
        }

        let authoritative = self
            .causal_log
            .subpartition_log_length(self.dataset_id, self.subpartition);
        if consumed != authoritative {
            anyhow::bail!(
                "subpartition recovery length mismatch: consumed {consumed}, authoritative {authoritative}"
            );
        }

        if let Some(request) = self.pending_in_flight_request.take() {
            if let Err(err) = futures::executor::block_on(
                self.subpartition_handle
                    .request_replay(request.current_epoch, request.buffers_to_skip),
            ) {
                tracing::warn!(
                    dataset_id = ?self.dataset_id,
                    subpartition = self.subpartition,
                    %err,
                    "in-flight log request replay failed, continuing"
                );
            }
        }

        Ok(())
    }
}
