use std::collections::HashMap;

use bytes::Bytes;

use crate::determinant::{DatasetId, SubpartitionIndex};

/// Causal log data delivered to a recovering task on restart.
///
/// Produced by the (out-of-scope) causal-log store/transport layer. The
/// recovery state machine only ever reads this once, at entry into
/// `Replaying`.
#[derive(Debug, Clone, Default)]
pub struct VertexCausalLogDelta {
    /// Order/RNG/Timestamp/RandomEmit determinants for the task thread, in
    /// generation order. `None` means the task thread recorded nothing
    /// (equivalent to an empty log, not an error).
    pub main_thread_delta: Option<Bytes>,

    /// BufferBuilt determinants per output subpartition, keyed by dataset
    /// and subpartition index.
    pub partition_deltas: HashMap<DatasetId, HashMap<SubpartitionIndex, Bytes>>,
}

impl VertexCausalLogDelta {
    pub fn new(
        main_thread_delta: Option<Bytes>,
        partition_deltas: HashMap<DatasetId, HashMap<SubpartitionIndex, Bytes>>,
    ) -> Self {
        Self {
            main_thread_delta,
            partition_deltas,
        }
    }

    /// Total number of `(dataset, subpartition)` pairs that need a
    /// recovery thread.
    pub fn subpartition_count(&self) -> usize {
        self.partition_deltas.values().map(|m| m.len()).sum()
    }
}
