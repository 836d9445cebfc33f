use causalstream_determinant::Determinant;

use crate::contracts::Channel;

/// Errors raised by the input processor, force-feeder and recovery state
/// machine. All variants here are fatal: they propagate out of the input
/// loop and abort the task. `MetricsSetupFailure` and `InFlightLogRequestIo`
/// are deliberately absent — those are "log a warning, continue" outcomes
/// and are raised as `tracing::warn!` call sites instead.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A replay operation expected a different determinant variant than the
    /// one at the head of the log.
    #[error("unexpected determinant: wanted {expected}, log had {actual:?}")]
    UnexpectedDeterminant {
        expected: &'static str,
        actual: Determinant,
    },

    /// A non-`EndOfPartition` event arrived on the buffer/event stream.
    #[error("unexpected event on channel {channel}: only EndOfPartition is tolerated")]
    UnexpectedEvent { channel: Channel },

    /// The barrier handler still had pending input after signalling end of
    /// stream.
    #[error("barrier handler not drained after end of stream")]
    TrailingBarrierData,

    /// `finishReplaying`'s consumed-length assertion failed.
    #[error(
        "replay length mismatch: consumed {consumed} bytes, authoritative log is {authoritative} bytes"
    )]
    ReplayLengthMismatch { consumed: usize, authoritative: usize },

    /// An async determinant's scheduled record count was passed without the
    /// event firing.
    #[error("async determinant target record count {target} was overshot: current count is {current}")]
    RecordCountOvershot { target: u64, current: u64 },

    /// A valve callback, or the operator call it triggers, returned an
    /// error.
    #[error(transparent)]
    ValveCallback(#[from] anyhow::Error),

    /// The causal log itself was malformed.
    #[error(transparent)]
    Codec(#[from] causalstream_determinant::CodecError),

    /// A replay operation was called while the recovery state machine
    /// wasn't in `Replaying` (e.g. before `enter_replaying` or after
    /// `finishReplaying`).
    #[error("replay operation called outside the Replaying state")]
    NotReplaying,
}
