use std::collections::VecDeque;

use bytes::Bytes;
use causalstream_determinant::{Determinant, decode_all};

use crate::contracts::Channel;
use crate::error::CoreError;

/// An async determinant (`Timestamp`/`Rng`) paired with the record count
/// at which it must fire, derived at decode time as the number of
/// `Order`/`RandomEmit` entries preceding it in the main thread log (see
/// the design notes on why this isn't an extra wire field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingAsync {
    target_count: u64,
    determinant: Determinant,
}

/// Decoded main-thread recovery log, split at entry into the two queues
/// replay operations drain from. `replayNextChannel`/
/// `replayNextRandomRoute` pull the channel-selection queue in order;
/// `checkAsyncEvent` pulls the async queue once the record counter
/// reaches each entry's target.
pub struct ReplayingState {
    channel_queue: VecDeque<Determinant>,
    async_queue: VecDeque<PendingAsync>,
    main_log_len: usize,
    finished: bool,
}

impl ReplayingState {
    /// Builds the entry state from the raw main-thread recovery buffer.
    /// `None` is treated as an empty log, not an error — matching the
    /// design note that `finishReplaying` must not assert on a null
    /// buffer's capacity.
    pub fn from_main_thread_delta(main_thread_delta: Option<Bytes>) -> Result<Self, CoreError> {
        let bytes = main_thread_delta.unwrap_or_default();
        let main_log_len = bytes.len();
        let determinants = decode_all(bytes)?;
        causalstream_observability::CORE_METRICS
            .determinants_decoded
            .inc_by(determinants.len() as u64);

        let mut channel_queue = VecDeque::new();
        let mut async_queue = VecDeque::new();
        for determinant in determinants {
            if determinant.is_channel_selection() {
                channel_queue.push_back(determinant);
            } else if determinant.is_async() {
                async_queue.push_back(PendingAsync {
                    target_count: channel_queue.len() as u64,
                    determinant,
                });
            }
            // BufferBuilt never appears in the main thread log; decode_all
            // would still parse it correctly, but it has no queue here.
        }

        let finished = channel_queue.is_empty() && async_queue.is_empty();
        Ok(Self {
            channel_queue,
            async_queue,
            main_log_len,
            finished,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn main_log_len(&self) -> usize {
        self.main_log_len
    }

    fn mark_finished_if_exhausted(&mut self) {
        if self.channel_queue.is_empty() && self.async_queue.is_empty() {
            self.finished = true;
        }
    }

    /// `replayNextChannel`: the next determinant must be `Order`.
    pub fn replay_next_channel(&mut self) -> Result<Channel, CoreError> {
        match self.channel_queue.pop_front() {
            Some(Determinant::Order(channel)) => {
                self.mark_finished_if_exhausted();
                Ok(channel)
            }
            Some(other) => Err(CoreError::UnexpectedDeterminant {
                expected: "Order",
                actual: other,
            }),
            None => Err(CoreError::UnexpectedDeterminant {
                expected: "Order",
                actual: Determinant::Order(0),
            }),
        }
    }

    /// `replayNextRandomRoute`: the next determinant must be
    /// `RandomEmit`. Supplements `spec.md`'s three-op pull table with the
    /// fourth non-buffer-build variant it defines but never wires up.
    pub fn replay_next_random_route(&mut self) -> Result<Channel, CoreError> {
        match self.channel_queue.pop_front() {
            Some(Determinant::RandomEmit(channel)) => {
                self.mark_finished_if_exhausted();
                Ok(channel)
            }
            Some(other) => Err(CoreError::UnexpectedDeterminant {
                expected: "RandomEmit",
                actual: other,
            }),
            None => Err(CoreError::UnexpectedDeterminant {
                expected: "RandomEmit",
                actual: Determinant::RandomEmit(0),
            }),
        }
    }

    /// `replayNextTimestamp`: pulls the head of the async queue directly,
    /// trusting the caller that it is due. Prefer `checkAsyncEvent` when
    /// the pull should be gated by record count.
    pub fn replay_next_timestamp(&mut self) -> Result<i64, CoreError> {
        match self.async_queue.pop_front() {
            Some(PendingAsync {
                determinant: Determinant::Timestamp(ts),
                ..
            }) => {
                self.mark_finished_if_exhausted();
                Ok(ts)
            }
            Some(other) => {
                self.async_queue.push_front(other);
                Err(CoreError::UnexpectedDeterminant {
                    expected: "Timestamp",
                    actual: other.determinant,
                })
            }
            None => Err(CoreError::UnexpectedDeterminant {
                expected: "Timestamp",
                actual: Determinant::Timestamp(0),
            }),
        }
    }

    /// `replayRandomInt`: as `replay_next_timestamp`, for `Rng`.
    pub fn replay_random_int(&mut self) -> Result<i32, CoreError> {
        match self.async_queue.pop_front() {
            Some(PendingAsync {
                determinant: Determinant::Rng(n),
                ..
            }) => {
                self.mark_finished_if_exhausted();
                Ok(n)
            }
            Some(other) => {
                self.async_queue.push_front(other);
                Err(CoreError::UnexpectedDeterminant {
                    expected: "Rng",
                    actual: other.determinant,
                })
            }
            None => Err(CoreError::UnexpectedDeterminant {
                expected: "Rng",
                actual: Determinant::Rng(0),
            }),
        }
    }

    /// `checkAsyncEvent`: fires the head of the async queue once
    /// `current_record_count` reaches its target, delivering the value to
    /// `sink`. Returns `true` if an event fired (the caller may want to
    /// check again immediately, since firing one may make the next one
    /// due too).
    pub fn check_async_event(
        &mut self,
        current_record_count: u64,
        sink: &dyn crate::contracts::AsyncDeterminantSink,
    ) -> Result<bool, CoreError> {
        let Some(pending) = self.async_queue.front().copied() else {
            return Ok(false);
        };

        if current_record_count > pending.target_count {
            causalstream_observability::CORE_METRICS.record_count_overshoots.inc();
            return Err(CoreError::RecordCountOvershot {
                target: pending.target_count,
                current: current_record_count,
            });
        }
        if current_record_count < pending.target_count {
            return Ok(false);
        }

        self.async_queue.pop_front();
        self.mark_finished_if_exhausted();
        match pending.determinant {
            Determinant::Timestamp(ts) => sink.on_timestamp(ts),
            Determinant::Rng(n) => sink.on_random_int(n),
            _ => unreachable!("only Timestamp/Rng are enqueued as async determinants"),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingSink {
        timestamps: RefCell<Vec<i64>>,
        randoms: RefCell<Vec<i32>>,
    }

    impl crate::contracts::AsyncDeterminantSink for RecordingSink {
        fn on_timestamp(&self, timestamp: i64) {
            self.timestamps.borrow_mut().push(timestamp);
        }
        fn on_random_int(&self, value: i32) {
            self.randoms.borrow_mut().push(value);
        }
    }

    fn encode_log(determinants: &[Determinant]) -> Bytes {
        let mut buf = BytesMut::new();
        for d in determinants {
            d.encode_into(&mut buf);
        }
        buf.freeze()
    }

    #[test]
    fn empty_log_is_immediately_finished() {
        let state = ReplayingState::from_main_thread_delta(None).unwrap();
        assert!(state.is_finished());
        assert_eq!(state.main_log_len(), 0);
    }

    #[test]
    fn replay_next_channel_drains_order_entries_in_order() {
        let log = encode_log(&[Determinant::Order(0), Determinant::Order(1)]);
        let mut state = ReplayingState::from_main_thread_delta(Some(log)).unwrap();
        assert_eq!(state.replay_next_channel().unwrap(), 0);
        assert_eq!(state.replay_next_channel().unwrap(), 1);
        assert!(state.is_finished());
    }

    #[test]
    fn wrong_variant_is_unexpected_determinant() {
        let log = encode_log(&[Determinant::Rng(1)]);
        let mut state = ReplayingState::from_main_thread_delta(Some(log)).unwrap();
        let err = state.replay_next_channel().unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedDeterminant { .. }));
    }

    /// Scenario 6: `[Order(0), Async@recordCount=2, Order(0)]`. After two
    /// records on channel 0, `checkAsyncEvent` must fire the async entry
    /// before the third record's channel becomes available.
    #[test]
    fn async_determinant_fires_at_its_derived_record_count() {
        let log = encode_log(&[
            Determinant::Order(0),
            Determinant::Timestamp(1_700_000_000_000),
            Determinant::Order(0),
        ]);
        let mut state = ReplayingState::from_main_thread_delta(Some(log)).unwrap();
        let sink = RecordingSink::default();

        assert_eq!(state.replay_next_channel().unwrap(), 0);
        assert!(!state.check_async_event(1, &sink).unwrap());
        assert!(sink.timestamps.borrow().is_empty());

        assert!(state.check_async_event(2, &sink).unwrap());
        assert_eq!(*sink.timestamps.borrow(), vec![1_700_000_000_000]);

        assert_eq!(state.replay_next_channel().unwrap(), 0);
        assert!(state.is_finished());
    }

    #[test]
    fn overshooting_target_record_count_is_fatal() {
        let log = encode_log(&[Determinant::Order(0), Determinant::Rng(7)]);
        let mut state = ReplayingState::from_main_thread_delta(Some(log)).unwrap();
        let sink = RecordingSink::default();

        assert_eq!(state.replay_next_channel().unwrap(), 0);
        let err = state.check_async_event(2, &sink).unwrap_err();
        assert!(matches!(err, CoreError::RecordCountOvershot { target: 1, current: 2 }));
    }
}
