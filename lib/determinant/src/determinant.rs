use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Absolute index of an input channel, as carried by `Order`/`RandomEmit`.
pub type Channel = u8;

/// Index of an output subpartition within a dataset, as carried by
/// `BufferBuilt`.
pub type SubpartitionIndex = u8;

/// Tag bytes from the wire format. Never renumber these: a log written by
/// one build must decode cleanly on another.
pub const ORDER_TAG: u8 = 0;
pub const RANDOM_EMIT_TAG: u8 = 1;
pub const TIMESTAMP_TAG: u8 = 2;
pub const RNG_TAG: u8 = 3;
pub const BUFFER_BUILT_TAG: u8 = 4;

/// Identifies the output dataset a `BufferBuilt` determinant refers to.
/// Encoded as two big-endian `i64`s (upper, lower), matching the 16-byte
/// id field of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatasetId {
    pub upper: i64,
    pub lower: i64,
}

impl DatasetId {
    pub const fn new(upper: i64, lower: i64) -> Self {
        Self { upper, lower }
    }
}

/// One recorded non-deterministic decision. See the wire format table in
/// the causal-replay core's external interfaces section; byte order is
/// big-endian throughout and each variant has a fixed-length payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Determinant {
    /// The next record was read from this channel.
    Order(Channel),
    /// Random-routing selected this channel.
    RandomEmit(Channel),
    /// `System.currentTimeMillis()`-equivalent returned this value.
    Timestamp(i64),
    /// `Random.nextInt()`-equivalent returned this value.
    Rng(i32),
    /// A buffer of `length` bytes was cut on `(dataset_id, subpartition)`.
    BufferBuilt {
        dataset_id: DatasetId,
        subpartition: SubpartitionIndex,
        length: i32,
    },
}

impl Determinant {
    /// The one-byte tag this determinant encodes as.
    pub const fn tag(&self) -> u8 {
        match self {
            Determinant::Order(_) => ORDER_TAG,
            Determinant::RandomEmit(_) => RANDOM_EMIT_TAG,
            Determinant::Timestamp(_) => TIMESTAMP_TAG,
            Determinant::Rng(_) => RNG_TAG,
            Determinant::BufferBuilt { .. } => BUFFER_BUILT_TAG,
        }
    }

    /// True for `Order`/`RandomEmit`: these correspond 1:1 with a dispatched
    /// `StreamElement` and are what channel-selection consumers drain.
    pub const fn is_channel_selection(&self) -> bool {
        matches!(self, Determinant::Order(_) | Determinant::RandomEmit(_))
    }

    /// True for `Timestamp`/`Rng`: the values the operator/output side pull
    /// on demand rather than consuming synchronously with a read.
    pub const fn is_async(&self) -> bool {
        matches!(self, Determinant::Timestamp(_) | Determinant::Rng(_))
    }

    /// Total encoded length in bytes, tag included.
    pub const fn encoded_len(&self) -> usize {
        match self {
            Determinant::Order(_) | Determinant::RandomEmit(_) => 2,
            Determinant::Rng(_) => 5,
            Determinant::Timestamp(_) => 9,
            Determinant::BufferBuilt { .. } => 22,
        }
    }

    /// Serializes this determinant, tag included, into `buf`.
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.tag());
        match self {
            Determinant::Order(channel) | Determinant::RandomEmit(channel) => {
                buf.put_u8(*channel);
            }
            Determinant::Timestamp(ts) => buf.put_i64(*ts),
            Determinant::Rng(n) => buf.put_i32(*n),
            Determinant::BufferBuilt {
                dataset_id,
                subpartition,
                length,
            } => {
                buf.put_i64(dataset_id.upper);
                buf.put_i64(dataset_id.lower);
                buf.put_u8(*subpartition);
                buf.put_i32(*length);
            }
        }
    }

    /// One-shot encode into a freshly allocated buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }
}

fn require(buf: &impl Buf, n: usize, tag: u8) -> Result<(), CodecError> {
    if buf.remaining() < n {
        Err(CodecError::CorruptLog(format!(
            "truncated payload for determinant tag {tag}: need {n} more bytes, have {}",
            buf.remaining()
        )))
    } else {
        Ok(())
    }
}

/// Decodes a single determinant from the front of `cursor`, advancing it
/// past the consumed bytes. Returns `Ok(None)` at a clean end of stream;
/// an unknown tag or a payload truncated mid-field is `CorruptLog`.
pub fn decode_next(cursor: &mut impl Buf) -> Result<Option<Determinant>, CodecError> {
    if !cursor.has_remaining() {
        return Ok(None);
    }
    let tag = cursor.get_u8();
    let determinant = match tag {
        ORDER_TAG => {
            require(cursor, 1, tag)?;
            Determinant::Order(cursor.get_u8())
        }
        RANDOM_EMIT_TAG => {
            require(cursor, 1, tag)?;
            Determinant::RandomEmit(cursor.get_u8())
        }
        TIMESTAMP_TAG => {
            require(cursor, 8, tag)?;
            Determinant::Timestamp(cursor.get_i64())
        }
        RNG_TAG => {
            require(cursor, 4, tag)?;
            Determinant::Rng(cursor.get_i32())
        }
        BUFFER_BUILT_TAG => {
            require(cursor, 21, tag)?;
            let upper = cursor.get_i64();
            let lower = cursor.get_i64();
            let subpartition = cursor.get_u8();
            let length = cursor.get_i32();
            Determinant::BufferBuilt {
                dataset_id: DatasetId::new(upper, lower),
                subpartition,
                length,
            }
        }
        other => {
            return Err(CodecError::CorruptLog(format!(
                "unknown determinant tag {other}"
            )));
        }
    };
    Ok(Some(determinant))
}

/// Decodes every determinant in `cursor` to EOF, in order.
pub fn decode_all(mut cursor: impl Buf) -> Result<Vec<Determinant>, CodecError> {
    let mut out = Vec::new();
    while let Some(determinant) = decode_next(&mut cursor)? {
        out.push(determinant);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(d: Determinant) {
        let encoded = d.encode();
        let mut cursor = encoded.clone();
        assert_eq!(decode_next(&mut cursor).unwrap(), Some(d));
        assert!(!cursor.has_remaining());
    }

    #[test]
    fn order_roundtrips() {
        roundtrip(Determinant::Order(3));
        roundtrip(Determinant::Order(0));
        roundtrip(Determinant::Order(255));
    }

    #[test]
    fn random_emit_roundtrips() {
        roundtrip(Determinant::RandomEmit(7));
    }

    #[test]
    fn timestamp_roundtrips() {
        roundtrip(Determinant::Timestamp(1_700_000_000_000));
        roundtrip(Determinant::Timestamp(-1));
    }

    #[test]
    fn rng_roundtrips() {
        roundtrip(Determinant::Rng(42));
        roundtrip(Determinant::Rng(i32::MIN));
    }

    #[test]
    fn buffer_built_roundtrips() {
        roundtrip(Determinant::BufferBuilt {
            dataset_id: DatasetId::new(0x11, 0x22),
            subpartition: 1,
            length: 4096,
        });
    }

    /// Scenario 1 from the causal-replay core's end-to-end scenarios: a
    /// mixed sequence of all four non-buffer-build-adjacent kinds encodes
    /// to exactly 38 bytes and decodes back to the original sequence.
    #[test]
    fn codec_round_trip_scenario() {
        let sequence = vec![
            Determinant::Order(3),
            Determinant::Rng(42),
            Determinant::Timestamp(1_700_000_000_000),
            Determinant::BufferBuilt {
                dataset_id: DatasetId::new(0x11, 0x22),
                subpartition: 1,
                length: 4096,
            },
        ];

        let mut encoded = BytesMut::new();
        for d in &sequence {
            d.encode_into(&mut encoded);
        }
        assert_eq!(encoded.len(), 38);

        let decoded = decode_all(encoded.freeze()).unwrap();
        assert_eq!(decoded, sequence);
    }

    #[test]
    fn unknown_tag_is_corrupt_log() {
        let bytes = Bytes::from_static(&[0xFF]);
        let err = decode_next(&mut bytes.clone()).unwrap_err();
        assert!(matches!(err, CodecError::CorruptLog(_)));
    }

    #[test]
    fn truncated_payload_is_corrupt_log() {
        // RNG determinant needs 4 payload bytes, only 2 given.
        let bytes = Bytes::from_static(&[RNG_TAG, 0x00, 0x01]);
        let err = decode_next(&mut bytes.clone()).unwrap_err();
        assert!(matches!(err, CodecError::CorruptLog(_)));
    }

    #[test]
    fn decode_next_returns_none_at_eof() {
        let empty = Bytes::new();
        assert_eq!(decode_next(&mut empty.clone()).unwrap(), None);
    }

    proptest::proptest! {
        #[test]
        fn order_prop_roundtrips(channel: u8) {
            roundtrip(Determinant::Order(channel));
        }

        #[test]
        fn rng_prop_roundtrips(n: i32) {
            roundtrip(Determinant::Rng(n));
        }

        #[test]
        fn timestamp_prop_roundtrips(ts: i64) {
            roundtrip(Determinant::Timestamp(ts));
        }

        #[test]
        fn buffer_built_prop_roundtrips(upper: i64, lower: i64, subpartition: u8, length: i32) {
            roundtrip(Determinant::BufferBuilt {
                dataset_id: DatasetId::new(upper, lower),
                subpartition,
                length,
            });
        }

        /// ∀ sequence S. decodeAll(concat(encode(s) for s in S)) = S
        #[test]
        fn decode_all_of_concat_is_identity(
            orders in proptest::collection::vec(0u8..=255, 0..8),
            rngs in proptest::collection::vec(proptest::num::i32::ANY, 0..8),
        ) {
            let mut sequence = Vec::new();
            for c in orders {
                sequence.push(Determinant::Order(c));
            }
            for n in rngs {
                sequence.push(Determinant::Rng(n));
            }
            let mut encoded = BytesMut::new();
            for d in &sequence {
                d.encode_into(&mut encoded);
            }
            let decoded = decode_all(encoded.freeze()).unwrap();
            prop_assert_eq!(decoded, sequence);
        }
    }
}
