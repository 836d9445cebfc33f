//! Tagged binary codec for causal-replay determinants.
//!
//! A causal log is a flat, unframed concatenation of encoded determinants.
//! Encoding is byte-exact and big-endian throughout so that a log produced
//! by one build decodes cleanly on another.

mod delta;
mod determinant;
mod error;

pub use delta::VertexCausalLogDelta;
pub use determinant::{
    BUFFER_BUILT_TAG, Channel, DatasetId, Determinant, ORDER_TAG, RANDOM_EMIT_TAG, RNG_TAG,
    SubpartitionIndex, TIMESTAMP_TAG, decode_all, decode_next,
};
pub use error::CodecError;
