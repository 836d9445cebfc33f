/// Errors raised by the determinant codec.
///
/// These map 1:1 onto the `CorruptLog` / `UnknownDeterminantKind` entries of
/// the causal-replay core's error table.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Decoder found a tag byte that doesn't match any known determinant
    /// variant, or a payload that was truncated before its fixed length.
    #[error("corrupt causal log: {0}")]
    CorruptLog(String),

    /// Encoder was asked to serialize a determinant tag it doesn't
    /// recognise. `Determinant` is matched exhaustively by `encode`, so in
    /// practice this can only be reached through the raw tag-dispatch path
    /// used internally by the decoder; it is kept here for parity with the
    /// causal-replay core's documented error table.
    #[error("unknown determinant kind (tag {0})")]
    UnknownDeterminantKind(u8),
}
