use thiserror::Error;

/// Errors raised by the CRF layer.
///
/// Every variant aborts the current sequence only; nothing here is shared
/// between sequences, so callers may keep processing other inputs.
#[derive(Debug, Error)]
pub enum CrfError {
    /// A sequence of length zero reached the lattice.
    #[error("sequence is empty")]
    EmptySequence,

    /// A tag index outside `[0, K)`.
    #[error("tag index {tag} out of range for {num_tags} tags")]
    TagOutOfRange {
        /// The offending index.
        tag: usize,
        /// Size of the tag space.
        num_tags: usize,
    },

    /// A table or matrix does not have the size implied by `K` or `T`.
    #[error("{what}: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Which buffer failed the check.
        what: &'static str,
        /// Required element count.
        expected: usize,
        /// Observed element count.
        actual: usize,
    },

    /// The left-to-right and right-to-left encoder streams disagree in length.
    #[error("encoder feature streams differ in length: left {left}, right {right}")]
    FeatureLengthMismatch {
        /// Timesteps in the left-to-right stream.
        left: usize,
        /// Timesteps in the right-to-left stream.
        right: usize,
    },

    /// The gold sequence does not cover every timestep.
    #[error("gold sequence has {actual} tags but the input has {expected} timesteps")]
    GoldLengthMismatch {
        /// Number of timesteps.
        expected: usize,
        /// Number of gold tags.
        actual: usize,
    },

    /// The tag space was used before it was frozen.
    #[error("tag space is not frozen")]
    NotFrozen,

    /// An insert into a tag space that is already frozen.
    #[error("tag space is frozen, cannot add {0:?}")]
    FrozenTagSpace(String),

    /// A tag string that the tag space does not know.
    #[error("unknown tag {0:?}")]
    UnknownTag(String),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Dropout probability outside `[0, 1)`.
    #[error("dropout must be in [0, 1), got {0}")]
    InvalidDropout(f32),

    /// A checkpoint that could not be read or does not match the model.
    #[error("invalid checkpoint: {0}")]
    Checkpoint(String),

    /// I/O failure while reading a checkpoint.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for CRF operations.
pub type Result<T> = std::result::Result<T, CrfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = CrfError::TagOutOfRange { tag: 7, num_tags: 3 };
        assert_eq!(err.to_string(), "tag index 7 out of range for 3 tags");

        let err = CrfError::ShapeMismatch {
            what: "crf.trans",
            expected: 9,
            actual: 4,
        };
        assert!(err.to_string().contains("crf.trans"));
        assert!(err.to_string().contains('9'));

        let err = CrfError::InvalidDropout(1.5);
        assert_eq!(err.to_string(), "dropout must be in [0, 1), got 1.5");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CrfError>();
    }
}
