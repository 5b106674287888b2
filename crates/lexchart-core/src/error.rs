use thiserror::Error;

/// Errors reported by [`crate::Decoder`].
///
/// A sentence with no parse is *not* an error (the decoder returns an empty
/// result set), and neither is hitting the per-sentence time limit (the
/// decoder stops widening spans and reports what it has, flagging the
/// timeout in [`crate::DecodeStats`]).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("sentence has {len} words, exceeding the configured maximum of {max}")]
    SentenceTooLong { len: usize, max: usize },

    #[error("supplied {tags} tag sets for a {words}-word sentence")]
    TagSequenceLength { words: usize, tags: usize },
}
