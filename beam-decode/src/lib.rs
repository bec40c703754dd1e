//! Batched beam-search decoding for encoder-decoder sequence models.
//!
//! A [`Translator`] drives one [`Beam`] per source instance in lockstep,
//! asking a [`ScoringOracle`] for next-token log-probabilities once per step
//! for the whole active batch. Finished instances are compacted out of the
//! batched tensors by the [`ActiveInstanceTracker`], and ranked outputs are
//! read back from the beams' backpointers by the [`HypothesisExtractor`].

pub mod beam;
pub mod config;
pub mod error;
pub mod greedy;
pub mod hypothesis;
pub mod model;
pub mod oracle;
pub mod tracker;
pub mod translator;
pub mod vocab;

pub use beam::Beam;
pub use config::DecodeConfig;
pub use error::{DecodeError, Result};
pub use greedy::GreedyDecoder;
pub use hypothesis::{Hypothesis, HypothesisExtractor};
pub use oracle::{Scored, ScoringOracle};
pub use tracker::ActiveInstanceTracker;
pub use translator::{DecodeState, Decoded, SearchOutcome, Translator};
pub use vocab::{Specials, Vocab};
