use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::error::{invalid_config, DecodeError, Result};

/// Output of one batched scoring query.
#[derive(Clone, Debug)]
pub struct Scored {
    /// `rows x vocab_size` next-token log-probabilities.
    pub log_probs: Array2<f32>,
    /// Attention weights, if the model exposes them. Not interpreted.
    pub attention: Option<Array3<f32>>,
}

impl Scored {
    pub fn new(log_probs: Array2<f32>) -> Self {
        Self {
            log_probs,
            attention: None,
        }
    }
}

/// A sequence model seen from the decoder: encode a source batch once, then
/// score next tokens for batches of partial outputs.
///
/// Rows of `dec_seq`, `memory` and `src_mask` correspond one to one. `src_mask`
/// is `true` where the source position is padding.
pub trait ScoringOracle {
    fn vocab_size(&self) -> usize;

    /// Longest decoder input the model accepts, if bounded.
    fn max_target_len(&self) -> Option<usize> {
        None
    }

    /// `src` is `batch x src_len`; returns `batch x src_len x hidden`.
    fn encode(&self, src: ArrayView2<'_, usize>, src_mask: ArrayView2<'_, bool>)
        -> Result<Array3<f32>>;

    /// Log-probabilities of the token following each row of `dec_seq`.
    fn score(
        &self,
        dec_seq: ArrayView2<'_, usize>,
        memory: ArrayView3<'_, f32>,
        src_mask: ArrayView2<'_, bool>,
    ) -> Result<Scored>;
}

impl<T: ScoringOracle + ?Sized> ScoringOracle for &T {
    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    fn max_target_len(&self) -> Option<usize> {
        (**self).max_target_len()
    }

    fn encode(
        &self,
        src: ArrayView2<'_, usize>,
        src_mask: ArrayView2<'_, bool>,
    ) -> Result<Array3<f32>> {
        (**self).encode(src, src_mask)
    }

    fn score(
        &self,
        dec_seq: ArrayView2<'_, usize>,
        memory: ArrayView3<'_, f32>,
        src_mask: ArrayView2<'_, bool>,
    ) -> Result<Scored> {
        (**self).score(dec_seq, memory, src_mask)
    }
}

/// Check the encoder returned one memory row per source row.
pub(crate) fn check_memory(memory: &Array3<f32>, rows: usize) -> Result<()> {
    let got = memory.len_of(Axis(0));
    if got != rows {
        return Err(DecodeError::Scoring(format!(
            "encoder returned {got} memory rows for {rows} source rows"
        )));
    }
    Ok(())
}

/// Reject a step budget the oracle cannot score to the end.
pub(crate) fn check_step_budget<O>(oracle: &O, max_dec_steps: usize) -> Result<()>
where
    O: ScoringOracle,
{
    match oracle.max_target_len() {
        Some(limit) if max_dec_steps > limit => Err(invalid_config(format!(
            "max_dec_steps {max_dec_steps} exceeds the oracle's target length limit {limit}"
        ))),
        _ => Ok(()),
    }
}

/// Check the oracle returned one NaN-free row per query row and one column per
/// vocabulary entry.
pub(crate) fn check_scores(scored: &Scored, rows: usize, vocab_size: usize) -> Result<()> {
    let (got_rows, got_cols) = scored.log_probs.dim();
    if got_rows != rows || got_cols != vocab_size {
        return Err(DecodeError::MalformedScores {
            expected_rows: rows,
            expected_cols: vocab_size,
            rows: got_rows,
            cols: got_cols,
        });
    }
    for (row, values) in scored.log_probs.outer_iter().enumerate() {
        if values.iter().any(|v| v.is_nan()) {
            return Err(DecodeError::NanScore { row });
        }
    }
    Ok(())
}

/// Fold any oracle error into the scoring-failure kind.
pub(crate) fn scoring_failure(err: DecodeError) -> DecodeError {
    match err {
        DecodeError::Scoring(_) => err,
        other => DecodeError::Scoring(other.to_string()),
    }
}
