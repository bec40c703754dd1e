use ndarray::{Array2, ArrayView1, ArrayView2};
use tracing::debug;

use crate::error::{invalid_config, Result};
use crate::hypothesis::trim_at;
use crate::oracle::{
    check_memory, check_scores, check_step_budget, scoring_failure, ScoringOracle,
};
use crate::vocab::Vocab;

/// Batched arg-max decoding: every row extends with its most likely token
/// until all rows have produced the end sentinel or the step budget is spent.
pub struct GreedyDecoder<O> {
    oracle: O,
    vocab: Vocab,
    max_dec_steps: usize,
}

impl<O: ScoringOracle> GreedyDecoder<O> {
    pub fn new(oracle: O, vocab: Vocab, max_dec_steps: usize) -> Result<Self> {
        if max_dec_steps < 1 {
            return Err(invalid_config("max_dec_steps must be at least 1"));
        }
        check_step_budget(&oracle, max_dec_steps)?;
        if oracle.vocab_size() != vocab.len() {
            return Err(invalid_config(format!(
                "oracle scores {} tokens but vocabulary has {}",
                oracle.vocab_size(),
                vocab.len()
            )));
        }
        Ok(Self {
            oracle,
            vocab,
            max_dec_steps,
        })
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// Token ids for each source row, cut at the first end sentinel.
    pub fn decode(&self, src: ArrayView2<'_, usize>) -> Result<Vec<Vec<usize>>> {
        let specials = self.vocab.specials();
        let n_inst = src.nrows();
        if n_inst == 0 {
            return Ok(Vec::new());
        }

        let src_mask = src.mapv(|t| t == specials.pad);
        let memory = self
            .oracle
            .encode(src, src_mask.view())
            .map_err(scoring_failure)?;
        check_memory(&memory, n_inst)?;

        let mut seqs = vec![vec![specials.start]; n_inst];
        let mut finished = vec![false; n_inst];
        for step in 1..=self.max_dec_steps {
            let ys = Array2::from_shape_fn((n_inst, step), |(i, j)| seqs[i][j]);
            let scored = self
                .oracle
                .score(ys.view(), memory.view(), src_mask.view())
                .map_err(scoring_failure)?;
            check_scores(&scored, n_inst, self.vocab.len())?;

            for ((seq, done), row) in seqs
                .iter_mut()
                .zip(finished.iter_mut())
                .zip(scored.log_probs.outer_iter())
            {
                let tok = argmax(row);
                *done |= tok == specials.end;
                seq.push(tok);
            }

            debug!(step, finished = finished.iter().filter(|&&d| d).count(), "greedy step");
            if finished.iter().all(|&d| d) {
                break;
            }
        }

        Ok(seqs
            .into_iter()
            .map(|seq| trim_at(seq[1..].to_vec(), specials.end))
            .collect())
    }

    pub fn translate(&self, src: ArrayView2<'_, usize>) -> Result<Vec<String>> {
        Ok(self
            .decode(src)?
            .iter()
            .map(|ids| self.vocab.decode(ids))
            .collect())
    }
}

/// Index of the largest value; ties go to the lower index.
fn argmax(row: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}
