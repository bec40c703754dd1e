//! Per-instance beam: a fixed number of candidate slots, their cumulative
//! scores, and the backpointer chain that lets any slot be traced back to the
//! start sentinel.

use std::cmp::Ordering;

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{invalid_config, DecodeError, Result};
use crate::vocab::Specials;

/// Beam search state for one source instance.
#[derive(Clone, Debug)]
pub struct Beam {
    size: usize,
    specials: Specials,
    done: bool,
    /// Cumulative log-probability of each slot.
    scores: Array1<f32>,
    score_history: Vec<Array1<f32>>,
    /// One vector per step, indexing into the previous step's slots.
    backpointers: Vec<Vec<usize>>,
    /// One vector per step; step 0 is the seed.
    tokens: Vec<Vec<usize>>,
}

impl Beam {
    pub fn new(size: usize, specials: Specials) -> Result<Self> {
        if size < 1 {
            return Err(invalid_config("beam size must be at least 1"));
        }
        let mut seed = vec![specials.pad; size];
        seed[0] = specials.start;
        Ok(Self {
            size,
            specials,
            done: false,
            scores: Array1::zeros(size),
            score_history: Vec::new(),
            backpointers: Vec::new(),
            tokens: vec![seed],
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of completed advances.
    pub fn steps(&self) -> usize {
        self.backpointers.len()
    }

    pub fn scores(&self) -> &Array1<f32> {
        &self.scores
    }

    pub fn score_history(&self) -> &[Array1<f32>] {
        &self.score_history
    }

    pub fn backpointers(&self) -> &[Vec<usize>] {
        &self.backpointers
    }

    pub fn tokens(&self) -> &[Vec<usize>] {
        &self.tokens
    }

    /// Backpointers chosen by the most recent advance.
    pub fn current_origin(&self) -> Option<&[usize]> {
        self.backpointers.last().map(Vec::as_slice)
    }

    /// Extend the beam by one step given a `size x vocab` matrix of
    /// log-probabilities, one row per slot. Returns whether the beam is done.
    pub fn advance(&mut self, word_prob: ArrayView2<'_, f32>) -> Result<bool> {
        if self.done {
            return Err(DecodeError::BeamFinished);
        }
        let (rows, num_words) = word_prob.dim();
        if rows != self.size {
            return Err(DecodeError::ShapeMismatch {
                context: "beam rows",
                expected: self.size,
                got: rows,
            });
        }

        // The seed slots are identical, so only the first row is a candidate
        // on the first step.
        let flat: Vec<f32> = if self.backpointers.is_empty() {
            word_prob.row(0).to_vec()
        } else {
            let mut beam_lk = word_prob.to_owned();
            beam_lk += &self.scores.view().insert_axis(Axis(1));
            beam_lk.iter().copied().collect()
        };
        if flat.len() < self.size {
            return Err(DecodeError::ShapeMismatch {
                context: "beam candidates",
                expected: self.size,
                got: flat.len(),
            });
        }

        let (best_scores, best_ids) = top_k(&flat, self.size);
        let prev = std::mem::replace(&mut self.scores, Array1::from(best_scores));
        self.score_history.push(prev);

        self.backpointers
            .push(best_ids.iter().map(|&id| id / num_words).collect());
        let next_ys: Vec<usize> = best_ids.iter().map(|&id| id % num_words).collect();
        let top_token = next_ys[0];
        self.tokens.push(next_ys);

        if top_token == self.specials.end {
            self.done = true;
            self.score_history.push(self.scores.clone());
        }
        Ok(self.done)
    }

    /// Scores in descending order with the slot each came from. Ties keep
    /// slot order.
    pub fn sort_scores(&self) -> (Vec<f32>, Vec<usize>) {
        let mut ids: Vec<usize> = (0..self.size).collect();
        ids.sort_by(|&a, &b| self.scores[b].total_cmp(&self.scores[a]));
        let scores = ids.iter().map(|&i| self.scores[i]).collect();
        (scores, ids)
    }

    /// Score and slot of the top-ranked entry.
    pub fn best(&self) -> (f32, usize) {
        let (scores, ids) = self.sort_scores();
        (scores[0], ids[0])
    }

    /// Token sequence ending at slot `rank` of the last step, excluding the
    /// start sentinel.
    pub fn hypothesis(&self, rank: usize) -> Result<Vec<usize>> {
        if rank >= self.size {
            return Err(DecodeError::InvalidRank {
                rank,
                size: self.size,
            });
        }
        Ok(self.walk_back(rank))
    }

    /// Decoder input for the next step: `size x (steps + 1)` token ids, rows
    /// in best-first order, each prefixed with the start sentinel.
    pub fn current_state(&self) -> Array2<usize> {
        if self.backpointers.is_empty() {
            let seed = &self.tokens[0];
            return Array2::from_shape_fn((self.size, 1), |(i, _)| seed[i]);
        }
        let (_, keys) = self.sort_scores();
        let len = self.steps() + 1;
        let mut out = Array2::from_elem((self.size, len), self.specials.start);
        for (row, &k) in keys.iter().enumerate() {
            for (j, tok) in self.walk_back(k).into_iter().enumerate() {
                out[[row, j + 1]] = tok;
            }
        }
        out
    }

    fn walk_back(&self, mut k: usize) -> Vec<usize> {
        let mut hyp = Vec::with_capacity(self.backpointers.len());
        for j in (0..self.backpointers.len()).rev() {
            hyp.push(self.tokens[j + 1][k]);
            k = self.backpointers[j][k];
        }
        hyp.reverse();
        hyp
    }
}

/// Top `k` values by descending score; ties go to the lower index.
fn top_k(values: &[f32], k: usize) -> (Vec<f32>, Vec<usize>) {
    let cmp = |a: &usize, b: &usize| -> Ordering {
        values[*b].total_cmp(&values[*a]).then(a.cmp(b))
    };
    let mut order: Vec<usize> = (0..values.len()).collect();
    if k < order.len() {
        order.select_nth_unstable_by(k - 1, cmp);
        order.truncate(k);
    }
    order.sort_unstable_by(cmp);
    let scores = order.iter().map(|&i| values[i]).collect();
    (scores, order)
}
