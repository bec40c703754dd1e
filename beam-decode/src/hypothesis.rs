use serde::{Deserialize, Serialize};

use crate::beam::Beam;
use crate::error::Result;
use crate::vocab::Vocab;

/// One ranked output sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Cumulative log-probability of the beam slot it was read from.
    pub score: f32,
    /// Token ids up to, not including, the first end sentinel.
    pub tokens: Vec<usize>,
}

/// Reads the top `n_best` hypotheses out of finished (or truncated) beams.
#[derive(Clone, Copy, Debug)]
pub struct HypothesisExtractor {
    n_best: usize,
    end: usize,
}

impl HypothesisExtractor {
    pub fn new(n_best: usize, end: usize) -> Self {
        Self { n_best, end }
    }

    pub fn extract(&self, beam: &Beam) -> Result<Vec<Hypothesis>> {
        let (scores, slots) = beam.sort_scores();
        scores
            .into_iter()
            .zip(slots)
            .take(self.n_best)
            .map(|(score, slot)| {
                let tokens = trim_at(beam.hypothesis(slot)?, self.end);
                Ok(Hypothesis { score, tokens })
            })
            .collect()
    }

    pub fn extract_all(&self, beams: &[Beam]) -> Result<Vec<Vec<Hypothesis>>> {
        beams.iter().map(|b| self.extract(b)).collect()
    }

    /// Best hypothesis of each beam rendered as text.
    pub fn render_best(&self, beams: &[Beam], vocab: &Vocab) -> Result<Vec<String>> {
        beams
            .iter()
            .map(|beam| {
                let (_, slot) = beam.best();
                let tokens = trim_at(beam.hypothesis(slot)?, self.end);
                Ok(vocab.decode(&tokens))
            })
            .collect()
    }
}

/// Cut `tokens` at the first occurrence of `end`.
pub fn trim_at(mut tokens: Vec<usize>, end: usize) -> Vec<usize> {
    if let Some(pos) = tokens.iter().position(|&t| t == end) {
        tokens.truncate(pos);
    }
    tokens
}
