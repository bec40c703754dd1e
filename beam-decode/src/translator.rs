//! Batched beam search over a [`ScoringOracle`].
//!
//! All instances of a batch advance in lockstep: every step issues a single
//! oracle query for the rows of every still-active instance, hands each
//! instance its `beam_size x vocab` slice, and then compacts finished
//! instances out of the carried tensors before the next step.

use ndarray::{s, Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::beam::Beam;
use crate::config::DecodeConfig;
use crate::error::{invalid_config, Result};
use crate::hypothesis::{Hypothesis, HypothesisExtractor};
use crate::oracle::{
    check_memory, check_scores, check_step_budget, scoring_failure, ScoringOracle,
};
use crate::tracker::{repeat_rows, ActiveInstanceTracker};
use crate::vocab::Vocab;

/// How a search ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeState {
    /// Every instance put the end sentinel on top of its beam.
    Terminated,
    /// The step budget ran out with instances still active.
    StepBudgetExhausted,
}

/// Raw result of a search: the beams themselves, in source order.
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    pub state: DecodeState,
    pub steps: usize,
    pub beams: Vec<Beam>,
    /// Attention returned by the last oracle query, if any.
    pub attention: Option<Array3<f32>>,
}

/// Ranked hypotheses for every instance of a batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decoded {
    pub state: DecodeState,
    pub steps: usize,
    pub hypotheses: Vec<Vec<Hypothesis>>,
}

pub struct Translator<O> {
    oracle: O,
    vocab: Vocab,
    config: DecodeConfig,
}

impl<O: ScoringOracle> Translator<O> {
    pub fn new(oracle: O, vocab: Vocab, config: DecodeConfig) -> Result<Self> {
        config.validate()?;
        check_step_budget(&oracle, config.max_dec_steps)?;
        if oracle.vocab_size() != vocab.len() {
            return Err(invalid_config(format!(
                "oracle scores {} tokens but vocabulary has {}",
                oracle.vocab_size(),
                vocab.len()
            )));
        }
        if config.beam_size > vocab.len() {
            return Err(invalid_config(format!(
                "beam_size {} exceeds vocabulary size {}",
                config.beam_size,
                vocab.len()
            )));
        }
        Ok(Self {
            oracle,
            vocab,
            config,
        })
    }

    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    fn extractor(&self) -> HypothesisExtractor {
        HypothesisExtractor::new(self.config.n_best, self.vocab.specials().end)
    }

    /// Best hypothesis of each source row, as text.
    pub fn translate(&self, src: ArrayView2<'_, usize>) -> Result<Vec<String>> {
        let outcome = self.search(src)?;
        self.extractor().render_best(&outcome.beams, &self.vocab)
    }

    /// Encode whitespace-separated sentences with the vocabulary and translate
    /// them as one batch.
    pub fn translate_text<S: AsRef<str>>(&self, sentences: &[S]) -> Result<Vec<String>> {
        let src = self.vocab.encode_batch(sentences);
        self.translate(src.view())
    }

    /// Up to `n_best` ranked hypotheses per source row.
    pub fn beam_search(&self, src: ArrayView2<'_, usize>) -> Result<Decoded> {
        let outcome = self.search(src)?;
        Ok(Decoded {
            state: outcome.state,
            steps: outcome.steps,
            hypotheses: self.extractor().extract_all(&outcome.beams)?,
        })
    }

    /// Run the step loop and return the beams.
    #[instrument(skip_all, fields(batch = src.nrows(), beam_size = self.config.beam_size))]
    pub fn search(&self, src: ArrayView2<'_, usize>) -> Result<SearchOutcome> {
        let n_bm = self.config.beam_size;
        let max_steps = self.config.max_dec_steps;
        let vocab_size = self.vocab.len();
        let specials = self.vocab.specials();
        let n_inst = src.nrows();

        if n_inst == 0 {
            return Ok(SearchOutcome {
                state: DecodeState::Terminated,
                steps: 0,
                beams: Vec::new(),
                attention: None,
            });
        }

        let src_mask = src.mapv(|t| t == specials.pad);
        let enc = self
            .oracle
            .encode(src, src_mask.view())
            .map_err(scoring_failure)?;
        check_memory(&enc, n_inst)?;

        let mut memory = repeat_rows(&enc, n_bm);
        let mut src_mask = repeat_rows(&src_mask, n_bm);

        let mut beams = (0..n_inst)
            .map(|_| Beam::new(n_bm, specials))
            .collect::<Result<Vec<_>>>()?;
        let mut tracker = ActiveInstanceTracker::new(n_inst, n_bm);

        let mut state = DecodeState::StepBudgetExhausted;
        let mut steps = 0;
        let mut attention = None;

        for len_dec_seq in 1..=max_steps {
            steps = len_dec_seq;
            let n_active = tracker.len();

            let dec_seq = prepare_dec_seq(&beams, &tracker, len_dec_seq);
            let scored = self
                .oracle
                .score(dec_seq.view(), memory.view(), src_mask.view())
                .map_err(scoring_failure)?;
            check_scores(&scored, n_active * n_bm, vocab_size)?;

            let mut survivors = Vec::with_capacity(n_active);
            for (pos, &inst) in tracker.active().iter().enumerate() {
                let word_prob = scored.log_probs.slice(s![pos * n_bm..(pos + 1) * n_bm, ..]);
                if !beams[inst].advance(word_prob)? {
                    survivors.push(inst);
                }
            }
            attention = scored.attention;

            debug!(
                step = len_dec_seq,
                active = n_active,
                finished = n_active - survivors.len(),
                "decode step"
            );

            if survivors.is_empty() {
                state = DecodeState::Terminated;
                break;
            }
            if len_dec_seq == max_steps {
                break;
            }

            if survivors.len() < n_active {
                let plan = tracker.compaction(&survivors)?;
                memory = plan.apply(&memory)?;
                src_mask = plan.apply(&src_mask)?;
                tracker.commit(plan);
            }
        }

        if state == DecodeState::StepBudgetExhausted {
            warn!(
                max_steps,
                unfinished = unfinished(&beams),
                "step budget exhausted before every beam finished"
            );
        }
        info!(?state, steps, "beam search finished");
        Ok(SearchOutcome {
            state,
            steps,
            beams,
            attention,
        })
    }
}

/// Stack the tentative hypotheses of every active beam, in tracker order.
fn prepare_dec_seq(
    beams: &[Beam],
    tracker: &ActiveInstanceTracker,
    len_dec_seq: usize,
) -> Array2<usize> {
    let n_bm = tracker.beam_size();
    let mut dec_seq = Array2::zeros((tracker.len() * n_bm, len_dec_seq));
    for (pos, &inst) in tracker.active().iter().enumerate() {
        dec_seq
            .slice_mut(s![pos * n_bm..(pos + 1) * n_bm, ..])
            .assign(&beams[inst].current_state());
    }
    dec_seq
}

fn unfinished(beams: &[Beam]) -> usize {
    beams.iter().filter(|b| !b.is_done()).count()
}
