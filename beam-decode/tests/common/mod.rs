#![allow(dead_code)]

use std::cell::RefCell;

use beam_decode::{DecodeError, Result, Scored, ScoringOracle, Specials, Vocab};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

/// pad 0, end 1, start 2, unk 3.
pub const SPECIALS: Specials = Specials {
    pad: 0,
    end: 1,
    start: 2,
    unk: 3,
};

pub fn vocab(size: usize) -> Vocab {
    let mut tokens: Vec<String> = ["<pad>", "<eos>", "<sos>", "<unk>"]
        .iter()
        .map(|t| t.to_string())
        .collect();
    for i in tokens.len()..size {
        tokens.push(format!("w{i}"));
    }
    tokens.truncate(size);
    Vocab::new(tokens, SPECIALS).unwrap()
}

pub fn ln(probs: &[f32]) -> Vec<f32> {
    probs.iter().map(|p| p.ln()).collect()
}

/// Log-probabilities with `p` on `top` and the rest spread evenly.
pub fn peaked(vocab_size: usize, top: usize, p: f32) -> Vec<f32> {
    let rest = (1.0 - p) / (vocab_size - 1) as f32;
    (0..vocab_size)
        .map(|i| if i == top { p.ln() } else { rest.ln() })
        .collect()
}

/// Oracle driven by a closure of `(instance key, decoder row)`. The key is the
/// first source token of the instance, carried through the encoder memory so
/// that misaligned compaction shows up as wrong scores.
pub struct ScriptedOracle<F> {
    pub vocab_size: usize,
    pub script: F,
    /// Row count of every scoring query, in order.
    pub calls: RefCell<Vec<usize>>,
}

impl<F> ScriptedOracle<F> {
    pub fn new(vocab_size: usize, script: F) -> Self
    where
        F: Fn(usize, &[usize]) -> Vec<f32>,
    {
        Self {
            vocab_size,
            script,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<usize> {
        self.calls.borrow().clone()
    }
}

impl<F> ScoringOracle for ScriptedOracle<F>
where
    F: Fn(usize, &[usize]) -> Vec<f32>,
{
    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn encode(&self, src: ArrayView2<'_, usize>, _: ArrayView2<'_, bool>) -> Result<Array3<f32>> {
        let (n, len) = src.dim();
        Ok(Array3::from_shape_fn((n, len, 1), |(i, j, _)| src[[i, j]] as f32))
    }

    fn score(
        &self,
        dec_seq: ArrayView2<'_, usize>,
        memory: ArrayView3<'_, f32>,
        src_mask: ArrayView2<'_, bool>,
    ) -> Result<Scored> {
        assert_eq!(dec_seq.nrows(), memory.shape()[0]);
        assert_eq!(dec_seq.nrows(), src_mask.nrows());
        self.calls.borrow_mut().push(dec_seq.nrows());
        let rows: Vec<Vec<f32>> = dec_seq
            .outer_iter()
            .enumerate()
            .map(|(i, row)| (self.script)(memory[[i, 0, 0]] as usize, &row.to_vec()))
            .collect();
        // a script may deliberately return the wrong width
        let width = rows.first().map_or(self.vocab_size, Vec::len);
        let out = Array2::from_shape_fn((rows.len(), width), |(i, j)| rows[i][j]);
        Ok(Scored::new(out))
    }
}

/// Oracle that always fails to score.
pub struct BrokenOracle;

impl ScoringOracle for BrokenOracle {
    fn vocab_size(&self) -> usize {
        6
    }

    fn encode(&self, src: ArrayView2<'_, usize>, _: ArrayView2<'_, bool>) -> Result<Array3<f32>> {
        Ok(Array3::zeros((src.nrows(), src.ncols(), 1)))
    }

    fn score(
        &self,
        _: ArrayView2<'_, usize>,
        _: ArrayView3<'_, f32>,
        _: ArrayView2<'_, bool>,
    ) -> Result<Scored> {
        Err(DecodeError::Scoring("device lost".into()))
    }
}

/// Oracle whose encoder drops the last source row.
pub struct ShortMemoryOracle;

impl ScoringOracle for ShortMemoryOracle {
    fn vocab_size(&self) -> usize {
        6
    }

    fn encode(&self, src: ArrayView2<'_, usize>, _: ArrayView2<'_, bool>) -> Result<Array3<f32>> {
        Ok(Array3::zeros((src.nrows().saturating_sub(1), src.ncols(), 1)))
    }

    fn score(
        &self,
        dec_seq: ArrayView2<'_, usize>,
        _: ArrayView3<'_, f32>,
        _: ArrayView2<'_, bool>,
    ) -> Result<Scored> {
        Ok(Scored::new(Array2::zeros((dec_seq.nrows(), 6))))
    }
}
