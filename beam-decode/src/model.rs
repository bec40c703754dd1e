//! A small encoder-decoder transformer on `ndarray`, used as a reference
//! [`ScoringOracle`]. Weights are random but seeded, so two models built from
//! the same [`ModelArgs`] score identically.

use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{invalid_config, DecodeError, Result};
use crate::oracle::{Scored, ScoringOracle};

/// Configuration for the transformer model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArgs {
    /// Maximum sequence length supported.
    pub max_seq_len: usize,
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Embedding/hidden dimension.
    pub dim: usize,
    /// Number of layers in each of the encoder and decoder.
    pub n_layers: usize,
    /// Number of attention heads.
    pub n_heads: usize,
    /// Hidden dimension of the feed-forward network.
    pub hidden_dim: usize,
    /// Seed for weight initialisation.
    pub seed: u64,
}

impl Default for ModelArgs {
    fn default() -> Self {
        Self {
            max_seq_len: 128,
            vocab_size: 1024,
            dim: 64,
            n_layers: 2,
            n_heads: 4,
            hidden_dim: 256,
            seed: 0,
        }
    }
}

impl ModelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 || self.dim == 0 || self.n_heads == 0 || self.max_seq_len == 0 {
            return Err(invalid_config("model dimensions must be non-zero"));
        }
        if self.dim % self.n_heads != 0 {
            return Err(invalid_config(format!(
                "dim {} is not divisible by n_heads {}",
                self.dim, self.n_heads
            )));
        }
        Ok(())
    }
}

fn uniform(rng: &mut StdRng, shape: (usize, usize)) -> Array2<f32> {
    Array2::from_shape_fn(shape, |_| rng.gen_range(-0.1..0.1))
}

/// Embedding layer mapping token ids to vectors.
pub struct Embedding {
    weight: Array2<f32>, // vocab_size x dim
}

impl Embedding {
    pub fn new(vocab_size: usize, dim: usize, rng: &mut StdRng) -> Self {
        Self {
            weight: uniform(rng, (vocab_size, dim)),
        }
    }

    pub fn forward(&self, tokens: &[usize]) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros((tokens.len(), self.weight.ncols()));
        for (i, &tok) in tokens.iter().enumerate() {
            out.row_mut(i).assign(&self.weight.row(tok));
        }
        out
    }
}

/// Sinusoidal position signal, `len x dim`.
pub fn timing_signal(len: usize, dim: usize) -> Array2<f32> {
    let half = (dim / 2).max(1);
    let log_inc = (10_000f32).ln() / (half.saturating_sub(1).max(1)) as f32;
    Array2::from_shape_fn((len, dim), |(pos, d)| {
        let i = d % half;
        let angle = pos as f32 * (-(i as f32) * log_inc).exp();
        if d < half {
            angle.sin()
        } else {
            angle.cos()
        }
    })
}

/// Fully connected layer.
pub struct Linear {
    weight: Array2<f32>, // out x in
    bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, bias: bool, rng: &mut StdRng) -> Self {
        let weight = uniform(rng, (out_features, in_features));
        let bias = if bias {
            Some(Array1::from_shape_fn(out_features, |_| rng.gen_range(-0.1..0.1)))
        } else {
            None
        };
        Self { weight, bias }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut y = x.dot(&self.weight.t());
        if let Some(b) = &self.bias {
            y += &b.view().insert_axis(Axis(0));
        }
        y
    }
}

/// Root mean square layer normalization.
pub struct RMSNorm {
    weight: Array1<f32>,
    eps: f32,
}

impl RMSNorm {
    pub fn new(dim: usize) -> Self {
        Self {
            weight: Array1::ones(dim),
            eps: 1e-6,
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mean = x.mapv(|v| v * v).sum_axis(Axis(1)) / x.ncols() as f32;
        let denom = mean.mapv(|m| (m + self.eps).sqrt()).insert_axis(Axis(1));
        let norm = x / &denom;
        norm * &self.weight.view().insert_axis(Axis(0))
    }
}

/// Multi-head attention. `mask[[i, j]] == true` hides key `j` from query `i`.
pub struct Attention {
    wq: Linear,
    wk: Linear,
    wv: Linear,
    wo: Linear,
    n_heads: usize,
    head_dim: usize,
}

impl Attention {
    pub fn new(dim: usize, n_heads: usize, rng: &mut StdRng) -> Self {
        let head_dim = dim / n_heads;
        Self {
            wq: Linear::new(dim, dim, false, rng),
            wk: Linear::new(dim, dim, false, rng),
            wv: Linear::new(dim, dim, false, rng),
            wo: Linear::new(dim, dim, false, rng),
            n_heads,
            head_dim,
        }
    }

    /// Returns the projected output and the head-averaged attention weights
    /// (`queries x keys`).
    pub fn forward(
        &self,
        x: &Array2<f32>,
        kv: &Array2<f32>,
        mask: &Array2<bool>,
    ) -> (Array2<f32>, Array2<f32>) {
        let q = self.wq.forward(x);
        let k = self.wk.forward(kv);
        let v = self.wv.forward(kv);
        let (n_q, n_k) = (x.nrows(), kv.nrows());
        let scale = (self.head_dim as f32).sqrt();

        let mut out = Array2::<f32>::zeros((n_q, self.n_heads * self.head_dim));
        let mut avg = Array2::<f32>::zeros((n_q, n_k));
        for h in 0..self.n_heads {
            let cols = s![.., h * self.head_dim..(h + 1) * self.head_dim];
            let qh = q.slice(cols);
            let kh = k.slice(cols);
            let vh = v.slice(cols);

            let mut scores = qh.dot(&kh.t()) / scale;
            for ((i, j), val) in scores.indexed_iter_mut() {
                if mask[[i, j]] {
                    *val = f32::NEG_INFINITY;
                }
            }
            // softmax; a fully masked row attends to nothing
            for mut row in scores.axis_iter_mut(Axis(0)) {
                let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                if max == f32::NEG_INFINITY {
                    row.fill(0.0);
                    continue;
                }
                let mut sum = 0.0;
                for v in row.iter_mut() {
                    *v = (*v - max).exp();
                    sum += *v;
                }
                for v in row.iter_mut() {
                    *v /= sum;
                }
            }
            out.slice_mut(cols).assign(&scores.dot(&vh));
            avg += &scores;
        }
        avg /= self.n_heads as f32;
        (self.wo.forward(&out), avg)
    }
}

/// Simple feed-forward network using SILU activation.
pub struct MLP {
    w1: Linear,
    w2: Linear,
}

impl MLP {
    pub fn new(dim: usize, hidden_dim: usize, rng: &mut StdRng) -> Self {
        Self {
            w1: Linear::new(dim, hidden_dim, false, rng),
            w2: Linear::new(hidden_dim, dim, false, rng),
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let hidden = self.w1.forward(x).mapv(|v| v * (1.0 / (1.0 + (-v).exp()))); // silu
        self.w2.forward(&hidden)
    }
}

/// Self attention followed by a feed-forward layer.
pub struct EncoderBlock {
    attn_norm: RMSNorm,
    attn: Attention,
    ffn_norm: RMSNorm,
    ffn: MLP,
}

impl EncoderBlock {
    pub fn new(args: &ModelArgs, rng: &mut StdRng) -> Self {
        Self {
            attn_norm: RMSNorm::new(args.dim),
            attn: Attention::new(args.dim, args.n_heads, rng),
            ffn_norm: RMSNorm::new(args.dim),
            ffn: MLP::new(args.dim, args.hidden_dim, rng),
        }
    }

    pub fn forward(&self, x: &Array2<f32>, mask: &Array2<bool>) -> Array2<f32> {
        let h = self.attn_norm.forward(x);
        let (h, _) = self.attn.forward(&h, &h, mask);
        let x = x + &h;
        let h = self.ffn_norm.forward(&x);
        let h = self.ffn.forward(&h);
        x + &h
    }
}

/// Causal self attention, attention over the encoder output, feed-forward.
pub struct DecoderBlock {
    self_norm: RMSNorm,
    self_attn: Attention,
    cross_norm: RMSNorm,
    cross_attn: Attention,
    ffn_norm: RMSNorm,
    ffn: MLP,
}

impl DecoderBlock {
    pub fn new(args: &ModelArgs, rng: &mut StdRng) -> Self {
        Self {
            self_norm: RMSNorm::new(args.dim),
            self_attn: Attention::new(args.dim, args.n_heads, rng),
            cross_norm: RMSNorm::new(args.dim),
            cross_attn: Attention::new(args.dim, args.n_heads, rng),
            ffn_norm: RMSNorm::new(args.dim),
            ffn: MLP::new(args.dim, args.hidden_dim, rng),
        }
    }

    pub fn forward(
        &self,
        x: &Array2<f32>,
        memory: &Array2<f32>,
        self_mask: &Array2<bool>,
        cross_mask: &Array2<bool>,
    ) -> (Array2<f32>, Array2<f32>) {
        let h = self.self_norm.forward(x);
        let (h, _) = self.self_attn.forward(&h, &h, self_mask);
        let x = x + &h;
        let h = self.cross_norm.forward(&x);
        let (h, attn) = self.cross_attn.forward(&h, memory, cross_mask);
        let x = x + &h;
        let h = self.ffn_norm.forward(&x);
        let h = self.ffn.forward(&h);
        (x + &h, attn)
    }
}

/// Encoder-decoder transformer with a log-softmax output head.
pub struct Seq2Seq {
    pub args: ModelArgs,
    embed: Embedding,
    timing: Array2<f32>,
    encoder: Vec<EncoderBlock>,
    enc_norm: RMSNorm,
    decoder: Vec<DecoderBlock>,
    dec_norm: RMSNorm,
    head: Linear,
}

impl Seq2Seq {
    pub fn new(args: ModelArgs) -> Result<Self> {
        args.validate()?;
        let mut rng = StdRng::seed_from_u64(args.seed);
        let embed = Embedding::new(args.vocab_size, args.dim, &mut rng);
        let encoder = (0..args.n_layers)
            .map(|_| EncoderBlock::new(&args, &mut rng))
            .collect();
        let decoder = (0..args.n_layers)
            .map(|_| DecoderBlock::new(&args, &mut rng))
            .collect();
        let head = Linear::new(args.dim, args.vocab_size, false, &mut rng);
        Ok(Self {
            timing: timing_signal(args.max_seq_len, args.dim),
            enc_norm: RMSNorm::new(args.dim),
            dec_norm: RMSNorm::new(args.dim),
            args,
            embed,
            encoder,
            decoder,
            head,
        })
    }

    fn check_tokens(&self, tokens: ArrayView2<'_, usize>) -> Result<()> {
        if tokens.ncols() > self.args.max_seq_len {
            return Err(DecodeError::Scoring(format!(
                "sequence length {} exceeds max_seq_len {}",
                tokens.ncols(),
                self.args.max_seq_len
            )));
        }
        if let Some(&bad) = tokens.iter().find(|&&t| t >= self.args.vocab_size) {
            return Err(DecodeError::Scoring(format!(
                "token id {bad} outside vocabulary of {}",
                self.args.vocab_size
            )));
        }
        Ok(())
    }

    fn embed(&self, tokens: &[usize]) -> Array2<f32> {
        self.embed.forward(tokens) + &self.timing.slice(s![..tokens.len(), ..])
    }

    fn encode_row(&self, tokens: &[usize], pad: &[bool]) -> Array2<f32> {
        let mask = Array2::from_shape_fn((tokens.len(), tokens.len()), |(_, j)| pad[j]);
        let mut h = self.embed(tokens);
        for layer in &self.encoder {
            h = layer.forward(&h, &mask);
        }
        self.enc_norm.forward(&h)
    }

    /// Log-probabilities for the token after `tokens`, plus the last layer's
    /// cross attention (`tokens.len() x src_len`).
    fn decode_row(
        &self,
        tokens: &[usize],
        memory: &Array2<f32>,
        src_pad: &[bool],
    ) -> (Array1<f32>, Array2<f32>) {
        let len = tokens.len();
        let self_mask = Array2::from_shape_fn((len, len), |(i, j)| j > i);
        let cross_mask = Array2::from_shape_fn((len, memory.nrows()), |(_, j)| src_pad[j]);

        let mut h = self.embed(tokens);
        let mut attn = Array2::zeros((len, memory.nrows()));
        for layer in &self.decoder {
            let (next, a) = layer.forward(&h, memory, &self_mask, &cross_mask);
            h = next;
            attn = a;
        }
        let h = self.dec_norm.forward(&h);
        let last = h.slice(s![len - 1..len, ..]).to_owned();
        let logits = self.head.forward(&last).row(0).to_owned();
        (log_softmax(&logits), attn)
    }
}

fn log_softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let lse = logits.iter().map(|&v| (v - max).exp()).sum::<f32>().ln() + max;
    logits.mapv(|v| v - lse)
}

impl ScoringOracle for Seq2Seq {
    fn vocab_size(&self) -> usize {
        self.args.vocab_size
    }

    fn max_target_len(&self) -> Option<usize> {
        Some(self.args.max_seq_len)
    }

    fn encode(
        &self,
        src: ArrayView2<'_, usize>,
        src_mask: ArrayView2<'_, bool>,
    ) -> Result<Array3<f32>> {
        self.check_tokens(src)?;
        let (n, len) = src.dim();
        let mut out = Array3::zeros((n, len, self.args.dim));
        for i in 0..n {
            let tokens = src.row(i).to_vec();
            let pad = src_mask.row(i).to_vec();
            out.slice_mut(s![i, .., ..])
                .assign(&self.encode_row(&tokens, &pad));
        }
        Ok(out)
    }

    fn score(
        &self,
        dec_seq: ArrayView2<'_, usize>,
        memory: ArrayView3<'_, f32>,
        src_mask: ArrayView2<'_, bool>,
    ) -> Result<Scored> {
        self.check_tokens(dec_seq)?;
        let rows = dec_seq.nrows();
        if memory.len_of(Axis(0)) != rows {
            return Err(DecodeError::ShapeMismatch {
                context: "encoder memory rows",
                expected: rows,
                got: memory.len_of(Axis(0)),
            });
        }
        if src_mask.nrows() != rows {
            return Err(DecodeError::ShapeMismatch {
                context: "source mask rows",
                expected: rows,
                got: src_mask.nrows(),
            });
        }
        let src_len = memory.len_of(Axis(1));
        let mut log_probs = Array2::zeros((rows, self.args.vocab_size));
        let mut attention = Array3::zeros((rows, dec_seq.ncols(), src_len));
        for i in 0..rows {
            let tokens = dec_seq.row(i).to_vec();
            let mem = memory.index_axis(Axis(0), i).to_owned();
            let pad = src_mask.row(i).to_vec();
            let (lp, attn) = self.decode_row(&tokens, &mem, &pad);
            log_probs.row_mut(i).assign(&lp);
            attention.slice_mut(s![i, .., ..]).assign(&attn);
        }
        Ok(Scored {
            log_probs,
            attention: Some(attention),
        })
    }
}
