use serde::{Deserialize, Serialize};

use crate::error::{invalid_config, Result};

/// Search parameters for a decoding call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Beam width K.
    pub beam_size: usize,
    /// Hard ceiling on decode steps.
    pub max_dec_steps: usize,
    /// Number of ranked hypotheses returned per instance.
    pub n_best: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            beam_size: 5,
            max_dec_steps: 30,
            n_best: 1,
        }
    }
}

impl DecodeConfig {
    pub fn new(beam_size: usize, max_dec_steps: usize) -> Self {
        Self {
            beam_size,
            max_dec_steps,
            n_best: 1,
        }
    }

    pub fn with_n_best(mut self, n_best: usize) -> Self {
        self.n_best = n_best;
        self
    }

    /// Reject settings no search can run with.
    pub fn validate(&self) -> Result<()> {
        if self.beam_size < 1 {
            return Err(invalid_config("beam_size must be at least 1"));
        }
        if self.max_dec_steps < 1 {
            return Err(invalid_config("max_dec_steps must be at least 1"));
        }
        if self.n_best < 1 || self.n_best > self.beam_size {
            return Err(invalid_config(format!(
                "n_best must be in 1..={}, got {}",
                self.beam_size, self.n_best
            )));
        }
        Ok(())
    }
}
