use std::collections::HashMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{invalid_config, Result};

/// Reserved token ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specials {
    pub pad: usize,
    pub unk: usize,
    pub start: usize,
    pub end: usize,
}

impl Default for Specials {
    fn default() -> Self {
        Self {
            unk: 0,
            pad: 1,
            end: 2,
            start: 3,
        }
    }
}

/// Whitespace vocabulary with reserved sentinel ids.
#[derive(Clone, Debug)]
pub struct Vocab {
    word2index: HashMap<String, usize>,
    index2word: Vec<String>,
    specials: Specials,
}

impl Vocab {
    /// Build a vocabulary from an ordered token list. Every sentinel must name
    /// an entry, and pad, start and end must be distinct.
    pub fn new(tokens: Vec<String>, specials: Specials) -> Result<Self> {
        for (name, id) in [
            ("pad", specials.pad),
            ("unk", specials.unk),
            ("start", specials.start),
            ("end", specials.end),
        ] {
            if id >= tokens.len() {
                return Err(invalid_config(format!(
                    "{name} id {id} outside vocabulary of {} tokens",
                    tokens.len()
                )));
            }
        }
        if specials.pad == specials.start
            || specials.pad == specials.end
            || specials.start == specials.end
        {
            return Err(invalid_config("pad, start and end ids must be distinct"));
        }

        let mut word2index = HashMap::with_capacity(tokens.len());
        for (i, tok) in tokens.iter().enumerate() {
            word2index.entry(tok.clone()).or_insert(i);
        }
        Ok(Self {
            word2index,
            index2word: tokens,
            specials,
        })
    }

    pub fn len(&self) -> usize {
        self.index2word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index2word.is_empty()
    }

    pub fn specials(&self) -> Specials {
        self.specials
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.index2word.get(id).map(String::as_str)
    }

    pub fn id(&self, token: &str) -> Option<usize> {
        self.word2index.get(token).copied()
    }

    /// Split on whitespace; unknown words map to the unk id.
    pub fn encode(&self, text: &str) -> Vec<usize> {
        text.split_whitespace()
            .map(|w| self.id(w).unwrap_or(self.specials.unk))
            .collect()
    }

    /// Encode several sentences into one right-padded id matrix.
    pub fn encode_batch<S: AsRef<str>>(&self, texts: &[S]) -> Array2<usize> {
        let encoded: Vec<Vec<usize>> = texts.iter().map(|t| self.encode(t.as_ref())).collect();
        let width = encoded.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let mut out = Array2::from_elem((encoded.len(), width), self.specials.pad);
        for (i, ids) in encoded.iter().enumerate() {
            for (j, &id) in ids.iter().enumerate() {
                out[[i, j]] = id;
            }
        }
        out
    }

    /// Map ids to surface tokens joined by single spaces.
    pub fn decode(&self, ids: &[usize]) -> String {
        ids.iter()
            .map(|&id| self.token(id).unwrap_or(self.index2word[self.specials.unk].as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
