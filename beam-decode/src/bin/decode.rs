//! Decode sentences with the reference transformer.
//!
//! The model is untrained, so outputs are noise; the binary exists to run the
//! search end to end on real batched tensors.

use anyhow::Result;
use beam_decode::model::{ModelArgs, Seq2Seq};
use beam_decode::{DecodeConfig, GreedyDecoder, Specials, Translator, Vocab};
use clap::Parser;
use std::fs;
use std::io::{self, Write};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Beam width; 0 selects greedy decoding
    #[arg(long, default_value_t = 5)]
    beam_size: usize,

    /// Maximum decode steps
    #[arg(long, default_value_t = 30)]
    max_dec_steps: usize,

    /// Hypotheses to print per sentence
    #[arg(long, default_value_t = 1)]
    n_best: usize,

    /// Seed for the model weights
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Input file with sentences (one per line)
    #[arg(long)]
    input_file: Option<String>,

    /// Print n-best lists as JSON
    #[arg(long)]
    json: bool,

    /// Run in interactive mode
    #[arg(long)]
    interactive: bool,

    /// Sentences to decode
    sentences: Vec<String>,
}

fn demo_vocab() -> Result<Vocab> {
    let tokens = [
        "<unk>", "<pad>", "<eos>", "<sos>", "hello", "world", "how", "are", "you", "i", "am",
        "fine", "what", "is", "your", "name", "my", "assistant", "help", "can", "please",
        "thank", "yes", "no", "the", "and", "a", "to", "of", "in", "that", "have", "it", "for",
        "not", "on", "with", "good", "great", "nice", "bad", "ok", "sure", "maybe", "think",
        "know", "see",
    ];
    Ok(Vocab::new(
        tokens.iter().map(|t| t.to_string()).collect(),
        Specials::default(),
    )?)
}

/// Application wrapping either search strategy.
struct DecodeApp {
    args: Args,
    translator: Option<Translator<Seq2Seq>>,
    greedy: Option<GreedyDecoder<Seq2Seq>>,
}

impl DecodeApp {
    fn new(args: Args) -> Result<Self> {
        let vocab = demo_vocab()?;
        let model_args = ModelArgs {
            max_seq_len: 128,
            vocab_size: vocab.len(),
            dim: 32,
            n_layers: 2,
            n_heads: 4,
            hidden_dim: 64,
            seed: args.seed,
        };
        let model = Seq2Seq::new(model_args)?;

        let (translator, greedy) = if args.beam_size == 0 {
            let greedy = GreedyDecoder::new(model, vocab, args.max_dec_steps)?;
            (None, Some(greedy))
        } else {
            let config = DecodeConfig::new(args.beam_size, args.max_dec_steps)
                .with_n_best(args.n_best);
            (Some(Translator::new(model, vocab, config)?), None)
        };
        Ok(Self {
            args,
            translator,
            greedy,
        })
    }

    fn decode(&self, sentences: &[String]) -> Result<()> {
        if let Some(greedy) = &self.greedy {
            let src = greedy.vocab().encode_batch(sentences);
            for (sentence, out) in sentences.iter().zip(greedy.translate(src.view())?) {
                println!("Source: {}", sentence);
                println!("Greedy: {}\n", out);
            }
            return Ok(());
        }
        let Some(translator) = &self.translator else {
            return Ok(());
        };

        let src = translator.vocab().encode_batch(sentences);
        let decoded = translator.beam_search(src.view())?;
        info!(state = ?decoded.state, steps = decoded.steps, "decoded batch");
        if self.args.json {
            println!("{}", serde_json::to_string_pretty(&decoded)?);
            return Ok(());
        }
        for (sentence, hyps) in sentences.iter().zip(&decoded.hypotheses) {
            println!("Source: {}", sentence);
            for (rank, hyp) in hyps.iter().enumerate() {
                println!(
                    "  #{} ({:.3}): {}",
                    rank,
                    hyp.score,
                    translator.vocab().decode(&hyp.tokens)
                );
            }
            println!();
        }
        Ok(())
    }

    fn run(&self) -> Result<()> {
        if self.args.interactive {
            let mut input = String::new();
            let stdin = io::stdin();
            loop {
                print!(">>> ");
                io::stdout().flush()?;
                input.clear();
                if stdin.read_line(&mut input)? == 0 {
                    break;
                }
                let trimmed = input.trim();
                if trimmed == "/exit" {
                    break;
                }
                if trimmed.is_empty() {
                    continue;
                }
                self.decode(&[trimmed.to_owned()])?;
            }
            return Ok(());
        }

        let mut sentences = self.args.sentences.clone();
        if let Some(path) = &self.args.input_file {
            let content = fs::read_to_string(path)?;
            sentences.extend(content.lines().map(str::to_owned));
        }
        if sentences.is_empty() {
            sentences.push("hello how are you".to_owned());
        }
        self.decode(&sentences)
    }
}

/// Filter from `RUST_LOG` when it parses, `info` otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn main() -> Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(directives.as_deref()))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    DecodeApp::new(args)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn test_rust_log_overrides_default_level() {
        assert_eq!(log_filter(Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_step_budget_beyond_model_length_fails_at_startup() {
        let args = Args::parse_from(["decode", "--max-dec-steps", "129"]);
        assert!(DecodeApp::new(args).is_err());
        let args = Args::parse_from(["decode", "--beam-size", "0", "--max-dec-steps", "129"]);
        assert!(DecodeApp::new(args).is_err());
        let args = Args::parse_from(["decode", "--max-dec-steps", "128"]);
        assert!(DecodeApp::new(args).is_ok());
    }
}
