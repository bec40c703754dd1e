mod common;

use beam_decode::{DecodeConfig, DecodeError, Specials, Vocab};
use common::{vocab, SPECIALS};
use ndarray::array;

#[test]
fn encode_maps_unknown_words_to_unk() {
    let vocab = vocab(6);
    assert_eq!(vocab.encode("w4  w5\tzzz"), vec![4, 5, 3]);
    assert_eq!(vocab.id("<eos>"), Some(1));
    assert_eq!(vocab.token(5), Some("w5"));
    assert_eq!(vocab.token(6), None);
}

#[test]
fn encode_batch_right_pads() {
    let vocab = vocab(6);
    let batch = vocab.encode_batch(&["w4 w5 w4", "w5", ""]);
    assert_eq!(batch, array![[4usize, 5, 4], [5, 0, 0], [0, 0, 0]]);
    assert_eq!(vocab.encode_batch::<&str>(&[]).dim(), (0, 1));
}

#[test]
fn decode_joins_tokens_and_falls_back_to_unk() {
    let vocab = vocab(6);
    assert_eq!(vocab.decode(&[4, 5]), "w4 w5");
    assert_eq!(vocab.decode(&[4, 42]), "w4 <unk>");
    assert_eq!(vocab.decode(&[]), "");
}

#[test]
fn sentinels_must_be_valid() {
    let tokens = |n: usize| (0..n).map(|i| format!("t{i}")).collect::<Vec<_>>();
    assert!(matches!(
        Vocab::new(tokens(3), SPECIALS),
        Err(DecodeError::InvalidConfig(_))
    ));
    let clash = Specials {
        pad: 0,
        unk: 0,
        start: 1,
        end: 1,
    };
    assert!(matches!(
        Vocab::new(tokens(4), clash),
        Err(DecodeError::InvalidConfig(_))
    ));
    assert!(Vocab::new(tokens(4), Specials::default()).is_ok());
}

#[test]
fn config_defaults_and_json() {
    let config = DecodeConfig::default();
    assert_eq!((config.beam_size, config.max_dec_steps, config.n_best), (5, 30, 1));
    assert!(config.validate().is_ok());

    let parsed: DecodeConfig =
        serde_json::from_str(r#"{"beam_size":3,"max_dec_steps":12,"n_best":2}"#).unwrap();
    assert_eq!(parsed, DecodeConfig::new(3, 12).with_n_best(2));
}
