//! Trocear: subword tokenizer training and inference.
//!
//! Learns a fixed-size vocabulary of sub-word pieces from raw text and
//! segments arbitrary text into pieces and ids using that vocabulary.
//! Four segmentation families sit behind one interface — unigram language
//! model, BPE, word, and char — with a pre-compilable longest-match
//! normalizer in front.
//!
//! # Example
//!
//! ```
//! use trocear::{trainer, NormalizerSpec, Tokenizer, TrainerSpec};
//!
//! fn example() -> trocear::Result<()> {
//!     // Train a small character model from in-memory sentences
//!     let spec = TrainerSpec::char().with_vocab_size(100);
//!     let mut ctx = trainer::TrainerContext::new(spec.seed, trocear::LogLevel::Quiet);
//!     let corpus = vec!["I have a pen".to_string(), "I have an apple".to_string()];
//!     let model = trainer::train_from_sentences(&spec, &NormalizerSpec::default(), corpus, &mut ctx)?;
//!
//!     // Encode and decode
//!     let tokenizer = Tokenizer::from_model(model)?;
//!     let ids = tokenizer.encode_ids("I have a pen")?;
//!     let text = tokenizer.decode_ids(&ids)?;
//!     assert_eq!(text, "I have a pen");
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod normalizer;
pub mod processor;
pub mod trainer;
pub mod trie;
pub mod unicode;

// Re-export the main API surface
pub use config::{ModelType, NormalizerSpec, TrainerSpec};
pub use error::{Error, Result};
pub use logging::LogLevel;
pub use model::{Piece, PieceType, TokenizerModel};
pub use processor::{ExtraOption, TokenSpan, Tokenizer};
pub use trainer::train;
