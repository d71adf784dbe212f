//! Trainer and normalizer specifications.
//!
//! Both specs deserialize from YAML (the CLI's `train spec.yaml` input) and
//! are embedded verbatim in the trained model container, so a saved model
//! carries everything needed to reproduce its preprocessing.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Segmentation algorithm family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    /// Unigram language model (default)
    Unigram,
    /// Byte pair encoding
    Bpe,
    /// Whitespace-delimited words
    Word,
    /// Single characters
    Char,
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerSpec {
    /// Input corpus files, one sentence per line
    pub input: Vec<PathBuf>,
    /// Output path prefix; writes `<prefix>.model` and `<prefix>.vocab`
    pub model_prefix: Option<PathBuf>,
    /// Segmentation algorithm to train
    pub model_type: ModelType,
    /// Final vocabulary size including meta pieces
    pub vocab_size: usize,
    /// Fraction of corpus characters covered by the required-char set
    pub character_coverage: f64,
    /// Maximum sentences loaded from the corpus (0 = all)
    pub input_sentence_size: usize,
    /// Sample the loaded sentences randomly rather than taking the head
    pub shuffle_input_sentence: bool,
    /// Seed vocabulary size for unigram EM
    pub seed_piece_size: usize,
    /// Fraction of pieces kept by each unigram pruning step
    pub shrinking_factor: f64,
    /// Worker threads for the E-step and Viterbi passes
    pub num_threads: usize,
    /// EM sub-iterations per outer loop
    pub num_sub_iterations: usize,
    /// Maximum piece length in bytes
    pub max_piece_length: usize,
    /// Reject pieces crossing writing-system boundaries
    pub split_by_unicode_script: bool,
    /// Reject pieces mixing digits and non-digits
    pub split_by_number: bool,
    /// Train on whitespace-delimited tokens instead of raw sentences
    pub split_by_whitespace: bool,
    /// Attach the whitespace sentinel to the end of words, not the start
    pub treat_whitespace_as_suffix: bool,
    /// Additional control pieces reserved in the vocabulary
    pub control_symbols: Vec<String>,
    /// Symbols that always segment as one piece
    pub user_defined_symbols: Vec<String>,
    /// Number of encode samples stored in the model for load-time checks
    pub self_test_sample_size: usize,
    /// Reserved ids; a negative id disables the piece
    pub unk_id: i32,
    pub bos_id: i32,
    pub eos_id: i32,
    pub pad_id: i32,
    /// Reserved piece surfaces
    pub unk_piece: String,
    pub bos_piece: String,
    pub eos_piece: String,
    pub pad_piece: String,
    /// Decode surface of the unknown piece
    pub unk_surface: String,
    /// Seed for corpus sampling and segmentation sampling
    pub seed: u64,
}

impl Default for TrainerSpec {
    fn default() -> Self {
        Self {
            input: Vec::new(),
            model_prefix: None,
            model_type: ModelType::Unigram,
            vocab_size: 8000,
            character_coverage: 0.9995,
            input_sentence_size: 0,
            shuffle_input_sentence: true,
            seed_piece_size: 1_000_000,
            shrinking_factor: 0.75,
            num_threads: 16,
            num_sub_iterations: 2,
            max_piece_length: 16,
            split_by_unicode_script: true,
            split_by_number: true,
            split_by_whitespace: true,
            treat_whitespace_as_suffix: false,
            control_symbols: Vec::new(),
            user_defined_symbols: Vec::new(),
            self_test_sample_size: 0,
            unk_id: 0,
            bos_id: 1,
            eos_id: 2,
            pad_id: -1,
            unk_piece: "<unk>".to_string(),
            bos_piece: "<s>".to_string(),
            eos_piece: "</s>".to_string(),
            pad_piece: "<pad>".to_string(),
            unk_surface: " \u{2047} ".to_string(),
            seed: 42,
        }
    }
}

impl TrainerSpec {
    /// Create a unigram trainer spec
    pub fn unigram() -> Self {
        Self {
            model_type: ModelType::Unigram,
            ..Default::default()
        }
    }

    /// Create a BPE trainer spec
    pub fn bpe() -> Self {
        Self {
            model_type: ModelType::Bpe,
            ..Default::default()
        }
    }

    /// Create a word trainer spec
    pub fn word() -> Self {
        Self {
            model_type: ModelType::Word,
            ..Default::default()
        }
    }

    /// Create a character trainer spec
    pub fn char() -> Self {
        Self {
            model_type: ModelType::Char,
            ..Default::default()
        }
    }

    /// Set the vocabulary size
    pub fn with_vocab_size(mut self, size: usize) -> Self {
        self.vocab_size = size;
        self
    }

    /// Set the input corpus files
    pub fn with_input(mut self, input: Vec<PathBuf>) -> Self {
        self.input = input;
        self
    }

    /// Set the output path prefix
    pub fn with_model_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.model_prefix = Some(prefix.into());
        self
    }

    /// Set the character coverage
    pub fn with_character_coverage(mut self, coverage: f64) -> Self {
        self.character_coverage = coverage;
        self
    }

    /// Set the worker thread count
    pub fn with_num_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    /// Set whitespace-as-suffix placement
    pub fn with_treat_whitespace_as_suffix(mut self, suffix: bool) -> Self {
        self.treat_whitespace_as_suffix = suffix;
        self
    }

    /// Set the user-defined symbols
    pub fn with_user_defined_symbols(mut self, symbols: Vec<String>) -> Self {
        self.user_defined_symbols = symbols;
        self
    }

    /// Set the random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validates the spec, failing fast on inconsistent settings.
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(Error::invalid_argument("vocab_size must be positive"));
        }
        if !(self.character_coverage > 0.0 && self.character_coverage <= 1.0) {
            return Err(Error::invalid_argument(
                "character_coverage must be in (0, 1]",
            ));
        }
        if self.num_threads == 0 {
            return Err(Error::invalid_argument("num_threads must be at least 1"));
        }
        if self.num_sub_iterations == 0 {
            return Err(Error::invalid_argument(
                "num_sub_iterations must be at least 1",
            ));
        }
        if !(self.shrinking_factor > 0.0 && self.shrinking_factor < 1.0) {
            return Err(Error::invalid_argument(
                "shrinking_factor must be in (0, 1)",
            ));
        }
        if self.max_piece_length == 0 {
            return Err(Error::invalid_argument(
                "max_piece_length must be positive",
            ));
        }
        if self.seed_piece_size == 0 {
            return Err(Error::invalid_argument(
                "seed_piece_size must be positive",
            ));
        }
        if self.unk_id < 0 {
            return Err(Error::invalid_argument("unk piece is required"));
        }
        for (name, id) in [
            ("unk_id", self.unk_id),
            ("bos_id", self.bos_id),
            ("eos_id", self.eos_id),
            ("pad_id", self.pad_id),
        ] {
            if id >= self.vocab_size as i32 {
                return Err(Error::invalid_argument(format!(
                    "{name} must be smaller than vocab_size"
                )));
            }
        }
        Ok(())
    }
}

/// Normalization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerSpec {
    /// Symbolic rule name resolved to a builtin rule blob
    pub name: String,
    /// Inline compiled rule blob; takes precedence over `name`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub precompiled_charsmap: Vec<u8>,
    /// Prepend (or append, with whitespace-as-suffix) one sentinel
    pub add_dummy_prefix: bool,
    /// Collapse sentinel runs and strip leading/trailing runs
    pub remove_extra_whitespaces: bool,
    /// Rewrite spaces to the U+2581 sentinel
    pub escape_whitespaces: bool,
    /// Custom rule TSV; takes precedence over both `name` and the blob
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalization_rule_tsv: Option<PathBuf>,
}

impl Default for NormalizerSpec {
    fn default() -> Self {
        Self {
            name: "nmt_nfkc".to_string(),
            precompiled_charsmap: Vec::new(),
            add_dummy_prefix: true,
            remove_extra_whitespaces: true,
            escape_whitespaces: true,
            normalization_rule_tsv: None,
        }
    }
}

impl NormalizerSpec {
    /// Set the symbolic rule name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the inline compiled rule blob
    pub fn with_precompiled_charsmap(mut self, blob: Vec<u8>) -> Self {
        self.precompiled_charsmap = blob;
        self
    }

    /// Enable or disable the dummy whitespace prefix
    pub fn with_add_dummy_prefix(mut self, add: bool) -> Self {
        self.add_dummy_prefix = add;
        self
    }

    /// Enable or disable redundant whitespace removal
    pub fn with_remove_extra_whitespaces(mut self, remove: bool) -> Self {
        self.remove_extra_whitespaces = remove;
        self
    }

    /// Enable or disable whitespace escaping
    pub fn with_escape_whitespaces(mut self, escape: bool) -> Self {
        self.escape_whitespaces = escape;
        self
    }

    /// Set a custom rule TSV path
    pub fn with_normalization_rule_tsv(mut self, path: impl Into<PathBuf>) -> Self {
        self.normalization_rule_tsv = Some(path.into());
        self
    }
}
