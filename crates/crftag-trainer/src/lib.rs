//! # crftag trainer
//!
//! Everything around the CRF layer needed to train and run a real tagger:
//! CoNLL-style corpus reading, a word vocabulary, a BiLSTM encoder feeding
//! the CRF, the training loop, evaluation and model persistence.

pub mod config;
pub mod data;
pub mod encoder;
pub mod eval;
pub mod model;
pub mod trainer;

pub use config::{ModelConfig, OptimizerKind, TrainConfig};
pub use data::{Sentence, Vocabulary, read_corpus, read_tokens};
pub use eval::{Evaluation, TagScheme};
pub use model::TaggerModel;
pub use trainer::{EpochReport, Trainer, evaluate, run_training};
