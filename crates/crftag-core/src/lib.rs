//! # crftag Core
//!
//! The linear-chain CRF output layer shared by the named-entity, part-of-speech
//! and word-segmentation taggers. An encoder supplies per-timestep features,
//! the [`EmissionScorer`] turns them into a `T × K` potential matrix, and
//! either the [`ForwardTrainer`] (training loss) or the [`ViterbiDecoder`]
//! (best path) runs over it together with the learned [`PotentialTable`].
//!
//! ## Quick Start
//!
//! ```rust
//! use crftag_core::{EmissionMatrix, ForwardTrainer, PotentialSnapshot, ViterbiDecoder};
//!
//! let table = PotentialSnapshot::new(vec![0.0, 0.0], vec![0.0, 1.0, 1.0, 0.0]).unwrap();
//! let emissions = EmissionMatrix::from_rows(vec![vec![2.0, 0.0], vec![0.0, 2.0]]).unwrap();
//!
//! let best = ViterbiDecoder::new(2).decode(&table, &emissions).unwrap();
//! assert_eq!(best.tags, vec![0, 1]);
//!
//! let out = ForwardTrainer::new().forward_loss(&table, &emissions, &[0, 0]).unwrap();
//! let log_z = (2f64.exp() + 5f64.exp() + 1f64.exp() + 2f64.exp()).ln();
//! assert!((out.loss - (log_z - 2.0)).abs() < 1e-12);
//! assert!((out.loss - 3.1114).abs() < 1e-4);
//! ```
pub mod crf;
pub mod error;
pub mod score;
pub mod tags;

// Re-export primary API
pub use crf::{
    Activation, CRF_PREFIX, CrfTagger, Decoded, EmissionFeatures, EmissionMatrix, EmissionScorer,
    ForwardOutput, ForwardTrainer, PathStats, PotentialSnapshot, PotentialTable, ScorerConfig,
    TrainingOutput, TransitionScores, ViterbiDecoder, path_score, validate_checkpoint,
};
pub use error::{CrfError, Result};
pub use score::Score;
pub use tags::{Tag, TagSpace};
