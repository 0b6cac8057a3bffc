pub mod emission;
pub mod forward;
pub mod lattice;
pub mod potentials;
pub mod tagger;
pub mod viterbi;

pub use emission::{Activation, EmissionFeatures, EmissionMatrix, EmissionScorer, ScorerConfig};
pub use forward::{ForwardOutput, ForwardTrainer, PathStats};
pub use lattice::path_score;
pub use potentials::{PotentialSnapshot, PotentialTable, TransitionScores, validate_checkpoint};
pub use tagger::{CRF_PREFIX, CrfTagger, EMISSION_PREFIX, TrainingOutput};
pub use viterbi::{Decoded, ViterbiDecoder};
