//! CRF tagging layer: emission scorer + potential table + both recurrences.

use candle_core::Tensor;
use candle_nn::VarBuilder;
use tracing::debug;

use crate::crf::emission::{EmissionFeatures, EmissionMatrix, EmissionScorer, ScorerConfig};
use crate::crf::forward::{ForwardOutput, ForwardTrainer, PathStats};
use crate::crf::potentials::{PotentialSnapshot, PotentialTable};
use crate::crf::viterbi::{Decoded, ViterbiDecoder};
use crate::error::{CrfError, Result};
use crate::tags::{Tag, TagSpace};

/// Var builder prefix of the potential table.
pub const CRF_PREFIX: &str = "crf";
/// Var builder prefix of the emission scorer.
pub const EMISSION_PREFIX: &str = "emission";

/// Loss of one training sequence.
#[derive(Debug, Clone)]
pub struct TrainingOutput {
    /// Scalar loss attached to the autodiff graph.
    pub loss: Tensor,
    /// Greedy path statistics, when requested.
    pub stats: Option<PathStats>,
}

/// The CRF output layer of a sequence tagger.
#[derive(Debug, Clone)]
pub struct CrfTagger {
    tags: TagSpace,
    potentials: PotentialTable,
    scorer: EmissionScorer,
    decoder: ViterbiDecoder,
}

impl CrfTagger {
    /// Create (or fetch) all CRF parameters for a frozen tag space.
    pub fn new(tags: TagSpace, config: ScorerConfig, vb: VarBuilder) -> Result<Self> {
        tags.require_frozen()?;
        let num_tags = tags.len();
        let potentials = PotentialTable::new(num_tags, config.tag_dim, vb.pp(CRF_PREFIX))?;
        let scorer = EmissionScorer::new(config, vb.pp(EMISSION_PREFIX))?;
        debug!(num_tags, "CRF tagger built");
        Ok(Self {
            tags,
            potentials,
            scorer,
            decoder: ViterbiDecoder::new(num_tags),
        })
    }

    pub fn tags(&self) -> &TagSpace {
        &self.tags
    }

    pub fn potentials(&self) -> &PotentialTable {
        &self.potentials
    }

    pub fn scorer(&self) -> &EmissionScorer {
        &self.scorer
    }

    /// Emission potentials for every `(t, k)`, shape `[T, K]`.
    pub fn emissions(&self, features: &EmissionFeatures, train: bool) -> Result<Tensor> {
        if features.num_steps() == 0 {
            return Err(CrfError::EmptySequence);
        }
        self.scorer.score_tensor(&self.potentials, features, train)
    }

    /// CRF negative log-likelihood of `gold`, ready for `backward()`.
    pub fn forward_loss(
        &self,
        features: &EmissionFeatures,
        gold: &[Tag],
        track_stats: bool,
    ) -> Result<TrainingOutput> {
        if gold.len() != features.num_steps() {
            return Err(CrfError::GoldLengthMismatch {
                expected: features.num_steps(),
                actual: gold.len(),
            });
        }
        let emissions = EmissionMatrix::from_tensor(&self.emissions(features, true)?)?;
        let ForwardOutput { loss, stats, .. } = ForwardTrainer::new()
            .with_stats(track_stats)
            .forward_loss(&self.potentials, &emissions, gold)?;
        Ok(TrainingOutput { loss, stats })
    }

    /// Highest-scoring tag sequence, reading the current parameters.
    pub fn decode(&self, features: &EmissionFeatures) -> Result<Decoded> {
        let snapshot = self.potentials.snapshot()?;
        self.decode_with(&snapshot, features)
    }

    /// Decode against a snapshot taken earlier, e.g. once per evaluation pass.
    pub fn decode_with(
        &self,
        snapshot: &PotentialSnapshot,
        features: &EmissionFeatures,
    ) -> Result<Decoded> {
        let emissions = EmissionMatrix::from_tensor_values(&self.emissions(features, false)?)?;
        self.decoder.decode(snapshot, &emissions)
    }

    /// Decode and map the result back to tag names.
    pub fn decode_names(&self, features: &EmissionFeatures) -> Result<Vec<String>> {
        let decoded = self.decode(features)?;
        Ok(self
            .tags
            .decode(&decoded.tags)?
            .into_iter()
            .map(str::to_string)
            .collect())
    }
}
