//! # Emission Scoring
//!
//! Turns encoder features into one scalar potential per `(timestep, tag)`.
//! Every pair goes through the same two-layer scorer: the timestep's left
//! and right features are concatenated with the tag's vector, passed through
//! an affine map and a fixed nonlinearity, optionally dropped out, and
//! projected to a single number.

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, IndexOp, Tensor};
use candle_nn::{Dropout, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::crf::potentials::PotentialTable;
use crate::error::{CrfError, Result};
use crate::score::Score;
use crate::tags::{Tag, check_tag};

/// Nonlinearity between the two affine layers of the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Tanh,
    Relu,
    Sigmoid,
}

impl Activation {
    fn apply(self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Tanh => xs.tanh(),
            Self::Relu => xs.relu(),
            Self::Sigmoid => candle_nn::ops::sigmoid(xs),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tanh => write!(f, "tanh"),
            Self::Relu => write!(f, "relu"),
            Self::Sigmoid => write!(f, "sigmoid"),
        }
    }
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tanh" => Ok(Self::Tanh),
            "relu" | "rectify" => Ok(Self::Relu),
            "sigmoid" | "logistic" => Ok(Self::Sigmoid),
            other => Err(format!("unknown activation {other:?}")),
        }
    }
}

/// Structural parameters of the emission scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Width of the left-to-right encoder features.
    pub left_dim: usize,
    /// Width of the right-to-left encoder features, 0 for a single stream.
    pub right_dim: usize,
    /// Width of a tag vector.
    pub tag_dim: usize,
    /// Width of the hidden layer.
    pub hidden_dim: usize,
    #[serde(default)]
    pub activation: Activation,
    /// Dropout probability on the hidden layer, training only.
    #[serde(default)]
    pub dropout: f32,
}

impl ScorerConfig {
    /// Config for two encoder streams of equal width.
    pub fn bidirectional(feature_dim: usize, tag_dim: usize, hidden_dim: usize) -> Self {
        Self {
            left_dim: feature_dim,
            right_dim: feature_dim,
            tag_dim,
            hidden_dim,
            activation: Activation::Tanh,
            dropout: 0.0,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Set the dropout probability. Checked when the scorer is built.
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Width of the concatenated scorer input.
    pub fn input_dim(&self) -> usize {
        self.left_dim + self.right_dim + self.tag_dim
    }
}

/// Encoder output for one sequence: `[T, left_dim]` and optionally `[T, right_dim]`.
#[derive(Debug, Clone)]
pub struct EmissionFeatures {
    left: Tensor,
    right: Option<Tensor>,
    num_steps: usize,
}

impl EmissionFeatures {
    /// Pair the encoder streams, checking they cover the same timesteps.
    pub fn new(left: Tensor, right: Option<Tensor>) -> Result<Self> {
        let (num_steps, _) = left.dims2()?;
        if let Some(right) = &right {
            let (right_steps, _) = right.dims2()?;
            if right_steps != num_steps {
                return Err(CrfError::FeatureLengthMismatch {
                    left: num_steps,
                    right: right_steps,
                });
            }
        }
        Ok(Self {
            left,
            right,
            num_steps,
        })
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn left(&self) -> &Tensor {
        &self.left
    }

    pub fn right(&self) -> Option<&Tensor> {
        self.right.as_ref()
    }
}

/// `T × K` matrix of emission potentials, stored row-major.
#[derive(Debug, Clone)]
pub struct EmissionMatrix<S> {
    num_tags: usize,
    scores: Vec<S>,
}

impl<S: Score> EmissionMatrix<S> {
    /// Wrap a flat row-major buffer of `T * K` scores.
    pub fn new(num_tags: usize, scores: Vec<S>) -> Result<Self> {
        if num_tags == 0 || scores.len() % num_tags != 0 {
            return Err(CrfError::ShapeMismatch {
                what: "emission matrix",
                expected: num_tags * (scores.len() / num_tags.max(1)).max(1),
                actual: scores.len(),
            });
        }
        Ok(Self { num_tags, scores })
    }

    /// Build from one row per timestep. All rows must have the same width.
    pub fn from_rows(rows: Vec<Vec<S>>) -> Result<Self> {
        let num_tags = rows.first().map(Vec::len).ok_or(CrfError::EmptySequence)?;
        let mut scores = Vec::with_capacity(rows.len() * num_tags);
        for row in rows {
            if row.len() != num_tags {
                return Err(CrfError::ShapeMismatch {
                    what: "emission row",
                    expected: num_tags,
                    actual: row.len(),
                });
            }
            scores.extend(row);
        }
        Self::new(num_tags, scores)
    }

    /// Number of timesteps `T`.
    pub fn num_steps(&self) -> usize {
        self.scores.len() / self.num_tags
    }

    /// Number of tags `K`.
    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    /// Potential of `tag` at timestep `t`.
    pub fn get(&self, t: usize, tag: Tag) -> Result<&S> {
        check_tag(tag, self.num_tags)?;
        self.scores
            .get(t * self.num_tags + tag)
            .ok_or(CrfError::ShapeMismatch {
                what: "emission timestep",
                expected: self.num_steps(),
                actual: t + 1,
            })
    }

    /// All potentials at timestep `t`.
    pub fn row(&self, t: usize) -> Result<&[S]> {
        self.scores
            .get(t * self.num_tags..(t + 1) * self.num_tags)
            .ok_or(CrfError::ShapeMismatch {
                what: "emission timestep",
                expected: self.num_steps(),
                actual: t + 1,
            })
    }

    /// Plain-number copy.
    pub fn to_plain(&self) -> Result<EmissionMatrix<f64>> {
        let scores = self.scores.iter().map(Score::value).collect::<Result<_>>()?;
        EmissionMatrix::new(self.num_tags, scores)
    }
}

impl EmissionMatrix<Tensor> {
    /// Split a `[T, K]` tensor into per-entry scalars that stay on the graph.
    pub fn from_tensor(scores: &Tensor) -> Result<Self> {
        let (num_steps, num_tags) = scores.dims2()?;
        let mut cells = Vec::with_capacity(num_steps * num_tags);
        for t in 0..num_steps {
            for k in 0..num_tags {
                cells.push(scores.i((t, k))?);
            }
        }
        Self::new(num_tags, cells)
    }
}

impl EmissionMatrix<f64> {
    /// Read the values of a `[T, K]` tensor, dropping the graph.
    pub fn from_tensor_values(scores: &Tensor) -> Result<Self> {
        let (_, num_tags) = scores.dims2()?;
        let flat = scores.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?;
        Self::new(num_tags, flat)
    }
}

/// Feed-forward scorer producing emission potentials.
#[derive(Debug, Clone)]
pub struct EmissionScorer {
    config: ScorerConfig,
    hidden: Linear,
    output: Linear,
    dropout: Dropout,
}

impl EmissionScorer {
    /// Create (or fetch) the scorer weights through a var builder.
    pub fn new(config: ScorerConfig, vb: VarBuilder) -> Result<Self> {
        if !(0.0..1.0).contains(&config.dropout) {
            return Err(CrfError::InvalidDropout(config.dropout));
        }
        let hidden = candle_nn::linear(config.input_dim(), config.hidden_dim, vb.pp("hidden"))?;
        let output = candle_nn::linear(config.hidden_dim, 1, vb.pp("output"))?;
        let dropout = Dropout::new(config.dropout);
        Ok(Self {
            config,
            hidden,
            output,
            dropout,
        })
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Potential of `tag` at timestep `t`, as a 0-d tensor.
    pub fn score(
        &self,
        potentials: &PotentialTable,
        features: &EmissionFeatures,
        t: usize,
        tag: Tag,
        train: bool,
    ) -> Result<Tensor> {
        self.check_features(potentials, features)?;
        if t >= features.num_steps() {
            return Err(CrfError::ShapeMismatch {
                what: "emission timestep",
                expected: features.num_steps(),
                actual: t + 1,
            });
        }

        let mut parts = vec![features.left().get(t)?];
        if let Some(right) = features.right() {
            parts.push(right.get(t)?);
        }
        parts.push(potentials.tag_vector(tag)?);
        let input = Tensor::cat(&parts, 0)?.unsqueeze(0)?;

        Ok(self.feed_forward(&input, train)?.reshape(())?)
    }

    /// Potentials for every `(t, k)` in one batched pass, shape `[T, K]`.
    ///
    /// Each entry equals what [`score`](Self::score) returns for that pair.
    pub fn score_tensor(
        &self,
        potentials: &PotentialTable,
        features: &EmissionFeatures,
        train: bool,
    ) -> Result<Tensor> {
        self.check_features(potentials, features)?;
        let num_steps = features.num_steps();
        if num_steps == 0 {
            return Err(CrfError::EmptySequence);
        }
        let num_tags = potentials.num_tags();

        let spread = |xs: &Tensor| -> candle_core::Result<Tensor> {
            let dim = xs.dim(1)?;
            xs.unsqueeze(1)?.broadcast_as((num_steps, num_tags, dim))
        };
        let mut parts = vec![spread(features.left())?];
        if let Some(right) = features.right() {
            parts.push(spread(right)?);
        }
        let tag_dim = potentials.tag_dim()?;
        parts.push(
            potentials
                .tag_vectors()
                .unsqueeze(0)?
                .broadcast_as((num_steps, num_tags, tag_dim))?,
        );
        let input = Tensor::cat(&parts, 2)?;

        Ok(self.feed_forward(&input, train)?.squeeze(2)?)
    }

    /// [`score_tensor`](Self::score_tensor) split into graph-attached scalars.
    pub fn score_sequence(
        &self,
        potentials: &PotentialTable,
        features: &EmissionFeatures,
        train: bool,
    ) -> Result<EmissionMatrix<Tensor>> {
        EmissionMatrix::from_tensor(&self.score_tensor(potentials, features, train)?)
    }

    fn feed_forward(&self, input: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let hidden = self.config.activation.apply(&self.hidden.forward(input)?)?;
        let hidden = if train && self.config.dropout > 0.0 {
            self.dropout.forward(&hidden, true)?
        } else {
            hidden
        };
        self.output.forward(&hidden)
    }

    fn check_features(&self, potentials: &PotentialTable, features: &EmissionFeatures) -> Result<()> {
        let left_dim = features.left().dim(1)?;
        if left_dim != self.config.left_dim {
            return Err(CrfError::ShapeMismatch {
                what: "left encoder features",
                expected: self.config.left_dim,
                actual: left_dim,
            });
        }
        let right_dim = match features.right() {
            Some(right) => right.dim(1)?,
            None => 0,
        };
        if right_dim != self.config.right_dim {
            return Err(CrfError::ShapeMismatch {
                what: "right encoder features",
                expected: self.config.right_dim,
                actual: right_dim,
            });
        }
        let tag_dim = potentials.tag_dim()?;
        if tag_dim != self.config.tag_dim {
            return Err(CrfError::ShapeMismatch {
                what: "tag vectors",
                expected: self.config.tag_dim,
                actual: tag_dim,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn setup(right: bool) -> (VarMap, PotentialTable, EmissionScorer) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let config = ScorerConfig {
            left_dim: 3,
            right_dim: if right { 2 } else { 0 },
            tag_dim: 4,
            hidden_dim: 5,
            activation: Activation::Tanh,
            dropout: 0.0,
        };
        let table = PotentialTable::new(3, 4, vb.pp("crf")).unwrap();
        let scorer = EmissionScorer::new(config, vb.pp("emission")).unwrap();
        (varmap, table, scorer)
    }

    fn features(steps: usize, right: bool) -> EmissionFeatures {
        let dev = Device::Cpu;
        let left: Vec<f64> = (0..steps * 3).map(|i| (i as f64 * 0.37).sin()).collect();
        let left = Tensor::from_vec(left, (steps, 3), &dev).unwrap();
        let right = right.then(|| {
            let r: Vec<f64> = (0..steps * 2).map(|i| (i as f64 * 0.11).cos()).collect();
            Tensor::from_vec(r, (steps, 2), &dev).unwrap()
        });
        EmissionFeatures::new(left, right).unwrap()
    }

    #[test]
    fn test_batched_matches_single() {
        for right in [false, true] {
            let (_vm, table, scorer) = setup(right);
            let feats = features(4, right);
            let batched = scorer.score_tensor(&table, &feats, false).unwrap();
            assert_eq!(batched.dims2().unwrap(), (4, 3));
            let batched: Vec<Vec<f64>> = batched.to_vec2().unwrap();
            for (t, row) in batched.iter().enumerate() {
                for (k, &value) in row.iter().enumerate() {
                    let single = scorer
                        .score(&table, &feats, t, k, false)
                        .unwrap()
                        .value()
                        .unwrap();
                    assert!((single - value).abs() < 1e-9, "({t},{k}): {single} vs {value}");
                }
            }
        }
    }

    #[test]
    fn test_scores_depend_on_tag() {
        let (_vm, table, scorer) = setup(true);
        let feats = features(1, true);
        let row = EmissionMatrix::from_tensor_values(&scorer.score_tensor(&table, &feats, false).unwrap())
            .unwrap();
        let first = *row.get(0, 0).unwrap();
        assert!(row.row(0).unwrap().iter().any(|&v| (v - first).abs() > 1e-12));
    }

    #[test]
    fn test_feature_length_mismatch() {
        let dev = Device::Cpu;
        let left = Tensor::zeros((3, 2), DType::F64, &dev).unwrap();
        let right = Tensor::zeros((4, 2), DType::F64, &dev).unwrap();
        assert!(matches!(
            EmissionFeatures::new(left, Some(right)),
            Err(CrfError::FeatureLengthMismatch { left: 3, right: 4 })
        ));
    }

    #[test]
    fn test_wrong_feature_width_rejected() {
        let (_vm, table, scorer) = setup(false);
        let left = Tensor::zeros((2, 7), DType::F64, &Device::Cpu).unwrap();
        let feats = EmissionFeatures::new(left, None).unwrap();
        assert!(matches!(
            scorer.score_tensor(&table, &feats, false),
            Err(CrfError::ShapeMismatch {
                what: "left encoder features",
                ..
            })
        ));
    }

    #[test]
    fn test_timestep_out_of_range() {
        let (_vm, table, scorer) = setup(false);
        let feats = features(2, false);
        assert!(scorer.score(&table, &feats, 2, 0, false).is_err());
        assert!(matches!(
            scorer.score(&table, &feats, 0, 3, false),
            Err(CrfError::TagOutOfRange { .. })
        ));
    }

    #[test]
    fn test_dropout_out_of_range_rejected() {
        for dropout in [1.0f32, -0.1, 1.5] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
            let config = ScorerConfig::bidirectional(2, 2, 2).with_dropout(dropout);
            assert_eq!(config.dropout, dropout);
            assert!(matches!(
                EmissionScorer::new(config, vb),
                Err(CrfError::InvalidDropout(p)) if p == dropout
            ));
        }
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &Device::Cpu);
        let config = ScorerConfig::bidirectional(2, 2, 2).with_dropout(0.5);
        assert!(EmissionScorer::new(config, vb).is_ok());
    }

    #[test]
    fn test_emission_matrix_layout() {
        let m = EmissionMatrix::new(2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(m.num_steps(), 3);
        assert_eq!(*m.get(1, 1).unwrap(), 4.0);
        assert_eq!(m.row(2).unwrap(), &[5.0, 6.0]);
        assert!(matches!(
            m.row(3),
            Err(CrfError::ShapeMismatch { what: "emission timestep", expected: 3, actual: 4 })
        ));
        assert!(m.get(3, 0).is_err());
        assert!(EmissionMatrix::new(4, vec![0.0; 6]).is_err());
        assert!(EmissionMatrix::<f64>::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).is_err());
    }

    #[test]
    fn test_activation_parse() {
        assert_eq!("rectify".parse::<Activation>().unwrap(), Activation::Relu);
        assert_eq!("TANH".parse::<Activation>().unwrap(), Activation::Tanh);
        assert!("softplus".parse::<Activation>().is_err());
        assert_eq!(Activation::Sigmoid.to_string(), "sigmoid");
    }
}
