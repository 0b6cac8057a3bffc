//! Learned CRF tables: initial scores, transition scores and tag vectors.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Init, VarBuilder};
use safetensors::SafeTensors;

use crate::error::{CrfError, Result};
use crate::score::Score;
use crate::tags::{Tag, check_tag};

/// Parameter names under the CRF prefix of a [`VarBuilder`].
pub const INIT_NAME: &str = "init";
pub const TRANS_NAME: &str = "trans";
pub const TAG_VECTORS_NAME: &str = "tag_vectors";

/// Read access to initial and transition scores of one number type.
///
/// Both recurrences are written against this trait so the same table logic
/// serves the differentiable training path and the plain decoding path.
pub trait TransitionScores<S: Score> {
    /// Number of tags `K`.
    fn num_tags(&self) -> usize;

    /// Score of starting a sequence in `tag`.
    fn initial_score(&self, tag: Tag) -> Result<S>;

    /// Score of moving from `from` to `to`, stored at `trans[from * K + to]`.
    fn transition_score(&self, from: Tag, to: Tag) -> Result<S>;
}

/// The learned parameters of the CRF layer.
///
/// Holds `init[K]`, `trans[K*K]` (row-major by source tag) and a `[K, D]`
/// matrix of tag vectors consumed by the emission scorer. The tensors are
/// only ever changed by an optimizer step.
#[derive(Debug, Clone)]
pub struct PotentialTable {
    num_tags: usize,
    init: Tensor,
    trans: Tensor,
    tag_vectors: Tensor,
}

impl PotentialTable {
    /// Create (or fetch) the parameters through a var builder.
    ///
    /// Initial and transition scores start at zero, tag vectors are drawn
    /// from a small normal distribution.
    pub fn new(num_tags: usize, tag_dim: usize, vb: VarBuilder) -> Result<Self> {
        if num_tags == 0 {
            return Err(CrfError::ShapeMismatch {
                what: "tag space",
                expected: 1,
                actual: 0,
            });
        }
        let init = vb.get_with_hints(num_tags, INIT_NAME, Init::Const(0.0))?;
        let trans = vb.get_with_hints(num_tags * num_tags, TRANS_NAME, Init::Const(0.0))?;
        let tag_vectors = vb.get_with_hints(
            (num_tags, tag_dim),
            TAG_VECTORS_NAME,
            Init::Randn {
                mean: 0.0,
                stdev: 0.1,
            },
        )?;
        Self::from_tensors(init, trans, tag_vectors)
    }

    /// Wrap existing tensors, checking their sizes against `K`.
    ///
    /// `K` is taken from the first dimension of `tag_vectors`.
    pub fn from_tensors(init: Tensor, trans: Tensor, tag_vectors: Tensor) -> Result<Self> {
        let (num_tags, _) = tag_vectors.dims2()?;
        check_len("init", num_tags, init.elem_count())?;
        check_len("trans", num_tags * num_tags, trans.elem_count())?;
        Ok(Self {
            num_tags,
            init: init.flatten_all()?,
            trans: trans.flatten_all()?,
            tag_vectors,
        })
    }

    /// Build a table from plain values. Mostly useful for tests and tools.
    pub fn from_values(
        init: &[f64],
        trans: &[f64],
        tag_vectors: &[f64],
        tag_dim: usize,
        device: &Device,
    ) -> Result<Self> {
        let num_tags = init.len();
        check_len("trans", num_tags * num_tags, trans.len())?;
        check_len("tag_vectors", num_tags * tag_dim, tag_vectors.len())?;
        Self::from_tensors(
            Tensor::from_slice(init, num_tags, device)?,
            Tensor::from_slice(trans, num_tags * num_tags, device)?,
            Tensor::from_slice(tag_vectors, (num_tags, tag_dim), device)?,
        )
    }

    /// Number of tags `K`.
    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    /// Width of one tag vector.
    pub fn tag_dim(&self) -> Result<usize> {
        Ok(self.tag_vectors.dim(1)?)
    }

    /// Vector representation of `tag`, shape `[D]`.
    pub fn tag_vector(&self, tag: Tag) -> Result<Tensor> {
        check_tag(tag, self.num_tags)?;
        Ok(self.tag_vectors.get(tag)?)
    }

    /// All tag vectors, shape `[K, D]`.
    pub fn tag_vectors(&self) -> &Tensor {
        &self.tag_vectors
    }

    /// Initial scores, shape `[K]`.
    pub fn init(&self) -> &Tensor {
        &self.init
    }

    /// Transition scores, shape `[K*K]`.
    pub fn trans(&self) -> &Tensor {
        &self.trans
    }

    /// Copy the current scores out as plain numbers for decoding.
    pub fn snapshot(&self) -> Result<PotentialSnapshot> {
        let init = self.init.to_dtype(DType::F64)?.to_vec1::<f64>()?;
        let trans = self.trans.to_dtype(DType::F64)?.to_vec1::<f64>()?;
        PotentialSnapshot::new(init, trans)
    }
}

impl TransitionScores<Tensor> for PotentialTable {
    fn num_tags(&self) -> usize {
        self.num_tags
    }

    fn initial_score(&self, tag: Tag) -> Result<Tensor> {
        check_tag(tag, self.num_tags)?;
        Ok(self.init.get(tag)?)
    }

    fn transition_score(&self, from: Tag, to: Tag) -> Result<Tensor> {
        check_tag(from, self.num_tags)?;
        check_tag(to, self.num_tags)?;
        Ok(self.trans.get(from * self.num_tags + to)?)
    }
}

/// Plain-number copy of `init` and `trans`.
///
/// Taken between optimizer steps so that decoding never reads parameters
/// while they are being updated.
#[derive(Debug, Clone, PartialEq)]
pub struct PotentialSnapshot {
    num_tags: usize,
    init: Vec<f64>,
    trans: Vec<f64>,
}

impl PotentialSnapshot {
    /// Build from `init[K]` and row-major `trans[K*K]`.
    pub fn new(init: Vec<f64>, trans: Vec<f64>) -> Result<Self> {
        let num_tags = init.len();
        if num_tags == 0 {
            return Err(CrfError::ShapeMismatch {
                what: "init",
                expected: 1,
                actual: 0,
            });
        }
        check_len("trans", num_tags * num_tags, trans.len())?;
        Ok(Self {
            num_tags,
            init,
            trans,
        })
    }

    pub fn init(&self) -> &[f64] {
        &self.init
    }

    pub fn trans(&self) -> &[f64] {
        &self.trans
    }
}

impl TransitionScores<f64> for PotentialSnapshot {
    fn num_tags(&self) -> usize {
        self.num_tags
    }

    #[inline]
    fn initial_score(&self, tag: Tag) -> Result<f64> {
        check_tag(tag, self.num_tags)?;
        Ok(self.init[tag])
    }

    #[inline]
    fn transition_score(&self, from: Tag, to: Tag) -> Result<f64> {
        check_tag(from, self.num_tags)?;
        check_tag(to, self.num_tags)?;
        Ok(self.trans[from * self.num_tags + to])
    }
}

/// Check the CRF tables stored in a safetensors checkpoint against `K`
/// before any weights are loaded.
///
/// `prefix` is the var builder path the table was created under, e.g. `crf`.
pub fn validate_checkpoint<P: AsRef<Path>>(path: P, prefix: &str, num_tags: usize) -> Result<()> {
    let bytes = std::fs::read(path.as_ref())?;
    let tensors = SafeTensors::deserialize(&bytes)
        .map_err(|e| CrfError::Checkpoint(format!("{}: {e}", path.as_ref().display())))?;

    let elements = |name: &str| -> Result<Vec<usize>> {
        let key = format!("{prefix}.{name}");
        let view = tensors
            .tensor(&key)
            .map_err(|_| CrfError::Checkpoint(format!("missing tensor {key}")))?;
        Ok(view.shape().to_vec())
    };

    let init = elements(INIT_NAME)?;
    check_len("init", num_tags, init.iter().product())?;

    let trans = elements(TRANS_NAME)?;
    check_len("trans", num_tags * num_tags, trans.iter().product())?;

    let tag_vectors = elements(TAG_VECTORS_NAME)?;
    check_len("tag_vectors", num_tags, tag_vectors.first().copied().unwrap_or(0))?;

    tracing::debug!(num_tags, prefix, "checkpoint CRF tables validated");
    Ok(())
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(CrfError::ShapeMismatch {
            what,
            expected,
            actual,
        })
    }
}
