//! # Forward Algorithm
//!
//! Computes the CRF negative log-likelihood of a gold tag sequence:
//! `log Z - score(gold)`, where `log Z` sums over every path in the
//! `T × K` lattice in log space.
//!
//! The recurrence is generic over [`Score`]: run it over `f64` for a plain
//! value, or over 0-d tensors to get a loss that can be backpropagated. It
//! only composes additions, subtractions and log-sum-exps; gradients are the
//! autodiff engine's business.

use tracing::trace;

use crate::crf::emission::EmissionMatrix;
use crate::crf::lattice::{BackPointers, RollingRows};
use crate::crf::potentials::TransitionScores;
use crate::error::{CrfError, Result};
use crate::score::{Score, argmax};
use crate::tags::{Tag, check_tag};

/// Result of one forward pass.
#[derive(Debug, Clone)]
pub struct ForwardOutput<S> {
    /// `log_partition - gold_score`, never negative.
    pub loss: S,
    /// `log Z` over all paths.
    pub log_partition: S,
    /// Score of the gold path.
    pub gold_score: S,
    /// Greedy path statistics, when requested.
    pub stats: Option<PathStats>,
}

/// Best path read off the forward lattice values, for progress reporting.
///
/// This is computed beside the loss and never feeds into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStats {
    /// Predicted tag at every timestep.
    pub predicted: Vec<Tag>,
    /// Timesteps where the prediction equals the gold tag.
    pub correct: usize,
}

impl PathStats {
    /// Number of timesteps.
    pub fn total(&self) -> usize {
        self.predicted.len()
    }

    /// Fraction of correct timesteps.
    pub fn accuracy(&self) -> f64 {
        if self.predicted.is_empty() {
            0.0
        } else {
            self.correct as f64 / self.predicted.len() as f64
        }
    }
}

/// Runs the forward recurrence for one sequence at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardTrainer {
    track_stats: bool,
}

impl ForwardTrainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also trace a best path through the lattice values for accuracy reporting.
    pub fn with_stats(mut self, track_stats: bool) -> Self {
        self.track_stats = track_stats;
        self
    }

    /// Negative log-likelihood of `gold` under the CRF.
    pub fn forward_loss<S, P>(
        &self,
        table: &P,
        emissions: &EmissionMatrix<S>,
        gold: &[Tag],
    ) -> Result<ForwardOutput<S>>
    where
        S: Score,
        P: TransitionScores<S> + ?Sized,
    {
        let num_tags = table.num_tags();
        let num_steps = emissions.num_steps();
        validate(num_tags, emissions, gold)?;

        // Fetched once: the O(K²) fan-in below reuses them at every timestep.
        let trans = (0..num_tags * num_tags)
            .map(|ij| table.transition_score(ij / num_tags, ij % num_tags))
            .collect::<Result<Vec<S>>>()?;

        let mut stats = self
            .track_stats
            .then(|| StatsTracker::new(num_steps, num_tags, &trans))
            .transpose()?;

        // Init: lattice[k] = init(k) + emission[0][k].
        let first = (0..num_tags)
            .map(|k| table.initial_score(k)?.plus(emissions.get(0, k)?))
            .collect::<Result<Vec<S>>>()?;
        let mut gold_score = first[gold[0]].clone();
        let mut lattice = RollingRows::new(first);

        // Propagate.
        let mut candidates = Vec::with_capacity(num_tags);
        for t in 1..num_steps {
            if let Some(stats) = stats.as_mut() {
                stats.record(t, &lattice.previous)?;
            }
            for k in 0..num_tags {
                candidates.clear();
                for i in 0..num_tags {
                    candidates.push(lattice.previous[i].plus(&trans[i * num_tags + k])?);
                }
                let value = S::log_sum_exp(&candidates)?.plus(emissions.get(t, k)?)?;
                lattice.current.push(value);
            }
            lattice.advance();

            gold_score = gold_score
                .plus(&trans[gold[t - 1] * num_tags + gold[t]])?
                .plus(emissions.get(t, gold[t])?)?;
        }

        // Finalize.
        let log_partition = S::log_sum_exp(&lattice.previous)?;
        let loss = log_partition.minus(&gold_score)?;

        let stats = match stats {
            Some(tracker) => Some(tracker.finish(&lattice.previous, gold)?),
            None => None,
        };

        trace!(num_steps, num_tags, "forward pass complete");
        Ok(ForwardOutput {
            loss,
            log_partition,
            gold_score,
            stats,
        })
    }
}

fn validate<S: Score>(num_tags: usize, emissions: &EmissionMatrix<S>, gold: &[Tag]) -> Result<()> {
    let num_steps = emissions.num_steps();
    if num_steps == 0 {
        return Err(CrfError::EmptySequence);
    }
    if emissions.num_tags() != num_tags {
        return Err(CrfError::ShapeMismatch {
            what: "emission width",
            expected: num_tags,
            actual: emissions.num_tags(),
        });
    }
    if gold.len() != num_steps {
        return Err(CrfError::GoldLengthMismatch {
            expected: num_steps,
            actual: gold.len(),
        });
    }
    for &tag in gold {
        check_tag(tag, num_tags)?;
    }
    Ok(())
}

/// Argmax bookkeeping over the lattice values, detached from the loss.
struct StatsTracker {
    num_tags: usize,
    trans: Vec<f64>,
    pointers: BackPointers,
}

impl StatsTracker {
    fn new<S: Score>(num_steps: usize, num_tags: usize, trans: &[S]) -> Result<Self> {
        Ok(Self {
            num_tags,
            trans: trans.iter().map(Score::value).collect::<Result<_>>()?,
            pointers: BackPointers::new(num_steps, num_tags),
        })
    }

    /// Record, for every tag at `t`, the best predecessor given the row at `t - 1`.
    fn record<S: Score>(&mut self, t: usize, previous: &[S]) -> Result<()> {
        let prev = previous.iter().map(Score::value).collect::<Result<Vec<f64>>>()?;
        let mut candidates = vec![0.0; self.num_tags];
        for k in 0..self.num_tags {
            for (i, c) in candidates.iter_mut().enumerate() {
                *c = prev[i] + self.trans[i * self.num_tags + k];
            }
            let (best, _) = argmax(&candidates).ok_or(CrfError::EmptySequence)?;
            self.pointers.set(t, k, best);
        }
        Ok(())
    }

    fn finish<S: Score>(self, last: &[S], gold: &[Tag]) -> Result<PathStats> {
        let last = last.iter().map(Score::value).collect::<Result<Vec<f64>>>()?;
        let (best_last, _) = argmax(&last).ok_or(CrfError::EmptySequence)?;
        let predicted = self.pointers.backtrace(best_last);
        let correct = predicted.iter().zip(gold).filter(|(p, g)| p == g).count();
        Ok(PathStats { predicted, correct })
    }
}
