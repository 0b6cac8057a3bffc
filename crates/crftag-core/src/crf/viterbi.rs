//! # Viterbi Decoding for CRF
//!
//! Implements the Viterbi algorithm for finding the highest-scoring tag
//! sequence given emission potentials, initial scores and transition scores.
//! Works on plain numbers only.

use tracing::trace;

use crate::crf::emission::EmissionMatrix;
use crate::crf::lattice::BackPointers;
use crate::crf::potentials::TransitionScores;
use crate::error::{CrfError, Result};
use crate::score::argmax;
use crate::tags::Tag;

/// Best tag sequence and its unnormalized score.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub tags: Vec<Tag>,
    pub score: f64,
}

/// Viterbi decoder for CRF tag sequences.
///
/// Ties between predecessors, and between final tags, go to the lowest tag
/// index, so decoding the same potentials always yields the same path.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    num_tags: usize,
}

impl ViterbiDecoder {
    /// Create a new Viterbi decoder.
    ///
    /// # Arguments
    /// * `num_tags` - Number of distinct tags `K`
    pub fn new(num_tags: usize) -> Self {
        Self { num_tags }
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    /// Decode the optimal tag sequence.
    ///
    /// # Arguments
    /// * `table` - Initial and transition scores for `K` tags
    /// * `emissions` - `T × K` emission potentials, `T ≥ 1`
    ///
    /// # Returns
    /// The optimal tag sequence and its score.
    pub fn decode<P>(&self, table: &P, emissions: &EmissionMatrix<f64>) -> Result<Decoded>
    where
        P: TransitionScores<f64> + ?Sized,
    {
        let num_tags = self.num_tags;
        let num_steps = emissions.num_steps();
        if num_steps == 0 {
            return Err(CrfError::EmptySequence);
        }
        for (what, actual) in [
            ("transition table", table.num_tags()),
            ("emission width", emissions.num_tags()),
        ] {
            if actual != num_tags {
                return Err(CrfError::ShapeMismatch {
                    what,
                    expected: num_tags,
                    actual,
                });
            }
        }

        let trans = (0..num_tags * num_tags)
            .map(|ij| table.transition_score(ij / num_tags, ij % num_tags))
            .collect::<Result<Vec<f64>>>()?;

        // DP table: [seq_len][num_tags], row-major
        let mut scores = vec![f64::NEG_INFINITY; num_steps * num_tags];
        let mut backptr = BackPointers::new(num_steps, num_tags);

        // Initialize first position
        for (tag, &emission) in emissions.row(0)?.iter().enumerate() {
            scores[tag] = table.initial_score(tag)? + emission;
        }

        // Forward pass
        let mut candidates = vec![0.0; num_tags];
        for pos in 1..num_steps {
            let (done, rest) = scores.split_at_mut(pos * num_tags);
            let prev_row = &done[(pos - 1) * num_tags..];
            let row = &mut rest[..num_tags];
            for (curr_tag, &emission) in emissions.row(pos)?.iter().enumerate() {
                for (prev_tag, candidate) in candidates.iter_mut().enumerate() {
                    *candidate = prev_row[prev_tag] + trans[prev_tag * num_tags + curr_tag];
                }
                let (best_prev, best_score) =
                    argmax(&candidates).ok_or(CrfError::EmptySequence)?;
                row[curr_tag] = best_score + emission;
                backptr.set(pos, curr_tag, best_prev);
            }
        }

        // Find best final tag
        let last_row = &scores[(num_steps - 1) * num_tags..];
        let (best_final_tag, best_final_score) =
            argmax(last_row).ok_or(CrfError::EmptySequence)?;

        // Backtrack
        let tags = backptr.backtrace(best_final_tag);
        trace!(num_steps, num_tags, score = best_final_score, "viterbi decode complete");

        Ok(Decoded {
            tags,
            score: best_final_score,
        })
    }
}
