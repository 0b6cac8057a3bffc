//! Per-sequence buffers shared by the recurrences.

use crate::crf::emission::EmissionMatrix;
use crate::crf::potentials::TransitionScores;
use crate::error::{CrfError, Result};
use crate::score::Score;
use crate::tags::{Tag, check_tag};

/// Flat `[T][K]` arena of predecessor tags.
///
/// Row 0 is never read; row `t` holds, for every tag `k` at `t`, the tag at
/// `t - 1` on the best path reaching `(t, k)`.
#[derive(Debug, Clone)]
pub(crate) struct BackPointers {
    num_tags: usize,
    data: Vec<Tag>,
}

impl BackPointers {
    pub(crate) fn new(num_steps: usize, num_tags: usize) -> Self {
        Self {
            num_tags,
            data: vec![0; num_steps * num_tags],
        }
    }

    #[inline]
    pub(crate) fn set(&mut self, t: usize, tag: Tag, prev: Tag) {
        self.data[t * self.num_tags + tag] = prev;
    }

    #[inline]
    pub(crate) fn get(&self, t: usize, tag: Tag) -> Tag {
        self.data[t * self.num_tags + tag]
    }

    /// Walk back from `last` at the final timestep to timestep 0.
    pub(crate) fn backtrace(&self, last: Tag) -> Vec<Tag> {
        let num_steps = self.data.len() / self.num_tags.max(1);
        let mut path = vec![0; num_steps];
        if num_steps == 0 {
            return path;
        }
        path[num_steps - 1] = last;
        for t in (1..num_steps).rev() {
            path[t - 1] = self.get(t, path[t]);
        }
        path
    }
}

/// Two rolling rows of the forward lattice.
///
/// The recurrence is first order, so only the previous row and the row being
/// filled are ever alive.
#[derive(Debug)]
pub(crate) struct RollingRows<S> {
    pub(crate) previous: Vec<S>,
    pub(crate) current: Vec<S>,
}

impl<S> RollingRows<S> {
    pub(crate) fn new(first: Vec<S>) -> Self {
        let capacity = first.len();
        Self {
            previous: first,
            current: Vec::with_capacity(capacity),
        }
    }

    /// Make the row just filled the previous row and clear the other.
    pub(crate) fn advance(&mut self) {
        std::mem::swap(&mut self.previous, &mut self.current);
        self.current.clear();
    }
}

/// Score of one complete tag path: `init + Σ trans + Σ emission`.
pub fn path_score<S, P>(table: &P, emissions: &EmissionMatrix<S>, path: &[Tag]) -> Result<S>
where
    S: Score,
    P: TransitionScores<S> + ?Sized,
{
    if path.is_empty() {
        return Err(CrfError::EmptySequence);
    }
    if path.len() != emissions.num_steps() {
        return Err(CrfError::GoldLengthMismatch {
            expected: emissions.num_steps(),
            actual: path.len(),
        });
    }
    for &tag in path {
        check_tag(tag, table.num_tags())?;
    }

    let mut score = table
        .initial_score(path[0])?
        .plus(emissions.get(0, path[0])?)?;
    for t in 1..path.len() {
        score = score
            .plus(&table.transition_score(path[t - 1], path[t])?)?
            .plus(emissions.get(t, path[t])?)?;
    }
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crf::potentials::PotentialSnapshot;

    #[test]
    fn test_backtrace_follows_pointers() {
        let mut bp = BackPointers::new(3, 2);
        bp.set(1, 0, 1);
        bp.set(1, 1, 0);
        bp.set(2, 1, 0);
        bp.set(2, 0, 1);
        assert_eq!(bp.backtrace(1), vec![1, 0, 1]);
        assert_eq!(bp.backtrace(0), vec![0, 1, 0]);
    }

    #[test]
    fn test_backtrace_single_step() {
        let bp = BackPointers::new(1, 4);
        assert_eq!(bp.backtrace(3), vec![3]);
    }

    #[test]
    fn test_rolling_rows_swap() {
        let mut rows = RollingRows::new(vec![1.0, 2.0]);
        rows.current.extend([3.0, 4.0]);
        rows.advance();
        assert_eq!(rows.previous, vec![3.0, 4.0]);
        assert!(rows.current.is_empty());
    }

    #[test]
    fn test_path_score() {
        let table = PotentialSnapshot::new(vec![0.0, 0.0], vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        let em = EmissionMatrix::from_rows(vec![vec![2.0, 0.0], vec![0.0, 2.0]]).unwrap();
        assert_eq!(path_score(&table, &em, &[0, 0]).unwrap(), 2.0);
        assert_eq!(path_score(&table, &em, &[0, 1]).unwrap(), 5.0);
        assert_eq!(path_score(&table, &em, &[1, 0]).unwrap(), 1.0);
        assert_eq!(path_score(&table, &em, &[1, 1]).unwrap(), 2.0);
        assert!(matches!(
            path_score(&table, &em, &[0]),
            Err(CrfError::GoldLengthMismatch { .. })
        ));
        assert!(matches!(
            path_score(&table, &em, &[0, 2]),
            Err(CrfError::TagOutOfRange { .. })
        ));
    }
}
