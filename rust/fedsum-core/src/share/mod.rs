//! Additive secret splitting.
//!
//! A value is split into `n` pieces: `n - 1` of them are drawn at random and the last one, the
//! *residual*, is whatever is left to make all pieces sum back to the value. Any strict subset of
//! the pieces reveals little about the value, while their sum reveals it completely.
//!
//! Scalars are split over the integers with random pieces in `1..=1000`, see [`split_scalar()`].
//! Tensors are split elementwise with random pieces uniformly drawn from `[-0.99, 0.99)`, see
//! [`split_tensors()`]. The hiding is statistical and best effort: it protects an update from
//! honest-but-curious peers, not from a colluding subset of them.
//!
//! # Examples
//! ```
//! # use fedsum_core::{model::{PrivatePart, Weights}, share::{assemble_parts, split_part}};
//! let part = PrivatePart::new(10, Weights::filled(&[vec![2, 2]], 1.0));
//! let pieces = split_part(&part, 3).unwrap();
//! assert_eq!(pieces.len(), 3);
//!
//! let sum = assemble_parts(&pieces).unwrap();
//! assert_eq!(sum.trained_batches, 10);
//! assert!(sum.model_weights[0].data().iter().all(|x| (x - 1.0).abs() < 1e-5));
//! ```

mod scalar;
mod tensor;

pub use self::{
    scalar::{combine_scalars, split_scalar, SCALAR_PIECE_RANGE},
    tensor::{assemble_tensors, split_tensors, TENSOR_PIECE_BOUND},
};

use thiserror::Error;

use crate::model::{PrivatePart, ShapeError};

/// The smallest number of pieces a value can be split into.
pub const MIN_PIECES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Errors related to splitting and assembling.
pub enum ShareError {
    #[error("a value can't be shared among {0} parties")]
    InvalidPartyCount(usize),
    #[error("pieces don't fit together: {0}")]
    ShapeMismatch(#[from] ShapeError),
}

pub(crate) fn check_party_count(n: usize) -> Result<(), ShareError> {
    if n < MIN_PIECES {
        Err(ShareError::InvalidPartyCount(n))
    } else {
        Ok(())
    }
}

/// Splits a private part into `n` pieces.
///
/// The batch count and the weights are split independently. The last piece is the residual.
///
/// # Errors
/// Fails if `n < 2`.
pub fn split_part(part: &PrivatePart, n: usize) -> Result<Vec<PrivatePart>, ShareError> {
    let batches = split_scalar(part.trained_batches, n)?;
    let weights = split_tensors(&part.model_weights, n)?;
    Ok(batches
        .into_iter()
        .zip(weights)
        .map(|(trained_batches, model_weights)| PrivatePart::new(trained_batches, model_weights))
        .collect())
}

/// Sums pieces of private parts back together.
///
/// This works for pieces of several parts as well: assembling pieces of different updates yields
/// the sum of those updates.
///
/// # Errors
/// Fails if no pieces are given or the weights of the pieces don't fit together.
pub fn assemble_parts(pieces: &[PrivatePart]) -> Result<PrivatePart, ShareError> {
    let batches = pieces.iter().map(|p| p.trained_batches).collect::<Vec<_>>();
    let weights = pieces
        .iter()
        .map(|p| p.model_weights.clone())
        .collect::<Vec<_>>();
    let model_weights = assemble_tensors(&weights)?;
    Ok(PrivatePart::new(combine_scalars(&batches), model_weights))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Weights;

    #[test]
    fn test_split_part() {
        let part = PrivatePart::new(42, Weights::filled(&[vec![3, 2], vec![2]], 0.25));
        let pieces = split_part(&part, 4).unwrap();
        assert_eq!(pieces.len(), 4);
        for piece in &pieces {
            assert_eq!(piece.model_weights.shapes(), part.model_weights.shapes());
        }

        let sum = assemble_parts(&pieces).unwrap();
        assert_eq!(sum.trained_batches, 42);
        for (t, expected) in sum.model_weights.iter().zip(part.model_weights.iter()) {
            for (x, y) in t.data().iter().zip(expected.data()) {
                assert!((x - y).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_split_part_invalid_count() {
        let part = PrivatePart::new(1, Weights::filled(&[vec![1]], 1.0));
        assert_eq!(
            split_part(&part, 1).unwrap_err(),
            ShareError::InvalidPartyCount(1)
        );
    }

    #[test]
    fn test_assemble_parts_of_several_updates() {
        let shapes = [vec![2]];
        let a = split_part(&PrivatePart::new(9, Weights::filled(&shapes, 9.0)), 3).unwrap();
        let b = split_part(&PrivatePart::new(11, Weights::filled(&shapes, 11.0)), 3).unwrap();

        let all = a.into_iter().chain(b).collect::<Vec<_>>();
        let sum = assemble_parts(&all).unwrap();
        assert_eq!(sum.trained_batches, 20);
        assert!(sum.model_weights[0]
            .data()
            .iter()
            .all(|x| (x - 20.0).abs() < 1e-4));
    }

    #[test]
    fn test_assemble_parts_empty() {
        assert_eq!(
            assemble_parts(&[]).unwrap_err(),
            ShareError::InvalidPartyCount(0)
        );
    }
}
