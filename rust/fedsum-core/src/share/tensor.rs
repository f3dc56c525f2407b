//! Splitting of weight tensors.
//!
//! See the [share module] documentation since this is a private module anyways.
//!
//! [share module]: crate::share

use super::{check_party_count, ShareError};
use crate::model::{Tensor, Weights};

/// Random tensor pieces are drawn uniformly from `[-TENSOR_PIECE_BOUND, TENSOR_PIECE_BOUND)`.
pub const TENSOR_PIECE_BOUND: f32 = 0.99;

/// Splits weights into `n` pieces which sum elementwise to the weights.
///
/// Every piece has the shapes of `weights`. The last piece is the residual, so the sum is exact
/// only up to floating point rounding.
///
/// # Errors
/// Fails if `n < 2`.
pub fn split_tensors(weights: &Weights, n: usize) -> Result<Vec<Weights>, ShareError> {
    check_party_count(n)?;
    let mut rng = rand::thread_rng();
    let mut pieces = (0..n - 1)
        .map(|_| {
            weights
                .iter()
                .map(|t| {
                    Tensor::random_uniform(
                        t.shape().to_vec(),
                        -TENSOR_PIECE_BOUND,
                        TENSOR_PIECE_BOUND,
                        &mut rng,
                    )
                })
                .collect::<Vec<_>>()
                .into()
        })
        .collect::<Vec<Weights>>();
    let residual = weights.sub(&assemble_tensors(&pieces)?)?;
    pieces.push(residual);
    Ok(pieces)
}

/// Sums weight pieces elementwise.
///
/// # Errors
/// Fails if no pieces are given or the pieces differ in tensor count or shapes.
pub fn assemble_tensors(pieces: &[Weights]) -> Result<Weights, ShareError> {
    let (first, rest) = pieces
        .split_first()
        .ok_or(ShareError::InvalidPartyCount(0))?;
    rest.iter()
        .try_fold(first.clone(), |sum, piece| sum.add(piece))
        .map_err(ShareError::from)
}
