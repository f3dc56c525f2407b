//! Splitting of scalar counts.
//!
//! See the [share module] documentation since this is a private module anyways.
//!
//! [share module]: crate::share

use std::ops::RangeInclusive;

use rand::Rng;

use super::{check_party_count, ShareError};

/// The range random scalar pieces are drawn from.
pub const SCALAR_PIECE_RANGE: RangeInclusive<i64> = 1..=1000;

/// Splits `value` into `n` pieces which sum to `value`.
///
/// The first `n - 1` pieces are random, the last one is the residual. The residual may lie outside
/// of [`SCALAR_PIECE_RANGE`] and may be negative. Sums wrap on overflow, so the pieces of any `i64`
/// sum back to it exactly.
///
/// # Errors
/// Fails if `n < 2`.
pub fn split_scalar(value: i64, n: usize) -> Result<Vec<i64>, ShareError> {
    check_party_count(n)?;
    let mut rng = rand::thread_rng();
    let mut pieces = (0..n - 1)
        .map(|_| rng.gen_range(SCALAR_PIECE_RANGE))
        .collect::<Vec<_>>();
    let residual = value.wrapping_sub(combine_scalars(&pieces));
    pieces.push(residual);
    Ok(pieces)
}

/// Sums scalar pieces.
///
/// This doesn't care how the pieces were produced. The empty sum is `0`.
pub fn combine_scalars(pieces: &[i64]) -> i64 {
    pieces.iter().fold(0, |sum, piece| sum.wrapping_add(*piece))
}
