//! Helpers for tests across the workspace.

use crate::model::{PrivatePart, Shape, Weights};

/// The parameter shapes of the small convolutional network the protocol was first used with,
/// for `28x28` grayscale inputs and 10 classes.
pub fn reference_shapes() -> Vec<Shape> {
    vec![
        vec![3, 3, 1, 16],
        vec![16],
        vec![3, 3, 16, 32],
        vec![32],
        vec![3, 3, 32, 32],
        vec![32],
        vec![288, 64],
        vec![64],
        vec![64, 10],
        vec![10],
    ]
}

/// A few small shapes for tests that don't need a realistic model.
pub fn small_shapes() -> Vec<Shape> {
    vec![vec![2, 2], vec![3], vec![1]]
}

/// Unit weights for the given shapes, scaled by `factor`.
pub fn scaled_weights(shapes: &[Shape], factor: f32) -> Weights {
    Weights::filled(shapes, factor)
}

/// A private part trained on `batches` batches whose weights are unit weights scaled by the
/// number of batches.
pub fn private_part(shapes: &[Shape], batches: i64) -> PrivatePart {
    PrivatePart::new(batches, scaled_weights(shapes, batches as f32))
}
