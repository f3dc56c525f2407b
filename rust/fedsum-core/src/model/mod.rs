//! Model weights and the private updates contributed by participants.
//!
//! A model is an ordered list of [`Tensor`]s whose shapes are fixed by a reference architecture.
//! The protocol never looks at what the numbers mean: weights are opaque numeric payloads that are
//! split, summed and averaged elementwise.
//!
//! Two wire representations exist next to the in-memory types:
//! - [`SumObject`] is how a [`PrivatePart`] travels, both inside encrypted pieces and as a
//!   plaintext partial sum. Its weights are flat arrays, the shapes are implied by the reference
//!   architecture.
//! - [`ModelWeights`] is how the coordinator serves a model snapshot. It carries the shapes
//!   explicitly so clients can rebuild the tensors without knowing the architecture in advance.

mod tensor;

pub use self::tensor::{element_count, Shape, Tensor};

use std::slice::Iter;

use derive_more::{From, Index, IntoIterator};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Errors related to tensor shapes.
pub enum ShapeError {
    #[error("expected {expected} elements but got {actual}")]
    ElementCount { expected: usize, actual: usize },
    #[error("expected shape {expected:?} but got {actual:?}")]
    Shape { expected: Shape, actual: Shape },
    #[error("expected {expected} tensors but got {actual}")]
    TensorCount { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Default, PartialEq, From, Index, IntoIterator)]
/// An ordered list of tensors following a reference architecture.
pub struct Weights(Vec<Tensor>);

impl Weights {
    /// Creates weights where tensor `i` has shape `shapes[i]` and every element equals `value`.
    pub fn filled(shapes: &[Shape], value: f32) -> Self {
        shapes
            .iter()
            .map(|shape| Tensor::filled(shape.clone(), value))
            .collect::<Vec<_>>()
            .into()
    }

    /// Rebuilds weights from per-tensor shapes and flat row-major data.
    ///
    /// # Errors
    /// Fails if the number of tensors differs or a flat array doesn't fit its shape.
    pub fn from_flat(shapes: &[Shape], data: Vec<Vec<f32>>) -> Result<Self, ShapeError> {
        if shapes.len() != data.len() {
            return Err(ShapeError::TensorCount {
                expected: shapes.len(),
                actual: data.len(),
            });
        }
        shapes
            .iter()
            .zip(data)
            .map(|(shape, data)| Tensor::new(shape.clone(), data))
            .collect::<Result<Vec<_>, _>>()
            .map(Weights)
    }

    /// Flattens every tensor into its row-major data, dropping the shapes.
    pub fn flatten(&self) -> Vec<Vec<f32>> {
        self.0.iter().map(|t| t.data().to_vec()).collect()
    }

    /// The shapes of the tensors, in order.
    pub fn shapes(&self) -> Vec<Shape> {
        self.0.iter().map(|t| t.shape().to_vec()).collect()
    }

    /// Checks that the tensors have exactly the given shapes.
    pub fn check_shapes(&self, shapes: &[Shape]) -> Result<(), ShapeError> {
        if self.0.len() != shapes.len() {
            return Err(ShapeError::TensorCount {
                expected: shapes.len(),
                actual: self.0.len(),
            });
        }
        for (tensor, shape) in self.0.iter().zip(shapes) {
            if tensor.shape() != shape.as_slice() {
                return Err(ShapeError::Shape {
                    expected: shape.clone(),
                    actual: tensor.shape().to_vec(),
                });
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> Iter<Tensor> {
        self.0.iter()
    }

    /// Elementwise sum of two weight lists.
    ///
    /// # Errors
    /// Fails if the number of tensors or any pair of shapes differ.
    pub fn add(&self, other: &Weights) -> Result<Weights, ShapeError> {
        self.zip_with(other, Tensor::add)
    }

    /// Elementwise difference `self - other`.
    ///
    /// # Errors
    /// Fails if the number of tensors or any pair of shapes differ.
    pub fn sub(&self, other: &Weights) -> Result<Weights, ShapeError> {
        self.zip_with(other, Tensor::sub)
    }

    /// Multiplies every element of every tensor by `factor`.
    pub fn scale(&self, factor: f32) -> Weights {
        self.0.iter().map(|t| t.scale(factor)).collect::<Vec<_>>().into()
    }

    fn zip_with<F>(&self, other: &Weights, f: F) -> Result<Weights, ShapeError>
    where
        F: Fn(&Tensor, &Tensor) -> Result<Tensor, ShapeError>,
    {
        if self.0.len() != other.0.len() {
            return Err(ShapeError::TensorCount {
                expected: self.0.len(),
                actual: other.0.len(),
            });
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| f(a, b))
            .collect::<Result<Vec<_>, _>>()
            .map(Weights)
    }
}

impl<'a> IntoIterator for &'a Weights {
    type Item = &'a Tensor;
    type IntoIter = Iter<'a, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The private update of a participant: trained weight deltas and the number of batches they
/// were trained on.
pub struct PrivatePart {
    pub trained_batches: i64,
    pub model_weights: Weights,
}

impl PrivatePart {
    pub fn new(trained_batches: i64, model_weights: Weights) -> Self {
        Self {
            trained_batches,
            model_weights,
        }
    }

    /// Converts the part into its wire representation for the first round of a party.
    pub fn to_sum_object(&self) -> SumObject {
        SumObject {
            trained_batches: self.trained_batches,
            model_weights: self.model_weights.flatten(),
            round: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// The wire representation of a [`PrivatePart`].
///
/// The weights are flat arrays, one per tensor, in reference-model order. `round` is the round
/// of the party the part was produced for. A party enters a new round whenever a member leaves,
/// parts of earlier rounds must not be mixed into the sum.
pub struct SumObject {
    pub trained_batches: i64,
    pub model_weights: Vec<Vec<f32>>,
    #[serde(default)]
    pub round: u64,
}

impl SumObject {
    /// Binds the part to a round of its party.
    pub fn with_round(mut self, round: u64) -> Self {
        self.round = round;
        self
    }

    /// Rebuilds the private part, checking the weights against the reference shapes.
    ///
    /// # Errors
    /// Fails if the flat weights don't match `shapes`.
    pub fn into_part(self, shapes: &[Shape]) -> Result<PrivatePart, ShapeError> {
        let model_weights = Weights::from_flat(shapes, self.model_weights)?;
        Ok(PrivatePart::new(self.trained_batches, model_weights))
    }
}

impl From<&PrivatePart> for SumObject {
    fn from(part: &PrivatePart) -> Self {
        part.to_sum_object()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A model snapshot as served by the coordinator.
pub struct ModelWeights {
    pub weight_shapes: Vec<Shape>,
    pub weight_data: Vec<Vec<f32>>,
}

impl ModelWeights {
    /// Rebuilds the tensors of the snapshot.
    ///
    /// # Errors
    /// Fails if the data doesn't fit the announced shapes.
    pub fn to_weights(&self) -> Result<Weights, ShapeError> {
        Weights::from_flat(&self.weight_shapes, self.weight_data.clone())
    }
}

impl From<&Weights> for ModelWeights {
    fn from(weights: &Weights) -> Self {
        Self {
            weight_shapes: weights.shapes(),
            weight_data: weights.flatten(),
        }
    }
}
