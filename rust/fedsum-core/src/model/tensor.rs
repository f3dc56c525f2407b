//! Dense numeric tensors.
//!
//! See the [model module] documentation since this is a private module anyways.
//!
//! [model module]: crate::model

use rand::{distributions::Uniform, Rng};

use super::ShapeError;

/// The shape of a tensor, one entry per dimension.
pub type Shape = Vec<usize>;

/// Number of elements described by a shape. The empty shape describes a scalar.
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

#[derive(Debug, Clone, PartialEq)]
/// A dense `f32` tensor stored in row-major order.
pub struct Tensor {
    shape: Shape,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor from its shape and row-major data.
    ///
    /// # Errors
    /// Fails if the number of elements doesn't match the shape.
    pub fn new(shape: Shape, data: Vec<f32>) -> Result<Self, ShapeError> {
        let expected = element_count(&shape);
        if expected != data.len() {
            return Err(ShapeError::ElementCount {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Creates a tensor with every element set to `value`.
    pub fn filled(shape: Shape, value: f32) -> Self {
        let data = vec![value; element_count(&shape)];
        Self { shape, data }
    }

    /// Creates a tensor of zeros.
    pub fn zeros(shape: Shape) -> Self {
        Self::filled(shape, 0.0)
    }

    /// Creates a tensor whose elements are drawn independently and uniformly from
    /// `[low, high)`.
    pub fn random_uniform<R: Rng + ?Sized>(shape: Shape, low: f32, high: f32, rng: &mut R) -> Self {
        let dist = Uniform::new(low, high);
        let data = (0..element_count(&shape)).map(|_| rng.sample(dist)).collect();
        Self { shape, data }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consumes the tensor and returns its row-major data.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Elementwise sum.
    ///
    /// # Errors
    /// Fails if the shapes differ.
    pub fn add(&self, other: &Tensor) -> Result<Tensor, ShapeError> {
        self.zip_with(other, |a, b| a + b)
    }

    /// Elementwise difference `self - other`.
    ///
    /// # Errors
    /// Fails if the shapes differ.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor, ShapeError> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Multiplies every element by `factor`.
    pub fn scale(&self, factor: f32) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|x| x * factor).collect(),
        }
    }

    fn zip_with<F>(&self, other: &Tensor, f: F) -> Result<Tensor, ShapeError>
    where
        F: Fn(f32, f32) -> f32,
    {
        if self.shape != other.shape {
            return Err(ShapeError::Shape {
                expected: self.shape.clone(),
                actual: other.shape.clone(),
            });
        }
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| f(*a, *b))
            .collect();
        Ok(Tensor {
            shape: self.shape.clone(),
            data,
        })
    }
}
