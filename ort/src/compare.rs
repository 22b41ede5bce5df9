//! Expected-versus-actual comparison for model test data.

use thiserror::Error;

use crate::element::ElementType;
use crate::tensor::{Tensor, TensorData};
use crate::value::Value;

/// Absolute and relative tolerance for floating-point elements.
///
/// An element passes when `|actual - expected| <= atol + rtol * |expected|`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub atol: f64,
    pub rtol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            atol: 1e-3,
            rtol: 1.7e-2,
        }
    }
}

impl Tolerance {
    pub fn exact() -> Self {
        Self { atol: 0.0, rtol: 0.0 }
    }

    pub fn accepts(&self, expected: f64, actual: f64) -> bool {
        if expected.is_nan() || actual.is_nan() {
            return expected.is_nan() && actual.is_nan();
        }
        if expected == actual {
            return true;
        }
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

/// First difference found between two values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Mismatch {
    #[error("kind mismatch: expected {expected}, got {actual}")]
    Kind { expected: String, actual: String },

    #[error("element type mismatch: expected {expected}, got {actual}")]
    ElementType {
        expected: ElementType,
        actual: ElementType,
    },

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    Shape { expected: Vec<i64>, actual: Vec<i64> },

    #[error("length mismatch: expected {expected}, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("element {index}: expected {expected}, got {actual}")]
    Element {
        index: usize,
        expected: String,
        actual: String,
    },
}

/// Compares two tensors. Floats use `tol`; everything else must be equal.
pub fn compare_tensors(expected: &Tensor, actual: &Tensor, tol: Tolerance) -> Result<(), Mismatch> {
    if expected.element_type() != actual.element_type() {
        return Err(Mismatch::ElementType {
            expected: expected.element_type(),
            actual: actual.element_type(),
        });
    }
    if expected.shape() != actual.shape() {
        return Err(Mismatch::Shape {
            expected: expected.shape().to_vec(),
            actual: actual.shape().to_vec(),
        });
    }
    compare_data(expected.data(), actual.data(), tol)
}

/// Compares two values structurally: sequences element-wise, maps by keys
/// then values.
pub fn compare_values(expected: &Value, actual: &Value, tol: Tolerance) -> Result<(), Mismatch> {
    match (expected, actual) {
        (Value::Tensor(e), Value::Tensor(a)) => compare_tensors(e, a, tol),
        (Value::Sequence(e), Value::Sequence(a)) => {
            if e.len() != a.len() {
                return Err(Mismatch::Length {
                    expected: e.len(),
                    actual: a.len(),
                });
            }
            e.iter()
                .zip(a)
                .try_for_each(|(e, a)| compare_values(e, a, tol))
        }
        (Value::Map(e), Value::Map(a)) => {
            compare_tensors(e.keys(), a.keys(), Tolerance::exact())?;
            compare_tensors(e.values(), a.values(), tol)
        }
        (e, a) => Err(Mismatch::Kind {
            expected: e.type_name(),
            actual: a.type_name(),
        }),
    }
}

fn compare_data(expected: &TensorData, actual: &TensorData, tol: Tolerance) -> Result<(), Mismatch> {
    if expected.len() != actual.len() {
        return Err(Mismatch::Length {
            expected: expected.len(),
            actual: actual.len(),
        });
    }
    match (expected, actual) {
        (TensorData::Float(e), TensorData::Float(a)) => {
            compare_floats(e.iter().map(|&v| f64::from(v)), a.iter().map(|&v| f64::from(v)), tol)
        }
        (TensorData::Double(e), TensorData::Double(a)) => {
            compare_floats(e.iter().copied(), a.iter().copied(), tol)
        }
        (TensorData::Int8(e), TensorData::Int8(a)) => compare_exact(e, a),
        (TensorData::Int16(e), TensorData::Int16(a)) => compare_exact(e, a),
        (TensorData::Int32(e), TensorData::Int32(a)) => compare_exact(e, a),
        (TensorData::Int64(e), TensorData::Int64(a)) => compare_exact(e, a),
        (TensorData::Uint8(e), TensorData::Uint8(a)) => compare_exact(e, a),
        (TensorData::Uint16(e), TensorData::Uint16(a)) => compare_exact(e, a),
        (TensorData::Uint32(e), TensorData::Uint32(a)) => compare_exact(e, a),
        (TensorData::Uint64(e), TensorData::Uint64(a)) => compare_exact(e, a),
        (TensorData::Bool(e), TensorData::Bool(a)) => compare_exact(e, a),
        (TensorData::String(e), TensorData::String(a)) => compare_exact(e, a),
        (e, a) => Err(Mismatch::ElementType {
            expected: e.element_type(),
            actual: a.element_type(),
        }),
    }
}

fn compare_floats(
    expected: impl Iterator<Item = f64>,
    actual: impl Iterator<Item = f64>,
    tol: Tolerance,
) -> Result<(), Mismatch> {
    for (index, (e, a)) in expected.zip(actual).enumerate() {
        if !tol.accepts(e, a) {
            return Err(Mismatch::Element {
                index,
                expected: e.to_string(),
                actual: a.to_string(),
            });
        }
    }
    Ok(())
}

fn compare_exact<T: PartialEq + std::fmt::Debug>(expected: &[T], actual: &[T]) -> Result<(), Mismatch> {
    match expected.iter().zip(actual).position(|(e, a)| e != a) {
        Some(index) => Err(Mismatch::Element {
            index,
            expected: format!("{:?}", expected[index]),
            actual: format!("{:?}", actual[index]),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MapValue;

    #[test]
    fn default_tolerance() {
        let tol = Tolerance::default();
        assert!(tol.accepts(1.0, 1.0169));
        assert!(!tol.accepts(1.0, 1.03));
        // Near zero the absolute term dominates.
        assert!(tol.accepts(0.0, 0.0009));
        assert!(!tol.accepts(0.0, 0.002));
        assert!(tol.accepts(f64::NAN, f64::NAN));
        assert!(!tol.accepts(0.0, f64::NAN));
    }

    #[test]
    fn float_tensors_within_tolerance() {
        let e = Tensor::new(&[1, 3], vec![0.25938290f32, 0.40904793, 0.33156919]).unwrap();
        let a = Tensor::new(&[1, 3], vec![0.2594f32, 0.4090, 0.3316]).unwrap();
        compare_tensors(&e, &a, Tolerance::default()).unwrap();
        assert!(compare_tensors(&e, &a, Tolerance::exact()).is_err());
    }

    #[test]
    fn integers_compare_exactly() {
        let e = Tensor::new(&[3], vec![1i64, 2, 3]).unwrap();
        let a = Tensor::new(&[3], vec![1i64, 2, 4]).unwrap();
        assert_eq!(
            compare_tensors(&e, &a, Tolerance::default()),
            Err(Mismatch::Element {
                index: 2,
                expected: "3".into(),
                actual: "4".into()
            })
        );
    }

    #[test]
    fn shape_and_type_mismatch() {
        let e = Tensor::new(&[1, 2], vec![1i32, 2]).unwrap();
        let a = Tensor::new(&[2, 1], vec![1i32, 2]).unwrap();
        assert!(matches!(
            compare_tensors(&e, &a, Tolerance::default()),
            Err(Mismatch::Shape { .. })
        ));
        let f = Tensor::new(&[1, 2], vec![1.0f32, 2.0]).unwrap();
        assert!(matches!(
            compare_tensors(&e, &f, Tolerance::default()),
            Err(Mismatch::ElementType { .. })
        ));
    }

    #[test]
    fn sequences_of_maps() {
        let m = |p: f32| {
            Value::Map(MapValue::from_entries(vec![(0i64, p), (1, 1.0 - p)]).unwrap())
        };
        let e = Value::Sequence(vec![m(0.25), m(0.5)]);
        compare_values(&e, &Value::Sequence(vec![m(0.2501), m(0.5)]), Tolerance::default()).unwrap();
        assert!(matches!(
            compare_values(&e, &Value::Sequence(vec![m(0.25)]), Tolerance::default()),
            Err(Mismatch::Length { .. })
        ));
        assert!(matches!(
            compare_values(&e, &m(0.25), Tolerance::default()),
            Err(Mismatch::Kind { .. })
        ));
    }
}
