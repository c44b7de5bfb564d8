//! Raw byte encoding for array-valued columns.
//!
//! Arrays are written as their native-endian element bytes with no header,
//! so a blob carries neither its element type nor its shape. Readers must
//! supply both, usually from the `rows`/`cols` columns stored next to it.
//! A wrong element type or shape that happens to pass the length check
//! decodes to garbage rather than an error.

use bytemuck::Pod;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlobError {
    #[error("Encode error: shape {shape:?} describes {expected} elements, got {actual}")]
    Encode {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("Decode error: {message}")]
    Decode { message: String },
}

impl BlobError {
    fn decode(message: impl Into<String>) -> Self {
        BlobError::Decode {
            message: message.into(),
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Fixed-width numeric element types that may be stored in a blob.
pub trait Element: Pod + PartialEq + fmt::Debug + sealed::Sealed {
    const DTYPE: DType;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn size(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;
            }
        )*
    };
}

impl_element!(
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
);

/// One dimension of a requested decode shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    Fixed(usize),
    /// Computed from the blob length. At most one per shape.
    Infer,
}

/// A dense row-major array with an explicit shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Array<T: Element> {
    data: Vec<T>,
    shape: Vec<usize>,
}

impl<T: Element> Array<T> {
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> Result<Self, BlobError> {
        // An overflowing shape saturates and can never match a real length.
        let expected = checked_product(&shape).unwrap_or(usize::MAX);
        if expected != data.len() {
            return Err(BlobError::Encode {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, shape })
    }

    pub fn from_vec(data: Vec<T>) -> Self {
        let len = data.len();
        Self {
            data,
            shape: vec![len],
        }
    }

    pub fn matrix(rows: usize, cols: usize, data: Vec<T>) -> Result<Self, BlobError> {
        Self::new(data, vec![rows, cols])
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Leading dimension, or 0 for a scalar-shaped array.
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Product of the trailing dimensions; 1 for 1-D arrays.
    pub fn cols(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    pub fn row(&self, index: usize) -> Option<&[T]> {
        let cols = self.cols();
        let start = index.checked_mul(cols)?;
        self.data.get(start..start + cols)
    }
}

pub fn encode<T: Element>(array: &Array<T>) -> Vec<u8> {
    encode_slice(array.as_slice())
}

pub fn encode_slice<T: Element>(values: &[T]) -> Vec<u8> {
    bytemuck::cast_slice::<T, u8>(values).to_vec()
}

/// Reinterpret `bytes` as an array of `T` with the given shape.
pub fn decode<T: Element>(bytes: &[u8], shape: &[Dim]) -> Result<Array<T>, BlobError> {
    let elem_size = T::DTYPE.size();
    if bytes.len() % elem_size != 0 {
        return Err(BlobError::decode(format!(
            "{} bytes is not a multiple of the {} element size ({})",
            bytes.len(),
            T::DTYPE.name(),
            elem_size
        )));
    }
    let count = bytes.len() / elem_size;
    let resolved = resolve_shape(shape, count)?;

    let mut data = vec![T::zeroed(); count];
    bytemuck::cast_slice_mut::<T, u8>(&mut data).copy_from_slice(bytes);

    Ok(Array {
        data,
        shape: resolved,
    })
}

/// Shorthand for the common `(-1,)` case.
pub fn decode_vec<T: Element>(bytes: &[u8]) -> Result<Vec<T>, BlobError> {
    decode::<T>(bytes, &[Dim::Infer]).map(Array::into_vec)
}

fn resolve_shape(shape: &[Dim], count: usize) -> Result<Vec<usize>, BlobError> {
    let inferred = shape.iter().filter(|d| matches!(d, Dim::Infer)).count();
    if inferred > 1 {
        return Err(BlobError::decode(format!(
            "shape {:?} has more than one inferred dimension",
            shape
        )));
    }

    let fixed: Vec<usize> = shape
        .iter()
        .map(|d| match d {
            Dim::Fixed(n) => *n,
            Dim::Infer => 1,
        })
        .collect();
    let known = checked_product(&fixed).ok_or_else(|| {
        BlobError::decode(format!("shape {:?} overflows the element count", shape))
    })?;

    if inferred == 0 {
        if known != count {
            return Err(BlobError::decode(format!(
                "shape {:?} needs {} elements, blob holds {}",
                shape, known, count
            )));
        }
        return Ok(fixed);
    }

    if known == 0 {
        if count != 0 {
            return Err(BlobError::decode(format!(
                "cannot infer a dimension of shape {:?} from {} elements",
                shape, count
            )));
        }
    } else if count % known != 0 {
        return Err(BlobError::decode(format!(
            "{} elements do not divide into shape {:?}",
            count, shape
        )));
    }
    let inferred_len = if known == 0 { 0 } else { count / known };

    Ok(shape
        .iter()
        .map(|d| match d {
            Dim::Fixed(n) => *n,
            Dim::Infer => inferred_len,
        })
        .collect())
}

/// Element count of a shape, or `None` when it does not fit in `usize`.
fn checked_product(dims: &[usize]) -> Option<usize> {
    if dims.contains(&0) {
        return Some(0);
    }
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f64_round_trip_is_bit_exact() {
        let values = vec![1000.0, 960.5, -540.25, f64::MIN_POSITIVE, 1e-300, 0.1 + 0.2];
        let array = Array::matrix(2, 3, values.clone()).unwrap();

        let bytes = encode(&array);
        assert_eq!(bytes.len(), 6 * 8);

        let decoded = decode::<f64>(&bytes, &[Dim::Fixed(2), Dim::Fixed(3)]).unwrap();
        assert_eq!(decoded.shape(), &[2, 3]);
        let original_bits: Vec<u64> = values.iter().map(|v| v.to_bits()).collect();
        let decoded_bits: Vec<u64> = decoded.as_slice().iter().map(|v| v.to_bits()).collect();
        assert_eq!(original_bits, decoded_bits);
    }

    #[test]
    fn test_infer_flattens_any_original_shape() {
        let array = Array::matrix(3, 2, vec![1u32, 2, 3, 4, 5, 6]).unwrap();
        let bytes = encode(&array);

        let flat = decode::<u32>(&bytes, &[Dim::Infer]).unwrap();
        assert_eq!(flat.shape(), &[6]);
        assert_eq!(flat.as_slice(), &[1, 2, 3, 4, 5, 6]);

        let reshaped = decode::<u32>(&bytes, &[Dim::Infer, Dim::Fixed(3)]).unwrap();
        assert_eq!(reshaped.shape(), &[2, 3]);
        assert_eq!(reshaped.row(1), Some(&[4u32, 5, 6][..]));
    }

    #[test]
    fn test_no_header_is_written() {
        let bytes = encode_slice(&[1u8, 2, 3]);
        assert_eq!(bytes, vec![1, 2, 3]);

        let bytes = encode_slice(&[1.0f32]);
        assert_eq!(bytes, 1.0f32.to_ne_bytes().to_vec());
    }

    #[test]
    fn test_decode_rejects_partial_elements() {
        let mut bytes = encode_slice(&[1.0f64, 2.0, 3.0]);
        bytes.pop();

        let err = decode::<f64>(&bytes, &[Dim::Infer]).unwrap_err();
        assert!(matches!(err, BlobError::Decode { .. }));
    }

    #[test]
    fn test_decode_rejects_explicit_shape_mismatch() {
        let bytes = encode_slice(&[1i32, 2, 3, 4]);
        assert!(decode::<i32>(&bytes, &[Dim::Fixed(3)]).is_err());
        assert!(decode::<i32>(&bytes, &[Dim::Fixed(2), Dim::Fixed(2)]).is_ok());
    }

    #[test]
    fn test_decode_rejects_two_inferred_dims() {
        let bytes = encode_slice(&[1u16, 2]);
        assert!(decode::<u16>(&bytes, &[Dim::Infer, Dim::Infer]).is_err());
    }

    #[test]
    fn test_decode_rejects_uneven_inference() {
        let bytes = encode_slice(&[1u8, 2, 3, 4, 5]);
        assert!(decode::<u8>(&bytes, &[Dim::Infer, Dim::Fixed(2)]).is_err());
    }

    #[test]
    fn test_overflowing_shape_is_decode_error() {
        let bytes = encode_slice(&[0u32]);
        let huge = 1usize << (usize::BITS - 1);

        let err = decode::<u32>(&bytes, &[Dim::Fixed(huge), Dim::Fixed(4)]).unwrap_err();
        assert!(matches!(err, BlobError::Decode { .. }));
        assert!(decode::<u32>(&bytes, &[Dim::Fixed(huge), Dim::Fixed(4), Dim::Infer]).is_err());

        let empty = decode::<u32>(&[], &[Dim::Fixed(huge), Dim::Fixed(4), Dim::Fixed(0)]).unwrap();
        assert!(empty.is_empty());

        assert!(matches!(
            Array::new(vec![0u32], vec![huge, 4]).unwrap_err(),
            BlobError::Encode { .. }
        ));
    }

    #[test]
    fn test_wrong_dtype_passes_length_check() {
        // Not self-describing: eight f32 bytes decode as one f64 without complaint.
        let bytes = encode_slice(&[1.0f32, 2.0]);
        let reinterpreted = decode_vec::<f64>(&bytes).unwrap();
        assert_eq!(reinterpreted.len(), 1);
        assert_ne!(reinterpreted[0], 1.0);
    }

    #[test]
    fn test_empty_blob() {
        let empty: Vec<f32> = decode_vec(&[]).unwrap();
        assert!(empty.is_empty());

        let zero_rows = decode::<f32>(&[], &[Dim::Infer, Dim::Fixed(2)]).unwrap();
        assert_eq!(zero_rows.shape(), &[0, 2]);
    }

    #[test]
    fn test_array_new_checks_shape() {
        let err = Array::new(vec![1.0f64, 2.0, 3.0], vec![2, 2]).unwrap_err();
        assert_eq!(
            err,
            BlobError::Encode {
                shape: vec![2, 2],
                expected: 4,
                actual: 3
            }
        );
    }
}
