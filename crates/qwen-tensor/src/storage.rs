use half::{bf16, f16};

use crate::dtype::DType;
use crate::error::{Result, TensorError};

/// CPU-side tensor storage, dtype-polymorphic over the three compute
/// element types the kernels are monomorphized over.
#[derive(Debug, Clone)]
pub enum CpuStorage {
    /// 32-bit floating point storage.
    F32(Vec<f32>),
    /// IEEE 754 half-precision storage.
    F16(Vec<f16>),
    /// bfloat16 storage.
    Bf16(Vec<bf16>),
}

impl CpuStorage {
    /// Number of elements in this storage.
    pub fn len(&self) -> usize {
        match self {
            CpuStorage::F32(v) => v.len(),
            CpuStorage::F16(v) => v.len(),
            CpuStorage::Bf16(v) => v.len(),
        }
    }

    /// Returns true if the storage contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the data as an f32 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not F32.
    pub fn as_f32_slice(&self) -> Result<&[f32]> {
        match self {
            CpuStorage::F32(v) => Ok(v.as_slice()),
            other => Err(TensorError::DTypeMismatch {
                expected: "f32".to_string(),
                got: other.dtype().to_string(),
            }),
        }
    }

    /// Returns the data as a mutable f32 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not F32.
    pub fn as_f32_slice_mut(&mut self) -> Result<&mut [f32]> {
        let dtype = self.dtype();
        match self {
            CpuStorage::F32(v) => Ok(v.as_mut_slice()),
            _ => Err(TensorError::DTypeMismatch {
                expected: "f32".to_string(),
                got: dtype.to_string(),
            }),
        }
    }

    /// Returns the data as an f16 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not F16.
    pub fn as_f16_slice(&self) -> Result<&[f16]> {
        match self {
            CpuStorage::F16(v) => Ok(v.as_slice()),
            other => Err(TensorError::DTypeMismatch {
                expected: "f16".to_string(),
                got: other.dtype().to_string(),
            }),
        }
    }

    /// Returns the data as a bf16 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not Bf16.
    pub fn as_bf16_slice(&self) -> Result<&[bf16]> {
        match self {
            CpuStorage::Bf16(v) => Ok(v.as_slice()),
            other => Err(TensorError::DTypeMismatch {
                expected: "bf16".to_string(),
                got: other.dtype().to_string(),
            }),
        }
    }

    /// Create zero-filled storage for the given dtype and element count.
    ///
    /// # Errors
    /// Returns an error for quantized dtypes, which are never materialized
    /// as compute storage (they are dequantized to f32/f16/bf16 at load
    /// time).
    pub fn zeros(dtype: DType, n: usize) -> Result<Self> {
        match dtype {
            DType::F32 => Ok(CpuStorage::F32(vec![0.0; n])),
            DType::F16 => Ok(CpuStorage::F16(vec![f16::from_f32(0.0); n])),
            DType::Bf16 => Ok(CpuStorage::Bf16(vec![bf16::from_f32(0.0); n])),
            other => Err(TensorError::UnsupportedDType(format!(
                "{} storage not supported for compute tensors",
                other
            ))),
        }
    }

    /// Create storage from an f32 vector.
    pub fn from_f32_vec(data: Vec<f32>) -> Self {
        CpuStorage::F32(data)
    }

    /// Create storage from an f16 vector.
    pub fn from_f16_vec(data: Vec<f16>) -> Self {
        CpuStorage::F16(data)
    }

    /// Create storage from a bf16 vector.
    pub fn from_bf16_vec(data: Vec<bf16>) -> Self {
        CpuStorage::Bf16(data)
    }

    /// Widen every element to an owned `Vec<f32>`, regardless of storage
    /// dtype.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            CpuStorage::F32(v) => v.clone(),
            CpuStorage::F16(v) => v.iter().map(|x| x.to_f32()).collect(),
            CpuStorage::Bf16(v) => v.iter().map(|x| x.to_f32()).collect(),
        }
    }

    /// Returns the dtype of this storage.
    pub fn dtype(&self) -> DType {
        match self {
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::F16(_) => DType::F16,
            CpuStorage::Bf16(_) => DType::Bf16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f32_vec() {
        let s = CpuStorage::from_f32_vec(vec![1.0, 2.0, 3.0]);
        assert_eq!(s.len(), 3);
        assert!(!s.is_empty());
        assert_eq!(s.as_f32_slice().unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_zeros_f32() {
        let s = CpuStorage::zeros(DType::F32, 5).unwrap();
        assert_eq!(s.len(), 5);
        assert_eq!(s.as_f32_slice().unwrap(), &[0.0; 5]);
    }

    #[test]
    fn test_zeros_f16_bf16() {
        let s = CpuStorage::zeros(DType::F16, 3).unwrap();
        assert_eq!(s.len(), 3);
        let s = CpuStorage::zeros(DType::Bf16, 3).unwrap();
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_zeros_unsupported() {
        assert!(CpuStorage::zeros(DType::Q4_0, 5).is_err());
    }

    #[test]
    fn test_wrong_variant_access() {
        let s = CpuStorage::from_f32_vec(vec![1.0]);
        assert!(s.as_f16_slice().is_err());
        assert!(s.as_bf16_slice().is_err());
    }

    #[test]
    fn test_to_f32_vec_widens() {
        let s = CpuStorage::from_f16_vec(vec![f16::from_f32(1.5), f16::from_f32(2.5)]);
        assert_eq!(s.to_f32_vec(), vec![1.5, 2.5]);
    }

    #[test]
    fn test_dtype() {
        let s = CpuStorage::from_f32_vec(vec![]);
        assert_eq!(s.dtype(), DType::F32);
    }

    #[test]
    fn test_mut_slice() {
        let mut s = CpuStorage::from_f32_vec(vec![1.0, 2.0]);
        let slice = s.as_f32_slice_mut().unwrap();
        slice[0] = 42.0;
        assert_eq!(s.as_f32_slice().unwrap()[0], 42.0);
    }
}
