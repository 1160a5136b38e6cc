use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::storage::CpuStorage;

/// A tensor backed by owned CPU storage.
///
/// Holds contiguous, row-major data of one of the three compute dtypes
/// (f32/f16/bf16) with an associated shape. Used by the model layer to own
/// weights and intermediate activations; the actual kernels operate on raw
/// slices drawn from `storage()` plus shape scalars, via `ComputeBackend`.
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: CpuStorage,
    shape: Shape,
}

impl Tensor {
    /// Create a new tensor from f32 data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn new(data: Vec<f32>, shape: Shape) -> Self {
        assert_eq!(
            data.len(),
            shape.numel(),
            "data length {} does not match shape {:?} (numel={})",
            data.len(),
            shape,
            shape.numel()
        );
        Tensor {
            storage: CpuStorage::from_f32_vec(data),
            shape,
        }
    }

    /// Create a tensor from arbitrary dtype-tagged storage and a shape.
    ///
    /// # Errors
    /// Returns [`TensorError::ShapeMismatch`] if the storage length does not
    /// match `shape.numel()`.
    pub fn from_storage(storage: CpuStorage, shape: Shape) -> Result<Self> {
        if storage.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![shape.numel()],
                got: vec![storage.len()],
            });
        }
        Ok(Tensor { storage, shape })
    }

    /// Create a zero-filled tensor with the given shape and dtype.
    pub fn zeros_dtype(shape: Shape, dtype: DType) -> Result<Self> {
        let storage = CpuStorage::zeros(dtype, shape.numel())?;
        Ok(Tensor { storage, shape })
    }

    /// Create a zero-filled f32 tensor with the given shape.
    pub fn zeros(shape: Shape) -> Self {
        let n = shape.numel();
        Tensor {
            storage: CpuStorage::from_f32_vec(vec![0.0; n]),
            shape,
        }
    }

    /// Create an f32 tensor filled with ones with the given shape.
    pub fn ones(shape: Shape) -> Self {
        let n = shape.numel();
        Tensor {
            storage: CpuStorage::from_f32_vec(vec![1.0; n]),
            shape,
        }
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// Returns the underlying data as an f32 slice.
    ///
    /// # Panics
    /// Panics if the storage is not F32.
    pub fn data_f32(&self) -> &[f32] {
        self.storage
            .as_f32_slice()
            .expect("tensor storage is not F32")
    }

    /// Reshape the tensor, returning a new tensor with the same data but
    /// a different shape.
    ///
    /// The total number of elements must remain the same.
    pub fn reshape(&self, new_shape: Shape) -> Result<Tensor> {
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: new_shape,
        })
    }

    /// Returns the underlying storage reference.
    pub fn storage(&self) -> &CpuStorage {
        &self.storage
    }

    /// Returns a mutable reference to the underlying storage, for kernels
    /// (e.g. `rearrange`) that write into an existing tensor in place.
    pub fn storage_mut(&mut self) -> &mut CpuStorage {
        &mut self.storage
    }
}

/// An immutable descriptor over a borrowed, dtype-homogeneous slice: shape,
/// strides, and an element offset into that slice. Kernels receive raw
/// typed pointers plus shape scalars drawn from a view; they never consult
/// the descriptor itself. Grounded on the slice/view/contiguous trio of the
/// original transformer's tensor handle.
#[derive(Debug, Clone)]
pub struct TensorView<'a, T> {
    data: &'a [T],
    shape: Shape,
    strides: Vec<usize>,
    offset: usize,
}

impl<'a, T: Copy> TensorView<'a, T> {
    /// Construct a contiguous, row-major view over `data` with `shape`.
    pub fn new(data: &'a [T], shape: Shape) -> Self {
        let strides = shape.strides();
        TensorView {
            data,
            shape,
            strides,
            offset: 0,
        }
    }

    /// Construct a view with explicit strides and offset (e.g. a
    /// non-contiguous slice of a larger buffer).
    ///
    /// # Errors
    /// Returns [`TensorError::ShapeMismatch`] if `strides.len() != shape.ndim()`.
    pub fn from_parts(
        data: &'a [T],
        shape: Shape,
        strides: Vec<usize>,
        offset: usize,
    ) -> Result<Self> {
        if strides.len() != shape.ndim() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![shape.ndim()],
                got: vec![strides.len()],
            });
        }
        Ok(TensorView {
            data,
            shape,
            strides,
            offset,
        })
    }

    /// Returns the view's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the view's strides.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Returns the element offset of this view into its backing slice.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns true if this view's strides are row-major contiguous.
    pub fn is_contiguous(&self) -> bool {
        self.shape.is_contiguous(&self.strides)
    }

    /// Borrows the view's data as a flat slice, valid only when
    /// [`Self::is_contiguous`].
    ///
    /// # Errors
    /// Returns [`TensorError::InvalidArgument`] if the view is not contiguous.
    pub fn as_slice(&self) -> Result<&'a [T]> {
        if !self.is_contiguous() {
            return Err(TensorError::InvalidArgument(
                "TensorView::as_slice requires a contiguous view".to_string(),
            ));
        }
        let n = self.shape.numel();
        Ok(&self.data[self.offset..self.offset + n])
    }

    /// Slices rows `[start, end)` along axis 0, sharing the backing data.
    ///
    /// # Errors
    /// Returns [`TensorError::InvalidArgument`] if the range is out of bounds.
    pub fn slice(&self, start: usize, end: usize) -> Result<TensorView<'a, T>> {
        if self.shape.ndim() == 0 || start > end || end > self.shape.dim(0) {
            return Err(TensorError::InvalidArgument(format!(
                "slice range [{start}, {end}) out of bounds for dim0={}",
                self.shape.dims().first().copied().unwrap_or(0)
            )));
        }
        let row_stride = self.strides[0];
        let mut dims = self.shape.dims().to_vec();
        dims[0] = end - start;
        Ok(TensorView {
            data: self.data,
            shape: Shape::new(dims),
            strides: self.strides.clone(),
            offset: self.offset + start * row_stride,
        })
    }

    /// Reshapes the view, valid only when it is already contiguous.
    ///
    /// # Errors
    /// Returns an error if the view is not contiguous, or if `new_shape`'s
    /// element count does not match.
    pub fn reshape(&self, new_shape: Shape) -> Result<TensorView<'a, T>> {
        if !self.is_contiguous() {
            return Err(TensorError::InvalidArgument(
                "TensorView::reshape requires a contiguous view".to_string(),
            ));
        }
        if new_shape.numel() != self.shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        let strides = new_shape.strides();
        Ok(TensorView {
            data: self.data,
            shape: new_shape,
            strides,
            offset: self.offset,
        })
    }
}

impl<'a, T: Copy + Default> TensorView<'a, T> {
    /// Materializes a contiguous, owned copy honoring this view's strides
    /// (a no-op layout-wise if the view is already contiguous).
    pub fn contiguous_copy(&self) -> Vec<T> {
        let dims = self.shape.dims();
        let n = self.shape.numel();
        let mut out = vec![T::default(); n];
        if dims.is_empty() {
            if n == 1 {
                out[0] = self.data[self.offset];
            }
            return out;
        }
        let mut idx = vec![0usize; dims.len()];
        for slot in out.iter_mut() {
            let mut off = self.offset;
            for d in 0..dims.len() {
                off += idx[d] * self.strides[d];
            }
            *slot = self.data[off];
            for d in (0..dims.len()).rev() {
                idx[d] += 1;
                if idx[d] < dims[d] {
                    break;
                }
                idx[d] = 0;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tensor() {
        let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Shape::new(vec![2, 3]));
        assert_eq!(t.shape().ndim(), 2);
        assert_eq!(t.shape().dim(0), 2);
        assert_eq!(t.shape().dim(1), 3);
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.data_f32(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_zeros_ones() {
        let z = Tensor::zeros(Shape::new(vec![2, 3]));
        assert_eq!(z.data_f32(), &[0.0; 6]);

        let o = Tensor::ones(Shape::new(vec![3]));
        assert_eq!(o.data_f32(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_reshape() {
        let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Shape::new(vec![2, 3]));
        let r = t.reshape(Shape::new(vec![3, 2])).unwrap();
        assert_eq!(r.shape().dims(), &[3, 2]);
        assert_eq!(r.data_f32(), t.data_f32());
    }

    #[test]
    fn test_reshape_mismatch() {
        let t = Tensor::new(vec![1.0, 2.0, 3.0], Shape::new(vec![3]));
        assert!(t.reshape(Shape::new(vec![2, 2])).is_err());
    }

    #[test]
    #[should_panic]
    fn test_new_shape_mismatch_panics() {
        let _t = Tensor::new(vec![1.0, 2.0], Shape::new(vec![3]));
    }

    #[test]
    fn test_from_storage_dtype() {
        let s = CpuStorage::from_f32_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let t = Tensor::from_storage(s, Shape::new(vec![2, 2])).unwrap();
        assert_eq!(t.dtype(), DType::F32);
    }

    #[test]
    fn test_from_storage_mismatch() {
        let s = CpuStorage::from_f32_vec(vec![1.0, 2.0, 3.0]);
        assert!(Tensor::from_storage(s, Shape::new(vec![2, 2])).is_err());
    }

    #[test]
    fn test_zeros_dtype() {
        let t = Tensor::zeros_dtype(Shape::new(vec![2, 2]), DType::F16).unwrap();
        assert_eq!(t.dtype(), DType::F16);
    }

    #[test]
    fn test_view_contiguous_slice() {
        let data = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let view = TensorView::new(&data, Shape::new(vec![3, 2]));
        let row = view.slice(1, 2).unwrap();
        assert_eq!(row.as_slice().unwrap(), &[3.0, 4.0]);
    }

    #[test]
    fn test_view_slice_out_of_bounds() {
        let data = vec![1.0f32, 2.0];
        let view = TensorView::new(&data, Shape::new(vec![2, 1]));
        assert!(view.slice(0, 3).is_err());
    }

    #[test]
    fn test_view_reshape() {
        let data = vec![1.0f32, 2.0, 3.0, 4.0];
        let view = TensorView::new(&data, Shape::new(vec![2, 2]));
        let flat = view.reshape(Shape::new(vec![4])).unwrap();
        assert_eq!(flat.as_slice().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_view_contiguous_copy_of_strided_view() {
        // Take a column (stride 2) out of a 2x2 row-major buffer.
        let data = vec![1.0f32, 2.0, 3.0, 4.0];
        let view =
            TensorView::from_parts(&data, Shape::new(vec![2]), vec![2], 1).unwrap();
        assert!(!view.is_contiguous());
        assert_eq!(view.contiguous_copy(), vec![2.0, 4.0]);
    }
}
