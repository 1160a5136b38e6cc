pub mod kernels;

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};
use crate::storage::CpuStorage;

/// Pure-Rust CPU compute backend.
///
/// Implements all kernels with straightforward loops optimized for
/// correctness rather than peak performance. Intended as a reference
/// implementation and fallback for the `metal` backend.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn dtype_mismatch(expected: &CpuStorage, got: &CpuStorage) -> TensorError {
    TensorError::DTypeMismatch {
        expected: expected.dtype().to_string(),
        got: got.dtype().to_string(),
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn embedding_gather(
        &self,
        weight: &CpuStorage,
        ids: &[i64],
        vocab: usize,
        dim: usize,
    ) -> Result<CpuStorage> {
        match weight {
            CpuStorage::F32(w) => {
                let mut out = vec![0.0f32; ids.len() * dim];
                kernels::embedding_gather(&mut out, w, ids, vocab, dim)?;
                Ok(CpuStorage::F32(out))
            }
            CpuStorage::F16(w) => {
                let mut out = vec![Default::default(); ids.len() * dim];
                kernels::embedding_gather(&mut out, w, ids, vocab, dim)?;
                Ok(CpuStorage::F16(out))
            }
            CpuStorage::Bf16(w) => {
                let mut out = vec![Default::default(); ids.len() * dim];
                kernels::embedding_gather(&mut out, w, ids, vocab, dim)?;
                Ok(CpuStorage::Bf16(out))
            }
        }
    }

    fn rms_norm(
        &self,
        x: &CpuStorage,
        weight: &CpuStorage,
        eps: f32,
        rows: usize,
        cols: usize,
    ) -> Result<CpuStorage> {
        match (x, weight) {
            (CpuStorage::F32(x), CpuStorage::F32(w)) => {
                let mut out = vec![0.0f32; rows * cols];
                kernels::rms_norm(&mut out, x, w, rows, cols, eps)?;
                Ok(CpuStorage::F32(out))
            }
            (CpuStorage::F16(x), CpuStorage::F16(w)) => {
                let mut out = vec![Default::default(); rows * cols];
                kernels::rms_norm(&mut out, x, w, rows, cols, eps)?;
                Ok(CpuStorage::F16(out))
            }
            (CpuStorage::Bf16(x), CpuStorage::Bf16(w)) => {
                let mut out = vec![Default::default(); rows * cols];
                kernels::rms_norm(&mut out, x, w, rows, cols, eps)?;
                Ok(CpuStorage::Bf16(out))
            }
            (x, w) => Err(dtype_mismatch(x, w)),
        }
    }

    fn linear(
        &self,
        input: &CpuStorage,
        weight: &CpuStorage,
        bias: Option<&CpuStorage>,
        rows: usize,
        in_dim: usize,
        out_dim: usize,
    ) -> Result<CpuStorage> {
        match (input, weight) {
            (CpuStorage::F32(i), CpuStorage::F32(w)) => {
                let b = bias.map(|b| b.as_f32_slice()).transpose()?;
                let mut out = vec![0.0f32; rows * out_dim];
                kernels::linear(&mut out, i, w, b, rows, in_dim, out_dim)?;
                Ok(CpuStorage::F32(out))
            }
            (CpuStorage::F16(i), CpuStorage::F16(w)) => {
                let b = bias.map(|b| b.as_f16_slice()).transpose()?;
                let mut out = vec![Default::default(); rows * out_dim];
                kernels::linear(&mut out, i, w, b, rows, in_dim, out_dim)?;
                Ok(CpuStorage::F16(out))
            }
            (CpuStorage::Bf16(i), CpuStorage::Bf16(w)) => {
                let b = bias.map(|b| b.as_bf16_slice()).transpose()?;
                let mut out = vec![Default::default(); rows * out_dim];
                kernels::linear(&mut out, i, w, b, rows, in_dim, out_dim)?;
                Ok(CpuStorage::Bf16(out))
            }
            (i, w) => Err(dtype_mismatch(i, w)),
        }
    }

    fn rope(
        &self,
        input: &CpuStorage,
        pos: &[usize],
        seq: usize,
        heads: usize,
        dim: usize,
        theta: f32,
    ) -> Result<CpuStorage> {
        match input {
            CpuStorage::F32(x) => {
                let mut out = vec![0.0f32; x.len()];
                kernels::rope(&mut out, x, pos, seq, heads, dim, theta)?;
                Ok(CpuStorage::F32(out))
            }
            CpuStorage::F16(x) => {
                let mut out = vec![Default::default(); x.len()];
                kernels::rope(&mut out, x, pos, seq, heads, dim, theta)?;
                Ok(CpuStorage::F16(out))
            }
            CpuStorage::Bf16(x) => {
                let mut out = vec![Default::default(); x.len()];
                kernels::rope(&mut out, x, pos, seq, heads, dim, theta)?;
                Ok(CpuStorage::Bf16(out))
            }
        }
    }

    fn self_attention(
        &self,
        q: &CpuStorage,
        k: &CpuStorage,
        v: &CpuStorage,
        qlen: usize,
        kvlen: usize,
        nh: usize,
        nkvh: usize,
        dh: usize,
        scale: f32,
    ) -> Result<CpuStorage> {
        match (q, k, v) {
            (CpuStorage::F32(q), CpuStorage::F32(k), CpuStorage::F32(v)) => {
                let mut out = vec![0.0f32; q.len()];
                kernels::self_attention(&mut out, q, k, v, qlen, kvlen, nh, nkvh, dh, scale)?;
                Ok(CpuStorage::F32(out))
            }
            (CpuStorage::F16(q), CpuStorage::F16(k), CpuStorage::F16(v)) => {
                let mut out = vec![Default::default(); q.len()];
                kernels::self_attention(&mut out, q, k, v, qlen, kvlen, nh, nkvh, dh, scale)?;
                Ok(CpuStorage::F16(out))
            }
            (CpuStorage::Bf16(q), CpuStorage::Bf16(k), CpuStorage::Bf16(v)) => {
                let mut out = vec![Default::default(); q.len()];
                kernels::self_attention(&mut out, q, k, v, qlen, kvlen, nh, nkvh, dh, scale)?;
                Ok(CpuStorage::Bf16(out))
            }
            (q, _, _) => Err(TensorError::DTypeMismatch {
                expected: q.dtype().to_string(),
                got: "mismatched q/k/v dtypes".to_string(),
            }),
        }
    }

    fn swiglu(&self, gate: &CpuStorage, up: &CpuStorage) -> Result<CpuStorage> {
        match (gate, up) {
            (CpuStorage::F32(g), CpuStorage::F32(u)) => {
                let mut out = vec![0.0f32; g.len()];
                kernels::swiglu(&mut out, g, u)?;
                Ok(CpuStorage::F32(out))
            }
            (CpuStorage::F16(g), CpuStorage::F16(u)) => {
                let mut out = vec![Default::default(); g.len()];
                kernels::swiglu(&mut out, g, u)?;
                Ok(CpuStorage::F16(out))
            }
            (CpuStorage::Bf16(g), CpuStorage::Bf16(u)) => {
                let mut out = vec![Default::default(); g.len()];
                kernels::swiglu(&mut out, g, u)?;
                Ok(CpuStorage::Bf16(out))
            }
            (g, u) => Err(dtype_mismatch(g, u)),
        }
    }

    fn add(&self, a: &CpuStorage, b: &CpuStorage) -> Result<CpuStorage> {
        match (a, b) {
            (CpuStorage::F32(a), CpuStorage::F32(b)) => {
                let mut out = vec![0.0f32; a.len()];
                kernels::add(&mut out, a, b)?;
                Ok(CpuStorage::F32(out))
            }
            (CpuStorage::F16(a), CpuStorage::F16(b)) => {
                let mut out = vec![Default::default(); a.len()];
                kernels::add(&mut out, a, b)?;
                Ok(CpuStorage::F16(out))
            }
            (CpuStorage::Bf16(a), CpuStorage::Bf16(b)) => {
                let mut out = vec![Default::default(); a.len()];
                kernels::add(&mut out, a, b)?;
                Ok(CpuStorage::Bf16(out))
            }
            (a, b) => Err(dtype_mismatch(a, b)),
        }
    }

    fn argmax(&self, input: &CpuStorage) -> Result<(usize, f32)> {
        match input {
            CpuStorage::F32(x) => kernels::argmax(x),
            CpuStorage::F16(x) => kernels::argmax(x),
            CpuStorage::Bf16(x) => kernels::argmax(x),
        }
    }

    fn rearrange(
        &self,
        dst: &mut CpuStorage,
        dst_row_offset: usize,
        dst_row_stride: usize,
        src: &CpuStorage,
        src_row_stride: usize,
        rows: usize,
        cols: usize,
    ) -> Result<()> {
        match (dst, src) {
            (CpuStorage::F32(d), CpuStorage::F32(s)) => kernels::rearrange(
                d,
                dst_row_offset,
                dst_row_stride,
                s,
                src_row_stride,
                rows,
                cols,
            ),
            (CpuStorage::F16(d), CpuStorage::F16(s)) => kernels::rearrange(
                d,
                dst_row_offset,
                dst_row_stride,
                s,
                src_row_stride,
                rows,
                cols,
            ),
            (CpuStorage::Bf16(d), CpuStorage::Bf16(s)) => kernels::rearrange(
                d,
                dst_row_offset,
                dst_row_stride,
                s,
                src_row_stride,
                rows,
                cols,
            ),
            (d, s) => Err(dtype_mismatch(d, s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> CpuBackend {
        CpuBackend::new()
    }

    #[test]
    fn test_embedding_gather_f32() {
        let b = backend();
        let weight = CpuStorage::from_f32_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let out = b.embedding_gather(&weight, &[1, 0], 2, 2).unwrap();
        assert_eq!(out.as_f32_slice().unwrap(), &[3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn test_rms_norm_f32() {
        let b = backend();
        let x = CpuStorage::from_f32_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let w = CpuStorage::from_f32_vec(vec![1.0, 1.0, 1.0, 1.0]);
        let out = b.rms_norm(&x, &w, 1e-5, 1, 4).unwrap();
        let rms = (7.5f32 + 1e-5).sqrt();
        assert!((out.as_f32_slice().unwrap()[0] - 1.0 / rms).abs() < 1e-5);
    }

    #[test]
    fn test_rms_norm_dtype_mismatch() {
        let b = backend();
        let x = CpuStorage::from_f32_vec(vec![1.0]);
        let w = CpuStorage::zeros(crate::dtype::DType::F16, 1).unwrap();
        assert!(b.rms_norm(&x, &w, 1e-5, 1, 1).is_err());
    }

    #[test]
    fn test_linear_f32() {
        let b = backend();
        let input = CpuStorage::from_f32_vec(vec![1.0, 2.0]);
        let weight = CpuStorage::from_f32_vec(vec![1.0, 0.0, 0.0, 1.0]);
        let bias = CpuStorage::from_f32_vec(vec![10.0, 20.0]);
        let out = b.linear(&input, &weight, Some(&bias), 1, 2, 2).unwrap();
        assert_eq!(out.as_f32_slice().unwrap(), &[11.0, 22.0]);
    }

    #[test]
    fn test_rope_f32() {
        let b = backend();
        let input = CpuStorage::from_f32_vec(vec![1.0, 0.0, 0.0, 1.0]);
        let out = b.rope(&input, &[0], 1, 1, 4, 10000.0).unwrap();
        assert!((out.as_f32_slice().unwrap()[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_self_attention_f32() {
        let b = backend();
        let q = CpuStorage::from_f32_vec(vec![1.0, 1.0]);
        let k = CpuStorage::from_f32_vec(vec![1.0, 1.0]);
        let v = CpuStorage::from_f32_vec(vec![10.0, 20.0]);
        let out = b.self_attention(&q, &k, &v, 2, 2, 1, 1, 1, 1.0).unwrap();
        assert!((out.as_f32_slice().unwrap()[0] - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_swiglu_f32() {
        let b = backend();
        let gate = CpuStorage::from_f32_vec(vec![0.0]);
        let up = CpuStorage::from_f32_vec(vec![3.0]);
        let out = b.swiglu(&gate, &up).unwrap();
        assert!((out.as_f32_slice().unwrap()[0] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_add_f32() {
        let b = backend();
        let a = CpuStorage::from_f32_vec(vec![1.0, 2.0]);
        let c = CpuStorage::from_f32_vec(vec![3.0, 4.0]);
        let out = b.add(&a, &c).unwrap();
        assert_eq!(out.as_f32_slice().unwrap(), &[4.0, 6.0]);
    }

    #[test]
    fn test_argmax_f32() {
        let b = backend();
        let x = CpuStorage::from_f32_vec(vec![1.0, 3.0, 3.0, 2.0]);
        let (idx, val) = b.argmax(&x).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(val, 3.0);
    }

    #[test]
    fn test_rearrange_f32() {
        let b = backend();
        let mut dst = CpuStorage::from_f32_vec(vec![0.0; 8]);
        let src = CpuStorage::from_f32_vec(vec![1.0, 2.0, 3.0, 4.0]);
        b.rearrange(&mut dst, 1, 2, &src, 2, 2, 2).unwrap();
        assert_eq!(
            dst.as_f32_slice().unwrap(),
            &[0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 0.0, 0.0]
        );
    }
}
