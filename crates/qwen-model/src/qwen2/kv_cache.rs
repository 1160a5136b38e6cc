use qwen_tensor::{CpuStorage, DType, TensorError};

use crate::error::{ModelError, Result};

/// Key-Value cache for transformer attention layers.
///
/// Stores previously computed key and value projections so they do not
/// need to be recomputed for each new token during autoregressive
/// generation. Per-layer storage is dtype-polymorphic (f32/f16/bf16,
/// matching the model's compute dtype) and laid out `[max_seq_len,
/// n_kv_heads, head_dim]`, row-major, with an append cursor (`past_len`)
/// tracking how many rows are valid.
pub struct KvCache {
    /// Key cache for each layer; `None` after `disable()`.
    k: Vec<Option<CpuStorage>>,
    /// Value cache for each layer; `None` after `disable()`.
    v: Vec<Option<CpuStorage>>,
    /// Number of key/value attention heads.
    n_kv_heads: usize,
    /// Dimension of each attention head.
    head_dim: usize,
    /// Maximum sequence length the cache can hold.
    max_seq_len: usize,
    /// Compute dtype of the cache's storage.
    dtype: DType,
    /// Number of valid rows currently written, per layer (all layers
    /// advance together in lockstep, but the field is kept per-layer to
    /// mirror the teacher's per-layer storage split).
    past_len: usize,
}

impl KvCache {
    /// Create a new, enabled KV cache with all storage zero-initialized.
    pub fn new(
        n_layers: usize,
        n_kv_heads: usize,
        head_dim: usize,
        max_seq_len: usize,
        dtype: DType,
    ) -> Result<Self> {
        let cache_size = max_seq_len * n_kv_heads * head_dim;
        let mut k = Vec::with_capacity(n_layers);
        let mut v = Vec::with_capacity(n_layers);
        for _ in 0..n_layers {
            k.push(Some(CpuStorage::zeros(dtype, cache_size)?));
            v.push(Some(CpuStorage::zeros(dtype, cache_size)?));
        }
        Ok(KvCache {
            k,
            v,
            n_kv_heads,
            head_dim,
            max_seq_len,
            dtype,
            past_len: 0,
        })
    }

    /// Number of valid rows currently appended.
    pub fn past_len(&self) -> usize {
        self.past_len
    }

    /// Maximum number of rows this cache can hold per layer.
    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    /// Returns true if the cache currently holds allocated storage.
    pub fn is_enabled(&self) -> bool {
        !self.k.is_empty() && self.k[0].is_some()
    }

    /// Row width of one cached position: `n_kv_heads * head_dim`.
    pub fn row_width(&self) -> usize {
        self.n_kv_heads * self.head_dim
    }

    /// Writes `cur_len` freshly computed K/V rows for `layer` into the
    /// slice `[past_len, past_len + cur_len)`, via the backend's
    /// `rearrange` kernel. Does not itself advance `past_len` -- call
    /// [`Self::advance`] once per forward pass, after all layers have
    /// been written, since every layer shares one cursor.
    ///
    /// # Errors
    /// Returns [`ModelError::CacheDisabled`] if the cache has been
    /// disabled, or a shape error if `cur_len` would overflow
    /// `max_seq_len`.
    pub fn write_slice(
        &mut self,
        backend: &dyn qwen_tensor::ComputeBackend,
        layer: usize,
        k_rows: &CpuStorage,
        v_rows: &CpuStorage,
        cur_len: usize,
    ) -> Result<()> {
        if self.past_len + cur_len > self.max_seq_len {
            return Err(ModelError::TensorError(TensorError::InvalidArgument(
                format!(
                    "kv cache overflow: past_len={} + cur_len={} exceeds max_seq_len={}",
                    self.past_len, cur_len, self.max_seq_len
                ),
            )));
        }
        let row_width = self.row_width();
        let k_slot = self.k[layer].as_mut().ok_or(ModelError::CacheDisabled)?;
        backend.rearrange(k_slot, self.past_len, row_width, k_rows, row_width, cur_len, row_width)?;
        let v_slot = self.v[layer].as_mut().ok_or(ModelError::CacheDisabled)?;
        backend.rearrange(v_slot, self.past_len, row_width, v_rows, row_width, cur_len, row_width)?;
        Ok(())
    }

    /// Advances the shared append cursor by `cur_len` rows. Called once per
    /// forward pass after every layer has written its slice.
    pub fn advance(&mut self, cur_len: usize) {
        self.past_len += cur_len;
    }

    /// Borrows the key cache storage for `layer`, covering rows
    /// `[0, past_len + cur_len)`.
    ///
    /// # Errors
    /// Returns [`ModelError::CacheDisabled`] if the cache has been
    /// disabled.
    pub fn k_prefix(&self, layer: usize, len: usize) -> Result<CpuStorage> {
        self.prefix(&self.k[layer], len)
    }

    /// Borrows the value cache storage for `layer`, covering rows
    /// `[0, past_len + cur_len)`.
    pub fn v_prefix(&self, layer: usize, len: usize) -> Result<CpuStorage> {
        self.prefix(&self.v[layer], len)
    }

    fn prefix(&self, storage: &Option<CpuStorage>, len: usize) -> Result<CpuStorage> {
        let storage = storage.as_ref().ok_or(ModelError::CacheDisabled)?;
        let row_width = self.row_width();
        let n = len * row_width;
        match storage {
            CpuStorage::F32(s) => Ok(CpuStorage::from_f32_vec(s[..n].to_vec())),
            CpuStorage::F16(s) => Ok(CpuStorage::from_f16_vec(s[..n].to_vec())),
            CpuStorage::Bf16(s) => Ok(CpuStorage::from_bf16_vec(s[..n].to_vec())),
        }
    }

    /// Rewinds the append cursor to zero without freeing storage; the
    /// region `[0, max_seq_len)` is left with whatever stale values it
    /// held (unspecified, not guaranteed to be zero).
    pub fn reset(&mut self) {
        self.past_len = 0;
    }

    /// Re-enables the cache, reallocating zeroed storage for every layer
    /// if it had been disabled. A no-op if already enabled.
    pub fn enable(&mut self) -> Result<()> {
        if self.is_enabled() {
            return Ok(());
        }
        let cache_size = self.max_seq_len * self.row_width();
        for slot in self.k.iter_mut() {
            *slot = Some(CpuStorage::zeros(self.dtype, cache_size)?);
        }
        for slot in self.v.iter_mut() {
            *slot = Some(CpuStorage::zeros(self.dtype, cache_size)?);
        }
        self.past_len = 0;
        Ok(())
    }

    /// Disables the cache, freeing all backing storage and forcing the
    /// next forward pass to recompute from scratch.
    pub fn disable(&mut self) {
        for slot in self.k.iter_mut() {
            *slot = None;
        }
        for slot in self.v.iter_mut() {
            *slot = None;
        }
        self.past_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qwen_tensor::cpu::CpuBackend;

    fn backend() -> CpuBackend {
        CpuBackend::new()
    }

    #[test]
    fn test_write_and_read_prefix() {
        let mut cache = KvCache::new(1, 1, 2, 4, DType::F32).unwrap();
        let b = backend();
        let k = CpuStorage::from_f32_vec(vec![1.0, 2.0]);
        let v = CpuStorage::from_f32_vec(vec![3.0, 4.0]);
        cache.write_slice(&b, 0, &k, &v, 1).unwrap();
        cache.advance(1);
        assert_eq!(cache.past_len(), 1);
        let k_prefix = cache.k_prefix(0, 1).unwrap();
        assert_eq!(k_prefix.as_f32_slice().unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn test_reset_keeps_storage_but_zeros_cursor() {
        let mut cache = KvCache::new(1, 1, 2, 4, DType::F32).unwrap();
        let b = backend();
        let k = CpuStorage::from_f32_vec(vec![1.0, 2.0]);
        let v = CpuStorage::from_f32_vec(vec![3.0, 4.0]);
        cache.write_slice(&b, 0, &k, &v, 1).unwrap();
        cache.advance(1);
        cache.reset();
        assert_eq!(cache.past_len(), 0);
        assert!(cache.is_enabled());
    }

    #[test]
    fn test_disable_frees_storage() {
        let mut cache = KvCache::new(1, 1, 2, 4, DType::F32).unwrap();
        cache.disable();
        assert!(!cache.is_enabled());
        assert!(cache.k_prefix(0, 0).is_err());
    }

    #[test]
    fn test_enable_after_disable_reallocates_zeroed() {
        let mut cache = KvCache::new(1, 1, 2, 4, DType::F32).unwrap();
        let b = backend();
        let k = CpuStorage::from_f32_vec(vec![1.0, 2.0]);
        let v = CpuStorage::from_f32_vec(vec![3.0, 4.0]);
        cache.write_slice(&b, 0, &k, &v, 1).unwrap();
        cache.advance(1);
        cache.disable();
        cache.enable().unwrap();
        assert_eq!(cache.past_len(), 0);
        let k_prefix = cache.k_prefix(0, 1).unwrap();
        assert_eq!(k_prefix.as_f32_slice().unwrap(), &[0.0, 0.0]);
    }

    #[test]
    fn test_overflow_rejected() {
        let mut cache = KvCache::new(1, 1, 2, 2, DType::F32).unwrap();
        let b = backend();
        let k = CpuStorage::from_f32_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let v = CpuStorage::from_f32_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(cache.write_slice(&b, 0, &k, &v, 3).is_err());
    }
}
