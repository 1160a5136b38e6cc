use std::fmt::Debug;

use crate::error::Result;
use crate::storage::CpuStorage;

/// Trait for pluggable compute backends (CPU, Metal, CUDA, etc.).
///
/// Every method takes and returns dtype-tagged [`CpuStorage`]; the
/// dispatch on the underlying element type (`f32`/`f16`/`bf16`) happens
/// once, inside the implementation, rather than at each call site.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu", "metal").
    fn name(&self) -> &str;

    /// Gathers `ids.len()` rows of `dim` elements each from a `[vocab, dim]`
    /// embedding table.
    fn embedding_gather(
        &self,
        weight: &CpuStorage,
        ids: &[i64],
        vocab: usize,
        dim: usize,
    ) -> Result<CpuStorage>;

    /// RMS normalization over `rows` rows of `cols` elements each.
    fn rms_norm(
        &self,
        x: &CpuStorage,
        weight: &CpuStorage,
        eps: f32,
        rows: usize,
        cols: usize,
    ) -> Result<CpuStorage>;

    /// Linear projection: `out = in @ weight^T + bias?`.
    ///
    /// `weight` is `[out_dim, in_dim]`; `bias`, if present, is `[out_dim]`.
    #[allow(clippy::too_many_arguments)]
    fn linear(
        &self,
        input: &CpuStorage,
        weight: &CpuStorage,
        bias: Option<&CpuStorage>,
        rows: usize,
        in_dim: usize,
        out_dim: usize,
    ) -> Result<CpuStorage>;

    /// Rotary position embedding over `[seq, heads, dim]` data.
    fn rope(
        &self,
        input: &CpuStorage,
        pos: &[usize],
        seq: usize,
        heads: usize,
        dim: usize,
        theta: f32,
    ) -> Result<CpuStorage>;

    /// Grouped-query causal self-attention.
    ///
    /// `q` is `[qlen, nh, dh]`; `k`/`v` are `[kvlen, nkvh, dh]`.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<CpuStorage>;

    /// `out[i] = up[i] * silu(gate[i])`.
    fn swiglu(&self, gate: &CpuStorage, up: &CpuStorage) -> Result<CpuStorage>;

    /// Element-wise addition: `out[i] = a[i] + b[i]`.
    fn add(&self, a: &CpuStorage, b: &CpuStorage) -> Result<CpuStorage>;

    /// Index and widened-to-f32 value of the maximum element, lowest index
    /// wins ties.
    fn argmax(&self, input: &CpuStorage) -> Result<(usize, f32)>;

    /// Strided copy of `rows` rows of `cols` elements from `src` into `dst`
    /// at row offset `dst_row_offset`, mutating `dst` in place.
    #[allow(clippy::too_many_arguments)]
    fn rearrange(
        &self,
        dst: &mut CpuStorage,
        dst_row_offset: usize,
        dst_row_stride: usize,
        src: &CpuStorage,
        src_row_stride: usize,
        rows: usize,
        cols: usize,
    ) -> Result<()>;
}
