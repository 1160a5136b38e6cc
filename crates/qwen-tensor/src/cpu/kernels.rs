//! Generic, `Element`-monomorphized kernel implementations.
//!
//! Every function here is written once against `T: Element` and is
//! instantiated for `f32`, `half::f16` and `half::bf16` at the call sites in
//! [`super::CpuBackend`]. Internal accumulation always happens in `f32`;
//! only the final store narrows back to `T`.

use crate::element::Element;
use crate::error::{Result, TensorError};

/// `out[i, :] = weight[ids[i], :]` for each of the `n_rows` ids.
///
/// `weight` is `[vocab, dim]` row-major; `ids` holds `n_rows` token ids.
pub fn embedding_gather<T: Element>(
    out: &mut [T],
    weight: &[T],
    ids: &[i64],
    vocab: usize,
    dim: usize,
) -> Result<()> {
    if weight.len() != vocab * dim {
        return Err(TensorError::InvalidArgument(format!(
            "embedding_gather: weight.len()={} but vocab*dim={}",
            weight.len(),
            vocab * dim
        )));
    }
    if out.len() != ids.len() * dim {
        return Err(TensorError::InvalidArgument(format!(
            "embedding_gather: out.len()={} but ids.len()*dim={}",
            out.len(),
            ids.len() * dim
        )));
    }
    for (row, &id) in ids.iter().enumerate() {
        if id < 0 || id as usize >= vocab {
            return Err(TensorError::InvalidIndex {
                index: id,
                bound: vocab,
            });
        }
        let src = &weight[id as usize * dim..id as usize * dim + dim];
        let dst = &mut out[row * dim..row * dim + dim];
        dst.copy_from_slice(src);
    }
    Ok(())
}

/// `out[r, j] = in[r, j] * weight[j] / sqrt(mean(in[r,:]^2) + eps)` for each
/// of `rows` rows of `cols` elements.
pub fn rms_norm<T: Element>(
    out: &mut [T],
    input: &[T],
    weight: &[T],
    rows: usize,
    cols: usize,
    eps: f32,
) -> Result<()> {
    if input.len() != rows * cols || out.len() != rows * cols {
        return Err(TensorError::InvalidArgument(
            "rms_norm: input/out length does not match rows*cols".to_string(),
        ));
    }
    if weight.len() != cols {
        return Err(TensorError::InvalidArgument(format!(
            "rms_norm: weight.len()={} but cols={}",
            weight.len(),
            cols
        )));
    }
    for r in 0..rows {
        let row = &input[r * cols..r * cols + cols];
        let mean_sq: f32 = row.iter().map(|&x| {
            let v = x.to_f32();
            v * v
        }).sum::<f32>() / cols as f32;
        let inv_rms = 1.0 / (mean_sq + eps).sqrt();
        for j in 0..cols {
            let v = row[j].to_f32() * weight[j].to_f32() * inv_rms;
            out[r * cols + j] = T::from_f32(v);
        }
    }
    Ok(())
}

/// `out[i, o] = bias?[o] + sum_j in[i, j] * weight[o, j]`.
///
/// `weight` is `[out_dim, in_dim]` row-major (the GGUF/PyTorch convention
/// for a linear layer's weight), `bias` is `[out_dim]` if present.
pub fn linear<T: Element>(
    out: &mut [T],
    input: &[T],
    weight: &[T],
    bias: Option<&[T]>,
    rows: usize,
    in_dim: usize,
    out_dim: usize,
) -> Result<()> {
    if input.len() != rows * in_dim {
        return Err(TensorError::InvalidArgument(format!(
            "linear: input.len()={} but rows*in_dim={}",
            input.len(),
            rows * in_dim
        )));
    }
    if weight.len() != out_dim * in_dim {
        return Err(TensorError::InvalidArgument(format!(
            "linear: weight.len()={} but out_dim*in_dim={}",
            weight.len(),
            out_dim * in_dim
        )));
    }
    if out.len() != rows * out_dim {
        return Err(TensorError::InvalidArgument(format!(
            "linear: out.len()={} but rows*out_dim={}",
            out.len(),
            rows * out_dim
        )));
    }
    if let Some(b) = bias {
        if b.len() != out_dim {
            return Err(TensorError::InvalidArgument(format!(
                "linear: bias.len()={} but out_dim={}",
                b.len(),
                out_dim
            )));
        }
    }

    for i in 0..rows {
        let in_row = &input[i * in_dim..i * in_dim + in_dim];
        for o in 0..out_dim {
            let w_row = &weight[o * in_dim..o * in_dim + in_dim];
            let mut acc = bias.map(|b| b[o].to_f32()).unwrap_or(0.0);
            for j in 0..in_dim {
                acc += in_row[j].to_f32() * w_row[j].to_f32();
            }
            out[i * out_dim + o] = T::from_f32(acc);
        }
    }
    Ok(())
}

/// Rotary position embedding, applied in place to `[seq, heads, dim]` data.
///
/// Each row `s` is rotated using the angle derived from `pos[s]`; `dim` must
/// be even. Pairs `(x[j], x[j + dim/2])` are rotated by
/// `phi = pos / theta^(2j/dim)`.
pub fn rope<T: Element>(
    out: &mut [T],
    input: &[T],
    pos: &[usize],
    seq: usize,
    heads: usize,
    dim: usize,
    theta: f32,
) -> Result<()> {
    if dim % 2 != 0 {
        return Err(TensorError::InvalidArgument(
            "rope: head dim must be even".to_string(),
        ));
    }
    if pos.len() != seq {
        return Err(TensorError::InvalidArgument(format!(
            "rope: pos.len()={} but seq={}",
            pos.len(),
            seq
        )));
    }
    if input.len() != seq * heads * dim || out.len() != input.len() {
        return Err(TensorError::InvalidArgument(
            "rope: input/out length does not match seq*heads*dim".to_string(),
        ));
    }

    let half = dim / 2;
    for s in 0..seq {
        let p = pos[s] as f32;
        for h in 0..heads {
            let base = (s * heads + h) * dim;
            for j in 0..half {
                let exponent = 2.0 * j as f32 / dim as f32;
                let denom = theta.powf(exponent);
                let phi = p / denom;
                let (sin_phi, cos_phi) = phi.sin_cos();
                let a = input[base + j].to_f32();
                let b = input[base + half + j].to_f32();
                out[base + j] = T::from_f32(a * cos_phi - b * sin_phi);
                out[base + half + j] = T::from_f32(b * cos_phi + a * sin_phi);
            }
        }
    }
    Ok(())
}

/// Grouped-query causal self-attention.
///
/// - `q`: `[qlen, nh, dh]`
/// - `k`, `v`: `[kvlen, nkvh, dh]`
/// - `out`: `[qlen, nh, dh]`
///
/// Query head `h` reads from kv head `h / (nh / nkvh)`. Row `t` of the query
/// (0-indexed within this call) may attend to key positions
/// `[0, limit]` where `limit = clamp(t + (kvlen - qlen), 0, kvlen - 1)` --
/// this lets `qlen == kvlen` (full prefill) and `qlen < kvlen` (decode with
/// a cached prefix) share one formula.
#[allow(clippy::too_many_arguments)]
pub fn self_attention<T: Element>(
    out: &mut [T],
    q: &[T],
    k: &[T],
    v: &[T],
    qlen: usize,
    kvlen: usize,
    nh: usize,
    nkvh: usize,
    dh: usize,
    scale: f32,
) -> Result<()> {
    if nh == 0 || nkvh == 0 || nh % nkvh != 0 {
        return Err(TensorError::InvalidArgument(format!(
            "self_attention: nh={} must be a positive multiple of nkvh={}",
            nh, nkvh
        )));
    }
    if q.len() != qlen * nh * dh {
        return Err(TensorError::InvalidArgument(
            "self_attention: q length mismatch".to_string(),
        ));
    }
    if k.len() != kvlen * nkvh * dh || v.len() != kvlen * nkvh * dh {
        return Err(TensorError::InvalidArgument(
            "self_attention: k/v length mismatch".to_string(),
        ));
    }
    if out.len() != q.len() {
        return Err(TensorError::InvalidArgument(
            "self_attention: out length mismatch".to_string(),
        ));
    }

    let group = nh / nkvh;
    let offset = kvlen as isize - qlen as isize;
    let mut scores = vec![0.0f32; kvlen];

    for t in 0..qlen {
        let limit = ((t as isize + offset).clamp(0, kvlen as isize - 1)) as usize;
        for h in 0..nh {
            let kvh = h / group;
            let q_row = &q[(t * nh + h) * dh..(t * nh + h) * dh + dh];

            let mut max_score = f32::NEG_INFINITY;
            for (s, score) in scores.iter_mut().enumerate().take(limit + 1) {
                let k_row = &k[(s * nkvh + kvh) * dh..(s * nkvh + kvh) * dh + dh];
                let mut dot = 0.0f32;
                for d in 0..dh {
                    dot += q_row[d].to_f32() * k_row[d].to_f32();
                }
                *score = dot * scale;
                if *score > max_score {
                    max_score = *score;
                }
            }

            let mut denom = 0.0f32;
            for score in scores.iter_mut().take(limit + 1) {
                let e = (*score - max_score).exp();
                *score = e;
                denom += e;
            }

            let out_row = &mut out[(t * nh + h) * dh..(t * nh + h) * dh + dh];
            let mut acc = vec![0.0f32; dh];
            for (s, &weight) in scores.iter().enumerate().take(limit + 1) {
                let w = weight / denom;
                let v_row = &v[(s * nkvh + kvh) * dh..(s * nkvh + kvh) * dh + dh];
                for d in 0..dh {
                    acc[d] += w * v_row[d].to_f32();
                }
            }
            for d in 0..dh {
                out_row[d] = T::from_f32(acc[d]);
            }
        }
    }
    Ok(())
}

/// `out[i] = up[i] * silu(gate[i])`, `silu(x) = x * sigmoid(x)`.
pub fn swiglu<T: Element>(out: &mut [T], gate: &[T], up: &[T]) -> Result<()> {
    if gate.len() != up.len() || out.len() != gate.len() {
        return Err(TensorError::InvalidArgument(
            "swiglu: gate/up/out length mismatch".to_string(),
        ));
    }
    for i in 0..gate.len() {
        let g = gate[i].to_f32();
        let silu = g / (1.0 + (-g).exp());
        out[i] = T::from_f32(up[i].to_f32() * silu);
    }
    Ok(())
}

/// `out[i] = a[i] + b[i]`.
pub fn add<T: Element>(out: &mut [T], a: &[T], b: &[T]) -> Result<()> {
    if a.len() != b.len() || out.len() != a.len() {
        return Err(TensorError::InvalidArgument(
            "add: length mismatch".to_string(),
        ));
    }
    for i in 0..a.len() {
        out[i] = T::from_f32(a[i].to_f32() + b[i].to_f32());
    }
    Ok(())
}

/// Index and value of the maximum element, lowest index wins ties.
///
/// # Errors
/// Returns [`TensorError::InvalidArgument`] if `input` is empty.
pub fn argmax<T: Element>(input: &[T]) -> Result<(usize, f32)> {
    if input.is_empty() {
        return Err(TensorError::InvalidArgument(
            "argmax: input must not be empty".to_string(),
        ));
    }
    let mut best_idx = 0usize;
    let mut best_val = input[0].to_f32();
    for (i, x) in input.iter().enumerate().skip(1) {
        let v = x.to_f32();
        if v > best_val {
            best_val = v;
            best_idx = i;
        }
    }
    Ok((best_idx, best_val))
}

/// Strided copy: writes `rows` rows of `cols` elements from `src` (row
/// stride `src_row_stride`) into `dst` at row offset `dst_row_offset` (row
/// stride `dst_row_stride`).
///
/// Used to stamp freshly computed K/V rows into a KV cache's backing
/// storage at an arbitrary `past_len` offset.
pub fn rearrange<T: Element>(
    dst: &mut [T],
    dst_row_offset: usize,
    dst_row_stride: usize,
    src: &[T],
    src_row_stride: usize,
    rows: usize,
    cols: usize,
) -> Result<()> {
    if src_row_stride < cols || dst_row_stride < cols {
        return Err(TensorError::InvalidArgument(
            "rearrange: row stride smaller than row width".to_string(),
        ));
    }
    if src.len() < rows * src_row_stride {
        return Err(TensorError::InvalidArgument(
            "rearrange: src too short for rows*src_row_stride".to_string(),
        ));
    }
    if dst.len() < (dst_row_offset + rows) * dst_row_stride {
        return Err(TensorError::InvalidArgument(
            "rearrange: dst too short for destination window".to_string(),
        ));
    }
    for r in 0..rows {
        let src_row = &src[r * src_row_stride..r * src_row_stride + cols];
        let dst_start = (dst_row_offset + r) * dst_row_stride;
        let dst_row = &mut dst[dst_start..dst_start + cols];
        dst_row.copy_from_slice(src_row);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_gather() {
        let weight = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]; // vocab=3, dim=2
        let mut out = vec![0.0f32; 4];
        embedding_gather(&mut out, &weight, &[2, 0], 3, 2).unwrap();
        assert_eq!(out, vec![5.0, 6.0, 1.0, 2.0]);
    }

    #[test]
    fn test_embedding_gather_out_of_range() {
        let weight = vec![1.0f32, 2.0];
        let mut out = vec![0.0f32; 2];
        assert!(embedding_gather(&mut out, &weight, &[5], 1, 2).is_err());
    }

    #[test]
    fn test_rms_norm() {
        let x = vec![1.0f32, 2.0, 3.0, 4.0];
        let w = vec![1.0f32; 4];
        let mut out = vec![0.0f32; 4];
        rms_norm(&mut out, &x, &w, 1, 4, 1e-5).unwrap();
        let rms = (7.5f32 + 1e-5).sqrt();
        assert!((out[0] - 1.0 / rms).abs() < 1e-5);
        assert!((out[3] - 4.0 / rms).abs() < 1e-5);
    }

    #[test]
    fn test_linear_with_bias() {
        // in_dim=2, out_dim=2, rows=1
        let input = vec![1.0f32, 2.0];
        let weight = vec![1.0, 0.0, 0.0, 1.0]; // identity
        let bias = vec![10.0, 20.0];
        let mut out = vec![0.0f32; 2];
        linear(&mut out, &input, &weight, Some(&bias), 1, 2, 2).unwrap();
        assert_eq!(out, vec![11.0, 22.0]);
    }

    #[test]
    fn test_linear_no_bias() {
        let input = vec![1.0f32, 2.0, 3.0, 4.0]; // 2x2
        let weight = vec![1.0, 0.0, 0.0, 1.0];
        let mut out = vec![0.0f32; 4];
        linear(&mut out, &input, &weight, None, 2, 2, 2).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_rope_zero_pos_no_rotation() {
        let input = vec![1.0f32, 0.0, 0.0, 1.0]; // seq=1, heads=1, dim=4
        let mut out = vec![0.0f32; 4];
        rope(&mut out, &input, &[0], 1, 1, 4, 10000.0).unwrap();
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[1] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_rope_odd_dim_rejected() {
        let input = vec![1.0f32, 2.0, 3.0];
        let mut out = vec![0.0f32; 3];
        assert!(rope(&mut out, &input, &[0], 1, 1, 3, 10000.0).is_err());
    }

    #[test]
    fn test_self_attention_full_prefill_causal() {
        // 2 query positions, 1 head, 1 kv head, dh=1. Q==Kv (full prefill).
        let q = vec![1.0f32, 1.0];
        let k = vec![1.0f32, 1.0];
        let v = vec![10.0f32, 20.0];
        let mut out = vec![0.0f32; 2];
        self_attention(&mut out, &q, &k, &v, 2, 2, 1, 1, 1, 1.0).unwrap();
        // position 0 can only see position 0 -> out[0] = v[0] = 10
        assert!((out[0] - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_self_attention_decode_with_cache() {
        // qlen=1, kvlen=3 (2 cached + this token); query attends to all 3.
        let q = vec![0.0f32];
        let k = vec![0.0f32, 0.0, 0.0];
        let v = vec![1.0f32, 2.0, 3.0];
        let mut out = vec![0.0f32; 1];
        self_attention(&mut out, &q, &k, &v, 1, 3, 1, 1, 1, 1.0).unwrap();
        // all scores equal (q.k=0 everywhere) -> uniform average
        assert!((out[0] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_self_attention_gqa_grouping() {
        // nh=2, nkvh=1: both query heads share the single kv head.
        let q = vec![1.0f32, 0.0, 1.0, 0.0]; // qlen=1, [h0, h1]
        let k = vec![1.0f32, 0.0]; // kvlen=1
        let v = vec![5.0f32, 0.0];
        let mut out = vec![0.0f32; 4];
        self_attention(&mut out, &q, &k, &v, 1, 1, 2, 1, 2, 1.0).unwrap();
        assert!((out[0] - 5.0).abs() < 1e-4);
        assert!((out[2] - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_swiglu() {
        let gate = vec![0.0f32];
        let up = vec![3.0f32];
        let mut out = vec![0.0f32];
        swiglu(&mut out, &gate, &up).unwrap();
        // silu(0) = 0
        assert!((out[0] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_add() {
        let a = vec![1.0f32, 2.0];
        let b = vec![3.0f32, 4.0];
        let mut out = vec![0.0f32; 2];
        add(&mut out, &a, &b).unwrap();
        assert_eq!(out, vec![4.0, 6.0]);
    }

    #[test]
    fn test_argmax_lowest_index_tiebreak() {
        let v = vec![1.0f32, 3.0, 3.0, 2.0];
        let (idx, val) = argmax(&v).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(val, 3.0);
    }

    #[test]
    fn test_argmax_empty_errors() {
        let v: Vec<f32> = vec![];
        assert!(argmax(&v).is_err());
    }

    #[test]
    fn test_rearrange_into_cache_slot() {
        // dst: 4 rows of width 2, stamp 2 rows starting at row offset 1.
        let mut dst = vec![0.0f32; 8];
        let src = vec![1.0f32, 2.0, 3.0, 4.0];
        rearrange(&mut dst, 1, 2, &src, 2, 2, 2).unwrap();
        assert_eq!(dst, vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);
    }
}
