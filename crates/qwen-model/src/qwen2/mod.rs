pub mod config;
pub mod kv_cache;
pub mod layers;
pub mod session;

pub use config::Qwen2Config;
pub use kv_cache::KvCache;
pub use layers::{Qwen2Layer, Qwen2Weights};
pub use session::Session;

use qwen_tensor::{ComputeBackend, CpuStorage, DType};

use crate::error::{ModelError, Result};
use crate::gguf::reader::GgufFile;

/// A Qwen2 decoder-only transformer: configuration, dequantized weights,
/// and the per-layer KV cache that backs incremental decoding.
///
/// [`Qwen2Model::forward`] implements the full prefill/step state machine
/// of the decoder block (embed -> N decoder layers -> final norm -> output
/// projection), returning the last-token logits row. It is the single
/// entry point every layer of the architecture routes through; callers
/// that want a convenient `prefill`/`step`/greedy-argmax surface should go
/// through [`Session`] instead.
pub struct Qwen2Model {
    /// Model hyperparameters.
    pub config: Qwen2Config,
    /// All weight tensors, narrowed to `config.dtype`.
    pub weights: Qwen2Weights,
    /// Per-layer key/value cache.
    pub cache: KvCache,
    /// Whether the cache is currently in use. When `false`, every forward
    /// call recomputes from position zero and `append_only` is rejected.
    cache_enabled: bool,
}

impl Qwen2Model {
    /// Load a Qwen2 model from a parsed GGUF file, with weights and
    /// activations computed in `dtype`.
    pub fn from_gguf(gguf: &GgufFile, dtype: DType) -> Result<Qwen2Model> {
        let config = Qwen2Config::from_gguf(&gguf.metadata, dtype)?;
        let weights = Qwen2Weights::from_gguf(gguf, &config)?;
        let cache = KvCache::new(
            config.n_layers,
            config.n_kv_heads,
            config.head_dim,
            config.max_seq_len,
            config.dtype,
        )?;

        Ok(Qwen2Model {
            config,
            weights,
            cache,
            cache_enabled: true,
        })
    }

    /// Returns a reference to the model configuration.
    pub fn config(&self) -> &Qwen2Config {
        &self.config
    }

    /// Mutable access to the weight tables, so a caller can repopulate them
    /// (e.g. after a hot-reload) before the next forward call.
    pub fn weights_mut(&mut self) -> &mut Qwen2Weights {
        &mut self.weights
    }

    /// Rewinds the cache cursor to zero without freeing storage.
    pub fn reset_kv_cache(&mut self) {
        self.cache.reset();
    }

    /// Enables or disables the KV cache. Disabling frees its storage;
    /// re-enabling reallocates zeroed storage and resets the cursor.
    pub fn set_kv_cache_enabled(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.cache.enable()?;
        } else {
            self.cache.disable();
        }
        self.cache_enabled = enabled;
        Ok(())
    }

    /// Returns true if the cache is currently enabled.
    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    /// Runs the full decoder forward pass and returns the last-token
    /// logits row, `[voc]`, widened to `f32`.
    ///
    /// `ids` is interpreted according to `append_only` and the cache
    /// state, following the prefill/step state machine:
    ///
    /// - cache enabled, `append_only=true` (step): `ids` holds only the
    ///   newly seen tokens; `past_len` is read from the cache cursor.
    /// - cache enabled, `append_only=false` (prefill): if `ids.len() >
    ///   past_len`, the first `past_len` ids are assumed already cached
    ///   (byte-equality with the sequence that produced the cache is not
    ///   verified) and only the remaining suffix is computed. If
    ///   `ids.len() <= past_len`, the cache is discarded and the full
    ///   sequence is computed from position zero.
    /// - cache disabled: always computed from position zero;
    ///   `append_only=true` is rejected.
    pub fn forward(
        &mut self,
        ids: &[i64],
        append_only: bool,
        backend: &dyn ComputeBackend,
    ) -> Result<Vec<f32>> {
        if ids.is_empty() {
            return Err(ModelError::InvalidArgument(
                "ids must not be empty".to_string(),
            ));
        }
        if append_only && !self.cache_enabled {
            return Err(ModelError::InvalidArgument(
                "append_only requires an enabled KV cache".to_string(),
            ));
        }

        let ntoken = ids.len();
        let (past_len, cur_len, idx) = if self.cache_enabled {
            if append_only {
                (self.cache.past_len(), ntoken, ids)
            } else if ntoken > self.cache.past_len() {
                let past = self.cache.past_len();
                (past, ntoken - past, &ids[past..])
            } else {
                self.cache.reset();
                (0usize, ntoken, ids)
            }
        } else {
            (0usize, ntoken, ids)
        };

        if past_len + cur_len > self.config.max_seq_len {
            return Err(ModelError::InvalidArgument(format!(
                "past_len ({}) + cur_len ({}) exceeds maxseq ({})",
                past_len, cur_len, self.config.max_seq_len
            )));
        }

        let cfg = &self.config;
        let hs = cfg.n_embd;
        let nh = cfg.n_heads;
        let nkvh = cfg.n_kv_heads;
        let dh = cfg.head_dim;
        let di = cfg.n_ff;
        let voc = cfg.n_vocab;
        let scale = 1.0 / (dh as f32).sqrt();

        // 1. Embed.
        let mut hidden = backend.embedding_gather(&self.weights.in_embed, idx, voc, hs)?;

        // 2. Positions: pos[i] = past_len + i.
        let pos: Vec<usize> = (0..cur_len).map(|i| past_len + i).collect();

        // 3. Decoder layers.
        for layer_idx in 0..self.weights.layers.len() {
            let layer = &self.weights.layers[layer_idx];

            // a. attn-norm
            let normed = backend.rms_norm(&hidden, &layer.attn_norm_w, cfg.norm_eps, cur_len, hs)?;

            // b. QKV projections
            let q2 = backend.linear(
                &normed,
                &layer.attn_q_w,
                layer.attn_q_b.as_ref(),
                cur_len,
                hs,
                nh * dh,
            )?;
            let k2 = backend.linear(
                &normed,
                &layer.attn_k_w,
                layer.attn_k_b.as_ref(),
                cur_len,
                hs,
                nkvh * dh,
            )?;
            let v2 = backend.linear(
                &normed,
                &layer.attn_v_w,
                layer.attn_v_b.as_ref(),
                cur_len,
                hs,
                nkvh * dh,
            )?;

            // c. RoPE on Q and K; V is not rotated.
            let qr = backend.rope(&q2, &pos, cur_len, nh, dh, cfg.rope_theta)?;
            let kr = backend.rope(&k2, &pos, cur_len, nkvh, dh, cfg.rope_theta)?;

            // d. cache write (ordered before the prefix read) + attention read
            let (k_att, v_att, kv_len) = if self.cache_enabled {
                self.cache.write_slice(backend, layer_idx, &kr, &v2, cur_len)?;
                let kv_len = past_len + cur_len;
                let k_att = self.cache.k_prefix(layer_idx, kv_len)?;
                let v_att = self.cache.v_prefix(layer_idx, kv_len)?;
                (k_att, v_att, kv_len)
            } else {
                (kr, v2, cur_len)
            };

            // e. causal grouped-query attention
            let attn_out =
                backend.self_attention(&qr, &k_att, &v_att, cur_len, kv_len, nh, nkvh, dh, scale)?;

            // f. output projection
            let proj = backend.linear(&attn_out, &layer.attn_o_w, None, cur_len, nh * dh, hs)?;

            // g. residual
            hidden = backend.add(&hidden, &proj)?;

            // h. mlp-norm
            let mn = backend.rms_norm(&hidden, &layer.mlp_norm_w, cfg.norm_eps, cur_len, hs)?;

            // i. gate/up
            let gate = backend.linear(&mn, &layer.mlp_gate_w, None, cur_len, hs, di)?;
            let up = backend.linear(&mn, &layer.mlp_up_w, None, cur_len, hs, di)?;

            // j. SwiGLU + down projection
            let s = backend.swiglu(&gate, &up)?;
            let m = backend.linear(&s, &layer.mlp_down_w, None, cur_len, di, hs)?;

            // k. residual
            hidden = backend.add(&hidden, &m)?;
        }

        // 4. Advance the cache cursor only now that every layer succeeded.
        if self.cache_enabled {
            self.cache.advance(cur_len);
        }

        // 5. Final norm + output projection on the last row only.
        let last_row = slice_last_row(&hidden, cur_len, hs);
        let normed_last = backend.rms_norm(&last_row, &self.weights.out_norm_w, cfg.norm_eps, 1, hs)?;
        let logits = backend.linear(&normed_last, &self.weights.out_embed, None, 1, hs, voc)?;

        Ok(logits.to_f32_vec())
    }
}

/// Slices the last of `rows` rows of `cols` elements out of `storage`,
/// preserving its dtype.
fn slice_last_row(storage: &CpuStorage, rows: usize, cols: usize) -> CpuStorage {
    let start = (rows - 1) * cols;
    match storage {
        CpuStorage::F32(v) => CpuStorage::from_f32_vec(v[start..start + cols].to_vec()),
        CpuStorage::F16(v) => CpuStorage::from_f16_vec(v[start..start + cols].to_vec()),
        CpuStorage::Bf16(v) => CpuStorage::from_bf16_vec(v[start..start + cols].to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qwen_tensor::cpu::CpuBackend;

    /// A tiny, hand-built Qwen2Model (nlayer=1, hs=4, nh=2, nkvh=1, dh=2,
    /// di=8, maxseq=16, voc=6) so the prefill/step state machine can be
    /// exercised without a real GGUF checkpoint.
    fn toy_model() -> Qwen2Model {
        let config = Qwen2Config {
            dtype: DType::F32,
            n_vocab: 6,
            n_embd: 4,
            n_heads: 2,
            n_kv_heads: 1,
            n_layers: 1,
            n_ff: 8,
            norm_eps: 1e-6,
            max_seq_len: 16,
            rope_theta: 10000.0,
            head_dim: 2,
            end_token: 5,
        };

        let hs = config.n_embd;
        let nh_dh = config.n_heads * config.head_dim;
        let nkvh_dh = config.n_kv_heads * config.head_dim;
        let di = config.n_ff;
        let voc = config.n_vocab;

        fn seq(n: usize, scale: f32) -> Vec<f32> {
            (0..n).map(|i| (i as f32 + 1.0) * scale).collect()
        }

        let layer = Qwen2Layer {
            attn_norm_w: CpuStorage::from_f32_vec(vec![1.0; hs]),
            attn_q_w: CpuStorage::from_f32_vec(seq(nh_dh * hs, 0.01)),
            attn_q_b: None,
            attn_k_w: CpuStorage::from_f32_vec(seq(nkvh_dh * hs, 0.01)),
            attn_k_b: None,
            attn_v_w: CpuStorage::from_f32_vec(seq(nkvh_dh * hs, 0.01)),
            attn_v_b: None,
            attn_o_w: CpuStorage::from_f32_vec(seq(hs * nh_dh, 0.01)),
            mlp_norm_w: CpuStorage::from_f32_vec(vec![1.0; hs]),
            mlp_gate_w: CpuStorage::from_f32_vec(seq(di * hs, 0.01)),
            mlp_up_w: CpuStorage::from_f32_vec(seq(di * hs, 0.01)),
            mlp_down_w: CpuStorage::from_f32_vec(seq(hs * di, 0.01)),
        };

        let weights = Qwen2Weights {
            in_embed: CpuStorage::from_f32_vec(seq(voc * hs, 0.1)),
            out_embed: CpuStorage::from_f32_vec(seq(voc * hs, 0.1)),
            out_norm_w: CpuStorage::from_f32_vec(vec![1.0; hs]),
            layers: vec![layer],
        };

        let cache = KvCache::new(
            config.n_layers,
            config.n_kv_heads,
            config.head_dim,
            config.max_seq_len,
            config.dtype,
        )
        .unwrap();

        Qwen2Model {
            config,
            weights,
            cache,
            cache_enabled: true,
        }
    }

    #[test]
    fn test_prefill_populates_cache_cursor() {
        let mut model = toy_model();
        let backend = CpuBackend::new();
        let logits = model.forward(&[1, 2, 3, 4], false, &backend).unwrap();
        assert_eq!(logits.len(), 6);
        assert_eq!(model.cache.past_len(), 4);
    }

    #[test]
    fn test_prefill_then_step_equivalence() {
        // prefill(x[0:N]) should match prefill(x[0:A]) followed by
        // step(x[A:N]) for the final-token logits.
        let backend = CpuBackend::new();

        let mut fresh = toy_model();
        let whole = fresh.forward(&[1, 2, 3, 4], false, &backend).unwrap();

        let mut split = toy_model();
        split.forward(&[1, 2], false, &backend).unwrap();
        let after_step = split.forward(&[3, 4], true, &backend).unwrap();

        for (a, b) in whole.iter().zip(after_step.iter()) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_reset_then_prefill_matches_fresh_session() {
        let backend = CpuBackend::new();

        let mut reused = toy_model();
        reused.forward(&[1, 2], false, &backend).unwrap();
        reused.forward(&[3, 4], true, &backend).unwrap();
        reused.reset_kv_cache();
        let after_reset = reused.forward(&[5, 0], false, &backend).unwrap();

        let mut fresh = toy_model();
        let fresh_result = fresh.forward(&[5, 0], false, &backend).unwrap();

        assert_eq!(after_reset, fresh_result);
    }

    #[test]
    fn test_cache_disabled_equivalence() {
        let backend = CpuBackend::new();

        let mut disabled = toy_model();
        disabled.set_kv_cache_enabled(false).unwrap();
        let a1 = disabled.forward(&[1, 2, 3, 4], false, &backend).unwrap();
        let a2 = disabled.forward(&[2, 3], false, &backend).unwrap();

        let mut fresh1 = toy_model();
        fresh1.set_kv_cache_enabled(false).unwrap();
        let b1 = fresh1.forward(&[1, 2, 3, 4], false, &backend).unwrap();

        let mut fresh2 = toy_model();
        fresh2.set_kv_cache_enabled(false).unwrap();
        let b2 = fresh2.forward(&[2, 3], false, &backend).unwrap();

        assert_eq!(a1, b1);
        assert_eq!(a2, b2);
    }

    #[test]
    fn test_append_only_without_cache_rejected() {
        let mut model = toy_model();
        model.set_kv_cache_enabled(false).unwrap();
        let backend = CpuBackend::new();
        assert!(model.forward(&[1], true, &backend).is_err());
    }

    #[test]
    fn test_empty_ids_rejected() {
        let mut model = toy_model();
        let backend = CpuBackend::new();
        assert!(model.forward(&[], false, &backend).is_err());
    }

    #[test]
    fn test_capacity_exceeded_rejected() {
        let mut model = toy_model();
        let backend = CpuBackend::new();
        let too_long: Vec<i64> = (0..20).map(|i| i % 6).collect();
        assert!(model.forward(&too_long, false, &backend).is_err());
    }
}
