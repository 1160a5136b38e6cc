use std::sync::Arc;

use qwen_tensor::ComputeBackend;

use super::Qwen2Model;
use crate::error::Result;

/// Session sentinel returned on any failure, per the external interface's
/// error-conversion policy: no error crosses this boundary, every entry
/// point collapses to a single `i64` value.
pub const FAILURE_TOKEN: i64 = -1;

/// Holds the model (config, weights, KV cache) and a compute backend, and
/// exposes the decode loop's greedy-argmax surface: `prefill`, `step`,
/// `reset_kv_cache`, `set_kv_cache_enabled`.
///
/// Every entry point converts an inner failure to [`FAILURE_TOKEN`] rather
/// than propagating `Result`, and never leaves the KV cache in a
/// partially-updated state -- the cache cursor only advances once
/// [`Qwen2Model::forward`] has fully succeeded.
pub struct Session {
    model: Qwen2Model,
    backend: Arc<dyn ComputeBackend>,
}

impl Session {
    /// Build a session around an already-loaded model and a chosen
    /// compute backend.
    pub fn new(model: Qwen2Model, backend: Arc<dyn ComputeBackend>) -> Session {
        Session { model, backend }
    }

    /// Mutable access to the underlying model, e.g. to populate weight
    /// slots via [`Qwen2Model::weights_mut`] before the first inference
    /// call.
    pub fn model_mut(&mut self) -> &mut Qwen2Model {
        &mut self.model
    }

    /// Read-only access to the underlying model.
    pub fn model(&self) -> &Qwen2Model {
        &self.model
    }

    /// Runs the decoder with `append_only=false` over `ids` and returns
    /// the greedily-chosen next token id, or [`FAILURE_TOKEN`] on any
    /// failure (empty input, capacity exceeded, allocation failure).
    ///
    /// If `ids.len()` exceeds the cache's `past_len`, only the
    /// uncached suffix is recomputed; the caller is responsible for the
    /// first `past_len` ids being byte-equal to whatever produced the
    /// cache (not verified, see the open question on prefix misuse).
    pub fn prefill(&mut self, ids: &[i64]) -> i64 {
        self.run(ids, false)
    }

    /// Runs the decoder with `append_only=true` over `ids`, the newly
    /// appended tokens since the last call (typically length 1), and
    /// returns the greedily-chosen next token id, or [`FAILURE_TOKEN`] if
    /// the cache is disabled, `ids` is empty, or capacity is exceeded.
    pub fn step(&mut self, ids: &[i64]) -> i64 {
        self.run(ids, true)
    }

    /// Alias for [`Self::prefill`].
    pub fn infer(&mut self, ids: &[i64]) -> i64 {
        self.prefill(ids)
    }

    /// Runs the decoder and returns the raw last-token logits row instead
    /// of collapsing it to a greedy argmax choice.
    ///
    /// Exists for callers layering a non-greedy sampling policy (temperature,
    /// top-k, top-p) on top of the core decoder, per the design notes'
    /// "optional sampling policies" — those policies are not part of the
    /// prefill/step state machine itself and so are not routed through
    /// [`Self::prefill`]/[`Self::step`]'s sentinel-collapsing contract.
    pub fn forward_logits(&mut self, ids: &[i64], append_only: bool) -> Result<Vec<f32>> {
        self.model.forward(ids, append_only, self.backend.as_ref())
    }

    fn run(&mut self, ids: &[i64], append_only: bool) -> i64 {
        match self.model.forward(ids, append_only, self.backend.as_ref()) {
            Ok(logits) => {
                let storage = qwen_tensor::CpuStorage::from_f32_vec(logits);
                match self.backend.argmax(&storage) {
                    Ok((idx, _)) => idx as i64,
                    Err(_) => FAILURE_TOKEN,
                }
            }
            Err(_) => FAILURE_TOKEN,
        }
    }

    /// Rewinds the KV cache cursor to zero without freeing storage.
    pub fn reset_kv_cache(&mut self) {
        self.model.reset_kv_cache();
    }

    /// Enables or disables the KV cache. Returns `false` on allocation
    /// failure while re-enabling; the session's cache_enabled flag is left
    /// unchanged in that case.
    pub fn set_kv_cache_enabled(&mut self, enabled: bool) -> bool {
        self.model.set_kv_cache_enabled(enabled).is_ok()
    }

    /// Returns true if the KV cache is currently enabled.
    pub fn cache_enabled(&self) -> bool {
        self.model.cache_enabled()
    }

    /// Number of rows already written into the KV cache.
    pub fn past_len(&self) -> usize {
        self.model.cache.past_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qwen2::config::Qwen2Config;
    use crate::qwen2::kv_cache::KvCache;
    use crate::qwen2::layers::{Qwen2Layer, Qwen2Weights};
    use qwen_tensor::{cpu::CpuBackend, CpuStorage, DType};

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

    fn session() -> Session {
        Session::new(toy_model(), Arc::new(CpuBackend::new()))
    }

    #[test]
    fn test_s1_prefill_deterministic_on_fresh_sessions() {
        let mut a = session();
        let mut b = session();
        let ta = a.prefill(&[1, 2, 3, 4]);
        let tb = b.prefill(&[1, 2, 3, 4]);
        assert_eq!(ta, tb);
        assert_ne!(ta, FAILURE_TOKEN);
    }

    #[test]
    fn test_s2_prefill_then_step_matches_full_prefill() {
        let mut whole = session();
        let t_whole = whole.prefill(&[1, 2, 3, 4]);

        let mut split = session();
        split.prefill(&[1, 2]);
        let t_split = split.step(&[3, 4]);

        assert_eq!(t_whole, t_split);
    }

    #[test]
    fn test_s3_reset_then_prefill_matches_fresh() {
        let mut reused = session();
        reused.prefill(&[1, 2]);
        reused.step(&[3, 4]);
        reused.reset_kv_cache();
        let after_reset = reused.prefill(&[5, 0]);

        let mut fresh = session();
        let fresh_t = fresh.prefill(&[5, 0]);

        assert_eq!(after_reset, fresh_t);
    }

    #[test]
    fn test_s4_repeated_step_advances_past_len() {
        let mut s = session();
        s.prefill(&[1]);
        for k in 1..=8 {
            let t = s.step(&[k]);
            assert_ne!(t, FAILURE_TOKEN);
        }
        assert_eq!(s.past_len(), 9);
    }

    #[test]
    fn test_s5_cache_disabled_equivalence() {
        let mut disabled = session();
        disabled.set_kv_cache_enabled(false);
        let a = disabled.prefill(&[1, 2, 3, 4]);

        let mut enabled = session();
        let b = enabled.prefill(&[1, 2, 3, 4]);

        assert_eq!(a, b);
    }

    #[test]
    fn test_step_with_disabled_cache_returns_failure_token() {
        let mut s = session();
        s.set_kv_cache_enabled(false);
        assert_eq!(s.step(&[1]), FAILURE_TOKEN);
    }

    #[test]
    fn test_empty_ids_returns_failure_token() {
        let mut s = session();
        assert_eq!(s.prefill(&[]), FAILURE_TOKEN);
    }

    #[test]
    fn test_infer_is_alias_for_prefill() {
        let mut a = session();
        let mut b = session();
        assert_eq!(a.infer(&[1, 2, 3]), b.prefill(&[1, 2, 3]));
    }
}
