use qwen_tensor::CpuStorage;

use super::config::Qwen2Config;
use crate::error::Result;
use crate::gguf::reader::GgufFile;

/// Weight tensors for a single Qwen2 transformer layer, narrowed to the
/// session's compute dtype.
pub struct Qwen2Layer {
    /// RMS norm weights for the attention sub-layer, length `hs`.
    pub attn_norm_w: CpuStorage,
    /// Query projection weights, shape `[nh*dh, hs]`.
    pub attn_q_w: CpuStorage,
    /// Query projection bias, shape `[nh*dh]`, if present in the checkpoint.
    pub attn_q_b: Option<CpuStorage>,
    /// Key projection weights, shape `[nkvh*dh, hs]`.
    pub attn_k_w: CpuStorage,
    /// Key projection bias, shape `[nkvh*dh]`, if present.
    pub attn_k_b: Option<CpuStorage>,
    /// Value projection weights, shape `[nkvh*dh, hs]`.
    pub attn_v_w: CpuStorage,
    /// Value projection bias, shape `[nkvh*dh]`, if present.
    pub attn_v_b: Option<CpuStorage>,
    /// Output projection weights, shape `[hs, nh*dh]` (unbiased).
    pub attn_o_w: CpuStorage,
    /// RMS norm weights for the MLP sub-layer, length `hs`.
    pub mlp_norm_w: CpuStorage,
    /// Gate projection weights, shape `[di, hs]` (unbiased).
    pub mlp_gate_w: CpuStorage,
    /// Up projection weights, shape `[di, hs]` (unbiased).
    pub mlp_up_w: CpuStorage,
    /// Down projection weights, shape `[hs, di]` (unbiased).
    pub mlp_down_w: CpuStorage,
}

/// All weight tensors for a Qwen2 model, narrowed to the session's compute
/// dtype at load time.
pub struct Qwen2Weights {
    /// Token embedding matrix, shape `[voc, hs]`.
    pub in_embed: CpuStorage,
    /// Output (LM head) projection weights, shape `[voc, hs]`.
    ///
    /// Independent of `in_embed` even when the checkpoint ties embeddings
    /// (see `Qwen2Config`'s open question on tied embeddings): the loader
    /// always materializes a second copy so the decoder can treat the two
    /// references uniformly.
    pub out_embed: CpuStorage,
    /// Final RMS norm weights, length `hs`.
    pub out_norm_w: CpuStorage,
    /// Per-layer weights.
    pub layers: Vec<Qwen2Layer>,
}

impl Qwen2Weights {
    /// Load all Qwen2 weights from a parsed GGUF file, narrowed to
    /// `config.dtype`.
    ///
    /// GGUF tensor names follow the common llama.cpp convention:
    /// - `token_embd.weight`, `output_norm.weight`, `output.weight` (falls
    ///   back to `token_embd.weight` for tied embeddings)
    /// - `blk.{i}.attn_norm.weight`, `blk.{i}.ffn_norm.weight`
    /// - `blk.{i}.attn_q.weight` (+ optional `.bias`), likewise for `attn_k`
    ///   and `attn_v`
    /// - `blk.{i}.attn_output.weight` (unbiased)
    /// - `blk.{i}.ffn_gate.weight`, `blk.{i}.ffn_up.weight`,
    ///   `blk.{i}.ffn_down.weight` (all unbiased)
    pub fn from_gguf(gguf: &GgufFile, config: &Qwen2Config) -> Result<Qwen2Weights> {
        let dtype = config.dtype;
        let in_embed = gguf.get_tensor_as("token_embd.weight", dtype)?;
        let out_norm_w = gguf.get_tensor_as("output_norm.weight", dtype)?;

        let out_embed = if gguf.has_tensor("output.weight") {
            gguf.get_tensor_as("output.weight", dtype)?
        } else {
            in_embed.clone()
        };

        let mut layers = Vec::with_capacity(config.n_layers);
        for i in 0..config.n_layers {
            layers.push(Qwen2Layer {
                attn_norm_w: gguf.get_tensor_as(&format!("blk.{i}.attn_norm.weight"), dtype)?,
                attn_q_w: gguf.get_tensor_as(&format!("blk.{i}.attn_q.weight"), dtype)?,
                attn_q_b: gguf.get_tensor_as_opt(&format!("blk.{i}.attn_q.bias"), dtype)?,
                attn_k_w: gguf.get_tensor_as(&format!("blk.{i}.attn_k.weight"), dtype)?,
                attn_k_b: gguf.get_tensor_as_opt(&format!("blk.{i}.attn_k.bias"), dtype)?,
                attn_v_w: gguf.get_tensor_as(&format!("blk.{i}.attn_v.weight"), dtype)?,
                attn_v_b: gguf.get_tensor_as_opt(&format!("blk.{i}.attn_v.bias"), dtype)?,
                attn_o_w: gguf.get_tensor_as(&format!("blk.{i}.attn_output.weight"), dtype)?,
                mlp_norm_w: gguf.get_tensor_as(&format!("blk.{i}.ffn_norm.weight"), dtype)?,
                mlp_gate_w: gguf.get_tensor_as(&format!("blk.{i}.ffn_gate.weight"), dtype)?,
                mlp_up_w: gguf.get_tensor_as(&format!("blk.{i}.ffn_up.weight"), dtype)?,
                mlp_down_w: gguf.get_tensor_as(&format!("blk.{i}.ffn_down.weight"), dtype)?,
            });
        }

        Ok(Qwen2Weights {
            in_embed,
            out_embed,
            out_norm_w,
            layers,
        })
    }
}
