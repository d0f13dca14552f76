use std::path::Path;

use anyhow::{Context, Error as E, Result};
use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama;
use candle_transformers::models::quantized_qwen2;
use tracing::{debug, info, warn};

use crate::batch::{AttentionMask, TokenBatch};
use crate::config::{GeneratorConfig, SamplingConfig};
use crate::engine::Model;
use crate::prompting::PromptFamily;
use crate::tokenizer::{resolve_tokenizer_path, HfTokenizer};

pub enum RuntimeModel {
    Llama(quantized_llama::ModelWeights),
    Qwen2(quantized_qwen2::ModelWeights),
}

/// Tensor layout of a GGUF file, which picks the candle model to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Architecture {
    Llama,
    Qwen2,
}

impl Architecture {
    /// Mistral checkpoints are converted to GGUF with llama tensor names.
    fn for_family(family: PromptFamily) -> Option<Self> {
        match family {
            PromptFamily::Llama | PromptFamily::Mistral => Some(Self::Llama),
            PromptFamily::Qwen => Some(Self::Qwen2),
            PromptFamily::Unknown => None,
        }
    }

    /// Maps the `general.architecture` metadata value.
    fn from_gguf_name(name: &str) -> Option<Self> {
        match name {
            "llama" | "mistral" => Some(Self::Llama),
            "qwen2" => Some(Self::Qwen2),
            _ => None,
        }
    }
}

fn resolve_architecture(family: PromptFamily, declared: Option<&str>) -> Result<Architecture> {
    let from_file = declared.and_then(Architecture::from_gguf_name);
    match (Architecture::for_family(family), from_file) {
        (Some(arch), Some(file_arch)) if arch != file_arch => {
            warn!(
                ?family,
                declared = declared.unwrap_or_default(),
                "Model family disagrees with GGUF architecture; trusting the family."
            );
            Ok(arch)
        }
        (Some(arch), _) | (None, Some(arch)) => Ok(arch),
        (None, None) => Err(E::msg(format!(
            "Cannot choose weights for family {:?} and GGUF architecture '{}'.",
            family,
            declared.unwrap_or("<missing>")
        ))),
    }
}

impl RuntimeModel {
    pub fn load_from_gguf(path: &Path, family: PromptFamily, device: &Device) -> Result<Self> {
        let mut file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open model file {}", path.display()))?;
        let content = gguf_file::Content::read(&mut file)
            .with_context(|| format!("Failed to read GGUF header of {}", path.display()))?;

        let declared = content
            .metadata
            .get("general.architecture")
            .and_then(|value| value.to_string().ok())
            .cloned();
        let arch = resolve_architecture(family, declared.as_deref())?;
        debug!(?arch, declared = ?declared, tensors = content.tensor_infos.len(), "GGUF parsed");

        match arch {
            Architecture::Llama => Ok(Self::Llama(quantized_llama::ModelWeights::from_gguf(
                content, &mut file, device,
            )?)),
            Architecture::Qwen2 => {
                quantized_qwen2::ModelWeights::from_gguf(content, &mut file, device)
                    .map(Self::Qwen2)
                    .map_err(|e| {
                        // Split shards lack the final norm tensor.
                        if e.to_string().contains("output_norm.weight") {
                            E::msg(format!(
                                "{} has no 'output_norm.weight'; it looks like one shard of a split GGUF. Merge the parts first.",
                                path.display()
                            ))
                        } else {
                            E::new(e)
                        }
                    })
            }
        }
    }

    /// Logits for the last position of `input_tensor`, shape `(batch, vocab)`.
    pub fn forward(&mut self, input_tensor: &Tensor, position: usize) -> Result<Tensor> {
        match self {
            Self::Llama(model) => Ok(model.forward(input_tensor, position)?),
            Self::Qwen2(model) => Ok(model.forward(input_tensor, position)?),
        }
    }
}

/// [`Model`] over quantized GGUF weights.
///
/// Rows arrive as an arbitrary subset of the batch on every step, so each row
/// is replayed from position 0 and no KV cache is carried between calls.
pub struct CandleModel {
    weights: RuntimeModel,
    tokenizer: HfTokenizer,
    device: Device,
    logits_processor: LogitsProcessor,
}

impl CandleModel {
    pub fn new(
        weights: RuntimeModel,
        tokenizer: HfTokenizer,
        device: Device,
        sampling: SamplingConfig,
    ) -> Self {
        // Temperature 0 means greedy decoding.
        let temperature = (sampling.temperature > 0.0).then_some(sampling.temperature);
        let top_p = (sampling.top_p < 1.0).then_some(sampling.top_p);

        Self {
            weights,
            tokenizer,
            device,
            logits_processor: LogitsProcessor::new(sampling.seed, temperature, top_p),
        }
    }

    pub fn load(config: &GeneratorConfig) -> Result<Self> {
        let family = config.resolved_family();
        info!(path = %config.model_path.display(), ?family, "Loading model");

        let device = Device::Cpu;
        let weights = RuntimeModel::load_from_gguf(&config.model_path, family, &device)?;
        info!("Weights loaded. Loading tokenizer...");

        let tokenizer =
            match resolve_tokenizer_path(&config.model_path, config.tokenizer_path.as_deref()) {
                Some(path) => HfTokenizer::from_file(path, family)?,
                None => match &config.tokenizer_repo {
                    Some(repo) => HfTokenizer::from_hub(repo, family)?,
                    None => {
                        return Err(E::msg(
                            "Tokenizer not found for selected model (fail-fast policy).",
                        ))
                    }
                },
            };

        info!("Model & tokenizer ready.");
        Ok(Self::new(weights, tokenizer, device, config.resolved_sampling()))
    }

    fn sample_row(&mut self, tokens: &[u32]) -> Result<u32> {
        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let logits = self.weights.forward(&input, 0)?;
        let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
        Ok(self.logits_processor.sample(&logits)?)
    }
}

impl Model for CandleModel {
    type Tokenizer = HfTokenizer;

    fn tokenizer(&self) -> &HfTokenizer {
        &self.tokenizer
    }

    fn next_token_ids(
        &mut self,
        token_ids: &TokenBatch,
        attention_mask: &AttentionMask,
    ) -> Result<Vec<u32>> {
        let mut next = Vec::with_capacity(token_ids.batch_size());

        for (ids, mask) in token_ids.rows().zip(attention_mask.rows()) {
            let tokens = real_tokens(ids, mask);
            if tokens.is_empty() {
                return Err(E::msg("cannot run the model on a row without tokens"));
            }
            next.push(self.sample_row(&tokens)?);
        }

        debug!(rows = next.len(), "Sampled next tokens");
        Ok(next)
    }
}

/// Tokens at positions where the mask is set, in order.
fn real_tokens(ids: &[u32], mask: &[u8]) -> Vec<u32> {
    ids.iter()
        .zip(mask)
        .filter(|(_, m)| **m == 1)
        .map(|(id, _)| *id)
        .collect()
}
