use std::path::{Path, PathBuf};

use anyhow::{Error as E, Result as AnyResult};
use tracing::{info, warn};

use crate::batch::{AttentionMask, TokenBatch};
use crate::error::{GenerationError, Result};
use crate::prompting::PromptFamily;

use super::{pad_left, Prompts, Tokenizer};

/// [`Tokenizer`] backed by a Hugging Face `tokenizer.json`.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    eos_token: String,
    eos_token_id: u32,
    pad_token_id: u32,
    add_special_tokens: bool,
}

impl HfTokenizer {
    pub fn new(inner: tokenizers::Tokenizer, family: PromptFamily) -> AnyResult<Self> {
        let (eos_token, eos_token_id) = resolve_eos_token(&inner, family).map_err(E::msg)?;
        let pad_token_id = resolve_pad_token(&inner, family).unwrap_or_else(|| {
            warn!(
                eos_token_id,
                "Tokenizer defines no pad token; padding with EOS."
            );
            eos_token_id
        });

        info!(
            eos = %eos_token,
            eos_token_id, pad_token_id, "Special tokens identified"
        );

        Ok(Self {
            inner,
            eos_token,
            eos_token_id,
            pad_token_id,
            add_special_tokens: true,
        })
    }

    pub fn from_file(path: impl AsRef<Path>, family: PromptFamily) -> AnyResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading tokenizer");
        let inner = tokenizers::Tokenizer::from_file(path).map_err(E::msg)?;
        Self::new(inner, family)
    }

    /// Fetches `tokenizer.json` from a hub repository.
    pub fn from_hub(repo: &str, family: PromptFamily) -> AnyResult<Self> {
        warn!(repo, "tokenizer.json not found locally, fetching from HF...");
        let api = hf_hub::api::sync::Api::new()?;
        let path = api.model(repo.to_string()).get("tokenizer.json")?;
        Self::from_file(path, family)
    }

    /// Whether encoding adds the tokenizer's own special tokens (e.g. BOS).
    pub fn with_add_special_tokens(mut self, add: bool) -> Self {
        self.add_special_tokens = add;
        self
    }

    pub fn inner(&self) -> &tokenizers::Tokenizer {
        &self.inner
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl Tokenizer for HfTokenizer {
    fn eos_token(&self) -> &str {
        &self.eos_token
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    fn encode(&self, prompts: &Prompts) -> Result<(TokenBatch, AttentionMask)> {
        let texts = prompts.as_slice();
        if texts.is_empty() {
            return Err(GenerationError::Encoding("no prompts given".to_string()));
        }

        let mut rows = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            if text.is_empty() {
                return Err(GenerationError::Encoding(format!("prompt {} is empty", i)));
            }

            let encoding = self
                .inner
                .encode(text.as_str(), self.add_special_tokens)
                .map_err(|e| GenerationError::Encoding(e.to_string()))?;

            // Drop any padding the tokenizer config applies on its own.
            let ids: Vec<u32> = encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .filter(|(_, m)| **m == 1)
                .map(|(&id, _)| id)
                .collect();

            if ids.is_empty() {
                return Err(GenerationError::Encoding(format!(
                    "prompt {} produced no tokens",
                    i
                )));
            }
            rows.push(ids);
        }

        pad_left(rows, self.pad_token_id)
    }

    fn decode(&self, token_ids: &TokenBatch) -> Result<Vec<String>> {
        token_ids
            .rows()
            .map(|row| {
                let start = row
                    .iter()
                    .position(|&id| id != self.pad_token_id)
                    .unwrap_or(row.len());
                self.decode_ids(&row[start..])
            })
            .collect()
    }

    fn decode_masked(
        &self,
        token_ids: &TokenBatch,
        attention_mask: &AttentionMask,
    ) -> Result<Vec<String>> {
        if token_ids.batch_size() != attention_mask.batch_size()
            || token_ids.seq_len() != attention_mask.seq_len()
        {
            return Err(GenerationError::Shape(format!(
                "mask of {}x{} for token batch of {}x{}",
                attention_mask.batch_size(),
                attention_mask.seq_len(),
                token_ids.batch_size(),
                token_ids.seq_len()
            )));
        }

        token_ids
            .rows()
            .zip(attention_mask.rows())
            .map(|(row, mask)| {
                let ids: Vec<u32> = row
                    .iter()
                    .zip(mask)
                    .filter(|(_, m)| **m == 1)
                    .map(|(&id, _)| id)
                    .collect();
                self.decode_ids(&ids)
            })
            .collect()
    }
}

impl HfTokenizer {
    fn decode_ids(&self, ids: &[u32]) -> Result<String> {
        let vocab_size = self.vocab_size();
        if let Some(&bad) = ids.iter().find(|&&id| id as usize >= vocab_size) {
            return Err(GenerationError::Decoding(format!(
                "token id {} outside vocabulary of {} entries",
                bad, vocab_size
            )));
        }

        self.inner
            .decode(ids, false)
            .map_err(|e| GenerationError::Decoding(e.to_string()))
    }
}

/// Looks for a tokenizer next to the model, then in the working directory.
pub fn resolve_tokenizer_path(model_path: &Path, tokenizer_hint: Option<&Path>) -> Option<PathBuf> {
    if let Some(hint) = tokenizer_hint {
        if hint.exists() {
            return Some(hint.to_path_buf());
        }
    }

    let parent_dir = model_path.parent().unwrap_or(Path::new("."));
    let local_tok_path = parent_dir.join("tokenizer.json");
    if local_tok_path.exists() {
        return Some(local_tok_path);
    }

    let root_tok_path = Path::new("tokenizer.json");
    if root_tok_path.exists() {
        return Some(root_tok_path.to_path_buf());
    }

    let models_tok_path = Path::new("models").join("tokenizer.json");
    if models_tok_path.exists() {
        return Some(models_tok_path);
    }

    None
}

fn resolve_eos_token(
    tokenizer: &tokenizers::Tokenizer,
    family: PromptFamily,
) -> std::result::Result<(String, u32), String> {
    let markers = family.eos_markers();
    if let Some((marker, id)) = markers
        .iter()
        .find_map(|m| tokenizer.token_to_id(m).map(|id| (*m, id)))
    {
        return Ok((marker.to_string(), id));
    }

    if family == PromptFamily::Unknown {
        // Most sentencepiece vocabularies keep EOS at id 2.
        if let Some(text) = tokenizer.id_to_token(2) {
            return Ok((text, 2));
        }
    }

    Err(format!(
        "Tokenizer/model incompatibility: {:?} requires one of {}.",
        family,
        markers.join(", ")
    ))
}

fn resolve_pad_token(tokenizer: &tokenizers::Tokenizer, family: PromptFamily) -> Option<u32> {
    if let Some(params) = tokenizer.get_padding() {
        return Some(params.pad_id);
    }

    family
        .pad_markers()
        .iter()
        .find_map(|m| tokenizer.token_to_id(m))
}
