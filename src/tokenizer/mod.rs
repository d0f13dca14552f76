//! Text <-> token-id batches.
//!
//! Any tokenizer the engine drives implements [`Tokenizer`]. The special-token
//! accessors are expected to return the same values for the tokenizer's whole
//! lifetime; the engine reads them once per call through
//! [`Tokenizer::special_tokens`].

mod hf;

pub use hf::{resolve_tokenizer_path, HfTokenizer};

use crate::batch::{AttentionMask, TokenBatch};
use crate::error::{GenerationError, Result};

/// One prompt or an ordered batch of prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompts {
    Single(String),
    Batch(Vec<String>),
}

impl Prompts {
    pub fn as_slice(&self) -> &[String] {
        match self {
            Prompts::Single(prompt) => std::slice::from_ref(prompt),
            Prompts::Batch(prompts) => prompts,
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Prompts::Single(_))
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

impl From<&str> for Prompts {
    fn from(prompt: &str) -> Self {
        Prompts::Single(prompt.to_string())
    }
}

impl From<String> for Prompts {
    fn from(prompt: String) -> Self {
        Prompts::Single(prompt)
    }
}

impl From<Vec<String>> for Prompts {
    fn from(prompts: Vec<String>) -> Self {
        Prompts::Batch(prompts)
    }
}

impl From<Vec<&str>> for Prompts {
    fn from(prompts: Vec<&str>) -> Self {
        Prompts::Batch(prompts.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Prompts {
    fn from(prompts: &[&str]) -> Self {
        Prompts::Batch(prompts.iter().map(|p| p.to_string()).collect())
    }
}

/// Snapshot of a tokenizer's fixed identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialTokens {
    pub eos_token: String,
    pub eos_token_id: u32,
    pub pad_token_id: u32,
}

pub trait Tokenizer {
    fn eos_token(&self) -> &str;
    fn eos_token_id(&self) -> u32;
    fn pad_token_id(&self) -> u32;

    /// Encodes the prompts into a left-padded id batch and its attention mask.
    fn encode(&self, prompts: &Prompts) -> Result<(TokenBatch, AttentionMask)>;

    /// Decodes every row. Special tokens stay in the text; only the leading
    /// run of pad ids left by [`pad_left`] is skipped.
    fn decode(&self, token_ids: &TokenBatch) -> Result<Vec<String>>;

    /// Decodes every row keeping only positions where the mask is `1`.
    fn decode_masked(
        &self,
        token_ids: &TokenBatch,
        attention_mask: &AttentionMask,
    ) -> Result<Vec<String>> {
        let _ = attention_mask;
        self.decode(token_ids)
    }

    fn special_tokens(&self) -> SpecialTokens {
        SpecialTokens {
            eos_token: self.eos_token().to_string(),
            eos_token_id: self.eos_token_id(),
            pad_token_id: self.pad_token_id(),
        }
    }
}

/// Left-pads variable-length rows to a common width.
///
/// The mask is `1` exactly on the positions copied from `rows`.
pub fn pad_left(rows: Vec<Vec<u32>>, pad_token_id: u32) -> Result<(TokenBatch, AttentionMask)> {
    if rows.is_empty() {
        return Err(GenerationError::Encoding("no prompts to encode".to_string()));
    }

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut ids = Vec::with_capacity(rows.len());
    let mut mask = Vec::with_capacity(rows.len());

    for row in rows {
        let padding = width - row.len();
        let mut padded = vec![pad_token_id; padding];
        padded.extend_from_slice(&row);
        ids.push(padded);

        let mut row_mask = vec![0u8; padding];
        row_mask.resize(width, 1);
        mask.push(row_mask);
    }

    Ok((TokenBatch::from_rows(ids)?, AttentionMask::from_rows(mask)?))
}
