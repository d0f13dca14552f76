//! Test doubles shared by the unit tests.

use std::str::FromStr;

use crate::batch::{AttentionMask, TokenBatch};
use crate::engine::{FinishCriteria, Model};
use crate::error::{GenerationError, Result};
use crate::tokenizer::{pad_left, Prompts, SpecialTokens, Tokenizer};

pub const EOS: u32 = 1;
pub const PAD: u32 = 0;

/// Tokenizer over lowercase ascii: `'a'..='z'` map to ids `2..=27`.
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn eos_token(&self) -> &str {
        "<EOS>"
    }

    fn eos_token_id(&self) -> u32 {
        EOS
    }

    fn pad_token_id(&self) -> u32 {
        PAD
    }

    fn encode(&self, prompts: &Prompts) -> Result<(TokenBatch, AttentionMask)> {
        let mut rows = Vec::new();
        for prompt in prompts.as_slice() {
            if prompt.is_empty() {
                return Err(GenerationError::Encoding("empty prompt".to_string()));
            }
            rows.push(prompt.bytes().map(|b| u32::from(b - b'a') + 2).collect());
        }
        pad_left(rows, PAD)
    }

    fn decode(&self, token_ids: &TokenBatch) -> Result<Vec<String>> {
        token_ids
            .rows()
            .map(|row| {
                let mut text = String::new();
                for &id in row {
                    match id {
                        PAD => {}
                        EOS => text.push_str("<EOS>"),
                        2..=27 => text.push(char::from(b'a' + (id - 2) as u8)),
                        other => {
                            return Err(GenerationError::Decoding(format!("unknown id {}", other)))
                        }
                    }
                }
                Ok(text)
            })
            .collect()
    }
}

type Script = Box<dyn FnMut(usize, &[u32]) -> u32>;

/// Answers each row through `script(call_number, row)` and records every call.
pub struct ScriptedModel {
    pub tokenizer: CharTokenizer,
    pub script: Script,
    pub calls: usize,
    pub batch_sizes: Vec<usize>,
    pub fail_at: Option<usize>,
}

impl ScriptedModel {
    pub fn new(script: impl FnMut(usize, &[u32]) -> u32 + 'static) -> Self {
        Self {
            tokenizer: CharTokenizer,
            script: Box::new(script),
            calls: 0,
            batch_sizes: Vec::new(),
            fail_at: None,
        }
    }
}

impl Model for ScriptedModel {
    type Tokenizer = CharTokenizer;

    fn tokenizer(&self) -> &CharTokenizer {
        &self.tokenizer
    }

    fn next_token_ids(
        &mut self,
        token_ids: &TokenBatch,
        attention_mask: &AttentionMask,
    ) -> anyhow::Result<Vec<u32>> {
        assert_eq!(token_ids.batch_size(), attention_mask.batch_size());
        self.calls += 1;
        self.batch_sizes.push(token_ids.batch_size());
        if self.fail_at == Some(self.calls) {
            anyhow::bail!("device lost");
        }

        let step = self.calls;
        let script = &mut self.script;
        Ok(token_ids.rows().map(|row| script(step, row)).collect())
    }
}

/// Finishes a row when its last token is EOS, leaves text untouched.
pub struct LastIsEos;

impl FinishCriteria for LastIsEos {
    fn is_finished(&self, special: &SpecialTokens, token_ids: &TokenBatch) -> Vec<bool> {
        token_ids
            .rows()
            .map(|row| row.last() == Some(&special.eos_token_id))
            .collect()
    }
}

/// In-memory word-level tokenizer: `<pad>`=0, `</s>`=1, `<unk>`=2, words from 3.
pub fn word_level(words: &[&str]) -> tokenizers::Tokenizer {
    word_level_with(&["<pad>", "</s>", "<unk>"], words)
}

/// Word-level tokenizer whose vocabulary starts with `specials`, in order.
/// Every special except `<unk>` is registered as an added token.
pub fn word_level_with(specials: &[&str], words: &[&str]) -> tokenizers::Tokenizer {
    let mut vocab = serde_json::Map::new();
    for (i, token) in specials.iter().chain(words).enumerate() {
        vocab.insert(token.to_string(), serde_json::json!(i));
    }

    let added = |id: u32, content: &str| {
        serde_json::json!({
            "id": id,
            "content": content,
            "single_word": false,
            "lstrip": false,
            "rstrip": false,
            "normalized": false,
            "special": true
        })
    };

    let added_tokens: Vec<_> = specials
        .iter()
        .enumerate()
        .filter(|(_, t)| **t != "<unk>")
        .map(|(i, t)| added(i as u32, t))
        .collect();

    let json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added_tokens,
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "<unk>"
        }
    });

    tokenizers::Tokenizer::from_str(&json.to_string()).expect("build word-level tokenizer")
}
