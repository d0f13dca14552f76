use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptFamily {
    Llama,
    Qwen,
    Mistral,
    #[default]
    Unknown,
}

impl PromptFamily {
    /// End-of-sequence markers, most specific first.
    pub fn eos_markers(self) -> &'static [&'static str] {
        match self {
            PromptFamily::Llama => &["<|end_of_text|>", "</s>"],
            PromptFamily::Qwen => &["<|endoftext|>", "</s>"],
            PromptFamily::Mistral => &["</s>", "<|end_of_text|>"],
            PromptFamily::Unknown => &["<|end_of_text|>", "</s>", "<|endoftext|>"],
        }
    }

    pub fn pad_markers(self) -> &'static [&'static str] {
        match self {
            PromptFamily::Llama => &["<|finetune_right_pad_id|>", "<pad>"],
            PromptFamily::Qwen => &["<|pad|>", "<pad>"],
            PromptFamily::Mistral | PromptFamily::Unknown => &["<pad>", "[PAD]", "<|pad|>"],
        }
    }

    pub fn infer_from_filename(name: &str) -> Self {
        let lowered = name.to_lowercase();
        if lowered.contains("llama") {
            PromptFamily::Llama
        } else if lowered.contains("qwen") {
            PromptFamily::Qwen
        } else if lowered.contains("mistral") || lowered.contains("mixtral") {
            PromptFamily::Mistral
        } else {
            PromptFamily::Unknown
        }
    }

    pub fn infer_from_path(path: &Path) -> Self {
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(Self::infer_from_filename)
            .unwrap_or(PromptFamily::Unknown)
    }
}

impl std::str::FromStr for PromptFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "llama" => Ok(PromptFamily::Llama),
            "qwen" => Ok(PromptFamily::Qwen),
            "mistral" => Ok(PromptFamily::Mistral),
            "unknown" => Ok(PromptFamily::Unknown),
            other => Err(format!("Unknown model family '{}'", other)),
        }
    }
}
