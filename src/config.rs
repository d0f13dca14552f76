use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prompting::PromptFamily;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// What `max_tokens` counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetMode {
    /// Tokens appended to each sequence.
    #[default]
    Generated,
    /// Prompt plus appended tokens, measured on the padded batch width.
    Total,
}

impl BudgetMode {
    /// Number of loop steps allowed for a batch whose prompts are
    /// `prompt_len` columns wide.
    pub fn step_budget(self, max_tokens: Option<usize>, prompt_len: usize) -> Option<usize> {
        let max_tokens = max_tokens?;
        match self {
            BudgetMode::Generated => Some(max_tokens),
            BudgetMode::Total => Some(max_tokens.saturating_sub(prompt_len)),
        }
    }
}

impl std::str::FromStr for BudgetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "generated" => Ok(BudgetMode::Generated),
            "total" => Ok(BudgetMode::Total),
            other => Err(format!("Unknown budget mode '{}' (generated|total)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub seed: u64,
}

impl SamplingConfig {
    pub fn defaults_for(family: PromptFamily) -> Self {
        match family {
            PromptFamily::Mistral => Self {
                temperature: 0.7,
                top_p: 0.92,
                seed: 299_792_458,
            },
            PromptFamily::Llama | PromptFamily::Qwen | PromptFamily::Unknown => Self {
                temperature: 0.7,
                top_p: 0.9,
                seed: 299_792_458,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub model_path: PathBuf,
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
    #[serde(default)]
    pub tokenizer_repo: Option<String>,
    #[serde(default)]
    pub family: Option<PromptFamily>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub budget: BudgetMode,
    #[serde(default)]
    pub sampling: Option<SamplingConfig>,
}

impl GeneratorConfig {
    pub fn for_model(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            tokenizer_path: None,
            tokenizer_repo: None,
            family: None,
            max_tokens: None,
            budget: BudgetMode::default(),
            sampling: None,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("model_path must not be empty".to_string()));
        }
        if self.max_tokens == Some(0) {
            return Err(ConfigError::Invalid("max_tokens must be positive".to_string()));
        }
        if let Some(sampling) = &self.sampling {
            if !(0.0..=1.0).contains(&sampling.top_p) {
                return Err(ConfigError::Invalid(format!(
                    "top_p must be within [0, 1], got {}",
                    sampling.top_p
                )));
            }
            if sampling.temperature < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "temperature must not be negative, got {}",
                    sampling.temperature
                )));
            }
        }
        Ok(())
    }

    /// Configured family, else the one inferred from the model file name.
    pub fn resolved_family(&self) -> PromptFamily {
        self.family
            .unwrap_or_else(|| PromptFamily::infer_from_path(&self.model_path))
    }

    pub fn resolved_sampling(&self) -> SamplingConfig {
        self.sampling
            .unwrap_or_else(|| SamplingConfig::defaults_for(self.resolved_family()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = GeneratorConfig::from_toml_str(
            r#"model_path = "models/qwen/Qwen2.5-0.5B-Instruct-Q4_K_M.gguf""#,
        )
        .expect("parse minimal config");

        assert_eq!(cfg.budget, BudgetMode::Generated);
        assert_eq!(cfg.max_tokens, None);
        assert_eq!(cfg.resolved_family(), PromptFamily::Qwen);
        assert_eq!(cfg.resolved_sampling(), SamplingConfig::defaults_for(PromptFamily::Qwen));
    }

    #[test]
    fn full_config_round_trips_fields() {
        let cfg = GeneratorConfig::from_toml_str(
            r#"
            model_path = "model.gguf"
            tokenizer_path = "tok/tokenizer.json"
            family = "mistral"
            max_tokens = 64
            budget = "total"

            [sampling]
            temperature = 0.0
            top_p = 1.0
            seed = 7
            "#,
        )
        .expect("parse full config");

        assert_eq!(cfg.resolved_family(), PromptFamily::Mistral);
        assert_eq!(cfg.budget, BudgetMode::Total);
        assert_eq!(cfg.max_tokens, Some(64));
        assert_eq!(cfg.tokenizer_path, Some(PathBuf::from("tok/tokenizer.json")));
        assert_eq!(cfg.resolved_sampling().seed, 7);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = GeneratorConfig::from_toml_str("model_path = \"m.gguf\"\nmax_tokens = 0")
            .expect_err("zero budget");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = GeneratorConfig::from_toml_str("max_tokens = 3").expect_err("missing model");
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = GeneratorConfig::from_toml_str(
            "model_path = \"m.gguf\"\n[sampling]\ntemperature = 0.5\ntop_p = 1.5\nseed = 1",
        )
        .expect_err("top_p out of range");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn budget_modes_translate_to_steps() {
        assert_eq!(BudgetMode::Generated.step_budget(Some(8), 5), Some(8));
        assert_eq!(BudgetMode::Total.step_budget(Some(8), 5), Some(3));
        assert_eq!(BudgetMode::Total.step_budget(Some(4), 5), Some(0));
        assert_eq!(BudgetMode::Generated.step_budget(None, 5), None);
        assert_eq!("TOTAL".parse::<BudgetMode>(), Ok(BudgetMode::Total));
    }
}
