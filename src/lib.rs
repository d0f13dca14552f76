//! Batched, early-stopping text generation.
//!
//! [`continuation`] builds a generator that keeps calling a [`Model`] on the
//! sequences that have not produced EOS yet, then decodes the whole batch and
//! strips the EOS text.
//!
//! ```no_run
//! use seqgen::{continuation, CandleModel, GeneratorConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = GeneratorConfig::for_model("models/Qwen2.5-0.5B-Instruct-Q4_K_M.gguf");
//! let model = CandleModel::load(&config)?;
//! let mut generator = continuation(model, Some(64));
//! let texts = generator.generate(vec!["Once upon a time", "The answer is"])?;
//! println!("{:?}", texts.into_vec());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod batch;
pub mod config;
pub mod continuation;
pub mod engine;
pub mod error;
pub mod prompting;
pub mod tokenizer;

#[cfg(test)]
mod testing;

pub use backend::{CandleModel, RuntimeModel};
pub use batch::{AttentionMask, Batch, FinishedFlags, TokenBatch};
pub use config::{BudgetMode, ConfigError, GeneratorConfig, SamplingConfig};
pub use continuation::{continuation, Continuation};
pub use engine::{Completions, FinishCriteria, GenerationState, Model, Sequence, StopReason};
pub use error::{GenerationError, Result};
pub use prompting::PromptFamily;
pub use tokenizer::{HfTokenizer, Prompts, SpecialTokens, Tokenizer};
