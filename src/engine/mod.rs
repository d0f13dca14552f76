//! Batched early-stopping generation loop.
//!
//! [`Sequence`] drives a [`Model`] over a batch of prompts. Which rows are done
//! and how their decoded text is cleaned up is decided by a
//! [`FinishCriteria`]; the loop itself knows nothing about EOS or grammars.

mod lifecycle;

pub use lifecycle::{GenerationState, StopReason};

use crate::batch::{AttentionMask, TokenBatch};
use crate::config::BudgetMode;
use crate::tokenizer::{SpecialTokens, Tokenizer};

/// Next-token predictor driven by the loop.
pub trait Model {
    type Tokenizer: Tokenizer;

    fn tokenizer(&self) -> &Self::Tokenizer;

    /// Returns exactly one next-token id per row of `token_ids`.
    fn next_token_ids(
        &mut self,
        token_ids: &TokenBatch,
        attention_mask: &AttentionMask,
    ) -> anyhow::Result<Vec<u32>>;
}

impl<M: Model + ?Sized> Model for &mut M {
    type Tokenizer = M::Tokenizer;

    fn tokenizer(&self) -> &Self::Tokenizer {
        (**self).tokenizer()
    }

    fn next_token_ids(
        &mut self,
        token_ids: &TokenBatch,
        attention_mask: &AttentionMask,
    ) -> anyhow::Result<Vec<u32>> {
        (**self).next_token_ids(token_ids, attention_mask)
    }
}

/// The two hooks a generation variant supplies.
pub trait FinishCriteria {
    /// One verdict per row. Only rows that were still active before the
    /// current step are passed in, so their last column is the token that
    /// was just generated.
    fn is_finished(&self, special: &SpecialTokens, token_ids: &TokenBatch) -> Vec<bool>;

    fn postprocess_completions(
        &self,
        _special: &SpecialTokens,
        completions: Vec<String>,
    ) -> Vec<String> {
        completions
    }
}

/// Decoded output, shaped like the prompts that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completions {
    Single(String),
    Batch(Vec<String>),
}

impl Completions {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Completions::Single(text) => vec![text],
            Completions::Batch(texts) => texts,
        }
    }

    pub fn as_single(&self) -> Option<&str> {
        match self {
            Completions::Single(text) => Some(text),
            Completions::Batch(_) => None,
        }
    }
}

pub struct Sequence<M, S> {
    pub(super) model: M,
    pub(super) criteria: S,
    pub(super) max_tokens: Option<usize>,
    pub(super) budget: BudgetMode,
}

impl<M: Model, S: FinishCriteria> Sequence<M, S> {
    pub fn new(model: M, criteria: S, max_tokens: Option<usize>) -> Self {
        Self {
            model,
            criteria,
            max_tokens,
            budget: BudgetMode::default(),
        }
    }

    pub fn with_budget_mode(mut self, budget: BudgetMode) -> Self {
        self.budget = budget;
        self
    }

    pub fn max_tokens(&self) -> Option<usize> {
        self.max_tokens
    }

    pub fn budget_mode(&self) -> BudgetMode {
        self.budget
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn criteria(&self) -> &S {
        &self.criteria
    }

    pub fn into_model(self) -> M {
        self.model
    }
}
