//! Unconstrained generation: a sequence stops at EOS or when the budget runs out.

use crate::batch::TokenBatch;
use crate::engine::{FinishCriteria, Model, Sequence};
use crate::tokenizer::SpecialTokens;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Continuation;

impl FinishCriteria for Continuation {
    /// Only the last column is checked: the loop never passes rows that
    /// finished on an earlier step.
    fn is_finished(&self, special: &SpecialTokens, token_ids: &TokenBatch) -> Vec<bool> {
        match token_ids.last_column() {
            Some(last) => last
                .into_iter()
                .map(|id| id == special.eos_token_id)
                .collect(),
            None => vec![false; token_ids.batch_size()],
        }
    }

    /// Strips every occurrence of the EOS text.
    fn postprocess_completions(
        &self,
        special: &SpecialTokens,
        completions: Vec<String>,
    ) -> Vec<String> {
        if special.eos_token.is_empty() {
            return completions;
        }
        completions
            .into_iter()
            .map(|completion| completion.replace(&special.eos_token, ""))
            .collect()
    }
}

pub fn continuation<M: Model>(model: M, max_tokens: Option<usize>) -> Sequence<M, Continuation> {
    Sequence::new(model, Continuation, max_tokens)
}
