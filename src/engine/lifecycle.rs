use anyhow::anyhow;
use tracing::{debug, info};

use crate::batch::{AttentionMask, FinishedFlags, TokenBatch};
use crate::error::{GenerationError, Result};
use crate::tokenizer::{Prompts, SpecialTokens, Tokenizer};

use super::{Completions, FinishCriteria, Model, Sequence};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    AllFinished,
    BudgetExhausted,
}

/// Buffers owned by a single generation call.
#[derive(Debug, Clone)]
pub struct GenerationState {
    token_ids: TokenBatch,
    attention_mask: AttentionMask,
    finished: FinishedFlags,
    special: SpecialTokens,
    steps: usize,
    step_budget: Option<usize>,
    single: bool,
}

impl GenerationState {
    pub fn token_ids(&self) -> &TokenBatch {
        &self.token_ids
    }

    pub fn attention_mask(&self) -> &AttentionMask {
        &self.attention_mask
    }

    pub fn finished(&self) -> &FinishedFlags {
        &self.finished
    }

    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.special
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Number of model steps this call may take, `None` when unbounded.
    pub fn step_budget(&self) -> Option<usize> {
        self.step_budget
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        if self.finished.all() {
            return Some(StopReason::AllFinished);
        }
        match self.step_budget {
            Some(budget) if self.steps >= budget => Some(StopReason::BudgetExhausted),
            _ => None,
        }
    }

    fn step<M, S>(&mut self, model: &mut M, criteria: &S) -> Result<usize>
    where
        M: Model,
        S: FinishCriteria,
    {
        let active = self.finished.active_indices();
        if active.is_empty() {
            return Ok(0);
        }

        let active_ids = self.token_ids.select_rows(&active);
        let active_mask = self.attention_mask.select_rows(&active);

        let next = model
            .next_token_ids(&active_ids, &active_mask)
            .map_err(GenerationError::Model)?;
        if next.len() != active.len() {
            return Err(GenerationError::Model(anyhow!(
                "model returned {} token ids for {} active rows",
                next.len(),
                active.len()
            )));
        }

        // Finished rows are padded so the batch stays rectangular.
        let batch_size = self.token_ids.batch_size();
        let mut column = vec![self.special.pad_token_id; batch_size];
        let mut mask_column = vec![0u8; batch_size];
        for (&row, &id) in active.iter().zip(&next) {
            column[row] = id;
            mask_column[row] = 1;
        }
        self.token_ids.push_column(&column)?;
        self.attention_mask.push_column(&mask_column)?;
        self.steps += 1;

        let updated = self.token_ids.select_rows(&active);
        let verdicts = criteria.is_finished(&self.special, &updated);
        let newly_finished = self.finished.merge(&active, &verdicts)?;

        debug!(
            step = self.steps,
            active = active.len(),
            newly_finished,
            "Generation step"
        );
        Ok(newly_finished)
    }
}

impl<M: Model, S: FinishCriteria> Sequence<M, S> {
    /// Generates completions for one prompt or a batch of prompts.
    ///
    /// A single prompt yields [`Completions::Single`], a batch yields
    /// [`Completions::Batch`] in input order.
    pub fn generate(&mut self, prompts: impl Into<Prompts>) -> Result<Completions> {
        let mut state = self.begin(prompts)?;
        let reason = loop {
            if let Some(reason) = self.advance(&mut state)? {
                break reason;
            }
        };

        info!(
            batch_size = state.token_ids.batch_size(),
            steps = state.steps,
            ?reason,
            "Generation finished"
        );
        self.finish(state)
    }

    /// Encodes the prompts and sets up the per-call buffers.
    pub fn begin(&self, prompts: impl Into<Prompts>) -> Result<GenerationState> {
        if self.max_tokens == Some(0) {
            return Err(GenerationError::InvalidBudget(0));
        }

        let prompts = prompts.into();
        let tokenizer = self.model.tokenizer();
        let special = tokenizer.special_tokens();
        let (token_ids, attention_mask) = tokenizer.encode(&prompts)?;

        let step_budget = self
            .budget
            .step_budget(self.max_tokens, token_ids.seq_len());
        debug!(
            batch_size = token_ids.batch_size(),
            prompt_len = token_ids.seq_len(),
            ?step_budget,
            "Prompts encoded"
        );

        Ok(GenerationState {
            finished: FinishedFlags::new(token_ids.batch_size()),
            token_ids,
            attention_mask,
            special,
            steps: 0,
            step_budget,
            single: prompts.is_single(),
        })
    }

    /// Runs one step unless the call is already over.
    ///
    /// Returns the stop reason once every row is finished or the budget is
    /// spent; callers that need cancellation check their signal between
    /// calls.
    pub fn advance(&mut self, state: &mut GenerationState) -> Result<Option<StopReason>> {
        if let Some(reason) = state.stop_reason() {
            return Ok(Some(reason));
        }
        state.step(&mut self.model, &self.criteria)?;
        Ok(None)
    }

    /// Decodes the whole batch and applies the variant's postprocessing.
    pub fn finish(&self, state: GenerationState) -> Result<Completions> {
        let decoded = self
            .model
            .tokenizer()
            .decode_masked(&state.token_ids, &state.attention_mask)?;
        let mut completions = self
            .criteria
            .postprocess_completions(&state.special, decoded);

        if state.single {
            let text = completions.pop().ok_or_else(|| {
                GenerationError::Shape("no completion decoded for a single prompt".to_string())
            })?;
            Ok(Completions::Single(text))
        } else {
            Ok(Completions::Batch(completions))
        }
    }
}
