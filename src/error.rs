use thiserror::Error;

/// Errors surfaced by a `generate` call.
///
/// Budget exhaustion is not represented here: running out of `max_tokens`
/// is a normal way for the loop to end.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Decoding failed: {0}")]
    Decoding(String),

    #[error("Model invocation failed: {0}")]
    Model(#[source] anyhow::Error),

    #[error("max_tokens must be positive, got {0}")]
    InvalidBudget(usize),

    #[error("Batch shape violation: {0}")]
    Shape(String),
}

pub type Result<T> = std::result::Result<T, GenerationError>;
