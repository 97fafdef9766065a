//! Policy error types.

use thiserror::Error;

use workpool_model::ItemId;

/// Errors that can occur while balancing.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The item's move effector failed. The model may already disagree with
    /// reality at this point; the current pass is abandoned and the next one
    /// retries from current model state.
    #[error("move effector failed for item {item}: {source}")]
    MoveFailed {
        item: ItemId,
        #[source]
        source: anyhow::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] anyhow::Error),
}

pub type PolicyResult<T> = Result<T, PolicyError>;
