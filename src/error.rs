//! Error handling for the tax engine
//!
//! Defines the error taxonomy for position validation and recomputation
//! guards, and establishes a unified Result type using anyhow for context
//! chaining and error propagation.

use thiserror::Error;

/// Core error types for tax engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// A position failed boundary validation and was rejected before
    /// entering aggregation. Never silently corrected.
    #[error("invalid position {ticker} closed {closed_at}: {reason}")]
    InvalidPosition {
        ticker: String,
        closed_at: String,
        reason: String,
    },

    /// The submitted history omits positions seen by a previous
    /// computation. Carried-forward balances would silently diverge, so
    /// this is rejected unless a full recompute is explicitly requested.
    #[error(
        "non-monotonic history for {bucket}: {submitted} positions submitted, \
         {previously_seen} previously seen (re-run with --force for a full recompute)"
    )]
    NonMonotonicHistory {
        bucket: String,
        submitted: usize,
        previously_seen: usize,
    },

    #[error("unknown competency month: {0}")]
    BadMonth(String),

    #[error("database error: {0}")]
    Db(String),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tax engine operations
pub type Result<T> = anyhow::Result<T>;
