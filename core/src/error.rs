//! Core error types for the payment channel protocol engine.
//!
//! Transport-agnostic: the gateway binary maps these onto HTTP status codes
//! the same way a domain error enum elsewhere gets mapped onto `StatusCode`
//! via `IntoResponse`, but that mapping lives at the transport boundary, not
//! here.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Channel or payment unknown locally.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not allowed from the current on-chain state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Channel's remaining capacity is less than the requested price.
    #[error("insufficient capacity: remaining {remaining}, requested {requested}")]
    InsufficientCapacity { remaining: String, requested: String },

    /// Signature, monotonicity, or channel/contract mismatch on a promise.
    #[error("invalid payment: {0}")]
    InvalidPayment(String),

    /// Parallel attempt to create a second channel for a pair, observed
    /// despite locking. Indicates external interference; treated as fatal.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transaction reverted, dropped, or exceeded timeout. Adapter error
    /// text is surfaced unchanged.
    #[error("chain error: {0}")]
    ChainError(String),

    /// Durability failure in a repository; never silently swallowed.
    #[error("storage error: {0}")]
    StorageError(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
