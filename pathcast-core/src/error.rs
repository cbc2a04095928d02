//! Core error taxonomy.
//!
//! - `InvalidArgument`: malformed or out-of-range input, fatal to the call
//! - `NotFound`: timestamp before known range or unknown model id
//! - `InvalidState`: zero-weight ensembles, models used before they are trained
//! - `Data`: feed and persistence failures, propagated untouched to the caller
//!
//! Insufficient history is deliberately absent: the feature engine signals it
//! with `None` so callers can filter rows instead of aborting.

use thiserror::Error;

use crate::data::DataError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Data(#[from] DataError),
}

impl CoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
