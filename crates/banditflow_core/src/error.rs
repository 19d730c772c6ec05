//! Failure taxonomy for the experiment harness.
//!
//! Numerical instability is not an error: non-finite gains and gradients
//! travel through the trajectory and are left to the consumer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Rejected before any numeric work begins.
    #[error("configuration error: {0}")]
    Config(String),
    /// Two state-space builders disagree on structure they must share.
    #[error("consistency error: {0}")]
    Consistency(String),
}
