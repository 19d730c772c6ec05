//! The `banditflow_core` crate simulates the learning dynamics of a
//! memory-bounded two-armed bandit policy under continuous-time gradient
//! ascent.
//!
//! Key components:
//! - **State space**: states (reward sign + memory register), actions (arm + memory write), arms.
//! - **Master matrices**: dense `M[s, a, s']` transition tensors, one per environment.
//! - **Gradient**: averaged stationary reward rate and its gradient with respect to the logits.
//! - **Gradient flow**: adaptive-step integrator (Euler, RK4, Tsit5) yielding the trajectory lazily.
//! - **Experiment**: warm-start trials, selection, and the ram bootstrap.

pub mod error;
pub mod experiment;
pub mod gradient;
pub mod gradientflow;
pub mod master_matrix;
pub mod solvers;
pub mod state_space;
pub mod traits;

pub use error::HarnessError;
pub use experiment::{execute, Checkpoint, CheckpointSink, RunConfig, RunResult, Snapshot};
pub use solvers::Scheme;
pub use state_space::MemoryMode;
