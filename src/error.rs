//! Error types surfaced by the shell driver
//!
//! Malformed syntax never produces an error (it is run as literal text), so
//! there is no parse variant.

use thiserror::Error;

use crate::arith::ArithError;
use crate::control::ControlError;
use crate::jobs::JobError;
use crate::process::ProcessError;

#[derive(Error, Debug)]
pub enum ShellError {
    /// `$((...))` or `((...))` failed to evaluate
    #[error("Arithmetic error: {0}")]
    Expansion(#[from] ArithError),
    /// A file, pipe or process could not be set up
    #[error("{0}")]
    Resource(String),
    /// `else` without `if`, `end` without a block, malformed `for`
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("{0}")]
    Usage(String),
}

impl ShellError {
    pub fn resource(msg: impl Into<String>) -> Self {
        ShellError::Resource(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        ShellError::Usage(msg.into())
    }
}
