//! Errors the `Stack` facade surfaces to a TU (Section 7). Mostly a
//! transparent wrapper over [`uasip_dialog_core::DialogError`] and
//! [`uasip_sip_transport::Error`]; the facade only adds the handful of
//! conditions that are specific to wiring those two layers together.

use thiserror::Error;

pub type StackResult<T> = std::result::Result<T, StackError>;

#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Dialog(#[from] uasip_dialog_core::DialogError),

    #[error(transparent)]
    Transport(#[from] uasip_sip_transport::Error),

    #[error("could not resolve destination for {0}")]
    UnresolvedDestination(String),

    #[error("stack is already started")]
    AlreadyStarted,

    #[error("stack has not been started")]
    NotStarted,

    #[error("operation cancelled")]
    Cancelled,
}

impl StackError {
    /// Whether this is the "retry later" shape of error, as opposed to a
    /// hard failure of the call/subscription itself.
    pub fn is_temporary(&self) -> bool {
        match self {
            StackError::Dialog(e) => e.is_temporary(),
            _ => false,
        }
    }
}
