//! Dialog and transaction error kinds (Section 7).

use thiserror::Error;

pub type DialogResult<T> = std::result::Result<T, DialogError>;

#[derive(Debug, Error, Clone)]
pub enum DialogError {
    #[error("invalid message: {0}")]
    ProtocolError(String),

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("CSeq out of order: {0}")]
    CSeqOutOfOrder(String),

    #[error("dialog not found: {0}")]
    DialogNotFound(String),

    #[error("dialog already exists: {0}")]
    DialogAlreadyExists(String),

    #[error("dialog already terminated: {0}")]
    DialogTerminated(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("transaction timed out: {0}")]
    TimeoutError(String),

    #[error("transaction error: {0}")]
    TransactionError(String),

    #[error("transport failure (temporary={temporary}): {message}")]
    NetworkError { message: String, temporary: bool },

    #[error("routing error: {0}")]
    RoutingError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("REFER already pending on this dialog")]
    ReferPending,

    #[error("REFER rejected: {0}")]
    ReferRejected(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    InternalError(String),
}

impl DialogError {
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        DialogError::ProtocolError(msg.into())
    }

    pub fn protocol_error(msg: impl Into<String>) -> Self {
        DialogError::ProtocolError(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        DialogError::InvalidState(msg.into())
    }

    pub fn cseq_out_of_order(msg: impl Into<String>) -> Self {
        DialogError::CSeqOutOfOrder(msg.into())
    }

    pub fn dialog_not_found(id: impl Into<String>) -> Self {
        DialogError::DialogNotFound(id.into())
    }

    pub fn dialog_already_exists(id: impl Into<String>) -> Self {
        DialogError::DialogAlreadyExists(id.into())
    }

    pub fn dialog_terminated(id: impl Into<String>) -> Self {
        DialogError::DialogTerminated(id.into())
    }

    pub fn transaction_not_found(id: impl Into<String>) -> Self {
        DialogError::TransactionNotFound(id.into())
    }

    pub fn transaction_timeout(id: impl Into<String>) -> Self {
        DialogError::TimeoutError(id.into())
    }

    pub fn transport_failure(msg: impl Into<String>, temporary: bool) -> Self {
        DialogError::NetworkError {
            message: msg.into(),
            temporary,
        }
    }

    pub fn routing_error(msg: impl Into<String>) -> Self {
        DialogError::RoutingError(msg.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        DialogError::InternalError(msg.into())
    }

    /// Whether a caller may reasonably retry after this error, as opposed to
    /// treating it as a hard dialog failure.
    pub fn is_temporary(&self) -> bool {
        matches!(self, DialogError::NetworkError { temporary: true, .. })
    }
}

impl From<uasip_sip_transport::Error> for DialogError {
    fn from(err: uasip_sip_transport::Error) -> Self {
        let temporary = matches!(err, uasip_sip_transport::Error::WriteFailed(..) | uasip_sip_transport::Error::Io(..));
        DialogError::transport_failure(err.to_string(), temporary)
    }
}

impl From<uasip_sip_types::Error> for DialogError {
    fn from(err: uasip_sip_types::Error) -> Self {
        DialogError::ProtocolError(err.to_string())
    }
}
