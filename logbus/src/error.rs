use thiserror::Error;

/// Stable error codes, used both for whole-call failures and for the
/// per-partition / per-message error slots on results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorCode {
    #[error("outbound queue is full")]
    QueueFull,
    #[error("message is not valid")]
    InvalidMessage,
    #[error("client is closed")]
    ClientClosed,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("operation not valid in current state")]
    InvalidState,
    #[error("partition is not part of the current assignment")]
    UnknownPartition,
    #[error("unknown topic")]
    UnknownTopic,
    #[error("unknown group")]
    UnknownGroup,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("operation cancelled")]
    Cancelled,
    #[error("commit generation superseded")]
    StaleGeneration,
    #[error("topic already exists")]
    TopicAlreadyExists,
    #[error("resource not found")]
    NotFound,
    #[error("offset out of range")]
    OffsetOutOfRange,
    #[error("engine failure")]
    Engine,
}

/// Library error: a stable [`ErrorCode`] plus optional human context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("{0}")]
    Code(ErrorCode),
    #[error("{code}: {detail}")]
    Detailed { code: ErrorCode, detail: String },
}

impl ClientError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        ClientError::Detailed {
            code,
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::Code(code) => *code,
            ClientError::Detailed { code, .. } => *code,
        }
    }

    pub fn closed() -> Self {
        ClientError::Code(ErrorCode::ClientClosed)
    }

    pub fn deadline_exceeded() -> Self {
        ClientError::Code(ErrorCode::DeadlineExceeded)
    }
}

impl From<ErrorCode> for ClientError {
    fn from(code: ErrorCode) -> Self {
        ClientError::Code(code)
    }
}
