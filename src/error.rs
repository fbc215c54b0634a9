use std::fmt;

use thiserror::Error;

/// Why a callback failed to apply one operation to live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationFailureKind {
    /// The callback reported a failure without a reason. Treated as a bug.
    None,
    General,
    TargetNotFound,
    NotAcceptable,
    Conflict,
    Unknown,
}

impl OperationFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationFailureKind::None => "none",
            OperationFailureKind::General => "general",
            OperationFailureKind::TargetNotFound => "target not found",
            OperationFailureKind::NotAcceptable => "not acceptable",
            OperationFailureKind::Conflict => "conflict",
            OperationFailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OperationFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by an appended-operation callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} failure: {message}")]
pub struct OperationFailure {
    pub kind: OperationFailureKind,
    pub message: String,
}

impl OperationFailure {
    pub fn new(kind: OperationFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self::new(OperationFailureKind::General, message)
    }

    pub fn target_not_found(message: impl Into<String>) -> Self {
        Self::new(OperationFailureKind::TargetNotFound, message)
    }

    pub fn not_acceptable(message: impl Into<String>) -> Self {
        Self::new(OperationFailureKind::NotAcceptable, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(OperationFailureKind::Conflict, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(OperationFailureKind::Unknown, message)
    }
}

/// The kind of failure an append or retrieve call reports to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterError {
    None,
    Internal,
    InvalidSeq,
    SeqConflict,
    InvalidContent,
    GeneralFailure,
    TargetNotFoundFailure,
    NotAcceptableFailure,
    ConflictFailure,
    UnknownFailure,
}

impl ClusterError {
    pub fn of<T>(res: &Result<T, OpLogError>) -> ClusterError {
        match res {
            Ok(_) => ClusterError::None,
            Err(e) => e.cluster_error(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterError::None => "none",
            ClusterError::Internal => "internal",
            ClusterError::InvalidSeq => "invalid sequence",
            ClusterError::SeqConflict => "sequence conflict",
            ClusterError::InvalidContent => "invalid content",
            ClusterError::GeneralFailure => "general failure",
            ClusterError::TargetNotFoundFailure => "target not found failure",
            ClusterError::NotAcceptableFailure => "not acceptable failure",
            ClusterError::ConflictFailure => "conflict failure",
            ClusterError::UnknownFailure => "unknown failure",
        }
    }

    /// The caller asked for the wrong start sequence; refresh `max_seq` and retry.
    pub fn is_sequence_error(&self) -> bool {
        matches!(self, ClusterError::InvalidSeq | ClusterError::SeqConflict)
    }
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<OperationFailureKind> for ClusterError {
    fn from(kind: OperationFailureKind) -> Self {
        match kind {
            // a callback failing without a reason breaks its contract
            OperationFailureKind::None => ClusterError::Internal,
            OperationFailureKind::General => ClusterError::GeneralFailure,
            OperationFailureKind::TargetNotFound => ClusterError::TargetNotFoundFailure,
            OperationFailureKind::NotAcceptable => ClusterError::NotAcceptableFailure,
            OperationFailureKind::Conflict => ClusterError::ConflictFailure,
            OperationFailureKind::Unknown => ClusterError::UnknownFailure,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("commit rejected by store")]
    CommitRejected,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("operation content is empty")]
    Empty,
    #[error("operation carries {0} contents, exactly one is allowed")]
    Multiple(usize),
}

#[derive(Error, Debug)]
pub enum OpLogError {
    #[error("invalid sequential operation: sequence starts at 1")]
    ZeroSequence,
    #[error("invalid sequential operation: start sequence {start_seq}, expected {expected}")]
    InvalidSeq { start_seq: u64, expected: u64 },
    #[error("operation conflict: start sequence {start_seq}, expected {expected}")]
    SeqConflict { start_seq: u64, expected: u64 },
    #[error("operation (sequence={seq}) is invalid: {source}")]
    InvalidContent { seq: u64, source: ContentError },
    #[error("operation (sequence={seq}) failed in callback {callback}: {failure}")]
    OperationFailed {
        seq: u64,
        callback: String,
        failure: OperationFailure,
    },
    #[error("sequence space exhausted at max sequence {max_seq}")]
    SeqOverflow { max_seq: u64 },
    #[error("operation (sequence={seq}) missing below max sequence {max_seq}")]
    MissingEntry { seq: u64, max_seq: u64 },
    #[error("codec operation (sequence={seq}) failed: {source}")]
    Codec {
        seq: u64,
        source: serde_json::Error,
    },
    #[error("commit transaction failed: {0}")]
    Commit(StoreError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl OpLogError {
    pub fn cluster_error(&self) -> ClusterError {
        match self {
            OpLogError::InvalidSeq { .. } => ClusterError::InvalidSeq,
            OpLogError::SeqConflict { .. } => ClusterError::SeqConflict,
            OpLogError::InvalidContent { .. } => ClusterError::InvalidContent,
            OpLogError::OperationFailed { failure, .. } => failure.kind.into(),
            OpLogError::ZeroSequence
            | OpLogError::SeqOverflow { .. }
            | OpLogError::MissingEntry { .. }
            | OpLogError::Codec { .. }
            | OpLogError::Commit(_)
            | OpLogError::Store(_) => ClusterError::Internal,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file")]
    FailedToRead,
    #[error("invalid toml")]
    InvalidToml,
    #[error("invalid configuration: {0}")]
    InvalidValue(String),
}
