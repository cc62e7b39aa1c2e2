//! Gateway error taxonomy.
//!
//! Every error that crosses a layer boundary is a `GateError`. Each variant
//! classifies into an [`ErrorCode`], which drives three decisions:
//! - whether the error is client-caused (timed but not counted as a tablet
//!   fault),
//! - whether an aggregate of shard errors is safe to retry,
//! - which single code represents a multi-shard failure (highest severity
//!   wins).

use thiserror::Error;

use crate::types::TabletType;

/// Convenience alias for `Result<T, GateError>`.
pub type GateResult<T> = Result<T, GateError>;

/// Canonical error code attached to every classified error.
///
/// Severity ascends in the order listed by [`ErrorCode::severity`]; when
/// shard errors are aggregated the highest-severity code represents the
/// whole scatter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success,
    /// Malformed query or arguments. Client-caused.
    BadInput,
    /// Duplicate key or constraint violation. Client-caused.
    IntegrityError,
    PermissionDenied,
    /// The tablet is not serving this query right now (resharding,
    /// lameduck). Retryable when raised outside a transaction.
    QueryNotServed,
    Cancelled,
    DeadlineExceeded,
    ResourceExhausted,
    TransientError,
    /// The tablet hit an unexpected internal condition. Retryable when
    /// raised outside a transaction.
    InternalError,
    UnknownError,
}

impl ErrorCode {
    /// Rank for aggregation: higher means more severe.
    pub fn severity(&self) -> u8 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::BadInput => 1,
            ErrorCode::IntegrityError => 2,
            ErrorCode::PermissionDenied => 3,
            ErrorCode::QueryNotServed => 4,
            ErrorCode::Cancelled => 5,
            ErrorCode::DeadlineExceeded => 6,
            ErrorCode::ResourceExhausted => 7,
            ErrorCode::TransientError => 8,
            ErrorCode::InternalError => 9,
            ErrorCode::UnknownError => 10,
        }
    }

    /// Client-caused codes are timed but never counted as tablet faults.
    pub fn is_client_fault(&self) -> bool {
        matches!(self, ErrorCode::BadInput | ErrorCode::IntegrityError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::BadInput => "bad_input",
            ErrorCode::IntegrityError => "integrity_error",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::QueryNotServed => "query_not_served",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::DeadlineExceeded => "deadline_exceeded",
            ErrorCode::ResourceExhausted => "resource_exhausted",
            ErrorCode::TransientError => "transient_error",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::UnknownError => "unknown_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised by a single shard call, as reported by the gateway.
///
/// Carries the shard identity, the classified code, and whether the call
/// was inside an open transaction — the latter disqualifies the error from
/// retryable aggregation.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct ShardError {
    pub keyspace: String,
    pub shard: String,
    pub tablet_type: TabletType,
    pub code: ErrorCode,
    pub in_transaction: bool,
    pub message: String,
}

impl std::fmt::Display for ShardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "shard error on {}.{}.{} [{}]: {}",
            self.keyspace, self.shard, self.tablet_type, self.code, self.message
        )?;
        if self.in_transaction {
            f.write_str(" (in transaction)")?;
        }
        Ok(())
    }
}

/// Top-level gateway error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    #[error(transparent)]
    Shard(#[from] ShardError),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Classify into the canonical code.
    pub fn code(&self) -> ErrorCode {
        match self {
            GateError::Shard(e) => e.code,
            GateError::BadInput(_) => ErrorCode::BadInput,
            GateError::Integrity(_) => ErrorCode::IntegrityError,
            GateError::Cancelled(_) => ErrorCode::Cancelled,
            GateError::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            GateError::Config(_) => ErrorCode::BadInput,
            GateError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Most severe code across a set of errors. `UnknownError` for an empty set,
/// since an aggregate is only built when something failed.
pub fn aggregate_codes(errors: &[GateError]) -> ErrorCode {
    errors
        .iter()
        .map(|e| e.code())
        .max_by_key(|c| c.severity())
        .unwrap_or(ErrorCode::UnknownError)
}
