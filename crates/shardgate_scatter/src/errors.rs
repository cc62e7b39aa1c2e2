//! Per-call error collection and aggregation.

use std::fmt;

use parking_lot::Mutex;
use thiserror::Error;

use shardgate_common::error::{aggregate_codes, ErrorCode, GateError};

/// Thread-safe append-only error collection for one scatter call.
#[derive(Debug, Default)]
pub struct ErrorRecorder {
    errors: Mutex<Vec<GateError>>,
}

impl ErrorRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, err: GateError) {
        self.errors.lock().push(err);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    pub fn count(&self) -> usize {
        self.errors.lock().len()
    }

    /// Drain the recorded errors, in record order.
    pub fn take(&self) -> Vec<GateError> {
        std::mem::take(&mut *self.errors.lock())
    }
}

/// The aggregate failure of a scatter call.
///
/// Preserves every underlying error so callers never parse error strings;
/// `retryable` and `code` summarize the set for routing decisions.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct ScatterError {
    /// True iff every underlying error is a shard error with code
    /// `QueryNotServed` or `InternalError`, raised outside a transaction.
    pub retryable: bool,
    /// Most severe code across the underlying errors.
    pub code: ErrorCode,
    pub errors: Vec<GateError>,
}

impl fmt::Display for ScatterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl ScatterError {
    /// Classify and wrap the errors recorded during one scatter call.
    pub fn aggregate(errors: Vec<GateError>) -> Self {
        let retryable = !errors.is_empty()
            && errors.iter().all(|e| match e {
                GateError::Shard(se) => {
                    !se.in_transaction
                        && matches!(
                            se.code,
                            ErrorCode::QueryNotServed | ErrorCode::InternalError
                        )
                }
                _ => false,
            });
        let code = aggregate_codes(&errors);
        Self {
            retryable,
            code,
            errors,
        }
    }

    /// Wrap a single non-scatter failure (e.g. a direct gateway delegate).
    pub fn from_single(err: GateError) -> Self {
        Self::aggregate(vec![err])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardgate_common::error::ShardError;
    use shardgate_common::types::TabletType;

    fn shard_err(code: ErrorCode, in_transaction: bool) -> GateError {
        GateError::Shard(ShardError {
            keyspace: "ks".into(),
            shard: "-80".into(),
            tablet_type: TabletType::Primary,
            code,
            in_transaction,
            message: "fail".into(),
        })
    }

    #[test]
    fn test_recorder_collects_in_order() {
        let rec = ErrorRecorder::new();
        assert!(!rec.has_errors());
        rec.record(GateError::Internal("a".into()));
        rec.record(GateError::Internal("b".into()));
        assert!(rec.has_errors());
        assert_eq!(rec.count(), 2);
        let errs = rec.take();
        assert_eq!(errs.len(), 2);
        assert!(matches!(&errs[0], GateError::Internal(m) if m == "a"));
        assert!(!rec.has_errors());
    }

    #[test]
    fn test_recorder_concurrent_append() {
        let rec = ErrorRecorder::new();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        rec.record(GateError::Internal("x".into()));
                    }
                });
            }
        });
        assert_eq!(rec.count(), 800);
    }

    #[test]
    fn test_aggregate_all_retryable() {
        let agg = ScatterError::aggregate(vec![
            shard_err(ErrorCode::QueryNotServed, false),
            shard_err(ErrorCode::InternalError, false),
        ]);
        assert!(agg.retryable);
        assert_eq!(agg.code, ErrorCode::InternalError);
        assert_eq!(agg.errors.len(), 2);
    }

    #[test]
    fn test_aggregate_in_transaction_downgrades() {
        let agg = ScatterError::aggregate(vec![
            shard_err(ErrorCode::QueryNotServed, false),
            shard_err(ErrorCode::InternalError, true),
        ]);
        assert!(!agg.retryable);
    }

    #[test]
    fn test_aggregate_non_shard_error_downgrades() {
        let agg = ScatterError::aggregate(vec![
            shard_err(ErrorCode::QueryNotServed, false),
            GateError::Internal("coordinator hiccup".into()),
        ]);
        assert!(!agg.retryable);
    }

    #[test]
    fn test_aggregate_client_fault_downgrades() {
        let agg = ScatterError::aggregate(vec![shard_err(ErrorCode::BadInput, false)]);
        assert!(!agg.retryable);
        assert_eq!(agg.code, ErrorCode::BadInput);
    }

    #[test]
    fn test_display_concatenates_underlying() {
        let agg = ScatterError::aggregate(vec![
            GateError::Internal("first".into()),
            GateError::Internal("second".into()),
        ]);
        let s = agg.to_string();
        assert!(s.contains("first"));
        assert!(s.contains("second"));
        assert!(s.contains("; "));
    }
}
