//! The scatter executor: parallel shard fan-out with per-session
//! transaction tracking and result aggregation.
//!
//! Every facade operation builds a target per shard and hands a shard
//! action to one of two drivers: `multi_go` for plain actions, or
//! `multi_go_transaction` for actions that may lazily open a shard
//! transaction. The drivers own deduplication, scheduling, timing, and
//! error recording; the actions own the gateway call and the merge step.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;

use shardgate_common::config::ScatterConfig;
use shardgate_common::context::CallContext;
use shardgate_common::error::{GateError, GateResult};
use shardgate_common::types::{BindVars, TabletType, Target, TxnId};

use crate::errors::{ErrorRecorder, ScatterError};
use crate::gateway::{
    BoundQuery, ExecuteOptions, Gateway, TabletCacheStatus, TxnCoordinator,
};
use crate::metrics::{MultiCounters, MultiTimings, StatsKey};
use crate::result::{append_result, QueryResult};
use crate::session::{transaction_info, SafeSession, ShardSession};
use crate::split_query::{entropy_rng, seeded_rng, ShuffleRng};

/// Fan-out plan for a batch call: per `keyspace:shard`, the queries to run
/// there and where each sub-result lands in the flat result array.
#[derive(Debug, Clone, Default)]
pub struct ScatterBatchRequest {
    /// Total length of the final result array.
    pub length: usize,
    pub requests: HashMap<String, ShardBatchRequest>,
}

/// The batch slice addressed to one shard.
#[derive(Debug, Clone)]
pub struct ShardBatchRequest {
    pub queries: Vec<BoundQuery>,
    pub keyspace: String,
    pub shard: String,
    /// Absolute position of each query's result in the final array.
    /// Parallel to `queries`.
    pub result_indexes: Vec<usize>,
}

/// Executes one logical query across many shards and merges the outcome.
pub struct ScatterExec {
    timings: MultiTimings,
    tablet_call_error_count: MultiCounters,
    txn_coordinator: Arc<dyn TxnCoordinator>,
    gateway: Arc<dyn Gateway>,
    shuffle_rng: Mutex<Box<dyn ShuffleRng>>,
    slow_call_threshold_ms: u64,
}

impl ScatterExec {
    /// Create an executor with the given timing family name. The error
    /// counter family is named by appending `ErrorCount`, or stays unnamed
    /// when `stats_name` is empty.
    pub fn new(
        stats_name: &str,
        txn_coordinator: Arc<dyn TxnCoordinator>,
        gateway: Arc<dyn Gateway>,
    ) -> Self {
        let error_count_name = if stats_name.is_empty() {
            String::new()
        } else {
            format!("{stats_name}ErrorCount")
        };
        Self {
            timings: MultiTimings::new(stats_name),
            tablet_call_error_count: MultiCounters::new(&error_count_name),
            txn_coordinator,
            gateway,
            shuffle_rng: Mutex::new(entropy_rng()),
            slow_call_threshold_ms: 0,
        }
    }

    /// Create an executor from a config section.
    pub fn from_config(
        config: &ScatterConfig,
        txn_coordinator: Arc<dyn TxnCoordinator>,
        gateway: Arc<dyn Gateway>,
    ) -> Self {
        let mut exec = Self::new(&config.stats_name, txn_coordinator, gateway);
        if let Some(seed) = config.shuffle_seed {
            exec.shuffle_rng = Mutex::new(seeded_rng(seed));
        }
        exec.slow_call_threshold_ms = config.slow_call_threshold_ms;
        exec
    }

    /// Replace the shuffler's random source, returning the previous one.
    /// Intended for tests and deterministic replay.
    pub fn set_shuffle_rng(&self, rng: Box<dyn ShuffleRng>) -> Box<dyn ShuffleRng> {
        std::mem::replace(&mut *self.shuffle_rng.lock(), rng)
    }

    pub(crate) fn shuffle_rng(&self) -> &Mutex<Box<dyn ShuffleRng>> {
        &self.shuffle_rng
    }

    pub(crate) fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// Timing family for export.
    pub fn timings(&self) -> &MultiTimings {
        &self.timings
    }

    /// Tablet fault counter family for export.
    pub fn error_counters(&self) -> &MultiCounters {
        &self.tablet_call_error_count
    }

    // ── Driver internals ────────────────────────────────────────────────

    fn start_action(&self, op_name: &str, target: &Target) -> (Instant, StatsKey) {
        (Instant::now(), StatsKey::new(op_name, target))
    }

    /// Record the end of one shard action: error bookkeeping first, then
    /// exactly one timing sample.
    pub(crate) fn end_action(
        &self,
        start: Instant,
        recorder: &ErrorRecorder,
        stats_key: &StatsKey,
        err: Option<GateError>,
    ) {
        if let Some(err) = err {
            let code = err.code();
            if code.is_client_fault() {
                // Caused by the client's query, not the tablet's fault:
                // timed, but not counted.
                tracing::debug!(
                    operation = %stats_key.operation,
                    shard = %stats_key.shard,
                    code = %code,
                    "shard action rejected: {err}"
                );
            } else {
                tracing::warn!(
                    operation = %stats_key.operation,
                    keyspace = %stats_key.keyspace,
                    shard = %stats_key.shard,
                    code = %code,
                    "shard action failed: {err}"
                );
                self.tablet_call_error_count.add(stats_key, 1);
            }
            recorder.record(err);
        }
        self.timings.record(stats_key, start);
        if self.slow_call_threshold_ms > 0 {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            if elapsed_ms >= self.slow_call_threshold_ms {
                tracing::warn!(
                    operation = %stats_key.operation,
                    keyspace = %stats_key.keyspace,
                    shard = %stats_key.shard,
                    elapsed_ms,
                    "slow shard call"
                );
            }
        }
    }

    /// Run `action` once per distinct shard, in parallel, collecting
    /// errors. A single distinct shard runs on the calling thread — no
    /// spawn, no barrier — which both avoids overhead and keeps a
    /// deterministic stack for single-shard callers.
    pub(crate) fn multi_go<F>(
        &self,
        op_name: &str,
        keyspace: &str,
        shards: &[String],
        tablet_type: TabletType,
        action: F,
    ) -> ErrorRecorder
    where
        F: Fn(&Target) -> GateResult<()> + Sync,
    {
        let recorder = ErrorRecorder::new();
        let unique: HashSet<&String> = shards.iter().collect();
        if unique.is_empty() {
            return recorder;
        }

        let run_one = |shard: &str| {
            let target = Target::new(keyspace, shard, tablet_type);
            let (start, stats_key) = self.start_action(op_name, &target);
            let result = action(&target);
            self.end_action(start, &recorder, &stats_key, result.err());
        };

        if unique.len() == 1 {
            if let Some(shard) = unique.into_iter().next() {
                run_one(shard);
            }
            return recorder;
        }

        thread::scope(|s| {
            let handles: Vec<_> = unique
                .into_iter()
                .map(|shard| {
                    let run_one = &run_one;
                    s.spawn(move || run_one(shard))
                })
                .collect();
            for handle in handles {
                if handle.join().is_err() {
                    recorder.record(GateError::Internal(
                        "shard worker panicked during scatter".to_string(),
                    ));
                }
            }
        });
        recorder
    }

    /// Like `multi_go`, for actions that may participate in the session's
    /// transaction. Before each action the session decides begin/reuse/skip;
    /// afterwards a newly minted shard transaction is appended to the
    /// session even if the action also failed, so a later rollback can
    /// reach it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn multi_go_transaction<F>(
        &self,
        op_name: &str,
        keyspace: &str,
        shards: &[String],
        tablet_type: TabletType,
        session: &SafeSession,
        not_in_transaction: bool,
        action: F,
    ) -> ErrorRecorder
    where
        F: Fn(&Target, bool, TxnId) -> (TxnId, GateResult<()>) + Sync,
    {
        let recorder = ErrorRecorder::new();
        let unique: HashSet<&String> = shards.iter().collect();
        if unique.is_empty() {
            return recorder;
        }

        let run_one = |shard: &str| {
            let target = Target::new(keyspace, shard, tablet_type);
            let (start, stats_key) = self.start_action(op_name, &target);
            let (should_begin, transaction_id) =
                transaction_info(&target, session, not_in_transaction);
            let (new_transaction_id, result) = action(&target, should_begin, transaction_id);
            if should_begin && new_transaction_id != 0 {
                session.append(ShardSession {
                    target: target.clone(),
                    transaction_id: new_transaction_id,
                });
            }
            self.end_action(start, &recorder, &stats_key, result.err());
        };

        if unique.len() == 1 {
            if let Some(shard) = unique.into_iter().next() {
                run_one(shard);
            }
            return recorder;
        }

        thread::scope(|s| {
            let handles: Vec<_> = unique
                .into_iter()
                .map(|shard| {
                    let run_one = &run_one;
                    s.spawn(move || run_one(shard))
                })
                .collect();
            for handle in handles {
                if handle.join().is_err() {
                    recorder.record(GateError::Internal(
                        "shard worker panicked during scatter".to_string(),
                    ));
                }
            }
        });
        recorder
    }

    /// Shared tail of every transactional facade: aggregate errors, ask the
    /// coordinator to roll back recorded shard transactions, and surface
    /// the aggregate.
    pub(crate) fn finish_transactional(
        &self,
        ctx: &CallContext,
        session: &SafeSession,
        recorder: ErrorRecorder,
    ) -> Result<(), ScatterError> {
        if !recorder.has_errors() {
            return Ok(());
        }
        let err = ScatterError::aggregate(recorder.take());
        tracing::warn!(
            request_id = ctx.request_id,
            code = %err.code,
            retryable = err.retryable,
            "scatter call failed, requesting rollback"
        );
        self.txn_coordinator.rollback_if_needed(ctx, &err, session);
        Err(err)
    }

    // ── Facade operations ───────────────────────────────────────────────

    /// Execute a non-streaming query on the given shards, with common bind
    /// variables.
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        ctx: &CallContext,
        sql: &str,
        bind_vars: &BindVars,
        keyspace: &str,
        shards: &[String],
        tablet_type: TabletType,
        session: &SafeSession,
        not_in_transaction: bool,
        options: Option<&ExecuteOptions>,
    ) -> Result<QueryResult, ScatterError> {
        let qr = Mutex::new(QueryResult::default());
        let recorder = self.multi_go_transaction(
            "Execute",
            keyspace,
            shards,
            tablet_type,
            session,
            not_in_transaction,
            |target, should_begin, transaction_id| {
                let (transaction_id, inner) = if should_begin {
                    let (new_id, result) =
                        self.gateway
                            .begin_execute(ctx, target, sql, bind_vars, options);
                    match result {
                        Ok(r) => (new_id, r),
                        Err(e) => return (new_id, Err(e)),
                    }
                } else {
                    match self
                        .gateway
                        .execute(ctx, target, sql, bind_vars, transaction_id, options)
                    {
                        Ok(r) => (transaction_id, r),
                        Err(e) => return (transaction_id, Err(e)),
                    }
                };
                append_result(&mut qr.lock(), &inner);
                (transaction_id, Ok(()))
            },
        );
        self.finish_transactional(ctx, session, recorder)?;
        Ok(qr.into_inner())
    }

    /// Like `execute`, but each shard gets its own bind variables. The
    /// shard list is the key set of `shard_vars`.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_multi(
        &self,
        ctx: &CallContext,
        sql: &str,
        keyspace: &str,
        shard_vars: &HashMap<String, BindVars>,
        tablet_type: TabletType,
        session: &SafeSession,
        not_in_transaction: bool,
        options: Option<&ExecuteOptions>,
    ) -> Result<QueryResult, ScatterError> {
        let qr = Mutex::new(QueryResult::default());
        let recorder = self.multi_go_transaction(
            // Rolled up under "Execute" with the common-bind-vars path.
            "Execute",
            keyspace,
            &get_shards(shard_vars),
            tablet_type,
            session,
            not_in_transaction,
            |target, should_begin, transaction_id| {
                let bind_vars = &shard_vars[target.shard.as_str()];
                let (transaction_id, inner) = if should_begin {
                    let (new_id, result) =
                        self.gateway
                            .begin_execute(ctx, target, sql, bind_vars, options);
                    match result {
                        Ok(r) => (new_id, r),
                        Err(e) => return (new_id, Err(e)),
                    }
                } else {
                    match self
                        .gateway
                        .execute(ctx, target, sql, bind_vars, transaction_id, options)
                    {
                        Ok(r) => (transaction_id, r),
                        Err(e) => return (transaction_id, Err(e)),
                    }
                };
                append_result(&mut qr.lock(), &inner);
                (transaction_id, Ok(()))
            },
        );
        self.finish_transactional(ctx, session, recorder)?;
        Ok(qr.into_inner())
    }

    /// Execute shard-specific queries: each shard gets its own SQL and bind
    /// variables.
    ///
    /// Panics if a shard in `shards` has no entry in `sqls` or `bind_vars`
    /// — that is a routing bug in the caller, not a user error.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_entity_ids(
        &self,
        ctx: &CallContext,
        shards: &[String],
        sqls: &HashMap<String, String>,
        bind_vars: &HashMap<String, BindVars>,
        keyspace: &str,
        tablet_type: TabletType,
        session: &SafeSession,
        not_in_transaction: bool,
        options: Option<&ExecuteOptions>,
    ) -> Result<QueryResult, ScatterError> {
        let qr = Mutex::new(QueryResult::default());
        let recorder = self.multi_go_transaction(
            "ExecuteEntityIds",
            keyspace,
            shards,
            tablet_type,
            session,
            not_in_transaction,
            |target, should_begin, transaction_id| {
                let sql = &sqls[target.shard.as_str()];
                let shard_bind_vars = &bind_vars[target.shard.as_str()];
                let (transaction_id, inner) = if should_begin {
                    let (new_id, result) =
                        self.gateway
                            .begin_execute(ctx, target, sql, shard_bind_vars, options);
                    match result {
                        Ok(r) => (new_id, r),
                        Err(e) => return (new_id, Err(e)),
                    }
                } else {
                    match self.gateway.execute(
                        ctx,
                        target,
                        sql,
                        shard_bind_vars,
                        transaction_id,
                        options,
                    ) {
                        Ok(r) => (transaction_id, r),
                        Err(e) => return (transaction_id, Err(e)),
                    }
                };
                append_result(&mut qr.lock(), &inner);
                (transaction_id, Ok(()))
            },
        );
        self.finish_transactional(ctx, session, recorder)?;
        Ok(qr.into_inner())
    }

    /// Execute a batch of non-streaming queries. Each per-shard sub-result
    /// is merged into its designated slot of the flat result array, so
    /// multiple batch items addressing the same slot combine correctly.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_batch(
        &self,
        ctx: &CallContext,
        batch_request: &ScatterBatchRequest,
        tablet_type: TabletType,
        as_transaction: bool,
        session: &SafeSession,
        options: Option<&ExecuteOptions>,
    ) -> Result<Vec<QueryResult>, ScatterError> {
        let recorder = ErrorRecorder::new();
        let results = Mutex::new(vec![QueryResult::default(); batch_request.length]);

        thread::scope(|s| {
            let handles: Vec<_> = batch_request
                .requests
                .values()
                .map(|req| {
                    let recorder = &recorder;
                    let results = &results;
                    s.spawn(move || {
                        let target = Target::new(&req.keyspace, &req.shard, tablet_type);
                        let (start, stats_key) = self.start_action("ExecuteBatch", &target);
                        let (should_begin, transaction_id) =
                            transaction_info(&target, session, false);
                        let outcome = if should_begin {
                            let (new_transaction_id, result) = self.gateway.begin_execute_batch(
                                ctx,
                                &target,
                                &req.queries,
                                as_transaction,
                                options,
                            );
                            if new_transaction_id != 0 {
                                session.append(ShardSession {
                                    target: target.clone(),
                                    transaction_id: new_transaction_id,
                                });
                            }
                            result
                        } else {
                            self.gateway.execute_batch(
                                ctx,
                                &target,
                                &req.queries,
                                as_transaction,
                                transaction_id,
                                options,
                            )
                        };
                        match outcome {
                            Ok(inner_results) => {
                                let mut slots = results.lock();
                                for (i, inner) in inner_results.iter().enumerate() {
                                    append_result(&mut slots[req.result_indexes[i]], inner);
                                }
                                drop(slots);
                                self.end_action(start, recorder, &stats_key, None);
                            }
                            Err(e) => self.end_action(start, recorder, &stats_key, Some(e)),
                        }
                    })
                })
                .collect();
            for handle in handles {
                if handle.join().is_err() {
                    recorder.record(GateError::Internal(
                        "shard worker panicked during batch scatter".to_string(),
                    ));
                }
            }
        });

        // Roll back before handing results out, so the session reflects the
        // aborted transaction by the time the caller observes the error.
        self.finish_transactional(ctx, session, recorder)?;
        Ok(results.into_inner())
    }

    /// Close the underlying gateway.
    pub fn close(&self, ctx: &CallContext) -> GateResult<()> {
        self.gateway.close(ctx)
    }

    /// Displayable view of the gateway's tablet cache.
    pub fn cache_status(&self) -> Vec<TabletCacheStatus> {
        self.gateway.cache_status()
    }
}

/// Key set of a per-shard map, as the shard list for a fan-out.
pub fn get_shards(shard_vars: &HashMap<String, BindVars>) -> Vec<String> {
    shard_vars.keys().cloned().collect()
}
