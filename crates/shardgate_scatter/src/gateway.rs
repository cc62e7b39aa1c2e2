//! External collaborators consumed by the scatter executor.
//!
//! The [`Gateway`] hides per-tablet discovery and failover behind a
//! sync, pull-based call surface: each method addresses one target and
//! either returns a complete result or hands back a stream the caller
//! drains. The [`TxnCoordinator`] undoes work recorded in the session when
//! a scatter call fails mid-transaction.

use serde::{Deserialize, Serialize};

use shardgate_common::context::CallContext;
use shardgate_common::error::GateResult;
use shardgate_common::types::{BindVars, Target, TxnId};

use crate::errors::ScatterError;
use crate::result::{EventToken, QueryResult};
use crate::session::SafeSession;

/// A query with its bind variables, ready to send to a shard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundQuery {
    pub sql: String,
    pub bind_variables: BindVars,
}

impl BoundQuery {
    pub fn new(sql: &str, bind_variables: BindVars) -> Self {
        Self {
            sql: sql.to_string(),
            bind_variables,
        }
    }
}

/// One slice of a split query, with the shard's row-count estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySplit {
    pub query: BoundQuery,
    pub row_count: i64,
}

/// Splitting algorithm requested from the shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitAlgorithm {
    EqualSplits,
    FullScan,
}

/// Per-call execution options forwarded to the shard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOptions {
    /// Ask the shard to attach its replication-position token to results.
    #[serde(default)]
    pub include_event_token: bool,
    /// Ask the shard to report whether the read is at or after this token.
    #[serde(default)]
    pub compare_event_token: Option<EventToken>,
}

/// Statement category inside an update-stream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementCategory {
    Dml,
    Ddl,
    Error,
}

/// One statement carried by an update-stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatement {
    pub category: StatementCategory,
    pub sql: String,
}

/// One event from a shard's update stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub statements: Vec<StreamStatement>,
    #[serde(default)]
    pub event_token: Option<EventToken>,
}

/// Displayable health/usage entry for one tablet the gateway talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabletCacheStatus {
    pub target: Target,
    /// Address of the tablet currently serving the target.
    pub tablet_addr: String,
    pub query_count: u64,
    pub query_error_count: u64,
}

/// A pull-based stream of result packets from one shard.
///
/// `recv` blocks until the next packet, the end of the stream
/// (`Ok(None)`), or a failure. End of stream is not an error.
pub trait ResultStream: Send {
    fn recv(&mut self) -> GateResult<Option<QueryResult>>;
}

/// A pull-based stream of update events from one shard.
pub trait EventStream: Send {
    fn recv(&mut self) -> GateResult<Option<StreamEvent>>;
}

/// The per-shard RPC surface, abstracted over tablet failover.
///
/// `begin_execute` and `begin_execute_batch` return the minted transaction
/// id alongside the execution outcome: a transaction may have been opened
/// even when the execution itself failed, and the caller must record it so
/// the coordinator can roll it back.
pub trait Gateway: Send + Sync {
    fn execute(
        &self,
        ctx: &CallContext,
        target: &Target,
        sql: &str,
        bind_vars: &BindVars,
        transaction_id: TxnId,
        options: Option<&ExecuteOptions>,
    ) -> GateResult<QueryResult>;

    fn begin_execute(
        &self,
        ctx: &CallContext,
        target: &Target,
        sql: &str,
        bind_vars: &BindVars,
        options: Option<&ExecuteOptions>,
    ) -> (TxnId, GateResult<QueryResult>);

    fn execute_batch(
        &self,
        ctx: &CallContext,
        target: &Target,
        queries: &[BoundQuery],
        as_transaction: bool,
        transaction_id: TxnId,
        options: Option<&ExecuteOptions>,
    ) -> GateResult<Vec<QueryResult>>;

    fn begin_execute_batch(
        &self,
        ctx: &CallContext,
        target: &Target,
        queries: &[BoundQuery],
        as_transaction: bool,
        options: Option<&ExecuteOptions>,
    ) -> (TxnId, GateResult<Vec<QueryResult>>);

    fn stream_execute(
        &self,
        ctx: &CallContext,
        target: &Target,
        sql: &str,
        bind_vars: &BindVars,
        options: Option<&ExecuteOptions>,
    ) -> GateResult<Box<dyn ResultStream>>;

    fn split_query(
        &self,
        ctx: &CallContext,
        target: &Target,
        query: &BoundQuery,
        split_column: &str,
        split_count: i64,
    ) -> GateResult<Vec<QuerySplit>>;

    #[allow(clippy::too_many_arguments)]
    fn split_query_v2(
        &self,
        ctx: &CallContext,
        target: &Target,
        query: &BoundQuery,
        split_columns: &[String],
        per_shard_split_count: i64,
        num_rows_per_query_part: i64,
        algorithm: SplitAlgorithm,
    ) -> GateResult<Vec<QuerySplit>>;

    fn update_stream(
        &self,
        ctx: &CallContext,
        target: &Target,
        position: &str,
        timestamp: i64,
    ) -> GateResult<Box<dyn EventStream>>;

    fn close(&self, ctx: &CallContext) -> GateResult<()>;

    fn cache_status(&self) -> Vec<TabletCacheStatus>;
}

/// Rolls back the shard transactions recorded in a session after a failed
/// scatter call.
///
/// Implementations are idempotent and swallow rollback failures (logging
/// them) — the caller's error is the scatter failure, not the cleanup.
pub trait TxnCoordinator: Send + Sync {
    fn rollback_if_needed(&self, ctx: &CallContext, err: &ScatterError, session: &SafeSession);
}
