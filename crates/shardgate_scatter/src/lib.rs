//! Scatter executor for the shardgate query gateway.
//!
//! Fans a single logical query out to many shards of a partitioned
//! keyspace, merges the per-shard results into one logical result, and
//! tracks multi-shard transaction state on the session across successive
//! calls. The per-shard RPC itself lives behind the [`gateway::Gateway`]
//! trait; commit and rollback of recorded shard transactions belong to the
//! [`gateway::TxnCoordinator`].

pub mod errors;
pub mod gateway;
pub mod metrics;
pub mod result;
pub mod scatter;
pub mod session;
pub mod split_query;
pub mod streaming;


pub use errors::{ErrorRecorder, ScatterError};
pub use gateway::{
    BoundQuery, EventStream, ExecuteOptions, Gateway, QuerySplit, ResultStream, SplitAlgorithm,
    StatementCategory, StreamEvent, StreamStatement, TabletCacheStatus, TxnCoordinator,
};
pub use metrics::{CounterSnapshot, MultiCounters, MultiTimings, StatsKey, TimingSnapshot};
pub use result::{
    append_result, EventToken, Field, FieldType, QueryResult, ResultExtras, Row,
};
pub use scatter::{get_shards, ScatterBatchRequest, ScatterExec, ShardBatchRequest};
pub use session::{transaction_info, SafeSession, ShardSession};
pub use split_query::{
    entropy_rng, seeded_rng, KeyRangePart, ShardPart, ShuffleRng, SplitQueryPart,
};
