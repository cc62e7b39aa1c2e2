//! Split-query fan-out: break a large read into independent per-shard
//! parts suitable for parallel map-reduce consumption, then shuffle the
//! aggregated parts.
//!
//! Shuffling matters because downstream frameworks deal parts to workers
//! in list order; without it, every worker starts on the first shard and
//! load clusters shard by shard.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use shardgate_common::context::CallContext;
use shardgate_common::error::GateResult;
use shardgate_common::types::{BindVars, KeyRange, TabletType};

use crate::errors::ScatterError;
use crate::gateway::{BoundQuery, QuerySplit, SplitAlgorithm};
use crate::scatter::ScatterExec;

/// Placement of a query part by key range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRangePart {
    pub keyspace: String,
    pub key_ranges: Vec<KeyRange>,
}

/// Placement of a query part by shard name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardPart {
    pub keyspace: String,
    pub shards: Vec<String>,
}

/// One independently executable slice of a split query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitQueryPart {
    pub query: BoundQuery,
    pub key_range_part: Option<KeyRangePart>,
    pub shard_part: Option<ShardPart>,
    /// Row-count estimate reported by the shard.
    pub size: i64,
}

/// Random source for the part shuffler. Narrow on purpose so tests can
/// substitute a deterministic sequence.
pub trait ShuffleRng: Send {
    /// A uniformly distributed index in `0..bound`. `bound` is at least 1.
    fn next_index(&mut self, bound: usize) -> usize;
}

struct StdShuffleRng(StdRng);

impl ShuffleRng for StdShuffleRng {
    fn next_index(&mut self, bound: usize) -> usize {
        self.0.gen_range(0..bound)
    }
}

/// The default shuffler source, seeded from OS entropy.
pub fn entropy_rng() -> Box<dyn ShuffleRng> {
    Box::new(StdShuffleRng(StdRng::from_entropy()))
}

/// A reproducible shuffler source for replay and tests.
pub fn seeded_rng(seed: u64) -> Box<dyn ShuffleRng> {
    Box::new(StdShuffleRng(StdRng::seed_from_u64(seed)))
}

/// In-place Fisher–Yates: a uniformly distributed permutation of `parts`.
pub(crate) fn shuffle_parts(rng: &mut dyn ShuffleRng, parts: &mut [SplitQueryPart]) {
    for i in 0..parts.len() {
        let j = rng.next_index(i + 1);
        parts.swap(i, j);
    }
}

impl ScatterExec {
    /// Shuffle aggregated query parts with the executor's random source.
    pub fn shuffle_query_parts(&self, parts: &mut [SplitQueryPart]) {
        let mut rng = self.shuffle_rng().lock();
        shuffle_parts(rng.as_mut(), parts);
    }

    /// Scatter a split-query request to every shard in `key_range_by_shard`
    /// and tag each returned part with its shard's key range. A shard with
    /// no known key range (mid-resharding) contributes one empty range,
    /// standing for the whole keyspace.
    #[allow(clippy::too_many_arguments)]
    pub fn split_query_key_range(
        &self,
        ctx: &CallContext,
        sql: &str,
        bind_variables: &BindVars,
        split_column: &str,
        split_count: i64,
        key_range_by_shard: &HashMap<String, Option<KeyRange>>,
        keyspace: &str,
    ) -> Result<Vec<SplitQueryPart>, ScatterError> {
        let all_splits = Mutex::new(Vec::new());
        let shards: Vec<String> = key_range_by_shard.keys().cloned().collect();

        let recorder = self.multi_go(
            "SplitQuery",
            keyspace,
            &shards,
            TabletType::Rdonly,
            |target| {
                let query = BoundQuery::new(sql, bind_variables.clone());
                let splits = self
                    .gateway()
                    .split_query(ctx, target, &query, split_column, split_count)?;
                let key_ranges = match key_range_by_shard.get(target.shard.as_str()) {
                    Some(Some(key_range)) => vec![key_range.clone()],
                    _ => vec![KeyRange::default()],
                };
                let parts: Vec<SplitQueryPart> = splits
                    .into_iter()
                    .map(|split| SplitQueryPart {
                        query: split.query,
                        key_range_part: Some(KeyRangePart {
                            keyspace: keyspace.to_string(),
                            key_ranges: key_ranges.clone(),
                        }),
                        shard_part: None,
                        size: split.row_count,
                    })
                    .collect();
                all_splits.lock().extend(parts);
                Ok(())
            },
        );
        if recorder.has_errors() {
            return Err(ScatterError::aggregate(recorder.take()));
        }
        let mut parts = all_splits.into_inner();
        self.shuffle_query_parts(&mut parts);
        Ok(parts)
    }

    /// Scatter a split-query request to the named shards and tag each
    /// returned part with its shard's name.
    #[allow(clippy::too_many_arguments)]
    pub fn split_query_custom_sharding(
        &self,
        ctx: &CallContext,
        sql: &str,
        bind_variables: &BindVars,
        split_column: &str,
        split_count: i64,
        shards: &[String],
        keyspace: &str,
    ) -> Result<Vec<SplitQueryPart>, ScatterError> {
        let all_splits = Mutex::new(Vec::new());

        let recorder = self.multi_go(
            "SplitQuery",
            keyspace,
            shards,
            TabletType::Rdonly,
            |target| {
                let query = BoundQuery::new(sql, bind_variables.clone());
                let splits = self
                    .gateway()
                    .split_query(ctx, target, &query, split_column, split_count)?;
                let parts: Vec<SplitQueryPart> = splits
                    .into_iter()
                    .map(|split| SplitQueryPart {
                        query: split.query,
                        key_range_part: None,
                        shard_part: Some(ShardPart {
                            keyspace: keyspace.to_string(),
                            shards: vec![target.shard.clone()],
                        }),
                        size: split.row_count,
                    })
                    .collect();
                all_splits.lock().extend(parts);
                Ok(())
            },
        );
        if recorder.has_errors() {
            return Err(ScatterError::aggregate(recorder.take()));
        }
        let mut parts = all_splits.into_inner();
        self.shuffle_query_parts(&mut parts);
        Ok(parts)
    }

    /// Scatter a v2 split-query request and convert every returned split
    /// with `split_to_part` before aggregation. The conversion decides the
    /// part's placement, so both key-range and custom-sharded keyspaces
    /// route through this entry point.
    #[allow(clippy::too_many_arguments)]
    pub fn split_query_v2(
        &self,
        ctx: &CallContext,
        sql: &str,
        bind_variables: &BindVars,
        split_columns: &[String],
        per_shard_split_count: i64,
        num_rows_per_query_part: i64,
        algorithm: SplitAlgorithm,
        shards: &[String],
        split_to_part: &(dyn Fn(&QuerySplit, &str) -> GateResult<SplitQueryPart> + Sync),
        keyspace: &str,
    ) -> Result<Vec<SplitQueryPart>, ScatterError> {
        let all_parts = Mutex::new(Vec::new());

        let recorder = self.multi_go(
            "SplitQuery",
            keyspace,
            shards,
            TabletType::Rdonly,
            |target| {
                let query = BoundQuery::new(sql, bind_variables.clone());
                let splits = self.gateway().split_query_v2(
                    ctx,
                    target,
                    &query,
                    split_columns,
                    per_shard_split_count,
                    num_rows_per_query_part,
                    algorithm,
                )?;
                let mut parts = Vec::with_capacity(splits.len());
                for split in &splits {
                    parts.push(split_to_part(split, &target.shard)?);
                }
                all_parts.lock().extend(parts);
                Ok(())
            },
        );
        if recorder.has_errors() {
            return Err(ScatterError::aggregate(recorder.take()));
        }
        let mut parts = all_parts.into_inner();
        self.shuffle_query_parts(&mut parts);
        Ok(parts)
    }
}
