//! Merged result sets and the per-shard append rules.
//!
//! A scatter call merges one `QueryResult` per shard into a single logical
//! result: rows concatenate, affected counts sum, the field header is
//! adopted once, and the consistency extras degrade to the most
//! conservative view any shard reported.

use serde::{Deserialize, Serialize};

use shardgate_common::types::Value;

/// Column descriptor in a result header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
        }
    }
}

/// Wire type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int64,
    UInt64,
    Float64,
    VarChar,
    VarBinary,
    Timestamp,
}

/// One result row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// A per-read replication-position marker. Aggregates across shards by
/// minimum timestamp, yielding the most conservative visibility point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventToken {
    /// Seconds since epoch at which the read was satisfied.
    pub timestamp: i64,
    /// Shard that produced the token.
    pub shard: String,
    /// Replication position within that shard.
    pub position: String,
}

impl EventToken {
    /// The smaller of two optional tokens, by timestamp. Either side being
    /// `None` means no usable token, so the minimum is `None` too.
    pub fn minimum(a: Option<&EventToken>, b: Option<&EventToken>) -> Option<EventToken> {
        match (a, b) {
            (Some(x), Some(y)) => {
                if x.timestamp <= y.timestamp {
                    Some(x.clone())
                } else {
                    Some(y.clone())
                }
            }
            _ => None,
        }
    }
}

/// Consistency extras attached to a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultExtras {
    pub event_token: Option<EventToken>,
    /// True when the shard satisfied the read at or after its replication
    /// watermark. Aggregates by conjunction.
    pub fresher: bool,
}

/// A merged (or single-shard) result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub fields: Vec<Field>,
    pub rows_affected: u64,
    /// Last non-zero insert id observed. Which shard wins is unspecified
    /// for multi-shard writes; callers must not rely on the identity.
    pub insert_id: u64,
    pub rows: Vec<Row>,
    pub extras: Option<ResultExtras>,
}

impl QueryResult {
    /// True for the canonical "nothing happened on this shard" response.
    pub fn is_empty(&self) -> bool {
        self.rows_affected == 0 && self.fields.is_empty()
    }
}

/// Merge one shard's result into the accumulator.
///
/// Callers serialize invocations with a per-call mutex; this function
/// itself performs no locking and no I/O.
pub fn append_result(acc: &mut QueryResult, inner: &QueryResult) {
    if inner.is_empty() {
        return;
    }
    if acc.fields.is_empty() {
        acc.fields = inner.fields.clone();
    }
    acc.rows_affected += inner.rows_affected;
    if inner.insert_id != 0 {
        acc.insert_id = inner.insert_id;
    }
    if acc.rows.is_empty() {
        // First contribution: take the extras verbatim.
        acc.extras = inner.extras.clone();
    } else if inner.extras.is_none() {
        // A shard reported no extras, so the aggregate can no longer claim
        // a token or freshness.
        if let Some(extras) = acc.extras.as_mut() {
            extras.event_token = None;
            extras.fresher = false;
        }
    } else if let (Some(acc_extras), Some(inner_extras)) = (acc.extras.as_mut(), inner.extras.as_ref()) {
        acc_extras.event_token =
            EventToken::minimum(acc_extras.event_token.as_ref(), inner_extras.event_token.as_ref());
        acc_extras.fresher = acc_extras.fresher && inner_extras.fresher;
    }
    acc.rows.extend(inner.rows.iter().cloned());
}
