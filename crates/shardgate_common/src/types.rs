//! Foundational identifier and value types shared by every gateway layer.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction identifier minted by a shard. Zero means "no transaction".
pub type TxnId = i64;

/// Role of the tablet a query is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabletType {
    /// The writable primary for a shard.
    Primary,
    /// A replication follower serving reads.
    Replica,
    /// A batch/analytics follower, allowed to lag further behind.
    Rdonly,
}

impl TabletType {
    /// Lowercase name used in metric keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            TabletType::Primary => "primary",
            TabletType::Replica => "replica",
            TabletType::Rdonly => "rdonly",
        }
    }
}

impl fmt::Display for TabletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The addressable triple for a single shard call.
///
/// Equality and hashing cover all three fields: the target is the identity
/// key for metrics, transaction lookup, and fan-out deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub keyspace: String,
    pub shard: String,
    pub tablet_type: TabletType,
}

impl Target {
    pub fn new(keyspace: &str, shard: &str, tablet_type: TabletType) -> Self {
        Self {
            keyspace: keyspace.to_string(),
            shard: shard.to_string(),
            tablet_type,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.keyspace, self.shard, self.tablet_type)
    }
}

/// An owned scalar (or list-of-scalars, for IN clauses) bind value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// List values expand into multi-value placeholders (e.g. `IN (::ids)`).
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Bind variables for one query: placeholder name to value.
pub type BindVars = HashMap<String, Value>;

/// A lexicographic key range, end-exclusive. Empty start/end mean unbounded,
/// so the default value covers an entire keyspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

impl KeyRange {
    /// True when the range covers the whole keyspace.
    pub fn is_full(&self) -> bool {
        self.start.is_empty() && self.end.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tablet_type_as_str() {
        assert_eq!(TabletType::Primary.as_str(), "primary");
        assert_eq!(TabletType::Replica.as_str(), "replica");
        assert_eq!(TabletType::Rdonly.as_str(), "rdonly");
    }

    #[test]
    fn test_target_identity_covers_all_fields() {
        let a = Target::new("ks", "-80", TabletType::Primary);
        let b = Target::new("ks", "-80", TabletType::Primary);
        let c = Target::new("ks", "-80", TabletType::Replica);
        let d = Target::new("ks", "80-", TabletType::Primary);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn test_target_display() {
        let t = Target::new("commerce", "-80", TabletType::Rdonly);
        assert_eq!(t.to_string(), "commerce.-80.rdonly");
    }

    #[test]
    fn test_key_range_default_is_full() {
        assert!(KeyRange::default().is_full());
        let half = KeyRange {
            start: vec![],
            end: vec![0x80],
        };
        assert!(!half.is_full());
    }

    #[test]
    fn test_value_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int64(0).is_null());
    }

    #[test]
    fn test_target_serde_round_trip() {
        let target = Target::new("commerce", "80-", TabletType::Replica);
        let json = serde_json::to_string(&target).unwrap();
        assert!(json.contains("\"replica\""));
        let back: Target = serde_json::from_str(&json).unwrap();
        assert_eq!(back, target);
    }
}
