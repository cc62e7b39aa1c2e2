//! Session-scoped transaction state.
//!
//! A `SafeSession` records which shards hold an open transaction on behalf
//! of one client session. It outlives individual scatter calls; within a
//! call, fan-out workers may only append newly minted shard transactions.
//! The driver guarantees no two in-flight workers share a target, so a
//! find-then-append race cannot occur inside one call.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use shardgate_common::types::{TabletType, Target, TxnId};

/// The pairing of a target and the transaction open on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSession {
    pub target: Target,
    pub transaction_id: TxnId,
}

#[derive(Debug, Default)]
struct SessionState {
    in_transaction: bool,
    shard_sessions: Vec<ShardSession>,
}

/// Mutex-wrapped session state, shareable with fan-out workers by
/// reference.
#[derive(Debug, Default)]
pub struct SafeSession {
    state: Mutex<SessionState>,
}

impl SafeSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the session as being inside a client-level transaction.
    pub fn set_in_transaction(&self, in_transaction: bool) {
        self.state.lock().in_transaction = in_transaction;
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().in_transaction
    }

    /// Transaction id open on the given target, or 0 if none.
    pub fn find(&self, keyspace: &str, shard: &str, tablet_type: TabletType) -> TxnId {
        let state = self.state.lock();
        for ss in &state.shard_sessions {
            if ss.target.keyspace == keyspace
                && ss.target.shard == shard
                && ss.target.tablet_type == tablet_type
            {
                return ss.transaction_id;
            }
        }
        0
    }

    /// Record a newly opened shard transaction. Append-only: entries are
    /// never reordered within a transaction's lifetime.
    pub fn append(&self, shard_session: ShardSession) {
        self.state.lock().shard_sessions.push(shard_session);
    }

    /// Snapshot of the recorded shard transactions, in append order.
    pub fn shard_sessions(&self) -> Vec<ShardSession> {
        self.state.lock().shard_sessions.clone()
    }

    /// Clear all transaction state, leaving the session reusable. Called by
    /// the transaction API after a commit or rollback completes.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.in_transaction = false;
        state.shard_sessions.clear();
    }
}

/// Decide how a shard action relates to the session's transaction.
///
/// Returns `(should_begin, transaction_id)`:
/// - not in a transaction → `(false, 0)`;
/// - a transaction is already open on this target → `(false, its id)`;
/// - `not_in_transaction` forbids opening one for this query → `(false, 0)`;
/// - otherwise → `(true, 0)`: the gateway should issue a combined
///   begin-and-execute and report the minted id.
pub fn transaction_info(
    target: &Target,
    session: &SafeSession,
    not_in_transaction: bool,
) -> (bool, TxnId) {
    if !session.in_transaction() {
        return (false, 0);
    }
    let transaction_id = session.find(&target.keyspace, &target.shard, target.tablet_type);
    if transaction_id != 0 {
        return (false, transaction_id);
    }
    if not_in_transaction {
        return (false, 0);
    }
    (true, 0)
}
