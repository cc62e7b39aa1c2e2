//! Streaming fan-out: interleave per-shard result streams into one
//! totally ordered reply sequence.
//!
//! Shard streams yield either a header packet (fields, no rows) or row
//! packets. One mutex per call guards the `field_sent` flag, the sticky
//! send error, and the `send_reply` invocation itself, so the caller
//! observes exactly one header and a serialized packet sequence.

use parking_lot::Mutex;

use shardgate_common::context::CallContext;
use shardgate_common::error::{GateError, GateResult};
use shardgate_common::types::{BindVars, TabletType, Target};

use std::collections::HashMap;

use crate::errors::ScatterError;
use crate::gateway::{ExecuteOptions, ResultStream, StreamEvent};
use crate::result::QueryResult;
use crate::scatter::{get_shards, ScatterExec};

#[derive(Debug, Default)]
struct StreamState {
    field_sent: bool,
    reply_err: Option<GateError>,
}

/// Forward one shard's stream into `send_reply` under the shared state.
///
/// - duplicate header packets are dropped once `field_sent` is set;
/// - the first `send_reply` failure is stored in `reply_err`; any consumer
///   observing it drains its stream to end and reports success, so the
///   shard releases its server-side cursor;
/// - end of stream is success, not an error.
fn process_one_streaming_result(
    state: &Mutex<StreamState>,
    stream: GateResult<Box<dyn ResultStream>>,
    send_reply: &(dyn Fn(&QueryResult) -> GateResult<()> + Sync),
) -> GateResult<()> {
    let mut stream = stream?;
    loop {
        let packet = match stream.recv()? {
            Some(packet) => packet,
            None => return Ok(()),
        };

        let mut state = state.lock();
        if state.reply_err.is_some() {
            drop(state);
            while let Ok(Some(_)) = stream.recv() {}
            return Ok(());
        }
        if !packet.fields.is_empty() && packet.rows.is_empty() {
            if state.field_sent {
                continue;
            }
            state.field_sent = true;
        }
        if let Err(e) = send_reply(&packet) {
            tracing::warn!("stream reply failed, draining shard streams: {e}");
            state.reply_err = Some(e);
        }
    }
}

impl ScatterExec {
    /// Execute a streaming query on the given shards, with common bind
    /// variables. Merged packets are delivered to `send_reply` in a total
    /// order with exactly one field header.
    #[allow(clippy::too_many_arguments)]
    pub fn stream_execute(
        &self,
        ctx: &CallContext,
        sql: &str,
        bind_vars: &BindVars,
        keyspace: &str,
        shards: &[String],
        tablet_type: TabletType,
        options: Option<&ExecuteOptions>,
        send_reply: &(dyn Fn(&QueryResult) -> GateResult<()> + Sync),
    ) -> Result<(), ScatterError> {
        let state = Mutex::new(StreamState::default());
        let recorder = self.multi_go("StreamExecute", keyspace, shards, tablet_type, |target| {
            let stream = self
                .gateway()
                .stream_execute(ctx, target, sql, bind_vars, options);
            process_one_streaming_result(&state, stream, send_reply)
        });
        if let Some(err) = state.into_inner().reply_err {
            recorder.record(err);
        }
        if recorder.has_errors() {
            return Err(ScatterError::aggregate(recorder.take()));
        }
        Ok(())
    }

    /// Like `stream_execute`, but each shard gets its own bind variables.
    /// The shard list is the key set of `shard_vars`.
    #[allow(clippy::too_many_arguments)]
    pub fn stream_execute_multi(
        &self,
        ctx: &CallContext,
        sql: &str,
        keyspace: &str,
        shard_vars: &HashMap<String, BindVars>,
        tablet_type: TabletType,
        options: Option<&ExecuteOptions>,
        send_reply: &(dyn Fn(&QueryResult) -> GateResult<()> + Sync),
    ) -> Result<(), ScatterError> {
        let state = Mutex::new(StreamState::default());
        let recorder = self.multi_go(
            "StreamExecute",
            keyspace,
            &get_shards(shard_vars),
            tablet_type,
            |target| {
                let stream = self.gateway().stream_execute(
                    ctx,
                    target,
                    sql,
                    &shard_vars[target.shard.as_str()],
                    options,
                );
                process_one_streaming_result(&state, stream, send_reply)
            },
        );
        if let Some(err) = state.into_inner().reply_err {
            recorder.record(err);
        }
        if recorder.has_errors() {
            return Err(ScatterError::aggregate(recorder.take()));
        }
        Ok(())
    }

    /// Open an update stream on a single target and forward its events
    /// one at a time. Ends cleanly when the shard closes the stream.
    pub fn update_stream(
        &self,
        ctx: &CallContext,
        target: &Target,
        timestamp: i64,
        position: &str,
        send_reply: &mut dyn FnMut(&StreamEvent) -> GateResult<()>,
    ) -> GateResult<()> {
        let mut stream = self
            .gateway()
            .update_stream(ctx, target, position, timestamp)?;
        while let Some(event) = stream.recv()? {
            send_reply(&event)?;
        }
        Ok(())
    }
}
