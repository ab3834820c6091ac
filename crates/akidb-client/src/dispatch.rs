//! Dispatcher: turns sealed batches into RPCs under the concurrency budget.
//!
//! One dispatcher task per client reads sealed batches in order, waits for
//! an in-flight permit and spawns a task per batch. Each batch task drives
//! its batch through attempts until every entry is terminal, retrying only
//! the entries that are still pending.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use akidb_client_core::{
    FailureReason, ObjectWriteRequest, OutcomeStatus, TransportError, TransportErrorKind,
};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::accumulator::{Batch, BatchState};
use crate::aggregator::ObjectResult;
use crate::codec::{BatchContext, ObjectError};
use crate::concurrency::{AttemptResult, InFlightPermit};
use crate::connection::Connection;
use crate::metrics;
use crate::retry::{is_transient, RetryPolicy};
use crate::transport::RpcMethod;

/// Everything a batch task needs, shared by all of them.
#[derive(Debug)]
pub(crate) struct DispatchContext {
    pub connection: Connection,
    pub policy: RetryPolicy,
    pub batch_context: BatchContext,
    pub request_timeout: Duration,
}

/// Spawns the dispatcher. It exits once `batches` is closed and every
/// batch task has finished.
pub(crate) fn spawn(ctx: Arc<DispatchContext>, batches: mpsc::Receiver<Batch>) -> JoinHandle<()> {
    tokio::spawn(run(ctx, batches))
}

async fn run(ctx: Arc<DispatchContext>, mut batches: mpsc::Receiver<Batch>) {
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            next = batches.recv() => match next {
                Some(mut batch) => {
                    batch.retain_pending();
                    if batch.is_empty() {
                        continue;
                    }
                    let permit = ctx.connection.budget().acquire().await;
                    let span = info_span!("batch", seq = batch.seq, objects = batch.len());
                    tasks.spawn(drive_batch(Arc::clone(&ctx), batch, permit).instrument(span));
                }
                None => break,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
        }
    }
    while let Some(joined) = tasks.join_next().await {
        log_join(joined);
    }
    debug!("dispatcher stopped");
}

fn log_join(joined: Result<BatchState, tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!(error = %err, "batch task failed");
    }
}

/// Drives one batch to a terminal state.
async fn drive_batch(
    ctx: Arc<DispatchContext>,
    mut batch: Batch,
    permit: InFlightPermit,
) -> BatchState {
    let connection = &ctx.connection;
    let codec = connection.codec();
    let max_attempts = ctx.policy.max_retries();
    let mut permit = Some(permit);
    let mut retry = 0;
    batch.state = BatchState::Dispatched;

    loop {
        if permit.is_none() {
            permit = Some(connection.budget().acquire().await);
        }

        let mut claimed = Vec::with_capacity(batch.len());
        for (position, entry) in batch.entries.iter().enumerate() {
            if !entry.aggregator.mark_dispatched(entry.index) {
                continue;
            }
            match codec.check_object(&entry.object) {
                Ok(()) => claimed.push(position),
                Err(err) => {
                    entry
                        .aggregator
                        .resolve(entry.index, ObjectResult::Failed(err.into()));
                }
            }
        }
        if claimed.is_empty() {
            break;
        }

        let objects: Vec<&ObjectWriteRequest> = claimed
            .iter()
            .map(|position| &batch.entries[*position].object)
            .collect();
        let body = match codec.encode_batch(&objects, &ctx.batch_context) {
            Ok(body) => body,
            Err(err) => {
                let reason = FailureReason::from(err);
                resolve_all(&batch, &claimed, |_| ObjectResult::Failed(reason.clone()));
                break;
            }
        };

        debug!(
            attempt = retry + 1,
            objects = claimed.len(),
            bytes = body.len(),
            "dispatching batch"
        );
        let started = Instant::now();
        let sent = connection
            .send(RpcMethod::BatchObjects, body, ctx.request_timeout)
            .await;
        let latency = started.elapsed();

        let (attempt, retry_kind) = match sent {
            Ok(reply) => match codec.decode_batch_reply(&reply, claimed.len()) {
                Ok(reply) => apply_reply(&batch, &claimed, reply.errors, max_attempts),
                Err(err) => {
                    let reason = FailureReason::from(err);
                    warn!(error = %reason, "undecodable batch reply");
                    resolve_all(&batch, &claimed, |_| ObjectResult::Failed(reason.clone()));
                    (AttemptResult::Permanent, None)
                }
            },
            Err(err) if is_transient(err.kind) => {
                let kind = err.kind;
                resolve_all(&batch, &claimed, |_| ObjectResult::Retry {
                    last_error: err.clone(),
                    max_attempts,
                });
                (AttemptResult::Transient, Some(kind))
            }
            Err(err) => {
                warn!(error = %err, "batch rejected");
                resolve_all(&batch, &claimed, |_| {
                    ObjectResult::Failed(FailureReason::Transport { error: err.clone() })
                });
                (AttemptResult::Permanent, None)
            }
        };

        let label = match attempt {
            AttemptResult::Success => "ok",
            AttemptResult::Transient => "transient",
            AttemptResult::Permanent => "permanent",
        };
        metrics::DISPATCH_LATENCY
            .with_label_values(&[label])
            .observe(latency.as_secs_f64());
        connection.record_attempt(attempt, latency);

        if !batch.entries.iter().any(|entry| entry.is_pending()) {
            break;
        }

        let delay = ctx.policy.backoff(retry);
        retry += 1;
        batch.state = BatchState::Retrying;
        if let Some(kind) = retry_kind {
            metrics::RETRIES.with_label_values(&[kind.as_str()]).inc();
        }
        warn!(
            retry,
            delay_ms = delay.as_millis() as u64,
            pending = batch.entries.iter().filter(|entry| entry.is_pending()).count(),
            "retrying batch"
        );
        // The slot is free while the batch backs off.
        permit = None;
        tokio::time::sleep(delay).await;
    }

    batch.state = final_state(&batch);
    metrics::BATCHES_DISPATCHED
        .with_label_values(&[batch.state.as_str()])
        .inc();
    info!(state = %batch.state, attempts = retry + 1, "batch finished");
    batch.state
}

/// Resolves every object of a delivered batch from the per-object errors.
fn apply_reply(
    batch: &Batch,
    claimed: &[usize],
    errors: Vec<ObjectError>,
    max_attempts: u32,
) -> (AttemptResult, Option<TransportErrorKind>) {
    let mut errors: HashMap<usize, ObjectError> =
        errors.into_iter().map(|error| (error.index, error)).collect();
    let mut retry_kind = None;
    for (wire_index, position) in claimed.iter().enumerate() {
        let entry = &batch.entries[*position];
        let result = match errors.remove(&wire_index) {
            None => ObjectResult::Succeeded,
            Some(error) if is_transient(error.kind) => {
                retry_kind = Some(error.kind);
                ObjectResult::Retry {
                    last_error: TransportError::new(error.kind, error.message),
                    max_attempts,
                }
            }
            Some(error) => ObjectResult::Failed(FailureReason::Rejected {
                kind: error.kind,
                message: error.message,
            }),
        };
        entry.aggregator.resolve(entry.index, result);
    }
    let attempt = if retry_kind.is_some() {
        AttemptResult::Transient
    } else {
        AttemptResult::Success
    };
    (attempt, retry_kind)
}

fn resolve_all(batch: &Batch, claimed: &[usize], result: impl Fn(usize) -> ObjectResult) {
    for position in claimed {
        let entry = &batch.entries[*position];
        entry.aggregator.resolve(entry.index, result(*position));
    }
}

fn final_state(batch: &Batch) -> BatchState {
    let (mut succeeded, mut failed) = (0, 0);
    for entry in &batch.entries {
        match entry.aggregator.status(entry.index) {
            Some(OutcomeStatus::Succeeded) => succeeded += 1,
            Some(OutcomeStatus::Failed) => failed += 1,
            _ => {}
        }
    }
    match (succeeded, failed) {
        (_, 0) => BatchState::Completed,
        (0, _) => BatchState::Failed,
        _ => BatchState::PartiallyFailed,
    }
}
