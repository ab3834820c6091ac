//! Result Aggregator: one outcome table per submitted operation.
//!
//! Slots are kept in submission order. A slot moves from pending to exactly
//! one terminal outcome and is never overwritten afterwards, which makes
//! replaying an attempt's results harmless.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use akidb_client_core::{
    ClientError, ClientResult, CorrelationToken, FailureReason, ObjectOutcome, OperationId,
    OutcomeStatus, TransportError,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::metrics;

/// Result of one object within one dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectResult {
    Succeeded,
    Failed(FailureReason),
    /// Transient failure; the object stays pending unless its attempt budget
    /// is spent.
    Retry {
        last_error: TransportError,
        max_attempts: u32,
    },
}

#[derive(Debug)]
struct Slot {
    token: CorrelationToken,
    id: Uuid,
    in_flight: bool,
    attempts: u32,
    outcome: Option<ObjectOutcome>,
}

#[derive(Debug)]
struct AggregatorState {
    slots: Vec<Slot>,
    by_token: HashMap<CorrelationToken, usize>,
    pending: usize,
}

#[derive(Debug)]
pub struct ResultAggregator {
    operation: OperationId,
    state: Mutex<AggregatorState>,
    cancelled: AtomicBool,
    done: watch::Sender<bool>,
}

impl ResultAggregator {
    /// Creates a table for `entries` in submission order. Tokens must be
    /// unique within the operation.
    pub fn new(
        operation: OperationId,
        entries: impl IntoIterator<Item = (CorrelationToken, Uuid)>,
    ) -> ClientResult<Self> {
        let mut slots = Vec::new();
        let mut by_token = HashMap::new();
        for (token, id) in entries {
            if by_token.insert(token.clone(), slots.len()).is_some() {
                return Err(ClientError::validation(format!(
                    "duplicate correlation token `{token}` in one submission"
                )));
            }
            slots.push(Slot {
                token,
                id,
                in_flight: false,
                attempts: 0,
                outcome: None,
            });
        }
        let pending = slots.len();
        let (done, _) = watch::channel(pending == 0);
        Ok(Self {
            operation,
            state: Mutex::new(AggregatorState {
                slots,
                by_token,
                pending,
            }),
            cancelled: AtomicBool::new(false),
            done,
        })
    }

    #[must_use]
    pub fn operation_id(&self) -> OperationId {
        self.operation
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Objects without a terminal outcome.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn index_of(&self, token: &CorrelationToken) -> Option<usize> {
        self.state.lock().by_token.get(token).copied()
    }

    /// Whether the slot still waits for an outcome.
    #[must_use]
    pub fn is_pending(&self, index: usize) -> bool {
        self.state
            .lock()
            .slots
            .get(index)
            .is_some_and(|slot| slot.outcome.is_none())
    }

    #[must_use]
    pub fn status(&self, index: usize) -> Option<OutcomeStatus> {
        self.state
            .lock()
            .slots
            .get(index)
            .and_then(|slot| slot.outcome.as_ref().map(|outcome| outcome.status))
    }

    /// Claims a pending slot for a dispatch attempt. Returns `false` when the
    /// slot is terminal, already in flight, or the operation was cancelled
    /// (in which case the slot becomes `NotAttempted`).
    pub fn mark_dispatched(&self, index: usize) -> bool {
        let cancelled = self.is_cancelled();
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(index) else {
            return false;
        };
        if slot.outcome.is_some() || slot.in_flight {
            return false;
        }
        if cancelled {
            let outcome =
                ObjectOutcome::not_attempted(slot.token.clone(), slot.id, slot.attempts);
            Self::finish(&mut state, index, outcome, &self.done);
            return false;
        }
        slot.in_flight = true;
        slot.attempts += 1;
        true
    }

    /// Records one object's result. Returns `true` if the slot changed.
    pub fn resolve(&self, index: usize, result: ObjectResult) -> bool {
        let cancelled = self.is_cancelled();
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(index) else {
            return false;
        };
        if slot.outcome.is_some() {
            return false;
        }
        slot.in_flight = false;
        let (token, id, attempts) = (slot.token.clone(), slot.id, slot.attempts);
        let outcome = match result {
            ObjectResult::Succeeded => ObjectOutcome::succeeded(token, id, attempts),
            ObjectResult::Failed(reason) => ObjectOutcome::failed(token, id, reason, attempts),
            ObjectResult::Retry {
                last_error,
                max_attempts,
            } => {
                if attempts >= max_attempts {
                    ObjectOutcome::failed(
                        token,
                        id,
                        FailureReason::RetriesExhausted {
                            attempts,
                            last_error,
                        },
                        attempts,
                    )
                } else if cancelled {
                    ObjectOutcome::not_attempted(token, id, attempts)
                } else {
                    return true;
                }
            }
        };
        Self::finish(&mut state, index, outcome, &self.done);
        true
    }

    /// Applies results keyed by correlation token. Returns how many slots
    /// changed; unknown tokens and terminal slots are ignored.
    pub fn apply<'a>(
        &self,
        results: impl IntoIterator<Item = (&'a CorrelationToken, ObjectResult)>,
    ) -> usize {
        results
            .into_iter()
            .filter_map(|(token, result)| {
                let index = self.index_of(token)?;
                self.resolve(index, result).then_some(())
            })
            .count()
    }

    /// Marks the slot `NotAttempted` unless it is already terminal.
    pub fn abandon(&self, index: usize) {
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(index) else {
            return;
        };
        if slot.outcome.is_none() {
            slot.in_flight = false;
            let outcome = ObjectOutcome::not_attempted(slot.token.clone(), slot.id, slot.attempts);
            Self::finish(&mut state, index, outcome, &self.done);
        }
    }

    /// Stops further dispatch. Pending objects that are not on the wire
    /// become `NotAttempted` now; in-flight ones keep the result of their
    /// current call but are not retried.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let mut state = self.state.lock();
        let idle: Vec<usize> = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.outcome.is_none() && !slot.in_flight)
            .map(|(index, _)| index)
            .collect();
        for index in idle {
            let slot = &state.slots[index];
            let outcome = ObjectOutcome::not_attempted(slot.token.clone(), slot.id, slot.attempts);
            Self::finish(&mut state, index, outcome, &self.done);
        }
    }

    fn finish(
        state: &mut AggregatorState,
        index: usize,
        outcome: ObjectOutcome,
        done: &watch::Sender<bool>,
    ) {
        metrics::OBJECT_OUTCOMES
            .with_label_values(&[outcome.status.as_str()])
            .inc();
        state.slots[index].outcome = Some(outcome);
        state.pending -= 1;
        if state.pending == 0 {
            done.send_replace(true);
        }
    }

    /// Outcomes in submission order, once every slot is terminal.
    #[must_use]
    pub fn outcomes(&self) -> Option<Vec<ObjectOutcome>> {
        let state = self.state.lock();
        if state.pending > 0 {
            return None;
        }
        Some(
            state
                .slots
                .iter()
                .filter_map(|slot| slot.outcome.clone())
                .collect(),
        )
    }

    /// Waits until every slot is terminal.
    ///
    /// Fails with `Cancelled` only when the operation was cancelled before
    /// any object reached a real outcome.
    pub async fn wait(&self) -> ClientResult<Vec<ObjectOutcome>> {
        let mut done = self.done.subscribe();
        done.wait_for(|finished| *finished)
            .await
            .map_err(|_| ClientError::Internal("outcome channel closed".to_string()))?;
        let outcomes = self
            .outcomes()
            .ok_or_else(|| {
                ClientError::Internal("operation finished with pending objects".to_string())
            })?;
        let nothing_happened = outcomes
            .iter()
            .all(|outcome| outcome.status == OutcomeStatus::NotAttempted);
        if self.is_cancelled() && nothing_happened && !outcomes.is_empty() {
            return Err(ClientError::Cancelled);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use akidb_client_core::TransportErrorKind;
    use proptest::prelude::*;

    use super::*;

    fn aggregator(tokens: &[&str]) -> ResultAggregator {
        ResultAggregator::new(
            OperationId::new(),
            tokens
                .iter()
                .map(|token| (CorrelationToken::new(*token), Uuid::new_v4())),
        )
        .unwrap()
    }

    fn retry(max_attempts: u32) -> ObjectResult {
        ObjectResult::Retry {
            last_error: TransportError::unavailable("busy"),
            max_attempts,
        }
    }

    #[test]
    fn test_duplicate_tokens_are_rejected() {
        let err = ResultAggregator::new(
            OperationId::new(),
            [
                (CorrelationToken::new("a"), Uuid::nil()),
                (CorrelationToken::new("a"), Uuid::nil()),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[tokio::test]
    async fn test_replaying_results_is_idempotent() {
        let agg = aggregator(&["a", "b"]);
        let a = CorrelationToken::new("a");
        let b = CorrelationToken::new("b");
        assert!(agg.mark_dispatched(0));
        assert!(agg.mark_dispatched(1));
        let rejected = ObjectResult::Failed(FailureReason::Rejected {
            kind: TransportErrorKind::InvalidArgument,
            message: "bad".into(),
        });
        let report = vec![(&a, ObjectResult::Succeeded), (&b, rejected)];

        assert_eq!(agg.apply(report.clone()), 2);
        let once = agg.outcomes().unwrap();
        assert_eq!(agg.apply(report), 0);
        assert_eq!(agg.outcomes().unwrap(), once);
        assert_eq!(agg.wait().await.unwrap(), once);
    }

    #[test]
    fn test_terminal_outcome_is_never_overwritten() {
        let agg = aggregator(&["a"]);
        agg.mark_dispatched(0);
        agg.resolve(0, ObjectResult::Succeeded);
        assert!(!agg.resolve(0, ObjectResult::Failed(FailureReason::Protocol {
            detail: "late".into()
        })));
        assert!(!agg.mark_dispatched(0));
        assert_eq!(agg.status(0), Some(OutcomeStatus::Succeeded));
    }

    #[test]
    fn test_retry_exhausts_at_attempt_bound() {
        let agg = aggregator(&["a"]);
        for attempt in 1..=3 {
            assert!(agg.mark_dispatched(0));
            agg.resolve(0, retry(3));
            assert_eq!(agg.is_pending(0), attempt < 3);
        }
        let outcome = &agg.outcomes().unwrap()[0];
        assert_eq!(outcome.attempts, 3);
        assert!(matches!(
            outcome.error,
            Some(FailureReason::RetriesExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_keeps_in_flight_results() {
        let agg = aggregator(&["a", "b", "c"]);
        assert!(agg.mark_dispatched(0));
        agg.resolve(0, ObjectResult::Succeeded);
        assert!(agg.mark_dispatched(1));
        agg.cancel();

        assert_eq!(agg.status(2), Some(OutcomeStatus::NotAttempted));
        assert!(agg.is_pending(1));
        assert!(!agg.mark_dispatched(1));
        agg.resolve(1, ObjectResult::Succeeded);

        let outcomes = agg.wait().await.unwrap();
        let statuses: Vec<_> = outcomes.iter().map(|outcome| outcome.status).collect();
        assert_eq!(
            statuses,
            vec![
                OutcomeStatus::Succeeded,
                OutcomeStatus::Succeeded,
                OutcomeStatus::NotAttempted
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_before_any_outcome() {
        let agg = aggregator(&["a", "b"]);
        agg.cancel();
        assert!(matches!(agg.wait().await, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn test_retry_after_cancel_is_not_attempted() {
        let agg = aggregator(&["a"]);
        agg.mark_dispatched(0);
        agg.cancel();
        agg.resolve(0, retry(5));
        assert_eq!(agg.status(0), Some(OutcomeStatus::NotAttempted));
    }

    #[tokio::test]
    async fn test_wait_wakes_on_completion() {
        let agg = Arc::new(aggregator(&["a"]));
        let waiter = {
            let agg = Arc::clone(&agg);
            tokio::spawn(async move { agg.wait().await })
        };
        tokio::task::yield_now().await;
        assert!(!agg.is_finished());
        agg.mark_dispatched(0);
        agg.resolve(0, ObjectResult::Succeeded);
        assert_eq!(waiter.await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_operation_is_finished() {
        let agg = aggregator(&[]);
        assert!(agg.is_finished());
        assert!(agg.wait().await.unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_outcomes_follow_submission_order(
            count in 1usize..60,
            order in prop::collection::vec(any::<prop::sample::Index>(), 1..200),
            results in prop::collection::vec(0u8..3, 1..200),
        ) {
            let tokens: Vec<String> = (0..count).map(|i| format!("obj-{i}")).collect();
            let agg = ResultAggregator::new(
                OperationId::new(),
                tokens.iter().map(|t| (CorrelationToken::new(t.as_str()), Uuid::nil())),
            )
            .unwrap();
            // Resolve slots in an arbitrary order with arbitrary results.
            for (pick, code) in order.iter().zip(results.iter().cycle()) {
                let index = pick.index(count);
                if agg.mark_dispatched(index) {
                    let result = match code {
                        0 => ObjectResult::Succeeded,
                        1 => ObjectResult::Failed(FailureReason::Protocol { detail: "x".into() }),
                        _ => retry(2),
                    };
                    agg.resolve(index, result);
                }
            }
            for index in 0..count {
                agg.abandon(index);
            }
            let outcomes = agg.outcomes().unwrap();
            prop_assert_eq!(outcomes.len(), count);
            for (outcome, token) in outcomes.iter().zip(&tokens) {
                prop_assert_eq!(outcome.token.as_str(), token.as_str());
            }
        }
    }
}
