//! Concurrency budget and the AIMD controller that adapts it.
//!
//! The budget holds two numbers per connection: how many batches may be in
//! flight and how many objects a batch should target. Every update is a
//! single atomic `fetch_update`, so concurrent dispatch tasks never lose an
//! adjustment.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use akidb_client_core::ConcurrencyConfig;
use tokio::sync::Notify;

use crate::connection::ConnectionState;

/// Current in-flight limit and target batch size for one connection.
#[derive(Debug)]
pub struct ConcurrencyBudget {
    max_in_flight: AtomicUsize,
    target_batch_size: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight_cap: usize,
    batch_size_cap: usize,
    released: Notify,
}

impl ConcurrencyBudget {
    /// Initial values are clamped into `1..=cap`.
    #[must_use]
    pub fn new(
        initial_in_flight: usize,
        max_in_flight_cap: usize,
        initial_batch_size: usize,
        batch_size_cap: usize,
    ) -> Self {
        let max_in_flight_cap = max_in_flight_cap.max(1);
        let batch_size_cap = batch_size_cap.max(1);
        Self {
            max_in_flight: AtomicUsize::new(initial_in_flight.clamp(1, max_in_flight_cap)),
            target_batch_size: AtomicUsize::new(initial_batch_size.clamp(1, batch_size_cap)),
            in_flight: AtomicUsize::new(0),
            max_in_flight_cap,
            batch_size_cap,
            released: Notify::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ConcurrencyConfig, max_batch_count: usize) -> Self {
        Self::new(
            config.initial_max_in_flight,
            config.max_in_flight_cap,
            config.initial_batch_size.unwrap_or(max_batch_count),
            max_batch_count,
        )
    }

    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn target_batch_size(&self) -> usize {
        self.target_batch_size.load(Ordering::Acquire)
    }

    /// Batches currently holding a permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn max_in_flight_cap(&self) -> usize {
        self.max_in_flight_cap
    }

    #[must_use]
    pub fn batch_size_cap(&self) -> usize {
        self.batch_size_cap
    }

    /// Takes a slot if one is free under the current limit.
    pub fn try_acquire(self: &Arc<Self>) -> Option<InFlightPermit> {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_in_flight()).then_some(current + 1)
            })
            .ok()
            .map(|_| InFlightPermit {
                budget: Arc::clone(self),
            })
    }

    /// Waits for a slot. This is where back-pressure applies.
    pub async fn acquire(self: &Arc<Self>) -> InFlightPermit {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();
            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            notified.await;
        }
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.released.notify_waiters();
    }

    /// Additive increase of the in-flight limit, multiplicative increase of
    /// the batch size. Both stop at their caps.
    pub(crate) fn grow(&self, growth_factor: f64) {
        let cap = self.max_in_flight_cap;
        let _ = self
            .max_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current + 1).min(cap))
            });
        let cap = self.batch_size_cap;
        let _ = self
            .target_batch_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(grown_batch_size(current, growth_factor, cap))
            });
        self.released.notify_waiters();
    }

    /// Halves both values, never below one.
    pub(crate) fn shrink(&self) {
        let _ = self
            .max_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current / 2).max(1))
            });
        let _ = self
            .target_batch_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current / 2).max(1))
            });
    }
}

fn grown_batch_size(current: usize, growth_factor: f64, cap: usize) -> usize {
    let scaled = (current as f64 * growth_factor).ceil();
    let scaled = if scaled.is_finite() && scaled < cap as f64 {
        scaled as usize
    } else {
        cap
    };
    scaled.max(current + 1).min(cap)
}

/// Slot in the in-flight budget, returned on drop.
#[derive(Debug)]
pub struct InFlightPermit {
    budget: Arc<ConcurrencyBudget>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.budget.release();
    }
}

/// Outcome class of one dispatch attempt, as the controller sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Success,
    /// Transient failure or timeout
    Transient,
    /// Permanent failure; says nothing about server load
    Permanent,
}

/// What the controller did with the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Increased,
    Held,
    Decreased,
}

/// AIMD policy over a [`ConcurrencyBudget`].
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    window_size: usize,
    low_watermark: f64,
    growth_factor: f64,
    latency_target: Option<Duration>,
}

impl AdaptiveController {
    #[must_use]
    pub fn new(config: &ConcurrencyConfig) -> Self {
        Self {
            window_size: config.window_size.max(1),
            low_watermark: config.low_watermark,
            growth_factor: config.growth_factor.max(1.0),
            latency_target: config.latency_target(),
        }
    }

    /// Applies the adjustment rule after one attempt.
    ///
    /// A success grows the budget only while the error rate over the last
    /// `window_size` calls is below the low watermark and the attempt met the
    /// latency target; a slower success holds it. Transient failures halve it.
    pub fn on_attempt(
        &self,
        budget: &ConcurrencyBudget,
        state: &ConnectionState,
        result: AttemptResult,
        latency: Duration,
    ) -> Adjustment {
        match result {
            AttemptResult::Success => {
                let fast_enough = self.latency_target.map_or(true, |target| latency <= target);
                if fast_enough && state.error_rate(self.window_size) < self.low_watermark {
                    budget.grow(self.growth_factor);
                    Adjustment::Increased
                } else {
                    Adjustment::Held
                }
            }
            AttemptResult::Transient => {
                budget.shrink();
                Adjustment::Decreased
            }
            AttemptResult::Permanent => Adjustment::Held,
        }
    }
}

#[cfg(test)]
mod tests {
    use akidb_client_core::{SchemaVersion, TransportErrorKind};
    use proptest::prelude::*;

    use super::*;

    fn controller() -> AdaptiveController {
        AdaptiveController::new(&ConcurrencyConfig::default())
    }

    fn state() -> ConnectionState {
        ConnectionState::new(SchemaVersion::V6, 20, 3)
    }

    #[test]
    fn test_initial_values_are_clamped() {
        let budget = ConcurrencyBudget::new(0, 4, 500, 100);
        assert_eq!(budget.max_in_flight(), 1);
        assert_eq!(budget.target_batch_size(), 100);
    }

    #[test]
    fn test_growth_factor_always_makes_progress() {
        assert_eq!(grown_batch_size(1, 1.25, 100), 2);
        assert_eq!(grown_batch_size(10, 1.25, 100), 13);
        assert_eq!(grown_batch_size(90, 1.25, 100), 100);
        assert_eq!(grown_batch_size(100, 1.25, 100), 100);
        assert_eq!(grown_batch_size(5, f64::INFINITY, 100), 100);
    }

    #[test]
    fn test_success_grows_and_transient_halves() {
        let budget = ConcurrencyBudget::new(2, 16, 40, 100);
        let state = state();
        let controller = controller();

        state.record(Duration::from_millis(10), Ok(()));
        let adjustment =
            controller.on_attempt(&budget, &state, AttemptResult::Success, Duration::from_millis(10));
        assert_eq!(adjustment, Adjustment::Increased);
        assert_eq!(budget.max_in_flight(), 3);
        assert_eq!(budget.target_batch_size(), 50);

        controller.on_attempt(&budget, &state, AttemptResult::Transient, Duration::ZERO);
        assert_eq!(budget.max_in_flight(), 1);
        assert_eq!(budget.target_batch_size(), 25);

        controller.on_attempt(&budget, &state, AttemptResult::Permanent, Duration::ZERO);
        assert_eq!(budget.max_in_flight(), 1);
    }

    #[test]
    fn test_success_holds_while_error_rate_is_high() {
        let budget = ConcurrencyBudget::new(2, 16, 10, 100);
        let state = state();
        state.record(Duration::ZERO, Err(TransportErrorKind::Unavailable));
        state.record(Duration::ZERO, Ok(()));
        let adjustment =
            controller().on_attempt(&budget, &state, AttemptResult::Success, Duration::ZERO);
        assert_eq!(adjustment, Adjustment::Held);
        assert_eq!(budget.max_in_flight(), 2);
    }

    #[test]
    fn test_slow_success_holds() {
        let budget = ConcurrencyBudget::new(2, 16, 10, 100);
        let adjustment = controller().on_attempt(
            &budget,
            &state(),
            AttemptResult::Success,
            Duration::from_secs(60),
        );
        assert_eq!(adjustment, Adjustment::Held);
    }

    #[tokio::test]
    async fn test_permits_block_at_limit() {
        let budget = Arc::new(ConcurrencyBudget::new(1, 4, 10, 10));
        let first = budget.acquire().await;
        assert!(budget.try_acquire().is_none());
        assert_eq!(budget.in_flight(), 1);

        let waiter = {
            let budget = Arc::clone(&budget);
            tokio::spawn(async move { budget.acquire().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = waiter.await.unwrap();
        assert_eq!(budget.in_flight(), 1);
        drop(second);
        assert_eq!(budget.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_growth_wakes_waiters() {
        let budget = Arc::new(ConcurrencyBudget::new(1, 4, 10, 10));
        let _held = budget.acquire().await;
        let waiter = {
            let budget = Arc::clone(&budget);
            tokio::spawn(async move { budget.acquire().await })
        };
        tokio::task::yield_now().await;
        budget.grow(2.0);
        let permit = waiter.await.unwrap();
        assert_eq!(budget.in_flight(), 2);
        drop(permit);
    }

    proptest! {
        #[test]
        fn prop_budget_stays_within_bounds(
            results in prop::collection::vec(0u8..3, 1..200),
            cap in 1usize..32,
            batch_cap in 1usize..500,
        ) {
            let budget = ConcurrencyBudget::new(2, cap, batch_cap, batch_cap);
            let state = state();
            let controller = controller();
            for code in results {
                let result = match code {
                    0 => AttemptResult::Success,
                    1 => AttemptResult::Transient,
                    _ => AttemptResult::Permanent,
                };
                let outcome = match result {
                    AttemptResult::Transient => Err(TransportErrorKind::Unavailable),
                    _ => Ok(()),
                };
                state.record(Duration::from_millis(5), outcome);
                controller.on_attempt(&budget, &state, result, Duration::from_millis(5));
                prop_assert!(budget.max_in_flight() >= 1);
                prop_assert!(budget.max_in_flight() <= cap);
                prop_assert!(budget.target_batch_size() >= 1);
                prop_assert!(budget.target_batch_size() <= batch_cap);
            }
        }
    }
}
