//! Per-service circuit breaker state machine, with progressive backoff.
//!
//! State lives in atomics behind an `Arc`, and transitions go through
//! `compare_exchange` so concurrent `enter`/`record` calls on the same service
//! serialize without a mutex. The machine is richer than a textbook breaker: a
//! `half_open` state that requires `success_threshold` consecutive successes
//! (not one), a `retry_count` that grows the dwell on each failed half-open
//! probe, and a gradual failure-count decay in `closed` state rather than
//! reset-to-zero on any success.
//!
//! `enter` and `record` are two separate calls rather than a single wrapped
//! closure: the proxy handler must release the admission permit and relay the
//! upstream response between deciding to proceed and recording the outcome.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, MonotonicClock};
use crate::policy::ServicePolicy;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Decision returned by [`CircuitBreaker::enter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    Reject { retry_after: Duration },
}

/// Outcome recorded by [`CircuitBreaker::record`]. `status_code` distinguishes a
/// successful-but-5xx upstream response (a failure in its own right) from a
/// transport failure, and from a genuine 2xx/3xx/4xx success.
#[derive(Debug, Clone, Copy)]
pub enum RecordOutcome {
    Success { status_code: u16 },
    Failure,
}

struct Inner {
    state: AtomicU8,
    failure_count: AtomicUsize,
    consecutive_successes: AtomicUsize,
    opened_at_millis: AtomicU64,
    retry_count: AtomicUsize,
    half_open_in_flight: AtomicUsize,
}

/// One service's breaker. Cloning is cheap (shares the underlying `Arc`).
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
    policy: ServicePolicy,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(policy: ServicePolicy) -> Self {
        Self::with_clock(policy, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(policy: ServicePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(STATE_CLOSED),
                failure_count: AtomicUsize::new(0),
                consecutive_successes: AtomicUsize::new(0),
                opened_at_millis: AtomicU64::new(0),
                retry_count: AtomicUsize::new(0),
                half_open_in_flight: AtomicUsize::new(0),
            }),
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &ServicePolicy {
        &self.policy
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.inner.state.load(Ordering::Acquire))
    }

    pub fn failure_count(&self) -> usize {
        self.inner.failure_count.load(Ordering::Acquire)
    }

    /// `effective_dwell = base_timeout × min(5, 1 + retry_count × backoff_factor)`.
    /// `retry_count` here is the value *before* the half-open attempt that is
    /// about to be granted increments it.
    fn effective_dwell(&self, retry_count: usize) -> Duration {
        let multiplier = (1.0 + retry_count as f64 * self.policy.backoff_factor).min(5.0);
        Duration::from_secs_f64(self.policy.base_timeout.as_secs_f64() * multiplier)
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Decide whether this request may proceed to the upstream call.
    ///
    /// Half-open allows exactly one in-flight probe per service: a concurrent
    /// second caller observing `half_open` is rejected the same as if the
    /// circuit were still open.
    pub fn enter(&self) -> Admission {
        loop {
            let current = self.inner.state.load(Ordering::Acquire);
            match current {
                STATE_OPEN => {
                    let opened_at = self.inner.opened_at_millis.load(Ordering::Acquire);
                    let now = self.now_millis();
                    let elapsed = Duration::from_millis(now.saturating_sub(opened_at));
                    let retry_count = self.inner.retry_count.load(Ordering::Acquire);
                    let dwell = self.effective_dwell(retry_count);

                    if elapsed > dwell {
                        match self.inner.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                self.inner.retry_count.fetch_add(1, Ordering::AcqRel);
                                self.inner.half_open_in_flight.store(1, Ordering::Release);
                                tracing::info!(
                                    retry_count = retry_count + 1,
                                    "circuit breaker: open -> half_open"
                                );
                                return Admission::Proceed;
                            }
                            Err(_) => continue,
                        }
                    } else {
                        let retry_after = dwell.saturating_sub(elapsed);
                        return Admission::Reject { retry_after };
                    }
                }
                STATE_HALF_OPEN => {
                    let in_flight = self.inner.half_open_in_flight.fetch_add(1, Ordering::AcqRel);
                    if in_flight >= 1 {
                        self.inner.half_open_in_flight.fetch_sub(1, Ordering::Release);
                        // Another probe is already in flight; fail fast like `open`.
                        return Admission::Reject { retry_after: Duration::from_secs(1) };
                    }
                    return Admission::Proceed;
                }
                _ => return Admission::Proceed,
            }
        }
    }

    /// §4.3 `record`: apply an observed outcome to this service's breaker state.
    pub fn record(&self, outcome: RecordOutcome) {
        let current = self.inner.state.load(Ordering::Acquire);
        let is_failure = match outcome {
            RecordOutcome::Success { status_code } => {
                let counts_as_failure = status_code >= 500
                    || (status_code >= 400 && self.policy.count_4xx_as_failure);
                if counts_as_failure {
                    true
                } else {
                    self.on_success(current, CircuitState::from(current));
                    false
                }
            }
            RecordOutcome::Failure => true,
        };

        if is_failure {
            self.on_failure(current);
        }

        if current == STATE_HALF_OPEN {
            self.inner.half_open_in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn on_success(&self, raw_state: u8, state: CircuitState) {
        match state {
            CircuitState::Closed => {
                // Gradual decay: a chronically flaky service that stays just
                // below threshold can live there forever instead of resetting.
                let _ = self
                    .inner
                    .failure_count
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |f| {
                        Some(f.saturating_sub(1))
                    });
            }
            CircuitState::HalfOpen => {
                let successes =
                    self.inner.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.policy.success_threshold
                    && self
                        .inner
                        .state
                        .compare_exchange(
                            STATE_HALF_OPEN,
                            STATE_CLOSED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.inner.failure_count.store(0, Ordering::Release);
                    self.inner.consecutive_successes.store(0, Ordering::Release);
                    self.inner.retry_count.store(0, Ordering::Release);
                    self.inner.opened_at_millis.store(0, Ordering::Release);
                    tracing::info!(
                        successes,
                        threshold = self.policy.success_threshold,
                        "circuit breaker: half_open -> closed"
                    );
                }
            }
            CircuitState::Open => {
                let _ = raw_state;
            }
        }
    }

    fn on_failure(&self, current: u8) {
        match CircuitState::from(current) {
            CircuitState::HalfOpen => {
                if self
                    .inner
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.inner.consecutive_successes.store(0, Ordering::Release);
                    self.inner.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::warn!("circuit breaker: half_open probe failed -> open");
                }
            }
            CircuitState::Closed => {
                let failures = self.inner.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.policy.failure_threshold
                    && self
                        .inner
                        .state
                        .compare_exchange(
                            STATE_CLOSED,
                            STATE_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.inner.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::error!(
                        failures,
                        threshold = self.policy.failure_threshold,
                        "circuit breaker: closed -> open"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;

    #[derive(Debug)]
    struct ManualClock(StdAtomicU64);

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl ManualClock {
        fn advance(&self, ms: u64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    fn core_policy() -> ServicePolicy {
        ServicePolicy {
            failure_threshold: 5,
            base_timeout: Duration::from_secs(15),
            success_threshold: 2,
            request_timeout: Duration::from_secs_f64(25.0),
            backoff_factor: 1.2,
            admission_capacity: 100,
            count_4xx_as_failure: false,
        }
    }

    #[test]
    fn trips_after_threshold_failures() {
        let breaker = CircuitBreaker::new(core_policy());
        for _ in 0..4 {
            assert_eq!(breaker.enter(), Admission::Proceed);
            breaker.record(RecordOutcome::Failure);
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        assert_eq!(breaker.enter(), Admission::Proceed);
        breaker.record(RecordOutcome::Failure);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn rejects_until_dwell_elapses_then_half_opens() {
        let clock = Arc::new(ManualClock(StdAtomicU64::new(0)));
        let breaker = CircuitBreaker::with_clock(core_policy(), clock.clone());
        for _ in 0..5 {
            breaker.record(RecordOutcome::Failure);
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        match breaker.enter() {
            Admission::Reject { .. } => {}
            Admission::Proceed => panic!("should still be open"),
        }

        clock.advance(15_001);
        assert_eq!(breaker.enter(), Admission::Proceed);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn progressive_backoff_grows_dwell_across_failed_probes() {
        let clock = Arc::new(ManualClock(StdAtomicU64::new(0)));
        let breaker = CircuitBreaker::with_clock(core_policy(), clock.clone());
        for _ in 0..5 {
            breaker.record(RecordOutcome::Failure);
        }

        // retry_count=0 -> dwell 15s; first half-open probe fails.
        clock.advance(15_001);
        assert_eq!(breaker.enter(), Admission::Proceed);
        breaker.record(RecordOutcome::Failure);
        assert_eq!(breaker.state(), CircuitState::Open);

        // retry_count=1 -> dwell 15*(1+1*1.2)=33s.
        clock.advance(32_000);
        assert!(matches!(breaker.enter(), Admission::Reject { .. }));

        clock.advance(2_000);
        assert_eq!(breaker.enter(), Admission::Proceed);
    }

    #[test]
    fn half_open_requires_success_threshold_consecutive_successes() {
        let clock = Arc::new(ManualClock(StdAtomicU64::new(0)));
        let breaker = CircuitBreaker::with_clock(core_policy(), clock.clone());
        for _ in 0..5 {
            breaker.record(RecordOutcome::Failure);
        }
        clock.advance(15_001);
        assert_eq!(breaker.enter(), Admission::Proceed);
        breaker.record(RecordOutcome::Success { status_code: 200 });
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        clock.advance(1);
        // A second concurrent probe is rejected while one is in flight; simulate the
        // sequential case instead (the in-flight probe already completed above).
        assert_eq!(breaker.enter(), Admission::Proceed);
        breaker.record(RecordOutcome::Success { status_code: 200 });
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn any_failure_in_half_open_reopens_and_increments_retry_count() {
        let clock = Arc::new(ManualClock(StdAtomicU64::new(0)));
        let breaker = CircuitBreaker::with_clock(core_policy(), clock.clone());
        for _ in 0..5 {
            breaker.record(RecordOutcome::Failure);
        }
        clock.advance(15_001);
        assert_eq!(breaker.enter(), Admission::Proceed);
        breaker.record(RecordOutcome::Failure);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn closed_state_failure_count_decays_gradually_on_success() {
        let breaker = CircuitBreaker::new(core_policy());
        breaker.record(RecordOutcome::Failure);
        breaker.record(RecordOutcome::Failure);
        assert_eq!(breaker.failure_count(), 2);
        breaker.record(RecordOutcome::Success { status_code: 200 });
        assert_eq!(breaker.failure_count(), 1);
    }

    #[test]
    fn a_5xx_success_counts_as_a_failure() {
        let breaker = CircuitBreaker::new(core_policy());
        breaker.record(RecordOutcome::Success { status_code: 503 });
        assert_eq!(breaker.failure_count(), 1);
    }

    #[test]
    fn a_4xx_success_is_ignored_by_default() {
        let breaker = CircuitBreaker::new(core_policy());
        breaker.record(RecordOutcome::Success { status_code: 404 });
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn a_4xx_success_counts_as_failure_when_policy_opts_in() {
        let mut policy = core_policy();
        policy.count_4xx_as_failure = true;
        let breaker = CircuitBreaker::new(policy);
        breaker.record(RecordOutcome::Success { status_code: 404 });
        assert_eq!(breaker.failure_count(), 1);
    }
}
