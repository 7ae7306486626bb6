// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Tether Contributors. All rights reserved.
//  https://github.com/tether-rs/tether
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Provides an implementation of an exponential backoff mechanism with jitter support.
//! It is used for managing reconnection delays in the session client.
//!
//! [`ExponentialBackoff`] is a pure policy: it maps an attempt number to a delay, growing
//! exponentially up to a configurable maximum and then scaling by a random jitter factor
//! to avoid synchronized reconnection storms.
//!
//! [`Backoff`] couples a policy with the attempt counter and a cancellable wait, so a
//! sleeping reconnect loop can be woken from any task or thread.

use std::{
    fmt::Display,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use rand::Rng;
use tether_core::{
    MUTEX_POISONED,
    correctness::{check_in_range_inclusive_f64, check_predicate_true},
};
use tokio_util::sync::CancellationToken;

/// An exponential backoff policy with symmetric multiplicative jitter.
///
/// The delay for attempt `n` (0-indexed) is `delay_initial * factor^n`, capped at
/// `delay_max`, then scaled by a uniform random factor in `[1 - jitter, 1 + jitter]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ExponentialBackoff {
    /// The delay for the first attempt.
    delay_initial: Duration,
    /// The maximum delay to cap the backoff (before jitter).
    delay_max: Duration,
    /// The factor to multiply the delay on each attempt.
    factor: f64,
    /// The jitter fraction applied symmetrically around the base delay.
    jitter: f64,
}

impl ExponentialBackoff {
    /// Creates a new [`ExponentialBackoff`] instance.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `delay_initial` is zero.
    /// - `delay_max` is less than `delay_initial`.
    /// - `factor` is not in the range [1.0, 100.0].
    /// - `jitter` is not in the range [0.0, 1.0).
    pub fn new(
        delay_initial: Duration,
        delay_max: Duration,
        factor: f64,
        jitter: f64,
    ) -> anyhow::Result<Self> {
        check_predicate_true(!delay_initial.is_zero(), "`delay_initial` must be positive")?;
        check_predicate_true(
            delay_max >= delay_initial,
            "`delay_max` must be greater than or equal to `delay_initial`",
        )?;
        check_in_range_inclusive_f64(factor, 1.0, 100.0, "factor")?;
        check_in_range_inclusive_f64(jitter, 0.0, 1.0, "jitter")?;
        check_predicate_true(jitter < 1.0, "`jitter` must be less than 1.0")?;

        Ok(Self {
            delay_initial,
            delay_max,
            factor,
            jitter,
        })
    }

    /// Returns the delay for the first attempt.
    #[must_use]
    pub const fn delay_initial(&self) -> Duration {
        self.delay_initial
    }

    /// Returns the maximum delay before jitter.
    #[must_use]
    pub const fn delay_max(&self) -> Duration {
        self.delay_max
    }

    /// Returns the growth factor.
    #[must_use]
    pub const fn factor(&self) -> f64 {
        self.factor
    }

    /// Returns the jitter fraction.
    #[must_use]
    pub const fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Returns the base delay for `attempt` before any jitter is applied.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.delay_initial.as_secs_f64() * self.factor.powi(exponent);
        // powi overflows to infinity for large attempts, which `min` folds into the cap
        Duration::from_secs_f64(secs.min(self.delay_max.as_secs_f64()))
    }

    /// Returns the delay for `attempt` scaled by an explicit `jitter_factor`.
    ///
    /// The factor is clamped to `[1 - jitter, 1 + jitter]`.
    #[must_use]
    pub fn delay_with_factor(&self, attempt: u32, jitter_factor: f64) -> Duration {
        let factor = jitter_factor.clamp(1.0 - self.jitter, 1.0 + self.jitter);
        self.base_delay(attempt).mul_f64(factor)
    }

    /// Returns the largest delay this policy can produce.
    #[must_use]
    pub fn max_delay_with_jitter(&self) -> Duration {
        self.delay_max.mul_f64(1.0 + self.jitter)
    }

    /// Returns the jittered delay for `attempt` using the thread-local random generator.
    #[must_use]
    pub fn next_duration(&self, attempt: u32) -> Duration {
        self.next_duration_with(attempt, &mut rand::rng())
    }

    /// Returns the jittered delay for `attempt` drawing the jitter factor from `rng`.
    pub fn next_duration_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        if self.jitter == 0.0 {
            return self.base_delay(attempt);
        }
        let jitter_factor = rng.random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        self.delay_with_factor(attempt, jitter_factor)
    }
}

/// The result of a [`Backoff::wait`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full delay elapsed.
    Elapsed,
    /// The wait was cut short by [`Backoff::interrupt`].
    Interrupted,
    /// The wait was cut short by the shutdown token.
    Shutdown,
}

impl Display for WaitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Elapsed => "elapsed",
            Self::Interrupted => "interrupted",
            Self::Shutdown => "shutdown",
        };
        write!(f, "{s}")
    }
}

/// Backoff state: the attempt counter plus the handle of the wait in progress, if any.
///
/// The counter increments on each [`Backoff::wait`] and is only reset explicitly, so an
/// interrupted wait still counts as an attempt.
///
/// An interrupt that finds no wait in progress is held until the next wait, which then
/// returns immediately. [`Backoff::clear_interrupt`] discards a held interrupt.
#[derive(Debug)]
pub struct Backoff {
    policy: ExponentialBackoff,
    attempt: AtomicU32,
    current_wait: Mutex<Option<CancellationToken>>,
    // Only read or written while `current_wait` is locked
    interrupt_pending: AtomicBool,
}

impl Backoff {
    /// Creates a new [`Backoff`] with the attempt counter at zero.
    #[must_use]
    pub fn new(policy: ExponentialBackoff) -> Self {
        Self {
            policy,
            attempt: AtomicU32::new(0),
            current_wait: Mutex::new(None),
            interrupt_pending: AtomicBool::new(false),
        }
    }

    /// Returns the underlying policy.
    #[must_use]
    pub const fn policy(&self) -> &ExponentialBackoff {
        &self.policy
    }

    /// Returns the attempt number the next wait will use.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Acquire)
    }

    /// Resets the attempt counter to zero.
    pub fn reset(&self) {
        self.attempt.store(0, Ordering::Release);
    }

    /// Returns whether a wait is currently in progress.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.current_wait.lock().expect(MUTEX_POISONED).is_some()
    }

    /// Cancels the wait in progress, returning whether there was one.
    ///
    /// With no wait in progress the interrupt is held and cuts the next wait short.
    pub fn interrupt(&self) -> bool {
        let current = self.current_wait.lock().expect(MUTEX_POISONED);
        match current.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => {
                self.interrupt_pending.store(true, Ordering::Release);
                false
            }
        }
    }

    /// Discards an interrupt held for the next wait, returning whether there was one.
    pub fn clear_interrupt(&self) -> bool {
        let _current = self.current_wait.lock().expect(MUTEX_POISONED);
        self.interrupt_pending.swap(false, Ordering::AcqRel)
    }

    /// Sleeps for the delay of the current attempt, then advances the counter.
    ///
    /// Returns early if [`Backoff::interrupt`] is called, or was called since the last
    /// wait, or if `shutdown` is cancelled.
    pub async fn wait(&self, shutdown: &CancellationToken) -> WaitOutcome {
        let token = CancellationToken::new();
        {
            let mut current = self.current_wait.lock().expect(MUTEX_POISONED);
            if self.interrupt_pending.swap(false, Ordering::AcqRel) {
                token.cancel();
            }
            *current = Some(token.clone());
        }

        // Read once the token is installed so a concurrent reset and interrupt both land
        let attempt = self.attempt.fetch_add(1, Ordering::AcqRel);
        let delay = self.policy.next_duration(attempt);

        tracing::warn!(
            "Backing off for {:.3}s (attempt {attempt})",
            delay.as_secs_f64()
        );

        let outcome = tokio::select! {
            () = tokio::time::sleep(delay) => WaitOutcome::Elapsed,
            () = token.cancelled() => WaitOutcome::Interrupted,
            () = shutdown.cancelled() => WaitOutcome::Shutdown,
        };

        self.current_wait.lock().expect(MUTEX_POISONED).take();
        if outcome != WaitOutcome::Elapsed {
            tracing::debug!("Backoff wait {outcome}");
        }
        outcome
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::{SeedableRng, rngs::StdRng};
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn policy() -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(300), 2.0, 0.2)
            .unwrap()
    }

    fn no_jitter() -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(300), 2.0, 0.0)
            .unwrap()
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(3, 8)]
    #[case(8, 256)]
    #[case(9, 300)]
    #[case(50, 300)]
    #[case(u32::MAX, 300)]
    fn test_base_delay(policy: ExponentialBackoff, #[case] attempt: u32, #[case] secs: u64) {
        assert_eq!(policy.base_delay(attempt), Duration::from_secs(secs));
    }

    #[rstest]
    fn test_delay_with_factor_bounds(policy: ExponentialBackoff) {
        assert_eq!(policy.delay_with_factor(0, 0.8), Duration::from_millis(800));
        assert_eq!(policy.delay_with_factor(0, 1.2), Duration::from_millis(1200));
        // Out of range factors are clamped
        assert_eq!(policy.delay_with_factor(1, 0.1), Duration::from_millis(1600));
        assert_eq!(policy.delay_with_factor(20, 5.0), Duration::from_secs(360));
    }

    #[rstest]
    fn test_max_delay_with_jitter(policy: ExponentialBackoff) {
        assert_eq!(policy.max_delay_with_jitter(), Duration::from_secs(360));
    }

    #[rstest]
    fn test_next_duration_with_seeded_rng_is_reproducible(policy: ExponentialBackoff) {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        for attempt in 0..12 {
            assert_eq!(
                policy.next_duration_with(attempt, &mut a),
                policy.next_duration_with(attempt, &mut b)
            );
        }
    }

    #[rstest]
    fn test_next_duration_within_jitter_bounds(policy: ExponentialBackoff) {
        for attempt in 0..12 {
            let base = policy.base_delay(attempt);
            for _ in 0..20 {
                let delay = policy.next_duration(attempt);
                assert!(delay >= base.mul_f64(0.8), "{delay:?} below bound for {attempt}");
                assert!(delay <= base.mul_f64(1.2), "{delay:?} above bound for {attempt}");
            }
        }
    }

    #[rstest]
    fn test_zero_jitter_is_exact() {
        let policy = no_jitter();
        assert_eq!(policy.next_duration(2), Duration::from_secs(4));
    }

    #[rstest]
    #[case(Duration::ZERO, Duration::from_secs(1), 2.0, 0.2)]
    #[case(Duration::from_secs(2), Duration::from_secs(1), 2.0, 0.2)]
    #[case(Duration::from_secs(1), Duration::from_secs(10), 0.5, 0.2)]
    #[case(Duration::from_secs(1), Duration::from_secs(10), f64::NAN, 0.2)]
    #[case(Duration::from_secs(1), Duration::from_secs(10), 2.0, 1.0)]
    #[case(Duration::from_secs(1), Duration::from_secs(10), 2.0, -0.1)]
    fn test_new_invalid(
        #[case] initial: Duration,
        #[case] max: Duration,
        #[case] factor: f64,
        #[case] jitter: f64,
    ) {
        assert!(ExponentialBackoff::new(initial, max, factor, jitter).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_advances_attempt_and_sleeps_base_delay() {
        let backoff = Backoff::new(no_jitter());
        let shutdown = CancellationToken::new();

        let start = tokio::time::Instant::now();
        assert_eq!(backoff.wait(&shutdown).await, WaitOutcome::Elapsed);
        assert_eq!(backoff.wait(&shutdown).await, WaitOutcome::Elapsed);
        assert_eq!(backoff.wait(&shutdown).await, WaitOutcome::Elapsed);

        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert_eq!(backoff.attempt(), 3);
        assert!(!backoff.is_waiting());

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_wakes_wait_and_keeps_counter() {
        let backoff = Arc::new(Backoff::new(no_jitter()));
        let shutdown = CancellationToken::new();

        // Push the counter up so the next wait is long
        backoff.attempt.store(8, Ordering::Release);

        let backoff_clone = backoff.clone();
        let handle = tokio::spawn(async move { backoff_clone.wait(&shutdown).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(backoff.is_waiting());

        let start = tokio::time::Instant::now();
        assert!(backoff.interrupt());
        assert_eq!(handle.await.unwrap(), WaitOutcome::Interrupted);

        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(backoff.attempt(), 9);
        assert!(!backoff.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_wait() {
        let backoff = Backoff::new(no_jitter());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert_eq!(backoff.wait(&shutdown).await, WaitOutcome::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_before_wait_is_held_for_next_wait() {
        let backoff = Backoff::new(no_jitter());
        let shutdown = CancellationToken::new();
        backoff.attempt.store(8, Ordering::Release);

        assert!(!backoff.interrupt());

        let start = tokio::time::Instant::now();
        assert_eq!(backoff.wait(&shutdown).await, WaitOutcome::Interrupted);
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(backoff.attempt(), 9);

        // Consumed by the first wait
        assert_eq!(backoff.wait(&shutdown).await, WaitOutcome::Elapsed);
        assert_eq!(start.elapsed(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_interrupt_discards_held_interrupt() {
        let backoff = Backoff::new(no_jitter());
        let shutdown = CancellationToken::new();

        assert!(!backoff.clear_interrupt());
        assert!(!backoff.interrupt());
        assert!(backoff.clear_interrupt());

        let start = tokio::time::Instant::now();
        assert_eq!(backoff.wait(&shutdown).await, WaitOutcome::Elapsed);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupt_racing_wait_start_is_never_lost() {
        for i in 0..200 {
            let backoff = Arc::new(Backoff::new(no_jitter()));
            backoff.attempt.store(8, Ordering::Release);
            let shutdown = CancellationToken::new();

            let backoff_clone = backoff.clone();
            let handle = tokio::spawn(async move { backoff_clone.wait(&shutdown).await });

            // Alternate between landing before the wait starts and just after
            if i % 2 == 0 {
                while backoff.attempt() == 8 {
                    std::hint::spin_loop();
                }
            }
            backoff.interrupt();

            let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("wait was not woken")
                .unwrap();
            assert_eq!(outcome, WaitOutcome::Interrupted, "iteration {i}");
            assert_eq!(backoff.attempt(), 9);
        }
    }
}
