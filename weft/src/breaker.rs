//! Circuit breaker guarding periodic operations.
//!
//! Three states: Closed (calls pass, consecutive failures counted), Open
//! (calls refuse immediately), HalfOpen (exactly one probe in flight).
//! Reaching the failure threshold opens the circuit; after the reset timeout
//! the next admission check passes exactly once and moves to HalfOpen, where
//! a success closes the circuit and a failure re-opens it.
//!
//! Sync/download cycles run under [`CircuitBreaker::run_loop`], which fires
//! immediately, then on every interval tick or out-of-band trigger signal,
//! and reports each error to a callback instead of propagating.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::WeftError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// One breaker per named loop; state transitions under a mutex.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker. `failure_threshold` consecutive failures
    /// open it; after `reset_timeout` one probe is admitted.
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Current state (Open flips to HalfOpen lazily inside [`Self::allow`]).
    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock").state
    }

    /// Admission check. Closed always admits. Open admits exactly once after
    /// the reset timeout has elapsed, transitioning to HalfOpen; HalfOpen
    /// admits nothing while its probe is in flight.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => !inner.probe_in_flight,
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }

    /// Runs `f` once under the breaker. Refuses with `CircuitOpen` when not
    /// admitted; otherwise records the outcome and passes the error through.
    pub async fn execute<F, Fut>(&self, ctx: &CancellationToken, f: F) -> Result<(), WeftError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), WeftError>>,
    {
        if ctx.is_cancelled() {
            return Err(WeftError::Canceled);
        }
        if !self.allow() {
            return Err(WeftError::CircuitOpen(self.name.clone()));
        }
        match f(ctx.clone()).await {
            Ok(()) => {
                self.on_success();
                Ok(())
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    /// Runs `f` up to `attempts` times, sleeping `sleep` between failures.
    /// Returns `CircuitOpen` immediately when the breaker is open at start;
    /// the sleep respects cancellation.
    pub async fn execute_with_retry<F, Fut>(
        &self,
        ctx: &CancellationToken,
        sleep: Duration,
        attempts: u32,
        f: F,
    ) -> Result<(), WeftError>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), WeftError>>,
    {
        if self.state() == BreakerState::Open && !self.allow_would_admit() {
            return Err(WeftError::CircuitOpen(self.name.clone()));
        }
        let mut last = WeftError::CircuitOpen(self.name.clone());
        for attempt in 0..attempts.max(1) {
            match self.execute(ctx, &f).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(breaker = %self.name, attempt, error = %e, "attempt failed");
                    last = e;
                }
            }
            if attempt + 1 < attempts.max(1) {
                tokio::select! {
                    _ = ctx.cancelled() => return Err(WeftError::Canceled),
                    _ = tokio::time::sleep(sleep) => {}
                }
            }
        }
        Err(last)
    }

    /// Whether an admission check would currently pass, without consuming the
    /// HalfOpen probe slot.
    fn allow_would_admit(&self) -> bool {
        let inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => inner
                .opened_at
                .map(|t| t.elapsed() >= self.reset_timeout)
                .unwrap_or(true),
            BreakerState::HalfOpen => !inner.probe_in_flight,
        }
    }

    /// Runs `f` immediately, then on each `interval` tick or message on
    /// `trigger` (whichever comes first), surfacing every error to `on_err`.
    /// Exits when `ctx` is cancelled.
    pub async fn run_loop<F, Fut, E>(
        &self,
        ctx: CancellationToken,
        interval: Duration,
        trigger: Option<broadcast::Receiver<Value>>,
        f: F,
        on_err: E,
    ) where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), WeftError>>,
        E: Fn(&WeftError),
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // consume the immediate first tick

        if let Err(e) = self.execute(&ctx, &f).await {
            on_err(&e);
        }

        let mut trigger = trigger;
        loop {
            let triggered = async {
                match trigger.as_mut() {
                    Some(rx) => loop {
                        match rx.recv().await {
                            Ok(_) => break,
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => {
                                // Sender gone; fall back to interval-only.
                                std::future::pending::<()>().await;
                            }
                        }
                    },
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => {}
                _ = triggered => {}
            }
            if let Err(e) = self.execute(&ctx, &f).await {
                on_err(&e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn breaker(n: u32, t: Duration) -> CircuitBreaker {
        CircuitBreaker::new("test", n, t)
    }

    /// **Scenario**: N consecutive failures from Closed open the circuit; the
    /// next call refuses without invoking f.
    #[tokio::test]
    async fn trips_open_after_threshold() {
        let b = breaker(2, Duration::from_millis(200));
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let r = b
                .execute(&ctx, move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(WeftError::Transport("down".into()))
                })
                .await;
            assert!(r.is_err());
        }
        assert_eq!(b.state(), BreakerState::Open);

        let calls2 = Arc::clone(&calls);
        let r = b
            .execute(&ctx, move |_| async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(r, Err(WeftError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// **Scenario**: after the reset timeout one probe is admitted; success
    /// closes the circuit with the counter zeroed.
    #[tokio::test]
    async fn half_open_probe_success_closes() {
        let b = breaker(1, Duration::from_millis(50));
        let ctx = CancellationToken::new();
        let _ = b
            .execute(&ctx, |_| async { Err(WeftError::Transport("x".into())) })
            .await;
        assert_eq!(b.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(70)).await;
        let r = b.execute(&ctx, |_| async { Ok(()) }).await;
        assert!(r.is_ok());
        assert_eq!(b.state(), BreakerState::Closed);
    }

    /// **Scenario**: failure during the HalfOpen probe re-opens with a fresh
    /// timestamp.
    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let b = breaker(1, Duration::from_millis(50));
        let ctx = CancellationToken::new();
        let _ = b
            .execute(&ctx, |_| async { Err(WeftError::Transport("x".into())) })
            .await;
        tokio::time::sleep(Duration::from_millis(70)).await;
        let r = b
            .execute(&ctx, |_| async { Err(WeftError::Transport("y".into())) })
            .await;
        assert!(r.is_err());
        assert_eq!(b.state(), BreakerState::Open);
        // Immediately after re-opening, calls refuse again.
        let r = b.execute(&ctx, |_| async { Ok(()) }).await;
        assert!(matches!(r, Err(WeftError::CircuitOpen(_))));
    }

    /// **Scenario**: exactly one call is admitted in HalfOpen.
    #[tokio::test]
    async fn half_open_admits_single_probe() {
        let b = breaker(1, Duration::from_millis(10));
        let ctx = CancellationToken::new();
        let _ = b
            .execute(&ctx, |_| async { Err(WeftError::Transport("x".into())) })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(b.allow());
        assert!(!b.allow());
    }

    /// **Scenario**: retry sleeps between failures and returns the last error.
    #[tokio::test]
    async fn retry_returns_last_error() {
        let b = breaker(10, Duration::from_millis(200));
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let r = b
            .execute_with_retry(&ctx, Duration::from_millis(1), 3, move |_| {
                let calls = Arc::clone(&calls2);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Err(WeftError::Transport(format!("attempt {}", n)))
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(r, Err(WeftError::Transport(ref m)) if m == "attempt 2"));
    }

    /// **Scenario**: run_loop fires immediately, then again on a trigger
    /// signal, and exits on cancellation.
    #[tokio::test]
    async fn run_loop_immediate_and_triggered() {
        let b = Arc::new(breaker(5, Duration::from_millis(200)));
        let ctx = CancellationToken::new();
        let (tx, rx) = broadcast::channel(4);
        let count = Arc::new(AtomicU32::new(0));

        let loop_ctx = ctx.clone();
        let loop_count = Arc::clone(&count);
        let loop_b = Arc::clone(&b);
        let handle = tokio::spawn(async move {
            loop_b
                .run_loop(
                    loop_ctx,
                    Duration::from_secs(3600),
                    Some(rx),
                    move |_| {
                        let c = Arc::clone(&loop_count);
                        async move {
                            c.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    },
                    |_| {},
                )
                .await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        tx.send(serde_json::json!({})).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        ctx.cancel();
        handle.await.unwrap();
    }
}
