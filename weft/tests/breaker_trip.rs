//! Integration test: breaker trips open after N failures, refuses without
//! invoking the wrapped function, then recovers through a HalfOpen probe.

mod init_logging;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use weft::{BreakerState, CircuitBreaker, WeftError};

#[tokio::test]
async fn breaker_trips_refuses_then_recovers() {
    let breaker = CircuitBreaker::new("test", 2, Duration::from_millis(200));
    let ctx = CancellationToken::new();
    let invocations = Arc::new(AtomicU32::new(0));

    // Two failures trip the breaker open.
    for _ in 0..2 {
        let n = Arc::clone(&invocations);
        let result = breaker
            .execute(&ctx, move |_| async move {
                n.fetch_add(1, Ordering::SeqCst);
                Err(WeftError::Transport("backend down".into()))
            })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(breaker.state(), BreakerState::Open);
    assert_eq!(invocations.load(Ordering::SeqCst), 2);

    // Third call refuses immediately without invoking f.
    let n = Arc::clone(&invocations);
    let refused = breaker
        .execute(&ctx, move |_| async move {
            n.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert!(matches!(refused, Err(WeftError::CircuitOpen(_))));
    assert_eq!(invocations.load(Ordering::SeqCst), 2);

    // After the reset timeout the first call is admitted and executes f;
    // success closes the circuit.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let n = Arc::clone(&invocations);
    breaker
        .execute(&ctx, move |_| async move {
            n.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .expect("probe succeeds");
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(breaker.state(), BreakerState::Closed);
}
