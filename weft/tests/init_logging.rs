//! Test-only: installs a tracing subscriber from `RUST_LOG` when the test
//! binary starts, so cycle and bridge traces show up under `--nocapture`.
//!
//! Include `mod init_logging;` in an integration test file. Without it no
//! subscriber is installed and log events are dropped.
//!
//! ```bash
//! RUST_LOG=weft=debug cargo test -p weft -- --nocapture
//! ```

use ctor::ctor;
use tracing_subscriber::EnvFilter;

#[ctor]
fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
