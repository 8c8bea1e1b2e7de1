pub mod builders;
pub mod fake_process;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

pub use fake_process::{
    ChannelBehaviour, FakeIpcChannel, FakeProcess, FakeProcessControl, FakeProcessFactory,
};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// Logs go through `with_test_writer()`, so the harness only shows them for
/// failing tests. Enable levels with e.g. `RUST_LOG=rolld=debug cargo test`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Poll `condition` every few milliseconds until it holds; panics after 5
/// seconds. Exit watchers run on their own tasks, so their effects show up
/// asynchronously.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    with_timeout(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// Async flavour of [`wait_until`].
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    with_timeout(async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
