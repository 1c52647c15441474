//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; applications (and tests that want
//! to see device diagnostics) call [`init_tracing`] once to print them.
//! Filtering follows `RUST_LOG`, defaulting to `info`.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Failure to install the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// [`init_tracing`] already ran in this process.
    #[error("tracing already initialised")]
    AlreadyInitialised,
    /// Another subscriber was installed first.
    #[error("failed to install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs a formatted, `RUST_LOG`-filtered subscriber.
///
/// # Errors
///
/// Returns [`InitError::AlreadyInitialised`] after a successful call and
/// [`InitError::Install`] while some other global subscriber is set.
pub fn init_tracing() -> Result<(), InitError> {
    if INITIALISED.get().is_some() {
        return Err(InitError::AlreadyInitialised);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    Registry::default().with(filter).with(fmt_layer).try_init()?;
    // a racing caller that lost `try_init` already got `Install`
    let _ = INITIALISED.set(());

    Ok(())
}
