//! Signal handling: first signal asks workers to finish up, second signal
//! exits immediately (spec §5 "Cancellation semantics").
//!
//! Grounded in `register_sigint_handler`/`sigint_received`
//! (`crates/psql/src/signals.rs`), which sets an `AtomicBool` from a
//! `ctrlc` handler; this generalises the single flag into a two-stage
//! counter and wires it to a [`tokio_util::sync::CancellationToken`] so the
//! worker pool (`worker.rs`) observes it directly instead of polling.

use std::process;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};

static SIGNAL_COUNT: AtomicU8 = AtomicU8::new(0);

/// Installs the process-wide Ctrl-C handler and returns a token that is
/// cancelled on the first signal. A second signal exits the process
/// immediately, bypassing any in-flight cleanup.
pub fn install(cancellation: CancellationToken) -> Result<()> {
	let cancellation = Arc::new(cancellation);
	ctrlc::set_handler(move || {
		let count = SIGNAL_COUNT.fetch_add(1, Ordering::SeqCst) + 1;
		if count == 1 {
			warn!("signal received, finishing in-flight work and rejecting new work");
			cancellation.cancel();
		} else {
			warn!("second signal received, exiting immediately");
			process::exit(130);
		}
	})
	.map_err(|e| Error::ConfigInvalid(format!("failed to register signal handler: {e}")))
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
	SIGNAL_COUNT.store(0, Ordering::SeqCst);
}
