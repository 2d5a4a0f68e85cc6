//! Binary front-end: parses arguments, wires up logging/diagnostics, and
//! hands off to `coldvault::actions::run`. Kept thin on purpose
//! (SPEC_FULL.md §1) — no prompts, no TUI, no update machinery.

use std::io::{stderr, IsTerminal, Write};
use std::sync::Arc;

use coldvault::args::{get_args, ColourMode};
use coldvault::progress::{IndicatifProgressSink, ProgressSink};
use indicatif::MultiProgress;
use miette::IntoDiagnostic;
use tracing::Metadata;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> miette::Result<()> {
	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.into_diagnostic()?
		.block_on(run())
}

async fn run() -> miette::Result<()> {
	let args = get_args();

	install_diagnostics(args.color);

	let progress_sink = IndicatifProgressSink::new();
	let multi = progress_sink.multi_progress();
	let _log_guard = install_logging(args.verbose.unwrap_or(0), args.log_file.as_deref(), multi)?;

	let progress: Arc<dyn ProgressSink> = Arc::new(progress_sink);
	coldvault::actions::run(args, progress).await.into_diagnostic()
}

/// Picks a `miette` graphical theme honouring `--color` (spec: no bespoke
/// rendering, just the stock fancy/narratable handler).
fn install_diagnostics(color: ColourMode) {
	let ansi = match color {
		ColourMode::Always => true,
		ColourMode::Never => false,
		ColourMode::Auto => stderr().is_terminal(),
	};
	let handler = miette::MietteHandlerOpts::new().color(ansi).build();
	let _ = miette::set_hook(Box::new(move |_| Box::new(handler.clone())));
}

/// Wraps stderr in a `MultiProgress`-aware writer so log lines don't tear
/// through an active progress bar (mirrors `ProgressLogWriter` in the
/// teacher's `actions/context.rs`), unless `--log-file` redirects to JSON.
fn install_logging(verbosity: u8, log_file: Option<&std::path::Path>, multi: MultiProgress) -> miette::Result<Option<std::fs::File>> {
	let default_level = match verbosity {
		0 => "warn",
		1 => "info",
		2 => "debug",
		_ => "trace",
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

	if let Some(path) = log_file {
		let path = if path.is_dir() {
			path.join(format!("coldvault.{}.log", chrono::Utc::now().format("%Y-%m-%dT%H-%M-%SZ")))
		} else {
			path.to_owned()
		};
		let file = std::fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&path)
			.into_diagnostic()?;
		let writer_handle = file.try_clone().into_diagnostic()?;
		tracing_subscriber::fmt()
			.with_env_filter(filter)
			.json()
			.with_writer(move || writer_handle.try_clone().expect("failed to clone log file handle"))
			.init();
		Ok(Some(file))
	} else {
		tracing_subscriber::fmt()
			.with_env_filter(filter)
			.with_writer(ProgressAwareWriter(multi))
			.init();
		Ok(None)
	}
}

#[derive(Clone)]
struct ProgressAwareWriter(MultiProgress);

impl Write for ProgressAwareWriter {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		self.0.suspend(|| stderr().write(buf))
	}

	fn flush(&mut self) -> std::io::Result<()> {
		self.0.suspend(|| stderr().flush())
	}
}

impl<'w> MakeWriter<'w> for ProgressAwareWriter {
	type Writer = ProgressAwareWriter;

	fn make_writer(&'w self) -> Self::Writer {
		self.clone()
	}

	fn make_writer_for(&'w self, _meta: &Metadata<'_>) -> Self::Writer {
		self.clone()
	}
}
