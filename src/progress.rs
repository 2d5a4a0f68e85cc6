//! Upload/download progress reporting.
//!
//! Grounded in `Context::data_bar` (`src/actions/context.rs`): a
//! `MultiProgress` holding one `ProgressBar` per in-flight file, styled as a
//! byte counter with throughput and ETA. Generalised behind a trait so the
//! worker pool (spec §5) can report progress without depending on indicatif
//! directly, and so tests can assert on a no-op sink.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Per-item progress reporting, implemented by a real terminal bar in
/// `main.rs` and by [`NoopProgressSink`] in library tests.
pub trait ProgressSink: Send + Sync {
	/// A new item of `total_bytes` has started transferring.
	fn start_item(&self, label: &str, total_bytes: u64) -> Box<dyn ItemProgress>;
}

pub trait ItemProgress: Send {
	fn inc(&self, bytes: u64);
	fn finish(&self);
}

pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
	fn start_item(&self, _label: &str, _total_bytes: u64) -> Box<dyn ItemProgress> {
		Box::new(NoopItemProgress)
	}
}

struct NoopItemProgress;

impl ItemProgress for NoopItemProgress {
	fn inc(&self, _bytes: u64) {}
	fn finish(&self) {}
}

/// Terminal progress via `indicatif`, one bar per concurrently active item
/// under a shared `MultiProgress` (spec §5 "progress reporting").
pub struct IndicatifProgressSink {
	multi: MultiProgress,
}

impl IndicatifProgressSink {
	pub fn new() -> Self {
		Self {
			multi: MultiProgress::new(),
		}
	}

	/// Handle used by the tracing writer so log lines don't tear through an
	/// active bar (mirrors `ProgressLogWriter` in the teacher).
	pub fn multi_progress(&self) -> MultiProgress {
		self.multi.clone()
	}
}

impl Default for IndicatifProgressSink {
	fn default() -> Self {
		Self::new()
	}
}

impl ProgressSink for IndicatifProgressSink {
	fn start_item(&self, label: &str, total_bytes: u64) -> Box<dyn ItemProgress> {
		let bar = self.multi.add(ProgressBar::new(total_bytes).with_style(
			ProgressStyle::default_bar()
				.template("[{bar:20.cyan/blue}] {wide_msg} {bytes}/{total_bytes} [{bytes_per_sec}] ({eta})")
				.expect("data bar template invalid"),
		));
		bar.set_message(label.to_owned());
		bar.tick();
		Box::new(IndicatifItemProgress(bar))
	}
}

struct IndicatifItemProgress(ProgressBar);

impl ItemProgress for IndicatifItemProgress {
	fn inc(&self, bytes: u64) {
		self.0.inc(bytes);
	}

	fn finish(&self) {
		self.0.finish_and_clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn noop_sink_never_panics() {
		let sink = NoopProgressSink;
		let item = sink.start_item("file.txt", 1024);
		item.inc(512);
		item.finish();
	}

	#[test]
	fn indicatif_sink_produces_a_bar_per_item() {
		let sink = IndicatifProgressSink::new();
		let a = sink.start_item("a.txt", 100);
		let b = sink.start_item("b.txt", 200);
		a.inc(50);
		b.inc(100);
		a.finish();
		b.finish();
	}
}
