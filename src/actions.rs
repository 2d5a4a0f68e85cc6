//! Subcommand glue: loads config, connects the configured store, and wires
//! the parsed [`crate::args::Action`] into the matching orchestrator.
//!
//! Mirrors the shape of the teacher's `actions::run` dispatch (one function
//! per subcommand, a shared `Context`-equivalent set up once) but there is no
//! interactive prompting here — each action is a single, non-interactive run
//! (SPEC_FULL.md §1).

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::args::{Action, Args};
use crate::backup::BackupOrchestrator;
use crate::config::{resolve_config_path, Config};
use crate::error::Result;
use crate::progress::ProgressSink;
use crate::retention::{self, RetentionPolicy, Scope};
use crate::store::{self, ObjectStore};
use crate::sweep::{self, SweepOptions};

/// Dispatches one parsed invocation. `progress` is supplied by the binary
/// front-end so it can also back the log writer that suspends bars while a
/// line is printed (mirrors `Context::data_bar` + `ProgressLogWriter` in the
/// teacher's `actions/context.rs`).
pub async fn run(args: Args, progress: Arc<dyn ProgressSink>) -> Result<()> {
	let config_path = resolve_config_path(args.config.clone())?;
	let config = Config::from_json_file(&config_path)?;
	let store = store::validate_and_connect(&config).await?;

	let cancellation = CancellationToken::new();
	crate::signal::install(cancellation.clone())?;

	match args.action {
		Action::Backup { name, source } => run_backup(store, config, progress, &name, &source, cancellation).await,
		Action::Restore { backup_id, dest } => run_restore(store, config, progress, &backup_id, &dest, cancellation).await,
		Action::Retention { name } => run_retention(store.as_ref(), &config, name.as_deref()).await,
		Action::Sweep {
			dry_run,
			remove_orphaned_backups,
		} => run_sweep(store.as_ref(), dry_run, remove_orphaned_backups).await,
	}
}

async fn run_backup(
	store: Arc<dyn ObjectStore>,
	config: Config,
	progress: Arc<dyn ProgressSink>,
	name: &str,
	source: &PathBuf,
	cancellation: CancellationToken,
) -> Result<()> {
	let orchestrator = BackupOrchestrator::new(store, config, progress);
	let index = orchestrator.run(name, source, cancellation).await?;
	info!(
		backup_id = %index.backup_id,
		files = index.total_files,
		bytes = index.total_size,
		"backup complete",
	);
	Ok(())
}

async fn run_restore(
	store: Arc<dyn ObjectStore>,
	config: Config,
	progress: Arc<dyn ProgressSink>,
	backup_id: &str,
	dest: &PathBuf,
	cancellation: CancellationToken,
) -> Result<()> {
	let index = crate::restore::load_index(store.as_ref(), backup_id).await?;
	let orchestrator = crate::restore::RestoreOrchestrator::new(store, config, progress);
	let report = orchestrator.run(&index, dest, cancellation).await?;
	info!(
		restored = report.restored.len(),
		failed = report.failed.len(),
		"restore complete",
	);
	for (path, error) in &report.failed {
		tracing::warn!(path, %error, "file failed to restore");
	}
	Ok(())
}

async fn run_retention(store: &dyn ObjectStore, config: &Config, name: Option<&str>) -> Result<()> {
	let policy = RetentionPolicy {
		max_backups: config.retention.max_backups,
		max_age_days: config.retention.days,
	};
	let scope = match name {
		Some(name) => Scope::Named(name),
		None => Scope::All,
	};
	let report = retention::run(store, &policy, scope).await?;
	info!(
		deleted = report.deleted.len(),
		failed = report.failed.len(),
		"retention run complete",
	);
	Ok(())
}

async fn run_sweep(store: &dyn ObjectStore, dry_run: bool, remove_orphaned_backups: bool) -> Result<()> {
	let surviving = retention::load_all_indexes(store).await?;
	let options = SweepOptions {
		dry_run,
		remove_orphaned_backups,
	};
	let report = sweep::orphan_sweep(store, &surviving, options).await?;
	info!(
		dry_run,
		deleted_objects = report.deleted_objects.len(),
		deleted_backup_prefixes = report.deleted_backup_prefixes.len(),
		"sweep complete",
	);
	Ok(())
}
