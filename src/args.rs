//! CLI front-end (spec SPEC_FULL.md §1 "deliberately thin"): four
//! subcommands wiring parsed arguments straight into the library's
//! orchestrators. No prompts, no TUI, no self-update.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use tracing::{debug, warn};

/// coldvault: incremental, encrypted, content-addressed backups.
#[derive(Debug, Clone, Parser)]
#[command(
	author,
	version,
	long_version = format!("{} built from branch={} commit={} dirty={} source_timestamp={}",
		env!("CARGO_PKG_VERSION"),
		env!("GIT_BRANCH"),
		env!("GIT_COMMIT"),
		env!("GIT_DIRTY"),
		env!("SOURCE_TIMESTAMP"),
    ),
	after_help = "Want more detail? Try the long '--help' flag!",
	after_long_help = "Didn't expect this much output? Use the short '-h' flag to get short help.",
)]
#[cfg_attr(debug_assertions, command(before_help = "⚠ DEBUG BUILD ⚠"))]
pub struct Args {
	/// When to use terminal colours
	#[arg(long, default_value = "auto", value_name = "MODE", alias = "colour", global = true)]
	pub color: ColourMode,

	/// Set diagnostic log level
	///
	/// This enables diagnostic logging, which is useful for investigating bugs. Use multiple
	/// times to increase verbosity. Goes up to '-vvvvv'.
	///
	/// Setting $RUST_LOG also works, and takes precedence, but is not recommended unless you know
	/// what you're doing.
	#[arg(long, short, action = ArgAction::Count, num_args = 0, global = true)]
	pub verbose: Option<u8>,

	/// Write diagnostic logs to a file, in JSON format, instead of the terminal
	#[arg(long, value_hint = ValueHint::AnyPath, value_name = "PATH", global = true)]
	pub log_file: Option<PathBuf>,

	/// Path to the JSON config file (falls back to $COLDVAULT_CONFIG)
	#[arg(long, short, env = "COLDVAULT_CONFIG", value_hint = ValueHint::FilePath, value_name = "PATH", global = true)]
	pub config: Option<PathBuf>,

	/// What to do
	#[command(subcommand)]
	pub action: Action,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ColourMode {
	Auto,
	Always,
	Never,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Action {
	/// Walk a source tree, diff it against the previous snapshot of the same
	/// name, and upload only what changed.
	Backup {
		/// Logical backup name; forms the `name-YYYYMMDD-HHMMSS` backup_id
		#[arg(long)]
		name: String,

		/// Directory to back up
		#[arg(value_hint = ValueHint::DirPath)]
		source: PathBuf,
	},

	/// Restore a snapshot's files into a destination directory.
	Restore {
		/// backup_id to restore (e.g. `nightly-20260727-020000`)
		#[arg(long)]
		backup_id: String,

		/// Directory to restore into; created if missing
		#[arg(value_hint = ValueHint::DirPath)]
		dest: PathBuf,
	},

	/// Evict snapshots per the configured count/age policy.
	Retention {
		/// Restrict eviction to one logical backup name; omit to run globally
		#[arg(long)]
		name: Option<String>,
	},

	/// Remove storage objects not referenced by any surviving index.
	Sweep {
		/// Report what would be deleted without deleting anything
		#[arg(long)]
		dry_run: bool,

		/// Also remove entire data/<backup_id>/ prefixes whose index is missing
		#[arg(long)]
		remove_orphaned_backups: bool,
	},
}

pub fn get_args() -> Args {
	if std::env::var("RUST_LOG").is_ok() {
		warn!("⚠ RUST_LOG environment variable set, logging options have no effect");
	}

	debug!("parsing arguments");
	let args = Args::parse();

	debug!(?args, "got arguments");
	args
}

#[test]
fn verify_cli() {
	use clap::CommandFactory;
	Args::command().debug_assert()
}
