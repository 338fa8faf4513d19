//! Apply command handler.
//!
//! Creates every manifest under the target path that does not exist yet,
//! retrying those whose dependencies are missing until all of them are in.

use std::{io::Write, path::Path, time::Duration};

use anyhow::{Context, Result};
use clap::Args;
use tracing::instrument;

use super::{connect, fetch_catalog, runtime, write_failures, TargetArgs};
use crate::{
	config::{Settings, DEFAULT_INTERVAL_SECS},
	files,
	k8s::{
		client::{ClusterConnection, ConnectOptions},
		facade::KubeResourceApi,
	},
	sync::{ApplyReport, Converger},
};

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
	#[command(flatten)]
	pub target: TargetArgs,

	/// Upper bound in seconds of the random wait between retry rounds [default: 5]
	#[arg(short = 'i', long, value_name = "SECONDS")]
	pub interval: Option<u64>,
}

/// Options for running an apply operation.
#[derive(Debug, Clone)]
pub struct ApplyOpts {
	pub interval: Duration,
	pub connect: ConnectOptions,
}

impl Default for ApplyOpts {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
			connect: ConnectOptions::default(),
		}
	}
}

/// Run the apply command.
pub fn run<W: Write>(args: ApplyArgs, writer: W) -> Result<()> {
	let settings = args.target.settings()?;
	let opts = ApplyOpts {
		interval: resolve_interval(args.interval, &settings),
		connect: args.target.connect_options(&settings),
	};

	runtime()?.block_on(apply_path(&args.target.file, None, opts, writer))?;
	Ok(())
}

/// `-i` wins over the settings file, which wins over the default.
fn resolve_interval(flag: Option<u64>, settings: &Settings) -> Duration {
	flag.map(Duration::from_secs)
		.or_else(|| settings.interval())
		.unwrap_or(Duration::from_secs(DEFAULT_INTERVAL_SECS))
}

/// Create all manifests under `path` in the cluster.
///
/// Documents are loaded before connecting, so a bad target fails without
/// touching the network.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn apply_path<W: Write>(
	path: &Path,
	connection: Option<ClusterConnection>,
	opts: ApplyOpts,
	mut writer: W,
) -> Result<ApplyReport> {
	let documents = files::load_documents(path)
		.with_context(|| format!("loading manifests from {}", path.display()))?;
	tracing::debug!(documents = documents.len(), "loaded manifests");

	let connection = connect(connection, &opts.connect).await?;
	let catalog = fetch_catalog(&connection).await?;

	let converger = Converger::new(
		&catalog,
		KubeResourceApi::new(connection.client().clone()),
		opts.interval,
	);
	let report = converger.apply(documents).await?;

	if report.failed.is_empty() {
		writeln!(writer, "reconciled all resources against the cluster!")?;
	} else {
		writeln!(
			writer,
			"reconciled {} of {} resources against the cluster, {} failed:",
			report.applied(),
			report.total,
			report.failed.len()
		)?;
		write_failures(&mut writer, &report.failed)?;
	}
	Ok(report)
}
