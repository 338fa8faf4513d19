//! Delete command handler.
//!
//! Deletes every manifest under the target path in a single pass. Failures
//! are reported and do not stop the remaining deletions.

use std::{io::Write, path::Path};

use anyhow::{Context, Result};
use clap::Args;
use tracing::instrument;

use super::{connect, fetch_catalog, runtime, write_failures, TargetArgs};
use crate::{
	files,
	k8s::{
		client::{ClusterConnection, ConnectOptions},
		facade::KubeResourceApi,
	},
	sync::{Converger, DeleteReport},
};

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
	#[command(flatten)]
	pub target: TargetArgs,
}

/// Options for running a delete operation.
#[derive(Debug, Clone, Default)]
pub struct DeleteOpts {
	pub connect: ConnectOptions,
}

/// Run the delete command.
pub fn run<W: Write>(args: DeleteArgs, writer: W) -> Result<()> {
	let settings = args.target.settings()?;
	let opts = DeleteOpts {
		connect: args.target.connect_options(&settings),
	};

	runtime()?.block_on(delete_path(&args.target.file, None, opts, writer))?;
	Ok(())
}

/// Delete all manifests under `path` from the cluster.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn delete_path<W: Write>(
	path: &Path,
	connection: Option<ClusterConnection>,
	opts: DeleteOpts,
	mut writer: W,
) -> Result<DeleteReport> {
	let documents = files::load_documents(path)
		.with_context(|| format!("loading manifests from {}", path.display()))?;
	tracing::debug!(documents = documents.len(), "loaded manifests");

	let connection = connect(connection, &opts.connect).await?;
	let catalog = fetch_catalog(&connection).await?;

	// Deletion never waits between rounds
	let converger = Converger::new(
		&catalog,
		KubeResourceApi::new(connection.client().clone()),
		Default::default(),
	);
	let report = converger.delete(documents).await?;

	if report.failed.is_empty() {
		writeln!(writer, "cleaned up all resources against the cluster!")?;
	} else {
		writeln!(
			writer,
			"cleaned up {} of {} resources against the cluster, {} failed:",
			report.deleted,
			report.total,
			report.failed.len()
		)?;
		write_failures(&mut writer, &report.failed)?;
	}
	Ok(report)
}
