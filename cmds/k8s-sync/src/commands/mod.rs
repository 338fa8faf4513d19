//! Command handlers.

pub mod apply;
pub mod delete;

use std::{
	io::{self, ErrorKind, Write},
	path::PathBuf,
	time::Duration,
};

use anyhow::{Context, Result};
use clap::Args;
use tracing::Level;

use crate::{
	config::Settings,
	k8s::{
		client::{ClusterConnection, ConnectOptions},
		discovery::TypeCatalog,
	},
	sync::Failure,
};

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
	/// Manifest file, or directory to walk recursively for .yaml, .yml and .json files
	#[arg(short = 'f', long = "file", value_name = "PATH")]
	pub file: PathBuf,

	/// Kubeconfig to use instead of $KUBECONFIG or ~/.kube/config
	#[arg(long, value_name = "PATH")]
	pub kubeconfig: Option<PathBuf>,

	/// Kubeconfig context to use. Defaults to the current context
	#[arg(long)]
	pub context: Option<String>,

	/// Per-request read timeout in seconds. Requests wait indefinitely when unset
	#[arg(long, value_name = "SECONDS")]
	pub request_timeout: Option<u64>,

	/// Log level (trace, debug, info, warn, error). Overrides RUST_LOG
	#[arg(long)]
	pub log_level: Option<Level>,
}

impl TargetArgs {
	/// Settings file found above the target, or the defaults.
	pub fn settings(&self) -> Result<Settings> {
		Ok(Settings::load_for_target(&self.file)?.unwrap_or_default())
	}

	/// Connection options, with flags taking priority over `settings`.
	pub fn connect_options(&self, settings: &Settings) -> ConnectOptions {
		ConnectOptions::builder()
			.maybe_kubeconfig(self.kubeconfig.clone().or_else(|| settings.kubeconfig.clone()))
			.maybe_context(self.context.clone().or_else(|| settings.context.clone()))
			.maybe_request_timeout(
				self.request_timeout
					.map(Duration::from_secs)
					.or_else(|| settings.request_timeout()),
			)
			.build()
	}
}

fn runtime() -> Result<tokio::runtime::Runtime> {
	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")
}

/// Use `connection` if given, otherwise connect with `opts`.
async fn connect(
	connection: Option<ClusterConnection>,
	opts: &ConnectOptions,
) -> Result<ClusterConnection> {
	let connection = match connection {
		Some(conn) => conn,
		None => {
			tracing::debug!("connecting to Kubernetes cluster");
			ClusterConnection::connect(opts)
				.await
				.context("connecting to Kubernetes cluster")?
		}
	};
	let version = connection.server_version();
	tracing::debug!(
		context = ?connection.context(),
		server_version = %format!("{}.{}", version.major, version.minor),
		"connected to cluster"
	);
	Ok(connection)
}

async fn fetch_catalog(connection: &ClusterConnection) -> Result<TypeCatalog> {
	TypeCatalog::fetch(connection.client())
		.await
		.context("fetching API resource catalog")
}

fn write_failures<W: Write>(writer: &mut W, failures: &[Failure]) -> io::Result<()> {
	for failure in failures {
		writeln!(writer, "  {}: {}", failure.resource, failure.error)?;
	}
	Ok(())
}

/// Ignores EPIPE so output piped into `head` and friends does not turn into an error.
pub struct BrokenPipeGuard<W> {
	inner: W,
}

impl<W> BrokenPipeGuard<W> {
	pub fn new(inner: W) -> Self {
		Self { inner }
	}
}

impl<W: Write> Write for BrokenPipeGuard<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		match self.inner.write(buf) {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(buf.len()),
			other => other,
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		match self.inner.flush() {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
			other => other,
		}
	}
}
