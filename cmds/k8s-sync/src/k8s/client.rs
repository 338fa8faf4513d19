//! Kubernetes cluster connection management.

use std::{path::PathBuf, time::Duration};

use bon::Builder;
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("no context named `{0}` was found. Please check your kubeconfig")]
	ContextNotFound(String),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// How to reach the cluster.
#[derive(Debug, Clone, Default, Builder)]
pub struct ConnectOptions {
	/// Kubeconfig file. `$KUBECONFIG` or `~/.kube/config` when unset.
	pub kubeconfig: Option<PathBuf>,
	/// Context to use. The kubeconfig's current context when unset.
	pub context: Option<String>,
	/// Per-request read timeout. Requests wait indefinitely when unset.
	pub request_timeout: Option<Duration>,
}

/// An authenticated connection to a cluster.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	context: Option<String>,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("context", &self.context)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect using the local kubeconfig profile.
	#[instrument(skip_all)]
	pub async fn connect(opts: &ConnectOptions) -> Result<Self, ConnectionError> {
		let kubeconfig = match &opts.kubeconfig {
			Some(path) => Kubeconfig::read_from(path)?,
			None => Kubeconfig::read()?,
		};
		Self::connect_with_kubeconfig(kubeconfig, opts).await
	}

	/// Connect using an already loaded kubeconfig.
	#[instrument(skip_all, fields(context = ?opts.context))]
	pub async fn connect_with_kubeconfig(
		kubeconfig: Kubeconfig,
		opts: &ConnectOptions,
	) -> Result<Self, ConnectionError> {
		if let Some(context) = &opts.context {
			if !kubeconfig.contexts.iter().any(|c| &c.name == context) {
				return Err(ConnectionError::ContextNotFound(context.clone()));
			}
		}
		let context = opts
			.context
			.clone()
			.or_else(|| kubeconfig.current_context.clone());

		let mut config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: opts.context.clone(),
				..Default::default()
			},
		)
		.await?;
		config.read_timeout = opts.request_timeout;

		let client = Client::try_from(config)?;
		let server_version = client.apiserver_version().await?;

		Ok(Self {
			client,
			server_version,
			context,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	/// Name of the kubeconfig context in use, if known.
	pub fn context(&self) -> Option<&str> {
		self.context.as_deref()
	}
}
