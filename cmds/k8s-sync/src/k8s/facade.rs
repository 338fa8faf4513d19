//! Create and delete calls for a single resource document.
//!
//! Transport sits behind [`ResourceApi`] so that outcome classification can be
//! exercised without a cluster.

use kube::{
	api::{Api, DeleteParams, DynamicObject, PostParams},
	Client,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use super::discovery::ResourceAddress;
use crate::document::{ResourceDocument, DEFAULT_NAMESPACE};

/// A failed API call.
#[derive(Debug, Error)]
pub enum ClientError {
	#[error("{message} (reason: {reason}, code: {code})")]
	Api {
		code: u16,
		reason: String,
		message: String,
	},

	#[error("converting manifest to DynamicObject")]
	Conversion(#[source] serde_json::Error),

	#[error(transparent)]
	Transport(kube::Error),
}

impl ClientError {
	/// HTTP status returned by the API server, if the request got that far.
	pub fn code(&self) -> Option<u16> {
		match self {
			ClientError::Api { code, .. } => Some(*code),
			_ => None,
		}
	}

	pub fn is_conflict(&self) -> bool {
		self.code() == Some(409)
	}

	pub fn is_not_found(&self) -> bool {
		self.code() == Some(404)
	}
}

impl From<kube::Error> for ClientError {
	fn from(e: kube::Error) -> Self {
		match e {
			kube::Error::Api(status) => ClientError::Api {
				code: status.code,
				reason: status.reason.to_string(),
				message: status.message.to_string(),
			},
			other => ClientError::Transport(other),
		}
	}
}

/// Raw per-resource API calls.
///
/// `namespace` is `None` exactly when the address is cluster-scoped.
#[allow(async_fn_in_trait)]
pub trait ResourceApi {
	async fn create(
		&self,
		address: &ResourceAddress,
		namespace: Option<&str>,
		document: &ResourceDocument,
	) -> Result<(), ClientError>;

	async fn delete(
		&self,
		address: &ResourceAddress,
		namespace: Option<&str>,
		name: &str,
	) -> Result<(), ClientError>;
}

/// [`ResourceApi`] backed by the kube dynamic client.
#[derive(Clone)]
pub struct KubeResourceApi {
	client: Client,
}

impl KubeResourceApi {
	pub fn new(client: Client) -> Self {
		Self { client }
	}

	fn dynamic_api(&self, address: &ResourceAddress, namespace: Option<&str>) -> Api<DynamicObject> {
		let ar = address.api_resource();
		match namespace {
			Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
			None => Api::all_with(self.client.clone(), &ar),
		}
	}
}

impl ResourceApi for KubeResourceApi {
	async fn create(
		&self,
		address: &ResourceAddress,
		namespace: Option<&str>,
		document: &ResourceDocument,
	) -> Result<(), ClientError> {
		let body = Value::Object(document.content().clone());
		let obj: DynamicObject = serde_json::from_value(body).map_err(ClientError::Conversion)?;
		self.dynamic_api(address, namespace)
			.create(&PostParams::default(), &obj)
			.await?;
		Ok(())
	}

	async fn delete(
		&self,
		address: &ResourceAddress,
		namespace: Option<&str>,
		name: &str,
	) -> Result<(), ClientError> {
		self.dynamic_api(address, namespace)
			.delete(name, &DeleteParams::default())
			.await?;
		Ok(())
	}
}

/// Result of a create call, as seen by the convergence loop.
#[derive(Debug)]
pub enum CreateOutcome {
	Created,
	/// Treated as success.
	AlreadyExists,
	/// Something the resource references does not exist yet; retry later.
	MissingDependency(ClientError),
	/// Will not succeed by retrying.
	Failed(ClientError),
}

impl CreateOutcome {
	pub fn classify(result: Result<(), ClientError>) -> Self {
		match result {
			Ok(()) => CreateOutcome::Created,
			Err(e) if e.is_conflict() => CreateOutcome::AlreadyExists,
			Err(e) if e.is_not_found() => CreateOutcome::MissingDependency(e),
			Err(e) => CreateOutcome::Failed(e),
		}
	}
}

/// Performs one create or delete for a document whose address is known.
pub struct ResourceFacade<A> {
	api: A,
}

impl<A: ResourceApi> ResourceFacade<A> {
	pub fn new(api: A) -> Self {
		Self { api }
	}

	pub fn api(&self) -> &A {
		&self.api
	}

	/// Create `document`, defaulting its namespace first if the type needs one.
	pub async fn create(
		&self,
		address: &ResourceAddress,
		document: &mut ResourceDocument,
	) -> CreateOutcome {
		let namespace = scoped_namespace(address, document);
		let result = self
			.api
			.create(address, namespace.as_deref(), document)
			.await;
		let outcome = CreateOutcome::classify(result);

		match &outcome {
			CreateOutcome::Created => info!(resource = %document, "created"),
			CreateOutcome::AlreadyExists => info!(resource = %document, "already exists"),
			CreateOutcome::MissingDependency(e) => {
				warn!(resource = %document, error = %e, "dependency not found, will retry")
			}
			CreateOutcome::Failed(e) => error!(
				resource = %document,
				origin = %document.origin(),
				error = %e,
				"failed to create"
			),
		}
		outcome
	}

	/// Delete the resource `document` describes, defaulting its namespace first.
	pub async fn delete(
		&self,
		address: &ResourceAddress,
		document: &mut ResourceDocument,
	) -> Result<(), ClientError> {
		let namespace = scoped_namespace(address, document);
		let result = self
			.api
			.delete(address, namespace.as_deref(), document.name())
			.await;

		match &result {
			Ok(()) => info!(resource = %document, "deleted"),
			Err(e) => error!(
				resource = %document,
				origin = %document.origin(),
				error = %e,
				"failed to delete"
			),
		}
		result
	}
}

/// Namespace to address `document` in, assigning the default when needed.
fn scoped_namespace(address: &ResourceAddress, document: &mut ResourceDocument) -> Option<String> {
	if !address.is_namespaced() {
		return None;
	}
	document.default_namespace(DEFAULT_NAMESPACE);
	document.namespace().map(str::to_string)
}
