//! API resource discovery and type resolution.
//!
//! The cluster's discovery API is queried once per command invocation. The
//! resulting [`TypeCatalog`] is an immutable snapshot: types registered after
//! it was built (e.g., by a CRD created during the same run) do not resolve.

use std::collections::HashMap;

use kube::{
	core::GroupVersionKind,
	discovery::{ApiResource, Scope},
	Client, Discovery,
};
use thiserror::Error;
use tracing::instrument;

use super::ResourceScope;
use crate::document::TypeId;

/// Errors that can occur while fetching the discovery catalog.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("API discovery failed")]
	Discovery(#[source] kube::Error),
}

/// The catalog does not know a type.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no matches for kind \"{}\" in version \"{}\"", .0.kind, .0.api_version())]
pub struct ResolveError(pub TypeId);

/// Everything needed to address one resource type over the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAddress {
	pub type_id: TypeId,
	/// REST path segment, e.g. `deployments`.
	pub plural: String,
	pub scope: ResourceScope,
}

impl ResourceAddress {
	pub fn new(type_id: TypeId, plural: impl Into<String>, scope: ResourceScope) -> Self {
		Self {
			type_id,
			plural: plural.into(),
			scope,
		}
	}

	pub fn is_namespaced(&self) -> bool {
		self.scope == ResourceScope::Namespaced
	}

	/// The kube `ApiResource` for building a dynamic API handle.
	pub fn api_resource(&self) -> ApiResource {
		let TypeId {
			group,
			version,
			kind,
		} = &self.type_id;
		let gvk = GroupVersionKind::gvk(group, version, kind);
		ApiResource::from_gvk_with_plural(&gvk, &self.plural)
	}
}

/// Snapshot of the resource types served by a cluster.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
	resources: HashMap<TypeId, ResourceAddress>,
}

impl TypeCatalog {
	/// Query the cluster's discovery API.
	///
	/// Uses the Aggregated Discovery API (K8s 1.26+) which requires only 2 API
	/// calls, falling back to full discovery for older clusters.
	#[instrument(skip_all)]
	pub async fn fetch(client: &Client) -> Result<Self, DiscoveryError> {
		let discovery = match Discovery::new(client.clone()).run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				discovery
			}
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available, using full discovery");
				Discovery::new(client.clone())
					.run()
					.await
					.map_err(DiscoveryError::Discovery)?
			}
		};
		let catalog = Self::from_discovery(&discovery);
		tracing::debug!(types = catalog.len(), "built type catalog");
		Ok(catalog)
	}

	fn from_discovery(discovery: &Discovery) -> Self {
		let mut catalog = Self::default();
		for group in discovery.groups() {
			// All served versions, so manifests pinned to an older version still resolve
			for version in group.versions() {
				for (ar, caps) in group.versioned_resources(version) {
					let scope = match caps.scope {
						Scope::Namespaced => ResourceScope::Namespaced,
						Scope::Cluster => ResourceScope::ClusterWide,
					};
					let type_id = TypeId::new(ar.group, ar.version, ar.kind);
					catalog.insert(ResourceAddress::new(type_id, ar.plural, scope));
				}
			}
		}
		catalog
	}

	/// Build a catalog from explicit entries.
	pub fn from_entries(entries: impl IntoIterator<Item = ResourceAddress>) -> Self {
		let mut catalog = Self::default();
		for entry in entries {
			catalog.insert(entry);
		}
		catalog
	}

	fn insert(&mut self, address: ResourceAddress) {
		self.resources.insert(address.type_id.clone(), address);
	}

	/// Resolve a type to its address.
	pub fn resolve(&self, type_id: &TypeId) -> Result<&ResourceAddress, ResolveError> {
		self.resources
			.get(type_id)
			.ok_or_else(|| ResolveError(type_id.clone()))
	}

	pub fn len(&self) -> usize {
		self.resources.len()
	}

	pub fn is_empty(&self) -> bool {
		self.resources.is_empty()
	}
}
