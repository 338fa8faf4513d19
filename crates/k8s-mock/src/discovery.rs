//! Mock Kubernetes API discovery types.

use std::collections::BTreeMap;

/// Discovery mode for the mock server.
#[derive(Clone, Copy, Debug, Default)]
pub enum DiscoveryMode {
	/// Support aggregated discovery (APIGroupDiscoveryList).
	#[default]
	Aggregated,
	/// Return 406 for aggregated discovery, forcing fallback to legacy endpoints.
	Legacy,
}

/// Resource types the server advertises.
///
/// Groups are keyed by group/version, e.g. `apps/v1`. A group may be listed
/// under several versions.
#[derive(Clone, Debug)]
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	pub group_resources: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("secrets", "Secret"),
				MockApiResource::namespaced("services", "Service"),
				MockApiResource::namespaced("serviceaccounts", "ServiceAccount"),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
			],
			group_resources: BTreeMap::from([
				(
					"apps/v1".to_string(),
					vec![
						MockApiResource::namespaced("deployments", "Deployment"),
						MockApiResource::namespaced("statefulsets", "StatefulSet"),
					],
				),
				(
					"rbac.authorization.k8s.io/v1".to_string(),
					vec![MockApiResource::cluster_scoped("clusterroles", "ClusterRole")],
				),
			]),
		}
	}
}

impl MockDiscovery {
	/// Advertise extra resources under `group_version`.
	pub fn with_group(mut self, group_version: &str, resources: Vec<MockApiResource>) -> Self {
		self.group_resources
			.entry(group_version.to_string())
			.or_default()
			.extend(resources);
		self
	}

	/// Find the advertised resource for an apiVersion/kind pair.
	pub fn find(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		let resources = if api_version.contains('/') {
			self.group_resources.get(api_version)?
		} else if api_version == "v1" {
			&self.core_resources
		} else {
			return None;
		};
		resources.iter().find(|r| r.kind == kind)
	}
}

/// A mock API resource definition.
#[derive(Clone, Debug)]
pub struct MockApiResource {
	/// Plural name, used as the REST path segment.
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self::new(name, kind, true)
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self::new(name, kind, false)
	}

	fn new(name: &str, kind: &str, namespaced: bool) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced,
			verbs: ["create", "delete", "get", "list"]
				.into_iter()
				.map(String::from)
				.collect(),
		}
	}
}
