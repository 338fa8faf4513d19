//! Kubernetes API access: connection, type discovery and per-resource calls.

pub mod client;
pub mod discovery;
pub mod facade;

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource lives in a namespace (e.g., ConfigMap, Deployment).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, CustomResourceDefinition).
	ClusterWide,
}
