//! Path and response helpers for the mock server.

use wiremock::ResponseTemplate;

use crate::discovery::MockDiscovery;

/// Split a Kubernetes API item path into (collection path, resource name).
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps/my-config` -> (`/api/v1/namespaces/default/configmaps`, `my-config`)
/// - `/api/v1/namespaces/my-ns` -> (`/api/v1/namespaces`, `my-ns`)
pub fn parse_resource_path(path: &str) -> (String, String) {
	let path = path.trim_end_matches('/');
	match path.rsplit_once('/') {
		Some((api_path, name)) => (api_path.to_string(), name.to_string()),
		None => (path.to_string(), String::new()),
	}
}

/// Namespace a collection path is scoped to, if any.
///
/// `/api/v1/namespaces/team-a/configmaps` -> `team-a`, `/api/v1/namespaces` -> `None`.
pub fn namespace_of(collection_path: &str) -> Option<&str> {
	let (_, rest) = collection_path.split_once("/namespaces/")?;
	let (namespace, _) = rest.split_once('/')?;
	Some(namespace)
}

/// Collection path for a resource, as used for storage keys.
pub fn collection_path(
	discovery: &MockDiscovery,
	api_version: &str,
	kind: &str,
	namespace: Option<&str>,
) -> Option<String> {
	let resource = discovery.find(api_version, kind)?;
	let prefix = if api_version.contains('/') {
		"apis"
	} else {
		"api"
	};
	let path = if resource.namespaced {
		format!(
			"/{prefix}/{api_version}/namespaces/{}/{}",
			namespace.unwrap_or("default"),
			resource.name
		)
	} else {
		format!("/{prefix}/{api_version}/{}", resource.name)
	};
	Some(path)
}

/// A `Status` failure response, shaped like the API server's.
pub fn status_response(code: u16, reason: &str, message: String) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}
