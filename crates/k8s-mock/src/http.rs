//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with actual kubeconfig-based
//! connections, so the whole client stack (config, TLS-less transport, discovery)
//! is exercised.

use std::{
	collections::{BTreeMap, HashMap},
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::Value;
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::{
	discovery::{DiscoveryMode, MockApiResource, MockDiscovery},
	helpers::{collection_path, namespace_of, parse_resource_path, status_response},
};

/// Stored objects keyed by (collection path, name).
pub type SharedResources = Arc<RwLock<HashMap<(String, String), Value>>>;

const NAMESPACES_PATH: &str = "/api/v1/namespaces";

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	/// Resource types to advertise.
	#[builder(default)]
	discovery: MockDiscovery,
	/// Objects that exist before the first request. The server derives their
	/// API paths from apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<Value>,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	discovery: MockDiscovery,
	resources: SharedResources,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut resources: HashMap<(String, String), Value> = HashMap::new();
		for manifest in self.resources {
			if let Some(key) = storage_key(&manifest, &self.discovery) {
				trace!(api_path = %key.0, name = %key.1, "Registered resource");
				resources.insert(key, manifest);
			}
		}

		// The default namespace always exists
		resources
			.entry((NAMESPACES_PATH.to_string(), "default".to_string()))
			.or_insert_with(|| {
				serde_json::json!({
					"apiVersion": "v1",
					"kind": "Namespace",
					"metadata": {
						"name": "default"
					}
				})
			});

		let shared_resources = Arc::new(RwLock::new(resources));

		mount_version(&server).await;
		mount_discovery(&server, &self.discovery, self.discovery_mode).await;
		mount_resources(&server, &shared_resources).await;

		RunningHttpMockK8sServer {
			server,
			discovery: self.discovery,
			resources: shared_resources,
		}
	}
}

fn storage_key(manifest: &Value, discovery: &MockDiscovery) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?;
	let namespace = manifest
		.pointer("/metadata/namespace")
		.and_then(Value::as_str);

	let api_path = collection_path(discovery, api_version, kind, namespace)?;
	Some((api_path, name.to_string()))
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Whether an object currently exists. A missing namespace means `default`
	/// for namespaced kinds.
	pub fn contains(
		&self,
		api_version: &str,
		kind: &str,
		namespace: Option<&str>,
		name: &str,
	) -> bool {
		self.get(api_version, kind, namespace, name).is_some()
	}

	/// The stored object, as last created.
	pub fn get(
		&self,
		api_version: &str,
		kind: &str,
		namespace: Option<&str>,
		name: &str,
	) -> Option<Value> {
		let api_path = collection_path(&self.discovery, api_version, kind, namespace)?;
		self.resources
			.read()
			.unwrap()
			.get(&(api_path, name.to_string()))
			.cloned()
	}

	/// Number of stored objects, including the default namespace.
	pub fn object_count(&self) -> usize {
		self.resources.read().unwrap().len()
	}

	/// Paths of the resource requests received with `verb`, in arrival order.
	pub async fn requests(&self, verb: &str) -> Vec<String> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.filter(|req| req.method.as_str().eq_ignore_ascii_case(verb))
			.map(|req| req.url.path().to_string())
			.collect()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"major": "1",
			"minor": "31",
			"gitVersion": "v1.31.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-08-13T00:00:00Z",
			"goVersion": "go1.22.5",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

/// group name -> [(version, resources)]
fn groups(discovery: &MockDiscovery) -> BTreeMap<&str, Vec<(&str, &[MockApiResource])>> {
	let mut groups: BTreeMap<&str, Vec<(&str, &[MockApiResource])>> = BTreeMap::new();
	for (gv, resources) in &discovery.group_resources {
		let (group, version) = gv.split_once('/').unwrap_or(("", gv));
		groups
			.entry(group)
			.or_default()
			.push((version, resources.as_slice()));
	}
	groups
}

fn scope(resource: &MockApiResource) -> &'static str {
	if resource.namespaced {
		"Namespaced"
	} else {
		"Cluster"
	}
}

fn aggregated_version(group: &str, version: &str, resources: &[MockApiResource]) -> Value {
	let resources: Vec<_> = resources
		.iter()
		.map(|r| {
			serde_json::json!({
				"resource": r.name,
				"responseKind": {
					"group": group,
					"version": version,
					"kind": r.kind
				},
				"scope": scope(r),
				"verbs": r.verbs,
			})
		})
		.collect();
	serde_json::json!({
		"version": version,
		"resources": resources,
		"freshness": "Current"
	})
}

fn legacy_resource_list(group_version: &str, resources: &[MockApiResource]) -> Value {
	let resources: Vec<_> = resources
		.iter()
		.map(|r| {
			serde_json::json!({
				"name": r.name,
				"singularName": "",
				"namespaced": r.namespaced,
				"kind": r.kind,
				"verbs": r.verbs,
			})
		})
		.collect();
	serde_json::json!({
		"kind": "APIResourceList",
		"apiVersion": "v1",
		"groupVersion": group_version,
		"resources": resources
	})
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	// The Content-Type must announce the aggregated format or clients won't parse it
	const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
		"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

	let groups = groups(discovery);

	match mode {
		DiscoveryMode::Aggregated => {
			let core_body = serde_json::json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": [{
					"metadata": {
						"name": ""
					},
					"versions": [aggregated_version("", "v1", &discovery.core_resources)]
				}]
			});

			let items: Vec<_> = groups
				.iter()
				.map(|(group, versions)| {
					let versions: Vec<_> = versions
						.iter()
						.map(|(version, resources)| aggregated_version(group, version, resources))
						.collect();
					serde_json::json!({
						"metadata": {
							"name": group
						},
						"versions": versions
					})
				})
				.collect();
			let apis_body = serde_json::json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": items
			});

			// set_body_raw, because set_body_json overwrites the Content-Type
			for (api_path, body) in [("/api", core_body), ("/apis", apis_body)] {
				Mock::given(method("GET"))
					.and(path(api_path))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(ResponseTemplate::new(200).set_body_raw(
						body.to_string().into_bytes(),
						AGGREGATED_DISCOVERY_CONTENT_TYPE,
					))
					.mount(server)
					.await;
			}
		}
		DiscoveryMode::Legacy => {
			for api_path in ["/api", "/apis"] {
				Mock::given(method("GET"))
					.and(path(api_path))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(ResponseTemplate::new(406))
					.mount(server)
					.await;
			}
		}
	}

	// Legacy discovery endpoints, also the fallback for aggregated mode
	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	let group_list: Vec<_> = groups
		.iter()
		.map(|(group, versions)| {
			let versions: Vec<_> = versions
				.iter()
				.map(|(version, _)| {
					serde_json::json!({
						"groupVersion": format!("{group}/{version}"),
						"version": version
					})
				})
				.collect();
			let preferred = versions.first().cloned().unwrap_or_default();
			serde_json::json!({
				"name": group,
				"versions": versions,
				"preferredVersion": preferred
			})
		})
		.collect();

	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": group_list
		})))
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(legacy_resource_list("v1", &discovery.core_resources)),
		)
		.mount(server)
		.await;

	for (gv, resources) in &discovery.group_resources {
		Mock::given(method("GET"))
			.and(path(format!("/apis/{gv}")))
			.respond_with(
				ResponseTemplate::new(200).set_body_json(legacy_resource_list(gv, resources)),
			)
			.mount(server)
			.await;
	}
}

async fn mount_resources(server: &MockServer, resources: &SharedResources) {
	let post_resources = Arc::clone(resources);
	let delete_resources = Arc::clone(resources);

	// POST creates into a collection path
	Mock::given(method("POST"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let api_path = req.url.path().trim_end_matches('/').to_string();
			let plural = api_path.rsplit('/').next().unwrap_or_default().to_string();

			let body: Value = match serde_json::from_slice(&req.body) {
				Ok(body) => body,
				Err(e) => return status_response(400, "BadRequest", e.to_string()),
			};
			let Some(name) = body.pointer("/metadata/name").and_then(Value::as_str) else {
				return status_response(
					422,
					"Invalid",
					format!("{plural} is invalid: metadata.name: Required value"),
				);
			};
			let name = name.to_string();

			let mut resources = post_resources.write().unwrap();
			if let Some(namespace) = namespace_of(&api_path) {
				let ns_key = (NAMESPACES_PATH.to_string(), namespace.to_string());
				if !resources.contains_key(&ns_key) {
					return status_response(
						404,
						"NotFound",
						format!("namespaces \"{namespace}\" not found"),
					);
				}
			}

			let key = (api_path, name);
			if resources.contains_key(&key) {
				return status_response(
					409,
					"AlreadyExists",
					format!("{plural} \"{}\" already exists", key.1),
				);
			}
			trace!(api_path = %key.0, name = %key.1, "Created resource");
			resources.insert(key, body.clone());
			ResponseTemplate::new(201).set_body_json(body)
		})
		.mount(server)
		.await;

	// DELETE removes an item path and echoes the removed object
	Mock::given(method("DELETE"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let key = parse_resource_path(req.url.path());
			let plural = key.0.rsplit('/').next().unwrap_or_default().to_string();

			match delete_resources.write().unwrap().remove(&key) {
				Some(object) => {
					trace!(api_path = %key.0, name = %key.1, "Deleted resource");
					ResponseTemplate::new(200).set_body_json(object)
				}
				None => status_response(
					404,
					"NotFound",
					format!("{plural} \"{}\" not found", key.1),
				),
			}
		})
		.mount(server)
		.await;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_groups_merge_versions() {
		let discovery = MockDiscovery::default().with_group(
			"apps/v1beta1",
			vec![MockApiResource::namespaced("deployments", "Deployment")],
		);
		let groups = groups(&discovery);
		let apps: Vec<_> = groups["apps"].iter().map(|(v, _)| *v).collect();
		assert_eq!(apps, ["v1", "v1beta1"]);
		assert!(groups.contains_key("rbac.authorization.k8s.io"));
	}

	#[tokio::test]
	async fn test_preloaded_resources() {
		let server = HttpMockK8sServer::builder()
			.resources(vec![serde_json::json!({
				"apiVersion": "v1",
				"kind": "ConfigMap",
				"metadata": { "name": "settings", "namespace": "team-a" }
			})])
			.build()
			.start()
			.await;

		assert!(server.contains("v1", "ConfigMap", Some("team-a"), "settings"));
		assert!(!server.contains("v1", "ConfigMap", None, "settings"));
		assert!(server.contains("v1", "Namespace", None, "default"));
		assert_eq!(server.object_count(), 2);
	}
}
