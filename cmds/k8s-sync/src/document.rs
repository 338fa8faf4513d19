//! Decoding of multi-document YAML/JSON blobs into resource documents.
//!
//! Documents are kept as untyped JSON objects so that any kind the cluster
//! knows about can be handled, including custom resources that were unknown
//! when this binary was built.

use std::{fmt, path::PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{instrument, warn};

/// Namespace assigned to namespace-scoped documents that do not specify one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Errors that make a whole blob undecodable.
///
/// Problems with individual documents are not errors: such documents are
/// skipped with a warning.
#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("input is not valid UTF-8")]
	InvalidUtf8(#[source] std::str::Utf8Error),

	#[error("malformed JSON stream after {decoded} document(s)")]
	JsonStream {
		decoded: usize,
		#[source]
		source: serde_json::Error,
	},
}

/// The (group, version, kind) triple identifying a resource schema.
///
/// Equality and hashing are by value, so two documents of the same type share
/// resolution results regardless of where they were decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId {
	pub group: String,
	pub version: String,
	pub kind: String,
}

impl TypeId {
	pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
		Self {
			group: group.into(),
			version: version.into(),
			kind: kind.into(),
		}
	}

	/// Parse an `apiVersion` string (`group/version`, or `version` for the core group).
	pub fn from_api_version(api_version: &str, kind: &str) -> Self {
		match api_version.split_once('/') {
			Some((group, version)) => Self::new(group, version, kind),
			None => Self::new("", api_version, kind),
		}
	}

	/// The `apiVersion` form of this identifier.
	pub fn api_version(&self) -> String {
		if self.group.is_empty() {
			self.version.clone()
		} else {
			format!("{}/{}", self.group, self.version)
		}
	}
}

impl fmt::Display for TypeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.api_version(), self.kind)
	}
}

/// Where a document came from. Only used for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
	pub path: Option<PathBuf>,
	pub index: usize,
}

impl fmt::Display for Origin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.path {
			Some(path) => write!(f, "{}#{}", path.display(), self.index),
			None => write!(f, "<input>#{}", self.index),
		}
	}
}

/// A single decoded resource.
///
/// `content` is the whole document body; the type identifier, name and
/// namespace are projections of it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDocument {
	type_id: TypeId,
	content: Map<String, Value>,
	origin: Origin,
}

impl ResourceDocument {
	/// Build a document from an already parsed value.
	///
	/// Returns `None` unless the value is an object with string `apiVersion`
	/// and `kind` fields.
	pub fn from_value(value: Value) -> Option<Self> {
		let Value::Object(content) = value else {
			return None;
		};
		let api_version = content.get("apiVersion")?.as_str()?;
		let kind = content.get("kind")?.as_str()?;
		let type_id = TypeId::from_api_version(api_version, kind);
		Some(Self {
			type_id,
			content,
			origin: Origin::default(),
		})
	}

	pub fn with_origin(mut self, origin: Origin) -> Self {
		self.origin = origin;
		self
	}

	pub fn type_id(&self) -> &TypeId {
		&self.type_id
	}

	pub fn kind(&self) -> &str {
		&self.type_id.kind
	}

	/// `metadata.name`, or an empty string when unset.
	pub fn name(&self) -> &str {
		self.metadata_str("name").unwrap_or("")
	}

	/// `metadata.namespace`, treating an empty string as unset.
	pub fn namespace(&self) -> Option<&str> {
		self.metadata_str("namespace").filter(|ns| !ns.is_empty())
	}

	pub fn content(&self) -> &Map<String, Value> {
		&self.content
	}

	pub fn origin(&self) -> &Origin {
		&self.origin
	}

	/// Assign `namespace` if the document has none. Returns whether it changed.
	pub fn default_namespace(&mut self, namespace: &str) -> bool {
		if self.namespace().is_some() {
			return false;
		}
		let metadata = self
			.content
			.entry("metadata")
			.or_insert_with(|| Value::Object(Map::new()));
		if !metadata.is_object() {
			*metadata = Value::Object(Map::new());
		}
		if let Value::Object(metadata) = metadata {
			metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
		}
		true
	}

	fn metadata_str(&self, field: &str) -> Option<&str> {
		self.content.get("metadata")?.get(field)?.as_str()
	}
}

impl fmt::Display for ResourceDocument {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.namespace() {
			Some(ns) => write!(f, "{} {}/{}", self.kind(), ns, self.name()),
			None => write!(f, "{}/{}", self.kind(), self.name()),
		}
	}
}

/// Decode every resource document in `bytes`.
///
/// `source` only labels the documents' origin.
#[instrument(skip(bytes), fields(len = bytes.len()))]
pub fn decode(bytes: &[u8], source: Option<PathBuf>) -> Result<Vec<ResourceDocument>, DecodeError> {
	let text = std::str::from_utf8(bytes).map_err(DecodeError::InvalidUtf8)?;
	let text = text.strip_prefix('\u{feff}').unwrap_or(text);

	let values = if looks_like_json(text) {
		decode_json_stream(text)?
	} else {
		decode_yaml_stream(text)
	};

	let mut documents = Vec::with_capacity(values.len());
	for (index, value) in values {
		let origin = Origin {
			path: source.clone(),
			index,
		};
		if value.is_null() {
			continue;
		}
		match ResourceDocument::from_value(value) {
			Some(doc) => documents.push(doc.with_origin(origin)),
			None => warn!(%origin, "document is not an object with apiVersion and kind, ignoring"),
		}
	}
	Ok(documents)
}

fn looks_like_json(text: &str) -> bool {
	matches!(text.trim_start().as_bytes().first(), Some(b'{' | b'['))
}

fn decode_json_stream(text: &str) -> Result<Vec<(usize, Value)>, DecodeError> {
	let mut values = Vec::new();
	for (index, value) in serde_json::Deserializer::from_str(text)
		.into_iter::<Value>()
		.enumerate()
	{
		let value = value.map_err(|source| DecodeError::JsonStream {
			decoded: index,
			source,
		})?;
		values.push((index, value));
	}
	Ok(values)
}

fn decode_yaml_stream(text: &str) -> Vec<(usize, Value)> {
	let mut values = Vec::new();
	for (index, chunk) in split_yaml_documents(text).into_iter().enumerate() {
		if chunk.trim().is_empty() {
			continue;
		}
		let deserializer = serde_yaml::Deserializer::from_str(chunk);
		match Value::deserialize(deserializer) {
			Ok(value) => values.push((index, value)),
			Err(error) => warn!(index, %error, "unable to decode YAML document, ignoring"),
		}
	}
	values
}

/// Split a YAML stream on `---` separator lines.
///
/// Each chunk is parsed independently so that a syntax error only loses the
/// document that contains it. Whatever follows the marker on its line (an
/// inline document like `--- {kind: ...}`) starts the next chunk.
fn split_yaml_documents(text: &str) -> Vec<&str> {
	let mut chunks = Vec::new();
	let mut start = 0;
	let mut offset = 0;
	for line in text.split_inclusive('\n') {
		if is_separator(line) {
			chunks.push(&text[start..offset]);
			start = offset + SEPARATOR.len();
		}
		offset += line.len();
	}
	chunks.push(&text[start..]);
	chunks
}

const SEPARATOR: &str = "---";

fn is_separator(line: &str) -> bool {
	let Some(rest) = line.strip_prefix(SEPARATOR) else {
		return false;
	};
	rest.is_empty() || rest.starts_with(char::is_whitespace)
}

#[cfg(test)]
mod tests {
	use indoc::indoc;

	use super::*;

	fn names(docs: &[ResourceDocument]) -> Vec<&str> {
		docs.iter().map(|d| d.name()).collect()
	}

	#[test]
	fn test_type_id_from_api_version() {
		let core = TypeId::from_api_version("v1", "ConfigMap");
		assert_eq!(core, TypeId::new("", "v1", "ConfigMap"));
		assert_eq!(core.api_version(), "v1");

		let apps = TypeId::from_api_version("apps/v1", "Deployment");
		assert_eq!(apps.group, "apps");
		assert_eq!(apps.version, "v1");
		assert_eq!(apps.to_string(), "apps/v1/Deployment");
	}

	#[test]
	fn test_decode_multi_document_yaml() {
		let input = indoc! {"
			apiVersion: v1
			kind: Namespace
			metadata:
			  name: team-a
			---
			apiVersion: v1
			kind: ConfigMap
			metadata:
			  name: settings
			  namespace: team-a
			data:
			  key: value
		"};

		let docs = decode(input.as_bytes(), None).unwrap();
		assert_eq!(names(&docs), vec!["team-a", "settings"]);
		assert_eq!(docs[0].namespace(), None);
		assert_eq!(docs[1].namespace(), Some("team-a"));
		assert_eq!(docs[1].content()["data"]["key"], "value");
	}

	#[test]
	fn test_decode_skips_invalid_documents_in_order() {
		let input = indoc! {"
			apiVersion: v1
			kind: ConfigMap
			metadata:
			  name: first
			---
			this: is: not: yaml
			---
			- just
			- a list
			---
			apiVersion: v1
			kind: ConfigMap
			metadata:
			  name: second
			---
			metadata:
			  name: no-kind
			---
			apiVersion: v1
			kind: Secret
			metadata:
			  name: third
		"};

		let docs = decode(input.as_bytes(), None).unwrap();
		assert_eq!(names(&docs), vec!["first", "second", "third"]);
	}

	#[test]
	fn test_decode_empty_and_whitespace() {
		assert!(decode(b"", None).unwrap().is_empty());
		assert!(decode(b"  \n\t\n", None).unwrap().is_empty());
		assert!(decode(b"---\n---\n# only a comment\n", None).unwrap().is_empty());
	}

	#[test]
	fn test_decode_same_type_twice_keeps_both() {
		let input = indoc! {"
			apiVersion: v1
			kind: ConfigMap
			metadata:
			  name: a
			---
			apiVersion: v1
			kind: ConfigMap
			metadata:
			  name: b
		"};

		let docs = decode(input.as_bytes(), None).unwrap();
		assert_eq!(docs.len(), 2);
		assert_eq!(docs[0].type_id(), docs[1].type_id());
	}

	#[test]
	fn test_decode_json_stream() {
		let input = r#"
			{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "one"}}
			{"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "two"}}
		"#;

		let docs = decode(input.as_bytes(), None).unwrap();
		assert_eq!(names(&docs), vec!["one", "two"]);
		assert_eq!(docs[1].type_id().group, "apps");
	}

	#[test]
	fn test_decode_truncated_json_is_fatal() {
		let input = r#"{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "x"}} {"apiVersion": "#;

		let err = decode(input.as_bytes(), None).unwrap_err();
		assert!(matches!(err, DecodeError::JsonStream { decoded: 1, .. }));
	}

	#[test]
	fn test_decode_invalid_utf8_is_fatal() {
		let err = decode(&[0x61, 0xff, 0xfe, 0x0a], None).unwrap_err();
		assert!(matches!(err, DecodeError::InvalidUtf8(_)));
	}

	#[test]
	fn test_decode_preserves_key_order() {
		let input = indoc! {"
			kind: ConfigMap
			apiVersion: v1
			metadata:
			  name: ordered
			data:
			  zeta: '1'
			  alpha: '2'
		"};

		let docs = decode(input.as_bytes(), None).unwrap();
		let keys: Vec<_> = docs[0].content().keys().map(String::as_str).collect();
		assert_eq!(keys, vec!["kind", "apiVersion", "metadata", "data"]);
		let data: Vec<_> = docs[0].content()["data"]
			.as_object()
			.unwrap()
			.keys()
			.map(String::as_str)
			.collect();
		assert_eq!(data, vec!["zeta", "alpha"]);
	}

	#[test]
	fn test_decode_records_origin() {
		let input = "---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: x\n";
		let docs = decode(input.as_bytes(), Some(PathBuf::from("dir/x.yaml"))).unwrap();
		assert_eq!(docs[0].origin().to_string(), "dir/x.yaml#1");
	}

	#[test]
	fn test_decode_document_on_separator_line() {
		let input = indoc! {"
			--- {apiVersion: v1, kind: ConfigMap, metadata: {name: inline}}
			---
			apiVersion: v1
			kind: ConfigMap
			metadata:
			  name: second
			--- # trailing comment
		"};

		let docs = decode(input.as_bytes(), None).unwrap();
		assert_eq!(names(&docs), vec!["inline", "second"]);
	}

	#[test]
	fn test_split_keeps_text_after_marker() {
		let chunks = split_yaml_documents("a: 1\n--- b: 2\n---\nc: 3\n");
		assert_eq!(chunks, vec!["a: 1\n", " b: 2\n", "\nc: 3\n"]);
	}

	#[test]
	fn test_separator_detection() {
		assert!(is_separator("---\n"));
		assert!(is_separator("--- # comment\n"));
		assert!(is_separator("---"));
		assert!(!is_separator("----\n"));
		assert!(!is_separator("  ---\n"));
	}

	#[test]
	fn test_default_namespace() {
		let mut doc = ResourceDocument::from_value(serde_json::json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {"name": "x", "namespace": ""}
		}))
		.unwrap();
		assert_eq!(doc.namespace(), None);

		assert!(doc.default_namespace(DEFAULT_NAMESPACE));
		assert_eq!(doc.namespace(), Some("default"));
		assert!(!doc.default_namespace("other"));
		assert_eq!(doc.namespace(), Some("default"));
	}

	#[test]
	fn test_default_namespace_without_metadata() {
		let mut doc = ResourceDocument::from_value(serde_json::json!({
			"apiVersion": "v1",
			"kind": "ConfigMap"
		}))
		.unwrap();
		assert_eq!(doc.name(), "");

		doc.default_namespace("ns");
		assert_eq!(doc.content()["metadata"]["namespace"], "ns");
	}
}
