//! Collection of candidate document blobs from a file or directory target.

use std::{
	fs,
	path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::document::{self, DecodeError, ResourceDocument};

/// File extensions recognized when walking a directory.
pub const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

#[derive(Debug, Error)]
pub enum CollectError {
	#[error("target {} does not exist", .0.display())]
	NotFound(PathBuf),

	#[error("reading {}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("walking {}", path.display())]
	Walk {
		path: PathBuf,
		#[source]
		source: walkdir::Error,
	},

	#[error("decoding {}", path.display())]
	Decode {
		path: PathBuf,
		#[source]
		source: DecodeError,
	},
}

/// Raw contents of one file.
#[derive(Debug, Clone)]
pub struct Blob {
	pub path: PathBuf,
	pub bytes: Vec<u8>,
}

/// Whether `path` has one of [`MANIFEST_EXTENSIONS`].
pub fn is_manifest_file(path: &Path) -> bool {
	path.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext))
}

/// Collect blobs from `target`.
///
/// A file target is read as-is, whatever its extension. A directory target is
/// walked recursively in file-name order; files without a recognized extension
/// are skipped, as are files that cannot be read.
#[instrument]
pub fn collect(target: &Path) -> Result<Vec<Blob>, CollectError> {
	let metadata = fs::metadata(target).map_err(|source| {
		if source.kind() == std::io::ErrorKind::NotFound {
			CollectError::NotFound(target.to_path_buf())
		} else {
			CollectError::Read {
				path: target.to_path_buf(),
				source,
			}
		}
	})?;

	if !metadata.is_dir() {
		let bytes = fs::read(target).map_err(|source| CollectError::Read {
			path: target.to_path_buf(),
			source,
		})?;
		return Ok(vec![Blob {
			path: target.to_path_buf(),
			bytes,
		}]);
	}

	let mut blobs = Vec::new();
	let walker = WalkDir::new(target)
		.follow_links(true)
		.sort_by_file_name()
		.into_iter();

	for entry in walker {
		let entry = entry.map_err(|source| CollectError::Walk {
			path: target.to_path_buf(),
			source,
		})?;
		let path = entry.path();

		if entry.file_type().is_dir() {
			if entry.depth() > 0 {
				debug!(path = %path.display(), "reading directory");
			}
			continue;
		}

		if !is_manifest_file(path) {
			info!(path = %path.display(), "not a YAML or JSON file, ignoring");
			continue;
		}

		match fs::read(path) {
			Ok(bytes) => blobs.push(Blob {
				path: path.to_path_buf(),
				bytes,
			}),
			Err(error) => warn!(path = %path.display(), %error, "unable to read file, ignoring"),
		}
	}

	Ok(blobs)
}

/// Collect and decode every document under `target`, in collection order.
pub fn load_documents(target: &Path) -> Result<Vec<ResourceDocument>, CollectError> {
	let mut documents = Vec::new();
	for blob in collect(target)? {
		let decoded = document::decode(&blob.bytes, Some(blob.path.clone())).map_err(|source| {
			CollectError::Decode {
				path: blob.path,
				source,
			}
		})?;
		documents.extend(decoded);
	}
	Ok(documents)
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use assert_matches::assert_matches;
	use tempfile::TempDir;

	use super::*;
	use crate::test_utils::LogCapture;

	fn config_map(name: &str) -> String {
		format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n")
	}

	fn write(dir: &Path, rel: &str, contents: &str) {
		let path = dir.join(rel);
		fs::create_dir_all(path.parent().unwrap()).unwrap();
		fs::write(path, contents).unwrap();
	}

	#[test]
	fn test_collect_filters_extensions() {
		let dir = TempDir::new().unwrap();
		write(dir.path(), "a.yaml", &config_map("a"));
		write(dir.path(), "b.yml", &config_map("b"));
		write(
			dir.path(),
			"c.json",
			r#"{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "c"}}"#,
		);
		write(dir.path(), "d.txt", &config_map("d"));

		let logs = LogCapture::default();
		let blobs = logs.run(|| collect(dir.path())).unwrap();
		let files: Vec<_> = blobs
			.iter()
			.map(|b| b.path.file_name().unwrap().to_str().unwrap())
			.collect();
		assert_eq!(files, vec!["a.yaml", "b.yml", "c.json"]);

		let notices: Vec<_> = logs
			.contents()
			.lines()
			.filter(|line| line.contains("not a YAML or JSON file, ignoring"))
			.map(str::to_string)
			.collect();
		assert_eq!(notices.len(), 1);
		assert!(notices[0].contains("INFO"));
		assert!(notices[0].contains("d.txt"));

		let docs = load_documents(dir.path()).unwrap();
		let names: Vec<_> = docs.iter().map(|d| d.name()).collect();
		assert_eq!(names, vec!["a", "b", "c"]);
	}

	#[test]
	fn test_collect_recurses_without_duplicates() {
		let dir = TempDir::new().unwrap();
		write(dir.path(), "top.yaml", &config_map("top"));
		write(dir.path(), "one/mid.yaml", &config_map("mid"));
		write(dir.path(), "one/two/three/deep.yml", &config_map("deep"));
		write(
			dir.path(),
			"one/two/many.yaml",
			&format!("{}---\n{}", config_map("many-a"), config_map("many-b")),
		);

		let docs = load_documents(dir.path()).unwrap();
		let names: Vec<_> = docs.iter().map(|d| d.name()).collect();
		assert_eq!(names.len(), 5);
		let unique: HashSet<_> = names.iter().collect();
		assert_eq!(unique.len(), 5);
		for expected in ["top", "mid", "deep", "many-a", "many-b"] {
			assert!(names.contains(&expected), "missing {expected}");
		}
	}

	#[test]
	fn test_collect_single_file_ignores_extension() {
		let dir = TempDir::new().unwrap();
		write(dir.path(), "manifest.txt", &config_map("plain"));

		let docs = load_documents(&dir.path().join("manifest.txt")).unwrap();
		assert_eq!(docs.len(), 1);
		assert_eq!(docs[0].name(), "plain");
	}

	#[test]
	fn test_collect_missing_target() {
		let dir = TempDir::new().unwrap();
		let missing = dir.path().join("nope");

		assert_matches!(collect(&missing), Err(CollectError::NotFound(p)) if p == missing);
	}

	#[test]
	fn test_load_documents_undecodable_blob() {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join("bad.json"), b"{\"apiVersion\": ").unwrap();

		assert_matches!(
			load_documents(dir.path()),
			Err(CollectError::Decode { path, .. }) if path.ends_with("bad.json")
		);
	}

	#[test]
	fn test_empty_directory() {
		let dir = TempDir::new().unwrap();
		assert!(load_documents(dir.path()).unwrap().is_empty());
	}
}
