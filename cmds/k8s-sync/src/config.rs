//! Settings file support.
//!
//! A `.k8s-sync.yaml` file placed next to (or anywhere above) the target path
//! provides defaults for command-line flags. k8s-sync searches from the target
//! directory upward to the filesystem root and uses the first file found.

use std::{
	fs,
	path::{Path, PathBuf},
	time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;

/// The name of the settings file k8s-sync looks for
pub const CONFIG_FILE_NAME: &str = ".k8s-sync.yaml";

/// Default seconds between convergence rounds
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Contents of `.k8s-sync.yaml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
	/// Upper bound, in seconds, of the random delay between apply rounds
	pub interval: Option<u64>,

	/// Kubeconfig context to use
	pub context: Option<String>,

	/// Kubeconfig file to use. Relative paths are resolved against the
	/// directory containing the settings file.
	pub kubeconfig: Option<PathBuf>,

	/// Per-request read timeout in seconds
	pub request_timeout: Option<u64>,
}

impl Settings {
	/// Load settings for `target`, searching upward from it.
	pub fn load_for_target(target: &Path) -> Result<Option<Self>> {
		let start = if target.is_dir() {
			target
		} else {
			target.parent().unwrap_or(Path::new("."))
		};
		match find_config_file(start) {
			Some(path) => Self::load_from_file(&path).map(Some),
			None => Ok(None),
		}
	}

	/// Load settings from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)
			.with_context(|| format!("failed to read config file: {}", path.display()))?;
		let mut settings: Settings = if is_blank(&content) {
			Settings::default()
		} else {
			serde_yaml::from_str(&content)
				.with_context(|| format!("failed to parse config file: {}", path.display()))?
		};

		if let (Some(kubeconfig), Some(dir)) = (&settings.kubeconfig, path.parent()) {
			if kubeconfig.is_relative() {
				settings.kubeconfig = Some(dir.join(kubeconfig));
			}
		}
		Ok(settings)
	}

	pub fn interval(&self) -> Option<Duration> {
		self.interval.map(Duration::from_secs)
	}

	pub fn request_timeout(&self) -> Option<Duration> {
		self.request_timeout.map(Duration::from_secs)
	}
}

/// Only whitespace and comments.
fn is_blank(content: &str) -> bool {
	content
		.lines()
		.map(str::trim)
		.all(|line| line.is_empty() || line.starts_with('#'))
}

/// Search for a settings file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let start = start_dir
		.canonicalize()
		.unwrap_or_else(|_| start_dir.to_path_buf());

	start
		.ancestors()
		.map(|dir| dir.join(CONFIG_FILE_NAME))
		.find(|candidate| candidate.is_file())
}
