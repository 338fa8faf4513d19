//! Common test utilities.

use std::{
	collections::{HashMap, HashSet},
	io,
	sync::{Arc, Mutex},
	time::Duration,
};

use tracing_subscriber::fmt::MakeWriter;

use crate::{
	document::ResourceDocument,
	k8s::{
		discovery::ResourceAddress,
		facade::{ClientError, ResourceApi},
	},
	sync::Sleeper,
};

/// Build a document from its identifying fields.
pub fn doc(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> ResourceDocument {
	let mut metadata = serde_json::json!({ "name": name });
	if let Some(ns) = namespace {
		metadata["namespace"] = serde_json::Value::String(ns.to_string());
	}
	ResourceDocument::from_value(serde_json::json!({
		"apiVersion": api_version,
		"kind": kind,
		"metadata": metadata,
	}))
	.expect("document has apiVersion and kind")
}

/// An API error carrying only a status code.
pub fn api_error(code: u16) -> ClientError {
	ClientError::Api {
		code,
		reason: String::new(),
		message: format!("status {code}"),
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
	Create,
	Delete,
}

/// One call observed by [`FakeApi`].
#[derive(Debug, Clone)]
pub struct Call {
	pub verb: Verb,
	pub plural: String,
	pub kind: String,
	pub namespace: Option<String>,
	pub name: String,
}

/// (kind, namespace, name)
type Key = (String, Option<String>, String);

#[derive(Default)]
struct FakeState {
	existing: HashSet<Key>,
	/// name -> resource that has to exist before it can be created
	requires: HashMap<String, Key>,
	/// name -> status code every create of it fails with
	broken: HashMap<String, u16>,
	calls: Vec<Call>,
}

/// In-memory [`ResourceApi`] with create-if-absent semantics.
#[derive(Default)]
pub struct FakeApi {
	state: Mutex<FakeState>,
}

impl FakeApi {
	/// Creating `name` fails with 404 until `kind`/`dep_name` exists.
	pub fn with_dependency(
		self,
		name: &str,
		kind: &str,
		dep_namespace: Option<&str>,
		dep_name: &str,
	) -> Self {
		self.state.lock().unwrap().requires.insert(
			name.to_string(),
			(
				kind.to_string(),
				dep_namespace.map(str::to_string),
				dep_name.to_string(),
			),
		);
		self
	}

	/// Creating `name` always fails with `code`.
	pub fn with_broken(self, name: &str, code: u16) -> Self {
		self.state
			.lock()
			.unwrap()
			.broken
			.insert(name.to_string(), code);
		self
	}

	pub fn with_existing(self, kind: &str, namespace: Option<&str>, name: &str) -> Self {
		self.state.lock().unwrap().existing.insert((
			kind.to_string(),
			namespace.map(str::to_string),
			name.to_string(),
		));
		self
	}

	pub fn calls(&self) -> Vec<Call> {
		self.state.lock().unwrap().calls.clone()
	}

	pub fn creates_of(&self, name: &str) -> usize {
		self.calls()
			.iter()
			.filter(|c| c.verb == Verb::Create && c.name == name)
			.count()
	}

	pub fn exists(&self, kind: &str, namespace: Option<&str>, name: &str) -> bool {
		self.state.lock().unwrap().existing.contains(&(
			kind.to_string(),
			namespace.map(str::to_string),
			name.to_string(),
		))
	}
}

impl ResourceApi for FakeApi {
	async fn create(
		&self,
		address: &ResourceAddress,
		namespace: Option<&str>,
		document: &ResourceDocument,
	) -> Result<(), ClientError> {
		let mut state = self.state.lock().unwrap();
		let key = (
			address.type_id.kind.clone(),
			namespace.map(str::to_string),
			document.name().to_string(),
		);
		state.calls.push(Call {
			verb: Verb::Create,
			plural: address.plural.clone(),
			kind: key.0.clone(),
			namespace: key.1.clone(),
			name: key.2.clone(),
		});

		if let Some(code) = state.broken.get(&key.2) {
			return Err(api_error(*code));
		}
		if let Some(dep) = state.requires.get(&key.2) {
			if !state.existing.contains(dep) {
				return Err(api_error(404));
			}
		}
		if !state.existing.insert(key) {
			return Err(api_error(409));
		}
		Ok(())
	}

	async fn delete(
		&self,
		address: &ResourceAddress,
		namespace: Option<&str>,
		name: &str,
	) -> Result<(), ClientError> {
		let mut state = self.state.lock().unwrap();
		let key = (
			address.type_id.kind.clone(),
			namespace.map(str::to_string),
			name.to_string(),
		);
		state.calls.push(Call {
			verb: Verb::Delete,
			plural: address.plural.clone(),
			kind: key.0.clone(),
			namespace: key.1.clone(),
			name: key.2.clone(),
		});

		if state.existing.remove(&key) {
			Ok(())
		} else {
			Err(api_error(404))
		}
	}
}

/// A [`Sleeper`] that returns immediately and remembers what it was asked.
#[derive(Default)]
pub struct RecordingSleeper {
	sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
	pub fn sleeps(&self) -> Vec<Duration> {
		self.sleeps.lock().unwrap().clone()
	}
}

impl Sleeper for RecordingSleeper {
	async fn sleep(&self, duration: Duration) {
		self.sleeps.lock().unwrap().push(duration);
	}
}

/// Log sink for asserting on what a piece of code reports.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
	/// Run `f` with every event (any level) formatted into this capture.
	pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
		let subscriber = tracing_subscriber::fmt()
			.with_max_level(tracing::Level::TRACE)
			.with_ansi(false)
			.with_writer(self.clone())
			.finish();
		tracing::subscriber::with_default(subscriber, f)
	}

	pub fn contents(&self) -> String {
		String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
	}
}

impl io::Write for LogCapture {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.lock().unwrap().extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl<'a> MakeWriter<'a> for LogCapture {
	type Writer = Self;

	fn make_writer(&'a self) -> Self::Writer {
		self.clone()
	}
}
