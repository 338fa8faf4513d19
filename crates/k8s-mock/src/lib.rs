//! Mock Kubernetes API server for testing.
//!
//! Provides an HTTP server that can be used with kubeconfig-based connections.
//! It answers discovery, and keeps created objects in memory so that creates
//! and deletes behave like a real API server: a second create of the same
//! object conflicts, a create into a missing namespace is not found, and a
//! delete of a missing object is not found.

pub mod discovery;
mod helpers;
pub mod http;

pub use discovery::{DiscoveryMode, MockApiResource, MockDiscovery};
pub use http::{HttpMockK8sServer, RunningHttpMockK8sServer};
