pub mod commands;
pub mod config;
pub mod document;
pub mod files;
pub mod k8s;
pub mod sync;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
