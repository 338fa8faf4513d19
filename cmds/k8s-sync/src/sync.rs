//! Convergence loop.
//!
//! `apply` keeps re-attempting documents whose creation failed because a
//! dependency is missing, sleeping a random fraction of the configured
//! interval between rounds. There is no retry cap and no overall timeout: a
//! dependency that never appears keeps the loop going until the process is
//! interrupted. Every round logs its progress so a stuck run is visible.
//!
//! `delete` makes a single pass and attempts each document exactly once.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{info, instrument};

use crate::{
	document::ResourceDocument,
	k8s::{
		discovery::{ResolveError, TypeCatalog},
		facade::{ClientError, CreateOutcome, ResourceApi, ResourceFacade},
	},
};

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum SyncError {
	#[error(transparent)]
	Resolve(#[from] ResolveError),
}

/// Waits between convergence rounds.
#[allow(async_fn_in_trait)]
pub trait Sleeper {
	async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
	async fn sleep(&self, duration: Duration) {
		tokio::time::sleep(duration).await;
	}
}

impl<S: Sleeper> Sleeper for &S {
	async fn sleep(&self, duration: Duration) {
		(**self).sleep(duration).await;
	}
}

/// Uniformly random duration in `[0, interval)`, at millisecond granularity.
pub fn jitter(interval: Duration) -> Duration {
	let millis = interval.as_millis().min(u128::from(u64::MAX)) as u64;
	if millis == 0 {
		return Duration::ZERO;
	}
	Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}

/// A document that was abandoned.
#[derive(Debug)]
pub struct Failure {
	/// `Kind namespace/name` of the document.
	pub resource: String,
	pub error: ClientError,
}

#[derive(Debug, Default)]
pub struct ApplyReport {
	pub total: usize,
	pub created: usize,
	pub already_existed: usize,
	pub failed: Vec<Failure>,
	pub rounds: usize,
}

impl ApplyReport {
	/// Documents that ended up present in the cluster.
	pub fn applied(&self) -> usize {
		self.created + self.already_existed
	}
}

#[derive(Debug, Default)]
pub struct DeleteReport {
	pub total: usize,
	pub deleted: usize,
	pub failed: Vec<Failure>,
}

/// Drives documents against the cluster using a fixed type catalog.
pub struct Converger<'c, A, S = TokioSleeper> {
	catalog: &'c TypeCatalog,
	facade: ResourceFacade<A>,
	sleeper: S,
	interval: Duration,
}

impl<'c, A: ResourceApi> Converger<'c, A, TokioSleeper> {
	pub fn new(catalog: &'c TypeCatalog, api: A, interval: Duration) -> Self {
		Self {
			catalog,
			facade: ResourceFacade::new(api),
			sleeper: TokioSleeper,
			interval,
		}
	}
}

impl<'c, A: ResourceApi, S: Sleeper> Converger<'c, A, S> {
	pub fn with_sleeper<T: Sleeper>(self, sleeper: T) -> Converger<'c, A, T> {
		Converger {
			catalog: self.catalog,
			facade: self.facade,
			sleeper,
			interval: self.interval,
		}
	}

	pub fn api(&self) -> &A {
		self.facade.api()
	}

	/// Create every document, retrying those with missing dependencies until
	/// none are left.
	///
	/// Only a type-resolution miss is returned as an error; per-document
	/// failures are collected in the report.
	#[instrument(skip_all, fields(total = documents.len(), interval = ?self.interval))]
	pub async fn apply(&self, documents: Vec<ResourceDocument>) -> Result<ApplyReport, SyncError> {
		let mut report = ApplyReport {
			total: documents.len(),
			..ApplyReport::default()
		};
		let mut pending = documents;

		while !pending.is_empty() {
			report.rounds += 1;
			let round = std::mem::take(&mut pending);
			tracing::debug!(round = report.rounds, pending = round.len(), "starting round");

			for mut document in round {
				let address = self.catalog.resolve(document.type_id())?;
				match self.facade.create(address, &mut document).await {
					CreateOutcome::Created => report.created += 1,
					CreateOutcome::AlreadyExists => report.already_existed += 1,
					CreateOutcome::MissingDependency(_) => pending.push(document),
					CreateOutcome::Failed(error) => report.failed.push(Failure {
						resource: document.to_string(),
						error,
					}),
				}
			}

			if !pending.is_empty() {
				info!(
					applied = report.applied(),
					total = report.total,
					"{} of {} resources created",
					report.applied(),
					report.total
				);
				info!(
					pending = pending.len(),
					"could not reconcile all resources against the cluster, retrying in {} seconds",
					self.interval.as_secs()
				);
				self.sleeper.sleep(jitter(self.interval)).await;
			}
		}

		Ok(report)
	}

	/// Delete every document once, continuing past individual failures.
	#[instrument(skip_all, fields(total = documents.len()))]
	pub async fn delete(&self, documents: Vec<ResourceDocument>) -> Result<DeleteReport, SyncError> {
		let mut report = DeleteReport {
			total: documents.len(),
			..DeleteReport::default()
		};

		for mut document in documents {
			let address = self.catalog.resolve(document.type_id())?;
			match self.facade.delete(address, &mut document).await {
				Ok(()) => report.deleted += 1,
				Err(error) => report.failed.push(Failure {
					resource: document.to_string(),
					error,
				}),
			}
		}

		Ok(report)
	}
}
