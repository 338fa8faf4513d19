use anyhow::Result;
use clap::{Parser, Subcommand};
use k8s_sync::{
	commands::{self, BrokenPipeGuard},
	telemetry,
};
use tracing::Level;

#[derive(Parser)]
#[command(name = "k8s-sync")]
#[command(about = "Create and delete Kubernetes manifests until the cluster converges", long_about = None)]
#[command(version)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Create the manifests, retrying until every dependency is in place
	#[command(alias = "reconcile")]
	Apply(commands::apply::ApplyArgs),

	/// Delete the manifests from the cluster
	#[command(alias = "cleanup")]
	Delete(commands::delete::DeleteArgs),
}

impl Commands {
	fn log_level(&self) -> Option<Level> {
		match self {
			Commands::Apply(args) => args.target.log_level,
			Commands::Delete(args) => args.target.log_level,
		}
	}
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let _telemetry = telemetry::init(cli.command.log_level())?;

	let stdout = BrokenPipeGuard::new(std::io::stdout());

	match cli.command {
		Commands::Apply(args) => commands::apply::run(args, stdout),
		Commands::Delete(args) => commands::delete::run(args, stdout),
	}
}

#[cfg(test)]
mod tests {
	use clap::CommandFactory;

	use super::*;

	#[test]
	fn test_cli_is_valid() {
		Cli::command().debug_assert();
	}

	#[test]
	fn test_aliases() {
		let cli = Cli::parse_from(["k8s-sync", "reconcile", "-f", "manifests", "-i", "1"]);
		assert!(matches!(cli.command, Commands::Apply(ref args) if args.interval == Some(1)));

		let cli = Cli::parse_from(["k8s-sync", "cleanup", "-f", "manifests"]);
		assert!(matches!(cli.command, Commands::Delete(_)));
	}

	#[test]
	fn test_delete_has_no_interval() {
		assert!(Cli::try_parse_from(["k8s-sync", "delete", "-f", "m", "-i", "1"]).is_err());
	}
}
