use clap::Parser;
use inport_cli::cli::{Cli, Commands};
use inport_cli::config::Config;
use inport_cli::{daemon, logging};
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	let settings = match Config::load_for(&cli).and_then(|config| config.resolve()) {
		Ok(settings) => settings,
		Err(err) => {
			logging::init_logging(cli.verbose, None);
			error!(target = "inport.daemon", error = %err, "invalid configuration");
			std::process::exit(1);
		}
	};
	logging::init_logging(cli.verbose, settings.log_filter.as_deref());

	let result = match cli.command.unwrap_or_default() {
		Commands::Serve => daemon::serve(settings).await,
		Commands::Config => settings.print(),
	};

	if let Err(err) = result {
		error!(target = "inport.daemon", error = format!("{err:#}"), "inportd failed");
		std::process::exit(1);
	}
}
