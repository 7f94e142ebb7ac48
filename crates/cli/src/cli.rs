use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "inportd")]
#[command(about = "inport - input capture and emulated input broker")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Configuration file (defaults to $XDG_CONFIG_HOME/inport/config.json)
	#[arg(short, long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Socket callers connect to
	#[arg(long, global = true, value_name = "PATH")]
	pub socket: Option<PathBuf>,

	/// Socket of the privileged input-capture backend
	#[arg(long, global = true, value_name = "PATH")]
	pub backend_socket: Option<PathBuf>,

	/// Emulated-input (EIS) socket handed out by Connect
	#[arg(long, global = true, value_name = "PATH")]
	pub eis_socket: Option<PathBuf>,

	/// Refuse all emulated-input requests
	#[arg(long, global = true)]
	pub disable_emulated_input: bool,

	#[command(subcommand)]
	pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
	/// Run the broker (default)
	#[default]
	Serve,
	/// Print the resolved configuration and exit
	Config,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serve_is_the_default_command() {
		let cli = Cli::try_parse_from(["inportd"]).unwrap();
		assert_eq!(cli.command, None);
		assert_eq!(cli.command.unwrap_or_default(), Commands::Serve);
		assert_eq!(cli.verbose, 0);
	}

	#[test]
	fn global_flags_after_subcommand() {
		let cli = Cli::try_parse_from(["inportd", "config", "-vv", "--socket", "/tmp/bus.sock", "--disable-emulated-input"]).unwrap();
		assert_eq!(cli.command, Some(Commands::Config));
		assert_eq!(cli.verbose, 2);
		assert_eq!(cli.socket, Some(PathBuf::from("/tmp/bus.sock")));
		assert!(cli.disable_emulated_input);
	}

	#[test]
	fn unknown_subcommand_is_rejected() {
		assert!(Cli::try_parse_from(["inportd", "frobnicate"]).is_err());
	}
}
