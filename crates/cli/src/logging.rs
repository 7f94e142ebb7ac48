use tracing_subscriber::EnvFilter;

/// Installs the global `fmt` subscriber.
///
/// `RUST_LOG` wins over the configured filter, which wins over `-v`.
pub fn init_logging(verbose: u8, configured: Option<&str>) {
	let filter = EnvFilter::try_from_default_env()
		.ok()
		.or_else(|| configured.and_then(|directives| EnvFilter::try_new(directives).ok()))
		.unwrap_or_else(|| EnvFilter::new(default_directives(verbose)));

	let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn default_directives(verbose: u8) -> &'static str {
	match verbose {
		0 => "warn",
		1 => "info",
		_ => "debug",
	}
}
