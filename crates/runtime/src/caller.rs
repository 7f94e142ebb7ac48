//! Caller identity: the requesting principal and its resolved application id.

use std::path::PathBuf;

use tracing::debug;

/// A resolved caller of a broker method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
	/// Unique bus name of the caller, e.g. `:1.42`.
	pub sender: String,
	/// Application id; empty for unsandboxed host applications.
	pub app_id: String,
}

impl Caller {
	pub fn new(sender: impl Into<String>, app_id: impl Into<String>) -> Self {
		Self {
			sender: sender.into(),
			app_id: app_id.into(),
		}
	}
}

/// Maps a bus peer to its application id.
pub trait AppInfoResolver: Send + Sync {
	/// Resolves the app id of `sender`, whose process id is `pid` when known.
	fn resolve(&self, sender: &str, pid: Option<u32>) -> String;
}

/// Resolves sandboxed apps through `/proc/<pid>/root/.flatpak-info`; every
/// other peer is a host app with an empty id.
#[derive(Debug, Clone)]
pub struct ProcAppResolver {
	proc_root: PathBuf,
}

impl ProcAppResolver {
	pub fn new() -> Self {
		Self::with_proc_root("/proc")
	}

	pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
		Self { proc_root: proc_root.into() }
	}
}

impl Default for ProcAppResolver {
	fn default() -> Self {
		Self::new()
	}
}

impl AppInfoResolver for ProcAppResolver {
	fn resolve(&self, sender: &str, pid: Option<u32>) -> String {
		let Some(pid) = pid else {
			return String::new();
		};
		let info_path = self.proc_root.join(pid.to_string()).join("root").join(".flatpak-info");
		match std::fs::read_to_string(&info_path) {
			Ok(contents) => {
				let app_id = parse_flatpak_app_id(&contents).unwrap_or_default();
				debug!(target = "inport.caller", sender, pid, app_id = %app_id, "resolved sandboxed caller");
				app_id
			}
			Err(_) => String::new(),
		}
	}
}

/// Extracts `name=` from the `[Application]` group of a `.flatpak-info` file.
fn parse_flatpak_app_id(contents: &str) -> Option<String> {
	let mut in_application = false;
	for line in contents.lines().map(str::trim) {
		if line.starts_with('[') {
			in_application = line == "[Application]";
			continue;
		}
		if in_application {
			if let Some(name) = line.strip_prefix("name=") {
				return Some(name.trim().to_string());
			}
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_application_name() {
		let info = "[Application]\nname=org.example.App\nruntime=x\n\n[Instance]\nname=other\n";
		assert_eq!(parse_flatpak_app_id(info).as_deref(), Some("org.example.App"));
	}

	#[test]
	fn ignores_name_outside_application_group() {
		assert_eq!(parse_flatpak_app_id("[Instance]\nname=other\n"), None);
	}

	#[test]
	fn resolver_reads_fake_proc_tree() {
		let tmp = tempfile::TempDir::new().unwrap();
		let root = tmp.path().join("77").join("root");
		std::fs::create_dir_all(&root).unwrap();
		std::fs::write(root.join(".flatpak-info"), "[Application]\nname=org.example.Sandboxed\n").unwrap();

		let resolver = ProcAppResolver::with_proc_root(tmp.path());
		assert_eq!(resolver.resolve(":1.5", Some(77)), "org.example.Sandboxed");
		assert_eq!(resolver.resolve(":1.5", Some(78)), "");
		assert_eq!(resolver.resolve(":1.5", None), "");
	}
}
