//! Agent binary discovery and subprocess environment.
//!
//! GUI-launched hosts often inherit a minimal `PATH` that misses the
//! directories CLI installers use, so the search path is widened with a fixed
//! list of common locations before spawning. This is a host-environment
//! workaround and deliberately lives outside the protocol state machine.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::process::Command;

/// Directories commonly holding CLI installs but absent from GUI `PATH`s.
fn common_install_dirs() -> Vec<PathBuf> {
    let mut dirs_list = vec![
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/usr/bin"),
        PathBuf::from("/home/linuxbrew/.linuxbrew/bin"),
    ];
    if let Some(home) = dirs::home_dir() {
        dirs_list.push(home.join(".local/bin"));
        dirs_list.push(home.join(".claude/local"));
    }
    dirs_list
}

/// The inherited `PATH` widened with the common install directories,
/// skipping entries already present.
#[must_use]
pub fn extended_path() -> OsString {
    let current = env::var_os("PATH").unwrap_or_default();
    let existing: Vec<PathBuf> = env::split_paths(&current).collect();

    let mut combined: Vec<PathBuf> = common_install_dirs()
        .into_iter()
        .filter(|p| !existing.contains(p))
        .collect();
    combined.extend(existing);

    env::join_paths(combined).unwrap_or(current)
}

/// Apply the widened search path and a UTF-8 locale to a subprocess, so the
/// binary is found from GUI hosts and its output decodes predictably.
pub fn apply_subprocess_env(cmd: &mut Command) {
    cmd.env("PATH", extended_path())
        .env("LANG", "en_US.UTF-8")
        .env("LC_ALL", "en_US.UTF-8");
}

/// Resolve the agent binary to invoke.
///
/// An absolute configured path that exists wins. Otherwise the common install
/// directories are probed for the binary by name, canonicalizing the first
/// hit. Failing both, the configured value is returned as-is and left to the
/// widened `PATH` at spawn time.
#[must_use]
pub fn find_binary(configured: &str) -> PathBuf {
    let configured_path = Path::new(configured);
    if configured_path.is_absolute() && configured_path.exists() {
        return configured_path.to_path_buf();
    }

    for dir in common_install_dirs() {
        let candidate = dir.join(configured);
        if candidate.exists() {
            return candidate.canonicalize().unwrap_or(candidate);
        }
    }

    configured_path.to_path_buf()
}
