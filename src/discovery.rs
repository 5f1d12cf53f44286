//! Locating the wrapped program on `PATH`.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use crate::pty_session::is_executable;

/// First executable `name` on `path_var` whose canonical path differs from
/// `exclude`. Candidates that cannot be canonicalized are skipped.
pub fn find_in_path(name: &str, path_var: &OsStr, exclude: Option<&Path>) -> Option<PathBuf> {
    env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .filter(|candidate| is_executable(candidate))
        .find(|candidate| match fs::canonicalize(candidate) {
            Ok(resolved) => exclude != Some(resolved.as_path()),
            Err(_) => false,
        })
}

/// Find `name` on our `PATH`, skipping entries that resolve to the running
/// executable (a wrapper installed under the wrapped program's name).
pub fn find_wrapped_program(name: &str) -> Result<PathBuf> {
    let own = env::current_exe()
        .context("failed to get our executable path")?;
    let own = fs::canonicalize(&own)
        .with_context(|| format!("failed to resolve our executable path {}", own.display()))?;
    let path_var = env::var_os("PATH")
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("PATH is empty; cannot locate {name}"))?;
    let found = find_in_path(name, &path_var, Some(&own)).ok_or_else(|| {
        anyhow!("{name} not found in PATH (set --command, CLI_NTFY_COMMAND or `command` in the config file)")
    })?;
    tracing::debug!(program = %found.display(), "discovered wrapped program");
    Ok(found)
}
