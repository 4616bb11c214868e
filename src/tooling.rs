//! Resolves external tool binaries (`ghostscript`, `tesseract`) the same way
//! the original processor did: a bundled dependencies directory first, then
//! platform-standard install locations, then bare `PATH` lookup.

use std::path::{Path, PathBuf};

/// Resolves the executable path for an external tool, in priority order:
/// bundled `dependencies/` directory adjacent to the running
/// executable → platform-specific standard install directories → `PATH`.
#[derive(Debug, Clone)]
pub struct ToolResolver {
    dependencies_dir: Option<PathBuf>,
}

impl ToolResolver {
    /// `dependencies_dir` overrides the default (a `dependencies` directory
    /// next to the current executable); pass `None` to use the default.
    pub fn new(dependencies_dir: Option<PathBuf>) -> Self {
        let dependencies_dir = dependencies_dir.or_else(default_dependencies_dir);
        Self { dependencies_dir }
    }

    /// Resolve `tool_name` (e.g. `"gs"`, `"tesseract"`) to a runnable path,
    /// or `None` if it cannot be found anywhere in the search order.
    pub fn resolve(&self, tool_name: &str) -> Option<PathBuf> {
        if let Some(dir) = &self.dependencies_dir {
            if let Some(found) = search_versioned_dir(dir, tool_name) {
                return Some(found);
            }
        }

        for dir in platform_install_dirs(tool_name) {
            let candidate = dir.join(executable_name(tool_name));
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        which_on_path(tool_name)
    }
}

fn default_dependencies_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.join("dependencies")))
}

/// Looks for `tool_name` directly under `dir`, or under any immediate
/// subdirectory (bundled installs are often versioned, e.g.
/// `dependencies/gs/gs10.02.1/bin/gs`), one level deep.
fn search_versioned_dir(dir: &Path, tool_name: &str) -> Option<PathBuf> {
    let exe_name = executable_name(tool_name);

    let direct = dir.join(&exe_name);
    if direct.is_file() {
        return Some(direct);
    }
    let direct_bin = dir.join("bin").join(&exe_name);
    if direct_bin.is_file() {
        return Some(direct_bin);
    }

    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let candidate = path.join(&exe_name);
        if candidate.is_file() {
            return Some(candidate);
        }
        let candidate_bin = path.join("bin").join(&exe_name);
        if candidate_bin.is_file() {
            return Some(candidate_bin);
        }
    }
    None
}

fn executable_name(tool_name: &str) -> String {
    if cfg!(windows) {
        format!("{tool_name}.exe")
    } else {
        tool_name.to_string()
    }
}

fn platform_install_dirs(tool_name: &str) -> Vec<PathBuf> {
    match std::env::consts::OS {
        "windows" => vec![
            PathBuf::from(format!(r"C:\Program Files\{tool_name}\bin")),
            PathBuf::from(format!(r"C:\Program Files (x86)\{tool_name}\bin")),
        ],
        "macos" => vec![
            PathBuf::from("/opt/homebrew/bin"),
            PathBuf::from("/usr/local/bin"),
        ],
        _ => vec![PathBuf::from("/usr/bin"), PathBuf::from("/usr/local/bin")],
    }
}

fn which_on_path(tool_name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    let exe_name = executable_name(tool_name);
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(&exe_name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_tool_directly_under_dependencies_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tool_path = dir.path().join(executable_name("gs"));
        std::fs::write(&tool_path, b"#!/bin/sh\n").unwrap();

        let resolver = ToolResolver::new(Some(dir.path().to_path_buf()));
        assert_eq!(resolver.resolve("gs"), Some(tool_path));
    }

    #[test]
    fn finds_tool_under_versioned_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let versioned = dir.path().join("gs10.02.1").join("bin");
        std::fs::create_dir_all(&versioned).unwrap();
        let tool_path = versioned.join(executable_name("gs"));
        std::fs::write(&tool_path, b"#!/bin/sh\n").unwrap();

        let resolver = ToolResolver::new(Some(dir.path().to_path_buf()));
        assert_eq!(resolver.resolve("gs"), Some(tool_path));
    }

    #[test]
    fn returns_none_when_tool_is_nowhere() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ToolResolver::new(Some(dir.path().to_path_buf()));
        assert_eq!(resolver.resolve("definitely-not-a-real-tool-xyz"), None);
    }
}
