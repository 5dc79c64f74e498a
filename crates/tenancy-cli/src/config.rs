//! Settings discovery

use anyhow::Context;
use std::path::{Path, PathBuf};
use tenancy_common::Settings;

/// Per-user settings file, `~/.config/tenancy/tenancy.toml` on Linux
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tenancy").join("tenancy.toml"))
}

/// Load settings from `explicit`, else the per-user file if it exists, else
/// defaults. Environment overrides apply in every case.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Settings> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| default_path().filter(|p| p.exists()));

    match path {
        Some(path) => Settings::load(&path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => {
            tracing::debug!("no settings file, using defaults and environment");
            Ok(Settings::default().with_env_overrides(|k| std::env::var(k).ok()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = load(Some(Path::new("/nonexistent/tenancy.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/tenancy.toml"));
    }

    #[test]
    fn test_default_path_name() {
        if let Some(path) = default_path() {
            assert!(path.ends_with("tenancy/tenancy.toml"));
        }
    }
}
