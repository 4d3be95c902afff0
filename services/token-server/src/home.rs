//! Application home directory
//!
//! Holds `token.json` and optionally `config.toml`. Defaults to
//! `~/.token-server`; `[token] state_dir` overrides it.

use std::path::{Path, PathBuf};

use directories::BaseDirs;

pub const APP_DIR_NAME: &str = ".token-server";
pub const TOKEN_FILE: &str = "token.json";

/// `~/.token-server`, or `None` when no home directory can be determined.
pub fn default_app_home() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(APP_DIR_NAME))
}

/// Create the app home if absent. New directories get mode 0700; an
/// existing directory is left as it is.
pub fn ensure_app_home(path: &Path) -> common::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        return Err(common::Error::AppHome(format!(
            "{} exists and is not a directory",
            path.display()
        )));
    }

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path).map_err(|e| {
        common::Error::AppHome(format!("failed to create {}: {e}", path.display()))
    })
}

pub fn token_file(app_home: &Path) -> PathBuf {
    app_home.join(TOKEN_FILE)
}
