//! Test infrastructure shared across the workspace.
//!
//! Integration tests write artifacts (reduced light curves, diagnostics
//! records) into `<workspace root>/test_output/` so they can be inspected
//! after a run. Nested paths such as `"segments/seg001.json"` get their
//! parent directories created on demand.
//!
//! ```rust
//! use test_helpers::output_path;
//!
//! let path = output_path("white_light.json");
//! std::fs::write(&path, "[]").unwrap();
//! assert!(path.exists());
//! ```

use once_cell::sync::Lazy;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the artifact directory below the workspace root.
pub const OUTPUT_DIR_NAME: &str = "test_output";

#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("cannot read the current directory: {0}")]
    CurrentDir(#[source] io::Error),
    /// No ancestor of `start` holds a `Cargo.toml` declaring `[workspace]`.
    #[error("no workspace manifest above {}", .0.display())]
    NoWorkspace(PathBuf),
}

fn declares_workspace(dir: &Path) -> bool {
    std::fs::read_to_string(dir.join("Cargo.toml"))
        .map(|manifest| manifest.lines().any(|line| line.trim() == "[workspace]"))
        .unwrap_or(false)
}

/// Nearest ancestor of `start` (itself included) whose manifest declares `[workspace]`.
pub fn workspace_root_from(start: &Path) -> Result<PathBuf, TestHelperError> {
    start
        .ancestors()
        .find(|dir| declares_workspace(dir))
        .map(Path::to_path_buf)
        .ok_or_else(|| TestHelperError::NoWorkspace(start.to_path_buf()))
}

/// Workspace root above the current directory.
pub fn find_project_root() -> Result<PathBuf, TestHelperError> {
    let cwd = std::env::current_dir().map_err(TestHelperError::CurrentDir)?;
    workspace_root_from(&cwd)
}

static OUTPUT_DIR: Lazy<PathBuf> = Lazy::new(|| {
    let root = find_project_root().unwrap_or_else(|e| panic!("test artifacts need a root: {e}"));
    root.join(OUTPUT_DIR_NAME)
});

/// Directory for test artifacts, created if missing.
pub fn get_output_dir() -> PathBuf {
    std::fs::create_dir_all(&*OUTPUT_DIR)
        .unwrap_or_else(|e| panic!("cannot create {}: {e}", OUTPUT_DIR.display()));
    OUTPUT_DIR.clone()
}

/// Path of `path` inside the test output directory, with its parents created.
pub fn output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let full = get_output_dir().join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent)
            .unwrap_or_else(|e| panic!("cannot create {}: {e}", parent.display()));
    }
    full
}
