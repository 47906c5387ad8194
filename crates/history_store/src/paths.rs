use std::path::{Path, PathBuf};

pub const HISTORY_DIR: &str = ".ask";
pub const HISTORY_FILE_NAME: &str = "history.json";

#[must_use]
pub fn history_root(cwd: &Path) -> PathBuf {
    cwd.join(HISTORY_DIR)
}

/// `<cwd>/.ask/history.json`
#[must_use]
pub fn default_history_path(cwd: &Path) -> PathBuf {
    history_root(cwd).join(HISTORY_FILE_NAME)
}
