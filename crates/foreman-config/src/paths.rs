//! State directory resolution.

use std::path::PathBuf;

/// Environment variable for a custom state directory.
const STATE_DIR_ENV: &str = "FOREMAN_STATE_DIR";

/// Default state directory name under home.
const DEFAULT_STATE_DIR: &str = ".foreman";

/// Get the foreman state directory.
///
/// Resolution order:
/// 1. `FOREMAN_STATE_DIR` environment variable if set
/// 2. `~/.foreman` if the home directory is available
/// 3. `.foreman` in the current directory as a fallback
pub fn state_dir() -> PathBuf {
    std::env::var(STATE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(DEFAULT_STATE_DIR))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_dir_resolves() {
        let dir = state_dir();
        assert!(dir.is_absolute() || dir.ends_with(".foreman"));
    }
}
